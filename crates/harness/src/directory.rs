use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};

use iddir_core::{ids::RecordId, Aci, IdentityTuple, Pni, Record, ServiceId};
use iddir_engine::{
    DirectoryObserver, Engine, EngineConfig, EngineError, ReconcileOptions, ReconciliationResult,
};
use iddir_storage::{RecordWriter, SqliteStorage, StorageError};
use tempfile::TempDir;
use uuid::Uuid;

/// Deterministic PNI for tests; `pni(n) != pni(m)` for `n != m`.
pub fn pni(n: u128) -> Pni {
    Pni::from_uuid(Uuid::from_u128(0x5000_0000_0000_0000_0000_0000_0000_0000 | n))
}

/// Deterministic ACI for tests.
pub fn aci(n: u128) -> Aci {
    Aci::from_uuid(Uuid::from_u128(0xa000_0000_0000_0000_0000_0000_0000_0000 | n))
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ObservedEvent {
    Merge { old_id: RecordId, new_id: RecordId },
    NumberChanged { record_id: RecordId, old_e164: String, new_e164: String },
    SessionSwitchover(RecordId),
}

/// Collects every observer callback into a shared list.
#[derive(Clone, Default)]
pub struct RecordingObserver {
    events: Arc<Mutex<Vec<ObservedEvent>>>,
}

impl RecordingObserver {
    pub fn events(&self) -> Vec<ObservedEvent> {
        self.events.lock().map(|e| e.clone()).unwrap_or_default()
    }

    fn push(&self, event: ObservedEvent) {
        if let Ok(mut events) = self.events.lock() {
            events.push(event);
        }
    }
}

impl DirectoryObserver for RecordingObserver {
    fn on_merge(&self, old_id: RecordId, new_id: RecordId) {
        self.push(ObservedEvent::Merge { old_id, new_id });
    }

    fn on_number_changed(&self, record_id: RecordId, old_e164: &str, new_e164: &str) {
        self.push(ObservedEvent::NumberChanged {
            record_id,
            old_e164: old_e164.to_string(),
            new_e164: new_e164.to_string(),
        });
    }

    fn on_session_switchover(&self, record_id: RecordId) {
        self.push(ObservedEvent::SessionSwitchover(record_id));
    }
}

/// An engine over a private database with a recording observer attached.
pub struct TestDirectory {
    pub engine: Engine,
    observer: RecordingObserver,
    dir: Option<TempDir>,
}

impl TestDirectory {
    pub fn new() -> Result<Self, EngineError> {
        Self::with_config(EngineConfig::default())
    }

    pub fn with_config(config: EngineConfig) -> Result<Self, EngineError> {
        let storage = SqliteStorage::open_in_memory()?;
        Self::wrap(storage, config, None)
    }

    /// Backed by a file in a temporary directory, so it can be reopened.
    pub fn on_disk() -> Result<Self, Box<dyn std::error::Error>> {
        Self::on_disk_with_config(EngineConfig::default())
    }

    pub fn on_disk_with_config(config: EngineConfig) -> Result<Self, Box<dyn std::error::Error>> {
        let dir = tempfile::tempdir()?;
        let storage = SqliteStorage::open(&Self::db_path(&dir)?)?;
        Ok(Self::wrap(storage, config, Some(dir))?)
    }

    /// Drop the engine and open a fresh one over the same database file.
    pub fn reopen(&mut self) -> Result<(), Box<dyn std::error::Error>> {
        let dir = self.dir.as_ref().ok_or("in-memory directory cannot be reopened")?;
        let storage = SqliteStorage::open(&Self::db_path(dir)?)?;
        self.engine = Engine::with_config(storage, self.engine.config().clone())?;
        self.engine.add_observer(Box::new(self.observer.clone()));
        Ok(())
    }

    /// A second connection to the same database file, the way another
    /// process would hold it.
    pub fn open_sibling(&self) -> Result<SqliteStorage, Box<dyn std::error::Error>> {
        let dir = self.dir.as_ref().ok_or("in-memory directory has no siblings")?;
        Ok(SqliteStorage::open(&Self::db_path(dir)?)?)
    }

    fn db_path(dir: &TempDir) -> Result<String, Box<dyn std::error::Error>> {
        let path = dir.path().join("directory.db");
        Ok(path.to_str().ok_or("non-utf8 temp path")?.to_string())
    }

    fn wrap(
        storage: SqliteStorage,
        config: EngineConfig,
        dir: Option<TempDir>,
    ) -> Result<Self, EngineError> {
        let observer = RecordingObserver::default();
        let mut engine = Engine::with_config(storage, config)?;
        engine.add_observer(Box::new(observer.clone()));
        Ok(Self {
            engine,
            observer,
            dir,
        })
    }

    /// Seed a record directly, bypassing reconciliation, laid out the way a
    /// fresh insert would be.
    pub fn insert_raw(
        &mut self,
        e164: Option<&str>,
        pni: Option<Pni>,
        aci: Option<Aci>,
    ) -> Result<RecordId, StorageError> {
        let record = Record::from_identifiers(RecordId::new(), e164.map(str::to_string), pni, aci);
        self.insert_record(&record)?;
        Ok(record.id)
    }

    /// Seed an arbitrary record, including layouts reconciliation never produces.
    pub fn insert_record(&mut self, record: &Record) -> Result<(), StorageError> {
        let mut tx = self.engine.storage_mut().transaction()?;
        tx.insert_record(record)?;
        tx.commit()
    }

    pub fn reconcile(
        &mut self,
        e164: Option<&str>,
        pni: Option<Pni>,
        aci: Option<Aci>,
    ) -> Result<ReconciliationResult, EngineError> {
        self.engine.reconcile_identifiers(e164, pni, aci)
    }

    pub fn reconcile_with(
        &mut self,
        e164: Option<&str>,
        pni: Option<Pni>,
        aci: Option<Aci>,
        options: ReconcileOptions,
    ) -> Result<ReconciliationResult, EngineError> {
        let tuple = IdentityTuple::new(e164.map(str::to_string), pni, aci)?;
        self.engine.reconcile_with(&tuple, options)
    }

    pub fn record(&self, record_id: RecordId) -> Result<Record, Box<dyn std::error::Error>> {
        Ok(self
            .engine
            .get_record(record_id)?
            .ok_or_else(|| format!("record {record_id} missing"))?)
    }

    pub fn events(&self) -> Vec<ObservedEvent> {
        self.observer.events()
    }

    pub fn check_invariants(&self) -> Result<(), String> {
        let records = self.engine.all_records().map_err(|e| e.to_string())?;
        check_invariants(&records)
    }
}

/// Full-table check of the directory invariants: unique numbers, PNIs
/// (across both columns) and service ids, and ACI authority over the
/// service id slot.
pub fn check_invariants(records: &[Record]) -> Result<(), String> {
    let mut e164s: BTreeMap<&str, RecordId> = BTreeMap::new();
    let mut pnis: BTreeMap<Pni, RecordId> = BTreeMap::new();
    let mut service_ids: BTreeMap<ServiceId, RecordId> = BTreeMap::new();

    for record in records {
        if let Some(e164) = record.e164.as_deref() {
            if let Some(first) = e164s.insert(e164, record.id) {
                return Err(format!("e164 {e164} on {first} and {}", record.id));
            }
        }

        let mut held: Vec<Pni> = record.pni.into_iter().collect();
        if let Some(sid_pni) = record.service_id.and_then(|sid| sid.as_pni()) {
            if !held.contains(&sid_pni) {
                held.push(sid_pni);
            }
        }
        for pni in held {
            if let Some(first) = pnis.insert(pni, record.id) {
                return Err(format!("{pni} on {first} and {}", record.id));
            }
        }

        if let Some(sid) = record.service_id {
            if let Some(first) = service_ids.insert(sid, record.id) {
                return Err(format!("service id {sid} on {first} and {}", record.id));
            }
        }

        if !record.is_well_formed() {
            return Err(format!("record {} has a malformed service id", record.id));
        }
        if record.is_empty() {
            return Err(format!("record {} has no identifiers", record.id));
        }
    }
    Ok(())
}
