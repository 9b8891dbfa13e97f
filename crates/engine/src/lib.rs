pub mod classifier;
pub mod config;
pub mod error;
pub mod executor;
pub mod locator;
pub mod observer;
pub mod planner;
pub mod simulator;

pub use classifier::Classification;
pub use config::{EngineConfig, LocalIdentity};
pub use error::EngineError;
pub use observer::DirectoryObserver;
pub use planner::{Breadcrumb, Plan, PlanContext, Target};
pub use simulator::InvariantViolation;

use std::collections::BTreeMap;
use std::time::Duration;

use iddir_core::{
    field_value::FieldValue,
    ids::RecordId,
    operations::{IdentityOp, JournalEntry},
    Aci, IdentityTuple, Pni, Record, ServiceId,
};
use iddir_storage::{RecordReader, RecordWriter, SqliteStorage};

/// Longest remap walk tolerated before the chain is treated as corrupt.
const MAX_REMAP_HOPS: usize = 32;

/// Per-call switches for [`Engine::reconcile_with`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReconcileOptions {
    /// The sender proved the PNI and ACI belong together.
    pub pni_verified: bool,
    /// Let the local account's own identifiers be moved. Only set when the
    /// account itself changed, e.g. after a number change.
    pub change_self: bool,
}

/// What one reconciliation did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReconciliationResult {
    /// The record that now represents the tuple.
    pub record_id: RecordId,
    pub required_insert: bool,
    /// Every planned operation, markers included, in execution order.
    pub operations: Vec<IdentityOp>,
    /// The marker subset, for dispatch to other subsystems.
    pub markers: Vec<IdentityOp>,
    pub affected_ids: Vec<RecordId>,
    pub retired_ids: Vec<RecordId>,
    pub changed_number_id: Option<RecordId>,
    pub breadcrumbs: Vec<Breadcrumb>,
}

impl ReconciliationResult {
    fn from_plan(plan: Plan) -> Self {
        let record_id = plan.target_id();
        let required_insert = plan.requires_insert();

        let mut affected_ids = Vec::new();
        let mut retired_ids = Vec::new();
        let mut changed_number_id = None;
        for op in &plan.operations {
            let mut touch = |id: RecordId| {
                if !affected_ids.contains(&id) {
                    affected_ids.push(id);
                }
            };
            touch(op.record_id());
            match op {
                IdentityOp::Merge { secondary_id, .. } => {
                    touch(*secondary_id);
                    retired_ids.push(*secondary_id);
                }
                IdentityOp::ChangeNumberInsert { record_id, .. } => {
                    changed_number_id = Some(*record_id);
                }
                _ => {}
            }
        }
        if required_insert && !affected_ids.contains(&record_id) {
            affected_ids.push(record_id);
        }

        let markers = plan
            .operations
            .iter()
            .filter(|op| op.is_marker())
            .cloned()
            .collect();

        Self {
            record_id,
            required_insert,
            operations: plan.operations,
            markers,
            affected_ids,
            retired_ids,
            changed_number_id,
            breadcrumbs: plan.breadcrumbs,
        }
    }

    pub fn is_noop(&self) -> bool {
        self.operations.is_empty() && !self.required_insert
    }
}

pub struct Engine {
    storage: SqliteStorage,
    config: EngineConfig,
    observers: Vec<Box<dyn DirectoryObserver>>,
}

impl Engine {
    pub fn new(storage: SqliteStorage) -> Result<Self, EngineError> {
        Self::with_config(storage, EngineConfig::default())
    }

    pub fn with_config(storage: SqliteStorage, config: EngineConfig) -> Result<Self, EngineError> {
        storage.set_busy_timeout(Duration::from_millis(config.busy_timeout_ms))?;
        Ok(Self {
            storage,
            config,
            observers: Vec::new(),
        })
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn storage(&self) -> &SqliteStorage {
        &self.storage
    }

    pub fn storage_mut(&mut self) -> &mut SqliteStorage {
        &mut self.storage
    }

    pub fn add_observer(&mut self, observer: Box<dyn DirectoryObserver>) {
        self.observers.push(observer);
    }

    // ========================================================================
    // Reconciliation
    // ========================================================================

    /// Fold a newly observed identifier tuple into the directory.
    ///
    /// Runs as one store transaction. Lock contention is retried from the
    /// top, against freshly read state, up to `max_attempts` times; any other
    /// failure leaves the directory untouched and is returned as is.
    pub fn reconcile(&mut self, tuple: &IdentityTuple) -> Result<ReconciliationResult, EngineError> {
        self.reconcile_with(tuple, ReconcileOptions::default())
    }

    pub fn reconcile_with(
        &mut self,
        tuple: &IdentityTuple,
        options: ReconcileOptions,
    ) -> Result<ReconciliationResult, EngineError> {
        let max_attempts = self.config.max_attempts.max(1);
        let mut attempt = 0;
        loop {
            attempt += 1;
            match self.reconcile_once(tuple, options) {
                Ok(result) => {
                    self.notify(&result);
                    return Ok(result);
                }
                Err(EngineError::Storage(e)) if e.is_transient() => {
                    if attempt >= max_attempts {
                        return Err(EngineError::RetriesExhausted {
                            attempts: attempt,
                            source: e,
                        });
                    }
                    tracing::warn!(attempt, error = %e, "reconciliation hit a busy store, retrying");
                }
                Err(e) => {
                    if let EngineError::InvariantViolation(violation) = &e {
                        tracing::error!(tuple = %tuple, %violation, "rejected reconciliation plan");
                    }
                    return Err(e);
                }
            }
        }
    }

    /// Convenience entry point taking the three identifiers separately.
    pub fn reconcile_identifiers(
        &mut self,
        e164: Option<&str>,
        pni: Option<Pni>,
        aci: Option<Aci>,
    ) -> Result<ReconciliationResult, EngineError> {
        let tuple = IdentityTuple::new(e164.map(str::to_string), pni, aci)?;
        self.reconcile(&tuple)
    }

    /// Resolve a service id seen on its own (with whatever number came with
    /// it) to a record, merging as needed.
    pub fn reconcile_service_id(
        &mut self,
        service_id: ServiceId,
        e164: Option<&str>,
    ) -> Result<ReconciliationResult, EngineError> {
        let tuple = IdentityTuple::from_service_id(service_id, e164.map(str::to_string));
        self.reconcile(&tuple)
    }

    fn reconcile_once(
        &mut self,
        tuple: &IdentityTuple,
        options: ReconcileOptions,
    ) -> Result<ReconciliationResult, EngineError> {
        let journal = self.config.journal;
        let context = PlanContext {
            local: self.config.local_identity.as_ref(),
            change_self: options.change_self,
            pni_verified: options.pni_verified,
        };
        let mut tx = self.storage.transaction()?;

        let located = locator::locate(&tx, tuple)?;
        let plan = planner::plan(tuple, &located, &context)?;
        tracing::debug!(
            tuple = %tuple,
            breadcrumbs = ?plan.breadcrumbs.iter().map(Breadcrumb::as_str).collect::<Vec<_>>(),
            operations = plan.operations.len(),
            "planned reconciliation"
        );

        if plan.is_noop() {
            return Ok(ReconciliationResult::from_plan(plan));
        }

        simulator::simulate(&tx, &located, &plan)?;
        executor::execute(&mut tx, &plan)?;

        if journal {
            let entry = JournalEntry::new(
                plan.target_id(),
                plan.requires_insert(),
                plan.operations.clone(),
                plan.breadcrumbs.iter().map(|b| b.as_str().to_string()).collect(),
            )?;
            tx.append_journal(&entry)?;
        }
        tx.commit()?;

        for op in &plan.operations {
            if let IdentityOp::ChangeNumberInsert { record_id, .. } = op {
                tracing::info!(record = %record_id, "number changed");
            }
        }
        Ok(ReconciliationResult::from_plan(plan))
    }

    fn notify(&self, result: &ReconciliationResult) {
        if self.observers.is_empty() {
            return;
        }
        for op in &result.operations {
            for observer in &self.observers {
                match op {
                    IdentityOp::Merge {
                        primary_id,
                        secondary_id,
                    } => observer.on_merge(*secondary_id, *primary_id),
                    IdentityOp::ChangeNumberInsert {
                        record_id,
                        old_e164,
                        new_e164,
                    } => observer.on_number_changed(*record_id, old_e164, new_e164),
                    IdentityOp::SessionSwitchoverInsert { record_id } => {
                        observer.on_session_switchover(*record_id)
                    }
                    _ => {}
                }
            }
        }
    }

    // ========================================================================
    // Reads
    // ========================================================================

    /// Follow remaps from `record_id` to the id that currently represents it.
    /// Ids that were never retired resolve to themselves.
    pub fn resolve_record_id(&self, record_id: RecordId) -> Result<RecordId, EngineError> {
        let mut current = record_id;
        for _ in 0..MAX_REMAP_HOPS {
            match self.storage.get_remap(current)? {
                Some(next) => current = next,
                None => return Ok(current),
            }
        }
        Err(EngineError::RemapCycle(record_id.to_string()))
    }

    pub fn get_record(&self, record_id: RecordId) -> Result<Option<Record>, EngineError> {
        Ok(self.storage.get_record(record_id)?)
    }

    /// Like [`Engine::get_record`], but a retired id yields its successor.
    pub fn get_record_resolved(&self, record_id: RecordId) -> Result<Option<Record>, EngineError> {
        let resolved = self.resolve_record_id(record_id)?;
        Ok(self.storage.get_record(resolved)?)
    }

    pub fn get_by_e164(&self, e164: &str) -> Result<Option<Record>, EngineError> {
        Ok(self.storage.get_by_e164(e164)?)
    }

    pub fn get_by_service_id(&self, service_id: ServiceId) -> Result<Option<Record>, EngineError> {
        Ok(self.storage.get_by_service_id(service_id)?)
    }

    pub fn get_by_pni(&self, pni: Pni) -> Result<Option<Record>, EngineError> {
        Ok(self.storage.get_by_pni(pni)?)
    }

    pub fn all_records(&self) -> Result<Vec<Record>, EngineError> {
        Ok(self.storage.all_records()?)
    }

    pub fn record_count(&self) -> Result<u64, EngineError> {
        Ok(self.storage.record_count()?)
    }

    pub fn get_attributes(
        &self,
        record_id: RecordId,
    ) -> Result<BTreeMap<String, FieldValue>, EngineError> {
        let resolved = self.resolve_record_id(record_id)?;
        Ok(self.storage.get_fields(resolved)?)
    }

    /// Write application data on a record. Identity fields are never written
    /// this way.
    pub fn set_attribute(
        &mut self,
        record_id: RecordId,
        key: &str,
        value: FieldValue,
    ) -> Result<(), EngineError> {
        let resolved = self.resolve_record_id(record_id)?;
        if self.storage.get_record(resolved)?.is_none() {
            return Err(EngineError::RecordNotFound(resolved.to_string()));
        }
        self.storage.set_field(resolved, key, &value)?;
        Ok(())
    }

    pub fn journal_entries(&self) -> Result<Vec<JournalEntry>, EngineError> {
        Ok(self.storage.get_journal()?)
    }
}
