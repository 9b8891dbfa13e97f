use std::collections::BTreeMap;
use std::time::Duration;

use rusqlite::{Connection, OptionalExtension, TransactionBehavior};

use iddir_core::{
    field_value::FieldValue,
    identifiers::{Aci, Pni, ServiceId},
    ids::*,
    operations::{IdentityOp, JournalEntry},
    record::Record,
};

use crate::error::StorageError;
use crate::traits::{RecordReader, RecordWriter};

/// Convert Vec<u8> to fixed-size array with proper error handling.
fn to_array<const N: usize>(v: Vec<u8>, label: &str) -> Result<[u8; N], StorageError> {
    v.try_into()
        .map_err(|_| StorageError::Serialization(format!("invalid {label} length")))
}

const RECORD_COLUMNS: &str = "record_id, e164, pni, service_id";

type RawRecord = (Vec<u8>, Option<String>, Option<String>, Option<String>);

fn raw_record(row: &rusqlite::Row) -> rusqlite::Result<RawRecord> {
    Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?))
}

fn decode_record(raw: RawRecord) -> Result<Record, StorageError> {
    let (id_bytes, e164, pni, service_id) = raw;
    Ok(Record {
        id: RecordId::from_bytes(to_array::<16>(id_bytes, "record_id")?),
        e164,
        pni: pni.map(|p| p.parse::<Pni>()).transpose()?,
        service_id: service_id.map(|s| s.parse::<ServiceId>()).transpose()?,
    })
}

fn query_record(
    conn: &Connection,
    column: &str,
    value: &dyn rusqlite::ToSql,
) -> Result<Option<Record>, StorageError> {
    let sql = format!("SELECT {RECORD_COLUMNS} FROM records WHERE {column} = ?1");
    let raw = conn
        .query_row(&sql, [value], raw_record)
        .optional()?;
    raw.map(decode_record).transpose()
}

fn read_record(conn: &Connection, record_id: RecordId) -> Result<Option<Record>, StorageError> {
    query_record(conn, "record_id", &record_id.as_bytes().as_slice())
}

fn require_record(conn: &Connection, record_id: RecordId) -> Result<Record, StorageError> {
    read_record(conn, record_id)?
        .ok_or_else(|| StorageError::NotFound(format!("record {record_id}")))
}

fn read_remap(conn: &Connection, old_id: RecordId) -> Result<Option<RecordId>, StorageError> {
    let bytes: Option<Vec<u8>> = conn
        .query_row(
            "SELECT new_id FROM remapped_records WHERE old_id = ?1",
            [old_id.as_bytes().as_slice()],
            |row| row.get(0),
        )
        .optional()?;
    bytes
        .map(|b| Ok(RecordId::from_bytes(to_array::<16>(b, "new_id")?)))
        .transpose()
}

/// Fails with `NotFound` when an unconditional update hit no row.
fn expect_row(changed: usize, record_id: RecordId) -> Result<(), StorageError> {
    if changed == 0 {
        Err(StorageError::NotFound(format!("record {record_id}")))
    } else {
        Ok(())
    }
}

fn map_constraint(e: rusqlite::Error, what: String) -> StorageError {
    match e {
        rusqlite::Error::SqliteFailure(err, _)
            if err.code == rusqlite::ErrorCode::ConstraintViolation =>
        {
            StorageError::ConstraintViolation(what)
        }
        e => StorageError::Sqlite(e),
    }
}

fn read_fields(
    conn: &Connection,
    record_id: RecordId,
) -> Result<BTreeMap<String, FieldValue>, StorageError> {
    let mut stmt =
        conn.prepare("SELECT field_key, value FROM record_fields WHERE record_id = ?1")?;
    let rows = stmt.query_map([record_id.as_bytes().as_slice()], |row| {
        Ok((row.get::<_, String>(0)?, row.get::<_, Vec<u8>>(1)?))
    })?;
    let mut fields = BTreeMap::new();
    for row in rows {
        let (key, bytes) = row?;
        fields.insert(key, FieldValue::from_msgpack(&bytes)?);
    }
    Ok(fields)
}

pub struct SqliteStorage {
    conn: Connection,
}

impl SqliteStorage {
    pub fn open(path: &str) -> Result<Self, StorageError> {
        let conn = Connection::open(path)?;
        crate::schema::init_schema(&conn)?;
        Ok(Self { conn })
    }

    pub fn open_in_memory() -> Result<Self, StorageError> {
        let conn = Connection::open_in_memory()?;
        crate::schema::init_schema(&conn)?;
        Ok(Self { conn })
    }

    /// How long a write waits on another connection's lock before the store
    /// reports itself busy.
    pub fn set_busy_timeout(&self, timeout: Duration) -> Result<(), StorageError> {
        self.conn.busy_timeout(timeout)?;
        Ok(())
    }

    /// Begin an IMMEDIATE transaction: the write lock is taken up front, so
    /// the records read while planning cannot change before commit.
    pub fn transaction(&mut self) -> Result<SqliteTransaction<'_>, StorageError> {
        let tx = self
            .conn
            .transaction_with_behavior(TransactionBehavior::Immediate)?;
        Ok(SqliteTransaction { tx })
    }

    pub fn all_records(&self) -> Result<Vec<Record>, StorageError> {
        let sql = format!("SELECT {RECORD_COLUMNS} FROM records ORDER BY record_id");
        let mut stmt = self.conn.prepare(&sql)?;
        let raws = stmt
            .query_map([], raw_record)?
            .collect::<Result<Vec<_>, _>>()?;
        raws.into_iter().map(decode_record).collect()
    }

    pub fn record_count(&self) -> Result<u64, StorageError> {
        let count: i64 = self
            .conn
            .query_row("SELECT COUNT(*) FROM records", [], |row| row.get(0))?;
        Ok(count as u64)
    }

    pub fn get_fields(
        &self,
        record_id: RecordId,
    ) -> Result<BTreeMap<String, FieldValue>, StorageError> {
        read_fields(&self.conn, record_id)
    }

    /// Attach or overwrite an attribute on a live record.
    pub fn set_field(
        &mut self,
        record_id: RecordId,
        key: &str,
        value: &FieldValue,
    ) -> Result<(), StorageError> {
        require_record(&self.conn, record_id)?;
        let bytes = value.to_msgpack()?;
        self.conn.execute(
            "INSERT OR REPLACE INTO record_fields (record_id, field_key, value) VALUES (?1, ?2, ?3)",
            rusqlite::params![record_id.as_bytes().as_slice(), key, bytes],
        )?;
        Ok(())
    }

    /// Every committed journal entry, oldest first.
    pub fn get_journal(&self) -> Result<Vec<JournalEntry>, StorageError> {
        let mut stmt = self.conn.prepare(
            "SELECT journal_id, target_id, inserted, payload, breadcrumbs, checksum
             FROM reconcile_journal ORDER BY seq",
        )?;
        let rows = stmt
            .query_map([], |row| {
                Ok((
                    row.get::<_, Vec<u8>>(0)?,
                    row.get::<_, Vec<u8>>(1)?,
                    row.get::<_, bool>(2)?,
                    row.get::<_, Vec<u8>>(3)?,
                    row.get::<_, Vec<u8>>(4)?,
                    row.get::<_, Vec<u8>>(5)?,
                ))
            })?
            .collect::<Result<Vec<_>, _>>()?;

        let mut entries = Vec::with_capacity(rows.len());
        for (journal_id, target_id, inserted, payload, breadcrumbs, checksum) in rows {
            let operations: Vec<IdentityOp> = rmp_serde::from_slice(&payload)
                .map_err(|e| StorageError::Serialization(e.to_string()))?;
            let breadcrumbs: Vec<String> = rmp_serde::from_slice(&breadcrumbs)
                .map_err(|e| StorageError::Serialization(e.to_string()))?;
            entries.push(JournalEntry {
                journal_id: JournalId::from_bytes(to_array::<16>(journal_id, "journal_id")?),
                target_id: RecordId::from_bytes(to_array::<16>(target_id, "target_id")?),
                inserted,
                operations,
                breadcrumbs,
                checksum: to_array::<32>(checksum, "checksum")?,
            });
        }
        Ok(entries)
    }
}

impl RecordReader for SqliteStorage {
    fn get_record(&self, record_id: RecordId) -> Result<Option<Record>, StorageError> {
        read_record(&self.conn, record_id)
    }

    fn get_by_e164(&self, e164: &str) -> Result<Option<Record>, StorageError> {
        query_record(&self.conn, "e164", &e164)
    }

    fn get_by_service_id(&self, service_id: ServiceId) -> Result<Option<Record>, StorageError> {
        query_record(&self.conn, "service_id", &service_id.to_string())
    }

    fn get_by_pni(&self, pni: Pni) -> Result<Option<Record>, StorageError> {
        query_record(&self.conn, "pni", &pni.to_string())
    }

    fn get_remap(&self, old_id: RecordId) -> Result<Option<RecordId>, StorageError> {
        read_remap(&self.conn, old_id)
    }
}

/// A write transaction over the directory. Dropping it without calling
/// [`SqliteTransaction::commit`] rolls every change back.
pub struct SqliteTransaction<'a> {
    tx: rusqlite::Transaction<'a>,
}

impl SqliteTransaction<'_> {
    pub fn commit(self) -> Result<(), StorageError> {
        self.tx.commit()?;
        Ok(())
    }
}

impl RecordReader for SqliteTransaction<'_> {
    fn get_record(&self, record_id: RecordId) -> Result<Option<Record>, StorageError> {
        read_record(&self.tx, record_id)
    }

    fn get_by_e164(&self, e164: &str) -> Result<Option<Record>, StorageError> {
        query_record(&self.tx, "e164", &e164)
    }

    fn get_by_service_id(&self, service_id: ServiceId) -> Result<Option<Record>, StorageError> {
        query_record(&self.tx, "service_id", &service_id.to_string())
    }

    fn get_by_pni(&self, pni: Pni) -> Result<Option<Record>, StorageError> {
        query_record(&self.tx, "pni", &pni.to_string())
    }

    fn get_remap(&self, old_id: RecordId) -> Result<Option<RecordId>, StorageError> {
        read_remap(&self.tx, old_id)
    }
}

impl RecordWriter for SqliteTransaction<'_> {
    fn insert_record(&mut self, record: &Record) -> Result<(), StorageError> {
        self.tx
            .execute(
                "INSERT INTO records (record_id, e164, pni, service_id) VALUES (?1, ?2, ?3, ?4)",
                rusqlite::params![
                    record.id.as_bytes().as_slice(),
                    record.e164,
                    record.pni.map(|p| p.to_string()),
                    record.service_id.map(|s| s.to_string()),
                ],
            )
            .map_err(|e| map_constraint(e, format!("insert of record {}", record.id)))?;
        Ok(())
    }

    fn set_e164(&mut self, record_id: RecordId, e164: &str) -> Result<(), StorageError> {
        let changed = self
            .tx
            .execute(
                "UPDATE records SET e164 = ?1 WHERE record_id = ?2",
                rusqlite::params![e164, record_id.as_bytes().as_slice()],
            )
            .map_err(|e| map_constraint(e, format!("e164 on record {record_id}")))?;
        expect_row(changed, record_id)
    }

    fn remove_e164(&mut self, record_id: RecordId) -> Result<(), StorageError> {
        let changed = self.tx.execute(
            "UPDATE records SET e164 = NULL WHERE record_id = ?1",
            [record_id.as_bytes().as_slice()],
        )?;
        expect_row(changed, record_id)
    }

    fn set_pni(&mut self, record_id: RecordId, pni: Pni) -> Result<(), StorageError> {
        let pni_text = pni.to_string();
        self.tx
            .execute(
                "UPDATE records SET service_id = ?1
                 WHERE record_id = ?2 AND (service_id IS NULL OR substr(service_id, 1, 4) = 'PNI:')",
                rusqlite::params![pni_text, record_id.as_bytes().as_slice()],
            )
            .map_err(|e| map_constraint(e, format!("service id on record {record_id}")))?;
        let changed = self
            .tx
            .execute(
                "UPDATE records SET pni = ?1 WHERE record_id = ?2",
                rusqlite::params![pni_text, record_id.as_bytes().as_slice()],
            )
            .map_err(|e| map_constraint(e, format!("pni on record {record_id}")))?;
        expect_row(changed, record_id)
    }

    fn remove_pni(&mut self, record_id: RecordId) -> Result<(), StorageError> {
        self.tx.execute(
            "UPDATE records SET service_id = NULL WHERE record_id = ?1 AND service_id = pni",
            [record_id.as_bytes().as_slice()],
        )?;
        let changed = self.tx.execute(
            "UPDATE records SET pni = NULL WHERE record_id = ?1",
            [record_id.as_bytes().as_slice()],
        )?;
        expect_row(changed, record_id)
    }

    fn set_aci(&mut self, record_id: RecordId, aci: Aci) -> Result<(), StorageError> {
        let changed = self
            .tx
            .execute(
                "UPDATE records SET service_id = ?1 WHERE record_id = ?2",
                rusqlite::params![aci.to_string(), record_id.as_bytes().as_slice()],
            )
            .map_err(|e| map_constraint(e, format!("aci on record {record_id}")))?;
        expect_row(changed, record_id)
    }

    fn merge_records(
        &mut self,
        primary_id: RecordId,
        secondary_id: RecordId,
    ) -> Result<Record, StorageError> {
        let primary = require_record(&self.tx, primary_id)?;
        let secondary = require_record(&self.tx, secondary_id)?;
        let merged = Record::merged(&primary, &secondary);

        // The secondary row goes first so its unique values are free for the primary.
        self.tx.execute(
            "DELETE FROM records WHERE record_id = ?1",
            [secondary_id.as_bytes().as_slice()],
        )?;
        self.tx
            .execute(
                "UPDATE records SET e164 = ?1, pni = ?2, service_id = ?3 WHERE record_id = ?4",
                rusqlite::params![
                    merged.e164,
                    merged.pni.map(|p| p.to_string()),
                    merged.service_id.map(|s| s.to_string()),
                    primary_id.as_bytes().as_slice(),
                ],
            )
            .map_err(|e| map_constraint(e, format!("merge into record {primary_id}")))?;

        // Attributes follow the same rule: the primary keeps its own values.
        self.tx.execute(
            "INSERT OR IGNORE INTO record_fields (record_id, field_key, value)
             SELECT ?1, field_key, value FROM record_fields WHERE record_id = ?2",
            rusqlite::params![
                primary_id.as_bytes().as_slice(),
                secondary_id.as_bytes().as_slice()
            ],
        )?;
        self.tx.execute(
            "DELETE FROM record_fields WHERE record_id = ?1",
            [secondary_id.as_bytes().as_slice()],
        )?;

        tracing::debug!(primary = %primary_id, secondary = %secondary_id, "records merged");
        Ok(merged)
    }

    fn put_remap(&mut self, old_id: RecordId, new_id: RecordId) -> Result<(), StorageError> {
        // Anything that used to resolve to old_id now resolves one hop further.
        self.tx.execute(
            "UPDATE remapped_records SET new_id = ?2 WHERE new_id = ?1",
            rusqlite::params![old_id.as_bytes().as_slice(), new_id.as_bytes().as_slice()],
        )?;
        self.tx.execute(
            "INSERT OR REPLACE INTO remapped_records (old_id, new_id) VALUES (?1, ?2)",
            rusqlite::params![old_id.as_bytes().as_slice(), new_id.as_bytes().as_slice()],
        )?;
        Ok(())
    }

    fn append_journal(&mut self, entry: &JournalEntry) -> Result<(), StorageError> {
        let payload = rmp_serde::to_vec(&entry.operations)
            .map_err(|e| StorageError::Serialization(e.to_string()))?;
        let breadcrumbs = rmp_serde::to_vec(&entry.breadcrumbs)
            .map_err(|e| StorageError::Serialization(e.to_string()))?;
        self.tx.execute(
            "INSERT INTO reconcile_journal
                (journal_id, target_id, inserted, op_count, payload, breadcrumbs, checksum)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            rusqlite::params![
                entry.journal_id.as_bytes().as_slice(),
                entry.target_id.as_bytes().as_slice(),
                entry.inserted,
                entry.operations.len() as i64,
                payload,
                breadcrumbs,
                entry.checksum.as_slice(),
            ],
        )?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    fn pni(n: u128) -> Pni {
        Pni::from_uuid(Uuid::from_u128(n))
    }

    fn aci(n: u128) -> Aci {
        Aci::from_uuid(Uuid::from_u128(n))
    }

    fn seed(storage: &mut SqliteStorage, record: &Record) {
        let mut tx = storage.transaction().unwrap();
        tx.insert_record(record).unwrap();
        tx.commit().unwrap();
    }

    #[test]
    fn lookups_by_each_identifier() {
        let mut storage = SqliteStorage::open_in_memory().unwrap();
        let with_pni = Record::from_identifiers(RecordId::new(), Some("+1555".into()), Some(pni(1)), None);
        let with_aci = Record::from_identifiers(RecordId::new(), None, Some(pni(2)), Some(aci(3)));
        seed(&mut storage, &with_pni);
        seed(&mut storage, &with_aci);

        assert_eq!(storage.get_by_e164("+1555").unwrap(), Some(with_pni.clone()));
        assert_eq!(
            storage.get_by_service_id(ServiceId::Pni(pni(1))).unwrap(),
            Some(with_pni.clone())
        );
        assert_eq!(storage.get_by_service_id(ServiceId::Aci(aci(3))).unwrap(), Some(with_aci.clone()));
        // pni(2) lives only in the pni column of the ACI record.
        assert_eq!(storage.get_by_service_id(ServiceId::Pni(pni(2))).unwrap(), None);
        assert_eq!(storage.get_by_pni(pni(2)).unwrap(), Some(with_aci));
        assert_eq!(storage.get_by_e164("+1999").unwrap(), None);
        assert_eq!(storage.record_count().unwrap(), 2);
    }

    #[test]
    fn remove_pni_keeps_aci_service_id() {
        let mut storage = SqliteStorage::open_in_memory().unwrap();
        let bare = Record::from_identifiers(RecordId::new(), Some("+1".into()), Some(pni(1)), None);
        let full = Record::from_identifiers(RecordId::new(), None, Some(pni(2)), Some(aci(9)));
        seed(&mut storage, &bare);
        seed(&mut storage, &full);

        let mut tx = storage.transaction().unwrap();
        tx.remove_pni(bare.id).unwrap();
        tx.remove_pni(full.id).unwrap();
        tx.commit().unwrap();

        let bare = storage.get_record(bare.id).unwrap().unwrap();
        assert_eq!((bare.pni, bare.service_id), (None, None));
        let full = storage.get_record(full.id).unwrap().unwrap();
        assert_eq!(full.pni, None);
        assert_eq!(full.service_id, Some(ServiceId::Aci(aci(9))));
    }

    #[test]
    fn set_pni_mirrors_only_without_aci() {
        let mut storage = SqliteStorage::open_in_memory().unwrap();
        let plain = Record::from_identifiers(RecordId::new(), Some("+1".into()), None, None);
        let full = Record::from_identifiers(RecordId::new(), None, None, Some(aci(9)));
        seed(&mut storage, &plain);
        seed(&mut storage, &full);

        let mut tx = storage.transaction().unwrap();
        tx.set_pni(plain.id, pni(1)).unwrap();
        tx.set_pni(full.id, pni(2)).unwrap();
        tx.commit().unwrap();

        let plain = storage.get_record(plain.id).unwrap().unwrap();
        assert_eq!(plain.service_id, Some(ServiceId::Pni(pni(1))));
        let full = storage.get_record(full.id).unwrap().unwrap();
        assert_eq!(full.pni, Some(pni(2)));
        assert_eq!(full.service_id, Some(ServiceId::Aci(aci(9))));
    }

    #[test]
    fn duplicate_e164_is_constraint_violation() {
        let mut storage = SqliteStorage::open_in_memory().unwrap();
        seed(&mut storage, &Record::from_identifiers(RecordId::new(), Some("+1".into()), None, None));
        let mut tx = storage.transaction().unwrap();
        let dup = Record::from_identifiers(RecordId::new(), Some("+1".into()), None, None);
        assert!(matches!(
            tx.insert_record(&dup),
            Err(StorageError::ConstraintViolation(_))
        ));
    }

    #[test]
    fn missing_record_update_is_not_found() {
        let mut storage = SqliteStorage::open_in_memory().unwrap();
        let mut tx = storage.transaction().unwrap();
        assert!(matches!(
            tx.set_e164(RecordId::new(), "+1"),
            Err(StorageError::NotFound(_))
        ));
    }

    #[test]
    fn merge_moves_identifiers_and_fields() {
        let mut storage = SqliteStorage::open_in_memory().unwrap();
        let primary = Record::from_identifiers(RecordId::new(), None, None, Some(aci(1)));
        let secondary = Record::from_identifiers(RecordId::new(), Some("+1".into()), Some(pni(2)), None);
        seed(&mut storage, &primary);
        seed(&mut storage, &secondary);
        storage.set_field(primary.id, "nickname", &FieldValue::Text("ace".into())).unwrap();
        storage.set_field(secondary.id, "nickname", &FieldValue::Text("bob".into())).unwrap();
        storage.set_field(secondary.id, "muted", &FieldValue::Boolean(true)).unwrap();

        let mut tx = storage.transaction().unwrap();
        let merged = tx.merge_records(primary.id, secondary.id).unwrap();
        tx.commit().unwrap();

        assert_eq!(merged.e164.as_deref(), Some("+1"));
        assert_eq!(merged.pni, Some(pni(2)));
        assert_eq!(merged.service_id, Some(ServiceId::Aci(aci(1))));
        assert_eq!(storage.get_record(primary.id).unwrap(), Some(merged));
        assert_eq!(storage.get_record(secondary.id).unwrap(), None);

        let fields = storage.get_fields(primary.id).unwrap();
        assert_eq!(fields.get("nickname"), Some(&FieldValue::Text("ace".into())));
        assert_eq!(fields.get("muted"), Some(&FieldValue::Boolean(true)));
        assert!(storage.get_fields(secondary.id).unwrap().is_empty());
    }

    #[test]
    fn put_remap_collapses_chains() {
        let mut storage = SqliteStorage::open_in_memory().unwrap();
        let (a, b, c) = (RecordId::new(), RecordId::new(), RecordId::new());

        let mut tx = storage.transaction().unwrap();
        tx.put_remap(a, b).unwrap();
        tx.put_remap(b, c).unwrap();
        tx.commit().unwrap();

        assert_eq!(storage.get_remap(a).unwrap(), Some(c));
        assert_eq!(storage.get_remap(b).unwrap(), Some(c));
        assert_eq!(storage.get_remap(c).unwrap(), None);
    }

    #[test]
    fn dropped_transaction_rolls_back() {
        let mut storage = SqliteStorage::open_in_memory().unwrap();
        {
            let mut tx = storage.transaction().unwrap();
            tx.insert_record(&Record::from_identifiers(RecordId::new(), Some("+1".into()), None, None))
                .unwrap();
        }
        assert_eq!(storage.record_count().unwrap(), 0);
    }

    #[test]
    fn journal_round_trips_through_storage() {
        let mut storage = SqliteStorage::open_in_memory().unwrap();
        let target = RecordId::new();
        let entry = JournalEntry::new(
            target,
            false,
            vec![
                IdentityOp::SetE164 { record_id: target, e164: "+1".into() },
                IdentityOp::SessionSwitchoverInsert { record_id: target },
            ],
            vec!["CommonIdButNeedsUpdate".into()],
        )
        .unwrap();

        let mut tx = storage.transaction().unwrap();
        tx.append_journal(&entry).unwrap();
        tx.commit().unwrap();

        let journal = storage.get_journal().unwrap();
        assert_eq!(journal, vec![entry]);
        journal[0].verify_checksum().unwrap();
    }

    #[test]
    fn file_backed_storage_persists() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("directory.db");
        let path = path.to_str().unwrap();
        let record = Record::from_identifiers(RecordId::new(), Some("+1".into()), Some(pni(4)), None);
        {
            let mut storage = SqliteStorage::open(path).unwrap();
            seed(&mut storage, &record);
        }
        let storage = SqliteStorage::open(path).unwrap();
        assert_eq!(storage.get_record(record.id).unwrap(), Some(record));
    }

    #[test]
    fn competing_writer_is_reported_transient() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("directory.db");
        let path = path.to_str().unwrap();
        let mut holder = SqliteStorage::open(path).unwrap();
        let mut waiter = SqliteStorage::open(path).unwrap();
        waiter.set_busy_timeout(Duration::from_millis(10)).unwrap();

        let held = holder.transaction().unwrap();
        let err = waiter.transaction().err().expect("lock is held");
        assert!(err.is_transient(), "{err}");
        assert!(!StorageError::NotFound("x".into()).is_transient());

        drop(held);
        assert!(waiter.transaction().is_ok());
    }
}
