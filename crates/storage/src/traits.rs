use iddir_core::{
    identifiers::{Aci, Pni, ServiceId},
    ids::RecordId,
    operations::JournalEntry,
    record::Record,
};

use crate::error::StorageError;

/// Point lookups the reconciliation engine plans against. Absence is
/// `Ok(None)`, never an error.
pub trait RecordReader {
    fn get_record(&self, record_id: RecordId) -> Result<Option<Record>, StorageError>;

    fn get_by_e164(&self, e164: &str) -> Result<Option<Record>, StorageError>;

    /// Record whose `service_id` slot holds `service_id`.
    fn get_by_service_id(&self, service_id: ServiceId) -> Result<Option<Record>, StorageError>;

    /// Record whose `pni` column holds `pni`, regardless of its service id.
    fn get_by_pni(&self, pni: Pni) -> Result<Option<Record>, StorageError>;

    /// Direct successor of a retired id, if it was ever merged away.
    fn get_remap(&self, old_id: RecordId) -> Result<Option<RecordId>, StorageError>;
}

/// Mutation primitives. Implementations are transaction-scoped; nothing is
/// visible to other readers until the owning transaction commits.
pub trait RecordWriter: RecordReader {
    fn insert_record(&mut self, record: &Record) -> Result<(), StorageError>;

    fn set_e164(&mut self, record_id: RecordId, e164: &str) -> Result<(), StorageError>;

    fn remove_e164(&mut self, record_id: RecordId) -> Result<(), StorageError>;

    /// Writes `pni`, and mirrors it into `service_id` unless an ACI holds the slot.
    fn set_pni(&mut self, record_id: RecordId, pni: Pni) -> Result<(), StorageError>;

    /// Clears `pni`, and `service_id` only if it was mirroring that PNI.
    fn remove_pni(&mut self, record_id: RecordId) -> Result<(), StorageError>;

    fn set_aci(&mut self, record_id: RecordId, aci: Aci) -> Result<(), StorageError>;

    /// Folds `secondary_id` into `primary_id` (identifiers and attributes) and
    /// deletes the secondary row. Does not touch the remap table.
    fn merge_records(
        &mut self,
        primary_id: RecordId,
        secondary_id: RecordId,
    ) -> Result<Record, StorageError>;

    fn put_remap(&mut self, old_id: RecordId, new_id: RecordId) -> Result<(), StorageError>;

    fn append_journal(&mut self, entry: &JournalEntry) -> Result<(), StorageError>;
}
