use iddir_core::ids::RecordId;

/// Receives reconciliation side effects once they are durable. Calls happen
/// after commit, in the order the operations were planned.
pub trait DirectoryObserver: Send {
    /// `old_id` was retired; anything stored against it now belongs to `new_id`.
    fn on_merge(&self, _old_id: RecordId, _new_id: RecordId) {}

    fn on_number_changed(&self, _record_id: RecordId, _old_e164: &str, _new_e164: &str) {}

    /// The record's service id moved from a PNI to its ACI; sessions keyed by
    /// the PNI address are stale.
    fn on_session_switchover(&self, _record_id: RecordId) {}
}
