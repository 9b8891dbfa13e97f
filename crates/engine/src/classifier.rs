use iddir_core::ids::RecordId;

use crate::locator::LocatedRecords;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Classification {
    /// No record holds any of the tuple's identifiers.
    Insert,
    /// Every lookup that found something found this record.
    Update(RecordId),
    /// Lookups disagree on the record.
    Conflict,
}

/// The id shared by every non-empty lookup, if there is exactly one.
pub fn common_id(located: &LocatedRecords) -> Option<RecordId> {
    let mut ids = located.ids();
    let first = ids.next()?;
    ids.all(|id| id == first).then_some(first)
}

pub fn classify(located: &LocatedRecords) -> Classification {
    if located.is_empty() {
        Classification::Insert
    } else if let Some(id) = common_id(located) {
        Classification::Update(id)
    } else {
        Classification::Conflict
    }
}
