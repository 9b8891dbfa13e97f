use std::collections::{BTreeMap, BTreeSet};

use iddir_core::{ids::RecordId, IdentityOp, Pni, Record, ServiceId};
use iddir_storage::RecordReader;
use thiserror::Error;

use crate::error::EngineError;
use crate::locator::LocatedRecords;
use crate::planner::{Plan, Target};

/// A plan that would leave the directory in a state it must never reach.
/// Always a planning defect; retrying cannot help.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum InvariantViolation {
    #[error("records {first} and {second} share a phone number")]
    DuplicateE164 { first: RecordId, second: RecordId },

    #[error("records {first} and {second} share a PNI")]
    DuplicatePni { first: RecordId, second: RecordId },

    #[error("records {first} and {second} share a service id")]
    DuplicateServiceId { first: RecordId, second: RecordId },

    #[error("record {0} has a service id that does not match its identifiers")]
    MalformedServiceId(RecordId),

    #[error("record {0} would be left without any identifier")]
    EmptyRecord(RecordId),

    #[error("operation addresses unknown record {0}")]
    UnknownRecord(RecordId),

    #[error("operation addresses retired record {0}")]
    RetiredRecord(RecordId),

    #[error("record {0} merged into itself")]
    SelfMerge(RecordId),

    #[error("record {0} inserted twice")]
    DuplicateInsert(RecordId),
}

/// In-memory copy of the records a reconciliation may touch. Retired records
/// stay in the map as `None` so later operations against them are caught.
#[derive(Debug, Clone, Default)]
pub struct WorkingSet {
    records: BTreeMap<RecordId, Option<Record>>,
    touched: BTreeSet<RecordId>,
}

impl WorkingSet {
    pub fn from_located(located: &LocatedRecords) -> Self {
        let mut set = Self::default();
        for record in located.by_authority() {
            set.records.insert(record.id, Some(record.clone()));
        }
        set
    }

    pub fn get(&self, record_id: RecordId) -> Option<&Record> {
        self.records.get(&record_id).and_then(Option::as_ref)
    }

    /// True for live and retired records alike.
    pub fn contains(&self, record_id: RecordId) -> bool {
        self.records.contains_key(&record_id)
    }

    pub fn live(&self) -> impl Iterator<Item = &Record> {
        self.records.values().flatten()
    }

    pub fn touched_live(&self) -> impl Iterator<Item = &Record> {
        self.touched.iter().filter_map(|id| self.get(*id))
    }

    fn live_mut(&mut self, record_id: RecordId) -> Result<&mut Record, InvariantViolation> {
        match self.records.get_mut(&record_id) {
            None => Err(InvariantViolation::UnknownRecord(record_id)),
            Some(None) => Err(InvariantViolation::RetiredRecord(record_id)),
            Some(Some(record)) => Ok(record),
        }
    }

    pub fn insert(&mut self, record: Record) -> Result<(), InvariantViolation> {
        if self.records.contains_key(&record.id) {
            return Err(InvariantViolation::DuplicateInsert(record.id));
        }
        self.touched.insert(record.id);
        self.records.insert(record.id, Some(record));
        Ok(())
    }

    /// Apply one operation with the same semantics the store uses.
    pub fn apply(&mut self, op: &IdentityOp) -> Result<(), InvariantViolation> {
        match op {
            IdentityOp::SetE164 { record_id, e164 } => {
                self.live_mut(*record_id)?.set_e164(e164.clone());
            }
            IdentityOp::SetPni { record_id, pni } => {
                self.live_mut(*record_id)?.set_pni(*pni);
            }
            IdentityOp::SetAci { record_id, aci } => {
                self.live_mut(*record_id)?.set_aci(*aci);
            }
            IdentityOp::RemoveE164 { record_id } => {
                self.live_mut(*record_id)?.remove_e164();
            }
            IdentityOp::RemovePni { record_id } => {
                self.live_mut(*record_id)?.remove_pni();
            }
            IdentityOp::Merge {
                primary_id,
                secondary_id,
            } => {
                if primary_id == secondary_id {
                    return Err(InvariantViolation::SelfMerge(*primary_id));
                }
                let secondary = self.live_mut(*secondary_id)?.clone();
                let primary = self.live_mut(*primary_id)?;
                *primary = Record::merged(primary, &secondary);
                self.records.insert(*secondary_id, None);
                self.touched.insert(*secondary_id);
            }
            IdentityOp::ChangeNumberInsert { record_id, .. }
            | IdentityOp::SessionSwitchoverInsert { record_id } => {
                self.live_mut(*record_id)?;
            }
        }
        self.touched.insert(op.record_id());
        Ok(())
    }

    /// Uniqueness among the working set itself, plus shape checks on every
    /// record a plan touched.
    pub fn check(&self) -> Result<(), InvariantViolation> {
        let mut e164s: BTreeMap<&str, RecordId> = BTreeMap::new();
        let mut pnis: BTreeMap<Pni, RecordId> = BTreeMap::new();
        let mut service_ids: BTreeMap<ServiceId, RecordId> = BTreeMap::new();

        for record in self.live() {
            if let Some(e164) = record.e164.as_deref() {
                if let Some(first) = e164s.insert(e164, record.id) {
                    return Err(InvariantViolation::DuplicateE164 {
                        first,
                        second: record.id,
                    });
                }
            }
            for pni in held_pnis(record) {
                if let Some(first) = pnis.insert(pni, record.id) {
                    return Err(InvariantViolation::DuplicatePni {
                        first,
                        second: record.id,
                    });
                }
            }
            if let Some(service_id) = record.service_id {
                if let Some(first) = service_ids.insert(service_id, record.id) {
                    return Err(InvariantViolation::DuplicateServiceId {
                        first,
                        second: record.id,
                    });
                }
            }
        }

        for record in self.touched_live() {
            if record.is_empty() {
                return Err(InvariantViolation::EmptyRecord(record.id));
            }
            if !record.is_well_formed() {
                return Err(InvariantViolation::MalformedServiceId(record.id));
            }
        }
        Ok(())
    }
}

/// Every PNI a record occupies, whichever column it sits in.
fn held_pnis(record: &Record) -> BTreeSet<Pni> {
    record
        .pni
        .into_iter()
        .chain(record.service_id.and_then(|sid| sid.as_pni()))
        .collect()
}

fn outside(set: &WorkingSet, found: Option<Record>) -> Option<RecordId> {
    found.map(|r| r.id).filter(|id| !set.contains(*id))
}

/// Replay `plan` over the located records and verify the result, both within
/// the working set and against the stored records it did not load.
pub fn simulate<R: RecordReader + ?Sized>(
    reader: &R,
    located: &LocatedRecords,
    plan: &Plan,
) -> Result<WorkingSet, EngineError> {
    let mut set = WorkingSet::from_located(located);
    for op in &plan.operations {
        set.apply(op)?;
    }
    if let Target::Insert(record) = &plan.target {
        set.insert(record.clone())?;
    }
    set.check()?;

    for record in set.touched_live() {
        if let Some(e164) = record.e164.as_deref() {
            if let Some(first) = outside(&set, reader.get_by_e164(e164)?) {
                return Err(InvariantViolation::DuplicateE164 {
                    first,
                    second: record.id,
                }
                .into());
            }
        }
        for pni in held_pnis(record) {
            let holder = match reader.get_by_pni(pni)? {
                Some(found) if !set.contains(found.id) => Some(found.id),
                _ => outside(&set, reader.get_by_service_id(ServiceId::Pni(pni))?),
            };
            if let Some(first) = holder {
                return Err(InvariantViolation::DuplicatePni {
                    first,
                    second: record.id,
                }
                .into());
            }
        }
        if let Some(service_id) = record.service_id {
            if let Some(first) = outside(&set, reader.get_by_service_id(service_id)?) {
                return Err(InvariantViolation::DuplicateServiceId {
                    first,
                    second: record.id,
                }
                .into());
            }
        }
    }
    Ok(set)
}

#[cfg(test)]
mod tests {
    use super::*;
    use iddir_core::Aci;
    use iddir_storage::{RecordWriter, SqliteStorage};
    use uuid::Uuid;

    fn pni(n: u128) -> Pni {
        Pni::from_uuid(Uuid::from_u128(n))
    }

    fn aci(n: u128) -> Aci {
        Aci::from_uuid(Uuid::from_u128(n))
    }

    fn set_of(records: &[Record]) -> WorkingSet {
        let mut set = WorkingSet::default();
        for record in records {
            set.records.insert(record.id, Some(record.clone()));
        }
        set
    }

    #[test]
    fn merge_retires_secondary() {
        let a = Record::from_identifiers(RecordId::new(), None, None, Some(aci(1)));
        let b = Record::from_identifiers(RecordId::new(), Some("+1".into()), None, None);
        let mut set = set_of(&[a.clone(), b.clone()]);
        set.apply(&IdentityOp::Merge {
            primary_id: a.id,
            secondary_id: b.id,
        })
        .unwrap();

        assert_eq!(set.get(a.id).unwrap().e164.as_deref(), Some("+1"));
        assert!(set.get(b.id).is_none());
        assert!(set.contains(b.id));
        assert_eq!(
            set.apply(&IdentityOp::RemoveE164 { record_id: b.id }),
            Err(InvariantViolation::RetiredRecord(b.id))
        );
    }

    #[test]
    fn self_merge_rejected() {
        let a = Record::from_identifiers(RecordId::new(), Some("+1".into()), None, None);
        let mut set = set_of(&[a.clone()]);
        assert_eq!(
            set.apply(&IdentityOp::Merge {
                primary_id: a.id,
                secondary_id: a.id
            }),
            Err(InvariantViolation::SelfMerge(a.id))
        );
    }

    #[test]
    fn unknown_record_rejected() {
        let mut set = WorkingSet::default();
        let id = RecordId::new();
        assert_eq!(
            set.apply(&IdentityOp::SessionSwitchoverInsert { record_id: id }),
            Err(InvariantViolation::UnknownRecord(id))
        );
    }

    #[test]
    fn duplicate_e164_detected() {
        let a = Record::from_identifiers(RecordId::new(), Some("+1".into()), None, None);
        let b = Record::from_identifiers(RecordId::new(), None, Some(pni(2)), None);
        let mut set = set_of(&[a.clone(), b.clone()]);
        set.apply(&IdentityOp::SetE164 {
            record_id: b.id,
            e164: "+1".into(),
        })
        .unwrap();
        assert!(matches!(
            set.check(),
            Err(InvariantViolation::DuplicateE164 { .. })
        ));
    }

    #[test]
    fn pni_in_service_id_counts_against_pni_column() {
        let a = Record::from_identifiers(RecordId::new(), None, Some(pni(1)), None);
        let b = Record::from_identifiers(RecordId::new(), None, None, Some(aci(5)));
        let mut set = set_of(&[a.clone(), b.clone()]);
        set.apply(&IdentityOp::SetPni {
            record_id: b.id,
            pni: pni(1),
        })
        .unwrap();
        assert!(matches!(
            set.check(),
            Err(InvariantViolation::DuplicatePni { .. })
        ));
    }

    #[test]
    fn emptied_record_detected() {
        let a = Record::from_identifiers(RecordId::new(), Some("+1".into()), None, None);
        let mut set = set_of(&[a.clone()]);
        set.apply(&IdentityOp::RemoveE164 { record_id: a.id }).unwrap();
        assert_eq!(set.check(), Err(InvariantViolation::EmptyRecord(a.id)));
    }

    // ====================================================================
    // Checks against stored records outside the working set
    // ====================================================================

    fn stored(records: &[Record]) -> SqliteStorage {
        let mut storage = SqliteStorage::open_in_memory().unwrap();
        let mut tx = storage.transaction().unwrap();
        for record in records {
            tx.insert_record(record).unwrap();
        }
        tx.commit().unwrap();
        storage
    }

    fn update(record_id: RecordId, operations: Vec<IdentityOp>) -> Plan {
        Plan {
            target: Target::Existing(record_id),
            operations,
            breadcrumbs: Vec::new(),
        }
    }

    #[test]
    fn number_held_by_unlocated_record_rejected() {
        let holder = Record::from_identifiers(RecordId::new(), Some("+1".into()), None, None);
        let target = Record::from_identifiers(RecordId::new(), None, Some(pni(2)), None);
        let storage = stored(&[holder.clone(), target.clone()]);
        let before = storage.all_records().unwrap();

        let located = LocatedRecords {
            by_pni_sid: Some(target.clone()),
            ..LocatedRecords::default()
        };
        let plan = update(
            target.id,
            vec![IdentityOp::SetE164 {
                record_id: target.id,
                e164: "+1".into(),
            }],
        );

        let err = simulate(&storage, &located, &plan).unwrap_err();
        assert!(matches!(
            err,
            EngineError::InvariantViolation(InvariantViolation::DuplicateE164 { first, second })
                if first == holder.id && second == target.id
        ));
        assert_eq!(storage.all_records().unwrap(), before);
    }

    #[test]
    fn pni_held_by_unlocated_record_rejected() {
        let holder = Record::from_identifiers(RecordId::new(), None, Some(pni(7)), None);
        let target = Record::from_identifiers(RecordId::new(), None, None, Some(aci(5)));
        let storage = stored(&[holder.clone(), target.clone()]);
        let before = storage.all_records().unwrap();

        let located = LocatedRecords {
            by_aci_sid: Some(target.clone()),
            ..LocatedRecords::default()
        };
        let plan = update(
            target.id,
            vec![IdentityOp::SetPni {
                record_id: target.id,
                pni: pni(7),
            }],
        );

        let err = simulate(&storage, &located, &plan).unwrap_err();
        assert!(matches!(
            err,
            EngineError::InvariantViolation(InvariantViolation::DuplicatePni { first, second })
                if first == holder.id && second == target.id
        ));
        assert_eq!(storage.all_records().unwrap(), before);
    }

    #[test]
    fn insert_colliding_with_unlocated_service_id_rejected() {
        let holder = Record::from_identifiers(RecordId::new(), None, None, Some(aci(3)));
        let storage = stored(&[holder.clone()]);

        let fresh = Record::from_identifiers(RecordId::new(), None, None, Some(aci(3)));
        let plan = Plan {
            target: Target::Insert(fresh.clone()),
            operations: Vec::new(),
            breadcrumbs: Vec::new(),
        };

        let err = simulate(&storage, &LocatedRecords::default(), &plan).unwrap_err();
        assert!(matches!(
            err,
            EngineError::InvariantViolation(InvariantViolation::DuplicateServiceId { first, second })
                if first == holder.id && second == fresh.id
        ));
        assert_eq!(storage.record_count().unwrap(), 1);
    }

    #[test]
    fn plan_clear_of_stored_records_passes() {
        let bystander = Record::from_identifiers(RecordId::new(), Some("+2".into()), None, None);
        let target = Record::from_identifiers(RecordId::new(), None, Some(pni(2)), None);
        let storage = stored(&[bystander, target.clone()]);

        let located = LocatedRecords {
            by_pni_sid: Some(target.clone()),
            ..LocatedRecords::default()
        };
        let plan = update(
            target.id,
            vec![IdentityOp::SetE164 {
                record_id: target.id,
                e164: "+1".into(),
            }],
        );

        let set = simulate(&storage, &located, &plan).unwrap();
        assert_eq!(set.get(target.id).unwrap().e164.as_deref(), Some("+1"));
    }
}
