use iddir_core::{ids::RecordId, Aci, IdentityOp, IdentityTuple, Pni, Record};

use crate::classifier::{classify, Classification};
use crate::config::LocalIdentity;
use crate::locator::LocatedRecords;
use crate::simulator::{InvariantViolation, WorkingSet};

/// Branches the planner took, in order. Kept for logs and the journal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Breadcrumb {
    NothingMatches,
    CommonIdAndUpToDate,
    CommonIdButNeedsUpdate,
    AciMismatch,
    NeedsMerge,
    RelocateE164,
    RelocatePni,
    MergeRecord,
    FinalUpdateE164,
    FinalUpdatePni,
    FinalUpdateAci,
    SelfProtected,
    VerifiedSwitchover,
}

impl Breadcrumb {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::NothingMatches => "NothingMatches",
            Self::CommonIdAndUpToDate => "CommonIdAndUpToDate",
            Self::CommonIdButNeedsUpdate => "CommonIdButNeedsUpdate",
            Self::AciMismatch => "AciMismatch",
            Self::NeedsMerge => "NeedsMerge",
            Self::RelocateE164 => "RelocateE164",
            Self::RelocatePni => "RelocatePni",
            Self::MergeRecord => "MergeRecord",
            Self::FinalUpdateE164 => "FinalUpdateE164",
            Self::FinalUpdatePni => "FinalUpdatePni",
            Self::FinalUpdateAci => "FinalUpdateAci",
            Self::SelfProtected => "SelfProtected",
            Self::VerifiedSwitchover => "VerifiedSwitchover",
        }
    }
}

/// What the caller knows about a reconciliation beyond the tuple itself.
#[derive(Debug, Clone, Copy, Default)]
pub struct PlanContext<'a> {
    pub local: Option<&'a LocalIdentity>,
    /// Allow the local account's identifiers to move like anyone else's.
    pub change_self: bool,
    /// The PNI to ACI link was proven by the sender, so gaining the ACI
    /// needs no user-visible switchover.
    pub pni_verified: bool,
}

impl PlanContext<'_> {
    /// The tuple or a located record touches the local account, and the
    /// caller did not ask to change it.
    fn protects_self(&self, tuple: &IdentityTuple, records: &[&Record]) -> bool {
        match self.local {
            Some(local) if !self.change_self => {
                local.mentioned_by(tuple) || records.iter().any(|r| local.held_by(r))
            }
            _ => false,
        }
    }
}

/// Where the tuple ends up.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Target {
    Existing(RecordId),
    /// A new row, written after every operation in the plan has been applied.
    Insert(Record),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Plan {
    pub target: Target,
    pub operations: Vec<IdentityOp>,
    pub breadcrumbs: Vec<Breadcrumb>,
}

impl Plan {
    pub fn target_id(&self) -> RecordId {
        match &self.target {
            Target::Existing(id) => *id,
            Target::Insert(record) => record.id,
        }
    }

    pub fn requires_insert(&self) -> bool {
        matches!(self.target, Target::Insert(_))
    }

    /// Nothing to write at all.
    pub fn is_noop(&self) -> bool {
        self.operations.is_empty() && !self.requires_insert()
    }
}

/// How a located record relates to the incoming tuple.
struct Candidate {
    id: RecordId,
    matched_e164: bool,
    matched_pni: bool,
    /// False when the record already belongs to a different account.
    compatible: bool,
}

impl Candidate {
    fn new(record: &Record, tuple: &IdentityTuple) -> Self {
        Self {
            id: record.id,
            matched_e164: tuple.e164().is_some() && record.e164.as_deref() == tuple.e164(),
            matched_pni: tuple.pni().is_some_and(|pni| record.holds_pni(pni)),
            compatible: match (record.aci(), tuple.aci()) {
                (Some(held), Some(incoming)) => held == incoming,
                _ => true,
            },
        }
    }
}

/// Accumulates operations while keeping a working copy in step, so each
/// decision sees the effect of the ones before it.
struct Builder {
    set: WorkingSet,
    operations: Vec<IdentityOp>,
    markers: Vec<IdentityOp>,
    breadcrumbs: Vec<Breadcrumb>,
    pni_verified: bool,
}

impl Builder {
    fn push(&mut self, op: IdentityOp) -> Result<(), InvariantViolation> {
        self.set.apply(&op)?;
        self.operations.push(op);
        Ok(())
    }

    fn current(&self, record_id: RecordId) -> Result<&Record, InvariantViolation> {
        self.set
            .get(record_id)
            .ok_or(InvariantViolation::UnknownRecord(record_id))
    }

    fn set_e164(&mut self, record_id: RecordId, e164: &str) -> Result<(), InvariantViolation> {
        if let Some(old) = self.current(record_id)?.e164.clone() {
            if old != e164 {
                self.markers.push(IdentityOp::ChangeNumberInsert {
                    record_id,
                    old_e164: old,
                    new_e164: e164.to_string(),
                });
            }
        }
        self.push(IdentityOp::SetE164 {
            record_id,
            e164: e164.to_string(),
        })
    }

    fn set_pni(&mut self, record_id: RecordId, pni: Pni) -> Result<(), InvariantViolation> {
        self.push(IdentityOp::SetPni { record_id, pni })
    }

    fn set_aci(&mut self, record_id: RecordId, aci: Aci) -> Result<(), InvariantViolation> {
        if self.current(record_id)?.service_id_is_pni() {
            if self.pni_verified {
                self.breadcrumbs.push(Breadcrumb::VerifiedSwitchover);
            } else {
                self.markers
                    .push(IdentityOp::SessionSwitchoverInsert { record_id });
            }
        }
        self.push(IdentityOp::SetAci { record_id, aci })
    }

    /// Another live record in the working copy holds `pni`.
    fn pni_held_elsewhere(&self, record_id: RecordId, pni: Pni) -> bool {
        self.set
            .live()
            .any(|r| r.id != record_id && r.holds_pni(pni))
    }

    /// A new record carrying whichever of the tuple's identifiers no live
    /// record still holds.
    fn fresh_record(&self, tuple: &IdentityTuple) -> Record {
        let e164 = tuple
            .e164()
            .filter(|e164| !self.set.live().any(|r| r.e164.as_deref() == Some(*e164)));
        let pni = tuple
            .pni()
            .filter(|pni| !self.set.live().any(|r| r.holds_pni(*pni)));
        let aci = tuple
            .aci()
            .filter(|aci| !self.set.live().any(|r| r.aci() == Some(*aci)));
        Record::from_identifiers(RecordId::new(), e164.map(str::to_string), pni, aci)
    }

    fn finish(mut self, target: Target) -> Plan {
        // Number changes first, then session switchovers.
        self.markers
            .sort_by_key(|op| matches!(op, IdentityOp::SessionSwitchoverInsert { .. }));
        self.operations.append(&mut self.markers);
        Plan {
            target,
            operations: self.operations,
            breadcrumbs: self.breadcrumbs,
        }
    }
}

fn up_to_date(record: &Record, tuple: &IdentityTuple) -> bool {
    tuple.e164().is_none_or(|e164| record.e164.as_deref() == Some(e164))
        && tuple.pni().is_none_or(|pni| record.pni == Some(pni))
        && tuple.aci().is_none_or(|aci| record.aci() == Some(aci))
}

/// Once the tuple's values are taken away, would `record` have anything left?
fn consumed_by(record: &Record, tuple: &IdentityTuple) -> bool {
    record.aci().is_none()
        && record.e164.as_deref().is_none_or(|e164| tuple.e164() == Some(e164))
        && record.pni.is_none_or(|pni| tuple.pni() == Some(pni))
}

/// Turn a located tuple into an ordered list of operations.
///
/// The returned plan is only a proposal: it is replayed and checked by the
/// simulator before anything is written. An error here means the planner
/// addressed a record it never located.
///
/// When the local account is involved and `change_self` is off, nothing is
/// merged or relocated and the target's number is left alone; the tuple only
/// fills slots no other record holds.
pub fn plan(
    tuple: &IdentityTuple,
    located: &LocatedRecords,
    context: &PlanContext<'_>,
) -> Result<Plan, InvariantViolation> {
    let mut builder = Builder {
        set: WorkingSet::from_located(located),
        operations: Vec::new(),
        markers: Vec::new(),
        breadcrumbs: Vec::new(),
        pni_verified: context.pni_verified,
    };

    let records = located.by_authority();
    let candidates: Vec<Candidate> = records.iter().map(|r| Candidate::new(r, tuple)).collect();
    let protected = context.protects_self(tuple, &records);

    match classify(located) {
        Classification::Insert => {
            builder.breadcrumbs.push(Breadcrumb::NothingMatches);
            let fresh = builder.fresh_record(tuple);
            return Ok(builder.finish(Target::Insert(fresh)));
        }
        Classification::Update(common) => {
            let current = up_to_date(builder.current(common)?, tuple);
            if !candidates.iter().all(|c| c.compatible) {
                builder.breadcrumbs.push(Breadcrumb::AciMismatch);
            } else if current {
                builder.breadcrumbs.push(Breadcrumb::CommonIdAndUpToDate);
                return Ok(builder.finish(Target::Existing(common)));
            } else {
                builder.breadcrumbs.push(Breadcrumb::CommonIdButNeedsUpdate);
            }
        }
        Classification::Conflict => {
            builder.breadcrumbs.push(Breadcrumb::NeedsMerge);
            if !candidates.iter().all(|c| c.compatible) {
                builder.breadcrumbs.push(Breadcrumb::AciMismatch);
            }
        }
    }

    let primary = candidates.iter().find(|c| c.compatible).map(|c| c.id);

    if protected {
        builder.breadcrumbs.push(Breadcrumb::SelfProtected);
    } else {
        absorb_others(&mut builder, &candidates, primary, tuple)?;
    }

    let Some(primary_id) = primary else {
        let fresh = builder.fresh_record(tuple);
        return Ok(builder.finish(Target::Insert(fresh)));
    };

    let current = builder.current(primary_id)?.clone();
    if let Some(e164) = tuple.e164() {
        if current.e164.as_deref() != Some(e164) && !protected {
            builder.breadcrumbs.push(Breadcrumb::FinalUpdateE164);
            builder.set_e164(primary_id, e164)?;
        }
    }
    if let Some(pni) = tuple.pni() {
        let blocked = protected && builder.pni_held_elsewhere(primary_id, pni);
        if current.pni != Some(pni) && !blocked {
            builder.breadcrumbs.push(Breadcrumb::FinalUpdatePni);
            builder.set_pni(primary_id, pni)?;
        }
    }
    if let Some(aci) = tuple.aci() {
        if current.aci() != Some(aci) {
            builder.breadcrumbs.push(Breadcrumb::FinalUpdateAci);
            builder.set_aci(primary_id, aci)?;
        }
    }

    Ok(builder.finish(Target::Existing(primary_id)))
}

/// Merge every other compatible record the tuple fully consumes into the
/// primary, and pull the tuple's identifiers off the rest.
fn absorb_others(
    builder: &mut Builder,
    candidates: &[Candidate],
    primary: Option<RecordId>,
    tuple: &IdentityTuple,
) -> Result<(), InvariantViolation> {
    for other in candidates.iter().filter(|c| Some(c.id) != primary) {
        let consumed = consumed_by(builder.current(other.id)?, tuple);
        if let Some(primary_id) = primary {
            if other.compatible && consumed {
                builder.breadcrumbs.push(Breadcrumb::MergeRecord);
                builder.push(IdentityOp::Merge {
                    primary_id,
                    secondary_id: other.id,
                })?;
                continue;
            }
        }

        if other.matched_e164 {
            if let Some(e164) = tuple.e164() {
                builder.breadcrumbs.push(Breadcrumb::RelocateE164);
                builder.push(IdentityOp::RemoveE164 { record_id: other.id })?;
                if let Some(primary_id) = primary {
                    builder.set_e164(primary_id, e164)?;
                }
            }
        }
        if other.matched_pni {
            if let Some(pni) = tuple.pni() {
                builder.breadcrumbs.push(Breadcrumb::RelocatePni);
                builder.push(IdentityOp::RemovePni { record_id: other.id })?;
                if let Some(primary_id) = primary {
                    builder.set_pni(primary_id, pni)?;
                }
            }
        }
    }
    Ok(())
}
