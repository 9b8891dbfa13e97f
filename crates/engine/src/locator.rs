use iddir_core::{ids::RecordId, IdentityTuple, Record, ServiceId};
use iddir_storage::{RecordReader, StorageError};

/// The records currently holding any identifier of a tuple, one slot per lookup.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LocatedRecords {
    pub by_e164: Option<Record>,
    /// `service_id` equals the tuple's PNI.
    pub by_pni_sid: Option<Record>,
    /// `pni` equals the tuple's PNI but `service_id` holds something else.
    pub by_pni_only: Option<Record>,
    pub by_aci_sid: Option<Record>,
}

impl LocatedRecords {
    pub fn is_empty(&self) -> bool {
        self.slots().all(|slot| slot.is_none())
    }

    /// Ids of every non-empty slot, repeats included.
    pub fn ids(&self) -> impl Iterator<Item = RecordId> + '_ {
        self.slots().flatten().map(|r| r.id)
    }

    /// Distinct located records, highest authority first:
    /// ACI match, then PNI match, then phone number match.
    pub fn by_authority(&self) -> Vec<&Record> {
        let mut out: Vec<&Record> = Vec::with_capacity(4);
        for record in self.slots().flatten() {
            if !out.iter().any(|seen| seen.id == record.id) {
                out.push(record);
            }
        }
        out
    }

    fn slots(&self) -> impl Iterator<Item = Option<&Record>> {
        [
            self.by_aci_sid.as_ref(),
            self.by_pni_sid.as_ref(),
            self.by_pni_only.as_ref(),
            self.by_e164.as_ref(),
        ]
        .into_iter()
    }
}

/// Issue one independent lookup per identifier the tuple carries. Read-only.
pub fn locate<R: RecordReader + ?Sized>(
    reader: &R,
    tuple: &IdentityTuple,
) -> Result<LocatedRecords, StorageError> {
    let mut located = LocatedRecords::default();

    if let Some(e164) = tuple.e164() {
        located.by_e164 = reader.get_by_e164(e164)?;
    }

    if let Some(pni) = tuple.pni() {
        located.by_pni_sid = reader.get_by_service_id(ServiceId::Pni(pni))?;
        located.by_pni_only = reader
            .get_by_pni(pni)?
            .filter(|r| r.service_id != Some(ServiceId::Pni(pni)));
    }

    if let Some(aci) = tuple.aci() {
        located.by_aci_sid = reader.get_by_service_id(ServiceId::Aci(aci))?;
    }

    tracing::trace!(
        tuple = %tuple,
        e164 = located.by_e164.is_some(),
        pni_sid = located.by_pni_sid.is_some(),
        pni_only = located.by_pni_only.is_some(),
        aci_sid = located.by_aci_sid.is_some(),
        "located records"
    );
    Ok(located)
}
