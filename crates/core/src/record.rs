use serde::{Deserialize, Serialize};

use crate::identifiers::{Aci, Pni, ServiceId};
use crate::ids::RecordId;

/// One directory entry. The ACI is not a separate column: once known it
/// occupies `service_id`, displacing any PNI there.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Record {
    pub id: RecordId,
    pub e164: Option<String>,
    pub pni: Option<Pni>,
    pub service_id: Option<ServiceId>,
}

impl Record {
    pub fn new(id: RecordId) -> Self {
        Self {
            id,
            e164: None,
            pni: None,
            service_id: None,
        }
    }

    /// Build a record the way a fresh insert lays out its slots.
    pub fn from_identifiers(
        id: RecordId,
        e164: Option<String>,
        pni: Option<Pni>,
        aci: Option<Aci>,
    ) -> Self {
        Self {
            id,
            e164,
            pni,
            service_id: aci.map(ServiceId::Aci).or(pni.map(ServiceId::Pni)),
        }
    }

    pub fn aci(&self) -> Option<Aci> {
        self.service_id.and_then(|sid| sid.as_aci())
    }

    pub fn service_id_is_pni(&self) -> bool {
        self.service_id.is_some_and(|sid| sid.is_pni())
    }

    /// True if this record carries `pni` in either slot.
    pub fn holds_pni(&self, pni: Pni) -> bool {
        self.pni == Some(pni) || self.service_id == Some(ServiceId::Pni(pni))
    }

    pub fn is_empty(&self) -> bool {
        self.e164.is_none() && self.pni.is_none() && self.service_id.is_none()
    }

    /// `service_id` holds the ACI if there is one, else mirrors `pni`.
    pub fn is_well_formed(&self) -> bool {
        match self.service_id {
            Some(ServiceId::Aci(_)) => true,
            Some(ServiceId::Pni(pni)) => self.pni == Some(pni),
            None => self.pni.is_none(),
        }
    }

    pub fn set_e164(&mut self, e164: String) {
        self.e164 = Some(e164);
    }

    pub fn remove_e164(&mut self) {
        self.e164 = None;
    }

    pub fn set_pni(&mut self, pni: Pni) {
        if self.service_id.is_none() || self.service_id_is_pni() {
            self.service_id = Some(ServiceId::Pni(pni));
        }
        self.pni = Some(pni);
    }

    pub fn remove_pni(&mut self) {
        if let Some(pni) = self.pni {
            if self.service_id == Some(ServiceId::Pni(pni)) {
                self.service_id = None;
            }
        }
        self.pni = None;
    }

    pub fn set_aci(&mut self, aci: Aci) {
        self.service_id = Some(ServiceId::Aci(aci));
    }

    /// Field-wise combination keeping `primary.id`: the primary's value wins
    /// wherever it has one.
    pub fn merged(primary: &Record, secondary: &Record) -> Record {
        let pni = primary.pni.or(secondary.pni);
        let aci = primary.aci().or(secondary.aci());
        Record {
            id: primary.id,
            e164: primary.e164.clone().or_else(|| secondary.e164.clone()),
            pni,
            service_id: aci.map(ServiceId::Aci).or(pni.map(ServiceId::Pni)),
        }
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

    #[test]
    fn set_pni_fills_empty_service_id() {
        let mut record = Record::new(RecordId::new());
        record.set_pni(pni(1));
        assert_eq!(record.service_id, Some(ServiceId::Pni(pni(1))));
        assert!(record.is_well_formed());
    }

    #[test]
    fn set_pni_does_not_displace_aci() {
        let mut record = Record::from_identifiers(RecordId::new(), None, None, Some(aci(7)));
        record.set_pni(pni(1));
        assert_eq!(record.pni, Some(pni(1)));
        assert_eq!(record.service_id, Some(ServiceId::Aci(aci(7))));
    }

    #[test]
    fn set_pni_replaces_previous_bare_pni() {
        let mut record = Record::from_identifiers(RecordId::new(), None, Some(pni(1)), None);
        record.set_pni(pni(2));
        assert_eq!(record.service_id, Some(ServiceId::Pni(pni(2))));
        assert!(record.is_well_formed());
    }

    #[test]
    fn remove_pni_clears_mirrored_service_id_only() {
        let mut bare = Record::from_identifiers(RecordId::new(), None, Some(pni(1)), None);
        bare.remove_pni();
        assert!(bare.is_empty());

        let mut promoted =
            Record::from_identifiers(RecordId::new(), None, Some(pni(1)), Some(aci(2)));
        promoted.remove_pni();
        assert_eq!(promoted.pni, None);
        assert_eq!(promoted.service_id, Some(ServiceId::Aci(aci(2))));
    }

    #[test]
    fn set_aci_promotes_over_pni() {
        let mut record = Record::from_identifiers(RecordId::new(), None, Some(pni(1)), None);
        record.set_aci(aci(9));
        assert_eq!(record.aci(), Some(aci(9)));
        assert_eq!(record.pni, Some(pni(1)));
        assert!(record.is_well_formed());
    }

    #[test]
    fn merge_prefers_primary_and_keeps_aci_dominant() {
        let primary = Record::from_identifiers(RecordId::new(), None, Some(pni(1)), None);
        let secondary = Record::from_identifiers(
            RecordId::new(),
            Some("+15550001111".into()),
            Some(pni(2)),
            Some(aci(3)),
        );
        let merged = Record::merged(&primary, &secondary);
        assert_eq!(merged.id, primary.id);
        assert_eq!(merged.e164.as_deref(), Some("+15550001111"));
        assert_eq!(merged.pni, Some(pni(1)));
        assert_eq!(merged.service_id, Some(ServiceId::Aci(aci(3))));
    }
}
