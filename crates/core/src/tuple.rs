use std::fmt;

use crate::error::CoreError;
use crate::identifiers::{Aci, Pni, ServiceId};

/// A newly observed combination of identifiers for one person.
///
/// At least one field is always present; the constructors are the only way
/// to build one.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IdentityTuple {
    e164: Option<String>,
    pni: Option<Pni>,
    aci: Option<Aci>,
}

impl IdentityTuple {
    pub fn new(e164: Option<String>, pni: Option<Pni>, aci: Option<Aci>) -> Result<Self, CoreError> {
        if e164.is_none() && pni.is_none() && aci.is_none() {
            return Err(CoreError::EmptyTuple);
        }
        Ok(Self { e164, pni, aci })
    }

    /// A service id seen on its own (incoming envelope, profile fetch), with
    /// whatever phone number accompanied it.
    pub fn from_service_id(service_id: ServiceId, e164: Option<String>) -> Self {
        match service_id {
            ServiceId::Aci(aci) => Self {
                e164,
                pni: None,
                aci: Some(aci),
            },
            ServiceId::Pni(pni) => Self {
                e164,
                pni: Some(pni),
                aci: None,
            },
        }
    }

    pub fn e164(&self) -> Option<&str> {
        self.e164.as_deref()
    }

    pub fn pni(&self) -> Option<Pni> {
        self.pni
    }

    pub fn aci(&self) -> Option<Aci> {
        self.aci
    }
}

impl fmt::Display for IdentityTuple {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fn slot<T: fmt::Debug>(v: &Option<T>) -> String {
            v.as_ref().map_or_else(|| "-".to_string(), |v| format!("{v:?}"))
        }
        // Phone numbers are not written to logs in full.
        let e164 = self
            .e164
            .as_deref()
            .map(|e| {
                let tail: String = e.chars().skip(e.chars().count().saturating_sub(2)).collect();
                format!("..{tail}")
            })
            .unwrap_or_else(|| "-".to_string());
        write!(f, "(e164={e164}, pni={}, aci={})", slot(&self.pni), slot(&self.aci))
    }
}
