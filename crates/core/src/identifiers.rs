//! Account identifiers.
//!
//! ACIs and PNIs are both UUIDs on the wire, but they live in separate
//! namespaces: an `Aci` and a `Pni` built from the same UUID are different
//! values and never compare equal, including when wrapped in a `ServiceId`.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use crate::error::CoreError;

const PNI_PREFIX: &str = "PNI:";

fn parse_uuid(s: &str) -> Result<Uuid, CoreError> {
    Uuid::parse_str(s).map_err(|e| CoreError::InvalidIdentifier(format!("{s}: {e}")))
}

/// Stable account identifier.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Aci(Uuid);

impl Aci {
    pub fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }
}

impl fmt::Debug for Aci {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Aci({})", &self.0.to_string()[..8])
    }
}

impl fmt::Display for Aci {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for Aci {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.starts_with(PNI_PREFIX) {
            return Err(CoreError::InvalidIdentifier(format!("expected an ACI, got {s}")));
        }
        parse_uuid(s).map(Self)
    }
}

/// Rotating routing identifier.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Pni(Uuid);

impl Pni {
    pub fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }
}

impl fmt::Debug for Pni {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Pni({})", &self.0.to_string()[..8])
    }
}

impl fmt::Display for Pni {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{PNI_PREFIX}{}", self.0)
    }
}

impl FromStr for Pni {
    type Err = CoreError;

    /// Accepts both the prefixed storage form and a bare UUID.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        parse_uuid(s.strip_prefix(PNI_PREFIX).unwrap_or(s)).map(Self)
    }
}

/// The single routable-identity slot of a record. Holds the ACI when one is
/// known, otherwise the PNI.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum ServiceId {
    Aci(Aci),
    Pni(Pni),
}

impl ServiceId {
    pub fn as_aci(&self) -> Option<Aci> {
        match self {
            Self::Aci(aci) => Some(*aci),
            Self::Pni(_) => None,
        }
    }

    pub fn as_pni(&self) -> Option<Pni> {
        match self {
            Self::Aci(_) => None,
            Self::Pni(pni) => Some(*pni),
        }
    }

    pub fn is_pni(&self) -> bool {
        matches!(self, Self::Pni(_))
    }
}

impl From<Aci> for ServiceId {
    fn from(aci: Aci) -> Self {
        Self::Aci(aci)
    }
}

impl From<Pni> for ServiceId {
    fn from(pni: Pni) -> Self {
        Self::Pni(pni)
    }
}

impl fmt::Debug for ServiceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Aci(aci) => fmt::Debug::fmt(aci, f),
            Self::Pni(pni) => fmt::Debug::fmt(pni, f),
        }
    }
}

impl fmt::Display for ServiceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Aci(aci) => fmt::Display::fmt(aci, f),
            Self::Pni(pni) => fmt::Display::fmt(pni, f),
        }
    }
}

impl FromStr for ServiceId {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.starts_with(PNI_PREFIX) {
            s.parse::<Pni>().map(Self::Pni)
        } else {
            s.parse::<Aci>().map(Self::Aci)
        }
    }
}
