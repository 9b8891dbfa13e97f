use serde::{Deserialize, Serialize};

use iddir_core::{Aci, IdentityTuple, Pni, Record};

const DEFAULT_MAX_ATTEMPTS: u32 = 3;
const DEFAULT_BUSY_TIMEOUT_MS: u64 = 5_000;

/// Tunables a host application can embed in its own configuration file.
/// Missing keys take their defaults.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Attempts per reconciliation when the store reports lock contention.
    pub max_attempts: u32,
    /// How long one attempt waits for another writer's lock.
    pub busy_timeout_ms: u64,
    /// Append every committed change to the reconciliation journal.
    pub journal: bool,
    /// The account this directory belongs to. Its identifiers are only
    /// moved or merged when a reconciliation explicitly asks to change self.
    pub local_identity: Option<LocalIdentity>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            busy_timeout_ms: DEFAULT_BUSY_TIMEOUT_MS,
            journal: true,
            local_identity: None,
        }
    }
}

/// Identifiers of the local account.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LocalIdentity {
    pub e164: Option<String>,
    pub pni: Option<Pni>,
    pub aci: Option<Aci>,
}

impl LocalIdentity {
    /// True when the tuple carries any of the local identifiers.
    pub fn mentioned_by(&self, tuple: &IdentityTuple) -> bool {
        (self.e164.is_some() && self.e164.as_deref() == tuple.e164())
            || (self.pni.is_some() && self.pni == tuple.pni())
            || (self.aci.is_some() && self.aci == tuple.aci())
    }

    /// True when the record holds any of the local identifiers.
    pub fn held_by(&self, record: &Record) -> bool {
        (self.e164.is_some() && self.e164 == record.e164)
            || self.pni.is_some_and(|pni| record.holds_pni(pni))
            || (self.aci.is_some() && self.aci == record.aci())
    }
}
