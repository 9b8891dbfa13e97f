use serde::{Deserialize, Serialize};

use crate::error::CoreError;
use crate::identifiers::{Aci, Pni};
use crate::ids::{JournalId, RecordId};

/// The closed set of changes reconciliation may make to the directory.
///
/// The two `*Insert` variants are markers: they describe something that
/// happened for downstream consumers and do not touch stored records.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum IdentityOp {
    SetE164 {
        record_id: RecordId,
        e164: String,
    },
    SetPni {
        record_id: RecordId,
        pni: Pni,
    },
    SetAci {
        record_id: RecordId,
        aci: Aci,
    },
    RemoveE164 {
        record_id: RecordId,
    },
    RemovePni {
        record_id: RecordId,
    },
    Merge {
        primary_id: RecordId,
        secondary_id: RecordId,
    },
    ChangeNumberInsert {
        record_id: RecordId,
        old_e164: String,
        new_e164: String,
    },
    SessionSwitchoverInsert {
        record_id: RecordId,
    },
}

impl IdentityOp {
    /// The record this operation lands on. For `Merge` that is the survivor.
    pub fn record_id(&self) -> RecordId {
        match self {
            Self::SetE164 { record_id, .. }
            | Self::SetPni { record_id, .. }
            | Self::SetAci { record_id, .. }
            | Self::RemoveE164 { record_id }
            | Self::RemovePni { record_id }
            | Self::ChangeNumberInsert { record_id, .. }
            | Self::SessionSwitchoverInsert { record_id } => *record_id,
            Self::Merge { primary_id, .. } => *primary_id,
        }
    }

    pub fn is_marker(&self) -> bool {
        matches!(
            self,
            Self::ChangeNumberInsert { .. } | Self::SessionSwitchoverInsert { .. }
        )
    }

    /// String name of the operation type for logging and journaling.
    pub fn op_type_name(&self) -> &'static str {
        match self {
            Self::SetE164 { .. } => "SetE164",
            Self::SetPni { .. } => "SetPni",
            Self::SetAci { .. } => "SetAci",
            Self::RemoveE164 { .. } => "RemoveE164",
            Self::RemovePni { .. } => "RemovePni",
            Self::Merge { .. } => "Merge",
            Self::ChangeNumberInsert { .. } => "ChangeNumberInsert",
            Self::SessionSwitchoverInsert { .. } => "SessionSwitchoverInsert",
        }
    }

    pub fn to_msgpack(&self) -> Result<Vec<u8>, CoreError> {
        rmp_serde::to_vec(self).map_err(|e| CoreError::Serialization(e.to_string()))
    }

    pub fn from_msgpack(bytes: &[u8]) -> Result<Self, CoreError> {
        rmp_serde::from_slice(bytes).map_err(|e| CoreError::Serialization(e.to_string()))
    }
}

/// Durable trace of one committed reconciliation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JournalEntry {
    pub journal_id: JournalId,
    pub target_id: RecordId,
    pub inserted: bool,
    pub operations: Vec<IdentityOp>,
    pub breadcrumbs: Vec<String>,
    pub checksum: [u8; 32],
}

impl JournalEntry {
    pub fn new(
        target_id: RecordId,
        inserted: bool,
        operations: Vec<IdentityOp>,
        breadcrumbs: Vec<String>,
    ) -> Result<Self, CoreError> {
        let checksum = Self::compute_checksum(&operations)?;
        Ok(Self {
            journal_id: JournalId::new(),
            target_id,
            inserted,
            operations,
            breadcrumbs,
            checksum,
        })
    }

    pub fn compute_checksum(operations: &[IdentityOp]) -> Result<[u8; 32], CoreError> {
        let mut hasher = blake3::Hasher::new();
        for op in operations {
            let bytes = op.to_msgpack()?;
            hasher.update(&bytes);
        }
        Ok(*hasher.finalize().as_bytes())
    }

    pub fn verify_checksum(&self) -> Result<(), CoreError> {
        if Self::compute_checksum(&self.operations)? == self.checksum {
            Ok(())
        } else {
            Err(CoreError::ChecksumMismatch(self.journal_id.to_string()))
        }
    }
}
