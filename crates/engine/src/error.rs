use iddir_core::CoreError;
use iddir_storage::StorageError;
use thiserror::Error;

use crate::simulator::InvariantViolation;

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("core error: {0}")]
    Core(#[from] CoreError),

    #[error("plan violates directory invariants: {0}")]
    InvariantViolation(#[from] InvariantViolation),

    #[error("record not found: {0}")]
    RecordNotFound(String),

    #[error("remap chain does not terminate from {0}")]
    RemapCycle(String),

    #[error("gave up after {attempts} attempts: {source}")]
    RetriesExhausted {
        attempts: u32,
        #[source]
        source: StorageError,
    },
}
