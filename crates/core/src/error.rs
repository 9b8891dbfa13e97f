use thiserror::Error;

#[derive(Debug, Error)]
pub enum CoreError {
    #[error("serialization error: {0}")]
    Serialization(String),

    #[error("invalid identifier: {0}")]
    InvalidIdentifier(String),

    #[error("identity tuple must carry at least one of e164, pni, aci")]
    EmptyTuple,

    #[error("journal checksum mismatch for entry {0}")]
    ChecksumMismatch(String),
}
