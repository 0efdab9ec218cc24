use thiserror::Error;

use crate::types::DepositStage;

pub type VaultResult<T> = Result<T, VaultError>;

#[derive(Debug, Error)]
pub enum VaultError {
    /// A wrapped-key payload or metadata blob does not split into the expected segments.
    #[error("malformed payload: {0}")]
    MalformedPayload(String),

    /// The wrapped-key payload carries a format tag this build does not know.
    #[error("unsupported wrapped-key version: {0}")]
    UnsupportedVersion(String),

    /// Authenticated unwrap/open failed: the passphrase or backup key does not match this item.
    #[error("wrong passphrase or backup key")]
    WrongCredential,

    /// A payload chunk failed authentication while streaming.
    #[error("payload corrupt or wrong key (chunk {chunk})")]
    CorruptOrWrongKey { chunk: u64 },

    /// Blob or row store call failed. Not retried here.
    #[error("storage unavailable: {0}")]
    StorageUnavailable(String),

    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("config error: {0}")]
    Config(String),

    #[error("operation cancelled")]
    Cancelled,

    #[error("deposit aborted at stage {stage}: {source}")]
    DepositFailed {
        stage: DepositStage,
        #[source]
        source: Box<VaultError>,
    },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl VaultError {
    /// True for failures that only mean "this credential does not open this item".
    ///
    /// Row scanning treats these as a skip; single-item operations surface them.
    pub fn is_credential_mismatch(&self) -> bool {
        matches!(
            self,
            VaultError::WrongCredential
                | VaultError::CorruptOrWrongKey { .. }
                | VaultError::MalformedPayload(_)
                | VaultError::UnsupportedVersion(_)
        )
    }

    pub fn storage(e: impl std::fmt::Display) -> Self {
        VaultError::StorageUnavailable(e.to_string())
    }
}
