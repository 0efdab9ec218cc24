use std::sync::Arc;

use gv_core::config::{RetrievalConfig, VaultConfig, DEFAULT_CHUNK_SIZE, DEFAULT_INDEX_SALT};
use gv_core::{VaultError, VaultResult};
use gv_crypto::KdfParams;
use gv_storage::{
    build_operator, BlobStore, OpendalBlobStore, OpendalRowStore, RowStore, S3Credentials,
};

/// Everything an operation needs: stores, crypto parameters, and who is asking.
#[derive(Clone)]
pub struct VaultContext {
    blobs: Arc<dyn BlobStore>,
    rows: Arc<dyn RowStore>,
    pub kdf: KdfParams,
    /// Plaintext bytes per encrypted chunk. Must match between deposit and fetch.
    pub chunk_size: usize,
    pub index_salt: [u8; 16],
    pub retrieval: RetrievalConfig,
    pub location_in_path: bool,
    owner: Option<String>,
}

impl VaultContext {
    pub fn new(blobs: Arc<dyn BlobStore>, rows: Arc<dyn RowStore>) -> Self {
        Self {
            blobs,
            rows,
            kdf: KdfParams::default(),
            chunk_size: DEFAULT_CHUNK_SIZE,
            index_salt: *DEFAULT_INDEX_SALT,
            retrieval: RetrievalConfig::default(),
            location_in_path: false,
            owner: None,
        }
    }

    /// Build stores and parameters from a validated config.
    pub fn from_config(config: &VaultConfig, creds: Option<&S3Credentials>) -> VaultResult<Self> {
        config.validate()?;
        let op = build_operator(&config.storage, creds)?;
        let mut ctx = Self::new(
            Arc::new(OpendalBlobStore::new(op.clone())),
            Arc::new(OpendalRowStore::new(op)),
        );
        ctx.kdf = KdfParams {
            iterations: config.crypto.pbkdf2_iterations,
        };
        ctx.chunk_size = config.crypto.chunk_size;
        ctx.index_salt = config.crypto.index_salt_bytes()?;
        ctx.retrieval = config.retrieval.clone();
        ctx.location_in_path = config.storage.location_in_path;
        Ok(ctx)
    }

    /// Scope deposits and searches to one owner. The identity is trusted as given.
    pub fn with_owner(mut self, owner: impl Into<String>) -> VaultResult<Self> {
        let owner = owner.into();
        if owner.trim().is_empty() {
            return Err(VaultError::InvalidInput("owner must not be blank".into()));
        }
        self.owner = Some(owner);
        Ok(self)
    }

    pub fn with_kdf_params(mut self, kdf: KdfParams) -> Self {
        self.kdf = kdf;
        self
    }

    pub fn with_chunk_size(mut self, chunk_size: usize) -> Self {
        self.chunk_size = chunk_size;
        self
    }

    pub fn with_retrieval(mut self, retrieval: RetrievalConfig) -> Self {
        self.retrieval = retrieval;
        self
    }

    pub fn owner(&self) -> Option<&str> {
        self.owner.as_deref()
    }

    pub fn blobs(&self) -> &Arc<dyn BlobStore> {
        &self.blobs
    }

    pub fn rows(&self) -> &Arc<dyn RowStore> {
        &self.rows
    }

    /// Rows without an owner are visible to everyone; owned rows only to their owner.
    pub(crate) fn can_see(&self, row_owner: Option<&str>) -> bool {
        match (self.owner.as_deref(), row_owner) {
            (Some(me), Some(them)) => me == them,
            (None, Some(_)) => false,
            _ => true,
        }
    }
}

impl std::fmt::Debug for VaultContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VaultContext")
            .field("kdf", &self.kdf)
            .field("chunk_size", &self.chunk_size)
            .field("retrieval", &self.retrieval)
            .field("location_in_path", &self.location_in_path)
            .field("owner", &self.owner)
            .finish_non_exhaustive()
    }
}
