use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::error::{VaultError, VaultResult};

/// Default deployment-wide salt for search-index key derivation (16 bytes).
pub const DEFAULT_INDEX_SALT: &[u8; 16] = b"ghostvault-idx-1";

/// Default plaintext chunk size for payload encryption (5 MiB)
pub const DEFAULT_CHUNK_SIZE: usize = 5 * 1024 * 1024;

/// Default PBKDF2-HMAC-SHA256 work factor
pub const DEFAULT_PBKDF2_ITERATIONS: u32 = 100_000;

const MIN_PBKDF2_ITERATIONS: u32 = 10_000;
const MIN_CHUNK_SIZE: usize = 64 * 1024;
const MAX_CHUNK_SIZE: usize = 64 * 1024 * 1024;

/// Top-level configuration (loaded from ghostvault.toml)
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct VaultConfig {
    pub storage: StorageConfig,
    pub crypto: CryptoConfig,
    pub retrieval: RetrievalConfig,
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageBackend {
    /// Any S3-compatible endpoint
    S3,
    /// Local directory (development, air-gapped use)
    Fs,
    /// Process memory; nothing survives exit
    Memory,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    pub backend: StorageBackend,
    /// S3 endpoint
    pub endpoint: String,
    /// S3 region (default: us-east-1)
    pub region: String,
    /// Bucket holding both blobs and rows
    pub bucket: String,
    /// Root directory for the fs backend
    pub root: PathBuf,
    /// Refuse plaintext HTTP endpoints
    pub enforce_tls: bool,
    /// Put sanitized state/city labels into blob paths. Leaks location to the operator.
    pub location_in_path: bool,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            backend: StorageBackend::S3,
            endpoint: "http://localhost:9000".into(),
            region: "us-east-1".into(),
            bucket: "ghostvault".into(),
            root: PathBuf::from("~/.local/share/ghostvault"),
            enforce_tls: false,
            location_in_path: false,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CryptoConfig {
    /// PBKDF2-HMAC-SHA256 iterations (default: 100000)
    pub pbkdf2_iterations: u32,
    /// Plaintext bytes per encrypted chunk (default: 5 MiB)
    pub chunk_size: usize,
    /// Hex-encoded 16-byte salt for search-index key derivation
    pub index_salt: String,
}

impl Default for CryptoConfig {
    fn default() -> Self {
        Self {
            pbkdf2_iterations: DEFAULT_PBKDF2_ITERATIONS,
            chunk_size: DEFAULT_CHUNK_SIZE,
            index_salt: hex::encode(DEFAULT_INDEX_SALT),
        }
    }
}

impl CryptoConfig {
    pub fn index_salt_bytes(&self) -> VaultResult<[u8; 16]> {
        let bytes = hex::decode(self.index_salt.trim())
            .map_err(|e| VaultError::Config(format!("crypto.index_salt is not hex: {e}")))?;
        bytes.try_into().map_err(|b: Vec<u8>| {
            VaultError::Config(format!(
                "crypto.index_salt must be 16 bytes, got {}",
                b.len()
            ))
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum RetrievalStrategy {
    /// Ask the row store for blind-index equality, then open only the candidates
    BlindIndex,
    /// Open every row and filter on decrypted metadata
    DecryptAll,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetrievalConfig {
    pub strategy: RetrievalStrategy,
    /// Rows evaluated concurrently (each costs one PBKDF2 run)
    pub concurrency: usize,
    /// Also scan the legacy table (decrypt-then-filter)
    pub include_legacy: bool,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            strategy: RetrievalStrategy::BlindIndex,
            concurrency: 4,
            include_legacy: true,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level (default: info)
    pub level: String,
    /// Log format: "json" or "text"
    pub format: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".into(),
            format: "text".into(),
        }
    }
}

impl VaultConfig {
    /// Parse and validate a TOML document.
    pub fn from_toml_str(s: &str) -> VaultResult<Self> {
        let config: VaultConfig =
            toml::from_str(s).map_err(|e| VaultError::Config(format!("parsing config: {e}")))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> VaultResult<()> {
        if self.crypto.pbkdf2_iterations < MIN_PBKDF2_ITERATIONS {
            return Err(VaultError::Config(format!(
                "crypto.pbkdf2_iterations must be at least {MIN_PBKDF2_ITERATIONS}, got {}",
                self.crypto.pbkdf2_iterations
            )));
        }
        if !(MIN_CHUNK_SIZE..=MAX_CHUNK_SIZE).contains(&self.crypto.chunk_size) {
            return Err(VaultError::Config(format!(
                "crypto.chunk_size must be between {MIN_CHUNK_SIZE} and {MAX_CHUNK_SIZE}, got {}",
                self.crypto.chunk_size
            )));
        }
        self.crypto.index_salt_bytes()?;
        if self.retrieval.concurrency == 0 {
            return Err(VaultError::Config(
                "retrieval.concurrency must be at least 1".into(),
            ));
        }
        if self.storage.bucket.trim().is_empty() && self.storage.backend == StorageBackend::S3 {
            return Err(VaultError::Config("storage.bucket must not be empty".into()));
        }
        Ok(())
    }
}
