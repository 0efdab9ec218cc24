use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

/// Row table for current-format deposits (sealed metadata + blind indexes).
pub const TABLE_VAULT: &str = "vault";

/// Row table for rows written before sealed metadata existed.
pub const TABLE_LEGACY: &str = "vault_legacy";

/// Progress callback type (done, total, message)
pub type ProgressFn = Arc<dyn Fn(u64, u64, &str) + Send + Sync>;

/// Lower-case and trim a search term. Indexing and filtering must both go through here.
pub fn normalize_term(term: &str) -> String {
    term.trim().to_lowercase()
}

/// Descriptive metadata of a deposited item. Travels sealed under the KEK.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MediaMetadata {
    pub filename: String,
    #[serde(rename = "mimeType", alias = "mime_type", default)]
    pub mime_type: String,
    /// Capture date as supplied by the depositor (free-form)
    #[serde(rename = "uploadDate", alias = "upload_date")]
    pub upload_date: String,
    pub state: String,
    pub city: String,
}

/// Hex HMAC digests of the normalized searchable fields.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlindIndexes {
    pub state: String,
    pub city: String,
    pub date: String,
}

/// Backend-side filter: blind-index digests only, never plaintext.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RowFilter {
    pub state: Option<String>,
    pub city: Option<String>,
    pub date: Option<String>,
}

impl RowFilter {
    pub fn is_empty(&self) -> bool {
        self.state.is_none() && self.city.is_none() && self.date.is_none()
    }

    /// Rows without blind indexes only match the empty filter.
    pub fn matches(&self, row: &StoredRow) -> bool {
        if self.is_empty() {
            return true;
        }
        let Some(idx) = &row.blind_indexes else {
            return false;
        };
        self.state.as_ref().is_none_or(|d| *d == idx.state)
            && self.city.as_ref().is_none_or(|d| *d == idx.city)
            && self.date.as_ref().is_none_or(|d| *d == idx.date)
    }
}

/// Caller-supplied search: any subset of state / city / date, in plaintext.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetrievalQuery {
    pub state: Option<String>,
    pub city: Option<String>,
    pub date: Option<String>,
}

impl RetrievalQuery {
    pub fn is_empty(&self) -> bool {
        self.terms().next().is_none()
    }

    /// Supplied, non-blank terms.
    fn terms(&self) -> impl Iterator<Item = &str> {
        [&self.state, &self.city, &self.date]
            .into_iter()
            .flatten()
            .map(String::as_str)
            .filter(|t| !t.trim().is_empty())
    }

    /// Client-side filter over decrypted metadata.
    pub fn matches(&self, meta: &MediaMetadata) -> bool {
        fn field_ok(want: &Option<String>, have: &str) -> bool {
            match want {
                Some(w) if !w.trim().is_empty() => normalize_term(w) == normalize_term(have),
                _ => true,
            }
        }
        field_ok(&self.state, &meta.state)
            && field_ok(&self.city, &meta.city)
            && field_ok(&self.date, &meta.upload_date)
    }
}

/// The opaque row persisted in the row store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredRow {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub owner: Option<String>,
    /// `TAG:saltHex:ivHex:wrappedHex`
    pub wrapped_key: String,
    /// `ivHex:ciphertextHex`; absent on legacy rows
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub encrypted_metadata: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub blind_indexes: Option<BlindIndexes>,
    pub blob_path: String,
    /// Plaintext payload size in bytes
    pub size: u64,
    /// Unix seconds
    pub created_at: u64,
    /// Plaintext columns carried by rows from before sealed metadata.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub legacy_metadata: Option<MediaMetadata>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecordStatus {
    /// Metadata opened with the supplied credential
    Completed,
    /// Item verified but its metadata cannot be opened with this credential
    Locked,
}

/// A row as presented to callers after evaluation against a credential.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Record {
    pub id: String,
    pub table: String,
    /// `None` when locked
    pub metadata: Option<MediaMetadata>,
    pub wrapped_key: String,
    pub blind_indexes: Option<BlindIndexes>,
    pub blob_path: String,
    pub size: u64,
    pub created_at: u64,
    pub status: RecordStatus,
}

impl Record {
    pub fn from_row(table: &str, row: StoredRow, metadata: Option<MediaMetadata>) -> Self {
        let status = if metadata.is_some() {
            RecordStatus::Completed
        } else {
            RecordStatus::Locked
        };
        Self {
            id: row.id,
            table: table.to_string(),
            metadata,
            wrapped_key: row.wrapped_key,
            blind_indexes: row.blind_indexes,
            blob_path: row.blob_path,
            size: row.size,
            created_at: row.created_at,
            status,
        }
    }
}

/// Deposit pipeline stages, in order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DepositStage {
    Idle,
    KeyGenerated,
    PayloadEncrypted,
    MetadataSealed,
    IndexesComputed,
    Persisted,
    BackupKeyIssued,
}

impl fmt::Display for DepositStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            DepositStage::Idle => "idle",
            DepositStage::KeyGenerated => "key_generated",
            DepositStage::PayloadEncrypted => "payload_encrypted",
            DepositStage::MetadataSealed => "metadata_sealed",
            DepositStage::IndexesComputed => "indexes_computed",
            DepositStage::Persisted => "persisted",
            DepositStage::BackupKeyIssued => "backup_key_issued",
        };
        f.write_str(s)
    }
}
