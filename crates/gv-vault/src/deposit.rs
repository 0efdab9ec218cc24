//! Deposit pipeline
//!
//! ```text
//! Idle → KeyGenerated → PayloadEncrypted → MetadataSealed
//!      → IndexesComputed → Persisted → BackupKeyIssued
//! ```
//! A failure anywhere aborts with [`VaultError::DepositFailed`] naming the
//! last stage reached. The payload is encrypted and uploaded chunk by chunk
//! while it is read, so the blob exists from `PayloadEncrypted` on; any later
//! failure deletes it again so no half-committed item is left behind.

use std::fmt;
use std::io::Read;
use std::time::{SystemTime, UNIX_EPOCH};

use gv_core::{
    DepositStage, MediaMetadata, ProgressFn, Record, StoredRow, VaultError, VaultResult,
    TABLE_VAULT,
};
use gv_crypto::{
    compute_indexes, derive_kek, derive_sik, encrypt_stream, encrypted_chunk_len, generate_dek,
    generate_salt, looks_like_backup_key, mime_for_filename, seal_metadata, wrap_dek, BackupKey,
    Dek, StreamOptions, StreamSummary, SALT_SIZE,
};
use secrecy::{ExposeSecret, SecretString};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::context::VaultContext;
use crate::path::blob_path;
use crate::pipe::{receiver_stream, settle, ChannelWriter, PIPE_DEPTH};

/// What the depositor supplies. Location and date are free-form text.
pub struct DepositRequest {
    pub filename: String,
    /// Inferred from the filename when absent
    pub mime_type: Option<String>,
    pub upload_date: String,
    pub state: String,
    pub city: String,
    /// Plaintext source, read once from start to end
    pub payload: Box<dyn Read + Send>,
    /// Expected payload length, for progress only
    pub size_hint: u64,
}

impl DepositRequest {
    /// Request for a payload already held in memory.
    pub fn from_bytes(
        filename: impl Into<String>,
        upload_date: impl Into<String>,
        state: impl Into<String>,
        city: impl Into<String>,
        payload: Vec<u8>,
    ) -> Self {
        Self {
            filename: filename.into(),
            mime_type: None,
            upload_date: upload_date.into(),
            state: state.into(),
            city: city.into(),
            size_hint: payload.len() as u64,
            payload: Box::new(std::io::Cursor::new(payload)),
        }
    }
}

impl fmt::Debug for DepositRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DepositRequest")
            .field("filename", &self.filename)
            .field("mime_type", &self.mime_type)
            .field("upload_date", &self.upload_date)
            .field("size_hint", &self.size_hint)
            .finish_non_exhaustive()
    }
}

#[derive(Debug)]
pub struct DepositReceipt {
    pub record: Record,
    /// Shown to the depositor once. Not stored anywhere.
    pub backup_key: BackupKey,
}

struct Pipeline {
    stage: DepositStage,
}

impl Pipeline {
    fn advance(&mut self, next: DepositStage) {
        debug!(from = %self.stage, to = %next, "deposit stage");
        self.stage = next;
    }

    /// Attach the current stage to a failure. Cancellation passes through untouched.
    fn fail(&self, e: VaultError) -> VaultError {
        match e {
            VaultError::Cancelled => e,
            other => VaultError::DepositFailed {
                stage: self.stage,
                source: Box::new(other),
            },
        }
    }
}

fn check_cancel(cancel: Option<&CancellationToken>) -> VaultResult<()> {
    match cancel {
        Some(token) if token.is_cancelled() => Err(VaultError::Cancelled),
        _ => Ok(()),
    }
}

fn validate(req: &DepositRequest, passphrase: &SecretString) -> VaultResult<()> {
    let pass = passphrase.expose_secret();
    if pass.is_empty() {
        return Err(VaultError::InvalidInput("passphrase must not be empty".into()));
    }
    // Retrieval would read it as a backup key and never derive a KEK from it.
    if looks_like_backup_key(pass) {
        return Err(VaultError::InvalidInput(
            "passphrase has the shape of a backup key; choose a different one".into(),
        ));
    }
    if req.filename.trim().is_empty() {
        return Err(VaultError::InvalidInput("filename must not be empty".into()));
    }
    Ok(())
}

pub(crate) async fn blocking<T, F>(f: F) -> VaultResult<T>
where
    F: FnOnce() -> VaultResult<T> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| VaultError::Other(anyhow::anyhow!("blocking task failed: {e}")))?
}

fn now_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

/// Encrypt `payload` on a blocking thread while streaming the chunks to `path`.
async fn upload_payload(
    ctx: &VaultContext,
    path: &str,
    mut payload: Box<dyn Read + Send>,
    dek: &Dek,
    size_hint: u64,
    progress: Option<ProgressFn>,
    cancel: Option<&CancellationToken>,
) -> VaultResult<StreamSummary> {
    let (tx, rx) = mpsc::channel(PIPE_DEPTH);
    let dek = dek.clone();
    let chunk_size = ctx.chunk_size;
    let cancel = cancel.cloned();

    let encrypt = blocking(move || {
        let mut sink = ChannelWriter::new(tx, encrypted_chunk_len(chunk_size));
        let result = encrypt_stream(
            &mut payload,
            &mut sink,
            &dek,
            chunk_size,
            &StreamOptions {
                total_hint: size_hint,
                progress: progress.as_ref(),
                cancel: cancel.as_ref(),
            },
        );
        if let Err(e) = &result {
            sink.abort(e);
        }
        result
    });
    let upload = ctx.blobs().put_stream(path, receiver_stream(rx));

    let (encrypted, uploaded) = tokio::join!(encrypt, upload);
    settle(encrypted, uploaded)
}

/// Best-effort removal of a blob whose deposit did not complete.
async fn discard_blob(ctx: &VaultContext, path: &str) {
    warn!(path, "deposit incomplete, removing blob");
    if let Err(e) = ctx.blobs().delete(path).await {
        warn!(path, "compensating blob delete failed: {e}");
    }
}

/// Per-item key material generated at the start of a deposit.
struct ItemKeys {
    dek: Dek,
    salt: [u8; SALT_SIZE],
}

/// Seal, index and insert the row for an uploaded blob.
async fn commit_row(
    ctx: &VaultContext,
    p: &mut Pipeline,
    row: StoredRow,
    metadata: &MediaMetadata,
    keys: &ItemKeys,
    passphrase: &SecretString,
    cancel: Option<&CancellationToken>,
) -> VaultResult<StoredRow> {
    let (wrapped_key, sealed) = {
        let passphrase = passphrase.clone();
        let kdf = ctx.kdf;
        let (dek, salt) = (keys.dek.clone(), keys.salt);
        let metadata = metadata.clone();
        blocking(move || {
            let kek = derive_kek(&passphrase, &salt, &kdf)?;
            let wrapped = wrap_dek(&dek, &kek, &salt)?;
            let sealed = seal_metadata(&metadata, &kek)?;
            Ok((wrapped.to_string(), sealed))
        })
        .await?
    };
    p.advance(DepositStage::MetadataSealed);

    let indexes = {
        let passphrase = passphrase.clone();
        let kdf = ctx.kdf;
        let index_salt = ctx.index_salt;
        let (state, city, date) = (
            metadata.state.clone(),
            metadata.city.clone(),
            metadata.upload_date.clone(),
        );
        blocking(move || {
            let sik = derive_sik(&passphrase, &index_salt, &kdf)?;
            compute_indexes(&state, &city, &date, &sik)
        })
        .await?
    };
    p.advance(DepositStage::IndexesComputed);
    check_cancel(cancel)?;

    let row = StoredRow {
        wrapped_key,
        encrypted_metadata: Some(sealed),
        blind_indexes: Some(indexes),
        ..row
    };
    ctx.rows().insert(TABLE_VAULT, row).await
}

/// Encrypt, seal, index and persist one item under `passphrase`.
pub async fn deposit(
    ctx: &VaultContext,
    req: DepositRequest,
    passphrase: &SecretString,
    progress: Option<ProgressFn>,
    cancel: Option<&CancellationToken>,
) -> VaultResult<DepositReceipt> {
    let mut p = Pipeline {
        stage: DepositStage::Idle,
    };
    validate(&req, passphrase).map_err(|e| p.fail(e))?;
    check_cancel(cancel).map_err(|e| p.fail(e))?;

    let id = uuid::Uuid::new_v4().to_string();
    let keys = ItemKeys {
        dek: generate_dek(),
        salt: generate_salt(),
    };
    p.advance(DepositStage::KeyGenerated);

    let DepositRequest {
        filename,
        mime_type,
        upload_date,
        state,
        city,
        payload,
        size_hint,
    } = req;

    let location = ctx
        .location_in_path
        .then_some((state.as_str(), city.as_str()));
    let path = blob_path(ctx.owner(), location, &id);

    let uploaded =
        upload_payload(ctx, &path, payload, &keys.dek, size_hint, progress, cancel).await;
    let summary = match uploaded {
        Ok(summary) => summary,
        Err(e) => {
            discard_blob(ctx, &path).await;
            return Err(p.fail(e));
        }
    };
    p.advance(DepositStage::PayloadEncrypted);

    let mime_type = mime_type
        .filter(|m| !m.trim().is_empty())
        .unwrap_or_else(|| mime_for_filename(&filename).to_string());
    let metadata = MediaMetadata {
        filename,
        mime_type,
        upload_date,
        state,
        city,
    };

    let row = StoredRow {
        id: id.clone(),
        owner: ctx.owner().map(str::to_string),
        wrapped_key: String::new(),
        encrypted_metadata: None,
        blind_indexes: None,
        blob_path: path.clone(),
        size: summary.plaintext_bytes,
        created_at: now_secs(),
        legacy_metadata: None,
    };
    let committed = commit_row(ctx, &mut p, row, &metadata, &keys, passphrase, cancel).await;
    let stored = match committed {
        Ok(stored) => stored,
        Err(e) => {
            discard_blob(ctx, &path).await;
            return Err(p.fail(e));
        }
    };
    p.advance(DepositStage::Persisted);

    let backup_key = BackupKey::from_dek(&keys.dek);
    p.advance(DepositStage::BackupKeyIssued);

    info!(id = %stored.id, bytes = summary.plaintext_bytes, "deposit complete");
    Ok(DepositReceipt {
        record: Record::from_row(TABLE_VAULT, stored, Some(metadata)),
        backup_key,
    })
}
