//! Search, fetch and purge
//!
//! A passphrase opens the sealed metadata of every row it was used for. With
//! the blind-index strategy the row store narrows candidates by digest first;
//! with decrypt-all every row is opened and filtered locally. Rows the
//! credential does not open are skipped silently.
//!
//! A backup key is one item's raw DEK and cannot open sealed metadata, so each
//! candidate's blob is checked by authenticating its first chunk instead.

use std::collections::HashSet;
use std::io::Write;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use futures::stream::{self, StreamExt};
use gv_core::config::RetrievalStrategy;
use gv_core::{
    MediaMetadata, ProgressFn, Record, RetrievalQuery, RowFilter, StoredRow, VaultError,
    VaultResult, TABLE_LEGACY, TABLE_VAULT,
};
use gv_crypto::{
    decrypt_stream, derive_sik, encrypted_chunk_len, encrypted_len, open_metadata, query_filter,
    unwrap_dek, verify_first_chunk, Credential, Dek, KdfParams, StreamOptions, StreamSummary,
    WrapFormat, WrappedKey,
};
use secrecy::SecretString;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::context::VaultContext;
use crate::deposit::blocking;
use crate::pipe::{pump, settle, ChannelReader, PIPE_DEPTH};

fn check_cancel(cancel: Option<&CancellationToken>) -> VaultResult<()> {
    match cancel {
        Some(token) if token.is_cancelled() => Err(VaultError::Cancelled),
        _ => Ok(()),
    }
}

/// Find every item `credential` opens that matches `query`.
///
/// Blank credential yields an empty result without touching storage. Results
/// are ordered by creation time, then id.
pub async fn search(
    ctx: &VaultContext,
    query: &RetrievalQuery,
    credential: &SecretString,
    progress: Option<ProgressFn>,
    cancel: Option<&CancellationToken>,
) -> VaultResult<Vec<Record>> {
    let Some(cred) = Credential::parse(credential) else {
        debug!("search with blank credential");
        return Ok(Vec::new());
    };
    check_cancel(cancel)?;

    let filter = match (&cred, ctx.retrieval.strategy) {
        (Credential::Passphrase(pass), RetrievalStrategy::BlindIndex) if !query.is_empty() => {
            let (pass, kdf, salt) = (pass.clone(), ctx.kdf, ctx.index_salt);
            let query = query.clone();
            blocking(move || {
                let sik = derive_sik(&pass, &salt, &kdf)?;
                query_filter(&query, &sik)
            })
            .await?
        }
        _ => RowFilter::default(),
    };

    let mut vault_rows = ctx.rows().query(TABLE_VAULT, &filter).await?;
    if !filter.is_empty() {
        // Older clients indexed with the per-item salt, so their digests never
        // match a query. Those rows are opened and filtered like legacy ones.
        let matched: HashSet<String> = vault_rows.iter().map(|r| r.id.clone()).collect();
        let unindexed = ctx
            .rows()
            .query(TABLE_VAULT, &RowFilter::default())
            .await?
            .into_iter()
            .filter(|r| !matched.contains(&r.id) && !indexed_with_index_salt(r));
        vault_rows.extend(unindexed);
    }
    let mut candidates: Vec<(&'static str, StoredRow)> =
        vault_rows.into_iter().map(|r| (TABLE_VAULT, r)).collect();
    if ctx.retrieval.include_legacy {
        let legacy = ctx.rows().query(TABLE_LEGACY, &RowFilter::default()).await?;
        candidates.extend(legacy.into_iter().map(|r| (TABLE_LEGACY, r)));
    }
    candidates.retain(|(_, row)| ctx.can_see(row.owner.as_deref()));

    let total = candidates.len() as u64;
    let scanned = Arc::new(AtomicU64::new(0));
    debug!(candidates = total, "evaluating rows");

    let mut evaluations = stream::iter(candidates)
        .map(|(table, row)| {
            let cred = &cred;
            let scanned = scanned.clone();
            let progress = progress.clone();
            async move {
                check_cancel(cancel)?;
                let out = match cred {
                    Credential::Passphrase(pass) => {
                        evaluate_with_passphrase(ctx, table, row, pass, query).await
                    }
                    Credential::BackupKey(dek) => {
                        evaluate_with_backup_key(ctx, table, row, dek, query).await
                    }
                };
                let done = scanned.fetch_add(1, Ordering::Relaxed) + 1;
                if let Some(cb) = &progress {
                    cb(done, total, "scanning rows");
                }
                out
            }
        })
        .buffer_unordered(ctx.retrieval.concurrency.max(1));

    let mut records = Vec::new();
    while let Some(result) = evaluations.next().await {
        if let Some(record) = result? {
            records.push(record);
        }
    }
    records.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id)));

    info!(scanned = total, matched = records.len(), "search complete");
    Ok(records)
}

/// Only current-format rows carry digests made with the deployment index salt.
fn indexed_with_index_salt(row: &StoredRow) -> bool {
    row.wrapped_key
        .parse::<WrappedKey>()
        .is_ok_and(|w| w.format == WrapFormat::Current)
}

/// Open a row's metadata with a passphrase.
///
/// Rows with sealed metadata are proven by the metadata tag. Rows carrying
/// only plaintext legacy columns are proven by unwrapping their DEK first.
fn open_row(
    row: &StoredRow,
    passphrase: &SecretString,
    kdf: &KdfParams,
) -> VaultResult<MediaMetadata> {
    let wrapped: WrappedKey = row.wrapped_key.parse()?;
    let kek = wrapped.derive_kek(passphrase, kdf)?;
    match &row.encrypted_metadata {
        Some(sealed) => open_metadata(sealed, &kek),
        None => {
            wrapped.unwrap_with(&kek)?;
            row.legacy_metadata.clone().ok_or_else(|| {
                VaultError::MalformedPayload(format!("row {} carries no metadata", row.id))
            })
        }
    }
}

async fn evaluate_with_passphrase(
    ctx: &VaultContext,
    table: &'static str,
    row: StoredRow,
    passphrase: &SecretString,
    query: &RetrievalQuery,
) -> VaultResult<Option<Record>> {
    let id = row.id.clone();
    let (passphrase, kdf) = (passphrase.clone(), ctx.kdf);
    let opened = blocking(move || {
        let meta = open_row(&row, &passphrase, &kdf)?;
        Ok((row, meta))
    })
    .await;

    match opened {
        Ok((row, meta)) if query.matches(&meta) => {
            Ok(Some(Record::from_row(table, row, Some(meta))))
        }
        Ok(_) => Ok(None),
        Err(e) if e.is_credential_mismatch() => {
            debug!(id = %id, table, "row skipped: {e}");
            Ok(None)
        }
        Err(e) => Err(e),
    }
}

async fn evaluate_with_backup_key(
    ctx: &VaultContext,
    table: &'static str,
    row: StoredRow,
    dek: &Dek,
    query: &RetrievalQuery,
) -> VaultResult<Option<Record>> {
    if !blob_opens_with(ctx, &row.blob_path, dek).await? {
        debug!(id = %row.id, table, "blob does not open with backup key");
        return Ok(None);
    }
    let meta = row.legacy_metadata.clone();
    if meta.as_ref().is_some_and(|m| !query.matches(m)) {
        return Ok(None);
    }
    Ok(Some(Record::from_row(table, row, meta)))
}

/// Authenticate the first chunk of a blob. Missing blobs and empty blobs are `false`.
async fn blob_opens_with(ctx: &VaultContext, path: &str, dek: &Dek) -> VaultResult<bool> {
    let chunk_size = ctx.chunk_size;
    let prefix = match ctx.blobs().get_prefix(path, encrypted_chunk_len(chunk_size)).await {
        Ok(p) => p,
        Err(VaultError::NotFound(_)) => return Ok(false),
        Err(e) => return Err(e),
    };
    let dek = dek.clone();
    blocking(move || Ok(verify_first_chunk(&prefix, &dek, chunk_size))).await
}

/// Look up one item by id, without opening anything.
///
/// The returned record is locked unless the row carries plaintext legacy metadata.
pub async fn find_record(ctx: &VaultContext, id: &str) -> VaultResult<Record> {
    for table in [TABLE_VAULT, TABLE_LEGACY] {
        let rows = ctx.rows().query(table, &RowFilter::default()).await?;
        if let Some(row) = rows
            .into_iter()
            .find(|r| r.id == id && ctx.can_see(r.owner.as_deref()))
        {
            let meta = row.legacy_metadata.clone();
            let mut record = Record::from_row(table, row, meta);
            record.status = gv_core::RecordStatus::Locked;
            return Ok(record);
        }
    }
    Err(VaultError::NotFound(format!("item {id}")))
}

async fn unlock(ctx: &VaultContext, record: &Record, cred: &Credential) -> VaultResult<Dek> {
    let (payload, cred, kdf) = (record.wrapped_key.clone(), cred.clone(), ctx.kdf);
    blocking(move || unwrap_dek(&payload, &cred, &kdf)).await
}

fn parse_credential(credential: &SecretString) -> VaultResult<Credential> {
    Credential::parse(credential)
        .ok_or_else(|| VaultError::InvalidInput("credential must not be empty".into()))
}

/// Decrypt one item's payload into `out`, streaming it from storage.
///
/// Chunks are written as they authenticate, so on error `out` may hold a
/// prefix of the payload and must be discarded. `out` is handed back on success.
pub async fn fetch_into<W>(
    ctx: &VaultContext,
    record: &Record,
    credential: &SecretString,
    out: W,
    progress: Option<ProgressFn>,
    cancel: Option<&CancellationToken>,
) -> VaultResult<(W, StreamSummary)>
where
    W: Write + Send + 'static,
{
    let cred = parse_credential(credential)?;
    check_cancel(cancel)?;
    let dek = unlock(ctx, record, &cred).await?;
    let parts = ctx.blobs().get_stream(&record.blob_path).await?;

    let (tx, rx) = mpsc::channel(PIPE_DEPTH);
    let chunk_size = ctx.chunk_size;
    let total = encrypted_len(record.size, chunk_size);
    let cancel_owned = cancel.cloned();
    let decrypt = blocking(move || {
        let mut source = ChannelReader::new(rx);
        let mut out = out;
        let summary = decrypt_stream(
            &mut source,
            &mut out,
            &dek,
            chunk_size,
            &StreamOptions {
                total_hint: total,
                progress: progress.as_ref(),
                cancel: cancel_owned.as_ref(),
            },
        )?;
        Ok((out, summary))
    });

    let (decrypted, pumped) = tokio::join!(decrypt, pump(parts, tx));
    let (out, summary) = settle(decrypted, pumped).map_err(|e| match e {
        // A backup key is not checked against the row, so its first chunk is the proof.
        VaultError::CorruptOrWrongKey { chunk: 0 } if cred.is_backup_key() => {
            VaultError::WrongCredential
        }
        other => other,
    })?;
    if cred.is_backup_key() && summary.chunks == 0 {
        // An empty blob has no chunk to check the key against.
        return Err(VaultError::WrongCredential);
    }

    info!(id = %record.id, bytes = summary.plaintext_bytes, "payload fetched");
    Ok((out, summary))
}

/// Decrypt one item's payload into memory. Output is returned only if every chunk authenticates.
pub async fn fetch_payload(
    ctx: &VaultContext,
    record: &Record,
    credential: &SecretString,
    progress: Option<ProgressFn>,
    cancel: Option<&CancellationToken>,
) -> VaultResult<Vec<u8>> {
    let buf = Vec::with_capacity(usize::try_from(record.size).unwrap_or(0));
    fetch_into(ctx, record, credential, buf, progress, cancel)
        .await
        .map(|(out, _)| out)
}

/// Delete an item's blob and row. The caller proves ownership with its credential first.
///
/// The blob goes first: if the row delete then fails, the item is still listed
/// and a retry finishes the job.
pub async fn purge(
    ctx: &VaultContext,
    record: &Record,
    credential: &SecretString,
) -> VaultResult<()> {
    let cred = parse_credential(credential)?;
    let dek = unlock(ctx, record, &cred).await?;
    if cred.is_backup_key() && !blob_opens_with(ctx, &record.blob_path, &dek).await? {
        return Err(VaultError::WrongCredential);
    }

    ctx.blobs().delete(&record.blob_path).await?;
    if let Err(e) = ctx.rows().delete(&record.table, &record.id).await {
        warn!(id = %record.id, path = %record.blob_path, "blob deleted but row remains: {e}");
        return Err(e);
    }
    info!(id = %record.id, table = %record.table, "item purged");
    Ok(())
}
