//! Chunked payload cipher
//!
//! Encrypted blob format (binary), one record per plaintext chunk:
//! ```text
//! [12 bytes: random nonce][N bytes: ciphertext][16 bytes: GCM tag]
//! ```
//! Every chunk except the last carries exactly `chunk_size` plaintext bytes,
//! so a reader splits the blob at `chunk_size + 28` without any framing. An
//! empty payload encrypts to a single empty chunk (28 bytes), so even an empty
//! item carries something a key can be checked against. An empty blob still
//! decrypts to empty output.
//!
//! Chunks carry no associated data. Swapping two whole chunks of one blob is
//! therefore not detected; truncation inside a chunk and bit flips are.

use std::io::{ErrorKind, Read, Write};

use gv_core::{ProgressFn, VaultError, VaultResult};
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::aead;
use crate::keys::Dek;
use crate::{NONCE_SIZE, TAG_SIZE};

/// Per-chunk overhead: nonce + tag.
pub const CHUNK_OVERHEAD: usize = NONCE_SIZE + TAG_SIZE;

/// Knobs shared by [`encrypt_stream`] and [`decrypt_stream`].
#[derive(Clone, Default)]
pub struct StreamOptions<'a> {
    /// Total bytes expected on the input side, for progress reporting only
    pub total_hint: u64,
    pub progress: Option<&'a ProgressFn>,
    /// Checked before every chunk
    pub cancel: Option<&'a CancellationToken>,
}

impl StreamOptions<'_> {
    fn check_cancelled(&self) -> VaultResult<()> {
        match self.cancel {
            Some(token) if token.is_cancelled() => Err(VaultError::Cancelled),
            _ => Ok(()),
        }
    }

    fn report(&self, done: u64, msg: &str) {
        if let Some(cb) = self.progress {
            cb(done, self.total_hint.max(done), msg);
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StreamSummary {
    pub chunks: u64,
    pub plaintext_bytes: u64,
    pub ciphertext_bytes: u64,
}

/// Size of one full encrypted chunk on the wire.
pub fn encrypted_chunk_len(chunk_size: usize) -> usize {
    chunk_size + CHUNK_OVERHEAD
}

/// Ciphertext length for a payload of `plaintext_len` bytes.
pub fn encrypted_len(plaintext_len: u64, chunk_size: usize) -> u64 {
    let chunk = chunk_size as u64;
    let chunks = plaintext_len.div_ceil(chunk).max(1);
    plaintext_len + chunks * CHUNK_OVERHEAD as u64
}

fn check_chunk_size(chunk_size: usize) -> VaultResult<()> {
    if chunk_size == 0 {
        return Err(VaultError::InvalidInput("chunk size must be positive".into()));
    }
    Ok(())
}

/// Fill `buf` from `reader` until it is full or the reader is exhausted.
fn read_full<R: Read>(reader: &mut R, buf: &mut [u8]) -> std::io::Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        match reader.read(&mut buf[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(e) if e.kind() == ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        }
    }
    Ok(filled)
}

/// Encrypt `reader` chunk by chunk into `writer` under a fresh nonce per chunk.
pub fn encrypt_stream<R: Read, W: Write>(
    reader: &mut R,
    writer: &mut W,
    dek: &Dek,
    chunk_size: usize,
    opts: &StreamOptions<'_>,
) -> VaultResult<StreamSummary> {
    check_chunk_size(chunk_size)?;
    let mut buf = zeroize::Zeroizing::new(vec![0u8; chunk_size]);
    let mut summary = StreamSummary::default();

    loop {
        opts.check_cancelled()?;
        let n = read_full(reader, &mut buf)?;
        if n == 0 && summary.chunks > 0 {
            break;
        }

        let (nonce, ciphertext) = aead::seal(dek.as_bytes(), &buf[..n])
            .map_err(|_| VaultError::Other(anyhow::anyhow!("chunk encryption failed")))?;
        writer.write_all(&nonce)?;
        writer.write_all(&ciphertext)?;

        summary.chunks += 1;
        summary.plaintext_bytes += n as u64;
        summary.ciphertext_bytes += (NONCE_SIZE + ciphertext.len()) as u64;
        opts.report(summary.plaintext_bytes, "encrypting");

        if n < chunk_size {
            break;
        }
    }
    writer.flush()?;

    debug!(
        chunks = summary.chunks,
        bytes = summary.plaintext_bytes,
        "payload encrypted"
    );
    Ok(summary)
}

/// Decrypt a blob produced by [`encrypt_stream`] with the same `chunk_size`.
///
/// Plaintext is written as each chunk authenticates. On error the writer may
/// already hold a prefix of the payload; callers must discard it.
pub fn decrypt_stream<R: Read, W: Write>(
    reader: &mut R,
    writer: &mut W,
    dek: &Dek,
    chunk_size: usize,
    opts: &StreamOptions<'_>,
) -> VaultResult<StreamSummary> {
    check_chunk_size(chunk_size)?;
    let stride = encrypted_chunk_len(chunk_size);
    let mut buf = vec![0u8; stride];
    let mut summary = StreamSummary::default();

    loop {
        opts.check_cancelled()?;
        let n = read_full(reader, &mut buf)?;
        if n == 0 {
            break;
        }

        let chunk = summary.chunks;
        let plaintext = open_chunk(&buf[..n], dek).ok_or(VaultError::CorruptOrWrongKey { chunk })?;
        writer.write_all(&plaintext)?;

        summary.chunks += 1;
        summary.plaintext_bytes += plaintext.len() as u64;
        summary.ciphertext_bytes += n as u64;
        opts.report(summary.ciphertext_bytes, "decrypting");

        if n < stride {
            break;
        }
    }
    writer.flush()?;
    Ok(summary)
}

fn open_chunk(record: &[u8], dek: &Dek) -> Option<zeroize::Zeroizing<Vec<u8>>> {
    if record.len() < CHUNK_OVERHEAD {
        return None;
    }
    let (nonce, ciphertext) = record.split_at(NONCE_SIZE);
    let nonce: [u8; NONCE_SIZE] = nonce.try_into().ok()?;
    aead::open(dek.as_bytes(), &nonce, ciphertext)
        .ok()
        .map(zeroize::Zeroizing::new)
}

/// Authenticate the first chunk of a blob without decrypting the rest.
///
/// `prefix` is the first `encrypted_chunk_len(chunk_size)` bytes of the blob
/// (or the whole blob if shorter). An empty blob proves nothing and yields false.
pub fn verify_first_chunk(prefix: &[u8], dek: &Dek, chunk_size: usize) -> bool {
    let end = prefix.len().min(encrypted_chunk_len(chunk_size));
    !prefix.is_empty() && open_chunk(&prefix[..end], dek).is_some()
}

pub fn encrypt_bytes(plaintext: &[u8], dek: &Dek, chunk_size: usize) -> VaultResult<Vec<u8>> {
    let capacity = encrypted_len(plaintext.len() as u64, chunk_size.max(1)) as usize;
    let mut out = Vec::with_capacity(capacity);
    encrypt_stream(
        &mut &plaintext[..],
        &mut out,
        dek,
        chunk_size,
        &StreamOptions {
            total_hint: plaintext.len() as u64,
            ..Default::default()
        },
    )?;
    Ok(out)
}

/// Decrypt a whole blob in memory. Output is returned only if every chunk authenticates.
pub fn decrypt_bytes(blob: &[u8], dek: &Dek, chunk_size: usize) -> VaultResult<Vec<u8>> {
    let mut out = Vec::with_capacity(blob.len());
    decrypt_stream(
        &mut &blob[..],
        &mut out,
        dek,
        chunk_size,
        &StreamOptions {
            total_hint: blob.len() as u64,
            ..Default::default()
        },
    )?;
    Ok(out)
}
