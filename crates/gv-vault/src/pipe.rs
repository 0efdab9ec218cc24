//! Bridges between the blocking chunk cipher and async blob streams
//!
//! The cipher runs on a blocking thread over `Read`/`Write`; storage is async.
//! A bounded channel sits between them, so only a few encrypted chunks are in
//! memory at any time regardless of payload size.

use std::io::{self, Read, Write};

use futures::stream::{self, StreamExt};
use gv_core::{VaultError, VaultResult};
use gv_storage::BlobStream;
use tokio::sync::mpsc;

/// Encrypted chunks buffered between the cipher and storage
pub const PIPE_DEPTH: usize = 4;

fn pipe_closed(msg: impl Into<String>) -> io::Error {
    io::Error::new(io::ErrorKind::BrokenPipe, msg.into())
}

/// `Write` end that forwards the cipher's output to an async consumer in
/// parts of at least `part_len` bytes.
pub struct ChannelWriter {
    tx: mpsc::Sender<VaultResult<Vec<u8>>>,
    buf: Vec<u8>,
    part_len: usize,
}

impl ChannelWriter {
    pub fn new(tx: mpsc::Sender<VaultResult<Vec<u8>>>, part_len: usize) -> Self {
        Self {
            tx,
            buf: Vec::with_capacity(part_len),
            part_len,
        }
    }

    fn send_buffered(&mut self) -> io::Result<()> {
        if self.buf.is_empty() {
            return Ok(());
        }
        let part = std::mem::replace(&mut self.buf, Vec::with_capacity(self.part_len));
        self.tx
            .blocking_send(Ok(part))
            .map_err(|_| pipe_closed("blob upload stopped"))
    }

    /// Mark the stream incomplete so the consumer discards what it has.
    pub fn abort(self, reason: &VaultError) {
        let _ = self.tx.blocking_send(Err(VaultError::Other(anyhow::anyhow!(
            "payload stream aborted: {reason}"
        ))));
    }
}

impl Write for ChannelWriter {
    fn write(&mut self, data: &[u8]) -> io::Result<usize> {
        self.buf.extend_from_slice(data);
        if self.buf.len() >= self.part_len {
            self.send_buffered()?;
        }
        Ok(data.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        self.send_buffered()
    }
}

/// Async side of a [`ChannelWriter`].
pub fn receiver_stream(rx: mpsc::Receiver<VaultResult<Vec<u8>>>) -> BlobStream {
    stream::unfold(rx, |mut rx| async move { rx.recv().await.map(|part| (part, rx)) }).boxed()
}

/// `Read` end fed by [`pump`].
pub struct ChannelReader {
    rx: mpsc::Receiver<io::Result<Vec<u8>>>,
    part: Vec<u8>,
    pos: usize,
}

impl ChannelReader {
    pub fn new(rx: mpsc::Receiver<io::Result<Vec<u8>>>) -> Self {
        Self {
            rx,
            part: Vec::new(),
            pos: 0,
        }
    }
}

impl Read for ChannelReader {
    fn read(&mut self, out: &mut [u8]) -> io::Result<usize> {
        while self.pos >= self.part.len() {
            match self.rx.blocking_recv() {
                None => return Ok(0),
                Some(Ok(part)) => {
                    self.part = part;
                    self.pos = 0;
                }
                Some(Err(e)) => return Err(e),
            }
        }
        let n = out.len().min(self.part.len() - self.pos);
        out[..n].copy_from_slice(&self.part[self.pos..self.pos + n]);
        self.pos += n;
        Ok(n)
    }
}

/// Feed blob parts to a [`ChannelReader`].
///
/// A storage error is forwarded so the reader fails instead of seeing a
/// clean end of stream, and is also returned here. A reader that hung up
/// early is not an error on this side.
pub async fn pump(mut parts: BlobStream, tx: mpsc::Sender<io::Result<Vec<u8>>>) -> VaultResult<()> {
    while let Some(part) = parts.next().await {
        match part {
            Ok(bytes) => {
                if tx.send(Ok(bytes)).await.is_err() {
                    return Ok(());
                }
            }
            Err(e) => {
                let _ = tx.send(Err(pipe_closed(e.to_string()))).await;
                return Err(e);
            }
        }
    }
    Ok(())
}

/// Pick the root cause once both ends of a pipe have finished.
///
/// Cancellation wins. A cipher-side broken pipe only echoes a storage failure,
/// so the storage error is reported instead.
pub fn settle<T, U>(cipher: VaultResult<T>, storage: VaultResult<U>) -> VaultResult<T> {
    match (cipher, storage) {
        (Ok(v), Ok(_)) => Ok(v),
        (Err(VaultError::Cancelled), _) => Err(VaultError::Cancelled),
        (Err(VaultError::Io(e)), Err(storage)) if e.kind() == io::ErrorKind::BrokenPipe => {
            Err(storage)
        }
        (Err(e), _) | (Ok(_), Err(e)) => Err(e),
    }
}
