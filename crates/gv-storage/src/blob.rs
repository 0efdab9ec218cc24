//! Ciphertext blob storage

use async_trait::async_trait;
use futures::stream::{self, BoxStream, StreamExt};
use gv_core::{VaultError, VaultResult};
use opendal::Operator;
use tracing::{debug, warn};

/// Ordered parts of one blob. An `Err` part means the blob is incomplete.
pub type BlobStream = BoxStream<'static, VaultResult<Vec<u8>>>;

#[async_trait]
pub trait BlobStore: Send + Sync {
    async fn put(&self, path: &str, bytes: Vec<u8>) -> VaultResult<()>;

    /// Whole blob. A missing path is [`VaultError::NotFound`].
    async fn get(&self, path: &str) -> VaultResult<Vec<u8>>;

    /// Deleting a missing path succeeds.
    async fn delete(&self, path: &str) -> VaultResult<()>;

    /// At most the first `len` bytes of a blob.
    async fn get_prefix(&self, path: &str, len: usize) -> VaultResult<Vec<u8>> {
        let mut bytes = self.get(path).await?;
        bytes.truncate(len);
        Ok(bytes)
    }

    /// Write a blob part by part and return its length.
    ///
    /// If any part is an `Err`, nothing is left at `path` and that error is
    /// returned. The default collects the parts and calls [`put`](Self::put).
    async fn put_stream(&self, path: &str, mut parts: BlobStream) -> VaultResult<u64> {
        let mut bytes = Vec::new();
        while let Some(part) = parts.next().await {
            bytes.extend_from_slice(&part?);
        }
        let len = bytes.len() as u64;
        self.put(path, bytes).await?;
        Ok(len)
    }

    /// Read a blob part by part. A missing path is [`VaultError::NotFound`].
    async fn get_stream(&self, path: &str) -> VaultResult<BlobStream> {
        let bytes = self.get(path).await?;
        Ok(stream::once(async move { Ok(bytes) }).boxed())
    }
}

/// [`BlobStore`] over an OpenDAL operator. Paths are relative to the operator root.
#[derive(Clone)]
pub struct OpendalBlobStore {
    op: Operator,
}

impl OpendalBlobStore {
    pub fn new(op: Operator) -> Self {
        Self { op }
    }

    pub fn operator(&self) -> &Operator {
        &self.op
    }
}

fn map_err(path: &str, e: opendal::Error) -> VaultError {
    if e.kind() == opendal::ErrorKind::NotFound {
        VaultError::NotFound(format!("blob {path}"))
    } else {
        VaultError::storage(format!("blob {path}: {e}"))
    }
}

#[async_trait]
impl BlobStore for OpendalBlobStore {
    async fn put(&self, path: &str, bytes: Vec<u8>) -> VaultResult<()> {
        let len = bytes.len();
        self.op
            .write(path, bytes)
            .await
            .map_err(|e| map_err(path, e))?;
        debug!(path, bytes = len, "blob stored");
        Ok(())
    }

    async fn get(&self, path: &str) -> VaultResult<Vec<u8>> {
        let buf = self.op.read(path).await.map_err(|e| map_err(path, e))?;
        Ok(buf.to_vec())
    }

    async fn delete(&self, path: &str) -> VaultResult<()> {
        self.op.delete(path).await.map_err(|e| map_err(path, e))?;
        debug!(path, "blob deleted");
        Ok(())
    }

    async fn get_prefix(&self, path: &str, len: usize) -> VaultResult<Vec<u8>> {
        // Ranged reads past EOF are backend-dependent, so clamp to the stat size.
        let size = self
            .op
            .stat(path)
            .await
            .map_err(|e| map_err(path, e))?
            .content_length();
        let end = size.min(len as u64);
        if end == 0 {
            return Ok(Vec::new());
        }
        let buf = self
            .op
            .read_with(path)
            .range(0..end)
            .await
            .map_err(|e| map_err(path, e))?;
        Ok(buf.to_vec())
    }

    async fn put_stream(&self, path: &str, mut parts: BlobStream) -> VaultResult<u64> {
        let mut writer = self.op.writer(path).await.map_err(|e| map_err(path, e))?;
        let mut written = 0u64;
        while let Some(part) = parts.next().await {
            let outcome = match part {
                Ok(bytes) => {
                    written += bytes.len() as u64;
                    writer.write(bytes).await.map_err(|e| map_err(path, e))
                }
                Err(e) => Err(e),
            };
            if let Err(e) = outcome {
                if let Err(abort) = writer.abort().await {
                    warn!(path, "aborting blob write failed: {abort}");
                }
                return Err(e);
            }
        }
        writer.close().await.map_err(|e| map_err(path, e))?;
        debug!(path, bytes = written, "blob streamed");
        Ok(written)
    }

    async fn get_stream(&self, path: &str) -> VaultResult<BlobStream> {
        let size = self
            .op
            .stat(path)
            .await
            .map_err(|e| map_err(path, e))?
            .content_length();
        if size == 0 {
            return Ok(stream::empty().boxed());
        }
        let reader = self.op.reader(path).await.map_err(|e| map_err(path, e))?;
        let bytes = reader
            .into_bytes_stream(0..size)
            .await
            .map_err(|e| map_err(path, e))?;
        let path = path.to_string();
        Ok(bytes
            .map(move |part| {
                part.map(|b| b.to_vec())
                    .map_err(|e| VaultError::storage(format!("blob {path}: {e}")))
            })
            .boxed())
    }
}
