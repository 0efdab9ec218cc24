//! Storage health check

use gv_core::{VaultError, VaultResult};
use opendal::Operator;

/// Verify the storage endpoint is reachable by listing the row root
pub async fn check_health(op: &Operator) -> VaultResult<()> {
    match op.list("rows/").await {
        Ok(_) => Ok(()),
        Err(e) if e.kind() == opendal::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(VaultError::storage(format!("storage health check failed: {e}"))),
    }
}

/// Returns true if storage is reachable, false otherwise (non-panicking)
pub async fn is_healthy(op: &Operator) -> bool {
    check_health(op).await.is_ok()
}
