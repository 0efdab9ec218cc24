//! Opaque row storage with blind-index equality filtering

use async_trait::async_trait;
use gv_core::{RowFilter, StoredRow, VaultError, VaultResult};
use opendal::Operator;
use tracing::debug;

#[async_trait]
pub trait RowStore: Send + Sync {
    /// Persist a row and return it as stored.
    async fn insert(&self, table: &str, row: StoredRow) -> VaultResult<StoredRow>;

    /// All rows of `table` whose blind indexes equal every digest in `filter`.
    async fn query(&self, table: &str, filter: &RowFilter) -> VaultResult<Vec<StoredRow>>;

    async fn delete(&self, table: &str, id: &str) -> VaultResult<()>;
}

/// [`RowStore`] keeping each row as a JSON document at `rows/{table}/{id}.json`.
///
/// Filtering happens after listing, so every query reads the whole table.
/// Good enough for object storage without a query engine.
#[derive(Clone)]
pub struct OpendalRowStore {
    op: Operator,
}

impl OpendalRowStore {
    pub fn new(op: Operator) -> Self {
        Self { op }
    }

    fn table_dir(table: &str) -> String {
        format!("rows/{table}/")
    }

    fn row_path(table: &str, id: &str) -> String {
        format!("rows/{table}/{id}.json")
    }
}

fn check_name(kind: &str, s: &str) -> VaultResult<()> {
    let ok = !s.is_empty()
        && s
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_');
    if ok {
        Ok(())
    } else {
        Err(VaultError::InvalidInput(format!("invalid {kind} {s:?}")))
    }
}

#[async_trait]
impl RowStore for OpendalRowStore {
    async fn insert(&self, table: &str, row: StoredRow) -> VaultResult<StoredRow> {
        check_name("table", table)?;
        check_name("row id", &row.id)?;
        let path = Self::row_path(table, &row.id);
        let json = serde_json::to_vec(&row)
            .map_err(|e| VaultError::InvalidInput(format!("row not serializable: {e}")))?;
        self.op
            .write(&path, json)
            .await
            .map_err(|e| VaultError::storage(format!("inserting {path}: {e}")))?;
        debug!(table, id = %row.id, "row inserted");
        Ok(row)
    }

    async fn query(&self, table: &str, filter: &RowFilter) -> VaultResult<Vec<StoredRow>> {
        check_name("table", table)?;
        let dir = Self::table_dir(table);
        let entries = match self.op.list(&dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == opendal::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(VaultError::storage(format!("listing {dir}: {e}"))),
        };

        let mut rows = Vec::new();
        for entry in entries {
            let path = entry.path();
            if !path.ends_with(".json") {
                continue;
            }
            let data = match self.op.read(path).await {
                Ok(d) => d,
                // deleted between list and read
                Err(e) if e.kind() == opendal::ErrorKind::NotFound => continue,
                Err(e) => return Err(VaultError::storage(format!("reading {path}: {e}"))),
            };
            let row: StoredRow = match serde_json::from_slice(&data.to_vec()) {
                Ok(r) => r,
                Err(e) => {
                    tracing::warn!(path, "skipping unreadable row: {e}");
                    continue;
                }
            };
            if filter.matches(&row) {
                rows.push(row);
            }
        }
        debug!(table, matched = rows.len(), "row query");
        Ok(rows)
    }

    async fn delete(&self, table: &str, id: &str) -> VaultResult<()> {
        check_name("table", table)?;
        check_name("row id", id)?;
        let path = Self::row_path(table, id);
        self.op
            .delete(&path)
            .await
            .map_err(|e| VaultError::storage(format!("deleting {path}: {e}")))?;
        debug!(table, id, "row deleted");
        Ok(())
    }
}
