pub mod config;
pub mod error;
pub mod types;

pub use error::{VaultError, VaultResult};
pub use types::{
    normalize_term, BlindIndexes, DepositStage, MediaMetadata, ProgressFn, Record, RecordStatus,
    RetrievalQuery, RowFilter, StoredRow, TABLE_LEGACY, TABLE_VAULT,
};
