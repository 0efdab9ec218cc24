//! gv-storage: the two things the vault needs from its environment
//!
//! A [`BlobStore`] keeps ciphertext blobs by path and a [`RowStore`] keeps
//! opaque rows by table. Both only ever see ciphertext, hex strings and
//! blind-index digests. The OpenDAL-backed implementations work over any
//! operator built by [`build_operator`].

pub mod blob;
pub mod health;
pub mod operator;
pub mod rows;

pub use blob::{BlobStore, BlobStream, OpendalBlobStore};
pub use health::{check_health, is_healthy};
pub use operator::{build_operator, memory_operator, S3Credentials};
pub use rows::{OpendalRowStore, RowStore};
