//! gv-vault: deposit, search, fetch and purge over untrusted storage
//!
//! Every operation takes an explicit [`VaultContext`]. Nothing here keeps
//! global state, and no credential ever leaves the process.

pub mod context;
pub mod deposit;
pub mod path;
mod pipe;
pub mod retrieve;

pub use context::VaultContext;
pub use deposit::{deposit, DepositReceipt, DepositRequest};
pub use retrieve::{fetch_into, fetch_payload, find_record, purge, search};
