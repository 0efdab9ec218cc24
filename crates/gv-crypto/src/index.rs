//! Blind index: HMAC-SHA256 of normalized search terms
//!
//! Deterministic by construction. The same term under the same passphrase
//! always yields the same digest, so the row store can answer equality
//! queries over ciphertext rows. This leaks *equality* to the operator (two
//! rows with the same city under one passphrase are visibly related) but not
//! the term itself. That leakage is the price of backend-side search.
//!
//! Callers must not normalize on their own: both deposit and query go through
//! [`gv_core::normalize_term`] here.

use hmac::{Hmac, Mac};
use sha2::Sha256;

use gv_core::{normalize_term, BlindIndexes, RetrievalQuery, RowFilter, VaultError, VaultResult};

use crate::codec;
use crate::kdf::Sik;

type HmacSha256 = Hmac<Sha256>;

/// Hex digest of one normalized term.
pub fn blind_index(term: &str, sik: &Sik) -> VaultResult<String> {
    let mut mac = HmacSha256::new_from_slice(sik.as_bytes())
        .map_err(|e| VaultError::Other(anyhow::anyhow!("HMAC key rejected: {e}")))?;
    mac.update(normalize_term(term).as_bytes());
    Ok(codec::encode(&mac.finalize().into_bytes()))
}

/// Digests for all three searchable fields of a deposit.
pub fn compute_indexes(
    state: &str,
    city: &str,
    date: &str,
    sik: &Sik,
) -> VaultResult<BlindIndexes> {
    Ok(BlindIndexes {
        state: blind_index(state, sik)?,
        city: blind_index(city, sik)?,
        date: blind_index(date, sik)?,
    })
}

/// Row-store filter for the supplied subset of query terms. Blank terms are skipped.
pub fn query_filter(query: &RetrievalQuery, sik: &Sik) -> VaultResult<RowFilter> {
    let digest = |term: &Option<String>| -> VaultResult<Option<String>> {
        match term {
            Some(t) if !t.trim().is_empty() => blind_index(t, sik).map(Some),
            _ => Ok(None),
        }
    };
    Ok(RowFilter {
        state: digest(&query.state)?,
        city: digest(&query.city)?,
        date: digest(&query.date)?,
    })
}
