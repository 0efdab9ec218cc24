//! Backup key: the raw DEK in human-transcribable form
//!
//! Shown once after a deposit and never stored anywhere. Display format:
//! `GV-XXXXXXXX-XXXXXXXX-...` (uppercase hex, 8 groups of 8). Import strips the
//! prefix (`GV-`, or `ICE-` from older deposits), dashes and whitespace.

use std::fmt;

use zeroize::{Zeroize, Zeroizing};

use gv_core::{VaultError, VaultResult};

use crate::keys::Dek;
use crate::{codec, KEY_SIZE};

/// Display prefix for newly issued backup keys
pub const BACKUP_KEY_PREFIX: &str = "GV-";

const ACCEPTED_PREFIXES: [&str; 2] = ["GV-", "ICE-"];
const GROUP_LEN: usize = 8;

/// A formatted backup key. Zeroized on drop; print it, copy it, drop it.
pub struct BackupKey {
    display: String,
}

impl BackupKey {
    pub fn from_dek(dek: &Dek) -> Self {
        Self {
            display: format_backup_key(dek),
        }
    }

    pub fn as_str(&self) -> &str {
        &self.display
    }
}

impl Drop for BackupKey {
    fn drop(&mut self) {
        self.display.zeroize();
    }
}

impl fmt::Display for BackupKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.display)
    }
}

impl fmt::Debug for BackupKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BackupKey")
            .field("display", &"[REDACTED]")
            .finish()
    }
}

/// Render a DEK as `GV-` + dash-grouped uppercase hex.
pub fn format_backup_key(dek: &Dek) -> String {
    let hex = Zeroizing::new(codec::encode(dek.as_bytes()).to_uppercase());
    let groups: Vec<&str> = hex
        .as_bytes()
        .chunks(GROUP_LEN)
        .filter_map(|g| std::str::from_utf8(g).ok())
        .collect();
    format!("{BACKUP_KEY_PREFIX}{}", groups.join("-"))
}

/// Strip decoration: display prefix, dashes, whitespace.
fn strip_decoration(input: &str) -> Zeroizing<String> {
    let trimmed = input.trim();
    let body = ACCEPTED_PREFIXES
        .iter()
        .find_map(|p| {
            trimmed
                .get(..p.len())
                .filter(|head| head.eq_ignore_ascii_case(p))
                .map(|_| &trimmed[p.len()..])
        })
        .unwrap_or(trimmed);
    Zeroizing::new(
        body.chars()
            .filter(|c| *c != '-' && !c.is_whitespace())
            .collect(),
    )
}

/// True when `input` has exactly the shape of a backup key once decoration is removed.
pub fn looks_like_backup_key(input: &str) -> bool {
    let clean = strip_decoration(input);
    clean.len() == KEY_SIZE * 2 && clean.chars().all(|c| c.is_ascii_hexdigit())
}

/// Import a backup key as the DEK it encodes.
pub fn parse_backup_key(input: &str) -> VaultResult<Dek> {
    let clean = strip_decoration(input);
    if clean.len() != KEY_SIZE * 2 {
        return Err(VaultError::InvalidInput(format!(
            "backup key must be {} hex characters, got {}",
            KEY_SIZE * 2,
            clean.len()
        )));
    }
    if !clean.chars().all(|c| c.is_ascii_hexdigit()) {
        return Err(VaultError::InvalidInput(
            "backup key contains non-hex characters".into(),
        ));
    }
    let mut bytes: [u8; KEY_SIZE] = codec::decode_array(&clean)
        .map_err(|e| VaultError::InvalidInput(e.to_string()))?;
    let dek = Dek::from_bytes(bytes);
    bytes.zeroize();
    Ok(dek)
}
