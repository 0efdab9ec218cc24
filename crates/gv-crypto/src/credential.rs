//! What a user types to get at an item: a passphrase, or a backup key

use secrecy::{ExposeSecret, SecretString};

use crate::backup::{looks_like_backup_key, parse_backup_key};
use crate::keys::Dek;

#[derive(Clone)]
pub enum Credential {
    Passphrase(SecretString),
    /// Raw DEK of one specific item
    BackupKey(Dek),
}

impl Credential {
    /// Classify user input. Blank input yields `None`.
    ///
    /// Anything shaped exactly like a backup key is treated as one, so a
    /// passphrase of 64 hex characters cannot be used as a passphrase.
    pub fn parse(input: &SecretString) -> Option<Self> {
        let raw = input.expose_secret();
        if raw.trim().is_empty() {
            return None;
        }
        if looks_like_backup_key(raw) {
            if let Ok(dek) = parse_backup_key(raw) {
                return Some(Credential::BackupKey(dek));
            }
        }
        Some(Credential::Passphrase(input.clone()))
    }

    pub fn passphrase(s: &str) -> Self {
        Credential::Passphrase(SecretString::from(s))
    }

    pub fn is_backup_key(&self) -> bool {
        matches!(self, Credential::BackupKey(_))
    }
}

impl std::fmt::Debug for Credential {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Credential::Passphrase(_) => f.write_str("Credential::Passphrase([REDACTED])"),
            Credential::BackupKey(_) => f.write_str("Credential::BackupKey([REDACTED])"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backup::format_backup_key;
    use crate::keys::generate_dek;

    #[test]
    fn test_blank_input_is_no_credential() {
        assert!(Credential::parse(&SecretString::from("")).is_none());
        assert!(Credential::parse(&SecretString::from("   \t")).is_none());
    }

    #[test]
    fn test_backup_key_detected() {
        let dek = generate_dek();
        let input = SecretString::from(format_backup_key(&dek));
        match Credential::parse(&input) {
            Some(Credential::BackupKey(k)) => assert_eq!(k, dek),
            other => panic!("expected backup key, got {other:?}"),
        }
    }

    #[test]
    fn test_passphrase_kept_verbatim() {
        let input = SecretString::from("  correct horse ");
        match Credential::parse(&input) {
            Some(Credential::Passphrase(p)) => assert_eq!(p.expose_secret(), "  correct horse "),
            other => panic!("expected passphrase, got {other:?}"),
        }
    }
}
