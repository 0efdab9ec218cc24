//! Envelope key manager: per-item DEK generation, wrapping, and versioned unwrap
//!
//! Wrapped-key wire format:
//! ```text
//! PWV3:<salt-hex 16B>:<iv-hex 12B>:<wrapped-hex 32B + 16B tag>   current
//! PWV2:<salt>:<iv>:<wrapped>                                     legacy, raw PBKDF2 KEK
//! PWV1:<salt>:<iv>:<wrapped>  or  <salt>:<iv>:<wrapped>           legacy, raw PBKDF2 KEK
//! ```

use std::fmt;
use std::str::FromStr;

use rand::RngCore;
use secrecy::SecretString;
use zeroize::{Zeroize, ZeroizeOnDrop};

use gv_core::{VaultError, VaultResult};

use crate::credential::Credential;
use crate::kdf::{derive_kek, derive_legacy_kek, KdfParams, Kek};
use crate::{aead, codec, KEY_SIZE, NONCE_SIZE, SALT_SIZE, TAG_SIZE};

/// A per-item 256-bit data-encryption key. Zeroized on drop.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct Dek {
    bytes: [u8; KEY_SIZE],
}

impl Dek {
    pub fn from_bytes(bytes: [u8; KEY_SIZE]) -> Self {
        Self { bytes }
    }

    pub fn as_bytes(&self) -> &[u8; KEY_SIZE] {
        &self.bytes
    }
}

impl PartialEq for Dek {
    fn eq(&self, other: &Self) -> bool {
        self.bytes == other.bytes
    }
}

impl Eq for Dek {}

impl fmt::Debug for Dek {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Dek").field("bytes", &"[REDACTED]").finish()
    }
}

/// Generate a random 256-bit data-encryption key.
pub fn generate_dek() -> Dek {
    let mut bytes = [0u8; KEY_SIZE];
    rand::thread_rng().fill_bytes(&mut bytes);
    Dek::from_bytes(bytes)
}

/// Fresh random per-item KDF salt.
pub fn generate_salt() -> [u8; SALT_SIZE] {
    let mut salt = [0u8; SALT_SIZE];
    rand::thread_rng().fill_bytes(&mut salt);
    salt
}

/// Known wrapped-key layouts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WrapFormat {
    /// Untagged `salt:iv:wrapped` or `PWV1:`; KEK is raw PBKDF2 output
    LegacyV1,
    /// `PWV2:`; KEK is raw PBKDF2 output
    LegacyV2,
    /// `PWV3:`; KEK is HKDF-separated from the SIK
    Current,
}

impl WrapFormat {
    pub fn tag(self) -> &'static str {
        match self {
            WrapFormat::LegacyV1 => "PWV1",
            WrapFormat::LegacyV2 => "PWV2",
            WrapFormat::Current => "PWV3",
        }
    }

    fn from_tag(tag: &str) -> VaultResult<Self> {
        match tag {
            "PWV1" => Ok(WrapFormat::LegacyV1),
            "PWV2" => Ok(WrapFormat::LegacyV2),
            "PWV3" => Ok(WrapFormat::Current),
            other => Err(VaultError::UnsupportedVersion(other.to_string())),
        }
    }

    /// Derive the KEK the way this format was written.
    pub fn derive_kek(
        self,
        passphrase: &SecretString,
        salt: &[u8; SALT_SIZE],
        params: &KdfParams,
    ) -> VaultResult<Kek> {
        match self {
            WrapFormat::LegacyV1 | WrapFormat::LegacyV2 => {
                derive_legacy_kek(passphrase, salt, params)
            }
            WrapFormat::Current => derive_kek(passphrase, salt, params),
        }
    }
}

/// Parsed wrapped-key payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WrappedKey {
    pub format: WrapFormat,
    pub salt: [u8; SALT_SIZE],
    pub iv: [u8; NONCE_SIZE],
    pub wrapped: Vec<u8>,
}

impl FromStr for WrappedKey {
    type Err = VaultError;

    fn from_str(s: &str) -> VaultResult<Self> {
        let segments: Vec<&str> = s.trim().split(':').collect();

        let (format, rest) = match segments.as_slice() {
            [tag, rest @ ..] if tag.starts_with("PW") => (WrapFormat::from_tag(tag)?, rest),
            rest => (WrapFormat::LegacyV1, rest),
        };

        let [salt, iv, wrapped] = rest else {
            return Err(VaultError::MalformedPayload(format!(
                "wrapped key has {} segments",
                segments.len()
            )));
        };

        let wrapped = codec::decode(wrapped)?;
        if wrapped.len() != KEY_SIZE + TAG_SIZE {
            return Err(VaultError::MalformedPayload(format!(
                "wrapped key is {} bytes (expected {})",
                wrapped.len(),
                KEY_SIZE + TAG_SIZE
            )));
        }

        Ok(Self {
            format,
            salt: codec::decode_array(salt)?,
            iv: codec::decode_array(iv)?,
            wrapped,
        })
    }
}

impl fmt::Display for WrappedKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}:{}:{}:{}",
            self.format.tag(),
            codec::encode(&self.salt),
            codec::encode(&self.iv),
            codec::encode(&self.wrapped)
        )
    }
}

impl WrappedKey {
    pub fn derive_kek(&self, passphrase: &SecretString, params: &KdfParams) -> VaultResult<Kek> {
        self.format.derive_kek(passphrase, &self.salt, params)
    }

    /// Recover the DEK with an already-derived KEK.
    pub fn unwrap_with(&self, kek: &Kek) -> VaultResult<Dek> {
        let mut plaintext = aead::open(kek.as_bytes(), &self.iv, &self.wrapped)
            .map_err(|_| VaultError::WrongCredential)?;

        if plaintext.len() != KEY_SIZE {
            plaintext.zeroize();
            return Err(VaultError::MalformedPayload(format!(
                "unwrapped key is {} bytes",
                plaintext.len()
            )));
        }

        let mut key_bytes = [0u8; KEY_SIZE];
        key_bytes.copy_from_slice(&plaintext);
        plaintext.zeroize();
        Ok(Dek::from_bytes(key_bytes))
    }
}

/// Wrap a DEK under a KEK derived from `salt`, in the current format.
pub fn wrap_dek(dek: &Dek, kek: &Kek, salt: &[u8; SALT_SIZE]) -> VaultResult<WrappedKey> {
    let (iv, wrapped) = aead::seal(kek.as_bytes(), dek.as_bytes())
        .map_err(|_| VaultError::Other(anyhow::anyhow!("key wrapping failed")))?;
    Ok(WrappedKey {
        format: WrapFormat::Current,
        salt: *salt,
        iv,
        wrapped,
    })
}

/// Recover the DEK for a stored payload.
///
/// A backup key is used as the DEK directly and the payload is not consulted.
/// A passphrase goes through the payload's format-specific KEK derivation.
pub fn unwrap_dek(payload: &str, credential: &Credential, params: &KdfParams) -> VaultResult<Dek> {
    match credential {
        Credential::BackupKey(dek) => Ok(dek.clone()),
        Credential::Passphrase(passphrase) => {
            let wrapped: WrappedKey = payload.parse()?;
            let kek = wrapped.derive_kek(passphrase, params)?;
            wrapped.unwrap_with(&kek)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const FAST: KdfParams = KdfParams { iterations: 1_000 };

    fn passphrase(s: &str) -> Credential {
        Credential::Passphrase(SecretString::from(s))
    }

    fn wrap_with_passphrase(dek: &Dek, pass: &str, salt: [u8; 16]) -> String {
        let kek = derive_kek(&SecretString::from(pass), &salt, &FAST).unwrap();
        wrap_dek(dek, &kek, &salt).unwrap().to_string()
    }

    #[test]
    fn test_dek_generation() {
        let k1 = generate_dek();
        let k2 = generate_dek();
        assert_ne!(k1.as_bytes(), k2.as_bytes(), "random keys must differ");
    }

    #[test]
    fn test_wrap_unwrap_roundtrip() {
        let dek = generate_dek();
        let payload = wrap_with_passphrase(&dek, "correct horse", [3u8; 16]);

        assert!(payload.starts_with("PWV3:"));
        let unwrapped = unwrap_dek(&payload, &passphrase("correct horse"), &FAST).unwrap();
        assert_eq!(unwrapped, dek);
    }

    #[test]
    fn test_unwrap_wrong_passphrase() {
        let dek = generate_dek();
        let payload = wrap_with_passphrase(&dek, "correct horse", [3u8; 16]);

        let result = unwrap_dek(&payload, &passphrase("battery staple"), &FAST);
        assert!(matches!(result, Err(VaultError::WrongCredential)));
    }

    #[test]
    fn test_backup_key_bypasses_payload() {
        let dek = generate_dek();
        let credential = Credential::BackupKey(dek.clone());

        // Payload is not even parsed on the backup path
        let unwrapped = unwrap_dek("garbage", &credential, &FAST).unwrap();
        assert_eq!(unwrapped, dek);
    }

    #[test]
    fn test_wire_format_segments() {
        let dek = generate_dek();
        let payload = wrap_with_passphrase(&dek, "pw", [0xAB; 16]);
        let parts: Vec<&str> = payload.split(':').collect();

        assert_eq!(parts.len(), 4);
        assert_eq!(parts[0], "PWV3");
        assert_eq!(parts[1], "ab".repeat(16));
        assert_eq!(parts[2].len(), NONCE_SIZE * 2);
        assert_eq!(parts[3].len(), (KEY_SIZE + TAG_SIZE) * 2);
    }

    fn legacy_payload(tag: Option<&str>, dek: &Dek, pass: &str, salt: [u8; 16]) -> String {
        let kek = derive_legacy_kek(&SecretString::from(pass), &salt, &FAST).unwrap();
        let (iv, wrapped) = aead::seal(kek.as_bytes(), dek.as_bytes()).unwrap();
        let body = format!(
            "{}:{}:{}",
            codec::encode(&salt),
            codec::encode(&iv),
            codec::encode(&wrapped)
        );
        match tag {
            Some(t) => format!("{t}:{body}"),
            None => body,
        }
    }

    #[test]
    fn test_unwrap_legacy_formats() {
        let dek = generate_dek();
        for tag in [None, Some("PWV1"), Some("PWV2")] {
            let payload = legacy_payload(tag, &dek, "old secret", [5u8; 16]);
            let unwrapped = unwrap_dek(&payload, &passphrase("old secret"), &FAST)
                .unwrap_or_else(|e| panic!("tag {tag:?}: {e}"));
            assert_eq!(unwrapped, dek);
        }
    }

    #[test]
    fn test_parse_dispatches_on_tag() {
        let dek = generate_dek();
        let v1: WrappedKey = legacy_payload(None, &dek, "p", [1; 16]).parse().unwrap();
        let v1_tagged: WrappedKey = legacy_payload(Some("PWV1"), &dek, "p", [1; 16]).parse().unwrap();
        let v2: WrappedKey = legacy_payload(Some("PWV2"), &dek, "p", [1; 16]).parse().unwrap();
        let v3: WrappedKey = wrap_with_passphrase(&dek, "p", [1; 16]).parse().unwrap();

        assert_eq!(v1.format, WrapFormat::LegacyV1);
        assert_eq!(v1_tagged.format, WrapFormat::LegacyV1);
        assert_eq!(v2.format, WrapFormat::LegacyV2);
        assert_eq!(v3.format, WrapFormat::Current);
    }

    #[test]
    fn test_unknown_tag_is_unsupported_version() {
        let dek = generate_dek();
        let payload = wrap_with_passphrase(&dek, "p", [1; 16]).replacen("PWV3", "PWV9", 1);

        let result = unwrap_dek(&payload, &passphrase("p"), &FAST);
        assert!(matches!(result, Err(VaultError::UnsupportedVersion(t)) if t == "PWV9"));
    }

    #[test]
    fn test_malformed_payloads() {
        for bad in ["", "PWV3:00", "nohex:zz:zz", "PWV3:00:00:00:00", "PWV3:zz:zz:zz"] {
            let result = unwrap_dek(bad, &passphrase("p"), &FAST);
            assert!(
                matches!(result, Err(VaultError::MalformedPayload(_))),
                "{bad:?} gave {result:?}"
            );
        }
    }

    #[test]
    fn test_short_salt_rejected() {
        let dek = generate_dek();
        let good = wrap_with_passphrase(&dek, "p", [1; 16]);
        let parts: Vec<&str> = good.split(':').collect();
        let bad = format!("PWV3:{}:{}:{}", &parts[1][..30], parts[2], parts[3]);

        assert!(matches!(
            bad.parse::<WrappedKey>(),
            Err(VaultError::MalformedPayload(_))
        ));
    }

    #[test]
    fn test_display_parse_roundtrip() {
        let dek = generate_dek();
        let payload = wrap_with_passphrase(&dek, "p", [4; 16]);
        let parsed: WrappedKey = payload.parse().unwrap();
        assert_eq!(parsed.to_string(), payload);
    }
}
