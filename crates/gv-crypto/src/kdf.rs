//! Key derivation: PBKDF2-HMAC-SHA256 passphrase → KEK / SIK

use hkdf::Hkdf;
use secrecy::{ExposeSecret, SecretString};
use sha2::Sha256;
use zeroize::{Zeroize, ZeroizeOnDrop, Zeroizing};

use gv_core::config::DEFAULT_PBKDF2_ITERATIONS;
use gv_core::{VaultError, VaultResult};

use crate::{KEY_SIZE, SALT_SIZE};

/// What a derived key may be used for. Each purpose expands to an independent key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyPurpose {
    /// Wraps DEKs and seals metadata (AES-256-GCM)
    Kek,
    /// Keys blind-index HMACs
    Sik,
}

impl KeyPurpose {
    fn label(self) -> &'static [u8] {
        match self {
            KeyPurpose::Kek => b"ghostvault-kek-v3",
            KeyPurpose::Sik => b"ghostvault-sik-v3",
        }
    }
}

/// PBKDF2 parameters
#[derive(Debug, Clone, Copy)]
pub struct KdfParams {
    /// Iteration count (default: 100000)
    pub iterations: u32,
}

impl Default for KdfParams {
    fn default() -> Self {
        Self {
            iterations: DEFAULT_PBKDF2_ITERATIONS,
        }
    }
}

/// Key-encryption key. Zeroized on drop.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct Kek {
    bytes: [u8; KEY_SIZE],
}

impl Kek {
    pub fn from_bytes(bytes: [u8; KEY_SIZE]) -> Self {
        Self { bytes }
    }

    pub fn as_bytes(&self) -> &[u8; KEY_SIZE] {
        &self.bytes
    }
}

impl std::fmt::Debug for Kek {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Kek").field("bytes", &"[REDACTED]").finish()
    }
}

/// Search-index key. Zeroized on drop.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct Sik {
    bytes: [u8; KEY_SIZE],
}

impl Sik {
    pub fn from_bytes(bytes: [u8; KEY_SIZE]) -> Self {
        Self { bytes }
    }

    pub fn as_bytes(&self) -> &[u8; KEY_SIZE] {
        &self.bytes
    }
}

impl std::fmt::Debug for Sik {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Sik").field("bytes", &"[REDACTED]").finish()
    }
}

/// Raw PBKDF2-HMAC-SHA256 output for (passphrase, salt).
fn pbkdf2_base(
    passphrase: &SecretString,
    salt: &[u8; SALT_SIZE],
    params: &KdfParams,
) -> VaultResult<Zeroizing<[u8; KEY_SIZE]>> {
    if params.iterations == 0 {
        return Err(VaultError::InvalidInput(
            "PBKDF2 iteration count must be positive".into(),
        ));
    }
    let mut out = Zeroizing::new([0u8; KEY_SIZE]);
    pbkdf2::pbkdf2_hmac::<Sha256>(
        passphrase.expose_secret().as_bytes(),
        salt,
        params.iterations,
        out.as_mut(),
    );
    Ok(out)
}

/// Derive a 256-bit key for `purpose` from a passphrase and a 16-byte salt.
///
/// Deterministic: the same inputs always give the same key, which is what
/// makes retrieval possible.
pub fn derive(
    passphrase: &SecretString,
    salt: &[u8; SALT_SIZE],
    purpose: KeyPurpose,
    params: &KdfParams,
) -> VaultResult<Zeroizing<[u8; KEY_SIZE]>> {
    let base = pbkdf2_base(passphrase, salt, params)?;
    let hkdf = Hkdf::<Sha256>::new(None, base.as_ref());
    let mut okm = Zeroizing::new([0u8; KEY_SIZE]);
    hkdf.expand(purpose.label(), okm.as_mut())
        .map_err(|e| VaultError::Other(anyhow::anyhow!("HKDF expand failed: {e}")))?;
    Ok(okm)
}

pub fn derive_kek(
    passphrase: &SecretString,
    salt: &[u8; SALT_SIZE],
    params: &KdfParams,
) -> VaultResult<Kek> {
    derive(passphrase, salt, KeyPurpose::Kek, params).map(|k| Kek::from_bytes(*k))
}

pub fn derive_sik(
    passphrase: &SecretString,
    salt: &[u8; SALT_SIZE],
    params: &KdfParams,
) -> VaultResult<Sik> {
    derive(passphrase, salt, KeyPurpose::Sik, params).map(|k| Sik::from_bytes(*k))
}

/// KEK as written by the PWV1/PWV2 formats: PBKDF2 output used directly.
pub fn derive_legacy_kek(
    passphrase: &SecretString,
    salt: &[u8; SALT_SIZE],
    params: &KdfParams,
) -> VaultResult<Kek> {
    pbkdf2_base(passphrase, salt, params).map(|k| Kek::from_bytes(*k))
}
