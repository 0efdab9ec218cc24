//! AES-256-GCM with a fresh random 96-bit nonce per message

use aes_gcm::{
    aead::{Aead, KeyInit},
    Aes256Gcm, Key, Nonce,
};
use rand::RngCore;

use crate::{KEY_SIZE, NONCE_SIZE};

/// Opaque AEAD failure. Callers map it to the error that fits their context.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AeadError;

pub fn random_nonce() -> [u8; NONCE_SIZE] {
    let mut nonce = [0u8; NONCE_SIZE];
    rand::thread_rng().fill_bytes(&mut nonce);
    nonce
}

/// Encrypt under a fresh nonce. Returns `(nonce, ciphertext || tag)`.
pub fn seal(
    key: &[u8; KEY_SIZE],
    plaintext: &[u8],
) -> Result<([u8; NONCE_SIZE], Vec<u8>), AeadError> {
    let nonce = random_nonce();
    let ciphertext = seal_with_nonce(key, &nonce, plaintext)?;
    Ok((nonce, ciphertext))
}

pub fn seal_with_nonce(
    key: &[u8; KEY_SIZE],
    nonce: &[u8; NONCE_SIZE],
    plaintext: &[u8],
) -> Result<Vec<u8>, AeadError> {
    let cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(key));
    cipher
        .encrypt(Nonce::from_slice(nonce), plaintext)
        .map_err(|_| AeadError)
}

pub fn open(
    key: &[u8; KEY_SIZE],
    nonce: &[u8; NONCE_SIZE],
    ciphertext: &[u8],
) -> Result<Vec<u8>, AeadError> {
    let cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(key));
    cipher
        .decrypt(Nonce::from_slice(nonce), ciphertext)
        .map_err(|_| AeadError)
}
