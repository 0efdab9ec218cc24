//! gv-crypto: client-side envelope encryption for GhostVault
//!
//! Everything the storage operator receives is opaque: a ciphertext blob and a
//! row of hex strings. Nothing here talks to storage.
//!
//! Key hierarchy:
//! ```text
//! Passphrase ──PBKDF2-HMAC-SHA256 (100k, item salt)──► base
//!   └── KEK  = HKDF(base, "ghostvault-kek-v3")
//!         ├── wraps DEK          → "PWV3:salt:iv:wrapped"
//!         └── seals metadata     → "iv:ciphertext"
//! Passphrase ──PBKDF2-HMAC-SHA256 (100k, index salt)──► base
//!   └── SIK  = HKDF(base, "ghostvault-sik-v3")
//!         └── HMAC-SHA256(normalized term) → blind index
//! DEK (256-bit random, per item)
//!   ├── AES-256-GCM per 5 MiB chunk: nonce(12) || ct || tag(16)
//!   └── exported once as the backup key
//! ```

pub mod aead;
pub mod backup;
pub mod codec;
pub mod credential;
pub mod index;
pub mod kdf;
pub mod keys;
pub mod metadata;
pub mod stream;

pub use backup::{format_backup_key, looks_like_backup_key, parse_backup_key, BackupKey};
pub use credential::Credential;
pub use index::{blind_index, compute_indexes, query_filter};
pub use kdf::{derive, derive_kek, derive_legacy_kek, derive_sik, KdfParams, Kek, KeyPurpose, Sik};
pub use keys::{generate_dek, generate_salt, unwrap_dek, wrap_dek, Dek, WrapFormat, WrappedKey};
pub use metadata::{mime_for_filename, open_metadata, seal_metadata};
pub use stream::{
    decrypt_bytes, decrypt_stream, encrypt_bytes, encrypt_stream, encrypted_chunk_len,
    encrypted_len, verify_first_chunk, StreamOptions, StreamSummary,
};

/// Size of every symmetric key in bytes (256-bit)
pub const KEY_SIZE: usize = 32;

/// Size of an AES-GCM nonce (96-bit)
pub const NONCE_SIZE: usize = 12;

/// Size of a GCM authentication tag
pub const TAG_SIZE: usize = 16;

/// Size of a KDF salt
pub const SALT_SIZE: usize = 16;
