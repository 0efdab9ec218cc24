//! Sealed metadata: `ivHex:ciphertextHex` of the JSON document under the KEK

use gv_core::{MediaMetadata, VaultError, VaultResult};
use zeroize::Zeroizing;

use crate::aead;
use crate::codec;
use crate::kdf::Kek;
use crate::NONCE_SIZE;

pub fn seal_metadata(meta: &MediaMetadata, kek: &Kek) -> VaultResult<String> {
    let json = Zeroizing::new(
        serde_json::to_vec(meta)
            .map_err(|e| VaultError::InvalidInput(format!("metadata not serializable: {e}")))?,
    );
    let (iv, ciphertext) = aead::seal(kek.as_bytes(), &json)
        .map_err(|_| VaultError::Other(anyhow::anyhow!("metadata sealing failed")))?;
    Ok(format!("{}:{}", codec::encode(&iv), codec::encode(&ciphertext)))
}

/// Open a sealed metadata blob.
///
/// A tag failure is reported as [`VaultError::WrongCredential`]; anything
/// structurally wrong (segment count, hex, JSON) as `MalformedPayload`.
/// Documents written without a MIME type get one from the filename.
pub fn open_metadata(sealed: &str, kek: &Kek) -> VaultResult<MediaMetadata> {
    let (iv_hex, ct_hex) = sealed
        .trim()
        .split_once(':')
        .ok_or_else(|| VaultError::MalformedPayload("sealed metadata needs iv:ciphertext".into()))?;
    if ct_hex.contains(':') {
        return Err(VaultError::MalformedPayload(
            "sealed metadata has too many segments".into(),
        ));
    }
    let iv: [u8; NONCE_SIZE] = codec::decode_array(iv_hex)?;
    let ciphertext = codec::decode(ct_hex)?;

    let json = Zeroizing::new(
        aead::open(kek.as_bytes(), &iv, &ciphertext).map_err(|_| VaultError::WrongCredential)?,
    );
    let mut meta: MediaMetadata = serde_json::from_slice(&json)
        .map_err(|e| VaultError::MalformedPayload(format!("metadata JSON: {e}")))?;

    if meta.mime_type.trim().is_empty() {
        meta.mime_type = mime_for_filename(&meta.filename).to_string();
    }
    Ok(meta)
}

/// MIME type by file extension (case-insensitive).
pub fn mime_for_filename(filename: &str) -> &'static str {
    let ext = filename
        .rsplit_once('.')
        .map(|(_, e)| e.to_ascii_lowercase())
        .unwrap_or_default();
    match ext.as_str() {
        "mp4" => "video/mp4",
        "m4v" => "video/x-m4v",
        "mov" => "video/quicktime",
        "avi" => "video/x-msvideo",
        "mkv" => "video/x-matroska",
        "webm" => "video/webm",
        "3gp" => "video/3gpp",
        "mpg" | "mpeg" => "video/mpeg",
        "jpg" | "jpeg" => "image/jpeg",
        "png" => "image/png",
        "heic" => "image/heic",
        "gif" => "image/gif",
        "mp3" => "audio/mpeg",
        "m4a" => "audio/mp4",
        "wav" => "audio/wav",
        "ogg" => "audio/ogg",
        _ => "application/octet-stream",
    }
}
