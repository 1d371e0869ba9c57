//! At-rest encryption for credential fields. Sensitive fields are encrypted
//! in the persisted document by a symmetric cipher derived from a master
//! key; callers elsewhere in the crate always see plaintext.
//!
//! AES-256-GCM with a PBKDF2-derived key (100k rounds), a short versioned
//! magic header, and a random 12-byte nonce.

use aes_gcm::aead::{Aead, KeyInit};
use aes_gcm::{Aes256Gcm, Nonce};
use base64::Engine;
use pbkdf2::pbkdf2_hmac;
use rand::RngCore;
use sha2::Sha256;

const MAGIC: &[u8; 4] = b"TMC1";
const SALT_LEN: usize = 16;
const NONCE_LEN: usize = 12;
const PBKDF2_ROUNDS: u32 = 100_000;

#[derive(Debug, thiserror::Error)]
pub enum CryptoError {
    #[error("ciphertext too short or missing version header")]
    Malformed,
    #[error("decryption failed (wrong password or corrupted data)")]
    DecryptFailed,
    #[error("cipher construction failed: {0}")]
    CipherInit(String),
}

fn derive_key(master_key: &str, salt: &[u8]) -> [u8; 32] {
    let mut key = [0u8; 32];
    pbkdf2_hmac::<Sha256>(master_key.as_bytes(), salt, PBKDF2_ROUNDS, &mut key);
    key
}

/// Encrypt `plaintext` under `master_key`, returning a base64 string safe to
/// embed directly in the JSON document as an [`tabmux_core::model::EncryptedSecret`].
pub fn encrypt(master_key: &str, plaintext: &[u8]) -> Result<String, CryptoError> {
    let mut salt = [0u8; SALT_LEN];
    rand::rngs::OsRng.fill_bytes(&mut salt);
    let mut nonce_bytes = [0u8; NONCE_LEN];
    rand::rngs::OsRng.fill_bytes(&mut nonce_bytes);

    let key = derive_key(master_key, &salt);
    let cipher = Aes256Gcm::new_from_slice(&key).map_err(|e| CryptoError::CipherInit(e.to_string()))?;
    let nonce = Nonce::from_slice(&nonce_bytes);
    let ciphertext = cipher
        .encrypt(nonce, plaintext)
        .map_err(|_| CryptoError::DecryptFailed)?;

    let mut out = Vec::with_capacity(MAGIC.len() + SALT_LEN + NONCE_LEN + ciphertext.len());
    out.extend_from_slice(MAGIC);
    out.extend_from_slice(&salt);
    out.extend_from_slice(&nonce_bytes);
    out.extend_from_slice(&ciphertext);
    Ok(base64::engine::general_purpose::STANDARD.encode(out))
}

/// Decrypt a value produced by [`encrypt`].
pub fn decrypt(master_key: &str, encoded: &str) -> Result<Vec<u8>, CryptoError> {
    let data = base64::engine::general_purpose::STANDARD
        .decode(encoded)
        .map_err(|_| CryptoError::Malformed)?;

    let header_len = MAGIC.len() + SALT_LEN + NONCE_LEN;
    if data.len() < header_len || &data[..MAGIC.len()] != MAGIC {
        return Err(CryptoError::Malformed);
    }

    let salt = &data[MAGIC.len()..MAGIC.len() + SALT_LEN];
    let nonce_bytes = &data[MAGIC.len() + SALT_LEN..header_len];
    let ciphertext = &data[header_len..];

    let key = derive_key(master_key, salt);
    let cipher = Aes256Gcm::new_from_slice(&key).map_err(|e| CryptoError::CipherInit(e.to_string()))?;
    let nonce = Nonce::from_slice(nonce_bytes);
    cipher
        .decrypt(nonce, ciphertext)
        .map_err(|_| CryptoError::DecryptFailed)
}

/// One-shot migration helper: legacy documents may carry secrets under an
/// older, simpler cipher. Callers detect the legacy shape (no `TMC1` magic)
/// and re-encrypt through [`encrypt`] on next save; this function only
/// flags whether a value is already in the current format so the store's
/// load path knows whether migration is needed.
pub fn is_current_format(encoded: &str) -> bool {
    base64::engine::general_purpose::STANDARD
        .decode(encoded)
        .map(|d| d.len() >= MAGIC.len() && &d[..MAGIC.len()] == MAGIC)
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trip() {
        let enc = encrypt("hunter2", b"s3cr3t-password").unwrap();
        assert_eq!(decrypt("hunter2", &enc).unwrap(), b"s3cr3t-password");
    }

    #[test]
    fn wrong_key_fails() {
        let enc = encrypt("hunter2", b"payload").unwrap();
        assert!(matches!(decrypt("wrong", &enc), Err(CryptoError::DecryptFailed)));
    }

    #[test]
    fn malformed_input_rejected() {
        assert!(matches!(decrypt("k", "not-base64!!"), Err(CryptoError::Malformed)));
        let short = base64::engine::general_purpose::STANDARD.encode(b"ab");
        assert!(matches!(decrypt("k", &short), Err(CryptoError::Malformed)));
    }

    #[test]
    fn current_format_detection() {
        let enc = encrypt("k", b"x").unwrap();
        assert!(is_current_format(&enc));
        assert!(!is_current_format(&base64::engine::general_purpose::STANDARD.encode(b"legacy-blob")));
    }
}
