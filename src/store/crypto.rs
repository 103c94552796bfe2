//! Authenticated encryption for secret columns.
//!
//! Ciphertexts are `nonce || aes-256-gcm(plaintext)`; the 12-byte nonce is
//! random per encryption. A wrong key or a flipped bit fails decryption.

use aes_gcm::aead::{Aead, KeyInit, OsRng};
use aes_gcm::{AeadCore, Aes256Gcm, Nonce};

use super::StoreError;

const NONCE_LEN: usize = 12;

pub(super) fn encrypt(key: &[u8; 32], plaintext: &[u8]) -> Result<Vec<u8>, StoreError> {
    let cipher = Aes256Gcm::new_from_slice(key)
        .map_err(|e| StoreError::Crypto(format!("invalid encryption key: {e}")))?;
    let nonce = Aes256Gcm::generate_nonce(&mut OsRng);
    let ciphertext = cipher
        .encrypt(&nonce, plaintext)
        .map_err(|e| StoreError::Crypto(format!("encryption failed: {e}")))?;
    let mut out = Vec::with_capacity(NONCE_LEN + ciphertext.len());
    out.extend_from_slice(&nonce);
    out.extend_from_slice(&ciphertext);
    Ok(out)
}

pub(super) fn decrypt(key: &[u8; 32], payload: &[u8]) -> Result<Vec<u8>, StoreError> {
    if payload.len() < NONCE_LEN {
        return Err(StoreError::Crypto("ciphertext too small".into()));
    }
    let cipher = Aes256Gcm::new_from_slice(key)
        .map_err(|e| StoreError::Crypto(format!("invalid encryption key: {e}")))?;
    let (nonce, ciphertext) = payload.split_at(NONCE_LEN);
    cipher
        .decrypt(Nonce::from_slice(nonce), ciphertext)
        .map_err(|e| StoreError::Crypto(format!("decryption failed: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key() -> [u8; 32] {
        [7u8; 32]
    }

    #[test]
    fn round_trips() {
        let ct = encrypt(&key(), b"s3cret-admin-password").unwrap();
        assert_ne!(&ct[NONCE_LEN..], b"s3cret-admin-password");
        let pt = decrypt(&key(), &ct).unwrap();
        assert_eq!(pt, b"s3cret-admin-password");
    }

    #[test]
    fn distinct_nonces_per_call() {
        let a = encrypt(&key(), b"x").unwrap();
        let b = encrypt(&key(), b"x").unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn rejects_tampered_ciphertext() {
        let mut ct = encrypt(&key(), b"payload").unwrap();
        let last = ct.len() - 1;
        ct[last] ^= 0x01;
        assert!(decrypt(&key(), &ct).is_err());
    }

    #[test]
    fn rejects_wrong_key() {
        let ct = encrypt(&key(), b"payload").unwrap();
        let other = [9u8; 32];
        assert!(decrypt(&other, &ct).is_err());
    }

    #[test]
    fn rejects_truncated_payload() {
        assert!(decrypt(&key(), &[0u8; 4]).is_err());
    }
}
