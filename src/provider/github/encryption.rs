//! # Secret Encryption
//!
//! GitHub Actions secrets are uploaded as libsodium sealed boxes
//! (`crypto_box_seal`) addressed to the scope's X25519 public key.

use anyhow::{anyhow, Context, Result};
use base64::{engine::general_purpose::STANDARD, Engine as _};
use crypto_box::aead::OsRng;
use crypto_box::{PublicKey, KEY_SIZE};

/// Seal `plaintext` for the base64 `public_key`, returning base64 ciphertext
pub fn seal(plaintext: &[u8], public_key: &str) -> Result<String> {
    let bytes = STANDARD
        .decode(public_key)
        .context("Public key is not valid base64")?;
    let key: [u8; KEY_SIZE] = bytes.as_slice().try_into().with_context(|| {
        format!(
            "Public key must be {KEY_SIZE} bytes, got {} bytes",
            bytes.len()
        )
    })?;
    let sealed = PublicKey::from(key)
        .seal(&mut OsRng, plaintext)
        .map_err(|e| anyhow!("Failed to seal secret value: {e}"))?;
    Ok(STANDARD.encode(sealed))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crypto_box::SecretKey;

    #[test]
    fn test_sealed_value_opens_with_matching_secret_key() {
        let secret_key = SecretKey::generate(&mut OsRng);
        let public_key = STANDARD.encode(secret_key.public_key().as_bytes());

        let sealed = seal(b"apiVersion: v1", &public_key).unwrap();
        let opened = secret_key
            .unseal(&STANDARD.decode(sealed).unwrap())
            .unwrap();
        assert_eq!(opened, b"apiVersion: v1");
    }

    #[test]
    fn test_rejects_short_key() {
        let err = seal(b"x", &STANDARD.encode([0u8; 16])).unwrap_err();
        assert!(err.to_string().contains("32 bytes"));
    }

    #[test]
    fn test_rejects_invalid_base64() {
        assert!(seal(b"x", "not base64!").is_err());
    }
}
