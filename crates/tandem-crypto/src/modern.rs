use aes_gcm::{
    Aes256Gcm, Key, Nonce, Tag,
    aead::{AeadInPlace, KeyInit, OsRng, rand_core::RngCore},
};
use base64::Engine;
use base64::engine::general_purpose::STANDARD as B64;

use crate::error::CipherError;
use crate::keys::MODERN_KEY_LEN;

/// 96-bit nonce, fresh per encryption.
pub const NONCE_LEN: usize = 12;

/// 128-bit authentication tag, carried separately from the ciphertext.
pub const TAG_LEN: usize = 16;

/// Base64 encoded output of a V2 encryption.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModernCiphertext {
    pub ciphertext: String,
    pub nonce: String,
    pub tag: String,
}

/// Encrypt a plaintext message with AES-256-GCM, tag detached.
pub fn encrypt(key: &[u8; MODERN_KEY_LEN], plaintext: &[u8]) -> Result<ModernCiphertext, CipherError> {
    let cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(key));

    let mut nonce_bytes = [0u8; NONCE_LEN];
    OsRng.fill_bytes(&mut nonce_bytes);

    let mut buffer = plaintext.to_vec();
    let tag = cipher
        .encrypt_in_place_detached(Nonce::from_slice(&nonce_bytes), b"", &mut buffer)
        .map_err(|_| CipherError::Encryption)?;

    Ok(ModernCiphertext {
        ciphertext: B64.encode(&buffer),
        nonce: B64.encode(nonce_bytes),
        tag: B64.encode(tag),
    })
}

/// Decrypt an AES-256-GCM message. Nonce and tag are validated before the
/// cipher runs; a tag that does not verify is an `AuthenticationFailure`.
pub fn decrypt(
    key: &[u8; MODERN_KEY_LEN],
    ciphertext: &str,
    nonce: Option<&str>,
    tag: Option<&str>,
) -> Result<Vec<u8>, CipherError> {
    let nonce = decode_exact(nonce, NONCE_LEN, "nonce")?;
    let tag = decode_exact(tag, TAG_LEN, "tag")?;
    let mut buffer = B64
        .decode(ciphertext.trim())
        .map_err(|e| CipherError::malformed(format!("ciphertext is not base64: {}", e)))?;

    let cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(key));
    cipher
        .decrypt_in_place_detached(
            Nonce::from_slice(&nonce),
            b"",
            &mut buffer,
            Tag::from_slice(&tag),
        )
        .map_err(|_| CipherError::AuthenticationFailure)?;

    Ok(buffer)
}

fn decode_exact(field: Option<&str>, len: usize, name: &str) -> Result<Vec<u8>, CipherError> {
    let encoded = field
        .filter(|s| !s.trim().is_empty())
        .ok_or_else(|| CipherError::malformed(format!("missing {}", name)))?;
    let bytes = B64
        .decode(encoded.trim())
        .map_err(|e| CipherError::malformed(format!("{} is not base64: {}", name, e)))?;
    if bytes.len() != len {
        return Err(CipherError::malformed(format!(
            "{} must be {} bytes, got {}",
            name,
            len,
            bytes.len()
        )));
    }
    Ok(bytes)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::keys::modern_key;

    #[test]
    fn encrypt_decrypt_roundtrip() {
        let key = modern_key(1700000000);
        let message = b"Hello from Tandem!";

        let sealed = encrypt(&key, message).unwrap();
        assert_ne!(sealed.ciphertext.as_bytes(), message);

        let decrypted =
            decrypt(&key, &sealed.ciphertext, Some(sealed.nonce.as_str()), Some(sealed.tag.as_str())).unwrap();
        assert_eq!(decrypted, message);
    }

    #[test]
    fn fresh_nonce_every_time() {
        let key = modern_key(1700000000);
        let a = encrypt(&key, b"same").unwrap();
        let b = encrypt(&key, b"same").unwrap();
        assert_ne!(a.nonce, b.nonce);
        assert_ne!(a.ciphertext, b.ciphertext);
    }

    #[test]
    fn wrong_timestamp_fails_authentication() {
        let sealed = encrypt(&modern_key(1), b"Secret message").unwrap();
        let result = decrypt(&modern_key(2), &sealed.ciphertext, Some(sealed.nonce.as_str()), Some(sealed.tag.as_str()));
        assert_eq!(result, Err(CipherError::AuthenticationFailure));
    }

    #[test]
    fn missing_or_short_fields_are_malformed() {
        let key = modern_key(1);
        let sealed = encrypt(&key, b"x").unwrap();
        assert!(matches!(
            decrypt(&key, &sealed.ciphertext, None, Some(sealed.tag.as_str())),
            Err(CipherError::MalformedInput(_))
        ));
        assert!(matches!(
            decrypt(&key, &sealed.ciphertext, Some(sealed.nonce.as_str()), Some("")),
            Err(CipherError::MalformedInput(_))
        ));
        assert!(matches!(
            decrypt(&key, &sealed.ciphertext, Some(B64.encode([0u8; 8]).as_str()), Some(sealed.tag.as_str())),
            Err(CipherError::MalformedInput(_))
        ));
    }
}
