//! V1 legacy cipher: AES-128-ECB with PKCS#7 padding, base64 text output.
//!
//! No nonce and no tag. A wrong key does not fail reliably: it either trips
//! the padding check or yields garbage bytes, so callers validate the result.

use aes::Aes128;
use aes::cipher::{BlockDecryptMut, BlockEncryptMut, KeyInit, block_padding::Pkcs7, generic_array::GenericArray};
use base64::Engine;
use base64::engine::general_purpose::STANDARD as B64;

use crate::error::CipherError;
use crate::keys::LEGACY_KEY_LEN;

const BLOCK_LEN: usize = 16;

type Encryptor = ecb::Encryptor<Aes128>;
type Decryptor = ecb::Decryptor<Aes128>;

/// Encrypt `plaintext` and return base64 ciphertext.
pub fn encrypt(key: &[u8; LEGACY_KEY_LEN], plaintext: &[u8]) -> String {
    let ciphertext = Encryptor::new(GenericArray::from_slice(key)).encrypt_padded_vec_mut::<Pkcs7>(plaintext);
    B64.encode(ciphertext)
}

/// Decrypt base64 `ciphertext`. Fails only on malformed input.
pub fn decrypt(key: &[u8; LEGACY_KEY_LEN], ciphertext: &str) -> Result<Vec<u8>, CipherError> {
    let buffer = B64
        .decode(ciphertext.trim())
        .map_err(|e| CipherError::malformed(format!("legacy ciphertext is not base64: {}", e)))?;

    if buffer.is_empty() || buffer.len() % BLOCK_LEN != 0 {
        return Err(CipherError::malformed(format!(
            "legacy ciphertext length {} is not a positive multiple of {}",
            buffer.len(),
            BLOCK_LEN
        )));
    }

    Decryptor::new(GenericArray::from_slice(key))
        .decrypt_padded_vec_mut::<Pkcs7>(&buffer)
        .map_err(|_| CipherError::malformed("legacy ciphertext has invalid padding"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::keys::{KeyFill, legacy_key};

    #[test]
    fn encrypt_decrypt_roundtrip() {
        let key = legacy_key(1700000000, KeyFill::Repeat);
        for message in ["", "hi", "exactly sixteen!", "Привіт, світ 👋 with more than one block"] {
            let ciphertext = encrypt(&key, message.as_bytes());
            assert_eq!(decrypt(&key, &ciphertext).unwrap(), message.as_bytes());
        }
    }

    #[test]
    fn deterministic_without_nonce() {
        let key = legacy_key(1700000000, KeyFill::Repeat);
        assert_eq!(encrypt(&key, b"same"), encrypt(&key, b"same"));
    }

    #[test]
    fn block_aligned_input_gets_full_padding_block() {
        let key = legacy_key(1, KeyFill::Repeat);
        let ciphertext = encrypt(&key, b"0123456789abcdef");
        assert_eq!(B64.decode(ciphertext).unwrap().len(), 32);
    }

    #[test]
    fn rejects_non_base64_and_misaligned() {
        let key = legacy_key(1, KeyFill::Repeat);
        assert!(matches!(decrypt(&key, "not base64!"), Err(CipherError::MalformedInput(_))));
        assert!(matches!(
            decrypt(&key, &B64.encode([1u8; 10])),
            Err(CipherError::MalformedInput(_))
        ));
    }

    #[test]
    fn never_reports_authentication_failure() {
        let key = legacy_key(1700000000, KeyFill::Repeat);
        let wrong = legacy_key(1700000001, KeyFill::Repeat);
        let ciphertext = encrypt(&key, b"hello legacy world");
        match decrypt(&wrong, &ciphertext) {
            Ok(bytes) => assert_ne!(bytes, b"hello legacy world"),
            Err(e) => assert!(matches!(e, CipherError::MalformedInput(_))),
        }
    }
}
