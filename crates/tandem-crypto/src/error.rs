use thiserror::Error;

/// Failures surfaced by the cipher bridge.
///
/// `AuthenticationFailure` and `MalformedInput` are deliberately distinct:
/// the first means a V2 tag did not verify and the recovered bytes must never
/// be shown, the second means the input was rejected before any decrypt ran.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CipherError {
    /// V2 tag mismatch (tampered ciphertext/tag, or wrong timestamp).
    #[error("authentication tag did not verify")]
    AuthenticationFailure,

    /// Missing nonce/tag, bad base64, wrong lengths, bad padding.
    #[error("malformed cipher input: {0}")]
    MalformedInput(String),

    /// The AEAD refused to encrypt (plaintext too large).
    #[error("encryption failed")]
    Encryption,

    /// Decryption succeeded but the bytes are not UTF-8 text.
    #[error("decrypted bytes are not valid UTF-8")]
    InvalidText,
}

impl CipherError {
    pub(crate) fn malformed(msg: impl Into<String>) -> Self {
        Self::MalformedInput(msg.into())
    }
}
