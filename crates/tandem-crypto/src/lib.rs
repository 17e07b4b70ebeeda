/// Tandem Crypto Library
///
/// Cipher compatibility bridge between the two message cipher generations
/// spoken by Tandem clients:
/// - V1 (legacy browser): AES-128-ECB, PKCS#7, no nonce, no tag
/// - V2 (mobile): AES-256-GCM with a random 96-bit nonce and a 128-bit tag
///
/// Both generations key off the message timestamp alone. Every message sent
/// within the same second shares a key regardless of sender or recipient.
/// This is kept byte-for-byte for interop with existing clients.

pub mod bridge;
pub mod error;
pub mod keys;
pub mod legacy;
pub mod modern;
pub mod version;

pub use bridge::{CipherBridge, Recovered, TranscodeOutcome, UNDECRYPTABLE_MARKER, preview};
pub use error::CipherError;
pub use keys::KeyFill;
pub use version::{CipherRecord, CipherVersion, ClientGeneration, Sealed};
