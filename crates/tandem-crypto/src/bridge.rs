use tracing::warn;

use crate::error::CipherError;
use crate::keys::{KeyFill, legacy_key, modern_key};
use crate::version::{CipherRecord, CipherVersion, Sealed};
use crate::{legacy, modern};

/// Shown in place of a V2 message whose tag did not verify.
pub const UNDECRYPTABLE_MARKER: &str = "[message could not be decrypted]";

/// Characters kept in the plaintext preview column.
pub const PREVIEW_CHARS: usize = 100;

/// Outcome of a lenient read.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Recovered {
    Text(String),
    /// Legacy rows that never were ciphertext come back unchanged.
    Original(String),
    /// A V2 record that failed authentication. Never show its bytes.
    Undecryptable,
}

impl Recovered {
    pub fn into_display(self) -> String {
        match self {
            Self::Text(s) | Self::Original(s) => s,
            Self::Undecryptable => UNDECRYPTABLE_MARKER.to_string(),
        }
    }

    fn into_plaintext(self) -> Option<String> {
        match self {
            Self::Text(s) | Self::Original(s) => Some(s),
            Self::Undecryptable => None,
        }
    }
}

/// What `transcode` did to a record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TranscodeOutcome {
    AlreadyPresent,
    Attached,
}

/// Converts message ciphertext between the legacy and modern generations.
///
/// Keys come from the message timestamp alone, so any holder of a record can
/// move it between generations without extra state.
#[derive(Debug, Clone, Copy, Default)]
pub struct CipherBridge {
    fill: KeyFill,
}

impl CipherBridge {
    pub fn new(fill: KeyFill) -> Self {
        Self { fill }
    }

    pub fn key_fill(&self) -> KeyFill {
        self.fill
    }

    pub fn encrypt(&self, plaintext: &str, timestamp: i64, version: CipherVersion) -> Result<Sealed, CipherError> {
        match version {
            CipherVersion::V1Legacy => {
                let key = legacy_key(timestamp, self.fill);
                Ok(Sealed::legacy(legacy::encrypt(&key, plaintext.as_bytes())))
            }
            CipherVersion::V2Modern => {
                let out = modern::encrypt(&modern_key(timestamp), plaintext.as_bytes())?;
                Ok(Sealed {
                    version,
                    ciphertext: out.ciphertext,
                    nonce: Some(out.nonce),
                    tag: Some(out.tag),
                })
            }
        }
    }

    pub fn decrypt(&self, sealed: &Sealed, timestamp: i64) -> Result<Vec<u8>, CipherError> {
        match sealed.version {
            CipherVersion::V1Legacy => legacy::decrypt(&legacy_key(timestamp, self.fill), &sealed.ciphertext),
            CipherVersion::V2Modern => modern::decrypt(
                &modern_key(timestamp),
                &sealed.ciphertext,
                sealed.nonce.as_deref(),
                sealed.tag.as_deref(),
            ),
        }
    }

    pub fn decrypt_text(&self, sealed: &Sealed, timestamp: i64) -> Result<String, CipherError> {
        let bytes = self.decrypt(sealed, timestamp)?;
        String::from_utf8(bytes).map_err(|_| CipherError::InvalidText)
    }

    /// Lenient read used when serving history.
    ///
    /// A V1 value that does not decrypt to text is returned as stored, since
    /// old rows may hold plaintext. A V2 value that fails authentication is
    /// `Undecryptable`.
    pub fn decrypt_or_original(&self, sealed: &Sealed, timestamp: i64) -> Recovered {
        match (sealed.version, self.decrypt_text(sealed, timestamp)) {
            (_, Ok(text)) => Recovered::Text(text),
            (CipherVersion::V1Legacy, Err(_)) => Recovered::Original(sealed.ciphertext.clone()),
            (CipherVersion::V2Modern, Err(CipherError::MalformedInput(_))) => {
                Recovered::Original(sealed.ciphertext.clone())
            }
            (CipherVersion::V2Modern, Err(e)) => {
                warn!("V2 ciphertext rejected: {}", e);
                Recovered::Undecryptable
            }
        }
    }

    /// Fresh record for a new message, primary in `version`.
    pub fn seal_new(&self, plaintext: &str, timestamp: i64, version: CipherVersion) -> Result<CipherRecord, CipherError> {
        let sealed = self.encrypt(plaintext, timestamp, version)?;
        Ok(CipherRecord {
            ciphertext: sealed.ciphertext,
            cipher_version: Some(sealed.version),
            nonce: sealed.nonce,
            tag: sealed.tag,
            legacy_ciphertext: None,
        })
    }

    /// Make sure `record` carries a `target` representation.
    ///
    /// Existing representations are never overwritten. Moving a V1 record to
    /// V2 keeps the old V1 ciphertext as the cached legacy form.
    pub fn transcode(
        &self,
        record: &mut CipherRecord,
        timestamp: i64,
        target: CipherVersion,
    ) -> Result<TranscodeOutcome, CipherError> {
        if record.representation(target).is_some() {
            return Ok(TranscodeOutcome::AlreadyPresent);
        }

        let primary = record.primary();
        let recovered = self.decrypt_or_original(&primary, timestamp);
        let was_plaintext = matches!(recovered, Recovered::Original(_));
        let plaintext = recovered.into_plaintext().ok_or(CipherError::AuthenticationFailure)?;

        match target {
            CipherVersion::V1Legacy => {
                let sealed = self.encrypt(&plaintext, timestamp, CipherVersion::V1Legacy)?;
                record.legacy_ciphertext = Some(sealed.ciphertext);
            }
            CipherVersion::V2Modern => {
                let legacy_form = if was_plaintext {
                    self.encrypt(&plaintext, timestamp, CipherVersion::V1Legacy)?.ciphertext
                } else {
                    primary.ciphertext
                };
                let sealed = self.encrypt(&plaintext, timestamp, CipherVersion::V2Modern)?;
                record.ciphertext = sealed.ciphertext;
                record.cipher_version = Some(CipherVersion::V2Modern);
                record.nonce = sealed.nonce;
                record.tag = sealed.tag;
                record.legacy_ciphertext = Some(legacy_form);
            }
        }

        Ok(TranscodeOutcome::Attached)
    }

    /// Render a record for a client of generation `target`, transcoding on
    /// the fly. Returns whether the record changed and needs persisting.
    pub fn render_for(
        &self,
        record: &mut CipherRecord,
        timestamp: i64,
        target: CipherVersion,
    ) -> Result<(Sealed, bool), CipherError> {
        let outcome = self.transcode(record, timestamp, target)?;
        let sealed = record
            .representation(target)
            .ok_or_else(|| CipherError::malformed("representation missing after transcode"))?;
        Ok((sealed, outcome == TranscodeOutcome::Attached))
    }
}

/// First 100 characters of a plaintext, for notification previews.
pub fn preview(plaintext: &str) -> String {
    plaintext.chars().take(PREVIEW_CHARS).collect()
}
