use serde::{Deserialize, Serialize};

/// Cipher generation of a stored or transmitted ciphertext.
///
/// On the wire and in storage this is the integer marker `1` or `2`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(into = "u8", try_from = "u8")]
pub enum CipherVersion {
    V1Legacy,
    V2Modern,
}

impl From<CipherVersion> for u8 {
    fn from(v: CipherVersion) -> u8 {
        match v {
            CipherVersion::V1Legacy => 1,
            CipherVersion::V2Modern => 2,
        }
    }
}

impl TryFrom<u8> for CipherVersion {
    type Error = String;

    fn try_from(v: u8) -> Result<Self, Self::Error> {
        match v {
            1 => Ok(Self::V1Legacy),
            2 => Ok(Self::V2Modern),
            other => Err(format!("unknown cipher version {}", other)),
        }
    }
}

/// Which client population a request or connection belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum ClientGeneration {
    /// Legacy browser client, always served V1.
    #[default]
    Legacy,
    /// Mobile client, always served V2.
    Modern,
}

impl ClientGeneration {
    /// Route a request. The explicit capability flag wins; the user agent is
    /// only consulted when the flag is absent. Unknown callers are legacy.
    pub fn detect(use_gcm: Option<bool>, user_agent: Option<&str>) -> Self {
        if let Some(flag) = use_gcm {
            return if flag { Self::Modern } else { Self::Legacy };
        }

        match user_agent.map(str::to_ascii_lowercase) {
            Some(ua) if ua.contains("worldmates") || ua.contains("okhttp") => Self::Modern,
            _ => Self::Legacy,
        }
    }

    pub fn cipher_version(self) -> CipherVersion {
        match self {
            Self::Legacy => CipherVersion::V1Legacy,
            Self::Modern => CipherVersion::V2Modern,
        }
    }
}

/// One ciphertext representation of a message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Sealed {
    pub version: CipherVersion,
    pub ciphertext: String,
    pub nonce: Option<String>,
    pub tag: Option<String>,
}

impl Sealed {
    pub fn legacy(ciphertext: impl Into<String>) -> Self {
        Self {
            version: CipherVersion::V1Legacy,
            ciphertext: ciphertext.into(),
            nonce: None,
            tag: None,
        }
    }
}

/// Cipher fields persisted alongside a message.
///
/// `ciphertext`/`nonce`/`tag` hold the primary representation, whose
/// generation is `cipher_version` (or inferred for rows that predate the
/// column). `legacy_ciphertext` caches a V1 form when the primary is V2.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct CipherRecord {
    pub ciphertext: String,
    pub cipher_version: Option<CipherVersion>,
    pub nonce: Option<String>,
    pub tag: Option<String>,
    pub legacy_ciphertext: Option<String>,
}

impl CipherRecord {
    /// Generation of the primary representation: an explicit version wins,
    /// otherwise nonce and tag together mean V2 and anything else is V1.
    pub fn detect_version(&self) -> CipherVersion {
        if let Some(version) = self.cipher_version {
            return version;
        }
        match (non_empty(&self.nonce), non_empty(&self.tag)) {
            (Some(_), Some(_)) => CipherVersion::V2Modern,
            _ => CipherVersion::V1Legacy,
        }
    }

    pub fn primary(&self) -> Sealed {
        Sealed {
            version: self.detect_version(),
            ciphertext: self.ciphertext.clone(),
            nonce: self.nonce.clone(),
            tag: self.tag.clone(),
        }
    }

    /// The representation for `version`, if this record already carries one.
    pub fn representation(&self, version: CipherVersion) -> Option<Sealed> {
        if self.detect_version() == version {
            return Some(self.primary());
        }
        match version {
            CipherVersion::V1Legacy => non_empty(&self.legacy_ciphertext).map(Sealed::legacy),
            CipherVersion::V2Modern => None,
        }
    }
}

fn non_empty(field: &Option<String>) -> Option<&str> {
    field.as_deref().filter(|s| !s.is_empty())
}
