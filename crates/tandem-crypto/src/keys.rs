use std::str::FromStr;

/// Key length of the legacy AES-128 generation.
pub const LEGACY_KEY_LEN: usize = 16;

/// Key length of the modern AES-256 generation.
pub const MODERN_KEY_LEN: usize = 32;

/// How the decimal digits of a timestamp are stretched to a fixed key size.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum KeyFill {
    /// Digits repeated until the key is full, then truncated.
    #[default]
    Repeat,
    /// Digits copied once, remainder filled with NUL bytes.
    ZeroPad,
}

impl FromStr for KeyFill {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "repeat" => Ok(Self::Repeat),
            "zero" | "zero-pad" | "zeropad" => Ok(Self::ZeroPad),
            other => Err(format!("unknown key fill mode '{}'", other)),
        }
    }
}

/// Derive an `N`-byte key from a message timestamp.
pub fn derive_key<const N: usize>(timestamp: i64, fill: KeyFill) -> [u8; N] {
    let digits = timestamp.to_string().into_bytes();
    let mut key = [0u8; N];

    match fill {
        KeyFill::Repeat => {
            for (slot, byte) in key.iter_mut().zip(digits.iter().cycle()) {
                *slot = *byte;
            }
        }
        KeyFill::ZeroPad => {
            for (slot, byte) in key.iter_mut().zip(digits.iter()) {
                *slot = *byte;
            }
        }
    }

    key
}

/// 16-byte key for the legacy generation.
pub fn legacy_key(timestamp: i64, fill: KeyFill) -> [u8; LEGACY_KEY_LEN] {
    derive_key(timestamp, fill)
}

/// 32-byte key for the modern generation. Always repeat-filled.
pub fn modern_key(timestamp: i64) -> [u8; MODERN_KEY_LEN] {
    derive_key(timestamp, KeyFill::Repeat)
}
