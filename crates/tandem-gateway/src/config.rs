use std::time::Duration;

use tandem_crypto::KeyFill;

/// Relay (TURN/STUN) settings used to build ICE server lists.
#[derive(Debug, Clone)]
pub struct TurnConfig {
    /// Shared with the relay. Never sent to clients.
    pub secret: String,
    pub host: String,
    pub port: u16,
    pub tls_port: u16,
    pub stun_urls: Vec<String>,
    pub ttl_secs: i64,
}

impl Default for TurnConfig {
    fn default() -> Self {
        Self {
            secret: String::new(),
            host: "localhost".into(),
            port: 3478,
            tls_port: 5349,
            stun_urls: vec![
                "stun:stun.l.google.com:19302".into(),
                "stun:stun1.l.google.com:19302".into(),
            ],
            ttl_secs: 86_400,
        }
    }
}

#[derive(Debug, Clone)]
pub struct GatewayConfig {
    pub jwt_secret: String,
    pub turn: TurnConfig,
    pub typing_interval: Duration,
    pub presence_interval: Duration,
    /// RINGING calls older than this are ended as unanswered.
    pub ring_timeout: Duration,
    pub key_fill: KeyFill,
    pub history_page: u32,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            jwt_secret: String::new(),
            turn: TurnConfig::default(),
            typing_interval: Duration::from_millis(3000),
            presence_interval: Duration::from_millis(10_000),
            ring_timeout: Duration::from_secs(45),
            key_fill: KeyFill::Repeat,
            history_page: 50,
        }
    }
}
