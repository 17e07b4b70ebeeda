//! Ephemeral TURN credentials (the TURN REST API convention).
//!
//! username = "<expiry unix>:<user id>", password = base64(HMAC-SHA1(secret,
//! username)). The relay recomputes the same HMAC with its copy of the
//! secret, so issuing needs no storage and no call to the relay.

use base64::Engine;
use base64::engine::general_purpose::STANDARD as B64;
use hmac::{Hmac, Mac};
use serde::Serialize;
use sha1::Sha1;

use tandem_types::models::IceServer;

use crate::config::TurnConfig;

type HmacSha1 = Hmac<Sha1>;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TurnCredential {
    pub username: String,
    pub password: String,
    pub expires_at: i64,
}

pub struct TurnCredentialIssuer {
    config: TurnConfig,
}

impl TurnCredentialIssuer {
    pub fn new(config: TurnConfig) -> Self {
        Self { config }
    }

    pub fn ttl_secs(&self) -> i64 {
        self.config.ttl_secs
    }

    pub fn issue(&self, user_id: i64) -> TurnCredential {
        self.issue_at(user_id, self.config.ttl_secs, chrono::Utc::now().timestamp())
    }

    pub fn issue_at(&self, user_id: i64, ttl_secs: i64, now: i64) -> TurnCredential {
        let expires_at = now + ttl_secs;
        let username = format!("{}:{}", expires_at, user_id);
        let password = self.sign(&username);
        TurnCredential {
            username,
            password,
            expires_at,
        }
    }

    pub fn verify(&self, username: &str, password: &str) -> bool {
        self.verify_at(username, password, chrono::Utc::now().timestamp())
    }

    /// False for expired or malformed credentials. Never panics.
    pub fn verify_at(&self, username: &str, password: &str, now: i64) -> bool {
        let Some((expiry, subject)) = username.split_once(':') else {
            return false;
        };
        let Ok(expires_at) = expiry.parse::<i64>() else {
            return false;
        };
        if subject.is_empty() || now > expires_at {
            return false;
        }
        let Ok(signature) = B64.decode(password) else {
            return false;
        };

        self.mac(username).verify_slice(&signature).is_ok()
    }

    /// STUN entries first, then relay entries for udp, tcp and tls, all
    /// sharing one credential.
    pub fn ice_servers(&self, user_id: i64) -> (Vec<IceServer>, TurnCredential) {
        self.ice_servers_at(user_id, chrono::Utc::now().timestamp())
    }

    pub fn ice_servers_at(&self, user_id: i64, now: i64) -> (Vec<IceServer>, TurnCredential) {
        let cred = self.issue_at(user_id, self.config.ttl_secs, now);
        let host = &self.config.host;

        let mut servers: Vec<IceServer> = self.config.stun_urls.iter().map(IceServer::stun).collect();
        servers.push(IceServer::relay(
            vec![
                format!("turn:{}:{}?transport=udp", host, self.config.port),
                format!("turn:{}:{}?transport=tcp", host, self.config.port),
            ],
            &cred.username,
            &cred.password,
        ));
        servers.push(IceServer::relay(
            vec![format!("turns:{}:{}?transport=tcp", host, self.config.tls_port)],
            &cred.username,
            &cred.password,
        ));

        (servers, cred)
    }

    fn sign(&self, username: &str) -> String {
        B64.encode(self.mac(username).finalize().into_bytes())
    }

    fn mac(&self, username: &str) -> HmacSha1 {
        let mut mac = HmacSha1::new_from_slice(self.config.secret.as_bytes())
            .expect("HMAC accepts keys of any length");
        mac.update(username.as_bytes());
        mac
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const NOW: i64 = 1_700_000_000;

    fn issuer() -> TurnCredentialIssuer {
        TurnCredentialIssuer::new(TurnConfig {
            secret: "north-relay-secret".into(),
            host: "turn.example.org".into(),
            ..TurnConfig::default()
        })
    }

    #[test]
    fn username_embeds_expiry_and_subject() {
        let cred = issuer().issue_at(42, 86_400, NOW);
        assert_eq!(cred.username, format!("{}:42", NOW + 86_400));
        assert_eq!(cred.expires_at, NOW + 86_400);
        assert_eq!(B64.decode(&cred.password).unwrap().len(), 20);
    }

    #[test]
    fn issued_credential_verifies_until_expiry() {
        let issuer = issuer();
        let cred = issuer.issue_at(7, 60, NOW);
        assert!(issuer.verify_at(&cred.username, &cred.password, NOW));
        assert!(issuer.verify_at(&cred.username, &cred.password, NOW + 60));
        assert!(!issuer.verify_at(&cred.username, &cred.password, NOW + 61));
    }

    #[test]
    fn verify_rejects_forgery_and_garbage() {
        let issuer = issuer();
        let cred = issuer.issue_at(7, 60, NOW);
        let other = TurnCredentialIssuer::new(TurnConfig {
            secret: "other".into(),
            ..TurnConfig::default()
        });
        assert!(!other.verify_at(&cred.username, &cred.password, NOW));
        assert!(!issuer.verify_at(&format!("{}:8", NOW + 60), &cred.password, NOW));
        assert!(!issuer.verify_at("no-colon", &cred.password, NOW));
        assert!(!issuer.verify_at("abc:7", &cred.password, NOW));
        assert!(!issuer.verify_at(&cred.username, "%%%", NOW));
        assert!(!issuer.verify_at("", "", NOW));
    }

    #[test]
    fn ice_list_order_and_shared_credential() {
        let (servers, cred) = issuer().ice_servers_at(5, NOW);
        assert_eq!(servers.len(), 4);
        assert!(!servers[0].is_relay());
        assert!(!servers[1].is_relay());

        let json = serde_json::to_value(&servers).unwrap();
        assert_eq!(json[0]["urls"], "stun:stun.l.google.com:19302");
        assert_eq!(json[2]["urls"][0], "turn:turn.example.org:3478?transport=udp");
        assert_eq!(json[2]["urls"][1], "turn:turn.example.org:3478?transport=tcp");
        assert_eq!(json[3]["urls"][0], "turns:turn.example.org:5349?transport=tcp");
        for relay in &servers[2..] {
            assert_eq!(relay.username.as_deref(), Some(cred.username.as_str()));
            assert_eq!(relay.credential.as_deref(), Some(cred.password.as_str()));
        }
    }
}
