use jsonwebtoken::{DecodingKey, EncodingKey, Header, Validation, decode, encode};

use tandem_types::api::Claims;

/// Validate a bearer token and return its user id. Expired, malformed or
/// wrongly signed tokens yield None.
pub fn decode_user_id(secret: &str, token: &str) -> Option<i64> {
    decode::<Claims>(
        token,
        &DecodingKey::from_secret(secret.as_bytes()),
        &Validation::default(),
    )
    .ok()
    .map(|data| data.claims.sub)
}

/// Mint a token for `user_id`. Tokens come from the account service in
/// production; this exists for tooling and tests.
pub fn issue_token(secret: &str, user_id: i64, ttl_secs: i64) -> anyhow::Result<String> {
    let exp = (chrono::Utc::now().timestamp() + ttl_secs) as usize;
    let claims = Claims { sub: user_id, exp };
    Ok(encode(
        &Header::default(),
        &claims,
        &EncodingKey::from_secret(secret.as_bytes()),
    )?)
}
