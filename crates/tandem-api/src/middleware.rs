use axum::{
    extract::{Request, State},
    http::StatusCode,
    middleware::Next,
    response::Response,
};
use axum_extra::TypedHeader;
use axum_extra::headers::{Authorization, UserAgent, authorization::Bearer};

use tandem_crypto::ClientGeneration;
use tandem_gateway::{Gateway, auth};

/// The authenticated caller of a REST request.
#[derive(Debug, Clone)]
pub struct Caller {
    pub user_id: i64,
    pub user_agent: Option<String>,
}

impl Caller {
    /// Generation for this request. An explicit `use_gcm` flag overrides
    /// the user agent.
    pub fn generation(&self, use_gcm: Option<bool>) -> ClientGeneration {
        ClientGeneration::detect(use_gcm, self.user_agent.as_deref())
    }
}

/// Extract and validate the bearer token, then expose the caller to handlers.
pub async fn require_auth(
    State(gateway): State<Gateway>,
    bearer: Option<TypedHeader<Authorization<Bearer>>>,
    user_agent: Option<TypedHeader<UserAgent>>,
    mut req: Request,
    next: Next,
) -> Result<Response, StatusCode> {
    let TypedHeader(Authorization(bearer)) = bearer.ok_or(StatusCode::UNAUTHORIZED)?;

    let user_id =
        auth::decode_user_id(&gateway.config.jwt_secret, bearer.token()).ok_or(StatusCode::UNAUTHORIZED)?;

    req.extensions_mut().insert(Caller {
        user_id,
        user_agent: user_agent.map(|TypedHeader(ua)| ua.as_str().to_string()),
    });
    Ok(next.run(req).await)
}
