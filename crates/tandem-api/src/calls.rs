use axum::{Extension, Json, extract::State, http::StatusCode, response::IntoResponse};
use tracing::debug;

use tandem_gateway::Gateway;
use tandem_types::api::IceServersResponse;

use crate::middleware::Caller;

/// Fresh ICE list with relay credentials bound to the caller.
pub async fn ice_servers(
    State(gateway): State<Gateway>,
    Extension(caller): Extension<Caller>,
) -> Result<impl IntoResponse, StatusCode> {
    let (ice_servers, credential) = gateway.turn.ice_servers(caller.user_id);
    debug!("Issued relay credential for {} until {}", caller.user_id, credential.expires_at);

    Ok(Json(IceServersResponse {
        ice_servers,
        expires_at: credential.expires_at,
    }))
}

/// Connection, throttle and call snapshot.
pub async fn stats(State(gateway): State<Gateway>) -> Result<impl IntoResponse, StatusCode> {
    Ok(Json(gateway.stats().await))
}
