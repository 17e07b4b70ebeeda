use axum::{
    Extension, Json,
    extract::{Query, State},
    http::StatusCode,
    response::IntoResponse,
};
use tracing::{error, warn};

use tandem_gateway::Gateway;
use tandem_gateway::relay::RelayError;
use tandem_types::api::{
    ConversationsQuery, ConversationsResponse, HistoryQuery, HistoryResponse, SeenRequest, SeenResponse,
    SendMessageRequest, SendMessageResponse, TypingRequest, TypingResponse,
};
use tandem_types::events::{OutgoingDirect, OutgoingGroup, TypingTarget};

use crate::middleware::Caller;

const MAX_PAGE: u32 = 200;

fn relay_status(e: RelayError) -> StatusCode {
    match e {
        RelayError::EmptyMessage => StatusCode::BAD_REQUEST,
        RelayError::Cipher(e) => {
            error!("sealing failed: {}", e);
            StatusCode::INTERNAL_SERVER_ERROR
        }
        RelayError::Storage(e) => {
            error!("storage failed: {}", e);
            StatusCode::INTERNAL_SERVER_ERROR
        }
    }
}

/// Same membership rule as the gateway: one of the caller's live
/// connections has joined the group.
async fn require_group(gateway: &Gateway, caller: &Caller, group_id: i64) -> Result<(), StatusCode> {
    if gateway.in_group(caller.user_id, group_id).await {
        Ok(())
    } else {
        warn!("user {} is not a member of group {}", caller.user_id, group_id);
        Err(StatusCode::FORBIDDEN)
    }
}

/// Exactly one of `peer_id` / `group_id`. Newest first; page backwards with
/// `before_id`.
pub async fn history(
    State(gateway): State<Gateway>,
    Extension(caller): Extension<Caller>,
    Query(query): Query<HistoryQuery>,
) -> Result<impl IntoResponse, StatusCode> {
    let generation = caller.generation(query.use_gcm);
    let limit = query.limit.unwrap_or(gateway.config.history_page).clamp(1, MAX_PAGE);

    let messages = match (query.peer_id, query.group_id) {
        (Some(peer_id), None) => {
            gateway
                .relay
                .history(caller.user_id, generation, peer_id, query.before_id, limit)
                .await
        }
        (None, Some(group_id)) => {
            require_group(&gateway, &caller, group_id).await?;
            gateway
                .relay
                .group_history(generation, group_id, query.before_id, limit)
                .await
        }
        _ => return Err(StatusCode::BAD_REQUEST),
    }
    .map_err(|e| {
        error!("history fetch failed: {}", e);
        StatusCode::INTERNAL_SERVER_ERROR
    })?;

    Ok(Json(HistoryResponse { messages }))
}

/// Plaintext in, sealed for the caller's generation, fanned out to live
/// connections exactly as a gateway send would be.
pub async fn send(
    State(gateway): State<Gateway>,
    Extension(caller): Extension<Caller>,
    Json(req): Json<SendMessageRequest>,
) -> Result<impl IntoResponse, StatusCode> {
    let generation = caller.generation(req.use_gcm);
    let sender = gateway.relay.profile(caller.user_id).await;

    let message = match (req.to_id, req.group_id) {
        (Some(to_id), None) => {
            let msg = OutgoingDirect {
                to_id,
                text: req.text,
                reply_id: req.reply_id,
                media: req.media,
            };
            gateway.relay.send_direct(&sender, None, generation, msg).await
        }
        (None, Some(group_id)) => {
            require_group(&gateway, &caller, group_id).await?;
            let msg = OutgoingGroup {
                group_id,
                text: req.text,
                reply_id: req.reply_id,
                media: req.media,
            };
            gateway.relay.send_group(&sender, None, generation, msg).await
        }
        _ => {
            warn!("send from {} without exactly one target", caller.user_id);
            return Err(StatusCode::BAD_REQUEST);
        }
    }
    .map_err(relay_status)?;

    Ok((StatusCode::CREATED, Json(SendMessageResponse { message })))
}

pub async fn seen(
    State(gateway): State<Gateway>,
    Extension(caller): Extension<Caller>,
    Json(req): Json<SeenRequest>,
) -> Result<impl IntoResponse, StatusCode> {
    let outcome = gateway.relay.mark_seen(caller.user_id, req.peer_id).await.map_err(|e| {
        error!("mark seen failed: {}", e);
        StatusCode::INTERNAL_SERVER_ERROR
    })?;

    Ok(Json(SeenResponse {
        updated: outcome.updated,
        seen: outcome.seen,
    }))
}

pub async fn conversations(
    State(gateway): State<Gateway>,
    Extension(caller): Extension<Caller>,
    Query(query): Query<ConversationsQuery>,
) -> Result<impl IntoResponse, StatusCode> {
    let generation = caller.generation(query.use_gcm);
    let limit = query.limit.unwrap_or(gateway.config.history_page).clamp(1, MAX_PAGE);

    let conversations = gateway
        .relay
        .conversations(caller.user_id, generation, limit)
        .await
        .map_err(|e| {
            error!("conversation list failed: {}", e);
            StatusCode::INTERNAL_SERVER_ERROR
        })?;

    Ok(Json(ConversationsResponse { conversations }))
}

pub async fn typing(
    State(gateway): State<Gateway>,
    Extension(caller): Extension<Caller>,
    Json(req): Json<TypingRequest>,
) -> Result<impl IntoResponse, StatusCode> {
    if req.to_id.is_some() == req.group_id.is_some() {
        return Err(StatusCode::BAD_REQUEST);
    }
    let target = TypingTarget {
        to_id: req.to_id,
        group_id: req.group_id,
    };
    let delivered = gateway.relay.typing(caller.user_id, None, target, req.typing).await;
    Ok(Json(TypingResponse { delivered }))
}
