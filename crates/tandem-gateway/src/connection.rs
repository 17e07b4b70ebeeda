use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Query, State};
use axum::http::HeaderMap;
use axum::http::header::USER_AGENT;
use axum::response::IntoResponse;
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use serde::Deserialize;
use tokio::sync::mpsc;
use tracing::{info, warn};
use uuid::Uuid;

use tandem_types::events::{ClientCommand, ServerEvent};
use tandem_types::models::Transport;

use crate::gateway::Gateway;

/// Heartbeat interval: server sends a Ping every 15 seconds.
/// If 2 consecutive Pongs are missed (~30s), the connection is dropped.
const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(15);

/// How long an unauthenticated socket may wait before sending `join`.
const JOIN_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Default, Deserialize)]
pub struct WsParams {
    pub access_token: Option<String>,
    pub use_gcm: Option<bool>,
    pub transport: Option<Transport>,
}

/// `GET /gateway`. A token in the query string authenticates at upgrade;
/// otherwise the client must send `join` first.
pub async fn ws_handler(
    ws: WebSocketUpgrade,
    State(gateway): State<Gateway>,
    Query(params): Query<WsParams>,
    headers: HeaderMap,
) -> impl IntoResponse {
    let user_agent = headers
        .get(USER_AGENT)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string);

    ws.on_upgrade(move |socket| handle_connection(socket, gateway, params, user_agent))
}

pub async fn handle_connection(socket: WebSocket, gateway: Gateway, params: WsParams, user_agent: Option<String>) {
    let (mut sender, mut receiver) = socket.split();
    let transport = params.transport.unwrap_or(Transport::Stream);
    let (conn_id, mut events) = gateway.open_connection(transport).await;

    let user_id = match params.access_token.as_deref() {
        Some(token) => {
            gateway
                .authenticate(conn_id, token, params.use_gcm, user_agent.as_deref())
                .await
        }
        None => wait_for_join(&mut receiver, &gateway, conn_id, user_agent.as_deref()).await,
    };

    let Some(user_id) = user_id else {
        warn!("Connection {} failed to authenticate, closing", conn_id);
        flush(&mut events, &mut sender).await;
        gateway.close_connection(conn_id).await;
        return;
    };

    run_connection_loop(sender, receiver, events, gateway.clone(), conn_id).await;

    gateway.close_connection(conn_id).await;
    info!("User {} ({}) disconnected from gateway", user_id, conn_id);
}

/// Wait for a `join` command. Anything else before it is ignored.
async fn wait_for_join(
    receiver: &mut SplitStream<WebSocket>,
    gateway: &Gateway,
    conn_id: Uuid,
    user_agent: Option<&str>,
) -> Option<i64> {
    let timeout = tokio::time::timeout(JOIN_TIMEOUT, async {
        while let Some(Ok(msg)) = receiver.next().await {
            if let Message::Text(text) = msg {
                if let Ok(ClientCommand::Join { access_token, use_gcm }) =
                    serde_json::from_str::<ClientCommand>(&text)
                {
                    return gateway.authenticate(conn_id, &access_token, use_gcm, user_agent).await;
                }
            }
        }
        None
    });

    timeout.await.ok().flatten()
}

/// Push out whatever is queued, e.g. the error explaining a rejected join.
async fn flush(events: &mut mpsc::UnboundedReceiver<ServerEvent>, sender: &mut SplitSink<WebSocket, Message>) {
    while let Ok(event) = events.try_recv() {
        let Ok(text) = serde_json::to_string(&event) else {
            continue;
        };
        if sender.send(Message::Text(text.into())).await.is_err() {
            return;
        }
    }
    let _ = sender.send(Message::Close(None)).await;
}

fn now_millis() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

async fn run_connection_loop(
    mut sender: SplitSink<WebSocket, Message>,
    mut receiver: SplitStream<WebSocket>,
    mut events: mpsc::UnboundedReceiver<ServerEvent>,
    gateway: Gateway,
    conn_id: Uuid,
) {
    let pong_received = Arc::new(AtomicBool::new(true));
    let pong_flag_send = pong_received.clone();
    let pong_flag_recv = pong_received.clone();

    // Events -> client, with heartbeat
    let mut send_task = tokio::spawn(async move {
        let mut heartbeat = tokio::time::interval(HEARTBEAT_INTERVAL);
        heartbeat.tick().await;
        let mut missed_heartbeats: u8 = 0;

        loop {
            tokio::select! {
                event = events.recv() => {
                    let Some(event) = event else { break };
                    let text = match serde_json::to_string(&event) {
                        Ok(text) => text,
                        Err(e) => {
                            warn!("Dropping unserializable event: {}", e);
                            continue;
                        }
                    };
                    if sender.send(Message::Text(text.into())).await.is_err() {
                        break;
                    }
                }
                _ = heartbeat.tick() => {
                    if pong_flag_send.swap(false, Ordering::Acquire) {
                        missed_heartbeats = 0;
                    } else {
                        missed_heartbeats += 1;
                        if missed_heartbeats >= 2 {
                            warn!("Heartbeat timeout on {} (missed {} pongs), dropping connection", conn_id, missed_heartbeats);
                            break;
                        }
                    }
                    // The ping carries its send time so the pong yields a round trip.
                    let stamp = now_millis().to_be_bytes().to_vec();
                    if sender.send(Message::Ping(stamp.into())).await.is_err() {
                        break;
                    }
                }
            }
        }
    });

    // Commands <- client
    let recv_gateway = gateway.clone();
    let mut recv_task = tokio::spawn(async move {
        while let Some(Ok(msg)) = receiver.next().await {
            match msg {
                Message::Text(text) => match serde_json::from_str::<ClientCommand>(&text) {
                    Ok(cmd) => recv_gateway.dispatch(conn_id, cmd).await,
                    Err(e) => {
                        warn!(
                            "{} bad command: {} -- raw: {}",
                            conn_id,
                            e,
                            text.chars().take(200).collect::<String>()
                        );
                    }
                },
                Message::Pong(payload) => {
                    pong_flag_recv.store(true, Ordering::Release);
                    if let Ok(stamp) = <[u8; 8]>::try_from(payload.as_ref()) {
                        let rtt = now_millis() - i64::from_be_bytes(stamp);
                        if rtt >= 0 {
                            recv_gateway.monitor.update_latency(conn_id, rtt as u64);
                        }
                    }
                }
                Message::Close(_) => break,
                _ => {}
            }
        }
    });

    // Wait for either task to finish
    tokio::select! {
        _ = &mut send_task => recv_task.abort(),
        _ = &mut recv_task => send_task.abort(),
    }
}
