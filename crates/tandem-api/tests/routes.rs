use std::sync::Arc;

use axum::Router;
use axum::body::Body;
use axum::http::{Request, StatusCode, header};
use http_body_util::BodyExt;
use serde_json::{Value, json};
use tower::ServiceExt;

use tandem_crypto::{CipherBridge, Sealed};
use tandem_db::Database;
use tandem_gateway::config::TurnConfig;
use tandem_gateway::{Gateway, GatewayConfig, auth};
use tandem_types::models::UserProfile;

const SECRET: &str = "api-test-secret";

fn app() -> (Router, Gateway) {
    let db = Arc::new(Database::open_in_memory().unwrap());
    db.upsert_user(&UserProfile {
        id: 1,
        username: "alice".into(),
        avatar: Some("https://cdn.test/a.png".into()),
    })
    .unwrap();
    let gateway = Gateway::new(
        GatewayConfig {
            jwt_secret: SECRET.into(),
            turn: TurnConfig {
                secret: "turn".into(),
                host: "relay.test".into(),
                ..TurnConfig::default()
            },
            ..GatewayConfig::default()
        },
        db,
    );
    (tandem_api::router(gateway.clone()), gateway)
}

fn bearer(user_id: i64) -> String {
    format!("Bearer {}", auth::issue_token(SECRET, user_id, 3600).unwrap())
}

async fn body_json(response: axum::response::Response) -> Value {
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    serde_json::from_slice(&bytes).unwrap()
}

fn post_json(uri: &str, user_id: i64, body: Value) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(uri)
        .header(header::AUTHORIZATION, bearer(user_id))
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

fn get(uri: &str, user_id: i64) -> Request<Body> {
    Request::builder()
        .uri(uri)
        .header(header::AUTHORIZATION, bearer(user_id))
        .body(Body::empty())
        .unwrap()
}

#[tokio::test]
async fn missing_or_bad_token_is_unauthorized() {
    let (app, _) = app();

    let response = app
        .clone()
        .oneshot(Request::builder().uri("/api/stats").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

    let response = app
        .oneshot(
            Request::builder()
                .uri("/api/stats")
                .header(header::AUTHORIZATION, "Bearer nope")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn send_then_fetch_across_generations() {
    let (app, _) = app();

    let response = app
        .clone()
        .oneshot(post_json(
            "/api/chat/send",
            1,
            json!({ "to_id": 2, "text": "from the phone", "use_gcm": true }),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::CREATED);
    let sent = body_json(response).await;
    assert_eq!(sent["message"]["cipher_version"], 2);
    assert!(sent["message"]["iv"].is_string());

    // The browser has no flag and a desktop user agent: legacy.
    let response = app
        .oneshot(
            Request::builder()
                .uri("/api/chat/history?peer_id=1")
                .header(header::AUTHORIZATION, bearer(2))
                .header(header::USER_AGENT, "Mozilla/5.0 (X11; Linux x86_64)")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let history = body_json(response).await;
    let first = &history["messages"][0];
    assert_eq!(first["cipher_version"], 1);
    assert!(first["iv"].is_null());

    let text = CipherBridge::default()
        .decrypt_text(
            &Sealed::legacy(first["text"].as_str().unwrap()),
            first["time"].as_i64().unwrap(),
        )
        .unwrap();
    assert_eq!(text, "from the phone");
}

#[tokio::test]
async fn user_agent_selects_modern_without_flag() {
    let (app, _) = app();
    app.clone()
        .oneshot(post_json("/api/chat/send", 1, json!({ "to_id": 2, "text": "hi" })))
        .await
        .unwrap();

    let response = app
        .oneshot(
            Request::builder()
                .uri("/api/chat/history?peer_id=1")
                .header(header::AUTHORIZATION, bearer(2))
                .header(header::USER_AGENT, "WorldMates/2.4 okhttp/4.12.0")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    let history = body_json(response).await;
    assert_eq!(history["messages"][0]["cipher_version"], 2);
}

#[tokio::test]
async fn send_requires_exactly_one_target_and_content() {
    let (app, _) = app();

    let both = app
        .clone()
        .oneshot(post_json("/api/chat/send", 1, json!({ "to_id": 2, "group_id": 3, "text": "x" })))
        .await
        .unwrap();
    assert_eq!(both.status(), StatusCode::BAD_REQUEST);

    let empty = app
        .oneshot(post_json("/api/chat/send", 1, json!({ "to_id": 2, "text": "  " })))
        .await
        .unwrap();
    assert_eq!(empty.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn seen_and_conversations() {
    let (app, _) = app();
    for text in ["one", "two"] {
        app.clone()
            .oneshot(post_json("/api/chat/send", 1, json!({ "to_id": 2, "text": text })))
            .await
            .unwrap();
    }

    let response = app
        .clone()
        .oneshot(get("/api/chat/conversations", 2))
        .await
        .unwrap();
    let convs = body_json(response).await;
    assert_eq!(convs["conversations"][0]["peer"]["username"], "alice");
    assert_eq!(convs["conversations"][0]["unread"], 2);

    let response = app
        .clone()
        .oneshot(post_json("/api/chat/seen", 2, json!({ "peer_id": 1 })))
        .await
        .unwrap();
    assert_eq!(body_json(response).await["updated"], 2);

    let response = app.oneshot(get("/api/chat/conversations", 2)).await.unwrap();
    assert_eq!(body_json(response).await["conversations"][0]["unread"], 0);
}

#[tokio::test]
async fn typing_is_throttled() {
    let (app, _) = app();
    let first = app
        .clone()
        .oneshot(post_json("/api/chat/typing", 1, json!({ "to_id": 2 })))
        .await
        .unwrap();
    assert_eq!(body_json(first).await["delivered"], true);

    let second = app
        .oneshot(post_json("/api/chat/typing", 1, json!({ "to_id": 2 })))
        .await
        .unwrap();
    assert_eq!(body_json(second).await["delivered"], false);
}

#[tokio::test]
async fn ice_servers_carry_caller_credential() {
    let (app, gateway) = app();
    let response = app.oneshot(get("/api/calls/ice-servers", 7)).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let body = body_json(response).await;
    let servers = body["ice_servers"].as_array().unwrap();
    assert_eq!(servers.len(), 4);
    assert_eq!(servers[2]["urls"][0], "turn:relay.test:3478?transport=udp");

    let username = servers[2]["username"].as_str().unwrap();
    let password = servers[2]["credential"].as_str().unwrap();
    assert!(username.ends_with(":7"));
    assert!(gateway.turn.verify(username, password));
    assert_eq!(body["expires_at"].as_i64().unwrap(), username.split(':').next().unwrap().parse::<i64>().unwrap());
}

#[tokio::test]
async fn group_routes_require_a_joined_connection() {
    let (app, gateway) = app();

    let send = || post_json("/api/chat/send", 1, json!({ "group_id": 4, "text": "hello group" }));
    let response = app.clone().oneshot(send()).await.unwrap();
    assert_eq!(response.status(), StatusCode::FORBIDDEN);
    let response = app.clone().oneshot(get("/api/chat/history?group_id=4", 1)).await.unwrap();
    assert_eq!(response.status(), StatusCode::FORBIDDEN);

    let (conn, _rx) = gateway.open_connection(tandem_types::models::Transport::Stream).await;
    let token = auth::issue_token(SECRET, 1, 3600).unwrap();
    assert_eq!(gateway.authenticate(conn, &token, Some(true), None).await, Some(1));
    gateway
        .dispatch(conn, tandem_types::events::ClientCommand::JoinGroup { group_id: 4 })
        .await;

    let response = app.clone().oneshot(send()).await.unwrap();
    assert_eq!(response.status(), StatusCode::CREATED);
    let response = app.oneshot(get("/api/chat/history?group_id=4", 1)).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(body_json(response).await["messages"].as_array().unwrap().len(), 1);
}
