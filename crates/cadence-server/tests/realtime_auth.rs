//! Session authentication in front of the realtime upgrade.

mod common;

use common::*;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::{HeaderValue, StatusCode};
use tokio_tungstenite::tungstenite::Error as WsError;

async fn rejected_status(request: tokio_tungstenite::tungstenite::handshake::client::Request) -> StatusCode {
    match tokio_tungstenite::connect_async(request).await {
        Err(WsError::Http(response)) => response.status(),
        Err(other) => panic!("expected an HTTP rejection, got {other}"),
        Ok(_) => panic!("upgrade unexpectedly accepted"),
    }
}

#[tokio::test]
async fn token_is_accepted_over_every_transport() {
    let (upstream_url, mut sessions) = spawn_mock_upstream().await;
    let server = spawn_relay(relay_config(&upstream_url, &upstream_url)).await;
    let url = server.url("/api/realtime/tutor");

    let mut cookie = url.as_str().into_client_request().unwrap();
    cookie.headers_mut().insert(
        "cookie",
        HeaderValue::from_str(&format!("theme=dark; session_token={ALICE_TOKEN}")).unwrap(),
    );

    let query = format!("{url}?token={ALICE_TOKEN}").into_client_request().unwrap();

    let mut bearer = url.as_str().into_client_request().unwrap();
    bearer.headers_mut().insert(
        "authorization",
        HeaderValue::from_str(&format!("Bearer {ALICE_TOKEN}")).unwrap(),
    );

    let mut header = url.as_str().into_client_request().unwrap();
    header
        .headers_mut()
        .insert("x-session-token", HeaderValue::from_static(ALICE_TOKEN));

    let mut upstreams = Vec::new();
    for request in [cookie, query, bearer, header] {
        let (mut socket, _) = tokio_tungstenite::connect_async(request).await.unwrap();
        assert_eq!(expect_connected(&mut socket, "tutor").await, "gemini-live");
        upstreams.push((socket, next_session(&mut sessions).await));
    }
    assert_eq!(server.connect_attempts(), 4);
}

#[tokio::test]
async fn bad_tokens_are_refused_before_any_upstream_attempt() {
    let (upstream_url, _sessions) = spawn_mock_upstream().await;
    let server = spawn_relay(relay_config(&upstream_url, &upstream_url)).await;
    let url = server.url("/api/realtime/tutor");

    for _ in 0..3 {
        let missing = url.as_str().into_client_request().unwrap();
        assert_eq!(rejected_status(missing).await, StatusCode::UNAUTHORIZED);

        let unknown = format!("{url}?token=nope").into_client_request().unwrap();
        assert_eq!(rejected_status(unknown).await, StatusCode::UNAUTHORIZED);

        let mut expired = url.as_str().into_client_request().unwrap();
        expired
            .headers_mut()
            .insert("x-session-token", HeaderValue::from_static(STALE_TOKEN));
        assert_eq!(rejected_status(expired).await, StatusCode::UNAUTHORIZED);
    }

    assert_eq!(server.connect_attempts(), 0);
}

#[tokio::test]
async fn unauthenticated_request_gets_json_error_body() {
    let (upstream_url, _sessions) = spawn_mock_upstream().await;
    let server = spawn_relay(relay_config(&upstream_url, &upstream_url)).await;

    let request = server
        .url("/api/realtime/operator?token=nope")
        .into_client_request()
        .unwrap();
    match tokio_tungstenite::connect_async(request).await {
        Err(WsError::Http(response)) => {
            assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
            let body: serde_json::Value =
                serde_json::from_slice(response.body().as_deref().unwrap()).unwrap();
            assert_eq!(body["error"], "invalid_session");
        }
        Err(other) => panic!("expected an HTTP rejection, got {other}"),
        Ok(_) => panic!("upgrade unexpectedly accepted"),
    }
}

#[tokio::test]
async fn upgrades_are_throttled_per_ip() {
    let (upstream_url, _sessions) = spawn_mock_upstream().await;
    let mut config = relay_config(&upstream_url, &upstream_url);
    config.auth.max_upgrades_per_minute = 2;
    let server = spawn_relay(config).await;
    let url = server.url("/api/realtime/tutor?token=nope");

    assert_eq!(
        rejected_status(url.as_str().into_client_request().unwrap()).await,
        StatusCode::UNAUTHORIZED
    );
    assert_eq!(
        rejected_status(url.as_str().into_client_request().unwrap()).await,
        StatusCode::UNAUTHORIZED
    );
    assert_eq!(
        rejected_status(url.as_str().into_client_request().unwrap()).await,
        StatusCode::TOO_MANY_REQUESTS
    );
}
