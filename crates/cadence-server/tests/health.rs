use axum::body::Body;
use axum::http::{Request, StatusCode};
use cadence_server::config::Config;
use cadence_server::{app, AppState};
use tower::ServiceExt;

fn state() -> (AppState, tempfile::NamedTempFile) {
    let db = tempfile::NamedTempFile::new().unwrap();
    let pool = cadence_db::create_pool(
        db.path().to_str().unwrap(),
        cadence_db::DbRuntimeSettings::default(),
    )
    .unwrap();
    (AppState::from_config(&Config::default(), pool), db)
}

#[tokio::test]
async fn health_check_returns_ok() {
    let (state, _db) = state();

    let response = app(state)
        .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(json["status"], "ok");
    assert_eq!(json["version"], env!("CARGO_PKG_VERSION"));
}

#[tokio::test]
async fn unknown_path_is_not_found() {
    let (state, _db) = state();

    let response = app(state)
        .oneshot(Request::builder().uri("/api/realtime/nobody").body(Body::empty()).unwrap())
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}
