use axum::{
    body::Body,
    extract::ConnectInfo,
    http::{header, HeaderMap, Request, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
    Json,
};
use cadence_db::DbPool;
use cadence_types::AuthenticatedPrincipal;
use serde_json::json;
use std::collections::HashMap;
use std::net::{IpAddr, SocketAddr};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use crate::AppState;

/// Custom header carrying the session token.
pub const SESSION_TOKEN_HEADER: &str = "x-session-token";

/// Query parameter carrying the session token.
pub const SESSION_TOKEN_QUERY: &str = "token";

/// Why a connection attempt was refused before the upgrade.
#[derive(Debug, thiserror::Error)]
pub enum AuthError {
    #[error("no session token was presented")]
    MissingToken,

    #[error("session token is not recognised")]
    UnknownSession,

    #[error("session has expired")]
    Expired,

    #[error("session refers to an unknown user")]
    UnknownUser,

    #[error("session store unavailable")]
    Store,
}

impl AuthError {
    fn code(&self) -> &'static str {
        match self {
            Self::MissingToken => "missing_token",
            Self::UnknownSession => "invalid_session",
            Self::Expired => "session_expired",
            Self::UnknownUser => "unknown_user",
            Self::Store => "session_store_unavailable",
        }
    }

    fn status(&self) -> StatusCode {
        match self {
            Self::Store => StatusCode::SERVICE_UNAVAILABLE,
            _ => StatusCode::UNAUTHORIZED,
        }
    }
}

impl IntoResponse for AuthError {
    fn into_response(self) -> Response {
        let body = Json(json!({ "error": self.code(), "message": self.to_string() }));
        (self.status(), body).into_response()
    }
}

fn cookie_value<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers
        .get_all(header::COOKIE)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .flat_map(|value| value.split(';'))
        .filter_map(|pair| pair.trim().split_once('='))
        .find(|(key, _)| *key == name)
        .map(|(_, value)| value.trim_matches('"'))
}

/// Extracts the session token, checking in priority order: cookie, query
/// parameter, `Authorization: Bearer`, then the custom header.
pub fn extract_session_token(
    headers: &HeaderMap,
    query: Option<&str>,
    cookie_name: &str,
) -> Option<String> {
    let non_empty = |s: &str| {
        let s = s.trim();
        (!s.is_empty()).then(|| s.to_string())
    };

    if let Some(token) = cookie_value(headers, cookie_name).and_then(non_empty) {
        return Some(token);
    }
    if let Some(token) = query.and_then(|q| {
        url::form_urlencoded::parse(q.as_bytes())
            .find(|(key, _)| key == SESSION_TOKEN_QUERY)
            .and_then(|(_, value)| non_empty(&value))
    }) {
        return Some(token);
    }
    if let Some(token) = headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .and_then(non_empty)
    {
        return Some(token);
    }
    headers
        .get(SESSION_TOKEN_HEADER)
        .and_then(|v| v.to_str().ok())
        .and_then(non_empty)
}

/// Resolves a session token to its principal.
///
/// A single failed lookup is terminal; there are no retries.
pub async fn authenticate_session(
    pool: DbPool,
    token: String,
    now: i64,
) -> Result<AuthenticatedPrincipal, AuthError> {
    tokio::task::spawn_blocking(move || {
        let conn = pool.get().map_err(|e| {
            tracing::error!("failed to get session store connection: {}", e);
            AuthError::Store
        })?;

        let session = cadence_db::find_session(&conn, &token)
            .map_err(|e| {
                tracing::error!("session lookup failed: {}", e);
                AuthError::Store
            })?
            .ok_or(AuthError::UnknownSession)?;
        if session.is_expired_at(now) {
            return Err(AuthError::Expired);
        }

        let user = cadence_db::find_user(&conn, &session.user_id)
            .map_err(|e| {
                tracing::error!("user lookup failed: {}", e);
                AuthError::Store
            })?
            .ok_or(AuthError::UnknownUser)?;

        Ok(AuthenticatedPrincipal {
            id: user.id,
            email: user.email,
            role: user.role,
        })
    })
    .await
    .map_err(|_| AuthError::Store)?
}

/// Middleware admitting only requests with a live session.
///
/// Runs before the upgrade extractor, so a rejection is a plain HTTP
/// response and the protocol switch never happens. On success the
/// [`AuthenticatedPrincipal`] is placed in the request extensions.
pub async fn auth_middleware(mut req: Request<Body>, next: Next) -> Result<Response, Response> {
    let state = req
        .extensions()
        .get::<Arc<AppState>>()
        .ok_or_else(|| StatusCode::INTERNAL_SERVER_ERROR.into_response())?
        .clone();
    let remote_addr = req
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| addr.to_string())
        .unwrap_or_default();

    let token = extract_session_token(req.headers(), req.uri().query(), &state.auth.cookie_name)
        .ok_or_else(|| {
            tracing::warn!(remote_addr = %remote_addr, path = %req.uri().path(), "realtime connect missing session token");
            AuthError::MissingToken.into_response()
        })?;

    let now = chrono::Utc::now().timestamp();
    match authenticate_session(state.pool.clone(), token, now).await {
        Ok(principal) => {
            tracing::info!(
                principal_id = %principal.id,
                remote_addr = %remote_addr,
                "realtime session authenticated"
            );
            req.extensions_mut().insert(principal);
            Ok(next.run(req).await)
        }
        Err(e) => {
            tracing::warn!(remote_addr = %remote_addr, reason = %e, "realtime session rejected");
            Err(e.into_response())
        }
    }
}

/// Rate limiting key.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum RateLimitKey {
    Ip(IpAddr),
}

/// In-memory rate limiter state.
///
/// Uses a simple fixed window counter.
#[derive(Clone, Debug)]
pub struct RateLimiter {
    state: Arc<Mutex<HashMap<RateLimitKey, (u32, Instant)>>>,
    window: Duration,
}

impl RateLimiter {
    pub fn new() -> Self {
        Self::with_window(Duration::from_secs(60))
    }

    pub fn with_window(window: Duration) -> Self {
        Self {
            state: Arc::new(Mutex::new(HashMap::new())),
            window,
        }
    }

    /// Check if the request is allowed.
    ///
    /// Returns `true` if allowed, `false` if limit exceeded.
    pub fn check(&self, key: RateLimitKey, limit: u32) -> bool {
        let mut state = match self.state.lock() {
            Ok(guard) => guard,
            Err(poisoned) => {
                tracing::error!("rate limiter lock poisoned, recovering with stale state");
                poisoned.into_inner()
            }
        };
        let now = Instant::now();
        let window = self.window;

        // Evict expired windows only; active limits survive the sweep.
        if state.len() > 10000 {
            state.retain(|_, (_, start)| now.duration_since(*start) <= window);
        }

        let (count, start) = state.entry(key).or_insert((0, now));

        if now.duration_since(*start) > window {
            *count = 1;
            *start = now;
            true
        } else {
            *count += 1;
            *count <= limit
        }
    }
}

impl Default for RateLimiter {
    fn default() -> Self {
        Self::new()
    }
}

/// Throttles upgrade attempts per client IP.
pub async fn rate_limit_middleware(req: Request<Body>, next: Next) -> Result<Response, StatusCode> {
    let state = req
        .extensions()
        .get::<Arc<AppState>>()
        .ok_or(StatusCode::INTERNAL_SERVER_ERROR)?
        .clone();

    // ConnectInfo is absent only when the router is served without
    // `into_make_service_with_connect_info`; that is a wiring bug.
    let Some(ConnectInfo(addr)) = req.extensions().get::<ConnectInfo<SocketAddr>>() else {
        return Err(StatusCode::INTERNAL_SERVER_ERROR);
    };
    let key = RateLimitKey::Ip(addr.ip());

    if !state
        .rate_limiter
        .check(key, state.auth.max_upgrades_per_minute)
    {
        tracing::warn!(remote_addr = %addr, "realtime upgrade throttled");
        let mut response = (
            StatusCode::TOO_MANY_REQUESTS,
            Json(json!({"error": "rate_limited", "message": "too many connection attempts"})),
        )
            .into_response();
        response.headers_mut().insert(
            axum::http::header::RETRY_AFTER,
            axum::http::HeaderValue::from_static("60"),
        );
        return Ok(response);
    }

    Ok(next.run(req).await)
}
