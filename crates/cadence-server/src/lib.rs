//! Cadence realtime relay server library logic.

pub mod api_realtime;
pub mod config;
pub mod failover;
pub mod middleware;
pub mod relay;

use axum::{routing::get, Extension, Json, Router};
use cadence_credentials::{CredentialChain, PrimaryCredentialConfig, SecondaryKeyProvider};
use cadence_db::DbPool;
use cadence_realtime::WsConnector;
use cadence_tools::{
    declarations_for, AdminTaskExecutor, ChatDelegate, HttpAdminExecutor, HttpChatDelegate,
    ToolDispatcher, Unconfigured, AGENTS,
};
use cadence_types::Persona;
use config::{AuthConfig, Config};
use failover::{RelaySettings, UpstreamDeps};
use middleware::RateLimiter;
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

/// Application state shared across all request handlers.
#[derive(Clone)]
pub struct AppState {
    /// Session store pool.
    pub pool: DbPool,
    /// Session token transport and throttling settings.
    pub auth: AuthConfig,
    /// Rate limiter state.
    pub rate_limiter: RateLimiter,
    /// Per-session relay tunables.
    pub relay: RelaySettings,
    /// Credential sources and the upstream connector.
    pub upstream: UpstreamDeps,
    /// Executes tool calls requested by the upstream model.
    pub dispatcher: Arc<ToolDispatcher>,
}

impl AppState {
    /// Wires the production collaborators described by `config`.
    ///
    /// Agents without a configured URL and a missing admin endpoint are
    /// replaced with stand-ins that fail every call, so the model still gets
    /// a tool error instead of a dropped session.
    pub fn from_config(config: &Config, pool: DbPool) -> Self {
        let mode = config.runtime.mode;

        let primary_credentials = CredentialChain::primary(PrimaryCredentialConfig {
            api_key: config.primary.api_key.clone(),
            force_api_key: config.primary.force_api_key,
            disable_oauth: config.primary.disable_oauth,
            scopes: config.primary.scopes.clone(),
            service_account_path: config.primary.service_account_path.clone(),
            metadata_host: config.primary.metadata_host.clone(),
            mode,
        });
        tracing::info!(
            strategies = ?primary_credentials.strategy_names(),
            "primary credential chain configured"
        );

        let upstream = UpstreamDeps {
            primary_credentials: Arc::new(primary_credentials),
            secondary_credentials: Arc::new(SecondaryKeyProvider::new(
                config.secondary.api_key.clone(),
            )),
            connector: Arc::new(WsConnector::new(
                config.primary.endpoint.clone(),
                config.secondary.endpoint.clone(),
                Duration::from_millis(config.relay.connect_timeout_ms),
            )
            .with_secondary_model(config.secondary.model.clone())),
        };

        let admin: Arc<dyn AdminTaskExecutor> = match &config.admin {
            Some(endpoint) => Arc::new(HttpAdminExecutor::new(endpoint.url.clone())),
            None => Arc::new(Unconfigured("admin service")),
        };
        let mut dispatcher = ToolDispatcher::new(admin);
        for agent in AGENTS {
            let delegate: Arc<dyn ChatDelegate> = match config.delegates.get(agent) {
                Some(endpoint) => Arc::new(HttpChatDelegate::new(endpoint.url.clone())),
                None => {
                    tracing::warn!(agent, "no delegate url configured");
                    Arc::new(Unconfigured(agent))
                }
            };
            dispatcher = dispatcher.with_delegate(agent, delegate);
        }

        for persona in Persona::ALL {
            let declarations = declarations_for(persona);
            let tools: Vec<&str> = declarations.iter().map(|d| d.name.as_str()).collect();
            tracing::info!(persona = %persona, ?tools, "tool catalogue");
        }

        Self {
            pool,
            auth: config.auth.clone(),
            rate_limiter: RateLimiter::new(),
            relay: RelaySettings {
                primary_model: config.primary.model.clone(),
                secondary_model: config.secondary.model.clone(),
                enable_failover: config.relay.enable_failover,
                credential_timeout: Duration::from_millis(config.relay.credential_timeout_ms),
                close_grace: Duration::from_millis(config.relay.close_grace_ms),
                channel_capacity: config.relay.channel_capacity,
                mode,
            },
            upstream,
            dispatcher: Arc::new(dispatcher),
        }
    }
}

/// Health check handler.
async fn health() -> Json<Value> {
    Json(json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION")
    }))
}

/// Builds the application router with all routes.
///
/// The realtime routes run the rate limiter first and the session
/// authenticator second; both answer with plain HTTP before any upgrade.
pub fn app(state: AppState) -> Router {
    let realtime_routes = Router::new()
        .route("/api/realtime/tutor", get(api_realtime::tutor_handler))
        .route("/api/realtime/operator", get(api_realtime::operator_handler))
        .route_layer(axum::middleware::from_fn(middleware::auth_middleware))
        .route_layer(axum::middleware::from_fn(middleware::rate_limit_middleware));

    Router::new()
        .route("/health", get(health))
        .merge(realtime_routes)
        .layer(TraceLayer::new_for_http())
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .layer(Extension(Arc::new(state)))
}
