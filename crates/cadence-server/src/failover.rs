//! Bringing a relay session to the open state, with failover.
//!
//! ```text
//! Connecting(primary) ──ok──────────────────────────▶ Open
//!        │ fail, failover enabled
//!        ▼
//! Connecting(secondary) ──ok────────────────────────▶ Open
//!        │ fail                     (or primary fail with failover disabled)
//!        ▼
//!     Closed
//! ```
//!
//! A connection attempt fails on credential exhaustion, acquisition timeout,
//! handshake or transport errors, and HTTP responses to the upgrade. Once a
//! session is open the controller is done; mid-conversation drops are
//! terminal and handled by the pump.

use cadence_credentials::CredentialSource;
use cadence_realtime::{
    adapter_for, Frame, ProtocolAdapter, SessionConfig, UpstreamConnector, UpstreamError,
    UpstreamLink,
};
use cadence_types::{Persona, Provider, ProviderKind, RuntimeMode};
use futures_util::SinkExt;
use std::sync::Arc;
use std::time::Duration;

/// Relay session tunables, resolved from configuration.
#[derive(Debug, Clone)]
pub struct RelaySettings {
    pub primary_model: String,
    pub secondary_model: String,
    pub enable_failover: bool,
    pub credential_timeout: Duration,
    pub close_grace: Duration,
    pub channel_capacity: usize,
    pub mode: RuntimeMode,
}

impl RelaySettings {
    fn model_for(&self, provider: Provider) -> &str {
        match provider {
            Provider::Primary => &self.primary_model,
            Provider::Secondary => &self.secondary_model,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Connecting(Provider),
    Open(ProviderKind),
    Closed,
}

/// An upstream that has received its setup message.
pub struct OpenUpstream {
    pub link: UpstreamLink,
    pub adapter: &'static dyn ProtocolAdapter,
}

/// The providers' credential sources and the connector, shared by all sessions.
#[derive(Clone)]
pub struct UpstreamDeps {
    pub primary_credentials: Arc<dyn CredentialSource>,
    pub secondary_credentials: Arc<dyn CredentialSource>,
    pub connector: Arc<dyn UpstreamConnector>,
}

pub struct FailoverController<'a> {
    deps: &'a UpstreamDeps,
    settings: &'a RelaySettings,
    session_id: &'a str,
    state: SessionState,
}

impl<'a> FailoverController<'a> {
    pub fn new(deps: &'a UpstreamDeps, settings: &'a RelaySettings, session_id: &'a str) -> Self {
        Self {
            deps,
            settings,
            session_id,
            state: SessionState::Connecting(Provider::Primary),
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    fn transition(&mut self, next: SessionState) {
        tracing::debug!(session_id = self.session_id, from = ?self.state, to = ?next, "relay session state");
        self.state = next;
    }

    /// Opens an upstream for `persona`, falling back to the secondary
    /// provider when allowed.
    ///
    /// # Errors
    ///
    /// Returns the error of the last attempt when no provider could be
    /// opened; the state is then [`SessionState::Closed`].
    pub async fn establish(
        &mut self,
        persona: Persona,
        tools: Vec<cadence_types::ToolDeclaration>,
    ) -> Result<OpenUpstream, UpstreamError> {
        let primary_error = match self.attempt(Provider::Primary, persona, tools.clone()).await {
            Ok(open) => return Ok(open),
            Err(e) => e,
        };
        self.log_failure(Provider::Primary, &primary_error);

        if !self.settings.enable_failover {
            self.transition(SessionState::Closed);
            return Err(primary_error);
        }

        self.transition(SessionState::Connecting(Provider::Secondary));
        match self.attempt(Provider::Secondary, persona, tools).await {
            Ok(open) => {
                tracing::info!(
                    session_id = self.session_id,
                    primary_error = primary_error.code(),
                    "failed over to secondary provider"
                );
                Ok(open)
            }
            Err(e) => {
                self.log_failure(Provider::Secondary, &e);
                self.transition(SessionState::Closed);
                Err(e)
            }
        }
    }

    fn log_failure(&self, provider: Provider, error: &UpstreamError) {
        if self.settings.mode.is_production() {
            tracing::warn!(session_id = self.session_id, provider = %provider, code = error.code(), "upstream connect failed");
        } else {
            tracing::warn!(session_id = self.session_id, provider = %provider, code = error.code(), error = %error, "upstream connect failed");
        }
    }

    async fn attempt(
        &mut self,
        provider: Provider,
        persona: Persona,
        tools: Vec<cadence_types::ToolDeclaration>,
    ) -> Result<OpenUpstream, UpstreamError> {
        let deps = self.deps;
        let source = match provider {
            Provider::Primary => &deps.primary_credentials,
            Provider::Secondary => &deps.secondary_credentials,
        };

        // Acquisition expiry counts as a handshake-class failure.
        let budget = self.settings.credential_timeout;
        let credential = tokio::time::timeout(budget, source.credential())
            .await
            .map_err(|_| UpstreamError::Timeout(budget.as_millis() as u64))??;

        let mut link = deps.connector.connect(provider, &credential).await?;
        drop(credential);

        let adapter = adapter_for(provider);
        let config = SessionConfig::new(self.settings.model_for(provider), persona, tools);
        let setup = adapter.build_setup(&config);

        if let Err(e) = link.sink.send(Frame::Text(setup.to_string())).await {
            // Close the half-open socket before any other provider is tried.
            let _ = link.sink.close().await;
            return Err(UpstreamError::Handshake(format!("failed to send setup: {e}")));
        }

        self.transition(SessionState::Open(link.kind));
        Ok(OpenUpstream { link, adapter })
    }
}
