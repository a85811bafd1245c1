//! The credential strategy capability and the pre-shared key strategy.

use crate::error::CredentialError;
use crate::token::CredentialToken;
use async_trait::async_trait;
use cadence_types::RuntimeMode;

/// One way of obtaining an upstream credential.
///
/// Strategies are tried in sequence by [`crate::CredentialChain`]; each one is
/// independently testable.
#[async_trait]
pub trait CredentialStrategy: Send + Sync {
    /// Stable name used in logs and aggregated failures.
    fn name(&self) -> &'static str;

    /// Attempts to acquire a credential covering `scopes`.
    async fn acquire(&self, scopes: &[String]) -> Result<CredentialToken, CredentialError>;
}

/// Returns `detail` in development and a fixed placeholder in production.
///
/// Token endpoint bodies and key file paths are useful while wiring up a
/// deployment but must not reach production logs or client-visible errors.
pub fn diagnostic(mode: RuntimeMode, detail: impl Into<String>) -> String {
    if mode.is_production() {
        "details withheld in production".to_string()
    } else {
        detail.into()
    }
}

/// Uses a configured pre-shared key.
#[derive(Clone)]
pub struct PreSharedKey {
    key: Option<String>,
}

impl PreSharedKey {
    pub const NAME: &'static str = "pre_shared_key";

    pub fn new(key: Option<String>) -> Self {
        Self {
            key: key.filter(|k| !k.trim().is_empty()),
        }
    }

    pub fn is_configured(&self) -> bool {
        self.key.is_some()
    }
}

impl std::fmt::Debug for PreSharedKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PreSharedKey")
            .field("configured", &self.key.is_some())
            .finish()
    }
}

#[async_trait]
impl CredentialStrategy for PreSharedKey {
    fn name(&self) -> &'static str {
        Self::NAME
    }

    async fn acquire(&self, _scopes: &[String]) -> Result<CredentialToken, CredentialError> {
        self.key
            .as_ref()
            .map(|key| CredentialToken::api_key(key.clone(), Self::NAME))
            .ok_or_else(|| CredentialError::Missing("pre-shared key is not set".to_string()))
    }
}
