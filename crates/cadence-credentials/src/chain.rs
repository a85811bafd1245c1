//! Ordered strategy chains and the two provider credential sources.

use crate::assertion::ServiceAccountAssertion;
use crate::error::{CredentialError, StrategyFailure};
use crate::metadata::MetadataServerIdentity;
use crate::strategy::{CredentialStrategy, PreSharedKey};
use crate::token::{CredentialKind, CredentialToken};
use async_trait::async_trait;
use cadence_types::RuntimeMode;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Mutex;

/// Cached access tokens are dropped this long before they expire.
const CACHE_EXPIRY_SKEW_SECS: i64 = 60;

/// Anything that can hand the upstream connector a credential.
#[async_trait]
pub trait CredentialSource: Send + Sync {
    async fn credential(&self) -> Result<CredentialToken, CredentialError>;
}

/// Flags and material that decide the primary provider's strategy order.
#[derive(Clone)]
pub struct PrimaryCredentialConfig {
    pub api_key: Option<String>,
    pub force_api_key: bool,
    pub disable_oauth: bool,
    pub scopes: Vec<String>,
    pub service_account_path: Option<PathBuf>,
    pub metadata_host: String,
    pub mode: RuntimeMode,
}

impl std::fmt::Debug for PrimaryCredentialConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PrimaryCredentialConfig")
            .field("api_key", &self.api_key.as_ref().map(|_| "[REDACTED]"))
            .field("force_api_key", &self.force_api_key)
            .field("disable_oauth", &self.disable_oauth)
            .field("scopes", &self.scopes)
            .field("service_account_path", &self.service_account_path)
            .field("metadata_host", &self.metadata_host)
            .field("mode", &self.mode)
            .finish()
    }
}

/// Strategies tried in sequence until one yields a credential.
pub struct CredentialChain {
    label: &'static str,
    strategies: Vec<Box<dyn CredentialStrategy>>,
    scopes: Vec<String>,
    mode: RuntimeMode,
    // Uses `std::sync::Mutex`: lookups and inserts never span an await.
    cache: Mutex<HashMap<String, CredentialToken>>,
}

impl CredentialChain {
    pub fn new(
        label: &'static str,
        strategies: Vec<Box<dyn CredentialStrategy>>,
        scopes: Vec<String>,
        mode: RuntimeMode,
    ) -> Self {
        Self {
            label,
            strategies,
            scopes,
            mode,
            cache: Mutex::new(HashMap::new()),
        }
    }

    /// Builds the primary provider's chain from its configuration flags.
    ///
    /// 1. `disable_oauth`: the pre-shared key only; absence is a hard failure.
    /// 2. `force_api_key` with a key present: the key first, then delegated
    ///    identity and the signed assertion.
    /// 3. Otherwise delegated identity, the signed assertion, and the key as
    ///    a last resort when one is configured.
    pub fn primary(config: PrimaryCredentialConfig) -> Self {
        let key = PreSharedKey::new(config.api_key.clone());
        let delegated = || -> Vec<Box<dyn CredentialStrategy>> {
            vec![
                Box::new(MetadataServerIdentity::new(&config.metadata_host, config.mode)),
                Box::new(ServiceAccountAssertion::new(
                    config.service_account_path.clone(),
                    config.mode,
                )),
            ]
        };

        let strategies: Vec<Box<dyn CredentialStrategy>> = if config.disable_oauth {
            vec![Box::new(key)]
        } else if config.force_api_key && key.is_configured() {
            let mut strategies: Vec<Box<dyn CredentialStrategy>> = vec![Box::new(key)];
            strategies.extend(delegated());
            strategies
        } else {
            let mut strategies = delegated();
            if key.is_configured() {
                strategies.push(Box::new(key));
            }
            strategies
        };

        Self::new("primary", strategies, config.scopes, config.mode)
    }

    /// Names of the configured strategies, in the order they are tried.
    pub fn strategy_names(&self) -> Vec<&'static str> {
        self.strategies.iter().map(|s| s.name()).collect()
    }

    fn cache_key(&self) -> String {
        let mut scopes = self.scopes.clone();
        scopes.sort();
        scopes.dedup();
        format!("{}|{}", self.label, scopes.join(" "))
    }

    fn cached(&self, key: &str) -> Option<CredentialToken> {
        let mut cache = match self.cache.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        match cache.get(key) {
            Some(token)
                if !token.expires_within(chrono::Duration::seconds(CACHE_EXPIRY_SKEW_SECS)) =>
            {
                Some(token.clone())
            }
            Some(_) => {
                cache.remove(key);
                None
            }
            None => None,
        }
    }

    fn remember(&self, key: String, token: &CredentialToken) {
        // Keys have no expiry and are cheap to re-read; only cache exchanges.
        if token.kind() != CredentialKind::AccessToken || token.expires_at().is_none() {
            return;
        }
        let mut cache = match self.cache.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        cache.insert(key, token.clone());
    }

    /// Runs the strategies in order.
    ///
    /// # Errors
    ///
    /// Returns [`CredentialError::Exhausted`] listing every attempt when no
    /// strategy succeeds.
    pub async fn acquire(&self) -> Result<CredentialToken, CredentialError> {
        let cache_key = self.cache_key();
        if let Some(token) = self.cached(&cache_key) {
            tracing::debug!(provider = self.label, source = token.source(), "using cached credential");
            return Ok(token);
        }

        let mut attempts = Vec::with_capacity(self.strategies.len());
        for strategy in &self.strategies {
            match strategy.acquire(&self.scopes).await {
                Ok(token) => {
                    tracing::info!(
                        provider = self.label,
                        strategy = strategy.name(),
                        "acquired upstream credential"
                    );
                    self.remember(cache_key, &token);
                    return Ok(token);
                }
                Err(e) => {
                    if self.mode.is_production() {
                        tracing::warn!(
                            provider = self.label,
                            strategy = strategy.name(),
                            "credential strategy failed"
                        );
                    } else {
                        tracing::warn!(
                            provider = self.label,
                            strategy = strategy.name(),
                            error = %e,
                            "credential strategy failed"
                        );
                    }
                    attempts.push(StrategyFailure {
                        strategy: strategy.name(),
                        reason: e.to_string(),
                    });
                }
            }
        }

        Err(CredentialError::Exhausted { attempts })
    }
}

#[async_trait]
impl CredentialSource for CredentialChain {
    async fn credential(&self) -> Result<CredentialToken, CredentialError> {
        self.acquire().await
    }
}

/// The secondary provider's single strategy: its pre-shared key.
#[derive(Debug, Clone)]
pub struct SecondaryKeyProvider {
    key: PreSharedKey,
}

impl SecondaryKeyProvider {
    pub fn new(key: Option<String>) -> Self {
        Self {
            key: PreSharedKey::new(key),
        }
    }
}

#[async_trait]
impl CredentialSource for SecondaryKeyProvider {
    async fn credential(&self) -> Result<CredentialToken, CredentialError> {
        self.key.acquire(&[]).await
    }
}
