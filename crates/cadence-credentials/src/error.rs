//! Error types for credential acquisition.

use std::fmt;

/// One failed strategy attempt inside an aggregated failure.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StrategyFailure {
    pub strategy: &'static str,
    pub reason: String,
}

impl fmt::Display for StrategyFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.strategy, self.reason)
    }
}

/// Errors that can occur while acquiring an upstream credential.
#[derive(Debug, thiserror::Error)]
pub enum CredentialError {
    /// A required pre-shared key is not configured.
    #[error("credential not configured: {0}")]
    Missing(String),

    /// The strategy's credential source could not be reached or produced
    /// nothing usable.
    #[error("credential source unavailable: {0}")]
    Unavailable(String),

    /// The token endpoint answered but refused or returned an unusable body.
    #[error("token endpoint rejected the exchange: {0}")]
    Rejected(String),

    /// Building or signing the assertion failed.
    #[error("failed to sign assertion: {0}")]
    Signing(String),

    /// Every configured strategy failed.
    #[error("all credential strategies failed ({})", format_attempts(.attempts))]
    Exhausted { attempts: Vec<StrategyFailure> },
}

impl CredentialError {
    /// Names of the strategies that were attempted, in order.
    pub fn attempted_strategies(&self) -> Vec<&'static str> {
        match self {
            Self::Exhausted { attempts } => attempts.iter().map(|a| a.strategy).collect(),
            _ => Vec::new(),
        }
    }
}

fn format_attempts(attempts: &[StrategyFailure]) -> String {
    if attempts.is_empty() {
        return "no strategies configured".to_string();
    }
    attempts
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exhausted_lists_every_attempt() {
        let err = CredentialError::Exhausted {
            attempts: vec![
                StrategyFailure {
                    strategy: "metadata_server",
                    reason: "unreachable".to_string(),
                },
                StrategyFailure {
                    strategy: "service_account_assertion",
                    reason: "no key file".to_string(),
                },
            ],
        };
        let text = err.to_string();
        assert!(text.contains("metadata_server: unreachable"));
        assert!(text.contains("service_account_assertion: no key file"));
        assert_eq!(
            err.attempted_strategies(),
            vec!["metadata_server", "service_account_assertion"]
        );
    }

    #[test]
    fn exhausted_without_attempts() {
        let err = CredentialError::Exhausted { attempts: vec![] };
        assert!(err.to_string().contains("no strategies configured"));
    }
}
