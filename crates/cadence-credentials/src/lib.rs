//! Upstream credential acquisition for the Cadence relay.
//!
//! The primary provider accepts either a delegated-identity access token or
//! a pre-shared key. Acquisition is modelled as an ordered list of
//! [`CredentialStrategy`] implementations tried in sequence by a
//! [`CredentialChain`]:
//!
//! - [`PreSharedKey`]: a configured static key
//! - [`MetadataServerIdentity`]: the hosting environment's identity endpoint
//! - [`ServiceAccountAssertion`]: a locally signed JWT bearer exchange
//!
//! The secondary provider has exactly one strategy, exposed as
//! [`SecondaryKeyProvider`]. Both sides implement [`CredentialSource`], which
//! is what the relay's failover controller consumes.
//!
//! # Diagnostics
//!
//! Strategies receive the [`cadence_types::RuntimeMode`]. In production they
//! never log key file paths or token endpoint bodies, and the reasons they
//! return are scrubbed of both.

pub mod assertion;
pub mod chain;
pub mod error;
pub mod metadata;
pub mod strategy;
pub mod token;

pub use assertion::{AssertionClaims, ServiceAccountAssertion};
pub use chain::{CredentialChain, CredentialSource, PrimaryCredentialConfig, SecondaryKeyProvider};
pub use error::{CredentialError, StrategyFailure};
pub use metadata::{MetadataServerIdentity, DEFAULT_METADATA_HOST};
pub use strategy::{CredentialStrategy, PreSharedKey};
pub use token::{CredentialKind, CredentialToken};
