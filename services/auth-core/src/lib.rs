//! Authentication core.
//!
//! Issues versioned access and refresh tokens, binds access tokens to
//! requests through proof-of-possession, keeps revocation and replay state
//! in a shared TTL store, and federates login with OAuth providers. The
//! [`auth::AuthOrchestrator`] composes these into the session lifecycle.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod app;
pub mod auth;
pub mod config;
pub mod crypto;
pub mod dpop;
pub mod error;
pub mod federation;
pub mod metrics;
pub mod store;
pub mod token;

// Re-exports for convenience
pub use app::AuthCore;
pub use auth::{AuthOrchestrator, TokenResponse, VerifiedToken};
pub use config::Config;
pub use crypto::KeyStrategy;
pub use dpop::ProofOfPossessionService;
pub use error::{AuthError, ConfigError, ErrorKind};
pub use federation::IdentityFederationService;
pub use store::{RevocationRegistry, RevocationStore};
pub use token::{TokenKind, TokenService};
