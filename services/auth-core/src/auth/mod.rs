//! Authentication orchestration over tokens, proofs, revocation and
//! federation, plus the principal and audit seams it consumes.

mod audit;
mod models;
pub mod password;
mod principal;
mod orchestrator;

pub use audit::{AuditAction, AuditError, AuditEvent, AuditSink, TracingAuditSink, AUDIT_TIMEOUT};
pub use models::{RegisterRequest, TokenResponse, TOKEN_TYPE_DPOP};
pub use orchestrator::{AuthOrchestrator, VerifiedToken, DPOP_SCHEME};
pub use principal::{
    AuthMethod, MemoryPrincipalRepository, Principal, PrincipalRepository, PrincipalView,
    RepositoryError, DEFAULT_ROLE,
};
