//! Proof-of-possession binding for access tokens.

pub mod proof;
pub mod validator;

pub use proof::{compute_ath, NonceChallenge, ProofClaims, ProofError, VerifiedProof};
pub use validator::ProofOfPossessionService;
