//! Access, refresh and proof token issuance and verification.

mod claims;
mod error;
mod service;

pub use crate::crypto::TokenPurpose;
pub use claims::{
    remaining_lifetime, AccessTokenClaims, RefreshTokenClaims, TokenIdentity, TokenKind,
    TokenSubject, TypedClaims,
};
pub use error::TokenError;
pub use service::{IssuedPair, TokenService};
