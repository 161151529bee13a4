//! Versioned token envelope framing.
//!
//! ```text
//! v1.public.<b64url(payload || ed25519 sig)>.<b64url(footer)>
//! v1.local.<b64url(nonce || aes-256-gcm ciphertext)>.<b64url(footer)>
//! ```
//!
//! The footer names the token purpose. It is authenticated by the signature
//! (public) or bound as associated data (local), so a token cannot be
//! relabelled.

use crate::token::TokenError;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;

/// Envelope version prefix.
pub const VERSION: &str = "v1";

/// What a token is for. Carried in the footer (or JOSE `typ` in fallback
/// mode) and checked before any claim is trusted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TokenPurpose {
    /// Access token, signed
    Access,
    /// Refresh token, encrypted
    Refresh,
    /// Proof-of-possession token, signed
    Proof,
}

impl TokenPurpose {
    /// Fixed footer value.
    #[must_use]
    pub const fn footer(self) -> &'static str {
        match self {
            Self::Access => "access_token",
            Self::Refresh => "refresh_token",
            Self::Proof => "dpop_token",
        }
    }

    /// Purpose named by a footer.
    #[must_use]
    pub fn from_footer(footer: &[u8]) -> Option<Self> {
        match footer {
            b"access_token" => Some(Self::Access),
            b"refresh_token" => Some(Self::Refresh),
            b"dpop_token" => Some(Self::Proof),
            _ => None,
        }
    }

    /// Protection applied to this purpose.
    #[must_use]
    pub const fn protection(self) -> Protection {
        match self {
            Self::Access | Self::Proof => Protection::Public,
            Self::Refresh => Protection::Local,
        }
    }
}

impl std::fmt::Display for TokenPurpose {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Self::Access => "access",
            Self::Refresh => "refresh",
            Self::Proof => "dpop",
        })
    }
}

/// Envelope protection mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Protection {
    /// Signed, payload readable
    Public,
    /// Authenticated encryption
    Local,
}

impl Protection {
    /// Header including the trailing dot.
    #[must_use]
    pub const fn header(self) -> &'static str {
        match self {
            Self::Public => "v1.public.",
            Self::Local => "v1.local.",
        }
    }
}

/// A split but not yet authenticated envelope.
#[derive(Debug)]
pub struct RawEnvelope {
    /// Protection named by the header
    pub protection: Protection,
    /// Purpose named by the footer
    pub purpose: TokenPurpose,
    /// Decoded body (payload and signature, or nonce and ciphertext)
    pub body: Vec<u8>,
}

/// Whether `token` looks like a versioned envelope rather than a JWT.
#[must_use]
pub fn is_envelope(token: &str) -> bool {
    token.starts_with("v1.")
}

/// Split and decode an envelope.
///
/// # Errors
///
/// Returns `TokenError::Malformed` for an unknown header, wrong number of
/// segments, invalid base64 or an unknown footer.
pub fn split(token: &str) -> Result<RawEnvelope, TokenError> {
    let (protection, rest) = if let Some(rest) = token.strip_prefix(Protection::Public.header()) {
        (Protection::Public, rest)
    } else if let Some(rest) = token.strip_prefix(Protection::Local.header()) {
        (Protection::Local, rest)
    } else {
        return Err(TokenError::malformed("unknown envelope header"));
    };

    let mut segments = rest.split('.');
    let (Some(body), Some(footer), None) = (segments.next(), segments.next(), segments.next())
    else {
        return Err(TokenError::malformed("expected body and footer segments"));
    };

    let footer = URL_SAFE_NO_PAD.decode(footer)?;
    let purpose = TokenPurpose::from_footer(&footer)
        .ok_or_else(|| TokenError::malformed("unknown footer"))?;
    let body = URL_SAFE_NO_PAD.decode(body)?;

    Ok(RawEnvelope {
        protection,
        purpose,
        body,
    })
}

/// Assemble an envelope from its protected body.
#[must_use]
pub fn join(purpose: TokenPurpose, body: &[u8]) -> String {
    format!(
        "{}{}.{}",
        purpose.protection().header(),
        URL_SAFE_NO_PAD.encode(body),
        URL_SAFE_NO_PAD.encode(purpose.footer())
    )
}

/// Pre-authentication encoding: piece count then each piece, every length
/// as a little-endian u64.
#[must_use]
pub fn pre_auth_encode(pieces: &[&[u8]]) -> Vec<u8> {
    let total: usize = pieces.iter().map(|p| p.len() + 8).sum();
    let mut out = Vec::with_capacity(8 + total);
    out.extend_from_slice(&(pieces.len() as u64).to_le_bytes());
    for piece in pieces {
        out.extend_from_slice(&(piece.len() as u64).to_le_bytes());
        out.extend_from_slice(piece);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_join_then_split() {
        let token = join(TokenPurpose::Refresh, b"body-bytes");
        assert!(token.starts_with("v1.local."));

        let raw = split(&token).unwrap();
        assert_eq!(raw.protection, Protection::Local);
        assert_eq!(raw.purpose, TokenPurpose::Refresh);
        assert_eq!(raw.body, b"body-bytes");
    }

    #[test]
    fn test_split_rejects_garbage() {
        for token in [
            "",
            "v2.public.abc.def",
            "v1.public.abc",
            "v1.public.abc.def.ghi",
            "v1.public.!!!.YWNjZXNzX3Rva2Vu",
        ] {
            assert!(matches!(split(token), Err(TokenError::Malformed(_))), "{token}");
        }
    }

    #[test]
    fn test_split_rejects_unknown_footer() {
        let footer = URL_SAFE_NO_PAD.encode("id_token");
        let token = format!("v1.public.YWJj.{footer}");
        assert!(matches!(split(&token), Err(TokenError::Malformed(_))));
    }

    #[test]
    fn test_pre_auth_encoding_is_unambiguous() {
        let a = pre_auth_encode(&[b"ab", b"c"]);
        let b = pre_auth_encode(&[b"a", b"bc"]);
        assert_ne!(a, b);
        assert_eq!(&a[..8], &2u64.to_le_bytes());
    }

    #[test]
    fn test_footers_round_trip() {
        for purpose in [TokenPurpose::Access, TokenPurpose::Refresh, TokenPurpose::Proof] {
            assert_eq!(TokenPurpose::from_footer(purpose.footer().as_bytes()), Some(purpose));
        }
    }
}
