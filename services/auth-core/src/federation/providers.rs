//! Built-in OAuth providers and their user-info field mappings.
//!
//! Each field lists JSON pointers tried in order; the first present value
//! wins. Adding a provider is a table entry, not new code.

use super::{FederatedIdentity, FederationError};
use serde_json::Value;

/// Where each identity field lives in a provider's user-info document.
#[derive(Debug, Clone, Copy)]
pub struct FieldMapping {
    /// Stable provider-side id
    pub id: &'static [&'static str],
    /// Email address
    pub email: &'static [&'static str],
    /// Display name
    pub name: &'static [&'static str],
    /// Avatar URL
    pub picture: &'static [&'static str],
    /// Email verification flag
    pub verified_email: &'static [&'static str],
    /// Verification assumed when the flag is absent
    pub verified_default: bool,
}

/// Endpoints, scopes and field mapping of a provider.
#[derive(Debug, Clone, Copy)]
pub struct ProviderSpec {
    /// Lowercase provider name
    pub name: &'static str,
    /// Authorization endpoint
    pub authorize_url: &'static str,
    /// Token endpoint
    pub token_url: &'static str,
    /// User-info endpoint
    pub userinfo_url: &'static str,
    /// Scopes requested at authorization
    pub scopes: &'static [&'static str],
    /// Whether the token request must repeat the state
    pub state_in_token_request: bool,
    /// User-info field mapping
    pub fields: FieldMapping,
}

/// Providers known to the core.
pub const BUILTIN_PROVIDERS: &[ProviderSpec] = &[
    ProviderSpec {
        name: "google",
        authorize_url: "https://accounts.google.com/o/oauth2/v2/auth",
        token_url: "https://oauth2.googleapis.com/token",
        userinfo_url: "https://openidconnect.googleapis.com/v1/userinfo",
        scopes: &["openid", "email", "profile"],
        state_in_token_request: false,
        fields: FieldMapping {
            id: &["/sub", "/id"],
            email: &["/email"],
            name: &["/name"],
            picture: &["/picture"],
            verified_email: &["/email_verified", "/verified_email"],
            verified_default: false,
        },
    },
    ProviderSpec {
        name: "github",
        authorize_url: "https://github.com/login/oauth/authorize",
        token_url: "https://github.com/login/oauth/access_token",
        userinfo_url: "https://api.github.com/user",
        scopes: &["read:user", "user:email"],
        state_in_token_request: false,
        fields: FieldMapping {
            id: &["/id"],
            email: &["/email"],
            name: &["/name", "/login"],
            picture: &["/avatar_url"],
            verified_email: &[],
            verified_default: false,
        },
    },
    ProviderSpec {
        name: "facebook",
        authorize_url: "https://www.facebook.com/v18.0/dialog/oauth",
        token_url: "https://graph.facebook.com/v18.0/oauth/access_token",
        userinfo_url: "https://graph.facebook.com/me?fields=id,name,email,picture",
        scopes: &["email", "public_profile"],
        state_in_token_request: false,
        fields: FieldMapping {
            id: &["/id"],
            email: &["/email"],
            name: &["/name"],
            picture: &["/picture/data/url"],
            verified_email: &[],
            verified_default: true,
        },
    },
    ProviderSpec {
        name: "kakao",
        authorize_url: "https://kauth.kakao.com/oauth/authorize",
        token_url: "https://kauth.kakao.com/oauth/token",
        userinfo_url: "https://kapi.kakao.com/v2/user/me",
        scopes: &["profile_nickname", "profile_image", "account_email"],
        state_in_token_request: false,
        fields: FieldMapping {
            id: &["/id"],
            email: &["/kakao_account/email"],
            name: &["/kakao_account/profile/nickname", "/properties/nickname"],
            picture: &[
                "/kakao_account/profile/profile_image_url",
                "/properties/profile_image",
            ],
            verified_email: &["/kakao_account/is_email_verified"],
            verified_default: false,
        },
    },
    ProviderSpec {
        name: "naver",
        authorize_url: "https://nid.naver.com/oauth2.0/authorize",
        token_url: "https://nid.naver.com/oauth2.0/token",
        userinfo_url: "https://openapi.naver.com/v1/nid/me",
        scopes: &[],
        state_in_token_request: true,
        fields: FieldMapping {
            id: &["/response/id"],
            email: &["/response/email"],
            name: &["/response/name", "/response/nickname"],
            picture: &["/response/profile_image"],
            verified_email: &[],
            verified_default: true,
        },
    },
];

/// Look up a built-in provider by name (case-insensitive).
#[must_use]
pub fn builtin(name: &str) -> Option<&'static ProviderSpec> {
    BUILTIN_PROVIDERS
        .iter()
        .find(|spec| spec.name.eq_ignore_ascii_case(name))
}

impl FieldMapping {
    /// Map a raw user-info document to a federated identity.
    ///
    /// # Errors
    ///
    /// Returns `FederationError::ProviderUserInfoFailed` when no id is
    /// present.
    pub fn normalize(&self, provider: &str, raw: &Value) -> Result<FederatedIdentity, FederationError> {
        let provider_id = first_string(raw, self.id).ok_or_else(|| FederationError::ProviderUserInfoFailed {
            provider: provider.to_string(),
            reason: "user info has no subject identifier".to_string(),
        })?;

        Ok(FederatedIdentity {
            provider: provider.to_string(),
            provider_id,
            email: first_string(raw, self.email).map(|e| e.to_lowercase()),
            name: first_string(raw, self.name),
            picture: first_string(raw, self.picture),
            verified_email: first_bool(raw, self.verified_email).unwrap_or(self.verified_default),
        })
    }
}

fn first_string(raw: &Value, pointers: &[&str]) -> Option<String> {
    pointers.iter().find_map(|pointer| match raw.pointer(pointer)? {
        Value::String(s) if !s.is_empty() => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    })
}

fn first_bool(raw: &Value, pointers: &[&str]) -> Option<bool> {
    pointers.iter().find_map(|pointer| match raw.pointer(pointer)? {
        Value::Bool(b) => Some(*b),
        Value::String(s) => s.parse().ok(),
        _ => None,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn normalize(provider: &str, raw: &Value) -> FederatedIdentity {
        builtin(provider).unwrap().fields.normalize(provider, raw).unwrap()
    }

    #[test]
    fn test_google() {
        let identity = normalize(
            "google",
            &json!({
                "sub": "1098",
                "email": "User@Example.com",
                "email_verified": true,
                "name": "Test User",
                "picture": "https://lh3.example/p.jpg"
            }),
        );
        assert_eq!(identity.provider_id, "1098");
        assert_eq!(identity.email.as_deref(), Some("user@example.com"));
        assert!(identity.verified_email);
        assert_eq!(identity.picture.as_deref(), Some("https://lh3.example/p.jpg"));
    }

    #[test]
    fn test_github_numeric_id_and_login_fallback() {
        let identity = normalize(
            "github",
            &json!({"id": 583231, "login": "octocat", "name": null, "email": "octo@github.com", "avatar_url": "https://a/1"}),
        );
        assert_eq!(identity.provider_id, "583231");
        assert_eq!(identity.name.as_deref(), Some("octocat"));
        assert!(!identity.verified_email);
    }

    #[test]
    fn test_facebook_nested_picture() {
        let identity = normalize(
            "facebook",
            &json!({"id": "10", "name": "F", "email": "f@x.com", "picture": {"data": {"url": "https://fb/p"}}}),
        );
        assert_eq!(identity.picture.as_deref(), Some("https://fb/p"));
        assert!(identity.verified_email);
    }

    #[test]
    fn test_kakao() {
        let identity = normalize(
            "kakao",
            &json!({
                "id": 123456789,
                "kakao_account": {
                    "email": "k@kakao.com",
                    "is_email_verified": true,
                    "profile": {"nickname": "kim", "profile_image_url": "https://k/p.png"}
                }
            }),
        );
        assert_eq!(identity.provider_id, "123456789");
        assert_eq!(identity.name.as_deref(), Some("kim"));
        assert_eq!(identity.picture.as_deref(), Some("https://k/p.png"));
        assert!(identity.verified_email);
    }

    #[test]
    fn test_naver() {
        let identity = normalize(
            "naver",
            &json!({
                "resultcode": "00",
                "response": {"id": "abc", "email": "n@naver.com", "name": "Lee", "profile_image": "https://n/p"}
            }),
        );
        assert_eq!(identity.provider_id, "abc");
        assert_eq!(identity.email.as_deref(), Some("n@naver.com"));
        assert!(identity.verified_email);
    }

    #[test]
    fn test_missing_id_rejected() {
        let result = builtin("google").unwrap().fields.normalize("google", &json!({"email": "a@b.c"}));
        assert!(matches!(result, Err(FederationError::ProviderUserInfoFailed { .. })));
    }

    #[test]
    fn test_lookup_is_case_insensitive() {
        assert_eq!(builtin("GitHub").map(|s| s.name), Some("github"));
        assert!(builtin("myspace").is_none());
    }
}
