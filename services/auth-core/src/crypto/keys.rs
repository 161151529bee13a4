//! Ed25519 signing and AES-256-GCM sealing keys.

use super::envelope::{pre_auth_encode, Protection, TokenPurpose};
use crate::error::ConfigError;
use crate::token::TokenError;
use aes_gcm::aead::{Aead, KeyInit, Payload};
use aes_gcm::{Aes256Gcm, Nonce};
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use ring::rand::{SecureRandom, SystemRandom};
use ring::signature::{Ed25519KeyPair, KeyPair, UnparsedPublicKey, ED25519};
use secrecy::{ExposeSecret, SecretString};
use zeroize::Zeroizing;

const SIGNATURE_LEN: usize = 64;
const NONCE_LEN: usize = 12;
const TAG_LEN: usize = 16;

/// Freshly generated key material, base64 encoded for configuration.
pub struct GeneratedKeyMaterial {
    /// Ed25519 PKCS#8 document for `TOKEN_SIGNING_KEY`
    pub signing_key: Zeroizing<String>,
    /// AES-256 key for `TOKEN_ENCRYPTION_KEY`
    pub encryption_key: Zeroizing<String>,
    /// Ed25519 public key for resource servers
    pub public_key: String,
}

/// Key pair and symmetric key backing the versioned envelope.
pub struct TokenKeys {
    signing: Ed25519KeyPair,
    signing_pkcs8: Zeroizing<Vec<u8>>,
    encryption: Zeroizing<[u8; 32]>,
    rng: SystemRandom,
}

impl std::fmt::Debug for TokenKeys {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenKeys")
            .field("public_key", &STANDARD.encode(self.public_key()))
            .finish_non_exhaustive()
    }
}

impl TokenKeys {
    /// Generate a fresh key pair and AES key.
    ///
    /// # Errors
    ///
    /// Returns `TokenError::KeyUnavailable` if the platform RNG or Ed25519
    /// key generation fails.
    pub fn generate() -> Result<Self, TokenError> {
        let rng = SystemRandom::new();
        let pkcs8 = Ed25519KeyPair::generate_pkcs8(&rng)
            .map_err(|_| TokenError::KeyUnavailable("ed25519 key generation failed".into()))?;
        let mut encryption = Zeroizing::new([0u8; 32]);
        rng.fill(&mut encryption[..])
            .map_err(|_| TokenError::KeyUnavailable("random source unavailable".into()))?;
        Self::from_parts(Zeroizing::new(pkcs8.as_ref().to_vec()), encryption)
            .map_err(|e| TokenError::KeyUnavailable(e.to_string()))
    }

    /// Build keys from base64 configuration values.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::Invalid` naming the offending variable.
    pub fn from_config(signing: &SecretString, encryption: &SecretString) -> Result<Self, ConfigError> {
        let pkcs8 = decode_signing_key(signing)?;
        let encryption = decode_encryption_key(encryption)?;
        Self::from_parts(pkcs8, encryption)
    }

    /// Build keys from a configured signing key and a generated AES key, or
    /// the other way round.
    ///
    /// # Errors
    ///
    /// Configuration errors for the configured half; key unavailability for
    /// the generated half is reported the same way so startup fails loudly.
    pub fn from_partial(
        signing: Option<&SecretString>,
        encryption: Option<&SecretString>,
    ) -> Result<Self, ConfigError> {
        let generated = Self::generate().map_err(|e| ConfigError::KeyUnavailable(e.to_string()))?;
        let pkcs8 = match signing {
            Some(value) => decode_signing_key(value)?,
            None => generated.signing_pkcs8.clone(),
        };
        let encryption = match encryption {
            Some(value) => decode_encryption_key(value)?,
            None => generated.encryption.clone(),
        };
        Self::from_parts(pkcs8, encryption)
    }

    fn from_parts(
        signing_pkcs8: Zeroizing<Vec<u8>>,
        encryption: Zeroizing<[u8; 32]>,
    ) -> Result<Self, ConfigError> {
        let signing = Ed25519KeyPair::from_pkcs8(&signing_pkcs8).map_err(|e| {
            ConfigError::invalid("TOKEN_SIGNING_KEY", format!("not an Ed25519 PKCS#8 document: {e}"))
        })?;
        Ok(Self {
            signing,
            signing_pkcs8,
            encryption,
            rng: SystemRandom::new(),
        })
    }

    /// Export the key material in configuration format.
    #[must_use]
    pub fn export(&self) -> GeneratedKeyMaterial {
        GeneratedKeyMaterial {
            signing_key: Zeroizing::new(STANDARD.encode(self.signing_pkcs8.as_slice())),
            encryption_key: Zeroizing::new(STANDARD.encode(self.encryption.as_slice())),
            public_key: STANDARD.encode(self.public_key()),
        }
    }

    /// Raw Ed25519 public key.
    #[must_use]
    pub fn public_key(&self) -> &[u8] {
        self.signing.public_key().as_ref()
    }

    /// Sign or encrypt `payload` into a versioned envelope.
    ///
    /// # Errors
    ///
    /// Returns `TokenError::KeyUnavailable` if the RNG or cipher fails.
    pub fn seal(&self, purpose: TokenPurpose, payload: &[u8]) -> Result<String, TokenError> {
        let footer = purpose.footer().as_bytes();
        let body = match purpose.protection() {
            Protection::Public => {
                let header = Protection::Public.header().as_bytes();
                let signature = self.signing.sign(&pre_auth_encode(&[header, payload, footer]));
                let mut body = Vec::with_capacity(payload.len() + SIGNATURE_LEN);
                body.extend_from_slice(payload);
                body.extend_from_slice(signature.as_ref());
                body
            }
            Protection::Local => {
                let header = Protection::Local.header().as_bytes();
                let mut nonce = [0u8; NONCE_LEN];
                self.rng
                    .fill(&mut nonce)
                    .map_err(|_| TokenError::KeyUnavailable("random source unavailable".into()))?;
                let aad = pre_auth_encode(&[header, &nonce, footer]);
                let ciphertext = self
                    .cipher()?
                    .encrypt(Nonce::from_slice(&nonce), Payload { msg: payload, aad: &aad })
                    .map_err(|_| TokenError::KeyUnavailable("encryption failed".into()))?;
                let mut body = Vec::with_capacity(NONCE_LEN + ciphertext.len());
                body.extend_from_slice(&nonce);
                body.extend_from_slice(&ciphertext);
                body
            }
        };
        Ok(super::envelope::join(purpose, &body))
    }

    /// Authenticate an envelope and return its purpose and payload.
    ///
    /// # Errors
    ///
    /// Returns `TokenError::Malformed` for any framing, signature or
    /// decryption failure, or a header inconsistent with the footer purpose.
    pub fn open(&self, token: &str) -> Result<(TokenPurpose, Vec<u8>), TokenError> {
        let raw = super::envelope::split(token)?;
        if raw.protection != raw.purpose.protection() {
            return Err(TokenError::malformed("header does not match purpose"));
        }
        let footer = raw.purpose.footer().as_bytes();

        let payload = match raw.protection {
            Protection::Public => {
                if raw.body.len() <= SIGNATURE_LEN {
                    return Err(TokenError::malformed("body too short"));
                }
                let (payload, signature) = raw.body.split_at(raw.body.len() - SIGNATURE_LEN);
                let message =
                    pre_auth_encode(&[Protection::Public.header().as_bytes(), payload, footer]);
                UnparsedPublicKey::new(&ED25519, self.public_key())
                    .verify(&message, signature)
                    .map_err(|_| TokenError::malformed("signature verification failed"))?;
                payload.to_vec()
            }
            Protection::Local => {
                if raw.body.len() < NONCE_LEN + TAG_LEN {
                    return Err(TokenError::malformed("body too short"));
                }
                let (nonce, ciphertext) = raw.body.split_at(NONCE_LEN);
                let aad = pre_auth_encode(&[Protection::Local.header().as_bytes(), nonce, footer]);
                self.cipher()?
                    .decrypt(Nonce::from_slice(nonce), Payload { msg: ciphertext, aad: &aad })
                    .map_err(|_| TokenError::malformed("decryption failed"))?
            }
        };
        Ok((raw.purpose, payload))
    }

    /// Sign/verify and encrypt/decrypt a probe value.
    ///
    /// # Errors
    ///
    /// Returns `TokenError::KeyUnavailable` if either primitive misbehaves.
    pub fn self_test(&self) -> Result<(), TokenError> {
        let probe = b"auth-core self-test";
        for purpose in [TokenPurpose::Access, TokenPurpose::Refresh] {
            let token = self.seal(purpose, probe)?;
            match self.open(&token) {
                Ok((opened, payload)) if opened == purpose && payload == probe => {}
                _ => {
                    return Err(TokenError::KeyUnavailable(format!(
                        "{purpose} self-test failed"
                    )))
                }
            }
        }
        Ok(())
    }

    fn cipher(&self) -> Result<Aes256Gcm, TokenError> {
        Aes256Gcm::new_from_slice(self.encryption.as_slice())
            .map_err(|_| TokenError::KeyUnavailable("invalid AES key length".into()))
    }
}

fn decode_signing_key(value: &SecretString) -> Result<Zeroizing<Vec<u8>>, ConfigError> {
    STANDARD
        .decode(value.expose_secret().trim())
        .map(Zeroizing::new)
        .map_err(|e| ConfigError::invalid("TOKEN_SIGNING_KEY", format!("not base64: {e}")))
}

fn decode_encryption_key(value: &SecretString) -> Result<Zeroizing<[u8; 32]>, ConfigError> {
    let bytes = Zeroizing::new(
        STANDARD
            .decode(value.expose_secret().trim())
            .map_err(|e| ConfigError::invalid("TOKEN_ENCRYPTION_KEY", format!("not base64: {e}")))?,
    );
    if bytes.len() != 32 {
        return Err(ConfigError::invalid(
            "TOKEN_ENCRYPTION_KEY",
            format!("must be 32 bytes, got {}", bytes.len()),
        ));
    }
    let mut key = Zeroizing::new([0u8; 32]);
    key.copy_from_slice(&bytes);
    Ok(key)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generated_keys_pass_self_test() {
        let keys = TokenKeys::generate().unwrap();
        keys.self_test().unwrap();
    }

    #[test]
    fn test_public_payload_is_readable_and_local_is_not() {
        let keys = TokenKeys::generate().unwrap();
        let payload = br#"{"sub":"visible@example.com"}"#;

        let public = keys.seal(TokenPurpose::Access, payload).unwrap();
        let local = keys.seal(TokenPurpose::Refresh, payload).unwrap();

        let public_body = super::super::envelope::split(&public).unwrap().body;
        let local_body = super::super::envelope::split(&local).unwrap().body;
        assert!(public_body.windows(payload.len()).any(|w| w == payload));
        assert!(!local_body.windows(payload.len()).any(|w| w == payload));
    }

    #[test]
    fn test_other_keys_cannot_open() {
        let a = TokenKeys::generate().unwrap();
        let b = TokenKeys::generate().unwrap();

        for purpose in [TokenPurpose::Access, TokenPurpose::Refresh, TokenPurpose::Proof] {
            let token = a.seal(purpose, b"{}").unwrap();
            assert!(matches!(b.open(&token), Err(TokenError::Malformed(_))));
        }
    }

    #[test]
    fn test_relabelled_footer_rejected() {
        let keys = TokenKeys::generate().unwrap();
        let token = keys.seal(TokenPurpose::Access, b"{}").unwrap();
        let (prefix, _) = token.rsplit_once('.').unwrap();
        let forged = format!(
            "{prefix}.{}",
            base64::engine::general_purpose::URL_SAFE_NO_PAD.encode("dpop_token")
        );
        assert!(matches!(keys.open(&forged), Err(TokenError::Malformed(_))));
    }

    #[test]
    fn test_export_then_configure() {
        let keys = TokenKeys::generate().unwrap();
        let material = keys.export();
        let restored = TokenKeys::from_config(
            &SecretString::from(material.signing_key.to_string()),
            &SecretString::from(material.encryption_key.to_string()),
        )
        .unwrap();

        let token = keys.seal(TokenPurpose::Refresh, b"payload").unwrap();
        assert_eq!(restored.open(&token).unwrap().1, b"payload");
        assert_eq!(restored.public_key(), keys.public_key());
    }

    #[test]
    fn test_invalid_configured_key_is_config_error() {
        let err = TokenKeys::from_config(
            &SecretString::from("bm90LWEta2V5".to_string()),
            &SecretString::from(STANDARD.encode([7u8; 32])),
        )
        .unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { name: "TOKEN_SIGNING_KEY", .. }));

        let keys = TokenKeys::generate().unwrap().export();
        let err = TokenKeys::from_config(
            &SecretString::from(keys.signing_key.to_string()),
            &SecretString::from(STANDARD.encode([7u8; 16])),
        )
        .unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { name: "TOKEN_ENCRYPTION_KEY", .. }));
    }
}
