//! Secret protection for values stored under secret-marked keys.
//!
//! # Design
//! - `SecretProtector` is injected per source; the default passes values
//!   through unchanged.
//! - `AeadProtector` seals values with AES-256-GCM and a random nonce, so
//!   equal plaintexts produce different ciphertexts.

use std::fmt;

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;
use rand::Rng;
use ring::aead::{AES_256_GCM, Aad, LessSafeKey, NONCE_LEN, Nonce, UnboundKey};

use crate::error::{ConfigError, ConfigResult};

/// Length in bytes of an AES-256 key.
pub const SECRET_KEY_LEN: usize = 32;

/// Reversible protection applied to secret values.
pub trait SecretProtector: Send + Sync {
    /// Protect a plaintext value for storage.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Protection`] when the value cannot be protected.
    fn protect(&self, plaintext: &str) -> ConfigResult<String>;

    /// Recover the plaintext of a value produced by [`Self::protect`].
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Protection`] when the value cannot be recovered.
    fn unprotect(&self, protected: &str) -> ConfigResult<String>;
}

/// Identity protector used when none is configured.
#[derive(Debug, Clone, Copy, Default)]
pub struct PassthroughProtector;

impl SecretProtector for PassthroughProtector {
    fn protect(&self, plaintext: &str) -> ConfigResult<String> {
        Ok(plaintext.to_string())
    }

    fn unprotect(&self, protected: &str) -> ConfigResult<String> {
        Ok(protected.to_string())
    }
}

/// AES-256-GCM protector producing `base64(nonce || ciphertext || tag)`.
pub struct AeadProtector {
    key: LessSafeKey,
}

impl AeadProtector {
    /// Build a protector from raw key bytes.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::InvalidField`] unless the key is 32 bytes.
    pub fn from_key_bytes(bytes: &[u8]) -> ConfigResult<Self> {
        if bytes.len() != SECRET_KEY_LEN {
            return Err(ConfigError::InvalidField {
                field: "secret_key",
                reason: "must be 32 bytes",
                value: None,
            });
        }
        let unbound =
            UnboundKey::new(&AES_256_GCM, bytes).map_err(|_| ConfigError::InvalidField {
                field: "secret_key",
                reason: "rejected by cipher",
                value: None,
            })?;
        Ok(Self {
            key: LessSafeKey::new(unbound),
        })
    }

    /// Build a protector from a base64-encoded 32-byte key.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::InvalidField`] when the key is not valid base64
    /// or has the wrong length.
    pub fn from_base64_key(encoded: &str) -> ConfigResult<Self> {
        let bytes = STANDARD
            .decode(encoded.trim())
            .map_err(|_| ConfigError::InvalidField {
                field: "secret_key",
                reason: "must be base64 encoded",
                value: None,
            })?;
        Self::from_key_bytes(&bytes)
    }
}

impl fmt::Debug for AeadProtector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AeadProtector")
            .field("key", &"[REDACTED]")
            .finish()
    }
}

impl SecretProtector for AeadProtector {
    fn protect(&self, plaintext: &str) -> ConfigResult<String> {
        let mut nonce_bytes = [0u8; NONCE_LEN];
        rand::rng().fill(&mut nonce_bytes);

        let mut sealed = plaintext.as_bytes().to_vec();
        self.key
            .seal_in_place_append_tag(
                Nonce::assume_unique_for_key(nonce_bytes),
                Aad::empty(),
                &mut sealed,
            )
            .map_err(|_| ConfigError::Protection {
                operation: "protect",
                reason: "encryption failed",
            })?;

        let mut payload = Vec::with_capacity(NONCE_LEN + sealed.len());
        payload.extend_from_slice(&nonce_bytes);
        payload.extend_from_slice(&sealed);
        Ok(STANDARD.encode(payload))
    }

    fn unprotect(&self, protected: &str) -> ConfigResult<String> {
        let payload = STANDARD
            .decode(protected)
            .map_err(|_| ConfigError::Protection {
                operation: "unprotect",
                reason: "payload is not base64",
            })?;
        if payload.len() < NONCE_LEN + AES_256_GCM.tag_len() {
            return Err(ConfigError::Protection {
                operation: "unprotect",
                reason: "payload too short",
            });
        }

        let (nonce_part, sealed_part) = payload.split_at(NONCE_LEN);
        let mut nonce_bytes = [0u8; NONCE_LEN];
        nonce_bytes.copy_from_slice(nonce_part);
        let mut sealed = sealed_part.to_vec();
        let plaintext = self
            .key
            .open_in_place(
                Nonce::assume_unique_for_key(nonce_bytes),
                Aad::empty(),
                &mut sealed,
            )
            .map_err(|_| ConfigError::Protection {
                operation: "unprotect",
                reason: "authentication failed",
            })?;

        String::from_utf8(plaintext.to_vec()).map_err(|_| ConfigError::Protection {
            operation: "unprotect",
            reason: "plaintext is not valid UTF-8",
        })
    }
}

/// Protect a stored value; absent and blank values pass through.
pub(crate) fn protect_value(
    protector: &dyn SecretProtector,
    value: Option<&str>,
) -> ConfigResult<Option<String>> {
    match value {
        Some(text) if !text.trim().is_empty() => protector.protect(text).map(Some),
        other => Ok(other.map(str::to_string)),
    }
}

/// Unprotect a stored value; absent and blank values pass through.
pub(crate) fn unprotect_value(
    protector: &dyn SecretProtector,
    value: Option<&str>,
) -> ConfigResult<Option<String>> {
    match value {
        Some(text) if !text.trim().is_empty() => protector.unprotect(text).map(Some),
        other => Ok(other.map(str::to_string)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_protector() -> ConfigResult<AeadProtector> {
        AeadProtector::from_key_bytes(&[0x42; SECRET_KEY_LEN])
    }

    #[test]
    fn passthrough_is_identity() -> ConfigResult<()> {
        assert_eq!(PassthroughProtector.protect("demo")?, "demo");
        assert_eq!(PassthroughProtector.unprotect("demo")?, "demo");
        Ok(())
    }

    #[test]
    fn aead_round_trips_and_randomises() -> ConfigResult<()> {
        let protector = test_protector()?;
        let first = protector.protect("demo")?;
        let second = protector.protect("demo")?;
        assert_ne!(first, "demo");
        assert_ne!(first, second);
        assert_eq!(protector.unprotect(&first)?, "demo");
        assert_eq!(protector.unprotect(&second)?, "demo");
        Ok(())
    }

    #[test]
    fn aead_rejects_tampered_payload() -> ConfigResult<()> {
        let protector = test_protector()?;
        let sealed = protector.protect("sensitive")?;
        let mut bytes = STANDARD.decode(&sealed).map_err(|_| ConfigError::Protection {
            operation: "test",
            reason: "decode",
        })?;
        let last = bytes.len() - 1;
        bytes[last] ^= 0xFF;
        let tampered = STANDARD.encode(bytes);
        assert!(matches!(
            protector.unprotect(&tampered),
            Err(ConfigError::Protection {
                reason: "authentication failed",
                ..
            })
        ));
        assert!(protector.unprotect("not base64!").is_err());
        assert!(protector.unprotect("AAAA").is_err());
        Ok(())
    }

    #[test]
    fn aead_rejects_foreign_key() -> ConfigResult<()> {
        let sealed = test_protector()?.protect("demo")?;
        let other = AeadProtector::from_key_bytes(&[0x24; SECRET_KEY_LEN])?;
        assert!(other.unprotect(&sealed).is_err());
        Ok(())
    }

    #[test]
    fn key_material_is_validated() {
        assert!(AeadProtector::from_key_bytes(&[0; 16]).is_err());
        assert!(AeadProtector::from_base64_key("***").is_err());
        let encoded = STANDARD.encode([7u8; SECRET_KEY_LEN]);
        assert!(AeadProtector::from_base64_key(&encoded).is_ok());
    }

    #[test]
    fn blank_values_are_never_protected() -> ConfigResult<()> {
        let protector = test_protector()?;
        assert_eq!(protect_value(&protector, None)?, None);
        assert_eq!(protect_value(&protector, Some("  "))?, Some("  ".into()));
        assert_eq!(unprotect_value(&protector, Some(""))?, Some(String::new()));
        let sealed = protect_value(&protector, Some("demo"))?;
        assert_ne!(sealed.as_deref(), Some("demo"));
        assert_eq!(
            unprotect_value(&protector, sealed.as_deref())?,
            Some("demo".into())
        );
        Ok(())
    }
}
