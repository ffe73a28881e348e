//! Verification key material.
//!
//! A [`VerificationKey`] is opaque credential material used to check a JWT
//! signature: a PEM or DER public key for asymmetric algorithms, or a
//! shared secret for HMAC. Keys are immutable and cheap to clone; the cache
//! replaces them as a unit.

use crate::error::AuthError;
use jsonwebtoken::{Algorithm, DecodingKey};
use secrecy::{ExposeSecret, SecretBox};
use std::fmt;
use std::sync::Arc;

enum KeyMaterial {
    /// PEM-encoded public key.
    Pem(String),

    /// DER-encoded public key (raw 32 bytes for Ed25519).
    Der(Vec<u8>),

    /// HMAC shared secret.
    Shared(SecretBox<[u8]>),
}

/// Credential material used to validate a token signature.
#[derive(Clone)]
pub struct VerificationKey {
    material: Arc<KeyMaterial>,
}

impl VerificationKey {
    /// Key from PEM text (`-----BEGIN PUBLIC KEY-----` and friends).
    #[must_use]
    pub fn from_pem(pem: impl Into<String>) -> Self {
        Self::new(KeyMaterial::Pem(pem.into()))
    }

    /// Key from DER bytes.
    ///
    /// For `EdDSA` this is the raw 32-byte public key.
    #[must_use]
    pub fn from_der(der: impl Into<Vec<u8>>) -> Self {
        Self::new(KeyMaterial::Der(der.into()))
    }

    /// Shared secret for HMAC algorithms. Redacted in Debug output.
    #[must_use]
    pub fn from_secret(secret: impl Into<Vec<u8>>) -> Self {
        let secret: Vec<u8> = secret.into();
        Self::new(KeyMaterial::Shared(SecretBox::new(secret.into_boxed_slice())))
    }

    /// Interpret `text` the way `algorithm` expects it: as a shared secret
    /// for HMAC algorithms, as PEM otherwise.
    #[must_use]
    pub fn for_algorithm(algorithm: Algorithm, text: &str) -> Self {
        if is_hmac(algorithm) {
            Self::from_secret(text.as_bytes())
        } else {
            Self::from_pem(text)
        }
    }

    fn new(material: KeyMaterial) -> Self {
        Self {
            material: Arc::new(material),
        }
    }

    /// Whether this key holds an HMAC shared secret.
    #[must_use]
    pub fn is_shared_secret(&self) -> bool {
        matches!(*self.material, KeyMaterial::Shared(_))
    }

    /// Build the `jsonwebtoken` decoding key for `algorithm`.
    ///
    /// # Errors
    ///
    /// Returns `AuthError::InvalidKey` if the material cannot be parsed or
    /// does not belong to the algorithm's key family. This is a
    /// configuration error, not a token failure.
    pub fn decoding_key(&self, algorithm: Algorithm) -> Result<DecodingKey, AuthError> {
        let invalid = |e: jsonwebtoken::errors::Error| {
            tracing::warn!(
                target: "bearer_guard.key",
                algorithm = ?algorithm,
                error = %e,
                "Verification key could not be parsed"
            );
            AuthError::InvalidKey(format!("{algorithm:?} key could not be parsed"))
        };

        match (&*self.material, algorithm) {
            (KeyMaterial::Shared(secret), Algorithm::HS256 | Algorithm::HS384 | Algorithm::HS512) => {
                Ok(DecodingKey::from_secret(secret.expose_secret()))
            }
            (
                KeyMaterial::Pem(pem),
                Algorithm::RS256
                | Algorithm::RS384
                | Algorithm::RS512
                | Algorithm::PS256
                | Algorithm::PS384
                | Algorithm::PS512,
            ) => DecodingKey::from_rsa_pem(pem.as_bytes()).map_err(invalid),
            (
                KeyMaterial::Der(der),
                Algorithm::RS256
                | Algorithm::RS384
                | Algorithm::RS512
                | Algorithm::PS256
                | Algorithm::PS384
                | Algorithm::PS512,
            ) => Ok(DecodingKey::from_rsa_der(der)),
            (KeyMaterial::Pem(pem), Algorithm::ES256 | Algorithm::ES384) => {
                DecodingKey::from_ec_pem(pem.as_bytes()).map_err(invalid)
            }
            (KeyMaterial::Der(der), Algorithm::ES256 | Algorithm::ES384) => {
                Ok(DecodingKey::from_ec_der(der))
            }
            (KeyMaterial::Pem(pem), Algorithm::EdDSA) => {
                DecodingKey::from_ed_pem(pem.as_bytes()).map_err(invalid)
            }
            (KeyMaterial::Der(der), Algorithm::EdDSA) => Ok(DecodingKey::from_ed_der(der)),
            (material, algorithm) => {
                tracing::warn!(
                    target: "bearer_guard.key",
                    algorithm = ?algorithm,
                    kind = material.kind(),
                    "Verification key does not match algorithm family"
                );
                Err(AuthError::InvalidKey(format!(
                    "{} key cannot verify {algorithm:?} tokens",
                    material.kind()
                )))
            }
        }
    }
}

fn is_hmac(algorithm: Algorithm) -> bool {
    matches!(
        algorithm,
        Algorithm::HS256 | Algorithm::HS384 | Algorithm::HS512
    )
}

impl KeyMaterial {
    fn kind(&self) -> &'static str {
        match self {
            KeyMaterial::Pem(_) => "PEM",
            KeyMaterial::Der(_) => "DER",
            KeyMaterial::Shared(_) => "shared secret",
        }
    }
}

impl PartialEq for VerificationKey {
    fn eq(&self, other: &Self) -> bool {
        if Arc::ptr_eq(&self.material, &other.material) {
            return true;
        }
        match (&*self.material, &*other.material) {
            (KeyMaterial::Pem(a), KeyMaterial::Pem(b)) => a == b,
            (KeyMaterial::Der(a), KeyMaterial::Der(b)) => a == b,
            (KeyMaterial::Shared(a), KeyMaterial::Shared(b)) => {
                a.expose_secret() == b.expose_secret()
            }
            _ => false,
        }
    }
}

impl Eq for VerificationKey {}

/// Public keys are printed; shared secrets are redacted.
impl fmt::Debug for VerificationKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &*self.material {
            KeyMaterial::Pem(pem) => f.debug_tuple("VerificationKey::Pem").field(pem).finish(),
            KeyMaterial::Der(der) => f
                .debug_struct("VerificationKey::Der")
                .field("len", &der.len())
                .finish(),
            KeyMaterial::Shared(_) => f
                .debug_tuple("VerificationKey::Shared")
                .field(&"[REDACTED]")
                .finish(),
        }
    }
}
