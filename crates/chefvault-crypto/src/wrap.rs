//! Shared-secret generation and per-actor RSA wrapping
//!
//! Each actor gets the item's shared secret encrypted with RSA PKCS#1 v1.5
//! under its public key, base64-encoded.

use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use rand::{rngs::OsRng, RngCore};
use rsa::pkcs1::{DecodeRsaPrivateKey, DecodeRsaPublicKey};
use rsa::pkcs8::{DecodePrivateKey, DecodePublicKey};
use rsa::{Pkcs1v15Encrypt, RsaPrivateKey, RsaPublicKey};
use std::fmt;
use zeroize::Zeroizing;

use crate::cipher::clean_b64;
use crate::{CryptoError, Result};

/// Length of every shared secret generated for a vault item
pub const SECRET_SIZE: usize = 32;

/// Symmetric secret shared by all actors of one vault item.
///
/// Scrubbed from memory on drop.
#[derive(Clone)]
pub struct SharedSecret(Zeroizing<Vec<u8>>);

impl SharedSecret {
    pub fn new(bytes: Vec<u8>) -> Self {
        Self(Zeroizing::new(bytes))
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Debug for SharedSecret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SharedSecret([REDACTED; {}])", self.0.len())
    }
}

impl PartialEq for SharedSecret {
    fn eq(&self, other: &Self) -> bool {
        self.as_bytes() == other.as_bytes()
    }
}

impl Eq for SharedSecret {}

/// Generate a cryptographically secure random secret
pub fn generate_secret(len: usize) -> SharedSecret {
    let mut bytes = vec![0u8; len];
    OsRng.fill_bytes(&mut bytes);
    SharedSecret::new(bytes)
}

/// Parse an actor public key. Chef serves SPKI (`BEGIN PUBLIC KEY`), older
/// keys may still be PKCS#1 (`BEGIN RSA PUBLIC KEY`).
pub fn parse_public_key(pem: &str) -> Result<RsaPublicKey> {
    RsaPublicKey::from_public_key_pem(pem.trim())
        .or_else(|_| RsaPublicKey::from_pkcs1_pem(pem.trim()))
        .map_err(|e| CryptoError::InvalidPublicKey(e.to_string()))
}

/// Parse a client private key in PKCS#1 or PKCS#8 PEM form.
pub fn parse_private_key(pem: &str) -> Result<RsaPrivateKey> {
    RsaPrivateKey::from_pkcs1_pem(pem.trim())
        .or_else(|_| RsaPrivateKey::from_pkcs8_pem(pem.trim()))
        .map_err(|e| CryptoError::InvalidPrivateKey(e.to_string()))
}

/// Wraps a shared secret for one actor and recovers it again.
pub trait SecretWrapper: Send + Sync {
    /// Encrypt `secret` under the actor's PEM public key, returning base64.
    fn wrap_secret(&self, public_key_pem: &str, secret: &SharedSecret) -> Result<String>;

    /// Recover the shared secret. Fails with [`CryptoError::Unwrap`] without
    /// revealing whether decoding or decryption went wrong.
    fn unwrap_secret(&self, wrapped: &str, private_key: &RsaPrivateKey) -> Result<SharedSecret>;
}

/// RSA PKCS#1 v1.5, as written by Chef-Vault.
#[derive(Debug, Default, Clone, Copy)]
pub struct RsaSecretWrapper;

impl SecretWrapper for RsaSecretWrapper {
    fn wrap_secret(&self, public_key_pem: &str, secret: &SharedSecret) -> Result<String> {
        let public_key = parse_public_key(public_key_pem)?;
        let encrypted = public_key
            .encrypt(&mut OsRng, Pkcs1v15Encrypt, secret.as_bytes())
            .map_err(|e| CryptoError::Wrap(e.to_string()))?;
        Ok(BASE64.encode(encrypted))
    }

    fn unwrap_secret(&self, wrapped: &str, private_key: &RsaPrivateKey) -> Result<SharedSecret> {
        let encrypted = BASE64
            .decode(clean_b64(wrapped))
            .map_err(|_| CryptoError::Unwrap)?;
        let secret = private_key
            .decrypt(Pkcs1v15Encrypt, &encrypted)
            .map_err(|_| CryptoError::Unwrap)?;
        Ok(SharedSecret::new(secret))
    }
}
