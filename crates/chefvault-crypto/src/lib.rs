//! Chefvault Crypto - encryption layer for Chef-Vault items
//!
//! This crate provides:
//! - Encrypted data bag v3 content cipher (AES-256-GCM)
//! - Shared-secret generation and RSA wrapping per actor
//! - Hardware keychain storage for client private keys
//!
//! Both halves are exposed as strategy traits so callers can swap them
//! out in tests without touching global state.

pub mod cipher;
pub mod keychain;
pub mod wrap;

pub use cipher::{AesGcmCipher, ContentCipher, EncryptedValue};
pub use keychain::KeychainProvider;
pub use wrap::{generate_secret, RsaSecretWrapper, SecretWrapper, SharedSecret, SECRET_SIZE};

/// Errors that can occur in cryptographic operations
#[derive(Debug, thiserror::Error)]
pub enum CryptoError {
    #[error("Invalid key size: expected {expected}, got {got}")]
    InvalidKeySize { expected: usize, got: usize },

    #[error("Encryption failed for field {0:?}")]
    Encryption(String),

    #[error("Decryption failed for field {0:?} - wrong secret or tampered data")]
    Decryption(String),

    #[error("Field {field:?} is not a valid encrypted value: {reason}")]
    MalformedValue { field: String, reason: String },

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Invalid public key: {0}")]
    InvalidPublicKey(String),

    #[error("Invalid private key: {0}")]
    InvalidPrivateKey(String),

    #[error("Failed to wrap shared secret: {0}")]
    Wrap(String),

    // Never says whether base64 decoding or RSA decryption failed.
    #[error("Unable to decrypt shared secret with available credentials")]
    Unwrap,
}

pub type Result<T> = std::result::Result<T, CryptoError>;
