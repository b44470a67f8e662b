//! Hardware keychain integration
//!
//! Client private keys can live in the OS keychain instead of a PEM file
//! on disk. Entries are keyed by client name under one service name.

use secrecy::{ExposeSecret, SecretString};
use thiserror::Error;
use tracing::debug;

#[derive(Error, Debug)]
pub enum KeychainError {
    #[error("Keychain not available")]
    NotAvailable,
    #[error("No key stored for client {0:?}")]
    NotFound(String),
    #[error("Platform error: {0}")]
    Platform(String),
}

pub struct KeychainProvider {
    service_name: String,
}

impl KeychainProvider {
    pub fn new(service_name: &str) -> Self {
        Self {
            service_name: service_name.to_string(),
        }
    }

    fn entry(&self, client_name: &str) -> Result<keyring::Entry, KeychainError> {
        keyring::Entry::new(&self.service_name, client_name).map_err(|e| match e {
            keyring::Error::NoStorageAccess(_) | keyring::Error::PlatformFailure(_) => {
                KeychainError::NotAvailable
            }
            other => KeychainError::Platform(other.to_string()),
        })
    }

    pub fn store_client_key(
        &self,
        client_name: &str,
        pem: &SecretString,
    ) -> Result<(), KeychainError> {
        self.entry(client_name)?
            .set_password(pem.expose_secret())
            .map_err(|e| KeychainError::Platform(e.to_string()))?;
        debug!(service = %self.service_name, client = %client_name, "stored client key");
        Ok(())
    }

    pub fn retrieve_client_key(&self, client_name: &str) -> Result<SecretString, KeychainError> {
        let pem = self.entry(client_name)?.get_password().map_err(|e| match e {
            keyring::Error::NoEntry => KeychainError::NotFound(client_name.to_string()),
            _ => KeychainError::Platform(e.to_string()),
        })?;
        Ok(SecretString::new(pem))
    }

    pub fn delete_client_key(&self, client_name: &str) -> Result<(), KeychainError> {
        self.entry(client_name)?.delete_password().map_err(|e| match e {
            keyring::Error::NoEntry => KeychainError::NotFound(client_name.to_string()),
            _ => KeychainError::Platform(e.to_string()),
        })?;
        debug!(service = %self.service_name, client = %client_name, "deleted client key");
        Ok(())
    }
}
