//! Caller identity configuration
//!
//! Every vault operation acts as one Chef actor: its name selects the
//! wrapped secret in the key documents and its private key unwraps it.

use std::fmt;
use std::path::Path;

use chefvault_crypto::wrap::parse_private_key;
use chefvault_crypto::KeychainProvider;
use rsa::RsaPrivateKey;
use secrecy::{ExposeSecret, SecretString};

use crate::error::{Result, VaultError};

pub const ENV_CLIENT_NAME: &str = "CHEFVAULT_CLIENT_NAME";
pub const ENV_CLIENT_KEY: &str = "CHEFVAULT_CLIENT_KEY";
pub const KEYCHAIN_SERVICE: &str = "chefvault";

/// Who the service acts as, before the key is parsed.
pub struct ServiceConfig {
    pub client_name: String,
    pub client_key: SecretString,
}

impl ServiceConfig {
    pub fn new(client_name: &str, client_key: SecretString) -> Self {
        Self {
            client_name: client_name.to_string(),
            client_key,
        }
    }

    /// Read the private key from a PEM file, as knife does with `client.pem`.
    pub fn from_key_file(client_name: &str, path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let pem = std::fs::read_to_string(path)
            .map_err(|e| VaultError::Config(format!("failed to read {}: {e}", path.display())))?;
        Ok(Self::new(client_name, SecretString::new(pem)))
    }

    /// `CHEFVAULT_CLIENT_NAME` plus `CHEFVAULT_CLIENT_KEY` (a PEM file path).
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let name = lookup(ENV_CLIENT_NAME)
            .filter(|v| !v.is_empty())
            .ok_or_else(|| VaultError::Config(format!("{ENV_CLIENT_NAME} is not set")))?;
        let key_path = lookup(ENV_CLIENT_KEY)
            .filter(|v| !v.is_empty())
            .ok_or_else(|| VaultError::Config(format!("{ENV_CLIENT_KEY} is not set")))?;
        Self::from_key_file(&name, key_path)
    }

    /// Fetch the private key stored in the OS keychain for `client_name`.
    pub fn from_keychain(client_name: &str) -> Result<Self> {
        let pem = KeychainProvider::new(KEYCHAIN_SERVICE)
            .retrieve_client_key(client_name)
            .map_err(|e| VaultError::Config(e.to_string()))?;
        Ok(Self::new(client_name, pem))
    }

    /// Save the private key in the OS keychain for later `from_keychain`.
    pub fn store_in_keychain(&self) -> Result<()> {
        KeychainProvider::new(KEYCHAIN_SERVICE)
            .store_client_key(&self.client_name, &self.client_key)
            .map_err(|e| VaultError::Config(e.to_string()))
    }

    /// Parse the key into the identity used by the service.
    pub fn identity(&self) -> Result<ClientIdentity> {
        ClientIdentity::from_pem(&self.client_name, self.client_key.expose_secret())
    }
}

/// The parsed caller identity.
#[derive(Clone)]
pub struct ClientIdentity {
    name: String,
    private_key: RsaPrivateKey,
}

impl ClientIdentity {
    pub fn new(name: &str, private_key: RsaPrivateKey) -> Self {
        Self {
            name: name.to_string(),
            private_key,
        }
    }

    pub fn from_pem(name: &str, pem: &str) -> Result<Self> {
        if name.is_empty() {
            return Err(VaultError::Config("client name is empty".into()));
        }
        Ok(Self::new(name, parse_private_key(pem)?))
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn private_key(&self) -> &RsaPrivateKey {
        &self.private_key
    }
}

impl fmt::Debug for ClientIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClientIdentity")
            .field("name", &self.name)
            .field("private_key", &"[REDACTED]")
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::io::Write;

    const TESTER_PEM: &str = include_str!("../../../testdata/tester.pem");

    #[test]
    fn test_identity_from_key_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(TESTER_PEM.as_bytes()).unwrap();

        let config = ServiceConfig::from_key_file("tester", file.path()).unwrap();
        let identity = config.identity().unwrap();
        assert_eq!(identity.name(), "tester");
        assert!(!format!("{identity:?}").contains("BEGIN"));
    }

    #[test]
    fn test_from_lookup() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(TESTER_PEM.as_bytes()).unwrap();
        let vars = HashMap::from([
            (ENV_CLIENT_NAME, "tester".to_string()),
            (ENV_CLIENT_KEY, file.path().display().to_string()),
        ]);

        let config = ServiceConfig::from_lookup(|k| vars.get(k).cloned()).unwrap();
        assert_eq!(config.client_name, "tester");
        assert!(config.identity().is_ok());
    }

    #[test]
    fn test_from_lookup_missing_vars() {
        let err = ServiceConfig::from_lookup(|_| None).err().unwrap();
        assert!(err.to_string().contains(ENV_CLIENT_NAME));

        let only_name = |k: &str| (k == ENV_CLIENT_NAME).then(|| "tester".to_string());
        let err = ServiceConfig::from_lookup(only_name).err().unwrap();
        assert!(err.to_string().contains(ENV_CLIENT_KEY));
    }

    #[test]
    fn test_bad_key_is_rejected() {
        let config = ServiceConfig::new("tester", SecretString::new("RSA KEY".into()));
        assert!(matches!(config.identity(), Err(VaultError::Crypto(_))));
    }

    #[test]
    fn test_keychain_paths() {
        keyring::set_default_credential_builder(keyring::mock::default_credential_builder());

        let config = ServiceConfig::new("tester", SecretString::new(TESTER_PEM.into()));
        assert!(config.store_in_keychain().is_ok());

        // Mock entries keep no shared storage, so a new lookup finds nothing
        let err = ServiceConfig::from_keychain("tester").err().unwrap();
        assert!(matches!(err, VaultError::Config(ref m) if m.contains("tester")));
    }

    #[test]
    fn test_missing_key_file() {
        let err = ServiceConfig::from_key_file("tester", "/nonexistent/client.pem").err().unwrap();
        assert!(matches!(err, VaultError::Config(_)));
    }
}
