use chefvault_crypto::CryptoError;
use chefvault_store::StoreError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum VaultError {
    #[error("Missing vault name")]
    MissingVaultName,

    #[error("Missing vault item name")]
    MissingItemName,

    #[error("{vault}/{item} is not encrypted with your public key")]
    AccessDenied { vault: String, item: String },

    #[error("None of the specified admins have public keys")]
    NoAdminKeys,

    #[error("{vault}/{item} has no search query to refresh")]
    SearchQueryRequired { vault: String, item: String },

    #[error("Malformed document {id:?}: {reason}")]
    MalformedDocument { id: String, reason: String },

    #[error("Configuration error: {0}")]
    Config(String),

    #[error(transparent)]
    Crypto(#[from] CryptoError),

    #[error(transparent)]
    Store(#[from] StoreError),
}

impl VaultError {
    pub(crate) fn malformed(id: &str, reason: impl Into<String>) -> Self {
        Self::MalformedDocument {
            id: id.to_string(),
            reason: reason.into(),
        }
    }

    /// The server reported a 409 conflict.
    pub fn is_conflict(&self) -> bool {
        matches!(self, Self::Store(e) if e.is_conflict())
    }

    /// The server reported a 404 for the target.
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::Store(e) if e.is_not_found())
    }
}

pub type Result<T> = std::result::Result<T, VaultError>;
