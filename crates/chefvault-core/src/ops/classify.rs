use chefvault_crypto::EncryptedValue;
use tracing::debug;

use crate::error::Result;
use crate::keys::keys_id;
use crate::payload::validate_names;
use crate::service::{ItemType, VaultService};

impl VaultService {
    /// Vault if `<item>_keys` exists next to the item, encrypted if any
    /// field looks like an encrypted value, normal otherwise.
    pub async fn item_type(&self, vault: &str, item: &str) -> Result<ItemType> {
        validate_names(vault, item)?;

        let listing = self.store().list_items(vault).await?;
        let kind = if listing.contains_key(&keys_id(item)) {
            ItemType::Vault
        } else {
            let document = self.store().get_item(vault, item).await?;
            let encrypted = document
                .iter()
                .any(|(field, value)| field != "id" && EncryptedValue::looks_encrypted(value));
            if encrypted {
                ItemType::Encrypted
            } else {
                ItemType::Normal
            }
        };

        debug!(vault = %vault, item = %item, kind = %kind, "classified item");
        Ok(kind)
    }

    pub async fn is_vault(&self, vault: &str, item: &str) -> Result<bool> {
        Ok(self.item_type(vault, item).await? == ItemType::Vault)
    }
}
