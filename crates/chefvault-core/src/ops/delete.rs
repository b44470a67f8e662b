use tracing::info;

use crate::error::{Result, VaultError};
use crate::keys::{keys_id, sparse_key_id, KeysMode};
use crate::payload::validate_names;
use crate::service::{DeleteResponse, VaultService};

impl VaultService {
    /// Delete a whole vault with everything in it.
    pub async fn delete_vault(&self, vault: &str) -> Result<DeleteResponse> {
        if vault.is_empty() {
            return Err(VaultError::MissingVaultName);
        }
        self.store().delete_vault(vault).await?;

        info!(vault = %vault, "deleted vault");
        Ok(DeleteResponse {
            uri: self.vault_url(vault),
            keys_uris: Vec::new(),
        })
    }

    /// Delete an item's content, then its key documents. Key documents that
    /// are already gone count as deleted.
    pub async fn delete_item(&self, vault: &str, item: &str) -> Result<DeleteResponse> {
        validate_names(vault, item)?;

        let state = self.load_key_state(vault, item).await?;
        self.store().delete_item(vault, item).await?;

        let reconciler = self.reconciler();
        let mut key_ids = Vec::new();
        if state.mode == KeysMode::Sparse {
            key_ids.extend(state.actor_names().iter().map(|actor| sparse_key_id(item, actor)));
        }
        key_ids.push(keys_id(item));

        let mut keys_uris = Vec::new();
        for id in key_ids {
            if reconciler.delete_if_present(vault, &id).await? {
                keys_uris.push(self.item_uri(vault, &id));
            }
        }

        info!(vault = %vault, item = %item, keys = keys_uris.len(), "deleted vault item");
        Ok(DeleteResponse {
            uri: self.item_uri(vault, item),
            keys_uris,
        })
    }
}
