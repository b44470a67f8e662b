use chefvault_store::Document;
use tracing::info;

use crate::error::Result;
use crate::payload::validate_names;
use crate::service::VaultService;

impl VaultService {
    /// Decrypt a vault item as the configured actor.
    pub async fn get(&self, vault: &str, item: &str) -> Result<Document> {
        validate_names(vault, item)?;

        let secret = self.load_shared_secret(vault, item).await?;
        let encrypted = self.store().get_item(vault, item).await?;
        let content = self.decrypt(&encrypted, &secret)?;

        info!(vault = %vault, item = %item, actor = %self.identity().name(), "read vault item");
        Ok(content)
    }
}
