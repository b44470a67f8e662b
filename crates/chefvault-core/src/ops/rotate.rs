use tracing::info;

use super::update::{ContentChange, DesiredState};
use crate::error::Result;
use crate::keys::KeysModeState;
use crate::payload::validate_names;
use crate::service::{RotateResponse, VaultService};

impl VaultService {
    /// Replace an item's secret and re-wrap it for the same actors.
    pub async fn rotate_keys(&self, vault: &str, item: &str) -> Result<RotateResponse> {
        validate_names(vault, item)?;

        let current = self.load_key_state(vault, item).await?;
        let desired = DesiredState {
            admins: current.admins.clone(),
            clients: current.clients.clone(),
            search_query: current.search_query.clone(),
            expand_search: false,
            mode_state: KeysModeState::steady(current.mode),
            content: ContentChange::Keep,
        };
        let resp = self.apply_desired(vault, item, &current, desired).await?;

        info!(vault = %vault, item = %item, keys = resp.keys_uris.len(), "rotated vault item keys");
        Ok(RotateResponse {
            uri: self.vault_url(vault),
            keys_uris: resp.keys_uris,
        })
    }

    /// Rotate every item of every vault, stopping at the first failure.
    pub async fn rotate_all_keys(&self) -> Result<Vec<RotateResponse>> {
        let mut rotated = Vec::new();
        for vault in self.list().await?.into_keys() {
            for item in self.list_items(&vault).await?.into_keys() {
                rotated.push(self.rotate_keys(&vault, &item).await?);
            }
        }

        info!(items = rotated.len(), "rotated all vault keys");
        Ok(rotated)
    }
}
