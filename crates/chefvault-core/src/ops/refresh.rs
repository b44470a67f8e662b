use tracing::info;

use super::update::{ContentChange, DesiredState};
use crate::error::{Result, VaultError};
use crate::keys::{diff_actors, merge_actors, resolve_search_query, same_actors, KeysModeState};
use crate::payload::Payload;
use crate::service::{RefreshResponse, VaultService};

impl VaultService {
    /// Re-run the item's search query and grant access to new matches.
    ///
    /// Matches with a client key are merged into the current clients; nobody
    /// is dropped unless `clean_unknown` prunes clients missing from the
    /// server. With
    /// `skip_reencrypt` and an unchanged client set nothing is written.
    /// Otherwise the item is rekeyed under a new secret, like Update.
    pub async fn refresh(&self, payload: &Payload) -> Result<RefreshResponse> {
        payload.validate()?;
        let vault = payload.vault_name.as_str();
        let item = payload.item_name.as_str();

        let current = self.load_key_state(vault, item).await?;
        let query = resolve_search_query(current.search_query.as_deref(), payload.requested_query())
            .ok_or_else(|| VaultError::SearchQueryRequired {
                vault: vault.to_string(),
                item: item.to_string(),
            })?;

        let resolver = self.resolver();
        let searched = resolver.clients_from_search(Some(&query)).await?;
        let fresh = diff_actors(&searched, &current.clients);
        let found = resolver.clients_with_keys(&fresh).await;
        let mut clients = merge_actors(&current.clients, &found);
        if payload.clean_unknown {
            clients = resolver.partition_known_clients(&clients).await?.0;
        }

        if payload.skip_reencrypt && same_actors(&current.clients, &clients) {
            info!(vault = %vault, item = %item, "clients unchanged, skipping re-encryption");
            return Ok(RefreshResponse {
                uri: self.vault_url(vault),
                data: None,
                keys_uris: Vec::new(),
            });
        }

        let desired = DesiredState {
            admins: current.admins.clone(),
            clients,
            search_query: Some(query),
            expand_search: false,
            mode_state: KeysModeState::steady(current.mode),
            content: ContentChange::Keep,
        };
        let resp = self.apply_desired(vault, item, &current, desired).await?;

        info!(vault = %vault, item = %item, keys = resp.keys_uris.len(), "refreshed vault item");
        Ok(resp)
    }
}
