use chefvault_store::Document;
use tracing::info;

use crate::error::Result;
use crate::keys::{merge_actors, resolve_search_query, KeysModeState, VaultItemKeys};
use crate::payload::Payload;
use crate::service::{DataResponse, KeyPlan, UpdateResponse, VaultService};

/// Content to write back after a rekey.
pub(crate) enum ContentChange {
    /// Re-encrypt what is there.
    Keep,
    /// Overlay these top-level fields on what is there.
    Merge(Document),
    /// Write exactly this.
    Replace(Document),
}

/// Access and content an item should end up with.
pub(crate) struct DesiredState {
    pub admins: Vec<String>,
    pub clients: Vec<String>,
    pub search_query: Option<String>,
    /// Re-run `search_query` and add its matches to `clients`.
    pub expand_search: bool,
    pub mode_state: KeysModeState,
    pub content: ContentChange,
}

/// Top-level fields of `requested` replace those of `current`.
pub fn merge_content(current: &Document, requested: &Document) -> Document {
    let mut merged = current.clone();
    for (field, value) in requested {
        merged.insert(field.clone(), value.clone());
    }
    merged
}

impl VaultService {
    /// Change an item's actors and content. Always rotates the secret.
    ///
    /// Admins are merged into the current list. Clients are merged too,
    /// unless `clean` is set, in which case the requested list replaces
    /// them. `clean_unknown` then drops clients missing from the server.
    pub async fn update(&self, payload: &Payload) -> Result<UpdateResponse> {
        payload.validate()?;
        let vault = payload.vault_name.as_str();
        let item = payload.item_name.as_str();

        let current = self.load_key_state(vault, item).await?;

        let admins = merge_actors(&current.admins, &payload.admins);
        let mut clients = if payload.clean {
            merge_actors(&[], &payload.clients)
        } else {
            merge_actors(&current.clients, &payload.clients)
        };
        if payload.clean_unknown {
            clients = self.resolver().partition_known_clients(&clients).await?.0;
        }

        let content = match &payload.content {
            Some(requested) => ContentChange::Merge(requested.clone()),
            None => ContentChange::Keep,
        };

        let desired = DesiredState {
            admins,
            clients,
            search_query: resolve_search_query(
                current.search_query.as_deref(),
                payload.requested_query(),
            ),
            expand_search: true,
            mode_state: payload.resolve_keys_mode(current.mode),
            content,
        };
        let resp = self.apply_desired(vault, item, &current, desired).await?;

        info!(vault = %vault, item = %item, keys = resp.keys_uris.len(), "updated vault item");
        Ok(resp)
    }

    /// Rekey to `desired` and write the re-encrypted content.
    pub(crate) async fn apply_desired(
        &self,
        vault: &str,
        item: &str,
        current: &VaultItemKeys,
        desired: DesiredState,
    ) -> Result<UpdateResponse> {
        let content = match desired.content {
            ContentChange::Keep => self.get(vault, item).await?,
            ContentChange::Merge(requested) => {
                merge_content(&self.get(vault, item).await?, &requested)
            }
            ContentChange::Replace(content) => content,
        };

        let (secret, keys_uris) = self
            .rekey(KeyPlan {
                vault,
                item,
                current: Some(current),
                admins: &desired.admins,
                clients: &desired.clients,
                search_query: desired.search_query,
                expand_search: desired.expand_search,
                mode_state: desired.mode_state,
            })
            .await?;

        self.write_content(vault, item, &content, &secret, false).await?;

        Ok(UpdateResponse {
            uri: self.vault_url(vault),
            data: Some(DataResponse {
                uri: self.item_uri(vault, item),
            }),
            keys_uris,
        })
    }
}
