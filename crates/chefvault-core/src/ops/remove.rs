use chefvault_store::Document;
use serde_json::Value;
use tracing::info;

use super::update::{ContentChange, DesiredState};
use crate::error::Result;
use crate::keys::{diff_actors, merge_actors};
use crate::payload::Payload;
use crate::service::{RemoveResponse, VaultService};

/// Drop from `current` every key named in `shape`. A nested object in the
/// shape prunes one level deeper; any other value drops the key outright.
/// Objects emptied by pruning are dropped too.
pub fn prune_content(current: &Document, shape: &Document) -> Document {
    let mut out = Document::new();
    for (field, value) in current {
        match (shape.get(field), value) {
            (None, _) => {
                out.insert(field.clone(), value.clone());
            }
            (Some(Value::Object(sub_shape)), Value::Object(sub_value)) => {
                let pruned = prune_content(sub_value, sub_shape);
                if !pruned.is_empty() {
                    out.insert(field.clone(), Value::Object(pruned));
                }
            }
            (Some(_), _) => {}
        }
    }
    out
}

impl VaultService {
    /// Take actors and content away from an item, then rekey it.
    ///
    /// Actors named in `admins` or `clients`, plus nodes matched by
    /// `search_query`, lose access. `clean_unknown` also drops clients
    /// missing from the server. `content`, when set, is the shape of the
    /// keys to prune. The item's stored search query is kept but not
    /// re-run, so removed search matches stay removed.
    pub async fn remove(&self, payload: &Payload) -> Result<RemoveResponse> {
        payload.validate()?;
        let vault = payload.vault_name.as_str();
        let item = payload.item_name.as_str();

        let current = self.load_key_state(vault, item).await?;
        let resolver = self.resolver();

        let searched = resolver.clients_from_search(payload.requested_query()).await?;
        let dropped = merge_actors(&merge_actors(&payload.admins, &payload.clients), &searched);

        let admins = diff_actors(&current.admins, &dropped);
        let mut clients = diff_actors(&current.clients, &dropped);
        if payload.clean_unknown {
            clients = resolver.partition_known_clients(&clients).await?.0;
        }

        let content = match &payload.content {
            Some(shape) => {
                let current_content = self.get(vault, item).await?;
                ContentChange::Replace(prune_content(&current_content, shape))
            }
            None => ContentChange::Keep,
        };

        let desired = DesiredState {
            admins,
            clients,
            search_query: current.search_query.clone(),
            expand_search: false,
            mode_state: payload.resolve_keys_mode(current.mode),
            content,
        };
        let resp = self.apply_desired(vault, item, &current, desired).await?;

        info!(vault = %vault, item = %item, dropped = ?dropped, "removed from vault item");
        Ok(resp)
    }
}
