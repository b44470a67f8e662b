use std::collections::BTreeSet;

use chefvault_store::Listing;
use tracing::debug;

use crate::error::{Result, VaultError};
use crate::keys::keys_id;
use crate::service::VaultService;

/// Items that have a `<item>_keys` sibling.
fn vault_items(listing: &Listing) -> BTreeSet<&str> {
    listing
        .keys()
        .filter(|name| listing.contains_key(&keys_id(name)))
        .map(String::as_str)
        .collect()
}

/// Whether `name` is a key document of one of `items`.
fn is_key_document(name: &str, items: &BTreeSet<&str>) -> bool {
    items.iter().any(|item| {
        name == keys_id(item)
            || name
                .strip_prefix(*item)
                .is_some_and(|rest| rest.starts_with("_key_"))
    })
}

impl VaultService {
    /// Data bags holding at least one vault item.
    pub async fn list(&self) -> Result<Listing> {
        let mut vaults = Listing::new();
        for (name, url) in self.store().list_vaults().await? {
            let items = self.store().list_items(&name).await?;
            if !vault_items(&items).is_empty() {
                vaults.insert(name, url);
            }
        }
        debug!(vaults = vaults.len(), "listed vaults");
        Ok(vaults)
    }

    /// Items of a vault, without their key documents.
    pub async fn list_items(&self, vault: &str) -> Result<Listing> {
        if vault.is_empty() {
            return Err(VaultError::MissingVaultName);
        }

        let listing = self.store().list_items(vault).await?;
        let items = vault_items(&listing);
        Ok(listing
            .iter()
            .filter(|(name, _)| !is_key_document(name, &items))
            .map(|(name, url)| (name.clone(), url.clone()))
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::keys::KeysMode;
    use crate::payload::Payload;
    use crate::service::testing::*;
    use serde_json::json;

    #[test]
    fn test_key_document_detection() {
        let listing: Listing = ["a", "a_keys", "a_key_host1", "b_keys", "my_key_store"]
            .into_iter()
            .map(|n| (n.to_string(), String::new()))
            .collect();
        let items = vault_items(&listing);

        assert_eq!(items, BTreeSet::from(["a"]));
        assert!(is_key_document("a_keys", &items));
        assert!(is_key_document("a_key_host1", &items));
        assert!(!is_key_document("my_key_store", &items));
        assert!(!is_key_document("b_keys", &items));
    }

    #[tokio::test]
    async fn test_list_skips_plain_data_bags() {
        let (server, service) = fixture();
        service
            .create(
                &Payload::new("vault1", "secret1")
                    .with_admins(["pivotal"])
                    .with_clients(["hostA"])
                    .with_keys_mode(KeysMode::Sparse),
            )
            .await
            .unwrap();
        server.put_item("plain", json!({"id": "config"}).as_object().cloned().unwrap());

        let vaults = service.list().await.unwrap();
        assert_eq!(vaults.keys().collect::<Vec<_>>(), vec!["vault1"]);
        assert_eq!(vaults["vault1"], format!("{BASE_URL}/data/vault1"));

        let items = service.list_items("vault1").await.unwrap();
        assert_eq!(items.keys().collect::<Vec<_>>(), vec!["secret1"]);
        assert_eq!(items["secret1"], format!("{BASE_URL}/data/vault1/secret1"));
    }

    #[tokio::test]
    async fn test_list_items_requires_vault_name() {
        let (_server, service) = fixture();
        assert!(matches!(service.list_items("").await, Err(VaultError::MissingVaultName)));
    }
}
