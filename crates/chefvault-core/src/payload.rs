use chefvault_store::Document;

use crate::error::{Result, VaultError};
use crate::keys::{KeysMode, KeysModeState};

/// A caller's request against one vault item.
///
/// `content` is the new data for Create/Update, or the shape of the keys
/// to drop for Remove. Unset options leave the item's stored values alone.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Payload {
    pub vault_name: String,
    pub item_name: String,
    pub content: Option<Document>,
    pub keys_mode: Option<KeysMode>,
    pub search_query: Option<String>,
    pub admins: Vec<String>,
    pub clients: Vec<String>,
    /// Replace the client list instead of merging into it.
    pub clean: bool,
    /// Drop clients that no longer exist on the server.
    pub clean_unknown: bool,
    /// Keep the current secret when the actor set did not change.
    pub skip_reencrypt: bool,
}

impl Payload {
    pub fn new(vault_name: &str, item_name: &str) -> Self {
        Self {
            vault_name: vault_name.to_string(),
            item_name: item_name.to_string(),
            ..Default::default()
        }
    }

    pub fn with_content(mut self, content: Document) -> Self {
        self.content = Some(content);
        self
    }

    pub fn with_keys_mode(mut self, mode: KeysMode) -> Self {
        self.keys_mode = Some(mode);
        self
    }

    pub fn with_search_query(mut self, query: &str) -> Self {
        self.search_query = Some(query.to_string());
        self
    }

    pub fn with_admins<I, S>(mut self, admins: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.admins = admins.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_clients<I, S>(mut self, clients: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.clients = clients.into_iter().map(Into::into).collect();
        self
    }

    pub fn clean(mut self, clean: bool) -> Self {
        self.clean = clean;
        self
    }

    pub fn clean_unknown(mut self, clean_unknown: bool) -> Self {
        self.clean_unknown = clean_unknown;
        self
    }

    pub fn skip_reencrypt(mut self, skip: bool) -> Self {
        self.skip_reencrypt = skip;
        self
    }

    /// Both names must be set before any remote call.
    pub fn validate(&self) -> Result<()> {
        validate_names(&self.vault_name, &self.item_name)
    }

    /// Requested mode, or default for a new item.
    pub fn effective_keys_mode(&self) -> KeysMode {
        self.keys_mode.unwrap_or_default()
    }

    /// Requested mode against the item's stored one. Without a request the
    /// item stays where it is.
    pub fn resolve_keys_mode(&self, current: KeysMode) -> KeysModeState {
        KeysModeState {
            current,
            desired: self.keys_mode.unwrap_or(current),
        }
    }

    /// The search query as given, with empty strings treated as unset.
    pub fn requested_query(&self) -> Option<&str> {
        self.search_query.as_deref().filter(|q| !q.is_empty())
    }
}

pub(crate) fn validate_names(vault: &str, item: &str) -> Result<()> {
    if vault.is_empty() {
        return Err(VaultError::MissingVaultName);
    }
    if item.is_empty() {
        return Err(VaultError::MissingItemName);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate() {
        assert!(Payload::new("vault1", "secret1").validate().is_ok());
        assert!(matches!(
            Payload::new("", "secret1").validate(),
            Err(VaultError::MissingVaultName)
        ));
        assert!(matches!(
            Payload::new("vault1", "").validate(),
            Err(VaultError::MissingItemName)
        ));
    }

    #[test]
    fn test_keys_mode_resolution() {
        let plain = Payload::new("v", "i");
        assert_eq!(plain.effective_keys_mode(), KeysMode::Default);
        let state = plain.resolve_keys_mode(KeysMode::Sparse);
        assert_eq!(state, KeysModeState::steady(KeysMode::Sparse));
        assert!(!state.is_migration());

        let sparse = Payload::new("v", "i").with_keys_mode(KeysMode::Sparse);
        let state = sparse.resolve_keys_mode(KeysMode::Default);
        assert_eq!(state.current, KeysMode::Default);
        assert_eq!(state.desired, KeysMode::Sparse);
        assert!(state.is_migration());
    }

    #[test]
    fn test_builder() {
        let payload = Payload::new("v", "i")
            .with_admins(["pivotal"])
            .with_clients(vec!["hostA".to_string()])
            .with_search_query("")
            .clean(true);

        assert_eq!(payload.admins, vec!["pivotal"]);
        assert_eq!(payload.clients, vec!["hostA"]);
        assert_eq!(payload.requested_query(), None);
        assert!(payload.clean);
        assert!(!payload.skip_reencrypt);
    }
}
