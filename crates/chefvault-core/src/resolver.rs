//! Actor resolution
//!
//! Turns requested admin and client names, plus an optional node search,
//! into the concrete actors that receive a wrapped secret. Admins come only
//! from the explicit list; clients are the explicit list united with the
//! search matches. An actor whose key lookup fails is skipped, so one stale
//! name never blocks everyone else.

use std::collections::{BTreeMap, BTreeSet};

use chefvault_store::{AccessKey, ActorDirectory, SearchIndex, SearchPlan};
use serde_json::Value;
use tracing::{debug, warn};

use crate::error::{Result, VaultError};

pub const SEARCH_INDEX: &str = "node";

/// Actors with their current public keys.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ResolvedActors {
    pub admins: BTreeMap<String, AccessKey>,
    pub clients: BTreeMap<String, AccessKey>,
}

impl ResolvedActors {
    pub fn admin_names(&self) -> Vec<String> {
        self.admins.keys().cloned().collect()
    }

    pub fn client_names(&self) -> Vec<String> {
        self.clients.keys().cloned().collect()
    }

    /// Every actor once. A name that is both admin and client keeps its
    /// admin key.
    pub fn all(&self) -> BTreeMap<&str, &AccessKey> {
        let mut actors: BTreeMap<&str, &AccessKey> =
            self.clients.iter().map(|(n, k)| (n.as_str(), k)).collect();
        actors.extend(self.admins.iter().map(|(n, k)| (n.as_str(), k)));
        actors
    }
}

/// Partial search for node names matching `query`.
pub fn search_plan(query: &str) -> SearchPlan {
    SearchPlan {
        index: SEARCH_INDEX.to_string(),
        query: query.to_string(),
        fields: BTreeMap::from([("name".to_string(), vec!["name".to_string()])]),
    }
}

pub struct ActorResolver<'a> {
    directory: &'a dyn ActorDirectory,
    search: &'a dyn SearchIndex,
}

impl<'a> ActorResolver<'a> {
    pub fn new(directory: &'a dyn ActorDirectory, search: &'a dyn SearchIndex) -> Self {
        Self { directory, search }
    }

    /// Names of the nodes matched by `query`. No query, no clients.
    pub async fn clients_from_search(&self, query: Option<&str>) -> Result<Vec<String>> {
        let Some(query) = query.filter(|q| !q.is_empty()) else {
            return Ok(Vec::new());
        };

        let rows = self.search.partial_search(&search_plan(query)).await?;
        let names: Vec<String> = rows
            .iter()
            .filter_map(|row| row.get("name").and_then(Value::as_str))
            .filter(|name| !name.is_empty())
            .map(str::to_string)
            .collect();

        debug!(query = %query, matches = names.len(), "resolved search clients");
        Ok(names)
    }

    /// Look up keys for the requested actors. Fails only when no admin
    /// could be resolved or the search itself fails.
    pub async fn resolve(
        &self,
        admins: &[String],
        clients: &[String],
        query: Option<&str>,
    ) -> Result<ResolvedActors> {
        let mut resolved = ResolvedActors::default();

        for name in admins.iter().collect::<BTreeSet<_>>() {
            match self.directory.user_key(name).await {
                Ok(key) => {
                    resolved.admins.insert(name.clone(), key);
                }
                Err(e) => warn!(admin = %name, error = %e, "admin has no public key, skipping"),
            }
        }

        if resolved.admins.is_empty() {
            return Err(VaultError::NoAdminKeys);
        }

        let searched = self.clients_from_search(query).await?;
        let wanted: BTreeSet<&String> = clients.iter().chain(&searched).collect();

        for name in wanted {
            match self.directory.client_key(name).await {
                Ok(key) => {
                    resolved.clients.insert(name.clone(), key);
                }
                Err(e) => warn!(client = %name, error = %e, "client has no public key, skipping"),
            }
        }

        Ok(resolved)
    }

    /// The names whose client key lookup succeeds. Failed lookups are
    /// skipped as in [`resolve`](Self::resolve).
    pub async fn clients_with_keys(&self, names: &[String]) -> Vec<String> {
        let mut found = Vec::new();
        for name in names {
            match self.directory.client_key(name).await {
                Ok(_) => found.push(name.clone()),
                Err(e) => warn!(client = %name, error = %e, "client has no public key, skipping"),
            }
        }
        found
    }

    /// Whether a client still exists. Only a not-found lookup means no.
    pub async fn client_exists(&self, name: &str) -> Result<bool> {
        match self.directory.client_key(name).await {
            Ok(_) => Ok(true),
            Err(e) if e.is_not_found() => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    /// Split clients into those still on the server and those gone.
    pub async fn partition_known_clients(
        &self,
        names: &[String],
    ) -> Result<(Vec<String>, Vec<String>)> {
        let mut kept = Vec::new();
        let mut removed = Vec::new();

        for name in names {
            if self.client_exists(name).await? {
                kept.push(name.clone());
            } else {
                removed.push(name.clone());
            }
        }

        if !removed.is_empty() {
            debug!(removed = ?removed, "found unknown clients");
        }
        Ok((kept, removed))
    }
}
