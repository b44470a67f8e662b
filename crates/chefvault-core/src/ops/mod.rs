//! Vault verbs
//!
//! Every verb reloads the item's key state from the server before acting
//! and issues its remote calls one after another. Nothing is locked: two
//! callers racing on the same item interleave, and the last writer wins.

mod classify;
mod create;
mod delete;
mod get;
mod list;
mod refresh;
mod remove;
mod rotate;
mod update;

pub use remove::prune_content;
pub use update::merge_content;
