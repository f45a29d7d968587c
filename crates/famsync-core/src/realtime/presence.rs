//! Server presence bookkeeping
//!
//! Mirrors the server's presence state from `presence_state` snapshots and
//! `presence_diff` updates. A key stays present while at least one of its
//! metas (one per connection) is.

use std::collections::{BTreeSet, HashMap};

use super::message::PresenceState;

#[derive(Debug, Default)]
pub struct PresenceMap {
    refs: HashMap<String, BTreeSet<String>>,
}

impl PresenceMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace everything with a full snapshot
    pub fn replace(&mut self, state: PresenceState) {
        self.refs.clear();
        self.join(state);
    }

    /// Apply an incremental update
    pub fn apply_diff(&mut self, joins: PresenceState, leaves: PresenceState) {
        self.join(joins);

        for (key, entry) in leaves {
            let Some(refs) = self.refs.get_mut(&key) else {
                continue;
            };
            for meta in entry.metas {
                match meta.phx_ref {
                    Some(phx_ref) => {
                        refs.remove(&phx_ref);
                    }
                    None => refs.clear(),
                }
            }
            if refs.is_empty() {
                self.refs.remove(&key);
            }
        }
    }

    fn join(&mut self, state: PresenceState) {
        for (key, entry) in state {
            let refs = self.refs.entry(key).or_default();
            for (i, meta) in entry.metas.into_iter().enumerate() {
                refs.insert(meta.phx_ref.unwrap_or_else(|| format!("anon-{}", i)));
            }
            // A key listed without metas is still present
            if refs.is_empty() {
                refs.insert("anon-0".to_string());
            }
        }
    }

    /// Keys currently present, sorted
    pub fn keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = self.refs.keys().cloned().collect();
        keys.sort();
        keys
    }
}
