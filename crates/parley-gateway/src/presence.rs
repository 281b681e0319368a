use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use tokio::sync::RwLock;

/// Set of identities with at least one live connection.
///
/// Internally reference-counted per identity so a user connected from two
/// tabs stays online until the last one disconnects; observably it behaves
/// as a set (marking an already-online identity online is a no-op for
/// everyone watching).
#[derive(Clone, Default)]
pub struct Presence {
    inner: Arc<RwLock<HashMap<String, usize>>>,
}

impl Presence {
    pub fn new() -> Self {
        Self::default()
    }

    /// Bind one more connection to `identity`. Returns true on the
    /// offline -> online edge, when watchers should be notified.
    pub async fn mark_online(&self, identity: &str) -> bool {
        let mut users = self.inner.write().await;
        let count = users.entry(identity.to_string()).or_insert(0);
        *count += 1;
        *count == 1
    }

    /// Unbind one connection. Returns true on the online -> offline edge.
    /// Unknown identities are ignored.
    pub async fn mark_offline(&self, identity: &str) -> bool {
        let mut users = self.inner.write().await;
        match users.get_mut(identity) {
            Some(count) if *count > 1 => {
                *count -= 1;
                false
            }
            Some(_) => {
                users.remove(identity);
                true
            }
            None => false,
        }
    }

    pub async fn is_online(&self, identity: &str) -> bool {
        self.inner.read().await.contains_key(identity)
    }

    pub async fn snapshot(&self) -> HashSet<String> {
        self.inner.read().await.keys().cloned().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn online_offline_edges() {
        let presence = Presence::new();

        assert!(presence.mark_online("alice").await);
        assert!(presence.is_online("alice").await);

        assert!(presence.mark_offline("alice").await);
        assert!(!presence.is_online("alice").await);
    }

    #[tokio::test]
    async fn second_connection_keeps_identity_online() {
        let presence = Presence::new();

        assert!(presence.mark_online("alice").await);
        // Second tab: no edge, still online.
        assert!(!presence.mark_online("alice").await);

        // First tab closes: still online, no edge.
        assert!(!presence.mark_offline("alice").await);
        assert!(presence.is_online("alice").await);

        // Last tab closes: offline edge.
        assert!(presence.mark_offline("alice").await);
        assert!(!presence.is_online("alice").await);
    }

    #[tokio::test]
    async fn offline_for_unknown_identity_is_a_noop() {
        let presence = Presence::new();
        assert!(!presence.mark_offline("ghost").await);
    }

    #[tokio::test]
    async fn snapshot_lists_online_identities() {
        let presence = Presence::new();
        presence.mark_online("alice").await;
        presence.mark_online("bob").await;

        let snapshot = presence.snapshot().await;
        assert!(snapshot.contains("alice"));
        assert!(snapshot.contains("bob"));
        assert_eq!(snapshot.len(), 2);
    }
}
