use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::Mutex;

/// Counts live connections per user so presence transitions fire only
/// when a user's overall connection count crosses zero. A user with two
/// open sessions stays online until the last one drops.
#[derive(Clone, Default)]
pub struct PresenceRegistry {
    inner: Arc<Mutex<HashMap<String, usize>>>,
}

impl PresenceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers one connection; returns true when this made the user
    /// transition from offline to online.
    pub async fn register(&self, user_id: &str) -> bool {
        let mut map = self.inner.lock().await;
        let count = map.entry(user_id.to_string()).or_insert(0);
        *count += 1;
        *count == 1
    }

    /// Unregisters one connection; returns true when the user has no
    /// connections left and is now offline.
    pub async fn unregister(&self, user_id: &str) -> bool {
        let mut map = self.inner.lock().await;
        match map.get_mut(user_id) {
            Some(count) if *count > 1 => {
                *count -= 1;
                false
            }
            Some(_) => {
                map.remove(user_id);
                true
            }
            None => false,
        }
    }

    pub async fn count(&self, user_id: &str) -> usize {
        let map = self.inner.lock().await;
        map.get(user_id).copied().unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn transitions_fire_only_when_crossing_zero() {
        let presence = PresenceRegistry::new();
        assert!(presence.register("alice").await);
        assert!(!presence.register("alice").await); // second tab
        assert_eq!(presence.count("alice").await, 2);

        assert!(!presence.unregister("alice").await);
        assert!(presence.unregister("alice").await);
        assert_eq!(presence.count("alice").await, 0);

        // unregistering an unknown user is a no-op
        assert!(!presence.unregister("alice").await);
    }
}
