//! Cache of verified role tokens.
//!
//! Keyed by the raw signed-token string; entries are inserted only after a
//! successful parse and signature verification, so a cache hit skips the
//! expensive RSA work. The sweep runs from the policy-refresh loop and
//! self-throttles to the configured interval; the request path additionally
//! evicts expired entries it happens to hit. Two callers racing to remove
//! the same key is harmless.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;

use crate::token::RoleToken;

pub struct TokenCache {
    entries: Mutex<HashMap<String, Arc<RoleToken>>>,
    last_sweep: Mutex<i64>,
    /// Minimum seconds between sweeps.
    interval: i64,
}

impl TokenCache {
    pub fn new(interval_secs: i64) -> TokenCache {
        TokenCache {
            entries: Mutex::new(HashMap::new()),
            last_sweep: Mutex::new(chrono::Utc::now().timestamp()),
            interval: interval_secs,
        }
    }

    pub fn get(&self, signed_token: &str) -> Option<Arc<RoleToken>> {
        self.entries.lock().get(signed_token).cloned()
    }

    pub fn insert(&self, signed_token: String, token: Arc<RoleToken>) {
        self.entries.lock().insert(signed_token, token);
    }

    pub fn remove(&self, signed_token: &str) {
        self.entries.lock().remove(signed_token);
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }

    /// Drop expired entries. Does nothing when called again before the
    /// interval has elapsed.
    pub fn sweep(&self) {
        let now = chrono::Utc::now().timestamp();
        {
            let mut last = self.last_sweep.lock();
            if now < *last + self.interval {
                return;
            }
            *last = now;
        }

        let mut entries = self.entries.lock();
        let before = entries.len();
        entries.retain(|_, token| token.expiry_time >= now);
        let dropped = before - entries.len();
        if dropped > 0 {
            tracing::info!(dropped, remaining = entries.len(), "swept expired role tokens");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn token_expiring_at(expiry: i64) -> Arc<RoleToken> {
        Arc::new(RoleToken {
            domain: "angler".into(),
            roles: vec!["public".into()],
            expiry_time: expiry,
            ..RoleToken::default()
        })
    }

    #[test]
    fn test_insert_get_remove() {
        let cache = TokenCache::new(0);
        assert!(cache.get("t").is_none());
        cache.insert("t".into(), token_expiring_at(i64::MAX));
        assert_eq!(cache.get("t").unwrap().domain, "angler");
        cache.remove("t");
        assert!(cache.get("t").is_none());
    }

    #[test]
    fn test_sweep_drops_expired_keeps_live() {
        let now = chrono::Utc::now().timestamp();
        let cache = TokenCache::new(0);
        cache.insert("live".into(), token_expiring_at(now + 300));
        cache.insert("dead".into(), token_expiring_at(now - 300));
        cache.sweep();
        assert!(cache.get("live").is_some());
        assert!(cache.get("dead").is_none());
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn test_sweep_throttles_to_interval() {
        let now = chrono::Utc::now().timestamp();
        let cache = TokenCache::new(3600);
        cache.insert("dead".into(), token_expiring_at(now - 300));
        // The constructor records a sweep, so a call within the interval is
        // a no-op.
        cache.sweep();
        assert!(cache.get("dead").is_some());
    }

    #[test]
    fn test_sweep_drops_tokens_without_expiry() {
        let cache = TokenCache::new(0);
        cache.insert("noexp".into(), token_expiring_at(0));
        cache.sweep();
        assert!(cache.get("noexp").is_none());
    }
}
