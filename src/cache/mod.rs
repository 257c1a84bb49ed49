//! Cache / Presence Store
//!
//! Key-value and hash primitives over Redis: per-room online sets, session
//! data, and the shared rate-limit counter. Every operation is non-fatal:
//! when Redis is down (or was never configured) the caller gets an "unknown"
//! answer: presence reads return empty, rate limiting allows. A cache outage
//! must never block signaling.

use std::collections::HashMap;

use fred::prelude::*;
use fred::types::{Expiration, Scanner};
use futures::StreamExt;
use tracing::{debug, warn};
use uuid::Uuid;

/// Rolling TTL for per-room presence hashes (1 hour).
const PRESENCE_TTL_SECONDS: i64 = 3600;

/// Outcome of a rate-limit check.
#[derive(Debug, Clone, Copy)]
pub struct RateLimitDecision {
    /// Whether the request is permitted.
    pub allowed: bool,
    /// Remaining requests in the current window.
    pub remaining: i64,
    /// Seconds until the window resets.
    pub reset_in_seconds: i64,
}

impl RateLimitDecision {
    /// The fail-open decision used when the backend is unavailable.
    #[must_use]
    pub const fn allow_all(limit: i64) -> Self {
        Self {
            allowed: true,
            remaining: limit,
            reset_in_seconds: 0,
        }
    }
}

/// One member of a room's online set.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OnlineEntry {
    pub socket_id: Uuid,
}

/// Cache store handle. Cheap to clone; `None` inside means Redis never came
/// up and every operation short-circuits.
#[derive(Clone)]
pub struct Cache {
    client: Option<RedisClient>,
}

impl Cache {
    /// Wrap an optional Redis client.
    #[must_use]
    pub fn new(client: Option<RedisClient>) -> Self {
        Self { client }
    }

    /// A cache with no backend, for tests and degraded startup.
    #[must_use]
    pub fn disabled() -> Self {
        Self { client: None }
    }

    /// Whether a backend is attached.
    #[must_use]
    pub const fn is_available(&self) -> bool {
        self.client.is_some()
    }

    /// Set a key with a TTL.
    pub async fn set(&self, key: &str, value: &str, ttl_seconds: i64) {
        let Some(client) = &self.client else { return };
        let result: Result<(), RedisError> = client
            .set(key, value, Some(Expiration::EX(ttl_seconds)), None, false)
            .await;
        if let Err(e) = result {
            warn!(key = %key, error = %e, "Cache set failed");
        }
    }

    /// Get a key. Returns `None` on miss or backend failure.
    pub async fn get(&self, key: &str) -> Option<String> {
        let client = self.client.as_ref()?;
        match client.get::<Option<String>, _>(key).await {
            Ok(value) => value,
            Err(e) => {
                warn!(key = %key, error = %e, "Cache get failed");
                None
            }
        }
    }

    /// Delete a key.
    pub async fn del(&self, key: &str) {
        let Some(client) = &self.client else { return };
        if let Err(e) = client.del::<(), _>(key).await {
            warn!(key = %key, error = %e, "Cache del failed");
        }
    }

    /// Delete every key matching a glob pattern (SCAN-based, non-blocking).
    pub async fn del_by_pattern(&self, pattern: &str) {
        let Some(client) = &self.client else { return };

        let mut scanner = client.scan(pattern, Some(100), None);
        while let Some(page) = scanner.next().await {
            match page {
                Ok(mut result) => {
                    if let Some(keys) = result.take_results() {
                        for key in keys {
                            if let Err(e) = client.del::<(), _>(key).await {
                                warn!(error = %e, "Cache del failed during pattern delete");
                            }
                        }
                    }
                    let _ = result.next();
                }
                Err(e) => {
                    warn!(pattern = %pattern, error = %e, "Cache scan failed");
                    break;
                }
            }
        }
    }

    /// Set a hash field.
    pub async fn hset(&self, key: &str, field: &str, value: &str) {
        let Some(client) = &self.client else { return };
        if let Err(e) = client.hset::<(), _, _>(key, (field, value)).await {
            warn!(key = %key, error = %e, "Cache hset failed");
        }
    }

    /// Delete a hash field.
    pub async fn hdel(&self, key: &str, field: &str) {
        let Some(client) = &self.client else { return };
        if let Err(e) = client.hdel::<(), _, _>(key, field).await {
            warn!(key = %key, error = %e, "Cache hdel failed");
        }
    }

    /// Read a whole hash. Empty on miss or backend failure.
    pub async fn hget_all(&self, key: &str) -> HashMap<String, String> {
        let Some(client) = &self.client else {
            return HashMap::new();
        };
        match client.hgetall::<HashMap<String, String>, _>(key).await {
            Ok(map) => map,
            Err(e) => {
                warn!(key = %key, error = %e, "Cache hgetall failed");
                HashMap::new()
            }
        }
    }

    // ========================================================================
    // Presence
    // ========================================================================

    /// Record a user as online in a meeting. Refreshes the 1-hour rolling
    /// TTL on every write so active rooms never expire.
    pub async fn add_online_user(&self, meeting_id: &str, user_id: Uuid, socket_id: Uuid) {
        let Some(client) = &self.client else { return };
        let key = presence_key(meeting_id);
        let entry = OnlineEntry { socket_id };
        let value = match serde_json::to_string(&entry) {
            Ok(v) => v,
            Err(e) => {
                warn!(error = %e, "Failed to serialize presence entry");
                return;
            }
        };

        if let Err(e) = client
            .hset::<(), _, _>(&key, (user_id.to_string(), value))
            .await
        {
            warn!(meeting_id = %meeting_id, error = %e, "Presence write failed");
            return;
        }
        if let Err(e) = client.expire::<(), _>(&key, PRESENCE_TTL_SECONDS).await {
            warn!(meeting_id = %meeting_id, error = %e, "Presence TTL refresh failed");
        }
        debug!(meeting_id = %meeting_id, user_id = %user_id, "User online");
    }

    /// Remove a user from a meeting's online set.
    pub async fn remove_online_user(&self, meeting_id: &str, user_id: Uuid) {
        self.hdel(&presence_key(meeting_id), &user_id.to_string())
            .await;
    }

    /// Current online set for a meeting. Empty when the backend is
    /// unavailable; callers fall back to the in-memory room membership.
    pub async fn get_online_users(&self, meeting_id: &str) -> Vec<Uuid> {
        self.hget_all(&presence_key(meeting_id))
            .await
            .into_keys()
            .filter_map(|k| k.parse().ok())
            .collect()
    }

    // ========================================================================
    // Rate limiting
    // ========================================================================

    /// Atomic windowed counter: INCR, and on the first increment of a window
    /// set the key expiry to the window length. Fails open.
    pub async fn check_rate_limit(
        &self,
        key: &str,
        limit: i64,
        window_seconds: i64,
    ) -> RateLimitDecision {
        let Some(client) = &self.client else {
            return RateLimitDecision::allow_all(limit);
        };

        let count: i64 = match client.incr(key).await {
            Ok(count) => count,
            Err(e) => {
                warn!(key = %key, error = %e, "Rate limit check failed, allowing");
                return RateLimitDecision::allow_all(limit);
            }
        };

        if count == 1 {
            if let Err(e) = client.expire::<(), _>(key, window_seconds).await {
                warn!(key = %key, error = %e, "Rate limit expiry set failed");
            }
        }

        let ttl: i64 = client.ttl(key).await.unwrap_or(window_seconds);

        RateLimitDecision {
            allowed: count <= limit,
            remaining: (limit - count).max(0),
            reset_in_seconds: ttl.max(0),
        }
    }
}

/// Redis key for a meeting's online hash.
fn presence_key(meeting_id: &str) -> String {
    format!("meeting:{meeting_id}:online")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_presence_key() {
        assert_eq!(presence_key("ABC-123-XYZ"), "meeting:ABC-123-XYZ:online");
    }

    #[tokio::test]
    async fn test_disabled_cache_fails_open() {
        let cache = Cache::disabled();

        assert!(cache.get("anything").await.is_none());
        assert!(cache.get_online_users("ABC-123-XYZ").await.is_empty());

        let decision = cache.check_rate_limit("rl:login:1.2.3.4", 5, 60).await;
        assert!(decision.allowed);
        assert_eq!(decision.remaining, 5);
    }
}
