/// Short-lived pairing tokens for browser relay authentication
///
/// A token is issued when a login attempt needs the user to scan a
/// pairing code. The browser presents it once on the relay endpoint;
/// redemption consumes it.
use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

use tokio::time::Instant;
use uuid::Uuid;

/// How long an issued token stays redeemable.
pub const TOKEN_TTL: Duration = Duration::from_secs(10 * 60);

struct TokenEntry {
    user_id: String,
    expires_at: Instant,
}

/// In-memory store of single-use pairing tokens.
pub struct PairingTokens {
    tokens: Mutex<HashMap<String, TokenEntry>>,
}

impl PairingTokens {
    pub fn new() -> Self {
        PairingTokens {
            tokens: Mutex::new(HashMap::new()),
        }
    }

    /// Issue a fresh token for a user. Expired entries are purged on the way.
    pub fn issue(&self, user_id: &str) -> String {
        let token = Uuid::new_v4().to_string();
        let now = Instant::now();

        let mut tokens = self.tokens.lock().unwrap_or_else(|e| e.into_inner());
        tokens.retain(|_, entry| entry.expires_at > now);
        tokens.insert(
            token.clone(),
            TokenEntry {
                user_id: user_id.to_string(),
                expires_at: now + TOKEN_TTL,
            },
        );

        log::debug!("issued pairing token for user {}", user_id);
        token
    }

    /// Redeem a token, returning the user it was issued for.
    ///
    /// The entry is removed whether or not it is still valid, so a token
    /// can never be presented twice.
    pub fn redeem(&self, token: &str) -> Option<String> {
        let mut tokens = self.tokens.lock().unwrap_or_else(|e| e.into_inner());
        let entry = tokens.remove(token)?;
        if entry.expires_at <= Instant::now() {
            log::debug!("rejected expired pairing token for user {}", entry.user_id);
            return None;
        }
        Some(entry.user_id)
    }
}

impl Default for PairingTokens {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_issue_and_redeem() {
        let tokens = PairingTokens::new();
        let token = tokens.issue("user-1");

        assert_eq!(tokens.redeem(&token), Some("user-1".to_string()));
    }

    #[tokio::test]
    async fn test_redeem_is_single_use() {
        let tokens = PairingTokens::new();
        let token = tokens.issue("user-1");

        assert!(tokens.redeem(&token).is_some());
        assert!(tokens.redeem(&token).is_none());
    }

    #[tokio::test]
    async fn test_unknown_token_rejected() {
        let tokens = PairingTokens::new();
        tokens.issue("user-1");

        assert!(tokens.redeem("not-a-token").is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_expired_token_rejected() {
        let tokens = PairingTokens::new();
        let token = tokens.issue("user-1");

        tokio::time::advance(TOKEN_TTL + Duration::from_secs(1)).await;

        assert!(tokens.redeem(&token).is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_issue_purges_expired_entries() {
        let tokens = PairingTokens::new();
        let stale = tokens.issue("user-1");

        tokio::time::advance(TOKEN_TTL + Duration::from_secs(1)).await;
        let fresh = tokens.issue("user-2");

        let map = tokens.tokens.lock().expect("Failed to lock tokens");
        assert!(!map.contains_key(&stale));
        assert!(map.contains_key(&fresh));
    }

    #[tokio::test]
    async fn test_tokens_are_unique_per_issue() {
        let tokens = PairingTokens::new();
        let a = tokens.issue("user-1");
        let b = tokens.issue("user-1");

        assert_ne!(a, b);
        assert_eq!(tokens.redeem(&a), Some("user-1".to_string()));
        assert_eq!(tokens.redeem(&b), Some("user-1".to_string()));
    }
}
