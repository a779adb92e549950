use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use reqwest::Client;
use serde_json::Value;
use tokio::sync::RwLock;

/// GitHub endpoint exchanging an OAuth token for a Copilot API token.
const COPILOT_TOKEN_URL: &str = "https://api.github.com/copilot_internal/v2/token";

/// Refresh this many seconds before the token expires.
const REFRESH_MARGIN_SECS: i64 = 120;

/// Manages the Copilot bearer token lifecycle.
///
/// The token payload stays untyped JSON: GitHub adds fields to it freely and
/// only `token` and `expires_at` matter here. Reads take a snapshot behind
/// the lock; the background refresh task is the only writer.
pub struct AuthManager {
    oauth_token: String,
    github_token: RwLock<Option<Value>>,
    client: Client,
}

impl AuthManager {
    pub fn new(oauth_token: String) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .context("Failed to create HTTP client")?;

        Ok(Self {
            oauth_token,
            github_token: RwLock::new(None),
            client,
        })
    }

    /// Current Copilot bearer token, when one is cached.
    pub async fn bearer_token(&self) -> Option<String> {
        let token = self.github_token.read().await;
        token
            .as_ref()
            .and_then(|t| t.get("token"))
            .and_then(Value::as_str)
            .map(str::to_string)
    }

    /// Fetches a new Copilot token from GitHub when forced or near expiry.
    pub async fn refresh(&self, force: bool) -> Result<()> {
        if !force && self.is_token_valid().await {
            return Ok(());
        }

        let response = self
            .client
            .get(COPILOT_TOKEN_URL)
            .header("Authorization", format!("token {}", self.oauth_token))
            .header("Accept", "application/json")
            .header("Editor-Plugin-Version", "copilot.lua")
            .send()
            .await
            .context("token refresh request")?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            anyhow::bail!(
                "token refresh failed with status {}: {}",
                status.as_u16(),
                body.trim()
            );
        }

        let payload: Value = response.json().await.context("decode token response")?;
        {
            let mut token = self.github_token.write().await;
            *token = Some(payload);
        }
        tracing::info!("Copilot token refreshed");
        Ok(())
    }

    /// Whether the cached token is still comfortably within its lifetime.
    async fn is_token_valid(&self) -> bool {
        let token = self.github_token.read().await;
        let Some(expires) = token
            .as_ref()
            .and_then(|t| extract_timestamp(t.get("expires_at")))
        else {
            return false;
        };
        ((Utc::now().timestamp() + REFRESH_MARGIN_SECS) as f64) < expires
    }

    /// Seconds until the next refresh attempt should run.
    async fn refresh_delay(&self) -> Duration {
        let token = self.github_token.read().await;
        let Some(expires) = token
            .as_ref()
            .and_then(|t| extract_timestamp(t.get("expires_at")))
        else {
            return Duration::from_secs(60);
        };
        let refresh_at = expires as i64 - REFRESH_MARGIN_SECS;
        let delta = refresh_at - Utc::now().timestamp();
        Duration::from_secs(delta.max(5) as u64)
    }

    /// Spawns the background task that keeps the token fresh.
    pub fn spawn_refresh_task(self: &Arc<Self>) -> tokio::task::JoinHandle<()> {
        let auth = Arc::clone(self);
        tokio::spawn(async move {
            loop {
                tokio::time::sleep(auth.refresh_delay().await).await;
                if let Err(e) = auth.refresh(false).await {
                    tracing::warn!("token refresh error: {}", e);
                }
            }
        })
    }
}

/// Converts the various expires_at representations into unix seconds.
fn extract_timestamp(v: Option<&Value>) -> Option<f64> {
    match v? {
        Value::Number(n) => n.as_f64(),
        Value::String(s) if !s.is_empty() => s.parse::<f64>().ok().or_else(|| {
            DateTime::parse_from_rfc3339(s)
                .ok()
                .map(|t| t.timestamp() as f64)
        }),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn manager_with_token(payload: Value) -> AuthManager {
        AuthManager {
            oauth_token: "gho_test".to_string(),
            github_token: RwLock::new(Some(payload)),
            client: Client::new(),
        }
    }

    #[tokio::test]
    async fn test_bearer_token_snapshot() {
        let manager = manager_with_token(json!({"token": "copilot-abc"}));
        assert_eq!(manager.bearer_token().await, Some("copilot-abc".to_string()));
    }

    #[tokio::test]
    async fn test_bearer_token_absent() {
        let manager = AuthManager::new("gho_test".to_string()).unwrap();
        assert_eq!(manager.bearer_token().await, None);

        let manager = manager_with_token(json!({"expires_at": 0}));
        assert_eq!(manager.bearer_token().await, None);
    }

    #[tokio::test]
    async fn test_token_validity_window() {
        let soon = Utc::now().timestamp() + 60;
        let manager = manager_with_token(json!({"token": "t", "expires_at": soon}));
        // Expires within the refresh margin
        assert!(!manager.is_token_valid().await);

        let later = Utc::now().timestamp() + 3600;
        let manager = manager_with_token(json!({"token": "t", "expires_at": later}));
        assert!(manager.is_token_valid().await);
    }

    #[tokio::test]
    async fn test_refresh_delay_bounds() {
        let manager = AuthManager::new("gho_test".to_string()).unwrap();
        // No expiry information: poll every minute
        assert_eq!(manager.refresh_delay().await, Duration::from_secs(60));

        let past = Utc::now().timestamp() - 10;
        let manager = manager_with_token(json!({"expires_at": past}));
        // Already expired: retry shortly
        assert_eq!(manager.refresh_delay().await, Duration::from_secs(5));
    }

    #[test]
    fn test_extract_timestamp_kinds() {
        assert_eq!(extract_timestamp(Some(&json!(1700000000))), Some(1700000000.0));
        assert_eq!(
            extract_timestamp(Some(&json!(1700000000.5))),
            Some(1700000000.5)
        );
        assert_eq!(
            extract_timestamp(Some(&json!("1700000000"))),
            Some(1700000000.0)
        );
        assert_eq!(
            extract_timestamp(Some(&json!("2023-11-14T22:13:20Z"))),
            Some(1700000000.0)
        );
        assert_eq!(extract_timestamp(Some(&json!(""))), None);
        assert_eq!(extract_timestamp(Some(&json!(null))), None);
        assert_eq!(extract_timestamp(None), None);
    }
}
