//! Token Refresh
//!
//! Single responsibility: Exchange the refresh token for a new access token
//! on a fixed interval. Token expiry and renewal live in this one module.
//!
//! A refresh failure is terminal for the session: running on a stale token
//! is worse than dropping the link, so the failure callback (wired to
//! disconnect by the client) fires and the task stops.

use serde::Deserialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::config::RealtimeConfig;
use crate::error::RealtimeError;

pub type TokenSink = Arc<dyn Fn(String) + Send + Sync>;
pub type FailureSink = Arc<dyn Fn(RealtimeError) + Send + Sync>;

#[derive(Deserialize)]
struct RefreshResponse {
    access_token: String,
}

/// Periodic access-token renewal against the configured HTTP endpoint.
pub struct TokenRefresher {
    http: reqwest::Client,
    endpoint: String,
    refresh_token: String,
    interval: Duration,
}

impl TokenRefresher {
    /// Build a refresher from config. Returns `None` when refresh is not
    /// configured (no endpoint or no refresh token).
    pub fn from_config(config: &RealtimeConfig) -> Option<Self> {
        let endpoint = config.token_refresh_url.clone()?;
        let refresh_token = config.refresh_token.clone()?;
        Some(Self {
            http: reqwest::Client::new(),
            endpoint,
            refresh_token,
            interval: config.token_refresh_interval(),
        })
    }

    /// Exchange the refresh token for a new access token.
    pub async fn refresh_once(&self) -> Result<String, RealtimeError> {
        debug!(endpoint = %self.endpoint, "Refreshing access token");

        let response = self
            .http
            .post(&self.endpoint)
            .header("Authorization", format!("Bearer {}", self.refresh_token))
            .timeout(Duration::from_secs(10))
            .send()
            .await
            .map_err(|e| RealtimeError::TokenRefresh(format!("request failed: {}", e)))?;

        if !response.status().is_success() {
            return Err(RealtimeError::TokenRefresh(format!(
                "endpoint returned {}",
                response.status()
            )));
        }

        let body: RefreshResponse = response
            .json()
            .await
            .map_err(|e| RealtimeError::TokenRefresh(format!("bad response body: {}", e)))?;

        debug!("Access token refreshed");
        Ok(body.access_token)
    }

    /// Spawn the refresh loop. Each tick delivers the new token through
    /// `on_token`; the first failure fires `on_failure` and ends the task.
    /// Cancelling the token stops the loop without a final refresh.
    pub fn spawn(
        self,
        cancel: CancellationToken,
        on_token: TokenSink,
        on_failure: FailureSink,
    ) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(self.interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            // The first tick completes immediately; skip it so the token
            // obtained at connect time serves its full interval.
            ticker.tick().await;

            loop {
                tokio::select! {
                    _ = cancel.cancelled() => {
                        debug!("Token refresh task cancelled");
                        return;
                    }
                    _ = ticker.tick() => {
                        match self.refresh_once().await {
                            Ok(token) => on_token(token),
                            Err(e) => {
                                warn!(error = %e, "Token refresh failed, giving up the session");
                                on_failure(e);
                                return;
                            }
                        }
                    }
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn config_with_refresh() -> RealtimeConfig {
        let mut config = RealtimeConfig::default();
        config.token_refresh_url = Some("http://127.0.0.1:9/refresh".into());
        config.refresh_token = Some("refresh-1".into());
        config
    }

    #[test]
    fn refresher_requires_endpoint_and_token() {
        assert!(TokenRefresher::from_config(&RealtimeConfig::default()).is_none());

        let mut config = config_with_refresh();
        config.refresh_token = None;
        assert!(TokenRefresher::from_config(&config).is_none());

        assert!(TokenRefresher::from_config(&config_with_refresh()).is_some());
    }

    #[tokio::test]
    async fn unreachable_endpoint_fires_failure_and_stops() {
        // Port 9 (discard) refuses connections; the first tick must fail.
        let mut config = config_with_refresh();
        config.token_refresh_interval_ms = 10;
        let refresher = TokenRefresher::from_config(&config).unwrap();

        let failures = Arc::new(AtomicUsize::new(0));
        let failures_seen = failures.clone();
        let handle = refresher.spawn(
            CancellationToken::new(),
            Arc::new(|_| panic!("no token expected")),
            Arc::new(move |_| {
                failures_seen.fetch_add(1, Ordering::SeqCst);
            }),
        );

        handle.await.unwrap();
        assert_eq!(failures.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn cancellation_stops_the_loop() {
        let refresher = TokenRefresher::from_config(&config_with_refresh()).unwrap();
        let cancel = CancellationToken::new();
        let handle = refresher.spawn(
            cancel.clone(),
            Arc::new(|_| {}),
            Arc::new(|_| panic!("no refresh should run")),
        );
        cancel.cancel();
        handle.await.unwrap();
    }
}
