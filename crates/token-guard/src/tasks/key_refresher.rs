//! Key refresher background task.
//!
//! Periodically refreshes the key store so that provider-side key rotation is
//! picked up before it causes a cold miss on the request path. The first
//! refresh runs immediately, warming the cache.
//!
//! Scheduled refreshes go through the key store's single-flight path: if a
//! cache-miss refresh is already running, the tick waits on it instead of
//! issuing a second fetch.
//!
//! # Graceful Shutdown
//!
//! The task supports graceful shutdown via a cancellation token. When the token
//! is cancelled, the task exits without waiting for the next tick.

use crate::auth::key_store::{KeyStore, RefreshTrigger};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{info, instrument, warn};

/// Run the key refresher until `cancel_token` is cancelled.
///
/// # Arguments
///
/// * `store` - Key store to refresh
/// * `refresh_interval` - Time between refreshes
/// * `cancel_token` - Token for graceful shutdown
#[instrument(skip_all, name = "guard.task.key_refresher")]
pub async fn start_key_refresher(
    store: KeyStore,
    refresh_interval: Duration,
    cancel_token: CancellationToken,
) {
    info!(
        target: "guard.task.key_refresher",
        refresh_interval_seconds = refresh_interval.as_secs(),
        "Starting key refresher task"
    );

    let mut interval = tokio::time::interval(refresh_interval);
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = interval.tick() => {
                // Failures keep the previous key set; retry on the next tick.
                if let Err(e) = store.refresh_for(RefreshTrigger::Scheduled).await {
                    warn!(
                        target: "guard.task.key_refresher",
                        error = %e,
                        "Scheduled key refresh failed"
                    );
                }
            }
            _ = cancel_token.cancelled() => {
                info!(
                    target: "guard.task.key_refresher",
                    "Key refresher task received shutdown signal, exiting"
                );
                break;
            }
        }
    }

    info!(
        target: "guard.task.key_refresher",
        "Key refresher task stopped"
    );
}

/// Spawn [`start_key_refresher`] on the current runtime.
pub fn spawn_key_refresher(
    store: KeyStore,
    refresh_interval: Duration,
    cancel_token: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(start_key_refresher(store, refresh_interval, cancel_token))
}
