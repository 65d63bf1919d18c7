//! Reconnect supervisor
//!
//! A single background loop that checks the session on a fixed interval and
//! re-establishes lost connections with exponential backoff. Each attempt
//! gets a deadline equal to the current backoff, so a hung connect cannot
//! wedge the loop. The supervisor is the only component that retries —
//! every other caller of `connect` gets exactly one attempt.

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::{MissedTickBehavior, timeout};
use tokio_util::sync::CancellationToken;

use super::SessionManager;
use crate::config::ReconnectConfig;

/// Smallest useful backoff; also the floor for very short check intervals
const BACKOFF_FLOOR: Duration = Duration::from_secs(1);

/// Backoff after a failed attempt: doubled, capped at `max`
#[must_use]
pub fn next_backoff(current: Duration, max: Duration) -> Duration {
    current.saturating_mul(2).min(max)
}

/// Backoff after a success or a healthy tick: back to the check interval
#[must_use]
pub fn reset_backoff(interval: Duration) -> Duration {
    interval.max(BACKOFF_FLOOR)
}

/// Spawn the supervisor loop. Cancelling the token stops it after the
/// current tick; an in-flight attempt is abandoned at its deadline.
pub fn spawn(
    session: Arc<SessionManager>,
    config: ReconnectConfig,
    cancel: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(run(session, config, cancel))
}

async fn run(session: Arc<SessionManager>, config: ReconnectConfig, cancel: CancellationToken) {
    let mut ticker = tokio::time::interval(config.interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    // Skip the immediate first tick.
    ticker.tick().await;

    let mut backoff = reset_backoff(config.interval);

    loop {
        tokio::select! {
            () = cancel.cancelled() => {
                tracing::info!("reconnect loop stopped");
                return;
            }
            _ = ticker.tick() => {}
        }

        if session.is_connected() {
            backoff = reset_backoff(config.interval);
            continue;
        }

        if !session.has_session() {
            tracing::debug!("no stored session, skipping reconnect");
            continue;
        }

        tracing::info!(backoff = ?backoff, "connection lost, attempting reconnect");

        match timeout(backoff, session.connect()).await {
            Ok(Ok(())) => {
                tracing::info!("reconnected");
                backoff = reset_backoff(config.interval);
            }
            Ok(Err(e)) => {
                let next = next_backoff(backoff, config.max_backoff);
                tracing::warn!(error = %e, next_backoff = ?next, "reconnect failed");
                backoff = next;
            }
            Err(_) => {
                let next = next_backoff(backoff, config.max_backoff);
                tracing::warn!(deadline = ?backoff, next_backoff = ?next, "reconnect timed out");
                backoff = next;
            }
        }
    }
}
