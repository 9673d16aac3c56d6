//! Connection lifecycle monitor.
//!
//! A single periodic task scans every live connection and force-closes any
//! that has outlived the configured maximum age, bounding resource usage
//! from abandoned or half-open sessions. The close travels through the
//! connection's normal writer channel, so teardown and channel cleanup are
//! identical to a client-initiated disconnect.
//!
//! The sweep is deliberately coarse: a connection can live up to one sweep
//! period past the threshold. There are no per-connection timers.

use std::sync::Arc;

use axum::extract::ws::Message;
use tokio::time::Duration;

use crate::relay::RelayState;

/// Spawns the periodic staleness sweeper.
///
/// Every `period`, connections older than `max_age` are sent a close frame.
pub fn spawn_sweeper(
    state: Arc<RelayState>,
    period: Duration,
    max_age: Duration,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(period);
        // The first tick completes immediately; nothing can be stale yet.
        ticker.tick().await;
        loop {
            ticker.tick().await;
            sweep_once(&state, max_age).await;
        }
    })
}

/// Runs one staleness sweep over all live connections.
pub async fn sweep_once(state: &Arc<RelayState>, max_age: Duration) {
    let stale = state.channels.stale(max_age).await;
    if stale.is_empty() {
        tracing::debug!("sweep found no stale connections");
        return;
    }
    for conn in stale {
        tracing::info!(
            channel = %conn.channel_id,
            conn = conn.conn_id,
            "closing stale connection"
        );
        // The writer task stops after transmitting the close frame, which
        // runs the same eviction path as a natural disconnect. A send error
        // means the connection is already tearing down.
        let _ = conn.sender.send(Message::Close(None));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::mpsc;

    const ID: &str = "abcdefghijklmnopqrst1";

    #[tokio::test(start_paused = true)]
    async fn sweep_closes_only_stale_connections() {
        let state = Arc::new(RelayState::new());

        let (old_tx, mut old_rx) = mpsc::unbounded_channel();
        state.channels.admit(ID, 1, old_tx).await.unwrap();

        tokio::time::advance(Duration::from_secs(360)).await;

        let (young_tx, mut young_rx) = mpsc::unbounded_channel();
        state.channels.admit(ID, 2, young_tx).await.unwrap();

        sweep_once(&state, Duration::from_secs(300)).await;

        let frame = old_rx.try_recv().unwrap();
        assert!(matches!(frame, Message::Close(_)));
        assert!(young_rx.try_recv().is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn sweep_is_quiet_when_nothing_is_stale() {
        let state = Arc::new(RelayState::new());

        let (tx, mut rx) = mpsc::unbounded_channel();
        state.channels.admit(ID, 1, tx).await.unwrap();

        tokio::time::advance(Duration::from_secs(60)).await;
        sweep_once(&state, Duration::from_secs(300)).await;

        assert!(rx.try_recv().is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn sweep_tolerates_already_closed_connection() {
        let state = Arc::new(RelayState::new());

        let (tx, rx) = mpsc::unbounded_channel();
        state.channels.admit(ID, 1, tx).await.unwrap();
        drop(rx);

        tokio::time::advance(Duration::from_secs(360)).await;
        // Send fails silently; the handler side is already gone.
        sweep_once(&state, Duration::from_secs(300)).await;
    }
}
