//! Process-wide keepalive: one timer pings every registered connection.
//!
//! Pongs only refresh a connection's last-activity time. Unresponsive
//! clients are not evicted here; sessions end on transport close.

use std::sync::Arc;
use std::time::Duration;

use metrics::counter;
use tokio::time::{self, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use super::registry::ConnectionRegistry;

/// Periodically pings all live connections.
#[derive(Debug)]
pub struct KeepaliveScheduler {
    registry: Arc<ConnectionRegistry>,
    initial_delay: Duration,
    interval: Duration,
}

impl KeepaliveScheduler {
    /// Create a scheduler that first fires after `initial_delay`, then every
    /// `interval`.
    pub fn new(registry: Arc<ConnectionRegistry>, initial_delay: Duration, interval: Duration) -> Self {
        Self {
            registry,
            initial_delay,
            interval,
        }
    }

    /// Ping every open connection once. Returns the number of pings
    /// attempted.
    pub async fn fire_once(&self) -> usize {
        let mut queued = 0_u64;
        let attempted = self
            .registry
            .for_each(|conn| {
                if conn.ping() {
                    queued += 1;
                } else {
                    debug!(conn_id = %conn.id, "keepalive ping not queued");
                }
            })
            .await;
        counter!("ws_pings_sent_total").increment(queued);
        debug!(attempted, queued, "keepalive tick");
        attempted
    }

    /// Fire until `cancel` is triggered. Returns the number of ticks fired.
    pub async fn run(self, cancel: CancellationToken) -> u64 {
        let mut ticker = time::interval_at(Instant::now() + self.initial_delay, self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        info!(
            initial_delay_ms = u64::try_from(self.initial_delay.as_millis()).unwrap_or(u64::MAX),
            interval_ms = u64::try_from(self.interval.as_millis()).unwrap_or(u64::MAX),
            "keepalive scheduler started"
        );

        let mut ticks = 0;
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    let _ = self.fire_once().await;
                    ticks += 1;
                }
                () = cancel.cancelled() => {
                    debug!(ticks, "keepalive scheduler stopped");
                    return ticks;
                }
            }
        }
    }
}
