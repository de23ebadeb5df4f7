//! Background reclaim of expired references.

use crate::services::engine::DuesEngine;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

pub struct ReferenceSweeper {
    engine: DuesEngine,
    interval: Duration,
    shutdown_token: CancellationToken,
}

impl ReferenceSweeper {
    pub fn new(engine: DuesEngine, interval: Duration, shutdown_token: CancellationToken) -> Self {
        Self {
            engine,
            interval,
            shutdown_token,
        }
    }

    pub fn spawn(self) -> JoinHandle<()> {
        tokio::spawn(self.run())
    }

    /// Sweep on every tick until the token is cancelled.
    pub async fn run(self) {
        tracing::info!(
            interval_secs = self.interval.as_secs(),
            "Starting reference sweeper"
        );

        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = self.shutdown_token.cancelled() => {
                    tracing::info!("Reference sweeper shutting down");
                    break;
                }
                _ = ticker.tick() => {
                    match self.engine.expire_stale_references().await {
                        Ok(expired) if !expired.is_empty() => {
                            tracing::info!(count = expired.len(), "Sweeper released expired references");
                        }
                        Ok(_) => {}
                        Err(e) => {
                            tracing::error!(error = %e, "Reference sweep failed");
                        }
                    }
                }
            }
        }
    }
}
