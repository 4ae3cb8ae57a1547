//! Periodic timestamp records

use crate::server::ServerContext;
use crate::types::TimestampRecord;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tracing::{debug, warn};

/// Background task that stamps the shared log with the current time
pub struct TimestampProducer {
    ctx: ServerContext,
}

impl TimestampProducer {
    /// Create a producer writing into the context's log
    pub fn new(ctx: ServerContext) -> Self {
        Self { ctx }
    }

    /// Append a timestamp record every interval until shutdown begins.
    ///
    /// The first record lands one full interval after start. A failed append
    /// is logged and skipped; the next tick is the retry. Returns the number
    /// of records written.
    pub async fn run(self) -> u64 {
        if !self.ctx.config().timestamp.enabled {
            return 0;
        }

        let period = self.ctx.config().timestamp_interval();
        let mut ticker = interval_at(Instant::now() + period, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut written = 0u64;

        loop {
            tokio::select! {
                biased;
                _ = self.ctx.running().cancelled() => break,
                _ = ticker.tick() => {
                    let record = TimestampRecord::now();
                    match self.ctx.log().append(record.to_line().as_bytes()).await {
                        Ok(()) => {
                            written += 1;
                            debug!(%record, "Timestamp appended");
                        }
                        Err(e) => warn!("Failed to append timestamp record: {}", e),
                    }
                }
            }
        }

        written
    }
}
