use std::time::{Duration, Instant};

use tracing::info;

/// Counters kept by the connection manager.
#[derive(Debug, Clone)]
pub struct LinkStats {
    pub sent: u64,
    pub broadcast: u64,
    pub write_failures: u64,
    pub responses: u64,
    pub unmatched: u64,
    pub unparseable: u64,
    pub timeouts: u64,
    last: Instant,
}

impl Default for LinkStats {
    fn default() -> Self {
        Self::new()
    }
}

impl LinkStats {
    pub fn new() -> Self {
        Self {
            sent: 0,
            broadcast: 0,
            write_failures: 0,
            responses: 0,
            unmatched: 0,
            unparseable: 0,
            timeouts: 0,
            last: Instant::now(),
        }
    }

    /// Logs a summary at most once per `interval`.
    pub fn maybe_log(&mut self, interval: Duration, pending: usize) {
        if self.last.elapsed() >= interval {
            info!(
                sent = self.sent,
                broadcast = self.broadcast,
                write_failures = self.write_failures,
                responses = self.responses,
                unmatched = self.unmatched,
                unparseable = self.unparseable,
                timeouts = self.timeouts,
                pending,
                "link stats"
            );
            self.last = Instant::now();
        }
    }
}
