//! Byte-level progress accounting for streamed transfers.
//!
//! Wraps a progress channel sender and emits throttled updates as bytes
//! arrive. Updates use non-blocking sends; when the channel is full the
//! update is dropped, never the bytes.

use std::time::Instant;

use tokio::sync::mpsc;
use tracing::warn;

use nugsd_core::ProgressUpdate;

/// Minimum interval between emitted updates for known-size transfers.
const UPDATE_INTERVAL_MS: u128 = 500;

/// Unknown-size transfers update twice as often; percentage is
/// indeterminate, so byte counts are all the observer has.
const UNKNOWN_SIZE_INTERVAL_MS: u128 = UPDATE_INTERVAL_MS / 2;

/// Minimum elapsed time before a speed is computed.
const SPEED_WARMUP_MS: u128 = 500;

/// Counts bytes for one transfer and reports throttled progress.
pub struct ProgressCounter {
    job_id: String,
    total: i64,
    downloaded: i64,
    started: Instant,
    last_update: Option<Instant>,
    tx: mpsc::Sender<ProgressUpdate>,
}

impl ProgressCounter {
    /// Create a counter for a transfer. `total` is the expected byte count,
    /// or -1 when the server sent no Content-Length.
    pub fn new(job_id: impl Into<String>, total: i64, tx: mpsc::Sender<ProgressUpdate>) -> Self {
        Self {
            job_id: job_id.into(),
            total,
            downloaded: 0,
            started: Instant::now(),
            last_update: None,
            tx,
        }
    }

    /// Total bytes recorded so far.
    #[must_use]
    pub const fn downloaded(&self) -> i64 {
        self.downloaded
    }

    /// Record `n` received bytes, emitting a progress update when due.
    ///
    /// The first write always emits; afterwards at most one update per
    /// interval goes out.
    pub fn add(&mut self, n: usize) {
        self.downloaded += n as i64;

        let now = Instant::now();
        let interval = if self.total > 0 {
            UPDATE_INTERVAL_MS
        } else {
            UNKNOWN_SIZE_INTERVAL_MS
        };
        let due = match self.last_update {
            None => true,
            Some(last) => now.duration_since(last).as_millis() >= interval,
        };
        if !due {
            return;
        }
        self.last_update = Some(now);

        let percentage = if self.total > 0 {
            self.downloaded as f64 / self.total as f64 * 100.0
        } else {
            -1.0
        };

        let elapsed_ms = now.duration_since(self.started).as_millis();
        let speed_bps = if elapsed_ms > SPEED_WARMUP_MS && self.downloaded > 0 {
            (self.downloaded as i128 * 1000 / elapsed_ms as i128) as i64
        } else {
            0
        };

        let update = ProgressUpdate {
            job_id: self.job_id.clone(),
            percentage,
            speed_bps,
            bytes_downloaded: self.downloaded,
            total_bytes: self.total,
            ..ProgressUpdate::default()
        };
        if self.tx.try_send(update).is_err() {
            warn!(job_id = %self.job_id, "Progress channel full, discarding update");
        }
    }

    /// Build the final update for a finished transfer: 100%, speed zeroed.
    #[must_use]
    pub fn final_update(&self) -> ProgressUpdate {
        ProgressUpdate {
            job_id: self.job_id.clone(),
            percentage: 100.0,
            speed_bps: 0,
            bytes_downloaded: self.downloaded,
            total_bytes: self.total,
            ..ProgressUpdate::default()
        }
    }
}
