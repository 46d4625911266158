use crate::PROGRESS_INTERVAL;

/// Coarsens per-block progress to one report per 256 KiB plus a final
/// report at completion, so callers are not flooded with per-chunk
/// updates.
pub struct ProgressThrottle {
    total: u64,
    sent: u64,
    last_report: u64,
}

impl ProgressThrottle {
    pub fn new(total: u64) -> Self {
        Self {
            total,
            sent: 0,
            last_report: 0,
        }
    }

    /// Accounts for `bytes` more sent. Returns `(sent, total)` when a
    /// report is due.
    pub fn advance(&mut self, bytes: u64) -> Option<(u64, u64)> {
        self.sent += bytes;
        if self.sent - self.last_report >= PROGRESS_INTERVAL || self.sent == self.total {
            self.last_report = self.sent;
            Some((self.sent, self.total))
        } else {
            None
        }
    }

    /// Final report, in case the last `advance` fell between intervals.
    pub fn finish(&mut self) -> Option<(u64, u64)> {
        if self.sent != self.last_report {
            self.last_report = self.sent;
            Some((self.sent, self.total))
        } else {
            None
        }
    }

    /// Bytes accounted for so far.
    pub fn sent(&self) -> u64 {
        self.sent
    }
}
