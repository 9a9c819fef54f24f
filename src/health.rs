use tracing::warn;

/// Verdict returned by the stall policy after evaluating one log sample.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Health {
    /// New, healthy output since the previous poll.
    Progressing,
    /// Output frozen or showing the error marker (includes 1-based streak length).
    Stalled { streak: u32 },
    /// The stall streak reached the threshold — the worker must be restarted.
    RestartDue,
}

/// Stall-detection policy for the watched worker.
///
/// Tracks the last observed log line and a consecutive-stall counter.
/// A sample counts as a stall when it is identical to the previous sample
/// OR contains the error marker; both feed the same counter and the same
/// restart action. The first sample ever observed counts as progress.
pub struct StallPolicy {
    threshold: u32,
    error_marker: String,
    last_sample: Option<String>,
    stall_count: u32,
}

impl StallPolicy {
    /// Create a new policy from config values.
    pub fn new(threshold: u32, error_marker: &str) -> Self {
        Self {
            threshold,
            error_marker: error_marker.to_string(),
            last_sample: None,
            stall_count: 0,
        }
    }

    /// Evaluate the latest log sample and decide whether the worker is healthy.
    ///
    /// Progress resets the counter and remembers the sample; a stall leaves
    /// the remembered sample untouched so a worker stuck repeating an error
    /// line keeps counting against the same baseline.
    pub fn observe(&mut self, sample: &str) -> Health {
        let fresh = self.last_sample.as_deref() != Some(sample);
        if fresh && !sample.contains(&self.error_marker) {
            self.stall_count = 0;
            self.last_sample = Some(sample.to_string());
            return Health::Progressing;
        }

        self.stall_count += 1;
        if self.stall_count >= self.threshold {
            warn!(
                streak = self.stall_count,
                threshold = self.threshold,
                "stall streak reached restart threshold"
            );
            Health::RestartDue
        } else {
            Health::Stalled {
                streak: self.stall_count,
            }
        }
    }

    /// Reset the stall counter after a restart cycle (or an absent-log
    /// restart). The remembered sample is kept.
    pub fn reset(&mut self) {
        self.stall_count = 0;
    }

    /// Current consecutive-stall count (0 = progressing).
    pub fn stall_count(&self) -> u32 {
        self.stall_count
    }
}
