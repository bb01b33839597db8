use std::fmt;
use tracing::info;

/// A snapshot of coverage progress handed to a [`ProgressObserver`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CoverageProgress {
    /// Number of distinct nodes seen since the last registration.
    pub covered: usize,
    /// Number of nodes in the registered graph.
    pub total: usize,
}

impl CoverageProgress {
    /// Fraction of the graph covered, `0.0` for an empty graph.
    pub fn ratio(&self) -> f64 {
        if self.total == 0 {
            0.0
        } else {
            self.covered as f64 / self.total as f64
        }
    }
}

impl fmt::Display for CoverageProgress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} / {}", self.covered, self.total)
    }
}

/// A `ProgressObserver` is the sink for coverage progress notifications.
///
/// The `CoverageTracker` invokes its observer after a batch of hits has
/// marked at least one previously unseen node. Nothing is reported for
/// batches that only repeat known nodes.
///
/// Notifications are fire-and-forget: an `Err` returned from
/// [`on_progress`](ProgressObserver::on_progress) is logged by the tracker
/// and never fails the hit report that triggered it. Implementations must
/// not block, since they run while the tracker lock is held.
pub trait ProgressObserver: Send + Sync {
    /// Returns a static string name identifying the observer in log output.
    fn name(&self) -> &'static str;

    /// Called with the coverage counters as they stand after the update.
    ///
    /// # Returns
    /// `Ok(())` on success, or an `anyhow::Error` if the sink could not
    /// accept the notification.
    fn on_progress(&self, progress: &CoverageProgress) -> Result<(), anyhow::Error>;
}

/// A `NoOpObserver` discards every notification.
///
/// Useful when the service runs embedded and progress is read through the
/// tracker accessors instead.
#[derive(Default, Debug, Clone, Copy)]
pub struct NoOpObserver;

impl ProgressObserver for NoOpObserver {
    fn name(&self) -> &'static str {
        "NoOpObserver"
    }

    fn on_progress(&self, _progress: &CoverageProgress) -> Result<(), anyhow::Error> {
        Ok(())
    }
}

/// A `LogObserver` writes each notification as a structured `tracing` event
/// at `info` level, rendered as `covered / total`.
#[derive(Default, Debug, Clone, Copy)]
pub struct LogObserver;

impl LogObserver {
    pub fn new() -> Self {
        LogObserver
    }
}

impl ProgressObserver for LogObserver {
    fn name(&self) -> &'static str {
        "LogObserver"
    }

    fn on_progress(&self, progress: &CoverageProgress) -> Result<(), anyhow::Error> {
        info!(
            covered = progress.covered,
            total = progress.total,
            ratio = progress.ratio(),
            "{progress}"
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn progress_ratio_and_display() {
        let progress = CoverageProgress {
            covered: 3,
            total: 4,
        };
        assert_eq!(progress.to_string(), "3 / 4");
        assert!((progress.ratio() - 0.75).abs() < f64::EPSILON);

        let empty = CoverageProgress {
            covered: 0,
            total: 0,
        };
        assert_eq!(empty.ratio(), 0.0, "Empty graph must not divide by zero");
    }

    #[test]
    fn builtin_observers_accept_notifications() {
        let progress = CoverageProgress {
            covered: 1,
            total: 2,
        };
        assert_eq!(NoOpObserver.name(), "NoOpObserver");
        assert!(NoOpObserver.on_progress(&progress).is_ok());
        assert_eq!(LogObserver::new().name(), "LogObserver");
        assert!(LogObserver::new().on_progress(&progress).is_ok());
    }
}
