//! Run lifecycle derived from the event log

use serde::{Deserialize, Serialize};

use super::EventKind;

/// Status of one `(experiment, run)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum RunStatus {
    /// No start event recorded
    Pending,
    /// Started and not yet stopped
    Started,
    /// A stop event follows the last start
    Stopped,
}

impl RunStatus {
    /// Status implied by a run's events in log order. Events other than
    /// start and stop are ignored.
    #[must_use]
    pub fn from_events<'a, I>(events: I) -> Self
    where
        I: IntoIterator<Item = &'a EventKind>,
    {
        events.into_iter().fold(Self::Pending, |status, event| match event {
            EventKind::Start => Self::Started,
            EventKind::Stop if status != Self::Pending => Self::Stopped,
            _ => status,
        })
    }

    /// Check if the run is still open.
    #[must_use]
    pub const fn is_started(&self) -> bool {
        matches!(self, Self::Started)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_run_status_default() {
        assert_eq!(RunStatus::from_events(&[]), RunStatus::Pending);
        assert_eq!(RunStatus::from_events(&[EventKind::Metric]), RunStatus::Pending);
    }

    #[test]
    fn test_run_lifecycle() {
        let started = [EventKind::Start, EventKind::Metric];
        assert_eq!(RunStatus::from_events(&started), RunStatus::Started);
        assert!(RunStatus::from_events(&started).is_started());

        let stopped = [EventKind::Start, EventKind::Metric, EventKind::Stop];
        assert_eq!(RunStatus::from_events(&stopped), RunStatus::Stopped);
    }

    #[test]
    fn test_stop_without_start_stays_pending() {
        assert_eq!(RunStatus::from_events(&[EventKind::Stop]), RunStatus::Pending);
    }
}
