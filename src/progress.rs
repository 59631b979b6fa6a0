use std::panic::{AssertUnwindSafe, catch_unwind};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tracing::{debug, error};

use crate::track::Track;

/// Why a track was not recorded
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SkipReason {
    /// A previous recording exists at this path
    AlreadyRecorded(PathBuf),
    /// The user asked to skip the track or stop the run
    Interrupted,
    /// Recording failed with the given error
    Failed(String),
}

/// Events emitted by the recording worker
#[derive(Debug, Clone)]
pub enum ProgressEvent {
    /// Handshake is being performed
    Connecting { username: String },

    /// Radio is tuned to a station
    Tuned { url: String, station_name: String },

    /// A station URL was given up
    StationFailed { url: String, error: String },

    /// The playlist endpoint asked us to slow down
    RateLimited { retry_in: Duration },

    /// A playlist batch was fetched
    PlaylistFetched { track_count: usize },

    /// Recording of a track is starting
    TrackStarted {
        track: Track,
        /// Index of this track in the current batch
        index: usize,
        /// Number of tracks in the current batch
        batch_size: usize,
    },

    /// Recording progress update
    TrackProgress {
        track_name: String,
        bytes_downloaded: u64,
        total_bytes: u64,
    },

    /// A track was not recorded
    TrackSkipped { track: Track, reason: SkipReason },

    /// A track was recorded and saved
    TrackCompleted { track: Track, path: PathBuf },

    /// Emitted on every idle poll interval while waiting for stream data
    ReadTick,

    /// The run is over
    Finished {
        recorded: usize,
        skipped: usize,
        failed: usize,
    },
}

/// Trait for reporting progress events during recording.
///
/// Implementations can use this to display progress bars, log messages,
/// or forward events to another thread.
pub trait ProgressReporter: Send + Sync {
    /// Report a progress event
    fn report(&self, event: ProgressEvent);
}

/// A shared reference to a progress reporter
pub type SharedProgressReporter = Arc<dyn ProgressReporter>;

/// Deliver an event, containing any panic raised by the reporter
///
/// A misbehaving reporter is logged and never aborts recording.
pub fn emit(reporter: &SharedProgressReporter, event: ProgressEvent) {
    if let Err(panic) = catch_unwind(AssertUnwindSafe(|| reporter.report(event))) {
        let message = panic
            .downcast_ref::<&str>()
            .map(|s| s.to_string())
            .or_else(|| panic.downcast_ref::<String>().cloned())
            .unwrap_or_else(|| "unknown panic".to_string());
        error!("Unhandled panic in progress reporter: {}", message);
    }
}

/// A no-op progress reporter that silently ignores all events.
/// Useful for tests or quiet mode.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopReporter;

impl ProgressReporter for NoopReporter {
    fn report(&self, _event: ProgressEvent) {
        // Intentionally empty
    }
}

impl NoopReporter {
    /// Create a new NoopReporter wrapped in an Arc
    pub fn shared() -> SharedProgressReporter {
        Arc::new(Self)
    }
}

/// Forwards events over a channel to a consumer running elsewhere
///
/// The worker never touches presentation state; the receiving side owns it.
#[derive(Debug, Clone)]
pub struct ChannelReporter {
    tx: mpsc::UnboundedSender<ProgressEvent>,
}

impl ChannelReporter {
    /// Create a reporter and the receiver its events arrive on
    pub fn channel() -> (SharedProgressReporter, mpsc::UnboundedReceiver<ProgressEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Arc::new(Self { tx }), rx)
    }
}

impl ProgressReporter for ChannelReporter {
    fn report(&self, event: ProgressEvent) {
        if self.tx.send(event).is_err() {
            debug!("Progress receiver is gone, dropping event");
        }
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;
    use std::sync::Mutex;

    /// Records every event for later inspection
    #[derive(Default)]
    pub struct RecordingReporter {
        pub events: Mutex<Vec<ProgressEvent>>,
    }

    impl RecordingReporter {
        pub fn events(&self) -> Vec<ProgressEvent> {
            self.events.lock().unwrap().clone()
        }

        pub fn completed(&self) -> usize {
            self.events()
                .iter()
                .filter(|e| matches!(e, ProgressEvent::TrackCompleted { .. }))
                .count()
        }

        pub fn skipped(&self) -> usize {
            self.events()
                .iter()
                .filter(|e| matches!(e, ProgressEvent::TrackSkipped { .. }))
                .count()
        }
    }

    impl ProgressReporter for RecordingReporter {
        fn report(&self, event: ProgressEvent) {
            self.events.lock().unwrap().push(event);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct PanickingReporter;

    impl ProgressReporter for PanickingReporter {
        fn report(&self, _event: ProgressEvent) {
            panic!("reporter is broken");
        }
    }

    #[test]
    fn noop_reporter_handles_all_events() {
        let reporter = NoopReporter;

        reporter.report(ProgressEvent::Connecting {
            username: "user".to_string(),
        });
        reporter.report(ProgressEvent::RateLimited {
            retry_in: Duration::from_secs(4),
        });
        reporter.report(ProgressEvent::PlaylistFetched { track_count: 5 });
        reporter.report(ProgressEvent::TrackProgress {
            track_name: "Artist — Title".to_string(),
            bytes_downloaded: 512,
            total_bytes: 1024,
        });
        reporter.report(ProgressEvent::ReadTick);
        reporter.report(ProgressEvent::Finished {
            recorded: 4,
            skipped: 1,
            failed: 0,
        });
    }

    #[test]
    fn emit_contains_reporter_panics() {
        let reporter: SharedProgressReporter = Arc::new(PanickingReporter);

        emit(&reporter, ProgressEvent::ReadTick);
        emit(&reporter, ProgressEvent::PlaylistFetched { track_count: 1 });
    }

    #[tokio::test]
    async fn channel_reporter_forwards_events_in_order() {
        let (reporter, mut rx) = ChannelReporter::channel();

        emit(&reporter, ProgressEvent::PlaylistFetched { track_count: 3 });
        emit(&reporter, ProgressEvent::ReadTick);
        drop(reporter);

        assert!(matches!(
            rx.recv().await,
            Some(ProgressEvent::PlaylistFetched { track_count: 3 })
        ));
        assert!(matches!(rx.recv().await, Some(ProgressEvent::ReadTick)));
        assert!(rx.recv().await.is_none());
    }

    #[test]
    fn channel_reporter_survives_closed_receiver() {
        let (reporter, rx) = ChannelReporter::channel();
        drop(rx);

        emit(&reporter, ProgressEvent::ReadTick);
    }
}
