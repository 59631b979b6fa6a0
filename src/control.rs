//! Cooperative cancellation shared between the recording worker and its frontend.
//!
//! The worker never gets interrupted from outside. Instead it checks these
//! flags between stream chunks, between tracks and between playlist batches,
//! and turns a raised flag into an [`Interrupt`] that is returned up through
//! each layer as an ordinary error value.

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use tokio_util::sync::CancellationToken;

/// Control-flow signal produced when a cancellation flag is observed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Interrupt {
    /// Abandon the current track and continue with the next one
    SkipTrack,
    /// Unwind to the top of the radio loop and finish the run
    Stop,
}

impl fmt::Display for Interrupt {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Interrupt::SkipTrack => write!(f, "track skipped by user"),
            Interrupt::Stop => write!(f, "recording stopped by user"),
        }
    }
}

/// Stop and skip flags, cheap to clone and safe to set from any thread
#[derive(Debug, Clone, Default)]
pub struct Controls {
    stop: CancellationToken,
    skip: Arc<AtomicBool>,
}

impl Controls {
    pub fn new() -> Self {
        Self::default()
    }

    /// Request the whole run to stop
    pub fn stop(&self) {
        self.stop.cancel();
    }

    /// Request the track being recorded to be skipped
    pub fn skip_track(&self) {
        self.skip.store(true, Ordering::SeqCst);
    }

    pub fn is_stopped(&self) -> bool {
        self.stop.is_cancelled()
    }

    /// Resolves once [`Controls::stop`] has been called
    pub async fn stopped(&self) {
        self.stop.cancelled().await
    }

    /// Forget a skip request that was not consumed by a track
    pub(crate) fn clear_skip(&self) {
        self.skip.store(false, Ordering::SeqCst);
    }

    /// Check both flags. A pending skip request is consumed.
    pub fn check(&self) -> Result<(), Interrupt> {
        if self.stop.is_cancelled() {
            return Err(Interrupt::Stop);
        }
        if self.skip.swap(false, Ordering::SeqCst) {
            return Err(Interrupt::SkipTrack);
        }
        Ok(())
    }
}
