use std::time::Duration;

use tracing::{error, info, warn};

use crate::backoff::{BackoffDelay, DEFAULT_MULTIPLIER};
use crate::control::{Controls, Interrupt};
use crate::error::{RadioError, SessionError};
use crate::http::HttpClient;
use crate::pipeline::{BatchSummary, TrackPipeline};
use crate::progress::{ProgressEvent, SharedProgressReporter, emit};
use crate::session::RadioSession;

/// Tuning of the radio loop
#[derive(Debug, Clone)]
pub struct RadioOptions {
    /// Ask the service for discovery mode playlists
    pub discovery: bool,
    /// Pause between two playlist batches of the same station
    pub batch_pause: Duration,
    /// Multiplier of the rate limit backoff, in seconds
    pub backoff_multiplier: u64,
}

impl Default for RadioOptions {
    fn default() -> Self {
        Self {
            discovery: false,
            batch_pause: Duration::from_millis(500),
            backoff_multiplier: DEFAULT_MULTIPLIER,
        }
    }
}

/// Account used for the handshake
#[derive(Debug, Clone)]
pub struct Credentials {
    pub username: String,
    pub password_md5: String,
}

/// Totals of a whole run
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct RadioSummary {
    pub recorded: usize,
    pub already_recorded: usize,
    pub skipped: usize,
    pub failed: usize,
    pub stations_failed: usize,
    /// The run ended on a stop request rather than by running out of stations
    pub stopped: bool,
}

impl RadioSummary {
    fn absorb(&mut self, batch: &BatchSummary) {
        self.recorded += batch.recorded;
        self.already_recorded += batch.already_recorded;
        self.skipped += batch.skipped;
        self.failed += batch.failed;
    }
}

/// Why fetching a playlist was given up
enum FetchAbort {
    Stopped,
    Failed(SessionError),
}

/// Plays stations one after another and records what they play
///
/// Each station is tuned, then its playlists are recorded batch after batch
/// until a stop request arrives or the station stops delivering.
pub struct RadioLoop<C: HttpClient> {
    session: RadioSession<C>,
    pipeline: TrackPipeline,
    controls: Controls,
    reporter: SharedProgressReporter,
    options: RadioOptions,
}

impl<C: HttpClient> RadioLoop<C> {
    pub fn new(
        session: RadioSession<C>,
        pipeline: TrackPipeline,
        controls: Controls,
        reporter: SharedProgressReporter,
        options: RadioOptions,
    ) -> Self {
        Self {
            session,
            pipeline,
            controls,
            reporter,
            options,
        }
    }

    /// Handshake, then record every station in `urls` in turn
    ///
    /// Only a failed handshake or an unusable output directory end the run
    /// with an error. Station failures are reported and counted.
    pub async fn run(
        &mut self,
        credentials: &Credentials,
        urls: &[String],
    ) -> Result<RadioSummary, RadioError> {
        emit(
            &self.reporter,
            ProgressEvent::Connecting {
                username: credentials.username.clone(),
            },
        );
        self.session
            .handshake(&credentials.username, &credentials.password_md5)
            .await?;

        let output_dir = self.pipeline.output_dir().to_path_buf();
        tokio::fs::create_dir_all(&output_dir)
            .await
            .map_err(|e| RadioError::OutputDirectory {
                path: output_dir.clone(),
                source: e,
            })?;
        info!("Saving tracks to {}", output_dir.display());

        let mut summary = RadioSummary::default();

        for url in urls {
            if self.record_station(url, &mut summary).await.is_err() {
                summary.stopped = true;
                break;
            }
        }

        if summary.stopped {
            info!("Stopped");
        }

        emit(
            &self.reporter,
            ProgressEvent::Finished {
                recorded: summary.recorded,
                skipped: summary.skipped + summary.already_recorded,
                failed: summary.failed,
            },
        );

        Ok(summary)
    }

    /// Record one station until it fails or a stop is requested
    ///
    /// Returns `Err` only when the run has to stop.
    async fn record_station(&mut self, url: &str, summary: &mut RadioSummary) -> Result<(), Interrupt> {
        loop {
            if self.controls.is_stopped() {
                return Err(Interrupt::Stop);
            }

            if let Err(e) = self.session.adjust(url).await {
                self.station_failed(url, &e, summary);
                return Ok(());
            }

            let station_name = self.session.station_name().unwrap_or_default().to_string();
            emit(
                &self.reporter,
                ProgressEvent::Tuned {
                    url: url.to_string(),
                    station_name,
                },
            );

            match self.fetch_playlist().await {
                Ok(()) => {}
                Err(FetchAbort::Stopped) => return Err(Interrupt::Stop),
                Err(FetchAbort::Failed(e)) => {
                    self.station_failed(url, &e, summary);
                    return Ok(());
                }
            }

            let batch = self
                .pipeline
                .run(self.session.client(), self.session.tracks())
                .await;
            summary.absorb(&batch);
            if batch.stopped {
                return Err(Interrupt::Stop);
            }

            self.pause().await?;
        }
    }

    /// Fetch the next playlist, backing off while the service is rate limiting
    async fn fetch_playlist(&mut self) -> Result<(), FetchAbort> {
        let mut backoff = BackoffDelay::new(self.options.backoff_multiplier);

        loop {
            match self.session.fetch_playlist(self.options.discovery).await {
                Ok(tracks) => {
                    let track_count = tracks.len();
                    emit(&self.reporter, ProgressEvent::PlaylistFetched { track_count });
                    return Ok(());
                }
                Err(e) if e.is_rate_limited() => {
                    warn!("Playlist request rate limited");
                    emit(
                        &self.reporter,
                        ProgressEvent::RateLimited {
                            retry_in: backoff.delay(),
                        },
                    );
                    tokio::select! {
                        _ = backoff.sleep() => {}
                        _ = self.controls.stopped() => return Err(FetchAbort::Stopped),
                    }
                }
                Err(e) => return Err(FetchAbort::Failed(e)),
            }
        }
    }

    async fn pause(&self) -> Result<(), Interrupt> {
        tokio::select! {
            _ = tokio::time::sleep(self.options.batch_pause) => Ok(()),
            _ = self.controls.stopped() => Err(Interrupt::Stop),
        }
    }

    fn station_failed(&self, url: &str, e: &SessionError, summary: &mut RadioSummary) {
        match e {
            SessionError::NoContentAvailable => {
                error!("Not enough content to play station {}", url)
            }
            SessionError::InvalidUrl(_) => error!("Invalid station URL {}", url),
            _ => error!("Failed to play {}: {}", url, e),
        }
        summary.stations_failed += 1;
        emit(
            &self.reporter,
            ProgressEvent::StationFailed {
                url: url.to_string(),
                error: e.to_string(),
            },
        );
    }
}
