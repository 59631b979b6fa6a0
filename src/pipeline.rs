use std::path::{Path, PathBuf};
use std::sync::Arc;

use tracing::{debug, error, info, warn};

use crate::control::{Controls, Interrupt};
use crate::error::{DownloadError, TagError};
use crate::http::HttpClient;
use crate::progress::{ProgressEvent, SharedProgressReporter, SkipReason, emit};
use crate::stream::{PollConfig, StreamContext, peek_stream, transfer};
use crate::tags::{SharedTagWriter, TrackTags};
use crate::tempfiles::TempFileRegistry;
use crate::track::{NamingOptions, Track};

/// Options for recording a batch of tracks
#[derive(Debug, Clone)]
pub struct PipelineOptions {
    /// Root of the `artist/album/title.mp3` tree; also holds temp files
    pub output_dir: PathBuf,
    /// Naming used for new recordings
    pub naming: NamingOptions,
    /// Do not record tracks that already exist under any naming scheme
    pub skip_existing: bool,
    pub poll: PollConfig,
}

impl PipelineOptions {
    pub fn new(output_dir: impl Into<PathBuf>) -> Self {
        Self {
            output_dir: output_dir.into(),
            naming: NamingOptions {
                strip_reserved: true,
                strip_spaces: true,
            },
            skip_existing: true,
            poll: PollConfig::default(),
        }
    }
}

/// What happened to one track
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TrackOutcome {
    Recorded(PathBuf),
    AlreadyRecorded(PathBuf),
    Skipped,
    Failed(String),
}

/// Result of recording one playlist batch
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct BatchSummary {
    pub recorded: usize,
    pub already_recorded: usize,
    pub skipped: usize,
    pub failed: usize,
    /// The batch was cut short by a stop request
    pub stopped: bool,
}

impl BatchSummary {
    fn count(&mut self, outcome: &TrackOutcome) {
        match outcome {
            TrackOutcome::Recorded(_) => self.recorded += 1,
            TrackOutcome::AlreadyRecorded(_) => self.already_recorded += 1,
            TrackOutcome::Skipped => self.skipped += 1,
            TrackOutcome::Failed(_) => self.failed += 1,
        }
    }
}

/// Records the tracks of a playlist one after another
///
/// A failing track is reported and left behind; it never ends the batch.
/// Only a stop request does.
pub struct TrackPipeline {
    options: PipelineOptions,
    tag_writer: SharedTagWriter,
    temp_files: Arc<TempFileRegistry>,
    controls: Controls,
    reporter: SharedProgressReporter,
}

impl TrackPipeline {
    pub fn new(
        options: PipelineOptions,
        tag_writer: SharedTagWriter,
        temp_files: Arc<TempFileRegistry>,
        controls: Controls,
        reporter: SharedProgressReporter,
    ) -> Self {
        Self {
            options,
            tag_writer,
            temp_files,
            controls,
            reporter,
        }
    }

    pub fn output_dir(&self) -> &Path {
        &self.options.output_dir
    }

    /// Record every track in order
    pub async fn run<C: HttpClient>(&self, client: &C, tracks: &[Track]) -> BatchSummary {
        let mut summary = BatchSummary::default();

        for (index, track) in tracks.iter().enumerate() {
            if self.controls.is_stopped() {
                summary.stopped = true;
                break;
            }

            match self.process(client, track, index, tracks.len()).await {
                Ok(outcome) => summary.count(&outcome),
                Err(Interrupt::Stop) => {
                    summary.skipped += 1;
                    summary.stopped = true;
                    break;
                }
                Err(Interrupt::SkipTrack) => summary.skipped += 1,
            }
        }

        summary
    }

    /// Record one track
    ///
    /// Returns `Err` only for interrupts; every other failure is an outcome.
    pub async fn process<C: HttpClient>(
        &self,
        client: &C,
        track: &Track,
        index: usize,
        batch_size: usize,
    ) -> Result<TrackOutcome, Interrupt> {
        if self.options.skip_existing
            && let Some(existing) = track.find_existing(&self.options.output_dir)
        {
            info!("Skipping existing: {}", existing.display());
            peek_stream(client, track, self.stream_context()).await;
            self.report_skipped(track, SkipReason::AlreadyRecorded(existing.clone()));
            return Ok(TrackOutcome::AlreadyRecorded(existing));
        }

        // A skip requested before this track started was meant for another one
        self.controls.clear_skip();

        emit(
            &self.reporter,
            ProgressEvent::TrackStarted {
                track: track.clone(),
                index,
                batch_size,
            },
        );
        info!("{}", track.display_name());

        match self.record(client, track).await {
            Ok(path) => {
                info!("Saved to {}", path.display());
                emit(
                    &self.reporter,
                    ProgressEvent::TrackCompleted {
                        track: track.clone(),
                        path: path.clone(),
                    },
                );
                Ok(TrackOutcome::Recorded(path))
            }
            Err(DownloadError::Interrupted(interrupt)) => {
                info!("Interrupted. Skipping track.");
                self.report_skipped(track, SkipReason::Interrupted);
                match interrupt {
                    Interrupt::SkipTrack => Ok(TrackOutcome::Skipped),
                    Interrupt::Stop => Err(Interrupt::Stop),
                }
            }
            Err(e) => {
                error!("Skipping {}: {}", track.display_name(), e);
                let message = e.to_string();
                self.report_skipped(track, SkipReason::Failed(message.clone()));
                Ok(TrackOutcome::Failed(message))
            }
        }
    }

    /// Download into a temp file, tag it and copy it into place
    ///
    /// The temp file is removed on every path out of this function.
    async fn record<C: HttpClient>(&self, client: &C, track: &Track) -> Result<PathBuf, DownloadError> {
        let output_dir = &self.options.output_dir;
        let prefix = format!(".{}.", track.temp_name());

        let (file, temp) = self.temp_files.create(output_dir, &prefix).map_err(|e| {
            DownloadError::FileCreateFailed {
                path: output_dir.clone(),
                source: e,
            }
        })?;
        let mut file = tokio::fs::File::from_std(file);

        transfer(client, track, &mut file, temp.path(), self.stream_context()).await?;
        drop(file);

        self.write_tags(temp.path(), track).await;

        let destination = self.prepare_destination(track).await?;
        tokio::fs::copy(temp.path(), &destination)
            .await
            .map_err(|e| DownloadError::CopyFailed {
                from: temp.path().to_path_buf(),
                to: destination.clone(),
                source: e,
            })?;

        Ok(destination)
    }

    async fn write_tags(&self, path: &Path, track: &Track) {
        let writer = Arc::clone(&self.tag_writer);
        let path = path.to_path_buf();
        let tags = TrackTags::from(track);

        let result = tokio::task::spawn_blocking(move || writer.write_tags(&path, &tags))
            .await
            .unwrap_or_else(|e| Err(TagError::Join(e.to_string())));

        if let Err(e) = result {
            warn!("Failed to save tags: {}", e);
        }
    }

    /// Final path of a track, with its directories created
    async fn prepare_destination(&self, track: &Track) -> Result<PathBuf, DownloadError> {
        let destination = self
            .options
            .output_dir
            .join(track.relative_path(self.options.naming));

        if let Some(dir) = destination.parent() {
            debug!("Track dir: {}", dir.display());
            tokio::fs::create_dir_all(dir)
                .await
                .map_err(|e| DownloadError::CreateDirectoryFailed {
                    path: dir.to_path_buf(),
                    source: e,
                })?;
        }

        Ok(destination)
    }

    fn stream_context(&self) -> StreamContext<'_> {
        StreamContext {
            controls: &self.controls,
            reporter: &self.reporter,
            poll: self.options.poll,
        }
    }

    fn report_skipped(&self, track: &Track, reason: SkipReason) {
        emit(
            &self.reporter,
            ProgressEvent::TrackSkipped {
                track: track.clone(),
                reason,
            },
        );
    }
}
