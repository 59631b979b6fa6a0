//! Transfer of a single audio stream to a local file.
//!
//! Stations pace their streams, so reads are done in small chunks and every
//! wait for data is split into short polls. Between polls and between chunks
//! the worker checks its [`Controls`], which bounds how long a stop or skip
//! request can go unnoticed.

use std::path::Path;
use std::time::Duration;

use bytes::Bytes;
use futures::StreamExt;
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tracing::{debug, error, info, warn};

use crate::control::Controls;
use crate::error::DownloadError;
use crate::http::{ByteStream, HttpClient};
use crate::progress::{ProgressEvent, SharedProgressReporter, emit};
use crate::track::Track;

/// Largest slice written and reported at once
pub const READ_CHUNK_SIZE: usize = 512;

/// Timing of the polling loop
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollConfig {
    /// Longest single wait for data before checking the controls again
    pub poll_interval: Duration,
    /// Give up after waiting this long without any data
    pub read_timeout: Duration,
}

impl Default for PollConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_millis(100),
            read_timeout: Duration::from_secs(30),
        }
    }
}

impl PollConfig {
    fn polls_per_timeout(&self) -> u32 {
        let polls = self.read_timeout.as_millis() / self.poll_interval.as_millis().max(1);
        u32::try_from(polls).unwrap_or(u32::MAX).max(1)
    }
}

/// What the stream loop needs besides the stream itself
#[derive(Clone)]
pub struct StreamContext<'a> {
    pub controls: &'a Controls,
    pub reporter: &'a SharedProgressReporter,
    pub poll: PollConfig,
}

/// Splits a response body into chunks of at most [`READ_CHUNK_SIZE`] bytes
struct ChunkReader<'a> {
    body: ByteStream,
    pending: Bytes,
    received: u64,
    expected: u64,
    ctx: StreamContext<'a>,
}

impl<'a> ChunkReader<'a> {
    fn new(body: ByteStream, expected: u64, ctx: StreamContext<'a>) -> Self {
        Self {
            body,
            pending: Bytes::new(),
            received: 0,
            expected,
            ctx,
        }
    }

    /// Next chunk of data, or `None` once the body has ended
    ///
    /// Read errors are logged and reading goes on; only the read timeout
    /// and the controls end the wait early.
    async fn next_chunk(&mut self) -> Result<Option<Bytes>, DownloadError> {
        loop {
            if !self.pending.is_empty() {
                let len = self.pending.len().min(READ_CHUNK_SIZE);
                let chunk = self.pending.split_to(len);
                self.received += chunk.len() as u64;
                return Ok(Some(chunk));
            }

            match self.wait_ready().await? {
                Some(Ok(bytes)) => self.pending = bytes,
                Some(Err(e)) => warn!("Stream read error: {}", e),
                None => return Ok(None),
            }
        }
    }

    async fn wait_ready(&mut self) -> Result<Option<std::io::Result<Bytes>>, DownloadError> {
        for _ in 0..self.ctx.poll.polls_per_timeout() {
            match tokio::time::timeout(self.ctx.poll.poll_interval, self.body.next()).await {
                Ok(item) => return Ok(item),
                Err(_) => {
                    emit(self.ctx.reporter, ProgressEvent::ReadTick);
                    self.ctx.controls.check().map_err(DownloadError::Interrupted)?;
                }
            }
        }

        error!("Read timeout reached");
        Err(DownloadError::ReadTimeout {
            received: self.received,
            expected: self.expected,
        })
    }
}

/// Write the audio stream of `track` into `dest`
///
/// Returns the number of bytes written, which is at least the announced
/// `Content-Length`.
pub async fn transfer<C, W>(
    client: &C,
    track: &Track,
    dest: &mut W,
    dest_path: &Path,
    ctx: StreamContext<'_>,
) -> Result<u64, DownloadError>
where
    C: HttpClient,
    W: AsyncWrite + Unpin,
{
    let url = track.location.as_str();

    let response = client
        .get_stream(url)
        .await
        .map_err(|e| DownloadError::HttpFailed {
            url: url.to_string(),
            source: e,
        })?;

    match response.status {
        403 => {
            info!("Stream access denied, skipping {}", track.display_name());
            return Err(DownloadError::Forbidden {
                url: url.to_string(),
            });
        }
        status if status >= 400 => {
            return Err(DownloadError::HttpStatus {
                url: url.to_string(),
                status,
            });
        }
        _ => {}
    }

    let Some(total) = response.content_length else {
        error!("Failed to get Content-Length for {}", url);
        return Err(DownloadError::MissingContentLength {
            url: url.to_string(),
        });
    };
    debug!("Content-Length: {}", total);

    let track_name = track.display_name();
    let reporter = ctx.reporter;
    let controls = ctx.controls;
    let mut reader = ChunkReader::new(response.body, total, ctx);
    let mut count: u64 = 0;

    while count < total {
        controls.check().map_err(DownloadError::Interrupted)?;

        let Some(chunk) = reader.next_chunk().await? else {
            return Err(DownloadError::StreamEnded {
                received: count,
                expected: total,
            });
        };

        dest.write_all(&chunk)
            .await
            .map_err(|e| DownloadError::FileWriteFailed {
                path: dest_path.to_path_buf(),
                source: e,
            })?;
        count += chunk.len() as u64;

        emit(
            reporter,
            ProgressEvent::TrackProgress {
                track_name: track_name.clone(),
                bytes_downloaded: count,
                total_bytes: total,
            },
        );
    }

    dest.flush()
        .await
        .map_err(|e| DownloadError::FileWriteFailed {
            path: dest_path.to_path_buf(),
            source: e,
        })?;

    Ok(count)
}

/// Read a little of a stream and let it go
///
/// Used for tracks that are already recorded so the server sees the stream
/// being opened. Every failure is logged and otherwise ignored.
pub async fn peek_stream<C: HttpClient>(client: &C, track: &Track, ctx: StreamContext<'_>) {
    let response = match client.get_stream(&track.location).await {
        Ok(response) => response,
        Err(e) => {
            error!("Failed to open stream for {}: {}", track.display_name(), e);
            return;
        }
    };

    if response.status >= 400 {
        error!(
            "HTTP error {} for {}",
            response.status,
            track.display_name()
        );
        return;
    }

    let expected = response.content_length.unwrap_or(0);
    let mut reader = ChunkReader::new(response.body, expected, ctx);
    match reader.next_chunk().await {
        Ok(chunk) => debug!(
            "Read {} bytes of {}",
            chunk.map_or(0, |c| c.len()),
            track.display_name()
        ),
        Err(e) => warn!("Failed to read stream of {}: {}", track.display_name(), e),
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;
    use crate::http::{HttpPayload, HttpResponse};
    use async_trait::async_trait;
    use std::collections::HashMap;
    use std::sync::Mutex;

    /// Canned behavior of one audio stream
    #[derive(Clone)]
    pub enum StreamScript {
        /// Serve these chunks with the given Content-Length
        Chunks {
            content_length: Option<u64>,
            chunks: Vec<Vec<u8>>,
        },
        /// Fail with an I/O error after the given chunks
        FailAfter(Vec<Vec<u8>>, u64),
        /// Never deliver any data
        Stall(u64),
        /// Respond with an HTTP error status
        Status(u16),
    }

    impl StreamScript {
        pub fn whole(data: &[u8]) -> Self {
            StreamScript::Chunks {
                content_length: Some(data.len() as u64),
                chunks: data.chunks(300).map(<[u8]>::to_vec).collect(),
            }
        }
    }

    fn body<S>(stream: S) -> ByteStream
    where
        S: futures::Stream<Item = std::io::Result<Bytes>> + Send + 'static,
    {
        Box::pin(stream)
    }

    /// Serves audio streams by URL and counts how often each was opened
    #[derive(Default)]
    pub struct MockStreamClient {
        pub streams: HashMap<String, StreamScript>,
        pub opened: Mutex<Vec<String>>,
    }

    impl MockStreamClient {
        pub fn with(streams: Vec<(&str, StreamScript)>) -> Self {
            Self {
                streams: streams
                    .into_iter()
                    .map(|(url, script)| (url.to_string(), script))
                    .collect(),
                opened: Mutex::new(Vec::new()),
            }
        }

        pub fn opened(&self) -> Vec<String> {
            self.opened.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl HttpClient for MockStreamClient {
        async fn get_bytes(&self, _url: &str) -> Result<HttpPayload, reqwest::Error> {
            unimplemented!("stream tests never fetch documents")
        }

        async fn get_stream(&self, url: &str) -> Result<HttpResponse, reqwest::Error> {
            self.opened.lock().unwrap().push(url.to_string());
            let script = self.streams.get(url).cloned().expect("unknown stream url");

            let (status, content_length, body) = match script {
                StreamScript::Chunks {
                    content_length,
                    chunks,
                } => (
                    200,
                    content_length,
                    body(futures::stream::iter(
                        chunks.into_iter().map(|c| Ok(Bytes::from(c))),
                    )),
                ),
                StreamScript::FailAfter(chunks, content_length) => {
                    let reset = std::io::Error::new(
                        std::io::ErrorKind::ConnectionReset,
                        "connection reset by peer",
                    );
                    let items: Vec<_> = chunks
                        .into_iter()
                        .map(|c| Ok(Bytes::from(c)))
                        .chain(std::iter::once(Err(reset)))
                        .collect();
                    (200, Some(content_length), body(futures::stream::iter(items)))
                }
                StreamScript::Stall(content_length) => {
                    (200, Some(content_length), body(futures::stream::pending()))
                }
                StreamScript::Status(status) => (status, None, body(futures::stream::empty())),
            };

            Ok(HttpResponse {
                status,
                content_length,
                body,
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::testing::{MockStreamClient, StreamScript};
    use super::*;
    use crate::control::Interrupt;
    use crate::progress::testing::RecordingReporter;
    use std::collections::HashMap;
    use std::sync::Arc;

    const URL: &str = "http://play.example.com/track.mp3";

    fn make_track() -> Track {
        let mut fields = HashMap::new();
        fields.insert("location".to_string(), URL.to_string());
        fields.insert("title".to_string(), "Title".to_string());
        fields.insert("creator".to_string(), "Artist".to_string());
        Track::from_fields(fields).unwrap()
    }

    async fn run(
        script: StreamScript,
        controls: &Controls,
        reporter: &Arc<RecordingReporter>,
    ) -> (Result<u64, DownloadError>, Vec<u8>) {
        let client = MockStreamClient::with(vec![(URL, script)]);
        let shared: SharedProgressReporter = reporter.clone();
        let ctx = StreamContext {
            controls,
            reporter: &shared,
            poll: PollConfig::default(),
        };
        let mut dest = Vec::new();
        let result = transfer(&client, &make_track(), &mut dest, Path::new("dest.mp3"), ctx).await;
        (result, dest)
    }

    fn progress(reporter: &RecordingReporter) -> Vec<(u64, u64)> {
        reporter
            .events()
            .into_iter()
            .filter_map(|e| match e {
                ProgressEvent::TrackProgress {
                    bytes_downloaded,
                    total_bytes,
                    ..
                } => Some((bytes_downloaded, total_bytes)),
                _ => None,
            })
            .collect()
    }

    #[tokio::test]
    async fn transfers_exact_content_length_in_small_chunks() {
        let data: Vec<u8> = (0..1000u32).map(|i| (i % 251) as u8).collect();
        let reporter = Arc::new(RecordingReporter::default());

        let (result, dest) = run(StreamScript::whole(&data), &Controls::new(), &reporter).await;

        assert_eq!(result.unwrap(), 1000);
        assert_eq!(dest, data);

        let progress = progress(&reporter);
        assert_eq!(progress.last(), Some(&(1000, 1000)));
        assert!(progress.windows(2).all(|w| w[1].0 - w[0].0 <= READ_CHUNK_SIZE as u64));
        assert!(progress.len() >= 1000 / READ_CHUNK_SIZE);
    }

    #[tokio::test]
    async fn zero_length_stream_completes_immediately() {
        let reporter = Arc::new(RecordingReporter::default());
        let script = StreamScript::Chunks {
            content_length: Some(0),
            chunks: vec![],
        };

        let (result, dest) = run(script, &Controls::new(), &reporter).await;

        assert_eq!(result.unwrap(), 0);
        assert!(dest.is_empty());
    }

    #[tokio::test]
    async fn missing_content_length_fails() {
        let reporter = Arc::new(RecordingReporter::default());
        let script = StreamScript::Chunks {
            content_length: None,
            chunks: vec![b"data".to_vec()],
        };

        let (result, dest) = run(script, &Controls::new(), &reporter).await;

        assert!(matches!(result, Err(DownloadError::MissingContentLength { .. })));
        assert!(dest.is_empty());
    }

    #[tokio::test]
    async fn forbidden_is_reported_separately() {
        let reporter = Arc::new(RecordingReporter::default());

        let (result, _) = run(StreamScript::Status(403), &Controls::new(), &reporter).await;

        assert!(matches!(result, Err(DownloadError::Forbidden { .. })));
    }

    #[tokio::test]
    async fn other_http_errors_fail() {
        let reporter = Arc::new(RecordingReporter::default());

        let (result, _) = run(StreamScript::Status(404), &Controls::new(), &reporter).await;

        assert!(matches!(
            result,
            Err(DownloadError::HttpStatus { status: 404, .. })
        ));
    }

    #[tokio::test]
    async fn read_error_is_tolerated_until_stream_ends() {
        let reporter = Arc::new(RecordingReporter::default());
        let script = StreamScript::FailAfter(vec![vec![1; 600]], 1000);

        let (result, dest) = run(script, &Controls::new(), &reporter).await;

        assert!(matches!(
            result,
            Err(DownloadError::StreamEnded {
                received: 600,
                expected: 1000
            })
        ));
        assert_eq!(dest.len(), 600);
    }

    #[tokio::test(start_paused = true)]
    async fn stalled_stream_times_out_with_read_ticks() {
        let reporter = Arc::new(RecordingReporter::default());

        let (result, _) = run(StreamScript::Stall(1000), &Controls::new(), &reporter).await;

        assert!(matches!(result, Err(DownloadError::ReadTimeout { received: 0, .. })));
        let ticks = reporter
            .events()
            .iter()
            .filter(|e| matches!(e, ProgressEvent::ReadTick))
            .count();
        assert_eq!(ticks, 300);
    }

    #[tokio::test(start_paused = true)]
    async fn stop_request_ends_wait_for_data() {
        let reporter = Arc::new(RecordingReporter::default());
        let controls = Controls::new();
        let stopper = controls.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(250)).await;
            stopper.stop();
        });

        let (result, _) = run(StreamScript::Stall(1000), &controls, &reporter).await;

        assert!(matches!(
            result,
            Err(DownloadError::Interrupted(Interrupt::Stop))
        ));
    }

    #[tokio::test]
    async fn skip_request_is_seen_between_chunks() {
        let reporter = Arc::new(RecordingReporter::default());
        let controls = Controls::new();
        controls.skip_track();

        let (result, dest) = run(StreamScript::whole(&[7; 2048]), &controls, &reporter).await;

        assert!(matches!(
            result,
            Err(DownloadError::Interrupted(Interrupt::SkipTrack))
        ));
        assert!(dest.is_empty());
    }

    #[tokio::test]
    async fn peek_stream_reads_one_chunk() {
        let client = MockStreamClient::with(vec![(URL, StreamScript::whole(&[1; 4096]))]);
        let controls = Controls::new();
        let reporter: SharedProgressReporter = Arc::new(RecordingReporter::default());
        let ctx = StreamContext {
            controls: &controls,
            reporter: &reporter,
            poll: PollConfig::default(),
        };

        peek_stream(&client, &make_track(), ctx).await;

        assert_eq!(client.opened(), vec![URL.to_string()]);
    }

    #[test]
    fn default_poll_config_allows_300_polls() {
        assert_eq!(PollConfig::default().polls_per_timeout(), 300);
    }
}
