pub mod backoff;
pub mod config;
pub mod control;
pub mod error;
pub mod http;
pub mod pipeline;
pub mod playlist;
pub mod progress;
pub mod radio;
pub mod session;
pub mod stream;
pub mod tags;
pub mod tempfiles;
pub mod track;
pub mod util;

// Re-export main types for convenience
pub use backoff::BackoffDelay;
pub use config::Config;
pub use control::{Controls, Interrupt};
pub use error::{
    ConfigError, DownloadError, PlaylistError, RadioError, SessionError, TagError, TrackError,
};
pub use http::{HttpClient, HttpResponse, ReqwestClient};
pub use pipeline::{BatchSummary, PipelineOptions, TrackOutcome, TrackPipeline};
pub use playlist::parse_playlist;
pub use progress::{
    ChannelReporter, NoopReporter, ProgressEvent, ProgressReporter, SharedProgressReporter,
    SkipReason,
};
pub use radio::{Credentials, RadioLoop, RadioOptions, RadioSummary};
pub use session::{RadioSession, SessionState};
pub use tags::{LoftyTagWriter, NoopTagWriter, SharedTagWriter, TagWriter, TrackTags};
pub use tempfiles::{TempFileGuard, TempFileRegistry};
pub use track::{NamingOptions, Track};
pub use util::{password_md5, quote_station_url};
