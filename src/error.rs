use std::path::PathBuf;
use thiserror::Error;

use crate::control::Interrupt;

/// Errors raised while building a track from playlist data
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TrackError {
    #[error("Bad track data: no stream location defined")]
    InvalidTrackData,
}

/// Errors that can occur when parsing a playlist document
#[derive(Error, Debug)]
pub enum PlaylistError {
    #[error("Failed to parse playlist XML: {0}")]
    Xml(#[from] quick_xml::Error),
}

/// Errors produced by the radio session protocol
#[derive(Error, Debug)]
pub enum SessionError {
    #[error("No session. Handshake first")]
    NoSession,

    #[error("Handshake failed: {0}")]
    Handshake(String),

    #[error("No content available for this station")]
    NoContentAvailable,

    #[error("Invalid station URL: {0}")]
    InvalidUrl(String),

    #[error("Failed to tune station: {0}")]
    Adjust(String),

    #[error("Server is rate limiting playlist requests")]
    RateLimited,

    #[error("HTTP error {status} for {url}")]
    HttpStatus { url: String, status: u16 },

    #[error("HTTP request failed for {url}: {source}")]
    RequestFailed {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("Malformed server response line: {line:?}")]
    MalformedResponse { line: String },

    #[error("Playlist error: {0}")]
    Playlist(#[from] PlaylistError),
}

impl SessionError {
    /// Whether the request may be retried after a backoff delay
    pub fn is_rate_limited(&self) -> bool {
        matches!(self, SessionError::RateLimited)
    }
}

/// Errors that abandon a single track
#[derive(Error, Debug)]
pub enum DownloadError {
    #[error("HTTP request failed for {url}: {source}")]
    HttpFailed {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("Access to stream denied (HTTP 403) for {url}")]
    Forbidden { url: String },

    #[error("HTTP error {status} for {url}")]
    HttpStatus { url: String, status: u16 },

    #[error("Failed to get Content-Length for {url}")]
    MissingContentLength { url: String },

    #[error("Read timeout reached after {received} of {expected} bytes")]
    ReadTimeout { received: u64, expected: u64 },

    #[error("Stream ended after {received} of {expected} bytes")]
    StreamEnded { received: u64, expected: u64 },

    #[error("Failed to create file {path}: {source}")]
    FileCreateFailed {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to write to file {path}: {source}")]
    FileWriteFailed {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to create directory {path}: {source}")]
    CreateDirectoryFailed {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Cannot copy {from} to {to}: {source}")]
    CopyFailed {
        from: PathBuf,
        to: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Interrupted: {0}")]
    Interrupted(Interrupt),
}

/// Errors from the tag writer collaborator
#[derive(Error, Debug)]
pub enum TagError {
    #[error("Failed to tag {path}: {source}")]
    Lofty {
        path: PathBuf,
        #[source]
        source: lofty::error::LoftyError,
    },

    #[error("No tag could be created for {0}")]
    Unsupported(PathBuf),

    #[error("Tag writer task failed: {0}")]
    Join(String),
}

/// Errors that can occur when loading or saving the configuration file
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("No configuration directory available on this platform")]
    NoConfigDir,

    #[error("Failed to read config file {path}: {source}")]
    ReadFailed {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to write config file {path}: {source}")]
    WriteFailed {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse config file {path}: {source}")]
    ParseFailed {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    #[error("Failed to serialize config: {0}")]
    SerializeFailed(#[from] toml::ser::Error),
}

/// Top-level errors for a radio run
#[derive(Error, Debug)]
pub enum RadioError {
    #[error("Session error: {0}")]
    Session(#[from] SessionError),

    #[error("Failed to create output directory {path}: {source}")]
    OutputDirectory {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}
