//! Client side of the radio session protocol.
//!
//! A session starts with a handshake that yields a session token. The token
//! is then used to tune the radio to a station URL and to fetch playlists of
//! tracks for that station.

use std::collections::HashMap;

use percent_encoding::{AsciiSet, NON_ALPHANUMERIC, utf8_percent_encode};
use tracing::{debug, info};

use crate::error::SessionError;
use crate::http::HttpClient;
use crate::playlist::parse_playlist;
use crate::track::Track;

/// Client version the server expects from the desktop player
pub const CLIENT_VERSION: &str = "1.5.1.31879";

/// User-Agent sent with every request
pub const USER_AGENT: &str = "Last.fm Client 1.5.1.31879 (X11)";

/// Base URL of the radio web service
pub const DEFAULT_BASE_URL: &str = "http://ws.audioscrobbler.com/radio";

/// Server value of `session` that signals an authentication failure
const FAILED_SESSION: &str = "FAILED";

/// HTTP status used by the playlist endpoint for rate limiting
const STATUS_RATE_LIMITED: u16 = 503;

/// Characters kept as they are in query parameter values
const QUERY_VALUE: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'-')
    .remove(b'_')
    .remove(b'.')
    .remove(b'~');

/// Where the session is in the handshake → adjust → playlist protocol
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionState {
    NoSession,
    Handshaking,
    Active { token: String },
}

/// Stateful radio client
pub struct RadioSession<C: HttpClient> {
    client: C,
    base_url: String,
    state: SessionState,
    station_name: Option<String>,
    tracks: Vec<Track>,
}

impl<C: HttpClient> RadioSession<C> {
    pub fn new(client: C) -> Self {
        Self::with_base_url(client, DEFAULT_BASE_URL)
    }

    pub fn with_base_url(client: C, base_url: &str) -> Self {
        Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            state: SessionState::NoSession,
            station_name: None,
            tracks: Vec::new(),
        }
    }

    pub fn client(&self) -> &C {
        &self.client
    }

    pub fn state(&self) -> &SessionState {
        &self.state
    }

    pub fn is_active(&self) -> bool {
        matches!(self.state, SessionState::Active { .. })
    }

    /// Display name of the station the session is tuned to
    pub fn station_name(&self) -> Option<&str> {
        self.station_name.as_deref()
    }

    /// Tracks of the most recently fetched playlist
    pub fn tracks(&self) -> &[Track] {
        &self.tracks
    }

    /// Authenticate and open a session
    ///
    /// `password_md5` is the hex MD5 digest of the account password.
    pub async fn handshake(&mut self, username: &str, password_md5: &str) -> Result<(), SessionError> {
        let url = format!(
            "{}/handshake.php?version={}&platform=linux&platformversion=Unix%2FLinux&username={}&passwordmd5={}",
            self.base_url,
            CLIENT_VERSION,
            utf8_percent_encode(username, QUERY_VALUE),
            utf8_percent_encode(password_md5, QUERY_VALUE)
        );
        info!("Initiating handshake");
        debug!("handshake_url: {}", url);

        self.state = SessionState::Handshaking;
        let vars = match self.request_vars(&url).await {
            Ok(vars) => vars,
            Err(e) => {
                self.state = SessionState::NoSession;
                return Err(e);
            }
        };

        let token = match vars.get("session") {
            None => {
                self.state = SessionState::NoSession;
                return Err(SessionError::Handshake(
                    "No session in server response".to_string(),
                ));
            }
            Some(token) if token == FAILED_SESSION => {
                self.state = SessionState::NoSession;
                let message = vars
                    .get("msg")
                    .cloned()
                    .unwrap_or_else(|| "authentication failed".to_string());
                return Err(SessionError::Handshake(message));
            }
            Some(token) => token.clone(),
        };

        self.state = SessionState::Active { token };
        Ok(())
    }

    /// Tune the session to a station URL
    pub async fn adjust(&mut self, station_url: &str) -> Result<(), SessionError> {
        let token = self.token()?;
        let url = format!(
            "{}/adjust.php?session={}&url={}&lang=en",
            self.base_url, token, station_url
        );
        info!("Tuning to \"{}\"", station_url);

        let vars = self.request_vars(&url).await?;

        if vars.get("response").map(String::as_str) != Some("OK") {
            return Err(match vars.get("error").map(String::as_str) {
                Some("1") => SessionError::NoContentAvailable,
                Some("4") => SessionError::InvalidUrl(station_url.to_string()),
                _ => SessionError::Adjust(format!("Bad server response: {:?}", vars)),
            });
        }

        let station_name = vars.get("stationname").cloned().ok_or_else(|| {
            SessionError::Adjust("No station name in server response".to_string())
        })?;

        info!("Tuned to {}", station_name);
        self.station_name = Some(station_name);
        Ok(())
    }

    /// Fetch the next playlist and make its tracks the current ones
    ///
    /// A rate-limited response yields [`SessionError::RateLimited`]; the caller
    /// decides how long to wait before trying again.
    pub async fn fetch_playlist(&mut self, discovery: bool) -> Result<&[Track], SessionError> {
        let token = self.token()?;
        let url = format!(
            "{}/xspf.php?sk={}&discovery={}&desktop={}",
            self.base_url,
            token,
            u8::from(discovery),
            CLIENT_VERSION
        );

        let payload = self
            .client
            .get_bytes(&url)
            .await
            .map_err(|e| SessionError::RequestFailed {
                url: url.clone(),
                source: e,
            })?;

        match payload.status {
            STATUS_RATE_LIMITED => return Err(SessionError::RateLimited),
            status if status >= 400 => return Err(SessionError::HttpStatus { url, status }),
            _ => {}
        }

        self.tracks = parse_playlist(payload.body.as_ref())?;
        Ok(&self.tracks)
    }

    fn token(&self) -> Result<String, SessionError> {
        match &self.state {
            SessionState::Active { token } => Ok(token.clone()),
            _ => Err(SessionError::NoSession),
        }
    }

    async fn request_vars(&self, url: &str) -> Result<HashMap<String, String>, SessionError> {
        let payload = self
            .client
            .get_bytes(url)
            .await
            .map_err(|e| SessionError::RequestFailed {
                url: url.to_string(),
                source: e,
            })?;

        if payload.status >= 400 {
            return Err(SessionError::HttpStatus {
                url: url.to_string(),
                status: payload.status,
            });
        }

        let vars = parse_vars(&String::from_utf8_lossy(&payload.body))?;
        debug!("vars: {:?}", vars);
        Ok(vars)
    }
}

/// Parse a newline separated `key=value` response body
///
/// The last occurrence of a key wins. Trailing newlines are allowed; any line
/// without `=`, a blank one included, makes the whole response invalid.
pub fn parse_vars(body: &str) -> Result<HashMap<String, String>, SessionError> {
    body.trim_end()
        .lines()
        .map(str::trim)
        .map(|line| {
            line.split_once('=')
                .map(|(key, value)| (key.to_string(), value.to_string()))
                .ok_or_else(|| SessionError::MalformedResponse {
                    line: line.to_string(),
                })
        })
        .collect()
}
