use md5::{Digest, Md5};
use percent_encoding::{AsciiSet, NON_ALPHANUMERIC, utf8_percent_encode};

/// Scheme of station URLs
pub const STATION_SCHEME: &str = "lastfm:";

/// Characters left as they are when quoting a station URL
const STATION_URL_SET: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'/')
    .remove(b'_')
    .remove(b'.')
    .remove(b'-');

/// Percent-quote everything after the `lastfm:` scheme
///
/// URLs with any other scheme are returned unchanged.
pub fn quote_station_url(url: &str) -> String {
    match url.strip_prefix(STATION_SCHEME) {
        Some(rest) => format!(
            "{}{}",
            STATION_SCHEME,
            utf8_percent_encode(rest, STATION_URL_SET)
        ),
        None => url.to_string(),
    }
}

/// Lowercase hex MD5 of a password, the form the handshake expects
pub fn password_md5(password: &str) -> String {
    let mut hasher = Md5::new();
    hasher.update(password.as_bytes());
    format!("{:x}", hasher.finalize())
}
