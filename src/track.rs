use std::collections::HashMap;
use std::path::{Path, PathBuf};

use crate::error::TrackError;

/// Placeholder used for missing title, album or artist
pub const UNKNOWN: &str = "[unknown]";

/// Characters that are not allowed in Windows file names
const RESERVED_CHARS: &[char] = &['\\', '/', ':', '*', '?', ';', '"', '<', '>', '|'];

const SUBSTITUTE: char = '_';

/// Sanitization applied to a metadata value before it becomes a path component
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Sanitize {
    None,
    StripReserved,
    StripReservedAndSpaces,
}

/// Naming switches taken from the configuration
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct NamingOptions {
    pub strip_reserved: bool,
    pub strip_spaces: bool,
}

impl NamingOptions {
    /// Every combination of the two switches, both-off first
    pub const ALL: [NamingOptions; 4] = [
        NamingOptions {
            strip_reserved: false,
            strip_spaces: false,
        },
        NamingOptions {
            strip_reserved: false,
            strip_spaces: true,
        },
        NamingOptions {
            strip_reserved: true,
            strip_spaces: false,
        },
        NamingOptions {
            strip_reserved: true,
            strip_spaces: true,
        },
    ];
}

/// A playlist entry that can be recorded
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Track {
    pub title: String,
    pub album: String,
    pub creator: String,
    pub location: String,
    /// Every other field found in the playlist entry
    pub extra: HashMap<String, String>,
}

impl Track {
    /// Build a track from raw playlist fields
    ///
    /// Fails when `location` is missing or empty. Missing or empty title,
    /// album and creator become [`UNKNOWN`].
    pub fn from_fields(mut fields: HashMap<String, String>) -> Result<Self, TrackError> {
        let location = fields
            .remove("location")
            .filter(|l| !l.is_empty())
            .ok_or(TrackError::InvalidTrackData)?;

        let mut take = |key: &str| {
            fields
                .remove(key)
                .filter(|v| !v.is_empty())
                .unwrap_or_else(|| UNKNOWN.to_string())
        };

        let title = take("title");
        let album = take("album");
        let creator = take("creator");

        Ok(Self {
            title,
            album,
            creator,
            location,
            extra: fields,
        })
    }

    pub fn artist(&self) -> &str {
        &self.creator
    }

    /// Human readable "artist — title"
    pub fn display_name(&self) -> String {
        format!("{} — {}", self.creator, self.title)
    }

    /// Relative path `artist/album/title.mp3`
    pub fn relative_path(&self, options: NamingOptions) -> PathBuf {
        let mut path = PathBuf::from(path_component(&self.creator, options));
        path.push(path_component(&self.album, options));
        path.push(format!("{}.mp3", path_component(&self.title, options)));
        path
    }

    /// Flat `artist_-_title.mp3`, always fully sanitized
    pub fn temp_name(&self) -> String {
        let mode = Sanitize::StripReservedAndSpaces;
        format!(
            "{}_-_{}.mp3",
            sanitize(&self.creator, mode),
            sanitize(&self.title, mode)
        )
    }

    /// Look for a copy recorded under any naming scheme
    pub fn find_existing(&self, root_dir: &Path) -> Option<PathBuf> {
        NamingOptions::ALL
            .iter()
            .map(|options| root_dir.join(self.relative_path(*options)))
            .find(|path| path.exists())
    }
}

/// Prepare a metadata value for use as a single path component
///
/// Path separators always become `-` so a value cannot escape its directory level.
pub fn sanitize(value: &str, mode: Sanitize) -> String {
    let options = match mode {
        Sanitize::None => NamingOptions::default(),
        Sanitize::StripReserved => NamingOptions {
            strip_reserved: true,
            strip_spaces: false,
        },
        Sanitize::StripReservedAndSpaces => NamingOptions {
            strip_reserved: true,
            strip_spaces: true,
        },
    };
    path_component(value, options)
}

fn path_component(value: &str, options: NamingOptions) -> String {
    let mut value = value.to_string();
    if options.strip_reserved {
        value = strip_reserved(&value);
    }
    if options.strip_spaces {
        value = value.replace(' ', "_");
    }
    let value = replace_separators(&value);

    // `.` and `..` name the current and parent directory
    if value.chars().all(|c| c == '.') {
        return SUBSTITUTE.to_string().repeat(value.len().max(1));
    }
    value
}

fn strip_reserved(value: &str) -> String {
    let mut stripped: String = value
        .chars()
        .map(|c| {
            if RESERVED_CHARS.contains(&c) {
                SUBSTITUTE
            } else {
                c
            }
        })
        .collect();

    // Windows does not allow names ending in a dot or a space
    if stripped.ends_with('.') || stripped.ends_with(' ') {
        stripped.pop();
        stripped.push(SUBSTITUTE);
    }
    stripped
}

fn replace_separators(value: &str) -> String {
    value.replace(std::path::MAIN_SEPARATOR, "-").replace('/', "-")
}
