use std::path::Path;
use std::sync::Arc;

use lofty::config::WriteOptions;
use lofty::error::LoftyError;
use lofty::prelude::*;
use lofty::probe::Probe;
use lofty::tag::Tag;

use crate::error::TagError;
use crate::track::Track;

/// Metadata embedded into a finished recording
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrackTags {
    pub title: String,
    pub album: String,
    pub artist: String,
}

impl From<&Track> for TrackTags {
    fn from(track: &Track) -> Self {
        Self {
            title: track.title.clone(),
            album: track.album.clone(),
            artist: track.artist().to_string(),
        }
    }
}

/// Writes embedded metadata into an audio file
///
/// Tagging is best effort: callers log failures and keep the file.
pub trait TagWriter: Send + Sync {
    fn write_tags(&self, path: &Path, tags: &TrackTags) -> Result<(), TagError>;
}

/// A shared reference to a tag writer
pub type SharedTagWriter = Arc<dyn TagWriter>;

/// Tag writer used when tagging is disabled
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopTagWriter;

impl NoopTagWriter {
    pub fn shared() -> SharedTagWriter {
        Arc::new(Self)
    }
}

impl TagWriter for NoopTagWriter {
    fn write_tags(&self, _path: &Path, _tags: &TrackTags) -> Result<(), TagError> {
        Ok(())
    }
}

/// Writes title, album and artist with lofty
#[derive(Debug, Default, Clone, Copy)]
pub struct LoftyTagWriter;

impl LoftyTagWriter {
    pub fn shared() -> SharedTagWriter {
        Arc::new(Self)
    }
}

impl TagWriter for LoftyTagWriter {
    fn write_tags(&self, path: &Path, tags: &TrackTags) -> Result<(), TagError> {
        let lofty_err = |source: LoftyError| TagError::Lofty {
            path: path.to_path_buf(),
            source,
        };

        let probe = Probe::open(path)
            .map_err(lofty_err)?
            .guess_file_type()
            .map_err(|e| lofty_err(e.into()))?;
        let mut tagged_file = probe.read().map_err(lofty_err)?;

        if tagged_file.primary_tag().is_none() {
            let tag_type = tagged_file.primary_tag_type();
            tagged_file.insert_tag(Tag::new(tag_type));
        }

        let tag = tagged_file
            .primary_tag_mut()
            .ok_or_else(|| TagError::Unsupported(path.to_path_buf()))?;

        tag.set_title(tags.title.clone());
        tag.set_album(tags.album.clone());
        tag.set_artist(tags.artist.clone());

        tag.save_to_path(path, WriteOptions::default())
            .map_err(lofty_err)
    }
}
