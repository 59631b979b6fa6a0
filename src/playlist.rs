use std::collections::HashMap;
use std::io::BufRead;

use quick_xml::Reader;
use quick_xml::escape::resolve_xml_entity;
use quick_xml::events::Event;
use tracing::{debug, error, info};

use crate::error::PlaylistError;
use crate::track::Track;

/// Depth of `<track>` elements below the document root (`playlist/trackList/track`)
const TRACK_DEPTH: usize = 2;

/// Raw child-element text of one `<track>` element
pub type TrackFields = HashMap<String, String>;

/// Parse a playlist document into raw field maps, in document order
///
/// Every child element of a track becomes a field named after its tag, so
/// fields unknown to [`Track`] are kept as well.
pub fn parse_track_fields<R: BufRead>(source: R) -> Result<Vec<TrackFields>, PlaylistError> {
    let mut reader = Reader::from_reader(source);
    let mut buf = Vec::new();

    let mut depth: usize = 0;
    let mut tracks = Vec::new();
    let mut current: Option<TrackFields> = None;
    let mut field: Option<String> = None;
    let mut text = String::new();

    loop {
        match reader.read_event_into(&mut buf)? {
            Event::Start(e) => {
                let name = String::from_utf8_lossy(e.local_name().as_ref()).into_owned();
                if depth == TRACK_DEPTH && name == "track" {
                    current = Some(TrackFields::new());
                } else if depth == TRACK_DEPTH + 1 && current.is_some() {
                    field = Some(name);
                }
                text.clear();
                depth += 1;
            }
            Event::Empty(e) => {
                if depth == TRACK_DEPTH + 1
                    && let Some(fields) = current.as_mut()
                {
                    let name = String::from_utf8_lossy(e.local_name().as_ref()).into_owned();
                    fields.entry(name).or_default();
                }
            }
            Event::Text(e) => {
                text.push_str(&e.decode().map_err(quick_xml::Error::from)?);
            }
            Event::CData(e) => {
                text.push_str(&e.decode().map_err(quick_xml::Error::from)?);
            }
            Event::GeneralRef(e) => {
                if let Some(c) = e.resolve_char_ref()? {
                    text.push(c);
                } else {
                    let name = e.decode().map_err(quick_xml::Error::from)?;
                    match resolve_xml_entity(&name) {
                        Some(value) => text.push_str(value),
                        None => {
                            text.push('&');
                            text.push_str(&name);
                            text.push(';');
                        }
                    }
                }
            }
            Event::End(e) => {
                depth = depth.saturating_sub(1);
                if depth == TRACK_DEPTH + 1
                    && let (Some(fields), Some(name)) = (current.as_mut(), field.take())
                {
                    fields.insert(name, text.trim().to_string());
                } else if depth == TRACK_DEPTH
                    && e.local_name().as_ref() == b"track"
                    && let Some(fields) = current.take()
                {
                    debug!("Playlist entry: {:?}", fields);
                    tracks.push(fields);
                }
                text.clear();
            }
            Event::Eof => break,
            _ => {}
        }
        buf.clear();
    }

    Ok(tracks)
}

/// Parse a playlist document into tracks
///
/// Entries that cannot become a [`Track`] are logged and left out.
pub fn parse_playlist<R: BufRead>(source: R) -> Result<Vec<Track>, PlaylistError> {
    let tracks: Vec<Track> = parse_track_fields(source)?
        .into_iter()
        .filter_map(|fields| match Track::from_fields(fields) {
            Ok(track) => Some(track),
            Err(e) => {
                error!("{}", e);
                None
            }
        })
        .collect();

    info!(
        "Tracks:\n{}",
        tracks
            .iter()
            .map(|t| format!("{}\n", t.display_name()))
            .collect::<String>()
    );

    Ok(tracks)
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE_PLAYLIST: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<playlist version="1" xmlns:lastfm="http://www.audioscrobbler.net/dtd/xspf-lastfm">
  <title>Tag Radio</title>
  <creator>Last.fm</creator>
  <trackList>
    <track>
      <location>http://play.example.com/user/1.mp3</location>
      <title>Around the World</title>
      <creator>Daft Punk</creator>
      <album>Homework</album>
      <duration>429000</duration>
      <lastfm:trackauth>8f0a1</lastfm:trackauth>
    </track>
    <track>
      <location>http://play.example.com/user/2.mp3</location>
      <title>Rock &amp; Roll</title>
      <creator>Led Zeppelin</creator>
      <album><![CDATA[IV]]></album>
    </track>
  </trackList>
</playlist>"#;

    #[test]
    fn parses_tracks_in_document_order() {
        let tracks = parse_playlist(SAMPLE_PLAYLIST.as_bytes()).unwrap();

        assert_eq!(tracks.len(), 2);

        assert_eq!(tracks[0].location, "http://play.example.com/user/1.mp3");
        assert_eq!(tracks[0].title, "Around the World");
        assert_eq!(tracks[0].creator, "Daft Punk");
        assert_eq!(tracks[0].album, "Homework");

        assert_eq!(tracks[1].location, "http://play.example.com/user/2.mp3");
        assert_eq!(tracks[1].creator, "Led Zeppelin");
        assert_eq!(tracks[1].album, "IV");
    }

    #[test]
    fn resolves_entities_in_text() {
        let tracks = parse_playlist(SAMPLE_PLAYLIST.as_bytes()).unwrap();
        assert_eq!(tracks[1].title, "Rock & Roll");
    }

    #[test]
    fn keeps_unknown_child_elements() {
        let fields = parse_track_fields(SAMPLE_PLAYLIST.as_bytes()).unwrap();

        assert_eq!(fields[0].get("duration").map(String::as_str), Some("429000"));
        assert_eq!(fields[0].get("trackauth").map(String::as_str), Some("8f0a1"));
    }

    #[test]
    fn ignores_elements_outside_tracks() {
        let fields = parse_track_fields(SAMPLE_PLAYLIST.as_bytes()).unwrap();

        assert!(fields.iter().all(|f| !f.contains_key("trackList")));
        assert!(fields.iter().all(|f| f.get("title").map(String::as_str) != Some("Tag Radio")));
    }

    #[test]
    fn skips_entries_without_location() {
        let playlist = r#"<playlist><trackList>
            <track><title>No Stream</title></track>
            <track><location>http://x/ok.mp3</location><title>Ok</title></track>
            <track><location/><title>Empty</title></track>
        </trackList></playlist>"#;

        let tracks = parse_playlist(playlist.as_bytes()).unwrap();

        assert_eq!(tracks.len(), 1);
        assert_eq!(tracks[0].title, "Ok");
    }

    #[test]
    fn empty_track_list_yields_no_tracks() {
        let tracks = parse_playlist("<playlist><trackList/></playlist>".as_bytes()).unwrap();
        assert!(tracks.is_empty());
    }

    #[test]
    fn malformed_document_is_an_error() {
        let result = parse_playlist("<playlist><trackList><track></playlist>".as_bytes());
        assert!(result.is_err());
    }
}
