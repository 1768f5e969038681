use std::io::{Cursor, Read};

use base64::prelude::*;
use byteorder::{BigEndian, ReadBytesExt};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::{
    common::{Severity, errors::Result},
    configs::RestVersion,
};

/// A playable item as the node describes it.
///
/// `encoded` is `None` for tracks built locally from metadata only (e.g. a
/// title/author pair) which must be searched for before they can be played.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Track {
    /// Base64 Lavaplayer blob. v3 calls the field `track`.
    #[serde(default, alias = "track")]
    pub encoded: Option<String>,
    pub info: TrackInfo,
    #[serde(default = "default_json_object")]
    pub plugin_info: Value,
    #[serde(default = "default_json_object")]
    pub user_data: Value,
    /// Host annotation of who asked for the track. Never sent to a node.
    #[serde(skip)]
    pub requester: Option<Value>,
}

fn default_json_object() -> Value {
    serde_json::json!({})
}

impl Track {
    pub fn from_info(info: TrackInfo) -> Self {
        Self {
            encoded: None,
            info,
            plugin_info: default_json_object(),
            user_data: default_json_object(),
            requester: None,
        }
    }

    pub fn with_requester(mut self, requester: Option<Value>) -> Self {
        self.requester = requester;
        self
    }

    pub fn is_playable(&self) -> bool {
        self.encoded.as_deref().is_some_and(|e| !e.is_empty())
    }

    /// Query used to re-find this track on a search source.
    pub fn search_query(&self) -> String {
        [self.info.author.as_str(), self.info.title.as_str()]
            .into_iter()
            .filter(|s| !s.is_empty())
            .collect::<Vec<_>>()
            .join(" - ")
    }

    /// Picks the candidate that most likely is this track: an exact author
    /// (or `"<author> - Topic"`) or exact title match, then a result within
    /// two seconds of our length, then simply the first result.
    pub fn best_match<'a>(&self, candidates: &'a [Track]) -> Option<&'a Track> {
        let topic = format!("{} - Topic", self.info.author);
        let official = candidates.iter().find(|c| {
            (!self.info.author.is_empty()
                && (c.info.author.eq_ignore_ascii_case(&self.info.author)
                    || c.info.author.eq_ignore_ascii_case(&topic)))
                || (!self.info.title.is_empty()
                    && c.info.title.eq_ignore_ascii_case(&self.info.title))
        });
        if official.is_some() {
            return official;
        }

        if self.info.length > 0 {
            let low = self.info.length.saturating_sub(2_000);
            let high = self.info.length + 2_000;
            if let Some(same) = candidates
                .iter()
                .find(|c| (low..=high).contains(&c.info.length))
            {
                return Some(same);
            }
        }

        candidates.first()
    }

    /// Adopts the playable payload of a search hit, keeping our own metadata.
    pub fn adopt(&mut self, found: &Track) {
        self.encoded = found.encoded.clone();
        self.info.identifier = found.info.identifier.clone();
        if self.info.artwork_url.is_none() {
            self.info.artwork_url = found.info.artwork_url.clone();
        }
    }

    /// Decodes a Lavaplayer track blob (format versions 1 to 3).
    ///
    /// v3 nodes push events with only this string, so the metadata is
    /// recovered locally.
    pub fn decode(encoded: &str) -> Option<Self> {
        let data = BASE64_STANDARD.decode(encoded).ok()?;
        if data.len() < 4 {
            return None;
        }

        let mut cursor = Cursor::new(data);
        let header = cursor.read_u32::<BigEndian>().ok()?;
        let flags = (header >> 30) & 0x03;

        // no version byte means the legacy v1 layout
        let version = if (flags & 1) != 0 {
            cursor.read_u8().ok()?
        } else {
            1
        };
        if version > 3 {
            return None;
        }

        let title = read_utf(&mut cursor)?;
        let author = read_utf(&mut cursor)?;
        let length = cursor.read_u64::<BigEndian>().ok()?;
        let identifier = read_utf(&mut cursor)?;
        let is_stream = cursor.read_u8().ok()? != 0;

        let uri = if version >= 2 {
            read_opt_utf(&mut cursor)?
        } else {
            None
        };
        let (artwork_url, isrc) = if version >= 3 {
            (read_opt_utf(&mut cursor)?, read_opt_utf(&mut cursor)?)
        } else {
            (None, None)
        };

        let source_name = read_utf(&mut cursor)?;
        let position = cursor.read_u64::<BigEndian>().unwrap_or(0);

        Some(Self {
            encoded: Some(encoded.to_string()),
            info: TrackInfo {
                identifier,
                is_seekable: !is_stream,
                author,
                length,
                is_stream,
                position,
                title,
                uri,
                artwork_url,
                isrc,
                source_name,
            },
            plugin_info: default_json_object(),
            user_data: default_json_object(),
            requester: None,
        })
    }
}

fn read_utf<R: Read>(r: &mut R) -> Option<String> {
    let len = r.read_u16::<BigEndian>().ok()? as usize;
    let mut buf = vec![0u8; len];
    r.read_exact(&mut buf).ok()?;
    String::from_utf8(buf).ok()
}

/// Outer `None` is a read failure, inner `None` an absent field.
fn read_opt_utf<R: Read>(r: &mut R) -> Option<Option<String>> {
    if r.read_u8().ok()? != 0 {
        read_utf(r).map(Some)
    } else {
        Some(None)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
#[serde(rename_all = "camelCase", default)]
pub struct TrackInfo {
    pub identifier: String,
    pub is_seekable: bool,
    pub author: String,
    /// Milliseconds; 0 for live streams.
    pub length: u64,
    pub is_stream: bool,
    pub position: u64,
    pub title: String,
    pub uri: Option<String>,
    pub artwork_url: Option<String>,
    pub isrc: Option<String>,
    pub source_name: String,
}

/// Load outcome. Accepts both the v4 and v3 spellings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LoadType {
    #[serde(alias = "TRACK_LOADED")]
    Track,
    #[serde(alias = "PLAYLIST_LOADED")]
    Playlist,
    #[serde(alias = "SEARCH_RESULT")]
    Search,
    #[serde(alias = "NO_MATCHES")]
    Empty,
    #[serde(alias = "LOAD_FAILED")]
    Error,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase", default)]
pub struct PlaylistInfo {
    pub name: String,
    /// -1 when nothing is selected.
    pub selected_track: i32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TrackException {
    pub message: Option<String>,
    pub severity: Option<Severity>,
    #[serde(default)]
    pub cause: Option<String>,
}

/// Canonical search result, independent of the node's protocol version.
#[derive(Debug, Clone)]
pub struct LoadResult {
    pub load_type: LoadType,
    pub tracks: Vec<Track>,
    pub playlist_info: Option<PlaylistInfo>,
    pub plugin_info: Value,
    pub exception: Option<TrackException>,
}

#[derive(Deserialize)]
struct V4Envelope {
    #[serde(rename = "loadType")]
    load_type: LoadType,
    #[serde(default)]
    data: Value,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct V4Playlist {
    #[serde(default)]
    info: PlaylistInfo,
    #[serde(default = "default_json_object")]
    plugin_info: Value,
    #[serde(default)]
    tracks: Vec<Track>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct V3Response {
    load_type: LoadType,
    #[serde(default)]
    playlist_info: Option<PlaylistInfo>,
    #[serde(default)]
    tracks: Vec<Track>,
    #[serde(default)]
    exception: Option<TrackException>,
    #[serde(default)]
    plugin_info: Option<Value>,
}

impl LoadResult {
    pub fn empty() -> Self {
        Self {
            load_type: LoadType::Empty,
            tracks: Vec::new(),
            playlist_info: None,
            plugin_info: default_json_object(),
            exception: None,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.tracks.is_empty()
    }

    /// Normalizes a `loadtracks` response and tags every track with `requester`.
    pub fn from_response(
        version: RestVersion,
        raw: Value,
        requester: Option<&Value>,
    ) -> Result<Self> {
        let mut result = match version {
            RestVersion::V4 => Self::from_v4(serde_json::from_value(raw)?)?,
            RestVersion::V3 => Self::from_v3(serde_json::from_value(raw)?),
        };
        for track in &mut result.tracks {
            track.requester = requester.cloned();
        }
        Ok(result)
    }

    fn from_v4(envelope: V4Envelope) -> Result<Self> {
        let mut result = Self {
            load_type: envelope.load_type,
            ..Self::empty()
        };
        match envelope.load_type {
            LoadType::Track => {
                if !envelope.data.is_null() {
                    result.tracks.push(serde_json::from_value(envelope.data)?);
                }
            }
            LoadType::Playlist => {
                let playlist: V4Playlist = serde_json::from_value(envelope.data)?;
                result.tracks = playlist.tracks;
                result.playlist_info = Some(playlist.info);
                result.plugin_info = playlist.plugin_info;
            }
            LoadType::Search => {
                result.tracks = serde_json::from_value(envelope.data)?;
            }
            LoadType::Error => {
                result.exception = serde_json::from_value(envelope.data).ok();
            }
            LoadType::Empty => {}
        }
        Ok(result)
    }

    fn from_v3(response: V3Response) -> Self {
        Self {
            load_type: response.load_type,
            playlist_info: response
                .playlist_info
                .filter(|_| response.load_type == LoadType::Playlist),
            tracks: response.tracks,
            plugin_info: response.plugin_info.unwrap_or_else(default_json_object),
            exception: response.exception,
        }
    }
}
