/// Now-playing values and the dedup rule that decides when artwork has to be
/// normalized again.
///
/// A `Snapshot` is what one poll tick reads from the media source (artwork
/// still in its source form).  A `Track` is what gets published: same
/// metadata, artwork already normalized to its base64 payload.
use std::fmt;
use std::sync::Arc;

use crate::artwork::RawArtwork;

// ── dedup key ─────────────────────────────────────────────────────────────────

/// Identity of a track for change detection.  An explicit source id wins; the
/// (name, artist, album) triple stands in when the source has none.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DedupKey<'a> {
    Id(&'a str),
    Triple(&'a str, &'a str, &'a str),
}

fn dedup_key<'a>(
    id: Option<&'a str>,
    name: &'a str,
    artist: &'a str,
    album: &'a str,
) -> DedupKey<'a> {
    match id {
        Some(id) => DedupKey::Id(id),
        None => DedupKey::Triple(name, artist, album),
    }
}

/// Empty ids are what the sources return when they have none.
fn normalize_id(id: Option<String>) -> Option<String> {
    id.map(|s| s.trim().to_string()).filter(|s| !s.is_empty())
}

// ── Snapshot ──────────────────────────────────────────────────────────────────

/// One observation of the media source, before artwork normalization.
#[derive(Debug, Clone, PartialEq)]
pub struct Snapshot {
    pub name: String,
    pub artist: String,
    pub album: String,
    pub id: Option<String>,
    pub artwork: RawArtwork,
}

impl Snapshot {
    pub fn new(
        name: impl Into<String>,
        artist: impl Into<String>,
        album: impl Into<String>,
        id: Option<String>,
        artwork: RawArtwork,
    ) -> Self {
        Self {
            name: name.into(),
            artist: artist.into(),
            album: album.into(),
            id: normalize_id(id),
            artwork,
        }
    }

    pub fn dedup_key(&self) -> DedupKey<'_> {
        dedup_key(self.id.as_deref(), &self.name, &self.artist, &self.album)
    }

    /// Attach the normalized artwork payload, producing the publishable track.
    pub fn into_track(self, artwork: Arc<str>) -> Track {
        Track {
            name: self.name,
            artist: self.artist,
            album: self.album,
            artwork,
            id: self.id,
        }
    }
}

// ── Track ─────────────────────────────────────────────────────────────────────

/// Immutable published track.  `artwork` is the base64 payload; it is shared
/// so reusing it across ticks never copies the image.
#[derive(Clone, PartialEq)]
pub struct Track {
    name: String,
    artist: String,
    album: String,
    artwork: Arc<str>,
    id: Option<String>,
}

impl Track {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn artist(&self) -> &str {
        &self.artist
    }

    pub fn album(&self) -> &str {
        &self.album
    }

    pub fn artwork(&self) -> &Arc<str> {
        &self.artwork
    }

    pub fn id(&self) -> Option<&str> {
        self.id.as_deref()
    }

    pub fn dedup_key(&self) -> DedupKey<'_> {
        dedup_key(self.id.as_deref(), &self.name, &self.artist, &self.album)
    }

    /// Line shown in the status sink.
    pub fn status_line(&self) -> String {
        format!("{} by {}", self.name, self.artist)
    }
}

impl fmt::Debug for Track {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Track")
            .field("name", &self.name)
            .field("artist", &self.artist)
            .field("album", &self.album)
            .field("id", &self.id)
            .field("artwork_len", &self.artwork.len())
            .finish()
    }
}

impl fmt::Display for Track {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} by {} from {} ({})",
            self.name,
            self.artist,
            self.album,
            self.artwork.len()
        )
    }
}

/// True when `candidate` is a different track from `previous`, i.e. its
/// artwork must be normalized and it becomes the current track.
pub fn should_emit(previous: Option<&Track>, candidate: &Snapshot) -> bool {
    match previous {
        None => true,
        Some(prev) => prev.dedup_key() != candidate.dedup_key(),
    }
}
