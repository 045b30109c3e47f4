/// The audiotags module abstracts over tag reading and writing for the supported audio formats,
/// exposing a single standard interface for all audio files.
///
/// It also handles Rose-specific tagging semantics: multi-valued tags, artist role encoding, and
/// the stable track/release identifiers stored in the tags themselves.
use std::path::{Path, PathBuf};

use lofty::config::WriteOptions;
use lofty::file::TaggedFileExt;
use lofty::prelude::*;
use lofty::probe::Probe;
use lofty::tag::{ItemKey, ItemValue, Tag, TagItem, TagType};
use once_cell::sync::Lazy;
use regex::Regex;

use crate::config::Config;
use crate::errors::{Result, RoseExpectedError};

pub const SUPPORTED_AUDIO_EXTENSIONS: [&str; 6] = ["m4a", "mp3", "flac", "ogg", "opus", "wav"];

pub const TRACK_ID_TAG: &str = "ROSEID";
pub const RELEASE_ID_TAG: &str = "ROSERELEASEID";
pub const RELEASE_TYPE_TAG: &str = "RELEASETYPE";
pub const LABEL_TAG: &str = "LABEL";

static TAG_SPLITTER_REGEX: Lazy<Regex> = Lazy::new(|| Regex::new(r" \\\\ | / |; ?| vs\. ").unwrap());

pub fn is_supported_audio_path(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|e| SUPPORTED_AUDIO_EXTENSIONS.contains(&e.to_lowercase().as_str()))
        .unwrap_or(false)
}

/// Artist names for a single entity (track or release), bucketed by role. These are the raw
/// string lists that live in the tags; alias resolution happens at cache time.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Artists {
    pub main: Vec<String>,
    pub guest: Vec<String>,
    pub remixer: Vec<String>,
    pub producer: Vec<String>,
    pub composer: Vec<String>,
    pub djmixer: Vec<String>,
}

impl Artists {
    pub fn is_empty(&self) -> bool {
        self.main.is_empty()
            && self.guest.is_empty()
            && self.remixer.is_empty()
            && self.producer.is_empty()
            && self.composer.is_empty()
            && self.djmixer.is_empty()
    }
}

fn split_tag(t: Option<&str>) -> Vec<String> {
    match t {
        Some(t) if !t.is_empty() => TAG_SPLITTER_REGEX.split(t).map(String::from).filter(|s| !s.is_empty()).collect(),
        _ => Vec::new(),
    }
}

/// Decode an artist string into role buckets. The markers mirror common human conventions:
/// `DJ pres. Composer performed by Main feat. Guest remixed by Remixer produced by Producer`.
pub fn parse_artist_string(main: Option<&str>) -> Artists {
    let mut rv = Artists::default();
    let mut main = main.unwrap_or("").to_string();

    if let Some((rest, producer)) = split_once_marker(&main, "produced by ") {
        rv.producer = split_tag(Some(&producer));
        main = rest;
    }
    if let Some((rest, remixer)) = split_once_marker(&main, "remixed by ") {
        rv.remixer = split_tag(Some(&remixer));
        main = rest;
    }
    if let Some((rest, guest)) = split_once_marker(&main, "feat. ") {
        rv.guest = split_tag(Some(&guest));
        main = rest;
    }
    if let Some((dj, rest)) = split_once_marker(&main, "pres. ") {
        rv.djmixer = split_tag(Some(&dj));
        main = rest;
    }
    if let Some((composer, rest)) = split_once_marker(&main, "performed by ") {
        rv.composer = split_tag(Some(&composer));
        main = rest;
    }
    rv.main = split_tag(Some(&main));
    rv
}

// "a marker b" -> (a, b).
fn split_once_marker(s: &str, marker: &str) -> Option<(String, String)> {
    s.find(marker).map(|idx| {
        let left = s[..idx].trim_end().to_string();
        let right = s[idx + marker.len()..].to_string();
        (left, right)
    })
}

/// Encode role buckets back into a single artist string. Inverse of `parse_artist_string` as long
/// as no artist name contains a role marker.
pub fn format_artist_string(a: &Artists) -> String {
    let mut r = a.main.join(";");
    if !a.composer.is_empty() {
        r = format!("{} performed by {}", a.composer.join(";"), r);
    }
    if !a.djmixer.is_empty() {
        r = format!("{} pres. {}", a.djmixer.join(";"), r);
    }
    if !a.guest.is_empty() {
        r = format!("{} feat. {}", r, a.guest.join(";"));
    }
    if !a.remixer.is_empty() {
        r = format!("{} remixed by {}", r, a.remixer.join(";"));
    }
    if !a.producer.is_empty() {
        r = format!("{} produced by {}", r, a.producer.join(";"));
    }
    r
}

/// A unified view of one audio file's tags. Reads go through lofty's format probes; writes
/// replace the file's primary tag, leaving the audio stream untouched.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AudioTags {
    pub path: PathBuf,
    pub id: Option<String>,
    pub release_id: Option<String>,
    pub title: Option<String>,
    pub year: Option<i32>,
    pub track_number: Option<String>,
    pub disc_number: Option<String>,
    pub album: Option<String>,
    pub genre: Vec<String>,
    pub label: Vec<String>,
    pub release_type: String,
    pub artists: Artists,
    pub album_artists: Artists,
    pub duration_sec: i32,
}

impl AudioTags {
    pub fn from_file(path: &Path) -> Result<AudioTags> {
        if !is_supported_audio_path(path) {
            return Err(RoseExpectedError::UnsupportedFiletype { path: path.to_path_buf() }.into());
        }
        let tagged = Probe::open(path)
            .map_err(|_| RoseExpectedError::FileNotFound { path: path.to_path_buf() })?
            .read()?;
        let duration_sec = tagged.properties().duration().as_secs() as i32;

        let tag = tagged.primary_tag().or_else(|| tagged.first_tag());
        let mut rv = AudioTags {
            path: path.to_path_buf(),
            duration_sec,
            release_type: "unknown".to_string(),
            ..Default::default()
        };
        let Some(tag) = tag else {
            return Ok(rv);
        };

        rv.id = get_text(tag, TRACK_ID_TAG);
        rv.release_id = get_text(tag, RELEASE_ID_TAG);
        rv.title = tag.title().map(|s| s.to_string()).filter(|s| !s.is_empty());
        rv.year = tag.year().map(|y| y as i32);
        rv.track_number = tag
            .get_string(&ItemKey::TrackNumber)
            .map(|s| s.split('/').next().unwrap_or(s).to_string())
            .filter(|s| !s.is_empty());
        rv.disc_number = tag
            .get_string(&ItemKey::DiscNumber)
            .map(|s| s.split('/').next().unwrap_or(s).to_string())
            .filter(|s| !s.is_empty());
        rv.album = tag.album().map(|s| s.to_string()).filter(|s| !s.is_empty());
        rv.genre = split_tag(tag.genre().as_deref());
        rv.label = split_tag(tag.get_string(&ItemKey::Label).or_else(|| get_text_ref(tag, LABEL_TAG)));
        if let Some(rt) = get_text(tag, RELEASE_TYPE_TAG) {
            if !rt.is_empty() {
                rv.release_type = rt.to_lowercase();
            }
        }
        rv.artists = parse_artist_string(tag.artist().as_deref());
        rv.album_artists = parse_artist_string(tag.get_string(&ItemKey::AlbumArtist));
        Ok(rv)
    }

    /// Write the tags back to the file.
    pub fn flush(&mut self, _c: &Config) -> Result<()> {
        let tagged = Probe::open(&self.path)
            .map_err(|_| RoseExpectedError::FileNotFound { path: self.path.clone() })?
            .read()?;
        let tag_type = tagged
            .primary_tag()
            .map(|t| t.tag_type())
            .unwrap_or_else(|| default_tag_type(&self.path));
        let mut tag = tagged.primary_tag().cloned().unwrap_or_else(|| Tag::new(tag_type));

        self.release_type = self.release_type.to_lowercase();

        set_or_remove_text(&mut tag, ItemKey::TrackTitle, self.title.as_deref());
        match self.year {
            Some(y) if y >= 0 => tag.set_year(y as u32),
            _ => tag.remove_year(),
        }
        set_or_remove_text(&mut tag, ItemKey::TrackNumber, self.track_number.as_deref());
        set_or_remove_text(&mut tag, ItemKey::DiscNumber, self.disc_number.as_deref());
        set_or_remove_text(&mut tag, ItemKey::AlbumTitle, self.album.as_deref());
        set_or_remove_text(&mut tag, ItemKey::Genre, nonempty(&self.genre.join(";")));
        set_or_remove_text(&mut tag, ItemKey::Label, nonempty(&self.label.join(";")));
        set_text(&mut tag, RELEASE_TYPE_TAG, &self.release_type);
        set_or_remove_text(&mut tag, ItemKey::TrackArtist, nonempty(&format_artist_string(&self.artists)));
        set_or_remove_text(&mut tag, ItemKey::AlbumArtist, nonempty(&format_artist_string(&self.album_artists)));
        if let Some(id) = &self.id {
            set_text(&mut tag, TRACK_ID_TAG, id);
        }
        if let Some(release_id) = &self.release_id {
            set_text(&mut tag, RELEASE_ID_TAG, release_id);
        }

        tag.save_to_path(&self.path, WriteOptions::default())?;
        Ok(())
    }
}

fn default_tag_type(path: &Path) -> TagType {
    match path.extension().and_then(|e| e.to_str()).map(|e| e.to_lowercase()).as_deref() {
        Some("m4a") => TagType::Mp4Ilst,
        Some("flac") | Some("ogg") | Some("opus") => TagType::VorbisComments,
        _ => TagType::Id3v2,
    }
}

fn get_text(tag: &Tag, key: &str) -> Option<String> {
    get_text_ref(tag, key).map(String::from)
}

fn get_text_ref<'a>(tag: &'a Tag, key: &str) -> Option<&'a str> {
    tag.get(&ItemKey::Unknown(key.to_string())).and_then(|item| match item.value() {
        ItemValue::Text(s) => Some(s.as_str()),
        _ => None,
    })
}

fn set_text(tag: &mut Tag, key: &str, value: &str) {
    tag.insert_unchecked(TagItem::new(ItemKey::Unknown(key.to_string()), ItemValue::Text(value.to_string())));
}

fn set_or_remove_text(tag: &mut Tag, key: ItemKey, value: Option<&str>) {
    match value {
        Some(v) => {
            tag.insert(TagItem::new(key, ItemValue::Text(v.to_string())));
        }
        None => {
            tag.retain(|item| *item.key() != key);
        }
    }
}

fn nonempty(s: &str) -> Option<&str> {
    if s.is_empty() {
        None
    } else {
        Some(s)
    }
}
