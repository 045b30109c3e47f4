/// The datafiles module implements the `.rose.{id}.toml` release sidecar, which stores
/// release-level mutable state that does not belong in audio tags.
use std::fs;
use std::path::{Path, PathBuf};

use chrono::{SecondsFormat, Utc};
use regex::Regex;
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::errors::{Result, RoseExpectedError};

lazy_static::lazy_static! {
    pub static ref STORED_DATA_FILE_REGEX: Regex = Regex::new(r"^\.rose\.([^.]+)\.toml$").unwrap();
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredDataFile {
    #[serde(default = "default_new")]
    pub new: bool,
    #[serde(default = "default_added_at")]
    pub added_at: String,
}

fn default_new() -> bool {
    true
}

fn default_added_at() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Secs, false)
}

impl Default for StoredDataFile {
    fn default() -> Self {
        StoredDataFile { new: default_new(), added_at: default_added_at() }
    }
}

pub fn datafile_path(dir: &Path, release_id: &str) -> PathBuf {
    dir.join(format!(".rose.{release_id}.toml"))
}

/// Find the sidecar in a release directory, returning its path and the ID from the filename.
/// Release IDs are opaque strings; the filename is the authority.
pub fn find_release_datafile(dir: &Path) -> Result<Option<(PathBuf, String)>> {
    if !dir.is_dir() {
        return Ok(None);
    }
    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        let filename = entry.file_name();
        let Some(filename) = filename.to_str() else {
            continue;
        };
        if let Some(captures) = STORED_DATA_FILE_REGEX.captures(filename) {
            let id = captures.get(1).map(|m| m.as_str().to_string());
            if let Some(id) = id {
                return Ok(Some((entry.path(), id)));
            }
        }
    }
    Ok(None)
}

pub fn read_datafile(path: &Path) -> Result<StoredDataFile> {
    let contents = fs::read_to_string(path)
        .map_err(|_| RoseExpectedError::FileNotFound { path: path.to_path_buf() })?;
    let datafile: StoredDataFile = toml::from_str(&contents)?;
    Ok(datafile)
}

/// Read the sidecar; if the body is legacy (unparsable or missing keys), rewrite it with a fresh
/// initial state. The filename ID is kept; only the body is replaced.
pub fn read_or_upgrade_datafile(path: &Path) -> Result<StoredDataFile> {
    let contents = fs::read_to_string(path)
        .map_err(|_| RoseExpectedError::FileNotFound { path: path.to_path_buf() })?;
    let parsed = toml::from_str::<toml::Table>(&contents).ok().and_then(|table| {
        (table.contains_key("new") && table.contains_key("added_at"))
            .then(|| toml::from_str::<StoredDataFile>(&contents).ok())
            .flatten()
    });
    match parsed {
        Some(datafile) => Ok(datafile),
        None => {
            warn!("upgrading legacy datafile at {}", path.display());
            let datafile = StoredDataFile::default();
            write_datafile(path, &datafile)?;
            Ok(datafile)
        }
    }
}

/// Write the sidecar. Unknown keys present in the existing file are preserved.
pub fn write_datafile(path: &Path, datafile: &StoredDataFile) -> Result<()> {
    let mut table = fs::read_to_string(path)
        .ok()
        .and_then(|contents| toml::from_str::<toml::Table>(&contents).ok())
        .unwrap_or_default();
    table.insert("new".to_string(), toml::Value::Boolean(datafile.new));
    table.insert("added_at".to_string(), toml::Value::String(datafile.added_at.clone()));
    fs::write(path, toml::to_string(&table)?)?;
    Ok(())
}

/// Create a fresh sidecar with a newly minted release ID.
pub fn create_datafile(dir: &Path) -> Result<(PathBuf, String, StoredDataFile)> {
    let release_id = uuid::Uuid::now_v7().to_string();
    let path = datafile_path(dir, &release_id);
    let datafile = StoredDataFile::default();
    write_datafile(&path, &datafile)?;
    Ok((path, release_id, datafile))
}

/// One member of a collage or playlist. `uuid` references a release or track; `missing` is set
/// when the referenced entity is not currently indexed.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MemberEntry {
    pub uuid: String,
    #[serde(default)]
    pub description_meta: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub missing: Option<bool>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct CollageFile {
    #[serde(default)]
    pub releases: Vec<MemberEntry>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct PlaylistFile {
    #[serde(default)]
    pub tracks: Vec<MemberEntry>,
}

/// Parse a collage file; an unparsable body is treated as an empty collage so that the library
/// keeps operating.
pub fn read_collage_file(path: &Path) -> Result<CollageFile> {
    let contents = fs::read_to_string(path)
        .map_err(|_| RoseExpectedError::FileNotFound { path: path.to_path_buf() })?;
    Ok(toml::from_str(&contents).unwrap_or_else(|e| {
        warn!("failed to parse collage file {}: {e}; treating as empty", path.display());
        CollageFile::default()
    }))
}

/// Collages are written in the `[[releases]]` array-of-tables form.
pub fn write_collage_file(path: &Path, data: &CollageFile) -> Result<()> {
    fs::write(path, toml::to_string(data)?)?;
    Ok(())
}

/// Parse a playlist file. Both the inline `tracks = [{...}]` form and the `[[tracks]]`
/// array-of-tables form are accepted.
pub fn read_playlist_file(path: &Path) -> Result<PlaylistFile> {
    let contents = fs::read_to_string(path)
        .map_err(|_| RoseExpectedError::FileNotFound { path: path.to_path_buf() })?;
    Ok(toml::from_str(&contents).unwrap_or_else(|e| {
        warn!("failed to parse playlist file {}: {e}; treating as empty", path.display());
        PlaylistFile::default()
    }))
}

/// The playlist writer emits the inline-table form.
pub fn write_playlist_file(path: &Path, data: &PlaylistFile) -> Result<()> {
    fs::write(path, render_playlist_toml(data))?;
    Ok(())
}

fn render_playlist_toml(data: &PlaylistFile) -> String {
    if data.tracks.is_empty() {
        return "tracks = []\n".to_string();
    }
    let mut out = String::from("tracks = [\n");
    for entry in &data.tracks {
        out.push_str("    { uuid = ");
        out.push_str(&toml::Value::String(entry.uuid.clone()).to_string());
        out.push_str(", description_meta = ");
        out.push_str(&toml::Value::String(entry.description_meta.clone()).to_string());
        if entry.missing == Some(true) {
            out.push_str(", missing = true");
        }
        out.push_str(" },\n");
    }
    out.push_str("]\n");
    out
}
