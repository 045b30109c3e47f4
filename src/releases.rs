/// The releases module encapsulates mutations on release and track entities.
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;
use std::process::Command;

use serde::{Deserialize, Serialize};
use tracing::{debug, info};
use uuid::Uuid;

use crate::audiotags::{Artists, AudioTags};
use crate::cache::{
    get_release, get_release_id_from_virtual_dirname, get_release_source_path_from_id,
    get_release_virtual_dirname_from_id, lock, release_lock_name, CachedArtist, CachedRelease,
};
use crate::cache_update::{
    update_cache_evict_nonexistent_releases, update_cache_for_collages, update_cache_for_playlists,
    update_cache_for_releases,
};
use crate::config::Config;
use crate::datafiles::{datafile_path, read_datafile, write_datafile};
use crate::errors::{Result, RoseExpectedError};

/// The year sentinel used in the release metadata edit format: TOML has no null, so -9999
/// denotes an absent year.
pub const YEAR_SENTINEL: i32 = -9999;

/// Resolve either form of release reference into `(release_id, virtual_dirname)`. Release IDs
/// are opaque strings, so both forms resolve through the cache.
pub fn resolve_release_ids(c: &Config, release_id_or_virtual_dirname: &str) -> Result<(String, String)> {
    if let Some(virtual_dirname) = get_release_virtual_dirname_from_id(c, release_id_or_virtual_dirname)? {
        return Ok((release_id_or_virtual_dirname.to_string(), virtual_dirname));
    }
    if let Some(id) = get_release_id_from_virtual_dirname(c, release_id_or_virtual_dirname)? {
        return Ok((id, release_id_or_virtual_dirname.to_string()));
    }
    Err(RoseExpectedError::ReleaseDoesNotExist { id: release_id_or_virtual_dirname.to_string() }.into())
}

pub fn dump_releases(c: &Config) -> Result<String> {
    let releases = crate::cache::list_releases(c, None, None, None, None)?;
    Ok(serde_json::to_string(&releases)?)
}

pub fn delete_release(c: &Config, release_id_or_virtual_dirname: &str) -> Result<()> {
    let (release_id, release_dirname) = resolve_release_ids(c, release_id_or_virtual_dirname)?;
    let source_path = get_release_source_path_from_id(c, &release_id)?.ok_or_else(|| {
        RoseExpectedError::ReleaseDoesNotExist { id: release_id.clone() }
    })?;
    {
        let _lock = lock(c, &release_lock_name(&release_id), 15.0)?;
        crate::common::send_to_trash(c, &source_path)?;
    }
    info!("trashed release {release_dirname}");
    update_cache_evict_nonexistent_releases(c)?;
    // Refresh all collages and playlists so the release's members are flagged missing.
    update_cache_for_collages(c, None, true)?;
    update_cache_for_playlists(c, None, true)?;
    Ok(())
}

pub fn toggle_release_new(c: &Config, release_id_or_virtual_dirname: &str) -> Result<()> {
    let (release_id, release_dirname) = resolve_release_ids(c, release_id_or_virtual_dirname)?;
    let source_path = get_release_source_path_from_id(c, &release_id)?.ok_or_else(|| {
        RoseExpectedError::ReleaseDoesNotExist { id: release_id.clone() }
    })?;
    {
        let _lock = lock(c, &release_lock_name(&release_id), 5.0)?;
        let path = datafile_path(&source_path, &release_id);
        let mut datafile = read_datafile(&path)?;
        datafile.new = !datafile.new;
        write_datafile(&path, &datafile)?;
        info!("toggled release {release_dirname} to new={}", datafile.new);
    }
    update_cache_for_releases(c, Some(vec![source_path]), false, false)?;
    Ok(())
}

pub fn set_release_cover_art(c: &Config, release_id_or_virtual_dirname: &str, new_cover_path: &Path) -> Result<()> {
    let ext = new_cover_path.extension().and_then(|e| e.to_str()).unwrap_or("").to_lowercase();
    if !c.valid_art_exts.contains(&ext) {
        return Err(RoseExpectedError::InvalidCoverArtFile { path: new_cover_path.to_path_buf() }.into());
    }
    let (release_id, release_dirname) = resolve_release_ids(c, release_id_or_virtual_dirname)?;
    let source_path = get_release_source_path_from_id(c, &release_id)?.ok_or_else(|| {
        RoseExpectedError::ReleaseDoesNotExist { id: release_id.clone() }
    })?;
    {
        let _lock = lock(c, &release_lock_name(&release_id), 5.0)?;
        remove_existing_covers(c, &source_path)?;
        fs::copy(new_cover_path, source_path.join(format!("cover.{ext}")))?;
    }
    info!("set the cover of release {release_dirname}");
    update_cache_for_releases(c, Some(vec![source_path]), true, false)?;
    Ok(())
}

pub fn remove_release_cover_art(c: &Config, release_id_or_virtual_dirname: &str) -> Result<()> {
    let (release_id, release_dirname) = resolve_release_ids(c, release_id_or_virtual_dirname)?;
    let source_path = get_release_source_path_from_id(c, &release_id)?.ok_or_else(|| {
        RoseExpectedError::ReleaseDoesNotExist { id: release_id.clone() }
    })?;
    {
        let _lock = lock(c, &release_lock_name(&release_id), 5.0)?;
        remove_existing_covers(c, &source_path)?;
    }
    info!("removed the cover of release {release_dirname}");
    update_cache_for_releases(c, Some(vec![source_path]), true, false)?;
    Ok(())
}

fn remove_existing_covers(c: &Config, source_path: &Path) -> Result<()> {
    let valid_cover_arts = c.valid_cover_arts();
    for entry in fs::read_dir(source_path)? {
        let path = entry?.path();
        let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
            continue;
        };
        if valid_cover_arts.contains(&name.to_lowercase()) {
            fs::remove_file(&path)?;
            debug!("removed existing cover art {}", path.display());
        }
    }
    Ok(())
}

/// The release metadata edit format, rendered as TOML into `$EDITOR`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReleaseMetadata {
    pub title: String,
    pub releasetype: String,
    pub year: i32,
    pub genres: Vec<String>,
    pub labels: Vec<String>,
    pub artists: Vec<RoleArtist>,
    pub tracks: BTreeMap<String, TrackMetadata>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RoleArtist {
    pub name: String,
    pub role: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrackMetadata {
    pub disc_number: String,
    pub track_number: String,
    pub title: String,
    pub artists: Vec<RoleArtist>,
}

pub fn release_metadata_from_cache(release: &CachedRelease, tracks: &[crate::cache::CachedTrack]) -> ReleaseMetadata {
    ReleaseMetadata {
        title: release.title.clone(),
        releasetype: release.release_type.clone(),
        year: release.release_year.unwrap_or(YEAR_SENTINEL),
        genres: release.genres.clone(),
        labels: release.labels.clone(),
        artists: role_artists(&release.artists),
        tracks: tracks
            .iter()
            .map(|t| {
                (
                    t.id.clone(),
                    TrackMetadata {
                        disc_number: t.disc_number.clone(),
                        track_number: t.track_number.clone(),
                        title: t.title.clone(),
                        artists: role_artists(&t.artists),
                    },
                )
            })
            .collect(),
    }
}

// The synthesized alias rows are excluded: they are derived data, not editable.
fn role_artists(artists: &[CachedArtist]) -> Vec<RoleArtist> {
    artists
        .iter()
        .filter(|a| !a.alias)
        .map(|a| RoleArtist { name: a.name.clone(), role: a.role.clone() })
        .collect()
}

fn artists_from_roles(role_artists: &[RoleArtist]) -> Result<Artists> {
    let mut artists = Artists::default();
    for ra in role_artists {
        match ra.role.as_str() {
            "main" => artists.main.push(ra.name.clone()),
            "guest" => artists.guest.push(ra.name.clone()),
            "remixer" => artists.remixer.push(ra.name.clone()),
            "producer" => artists.producer.push(ra.name.clone()),
            "composer" => artists.composer.push(ra.name.clone()),
            "djmixer" => artists.djmixer.push(ra.name.clone()),
            _ => return Err(RoseExpectedError::UnknownArtistRole { role: ra.role.clone() }.into()),
        }
    }
    Ok(artists)
}

/// Edit a release's metadata in `$EDITOR`. On return, changed fields are written to every
/// track's tags and the release is re-indexed.
pub fn edit_release(c: &Config, release_id_or_virtual_dirname: &str) -> Result<()> {
    edit_release_with(c, release_id_or_virtual_dirname, open_in_editor)
}

pub fn edit_release_with(
    c: &Config,
    release_id_or_virtual_dirname: &str,
    edit_fn: impl FnOnce(&str) -> Result<Option<String>>,
) -> Result<()> {
    let (release_id, _) = resolve_release_ids(c, release_id_or_virtual_dirname)?;
    let (release, tracks) = get_release(c, &release_id)?
        .ok_or_else(|| RoseExpectedError::ReleaseDoesNotExist { id: release_id.clone() })?;
    let _lock = lock(c, &release_lock_name(&release_id), 60.0)?;

    let original = release_metadata_from_cache(&release, &tracks);
    let rendered = toml::to_string(&original)?;
    let Some(edited_raw) = edit_fn(&rendered)? else {
        info!("aborting: metadata file not submitted");
        return Ok(());
    };
    let edited: ReleaseMetadata = toml::from_str(&edited_raw)?;
    if edited == original {
        info!("no-op: edited release metadata is identical");
        return Ok(());
    }

    let release_artists = artists_from_roles(&edited.artists)?;
    let release_year = if edited.year == YEAR_SENTINEL { None } else { Some(edited.year) };

    for track in &tracks {
        let mut tags = AudioTags::from_file(&track.source_path)?;
        tags.album = Some(edited.title.clone());
        tags.release_type = edited.releasetype.to_lowercase();
        tags.year = release_year;
        tags.genre = edited.genres.clone();
        tags.label = edited.labels.clone();
        tags.album_artists = release_artists.clone();
        if let Some(track_meta) = edited.tracks.get(&track.id) {
            tags.disc_number = Some(track_meta.disc_number.clone());
            tags.track_number = Some(track_meta.track_number.clone());
            tags.title = Some(track_meta.title.clone());
            tags.artists = artists_from_roles(&track_meta.artists)?;
        }
        tags.flush(c)?;
    }

    info!("edited release {release_id} from EDITOR");
    update_cache_for_releases(c, Some(vec![release.source_path.clone()]), false, false)?;
    Ok(())
}

/// Hand a string to `$EDITOR` through a temp file. Returns None when the editor fails or the
/// contents come back unchanged.
pub fn open_in_editor(initial: &str) -> Result<Option<String>> {
    let editor = std::env::var("EDITOR").unwrap_or_else(|_| "vi".to_string());
    let mut parts = editor.split_whitespace();
    let Some(program) = parts.next() else {
        return Ok(None);
    };
    let tmp = std::env::temp_dir().join(format!("rose-edit-{}.toml", Uuid::now_v7()));
    fs::write(&tmp, initial)?;
    let status = Command::new(program).args(parts).arg(&tmp).status()?;
    if !status.success() {
        let _ = fs::remove_file(&tmp);
        return Ok(None);
    }
    let edited = fs::read_to_string(&tmp)?;
    let _ = fs::remove_file(&tmp);
    if edited == initial {
        return Ok(None);
    }
    Ok(Some(edited))
}
