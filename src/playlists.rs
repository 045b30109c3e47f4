/// The playlists module provides functions for interacting with playlists.
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

use tracing::info;

use crate::cache::{get_track, get_track_filename, lock, playlist_lock_name};
use crate::cache_update::{update_cache_evict_nonexistent_playlists, update_cache_for_playlists};
use crate::collages::rename_adjacent_files;
use crate::config::Config;
use crate::datafiles::{read_playlist_file, write_playlist_file, MemberEntry};
use crate::errors::{Result, RoseExpectedError};

pub fn create_playlist(c: &Config, name: &str) -> Result<()> {
    fs::create_dir_all(c.music_source_dir.join("!playlists"))?;
    let path = playlist_path(c, name);
    {
        let _lock = lock(c, &playlist_lock_name(name), 5.0)?;
        if path.exists() {
            return Err(RoseExpectedError::PlaylistAlreadyExists { name: name.to_string() }.into());
        }
        fs::write(&path, "")?;
    }
    info!("created playlist {name} in source directory");
    update_cache_for_playlists(c, Some(vec![name.to_string()]), true)?;
    Ok(())
}

pub fn delete_playlist(c: &Config, name: &str) -> Result<()> {
    let path = playlist_path(c, name);
    {
        let _lock = lock(c, &playlist_lock_name(name), 5.0)?;
        if !path.exists() {
            return Err(RoseExpectedError::PlaylistDoesNotExist { name: name.to_string() }.into());
        }
        crate::common::send_to_trash(c, &path)?;
    }
    info!("deleted playlist {name} from source directory");
    update_cache_evict_nonexistent_playlists(c)?;
    Ok(())
}

pub fn rename_playlist(c: &Config, old_name: &str, new_name: &str) -> Result<()> {
    let old_path = playlist_path(c, old_name);
    let new_path = playlist_path(c, new_name);
    {
        let _lock_old = lock(c, &playlist_lock_name(old_name), 5.0)?;
        let _lock_new = lock(c, &playlist_lock_name(new_name), 5.0)?;
        if !old_path.exists() {
            return Err(RoseExpectedError::PlaylistDoesNotExist { name: old_name.to_string() }.into());
        }
        if new_path.exists() {
            return Err(RoseExpectedError::PlaylistAlreadyExists { name: new_name.to_string() }.into());
        }
        fs::rename(&old_path, &new_path)?;
        // The cover art shares the playlist's stem; move it along.
        rename_adjacent_files(&c.music_source_dir.join("!playlists"), old_name, new_name)?;
    }
    info!("renamed playlist {old_name} to {new_name}");
    update_cache_for_playlists(c, Some(vec![new_name.to_string()]), true)?;
    update_cache_evict_nonexistent_playlists(c)?;
    Ok(())
}

pub fn add_track_to_playlist(c: &Config, playlist_name: &str, track_id: &str) -> Result<()> {
    let track = get_track(c, track_id)?
        .ok_or_else(|| RoseExpectedError::TrackDoesNotExist { id: track_id.to_string() })?;
    let path = playlist_path(c, playlist_name);
    if !path.exists() {
        return Err(RoseExpectedError::PlaylistDoesNotExist { name: playlist_name.to_string() }.into());
    }
    {
        let _lock = lock(c, &playlist_lock_name(playlist_name), 5.0)?;
        let mut data = read_playlist_file(&path)?;
        // We don't support duplicate playlist entries.
        if data.tracks.iter().any(|t| t.uuid == track_id) {
            info!("no-op: track {} already in playlist {playlist_name}", track.virtual_filename);
            return Ok(());
        }
        data.tracks.push(MemberEntry {
            uuid: track_id.to_string(),
            description_meta: track.virtual_filename.clone(),
            missing: None,
        });
        write_playlist_file(&path, &data)?;
    }
    info!("added track {} to playlist {playlist_name}", track.virtual_filename);
    update_cache_for_playlists(c, Some(vec![playlist_name.to_string()]), true)?;
    Ok(())
}

pub fn remove_track_from_playlist(c: &Config, playlist_name: &str, track_id: &str) -> Result<()> {
    let track_filename = get_track_filename(c, track_id)?
        .ok_or_else(|| RoseExpectedError::TrackDoesNotExist { id: track_id.to_string() })?;
    let path = playlist_path(c, playlist_name);
    if !path.exists() {
        return Err(RoseExpectedError::PlaylistDoesNotExist { name: playlist_name.to_string() }.into());
    }
    {
        let _lock = lock(c, &playlist_lock_name(playlist_name), 5.0)?;
        let mut data = read_playlist_file(&path)?;
        let old_len = data.tracks.len();
        data.tracks.retain(|t| t.uuid != track_id);
        if data.tracks.len() == old_len {
            info!("no-op: track {track_filename} not in playlist {playlist_name}");
            return Ok(());
        }
        write_playlist_file(&path, &data)?;
    }
    info!("removed track {track_filename} from playlist {playlist_name}");
    update_cache_for_playlists(c, Some(vec![playlist_name.to_string()]), true)?;
    Ok(())
}

/// Open the playlist in `$EDITOR` as plain description lines. The user may reorder or delete
/// lines, but not rename entries.
pub fn edit_playlist_in_editor(c: &Config, playlist_name: &str) -> Result<()> {
    edit_playlist_with(c, playlist_name, crate::releases::open_in_editor)
}

pub fn edit_playlist_with(
    c: &Config,
    playlist_name: &str,
    edit_fn: impl FnOnce(&str) -> Result<Option<String>>,
) -> Result<()> {
    let path = playlist_path(c, playlist_name);
    if !path.exists() {
        return Err(RoseExpectedError::PlaylistDoesNotExist { name: playlist_name.to_string() }.into());
    }
    {
        let _lock = lock(c, &playlist_lock_name(playlist_name), 60.0)?;
        let mut data = read_playlist_file(&path)?;
        let lines: Vec<String> = data.tracks.iter().map(|t| t.description_meta.clone()).collect();
        let Some(edited) = edit_fn(&lines.join("\n"))? else {
            info!("aborting: metadata file not submitted");
            return Ok(());
        };
        let entry_mapping: HashMap<String, MemberEntry> =
            data.tracks.iter().map(|t| (t.description_meta.clone(), t.clone())).collect();
        let mut edited_tracks: Vec<MemberEntry> = Vec::new();
        for desc in edited.trim().split('\n').filter(|l| !l.is_empty()) {
            let entry = entry_mapping.get(desc).ok_or_else(|| {
                RoseExpectedError::DescriptionMismatch(format!(
                    "track {desc} does not match a known track in the playlist. Was the line edited?"
                ))
            })?;
            edited_tracks.push(entry.clone());
        }
        data.tracks = edited_tracks;
        write_playlist_file(&path, &data)?;
    }
    info!("edited playlist {playlist_name} from EDITOR");
    update_cache_for_playlists(c, Some(vec![playlist_name.to_string()]), true)?;
    Ok(())
}

pub fn set_playlist_cover_art(c: &Config, playlist_name: &str, new_cover_path: &Path) -> Result<()> {
    let ext = new_cover_path.extension().and_then(|e| e.to_str()).unwrap_or("").to_lowercase();
    if !c.valid_art_exts.contains(&ext) {
        return Err(RoseExpectedError::InvalidCoverArtFile { path: new_cover_path.to_path_buf() }.into());
    }
    let path = playlist_path(c, playlist_name);
    if !path.exists() {
        return Err(RoseExpectedError::PlaylistDoesNotExist { name: playlist_name.to_string() }.into());
    }
    {
        let _lock = lock(c, &playlist_lock_name(playlist_name), 5.0)?;
        remove_existing_covers(c, playlist_name)?;
        fs::copy(new_cover_path, c.music_source_dir.join("!playlists").join(format!("{playlist_name}.{ext}")))?;
    }
    info!("set the cover of playlist {playlist_name}");
    update_cache_for_playlists(c, Some(vec![playlist_name.to_string()]), true)?;
    Ok(())
}

pub fn remove_playlist_cover_art(c: &Config, playlist_name: &str) -> Result<()> {
    let path = playlist_path(c, playlist_name);
    if !path.exists() {
        return Err(RoseExpectedError::PlaylistDoesNotExist { name: playlist_name.to_string() }.into());
    }
    {
        let _lock = lock(c, &playlist_lock_name(playlist_name), 5.0)?;
        remove_existing_covers(c, playlist_name)?;
    }
    info!("removed the cover of playlist {playlist_name}");
    update_cache_for_playlists(c, Some(vec![playlist_name.to_string()]), true)?;
    Ok(())
}

fn remove_existing_covers(c: &Config, playlist_name: &str) -> Result<()> {
    for ext in &c.valid_art_exts {
        let cover = c.music_source_dir.join("!playlists").join(format!("{playlist_name}.{ext}"));
        if cover.exists() {
            fs::remove_file(&cover)?;
        }
    }
    Ok(())
}

pub fn playlist_path(c: &Config, name: &str) -> PathBuf {
    c.music_source_dir.join("!playlists").join(format!("{name}.toml"))
}
