/// The collages module provides functions for interacting with collages.
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

use tracing::{debug, info};

use crate::cache::{collage_lock_name, lock};
use crate::cache_update::{update_cache_evict_nonexistent_collages, update_cache_for_collages};
use crate::config::Config;
use crate::datafiles::{read_collage_file, write_collage_file, MemberEntry};
use crate::errors::{Result, RoseExpectedError};
use crate::releases::resolve_release_ids;

pub fn create_collage(c: &Config, name: &str) -> Result<()> {
    fs::create_dir_all(c.music_source_dir.join("!collages"))?;
    let path = collage_path(c, name);
    {
        let _lock = lock(c, &collage_lock_name(name), 5.0)?;
        if path.exists() {
            return Err(RoseExpectedError::CollageAlreadyExists { name: name.to_string() }.into());
        }
        fs::write(&path, "")?;
    }
    info!("created collage {name} in source directory");
    update_cache_for_collages(c, Some(vec![name.to_string()]), true)?;
    Ok(())
}

pub fn delete_collage(c: &Config, name: &str) -> Result<()> {
    let path = collage_path(c, name);
    {
        let _lock = lock(c, &collage_lock_name(name), 5.0)?;
        if !path.exists() {
            return Err(RoseExpectedError::CollageDoesNotExist { name: name.to_string() }.into());
        }
        crate::common::send_to_trash(c, &path)?;
    }
    info!("deleted collage {name} from source directory");
    update_cache_evict_nonexistent_collages(c)?;
    Ok(())
}

pub fn rename_collage(c: &Config, old_name: &str, new_name: &str) -> Result<()> {
    let old_path = collage_path(c, old_name);
    let new_path = collage_path(c, new_name);
    {
        let _lock_old = lock(c, &collage_lock_name(old_name), 5.0)?;
        let _lock_new = lock(c, &collage_lock_name(new_name), 5.0)?;
        if !old_path.exists() {
            return Err(RoseExpectedError::CollageDoesNotExist { name: old_name.to_string() }.into());
        }
        if new_path.exists() {
            return Err(RoseExpectedError::CollageAlreadyExists { name: new_name.to_string() }.into());
        }
        fs::rename(&old_path, &new_path)?;
        // And also rename all files with the same stem (e.g. cover arts).
        rename_adjacent_files(&c.music_source_dir.join("!collages"), old_name, new_name)?;
    }
    info!("renamed collage {old_name} to {new_name}");
    update_cache_for_collages(c, Some(vec![new_name.to_string()]), true)?;
    update_cache_evict_nonexistent_collages(c)?;
    Ok(())
}

pub(crate) fn rename_adjacent_files(dir: &Path, old_stem: &str, new_stem: &str) -> Result<()> {
    for entry in fs::read_dir(dir)? {
        let old_adjacent = entry?.path();
        if old_adjacent.file_stem().and_then(|s| s.to_str()) != Some(old_stem) {
            continue;
        }
        let Some(ext) = old_adjacent.extension().and_then(|e| e.to_str()) else {
            continue;
        };
        let new_adjacent = old_adjacent.with_file_name(format!("{new_stem}.{ext}"));
        if new_adjacent.exists() {
            continue;
        }
        fs::rename(&old_adjacent, &new_adjacent)?;
        debug!("renamed adjacent file {} to {}", old_adjacent.display(), new_adjacent.display());
    }
    Ok(())
}

pub fn add_release_to_collage(c: &Config, collage_name: &str, release_id_or_virtual_dirname: &str) -> Result<()> {
    let (release_id, release_dirname) = resolve_release_ids(c, release_id_or_virtual_dirname)?;
    let path = collage_path(c, collage_name);
    if !path.exists() {
        return Err(RoseExpectedError::CollageDoesNotExist { name: collage_name.to_string() }.into());
    }
    {
        let _lock = lock(c, &collage_lock_name(collage_name), 5.0)?;
        let mut data = read_collage_file(&path)?;
        // We don't support duplicate collage entries.
        if data.releases.iter().any(|r| r.uuid == release_id) {
            info!("no-op: release {release_dirname} already in collage {collage_name}");
            return Ok(());
        }
        data.releases.push(MemberEntry { uuid: release_id, description_meta: release_dirname.clone(), missing: None });
        write_collage_file(&path, &data)?;
    }
    info!("added release {release_dirname} to collage {collage_name}");
    update_cache_for_collages(c, Some(vec![collage_name.to_string()]), true)?;
    Ok(())
}

pub fn remove_release_from_collage(c: &Config, collage_name: &str, release_id_or_virtual_dirname: &str) -> Result<()> {
    let (release_id, release_dirname) = resolve_release_ids(c, release_id_or_virtual_dirname)?;
    let path = collage_path(c, collage_name);
    if !path.exists() {
        return Err(RoseExpectedError::CollageDoesNotExist { name: collage_name.to_string() }.into());
    }
    {
        let _lock = lock(c, &collage_lock_name(collage_name), 5.0)?;
        let mut data = read_collage_file(&path)?;
        let old_len = data.releases.len();
        data.releases.retain(|r| r.uuid != release_id);
        if data.releases.len() == old_len {
            info!("no-op: release {release_dirname} not in collage {collage_name}");
            return Ok(());
        }
        write_collage_file(&path, &data)?;
    }
    info!("removed release {release_dirname} from collage {collage_name}");
    update_cache_for_collages(c, Some(vec![collage_name.to_string()]), true)?;
    Ok(())
}

/// Open the collage in `$EDITOR` as plain description lines. The user may reorder or delete
/// lines, but not rename entries.
pub fn edit_collage_in_editor(c: &Config, collage_name: &str) -> Result<()> {
    edit_collage_with(c, collage_name, crate::releases::open_in_editor)
}

pub fn edit_collage_with(
    c: &Config,
    collage_name: &str,
    edit_fn: impl FnOnce(&str) -> Result<Option<String>>,
) -> Result<()> {
    let path = collage_path(c, collage_name);
    if !path.exists() {
        return Err(RoseExpectedError::CollageDoesNotExist { name: collage_name.to_string() }.into());
    }
    {
        let _lock = lock(c, &collage_lock_name(collage_name), 60.0)?;
        let mut data = read_collage_file(&path)?;
        let lines: Vec<String> = data.releases.iter().map(|r| r.description_meta.clone()).collect();
        let Some(edited) = edit_fn(&lines.join("\n"))? else {
            info!("aborting: metadata file not submitted");
            return Ok(());
        };
        let entry_mapping: HashMap<String, MemberEntry> =
            data.releases.iter().map(|r| (r.description_meta.clone(), r.clone())).collect();
        let mut edited_releases: Vec<MemberEntry> = Vec::new();
        for desc in edited.trim().split('\n').filter(|l| !l.is_empty()) {
            let entry = entry_mapping.get(desc).ok_or_else(|| {
                RoseExpectedError::DescriptionMismatch(format!(
                    "release {desc} does not match a known release in the collage. Was the line edited?"
                ))
            })?;
            edited_releases.push(entry.clone());
        }
        data.releases = edited_releases;
        write_collage_file(&path, &data)?;
    }
    info!("edited collage {collage_name} from EDITOR");
    update_cache_for_collages(c, Some(vec![collage_name.to_string()]), true)?;
    Ok(())
}

pub fn dump_collages(c: &Config) -> Result<String> {
    let mut out: Vec<serde_json::Value> = Vec::new();
    for name in crate::cache::list_collages(c)? {
        let releases: Vec<serde_json::Value> = crate::cache::list_collage_releases(c, &name)?
            .into_iter()
            .map(|(position, release)| serde_json::json!({"position": position, "release": release.id}))
            .collect();
        out.push(serde_json::json!({"name": name, "releases": releases}));
    }
    Ok(serde_json::to_string(&out)?)
}

pub fn collage_path(c: &Config, name: &str) -> PathBuf {
    c.music_source_dir.join("!collages").join(format!("{name}.toml"))
}
