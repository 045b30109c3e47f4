/// The cache_update module implements the incremental indexer: it brings the read cache into
/// agreement with the music source directory.
///
/// We consider a few problems here, whose solutions contribute to the overall complexity:
///
/// 1. **Arbitrary renames:** Files and directories can be arbitrarily renamed between scans. We
///    solve for renames by writing stable identifiers to disk: the release ID lives in the
///    `.rose.{id}.toml` sidecar filename and in every audio tag, and the track ID lives in the
///    audio tag.
/// 2. **In-progress directory creation:** We may come across a directory while it is being
///    created, e.g. mid `cp -r`. Unless force is passed, we skip directories whose audio tags
///    carry a release ID but which lack the sidecar.
/// 3. **Performance:** Disk access is the bottleneck, so unchanged releases are detected from
///    mtimes alone and skipped without reading any tags.
use std::collections::{HashMap, HashSet};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::UNIX_EPOCH;

use rayon::prelude::*;
use rusqlite::{params, OptionalExtension};
use tracing::{debug, error, info};
use uuid::Uuid;

use crate::audiotags::{format_artist_string, is_supported_audio_path, Artists, AudioTags};
use crate::cache::{connect, process_string_for_fts};
use crate::common::{sanitize_dirname, sanitize_filename, uniq};
use crate::config::Config;
use crate::datafiles::{
    create_datafile, datafile_path, find_release_datafile, read_collage_file, read_or_upgrade_datafile,
    read_playlist_file, write_collage_file, write_datafile, write_playlist_file, StoredDataFile,
};
use crate::errors::Result;

/// Update the read cache to match the data for all releases, collages, and playlists in the
/// music source directory. Delete any cached entities that are no longer present on disk.
pub fn update_cache(c: &Config, force: bool, force_multiprocessing: bool) -> Result<()> {
    update_cache_for_releases(c, None, force, force_multiprocessing)?;
    update_cache_evict_nonexistent_releases(c)?;
    update_cache_for_collages(c, None, force)?;
    update_cache_evict_nonexistent_collages(c)?;
    update_cache_for_playlists(c, None, force)?;
    update_cache_evict_nonexistent_playlists(c)?;
    Ok(())
}

/// Update the read cache for the given release directories (or all of them). Per-release errors
/// are logged and skipped; IDs already written to tags or sidecars are kept, so a subsequent run
/// picks the directory up again.
pub fn update_cache_for_releases(
    c: &Config,
    release_dirs: Option<Vec<PathBuf>>,
    force: bool,
    force_multiprocessing: bool,
) -> Result<()> {
    let release_dirs = match release_dirs {
        Some(dirs) => dirs,
        None => {
            let mut dirs = Vec::new();
            for entry in fs::read_dir(&c.music_source_dir)? {
                let entry = entry?;
                if entry.file_type()?.is_dir() {
                    dirs.push(entry.path());
                }
            }
            dirs
        }
    };
    let mut release_dirs: Vec<PathBuf> = release_dirs
        .into_iter()
        .filter(|d| {
            let Some(name) = d.file_name().and_then(|n| n.to_str()) else {
                return false;
            };
            name != "!collages" && name != "!playlists" && !c.ignore_release_directories.contains(&name.to_string())
        })
        .collect();
    release_dirs.sort();
    if release_dirs.is_empty() {
        debug!("no-op: no whitelisted releases passed into update_cache_for_releases");
        return Ok(());
    }
    debug!("refreshing the read cache for {} releases", release_dirs.len());

    // Small batches skip the multiprocessing gunk: the virtual filesystem updates one release at
    // a time and must not pay a thread-pool toll per syscall.
    if release_dirs.len() < 50 && !force_multiprocessing {
        for dir in release_dirs {
            if let Err(e) = update_cache_for_release(c, &dir, force) {
                error!("failed to update cache for release {}: {e}", dir.display());
            }
        }
        return Ok(());
    }

    let batch_size = (release_dirs.len() / num_cpus::get()).max(1).min(50);
    release_dirs.par_chunks(batch_size).for_each(|batch| {
        for dir in batch {
            if let Err(e) = update_cache_for_release(c, dir, force) {
                error!("failed to update cache for release {}: {e}", dir.display());
            }
        }
    });
    Ok(())
}

/// Remove cached releases whose source directory no longer exists.
pub fn update_cache_evict_nonexistent_releases(c: &Config) -> Result<()> {
    debug!("evicting cached releases that are not on disk");
    let mut dirs: Vec<String> = Vec::new();
    for entry in fs::read_dir(&c.music_source_dir)? {
        let entry = entry?;
        if entry.file_type()?.is_dir() {
            dirs.push(entry.path().to_string_lossy().to_string());
        }
    }
    let conn = connect(c)?;
    let sql = if dirs.is_empty() {
        "DELETE FROM releases RETURNING source_path".to_string()
    } else {
        format!(
            "DELETE FROM releases WHERE source_path NOT IN ({}) RETURNING source_path",
            vec!["?"; dirs.len()].join(",")
        )
    };
    let mut stmt = conn.prepare(&sql)?;
    let params_vec: Vec<&dyn rusqlite::ToSql> = dirs.iter().map(|d| d as &dyn rusqlite::ToSql).collect();
    let mut rows = stmt.query(&params_vec[..])?;
    while let Some(row) = rows.next()? {
        let source_path: String = row.get(0)?;
        info!("evicted missing release {source_path} from cache");
    }
    Ok(())
}

struct ScannedDir {
    audio_paths: Vec<PathBuf>,
    all_names: Vec<String>,
}

fn scan_release_dir(dir: &Path) -> Result<ScannedDir> {
    let mut audio_paths = Vec::new();
    let mut all_names = Vec::new();
    for entry in walkdir::WalkDir::new(dir).into_iter().filter_map(|e| e.ok()) {
        if !entry.file_type().is_file() {
            continue;
        }
        if entry.depth() == 1 {
            if let Some(name) = entry.file_name().to_str() {
                all_names.push(name.to_string());
            }
        }
        if is_supported_audio_path(entry.path()) {
            audio_paths.push(entry.path().to_path_buf());
        }
    }
    audio_paths.sort();
    Ok(ScannedDir { audio_paths, all_names })
}

fn mtime_str(path: &Path) -> Result<String> {
    let metadata = fs::metadata(path)?;
    let mtime = metadata.modified()?;
    let dur = mtime.duration_since(UNIX_EPOCH).unwrap_or_default();
    Ok(format!("{}.{:09}", dur.as_secs(), dur.subsec_nanos()))
}

/// Index one release directory. See the module docstring for the overall contract.
pub fn update_cache_for_release(c: &Config, dir: &Path, force: bool) -> Result<()> {
    if !dir.is_dir() {
        debug!("skipping {} because it is not a directory", dir.display());
        return Ok(());
    }
    let scanned = scan_release_dir(dir)?;

    // A directory without audio files is not a release. If it was previously cached (e.g. its
    // tracks were deleted), evict it.
    if scanned.audio_paths.is_empty() {
        let conn = connect(c)?;
        let evicted = conn.execute("DELETE FROM releases WHERE source_path = ?1", params![dir.to_string_lossy()])?;
        if evicted > 0 {
            info!("evicted release {} from cache: no remaining audio files", dir.display());
        }
        return Ok(());
    }

    // Resolve the release ID from the sidecar; mint one if the directory is new.
    let (datafile_pathbuf, release_id, datafile) = match find_release_datafile(dir)? {
        Some((path, id)) => {
            let datafile = read_or_upgrade_datafile(&path)?;
            (path, id, datafile)
        }
        None => {
            let first_tags = AudioTags::from_file(&scanned.audio_paths[0])?;
            match first_tags.release_id {
                Some(tag_release_id) if !force => {
                    // The directory may be mid-copy: tags already carry a release ID, but the
                    // sidecar has not landed yet. Leave it alone until the copy completes.
                    debug!(
                        "skipping partially-written directory {}: tags have release ID {tag_release_id} but no datafile is present",
                        dir.display()
                    );
                    return Ok(());
                }
                Some(tag_release_id) => {
                    // Forced scan: recreate the sidecar, keeping the ID the tags remember.
                    let path = datafile_path(dir, &tag_release_id);
                    let datafile = StoredDataFile::default();
                    write_datafile(&path, &datafile)?;
                    info!("recreated datafile for release ID {tag_release_id} in {}", dir.display());
                    (path, tag_release_id, datafile)
                }
                None => {
                    let (path, id, datafile) = create_datafile(dir)?;
                    info!("assigned release ID {id} to {}", dir.display());
                    (path, id, datafile)
                }
            }
        }
    };
    let datafile_mtime = mtime_str(&datafile_pathbuf)?;

    // Fast path: if the sidecar, the file set, and every audio mtime are unchanged, the cached
    // release is up to date and we can skip reading any tags.
    if !force && release_is_up_to_date(c, dir, &release_id, &datafile_mtime, &scanned.audio_paths)? {
        debug!("release {} is up to date, skipping", dir.display());
        return Ok(());
    }

    debug!("reading tags for release {}", dir.display());
    let mut all_tags: Vec<AudioTags> = Vec::new();
    for path in &scanned.audio_paths {
        let mut tags = AudioTags::from_file(path)?;
        let mut dirty = false;
        if tags.id.is_none() {
            tags.id = Some(Uuid::now_v7().to_string());
            dirty = true;
        }
        if tags.release_id.as_deref() != Some(release_id.as_str()) {
            tags.release_id = Some(release_id.clone());
            dirty = true;
        }
        if dirty {
            tags.flush(c)?;
        }
        all_tags.push(tags);
    }

    // Derive release-level attributes from the track tags: most-common value wins, with the
    // first occurrence as the tiebreaker.
    let title = most_common(all_tags.iter().filter_map(|t| t.album.clone())).unwrap_or_else(|| "Unknown Release".to_string());
    let release_type =
        most_common(all_tags.iter().map(|t| t.release_type.to_lowercase())).unwrap_or_else(|| "unknown".to_string());
    let release_year = most_common(all_tags.iter().filter_map(|t| t.year));
    let genres = uniq(all_tags.iter().flat_map(|t| t.genre.clone()).collect::<Vec<_>>());
    let labels = uniq(all_tags.iter().flat_map(|t| t.label.clone()).collect::<Vec<_>>());
    let disc_numbers: HashSet<String> =
        all_tags.iter().map(|t| t.disc_number.clone().unwrap_or_else(|| "1".to_string())).collect();
    let multidisc = disc_numbers.len() > 1;

    let mut release_artists = merge_artists(all_tags.iter().map(|t| &t.album_artists));
    if release_artists.is_empty() {
        release_artists = merge_artists(all_tags.iter().map(|t| &t.artists));
    }
    let formatted_artists = format_artist_string(&release_artists);

    let valid_cover_arts = c.valid_cover_arts();
    let cover_image_path = scanned
        .all_names
        .iter()
        .find_map(|name| valid_cover_arts.contains(&name.to_lowercase()).then(|| dir.join(name)));

    let mut conn = connect(c)?;

    let virtual_dirname = {
        let mut base = String::new();
        if datafile.new {
            base.push_str("{NEW} ");
        }
        if !formatted_artists.is_empty() {
            base.push_str(&formatted_artists);
            base.push_str(" - ");
        }
        if let Some(year) = release_year {
            base.push_str(&format!("{year}. "));
        }
        base.push_str(&title);
        if !genres.is_empty() {
            base.push_str(&format!(" [{}]", genres.join(";")));
        }
        let base = sanitize_dirname(c, &base, true);
        disambiguate_virtual_dirname(&conn, &release_id, &base)?
    };

    // Compute track virtual filenames and release positions.
    let position_width = all_tags
        .iter()
        .map(|t| t.track_number.as_deref().unwrap_or("1").len())
        .max()
        .unwrap_or(1);
    let mut seen_filenames: HashSet<String> = HashSet::new();
    let mut track_rows: Vec<TrackRow> = Vec::new();
    for (tags, path) in all_tags.iter().zip(&scanned.audio_paths) {
        let stem = path.file_stem().and_then(|s| s.to_str()).unwrap_or("track");
        let ext = path.extension().and_then(|s| s.to_str()).unwrap_or("");
        let track_title = tags.title.clone().unwrap_or_else(|| stem.to_string());
        let track_formatted_artists = format_artist_string(&tags.artists);
        let mut base = String::new();
        if !track_formatted_artists.is_empty() {
            base.push_str(&track_formatted_artists);
            base.push_str(" - ");
        }
        base.push_str(&track_title);
        base.push('.');
        base.push_str(ext);
        let base = sanitize_filename(c, &base, true);
        let virtual_filename = disambiguate_within(&mut seen_filenames, &base);

        let track_number = tags.track_number.clone().unwrap_or_else(|| "1".to_string());
        let disc_number = tags.disc_number.clone().unwrap_or_else(|| "1".to_string());
        let padded = format!("{track_number:0>position_width$}");
        let formatted_release_position = if multidisc { format!("{disc_number}-{padded}") } else { padded };

        track_rows.push(TrackRow {
            id: tags.id.clone().unwrap_or_default(),
            source_path: path.clone(),
            source_mtime: mtime_str(path)?,
            virtual_filename,
            title: track_title,
            track_number,
            disc_number,
            formatted_release_position,
            duration_seconds: tags.duration_sec,
            artists: tags.artists.clone(),
        });
    }

    // Replace the release's rows transactionally: children first, then the release row, then
    // the children and full-text-search rows are re-inserted.
    let tx = conn.transaction()?;
    tx.execute(
        "DELETE FROM rules_engine_fts WHERE rowid IN (SELECT rowid FROM tracks WHERE release_id = ?1)",
        params![release_id],
    )?;
    tx.execute(
        "DELETE FROM tracks_artists WHERE track_id IN (SELECT id FROM tracks WHERE release_id = ?1)",
        params![release_id],
    )?;
    tx.execute("DELETE FROM tracks WHERE release_id = ?1", params![release_id])?;
    // A track may have moved here from another release, and this directory may previously have
    // held a different release. Clear any rows that would collide with the re-insert.
    for t in &track_rows {
        tx.execute(
            "DELETE FROM rules_engine_fts WHERE rowid IN (SELECT rowid FROM tracks WHERE id = ?1 OR source_path = ?2)",
            params![t.id, t.source_path.to_string_lossy()],
        )?;
        tx.execute(
            "DELETE FROM tracks_artists WHERE track_id IN (SELECT id FROM tracks WHERE id = ?1 OR source_path = ?2)",
            params![t.id, t.source_path.to_string_lossy()],
        )?;
        tx.execute("DELETE FROM tracks WHERE id = ?1 OR source_path = ?2", params![t.id, t.source_path.to_string_lossy()])?;
    }
    tx.execute(
        "DELETE FROM releases WHERE source_path = ?1 AND id != ?2",
        params![dir.to_string_lossy(), release_id],
    )?;
    tx.execute("DELETE FROM releases_genres WHERE release_id = ?1", params![release_id])?;
    tx.execute("DELETE FROM releases_labels WHERE release_id = ?1", params![release_id])?;
    tx.execute("DELETE FROM releases_artists WHERE release_id = ?1", params![release_id])?;
    tx.execute(
        "INSERT INTO releases
             (id, source_path, cover_image_path, added_at, datafile_mtime, virtual_dirname, title,
              release_type, release_year, multidisc, new, formatted_artists)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)
         ON CONFLICT (id) DO UPDATE SET
             source_path = excluded.source_path
           , cover_image_path = excluded.cover_image_path
           , added_at = excluded.added_at
           , datafile_mtime = excluded.datafile_mtime
           , virtual_dirname = excluded.virtual_dirname
           , title = excluded.title
           , release_type = excluded.release_type
           , release_year = excluded.release_year
           , multidisc = excluded.multidisc
           , new = excluded.new
           , formatted_artists = excluded.formatted_artists",
        params![
            release_id,
            dir.to_string_lossy(),
            cover_image_path.as_ref().map(|p| p.to_string_lossy().to_string()),
            datafile.added_at,
            datafile_mtime,
            virtual_dirname,
            title,
            release_type,
            release_year,
            multidisc,
            datafile.new,
            formatted_artists,
        ],
    )?;
    for genre in &genres {
        tx.execute(
            "INSERT OR IGNORE INTO releases_genres (release_id, genre, genre_sanitized) VALUES (?1, ?2, ?3)",
            params![release_id, genre, sanitize_dirname(c, genre, false)],
        )?;
    }
    for label in &labels {
        tx.execute(
            "INSERT OR IGNORE INTO releases_labels (release_id, label, label_sanitized) VALUES (?1, ?2, ?3)",
            params![release_id, label, sanitize_dirname(c, label, false)],
        )?;
    }
    for (name, role, alias) in expand_artists_with_aliases(c, &release_artists) {
        tx.execute(
            "INSERT OR IGNORE INTO releases_artists (release_id, artist, artist_sanitized, role, alias)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![release_id, name, sanitize_dirname(c, &name, false), role, alias],
        )?;
    }
    for t in &track_rows {
        tx.execute(
            "INSERT INTO tracks
                 (id, source_path, source_mtime, virtual_filename, title, release_id, track_number,
                  disc_number, formatted_release_position, duration_seconds, formatted_artists)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
            params![
                t.id,
                t.source_path.to_string_lossy(),
                t.source_mtime,
                t.virtual_filename,
                t.title,
                release_id,
                t.track_number,
                t.disc_number,
                t.formatted_release_position,
                t.duration_seconds,
                format_artist_string(&t.artists),
            ],
        )?;
        for (name, role, alias) in expand_artists_with_aliases(c, &t.artists) {
            tx.execute(
                "INSERT OR IGNORE INTO tracks_artists (track_id, artist, artist_sanitized, role, alias)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                params![t.id, name, sanitize_dirname(c, &name, false), role, alias],
            )?;
        }
        let all_artists: Vec<String> = t.artists.main.iter().chain(&t.artists.guest).chain(&t.artists.remixer)
            .chain(&t.artists.producer).chain(&t.artists.composer).chain(&t.artists.djmixer)
            .cloned()
            .collect();
        tx.execute(
            "INSERT INTO rules_engine_fts
                 (rowid, tracktitle, tracknumber, discnumber, albumtitle, releasetype, releaseyear, genre, label, artist)
             SELECT rowid, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10 FROM tracks WHERE id = ?1",
            params![
                t.id,
                process_string_for_fts(&t.title),
                process_string_for_fts(&t.track_number),
                process_string_for_fts(&t.disc_number),
                process_string_for_fts(&title),
                process_string_for_fts(&release_type),
                process_string_for_fts(&release_year.map(|y| y.to_string()).unwrap_or_default()),
                process_string_for_fts(&genres.join(" ")),
                process_string_for_fts(&labels.join(" ")),
                process_string_for_fts(&all_artists.join(" ")),
            ],
        )?;
    }
    tx.commit()?;
    info!("updated cache for release {}", dir.display());
    Ok(())
}

struct TrackRow {
    id: String,
    source_path: PathBuf,
    source_mtime: String,
    virtual_filename: String,
    title: String,
    track_number: String,
    disc_number: String,
    formatted_release_position: String,
    duration_seconds: i32,
    artists: Artists,
}

fn release_is_up_to_date(
    c: &Config,
    dir: &Path,
    release_id: &str,
    datafile_mtime: &str,
    audio_paths: &[PathBuf],
) -> Result<bool> {
    let conn = connect(c)?;
    let cached: Option<(String, String)> = conn
        .query_row("SELECT source_path, datafile_mtime FROM releases WHERE id = ?1", params![release_id], |row| {
            Ok((row.get(0)?, row.get(1)?))
        })
        .optional()?;
    let Some((cached_source_path, cached_datafile_mtime)) = cached else {
        return Ok(false);
    };
    if cached_source_path != dir.to_string_lossy() || cached_datafile_mtime != datafile_mtime {
        return Ok(false);
    }
    let mut stmt = conn.prepare("SELECT source_path, source_mtime FROM tracks WHERE release_id = ?1")?;
    let cached_tracks: HashMap<String, String> = stmt
        .query_map(params![release_id], |row| Ok((row.get(0)?, row.get(1)?)))?
        .collect::<rusqlite::Result<_>>()?;
    if cached_tracks.len() != audio_paths.len() {
        return Ok(false);
    }
    for path in audio_paths {
        let Some(cached_mtime) = cached_tracks.get(path.to_string_lossy().as_ref()) else {
            return Ok(false);
        };
        if *cached_mtime != mtime_str(path)? {
            return Ok(false);
        }
    }
    Ok(true)
}

fn disambiguate_virtual_dirname(conn: &rusqlite::Connection, release_id: &str, base: &str) -> Result<String> {
    let mut candidate = base.to_string();
    let mut n = 2;
    loop {
        let collision: bool = conn.query_row(
            "SELECT EXISTS(SELECT * FROM releases WHERE virtual_dirname = ?1 AND id != ?2)",
            params![candidate, release_id],
            |row| row.get(0),
        )?;
        if !collision {
            return Ok(candidate);
        }
        candidate = format!("{base} [{n}]");
        n += 1;
    }
}

fn disambiguate_within(seen: &mut HashSet<String>, base: &str) -> String {
    let mut candidate = base.to_string();
    let mut n = 2;
    while seen.contains(&candidate) {
        // Insert the suffix before the extension.
        candidate = match base.rfind('.') {
            Some(idx) => format!("{} [{n}]{}", &base[..idx], &base[idx..]),
            None => format!("{base} [{n}]"),
        };
        n += 1;
    }
    seen.insert(candidate.clone());
    candidate
}

fn most_common<T: Clone + Eq + std::hash::Hash>(values: impl Iterator<Item = T>) -> Option<T> {
    let mut counts: HashMap<T, usize> = HashMap::new();
    let mut order: Vec<T> = Vec::new();
    for v in values {
        let count = counts.entry(v.clone()).or_insert(0);
        if *count == 0 {
            order.push(v.clone());
        }
        *count += 1;
    }
    order.into_iter().max_by_key(|v| counts[v])
}

fn merge_artists<'a>(all: impl Iterator<Item = &'a Artists>) -> Artists {
    let mut merged = Artists::default();
    for a in all {
        merged.main.extend(a.main.clone());
        merged.guest.extend(a.guest.clone());
        merged.remixer.extend(a.remixer.clone());
        merged.producer.extend(a.producer.clone());
        merged.composer.extend(a.composer.clone());
        merged.djmixer.extend(a.djmixer.clone());
    }
    merged.main = uniq(merged.main);
    merged.guest = uniq(merged.guest);
    merged.remixer = uniq(merged.remixer);
    merged.producer = uniq(merged.producer);
    merged.composer = uniq(merged.composer);
    merged.djmixer = uniq(merged.djmixer);
    merged
}

/// Expand artist role lists into `(name, role, alias)` triples, synthesizing alias rows from the
/// configured parent map.
fn expand_artists_with_aliases(c: &Config, artists: &Artists) -> Vec<(String, String, bool)> {
    let mut rv: Vec<(String, String, bool)> = Vec::new();
    let mut push = |name: &String, role: &str| {
        rv.push((name.clone(), role.to_string(), false));
        if let Some(parents) = c.artist_aliases_parents_map.get(name) {
            for parent in parents {
                rv.push((parent.clone(), role.to_string(), true));
            }
        }
    };
    for name in &artists.main {
        push(name, "main");
    }
    for name in &artists.guest {
        push(name, "guest");
    }
    for name in &artists.remixer {
        push(name, "remixer");
    }
    for name in &artists.producer {
        push(name, "producer");
    }
    for name in &artists.composer {
        push(name, "composer");
    }
    for name in &artists.djmixer {
        push(name, "djmixer");
    }
    uniq(rv)
}

/// Re-index collage TOML files. Entries referencing unknown releases are flagged missing (and
/// kept); description_meta is rewritten to the release's current virtual dirname.
pub fn update_cache_for_collages(c: &Config, collage_names: Option<Vec<String>>, force: bool) -> Result<()> {
    let collages_dir = c.music_source_dir.join("!collages");
    if !collages_dir.is_dir() {
        return Ok(());
    }
    let conn = connect(c)?;
    for entry in fs::read_dir(&collages_dir)? {
        let entry = entry?;
        let path = entry.path();
        if path.extension().and_then(|e| e.to_str()) != Some("toml") {
            continue;
        }
        let Some(name) = path.file_stem().and_then(|s| s.to_str()).map(String::from) else {
            continue;
        };
        if let Some(names) = &collage_names {
            if !names.contains(&name) {
                continue;
            }
        }

        let source_mtime = mtime_str(&path)?;
        if !force {
            let cached_mtime: Option<String> = conn
                .query_row("SELECT source_mtime FROM collages WHERE name = ?1", params![name], |row| row.get(0))
                .optional()?;
            if cached_mtime.as_deref() == Some(source_mtime.as_str()) {
                debug!("collage {name} is up to date, skipping");
                continue;
            }
        }

        let mut data = read_collage_file(&path)?;

        let mut changed = false;
        for entry in &mut data.releases {
            let virtual_dirname: Option<String> = conn
                .query_row("SELECT virtual_dirname FROM releases WHERE id = ?1", params![entry.uuid], |row| row.get(0))
                .optional()?;
            match virtual_dirname {
                Some(dirname) => {
                    if entry.missing.is_some() {
                        entry.missing = None;
                        changed = true;
                    }
                    if entry.description_meta != dirname {
                        entry.description_meta = dirname;
                        changed = true;
                    }
                }
                None => {
                    if entry.missing != Some(true) {
                        entry.missing = Some(true);
                        changed = true;
                    }
                }
            }
        }

        let source_mtime = if changed {
            write_collage_file(&path, &data)?;
            info!("updated collage file {name} during cache refresh");
            mtime_str(&path)?
        } else {
            source_mtime
        };

        conn.execute(
            "INSERT INTO collages (name, source_mtime) VALUES (?1, ?2)
             ON CONFLICT (name) DO UPDATE SET source_mtime = excluded.source_mtime",
            params![name, source_mtime],
        )?;
        conn.execute("DELETE FROM collages_releases WHERE collage_name = ?1", params![name])?;
        for (position, entry) in data.releases.iter().enumerate() {
            conn.execute(
                "INSERT INTO collages_releases (collage_name, release_id, position, missing)
                 VALUES (?1, ?2, ?3, ?4)",
                params![name, entry.uuid, position as i64 + 1, entry.missing == Some(true)],
            )?;
        }
        info!("updated cache for collage {name}");
    }
    Ok(())
}

pub fn update_cache_evict_nonexistent_collages(c: &Config) -> Result<()> {
    debug!("evicting cached collages that are not on disk");
    let collages_dir = c.music_source_dir.join("!collages");
    let mut names: Vec<String> = Vec::new();
    if collages_dir.is_dir() {
        for entry in fs::read_dir(&collages_dir)? {
            let path = entry?.path();
            if path.extension().and_then(|e| e.to_str()) == Some("toml") {
                if let Some(stem) = path.file_stem().and_then(|s| s.to_str()) {
                    names.push(stem.to_string());
                }
            }
        }
    }
    let conn = connect(c)?;
    let sql = if names.is_empty() {
        "DELETE FROM collages RETURNING name".to_string()
    } else {
        format!("DELETE FROM collages WHERE name NOT IN ({}) RETURNING name", vec!["?"; names.len()].join(","))
    };
    let mut stmt = conn.prepare(&sql)?;
    let params_vec: Vec<&dyn rusqlite::ToSql> = names.iter().map(|n| n as &dyn rusqlite::ToSql).collect();
    let mut rows = stmt.query(&params_vec[..])?;
    while let Some(row) = rows.next()? {
        let name: String = row.get(0)?;
        info!("evicted missing collage {name} from cache");
    }
    Ok(())
}

/// Re-index playlist TOML files. Symmetric to collage indexing, over tracks; additionally
/// discovers the playlist's cover image.
pub fn update_cache_for_playlists(c: &Config, playlist_names: Option<Vec<String>>, force: bool) -> Result<()> {
    let playlists_dir = c.music_source_dir.join("!playlists");
    if !playlists_dir.is_dir() {
        return Ok(());
    }
    let conn = connect(c)?;
    for entry in fs::read_dir(&playlists_dir)? {
        let entry = entry?;
        let path = entry.path();
        if path.extension().and_then(|e| e.to_str()) != Some("toml") {
            continue;
        }
        let Some(name) = path.file_stem().and_then(|s| s.to_str()).map(String::from) else {
            continue;
        };
        if let Some(names) = &playlist_names {
            if !names.contains(&name) {
                continue;
            }
        }

        let cover_path = c.valid_art_exts.iter().map(|ext| playlists_dir.join(format!("{name}.{ext}"))).find(|p| p.is_file());

        let source_mtime = mtime_str(&path)?;
        if !force {
            let cached: Option<(String, Option<String>)> = conn
                .query_row("SELECT source_mtime, cover_path FROM playlists WHERE name = ?1", params![name], |row| {
                    Ok((row.get(0)?, row.get(1)?))
                })
                .optional()?;
            if let Some((cached_mtime, cached_cover)) = cached {
                if cached_mtime == source_mtime
                    && cached_cover == cover_path.as_ref().map(|p| p.to_string_lossy().to_string())
                {
                    debug!("playlist {name} is up to date, skipping");
                    continue;
                }
            }
        }

        let mut data = read_playlist_file(&path)?;

        let mut changed = false;
        for entry in &mut data.tracks {
            let virtual_filename: Option<String> = conn
                .query_row("SELECT virtual_filename FROM tracks WHERE id = ?1", params![entry.uuid], |row| row.get(0))
                .optional()?;
            match virtual_filename {
                Some(filename) => {
                    if entry.missing.is_some() {
                        entry.missing = None;
                        changed = true;
                    }
                    if entry.description_meta != filename {
                        entry.description_meta = filename;
                        changed = true;
                    }
                }
                None => {
                    if entry.missing != Some(true) {
                        entry.missing = Some(true);
                        changed = true;
                    }
                }
            }
        }

        let source_mtime = if changed {
            write_playlist_file(&path, &data)?;
            info!("updated playlist file {name} during cache refresh");
            mtime_str(&path)?
        } else {
            source_mtime
        };

        conn.execute(
            "INSERT INTO playlists (name, source_mtime, cover_path) VALUES (?1, ?2, ?3)
             ON CONFLICT (name) DO UPDATE SET source_mtime = excluded.source_mtime, cover_path = excluded.cover_path",
            params![name, source_mtime, cover_path.as_ref().map(|p| p.to_string_lossy().to_string())],
        )?;
        conn.execute("DELETE FROM playlists_tracks WHERE playlist_name = ?1", params![name])?;
        for (position, entry) in data.tracks.iter().enumerate() {
            conn.execute(
                "INSERT INTO playlists_tracks (playlist_name, track_id, position, missing)
                 VALUES (?1, ?2, ?3, ?4)",
                params![name, entry.uuid, position as i64 + 1, entry.missing == Some(true)],
            )?;
        }
        info!("updated cache for playlist {name}");
    }
    Ok(())
}

pub fn update_cache_evict_nonexistent_playlists(c: &Config) -> Result<()> {
    debug!("evicting cached playlists that are not on disk");
    let playlists_dir = c.music_source_dir.join("!playlists");
    let mut names: Vec<String> = Vec::new();
    if playlists_dir.is_dir() {
        for entry in fs::read_dir(&playlists_dir)? {
            let path = entry?.path();
            if path.extension().and_then(|e| e.to_str()) == Some("toml") {
                if let Some(stem) = path.file_stem().and_then(|s| s.to_str()) {
                    names.push(stem.to_string());
                }
            }
        }
    }
    let conn = connect(c)?;
    let sql = if names.is_empty() {
        "DELETE FROM playlists RETURNING name".to_string()
    } else {
        format!("DELETE FROM playlists WHERE name NOT IN ({}) RETURNING name", vec!["?"; names.len()].join(","))
    };
    let mut stmt = conn.prepare(&sql)?;
    let params_vec: Vec<&dyn rusqlite::ToSql> = names.iter().map(|n| n as &dyn rusqlite::ToSql).collect();
    let mut rows = stmt.query(&params_vec[..])?;
    while let Some(row) = rows.next()? {
        let name: String = row.get(0)?;
        info!("evicted missing playlist {name} from cache");
    }
    Ok(())
}

