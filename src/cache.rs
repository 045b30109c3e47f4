/// The cache module encapsulates the read cache and exposes handles for working with the read
/// cache. It also exposes a locking mechanism that uses the read cache for synchronization.
///
/// The SQLite database is considered part of the cache, and so this module encapsulates the
/// SQLite database too. Though we cheap out a bit, so all the tests freely read from the SQLite
/// database. No budget!
///
/// The read cache is not source-of-truth for any of its own data: the audio tags, sidecars, and
/// collage/playlist files are. A stale or broken cache heals on the next scan.
use std::collections::HashMap;
use std::fs;
use std::path::PathBuf;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use rusqlite::{params, Connection, OptionalExtension};
use serde::Serialize;
use sha2::{Digest, Sha256};
use tracing::{debug, info};

use crate::common::VERSION;
use crate::config::Config;
use crate::errors::{Result, RoseError, RoseExpectedError};

pub static CACHE_SCHEMA: &str = include_str!("cache.sql");

pub fn connect(c: &Config) -> Result<Connection> {
    let conn = Connection::open(c.cache_database_path())?;
    conn.busy_timeout(Duration::from_secs(15))?;
    conn.pragma_update(None, "foreign_keys", "ON")?;
    conn.pragma_update(None, "journal_mode", "WAL")?;
    Ok(conn)
}

/// "Migrate" the database. If the schema, config hash, or version in the database does not match
/// the current ones, nuke the database and recreate it from scratch. Otherwise, no op.
///
/// We can do this because the database is just a read cache.
pub fn migrate_database(c: &Config) -> Result<()> {
    let mut hasher = Sha256::new();
    hasher.update(CACHE_SCHEMA.as_bytes());
    let schema_hash = format!("{:x}", hasher.finalize());
    let config_hash = c.hash_for_cache();

    fs::create_dir_all(&c.cache_dir)?;
    {
        let conn = connect(c)?;
        let has_schema_table: bool = conn.query_row(
            "SELECT EXISTS(SELECT * FROM sqlite_master WHERE type = 'table' AND name = '_schema_hash')",
            [],
            |row| row.get(0),
        )?;
        if has_schema_table {
            let row: Option<(String, String, String)> = conn
                .query_row("SELECT schema_hash, config_hash, version FROM _schema_hash", [], |row| {
                    Ok((row.get(0)?, row.get(1)?, row.get(2)?))
                })
                .optional()?;
            if let Some((db_schema_hash, db_config_hash, db_version)) = row {
                if db_schema_hash == schema_hash && db_config_hash == config_hash && db_version == VERSION {
                    return Ok(());
                }
            }
        }
    }

    info!("cache schema/config changed: recreating the cache database");
    if c.cache_database_path().exists() {
        fs::remove_file(c.cache_database_path()).map_err(|e| {
            RoseError::SchemaMismatch(format!("failed to remove stale cache database: {e}"))
        })?;
    }
    let conn = connect(c)?;
    conn.execute_batch(CACHE_SCHEMA)?;
    conn.execute_batch(
        "CREATE TABLE _schema_hash (
            schema_hash TEXT
          , config_hash TEXT
          , version TEXT
          , PRIMARY KEY (schema_hash, config_hash, version)
        )",
    )?;
    conn.execute(
        "INSERT INTO _schema_hash (schema_hash, config_hash, version) VALUES (?1, ?2, ?3)",
        params![schema_hash, config_hash, VERSION],
    )?;
    Ok(())
}

/// Transform a string into single-character tokens separated by spaces, so that FTS5 MATCH
/// behaves as a substring search.
pub fn process_string_for_fts(x: &str) -> String {
    let mut out = String::with_capacity(x.len() * 2);
    for (i, ch) in x.chars().enumerate() {
        if i > 0 {
            out.push(' ');
        }
        out.push(ch);
    }
    out
}

pub fn release_lock_name(release_id: &str) -> String {
    format!("release:{release_id}")
}

pub fn collage_lock_name(collage_name: &str) -> String {
    format!("collage:{collage_name}")
}

pub fn playlist_lock_name(playlist_name: &str) -> String {
    format!("playlist:{playlist_name}")
}

/// An advisory lock held in the `locks` table. Dropping the guard releases the lock; the
/// valid_until lease bounds the damage of a crashed holder.
pub struct Lock {
    db_path: PathBuf,
    name: String,
}

impl Drop for Lock {
    fn drop(&mut self) {
        debug!("releasing lock {}", self.name);
        if let Ok(conn) = Connection::open(&self.db_path) {
            let _ = conn.execute("DELETE FROM locks WHERE name = ?1", params![self.name]);
        }
    }
}

/// Acquire a named lock, polling for up to `timeout` seconds before surfacing LockTimeout. The
/// inserted lease also expires after `timeout` seconds, so a crashed holder cannot wedge the
/// library forever.
pub fn lock(c: &Config, name: &str, timeout: f64) -> Result<Lock> {
    let deadline = now_ts() + timeout;
    let conn = connect(c)?;
    loop {
        let max_valid_until: Option<f64> = conn
            .query_row("SELECT MAX(valid_until) FROM locks WHERE name = ?1", params![name], |row| row.get(0))
            .optional()?
            .flatten();

        let now = now_ts();
        if let Some(valid_until) = max_valid_until {
            if valid_until > now {
                if now >= deadline {
                    return Err(RoseExpectedError::LockTimeout { name: name.to_string(), timeout }.into());
                }
                let sleep = (valid_until - now).min(deadline - now).clamp(0.005, 0.2);
                debug!("failed to acquire lock for {name}: sleeping for {sleep}");
                std::thread::sleep(Duration::from_secs_f64(sleep));
                continue;
            }
            // Expired lease left behind by a dead holder.
            conn.execute("DELETE FROM locks WHERE name = ?1 AND valid_until <= ?2", params![name, now])?;
        }

        debug!("attempting to acquire lock for {name} with timeout {timeout}");
        let valid_until = now + timeout;
        match conn.execute("INSERT INTO locks (name, valid_until) VALUES (?1, ?2)", params![name, valid_until]) {
            Ok(_) => {
                debug!("successfully acquired lock for {name} until {valid_until}");
                return Ok(Lock { db_path: c.cache_database_path(), name: name.to_string() });
            }
            Err(rusqlite::Error::SqliteFailure(err, _)) if err.code == rusqlite::ErrorCode::ConstraintViolation => {
                if now_ts() >= deadline {
                    return Err(RoseExpectedError::LockTimeout { name: name.to_string(), timeout }.into());
                }
                debug!("failed to acquire lock for {name}, trying again");
                continue;
            }
            Err(e) => return Err(e.into()),
        }
    }
}

fn now_ts() -> f64 {
    SystemTime::now().duration_since(UNIX_EPOCH).unwrap_or_default().as_secs_f64()
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CachedArtist {
    pub name: String,
    pub role: String,
    pub alias: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CachedRelease {
    pub id: String,
    pub source_path: PathBuf,
    pub cover_image_path: Option<PathBuf>,
    pub added_at: String,
    pub datafile_mtime: String,
    pub virtual_dirname: String,
    pub title: String,
    pub release_type: String,
    pub release_year: Option<i32>,
    pub multidisc: bool,
    pub new: bool,
    pub genres: Vec<String>,
    pub labels: Vec<String>,
    pub artists: Vec<CachedArtist>,
    pub formatted_artists: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CachedTrack {
    pub id: String,
    pub source_path: PathBuf,
    pub source_mtime: String,
    pub virtual_filename: String,
    pub title: String,
    pub release_id: String,
    pub track_number: String,
    pub disc_number: String,
    pub formatted_release_position: String,
    pub duration_seconds: i32,
    pub artists: Vec<CachedArtist>,
    pub formatted_artists: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CachedCollage {
    pub name: String,
    pub source_mtime: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CachedPlaylist {
    pub name: String,
    pub source_mtime: String,
    pub cover_path: Option<PathBuf>,
    pub track_ids: Vec<String>,
}

fn release_from_row(row: &rusqlite::Row) -> rusqlite::Result<CachedRelease> {
    Ok(CachedRelease {
        id: row.get("id")?,
        source_path: PathBuf::from(row.get::<_, String>("source_path")?),
        cover_image_path: row.get::<_, Option<String>>("cover_image_path")?.map(PathBuf::from),
        added_at: row.get("added_at")?,
        datafile_mtime: row.get("datafile_mtime")?,
        virtual_dirname: row.get("virtual_dirname")?,
        title: row.get("title")?,
        release_type: row.get("release_type")?,
        release_year: row.get("release_year")?,
        multidisc: row.get("multidisc")?,
        new: row.get("new")?,
        genres: Vec::new(),
        labels: Vec::new(),
        artists: Vec::new(),
        formatted_artists: row.get("formatted_artists")?,
    })
}

fn track_from_row(row: &rusqlite::Row) -> rusqlite::Result<CachedTrack> {
    Ok(CachedTrack {
        id: row.get("id")?,
        source_path: PathBuf::from(row.get::<_, String>("source_path")?),
        source_mtime: row.get("source_mtime")?,
        virtual_filename: row.get("virtual_filename")?,
        title: row.get("title")?,
        release_id: row.get("release_id")?,
        track_number: row.get("track_number")?,
        disc_number: row.get("disc_number")?,
        formatted_release_position: row.get("formatted_release_position")?,
        duration_seconds: row.get("duration_seconds")?,
        artists: Vec::new(),
        formatted_artists: row.get("formatted_artists")?,
    })
}

/// Attach genres, labels, and artists to a batch of releases with three grouped queries.
fn hydrate_releases(conn: &Connection, releases: &mut [CachedRelease]) -> Result<()> {
    if releases.is_empty() {
        return Ok(());
    }
    let ids: Vec<String> = releases.iter().map(|r| r.id.clone()).collect();
    let placeholders = vec!["?"; ids.len()].join(",");
    let by_id: HashMap<String, usize> = releases.iter().enumerate().map(|(i, r)| (r.id.clone(), i)).collect();
    let params_vec: Vec<&dyn rusqlite::ToSql> = ids.iter().map(|s| s as &dyn rusqlite::ToSql).collect();

    let mut stmt = conn.prepare(&format!(
        "SELECT release_id, genre FROM releases_genres WHERE release_id IN ({placeholders}) ORDER BY genre"
    ))?;
    let mut rows = stmt.query(&params_vec[..])?;
    while let Some(row) = rows.next()? {
        let rid: String = row.get(0)?;
        if let Some(&i) = by_id.get(&rid) {
            releases[i].genres.push(row.get(1)?);
        }
    }

    let mut stmt = conn.prepare(&format!(
        "SELECT release_id, label FROM releases_labels WHERE release_id IN ({placeholders}) ORDER BY label"
    ))?;
    let mut rows = stmt.query(&params_vec[..])?;
    while let Some(row) = rows.next()? {
        let rid: String = row.get(0)?;
        if let Some(&i) = by_id.get(&rid) {
            releases[i].labels.push(row.get(1)?);
        }
    }

    let mut stmt = conn.prepare(&format!(
        "SELECT release_id, artist, role, alias FROM releases_artists WHERE release_id IN ({placeholders}) ORDER BY artist, role"
    ))?;
    let mut rows = stmt.query(&params_vec[..])?;
    while let Some(row) = rows.next()? {
        let rid: String = row.get(0)?;
        if let Some(&i) = by_id.get(&rid) {
            releases[i].artists.push(CachedArtist { name: row.get(1)?, role: row.get(2)?, alias: row.get(3)? });
        }
    }
    Ok(())
}

fn hydrate_tracks(conn: &Connection, tracks: &mut [CachedTrack]) -> Result<()> {
    if tracks.is_empty() {
        return Ok(());
    }
    let ids: Vec<String> = tracks.iter().map(|t| t.id.clone()).collect();
    let placeholders = vec!["?"; ids.len()].join(",");
    let by_id: HashMap<String, usize> = tracks.iter().enumerate().map(|(i, t)| (t.id.clone(), i)).collect();
    let params_vec: Vec<&dyn rusqlite::ToSql> = ids.iter().map(|s| s as &dyn rusqlite::ToSql).collect();

    let mut stmt = conn.prepare(&format!(
        "SELECT track_id, artist, role, alias FROM tracks_artists WHERE track_id IN ({placeholders}) ORDER BY artist, role"
    ))?;
    let mut rows = stmt.query(&params_vec[..])?;
    while let Some(row) = rows.next()? {
        let tid: String = row.get(0)?;
        if let Some(&i) = by_id.get(&tid) {
            tracks[i].artists.push(CachedArtist { name: row.get(1)?, role: row.get(2)?, alias: row.get(3)? });
        }
    }
    Ok(())
}

pub fn list_releases(
    c: &Config,
    sanitized_artist_filter: Option<&str>,
    sanitized_genre_filter: Option<&str>,
    sanitized_label_filter: Option<&str>,
    new_filter: Option<bool>,
) -> Result<Vec<CachedRelease>> {
    let conn = connect(c)?;
    let mut query = String::from("SELECT * FROM releases WHERE 1=1");
    let mut args: Vec<Box<dyn rusqlite::ToSql>> = Vec::new();
    if let Some(artist) = sanitized_artist_filter {
        query.push_str(
            " AND EXISTS (SELECT * FROM releases_artists ra WHERE ra.release_id = releases.id AND ra.artist_sanitized = ?)",
        );
        args.push(Box::new(artist.to_string()));
    }
    if let Some(genre) = sanitized_genre_filter {
        query.push_str(
            " AND EXISTS (SELECT * FROM releases_genres rg WHERE rg.release_id = releases.id AND rg.genre_sanitized = ?)",
        );
        args.push(Box::new(genre.to_string()));
    }
    if let Some(label) = sanitized_label_filter {
        query.push_str(
            " AND EXISTS (SELECT * FROM releases_labels rl WHERE rl.release_id = releases.id AND rl.label_sanitized = ?)",
        );
        args.push(Box::new(label.to_string()));
    }
    if let Some(new) = new_filter {
        query.push_str(" AND new = ?");
        args.push(Box::new(new));
    }
    query.push_str(" ORDER BY source_path");

    let mut stmt = conn.prepare(&query)?;
    let params_vec: Vec<&dyn rusqlite::ToSql> = args.iter().map(|a| a.as_ref()).collect();
    let mut releases: Vec<CachedRelease> = stmt
        .query_map(&params_vec[..], release_from_row)?
        .collect::<rusqlite::Result<_>>()?;
    hydrate_releases(&conn, &mut releases)?;
    Ok(releases)
}

/// Fetch one release and its tracks, by ID or by virtual dirname.
pub fn get_release(c: &Config, release_id_or_virtual_dirname: &str) -> Result<Option<(CachedRelease, Vec<CachedTrack>)>> {
    let conn = connect(c)?;
    let mut stmt = conn.prepare("SELECT * FROM releases WHERE id = ?1 OR virtual_dirname = ?1")?;
    let release = stmt.query_row(params![release_id_or_virtual_dirname], release_from_row).optional()?;
    let Some(release) = release else {
        return Ok(None);
    };
    let mut releases = vec![release];
    hydrate_releases(&conn, &mut releases)?;
    let release = releases.pop().unwrap_or_else(|| unreachable!());

    let mut stmt =
        conn.prepare("SELECT * FROM tracks WHERE release_id = ?1 ORDER BY disc_number, track_number")?;
    let mut tracks: Vec<CachedTrack> =
        stmt.query_map(params![release.id], track_from_row)?.collect::<rusqlite::Result<_>>()?;
    hydrate_tracks(&conn, &mut tracks)?;
    Ok(Some((release, tracks)))
}

pub fn get_track(c: &Config, track_id: &str) -> Result<Option<CachedTrack>> {
    let conn = connect(c)?;
    let mut stmt = conn.prepare("SELECT * FROM tracks WHERE id = ?1")?;
    let track = stmt.query_row(params![track_id], track_from_row).optional()?;
    let Some(track) = track else {
        return Ok(None);
    };
    let mut tracks = vec![track];
    hydrate_tracks(&conn, &mut tracks)?;
    Ok(tracks.pop())
}

pub fn get_release_id_from_virtual_dirname(c: &Config, dirname: &str) -> Result<Option<String>> {
    let conn = connect(c)?;
    Ok(conn
        .query_row("SELECT id FROM releases WHERE virtual_dirname = ?1", params![dirname], |row| row.get(0))
        .optional()?)
}

pub fn get_release_virtual_dirname_from_id(c: &Config, release_id: &str) -> Result<Option<String>> {
    let conn = connect(c)?;
    Ok(conn
        .query_row("SELECT virtual_dirname FROM releases WHERE id = ?1", params![release_id], |row| row.get(0))
        .optional()?)
}

pub fn get_release_source_path_from_id(c: &Config, release_id: &str) -> Result<Option<PathBuf>> {
    let conn = connect(c)?;
    Ok(conn
        .query_row("SELECT source_path FROM releases WHERE id = ?1", params![release_id], |row| {
            row.get::<_, String>(0)
        })
        .optional()?
        .map(PathBuf::from))
}

pub fn get_track_filename(c: &Config, track_id: &str) -> Result<Option<String>> {
    let conn = connect(c)?;
    Ok(conn
        .query_row("SELECT virtual_filename FROM tracks WHERE id = ?1", params![track_id], |row| row.get(0))
        .optional()?)
}

/// (artist, artist_sanitized) pairs across all releases.
pub fn list_artists(c: &Config) -> Result<Vec<(String, String)>> {
    let conn = connect(c)?;
    let mut stmt = conn.prepare("SELECT DISTINCT artist, artist_sanitized FROM releases_artists")?;
    let rows = stmt.query_map([], |row| Ok((row.get(0)?, row.get(1)?)))?;
    Ok(rows.collect::<rusqlite::Result<_>>()?)
}

pub fn list_genres(c: &Config) -> Result<Vec<(String, String)>> {
    let conn = connect(c)?;
    let mut stmt = conn.prepare("SELECT DISTINCT genre, genre_sanitized FROM releases_genres")?;
    let rows = stmt.query_map([], |row| Ok((row.get(0)?, row.get(1)?)))?;
    Ok(rows.collect::<rusqlite::Result<_>>()?)
}

pub fn list_labels(c: &Config) -> Result<Vec<(String, String)>> {
    let conn = connect(c)?;
    let mut stmt = conn.prepare("SELECT DISTINCT label, label_sanitized FROM releases_labels")?;
    let rows = stmt.query_map([], |row| Ok((row.get(0)?, row.get(1)?)))?;
    Ok(rows.collect::<rusqlite::Result<_>>()?)
}

pub fn list_collages(c: &Config) -> Result<Vec<String>> {
    let conn = connect(c)?;
    let mut stmt = conn.prepare("SELECT name FROM collages ORDER BY name")?;
    let rows = stmt.query_map([], |row| row.get(0))?;
    Ok(rows.collect::<rusqlite::Result<_>>()?)
}

/// The non-missing releases of a collage, hydrated, in position order.
pub fn list_collage_releases(c: &Config, collage_name: &str) -> Result<Vec<(i64, CachedRelease)>> {
    let conn = connect(c)?;
    let mut stmt = conn.prepare(
        "SELECT cr.position AS position, r.*
         FROM collages_releases cr
         JOIN releases r ON r.id = cr.release_id
         WHERE cr.collage_name = ?1 AND NOT cr.missing
         ORDER BY cr.position",
    )?;
    let mut entries: Vec<(i64, CachedRelease)> = stmt
        .query_map(params![collage_name], |row| Ok((row.get::<_, i64>("position")?, release_from_row(row)?)))?
        .collect::<rusqlite::Result<_>>()?;
    let mut releases: Vec<CachedRelease> = entries.iter().map(|(_, r)| r.clone()).collect();
    hydrate_releases(&conn, &mut releases)?;
    for (entry, release) in entries.iter_mut().zip(releases) {
        entry.1 = release;
    }
    Ok(entries)
}

pub fn list_playlists(c: &Config) -> Result<Vec<String>> {
    let conn = connect(c)?;
    let mut stmt = conn.prepare("SELECT name FROM playlists ORDER BY name")?;
    let rows = stmt.query_map([], |row| row.get(0))?;
    Ok(rows.collect::<rusqlite::Result<_>>()?)
}

/// A playlist plus its non-missing tracks, hydrated, in position order.
pub fn get_playlist(c: &Config, playlist_name: &str) -> Result<Option<(CachedPlaylist, Vec<CachedTrack>)>> {
    let conn = connect(c)?;
    let playlist = conn
        .query_row("SELECT name, source_mtime, cover_path FROM playlists WHERE name = ?1", params![playlist_name], |row| {
            Ok(CachedPlaylist {
                name: row.get(0)?,
                source_mtime: row.get(1)?,
                cover_path: row.get::<_, Option<String>>(2)?.map(PathBuf::from),
                track_ids: Vec::new(),
            })
        })
        .optional()?;
    let Some(mut playlist) = playlist else {
        return Ok(None);
    };

    let mut stmt = conn.prepare(
        "SELECT t.*
         FROM playlists_tracks pt
         JOIN tracks t ON t.id = pt.track_id
         WHERE pt.playlist_name = ?1 AND NOT pt.missing
         ORDER BY pt.position",
    )?;
    let mut tracks: Vec<CachedTrack> =
        stmt.query_map(params![playlist_name], track_from_row)?.collect::<rusqlite::Result<_>>()?;
    hydrate_tracks(&conn, &mut tracks)?;
    playlist.track_ids = tracks.iter().map(|t| t.id.clone()).collect();
    Ok(Some((playlist, tracks)))
}

/// Existence probes. The release/track/cover variants return the source path, which the VFS
/// uses to stat and open the underlying file.
pub fn release_exists(c: &Config, virtual_dirname: &str) -> Result<Option<PathBuf>> {
    let conn = connect(c)?;
    Ok(conn
        .query_row("SELECT source_path FROM releases WHERE virtual_dirname = ?1", params![virtual_dirname], |row| {
            row.get::<_, String>(0)
        })
        .optional()?
        .map(PathBuf::from))
}

pub fn track_exists(c: &Config, release_virtual_dirname: &str, virtual_filename: &str) -> Result<Option<PathBuf>> {
    let conn = connect(c)?;
    Ok(conn
        .query_row(
            "SELECT t.source_path
             FROM tracks t
             JOIN releases r ON r.id = t.release_id
             WHERE r.virtual_dirname = ?1 AND t.virtual_filename = ?2",
            params![release_virtual_dirname, virtual_filename],
            |row| row.get::<_, String>(0),
        )
        .optional()?
        .map(PathBuf::from))
}

pub fn cover_exists(c: &Config, release_virtual_dirname: &str, filename: &str) -> Result<Option<PathBuf>> {
    let conn = connect(c)?;
    let cover: Option<String> = conn
        .query_row(
            "SELECT cover_image_path FROM releases WHERE virtual_dirname = ?1 AND cover_image_path IS NOT NULL",
            params![release_virtual_dirname],
            |row| row.get(0),
        )
        .optional()?;
    match cover {
        Some(cover) => {
            let cover = PathBuf::from(cover);
            if cover.file_name().and_then(|n| n.to_str()) == Some(filename) {
                Ok(Some(cover))
            } else {
                Ok(None)
            }
        }
        None => Ok(None),
    }
}

pub fn artist_exists(c: &Config, artist_sanitized: &str) -> Result<bool> {
    let conn = connect(c)?;
    Ok(conn.query_row(
        "SELECT EXISTS(SELECT * FROM releases_artists WHERE artist_sanitized = ?1)",
        params![artist_sanitized],
        |row| row.get(0),
    )?)
}

pub fn genre_exists(c: &Config, genre_sanitized: &str) -> Result<bool> {
    let conn = connect(c)?;
    Ok(conn.query_row(
        "SELECT EXISTS(SELECT * FROM releases_genres WHERE genre_sanitized = ?1)",
        params![genre_sanitized],
        |row| row.get(0),
    )?)
}

pub fn label_exists(c: &Config, label_sanitized: &str) -> Result<bool> {
    let conn = connect(c)?;
    Ok(conn.query_row(
        "SELECT EXISTS(SELECT * FROM releases_labels WHERE label_sanitized = ?1)",
        params![label_sanitized],
        |row| row.get(0),
    )?)
}

pub fn collage_exists(c: &Config, name: &str) -> Result<bool> {
    let conn = connect(c)?;
    Ok(conn.query_row("SELECT EXISTS(SELECT * FROM collages WHERE name = ?1)", params![name], |row| row.get(0))?)
}

pub fn playlist_exists(c: &Config, name: &str) -> Result<bool> {
    let conn = connect(c)?;
    Ok(conn.query_row("SELECT EXISTS(SELECT * FROM playlists WHERE name = ?1)", params![name], |row| row.get(0))?)
}
