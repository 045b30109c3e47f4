/// The vfs module implements the virtual filesystem's logical core: it translates filesystem
/// operations into cache queries and library mutations.
///
/// The filesystem surface is the `VirtualFilesystem` trait; bind it to whatever native
/// filesystem library the host uses. Everything interesting lives in `RoseVfs`:
///
/// - A short-TTL getattr cache, because getattr is called for every node `ls` prints. It is
///   invalidated on every mutating syscall.
/// - Ghost files and directories. Standard tools follow a create or mkdir with metadata
///   syscalls on the new path; the library mutation has already consumed the event, so we
///   pretend the path exists for a short TTL.
/// - File-creation special operations. The intent of `open(O_CREAT)` + writes + `release` can
///   only be decided at release time, from the accumulated bytes: adding a track to a playlist
///   and replacing cover art both work this way.
/// - Rose-owned file handles, distinct from host OS handles, with a reserved write-sink
///   sentinel.
use std::collections::HashMap;
use std::fs;
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::process::Command;
use std::sync::Mutex;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use tracing::{debug, warn};

use crate::audiotags::{is_supported_audio_path, AudioTags};
use crate::cache::{
    artist_exists, collage_exists, cover_exists, genre_exists, get_playlist, label_exists, list_artists,
    list_collage_releases, list_collages, list_genres, list_labels, list_playlists, list_releases, playlist_exists,
    release_exists, track_exists, CachedTrack,
};
use crate::cache_update::update_cache_for_releases;
use crate::collages::{add_release_to_collage, create_collage, delete_collage, rename_collage};
use crate::config::Config;
use crate::errors::{Result, RoseError, RoseExpectedError};
use crate::playlists::{
    add_track_to_playlist, create_playlist, delete_playlist, remove_playlist_cover_art, remove_track_from_playlist,
    rename_playlist, set_playlist_cover_art,
};
use crate::releases::{delete_release, remove_release_cover_art, set_release_cover_art, toggle_release_new};
use crate::virtual_path::{format_position, parse_virtual_path, ParsedPath, View, TOP_LEVEL_VIEWS};

/// An errno to hand back to the kernel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Errno(pub i32);

pub const ENOENT: Errno = Errno(libc::ENOENT);
pub const EACCES: Errno = Errno(libc::EACCES);
pub const EBADF: Errno = Errno(libc::EBADF);
pub const EIO: Errno = Errno(libc::EIO);

pub type FsResult<T> = std::result::Result<T, Errno>;

fn to_errno(e: RoseError) -> Errno {
    match &e {
        RoseError::Expected(expected) => match expected {
            RoseExpectedError::ReleaseDoesNotExist { .. }
            | RoseExpectedError::TrackDoesNotExist { .. }
            | RoseExpectedError::CollageDoesNotExist { .. }
            | RoseExpectedError::PlaylistDoesNotExist { .. }
            | RoseExpectedError::FileNotFound { .. } => ENOENT,
            RoseExpectedError::InvalidCoverArtFile { .. }
            | RoseExpectedError::CollageAlreadyExists { .. }
            | RoseExpectedError::PlaylistAlreadyExists { .. } => EACCES,
            RoseExpectedError::UnknownFileHandle { .. } => EBADF,
            _ => EIO,
        },
        _ => {
            warn!("translating internal error to EIO: {e}");
            EIO
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileKind {
    Directory,
    File,
}

#[derive(Debug, Clone, PartialEq)]
pub struct FileStat {
    pub kind: FileKind,
    pub mode: u32,
    pub nlink: u32,
    pub size: u64,
    pub uid: u32,
    pub gid: u32,
    pub atime: f64,
    pub mtime: f64,
    pub ctime: f64,
}

fn mkstat(kind: FileKind, file: Option<&Path>) -> FileStat {
    let mut size = 4096;
    let mut atime = 0.0;
    let mut mtime = 0.0;
    let mut ctime = 0.0;
    if let Some(file) = file {
        if let Ok(meta) = fs::metadata(file) {
            size = meta.len();
            let to_secs = |t: std::io::Result<SystemTime>| {
                t.ok().and_then(|t| t.duration_since(UNIX_EPOCH).ok()).map(|d| d.as_secs_f64()).unwrap_or(0.0)
            };
            atime = to_secs(meta.accessed());
            mtime = to_secs(meta.modified());
            ctime = to_secs(meta.created());
        }
    }
    FileStat {
        kind,
        mode: if kind == FileKind::Directory { 0o555 } else { 0o444 },
        nlink: 4,
        size,
        uid: unsafe { libc::getuid() },
        gid: unsafe { libc::getgid() },
        atime,
        mtime,
        ctime,
    }
}

fn mkstat_ghost_file(size: u64) -> FileStat {
    FileStat {
        kind: FileKind::File,
        mode: 0o644,
        nlink: 1,
        size,
        uid: unsafe { libc::getuid() },
        gid: unsafe { libc::getgid() },
        atime: 0.0,
        mtime: 0.0,
        ctime: 0.0,
    }
}

fn mkstat_ghost_dir() -> FileStat {
    FileStat {
        kind: FileKind::Directory,
        mode: 0o755,
        nlink: 2,
        size: 4096,
        uid: unsafe { libc::getuid() },
        gid: unsafe { libc::getgid() },
        atime: 0.0,
        mtime: 0.0,
        ctime: 0.0,
    }
}

/// The filesystem-operation surface the kernel binding drives. Paths are absolute virtual
/// paths; handles are Rose-owned integers.
pub trait VirtualFilesystem {
    fn getattr(&self, path: &str) -> FsResult<FileStat>;
    fn readdir(&self, path: &str) -> FsResult<Vec<String>>;
    fn open(&self, path: &str, flags: i32) -> FsResult<u64>;
    fn create(&self, path: &str, flags: i32) -> FsResult<u64>;
    fn read(&self, fh: u64, offset: u64, size: u32) -> FsResult<Vec<u8>>;
    fn write(&self, fh: u64, offset: u64, data: &[u8]) -> FsResult<u32>;
    fn release(&self, fh: u64) -> FsResult<()>;
    fn unlink(&self, path: &str) -> FsResult<()>;
    fn mkdir(&self, path: &str) -> FsResult<()>;
    fn rmdir(&self, path: &str) -> FsResult<()>;
    fn rename(&self, old_path: &str, new_path: &str) -> FsResult<()>;
    fn flush(&self, _fh: u64) -> FsResult<()> {
        Ok(())
    }
    fn releasedir(&self, _path: &str) -> FsResult<()> {
        Ok(())
    }
}

const GETATTR_CACHE_TTL: Duration = Duration::from_secs(1);
const GHOST_FILE_TTL: Duration = Duration::from_secs(2);
const GHOST_DIR_TTL: Duration = Duration::from_secs(5);

/// Rose handles start above any plausible kernel sentinel and wrap well below host handle
/// ranges. Handle 9 is the reserved write-sink.
const WRITE_SINK_FH: u64 = 9;
const FIRST_FH: u64 = 10;
const MAX_FH: u64 = 10_000;

enum FileHandle {
    /// A passthrough to a host file (reads, and writes to existing tracks/covers).
    WrappedHost { file: fs::File, reindex_dir: Option<PathBuf> },
    /// Buffered bytes for an add-track-to-playlist special op.
    PlaylistAddition { path: String, playlist: String, ext: String, buffer: Vec<u8> },
    /// Buffered bytes for a new-cover-art special op.
    NewCover { path: String, target: CoverTarget, ext: String, buffer: Vec<u8> },
}

enum CoverTarget {
    Release(String),
    Playlist(String),
}

#[derive(Default)]
struct VfsState {
    handles: HashMap<u64, FileHandle>,
    next_fh: u64,
    getattr_cache: HashMap<String, (Instant, FileStat)>,
    ghost_files: HashMap<String, (Instant, u64)>,
    ghost_dirs: HashMap<String, Instant>,
}

pub struct RoseVfs {
    config: Config,
    state: Mutex<VfsState>,
}

impl RoseVfs {
    pub fn new(config: Config) -> RoseVfs {
        let mut state = VfsState::default();
        state.next_fh = FIRST_FH;
        RoseVfs { config, state: Mutex::new(state) }
    }

    fn alloc_fh(&self, state: &mut VfsState, handle: FileHandle) -> u64 {
        loop {
            let fh = state.next_fh;
            state.next_fh += 1;
            if state.next_fh >= MAX_FH {
                state.next_fh = FIRST_FH;
            }
            if fh == WRITE_SINK_FH || state.handles.contains_key(&fh) {
                continue;
            }
            state.handles.insert(fh, handle);
            return fh;
        }
    }

    fn invalidate_caches(&self) {
        let mut state = self.state.lock().unwrap();
        state.getattr_cache.clear();
    }

    fn register_ghost_file(&self, path: &str, size: u64) {
        let mut state = self.state.lock().unwrap();
        state.ghost_files.insert(path.to_string(), (Instant::now(), size));
    }

    fn register_ghost_dir(&self, path: &str) {
        let mut state = self.state.lock().unwrap();
        state.ghost_dirs.insert(path.to_string(), Instant::now());
    }

    fn ghost_file_stat(&self, path: &str) -> Option<FileStat> {
        let mut state = self.state.lock().unwrap();
        state.ghost_files.retain(|_, (t, _)| t.elapsed() < GHOST_FILE_TTL);
        state.ghost_files.get(path).map(|(_, size)| mkstat_ghost_file(*size))
    }

    fn ghost_dir_stat(&self, path: &str) -> Option<FileStat> {
        let mut state = self.state.lock().unwrap();
        state.ghost_dirs.retain(|_, t| t.elapsed() < GHOST_DIR_TTL);
        state.ghost_dirs.get(path).map(|_| mkstat_ghost_dir())
    }

    fn is_under_ghost_dir(&self, path: &str) -> bool {
        let mut state = self.state.lock().unwrap();
        state.ghost_dirs.retain(|_, t| t.elapsed() < GHOST_DIR_TTL);
        let parent = match path.rfind('/') {
            Some(idx) => &path[..idx],
            None => return false,
        };
        state.ghost_dirs.contains_key(parent)
    }

    /// Resolve the source path of the track shown at `P/{position}. {filename}`.
    fn playlist_track_path(&self, playlist: &str, position: &str, filename: &str) -> Result<Option<CachedTrack>> {
        let Some((_, tracks)) = get_playlist(&self.config, playlist)? else {
            return Ok(None);
        };
        let idx: usize = match position.parse::<usize>() {
            Ok(i) if i >= 1 => i - 1,
            _ => return Ok(None),
        };
        match tracks.get(idx) {
            Some(t) if t.virtual_filename == filename => Ok(Some(t.clone())),
            _ => Ok(None),
        }
    }

    fn playlist_cover(&self, playlist_name: &str, filename: &str) -> Result<Option<PathBuf>> {
        let Some((playlist, _)) = get_playlist(&self.config, playlist_name)? else {
            return Ok(None);
        };
        match playlist.cover_path {
            Some(cover) if cover.file_name().and_then(|n| n.to_str()) == Some(filename) => Ok(Some(cover)),
            _ => Ok(None),
        }
    }

    fn getattr_uncached(&self, p: &ParsedPath) -> Result<Option<FileStat>> {
        let c = &self.config;
        match p.view {
            View::Root => Ok(Some(mkstat(FileKind::Directory, None))),
            View::Releases | View::New | View::RecentlyAdded | View::Artists | View::Genres | View::Labels => {
                // Within these views, a release entry resolves by its virtual dirname; files
                // resolve to tracks or the cover of the release.
                if let (Some(release), Some(file)) = (&p.release, &p.file) {
                    if let Some(tp) = track_exists(c, release, file)? {
                        return Ok(Some(mkstat(FileKind::File, Some(&tp))));
                    }
                    if let Some(cp) = cover_exists(c, release, file)? {
                        return Ok(Some(mkstat(FileKind::File, Some(&cp))));
                    }
                    return Ok(None);
                }
                if let Some(release) = &p.release {
                    if let Some(rp) = release_exists(c, release)? {
                        return Ok(Some(mkstat(FileKind::Directory, Some(&rp))));
                    }
                    return Ok(None);
                }
                if let Some(artist) = &p.artist {
                    return Ok(artist_exists(c, artist)?.then(|| mkstat(FileKind::Directory, None)));
                }
                if let Some(genre) = &p.genre {
                    return Ok(genre_exists(c, genre)?.then(|| mkstat(FileKind::Directory, None)));
                }
                if let Some(label) = &p.label {
                    return Ok(label_exists(c, label)?.then(|| mkstat(FileKind::Directory, None)));
                }
                Ok(Some(mkstat(FileKind::Directory, None)))
            }
            View::Collages => {
                let Some(collage) = &p.collage else {
                    return Ok(Some(mkstat(FileKind::Directory, None)));
                };
                if !collage_exists(c, collage)? {
                    return Ok(None);
                }
                if let (Some(release), Some(file)) = (&p.release, &p.file) {
                    if let Some(tp) = track_exists(c, release, file)? {
                        return Ok(Some(mkstat(FileKind::File, Some(&tp))));
                    }
                    if let Some(cp) = cover_exists(c, release, file)? {
                        return Ok(Some(mkstat(FileKind::File, Some(&cp))));
                    }
                    return Ok(None);
                }
                if let Some(release) = &p.release {
                    if let Some(rp) = release_exists(c, release)? {
                        return Ok(Some(mkstat(FileKind::Directory, Some(&rp))));
                    }
                    return Ok(None);
                }
                Ok(Some(mkstat(FileKind::Directory, None)))
            }
            View::Playlists => {
                let Some(playlist) = &p.playlist else {
                    return Ok(Some(mkstat(FileKind::Directory, None)));
                };
                if !playlist_exists(c, playlist)? {
                    return Ok(None);
                }
                let Some(file) = &p.file else {
                    return Ok(Some(mkstat(FileKind::Directory, None)));
                };
                if let Some(position) = &p.file_position {
                    if let Some(track) = self.playlist_track_path(playlist, position, file)? {
                        return Ok(Some(mkstat(FileKind::File, Some(&track.source_path))));
                    }
                }
                if let Some(cover) = self.playlist_cover(playlist, file)? {
                    return Ok(Some(mkstat(FileKind::File, Some(&cover))));
                }
                Ok(None)
            }
        }
    }

    fn readdir_uncached(&self, p: &ParsedPath) -> Result<Option<Vec<String>>> {
        let c = &self.config;
        let mut entries: Vec<String> = vec![".".to_string(), "..".to_string()];
        match p.view {
            View::Root => {
                entries.extend(TOP_LEVEL_VIEWS.iter().map(|s| s.to_string()));
            }
            View::Releases
            | View::New
            | View::RecentlyAdded
            | View::Artists
            | View::Genres
            | View::Labels
            | View::Collages
                if p.release.is_some() =>
            {
                let release = p.release.as_deref().unwrap_or_default();
                let Some((release, tracks)) = crate::cache::get_release(c, release)? else {
                    return Ok(None);
                };
                for track in &tracks {
                    entries.push(track.virtual_filename.clone());
                }
                if let Some(cover) = &release.cover_image_path {
                    if let Some(name) = cover.file_name().and_then(|n| n.to_str()) {
                        entries.push(name.to_string());
                    }
                }
            }
            View::Releases => {
                for release in list_releases(c, None, None, None, None)? {
                    entries.push(release.virtual_dirname);
                }
            }
            View::New => {
                for release in list_releases(c, None, None, None, Some(true))? {
                    entries.push(release.virtual_dirname);
                }
            }
            View::RecentlyAdded => {
                let mut releases = list_releases(c, None, None, None, None)?;
                releases.sort_by(|a, b| b.added_at.cmp(&a.added_at));
                for release in releases {
                    let date = release.added_at.get(..10).unwrap_or("0000-00-00");
                    entries.push(format!("[{date}] {}", release.virtual_dirname));
                }
            }
            View::Artists if p.artist.is_some() => {
                for release in list_releases(c, p.artist.as_deref(), None, None, None)? {
                    entries.push(release.virtual_dirname);
                }
            }
            View::Genres if p.genre.is_some() => {
                for release in list_releases(c, None, p.genre.as_deref(), None, None)? {
                    entries.push(release.virtual_dirname);
                }
            }
            View::Labels if p.label.is_some() => {
                for release in list_releases(c, None, None, p.label.as_deref(), None)? {
                    entries.push(release.virtual_dirname);
                }
            }
            View::Artists => {
                let mut names: Vec<String> = list_artists(c)?
                    .into_iter()
                    .filter(|(name, _)| visible(name, &c.fuse_artists_whitelist, &c.fuse_artists_blacklist))
                    .map(|(_, sanitized)| sanitized)
                    .collect();
                names.sort();
                names.dedup();
                entries.extend(names);
            }
            View::Genres => {
                let mut names: Vec<String> = list_genres(c)?
                    .into_iter()
                    .filter(|(name, _)| visible(name, &c.fuse_genres_whitelist, &c.fuse_genres_blacklist))
                    .map(|(_, sanitized)| sanitized)
                    .collect();
                names.sort();
                names.dedup();
                entries.extend(names);
            }
            View::Labels => {
                let mut names: Vec<String> = list_labels(c)?
                    .into_iter()
                    .filter(|(name, _)| visible(name, &c.fuse_labels_whitelist, &c.fuse_labels_blacklist))
                    .map(|(_, sanitized)| sanitized)
                    .collect();
                names.sort();
                names.dedup();
                entries.extend(names);
            }
            View::Collages if p.collage.is_some() => {
                let collage = p.collage.as_deref().unwrap_or_default();
                if !collage_exists(c, collage)? {
                    return Ok(None);
                }
                let releases = list_collage_releases(c, collage)?;
                let total = releases.len();
                for (position, release) in releases {
                    entries.push(format!("{}. {}", format_position(position, total), release.virtual_dirname));
                }
            }
            View::Collages => {
                entries.extend(list_collages(c)?);
            }
            View::Playlists if p.playlist.is_some() => {
                let playlist = p.playlist.as_deref().unwrap_or_default();
                let Some((playlist, tracks)) = get_playlist(c, playlist)? else {
                    return Ok(None);
                };
                let total = tracks.len();
                for (i, track) in tracks.iter().enumerate() {
                    entries.push(format!("{}. {}", format_position(i as i64 + 1, total), track.virtual_filename));
                }
                if let Some(cover) = &playlist.cover_path {
                    if let Some(name) = cover.file_name().and_then(|n| n.to_str()) {
                        entries.push(name.to_string());
                    }
                }
            }
            View::Playlists => {
                entries.extend(list_playlists(c)?);
            }
        }
        Ok(Some(entries))
    }
}

fn visible(name: &str, whitelist: &Option<Vec<String>>, blacklist: &Option<Vec<String>>) -> bool {
    if let Some(whitelist) = whitelist {
        return whitelist.iter().any(|w| w == name);
    }
    if let Some(blacklist) = blacklist {
        return !blacklist.iter().any(|b| b == name);
    }
    true
}

impl VirtualFilesystem for RoseVfs {
    fn getattr(&self, path: &str) -> FsResult<FileStat> {
        debug!("received getattr for {path}");
        if let Some(stat) = self.ghost_file_stat(path) {
            return Ok(stat);
        }
        if let Some(stat) = self.ghost_dir_stat(path) {
            return Ok(stat);
        }
        if self.is_under_ghost_dir(path) {
            // cp stats the destination before writing into a ghost directory; pretend the
            // file is not there yet so the copy proceeds.
            return Err(ENOENT);
        }
        {
            let mut state = self.state.lock().unwrap();
            state.getattr_cache.retain(|_, (t, _)| t.elapsed() < GETATTR_CACHE_TTL);
            if let Some((_, stat)) = state.getattr_cache.get(path) {
                return Ok(stat.clone());
            }
        }
        let p = parse_virtual_path(path).ok_or(ENOENT)?;
        let stat = self.getattr_uncached(&p).map_err(to_errno)?.ok_or(ENOENT)?;
        let mut state = self.state.lock().unwrap();
        state.getattr_cache.insert(path.to_string(), (Instant::now(), stat.clone()));
        Ok(stat)
    }

    fn readdir(&self, path: &str) -> FsResult<Vec<String>> {
        debug!("received readdir for {path}");
        if self.ghost_dir_stat(path).is_some() {
            return Ok(vec![".".to_string(), "..".to_string()]);
        }
        let p = parse_virtual_path(path).ok_or(ENOENT)?;
        self.readdir_uncached(&p).map_err(to_errno)?.ok_or(ENOENT)
    }

    fn open(&self, path: &str, flags: i32) -> FsResult<u64> {
        debug!("received open for {path} flags={flags:#o}");
        if flags & libc::O_CREAT != 0 {
            return self.create(path, flags);
        }
        if self.ghost_file_stat(path).is_some() || self.is_under_ghost_dir(path) {
            return Ok(WRITE_SINK_FH);
        }
        let p = parse_virtual_path(path).ok_or(ENOENT)?;
        let write_access = flags & (libc::O_WRONLY | libc::O_RDWR) != 0;

        let c = &self.config;
        let source_path = (|| -> Result<Option<(PathBuf, Option<PathBuf>)>> {
            if let (Some(release), Some(file)) = (&p.release, &p.file) {
                if let Some(tp) = track_exists(c, release, file)? {
                    let reindex = tp.parent().map(|d| d.to_path_buf());
                    return Ok(Some((tp, reindex)));
                }
                if let Some(cp) = cover_exists(c, release, file)? {
                    let reindex = cp.parent().map(|d| d.to_path_buf());
                    return Ok(Some((cp, reindex)));
                }
            }
            if let (Some(playlist), Some(file)) = (&p.playlist, &p.file) {
                if let Some(position) = &p.file_position {
                    if let Some(track) = self.playlist_track_path(playlist, position, file)? {
                        let reindex = track.source_path.parent().map(|d| d.to_path_buf());
                        return Ok(Some((track.source_path, reindex)));
                    }
                }
                if let Some(cover) = self.playlist_cover(playlist, file)? {
                    return Ok(Some((cover, None)));
                }
            }
            Ok(None)
        })()
        .map_err(to_errno)?;

        let Some((source_path, reindex_dir)) = source_path else {
            return Err(ENOENT);
        };
        let file = fs::OpenOptions::new()
            .read(true)
            .write(write_access)
            .open(&source_path)
            .map_err(|_| ENOENT)?;
        let mut state = self.state.lock().unwrap();
        let fh = self.alloc_fh(
            &mut state,
            FileHandle::WrappedHost { file, reindex_dir: write_access.then_some(reindex_dir).flatten() },
        );
        Ok(fh)
    }

    fn create(&self, path: &str, flags: i32) -> FsResult<u64> {
        debug!("received create for {path} flags={flags:#o}");
        self.invalidate_caches();
        let p = parse_virtual_path(path).ok_or(ENOENT)?;
        let Some(file) = p.file.clone() else {
            return Err(EACCES);
        };
        let file_lower = file.to_lowercase();
        let ext = Path::new(&file).extension().and_then(|e| e.to_str()).unwrap_or("").to_lowercase();

        // Add track to playlist: a new audio file written into a playlist directory.
        if let Some(playlist) = &p.playlist {
            if is_supported_audio_path(Path::new(&file)) {
                if !playlist_exists(&self.config, playlist).map_err(to_errno)? {
                    return Err(ENOENT);
                }
                self.register_ghost_file(path, 0);
                let mut state = self.state.lock().unwrap();
                let fh = self.alloc_fh(
                    &mut state,
                    FileHandle::PlaylistAddition {
                        path: path.to_string(),
                        playlist: playlist.clone(),
                        ext,
                        buffer: Vec::new(),
                    },
                );
                return Ok(fh);
            }
            if self.config.valid_cover_arts().contains(&file_lower) {
                self.register_ghost_file(path, 0);
                let mut state = self.state.lock().unwrap();
                let fh = self.alloc_fh(
                    &mut state,
                    FileHandle::NewCover {
                        path: path.to_string(),
                        target: CoverTarget::Playlist(playlist.clone()),
                        ext,
                        buffer: Vec::new(),
                    },
                );
                return Ok(fh);
            }
            return Err(EACCES);
        }

        // New cover art inside a release directory.
        if let Some(release) = &p.release {
            if self.config.valid_cover_arts().contains(&file_lower) {
                if release_exists(&self.config, release).map_err(to_errno)?.is_none() {
                    // Writes into a freshly-added collage ghost directory land here too.
                    if self.is_under_ghost_dir(path) {
                        return Ok(WRITE_SINK_FH);
                    }
                    return Err(ENOENT);
                }
                self.register_ghost_file(path, 0);
                let mut state = self.state.lock().unwrap();
                let fh = self.alloc_fh(
                    &mut state,
                    FileHandle::NewCover {
                        path: path.to_string(),
                        target: CoverTarget::Release(release.clone()),
                        ext,
                        buffer: Vec::new(),
                    },
                );
                return Ok(fh);
            }
            if self.is_under_ghost_dir(path) {
                return Ok(WRITE_SINK_FH);
            }
            return Err(EACCES);
        }

        Err(EACCES)
    }

    fn read(&self, fh: u64, offset: u64, size: u32) -> FsResult<Vec<u8>> {
        if fh == WRITE_SINK_FH {
            return Ok(Vec::new());
        }
        let mut state = self.state.lock().unwrap();
        let handle = state
            .handles
            .get_mut(&fh)
            .ok_or_else(|| to_errno(RoseExpectedError::UnknownFileHandle { fh }.into()))?;
        match handle {
            FileHandle::WrappedHost { file, .. } => {
                file.seek(SeekFrom::Start(offset)).map_err(|_| EIO)?;
                let mut buf = vec![0u8; size as usize];
                let n = file.read(&mut buf).map_err(|_| EIO)?;
                buf.truncate(n);
                Ok(buf)
            }
            FileHandle::PlaylistAddition { buffer, .. } | FileHandle::NewCover { buffer, .. } => {
                let start = (offset as usize).min(buffer.len());
                let end = (offset as usize + size as usize).min(buffer.len());
                Ok(buffer[start..end].to_vec())
            }
        }
    }

    fn write(&self, fh: u64, offset: u64, data: &[u8]) -> FsResult<u32> {
        if fh == WRITE_SINK_FH {
            return Ok(data.len() as u32);
        }
        let mut state = self.state.lock().unwrap();
        let handle = state
            .handles
            .get_mut(&fh)
            .ok_or_else(|| to_errno(RoseExpectedError::UnknownFileHandle { fh }.into()))?;
        match handle {
            FileHandle::WrappedHost { file, .. } => {
                file.seek(SeekFrom::Start(offset)).map_err(|_| EIO)?;
                file.write_all(data).map_err(|_| EIO)?;
                Ok(data.len() as u32)
            }
            FileHandle::PlaylistAddition { buffer, .. } | FileHandle::NewCover { buffer, .. } => {
                let end = offset as usize + data.len();
                if buffer.len() < end {
                    buffer.resize(end, 0);
                }
                buffer[offset as usize..end].copy_from_slice(data);
                Ok(data.len() as u32)
            }
        }
    }

    fn release(&self, fh: u64) -> FsResult<()> {
        debug!("received release for fh={fh}");
        if fh == WRITE_SINK_FH {
            return Ok(());
        }
        let handle = {
            let mut state = self.state.lock().unwrap();
            state
                .handles
                .remove(&fh)
                .ok_or_else(|| to_errno(RoseExpectedError::UnknownFileHandle { fh }.into()))?
        };
        match handle {
            FileHandle::WrappedHost { file, reindex_dir } => {
                drop(file);
                if let Some(dir) = reindex_dir {
                    self.invalidate_caches();
                    update_cache_for_releases(&self.config, Some(vec![dir]), false, false).map_err(to_errno)?;
                }
                Ok(())
            }
            FileHandle::PlaylistAddition { path, playlist, ext, buffer } => {
                self.invalidate_caches();
                // Refresh the ghost so post-close metadata syscalls (cp -p) still succeed.
                self.register_ghost_file(&path, buffer.len() as u64);
                let tmp = std::env::temp_dir().join(format!("rose-vfs-{}.{ext}", uuid::Uuid::now_v7()));
                fs::write(&tmp, &buffer).map_err(|_| EIO)?;
                let result = (|| -> Result<()> {
                    let tags = AudioTags::from_file(&tmp)?;
                    match tags.id {
                        Some(track_id) => add_track_to_playlist(&self.config, &playlist, &track_id),
                        None => {
                            // The user copied in a file that is not part of the library; there
                            // is nothing to add, so the operation dissolves.
                            debug!("dropping playlist addition: written file has no track ID");
                            Ok(())
                        }
                    }
                })();
                let _ = fs::remove_file(&tmp);
                result.map_err(to_errno)
            }
            FileHandle::NewCover { path, target, ext, buffer } => {
                self.invalidate_caches();
                self.register_ghost_file(&path, buffer.len() as u64);
                let tmp = std::env::temp_dir().join(format!("rose-vfs-{}.{ext}", uuid::Uuid::now_v7()));
                fs::write(&tmp, &buffer).map_err(|_| EIO)?;
                let result = match &target {
                    CoverTarget::Release(release) => set_release_cover_art(&self.config, release, &tmp),
                    CoverTarget::Playlist(playlist) => set_playlist_cover_art(&self.config, playlist, &tmp),
                };
                let _ = fs::remove_file(&tmp);
                result.map_err(to_errno)
            }
        }
    }

    fn unlink(&self, path: &str) -> FsResult<()> {
        debug!("received unlink for {path}");
        self.invalidate_caches();
        let Some(p) = parse_virtual_path(path) else {
            return Ok(());
        };
        let c = &self.config;

        if let Some(playlist) = &p.playlist {
            if let Some(file) = &p.file {
                // Delete the playlist's cover.
                if let Some(cover) = self.playlist_cover(playlist, file).map_err(to_errno)? {
                    let _ = cover;
                    return remove_playlist_cover_art(c, playlist).map_err(to_errno);
                }
                // Delete a track from the playlist, identified by position and filename.
                if let Some(position) = &p.file_position {
                    if let Some(track) = self.playlist_track_path(playlist, position, file).map_err(to_errno)? {
                        return remove_track_from_playlist(c, playlist, &track.id).map_err(to_errno);
                    }
                }
                return Ok(());
            }
            return delete_playlist(c, playlist).map_err(to_errno);
        }

        if let (Some(release), Some(file)) = (&p.release, &p.file) {
            // Delete the release's cover. Unmatched unlinks are accepted silently so that
            // `rm -r` of a release directory can proceed; the enclosing rmdir does the delete.
            if cover_exists(c, release, file).map_err(to_errno)?.is_some() {
                return remove_release_cover_art(c, release).map_err(to_errno);
            }
        }
        Ok(())
    }

    fn mkdir(&self, path: &str) -> FsResult<()> {
        debug!("received mkdir for {path}");
        self.invalidate_caches();
        let p = parse_virtual_path(path).ok_or(ENOENT)?;
        match p.view {
            View::Collages => match (&p.collage, &p.release) {
                (Some(collage), None) => create_collage(&self.config, collage).map_err(to_errno),
                (Some(collage), Some(release)) => {
                    add_release_to_collage(&self.config, collage, release).map_err(to_errno)?;
                    // Let `cp -r` drop files into the just-added directory without erroring.
                    self.register_ghost_dir(path);
                    Ok(())
                }
                _ => Err(EACCES),
            },
            View::Playlists => match (&p.playlist, &p.file) {
                (Some(playlist), None) => create_playlist(&self.config, playlist).map_err(to_errno),
                _ => Err(EACCES),
            },
            _ => Err(EACCES),
        }
    }

    fn rmdir(&self, path: &str) -> FsResult<()> {
        debug!("received rmdir for {path}");
        self.invalidate_caches();
        let p = parse_virtual_path(path).ok_or(ENOENT)?;
        match p.view {
            View::Collages => match (&p.collage, &p.release) {
                (Some(collage), None) => delete_collage(&self.config, collage).map_err(to_errno),
                (Some(collage), Some(release)) => {
                    crate::collages::remove_release_from_collage(&self.config, collage, release).map_err(to_errno)
                }
                _ => Err(EACCES),
            },
            View::Playlists => match (&p.playlist, &p.file) {
                (Some(playlist), None) => delete_playlist(&self.config, playlist).map_err(to_errno),
                _ => Err(EACCES),
            },
            View::Releases | View::New | View::RecentlyAdded | View::Artists | View::Genres | View::Labels => {
                match (&p.release, &p.file) {
                    (Some(release), None) => delete_release(&self.config, release).map_err(to_errno),
                    _ => Err(EACCES),
                }
            }
            _ => Err(EACCES),
        }
    }

    fn rename(&self, old_path: &str, new_path: &str) -> FsResult<()> {
        debug!("received rename for {old_path} -> {new_path}");
        self.invalidate_caches();
        let old = parse_virtual_path(old_path).ok_or(ENOENT)?;
        let new = parse_virtual_path(new_path).ok_or(EACCES)?;

        // Semantic 1: flipping the {NEW} prefix on a release dirname toggles its new flag.
        if old.view == new.view && old.file.is_none() && new.file.is_none() {
            if let (Some(old_release), Some(new_release)) = (&old.release, &new.release) {
                let old_stripped = old_release.strip_prefix("{NEW} ").unwrap_or(old_release);
                let new_stripped = new_release.strip_prefix("{NEW} ").unwrap_or(new_release);
                let flips_new = (old_release.starts_with("{NEW} ")) != (new_release.starts_with("{NEW} "));
                if flips_new && old_stripped == new_stripped {
                    return toggle_release_new(&self.config, old_release).map_err(to_errno);
                }
                return Err(EACCES);
            }
        }
        // Semantic 2: renaming a collage.
        if old.view == View::Collages && new.view == View::Collages && old.release.is_none() && new.release.is_none() {
            if let (Some(old_collage), Some(new_collage)) = (&old.collage, &new.collage) {
                return rename_collage(&self.config, old_collage, new_collage).map_err(to_errno);
            }
        }
        // Semantic 3: renaming a playlist.
        if old.view == View::Playlists && new.view == View::Playlists && old.file.is_none() && new.file.is_none() {
            if let (Some(old_playlist), Some(new_playlist)) = (&old.playlist, &new.playlist) {
                return rename_playlist(&self.config, old_playlist, new_playlist).map_err(to_errno);
            }
        }
        Err(EACCES)
    }
}

/// Unmounting goes through the system's umount utility; there is no in-process equivalent.
pub fn unmount_virtualfs(c: &Config) -> Result<()> {
    Command::new("umount").arg(&c.fuse_mount_dir).status()?;
    Ok(())
}
