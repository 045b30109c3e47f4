/// The common module is our ugly grab bag of common toys. Though a fully generalized common module
/// is _typically_ a bad idea, we have few enough things in it that it's OK for now.
use std::collections::HashSet;
use std::fs;
use std::hash::Hash;
use std::path::Path;
use std::sync::{Mutex, OnceLock};

use directories::ProjectDirs;
use regex::Regex;
use serde::Serialize;
use sha2::{Digest, Sha256};
use unicode_normalization::UnicodeNormalization;

use crate::config::Config;

pub const VERSION: &str = env!("CARGO_PKG_VERSION");

pub fn flatten<T: Clone>(xxs: Vec<Vec<T>>) -> Vec<T> {
    let mut xs = Vec::new();
    for group in xxs {
        xs.extend(group);
    }
    xs
}

pub fn uniq<T: Clone + Eq + Hash>(xs: Vec<T>) -> Vec<T> {
    let mut rv = Vec::new();
    let mut seen = HashSet::new();
    for x in xs {
        if seen.insert(x.clone()) {
            rv.push(x);
        }
    }
    rv
}

static ILLEGAL_FS_CHARS_REGEX: OnceLock<Regex> = OnceLock::new();

fn illegal_fs_chars_regex() -> &'static Regex {
    ILLEGAL_FS_CHARS_REGEX.get_or_init(|| Regex::new(r#"[:\?<>\\\*\|"/]+"#).unwrap())
}

/// Replace characters illegal in filenames with underscores and truncate to the configured byte
/// limit. Dirnames have no extension to protect.
pub fn sanitize_dirname(c: &Config, name: &str, enforce_maxlen: bool) -> String {
    let mut name = illegal_fs_chars_regex().replace_all(name, "_").to_string();
    if enforce_maxlen {
        name = truncate_utf8(&name, c.max_filename_bytes).trim().to_string();
    }
    name.nfd().collect::<String>()
}

/// Like sanitize_dirname, but preserves the file extension when truncating. Extensions longer
/// than 6 bytes are not treated as extensions.
pub fn sanitize_filename(c: &Config, name: &str, enforce_maxlen: bool) -> String {
    let name = illegal_fs_chars_regex().replace_all(name, "_").to_string();
    if !enforce_maxlen {
        return name.nfd().collect::<String>();
    }

    let (stem, ext) = match name.rfind('.') {
        Some(pos) if name.len() - pos <= 6 => {
            let (s, e) = name.split_at(pos);
            (s.to_string(), e.to_string())
        }
        _ => (name.clone(), String::new()),
    };
    let stem = truncate_utf8(&stem, c.max_filename_bytes).trim().to_string();
    format!("{stem}{ext}").nfd().collect::<String>()
}

fn truncate_utf8(s: &str, max_bytes: usize) -> &str {
    if s.len() <= max_bytes {
        return s;
    }
    let mut end = max_bytes;
    while end > 0 && !s.is_char_boundary(end) {
        end -= 1;
    }
    &s[..end]
}

/// Move a path to the trash. Falls back to a trash directory under the cache when the platform
/// trash is unavailable (e.g. headless hosts without XDG data directories).
pub fn send_to_trash(c: &Config, path: &Path) -> crate::errors::Result<()> {
    if trash::delete(path).is_ok() {
        return Ok(());
    }
    let trash_dir = c.cache_dir.join("trash");
    fs::create_dir_all(&trash_dir)?;
    let file_name = path.file_name().and_then(|n| n.to_str()).unwrap_or("trashed");
    let mut dest = trash_dir.join(file_name);
    if dest.exists() {
        dest = trash_dir.join(format!("{}-{file_name}", uuid::Uuid::now_v7()));
    }
    fs::rename(path, &dest)?;
    Ok(())
}

/// Hash any serializable value. Used for the cache's config hash.
pub fn sha256_dataclass<T: Serialize>(dc: &T) -> String {
    let mut hasher = Sha256::new();
    let json = serde_json::to_string(dc).unwrap_or_default();
    hasher.update(json.as_bytes());
    format!("{:x}", hasher.finalize())
}

static LOGGING_INITIALIZED: Mutex<bool> = Mutex::new(false);

/// Set up tracing once per process. `output` is "stderr" or "file"; the file output rolls in the
/// platform state directory.
pub fn initialize_logging(output: &str) -> crate::errors::Result<()> {
    use tracing_appender::rolling::{RollingFileAppender, Rotation};
    use tracing_subscriber::{fmt, EnvFilter};

    let mut initialized = LOGGING_INITIALIZED.lock().unwrap();
    if *initialized {
        return Ok(());
    }
    *initialized = true;
    drop(initialized);

    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    if output == "file" {
        let proj_dirs = ProjectDirs::from("", "", "rose")
            .ok_or_else(|| crate::errors::RoseError::Generic("failed to resolve project directories".to_string()))?;
        let log_dir = if cfg!(target_os = "macos") {
            proj_dirs.cache_dir()
        } else {
            proj_dirs.state_dir().unwrap_or(proj_dirs.cache_dir())
        };
        fs::create_dir_all(log_dir)?;
        let file_appender = RollingFileAppender::builder()
            .rotation(Rotation::NEVER)
            .max_log_files(10)
            .filename_prefix("rose")
            .filename_suffix("log")
            .build(log_dir)
            .map_err(|e| crate::errors::RoseError::Generic(format!("failed to build log appender: {e}")))?;
        let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);
        // The guard must outlive the process for the writer thread to flush.
        std::mem::forget(guard);
        let subscriber = fmt::Subscriber::builder()
            .with_env_filter(env_filter)
            .with_writer(non_blocking)
            .with_target(true)
            .finish();
        let _ = tracing::subscriber::set_global_default(subscriber);
    } else {
        let subscriber = fmt::Subscriber::builder().with_env_filter(env_filter).finish();
        let _ = tracing::subscriber::set_global_default(subscriber);
    }

    Ok(())
}
