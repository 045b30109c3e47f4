/// The config module provides the config spec and parsing logic.
///
/// We take special care to optimize the configuration experience: Rose provides detailed errors
/// when an invalid configuration is detected, unrecognized keys included.
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

use serde::Deserialize;
use tracing::warn;

use crate::errors::{Result, RoseError, RoseExpectedError};
use crate::rules::MetadataRule;

#[derive(Debug, Clone)]
pub struct Config {
    pub music_source_dir: PathBuf,
    pub fuse_mount_dir: PathBuf,
    pub cache_dir: PathBuf,
    pub max_proc: usize,
    /// Parent artist -> aliases of that artist.
    pub artist_aliases_map: HashMap<String, Vec<String>>,
    /// Alias -> parent artists that the alias stands in for.
    pub artist_aliases_parents_map: HashMap<String, Vec<String>>,
    pub fuse_artists_whitelist: Option<Vec<String>>,
    pub fuse_genres_whitelist: Option<Vec<String>>,
    pub fuse_labels_whitelist: Option<Vec<String>>,
    pub fuse_artists_blacklist: Option<Vec<String>>,
    pub fuse_genres_blacklist: Option<Vec<String>>,
    pub fuse_labels_blacklist: Option<Vec<String>>,
    pub cover_art_stems: Vec<String>,
    pub valid_art_exts: Vec<String>,
    pub ignore_release_directories: Vec<String>,
    pub stored_metadata_rules: Vec<MetadataRule>,
    pub max_filename_bytes: usize,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct ConfigRaw {
    music_source_dir: String,
    fuse_mount_dir: String,
    cache_dir: Option<String>,
    max_proc: Option<usize>,
    #[serde(default)]
    artist_aliases: Vec<ArtistAliasRaw>,
    fuse_artists_whitelist: Option<Vec<String>>,
    fuse_genres_whitelist: Option<Vec<String>>,
    fuse_labels_whitelist: Option<Vec<String>>,
    fuse_artists_blacklist: Option<Vec<String>>,
    fuse_genres_blacklist: Option<Vec<String>>,
    fuse_labels_blacklist: Option<Vec<String>>,
    cover_art_stems: Option<Vec<String>>,
    valid_art_exts: Option<Vec<String>>,
    #[serde(default)]
    ignore_release_directories: Vec<String>,
    #[serde(default)]
    stored_metadata_rules: Vec<MetadataRule>,
    max_filename_bytes: Option<usize>,
}

#[derive(Debug, Deserialize)]
struct ArtistAliasRaw {
    artist: String,
    aliases: Vec<String>,
}

impl Config {
    /// The default config file location, ~/.config/rose/config.toml (or the platform equivalent).
    pub fn default_config_path() -> Result<PathBuf> {
        let config_home = dirs::config_dir()
            .ok_or_else(|| RoseError::Generic("failed to resolve the user configuration directory".to_string()))?;
        Ok(config_home.join("rose").join("config.toml"))
    }

    pub fn parse(config_path_override: Option<&Path>) -> Result<Config> {
        let path = match config_path_override {
            Some(p) => p.to_path_buf(),
            None => Config::default_config_path()?,
        };
        let contents = fs::read_to_string(&path).map_err(|e| {
            RoseExpectedError::InvalidConfiguration(format!(
                "configuration file {} is missing or unreadable: {e}",
                path.display()
            ))
        })?;
        Config::parse_str(&contents)
    }

    pub fn parse_str(contents: &str) -> Result<Config> {
        let raw: ConfigRaw = toml::from_str(contents)
            .map_err(|e| RoseExpectedError::InvalidConfiguration(e.to_string()))?;

        let music_source_dir = expand_path("music_source_dir", &raw.music_source_dir)?;
        let fuse_mount_dir = expand_path("fuse_mount_dir", &raw.fuse_mount_dir)?;
        let cache_dir = match &raw.cache_dir {
            Some(d) => expand_path("cache_dir", d)?,
            None => dirs::cache_dir()
                .ok_or_else(|| RoseError::Generic("failed to resolve the user cache directory".to_string()))?
                .join("rose"),
        };

        let max_proc = raw.max_proc.unwrap_or_else(|| std::cmp::max(1, num_cpus::get() / 2));
        if max_proc == 0 {
            return Err(RoseExpectedError::InvalidConfiguration(
                "max_proc must be a positive integer".to_string(),
            )
            .into());
        }

        for (view, wl, bl) in [
            ("artists", &raw.fuse_artists_whitelist, &raw.fuse_artists_blacklist),
            ("genres", &raw.fuse_genres_whitelist, &raw.fuse_genres_blacklist),
            ("labels", &raw.fuse_labels_whitelist, &raw.fuse_labels_blacklist),
        ] {
            if wl.is_some() && bl.is_some() {
                return Err(RoseExpectedError::InvalidConfiguration(format!(
                    "cannot specify both fuse_{view}_whitelist and fuse_{view}_blacklist"
                ))
                .into());
            }
        }

        let mut artist_aliases_map: HashMap<String, Vec<String>> = HashMap::new();
        let mut artist_aliases_parents_map: HashMap<String, Vec<String>> = HashMap::new();
        for entry in &raw.artist_aliases {
            for alias in &entry.aliases {
                artist_aliases_map.entry(entry.artist.clone()).or_default().push(alias.clone());
                let parents = artist_aliases_parents_map.entry(alias.clone()).or_default();
                if !parents.contains(&entry.artist) {
                    parents.push(entry.artist.clone());
                }
            }
        }

        let cover_art_stems = raw
            .cover_art_stems
            .unwrap_or_else(|| vec!["folder".into(), "cover".into(), "art".into(), "front".into()])
            .into_iter()
            .map(|s| s.to_lowercase())
            .collect();
        let valid_art_exts = raw
            .valid_art_exts
            .unwrap_or_else(|| vec!["jpg".into(), "jpeg".into(), "png".into()])
            .into_iter()
            .map(|s| s.to_lowercase())
            .collect();

        let max_filename_bytes = raw.max_filename_bytes.unwrap_or(180);
        if max_filename_bytes < 12 {
            warn!("max_filename_bytes of {} is dangerously small", max_filename_bytes);
        }

        Ok(Config {
            music_source_dir,
            fuse_mount_dir,
            cache_dir,
            max_proc,
            artist_aliases_map,
            artist_aliases_parents_map,
            fuse_artists_whitelist: raw.fuse_artists_whitelist,
            fuse_genres_whitelist: raw.fuse_genres_whitelist,
            fuse_labels_whitelist: raw.fuse_labels_whitelist,
            fuse_artists_blacklist: raw.fuse_artists_blacklist,
            fuse_genres_blacklist: raw.fuse_genres_blacklist,
            fuse_labels_blacklist: raw.fuse_labels_blacklist,
            cover_art_stems,
            valid_art_exts,
            ignore_release_directories: raw.ignore_release_directories,
            stored_metadata_rules: raw.stored_metadata_rules,
            max_filename_bytes,
        })
    }

    pub fn cache_database_path(&self) -> PathBuf {
        self.cache_dir.join("cache.sqlite3")
    }

    /// The accepted cover art filenames, case-folded: every stem crossed with every extension.
    pub fn valid_cover_arts(&self) -> Vec<String> {
        let mut rv = Vec::new();
        for stem in &self.cover_art_stems {
            for ext in &self.valid_art_exts {
                rv.push(format!("{stem}.{ext}"));
            }
        }
        rv
    }

    /// Hash of the config fields that affect cache population. A change invalidates the cache.
    pub fn hash_for_cache(&self) -> String {
        let fields = serde_json::json!({
            "music_source_dir": self.music_source_dir.to_string_lossy(),
            "cache_dir": self.cache_dir.to_string_lossy(),
            "cover_art_stems": self.cover_art_stems,
            "valid_art_exts": self.valid_art_exts,
            "ignore_release_directories": self.ignore_release_directories,
            "artist_aliases_map": sorted_map(&self.artist_aliases_map),
        });
        crate::common::sha256_dataclass(&fields)
    }
}

fn sorted_map(m: &HashMap<String, Vec<String>>) -> Vec<(String, Vec<String>)> {
    let mut entries: Vec<(String, Vec<String>)> = m.iter().map(|(k, v)| (k.clone(), v.clone())).collect();
    entries.sort();
    entries
}

fn expand_path(key: &str, value: &str) -> Result<PathBuf> {
    let expanded = shellexpand::full(value)
        .map_err(|e| RoseExpectedError::InvalidConfiguration(format!("invalid path for {key}: {e}")))?;
    Ok(PathBuf::from(expanded.as_ref()))
}
