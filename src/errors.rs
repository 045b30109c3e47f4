use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum RoseError {
    #[error("Rose error: {0}")]
    Generic(String),
    #[error(transparent)]
    Expected(#[from] RoseExpectedError),
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error("Regex error: {0}")]
    Regex(#[from] regex::Error),
    #[error("TOML deserialization error: {0}")]
    TomlDe(#[from] toml::de::Error),
    #[error("TOML serialization error: {0}")]
    TomlSer(#[from] toml::ser::Error),
    #[error("Tag error: {0}")]
    Tag(#[from] lofty::error::LoftyError),
    #[error("Trash error: {0}")]
    Trash(#[from] trash::Error),
    #[error("Cache schema mismatch: {0}")]
    SchemaMismatch(String),
}

/// These errors are expected in normal operation and are printed without a
/// traceback.
#[derive(Error, Debug, Clone)]
pub enum RoseExpectedError {
    #[error("{0}")]
    Generic(String),
    #[error("Invalid configuration: {0}")]
    InvalidConfiguration(String),
    #[error("Release does not exist: {id}")]
    ReleaseDoesNotExist { id: String },
    #[error("Track does not exist: {id}")]
    TrackDoesNotExist { id: String },
    #[error("Collage does not exist: {name}")]
    CollageDoesNotExist { name: String },
    #[error("Collage already exists: {name}")]
    CollageAlreadyExists { name: String },
    #[error("Playlist does not exist: {name}")]
    PlaylistDoesNotExist { name: String },
    #[error("Playlist already exists: {name}")]
    PlaylistAlreadyExists { name: String },
    #[error("Invalid cover art file: {path}")]
    InvalidCoverArtFile { path: PathBuf },
    #[error("Unknown artist role: {role}")]
    UnknownArtistRole { role: String },
    #[error("Invalid rule action: {0}")]
    InvalidRuleAction(String),
    #[error("Invalid replacement value: {0}")]
    InvalidReplacementValue(String),
    #[error("Failed to acquire lock {name} within {timeout} seconds")]
    LockTimeout { name: String, timeout: f64 },
    #[error("Unknown file handle: {fh}")]
    UnknownFileHandle { fh: u64 },
    #[error("File not found: {path}")]
    FileNotFound { path: PathBuf },
    #[error("Unsupported audio file: {path}")]
    UnsupportedFiletype { path: PathBuf },
    #[error("{0}")]
    DescriptionMismatch(String),
}

pub type Result<T> = std::result::Result<T, RoseError>;
