/// The virtual_path module implements the bijection between virtual filesystem paths and a
/// tagged path record that names the entities involved.
use once_cell::sync::Lazy;
use regex::Regex;

pub const VIEW_RELEASES: &str = "1. Releases";
pub const VIEW_NEW: &str = "2. Releases - New";
pub const VIEW_RECENTLY_ADDED: &str = "3. Releases - Recently Added";
pub const VIEW_ARTISTS: &str = "4. Artists";
pub const VIEW_GENRES: &str = "5. Genres";
pub const VIEW_LABELS: &str = "6. Labels";
pub const VIEW_COLLAGES: &str = "7. Collages";
pub const VIEW_PLAYLISTS: &str = "8. Playlists";

/// The top-level view folders, in stable display order.
pub const TOP_LEVEL_VIEWS: [&str; 8] = [
    VIEW_RELEASES,
    VIEW_NEW,
    VIEW_RECENTLY_ADDED,
    VIEW_ARTISTS,
    VIEW_GENRES,
    VIEW_LABELS,
    VIEW_COLLAGES,
    VIEW_PLAYLISTS,
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum View {
    Root,
    Releases,
    New,
    RecentlyAdded,
    Artists,
    Genres,
    Labels,
    Collages,
    Playlists,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedPath {
    pub view: View,
    pub artist: Option<String>,
    pub genre: Option<String>,
    pub label: Option<String>,
    pub collage: Option<String>,
    pub playlist: Option<String>,
    pub release: Option<String>,
    /// The position prefix stripped from a collage release entry (`N. `).
    pub release_position: Option<String>,
    pub file: Option<String>,
    /// The position prefix stripped from a playlist track entry (`N. `).
    pub file_position: Option<String>,
}

impl ParsedPath {
    fn new(view: View) -> ParsedPath {
        ParsedPath {
            view,
            artist: None,
            genre: None,
            label: None,
            collage: None,
            playlist: None,
            release: None,
            release_position: None,
            file: None,
            file_position: None,
        }
    }
}

static POSITION_REGEX: Lazy<Regex> = Lazy::new(|| Regex::new(r"^([0-9]+)\. (.+)$").unwrap());
static ADDED_AT_REGEX: Lazy<Regex> = Lazy::new(|| Regex::new(r"^\[[0-9]{4}-[0-9]{2}-[0-9]{2}\] (.+)$").unwrap());

fn split_position(part: &str) -> (Option<String>, String) {
    match POSITION_REGEX.captures(part) {
        Some(cap) => (Some(cap[1].to_string()), cap[2].to_string()),
        None => (None, part.to_string()),
    }
}

/// Parse an absolute virtual path. Returns None when the path cannot exist in the hierarchy
/// (excess depth, unknown view); the caller translates that into ENOENT.
pub fn parse_virtual_path(path: &str) -> Option<ParsedPath> {
    let parts: Vec<&str> = path.trim_start_matches('/').split('/').filter(|p| !p.is_empty()).collect();

    if parts.is_empty() {
        return Some(ParsedPath::new(View::Root));
    }

    match parts[0] {
        VIEW_RELEASES | VIEW_NEW => {
            let view = if parts[0] == VIEW_RELEASES { View::Releases } else { View::New };
            let mut p = ParsedPath::new(view);
            match parts.len() {
                1 => Some(p),
                2 => {
                    p.release = Some(parts[1].to_string());
                    Some(p)
                }
                3 => {
                    p.release = Some(parts[1].to_string());
                    p.file = Some(parts[2].to_string());
                    Some(p)
                }
                _ => None,
            }
        }
        VIEW_RECENTLY_ADDED => {
            let mut p = ParsedPath::new(View::RecentlyAdded);
            match parts.len() {
                1 => Some(p),
                2 | 3 => {
                    let release = ADDED_AT_REGEX
                        .captures(parts[1])
                        .map(|cap| cap[1].to_string())
                        .unwrap_or_else(|| parts[1].to_string());
                    p.release = Some(release);
                    if parts.len() == 3 {
                        p.file = Some(parts[2].to_string());
                    }
                    Some(p)
                }
                _ => None,
            }
        }
        VIEW_ARTISTS | VIEW_GENRES | VIEW_LABELS => {
            let (view, set): (View, fn(&mut ParsedPath, String)) = match parts[0] {
                VIEW_ARTISTS => (View::Artists, |p, v| p.artist = Some(v)),
                VIEW_GENRES => (View::Genres, |p, v| p.genre = Some(v)),
                _ => (View::Labels, |p, v| p.label = Some(v)),
            };
            let mut p = ParsedPath::new(view);
            match parts.len() {
                1 => Some(p),
                2 => {
                    set(&mut p, parts[1].to_string());
                    Some(p)
                }
                3 => {
                    set(&mut p, parts[1].to_string());
                    p.release = Some(parts[2].to_string());
                    Some(p)
                }
                4 => {
                    set(&mut p, parts[1].to_string());
                    p.release = Some(parts[2].to_string());
                    p.file = Some(parts[3].to_string());
                    Some(p)
                }
                _ => None,
            }
        }
        VIEW_COLLAGES => {
            let mut p = ParsedPath::new(View::Collages);
            match parts.len() {
                1 => Some(p),
                2 => {
                    p.collage = Some(parts[1].to_string());
                    Some(p)
                }
                3 | 4 => {
                    p.collage = Some(parts[1].to_string());
                    let (position, release) = split_position(parts[2]);
                    p.release_position = position;
                    p.release = Some(release);
                    if parts.len() == 4 {
                        p.file = Some(parts[3].to_string());
                    }
                    Some(p)
                }
                _ => None,
            }
        }
        VIEW_PLAYLISTS => {
            let mut p = ParsedPath::new(View::Playlists);
            match parts.len() {
                1 => Some(p),
                2 => {
                    p.playlist = Some(parts[1].to_string());
                    Some(p)
                }
                3 => {
                    p.playlist = Some(parts[1].to_string());
                    let (position, file) = split_position(parts[2]);
                    p.file_position = position;
                    p.file = Some(file);
                    Some(p)
                }
                _ => None,
            }
        }
        _ => None,
    }
}

/// Zero-pad `position` to the width needed for `total` entries, for stable lexicographic
/// ordering of position-prefixed names.
pub fn format_position(position: i64, total: usize) -> String {
    let width = total.to_string().len().max(1);
    format!("{position:0width$}")
}
