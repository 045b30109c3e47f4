/// Test fixtures. `config()` provisions an isolated library with a migrated cache;
/// `seeded_cache()` writes fake rows directly into the database; `source_dir()` builds a real
/// on-disk library out of generated WAV files, with tags written through AudioTags, and indexes
/// it.
use std::fs;
use std::path::Path;
use std::sync::Once;

use tempfile::TempDir;

use crate::audiotags::{Artists, AudioTags};
use crate::cache::{connect, migrate_database};
use crate::config::Config;

static INIT: Once = Once::new();

pub fn init() -> TempDir {
    INIT.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(
                tracing_subscriber::EnvFilter::try_from_default_env()
                    .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
            )
            .with_test_writer()
            .try_init();
    });
    TempDir::new().expect("failed to create temp dir")
}

/// An isolated config with empty source/mount directories and a freshly migrated cache.
pub fn config() -> (Config, TempDir) {
    let temp_dir = init();
    let base_path = temp_dir.path();
    fs::create_dir_all(base_path.join("cache")).unwrap();
    fs::create_dir_all(base_path.join("source")).unwrap();
    fs::create_dir_all(base_path.join("mount")).unwrap();

    let config = Config::parse_str(&format!(
        r#"
music_source_dir = "{}"
fuse_mount_dir = "{}"
cache_dir = "{}"
max_proc = 2
"#,
        base_path.join("source").display(),
        base_path.join("mount").display(),
        base_path.join("cache").display(),
    ))
    .expect("failed to parse test config");

    migrate_database(&config).expect("failed to migrate test database");
    (config, temp_dir)
}

/// A 44-byte-header PCM WAV of silence: 8 kHz, mono, 8-bit.
pub fn write_wav(path: &Path, seconds: u32) {
    let sample_rate: u32 = 8000;
    let data_len: u32 = sample_rate * seconds;
    let mut out: Vec<u8> = Vec::with_capacity(44 + data_len as usize);
    out.extend_from_slice(b"RIFF");
    out.extend_from_slice(&(36 + data_len).to_le_bytes());
    out.extend_from_slice(b"WAVE");
    out.extend_from_slice(b"fmt ");
    out.extend_from_slice(&16u32.to_le_bytes());
    out.extend_from_slice(&1u16.to_le_bytes()); // PCM
    out.extend_from_slice(&1u16.to_le_bytes()); // mono
    out.extend_from_slice(&sample_rate.to_le_bytes());
    out.extend_from_slice(&sample_rate.to_le_bytes()); // byte rate
    out.extend_from_slice(&1u16.to_le_bytes()); // block align
    out.extend_from_slice(&8u16.to_le_bytes()); // bits per sample
    out.extend_from_slice(b"data");
    out.extend_from_slice(&data_len.to_le_bytes());
    out.resize(44 + data_len as usize, 0x80);
    fs::write(path, out).expect("failed to write wav");
}

#[allow(clippy::too_many_arguments)]
pub fn write_track(
    c: &Config,
    path: &Path,
    title: &str,
    album: &str,
    artist: &str,
    genres: &[&str],
    labels: &[&str],
    year: i32,
    track_number: &str,
    ids: Option<(&str, &str)>,
) {
    write_wav(path, 2);
    let mut tags = AudioTags::from_file(path).expect("failed to read generated wav");
    tags.title = Some(title.to_string());
    tags.album = Some(album.to_string());
    tags.year = Some(year);
    tags.track_number = Some(track_number.to_string());
    tags.disc_number = Some("1".to_string());
    tags.genre = genres.iter().map(|s| s.to_string()).collect();
    tags.label = labels.iter().map(|s| s.to_string()).collect();
    tags.release_type = "album".to_string();
    tags.artists = Artists { main: vec![artist.to_string()], ..Default::default() };
    tags.album_artists = Artists { main: vec![artist.to_string()], ..Default::default() };
    if let Some((track_id, release_id)) = ids {
        tags.id = Some(track_id.to_string());
        tags.release_id = Some(release_id.to_string());
    }
    tags.flush(c).expect("failed to write tags to generated wav");
}

/// Test Release 1: two untagged-ID tracks by BLACKPINK. The indexer assigns IDs on first scan.
pub fn create_test_release_1(c: &Config) {
    let dir = c.music_source_dir.join("Test Release 1");
    fs::create_dir_all(&dir).unwrap();
    write_track(c, &dir.join("01.wav"), "Track 1", "I Love Blackpink", "BLACKPINK", &["K-Pop", "Pop"], &["A Cool Label"], 1990, "1", None);
    write_track(c, &dir.join("02.wav"), "Track 2", "I Love Blackpink", "BLACKPINK", &["K-Pop", "Pop"], &["A Cool Label"], 1990, "2", None);
}

/// Test Release 2: pre-seeded stable identifiers, for tests that reference hardcoded IDs.
pub fn create_test_release_2(c: &Config) {
    let dir = c.music_source_dir.join("Test Release 2");
    fs::create_dir_all(&dir).unwrap();
    fs::write(
        dir.join(".rose.ilovecarly.toml"),
        "new = false\nadded_at = \"2021-04-20T00:00:00+00:00\"\n",
    )
    .unwrap();
    write_track(c, &dir.join("01.wav"), "Track 1", "I Love Carly", "Carly Rae Jepsen", &["Dream Pop", "Pop"], &["A Cool Label"], 1990, "1", Some(("iloveloona", "ilovecarly")));
    write_track(c, &dir.join("02.wav"), "Track 2", "I Love Carly", "Carly Rae Jepsen", &["Dream Pop", "Pop"], &["A Cool Label"], 1990, "2", Some(("ilovetwice", "ilovecarly")));
}

/// Test Release 3: pre-seeded identifiers for the second collage member.
pub fn create_test_release_3(c: &Config) {
    let dir = c.music_source_dir.join("Test Release 3");
    fs::create_dir_all(&dir).unwrap();
    fs::write(
        dir.join(".rose.ilovenewjeans.toml"),
        "new = false\nadded_at = \"2021-06-01T00:00:00+00:00\"\n",
    )
    .unwrap();
    write_track(c, &dir.join("01.wav"), "Track 1", "I Love NewJeans", "NewJeans", &["K-Pop", "R&B"], &["A Cool Label"], 1990, "1", Some(("ilovenj1", "ilovenewjeans")));
}

pub fn create_test_collage_1(c: &Config) {
    let dir = c.music_source_dir.join("!collages");
    fs::create_dir_all(&dir).unwrap();
    fs::write(
        dir.join("Rose Gold.toml"),
        r#"[[releases]]
uuid = "ilovecarly"
description_meta = "lalala"

[[releases]]
uuid = "ilovenewjeans"
description_meta = "hahaha"
"#,
    )
    .unwrap();
}

pub fn create_test_playlist_1(c: &Config) {
    let dir = c.music_source_dir.join("!playlists");
    fs::create_dir_all(&dir).unwrap();
    fs::write(
        dir.join("Lala Lisa.toml"),
        r#"[[tracks]]
uuid = "iloveloona"
description_meta = "lalala"

[[tracks]]
uuid = "ilovetwice"
description_meta = "hahaha"
"#,
    )
    .unwrap();
    fs::write(dir.join("Lala Lisa.jpg"), "").unwrap();
}

/// A fully indexed source directory with two ID-stable releases, a collage, and a playlist.
pub fn source_dir() -> (Config, TempDir) {
    let (config, temp_dir) = config();
    create_test_release_2(&config);
    create_test_release_3(&config);
    create_test_collage_1(&config);
    create_test_playlist_1(&config);
    crate::cache_update::update_cache(&config, false, false).expect("failed to update cache");
    (config, temp_dir)
}

/// A cache seeded with fake rows. The referenced files mostly do not exist on disk.
pub fn seeded_cache() -> (Config, TempDir) {
    let (config, temp_dir) = config();
    let source = config.music_source_dir.clone();
    let conn = connect(&config).unwrap();

    let sql = format!(
        r#"
INSERT INTO releases
       (id  , source_path   , cover_image_path, added_at                   , datafile_mtime, virtual_dirname, title      , release_type, release_year, multidisc, new  , formatted_artists)
VALUES ('r1', '{src}/r1'    , null            , '0000-01-01T00:00:00+00:00', '999'         , 'r1'           , 'Release 1', 'album'     , 2023        , false    , false, 'Techno Man;Bass Man')
     , ('r2', '{src}/r2'    , '{src}/r2/cover.jpg', '0000-01-01T00:00:00+00:00', '999'     , 'r2'           , 'Release 2', 'album'     , 2021        , false    , false, 'Violin Woman feat. Conductor Woman')
     , ('r3', '{src}/r3'    , null            , '0000-01-01T00:00:00+00:00', '999'         , '{{NEW}} r3'   , 'Release 3', 'album'     , 2021        , false    , true , '');

INSERT INTO releases_genres
       (release_id, genre       , genre_sanitized)
VALUES ('r1'      , 'Techno'    , 'Techno')
     , ('r1'      , 'Deep House', 'Deep House')
     , ('r2'      , 'Classical' , 'Classical');

INSERT INTO releases_labels
       (release_id, label         , label_sanitized)
VALUES ('r1'      , 'Silk Music'  , 'Silk Music')
     , ('r2'      , 'Native State', 'Native State');

INSERT INTO releases_artists
       (release_id, artist           , artist_sanitized , role   , alias)
VALUES ('r1'      , 'Techno Man'     , 'Techno Man'     , 'main' , false)
     , ('r1'      , 'Bass Man'       , 'Bass Man'       , 'main' , false)
     , ('r2'      , 'Violin Woman'   , 'Violin Woman'   , 'main' , false)
     , ('r2'      , 'Conductor Woman', 'Conductor Woman', 'guest', false);

INSERT INTO tracks
       (id  , source_path      , source_mtime, virtual_filename, title    , release_id, track_number, disc_number, formatted_release_position, duration_seconds, formatted_artists)
VALUES ('t1', '{src}/r1/01.m4a', '999'       , '01.m4a'        , 'Track 1', 'r1'      , '01'        , '01'       , '01'                      , 120             , 'Techno Man;Bass Man')
     , ('t2', '{src}/r1/02.m4a', '999'       , '02.m4a'        , 'Track 2', 'r1'      , '02'        , '01'       , '02'                      , 240             , 'Techno Man;Bass Man')
     , ('t3', '{src}/r2/01.m4a', '999'       , '01.m4a'        , 'Track 1', 'r2'      , '01'        , '01'       , '01'                      , 120             , 'Violin Woman feat. Conductor Woman');

INSERT INTO tracks_artists
       (track_id, artist           , artist_sanitized , role   , alias)
VALUES ('t1'    , 'Techno Man'     , 'Techno Man'     , 'main' , false)
     , ('t1'    , 'Bass Man'       , 'Bass Man'       , 'main' , false)
     , ('t2'    , 'Techno Man'     , 'Techno Man'     , 'main' , false)
     , ('t2'    , 'Bass Man'       , 'Bass Man'       , 'main' , false)
     , ('t3'    , 'Violin Woman'   , 'Violin Woman'   , 'main' , false)
     , ('t3'    , 'Conductor Woman', 'Conductor Woman', 'guest', false);

INSERT INTO collages
       (name       , source_mtime)
VALUES ('Rose Gold', '999')
     , ('Ruby Red' , '999');

INSERT INTO collages_releases
       (collage_name, release_id, position, missing)
VALUES ('Rose Gold' , 'r1'      , 1       , false)
     , ('Rose Gold' , 'r2'      , 2       , false);

INSERT INTO playlists
       (name           , source_mtime, cover_path)
VALUES ('Lala Lisa'    , '999'       , '{src}/!playlists/Lala Lisa.jpg')
     , ('Turtle Rabbit', '999'       , null);

INSERT INTO playlists_tracks
       (playlist_name, track_id, position, missing)
VALUES ('Lala Lisa'  , 't1'    , 1       , false)
     , ('Lala Lisa'  , 't3'    , 2       , false);
"#,
        src = source.display(),
    );
    conn.execute_batch(&sql).expect("failed to seed test cache");

    fs::create_dir_all(source.join("!playlists")).unwrap();
    fs::write(source.join("!playlists").join("Lala Lisa.jpg"), "").unwrap();
    for r in ["r1", "r2", "r3"] {
        fs::create_dir_all(source.join(r)).unwrap();
    }
    fs::write(source.join("r2").join("cover.jpg"), "").unwrap();

    (config, temp_dir)
}
