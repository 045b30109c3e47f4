use std::fs;
use std::path::PathBuf;

use walkdir::WalkDir;

use crate::audiotags::AudioTags;
use crate::cache::connect;
use crate::cache_update::{
    update_cache, update_cache_evict_nonexistent_releases, update_cache_for_collages, update_cache_for_releases,
};
use crate::config::Config;
use crate::datafiles::STORED_DATA_FILE_REGEX;
use crate::testing;

fn release_count(c: &Config) -> i64 {
    let conn = connect(c).unwrap();
    conn.query_row("SELECT COUNT(*) FROM releases", [], |row| row.get(0)).unwrap()
}

fn track_count(c: &Config) -> i64 {
    let conn = connect(c).unwrap();
    conn.query_row("SELECT COUNT(*) FROM tracks", [], |row| row.get(0)).unwrap()
}

fn find_datafile_id(dir: &std::path::Path) -> Option<String> {
    for entry in fs::read_dir(dir).unwrap() {
        let name = entry.unwrap().file_name();
        if let Some(m) = STORED_DATA_FILE_REGEX.captures(&name.to_string_lossy()) {
            return Some(m[1].to_string());
        }
    }
    None
}

#[test]
fn test_update_cache_all() {
    let (config, _temp) = testing::config();
    testing::create_test_release_1(&config);
    testing::create_test_release_2(&config);

    // A pre-seeded nonexistent release is pruned by the full update.
    {
        let conn = connect(&config).unwrap();
        conn.execute(
            "INSERT INTO releases (id, source_path, added_at, datafile_mtime, virtual_dirname, title, release_type, multidisc, new, formatted_artists)
             VALUES ('aaaaaa', '/nonexistent', '0000-01-01T00:00:00+00:00', '999', 'nonexistent', 'aa', 'unknown', false, false, 'aa')",
            [],
        )
        .unwrap();
    }

    update_cache(&config, false, false).unwrap();
    assert_eq!(release_count(&config), 2);
    assert_eq!(track_count(&config), 4);
}

#[test]
fn test_update_cache_multiprocessing() {
    let (config, _temp) = testing::config();
    testing::create_test_release_1(&config);
    testing::create_test_release_2(&config);
    update_cache_for_releases(&config, None, false, true).unwrap();
    assert_eq!(release_count(&config), 2);
    assert_eq!(track_count(&config), 4);
}

#[test]
fn test_update_cache_releases() {
    let (config, _temp) = testing::config();
    testing::create_test_release_1(&config);
    let release_dir = config.music_source_dir.join("Test Release 1");
    update_cache_for_releases(&config, Some(vec![release_dir.clone()]), false, false).unwrap();

    // The release directory was given an ID.
    let release_id = find_datafile_id(&release_dir).expect("no datafile created");

    let conn = connect(&config).unwrap();
    let (source_path, title, release_type, release_year, new): (String, String, String, i32, bool) = conn
        .query_row(
            "SELECT source_path, title, release_type, release_year, new FROM releases WHERE id = ?1",
            [&release_id],
            |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?, row.get(4)?)),
        )
        .unwrap();
    assert_eq!(source_path, release_dir.to_string_lossy());
    assert_eq!(title, "I Love Blackpink");
    assert_eq!(release_type, "album");
    assert_eq!(release_year, 1990);
    assert!(new);

    let mut stmt = conn.prepare("SELECT genre FROM releases_genres WHERE release_id = ?1").unwrap();
    let mut genres: Vec<String> =
        stmt.query_map([&release_id], |row| row.get(0)).unwrap().collect::<Result<_, _>>().unwrap();
    genres.sort();
    assert_eq!(genres, vec!["K-Pop", "Pop"]);

    let mut stmt = conn.prepare("SELECT label FROM releases_labels WHERE release_id = ?1").unwrap();
    let labels: Vec<String> =
        stmt.query_map([&release_id], |row| row.get(0)).unwrap().collect::<Result<_, _>>().unwrap();
    assert_eq!(labels, vec!["A Cool Label"]);

    let mut stmt = conn.prepare("SELECT artist, role FROM releases_artists WHERE release_id = ?1").unwrap();
    let artists: Vec<(String, String)> = stmt
        .query_map([&release_id], |row| Ok((row.get(0)?, row.get(1)?)))
        .unwrap()
        .collect::<Result<_, _>>()
        .unwrap();
    assert_eq!(artists, vec![("BLACKPINK".to_string(), "main".to_string())]);

    let mut stmt = conn
        .prepare("SELECT title, disc_number, duration_seconds FROM tracks WHERE release_id = ?1 ORDER BY track_number")
        .unwrap();
    let tracks: Vec<(String, String, i64)> = stmt
        .query_map([&release_id], |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)))
        .unwrap()
        .collect::<Result<_, _>>()
        .unwrap();
    assert_eq!(tracks.len(), 2);
    assert!(tracks[0].0.starts_with("Track"));
    assert_eq!(tracks[0].1, "1");
    assert_eq!(tracks[0].2, 2);
}

#[test]
fn test_update_cache_releases_virtual_dirname_collisions() {
    // Equivalent releases receive [2], [3] suffixes in insertion order.
    let (config, _temp) = testing::config();
    testing::create_test_release_1(&config);
    let src = config.music_source_dir.clone();
    for d in ["d1", "d2", "d3"] {
        fs::create_dir_all(src.join(d)).unwrap();
        for f in ["01.wav", "02.wav"] {
            fs::copy(src.join("Test Release 1").join(f), src.join(d).join(f)).unwrap();
        }
    }
    fs::remove_dir_all(src.join("Test Release 1")).unwrap();
    update_cache_for_releases(&config, None, false, false).unwrap();

    let conn = connect(&config).unwrap();
    let mut stmt = conn.prepare("SELECT id, virtual_dirname FROM releases").unwrap();
    let rows: Vec<(String, String)> =
        stmt.query_map([], |row| Ok((row.get(0)?, row.get(1)?))).unwrap().collect::<Result<_, _>>().unwrap();
    assert_eq!(rows.iter().map(|(id, _)| id.clone()).collect::<std::collections::HashSet<_>>().len(), 3);
    let dirnames: std::collections::HashSet<String> = rows.into_iter().map(|(_, d)| d).collect();
    assert_eq!(
        dirnames,
        [
            "{NEW} BLACKPINK - 1990. I Love Blackpink [K-Pop;Pop]".to_string(),
            "{NEW} BLACKPINK - 1990. I Love Blackpink [K-Pop;Pop] [2]".to_string(),
            "{NEW} BLACKPINK - 1990. I Love Blackpink [K-Pop;Pop] [3]".to_string(),
        ]
        .into_iter()
        .collect()
    );
}

#[test]
fn test_update_cache_releases_uncached_with_existing_id() {
    // IDs in datafile filenames are read and preserved.
    let (config, _temp) = testing::config();
    testing::create_test_release_2(&config);
    let release_dir = config.music_source_dir.join("Test Release 2");
    update_cache_for_releases(&config, Some(vec![release_dir.clone()]), false, false).unwrap();
    assert_eq!(find_datafile_id(&release_dir).as_deref(), Some("ilovecarly"));
    let conn = connect(&config).unwrap();
    let exists: bool =
        conn.query_row("SELECT EXISTS(SELECT * FROM releases WHERE id = 'ilovecarly')", [], |row| row.get(0)).unwrap();
    assert!(exists);
}

#[test]
fn test_update_cache_releases_preserves_track_ids_across_rebuilds() {
    let (config, _temp) = testing::config();
    testing::create_test_release_1(&config);
    let release_dir = config.music_source_dir.join("Test Release 1");
    update_cache_for_releases(&config, Some(vec![release_dir.clone()]), false, false).unwrap();
    let conn = connect(&config).unwrap();
    let mut stmt = conn.prepare("SELECT id FROM tracks").unwrap();
    let first_ids: std::collections::HashSet<String> =
        stmt.query_map([], |row| row.get(0)).unwrap().collect::<Result<_, _>>().unwrap();
    drop(stmt);
    drop(conn);

    // Nuke the database and repopulate.
    fs::remove_file(config.cache_database_path()).unwrap();
    crate::cache::migrate_database(&config).unwrap();
    update_cache_for_releases(&config, Some(vec![release_dir]), false, false).unwrap();

    let conn = connect(&config).unwrap();
    let mut stmt = conn.prepare("SELECT id FROM tracks").unwrap();
    let second_ids: std::collections::HashSet<String> =
        stmt.query_map([], |row| row.get(0)).unwrap().collect::<Result<_, _>>().unwrap();
    assert_eq!(first_ids, second_ids);
    assert!(!second_ids.is_empty());
}

#[test]
fn test_update_cache_releases_writes_ids_to_tags() {
    let (config, _temp) = testing::config();
    testing::create_test_release_1(&config);
    let release_dir = config.music_source_dir.join("Test Release 1");

    let af = AudioTags::from_file(&release_dir.join("01.wav")).unwrap();
    assert!(af.id.is_none());
    assert!(af.release_id.is_none());

    update_cache_for_releases(&config, Some(vec![release_dir.clone()]), false, false).unwrap();

    let af = AudioTags::from_file(&release_dir.join("01.wav")).unwrap();
    assert!(af.id.is_some());
    assert!(af.release_id.is_some());
    let af = AudioTags::from_file(&release_dir.join("02.wav")).unwrap();
    assert!(af.id.is_some());
    assert!(af.release_id.is_some());
}

#[test]
fn test_update_cache_is_idempotent() {
    // A second run on identical inputs writes nothing to source files or sidecars.
    let (config, _temp) = testing::config();
    testing::create_test_release_1(&config);
    testing::create_test_release_2(&config);
    testing::create_test_collage_1(&config);
    testing::create_test_playlist_1(&config);
    update_cache(&config, false, false).unwrap();

    let mtimes = |root: &PathBuf| -> Vec<(PathBuf, std::time::SystemTime)> {
        let mut rv: Vec<(PathBuf, std::time::SystemTime)> = WalkDir::new(root)
            .into_iter()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_type().is_file())
            .map(|e| (e.path().to_path_buf(), e.metadata().unwrap().modified().unwrap()))
            .collect();
        rv.sort();
        rv
    };
    let before = mtimes(&config.music_source_dir);
    update_cache(&config, false, false).unwrap();
    let after = mtimes(&config.music_source_dir);
    assert_eq!(before, after);
}

#[test]
fn test_update_cache_releases_source_path_renamed() {
    // A renamed directory keeps the same release ID.
    let (config, _temp) = testing::config();
    testing::create_test_release_2(&config);
    update_cache(&config, false, false).unwrap();

    let moved = config.music_source_dir.join("moved lol");
    fs::rename(config.music_source_dir.join("Test Release 2"), &moved).unwrap();
    update_cache(&config, false, false).unwrap();

    let conn = connect(&config).unwrap();
    let (id, source_path): (String, String) =
        conn.query_row("SELECT id, source_path FROM releases", [], |row| Ok((row.get(0)?, row.get(1)?))).unwrap();
    assert_eq!(id, "ilovecarly");
    assert_eq!(source_path, moved.to_string_lossy());
    assert_eq!(release_count(&config), 1);
}

#[test]
fn test_update_cache_releases_delete_nonexistent() {
    let (config, _temp) = testing::config();
    {
        let conn = connect(&config).unwrap();
        conn.execute(
            "INSERT INTO releases (id, source_path, added_at, datafile_mtime, virtual_dirname, title, release_type, multidisc, new, formatted_artists)
             VALUES ('aaaaaa', '/nonexistent', '0000-01-01T00:00:00+00:00', '999', 'nonexistent', 'aa', 'unknown', false, false, 'aa')",
            [],
        )
        .unwrap();
    }
    update_cache_evict_nonexistent_releases(&config).unwrap();
    assert_eq!(release_count(&config), 0);
}

#[test]
fn test_update_cache_releases_skips_empty_directory() {
    let (config, _temp) = testing::config();
    let rd = config.music_source_dir.join("lalala");
    fs::create_dir_all(&rd).unwrap();
    fs::write(rd.join("ignoreme.file"), "").unwrap();
    update_cache_for_releases(&config, Some(vec![rd]), false, false).unwrap();
    assert_eq!(release_count(&config), 0);
}

#[test]
fn test_update_cache_releases_uncaches_empty_directory() {
    let (config, _temp) = testing::config();
    testing::create_test_release_1(&config);
    let release_dir = config.music_source_dir.join("Test Release 1");
    update_cache_for_releases(&config, Some(vec![release_dir.clone()]), false, false).unwrap();
    assert_eq!(release_count(&config), 1);
    fs::remove_dir_all(&release_dir).unwrap();
    fs::create_dir_all(&release_dir).unwrap();
    update_cache_for_releases(&config, Some(vec![release_dir]), false, false).unwrap();
    assert_eq!(release_count(&config), 0);
}

#[test]
fn test_update_cache_releases_ignores_directories() {
    let (config, temp) = testing::config();
    let config = Config {
        ignore_release_directories: vec!["Test Release 1".to_string()],
        ..config
    };
    testing::create_test_release_1(&config);
    update_cache_for_releases(&config, None, false, false).unwrap();
    assert_eq!(release_count(&config), 0);
    drop(temp);
}

#[test]
fn test_update_cache_releases_ignores_partially_written_directory() {
    let (config, _temp) = testing::config();
    testing::create_test_release_1(&config);
    update_cache(&config, false, false).unwrap();
    assert_eq!(release_count(&config), 1);

    // Rename the directory and hide the datafile: the tags still carry the release ID, so the
    // directory reads as mid-copy and is skipped.
    let renamed = config.music_source_dir.join("lalala");
    fs::rename(config.music_source_dir.join("Test Release 1"), &renamed).unwrap();
    let datafile_name = format!(".rose.{}.toml", find_datafile_id(&renamed).unwrap());
    fs::rename(renamed.join(&datafile_name), renamed.join("tmp")).unwrap();
    update_cache(&config, false, false).unwrap();
    assert_eq!(release_count(&config), 0);

    // Putting the datafile back re-indexes the release.
    fs::rename(renamed.join("tmp"), renamed.join(&datafile_name)).unwrap();
    update_cache(&config, false, false).unwrap();
    assert_eq!(release_count(&config), 1);

    // Rename again and remove the datafile outright; the stale row is evicted and the new
    // location stays unindexed.
    let renamed_again = config.music_source_dir.join("bahaha");
    fs::rename(&renamed, &renamed_again).unwrap();
    fs::remove_file(renamed_again.join(&datafile_name)).unwrap();
    update_cache(&config, false, false).unwrap();
    assert_eq!(release_count(&config), 0);

    // Force recreates the datafile, preserving the ID the tags remember.
    update_cache(&config, true, false).unwrap();
    assert!(renamed_again.join(&datafile_name).is_file());
    assert_eq!(release_count(&config), 1);
}

#[test]
fn test_update_cache_releases_adds_aliased_artist() {
    let (config, temp) = testing::config();
    let config = Config::parse_str(&format!(
        r#"
music_source_dir = "{}"
fuse_mount_dir = "{}"
cache_dir = "{}"

[[artist_aliases]]
artist = "BLACKPINK GROUP"
aliases = ["BLACKPINK"]
"#,
        config.music_source_dir.display(),
        config.fuse_mount_dir.display(),
        config.cache_dir.display(),
    ))
    .unwrap();
    crate::cache::migrate_database(&config).unwrap();
    testing::create_test_release_1(&config);
    update_cache_for_releases(&config, None, false, false).unwrap();

    let conn = connect(&config).unwrap();
    let mut stmt = conn.prepare("SELECT artist, role, alias FROM releases_artists").unwrap();
    let artists: std::collections::HashSet<(String, String, bool)> = stmt
        .query_map([], |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)))
        .unwrap()
        .collect::<Result<_, _>>()
        .unwrap();
    assert_eq!(
        artists,
        [
            ("BLACKPINK".to_string(), "main".to_string(), false),
            ("BLACKPINK GROUP".to_string(), "main".to_string(), true),
        ]
        .into_iter()
        .collect()
    );
    drop(temp);
}

#[test]
fn test_update_cache_releases_updates_full_text_search() {
    let (config, _temp) = testing::config();
    testing::create_test_release_1(&config);
    let release_dir = config.music_source_dir.join("Test Release 1");
    update_cache_for_releases(&config, Some(vec![release_dir.clone()]), false, false).unwrap();

    let query = r#"
        SELECT t.source_path
        FROM rules_engine_fts
        JOIN tracks t ON t.rowid = rules_engine_fts.rowid
        WHERE rules_engine_fts MATCH 'tracktitle : "r a c k"'
    "#;
    let fetch = |c: &Config| -> std::collections::HashSet<PathBuf> {
        let conn = connect(c).unwrap();
        let mut stmt = conn.prepare(query).unwrap();
        stmt.query_map([], |row| row.get::<_, String>(0))
            .unwrap()
            .collect::<Result<Vec<_>, _>>()
            .unwrap()
            .into_iter()
            .map(PathBuf::from)
            .collect()
    };
    let expected: std::collections::HashSet<PathBuf> =
        [release_dir.join("01.wav"), release_dir.join("02.wav")].into_iter().collect();
    assert_eq!(fetch(&config), expected);

    // The DELETE+INSERT on a forced rescan keeps the index queryable.
    update_cache_for_releases(&config, Some(vec![release_dir]), true, false).unwrap();
    assert_eq!(fetch(&config), expected);
}

#[test]
fn test_update_cache_collages() {
    let (config, _temp) = testing::config();
    testing::create_test_release_2(&config);
    testing::create_test_collage_1(&config);
    update_cache(&config, false, false).unwrap();

    let conn = connect(&config).unwrap();
    let (name, source_mtime): (String, String) =
        conn.query_row("SELECT name, source_mtime FROM collages", [], |row| Ok((row.get(0)?, row.get(1)?))).unwrap();
    assert_eq!(name, "Rose Gold");
    assert!(!source_mtime.is_empty());

    let mut stmt = conn
        .prepare("SELECT release_id, position, missing FROM collages_releases ORDER BY position")
        .unwrap();
    let rows: Vec<(String, i64, bool)> = stmt
        .query_map([], |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)))
        .unwrap()
        .collect::<Result<_, _>>()
        .unwrap();
    assert_eq!(rows.len(), 2);
    assert_eq!(rows[0], ("ilovecarly".to_string(), 1, false));
    // Test Release 3 is not in the library, so its entry is missing.
    assert_eq!(rows[1], ("ilovenewjeans".to_string(), 2, true));
}

#[test]
fn test_update_cache_collages_missing_release_id_round_trip() {
    let (config, _temp) = testing::config();
    testing::create_test_collage_1(&config);
    update_cache(&config, false, false).unwrap();

    // Both entries read as missing, in the database and in the file.
    let conn = connect(&config).unwrap();
    let missing: i64 =
        conn.query_row("SELECT COUNT(*) FROM collages_releases WHERE missing", [], |row| row.get(0)).unwrap();
    assert_eq!(missing, 2);
    drop(conn);
    let contents = fs::read_to_string(config.music_source_dir.join("!collages").join("Rose Gold.toml")).unwrap();
    assert_eq!(contents.matches("missing = true").count(), 2);

    // Copying the releases in clears the flags.
    testing::create_test_release_2(&config);
    testing::create_test_release_3(&config);
    update_cache(&config, false, false).unwrap();
    let conn = connect(&config).unwrap();
    let not_missing: i64 =
        conn.query_row("SELECT COUNT(*) FROM collages_releases WHERE NOT missing", [], |row| row.get(0)).unwrap();
    assert_eq!(not_missing, 2);
    drop(conn);
    let contents = fs::read_to_string(config.music_source_dir.join("!collages").join("Rose Gold.toml")).unwrap();
    assert!(!contents.contains("missing = true"));
}

#[test]
fn test_update_cache_collages_rewrites_description_meta() {
    let (config, _temp) = testing::config();
    testing::create_test_release_2(&config);
    testing::create_test_release_3(&config);
    testing::create_test_collage_1(&config);
    update_cache(&config, false, false).unwrap();

    let contents = fs::read_to_string(config.music_source_dir.join("!collages").join("Rose Gold.toml")).unwrap();
    assert!(contents.contains(r#"description_meta = "Carly Rae Jepsen - 1990. I Love Carly [Dream Pop;Pop]""#));
    assert!(contents.contains(r#"description_meta = "NewJeans - 1990. I Love NewJeans [K-Pop;R&B]""#));
    assert!(!contents.contains("lalala"));
}

#[test]
fn test_update_cache_collages_on_release_rename() {
    // A renamed release directory stays in its collages: the stable ID re-associates it.
    let (config, _temp) = testing::config();
    testing::create_test_release_2(&config);
    testing::create_test_release_3(&config);
    testing::create_test_collage_1(&config);
    update_cache(&config, false, false).unwrap();

    fs::rename(config.music_source_dir.join("Test Release 2"), config.music_source_dir.join("lalala")).unwrap();
    update_cache(&config, false, false).unwrap();

    let conn = connect(&config).unwrap();
    let mut stmt = conn
        .prepare("SELECT release_id, position, missing FROM collages_releases ORDER BY position")
        .unwrap();
    let rows: Vec<(String, i64, bool)> = stmt
        .query_map([], |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)))
        .unwrap()
        .collect::<Result<_, _>>()
        .unwrap();
    assert_eq!(rows, vec![("ilovecarly".to_string(), 1, false), ("ilovenewjeans".to_string(), 2, false)]);
}

#[test]
fn test_update_cache_playlists() {
    let (config, _temp) = testing::config();
    testing::create_test_release_2(&config);
    testing::create_test_playlist_1(&config);
    update_cache(&config, false, false).unwrap();

    let conn = connect(&config).unwrap();
    let (name, cover_path): (String, Option<String>) = conn
        .query_row("SELECT name, cover_path FROM playlists", [], |row| Ok((row.get(0)?, row.get(1)?)))
        .unwrap();
    assert_eq!(name, "Lala Lisa");
    assert_eq!(
        cover_path.as_deref(),
        Some(config.music_source_dir.join("!playlists").join("Lala Lisa.jpg").to_string_lossy().as_ref())
    );

    let mut stmt =
        conn.prepare("SELECT track_id, position, missing FROM playlists_tracks ORDER BY position").unwrap();
    let rows: Vec<(String, i64, bool)> = stmt
        .query_map([], |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)))
        .unwrap()
        .collect::<Result<_, _>>()
        .unwrap();
    assert_eq!(rows, vec![("iloveloona".to_string(), 1, false), ("ilovetwice".to_string(), 2, false)]);

    // The playlist file is rewritten into the inline form with live description_meta.
    let contents = fs::read_to_string(config.music_source_dir.join("!playlists").join("Lala Lisa.toml")).unwrap();
    assert!(contents.starts_with("tracks = [\n"));
    assert!(contents.contains("Carly Rae Jepsen - Track 1.wav"));
}

#[test]
fn test_update_cache_playlists_missing_track_id_round_trip() {
    let (config, _temp) = testing::config();
    testing::create_test_playlist_1(&config);
    update_cache(&config, false, false).unwrap();

    let conn = connect(&config).unwrap();
    let missing: i64 =
        conn.query_row("SELECT COUNT(*) FROM playlists_tracks WHERE missing", [], |row| row.get(0)).unwrap();
    assert_eq!(missing, 2);
    drop(conn);

    testing::create_test_release_2(&config);
    update_cache(&config, false, false).unwrap();
    let conn = connect(&config).unwrap();
    let not_missing: i64 =
        conn.query_row("SELECT COUNT(*) FROM playlists_tracks WHERE NOT missing", [], |row| row.get(0)).unwrap();
    assert_eq!(not_missing, 2);
    drop(conn);
    let contents = fs::read_to_string(config.music_source_dir.join("!playlists").join("Lala Lisa.toml")).unwrap();
    assert!(!contents.contains("missing = true"));
}

#[test]
fn test_update_cache_evicts_deleted_collages_and_playlists() {
    let (config, _temp) = testing::config();
    testing::create_test_collage_1(&config);
    testing::create_test_playlist_1(&config);
    update_cache(&config, false, false).unwrap();
    {
        let conn = connect(&config).unwrap();
        let collages: i64 = conn.query_row("SELECT COUNT(*) FROM collages", [], |row| row.get(0)).unwrap();
        let playlists: i64 = conn.query_row("SELECT COUNT(*) FROM playlists", [], |row| row.get(0)).unwrap();
        assert_eq!((collages, playlists), (1, 1));
    }
    fs::remove_file(config.music_source_dir.join("!collages").join("Rose Gold.toml")).unwrap();
    fs::remove_file(config.music_source_dir.join("!playlists").join("Lala Lisa.toml")).unwrap();
    update_cache(&config, false, false).unwrap();
    let conn = connect(&config).unwrap();
    let collages: i64 = conn.query_row("SELECT COUNT(*) FROM collages", [], |row| row.get(0)).unwrap();
    let playlists: i64 = conn.query_row("SELECT COUNT(*) FROM playlists", [], |row| row.get(0)).unwrap();
    assert_eq!((collages, playlists), (0, 0));
}

#[test]
fn test_update_cache_collages_evicts_relations_on_forced_rescan() {
    let (config, _temp) = testing::config();
    testing::create_test_release_2(&config);
    testing::create_test_collage_1(&config);
    update_cache(&config, false, false).unwrap();
    {
        let conn = connect(&config).unwrap();
        conn.execute(
            "INSERT INTO collages_releases (collage_name, release_id, position, missing)
             VALUES ('Rose Gold', 'fakefake', 99, false)",
            [],
        )
        .unwrap();
    }
    update_cache_for_collages(&config, None, true).unwrap();
    let conn = connect(&config).unwrap();
    let exists: bool = conn
        .query_row("SELECT EXISTS(SELECT * FROM collages_releases WHERE release_id = 'fakefake')", [], |row| row.get(0))
        .unwrap();
    assert!(!exists);
}
