use std::time::Instant;

use crate::cache::{
    artist_exists, collage_exists, connect, cover_exists, genre_exists, get_playlist, get_release,
    get_release_id_from_virtual_dirname, get_release_source_path_from_id, get_release_virtual_dirname_from_id,
    get_track, get_track_filename, label_exists, list_artists, list_collage_releases, list_collages, list_genres,
    list_labels, list_playlists, list_releases, lock, migrate_database, playlist_exists, process_string_for_fts,
    release_exists, release_lock_name, track_exists,
};
use crate::common::VERSION;
use crate::errors::{RoseError, RoseExpectedError};
use crate::testing;

#[test]
fn test_schema() {
    // The schema bootstraps and records its hashes.
    let (config, _temp) = testing::config();
    let conn = connect(&config).unwrap();
    let (schema_hash, config_hash, version): (String, String, String) = conn
        .query_row("SELECT schema_hash, config_hash, version FROM _schema_hash", [], |row| {
            Ok((row.get(0)?, row.get(1)?, row.get(2)?))
        })
        .unwrap();
    assert!(!schema_hash.is_empty());
    assert_eq!(config_hash, config.hash_for_cache());
    assert_eq!(version, VERSION);
}

#[test]
fn test_migration_recreates_on_mismatch() {
    let (config, _temp) = testing::config();
    {
        let conn = connect(&config).unwrap();
        conn.execute("DELETE FROM _schema_hash", []).unwrap();
        conn.execute(
            "INSERT INTO _schema_hash (schema_hash, config_hash, version) VALUES ('haha', 'lala', 'blabla')",
            [],
        )
        .unwrap();
    }
    migrate_database(&config).unwrap();
    let conn = connect(&config).unwrap();
    let (count, version): (i64, String) = conn
        .query_row("SELECT COUNT(*), MAX(version) FROM _schema_hash", [], |row| Ok((row.get(0)?, row.get(1)?)))
        .unwrap();
    assert_eq!(count, 1);
    assert_eq!(version, VERSION);
}

#[test]
fn test_locks() {
    let (config, _temp) = testing::config();
    let name = release_lock_name("lol");

    // A held lock blocks a second acquisition until released.
    let start = Instant::now();
    let guard = lock(&config, &name, 0.5).unwrap();
    assert!(start.elapsed().as_secs_f64() < 0.3);
    drop(guard);
    let start = Instant::now();
    let guard = lock(&config, &name, 0.5).unwrap();
    assert!(start.elapsed().as_secs_f64() < 0.3);
    drop(guard);

    // Holding the lock forces the second taker to wait out the lease.
    let start = Instant::now();
    let _guard = lock(&config, &name, 0.4).unwrap();
    let second = lock(&config, &name, 0.4);
    let waited = start.elapsed().as_secs_f64();
    match second {
        Ok(_) => assert!(waited > 0.3),
        Err(RoseError::Expected(RoseExpectedError::LockTimeout { .. })) => {}
        Err(e) => panic!("unexpected error: {e}"),
    }
}

#[test]
fn test_process_string_for_fts() {
    assert_eq!(process_string_for_fts("track"), "t r a c k");
    assert_eq!(process_string_for_fts(""), "");
}

#[test]
fn test_list_releases() {
    let (config, _temp) = testing::seeded_cache();
    let releases = list_releases(&config, None, None, None, None).unwrap();
    assert_eq!(releases.len(), 3);
    assert_eq!(releases[0].id, "r1");
    assert_eq!(releases[0].virtual_dirname, "r1");
    assert_eq!(releases[0].genres, vec!["Deep House", "Techno"]);
    assert_eq!(releases[0].labels, vec!["Silk Music"]);
    assert_eq!(releases[0].formatted_artists, "Techno Man;Bass Man");
    assert_eq!(releases[2].virtual_dirname, "{NEW} r3");

    let releases = list_releases(&config, Some("Techno Man"), None, None, None).unwrap();
    assert_eq!(releases.len(), 1);
    assert_eq!(releases[0].id, "r1");

    let releases = list_releases(&config, None, Some("Techno"), None, None).unwrap();
    assert_eq!(releases.len(), 1);
    assert_eq!(releases[0].id, "r1");

    let releases = list_releases(&config, None, None, Some("Silk Music"), None).unwrap();
    assert_eq!(releases.len(), 1);
    assert_eq!(releases[0].id, "r1");

    let releases = list_releases(&config, None, None, None, Some(true)).unwrap();
    assert_eq!(releases.len(), 1);
    assert_eq!(releases[0].id, "r3");
}

#[test]
fn test_get_release() {
    let (config, _temp) = testing::seeded_cache();
    let (release, tracks) = get_release(&config, "r1").unwrap().unwrap();
    assert_eq!(release.id, "r1");
    assert_eq!(release.title, "Release 1");
    assert_eq!(release.release_year, Some(2023));
    assert_eq!(tracks.len(), 2);
    assert_eq!(tracks[0].id, "t1");
    assert_eq!(tracks[0].virtual_filename, "01.m4a");
    assert_eq!(tracks[0].formatted_release_position, "01");
    assert_eq!(tracks[0].duration_seconds, 120);
    assert_eq!(tracks[0].artists.len(), 2);

    // Virtual dirnames resolve too.
    let (release, _) = get_release(&config, "{NEW} r3").unwrap().unwrap();
    assert_eq!(release.id, "r3");

    assert!(get_release(&config, "lalala").unwrap().is_none());
}

#[test]
fn test_get_track() {
    let (config, _temp) = testing::seeded_cache();
    let track = get_track(&config, "t1").unwrap().unwrap();
    assert_eq!(track.virtual_filename, "01.m4a");
    assert!(get_track(&config, "nope").unwrap().is_none());
}

#[test]
fn test_resolvers() {
    let (config, _temp) = testing::seeded_cache();
    assert_eq!(get_release_id_from_virtual_dirname(&config, "r1").unwrap().as_deref(), Some("r1"));
    assert_eq!(get_release_virtual_dirname_from_id(&config, "r1").unwrap().as_deref(), Some("r1"));
    assert!(get_release_source_path_from_id(&config, "r1").unwrap().unwrap().ends_with("source/r1"));
    assert_eq!(get_track_filename(&config, "t1").unwrap().as_deref(), Some("01.m4a"));
}

#[test]
fn test_list_artists_genres_labels() {
    let (config, _temp) = testing::seeded_cache();
    let artists: Vec<String> = list_artists(&config).unwrap().into_iter().map(|(a, _)| a).collect();
    assert_eq!(artists.len(), 4);
    assert!(artists.contains(&"Techno Man".to_string()));
    let genres: Vec<String> = list_genres(&config).unwrap().into_iter().map(|(g, _)| g).collect();
    assert!(genres.contains(&"Deep House".to_string()));
    let labels: Vec<String> = list_labels(&config).unwrap().into_iter().map(|(l, _)| l).collect();
    assert!(labels.contains(&"Native State".to_string()));
}

#[test]
fn test_list_collages_and_releases() {
    let (config, _temp) = testing::seeded_cache();
    assert_eq!(list_collages(&config).unwrap(), vec!["Rose Gold", "Ruby Red"]);
    let releases = list_collage_releases(&config, "Rose Gold").unwrap();
    assert_eq!(releases.len(), 2);
    assert_eq!(releases[0].0, 1);
    assert_eq!(releases[0].1.id, "r1");
    assert_eq!(releases[1].0, 2);
    assert_eq!(releases[1].1.id, "r2");
    assert!(list_collage_releases(&config, "Ruby Red").unwrap().is_empty());
}

#[test]
fn test_get_playlist() {
    let (config, _temp) = testing::seeded_cache();
    assert_eq!(list_playlists(&config).unwrap(), vec!["Lala Lisa", "Turtle Rabbit"]);
    let (playlist, tracks) = get_playlist(&config, "Lala Lisa").unwrap().unwrap();
    assert_eq!(playlist.name, "Lala Lisa");
    assert!(playlist.cover_path.is_some());
    assert_eq!(playlist.track_ids, vec!["t1", "t3"]);
    assert_eq!(tracks.len(), 2);
    assert_eq!(tracks[1].id, "t3");
    assert!(get_playlist(&config, "lalala").unwrap().is_none());
}

#[test]
fn test_existence_probes() {
    let (config, _temp) = testing::seeded_cache();
    assert!(release_exists(&config, "r1").unwrap().is_some());
    assert!(release_exists(&config, "lalala").unwrap().is_none());
    assert!(track_exists(&config, "r1", "01.m4a").unwrap().is_some());
    assert!(track_exists(&config, "r1", "lalala").unwrap().is_none());
    assert!(track_exists(&config, "lalala", "lalala").unwrap().is_none());
    assert!(cover_exists(&config, "r2", "cover.jpg").unwrap().is_some());
    assert!(cover_exists(&config, "r2", "cover.png").unwrap().is_none());
    assert!(cover_exists(&config, "r1", "cover.jpg").unwrap().is_none());
    assert!(artist_exists(&config, "Bass Man").unwrap());
    assert!(!artist_exists(&config, "lalala").unwrap());
    assert!(genre_exists(&config, "Deep House").unwrap());
    assert!(!genre_exists(&config, "lalala").unwrap());
    assert!(label_exists(&config, "Silk Music").unwrap());
    assert!(!label_exists(&config, "Cotton Music").unwrap());
    assert!(collage_exists(&config, "Rose Gold").unwrap());
    assert!(!collage_exists(&config, "lalala").unwrap());
    assert!(playlist_exists(&config, "Lala Lisa").unwrap());
    assert!(!playlist_exists(&config, "lalala").unwrap());
}
