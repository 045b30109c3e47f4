use crate::audiotags::{format_artist_string, is_supported_audio_path, parse_artist_string, Artists, AudioTags};
use crate::testing;

fn artists(main: &[&str]) -> Artists {
    Artists { main: main.iter().map(|s| s.to_string()).collect(), ..Default::default() }
}

#[test]
fn test_parse_artist_string_main_only() {
    let a = parse_artist_string(Some("A1;A2"));
    assert_eq!(a.main, vec!["A1", "A2"]);
    assert!(a.guest.is_empty());
}

#[test]
fn test_parse_artist_string_markers() {
    let a = parse_artist_string(Some("DJ pres. Comp performed by Main feat. Guest remixed by Rem produced by Prod"));
    assert_eq!(a.djmixer, vec!["DJ"]);
    assert_eq!(a.composer, vec!["Comp"]);
    assert_eq!(a.main, vec!["Main"]);
    assert_eq!(a.guest, vec!["Guest"]);
    assert_eq!(a.remixer, vec!["Rem"]);
    assert_eq!(a.producer, vec!["Prod"]);
}

#[test]
fn test_parse_artist_string_separators() {
    let a = parse_artist_string(Some("A / B; C vs. D"));
    assert_eq!(a.main, vec!["A", "B", "C", "D"]);
}

#[test]
fn test_format_artist_string_round_trip() {
    let a = Artists {
        main: vec!["Main".to_string()],
        guest: vec!["Guest".to_string()],
        remixer: vec!["Rem".to_string()],
        producer: vec!["Prod".to_string()],
        composer: vec!["Comp".to_string()],
        djmixer: vec!["DJ".to_string()],
    };
    assert_eq!(parse_artist_string(Some(&format_artist_string(&a))), a);
}

#[test]
fn test_format_artist_string_plain() {
    assert_eq!(format_artist_string(&artists(&["Techno Man", "Bass Man"])), "Techno Man;Bass Man");
}

#[test]
fn test_is_supported_audio_path() {
    use std::path::Path;
    assert!(is_supported_audio_path(Path::new("a/b.mp3")));
    assert!(is_supported_audio_path(Path::new("a/b.M4A")));
    assert!(is_supported_audio_path(Path::new("a/b.wav")));
    assert!(!is_supported_audio_path(Path::new("a/b.txt")));
    assert!(!is_supported_audio_path(Path::new("a/b")));
}

#[test]
fn test_audiotags_round_trip_on_wav() {
    let (config, temp_dir) = testing::config();
    let path = temp_dir.path().join("track.wav");
    testing::write_wav(&path, 2);

    let mut tags = AudioTags::from_file(&path).unwrap();
    assert!(tags.id.is_none());
    tags.id = Some("trackid".to_string());
    tags.release_id = Some("releaseid".to_string());
    tags.title = Some("Title".to_string());
    tags.album = Some("Album".to_string());
    tags.year = Some(1990);
    tags.track_number = Some("3".to_string());
    tags.disc_number = Some("1".to_string());
    tags.genre = vec!["K-Pop".to_string(), "Pop".to_string()];
    tags.label = vec!["A Cool Label".to_string()];
    tags.release_type = "Album".to_string();
    tags.artists = artists(&["BLACKPINK"]);
    tags.album_artists = artists(&["BLACKPINK"]);
    tags.flush(&config).unwrap();

    let read_back = AudioTags::from_file(&path).unwrap();
    assert_eq!(read_back.id.as_deref(), Some("trackid"));
    assert_eq!(read_back.release_id.as_deref(), Some("releaseid"));
    assert_eq!(read_back.title.as_deref(), Some("Title"));
    assert_eq!(read_back.album.as_deref(), Some("Album"));
    assert_eq!(read_back.year, Some(1990));
    assert_eq!(read_back.track_number.as_deref(), Some("3"));
    assert_eq!(read_back.disc_number.as_deref(), Some("1"));
    assert_eq!(read_back.genre, vec!["K-Pop", "Pop"]);
    assert_eq!(read_back.label, vec!["A Cool Label"]);
    // Release types are lowercased on write.
    assert_eq!(read_back.release_type, "album");
    assert_eq!(read_back.artists.main, vec!["BLACKPINK"]);
    assert_eq!(read_back.album_artists.main, vec!["BLACKPINK"]);
    assert_eq!(read_back.duration_sec, 2);
}

#[test]
fn test_audiotags_rejects_unsupported_filetype() {
    let (_config, temp_dir) = testing::config();
    let path = temp_dir.path().join("file.txt");
    std::fs::write(&path, "hello").unwrap();
    assert!(AudioTags::from_file(&path).is_err());
}
