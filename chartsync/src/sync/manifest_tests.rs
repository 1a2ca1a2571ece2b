use super::*;
use crate::sync::test_support::{FakeRemote, file, folder};
use std::time::Duration;
use tempfile::tempdir;

fn source(remote: FakeRemote) -> (Arc<FakeRemote>, ManifestSource<FakeRemote>) {
    let remote = Arc::new(remote);
    let source = ManifestSource::new(Arc::clone(&remote), "root", RetryPolicy::default());
    (remote, source)
}

#[tokio::test]
async fn walk_flattens_nested_folders_with_relative_paths() {
    let remote = FakeRemote::new()
        .with_folder(
            "root",
            vec![vec![folder("artist", "Artist"), file("r1", "readme.txt", b"hi")]],
        )
        .with_folder("artist", vec![vec![folder("song", "SongX")]])
        .with_folder(
            "song",
            vec![vec![
                file("f1", "notes.mid", b"mid"),
                file("f2", "song.ogg", b"ogg"),
            ]],
        );
    let (_, source) = source(remote);

    let entries = source.walk().await.unwrap();

    let flat: Vec<_> = entries
        .iter()
        .map(|e| (e.relative_path.as_str(), e.name.as_str(), e.remote_id.as_str()))
        .collect();
    assert_eq!(
        flat,
        vec![
            ("", "readme.txt", "r1"),
            ("Artist/SongX", "notes.mid", "f1"),
            ("Artist/SongX", "song.ogg", "f2"),
        ]
    );
    assert_eq!(entries[1].size, 3);
    assert!(entries[1].content_hash.is_some());
}

#[tokio::test]
async fn walk_follows_page_tokens_before_descending() {
    let remote = FakeRemote::new()
        .with_folder(
            "root",
            vec![
                vec![folder("a", "A"), file("1", "one.mid", b"1")],
                vec![file("2", "two.mid", b"2")],
            ],
        )
        .with_folder("a", vec![vec![file("3", "three.mid", b"3")]]);
    let (remote, source) = source(remote);

    let entries = source.walk().await.unwrap();

    let ids: Vec<_> = entries.iter().map(|e| e.remote_id.as_str()).collect();
    assert_eq!(ids, vec!["1", "2", "3"]);
    assert_eq!(remote.list_count(), 3);
}

#[tokio::test]
async fn walk_handles_very_deep_trees() {
    let depth = 2_000;
    let mut remote = FakeRemote::new();
    for level in 0..depth {
        let id = if level == 0 {
            "root".to_string()
        } else {
            format!("d{level}")
        };
        remote = remote.with_folder(&id, vec![vec![folder(&format!("d{}", level + 1), "x")]]);
    }
    remote = remote.with_folder(
        &format!("d{depth}"),
        vec![vec![file("leaf", "leaf.mid", b"leaf")]],
    );
    let (_, source) = source(remote);

    let entries = source.walk().await.unwrap();

    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0].relative_path.split('/').count(), depth);
}

#[tokio::test(start_paused = true)]
async fn walk_retries_transient_errors_at_fixed_interval() {
    let remote = FakeRemote::new()
        .with_folder("root", vec![vec![file("1", "one.mid", b"1")]])
        .fail_next_list(RemoteError::Unavailable("rate limited".into()))
        .fail_next_list(RemoteError::Unavailable("socket reset".into()));
    let (remote, source) = source(remote);

    let started = tokio::time::Instant::now();
    let entries = source.walk().await.unwrap();

    assert_eq!(entries.len(), 1);
    assert_eq!(remote.list_count(), 3);
    assert!(started.elapsed() >= Duration::from_secs(10));
    assert!(started.elapsed() < Duration::from_secs(15));
}

#[tokio::test]
async fn walk_fails_fast_on_fatal_errors() {
    let remote = FakeRemote::new()
        .with_folder("root", vec![vec![file("1", "one.mid", b"1")]])
        .fail_next_list(RemoteError::Rejected("unauthorized".into()));
    let (remote, source) = source(remote);

    let err = source.walk().await.unwrap_err();

    assert!(matches!(err, ManifestError::Remote(RemoteError::Rejected(_))));
    assert_eq!(remote.list_count(), 1);
}

#[tokio::test(start_paused = true)]
async fn capped_retries_give_up() {
    let remote = FakeRemote::new()
        .fail_next_list(RemoteError::Unavailable("1".into()))
        .fail_next_list(RemoteError::Unavailable("2".into()))
        .fail_next_list(RemoteError::Unavailable("3".into()));
    let remote = Arc::new(remote);
    let source = ManifestSource::new(
        Arc::clone(&remote),
        "root",
        RetryPolicy::fixed(Duration::from_secs(1)).with_max_attempts(2),
    );

    let err = source.walk().await.unwrap_err();

    assert!(matches!(
        err,
        ManifestError::RetriesExhausted { attempts: 2, .. }
    ));
    assert_eq!(remote.list_count(), 2);
}

const PUBLISHED: &[u8] = br#"{
    "info": {"nombre_proyecto": "Clone Hero Sync"},
    "archivos": [
        {"nombre": "a.mid", "ruta_relativa": "SongX", "id_drive": "f1", "hash": "abc", "tamano": "10"}
    ]
}"#;

#[tokio::test]
async fn fetch_published_downloads_and_keeps_a_local_copy() {
    let remote = FakeRemote::new()
        .with_folder(
            "root",
            vec![
                vec![folder("x", "master_songs.json"), file("r1", "readme.txt", b"hi")],
                vec![file("m1", "master_songs.json", PUBLISHED)],
            ],
        )
        .with_blob("m1", PUBLISHED);
    let (remote, source) = source(remote);
    let dir = tempdir().unwrap();
    let copy = dir.path().join("master_songs.json");

    let entries = source
        .fetch_published("master_songs.json", &copy)
        .await
        .unwrap();

    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0].remote_id, "f1");
    assert_eq!(std::fs::read(&copy).unwrap(), PUBLISHED);
    assert_eq!(remote.find_count(), 1);
    assert_eq!(remote.list_count(), 0);
}

#[tokio::test(start_paused = true)]
async fn manifest_lookup_retries_transient_errors() {
    let remote = FakeRemote::new()
        .with_folder("root", vec![vec![file("m1", "master_songs.json", PUBLISHED)]])
        .with_blob("m1", PUBLISHED)
        .fail_next_list(RemoteError::Unavailable("rate limited".into()));
    let (remote, source) = source(remote);
    let dir = tempdir().unwrap();

    let started = tokio::time::Instant::now();
    let entries = source
        .fetch_published("master_songs.json", &dir.path().join("master_songs.json"))
        .await
        .unwrap();

    assert_eq!(entries.len(), 1);
    assert_eq!(remote.find_count(), 2);
    assert_eq!(remote.list_count(), 0);
    assert!(started.elapsed() >= Duration::from_secs(5));
}

#[tokio::test]
async fn fetch_published_falls_back_to_local_copy() {
    let remote =
        FakeRemote::new().fail_next_list(RemoteError::Rejected("drive is unreachable".into()));
    let (_, source) = source(remote);
    let dir = tempdir().unwrap();
    let copy = dir.path().join("master_songs.json");
    std::fs::write(&copy, PUBLISHED).unwrap();

    let entries = source
        .fetch_published("master_songs.json", &copy)
        .await
        .unwrap();

    assert_eq!(entries[0].name, "a.mid");
}

#[tokio::test]
async fn fetch_published_without_any_copy_is_fatal() {
    let remote = FakeRemote::new().with_folder("root", vec![vec![]]);
    let (_, source) = source(remote);
    let dir = tempdir().unwrap();

    let err = source
        .fetch_published("master_songs.json", &dir.path().join("master_songs.json"))
        .await
        .unwrap_err();

    assert!(matches!(err, ManifestError::NotFound { .. }));
}

#[tokio::test]
async fn corrupt_download_keeps_previous_copy() {
    let remote = FakeRemote::new()
        .with_folder(
            "root",
            vec![vec![file("m1", "master_songs.json", b"{ broken")]],
        )
        .with_blob("m1", b"{ broken");
    let (_, source) = source(remote);
    let dir = tempdir().unwrap();
    let copy = dir.path().join("master_songs.json");
    std::fs::write(&copy, PUBLISHED).unwrap();

    let entries = source
        .fetch_published("master_songs.json", &copy)
        .await
        .unwrap();

    assert_eq!(entries.len(), 1);
    assert_eq!(std::fs::read(&copy).unwrap(), PUBLISHED);
}

#[tokio::test]
async fn corrupt_local_copy_counts_as_absent() {
    let remote = FakeRemote::new().fail_next_list(RemoteError::Rejected("offline".into()));
    let (_, source) = source(remote);
    let dir = tempdir().unwrap();
    let copy = dir.path().join("master_songs.json");
    std::fs::write(&copy, b"not json").unwrap();

    let err = source
        .fetch_published("master_songs.json", &copy)
        .await
        .unwrap_err();

    assert!(matches!(err, ManifestError::Remote(_)));
}

#[test]
fn entries_normalize_paths_and_blank_hashes() {
    let entry = ManifestEntry::new(
        "a.mid".into(),
        "Artist\\SongX\\",
        "1".into(),
        Some("  ".into()),
        10,
    );
    assert_eq!(entry.relative_path, "Artist/SongX");
    assert_eq!(entry.content_hash, None);
}
