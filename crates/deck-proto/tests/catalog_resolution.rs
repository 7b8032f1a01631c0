mod common;

use common::fakes::MemoryFetcher;
use deck_proto::catalog::{AlbumSource, PlaybackCatalog, TrackSource};
use deck_proto::config::CatalogConfig;
use deck_proto::error::CatalogError;

const LISTING: &str = r#"<html><body><ul>
  <li><a href="a.mp3">a.mp3</a></li>
  <li><a href="b.MP3">b.MP3</a></li>
  <li><a href="c.txt">c.txt</a></li>
</ul></body></html>"#;

fn catalog(fetcher: MemoryFetcher, directory_fallback: bool) -> PlaybackCatalog<MemoryFetcher> {
    let config = CatalogConfig {
        directory_fallback,
        ..CatalogConfig::default()
    };
    PlaybackCatalog::new(fetcher, config)
}

#[tokio::test]
async fn descriptor_tracks_are_returned_in_order() {
    let fetcher = MemoryFetcher::new().with(
        "songs/ncs/info.json",
        r#"{ "title": "NCS", "tracks": ["1.mp3", "2.mp3"] }"#,
    );
    let listing = catalog(fetcher, true).resolve_tracks("ncs").await;

    assert_eq!(listing.folder, "songs/ncs");
    assert_eq!(listing.tracks, vec!["1.mp3", "2.mp3"]);
    assert_eq!(listing.source, Some(TrackSource::Descriptor));
    assert!(listing.failures.is_empty());
}

#[tokio::test]
async fn descriptor_wins_over_directory_index() {
    let fetcher = MemoryFetcher::new()
        .with("songs/ncs/info.json", r#"{ "tracks": ["2.mp3", "1.mp3"] }"#)
        .with("songs/ncs/", LISTING);
    let cat = catalog(fetcher, true);
    let listing = cat.resolve_tracks("ncs").await;

    assert_eq!(listing.tracks, vec!["2.mp3", "1.mp3"]);
    assert_eq!(cat.fetcher().requests(), vec!["songs/ncs/info.json"]);
}

#[tokio::test]
async fn missing_descriptor_falls_back_to_directory_index() {
    let fetcher = MemoryFetcher::new().with("songs/ncs/", LISTING);
    let listing = catalog(fetcher, true).resolve_tracks("ncs").await;

    assert_eq!(listing.tracks, vec!["a.mp3"]);
    assert_eq!(listing.source, Some(TrackSource::DirectoryIndex));
    assert!(matches!(
        listing.failures.as_slice(),
        [CatalogError::DescriptorUnavailable { .. }]
    ));
}

#[tokio::test]
async fn descriptor_without_tracks_falls_back() {
    let fetcher = MemoryFetcher::new()
        .with("songs/ncs/info.json", r#"{ "title": "NCS", "tracks": [] }"#)
        .with("songs/ncs/", LISTING);
    let listing = catalog(fetcher, true).resolve_tracks("ncs").await;

    assert_eq!(listing.tracks, vec!["a.mp3"]);
}

#[tokio::test]
async fn directory_index_is_opt_in() {
    let fetcher = MemoryFetcher::new().with("songs/ncs/", LISTING);
    let cat = catalog(fetcher, false);
    let listing = cat.resolve_tracks("ncs").await;

    assert!(listing.tracks.is_empty());
    assert_eq!(listing.source, None);
    assert_eq!(cat.fetcher().requests(), vec!["songs/ncs/info.json"]);
    assert_eq!(
        listing.failures.last(),
        Some(&CatalogError::NoTracksFound {
            folder: "songs/ncs".into()
        })
    );
}

#[tokio::test]
async fn no_source_yields_empty_track_list() {
    let fetcher = MemoryFetcher::new()
        .with("songs/ncs/info.json", "{ not json")
        .failing("songs/ncs/", 403);
    let listing = catalog(fetcher, true).resolve_tracks("ncs").await;

    assert!(listing.is_empty());
    assert!(matches!(
        listing.failures.as_slice(),
        [
            CatalogError::DescriptorUnavailable { .. },
            CatalogError::IndexUnavailable { .. },
            CatalogError::NoTracksFound { .. },
        ]
    ));
    assert!(matches!(
        listing.into_result(),
        Err(CatalogError::NoTracksFound { .. })
    ));
}

#[tokio::test]
async fn album_list_from_manifest_with_descriptor_defaults() {
    let fetcher = MemoryFetcher::new()
        .with("songs/index.json", r#"["ncs", "lofi", 2024]"#)
        .with(
            "songs/ncs/info.json",
            r#"{ "title": "NCS", "description": "No copyright sounds" }"#,
        )
        .with(
            "songs/lofi/info.json",
            r#"{ "title": "", "cover": "front.png" }"#,
        );
    let cat = catalog(fetcher, false);
    let listing = cat.resolve_album_list().await;

    assert_eq!(listing.source, Some(AlbumSource::Manifest));
    let titles: Vec<_> = listing.albums.iter().map(|a| a.title.as_str()).collect();
    assert_eq!(titles, vec!["NCS", "lofi", "2024"]);

    let ncs = &listing.albums[0];
    assert_eq!(ncs.folder_id, "ncs");
    assert_eq!(ncs.description, "No copyright sounds");
    assert_eq!(ncs.cover_path, "songs/ncs/cover.jpeg");
    assert_eq!(listing.albums[1].cover_path, "songs/lofi/front.png");
    assert_eq!(listing.albums[2].description, "");

    // Descriptors are fetched one after another, in manifest order.
    assert_eq!(
        cat.fetcher().requests(),
        vec![
            "songs/index.json",
            "songs/ncs/info.json",
            "songs/lofi/info.json",
            "songs/2024/info.json",
        ]
    );
    assert!(matches!(
        listing.failures.as_slice(),
        [CatalogError::DescriptorUnavailable { .. }]
    ));
}

#[tokio::test]
async fn empty_manifest_falls_back_to_directory_index() {
    let fetcher = MemoryFetcher::new()
        .with("songs/index.json", "[]")
        .with(
            "songs/",
            r#"<a href="../">..</a><a href="ncs/">ncs/</a><a href="index.json">index.json</a>"#,
        );
    let listing = catalog(fetcher, true).resolve_album_list().await;

    assert_eq!(listing.source, Some(AlbumSource::DirectoryIndex));
    assert_eq!(listing.albums.len(), 1);
    assert_eq!(listing.albums[0].title, "ncs");
}

#[tokio::test]
async fn no_manifest_and_no_listing_means_no_albums() {
    let fetcher = MemoryFetcher::new().failing("songs/", 404);
    let listing = catalog(fetcher, true).resolve_album_list().await;

    assert!(listing.is_empty());
    assert_eq!(listing.failures.last(), Some(&CatalogError::NoAlbumsFound));
    assert_eq!(listing.into_result(), Err(CatalogError::NoAlbumsFound));
}

#[tokio::test]
async fn manifest_must_be_an_array() {
    let fetcher = MemoryFetcher::new().with("songs/index.json", r#"{ "albums": ["ncs"] }"#);
    let listing = catalog(fetcher, false).resolve_album_list().await;

    assert!(listing.is_empty());
    match &listing.failures[0] {
        CatalogError::ManifestUnavailable { path, reason } => {
            assert_eq!(path, "songs/index.json");
            assert!(reason.contains("not a JSON array"));
        }
        other => panic!("unexpected failure: {other:?}"),
    }
}

#[tokio::test]
async fn custom_root_and_file_names() {
    let config = CatalogConfig {
        root: "/music/".into(),
        descriptor_file: "album.json".into(),
        ..CatalogConfig::default()
    };
    let fetcher = MemoryFetcher::new().with("music/jazz/album.json", r#"{ "tracks": ["x.mp3"] }"#);
    let cat = PlaybackCatalog::new(fetcher, config);

    assert_eq!(cat.manifest_path(), "music/index.json");
    let listing = cat.resolve_tracks("jazz/").await;
    assert_eq!(listing.folder, "music/jazz");
    assert_eq!(listing.tracks, vec!["x.mp3"]);
}
