//! Album and track discovery.
//!
//! Sources, in order of preference:
//!
//! ```text
//!   album list:  {root}/index.json  ->  directory index of {root}/  (opt-in)
//!   track list:  {root}/{folder}/info.json "tracks"  ->  directory index of {root}/{folder}/  (opt-in)
//! ```
//!
//! Every failure is recorded on the returned listing and the next source is
//! tried.  Resolution never returns `Err`; an empty listing is the signal
//! that nothing was found.

use serde::Deserialize;
use serde_json::Value;
use tracing::{debug, info, warn};

use crate::config::CatalogConfig;
use crate::error::{CatalogError, FetchError};
use crate::fetch::{fetch_json, Fetch};
use crate::index;
use crate::protocol::{Album, Track};

/// Per-album `info.json`.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct AlbumDescriptor {
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    /// Cover filename inside the folder, overriding the configured default.
    #[serde(default)]
    pub cover: Option<String>,
    #[serde(default)]
    pub tracks: Option<Value>,
}

impl AlbumDescriptor {
    /// Track names listed by the descriptor, in order.  Non-string entries
    /// are stringified; blanks are dropped.
    pub fn track_names(&self) -> Vec<Track> {
        match &self.tracks {
            Some(Value::Array(items)) => items
                .iter()
                .filter_map(entry_name)
                .map(Track::from)
                .collect(),
            _ => Vec::new(),
        }
    }
}

fn entry_name(value: &Value) -> Option<String> {
    let name = match value {
        Value::Null => return None,
        Value::String(s) => s.clone(),
        other => other.to_string(),
    };
    if name.trim().is_empty() {
        None
    } else {
        Some(name)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AlbumSource {
    Manifest,
    DirectoryIndex,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrackSource {
    Descriptor,
    DirectoryIndex,
}

#[derive(Debug, Clone, Default)]
pub struct AlbumListing {
    pub albums: Vec<Album>,
    /// `None` when no source produced any album.
    pub source: Option<AlbumSource>,
    /// Non-fatal failures, in the order they happened.
    pub failures: Vec<CatalogError>,
}

impl AlbumListing {
    pub fn is_empty(&self) -> bool {
        self.albums.is_empty()
    }

    pub fn into_result(self) -> Result<Vec<Album>, CatalogError> {
        if self.albums.is_empty() {
            Err(CatalogError::NoAlbumsFound)
        } else {
            Ok(self.albums)
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct TrackListing {
    /// Folder path the tracks belong to (`{root}/{folder_id}`).
    pub folder: String,
    pub tracks: Vec<Track>,
    pub source: Option<TrackSource>,
    pub failures: Vec<CatalogError>,
}

impl TrackListing {
    pub fn is_empty(&self) -> bool {
        self.tracks.is_empty()
    }

    pub fn into_result(self) -> Result<Vec<Track>, CatalogError> {
        if self.tracks.is_empty() {
            Err(CatalogError::NoTracksFound {
                folder: self.folder,
            })
        } else {
            Ok(self.tracks)
        }
    }
}

pub struct PlaybackCatalog<F> {
    fetcher: F,
    config: CatalogConfig,
}

impl<F: Fetch> PlaybackCatalog<F> {
    pub fn new(fetcher: F, config: CatalogConfig) -> Self {
        Self { fetcher, config }
    }

    pub fn config(&self) -> &CatalogConfig {
        &self.config
    }

    pub fn fetcher(&self) -> &F {
        &self.fetcher
    }

    fn root(&self) -> &str {
        self.config.root.trim_matches('/')
    }

    /// `{root}/{folder_id}`, without leading or trailing slashes.
    pub fn folder_path(&self, folder_id: &str) -> String {
        let id = folder_id.trim_matches('/');
        if self.root().is_empty() {
            id.to_string()
        } else {
            format!("{}/{}", self.root(), id)
        }
    }

    fn root_listing_path(&self) -> String {
        if self.root().is_empty() {
            String::new()
        } else {
            format!("{}/", self.root())
        }
    }

    pub fn manifest_path(&self) -> String {
        if self.root().is_empty() {
            self.config.manifest_file.clone()
        } else {
            format!("{}/{}", self.root(), self.config.manifest_file)
        }
    }

    pub fn descriptor_path(&self, folder_id: &str) -> String {
        format!("{}/{}", self.folder_path(folder_id), self.config.descriptor_file)
    }

    pub fn cover_path(&self, folder_id: &str, descriptor: Option<&AlbumDescriptor>) -> String {
        let file = descriptor
            .and_then(|d| d.cover.as_deref())
            .map(str::trim)
            .filter(|c| !c.is_empty())
            .unwrap_or(self.config.cover_file.as_str());
        format!("{}/{}", self.folder_path(folder_id), file)
    }

    // ── albums ────────────────────────────────────────────────────────────────

    pub async fn resolve_album_list(&self) -> AlbumListing {
        let mut listing = AlbumListing::default();

        let mut folders = match self.fetch_manifest().await {
            Ok(folders) => {
                info!("catalog: {} album folders from {}", folders.len(), self.manifest_path());
                listing.source = Some(AlbumSource::Manifest);
                folders
            }
            Err(e) => {
                info!("catalog: {}", e);
                listing.failures.push(e);
                Vec::new()
            }
        };

        if folders.is_empty() && self.config.directory_fallback {
            match self.scrape_album_folders().await {
                Ok(found) if !found.is_empty() => {
                    info!("catalog: {} album folders from directory index", found.len());
                    listing.source = Some(AlbumSource::DirectoryIndex);
                    folders = found;
                }
                Ok(_) => {
                    warn!("catalog: directory index of {} lists no folders", self.root_listing_path());
                }
                Err(e) => {
                    warn!("catalog: {}", e);
                    listing.failures.push(e);
                }
            }
        }

        if folders.is_empty() {
            warn!("catalog: no albums found");
            listing.failures.push(CatalogError::NoAlbumsFound);
            return listing;
        }

        // One descriptor at a time, in manifest order.
        for folder in folders {
            let album = self.describe_album(&folder, &mut listing.failures).await;
            listing.albums.push(album);
        }

        listing
    }

    async fn fetch_manifest(&self) -> Result<Vec<String>, CatalogError> {
        let path = self.manifest_path();
        let unavailable = |reason: String| CatalogError::ManifestUnavailable {
            path: path.clone(),
            reason,
        };

        let value: Value = fetch_json(&self.fetcher, &path)
            .await
            .map_err(|e| unavailable(e.to_string()))?;

        let Value::Array(items) = value else {
            return Err(unavailable("manifest is not a JSON array".into()));
        };

        let folders: Vec<String> = items
            .iter()
            .filter_map(entry_name)
            .map(|f| f.trim_matches('/').to_string())
            .filter(|f| !f.is_empty())
            .collect();

        if folders.is_empty() {
            return Err(unavailable("manifest lists no folders".into()));
        }
        Ok(folders)
    }

    async fn scrape_album_folders(&self) -> Result<Vec<String>, CatalogError> {
        let path = self.root_listing_path();
        let html = self
            .fetcher
            .get_text(&path)
            .await
            .map_err(|e| CatalogError::IndexUnavailable {
                path: path.clone(),
                reason: e.to_string(),
            })?;
        Ok(index::parse_folder_links(&html))
    }

    async fn fetch_descriptor(&self, folder_id: &str) -> Result<AlbumDescriptor, CatalogError> {
        let path = self.descriptor_path(folder_id);
        fetch_json(&self.fetcher, &path)
            .await
            .map_err(|e: FetchError| CatalogError::DescriptorUnavailable {
                path: path.clone(),
                reason: e.to_string(),
            })
    }

    async fn describe_album(&self, folder_id: &str, failures: &mut Vec<CatalogError>) -> Album {
        let descriptor = match self.fetch_descriptor(folder_id).await {
            Ok(d) => Some(d),
            Err(e) => {
                debug!("catalog: {}; using folder name", e);
                failures.push(e);
                None
            }
        };

        let title = descriptor
            .as_ref()
            .and_then(|d| d.title.clone())
            .filter(|t| !t.trim().is_empty())
            .unwrap_or_else(|| folder_id.to_string());
        let description = descriptor
            .as_ref()
            .and_then(|d| d.description.clone())
            .unwrap_or_default();

        Album {
            folder_id: folder_id.to_string(),
            title,
            description,
            cover_path: self.cover_path(folder_id, descriptor.as_ref()),
        }
    }

    // ── tracks ────────────────────────────────────────────────────────────────

    pub async fn resolve_tracks(&self, folder_id: &str) -> TrackListing {
        let mut listing = TrackListing {
            folder: self.folder_path(folder_id),
            ..TrackListing::default()
        };

        match self.fetch_descriptor(folder_id).await {
            Ok(descriptor) => {
                let tracks = descriptor.track_names();
                if tracks.is_empty() {
                    let path = self.descriptor_path(folder_id);
                    warn!("catalog: {} has no \"tracks\" array", path);
                    listing.failures.push(CatalogError::DescriptorUnavailable {
                        path,
                        reason: "no tracks listed".into(),
                    });
                } else {
                    info!("catalog: {} tracks from {}", tracks.len(), self.descriptor_path(folder_id));
                    listing.tracks = tracks;
                    listing.source = Some(TrackSource::Descriptor);
                    return listing;
                }
            }
            Err(e) => {
                info!("catalog: {}", e);
                listing.failures.push(e);
            }
        }

        if self.config.directory_fallback {
            match self.scrape_tracks(folder_id).await {
                Ok(tracks) if !tracks.is_empty() => {
                    info!("catalog: {} tracks from directory index of {}", tracks.len(), listing.folder);
                    listing.tracks = tracks;
                    listing.source = Some(TrackSource::DirectoryIndex);
                    return listing;
                }
                Ok(_) => {
                    warn!(
                        "catalog: directory index of {} links no {} files",
                        listing.folder, self.config.audio_extension
                    );
                }
                Err(e) => {
                    warn!("catalog: {}", e);
                    listing.failures.push(e);
                }
            }
        }

        warn!("catalog: no tracks found in {}", listing.folder);
        listing.failures.push(CatalogError::NoTracksFound {
            folder: listing.folder.clone(),
        });
        listing
    }

    async fn scrape_tracks(&self, folder_id: &str) -> Result<Vec<Track>, CatalogError> {
        let path = format!("{}/", self.folder_path(folder_id));
        let html = self
            .fetcher
            .get_text(&path)
            .await
            .map_err(|e| CatalogError::IndexUnavailable {
                path: path.clone(),
                reason: e.to_string(),
            })?;
        Ok(index::parse_track_links(
            &html,
            &self.config.audio_extension,
            self.config.extension_case_insensitive,
        ))
    }
}
