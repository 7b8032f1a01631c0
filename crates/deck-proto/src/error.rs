//! Error taxonomy for catalog resolution and playback.
//!
//! None of these are fatal: the catalog records them on its listings while it
//! falls through to the next source, and the daemon turns them into a
//! `Notice` for the user.

use thiserror::Error;

use crate::protocol::NoticeKind;

/// Transport-level failure of a single fetch.
#[derive(Debug, Error)]
pub enum FetchError {
    #[error("invalid path {path:?}: {reason}")]
    InvalidPath { path: String, reason: String },

    #[error("request to {url} failed: {source}")]
    Transport {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("{url} returned HTTP {status}")]
    Status { url: String, status: u16 },

    #[error("unreadable body from {url}: {reason}")]
    Decode { url: String, reason: String },
}

impl FetchError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, FetchError::Status { status: 404, .. })
    }
}

#[derive(Debug, Clone, Error, PartialEq)]
pub enum CatalogError {
    #[error("album manifest {path} unavailable: {reason}")]
    ManifestUnavailable { path: String, reason: String },

    #[error("album descriptor {path} unavailable: {reason}")]
    DescriptorUnavailable { path: String, reason: String },

    #[error("directory index {path} unavailable: {reason}")]
    IndexUnavailable { path: String, reason: String },

    #[error("no tracks found in {folder}")]
    NoTracksFound { folder: String },

    #[error("no albums found")]
    NoAlbumsFound,
}

impl CatalogError {
    pub fn kind(&self) -> NoticeKind {
        match self {
            CatalogError::ManifestUnavailable { .. } => NoticeKind::ManifestUnavailable,
            CatalogError::DescriptorUnavailable { .. } => NoticeKind::DescriptorUnavailable,
            CatalogError::IndexUnavailable { .. } => NoticeKind::IndexUnavailable,
            CatalogError::NoTracksFound { .. } => NoticeKind::NoTracksFound,
            CatalogError::NoAlbumsFound => NoticeKind::NoAlbumsFound,
        }
    }
}

#[derive(Debug, Clone, Error, PartialEq)]
pub enum PlaybackError {
    /// The player refused to start (autoplay blocked, stream unreadable, ...).
    #[error("playback rejected: {0}")]
    Rejected(String),

    #[error("no track is cued")]
    NothingCued,

    #[error("track {0:?} is not in the current list")]
    UnknownTrack(String),

    #[error("track index {index} out of range ({len} tracks)")]
    IndexOutOfRange { index: usize, len: usize },

    /// The media backend could not carry out a non-start command.
    #[error("media backend: {0}")]
    Backend(String),
}

impl PlaybackError {
    pub fn kind(&self) -> NoticeKind {
        match self {
            PlaybackError::Backend(_) => NoticeKind::PlayerUnavailable,
            _ => NoticeKind::PlaybackRejected,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_kinds() {
        assert_eq!(CatalogError::NoAlbumsFound.kind(), NoticeKind::NoAlbumsFound);
        assert_eq!(
            CatalogError::NoTracksFound {
                folder: "songs/ncs".into()
            }
            .kind(),
            NoticeKind::NoTracksFound
        );
        assert_eq!(
            PlaybackError::Rejected("blocked".into()).kind(),
            NoticeKind::PlaybackRejected
        );
        assert_eq!(
            PlaybackError::Backend("gone".into()).kind(),
            NoticeKind::PlayerUnavailable
        );
    }

    #[test]
    fn test_not_found_detection() {
        let e = FetchError::Status {
            url: "http://host/songs/index.json".into(),
            status: 404,
        };
        assert!(e.is_not_found());
        assert_eq!(e.to_string(), "http://host/songs/index.json returned HTTP 404");
    }
}
