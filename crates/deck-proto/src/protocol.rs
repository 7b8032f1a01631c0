use serde::{Deserialize, Serialize};
use std::fmt;

use crate::state::PlaybackState;

/// Commands accepted by the daemon core (from the HTTP API).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "cmd")]
pub enum Command {
    RefreshAlbums,
    LoadAlbum { folder: String, autoplay: bool },
    PlayIndex { index: usize, autoplay: bool },
    TogglePause,
    Next,
    Prev,
    SeekFraction { fraction: f64 },
    Volume { value: f32 },
    ToggleMute,
    GetState,
}

/// An album folder as shown in the album list.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct Album {
    pub folder_id: String,
    pub title: String,
    #[serde(default)]
    pub description: String,
    pub cover_path: String,
}

/// A track filename, relative to its album folder.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(transparent)]
pub struct Track(String);

impl Track {
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Name for display: percent escapes decoded and the audio extension
    /// removed.
    pub fn display_name(&self, audio_extension: &str) -> String {
        let decoded = urlencoding::decode(&self.0)
            .map(|s| s.into_owned())
            .unwrap_or_else(|_| self.0.clone());
        match decoded.strip_suffix(audio_extension) {
            Some(stem) if !stem.is_empty() => stem.to_string(),
            _ => decoded,
        }
    }
}

impl fmt::Display for Track {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<String> for Track {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for Track {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl PartialEq<str> for Track {
    fn eq(&self, other: &str) -> bool {
        self.0 == other
    }
}

impl PartialEq<&str> for Track {
    fn eq(&self, other: &&str) -> bool {
        self.0 == *other
    }
}

/// Transport state derived from `PlaybackState`.
///
/// Transitions:
///   Idle -> Paused (load) -> Playing (toggle / autoplay) -> Paused ...
///   any load -> Paused with the new list
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
pub enum TransportState {
    #[default]
    Idle,
    Paused,
    Playing,
}

/// Health of the mpv process as observed by the daemon.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub enum MpvHealth {
    /// mpv process does not exist yet (before first use).
    #[default]
    Absent,
    /// Process is spawning / socket not yet available.
    Starting,
    /// Socket connected, IPC responding normally.
    Running,
    /// Process exited or socket closed.
    Dead,
}

impl MpvHealth {
    pub fn is_unhealthy(&self) -> bool {
        matches!(self, MpvHealth::Dead)
    }
}

/// Category of a user-visible notice.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum NoticeKind {
    ManifestUnavailable,
    DescriptorUnavailable,
    IndexUnavailable,
    NoTracksFound,
    NoAlbumsFound,
    PlaybackRejected,
    PlayerUnavailable,
}

/// A degraded condition the user should be told about.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Notice {
    pub kind: NoticeKind,
    pub message: String,
}

impl Notice {
    pub fn new(kind: NoticeKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }
}

/// Everything readers of the daemon can see.  `rev` is a monotonic counter
/// incremented on every publish.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct DeckSnapshot {
    #[serde(default)]
    pub rev: u64,
    pub albums: Vec<Album>,
    pub playback: PlaybackState,
    pub transport: TransportState,
    /// Folder whose track list is still being resolved.
    pub loading_folder: Option<String>,
    #[serde(default)]
    pub mpv_health: MpvHealth,
    pub notice: Option<Notice>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_command_json_shape() {
        let cmd = Command::LoadAlbum {
            folder: "ncs".into(),
            autoplay: true,
        };
        let json = serde_json::to_value(&cmd).unwrap();
        assert_eq!(json["cmd"], "LoadAlbum");
        assert_eq!(json["folder"], "ncs");

        let back: Command = serde_json::from_value(json).unwrap();
        assert_eq!(back, cmd);
    }

    #[test]
    fn test_track_display_name() {
        let t = Track::new("My%20Song.mp3");
        assert_eq!(t.display_name(".mp3"), "My Song");
        assert_eq!(Track::new(".mp3").display_name(".mp3"), ".mp3");
        assert_eq!(Track::new("intro.ogg").display_name(".mp3"), "intro.ogg");
    }

    #[test]
    fn test_track_serializes_as_string() {
        let tracks = vec![Track::new("1.mp3"), Track::new("2.mp3")];
        assert_eq!(
            serde_json::to_string(&tracks).unwrap(),
            r#"["1.mp3","2.mp3"]"#
        );
    }
}
