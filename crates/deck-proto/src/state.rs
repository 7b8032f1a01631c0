use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::RwLock;

use crate::protocol::{Album, DeckSnapshot, MpvHealth, Notice, Track, TransportState};

/// Playback state of one controller.
///
/// `current_index` is `None` or a valid index into `track_list`, and
/// `track_list` always belongs to `current_folder`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlaybackState {
    pub current_folder: Option<String>,
    pub track_list: Vec<Track>,
    pub current_index: Option<usize>,
    /// `folder/track` last handed to the media backend.
    pub active_source: Option<String>,
    pub is_playing: bool,
    pub volume: f32,
    pub current_time: f64,
    pub duration: f64,
}

impl Default for PlaybackState {
    fn default() -> Self {
        Self::new(1.0)
    }
}

impl PlaybackState {
    pub fn new(volume: f32) -> Self {
        Self {
            current_folder: None,
            track_list: Vec::new(),
            current_index: None,
            active_source: None,
            is_playing: false,
            volume: clamp_volume(volume),
            current_time: 0.0,
            duration: 0.0,
        }
    }

    pub fn transport(&self) -> TransportState {
        match self.current_index {
            None => TransportState::Idle,
            Some(_) if self.is_playing => TransportState::Playing,
            Some(_) => TransportState::Paused,
        }
    }

    pub fn current_track(&self) -> Option<&Track> {
        self.current_index.and_then(|i| self.track_list.get(i))
    }

    pub fn position_of(&self, track: &str) -> Option<usize> {
        self.track_list.iter().position(|t| t == track)
    }

    /// Switch to `folder`.  The old list and index no longer apply.
    pub fn enter_folder(&mut self, folder: String) {
        self.current_folder = Some(folder);
        self.track_list.clear();
        self.current_index = None;
        self.active_source = None;
        self.is_playing = false;
        self.reset_progress();
    }

    /// `folder/track` path for the media backend.
    pub fn source_for(&self, track: &Track) -> String {
        match self.current_folder.as_deref().map(|f| f.trim_end_matches('/')) {
            Some(folder) if !folder.is_empty() => format!("{}/{}", folder, track),
            _ => track.to_string(),
        }
    }

    pub fn next_index(&self) -> Option<usize> {
        let i = self.current_index?;
        (i + 1 < self.track_list.len()).then_some(i + 1)
    }

    pub fn previous_index(&self) -> Option<usize> {
        let i = self.current_index?;
        i.checked_sub(1)
    }

    pub fn set_progress(&mut self, current_time: f64, duration: f64) {
        self.current_time = finite_or_zero(current_time).max(0.0);
        self.duration = finite_or_zero(duration).max(0.0);
    }

    pub fn reset_progress(&mut self) {
        self.current_time = 0.0;
        self.duration = 0.0;
    }

    /// Elapsed share of the track, 0 when the duration is unknown.
    pub fn progress_fraction(&self) -> f64 {
        if self.duration > 0.0 {
            (self.current_time / self.duration).clamp(0.0, 1.0)
        } else {
            0.0
        }
    }

    /// `"MM:SS / MM:SS"`.
    pub fn time_label(&self) -> String {
        format!("{} / {}", format_time(self.current_time), format_time(self.duration))
    }
}

pub fn clamp_volume(v: f32) -> f32 {
    if v.is_nan() {
        0.0
    } else {
        v.clamp(0.0, 1.0)
    }
}

fn finite_or_zero(v: f64) -> f64 {
    if v.is_finite() {
        v
    } else {
        0.0
    }
}

/// Format seconds as zero-padded `MM:SS`; non-finite or negative input is
/// shown as `00:00`.
pub fn format_time(seconds: f64) -> String {
    let secs = finite_or_zero(seconds).max(0.0) as u64;
    format!("{:02}:{:02}", secs / 60, secs % 60)
}

// ── shared snapshot ───────────────────────────────────────────────────────────

/// Published view of the daemon for concurrent readers.  Only the daemon core
/// writes; every write bumps `rev`.
pub struct SnapshotStore {
    snapshot: Arc<RwLock<DeckSnapshot>>,
}

impl SnapshotStore {
    pub fn new(playback: PlaybackState) -> Self {
        let snapshot = DeckSnapshot {
            rev: 1,
            transport: playback.transport(),
            playback,
            ..DeckSnapshot::default()
        };
        Self {
            snapshot: Arc::new(RwLock::new(snapshot)),
        }
    }

    pub fn arc(&self) -> Arc<RwLock<DeckSnapshot>> {
        Arc::clone(&self.snapshot)
    }

    pub async fn get(&self) -> DeckSnapshot {
        self.snapshot.read().await.clone()
    }

    pub async fn set_playback(&self, playback: &PlaybackState) {
        let mut s = self.snapshot.write().await;
        s.transport = playback.transport();
        s.playback = playback.clone();
        s.rev += 1;
    }

    pub async fn set_albums(&self, albums: Vec<Album>) {
        let mut s = self.snapshot.write().await;
        s.albums = albums;
        s.rev += 1;
    }

    pub async fn set_loading(&self, folder: Option<String>) {
        let mut s = self.snapshot.write().await;
        s.loading_folder = folder;
        s.rev += 1;
    }

    pub async fn set_mpv_health(&self, health: MpvHealth) {
        let mut s = self.snapshot.write().await;
        s.mpv_health = health;
        s.rev += 1;
    }

    pub async fn set_notice(&self, notice: Option<Notice>) {
        let mut s = self.snapshot.write().await;
        s.notice = notice;
        s.rev += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::NoticeKind;

    fn loaded(n: usize) -> PlaybackState {
        let mut s = PlaybackState::default();
        s.enter_folder("songs/ncs".into());
        s.track_list = (1..=n).map(|i| Track::new(format!("{i}.mp3"))).collect();
        s.current_index = Some(0);
        s
    }

    #[test]
    fn test_format_time() {
        assert_eq!(format_time(0.0), "00:00");
        assert_eq!(format_time(65.9), "01:05");
        assert_eq!(format_time(3600.0), "60:00");
        assert_eq!(format_time(f64::NAN), "00:00");
        assert_eq!(format_time(f64::INFINITY), "00:00");
        assert_eq!(format_time(-3.0), "00:00");
    }

    #[test]
    fn test_time_label_and_fraction() {
        let mut s = loaded(1);
        s.set_progress(30.0, f64::NAN);
        assert_eq!(s.time_label(), "00:30 / 00:00");
        assert_eq!(s.progress_fraction(), 0.0);

        s.set_progress(30.0, 120.0);
        assert_eq!(s.time_label(), "00:30 / 02:00");
        assert!((s.progress_fraction() - 0.25).abs() < 1e-9);

        s.set_progress(500.0, 120.0);
        assert_eq!(s.progress_fraction(), 1.0);
    }

    #[test]
    fn test_neighbour_indices_stop_at_bounds() {
        let mut s = loaded(3);
        assert_eq!(s.previous_index(), None);
        assert_eq!(s.next_index(), Some(1));
        s.current_index = Some(2);
        assert_eq!(s.next_index(), None);
        assert_eq!(s.previous_index(), Some(1));
    }

    #[test]
    fn test_enter_folder_invalidates_index() {
        let mut s = loaded(2);
        s.is_playing = true;
        s.active_source = Some("songs/ncs/1.mp3".into());
        s.set_progress(12.0, 200.0);
        s.enter_folder("songs/other".into());
        assert_eq!(s.current_index, None);
        assert!(s.track_list.is_empty());
        assert_eq!(s.active_source, None);
        assert!(!s.is_playing);
        assert_eq!((s.current_time, s.duration), (0.0, 0.0));
        assert_eq!(s.transport(), TransportState::Idle);
    }

    #[test]
    fn test_source_for_trims_slash() {
        let mut s = PlaybackState::default();
        s.enter_folder("songs/ncs/".into());
        assert_eq!(s.source_for(&Track::new("1.mp3")), "songs/ncs/1.mp3");
    }

    #[test]
    fn test_clamp_volume() {
        assert_eq!(clamp_volume(1.7), 1.0);
        assert_eq!(clamp_volume(-0.2), 0.0);
        assert_eq!(clamp_volume(f32::NAN), 0.0);
        assert_eq!(clamp_volume(0.4), 0.4);
    }

    #[tokio::test]
    async fn test_snapshot_store_bumps_rev() {
        let store = SnapshotStore::new(PlaybackState::default());
        let rev = store.get().await.rev;

        store
            .set_notice(Some(Notice::new(NoticeKind::NoAlbumsFound, "no albums")))
            .await;
        store.set_playback(&loaded(2)).await;

        let snap = store.get().await;
        assert_eq!(snap.rev, rev + 2);
        assert_eq!(snap.transport, TransportState::Paused);
        assert_eq!(snap.notice.unwrap().kind, NoticeKind::NoAlbumsFound);
    }
}
