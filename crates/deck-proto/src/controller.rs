//! Transport control over a `MediaBackend`.
//!
//! The controller owns the `PlaybackState`; the backend only plays what it is
//! told.  Position and duration flow back through `on_progress`, never from
//! the transport operations themselves.

use async_trait::async_trait;
use tracing::{debug, info, warn};

use crate::catalog::{PlaybackCatalog, TrackListing};
use crate::error::PlaybackError;
use crate::fetch::Fetch;
use crate::protocol::Track;
use crate::state::{clamp_volume, PlaybackState};

/// Volume restored by `toggle_mute` when un-muting.
pub const UNMUTE_VOLUME: f32 = 0.1;

/// The player the controller drives.  `source` is a site-relative
/// `folder/track` path; resolving it to something playable is the backend's
/// business.
#[async_trait]
pub trait MediaBackend: Send {
    /// Replace the current source and leave it paused.
    async fn cue(&mut self, source: &str) -> Result<(), PlaybackError>;

    /// Start or resume playback.  A refusal is `PlaybackError::Rejected`.
    async fn play(&mut self) -> Result<(), PlaybackError>;

    async fn pause(&mut self) -> Result<(), PlaybackError>;

    async fn seek(&mut self, seconds: f64) -> Result<(), PlaybackError>;

    async fn set_volume(&mut self, volume: f32) -> Result<(), PlaybackError>;
}

pub struct PlaybackController<B> {
    backend: B,
    state: PlaybackState,
}

impl<B: MediaBackend> PlaybackController<B> {
    pub fn new(backend: B, volume: f32) -> Self {
        Self {
            backend,
            state: PlaybackState::new(volume),
        }
    }

    pub fn state(&self) -> &PlaybackState {
        &self.state
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    pub fn backend_mut(&mut self) -> &mut B {
        &mut self.backend
    }

    // ── loading ───────────────────────────────────────────────────────────────

    /// Resolve `folder_id` through `catalog`, install the tracks and cue the
    /// first one without playing it.
    ///
    /// Returns the installed list; empty when the catalog found nothing.  A
    /// backend failure while cueing is returned as `Err` but the list stays
    /// installed.
    pub async fn load<F: Fetch>(
        &mut self,
        catalog: &PlaybackCatalog<F>,
        folder_id: &str,
    ) -> Result<Vec<Track>, PlaybackError> {
        self.begin_load(catalog.folder_path(folder_id)).await?;
        let listing = catalog.resolve_tracks(folder_id).await;
        self.install(listing).await?;
        Ok(self.state.track_list.clone())
    }

    /// Switch to `folder`, silencing whatever was playing.  Navigation is a
    /// no-op until `install` delivers the folder's tracks.
    ///
    /// The state is reset even when pausing the backend fails; the error is
    /// still returned.
    pub async fn begin_load(&mut self, folder: String) -> Result<(), PlaybackError> {
        debug!("controller: entering {}", folder);
        let was_playing = self.state.is_playing;
        self.state.enter_folder(folder);
        if was_playing {
            self.backend.pause().await?;
        }
        Ok(())
    }

    /// Install a resolved listing and cue its first track.  Returns
    /// `Ok(false)` when the listing is for a folder other than the current one.
    pub async fn install(&mut self, listing: TrackListing) -> Result<bool, PlaybackError> {
        if self.state.current_folder.as_deref() != Some(listing.folder.as_str()) {
            debug!(
                "controller: ignoring stale listing for {} (current {:?})",
                listing.folder, self.state.current_folder
            );
            return Ok(false);
        }

        self.state.track_list = listing.tracks;
        self.state.current_index = None;
        if self.state.track_list.is_empty() {
            info!("controller: {} has no tracks", listing.folder);
            return Ok(true);
        }

        info!(
            "controller: installed {} tracks for {}",
            self.state.track_list.len(),
            listing.folder
        );
        self.play_index(0, false).await?;
        Ok(true)
    }

    // ── transport ─────────────────────────────────────────────────────────────

    /// Cue `track` (exact name) and play it when `autoplay` is set.
    pub async fn play_track(&mut self, track: &str, autoplay: bool) -> Result<(), PlaybackError> {
        let index = self
            .state
            .position_of(track)
            .ok_or_else(|| PlaybackError::UnknownTrack(track.to_string()))?;
        self.play_index(index, autoplay).await
    }

    pub async fn play_index(&mut self, index: usize, autoplay: bool) -> Result<(), PlaybackError> {
        let track = self
            .state
            .track_list
            .get(index)
            .cloned()
            .ok_or(PlaybackError::IndexOutOfRange {
                index,
                len: self.state.track_list.len(),
            })?;

        let source = self.state.source_for(&track);
        self.state.current_index = Some(index);
        self.state.active_source = Some(source.clone());
        self.state.is_playing = false;
        self.state.reset_progress();

        debug!("controller: cue {} (autoplay={})", source, autoplay);
        self.backend.cue(&source).await?;

        if autoplay {
            self.start().await?;
        }
        Ok(())
    }

    pub async fn toggle_play_pause(&mut self) -> Result<(), PlaybackError> {
        if self.state.current_index.is_none() {
            return Ok(());
        }
        if self.state.is_playing {
            self.backend.pause().await?;
            self.state.is_playing = false;
            Ok(())
        } else {
            self.start().await
        }
    }

    async fn start(&mut self) -> Result<(), PlaybackError> {
        match self.backend.play().await {
            Ok(()) => {
                self.state.is_playing = true;
                Ok(())
            }
            Err(e) => {
                warn!("controller: {}", e);
                self.state.is_playing = false;
                Err(e)
            }
        }
    }

    /// Move one track forward; no-op on the last track.
    pub async fn next(&mut self) -> Result<(), PlaybackError> {
        match self.state.next_index() {
            Some(i) => self.play_index(i, true).await,
            None => Ok(()),
        }
    }

    /// Move one track back; no-op on the first track.
    pub async fn previous(&mut self) -> Result<(), PlaybackError> {
        match self.state.previous_index() {
            Some(i) => self.play_index(i, true).await,
            None => Ok(()),
        }
    }

    /// Seek to `fraction` (clamped to [0,1]) of the known duration.
    pub async fn seek_to(&mut self, fraction: f64) -> Result<(), PlaybackError> {
        if self.state.current_index.is_none() {
            return Err(PlaybackError::NothingCued);
        }
        let fraction = if fraction.is_nan() {
            0.0
        } else {
            fraction.clamp(0.0, 1.0)
        };
        let target = self.state.duration * fraction;
        debug!("controller: seek to {:.1}s ({:.3})", target, fraction);
        self.backend.seek(target).await
    }

    pub async fn set_volume(&mut self, volume: f32) -> Result<(), PlaybackError> {
        let volume = clamp_volume(volume);
        self.state.volume = volume;
        self.backend.set_volume(volume).await
    }

    /// Mute when audible, otherwise restore a low volume.
    pub async fn toggle_mute(&mut self) -> Result<(), PlaybackError> {
        let target = if self.state.volume > 0.0 {
            0.0
        } else {
            UNMUTE_VOLUME
        };
        self.set_volume(target).await
    }

    // ── backend notifications ─────────────────────────────────────────────────

    /// Periodic position report from the player.
    pub fn on_progress(&mut self, current_time: f64, duration: f64) {
        self.state.set_progress(current_time, duration);
    }

    /// The player paused or resumed on its own.
    pub fn sync_paused(&mut self, paused: bool) {
        if self.state.current_index.is_some() {
            self.state.is_playing = !paused;
        }
    }

    /// The cued track reached its end.
    pub fn on_ended(&mut self) {
        self.state.is_playing = false;
    }
}
