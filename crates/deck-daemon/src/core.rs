/// DeckCore — single-owner event loop for all mutable state.
///
/// HTTP commands, catalog results, mpv events and heartbeat ticks all arrive
/// as `DeckEvent`s on one channel.  DeckCore owns the `PlaybackController`
/// (and through it the mpv backend) exclusively; no other task touches them.
///
/// After each event DeckCore writes the `SnapshotStore` and broadcasts
/// `BroadcastMessage::StateUpdated`.
///
/// Catalog resolution runs in spawned tasks so a slow host never blocks the
/// transport.  Each album load carries a generation number and a
/// `CancellationToken`; starting a new load cancels the previous task and any
/// result that still arrives for an older generation is dropped.
use std::sync::Arc;

use async_trait::async_trait;
use deck_proto::catalog::{AlbumListing, PlaybackCatalog, TrackListing};
use deck_proto::config::Config;
use deck_proto::controller::{MediaBackend, PlaybackController};
use deck_proto::error::PlaybackError;
use deck_proto::fetch::{Fetch, HttpFetcher};
use deck_proto::protocol::{Command, MpvHealth, Notice, NoticeKind};
use deck_proto::state::SnapshotStore;
use tokio::sync::{broadcast, mpsc};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::mpv::{MpvBackend, MpvEvent, OBS_DURATION, OBS_PAUSE, OBS_TIME_POS};
use crate::BroadcastMessage;

// ── DeckEvent ─────────────────────────────────────────────────────────────────

/// All inputs into the DeckCore loop.
#[derive(Debug)]
pub enum DeckEvent {
    /// A command from the HTTP API.
    Command(Command),
    /// The album list finished resolving.
    AlbumsResolved(AlbumListing),
    /// A folder's track list finished resolving.
    TracksResolved {
        generation: u64,
        listing: TrackListing,
        autoplay: bool,
    },
    /// Unsolicited mpv event (forwarded from the reader task).
    Mpv(MpvEvent),
    /// Heartbeat — check process liveness.
    HeartbeatTick,
    Shutdown,
}

// ── PlayerProcess ─────────────────────────────────────────────────────────────

/// The player process behind the transport: its health and the bookkeeping
/// for files it reports as finished.
#[async_trait]
pub trait PlayerProcess: MediaBackend {
    fn health(&self) -> MpvHealth;

    /// Forget a player whose process has exited.  Returns true when this call
    /// noticed the death.
    fn check_alive(&mut self) -> bool;

    /// The player reported `start-file` for the file it was last told to load.
    fn file_started(&mut self);

    /// The player finished a file.  Returns false when that file has been
    /// replaced since, so the report is stale.
    fn file_ended(&mut self) -> bool;

    async fn shutdown(&mut self);
}

// ── DeckCore ──────────────────────────────────────────────────────────────────

pub struct DeckCore<F, B> {
    config: Config,
    catalog: Arc<PlaybackCatalog<F>>,
    controller: PlaybackController<B>,
    snapshot: Arc<SnapshotStore>,
    event_tx: mpsc::Sender<DeckEvent>,
    broadcast_tx: broadcast::Sender<BroadcastMessage>,
    /// Bumped by every album load; results for older generations are stale.
    load_generation: u64,
    load_cancel: Option<CancellationToken>,
    albums_cancel: Option<CancellationToken>,
    /// Last published mpv health and notice (to avoid redundant writes).
    mpv_health: MpvHealth,
    notice: Option<Notice>,
}

impl DeckCore<HttpFetcher, MpvBackend> {
    pub fn new(
        config: Config,
        broadcast_tx: broadcast::Sender<BroadcastMessage>,
        event_tx: mpsc::Sender<DeckEvent>,
    ) -> anyhow::Result<Self> {
        let fetcher = HttpFetcher::new(&config.catalog.base_url, config.catalog.request_timeout())?;
        let base_url = fetcher.base_url().clone();
        info!("DeckCore: catalog at {}", base_url);

        // One forwarder for the whole process lifetime; every mpv connection
        // gets a clone of the same sender.
        let (mpv_tx, mut mpv_rx) = mpsc::channel::<MpvEvent>(64);
        let core_tx = event_tx.clone();
        tokio::spawn(async move {
            while let Some(evt) = mpv_rx.recv().await {
                if core_tx.send(DeckEvent::Mpv(evt)).await.is_err() {
                    break;
                }
            }
        });

        let backend = MpvBackend::new(base_url, config.player.default_volume, mpv_tx)
            .with_binary(config.player.mpv_path());
        let catalog = PlaybackCatalog::new(fetcher, config.catalog.clone());
        Ok(Self::with_parts(config, catalog, backend, broadcast_tx, event_tx))
    }
}

impl<F, B> DeckCore<F, B>
where
    F: Fetch + 'static,
    B: PlayerProcess,
{
    pub fn with_parts(
        config: Config,
        catalog: PlaybackCatalog<F>,
        backend: B,
        broadcast_tx: broadcast::Sender<BroadcastMessage>,
        event_tx: mpsc::Sender<DeckEvent>,
    ) -> Self {
        let controller = PlaybackController::new(backend, config.player.default_volume);
        let snapshot = Arc::new(SnapshotStore::new(controller.state().clone()));

        Self {
            config,
            catalog: Arc::new(catalog),
            controller,
            snapshot,
            event_tx,
            broadcast_tx,
            load_generation: 0,
            load_cancel: None,
            albums_cancel: None,
            mpv_health: MpvHealth::Absent,
            notice: None,
        }
    }

    /// Shared snapshot (for the HTTP server).
    pub fn snapshot_store(&self) -> Arc<SnapshotStore> {
        Arc::clone(&self.snapshot)
    }

    /// Run the core event loop.  Returns on `Shutdown` or when the event
    /// channel closes.
    pub async fn run(mut self, mut event_rx: mpsc::Receiver<DeckEvent>) -> anyhow::Result<()> {
        info!("DeckCore: starting event loop");

        let heartbeat_tx = self.event_tx.clone();
        tokio::spawn(async move {
            loop {
                tokio::time::sleep(tokio::time::Duration::from_secs(10)).await;
                if heartbeat_tx.send(DeckEvent::HeartbeatTick).await.is_err() {
                    break;
                }
            }
        });

        self.refresh_albums();
        let default_folder = self.config.player.default_folder.trim().to_string();
        if !default_folder.is_empty() {
            self.load_album(default_folder, false).await;
        }
        self.publish().await;

        loop {
            let evt = match event_rx.recv().await {
                None => {
                    info!("DeckCore: event channel closed, shutting down");
                    break;
                }
                Some(DeckEvent::Shutdown) => {
                    info!("DeckCore: shutdown requested");
                    break;
                }
                Some(evt) => evt,
            };
            if self.handle_event(evt).await {
                self.publish().await;
            }
        }

        self.cleanup().await;
        Ok(())
    }

    /// Apply one event.  Returns false when nothing changed and there is
    /// nothing to publish.
    async fn handle_event(&mut self, evt: DeckEvent) -> bool {
        match evt {
            DeckEvent::Command(cmd) => {
                info!("DeckCore: command {:?}", cmd);
                match self.handle_command(cmd).await {
                    Ok(()) => self.clear_playback_notice().await,
                    Err(e) => self.report_playback_error(e).await,
                }
            }

            DeckEvent::AlbumsResolved(listing) => {
                self.handle_albums_resolved(listing).await;
            }

            DeckEvent::TracksResolved {
                generation,
                listing,
                autoplay,
            } => {
                self.handle_tracks_resolved(generation, listing, autoplay)
                    .await;
            }

            DeckEvent::Mpv(evt) => {
                self.handle_mpv_event(evt).await;
            }

            DeckEvent::HeartbeatTick => {
                if !self.controller.backend_mut().check_alive() {
                    return false;
                }
                warn!("DeckCore: heartbeat: mpv process died");
                self.controller.on_ended();
                self.set_notice(Some(Notice::new(
                    NoticeKind::PlayerUnavailable,
                    "mpv exited unexpectedly",
                )))
                .await;
            }

            DeckEvent::Shutdown => return false,
        }
        true
    }

    // ── publishing ────────────────────────────────────────────────────────────

    async fn publish(&mut self) {
        self.snapshot.set_playback(self.controller.state()).await;
        let health = self.controller.backend().health();
        if health != self.mpv_health {
            info!("DeckCore: mpv health {:?} → {:?}", self.mpv_health, health);
            self.mpv_health = health.clone();
            self.snapshot.set_mpv_health(health).await;
        }
        let _ = self.broadcast_tx.send(BroadcastMessage::StateUpdated);
    }

    async fn set_notice(&mut self, notice: Option<Notice>) {
        if notice != self.notice {
            self.notice = notice.clone();
            self.snapshot.set_notice(notice).await;
        }
    }

    async fn report_playback_error(&mut self, e: PlaybackError) {
        warn!("DeckCore: {}", e);
        self.set_notice(Some(Notice::new(e.kind(), e.to_string())))
            .await;
    }

    /// A transport command went through; playback notices no longer apply.
    async fn clear_playback_notice(&mut self) {
        let stale = matches!(
            self.notice.as_ref().map(|n| n.kind),
            Some(NoticeKind::PlaybackRejected | NoticeKind::PlayerUnavailable)
        );
        if stale {
            self.set_notice(None).await;
        }
    }

    // ── catalog ───────────────────────────────────────────────────────────────

    fn refresh_albums(&mut self) {
        if let Some(token) = self.albums_cancel.take() {
            token.cancel();
        }
        let token = CancellationToken::new();
        self.albums_cancel = Some(token.clone());

        let catalog = Arc::clone(&self.catalog);
        let tx = self.event_tx.clone();
        tokio::spawn(async move {
            tokio::select! {
                biased;
                _ = token.cancelled() => debug!("DeckCore: album refresh cancelled"),
                listing = catalog.resolve_album_list() => {
                    let _ = tx.send(DeckEvent::AlbumsResolved(listing)).await;
                }
            }
        });
    }

    async fn load_album(&mut self, folder_id: String, autoplay: bool) {
        if let Some(token) = self.load_cancel.take() {
            token.cancel();
        }
        self.load_generation += 1;
        let generation = self.load_generation;
        let token = CancellationToken::new();
        self.load_cancel = Some(token.clone());

        let folder = self.catalog.folder_path(&folder_id);
        info!("DeckCore: loading {} (generation {})", folder, generation);
        if let Err(e) = self.controller.begin_load(folder.clone()).await {
            self.report_playback_error(e).await;
        }
        self.snapshot.set_loading(Some(folder)).await;

        let catalog = Arc::clone(&self.catalog);
        let tx = self.event_tx.clone();
        tokio::spawn(async move {
            tokio::select! {
                biased;
                _ = token.cancelled() => debug!("DeckCore: load of {} cancelled", folder_id),
                listing = catalog.resolve_tracks(&folder_id) => {
                    let _ = tx
                        .send(DeckEvent::TracksResolved { generation, listing, autoplay })
                        .await;
                }
            }
        });
    }

    async fn handle_albums_resolved(&mut self, listing: AlbumListing) {
        self.albums_cancel = None;
        if listing.is_empty() {
            let notice = listing
                .failures
                .last()
                .map(|e| Notice::new(e.kind(), e.to_string()))
                .unwrap_or_else(|| Notice::new(NoticeKind::NoAlbumsFound, "no albums found"));
            self.set_notice(Some(notice)).await;
        } else {
            info!("DeckCore: {} albums", listing.albums.len());
            if self.notice.as_ref().map(|n| n.kind) == Some(NoticeKind::NoAlbumsFound) {
                self.set_notice(None).await;
            }
        }
        self.snapshot.set_albums(listing.albums).await;
    }

    async fn handle_tracks_resolved(&mut self, generation: u64, listing: TrackListing, autoplay: bool) {
        if generation != self.load_generation {
            debug!(
                "DeckCore: dropping stale track list for {} (generation {} < {})",
                listing.folder, generation, self.load_generation
            );
            return;
        }
        self.load_cancel = None;
        self.snapshot.set_loading(None).await;

        let empty_notice = listing.is_empty().then(|| {
            listing
                .failures
                .last()
                .map(|e| Notice::new(e.kind(), e.to_string()))
                .unwrap_or_else(|| Notice::new(NoticeKind::NoTracksFound, "no tracks found"))
        });

        match self.controller.install(listing).await {
            Ok(false) => {}
            Ok(true) => match empty_notice {
                Some(notice) => self.set_notice(Some(notice)).await,
                None => {
                    self.set_notice(None).await;
                    if autoplay {
                        if let Err(e) = self.controller.toggle_play_pause().await {
                            self.report_playback_error(e).await;
                        }
                    }
                }
            },
            Err(e) => self.report_playback_error(e).await,
        }
    }

    // ── commands ──────────────────────────────────────────────────────────────

    async fn handle_command(&mut self, cmd: Command) -> Result<(), PlaybackError> {
        match cmd {
            Command::RefreshAlbums => self.refresh_albums(),
            Command::LoadAlbum { folder, autoplay } => self.load_album(folder, autoplay).await,
            Command::PlayIndex { index, autoplay } => {
                self.controller.play_index(index, autoplay).await?
            }
            Command::TogglePause => self.controller.toggle_play_pause().await?,
            Command::Next => self.controller.next().await?,
            Command::Prev => self.controller.previous().await?,
            Command::SeekFraction { fraction } => self.controller.seek_to(fraction).await?,
            Command::Volume { value } => self.controller.set_volume(value).await?,
            Command::ToggleMute => self.controller.toggle_mute().await?,
            Command::GetState => {
                // State is published after every event
            }
        }
        Ok(())
    }

    // ── mpv events ────────────────────────────────────────────────────────────

    async fn handle_mpv_event(&mut self, evt: MpvEvent) {
        if let Some((obs_id, data)) = evt.as_property_change() {
            // Progress pairs with the controller's values, which every cue
            // resets, so a new track never inherits the old duration.
            let state = self.controller.state();
            let (time_pos, duration) = (state.current_time, state.duration);
            match obs_id {
                OBS_PAUSE => {
                    if let Some(paused) = data.as_bool() {
                        debug!("mpv: pause → {}", paused);
                        self.controller.sync_paused(paused);
                    }
                }
                OBS_TIME_POS => {
                    self.controller
                        .on_progress(data.as_f64().unwrap_or(0.0), duration);
                }
                OBS_DURATION => {
                    self.controller
                        .on_progress(time_pos, data.as_f64().unwrap_or(0.0));
                }
                _ => {}
            }
            return;
        }

        if evt.event_name() == Some("start-file") {
            self.controller.backend_mut().file_started();
            return;
        }

        match evt.end_reason() {
            Some(reason @ ("eof" | "error")) => {
                if !self.controller.backend_mut().file_ended() {
                    debug!("mpv: end-file reason={} for a replaced file, ignored", reason);
                    return;
                }
                self.controller.on_ended();
                if reason == "eof" {
                    info!("mpv: end-file reason=eof");
                } else {
                    let error = evt.file_error().unwrap_or("unknown error").to_string();
                    warn!("mpv: end-file reason=error: {}", error);
                    self.report_playback_error(PlaybackError::Rejected(error))
                        .await;
                }
            }
            Some(reason) => debug!("mpv: end-file reason={}", reason),
            None => {}
        }
    }

    async fn cleanup(&mut self) {
        info!("DeckCore: cleanup — stopping mpv");
        if let Some(token) = self.load_cancel.take() {
            token.cancel();
        }
        if let Some(token) = self.albums_cancel.take() {
            token.cancel();
        }
        self.controller.backend_mut().shutdown().await;
    }
}
