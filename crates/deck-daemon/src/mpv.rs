/// mpv IPC driver and the `MediaBackend` built on it.
///
/// ```text
///   MpvDriver::spawn_and_connect()
///         │
///         ├── writer_task   ← receives MpvRequest via mpsc, serialises → socket
///         └── reader_task   ← reads JSON lines from socket
///                                ├── response (has request_id) → matched oneshot::Sender
///                                └── event / property-change   → event_tx channel
/// ```
///
/// `MpvBackend` spawns mpv lazily on the first cue.  When the process has
/// died, the next cue or play respawns it and reloads the cued file.  Sources are site-relative `folder/track` paths joined
/// onto the catalog base URL.
///
/// Platform notes:
/// - Unix:   Unix domain sockets
/// - Windows: Named pipes  \\.\pipe\<name>
use async_trait::async_trait;
use deck_proto::controller::MediaBackend;
use deck_proto::error::PlaybackError;
use deck_proto::fetch::join_relative;
use deck_proto::protocol::MpvHealth;
use reqwest::Url;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::sync::{mpsc, oneshot, Mutex};
use tracing::{debug, info, warn};

use crate::core::PlayerProcess;

#[cfg(unix)]
use tokio::net::UnixStream;

#[cfg(windows)]
use tokio::net::windows::named_pipe::ClientOptions;

static NEXT_REQ_ID: AtomicU64 = AtomicU64::new(1);

// ── observation property IDs ──────────────────────────────────────────────────

pub const OBS_PAUSE: u64 = 1;
pub const OBS_TIME_POS: u64 = 2;
pub const OBS_DURATION: u64 = 3;

type PendingMap = Arc<Mutex<HashMap<u64, oneshot::Sender<anyhow::Result<Value>>>>>;

struct PendingRequest {
    req_id: u64,
    payload: String, // serialised JSON line (already has '\n')
    reply: oneshot::Sender<anyhow::Result<Value>>,
}

/// An mpv event / property-change that arrived unsolicited (no request_id).
#[derive(Debug, Clone)]
pub struct MpvEvent {
    pub raw: Value,
}

impl MpvEvent {
    /// Returns `Some((obs_id, data))` if this is a property-change event.
    pub fn as_property_change(&self) -> Option<(u64, &Value)> {
        if self.raw.get("event")?.as_str()? == "property-change" {
            let id = self.raw.get("id")?.as_u64()?;
            let data = self.raw.get("data").unwrap_or(&Value::Null);
            Some((id, data))
        } else {
            None
        }
    }

    /// Returns the event name, e.g. "end-file", "start-file", "file-loaded".
    pub fn event_name(&self) -> Option<&str> {
        self.raw.get("event")?.as_str()
    }

    /// `reason` of an `end-file` event ("eof", "stop", "error", ...).
    pub fn end_reason(&self) -> Option<&str> {
        if self.event_name()? != "end-file" {
            return None;
        }
        Some(self.raw.get("reason").and_then(Value::as_str).unwrap_or("unknown"))
    }

    /// mpv's error text for a failed `end-file`, if any.
    pub fn file_error(&self) -> Option<&str> {
        self.raw.get("file_error").and_then(Value::as_str)
    }
}

// ── public handle ─────────────────────────────────────────────────────────────

/// Cloneable handle to the mpv writer task.
#[derive(Clone)]
pub struct MpvHandle {
    tx: mpsc::Sender<PendingRequest>,
}

impl MpvHandle {
    pub async fn send(&self, command: Value) -> anyhow::Result<Value> {
        let req_id = NEXT_REQ_ID.fetch_add(1, Ordering::Relaxed);
        let msg = json!({ "command": command, "request_id": req_id });
        let mut raw = serde_json::to_string(&msg)?;
        raw.push('\n');

        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send(PendingRequest {
                req_id,
                payload: raw,
                reply: reply_tx,
            })
            .await
            .map_err(|_| anyhow::anyhow!("mpv writer task gone"))?;

        tokio::time::timeout(tokio::time::Duration::from_secs(5), reply_rx)
            .await
            .map_err(|_| anyhow::anyhow!("mpv IPC timeout for req={}", req_id))?
            .map_err(|_| anyhow::anyhow!("mpv reply channel dropped req={}", req_id))?
    }

    /// Replace the current file.  mpv keeps the `pause` property across
    /// loads, so callers set it first.
    pub async fn load_file(&self, url: &str) -> anyhow::Result<()> {
        self.send(json!(["loadfile", url, "replace"])).await?;
        Ok(())
    }

    pub async fn stop(&self) -> anyhow::Result<()> {
        let _ = self.send(json!(["stop"])).await;
        Ok(())
    }

    pub async fn set_volume(&self, vol: f32) -> anyhow::Result<()> {
        self.send(json!(["set_property", "volume", volume_percent(vol)]))
            .await?;
        Ok(())
    }

    pub async fn set_pause(&self, paused: bool) -> anyhow::Result<()> {
        self.send(json!(["set_property", "pause", paused])).await?;
        Ok(())
    }

    pub async fn seek_to(&self, secs: f64) -> anyhow::Result<()> {
        self.send(json!(["seek", secs, "absolute"])).await?;
        Ok(())
    }

    /// Register observe_property for pause, time-pos and duration.  Must be
    /// called after every fresh connection.
    pub async fn observe_all_properties(&self) {
        let props = [
            (OBS_PAUSE, "pause"),
            (OBS_TIME_POS, "time-pos"),
            (OBS_DURATION, "duration"),
        ];
        for (id, name) in &props {
            match self.send(json!(["observe_property", id, name])).await {
                Ok(_) => debug!("mpv: observe_property id={} name={}", id, name),
                Err(e) => warn!("mpv: observe_property {} failed: {}", name, e),
            }
        }
    }
}

fn volume_percent(volume: f32) -> f64 {
    (f64::from(volume) * 100.0).clamp(0.0, 100.0).round()
}

// ── driver ────────────────────────────────────────────────────────────────────

/// Owns the mpv child process.
pub struct MpvDriver {
    socket_name: String,
    binary: Option<PathBuf>,
    process: Option<tokio::process::Child>,
    pub last_volume: f32,
}

impl MpvDriver {
    pub fn new(volume: f32) -> Self {
        Self {
            socket_name: deck_proto::platform::mpv_socket_name(),
            binary: None,
            process: None,
            last_volume: volume,
        }
    }

    pub fn process_alive(&mut self) -> bool {
        if let Some(ref mut child) = self.process {
            child.try_wait().ok().flatten().is_none()
        } else {
            false
        }
    }

    pub async fn kill(&mut self) {
        if let Some(mut p) = self.process.take() {
            let _ = p.kill().await;
        }
    }

    fn spawn_process(&mut self) -> anyhow::Result<()> {
        info!("mpv: spawning new process");
        let mpv_binary = deck_proto::platform::find_mpv_binary(self.binary.as_deref())
            .ok_or_else(|| anyhow::anyhow!("mpv binary not found"))?;

        let child = tokio::process::Command::new(mpv_binary)
            .arg("--no-video")
            .arg("--idle=yes")
            .arg(deck_proto::platform::mpv_socket_arg())
            .arg("--quiet")
            .arg(format!("--volume={}", volume_percent(self.last_volume)))
            .stdout(std::process::Stdio::null())
            .stderr(std::process::Stdio::null())
            .kill_on_drop(true)
            .spawn()?;
        self.process = Some(child);
        Ok(())
    }

    #[cfg(unix)]
    pub async fn spawn_and_connect(
        &mut self,
        event_tx: mpsc::Sender<MpvEvent>,
    ) -> anyhow::Result<MpvHandle> {
        self.kill().await;

        let socket_path = std::path::PathBuf::from(&self.socket_name);
        let _ = tokio::fs::remove_file(&socket_path).await;

        self.spawn_process()?;

        for _ in 0..50 {
            tokio::time::sleep(tokio::time::Duration::from_millis(100)).await;
            if socket_path.exists() {
                break;
            }
        }
        if !socket_path.exists() {
            anyhow::bail!("mpv IPC socket did not appear");
        }
        tokio::time::sleep(tokio::time::Duration::from_millis(200)).await;

        let stream = UnixStream::connect(&socket_path).await?;
        info!("mpv: connected to IPC socket");
        let (read_half, write_half) = stream.into_split();
        Ok(start_io_tasks(read_half, write_half, event_tx))
    }

    #[cfg(windows)]
    pub async fn spawn_and_connect(
        &mut self,
        event_tx: mpsc::Sender<MpvEvent>,
    ) -> anyhow::Result<MpvHandle> {
        self.kill().await;
        self.spawn_process()?;

        let pipe_path = format!(r"\\.\pipe\{}", self.socket_name);
        for _ in 0..50 {
            tokio::time::sleep(tokio::time::Duration::from_millis(100)).await;
            if let Ok(client) = ClientOptions::new().open(&pipe_path) {
                info!("mpv: connected to named pipe");
                let (read_half, write_half) = tokio::io::split(client);
                return Ok(start_io_tasks(read_half, write_half, event_tx));
            }
        }
        anyhow::bail!("mpv named pipe did not appear")
    }
}

fn start_io_tasks<R, W>(read_half: R, write_half: W, event_tx: mpsc::Sender<MpvEvent>) -> MpvHandle
where
    R: tokio::io::AsyncRead + Unpin + Send + 'static,
    W: tokio::io::AsyncWrite + Unpin + Send + 'static,
{
    // req_id → reply channel.  Writer inserts, reader resolves.
    let pending: PendingMap = Arc::new(Mutex::new(HashMap::new()));
    let (cmd_tx, cmd_rx) = mpsc::channel::<PendingRequest>(64);

    tokio::spawn(writer_task(write_half, cmd_rx, pending.clone()));
    tokio::spawn(reader_task(BufReader::new(read_half), pending, event_tx));

    MpvHandle { tx: cmd_tx }
}

// ── reader task ───────────────────────────────────────────────────────────────

async fn fail_pending(pending: &PendingMap, reason: &str) {
    let mut map = pending.lock().await;
    for (_, tx) in map.drain() {
        let _ = tx.send(Err(anyhow::anyhow!("{}", reason)));
    }
}

async fn reader_task<R>(mut reader: BufReader<R>, pending: PendingMap, event_tx: mpsc::Sender<MpvEvent>)
where
    R: tokio::io::AsyncRead + Unpin,
{
    let mut line = String::new();
    loop {
        line.clear();
        match reader.read_line(&mut line).await {
            Ok(0) => {
                debug!("mpv reader: connection closed");
                fail_pending(&pending, "mpv IPC connection closed").await;
                break;
            }
            Ok(_) => {
                let trimmed = line.trim();
                if trimmed.is_empty() {
                    continue;
                }
                let val: Value = match serde_json::from_str(trimmed) {
                    Ok(v) => v,
                    Err(e) => {
                        debug!("mpv reader: invalid json '{}': {}", trimmed, e);
                        continue;
                    }
                };

                if let Some(req_id) = val.get("request_id").and_then(|v| v.as_u64()) {
                    let mut map = pending.lock().await;
                    if let Some(tx) = map.remove(&req_id) {
                        let result = if val["error"].as_str() == Some("success") {
                            Ok(val)
                        } else {
                            let err = val["error"].as_str().unwrap_or("unknown error").to_string();
                            debug!("mpv reader: response req={} err={}", req_id, err);
                            Err(anyhow::anyhow!("mpv error: {}", err))
                        };
                        let _ = tx.send(result);
                    } else {
                        debug!("mpv reader: response for unknown req={}", req_id);
                    }
                } else if event_tx.send(MpvEvent { raw: val }).await.is_err() {
                    debug!("mpv reader: event receiver gone");
                    break;
                }
            }
            Err(e) => {
                warn!("mpv reader: read error: {}", e);
                fail_pending(&pending, &format!("mpv IPC read error: {}", e)).await;
                break;
            }
        }
    }
}

// ── writer task ───────────────────────────────────────────────────────────────

async fn writer_task<W>(mut writer: W, mut rx: mpsc::Receiver<PendingRequest>, pending: PendingMap)
where
    W: tokio::io::AsyncWrite + Unpin,
{
    while let Some(req) = rx.recv().await {
        // Register before writing so the reader can match the reply.
        pending.lock().await.insert(req.req_id, req.reply);

        debug!("mpv writer: send req={} payload={}", req.req_id, req.payload.trim());
        if let Err(e) = writer.write_all(req.payload.as_bytes()).await {
            warn!("mpv writer: write error: {}", e);
            if let Some(tx) = pending.lock().await.remove(&req.req_id) {
                let _ = tx.send(Err(anyhow::anyhow!("mpv write error: {}", e)));
            }
            break;
        }
    }
    debug!("mpv writer: task exiting");
}

// ── media backend ─────────────────────────────────────────────────────────────

/// `MediaBackend` that plays sources through an mpv process.
pub struct MpvBackend {
    driver: MpvDriver,
    handle: Option<MpvHandle>,
    base_url: Url,
    event_tx: mpsc::Sender<MpvEvent>,
    health: MpvHealth,
    /// URL of the cued file, reloaded by `play` after it ended or mpv restarted.
    cued_url: Option<String>,
    ended: bool,
    /// Set by a load until mpv reports `start-file`; end-file events seen
    /// meanwhile belong to the file being replaced.
    awaiting_start: bool,
}

/// How `play` gets the cued file sounding.
#[derive(Debug, PartialEq)]
enum StartAction {
    Resume,
    /// Load the file again first (it ended, or mpv was restarted).
    Reload(String),
    Unavailable,
}

impl MpvBackend {
    pub fn new(base_url: Url, volume: f32, event_tx: mpsc::Sender<MpvEvent>) -> Self {
        Self {
            driver: MpvDriver::new(volume),
            handle: None,
            base_url,
            event_tx,
            health: MpvHealth::Absent,
            cued_url: None,
            ended: false,
            awaiting_start: false,
        }
    }

    /// Use `binary` instead of searching for mpv.
    pub fn with_binary(mut self, binary: Option<PathBuf>) -> Self {
        self.driver.binary = binary;
        self
    }

    fn start_action(&self) -> StartAction {
        match (&self.handle, &self.cued_url) {
            (None, Some(url)) => StartAction::Reload(url.clone()),
            (None, None) => StartAction::Unavailable,
            (Some(_), Some(url)) if self.ended => StartAction::Reload(url.clone()),
            (Some(_), _) => StartAction::Resume,
        }
    }

    async fn ensure_handle(&mut self) -> Result<MpvHandle, PlaybackError> {
        self.check_alive();
        if let Some(handle) = &self.handle {
            return Ok(handle.clone());
        }

        self.health = MpvHealth::Starting;
        match self.driver.spawn_and_connect(self.event_tx.clone()).await {
            Ok(handle) => {
                handle.observe_all_properties().await;
                self.health = MpvHealth::Running;
                self.handle = Some(handle.clone());
                Ok(handle)
            }
            Err(e) => {
                warn!("mpv: failed to start: {}", e);
                self.health = MpvHealth::Dead;
                Err(PlaybackError::Backend(e.to_string()))
            }
        }
    }

    fn connected(&self) -> Result<&MpvHandle, PlaybackError> {
        self.handle
            .as_ref()
            .ok_or_else(|| PlaybackError::Backend("mpv is not running".into()))
    }
}

#[async_trait]
impl PlayerProcess for MpvBackend {
    fn health(&self) -> MpvHealth {
        self.health.clone()
    }

    fn check_alive(&mut self) -> bool {
        if self.handle.is_some() && !self.driver.process_alive() {
            warn!("mpv: process died, dropping handle");
            self.handle = None;
            self.health = MpvHealth::Dead;
            return true;
        }
        false
    }

    fn file_started(&mut self) {
        self.awaiting_start = false;
    }

    fn file_ended(&mut self) -> bool {
        if self.awaiting_start {
            return false;
        }
        self.ended = true;
        true
    }

    async fn shutdown(&mut self) {
        if let Some(handle) = self.handle.take() {
            let _ = handle.stop().await;
        }
        self.driver.kill().await;
        self.health = MpvHealth::Absent;
    }
}

fn backend_err(e: anyhow::Error) -> PlaybackError {
    PlaybackError::Backend(e.to_string())
}

#[async_trait]
impl MediaBackend for MpvBackend {
    async fn cue(&mut self, source: &str) -> Result<(), PlaybackError> {
        let url = join_relative(&self.base_url, source)
            .map_err(|e| PlaybackError::Backend(e.to_string()))?
            .to_string();
        let handle = self.ensure_handle().await?;

        handle.set_pause(true).await.map_err(backend_err)?;
        handle.load_file(&url).await.map_err(backend_err)?;
        info!("mpv: cued {}", url);
        self.cued_url = Some(url);
        self.ended = false;
        self.awaiting_start = true;
        Ok(())
    }

    async fn play(&mut self) -> Result<(), PlaybackError> {
        self.check_alive();
        let handle = match self.start_action() {
            StartAction::Unavailable => {
                return Err(PlaybackError::Backend("mpv is not running".into()))
            }
            StartAction::Resume => self.connected()?.clone(),
            StartAction::Reload(url) => {
                // Respawns mpv when the process is gone.
                let handle = self.ensure_handle().await?;
                debug!("mpv: reloading {}", url);
                handle
                    .load_file(&url)
                    .await
                    .map_err(|e| PlaybackError::Rejected(e.to_string()))?;
                self.ended = false;
                self.awaiting_start = true;
                handle
            }
        };
        handle
            .set_pause(false)
            .await
            .map_err(|e| PlaybackError::Rejected(e.to_string()))
    }

    async fn pause(&mut self) -> Result<(), PlaybackError> {
        match &self.handle {
            Some(handle) => handle.set_pause(true).await.map_err(backend_err),
            // Nothing can be sounding.
            None => Ok(()),
        }
    }

    async fn seek(&mut self, seconds: f64) -> Result<(), PlaybackError> {
        self.connected()?.seek_to(seconds).await.map_err(backend_err)
    }

    async fn set_volume(&mut self, volume: f32) -> Result<(), PlaybackError> {
        self.driver.last_volume = volume;
        match &self.handle {
            Some(handle) => handle.set_volume(volume).await.map_err(backend_err),
            // Applied on spawn through --volume.
            None => Ok(()),
        }
    }
}
