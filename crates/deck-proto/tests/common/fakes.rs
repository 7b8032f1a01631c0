#![allow(dead_code)]

use async_trait::async_trait;
use deck_proto::controller::MediaBackend;
use deck_proto::error::{FetchError, PlaybackError};
use deck_proto::fetch::Fetch;
use std::collections::HashMap;
use std::sync::Mutex;

/// `Fetch` over an in-memory site.  Unknown paths answer 404; every request
/// is recorded in order.
#[derive(Default)]
pub struct MemoryFetcher {
    files: HashMap<String, String>,
    broken: HashMap<String, u16>,
    requests: Mutex<Vec<String>>,
}

impl MemoryFetcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, path: &str, body: &str) -> Self {
        self.files.insert(path.to_string(), body.to_string());
        self
    }

    /// Make `path` answer with an HTTP error status.
    pub fn failing(mut self, path: &str, status: u16) -> Self {
        self.broken.insert(path.to_string(), status);
        self
    }

    pub fn requests(&self) -> Vec<String> {
        self.requests.lock().unwrap().clone()
    }
}

#[async_trait]
impl Fetch for MemoryFetcher {
    async fn get_text(&self, path: &str) -> Result<String, FetchError> {
        let path = path.trim_start_matches('/').to_string();
        self.requests.lock().unwrap().push(path.clone());

        if let Some(status) = self.broken.get(&path) {
            return Err(FetchError::Status {
                url: path,
                status: *status,
            });
        }
        self.files.get(&path).cloned().ok_or(FetchError::Status {
            url: path,
            status: 404,
        })
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Call {
    Cue(String),
    Play,
    Pause,
    Seek(f64),
    Volume(f32),
}

/// `MediaBackend` that records every call.  `reject_play` simulates a
/// blocked autoplay.
#[derive(Default)]
pub struct RecordingBackend {
    pub calls: Vec<Call>,
    pub reject_play: bool,
}

impl RecordingBackend {
    pub fn rejecting() -> Self {
        Self {
            reject_play: true,
            ..Self::default()
        }
    }

    pub fn cued(&self) -> Vec<String> {
        self.calls
            .iter()
            .filter_map(|c| match c {
                Call::Cue(s) => Some(s.clone()),
                _ => None,
            })
            .collect()
    }
}

#[async_trait]
impl MediaBackend for RecordingBackend {
    async fn cue(&mut self, source: &str) -> Result<(), PlaybackError> {
        self.calls.push(Call::Cue(source.to_string()));
        Ok(())
    }

    async fn play(&mut self) -> Result<(), PlaybackError> {
        self.calls.push(Call::Play);
        if self.reject_play {
            return Err(PlaybackError::Rejected("autoplay blocked".into()));
        }
        Ok(())
    }

    async fn pause(&mut self) -> Result<(), PlaybackError> {
        self.calls.push(Call::Pause);
        Ok(())
    }

    async fn seek(&mut self, seconds: f64) -> Result<(), PlaybackError> {
        self.calls.push(Call::Seek(seconds));
        Ok(())
    }

    async fn set_volume(&mut self, volume: f32) -> Result<(), PlaybackError> {
        self.calls.push(Call::Volume(volume));
        Ok(())
    }
}
