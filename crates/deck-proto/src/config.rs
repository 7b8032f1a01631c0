use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

use super::platform;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub catalog: CatalogConfig,
    #[serde(default)]
    pub player: PlayerConfig,
    #[serde(default)]
    pub http: HttpConfig,
}

/// Where albums live and how they are discovered.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CatalogConfig {
    /// Site the album folders are served from.
    #[serde(default = "default_base_url")]
    pub base_url: String,
    /// Folder holding the album folders, relative to `base_url`.
    #[serde(default = "default_root")]
    pub root: String,
    #[serde(default = "default_manifest_file")]
    pub manifest_file: String,
    #[serde(default = "default_descriptor_file")]
    pub descriptor_file: String,
    #[serde(default = "default_cover_file")]
    pub cover_file: String,
    #[serde(default = "default_audio_extension")]
    pub audio_extension: String,
    /// Scrape HTML directory listings when the manifest or a descriptor is
    /// missing.  Only works on hosts that serve listings.
    #[serde(default)]
    pub directory_fallback: bool,
    /// Match `audio_extension` ignoring case when scraping listings.
    #[serde(default)]
    pub extension_case_insensitive: bool,
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlayerConfig {
    /// Album folder cued (paused) at startup.  Empty disables it.
    #[serde(default = "default_folder")]
    pub default_folder: String,
    #[serde(default = "default_volume")]
    pub default_volume: f32,
    /// Explicit mpv binary.  Empty searches beside the executable, then `PATH`.
    #[serde(default)]
    pub mpv_path: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HttpConfig {
    #[serde(default = "default_http_enabled")]
    pub enabled: bool,
    #[serde(default = "default_bind_address")]
    pub bind_address: String,
    #[serde(default = "default_port")]
    pub port: u16,
}

impl PlayerConfig {
    pub fn mpv_path(&self) -> Option<PathBuf> {
        let path = self.mpv_path.trim();
        (!path.is_empty()).then(|| PathBuf::from(path))
    }
}

impl CatalogConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs.max(1))
    }
}

impl Default for CatalogConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            root: default_root(),
            manifest_file: default_manifest_file(),
            descriptor_file: default_descriptor_file(),
            cover_file: default_cover_file(),
            audio_extension: default_audio_extension(),
            directory_fallback: false,
            extension_case_insensitive: false,
            request_timeout_secs: default_request_timeout_secs(),
        }
    }
}

impl Default for PlayerConfig {
    fn default() -> Self {
        Self {
            default_folder: default_folder(),
            default_volume: default_volume(),
            mpv_path: String::new(),
        }
    }
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            enabled: default_http_enabled(),
            bind_address: default_bind_address(),
            port: default_port(),
        }
    }
}

fn default_base_url() -> String {
    "http://127.0.0.1:8000/".to_string()
}

fn default_root() -> String {
    "songs".to_string()
}

fn default_manifest_file() -> String {
    "index.json".to_string()
}

fn default_descriptor_file() -> String {
    "info.json".to_string()
}

fn default_cover_file() -> String {
    "cover.jpeg".to_string()
}

fn default_audio_extension() -> String {
    ".mp3".to_string()
}

fn default_request_timeout_secs() -> u64 {
    10
}

fn default_folder() -> String {
    "ncs".to_string()
}

fn default_volume() -> f32 {
    1.0
}

fn default_http_enabled() -> bool {
    true
}

fn default_bind_address() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    8991
}

impl Config {
    pub fn load() -> anyhow::Result<Self> {
        let config_path = Self::config_path();

        if !config_path.exists() {
            let config = Self::default();
            config.save()?;
            return Ok(config);
        }

        let content = std::fs::read_to_string(&config_path)?;
        Self::from_toml_str(&content)
    }

    pub fn from_toml_str(content: &str) -> anyhow::Result<Self> {
        let config: Self = toml::from_str(content)?;
        Ok(config)
    }

    pub fn save(&self) -> anyhow::Result<()> {
        let config_path = Self::config_path();
        if let Some(parent) = config_path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content = toml::to_string_pretty(self)?;
        std::fs::write(&config_path, content)?;
        Ok(())
    }

    pub fn config_path() -> PathBuf {
        platform::config_dir().join("config.toml")
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            catalog: CatalogConfig::default(),
            player: PlayerConfig::default(),
            http: HttpConfig::default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert!(config.http.enabled);
        assert_eq!(config.http.port, 8991);
        assert_eq!(config.http.bind_address, "127.0.0.1");
        assert_eq!(config.catalog.root, "songs");
        assert_eq!(config.catalog.audio_extension, ".mp3");
        assert!(!config.catalog.directory_fallback);
        assert_eq!(config.player.default_folder, "ncs");
        assert_eq!(config.player.mpv_path(), None);
        assert!(Config::config_path().ends_with("songdeck/config.toml"));
    }

    #[test]
    fn test_partial_toml_takes_defaults() {
        let config = Config::from_toml_str(
            r#"
            [catalog]
            base_url = "https://example.github.io/player/"
            directory_fallback = true
            "#,
        )
        .unwrap();
        assert_eq!(config.catalog.base_url, "https://example.github.io/player/");
        assert!(config.catalog.directory_fallback);
        assert_eq!(config.catalog.descriptor_file, "info.json");
        assert_eq!(config.catalog.request_timeout(), Duration::from_secs(10));
        assert_eq!(config.http.port, 8991);
    }

    #[test]
    fn test_mpv_path_from_config() {
        let config = Config::from_toml_str(
            r#"
            [player]
            mpv_path = "/opt/mpv/bin/mpv"
            "#,
        )
        .unwrap();
        assert_eq!(
            config.player.mpv_path(),
            Some(PathBuf::from("/opt/mpv/bin/mpv"))
        );
        assert_eq!(config.player.default_volume, 1.0);
    }

    #[test]
    fn test_roundtrip_through_toml() {
        let text = toml::to_string_pretty(&Config::default()).unwrap();
        let back = Config::from_toml_str(&text).unwrap();
        assert_eq!(back.catalog.cover_file, "cover.jpeg");
        assert_eq!(back.player.default_volume, 1.0);
    }
}
