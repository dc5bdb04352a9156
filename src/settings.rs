use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

use crate::plugins::video::types::{VideoMode, DEFAULT_BUFFER_CAPACITY};
use crate::shared::paths::{ensure_dir, get_settings_path};

/// Placeholder in `encoderArgs` replaced by the output file path.
pub const OUTPUT_PLACEHOLDER: &str = "{output}";

/// Application settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct AppSettings {
    /// Where recordings are written.
    pub data_dir: PathBuf,
    pub wide_video: bool,
    pub recording: RecordingSettings,
    pub feed: FeedSettings,
}

impl Default for AppSettings {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("."),
            wide_video: false,
            recording: RecordingSettings::default(),
            feed: FeedSettings::default(),
        }
    }
}

impl AppSettings {
    pub fn video_mode(&self) -> VideoMode {
        VideoMode::from_wide(self.wide_video)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RecordingSettings {
    pub buffer_capacity: usize,
    pub stop_timeout_secs: u64,
    pub drain_idle_millis: u64,
    pub file_prefix: String,
    pub file_extension: String,
    pub encoder_program: String,
    pub encoder_args: Vec<String>,
}

impl Default for RecordingSettings {
    fn default() -> Self {
        Self {
            buffer_capacity: DEFAULT_BUFFER_CAPACITY,
            stop_timeout_secs: 15,
            drain_idle_millis: 5,
            file_prefix: "tello_vid_".to_string(),
            file_extension: "avi".to_string(),
            encoder_program: "ffmpeg".to_string(),
            encoder_args: [
                "-hide_banner",
                "-loglevel",
                "warning",
                "-y",
                "-f",
                "h264",
                "-i",
                "-",
                "-r",
                "60",
                "-c:v",
                "copy",
                OUTPUT_PLACEHOLDER,
            ]
            .iter()
            .map(|s| s.to_string())
            .collect(),
        }
    }
}

impl RecordingSettings {
    pub fn stop_timeout(&self) -> Duration {
        Duration::from_secs(self.stop_timeout_secs)
    }

    pub fn drain_idle(&self) -> Duration {
        Duration::from_millis(self.drain_idle_millis)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct FeedSettings {
    /// UDP address the vehicle streams video to.
    pub listen_addr: SocketAddr,
    pub idle_timeout_secs: u64,
    pub refresh_interval_millis: u64,
}

impl Default for FeedSettings {
    fn default() -> Self {
        Self {
            listen_addr: SocketAddr::from(([0, 0, 0, 0], 11111)),
            idle_timeout_secs: 5,
            refresh_interval_millis: 30,
        }
    }
}

impl FeedSettings {
    pub fn idle_timeout(&self) -> Duration {
        Duration::from_secs(self.idle_timeout_secs)
    }

    pub fn refresh_interval(&self) -> Duration {
        Duration::from_millis(self.refresh_interval_millis)
    }
}

#[derive(Error, Debug)]
pub enum SettingsError {
    #[error("Failed to read settings file: {0}")]
    ReadError(#[from] std::io::Error),
    #[error("Failed to parse settings: {0}")]
    ParseError(#[from] serde_json::Error),
}

/// Load settings from disk, returning default if file doesn't exist or is invalid
pub fn load_settings(path: Option<&Path>) -> AppSettings {
    let path = path.map(Path::to_path_buf).unwrap_or_else(get_settings_path);

    if !path.exists() {
        tracing::info!(target: "system", "Settings file {:?} not found, using defaults", path);
        return AppSettings::default();
    }

    match load_settings_from_file(&path) {
        Ok(settings) => {
            tracing::info!(target: "system", "Settings loaded from {:?}", path);
            settings
        }
        Err(e) => {
            tracing::warn!(target: "system", "Failed to load settings: {}, using defaults", e);
            AppSettings::default()
        }
    }
}

pub fn load_settings_from_file(path: &Path) -> Result<AppSettings, SettingsError> {
    let contents = std::fs::read_to_string(path)?;
    let settings = serde_json::from_str(&contents)?;
    Ok(settings)
}

/// Save settings to disk
pub fn save_settings(settings: &AppSettings, path: &Path) -> Result<(), SettingsError> {
    if let Some(parent) = path.parent() {
        ensure_dir(parent)?;
    }

    let contents = serde_json::to_string_pretty(settings)?;
    std::fs::write(path, contents)?;

    tracing::info!(target: "system", "Settings saved to {:?}", path);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let settings = AppSettings::default();
        assert_eq!(settings.data_dir, PathBuf::from("."));
        assert_eq!(settings.video_mode(), VideoMode::Normal);
        assert_eq!(settings.recording.buffer_capacity, 5000);
        assert_eq!(settings.recording.stop_timeout(), Duration::from_secs(15));
        assert_eq!(settings.feed.listen_addr.port(), 11111);
        assert_eq!(settings.feed.refresh_interval(), Duration::from_millis(30));
        assert_eq!(
            settings.recording.encoder_args.last().map(String::as_str),
            Some(OUTPUT_PLACEHOLDER)
        );
    }

    #[test]
    fn test_partial_file_fills_defaults() {
        let json = r#"{ "dataDir": "/tmp/flights", "wideVideo": true, "recording": { "stopTimeoutSecs": 3 } }"#;
        let settings: AppSettings = serde_json::from_str(json).unwrap();

        assert_eq!(settings.data_dir, PathBuf::from("/tmp/flights"));
        assert_eq!(settings.video_mode(), VideoMode::Wide);
        assert_eq!(settings.recording.stop_timeout_secs, 3);
        assert_eq!(settings.recording.file_prefix, "tello_vid_");
        assert_eq!(settings.feed, FeedSettings::default());
    }

    #[test]
    fn test_save_then_load_from_file() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("nested").join("settings.json");

        let mut settings = AppSettings::default();
        settings.recording.buffer_capacity = 64;
        save_settings(&settings, &path).unwrap();

        assert_eq!(load_settings_from_file(&path).unwrap(), settings);
    }

    #[test]
    fn test_invalid_file_falls_back_to_defaults() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("settings.json");
        std::fs::write(&path, "{ not json").unwrap();

        assert!(matches!(
            load_settings_from_file(&path),
            Err(SettingsError::ParseError(_))
        ));
        assert_eq!(load_settings(Some(&path)), AppSettings::default());
    }

    #[test]
    fn test_missing_file_uses_defaults() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("absent.json");
        assert_eq!(load_settings(Some(&path)), AppSettings::default());
    }
}
