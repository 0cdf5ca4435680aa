//! Application configuration.

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Global application configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    /// Directory where finished exports are written.
    pub exports_dir: PathBuf,

    /// Export pipeline defaults.
    pub export: ExportDefaults,

    /// Overlay rendering defaults.
    #[serde(default)]
    pub overlay: OverlayDefaults,

    /// Logging configuration.
    pub logging: LoggingConfig,
}

/// Default export parameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExportDefaults {
    /// Nominal encoder frame rate.
    pub fps: u32,

    /// Target video bitrate in bits per second.
    pub video_bitrate: u32,

    /// Render loop pacing rate (one iteration per display refresh).
    pub refresh_hz: u32,

    /// Surface size used when the source does not report its dimensions.
    pub fallback_width: u32,
    pub fallback_height: u32,

    /// Upper bound on waiting for source metadata.
    pub metadata_timeout_secs: f64,

    /// Upper bound on waiting for a seek to settle.
    pub seek_timeout_secs: f64,

    /// Output types in descending preference order.
    pub codec_preferences: Vec<String>,

    /// File name (without extension) suggested for downloads.
    pub filename_stem: String,
}

/// Overlay rendering parameters.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct OverlayDefaults {
    /// TrueType/OpenType font used for caption glyphs.
    pub font_path: Option<PathBuf>,
}

/// Logging configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level filter (e.g., "info", "debug", "clipcraft_render=debug,warn").
    pub level: String,

    /// Whether to output structured JSON logs.
    pub json: bool,

    /// Optional log file path.
    pub file: Option<PathBuf>,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            exports_dir: dirs_default_exports(),
            export: ExportDefaults::default(),
            overlay: OverlayDefaults::default(),
            logging: LoggingConfig::default(),
        }
    }
}

impl Default for ExportDefaults {
    fn default() -> Self {
        Self {
            fps: 30,
            video_bitrate: 6_000_000,
            refresh_hz: 60,
            fallback_width: 1280,
            fallback_height: 720,
            metadata_timeout_secs: 10.0,
            seek_timeout_secs: 10.0,
            codec_preferences: vec![
                "video/webm;codecs=vp9,opus".to_string(),
                "video/webm;codecs=vp8,opus".to_string(),
                "video/x-yuv4mpeg".to_string(),
                "video/webm".to_string(),
            ],
            filename_stem: "clipcraft-export".to_string(),
        }
    }
}

impl ExportDefaults {
    pub fn metadata_timeout(&self) -> Duration {
        Duration::from_secs_f64(self.metadata_timeout_secs.max(0.0))
    }

    pub fn seek_timeout(&self) -> Duration {
        Duration::from_secs_f64(self.seek_timeout_secs.max(0.0))
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: false,
            file: None,
        }
    }
}

impl AppConfig {
    /// Load config from the standard location, falling back to defaults.
    pub fn load() -> Self {
        let config_path = config_file_path();
        if config_path.exists() {
            match std::fs::read_to_string(&config_path) {
                Ok(content) => match serde_json::from_str(&content) {
                    Ok(config) => return config,
                    Err(e) => {
                        tracing::warn!("Failed to parse config at {:?}: {}", config_path, e);
                    }
                },
                Err(e) => {
                    tracing::warn!("Failed to read config at {:?}: {}", config_path, e);
                }
            }
        }
        Self::default()
    }
}

/// Standard config file location.
fn config_file_path() -> PathBuf {
    let base = std::env::var("XDG_CONFIG_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| {
            let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
            PathBuf::from(home).join(".config")
        });
    base.join("clipcraft").join("config.json")
}

/// Default exports directory.
fn dirs_default_exports() -> PathBuf {
    let base = std::env::var("XDG_DATA_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| {
            let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
            PathBuf::from(home).join(".local").join("share")
        });
    base.join("clipcraft").join("exports")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_export_contract() {
        let defaults = ExportDefaults::default();
        assert_eq!(defaults.fps, 30);
        assert_eq!(defaults.video_bitrate, 6_000_000);
        assert_eq!(defaults.codec_preferences.first().unwrap(), "video/webm;codecs=vp9,opus");
        assert_eq!(defaults.codec_preferences.last().unwrap(), "video/webm");
        assert_eq!(defaults.seek_timeout(), Duration::from_secs(10));
    }

    #[test]
    fn config_without_overlay_section_parses() {
        let json = serde_json::to_value(AppConfig::default()).unwrap();
        let mut object = json.as_object().unwrap().clone();
        object.remove("overlay");
        let parsed: AppConfig = serde_json::from_value(serde_json::Value::Object(object)).unwrap();
        assert!(parsed.overlay.font_path.is_none());
    }
}
