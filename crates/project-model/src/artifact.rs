//! Finished export description exposed to the UI layer.

use serde::{Deserialize, Serialize};

/// A finished export, available for download.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArtifactInfo {
    /// Revocable access handle (file path or URL).
    pub url: String,

    /// Total size of the encoded file.
    pub byte_size: u64,

    /// Name offered to the user when saving.
    pub suggested_filename: String,

    /// Container/codec type, e.g. `video/webm;codecs=vp9,opus`.
    pub mime_type: String,

    /// Length of the captured clip in seconds.
    pub duration_secs: f64,

    /// Whether an audio track was encoded.
    #[serde(default)]
    pub has_audio: bool,
}

impl ArtifactInfo {
    /// Size in mebibytes.
    pub fn size_megabytes(&self) -> f64 {
        self.byte_size as f64 / (1024.0 * 1024.0)
    }

    /// Size formatted for display, e.g. `"1.50 MB"`.
    pub fn display_size(&self) -> String {
        format!("{:.2} MB", self.size_megabytes())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn info(byte_size: u64) -> ArtifactInfo {
        ArtifactInfo {
            url: "mem://1".to_string(),
            byte_size,
            suggested_filename: "clipcraft-export.webm".to_string(),
            mime_type: "video/webm".to_string(),
            duration_secs: 5.0,
            has_audio: true,
        }
    }

    #[test]
    fn test_display_size() {
        assert_eq!(info(1_572_864).display_size(), "1.50 MB");
        assert_eq!(info(0).display_size(), "0.00 MB");
    }

    #[test]
    fn test_serialized_shape() {
        let json = serde_json::to_value(info(10)).unwrap();
        assert_eq!(json["suggested_filename"], "clipcraft-export.webm");
        assert_eq!(json["byte_size"], 10);
    }
}
