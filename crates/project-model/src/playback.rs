//! Preview playback settings.

use serde::{Deserialize, Serialize};

/// Slowest preview rate offered to the user.
pub const MIN_PREVIEW_RATE: f64 = 0.25;

/// Fastest preview rate offered to the user.
pub const MAX_PREVIEW_RATE: f64 = 2.0;

/// Rate the source is played at while exporting, so the capture runs in
/// real time and the clip keeps its true duration.
pub const EXPORT_RATE: f64 = 1.0;

/// Playback rate and mute flag.
///
/// Applied continuously to the preview; applied once, as a snapshot, to
/// an export.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PlaybackSettings {
    rate: f64,
    pub muted: bool,
}

impl Default for PlaybackSettings {
    fn default() -> Self {
        Self {
            rate: 1.0,
            muted: false,
        }
    }
}

impl PlaybackSettings {
    pub fn new(rate: f64, muted: bool) -> Self {
        let mut settings = Self {
            muted,
            ..Self::default()
        };
        settings.set_rate(rate);
        settings
    }

    pub fn rate(&self) -> f64 {
        self.rate
    }

    /// Set the preview rate, clamped to the supported range.
    pub fn set_rate(&mut self, rate: f64) {
        if rate.is_finite() {
            self.rate = rate.clamp(MIN_PREVIEW_RATE, MAX_PREVIEW_RATE);
        }
    }

    /// Settings an export runs with: same mute flag, real-time rate.
    pub fn for_export(&self) -> Self {
        Self {
            rate: EXPORT_RATE,
            muted: self.muted,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rate_is_clamped() {
        assert_eq!(PlaybackSettings::new(8.0, false).rate(), MAX_PREVIEW_RATE);
        assert_eq!(PlaybackSettings::new(0.0, false).rate(), MIN_PREVIEW_RATE);
        assert_eq!(PlaybackSettings::new(f64::NAN, false).rate(), 1.0);
    }

    #[test]
    fn test_export_snapshot_forces_real_time() {
        let preview = PlaybackSettings::new(1.75, true);
        let export = preview.for_export();
        assert_eq!(export.rate(), EXPORT_RATE);
        assert!(export.muted);
    }
}
