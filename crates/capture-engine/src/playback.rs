//! Source playback control during an export.

use std::time::Duration;

use clipcraft_common::error::{ClipcraftError, ClipcraftResult};
use clipcraft_model::playback::{PlaybackSettings, EXPORT_RATE};

use crate::source::{AudioTrack, MediaSource, SourceMetadata, VideoFrame};

/// Bounds on the event-driven waits.
#[derive(Debug, Clone, Copy)]
pub struct PlaybackTimeouts {
    pub metadata: Duration,
    pub seek: Duration,
}

impl Default for PlaybackTimeouts {
    fn default() -> Self {
        Self {
            metadata: Duration::from_secs(10),
            seek: Duration::from_secs(10),
        }
    }
}

/// Drives a source's play/pause/seek state for the length of one export.
pub struct PlaybackController<'a> {
    source: &'a mut dyn MediaSource,
    timeouts: PlaybackTimeouts,
    duration_secs: Option<f64>,
}

impl<'a> PlaybackController<'a> {
    pub fn new(source: &'a mut dyn MediaSource, timeouts: PlaybackTimeouts) -> Self {
        Self {
            source,
            timeouts,
            duration_secs: None,
        }
    }

    /// Suspend until duration and dimensions are known. Returns at once
    /// when they already are.
    pub async fn ensure_metadata_loaded(&mut self) -> ClipcraftResult<SourceMetadata> {
        let metadata = match self.source.metadata().filter(SourceMetadata::is_loaded) {
            Some(metadata) => metadata,
            None => {
                tracing::debug!(source = self.source.name(), "Waiting for source metadata");
                tokio::time::timeout(self.timeouts.metadata, self.source.wait_metadata())
                    .await
                    .map_err(|_| {
                        ClipcraftError::timeout("source metadata", self.timeouts.metadata)
                    })??
            }
        };

        if !metadata.is_loaded() {
            return Err(ClipcraftError::playback(format!(
                "Source reported an unusable duration: {}",
                metadata.duration_secs
            )));
        }

        self.duration_secs = Some(metadata.duration_secs);
        Ok(metadata)
    }

    /// Pause, apply the export's mute flag and reset the rate to
    /// [`EXPORT_RATE`]. Returns the rate that was active before, for
    /// [`Self::pause_and_restore`].
    pub fn prepare(&mut self, settings: &PlaybackSettings) -> f64 {
        let previous = self.source.playback_rate();
        self.source.pause();
        self.source.set_muted(settings.muted);
        self.source.set_playback_rate(EXPORT_RATE);
        previous
    }

    /// Seek to `clamp(position, 0, duration)` and suspend until the
    /// source reports the seek settled. Returns the clamped target.
    pub async fn seek_to(&mut self, position: f64) -> ClipcraftResult<f64> {
        let upper = self.duration_secs.unwrap_or(position.max(0.0));
        let target = position.max(0.0).min(upper);

        tracing::debug!(target, "Seeking source");
        tokio::time::timeout(self.timeouts.seek, self.source.seek(target))
            .await
            .map_err(|_| ClipcraftError::timeout("seek to settle", self.timeouts.seek))??;
        Ok(target)
    }

    /// Start playback at `rate`. A refused play request is logged and
    /// reported as `false`; it never fails the export.
    pub async fn play_at_rate(&mut self, rate: f64) -> bool {
        self.source.set_playback_rate(rate);
        match self.source.play().await {
            Ok(()) => true,
            Err(e) => {
                tracing::warn!(error = %e, source = self.source.name(), "Playback did not start");
                false
            }
        }
    }

    /// Current playback time in seconds.
    pub fn current_position(&self) -> f64 {
        self.source.position()
    }

    /// Whether playback is at or past `end`, or the media has ended.
    pub fn has_reached(&self, end: f64) -> bool {
        self.source.position() >= end || self.source.is_ended()
    }

    pub fn pause(&mut self) {
        self.source.pause();
    }

    /// Stop playback and put the pre-export rate back.
    pub fn pause_and_restore(&mut self, previous_rate: f64) {
        self.source.pause();
        self.source.set_playback_rate(previous_rate);
    }

    pub fn current_frame(&self) -> Option<VideoFrame> {
        self.source.current_frame()
    }

    /// Tap the source audio. Any failure degrades to video-only.
    pub fn capture_audio(&mut self) -> Option<AudioTrack> {
        match self.source.capture_audio() {
            Ok(track) => track,
            Err(e) => {
                tracing::debug!(error = %e, "Audio capture unavailable; exporting video only");
                None
            }
        }
    }
}
