//! Media source contract consumed by the export pipeline.

use std::time::Duration;

use clipcraft_common::error::{ClipcraftError, ClipcraftResult};
use image::RgbaImage;
use tokio::sync::mpsc;

/// Properties known once the source's metadata has loaded.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SourceMetadata {
    /// Natural frame width (0 when unknown).
    pub width: u32,
    /// Natural frame height (0 when unknown).
    pub height: u32,
    /// Total duration in seconds.
    pub duration_secs: f64,
}

impl SourceMetadata {
    /// Metadata counts as loaded once the duration is finite and non-zero.
    pub fn is_loaded(&self) -> bool {
        self.duration_secs.is_finite() && self.duration_secs > 0.0
    }

    /// Natural dimensions, or the given fallback when either is unknown.
    pub fn dimensions_or(&self, fallback_width: u32, fallback_height: u32) -> (u32, u32) {
        if self.width == 0 || self.height == 0 {
            (fallback_width, fallback_height)
        } else {
            (self.width, self.height)
        }
    }
}

/// A decoded video frame at a playback position.
#[derive(Debug, Clone)]
pub struct VideoFrame {
    pub image: RgbaImage,
    pub position_secs: f64,
}

/// Interleaved f32 PCM samples.
#[derive(Debug, Clone)]
pub struct AudioBuffer {
    pub samples: Vec<f32>,
    /// Media position of the first sample.
    pub pts: Duration,
}

/// A live audio stream taken from the source.
#[derive(Debug)]
pub struct AudioTrack {
    pub sample_rate: u32,
    pub channels: u16,
    receiver: mpsc::Receiver<AudioBuffer>,
}

impl AudioTrack {
    /// Create a track and the sender that feeds it.
    pub fn channel(
        sample_rate: u32,
        channels: u16,
        capacity: usize,
    ) -> (mpsc::Sender<AudioBuffer>, Self) {
        let (tx, receiver) = mpsc::channel(capacity.max(1));
        (
            tx,
            Self {
                sample_rate,
                channels,
                receiver,
            },
        )
    }

    /// Next buffer, or `None` once the producer has gone away.
    pub async fn recv(&mut self) -> Option<AudioBuffer> {
        self.receiver.recv().await
    }
}

/// The audio tap of one source.
///
/// A source hands out one [`AudioTrack`] at a time. Once that track is
/// dropped the tap can be opened again for the next export.
#[derive(Debug, Default)]
pub struct AudioTap {
    sender: Option<mpsc::WeakSender<AudioBuffer>>,
}

impl AudioTap {
    /// Open a new track. Fails while a previous track is still held.
    pub fn open(
        &mut self,
        sample_rate: u32,
        channels: u16,
        capacity: usize,
    ) -> ClipcraftResult<(mpsc::Sender<AudioBuffer>, AudioTrack)> {
        if self.is_live() {
            return Err(ClipcraftError::capture("Audio output is already captured"));
        }
        let (tx, track) = AudioTrack::channel(sample_rate, channels, capacity);
        self.sender = Some(tx.downgrade());
        Ok((tx, track))
    }

    /// Whether a handed-out track is still being read.
    pub fn is_live(&self) -> bool {
        self.sender
            .as_ref()
            .and_then(mpsc::WeakSender::upgrade)
            .is_some_and(|tx| !tx.is_closed())
    }
}

/// A loaded media source the export can drive.
///
/// Each awaitable operation resolves exactly once, on the underlying
/// event ("metadata ready", "seek settled", "play started"), never on a
/// fixed delay.
#[async_trait::async_trait]
pub trait MediaSource: Send {
    /// Short name for logging.
    fn name(&self) -> &str;

    /// Metadata if it has already loaded.
    fn metadata(&self) -> Option<SourceMetadata>;

    /// Suspend until metadata is available.
    async fn wait_metadata(&mut self) -> ClipcraftResult<SourceMetadata>;

    /// Current playback position in seconds.
    fn position(&self) -> f64;

    /// Move to `position` and suspend until the seek has settled.
    async fn seek(&mut self, position: f64) -> ClipcraftResult<()>;

    /// Start forward playback. Fails if the runtime refuses to play.
    async fn play(&mut self) -> ClipcraftResult<()>;

    fn pause(&mut self);

    fn is_playing(&self) -> bool;

    /// Whether playback has reached the end of the media.
    fn is_ended(&self) -> bool;

    fn playback_rate(&self) -> f64;

    fn set_playback_rate(&mut self, rate: f64);

    fn muted(&self) -> bool;

    fn set_muted(&mut self, muted: bool);

    /// The frame at the current position, if one has been decoded.
    fn current_frame(&self) -> Option<VideoFrame>;

    /// Tap the source's audio output. `Ok(None)` when the source has no
    /// audio.
    fn capture_audio(&mut self) -> ClipcraftResult<Option<AudioTrack>>;
}
