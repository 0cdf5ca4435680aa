//! Generated test-pattern source.
//!
//! Plays in real time on the tokio clock, so paused-time tests drive it
//! deterministically. Also backs `clipcraft export --synthetic`.

use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use clipcraft_common::error::{ClipcraftError, ClipcraftResult};
use image::{Rgba, RgbaImage};
use tokio::time::{Instant, MissedTickBehavior};

use crate::source::{
    AudioBuffer, AudioTap, AudioTrack, MediaSource, SourceMetadata, VideoFrame,
};

const AUDIO_BLOCK: Duration = Duration::from_millis(20);
const AUDIO_CHANNELS: u16 = 2;
const TONE_HZ: f64 = 440.0;

#[derive(Debug, Clone)]
pub struct SyntheticConfig {
    pub width: u32,
    pub height: u32,
    pub duration_secs: f64,
    /// Whether the source has an audio track.
    pub audio: bool,
    pub sample_rate: u32,
    /// Time from creation until metadata is available.
    pub metadata_delay: Duration,
    /// Time each seek takes to settle.
    pub seek_latency: Duration,
    /// Refuse every play request.
    pub autoplay_blocked: bool,
}

impl Default for SyntheticConfig {
    fn default() -> Self {
        Self {
            width: 320,
            height: 180,
            duration_secs: 10.0,
            audio: true,
            sample_rate: 48_000,
            metadata_delay: Duration::ZERO,
            seek_latency: Duration::ZERO,
            autoplay_blocked: false,
        }
    }
}

#[derive(Debug)]
struct PlayState {
    duration: f64,
    /// Position at `anchor`, or the paused position.
    anchor_position: f64,
    /// Set while playing.
    anchor: Option<Instant>,
    rate: f64,
    muted: bool,
}

impl PlayState {
    fn position(&self) -> f64 {
        match self.anchor {
            Some(anchor) => {
                let advanced = anchor.elapsed().as_secs_f64() * self.rate;
                (self.anchor_position + advanced).min(self.duration)
            }
            None => self.anchor_position,
        }
    }

    fn rebase(&mut self) {
        if self.anchor.is_some() {
            self.anchor_position = self.position();
            self.anchor = Some(Instant::now());
        }
    }

    fn is_playing(&self) -> bool {
        self.anchor.is_some() && self.position() < self.duration
    }
}

/// A source that draws a moving test pattern and plays a sine tone.
pub struct SyntheticSource {
    config: SyntheticConfig,
    loaded_at: Instant,
    state: Arc<Mutex<PlayState>>,
    audio: AudioTap,
}

impl SyntheticSource {
    pub fn new(config: SyntheticConfig) -> Self {
        let state = PlayState {
            duration: config.duration_secs.max(0.0),
            anchor_position: 0.0,
            anchor: None,
            rate: 1.0,
            muted: false,
        };
        Self {
            loaded_at: Instant::now() + config.metadata_delay,
            config,
            state: Arc::new(Mutex::new(state)),
            audio: AudioTap::default(),
        }
    }

    fn state(&self) -> MutexGuard<'_, PlayState> {
        lock(&self.state)
    }

    fn loaded_metadata(&self) -> SourceMetadata {
        SourceMetadata {
            width: self.config.width,
            height: self.config.height,
            duration_secs: self.config.duration_secs,
        }
    }
}

fn lock(state: &Mutex<PlayState>) -> MutexGuard<'_, PlayState> {
    state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

#[async_trait::async_trait]
impl MediaSource for SyntheticSource {
    fn name(&self) -> &str {
        "synthetic"
    }

    fn metadata(&self) -> Option<SourceMetadata> {
        (Instant::now() >= self.loaded_at).then(|| self.loaded_metadata())
    }

    async fn wait_metadata(&mut self) -> ClipcraftResult<SourceMetadata> {
        tokio::time::sleep_until(self.loaded_at).await;
        Ok(self.loaded_metadata())
    }

    fn position(&self) -> f64 {
        self.state().position()
    }

    async fn seek(&mut self, position: f64) -> ClipcraftResult<()> {
        if !self.config.seek_latency.is_zero() {
            tokio::time::sleep(self.config.seek_latency).await;
        }
        let mut state = self.state();
        state.anchor_position = position.clamp(0.0, state.duration);
        if state.anchor.is_some() {
            state.anchor = Some(Instant::now());
        }
        Ok(())
    }

    async fn play(&mut self) -> ClipcraftResult<()> {
        if self.config.autoplay_blocked {
            return Err(ClipcraftError::playback(
                "Play request was refused by the runtime",
            ));
        }
        let mut state = self.state();
        if state.anchor.is_none() {
            state.anchor = Some(Instant::now());
        }
        Ok(())
    }

    fn pause(&mut self) {
        let mut state = self.state();
        state.anchor_position = state.position();
        state.anchor = None;
    }

    fn is_playing(&self) -> bool {
        self.state().is_playing()
    }

    fn is_ended(&self) -> bool {
        let state = self.state();
        state.duration > 0.0 && state.position() >= state.duration
    }

    fn playback_rate(&self) -> f64 {
        self.state().rate
    }

    fn set_playback_rate(&mut self, rate: f64) {
        let mut state = self.state();
        state.rebase();
        state.rate = rate;
    }

    fn muted(&self) -> bool {
        self.state().muted
    }

    fn set_muted(&mut self, muted: bool) {
        self.state().muted = muted;
    }

    fn current_frame(&self) -> Option<VideoFrame> {
        self.metadata()?;
        let position = self.position();
        Some(VideoFrame {
            image: test_pattern(
                self.config.width,
                self.config.height,
                position / self.config.duration_secs.max(f64::EPSILON),
            ),
            position_secs: position,
        })
    }

    fn capture_audio(&mut self) -> ClipcraftResult<Option<AudioTrack>> {
        if !self.config.audio {
            return Ok(None);
        }
        let sample_rate = self.config.sample_rate.max(1);
        let (tx, track) = self.audio.open(sample_rate, AUDIO_CHANNELS, 64)?;
        let state = Arc::clone(&self.state);

        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(AUDIO_BLOCK);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            let frames = (sample_rate as f64 * AUDIO_BLOCK.as_secs_f64()).round() as usize;

            loop {
                ticker.tick().await;
                if tx.is_closed() {
                    break;
                }
                let (playing, muted, position) = {
                    let state = lock(&state);
                    (state.is_playing(), state.muted, state.position())
                };
                if !playing {
                    continue;
                }
                let samples = tone_block(position, frames, sample_rate, muted);
                let buffer = AudioBuffer {
                    samples,
                    pts: Duration::from_secs_f64(position.max(0.0)),
                };
                if tx.send(buffer).await.is_err() {
                    break;
                }
            }
            tracing::trace!("Synthetic audio tap closed");
        });

        Ok(Some(track))
    }
}

fn tone_block(start_secs: f64, frames: usize, sample_rate: u32, muted: bool) -> Vec<f32> {
    let channels = AUDIO_CHANNELS as usize;
    if muted {
        return vec![0.0; frames * channels];
    }
    let mut samples = Vec::with_capacity(frames * channels);
    for i in 0..frames {
        let t = start_secs + i as f64 / sample_rate as f64;
        let v = (0.2 * (t * TONE_HZ * std::f64::consts::TAU).sin()) as f32;
        samples.extend(std::iter::repeat(v).take(channels));
    }
    samples
}

/// Gradient background with a vertical bar at `progress` across.
fn test_pattern(width: u32, height: u32, progress: f64) -> RgbaImage {
    let bar_x = (progress.clamp(0.0, 1.0) * width.saturating_sub(1) as f64) as u32;
    let bar_half = (width / 80).max(1);
    let blue = (progress.clamp(0.0, 1.0) * 255.0) as u8;

    RgbaImage::from_fn(width, height, |x, y| {
        if x.abs_diff(bar_x) <= bar_half {
            return Rgba([255, 255, 255, 255]);
        }
        let r = (x * 255 / width.max(1)) as u8;
        let g = (y * 255 / height.max(1)) as u8;
        Rgba([r, g, blue, 255])
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_metadata_appears_after_delay() {
        let mut src = SyntheticSource::new(SyntheticConfig {
            metadata_delay: Duration::from_millis(500),
            ..SyntheticConfig::default()
        });
        assert!(src.metadata().is_none());
        assert!(src.current_frame().is_none());
        let meta = src.wait_metadata().await.unwrap();
        assert_eq!((meta.width, meta.height), (320, 180));
        assert!(src.metadata().is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn test_plays_in_real_time_and_ends() {
        let mut src = SyntheticSource::new(SyntheticConfig {
            duration_secs: 2.0,
            ..SyntheticConfig::default()
        });
        src.seek(1.0).await.unwrap();
        src.play().await.unwrap();
        tokio::time::sleep(Duration::from_millis(500)).await;
        assert!((src.position() - 1.5).abs() < 1e-6);
        assert!(src.is_playing());

        tokio::time::sleep(Duration::from_secs(1)).await;
        assert_eq!(src.position(), 2.0);
        assert!(src.is_ended());
        assert!(!src.is_playing());
    }

    #[tokio::test(start_paused = true)]
    async fn test_rate_change_keeps_position_continuous() {
        let mut src = SyntheticSource::new(SyntheticConfig::default());
        src.play().await.unwrap();
        tokio::time::sleep(Duration::from_secs(1)).await;
        src.set_playback_rate(2.0);
        tokio::time::sleep(Duration::from_secs(1)).await;
        assert!((src.position() - 3.0).abs() < 1e-6);
        src.pause();
        tokio::time::sleep(Duration::from_secs(1)).await;
        assert!((src.position() - 3.0).abs() < 1e-6);
    }

    #[tokio::test(start_paused = true)]
    async fn test_audio_flows_only_while_playing() {
        let mut src = SyntheticSource::new(SyntheticConfig::default());
        let mut track = src.capture_audio().unwrap().unwrap();
        assert!(src.capture_audio().is_err());

        src.play().await.unwrap();
        let buffer = track.recv().await.unwrap();
        assert_eq!(buffer.samples.len(), 960 * 2);
        assert!(buffer.samples.iter().any(|s| *s != 0.0));
    }

    #[tokio::test(start_paused = true)]
    async fn test_audio_can_be_tapped_again_after_release() {
        let mut src = SyntheticSource::new(SyntheticConfig::default());
        let first = src.capture_audio().unwrap().unwrap();
        drop(first);

        let mut second = src.capture_audio().unwrap().unwrap();
        src.play().await.unwrap();
        assert!(second.recv().await.is_some());
    }

    #[test]
    fn test_no_audio_track_when_disabled() {
        let mut src = SyntheticSource::new(SyntheticConfig {
            audio: false,
            ..SyntheticConfig::default()
        });
        assert!(src.capture_audio().unwrap().is_none());
    }

    #[test]
    fn test_muted_tone_is_silent() {
        assert!(tone_block(0.1, 16, 48_000, true).iter().all(|s| *s == 0.0));
    }
}
