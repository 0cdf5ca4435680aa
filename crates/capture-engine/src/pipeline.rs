//! Incremental capture and encoding of the composited surface.
//!
//! The pipeline samples the [`CaptureSurface`] at the output frame rate on
//! a background task, feeds each new frame (and any source audio) to an
//! [`IncrementalEncoder`], and collects the emitted chunks in arrival
//! order until it is stopped.

use std::sync::Arc;
use std::time::Duration;

use bytes::{Bytes, BytesMut};
use clipcraft_common::clock::{frame_interval, ExportClock};
use clipcraft_common::error::{ClipcraftError, ClipcraftResult};
use image::RgbaImage;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};

use crate::codec::{select_codec, CodecCandidate, Container};
use crate::source::{AudioBuffer, AudioTrack};
use crate::surface::CaptureSurface;

/// Audio stream layout handed to the encoder.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AudioFormat {
    pub sample_rate: u32,
    pub channels: u16,
}

/// Parameters for one encoder instance.
#[derive(Debug, Clone, PartialEq)]
pub struct EncoderSettings {
    pub width: u32,
    pub height: u32,
    pub fps: u32,
    /// Target video bitrate in bits per second.
    pub video_bitrate: u32,
    /// `None` for a video-only stream.
    pub audio: Option<AudioFormat>,
}

/// An encoder that emits output as it goes instead of all at the end.
#[async_trait::async_trait]
pub trait IncrementalEncoder: Send {
    /// Encode one video frame presented at `pts` after the start.
    fn encode_video(&mut self, frame: &RgbaImage, pts: Duration) -> ClipcraftResult<Vec<Bytes>>;

    /// Encode one block of source audio.
    fn encode_audio(&mut self, buffer: &AudioBuffer) -> ClipcraftResult<Vec<Bytes>>;

    /// Flush and return whatever output remains.
    async fn finish(&mut self) -> ClipcraftResult<Vec<Bytes>>;
}

/// A factory for encoders of some set of codec candidates.
pub trait EncoderBackend: Send + Sync {
    fn name(&self) -> &str;

    /// Whether this backend can produce the given container/codec pair.
    fn is_type_supported(&self, candidate: &CodecCandidate) -> bool;

    fn create_encoder(
        &self,
        candidate: &CodecCandidate,
        settings: &EncoderSettings,
    ) -> ClipcraftResult<Box<dyn IncrementalEncoder>>;
}

/// Backends tried in priority order.
#[derive(Clone, Default)]
pub struct EncoderRegistry {
    backends: Vec<Arc<dyn EncoderBackend>>,
}

impl EncoderRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, backend: Arc<dyn EncoderBackend>) -> Self {
        self.backends.push(backend);
        self
    }

    pub fn backends(&self) -> impl Iterator<Item = &dyn EncoderBackend> {
        self.backends.iter().map(|b| b.as_ref())
    }
}

impl EncoderBackend for EncoderRegistry {
    fn name(&self) -> &str {
        "registry"
    }

    fn is_type_supported(&self, candidate: &CodecCandidate) -> bool {
        self.backends.iter().any(|b| b.is_type_supported(candidate))
    }

    fn create_encoder(
        &self,
        candidate: &CodecCandidate,
        settings: &EncoderSettings,
    ) -> ClipcraftResult<Box<dyn IncrementalEncoder>> {
        let backend = self
            .backends
            .iter()
            .find(|b| b.is_type_supported(candidate))
            .ok_or_else(|| {
                ClipcraftError::unsupported(format!("No encoder available for {candidate}"))
            })?;
        tracing::debug!(backend = backend.name(), mime = candidate.mime(), "Creating encoder");
        backend.create_encoder(candidate, settings)
    }
}

/// Encoded chunks in arrival order.
#[derive(Debug, Default)]
pub struct ChunkBuffer {
    chunks: Vec<Bytes>,
    total: usize,
}

impl ChunkBuffer {
    /// Append a chunk. Zero-length chunks are discarded.
    pub fn push(&mut self, chunk: Bytes) {
        if chunk.is_empty() {
            return;
        }
        self.total += chunk.len();
        self.chunks.push(chunk);
    }

    pub fn extend(&mut self, chunks: impl IntoIterator<Item = Bytes>) {
        for chunk in chunks {
            self.push(chunk);
        }
    }

    pub fn len(&self) -> usize {
        self.chunks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.chunks.is_empty()
    }

    pub fn total_bytes(&self) -> usize {
        self.total
    }

    /// Concatenate every chunk into one buffer.
    pub fn into_bytes(self) -> Bytes {
        if self.chunks.len() == 1 {
            return self.chunks.into_iter().next().unwrap_or_default();
        }
        let mut out = BytesMut::with_capacity(self.total);
        for chunk in &self.chunks {
            out.extend_from_slice(chunk);
        }
        out.freeze()
    }
}

/// Runtime statistics from a capture pipeline.
#[derive(Debug, Clone, Default)]
pub struct PipelineStats {
    /// Frames handed to the encoder.
    pub frames_captured: u64,

    /// Sample ticks skipped because the task fell behind.
    pub frames_dropped: u64,

    /// Audio buffers handed to the encoder.
    pub audio_buffers: u64,

    /// Encoded bytes collected so far.
    pub bytes_written: u64,

    /// Wall time spent encoding the most recent frame, in milliseconds.
    pub encoding_latency_ms: f64,
}

impl PipelineStats {
    /// Drop rate as a percentage.
    pub fn drop_rate(&self) -> f64 {
        let total = self.frames_captured + self.frames_dropped;
        if total == 0 {
            return 0.0;
        }
        self.frames_dropped as f64 / total as f64 * 100.0
    }
}

/// Capture parameters not tied to a particular source.
#[derive(Debug, Clone)]
pub struct CaptureConfig {
    pub fps: u32,
    pub video_bitrate: u32,
    pub candidates: Vec<CodecCandidate>,
}

/// The finished, concatenated output of one capture.
#[derive(Debug, Clone)]
pub struct EncodedArtifact {
    pub data: Bytes,
    pub mime_type: String,
    pub container: Container,
    /// Capture span from `start` to `stop`, in seconds.
    pub duration_secs: f64,
    pub has_audio: bool,
    pub chunk_count: usize,
    pub stats: PipelineStats,
}

impl EncodedArtifact {
    pub fn byte_size(&self) -> u64 {
        self.data.len() as u64
    }

    /// Video frames encoded.
    pub fn frames(&self) -> u64 {
        self.stats.frames_captured
    }

    pub fn extension(&self) -> &'static str {
        self.container.extension()
    }
}

struct EncoderOutput {
    chunks: ChunkBuffer,
    stats: PipelineStats,
}

enum PipelineState {
    Ready {
        encoder: Box<dyn IncrementalEncoder>,
        audio: Option<AudioTrack>,
    },
    Running {
        stop_tx: oneshot::Sender<()>,
        task: JoinHandle<ClipcraftResult<EncoderOutput>>,
        clock: ExportClock,
    },
    Stopped {
        output: EncoderOutput,
        duration_secs: f64,
    },
    Finished,
}

/// Samples a capture surface and encodes it until stopped.
pub struct CapturePipeline {
    candidate: CodecCandidate,
    settings: EncoderSettings,
    surface: CaptureSurface,
    state: PipelineState,
}

impl CapturePipeline {
    /// Select a codec and create its encoder.
    ///
    /// Audio is dropped when the chosen codec carries none.
    pub fn open(
        backend: &dyn EncoderBackend,
        surface: CaptureSurface,
        audio: Option<AudioTrack>,
        config: &CaptureConfig,
    ) -> ClipcraftResult<Self> {
        let candidate = select_codec(&config.candidates, backend)?.clone();
        let audio = audio.filter(|_| candidate.supports_audio());

        let settings = EncoderSettings {
            width: surface.width(),
            height: surface.height(),
            fps: config.fps.max(1),
            video_bitrate: config.video_bitrate,
            audio: audio.as_ref().map(|track| AudioFormat {
                sample_rate: track.sample_rate,
                channels: track.channels,
            }),
        };

        let encoder = backend.create_encoder(&candidate, &settings)?;
        tracing::info!(
            mime = candidate.mime(),
            width = settings.width,
            height = settings.height,
            fps = settings.fps,
            has_audio = settings.audio.is_some(),
            "Capture pipeline opened"
        );

        Ok(Self {
            candidate,
            settings,
            surface,
            state: PipelineState::Ready { encoder, audio },
        })
    }

    pub fn has_audio(&self) -> bool {
        self.settings.audio.is_some()
    }

    /// Begin sampling on a background task.
    pub fn start(&mut self) -> ClipcraftResult<()> {
        let (encoder, audio) = match std::mem::replace(&mut self.state, PipelineState::Finished) {
            PipelineState::Ready { encoder, audio } => (encoder, audio),
            other => {
                self.state = other;
                return Err(ClipcraftError::capture("Capture pipeline already started"));
            }
        };

        let (stop_tx, stop_rx) = oneshot::channel();
        let clock = ExportClock::start();
        let task = tokio::spawn(run_encoder(
            encoder,
            self.surface.clone(),
            audio,
            self.settings.fps,
            stop_rx,
            clock.epoch(),
        ));

        tracing::debug!(epoch = clock.epoch_wall(), "Capture started");
        self.state = PipelineState::Running {
            stop_tx,
            task,
            clock,
        };
        Ok(())
    }

    /// Stop sampling and wait for the encoder to flush.
    pub async fn stop(&mut self) -> ClipcraftResult<()> {
        let (stop_tx, task, clock) =
            match std::mem::replace(&mut self.state, PipelineState::Finished) {
                PipelineState::Running {
                    stop_tx,
                    task,
                    clock,
                } => (stop_tx, task, clock),
                other => {
                    self.state = other;
                    return Err(ClipcraftError::capture("Capture pipeline is not running"));
                }
            };

        let duration_secs = clock.elapsed_secs();
        // The task may already have exited on an encode error.
        let _ = stop_tx.send(());

        let output = task
            .await
            .map_err(|e| ClipcraftError::capture(format!("Encoder task failed: {e}")))??;

        tracing::info!(
            frames = output.stats.frames_captured,
            dropped = output.stats.frames_dropped,
            bytes = output.stats.bytes_written,
            duration_secs,
            "Capture stopped"
        );
        self.state = PipelineState::Stopped {
            output,
            duration_secs,
        };
        Ok(())
    }

    /// Assemble the stopped capture into one artifact.
    pub fn finalize(mut self) -> ClipcraftResult<EncodedArtifact> {
        let (output, duration_secs) =
            match std::mem::replace(&mut self.state, PipelineState::Finished) {
                PipelineState::Stopped {
                    output,
                    duration_secs,
                } => (output, duration_secs),
                other => {
                    self.state = other;
                    return Err(ClipcraftError::capture(
                        "Capture pipeline must be stopped before finalizing",
                    ))
                }
            };

        let chunk_count = output.chunks.len();
        Ok(EncodedArtifact {
            data: output.chunks.into_bytes(),
            mime_type: self.candidate.mime().to_string(),
            container: self.candidate.container,
            duration_secs,
            has_audio: self.settings.audio.is_some(),
            chunk_count,
            stats: output.stats,
        })
    }
}

impl Drop for CapturePipeline {
    fn drop(&mut self) {
        if let PipelineState::Running { task, .. } = &self.state {
            tracing::debug!("Capture pipeline dropped while running; aborting encoder");
            task.abort();
        }
    }
}

async fn next_audio(track: &mut Option<AudioTrack>) -> Option<AudioBuffer> {
    match track {
        Some(track) => track.recv().await,
        None => std::future::pending().await,
    }
}

async fn run_encoder(
    mut encoder: Box<dyn IncrementalEncoder>,
    surface: CaptureSurface,
    mut audio: Option<AudioTrack>,
    fps: u32,
    mut stop_rx: oneshot::Receiver<()>,
    epoch: Instant,
) -> ClipcraftResult<EncoderOutput> {
    let period = frame_interval(fps);
    let mut ticker = tokio::time::interval_at(epoch, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    let mut chunks = ChunkBuffer::default();
    let mut stats = PipelineStats::default();
    let mut seen_generation = 0u64;
    let mut audio_open = audio.is_some();

    loop {
        tokio::select! {
            biased;

            _ = &mut stop_rx => break,

            scheduled = ticker.tick() => {
                let lag = Instant::now().saturating_duration_since(scheduled);
                stats.frames_dropped += (lag.as_nanos() / period.as_nanos().max(1)) as u64;

                let Some((frame, generation)) = surface.snapshot_if_newer(seen_generation) else {
                    continue;
                };
                seen_generation = generation;

                let started = std::time::Instant::now();
                let out = encoder.encode_video(&frame, scheduled.saturating_duration_since(epoch))?;
                stats.encoding_latency_ms = started.elapsed().as_secs_f64() * 1000.0;
                stats.frames_captured += 1;
                stats.bytes_written += out.iter().map(|c| c.len() as u64).sum::<u64>();
                chunks.extend(out);
            }

            buffer = next_audio(&mut audio), if audio_open => match buffer {
                Some(buffer) => {
                    let out = encoder.encode_audio(&buffer)?;
                    stats.audio_buffers += 1;
                    stats.bytes_written += out.iter().map(|c| c.len() as u64).sum::<u64>();
                    chunks.extend(out);
                }
                None => {
                    tracing::debug!("Audio track ended");
                    audio_open = false;
                }
            },
        }
    }

    let tail = encoder.finish().await?;
    stats.bytes_written += tail.iter().map(|c| c.len() as u64).sum::<u64>();
    chunks.extend(tail);

    Ok(EncoderOutput { chunks, stats })
}
