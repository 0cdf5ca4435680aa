//! Export orchestration: the state machine that drives one export from
//! request to published artifact.
//!
//! ```text
//! Idle ─▶ Preparing ─▶ Seeking ─▶ Recording ─▶ Finalizing ─▶ Done
//!              └───────────┴───────────┴────────────┴──────▶ Failed
//! ```
//!
//! At most one export runs at a time. The loaded source is leased to the
//! running export and handed back on every exit path.

use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard};

use ab_glyph::FontVec;
use clipcraft_capture::codec::{parse_preferences, CodecCandidate};
use clipcraft_capture::pipeline::{
    CaptureConfig, CapturePipeline, EncodedArtifact, EncoderBackend,
};
use clipcraft_capture::playback::{PlaybackController, PlaybackTimeouts};
use clipcraft_capture::source::MediaSource;
use clipcraft_capture::surface::CaptureSurface;
use clipcraft_common::clock::{FramePacer, IntervalPacer};
use clipcraft_common::config::AppConfig;
use clipcraft_common::error::{ClipcraftError, ClipcraftResult};
use clipcraft_model::artifact::ArtifactInfo;
use clipcraft_model::clip::ClipRange;
use clipcraft_model::overlay::OverlaySpec;
use clipcraft_model::playback::{PlaybackSettings, EXPORT_RATE};
use tokio::sync::watch;

use crate::artifact::{ArtifactHandle, ArtifactStore};
use crate::compositor::{load_font, FrameCompositor};

const PLAYBACK_BLOCKED_NOTE: &str = "Done (playback was blocked; output may be empty)";

/// Stages of an export.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ExportState {
    #[default]
    Idle,
    Preparing,
    Seeking,
    Recording,
    Finalizing,
    Done,
    Failed,
}

impl ExportState {
    /// Whether an export session currently owns the source.
    pub fn is_active(&self) -> bool {
        matches!(
            self,
            Self::Preparing | Self::Seeking | Self::Recording | Self::Finalizing
        )
    }
}

impl fmt::Display for ExportState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Idle => "idle",
            Self::Preparing => "preparing",
            Self::Seeking => "seeking",
            Self::Recording => "recording",
            Self::Finalizing => "finalizing",
            Self::Done => "done",
            Self::Failed => "failed",
        };
        f.write_str(name)
    }
}

/// What collaborators observe about the exporter.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ExportStatus {
    pub state: ExportState,
    /// Human-readable progress or failure text.
    pub message: String,
    /// Present only in [`ExportState::Done`].
    pub artifact: Option<ArtifactInfo>,
}

/// The snapshot an export runs with. Later edits by the caller do not
/// reach an export already in flight.
#[derive(Debug, Clone)]
pub struct ExportRequest {
    pub range: ClipRange,
    pub settings: PlaybackSettings,
    pub overlay: Option<OverlaySpec>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RejectReason {
    NoSource,
    InProgress,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ExportOutcome {
    /// Not started; the exporter state is unchanged.
    Rejected(RejectReason),
    Done(ArtifactInfo),
    Failed(String),
}

/// Exporter parameters.
#[derive(Clone)]
pub struct ExporterConfig {
    pub fps: u32,
    pub video_bitrate: u32,
    /// Render loop pacing rate.
    pub refresh_hz: u32,
    pub fallback_width: u32,
    pub fallback_height: u32,
    pub timeouts: PlaybackTimeouts,
    pub candidates: Vec<CodecCandidate>,
    pub filename_stem: String,
    pub font: Option<Arc<FontVec>>,
}

impl Default for ExporterConfig {
    fn default() -> Self {
        let defaults = clipcraft_common::config::ExportDefaults::default();
        Self {
            fps: defaults.fps,
            video_bitrate: defaults.video_bitrate,
            refresh_hz: defaults.refresh_hz,
            fallback_width: defaults.fallback_width,
            fallback_height: defaults.fallback_height,
            timeouts: PlaybackTimeouts {
                metadata: defaults.metadata_timeout(),
                seek: defaults.seek_timeout(),
            },
            candidates: parse_preferences(&defaults.codec_preferences).unwrap_or_default(),
            filename_stem: defaults.filename_stem,
            font: None,
        }
    }
}

impl ExporterConfig {
    /// Build from application config, loading the overlay font.
    pub fn from_app_config(config: &AppConfig) -> ClipcraftResult<Self> {
        let export = &config.export;
        Ok(Self {
            fps: export.fps,
            video_bitrate: export.video_bitrate,
            refresh_hz: export.refresh_hz,
            fallback_width: export.fallback_width,
            fallback_height: export.fallback_height,
            timeouts: PlaybackTimeouts {
                metadata: export.metadata_timeout(),
                seek: export.seek_timeout(),
            },
            candidates: parse_preferences(&export.codec_preferences)?,
            filename_stem: export.filename_stem.clone(),
            font: load_font(config.overlay.font_path.as_deref()),
        })
    }

    fn capture_config(&self) -> CaptureConfig {
        CaptureConfig {
            fps: self.fps,
            video_bitrate: self.video_bitrate,
            candidates: self.candidates.clone(),
        }
    }
}

impl fmt::Debug for ExporterConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExporterConfig")
            .field("fps", &self.fps)
            .field("video_bitrate", &self.video_bitrate)
            .field("refresh_hz", &self.refresh_hz)
            .field("timeouts", &self.timeouts)
            .field("candidates", &self.candidates)
            .field("filename_stem", &self.filename_stem)
            .field("font", &self.font.is_some())
            .finish()
    }
}

#[derive(Default)]
struct Slot {
    state: ExportState,
    source: Option<Box<dyn MediaSource>>,
    artifact: Option<ArtifactHandle>,
}

/// Runs exports of the loaded source, one at a time.
pub struct Exporter {
    slot: Mutex<Slot>,
    status: watch::Sender<ExportStatus>,
    encoders: Arc<dyn EncoderBackend>,
    store: Arc<dyn ArtifactStore>,
    config: ExporterConfig,
}

impl Exporter {
    pub fn new(
        config: ExporterConfig,
        encoders: Arc<dyn EncoderBackend>,
        store: Arc<dyn ArtifactStore>,
    ) -> Self {
        let (status, _) = watch::channel(ExportStatus::default());
        Self {
            slot: Mutex::new(Slot::default()),
            status,
            encoders,
            store,
            config,
        }
    }

    pub fn config(&self) -> &ExporterConfig {
        &self.config
    }

    /// Watch status changes.
    pub fn subscribe(&self) -> watch::Receiver<ExportStatus> {
        self.status.subscribe()
    }

    pub fn status(&self) -> ExportStatus {
        self.status.borrow().clone()
    }

    pub fn state(&self) -> ExportState {
        self.slot().state
    }

    pub fn has_source(&self) -> bool {
        self.slot().source.is_some()
    }

    /// Replace the loaded source. Any previous export is revoked.
    pub fn load_source(&self, source: Box<dyn MediaSource>) -> ClipcraftResult<()> {
        let previous = {
            let mut slot = self.slot();
            if slot.state.is_active() {
                return Err(ClipcraftError::playback(
                    "Cannot change the source while an export is running",
                ));
            }
            tracing::info!(source = source.name(), "Source loaded");
            slot.source = Some(source);
            slot.state = ExportState::Idle;
            slot.artifact.take()
        };
        drop(previous);
        self.publish(ExportState::Idle, String::new(), None);
        Ok(())
    }

    /// Remove the loaded source, revoking any previous export.
    pub fn unload_source(&self) -> ClipcraftResult<Option<Box<dyn MediaSource>>> {
        let (source, previous) = {
            let mut slot = self.slot();
            if slot.state.is_active() {
                return Err(ClipcraftError::playback(
                    "Cannot unload the source while an export is running",
                ));
            }
            slot.state = ExportState::Idle;
            (slot.source.take(), slot.artifact.take())
        };
        drop(previous);
        self.publish(ExportState::Idle, String::new(), None);
        Ok(source)
    }

    /// Run one export to completion.
    ///
    /// Rejected without side effects when no source is loaded or another
    /// export is running. All failures end in [`ExportState::Failed`].
    pub async fn export(&self, request: ExportRequest) -> ExportOutcome {
        let mut lease = match self.begin() {
            Ok(lease) => lease,
            Err(reason) => {
                tracing::warn!(?reason, "Export request rejected");
                return ExportOutcome::Rejected(reason);
            }
        };

        let result = match lease.source.as_deref_mut() {
            Some(source) => self.run(source, &mut lease.restore_rate, &request).await,
            None => Err(ClipcraftError::playback("Source lease is empty")),
        };

        let source = lease.source.take();
        match result {
            Ok((handle, note)) => {
                let info = handle.info().clone();
                {
                    let mut slot = self.slot();
                    slot.source = source;
                    slot.state = ExportState::Done;
                    slot.artifact = Some(handle);
                }
                tracing::info!(
                    url = %info.url,
                    bytes = info.byte_size,
                    duration_secs = info.duration_secs,
                    has_audio = info.has_audio,
                    "Export done"
                );
                let message = note.unwrap_or("Done").to_string();
                self.publish(ExportState::Done, message, Some(info.clone()));
                ExportOutcome::Done(info)
            }
            Err(e) => {
                let message = failure_message(&e);
                tracing::error!(error = %e, "Export failed");
                {
                    let mut slot = self.slot();
                    slot.source = source;
                    slot.state = ExportState::Failed;
                }
                self.publish(ExportState::Failed, message.clone(), None);
                ExportOutcome::Failed(message)
            }
        }
    }

    fn begin(&self) -> Result<SourceLease<'_>, RejectReason> {
        let (source, previous) = {
            let mut slot = self.slot();
            if slot.state.is_active() {
                return Err(RejectReason::InProgress);
            }
            let source = slot.source.take().ok_or(RejectReason::NoSource)?;
            slot.state = ExportState::Preparing;
            (source, slot.artifact.take())
        };

        if let Some(previous) = previous {
            previous.revoke();
        }
        self.publish(ExportState::Preparing, "Preparing...".to_string(), None);

        Ok(SourceLease {
            exporter: self,
            source: Some(source),
            restore_rate: None,
        })
    }

    async fn run(
        &self,
        source: &mut dyn MediaSource,
        restore_rate: &mut Option<f64>,
        request: &ExportRequest,
    ) -> ClipcraftResult<(ArtifactHandle, Option<&'static str>)> {
        let mut playback = PlaybackController::new(source, self.config.timeouts);
        let metadata = playback.ensure_metadata_loaded().await?;

        let (width, height) =
            metadata.dimensions_or(self.config.fallback_width, self.config.fallback_height);
        let surface = CaptureSurface::new(width, height);

        let range = ClipRange::with_bounds(
            metadata.duration_secs,
            request.range.start(),
            request.range.end(),
        );
        let settings = request.settings.for_export();
        let compositor = FrameCompositor::new(request.overlay.clone(), self.config.font.clone());

        tracing::info!(
            start = range.start(),
            end = range.end(),
            muted = settings.muted,
            width,
            height,
            "Export prepared"
        );
        self.transition(ExportState::Seeking, "Seeking...");

        let previous_rate = playback.prepare(&settings);
        *restore_rate = Some(previous_rate);

        let recorded = self
            .record(&mut playback, &surface, &compositor, &range, &settings)
            .await;
        playback.pause_and_restore(previous_rate);
        *restore_rate = None;

        let (artifact, note) = recorded?;
        let filename = format!("{}.{}", self.config.filename_stem, artifact.extension());
        let handle = ArtifactHandle::publish(self.store.clone(), &artifact, filename)?;
        Ok((handle, note))
    }

    async fn record(
        &self,
        playback: &mut PlaybackController<'_>,
        surface: &CaptureSurface,
        compositor: &FrameCompositor,
        range: &ClipRange,
        settings: &PlaybackSettings,
    ) -> ClipcraftResult<(EncodedArtifact, Option<&'static str>)> {
        playback.seek_to(range.start()).await?;

        let audio = if settings.muted {
            None
        } else {
            playback.capture_audio()
        };
        let mut pipeline = CapturePipeline::open(
            self.encoders.as_ref(),
            surface.clone(),
            audio,
            &self.config.capture_config(),
        )?;
        pipeline.start()?;
        self.transition(ExportState::Recording, "Recording...");

        let playing = playback.play_at_rate(EXPORT_RATE).await;
        let mut frames = 0u64;
        if playing {
            let mut pacer = IntervalPacer::new(self.config.refresh_hz);
            loop {
                pacer.next_frame().await;
                if playback.has_reached(range.end()) {
                    break;
                }
                if let Some(frame) = playback.current_frame() {
                    compositor.compose(surface, &frame);
                    frames += 1;
                }
            }
        }

        self.transition(ExportState::Finalizing, "Finalizing...");
        playback.pause();
        pipeline.stop().await?;
        let artifact = pipeline.finalize()?;

        tracing::debug!(
            rendered = frames,
            encoded = artifact.frames(),
            chunks = artifact.chunk_count,
            bytes = artifact.byte_size(),
            "Recording finalized"
        );
        Ok((artifact, (!playing).then_some(PLAYBACK_BLOCKED_NOTE)))
    }

    fn transition(&self, state: ExportState, message: &str) {
        self.slot().state = state;
        tracing::debug!(%state, "Export state changed");
        self.publish(state, message.to_string(), None);
    }

    fn publish(&self, state: ExportState, message: String, artifact: Option<ArtifactInfo>) {
        self.status.send_replace(ExportStatus {
            state,
            message,
            artifact,
        });
    }

    fn slot(&self) -> MutexGuard<'_, Slot> {
        self.slot.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

/// The source, held by a running export.
///
/// Dropping the lease while it still holds the source means the export
/// future was dropped mid-flight: playback is stopped, the source goes
/// back to the exporter and the export is marked failed.
struct SourceLease<'a> {
    exporter: &'a Exporter,
    source: Option<Box<dyn MediaSource>>,
    restore_rate: Option<f64>,
}

impl Drop for SourceLease<'_> {
    fn drop(&mut self) {
        let Some(mut source) = self.source.take() else {
            return;
        };
        source.pause();
        if let Some(rate) = self.restore_rate.take() {
            source.set_playback_rate(rate);
        }

        let cancelled = {
            let mut slot = self.exporter.slot();
            slot.source = Some(source);
            let active = slot.state.is_active();
            if active {
                slot.state = ExportState::Failed;
            }
            active
        };
        if cancelled {
            tracing::warn!("Export cancelled before completion");
            self.exporter
                .publish(ExportState::Failed, "Export cancelled".to_string(), None);
        }
    }
}

/// Status text for a failed export.
pub fn failure_message(error: &ClipcraftError) -> String {
    match error {
        ClipcraftError::Unsupported { message } => format!(
            "Export failed. Your runtime may not support capture/record. ({message})"
        ),
        ClipcraftError::Timeout { operation, .. } => {
            format!("Export failed: timed out waiting for {operation}")
        }
        other => format!("Export failed: {other}"),
    }
}
