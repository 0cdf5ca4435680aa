//! End-to-end export scenarios against the synthetic source, on tokio's
//! paused clock.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use bytes::Bytes;
use clipcraft_capture::backend::{SyntheticConfig, SyntheticSource, Y4mBackend};
use clipcraft_capture::codec::{parse_preferences, CodecCandidate, Container};
use clipcraft_capture::pipeline::{EncoderBackend, EncoderSettings, IncrementalEncoder};
use clipcraft_capture::playback::PlaybackTimeouts;
use clipcraft_capture::source::{AudioBuffer, MediaSource};
use clipcraft_common::error::{ClipcraftError, ClipcraftResult};
use clipcraft_model::clip::ClipRange;
use clipcraft_model::overlay::OverlaySpec;
use clipcraft_model::playback::PlaybackSettings;
use clipcraft_render::{
    ExportOutcome, ExportRequest, ExportState, Exporter, ExporterConfig, MemoryArtifactStore,
    RejectReason,
};
use image::RgbaImage;

/// What the mock encoders saw, shared with the test.
#[derive(Default)]
struct Recorded {
    created: AtomicUsize,
    settings: Mutex<Vec<EncoderSettings>>,
    frames: AtomicUsize,
    audio_buffers: AtomicUsize,
    /// Green channel at the sample point of every encoded frame.
    greens: Mutex<Vec<u8>>,
}

struct MockEncoder {
    recorded: Arc<Recorded>,
    sample_at: (u32, u32),
}

#[async_trait::async_trait]
impl IncrementalEncoder for MockEncoder {
    fn encode_video(&mut self, frame: &RgbaImage, _pts: Duration) -> ClipcraftResult<Vec<Bytes>> {
        self.recorded.frames.fetch_add(1, Ordering::SeqCst);
        let green = frame.get_pixel(self.sample_at.0, self.sample_at.1).0[1];
        self.recorded.greens.lock().unwrap().push(green);
        Ok(vec![Bytes::from(vec![0u8; 16])])
    }

    fn encode_audio(&mut self, _buffer: &AudioBuffer) -> ClipcraftResult<Vec<Bytes>> {
        self.recorded.audio_buffers.fetch_add(1, Ordering::SeqCst);
        Ok(vec![Bytes::from_static(b"aud")])
    }

    async fn finish(&mut self) -> ClipcraftResult<Vec<Bytes>> {
        Ok(vec![Bytes::new(), Bytes::from_static(b"EOS")])
    }
}

struct MockBackend {
    recorded: Arc<Recorded>,
    supported: bool,
}

impl MockBackend {
    fn new() -> (Arc<Self>, Arc<Recorded>) {
        let recorded = Arc::new(Recorded::default());
        let backend = Arc::new(Self {
            recorded: recorded.clone(),
            supported: true,
        });
        (backend, recorded)
    }
}

impl EncoderBackend for MockBackend {
    fn name(&self) -> &str {
        "mock"
    }

    fn is_type_supported(&self, candidate: &CodecCandidate) -> bool {
        self.supported && candidate.container == Container::WebM
    }

    fn create_encoder(
        &self,
        candidate: &CodecCandidate,
        settings: &EncoderSettings,
    ) -> ClipcraftResult<Box<dyn IncrementalEncoder>> {
        if !self.is_type_supported(candidate) {
            return Err(ClipcraftError::unsupported(format!(
                "mock cannot encode {candidate}"
            )));
        }
        self.recorded.created.fetch_add(1, Ordering::SeqCst);
        self.recorded.settings.lock().unwrap().push(settings.clone());
        Ok(Box::new(MockEncoder {
            recorded: self.recorded.clone(),
            sample_at: (settings.width / 2, 150),
        }))
    }
}

fn exporter_with(
    backend: Arc<dyn EncoderBackend>,
    config: ExporterConfig,
) -> (Exporter, Arc<MemoryArtifactStore>) {
    let store = Arc::new(MemoryArtifactStore::new());
    (Exporter::new(config, backend, store.clone()), store)
}

fn synthetic(config: SyntheticConfig) -> Box<dyn MediaSource> {
    Box::new(SyntheticSource::new(config))
}

fn request(start: f64, end: f64, muted: bool, overlay: Option<&str>) -> ExportRequest {
    let mut range = ClipRange::for_duration(10.0);
    range.set_start(start);
    range.set_end(end);
    ExportRequest {
        range,
        settings: PlaybackSettings::new(1.0, muted),
        overlay: overlay.map(OverlaySpec::new),
    }
}

fn expect_done(outcome: ExportOutcome) -> clipcraft_model::artifact::ArtifactInfo {
    match outcome {
        ExportOutcome::Done(info) => info,
        other => panic!("expected Done, got {other:?}"),
    }
}

#[tokio::test(start_paused = true)]
async fn five_second_clip_has_audio_and_video() {
    let (backend, recorded) = MockBackend::new();
    let (exporter, store) = exporter_with(backend, ExporterConfig::default());
    exporter
        .load_source(synthetic(SyntheticConfig::default()))
        .unwrap();

    let info = expect_done(exporter.export(request(0.0, 5.0, false, None)).await);

    assert!(
        (info.duration_secs - 5.0).abs() <= 1.0 / 30.0 + 1e-9,
        "duration {}",
        info.duration_secs
    );
    assert!(info.has_audio);
    assert_eq!(info.mime_type, "video/webm;codecs=vp9,opus");
    assert_eq!(info.suggested_filename, "clipcraft-export.webm");
    assert_eq!(store.get(&info.url).unwrap().len() as u64, info.byte_size);

    let frames = recorded.frames.load(Ordering::SeqCst);
    assert!((140..=155).contains(&frames), "frames {frames}");
    assert!(recorded.audio_buffers.load(Ordering::SeqCst) > 0);
    assert!(recorded.settings.lock().unwrap()[0].audio.is_some());

    let status = exporter.status();
    assert_eq!(status.state, ExportState::Done);
    assert_eq!(status.message, "Done");
    assert_eq!(status.artifact, Some(info));
}

#[tokio::test(start_paused = true)]
async fn minimum_gap_clip_is_short_but_not_empty() {
    let (backend, recorded) = MockBackend::new();
    let (exporter, _store) = exporter_with(backend, ExporterConfig::default());
    exporter
        .load_source(synthetic(SyntheticConfig::default()))
        .unwrap();

    let req = request(2.0, 2.05, false, None);
    assert!((req.range.len_secs() - 0.1).abs() < 1e-9);

    let info = expect_done(exporter.export(req).await);
    assert!(
        info.duration_secs >= 0.09 && info.duration_secs <= 0.1 + 1.0 / 30.0 + 1e-9,
        "duration {}",
        info.duration_secs
    );
    assert!(info.byte_size > 0);
    assert!(recorded.frames.load(Ordering::SeqCst) >= 1);
}

#[tokio::test(start_paused = true)]
async fn caption_box_is_on_every_encoded_frame() {
    let (backend, recorded) = MockBackend::new();
    let (exporter, _store) = exporter_with(backend, ExporterConfig::default());
    exporter
        .load_source(synthetic(SyntheticConfig::default()))
        .unwrap();

    expect_done(exporter.export(request(1.0, 2.0, false, Some("HELLO"))).await);

    // The sample point sits inside the caption box of a 320x180 surface. The
    // test pattern's green there is ~212; under the box it drops to ~85.
    let greens = recorded.greens.lock().unwrap().clone();
    assert!(!greens.is_empty());
    assert!(greens.iter().all(|g| *g < 120), "{greens:?}");
}

#[tokio::test(start_paused = true)]
async fn no_caption_leaves_frames_untouched() {
    let (backend, recorded) = MockBackend::new();
    let (exporter, _store) = exporter_with(backend, ExporterConfig::default());
    exporter
        .load_source(synthetic(SyntheticConfig::default()))
        .unwrap();

    expect_done(exporter.export(request(1.0, 2.0, false, Some("   "))).await);

    let greens = recorded.greens.lock().unwrap().clone();
    assert!(!greens.is_empty());
    assert!(greens.iter().all(|g| *g > 150), "{greens:?}");
}

#[tokio::test(start_paused = true)]
async fn muted_export_has_no_audio_track() {
    let (backend, recorded) = MockBackend::new();
    let (exporter, _store) = exporter_with(backend, ExporterConfig::default());
    exporter
        .load_source(synthetic(SyntheticConfig::default()))
        .unwrap();

    let info = expect_done(exporter.export(request(0.0, 1.0, true, None)).await);

    assert!(!info.has_audio);
    assert!(recorded.settings.lock().unwrap()[0].audio.is_none());
    assert_eq!(recorded.audio_buffers.load(Ordering::SeqCst), 0);
}

#[tokio::test(start_paused = true)]
async fn export_without_source_is_rejected() {
    let (backend, recorded) = MockBackend::new();
    let (exporter, store) = exporter_with(backend, ExporterConfig::default());

    let outcome = exporter.export(request(0.0, 1.0, false, None)).await;

    assert_eq!(outcome, ExportOutcome::Rejected(RejectReason::NoSource));
    assert_eq!(exporter.state(), ExportState::Idle);
    assert_eq!(recorded.created.load(Ordering::SeqCst), 0);
    assert_eq!(store.published(), 0);
}

#[tokio::test(start_paused = true)]
async fn concurrent_request_does_not_start_second_session() {
    let (backend, recorded) = MockBackend::new();
    let (exporter, _store) = exporter_with(backend, ExporterConfig::default());
    exporter
        .load_source(synthetic(SyntheticConfig::default()))
        .unwrap();

    let (first, second) = tokio::join!(exporter.export(request(0.0, 1.0, false, None)), async {
        tokio::task::yield_now().await;
        exporter.export(request(0.0, 1.0, false, None)).await
    });

    assert!(matches!(first, ExportOutcome::Done(_)));
    assert_eq!(second, ExportOutcome::Rejected(RejectReason::InProgress));
    assert_eq!(recorded.created.load(Ordering::SeqCst), 1);
}

#[tokio::test(start_paused = true)]
async fn status_reports_seeking_while_seek_settles() {
    let (backend, _recorded) = MockBackend::new();
    let (exporter, _store) = exporter_with(backend, ExporterConfig::default());
    exporter
        .load_source(synthetic(SyntheticConfig {
            seek_latency: Duration::from_millis(200),
            ..SyntheticConfig::default()
        }))
        .unwrap();

    let (outcome, during_seek) =
        tokio::join!(exporter.export(request(3.0, 3.5, false, None)), async {
            tokio::time::sleep(Duration::from_millis(100)).await;
            exporter.status()
        });

    assert!(matches!(outcome, ExportOutcome::Done(_)));
    assert_eq!(during_seek.state, ExportState::Seeking);
    assert_eq!(during_seek.message, "Seeking...");
}

#[tokio::test(start_paused = true)]
async fn re_export_revokes_previous_artifact_once() {
    let (backend, _recorded) = MockBackend::new();
    let (exporter, store) = exporter_with(backend, ExporterConfig::default());
    exporter
        .load_source(synthetic(SyntheticConfig::default()))
        .unwrap();

    let first = expect_done(exporter.export(request(0.0, 1.0, false, None)).await);
    let second = expect_done(exporter.export(request(1.0, 2.0, false, None)).await);

    assert_ne!(first.url, second.url);
    assert_eq!(store.published(), 2);
    assert_eq!(store.revoked(), 1);
    assert!(store.get(&first.url).is_none());
    assert!(store.get(&second.url).is_some());

    drop(exporter);
    assert_eq!(store.revoked(), 2);
    assert_eq!(store.live(), 0);
}

#[tokio::test(start_paused = true)]
async fn re_export_of_same_source_keeps_audio() {
    let (backend, recorded) = MockBackend::new();
    let (exporter, _store) = exporter_with(backend, ExporterConfig::default());
    exporter
        .load_source(synthetic(SyntheticConfig::default()))
        .unwrap();

    let first = expect_done(exporter.export(request(0.0, 1.0, false, None)).await);
    let buffers_after_first = recorded.audio_buffers.load(Ordering::SeqCst);
    let second = expect_done(exporter.export(request(1.0, 2.0, false, None)).await);

    assert!(first.has_audio);
    assert!(second.has_audio);
    let settings = recorded.settings.lock().unwrap().clone();
    assert_eq!(settings.len(), 2);
    assert!(settings.iter().all(|s| s.audio.is_some()));
    assert!(recorded.audio_buffers.load(Ordering::SeqCst) > buffers_after_first);
}

#[tokio::test(start_paused = true)]
async fn blocked_playback_finishes_with_empty_output() {
    let store = Arc::new(MemoryArtifactStore::new());
    let config = ExporterConfig {
        candidates: parse_preferences(&["video/x-yuv4mpeg"]).unwrap(),
        ..ExporterConfig::default()
    };
    let exporter = Exporter::new(config, Arc::new(Y4mBackend), store.clone());
    exporter
        .load_source(synthetic(SyntheticConfig {
            autoplay_blocked: true,
            ..SyntheticConfig::default()
        }))
        .unwrap();

    let info = expect_done(exporter.export(request(0.0, 3.0, false, None)).await);

    assert_eq!(info.byte_size, 0);
    assert_eq!(info.suggested_filename, "clipcraft-export.y4m");
    let status = exporter.status();
    assert_eq!(status.state, ExportState::Done);
    assert!(status.message.contains("playback was blocked"));
}

#[tokio::test(start_paused = true)]
async fn y4m_export_streams_real_frames() {
    let store = Arc::new(MemoryArtifactStore::new());
    let config = ExporterConfig {
        candidates: parse_preferences(&["video/webm;codecs=vp9,opus", "video/x-yuv4mpeg"])
            .unwrap(),
        ..ExporterConfig::default()
    };
    let exporter = Exporter::new(config, Arc::new(Y4mBackend), store.clone());
    exporter
        .load_source(synthetic(SyntheticConfig::default()))
        .unwrap();

    let info = expect_done(exporter.export(request(0.0, 0.5, false, Some("HI"))).await);

    assert_eq!(info.mime_type, "video/x-yuv4mpeg");
    assert!(!info.has_audio);
    let data = store.get(&info.url).unwrap();
    assert!(data.starts_with(b"YUV4MPEG2 W320 H180 F30:1"));
    let frame_len = 6 + 320 * 180 + 2 * (160 * 90);
    let header_len = data.iter().position(|b| *b == b'\n').unwrap() + 1;
    assert_eq!((data.len() - header_len) % frame_len, 0);
    assert!((data.len() - header_len) / frame_len >= 10);
}

#[tokio::test(start_paused = true)]
async fn stalled_metadata_fails_and_returns_source() {
    let (backend, recorded) = MockBackend::new();
    let config = ExporterConfig {
        timeouts: PlaybackTimeouts {
            metadata: Duration::from_secs(1),
            seek: Duration::from_secs(1),
        },
        ..ExporterConfig::default()
    };
    let (exporter, _store) = exporter_with(backend, config);
    exporter
        .load_source(synthetic(SyntheticConfig {
            metadata_delay: Duration::from_secs(60),
            ..SyntheticConfig::default()
        }))
        .unwrap();

    let outcome = exporter.export(request(0.0, 1.0, false, None)).await;

    assert_eq!(
        outcome,
        ExportOutcome::Failed("Export failed: timed out waiting for source metadata".into())
    );
    assert_eq!(exporter.state(), ExportState::Failed);
    assert!(exporter.status().artifact.is_none());
    assert!(exporter.has_source());
    assert_eq!(recorded.created.load(Ordering::SeqCst), 0);
}

#[tokio::test(start_paused = true)]
async fn unsupported_encoder_fails_and_restores_rate() {
    let recorded = Arc::new(Recorded::default());
    let backend = Arc::new(MockBackend {
        recorded: recorded.clone(),
        supported: false,
    });
    let (exporter, store) = exporter_with(backend, ExporterConfig::default());
    let mut source = SyntheticSource::new(SyntheticConfig::default());
    source.set_playback_rate(1.5);
    exporter.load_source(Box::new(source)).unwrap();

    let outcome = exporter.export(request(0.0, 1.0, false, None)).await;

    let ExportOutcome::Failed(message) = outcome else {
        panic!("expected failure, got {outcome:?}");
    };
    assert!(message.starts_with("Export failed. Your runtime may not support capture/record."));
    assert_eq!(store.published(), 0);

    let source = exporter.unload_source().unwrap().unwrap();
    assert_eq!(source.playback_rate(), 1.5);
    assert!(!source.is_playing());
}

#[tokio::test(start_paused = true)]
async fn dropped_export_is_cancelled_and_source_returned() {
    let (backend, _recorded) = MockBackend::new();
    let (exporter, store) = exporter_with(backend, ExporterConfig::default());
    exporter
        .load_source(synthetic(SyntheticConfig::default()))
        .unwrap();

    let timed_out = tokio::time::timeout(
        Duration::from_millis(500),
        exporter.export(request(0.0, 5.0, false, None)),
    )
    .await;
    assert!(timed_out.is_err());

    let status = exporter.status();
    assert_eq!(status.state, ExportState::Failed);
    assert_eq!(status.message, "Export cancelled");
    assert_eq!(store.published(), 0);

    let source = exporter.unload_source().unwrap().unwrap();
    assert!(!source.is_playing());
}

#[tokio::test(start_paused = true)]
async fn source_cannot_change_while_exporting() {
    let (backend, _recorded) = MockBackend::new();
    let (exporter, _store) = exporter_with(backend, ExporterConfig::default());
    exporter
        .load_source(synthetic(SyntheticConfig::default()))
        .unwrap();

    let (outcome, swap) = tokio::join!(exporter.export(request(0.0, 0.5, false, None)), async {
        tokio::time::sleep(Duration::from_millis(100)).await;
        exporter.load_source(synthetic(SyntheticConfig::default()))
    });

    assert!(matches!(outcome, ExportOutcome::Done(_)));
    assert!(swap.is_err());
}
