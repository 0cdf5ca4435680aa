//! GStreamer-backed encoder and media source.
//!
//! Enabled with the `gstreamer` feature. The encoder wraps an
//! `appsrc ! ... ! mux ! appsink` pipeline and drains muxed output as it
//! becomes available; the source wraps `playbin` with app sinks for
//! frames and audio.

use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, OnceLock};
use std::time::Duration;

use bytes::Bytes;
use clipcraft_common::error::{ClipcraftError, ClipcraftResult};
use gst::prelude::*;
use gstreamer as gst;
use gstreamer_app as gst_app;
use image::RgbaImage;

use crate::codec::{AudioCodec, CodecCandidate, Container, VideoCodec};
use crate::pipeline::{EncoderBackend, EncoderSettings, IncrementalEncoder};
use crate::source::{
    AudioBuffer, AudioTap, AudioTrack, MediaSource, SourceMetadata, VideoFrame,
};

const DRAIN_TIMEOUT: Duration = Duration::from_secs(10);
const STATE_TIMEOUT: Duration = Duration::from_secs(30);
const SOURCE_SAMPLE_RATE: u32 = 48_000;
const SOURCE_CHANNELS: u16 = 2;

fn init_gstreamer() -> ClipcraftResult<()> {
    static GST_INIT: OnceLock<Result<(), String>> = OnceLock::new();
    let init_res = GST_INIT.get_or_init(|| gst::init().map_err(|e| e.to_string()));
    match init_res {
        Ok(()) => Ok(()),
        Err(e) => Err(ClipcraftError::unsupported(format!(
            "Failed to initialize GStreamer: {e}"
        ))),
    }
}

fn has_element(name: &str) -> bool {
    gst::ElementFactory::find(name).is_some()
}

fn clock_time(duration: Duration) -> gst::ClockTime {
    gst::ClockTime::from_nseconds(duration.as_nanos() as u64)
}

fn secs_to_clock_time(secs: f64) -> gst::ClockTime {
    clock_time(Duration::from_secs_f64(secs.max(0.0)))
}

fn mux_element(container: Container) -> Option<&'static str> {
    match container {
        Container::WebM => Some("webmmux"),
        Container::Matroska => Some("matroskamux"),
        Container::Y4m => None,
    }
}

fn video_encoder(codec: VideoCodec, bitrate: u32, fps: u32) -> String {
    let keyint = fps.saturating_mul(2).max(2);
    match codec {
        VideoCodec::Vp9 => format!(
            "vp9enc target-bitrate={bitrate} deadline=1 cpu-used=8 keyframe-max-dist={keyint}"
        ),
        VideoCodec::Vp8 => format!(
            "vp8enc target-bitrate={bitrate} deadline=1 cpu-used=8 keyframe-max-dist={keyint}"
        ),
        VideoCodec::H264 => format!(
            "x264enc tune=zerolatency speed-preset=veryfast bitrate={} key-int-max={keyint} ! h264parse",
            (bitrate / 1000).max(1)
        ),
    }
}

fn video_factory(codec: VideoCodec) -> &'static str {
    match codec {
        VideoCodec::Vp9 => "vp9enc",
        VideoCodec::Vp8 => "vp8enc",
        VideoCodec::H264 => "x264enc",
    }
}

fn audio_factory(codec: AudioCodec) -> &'static str {
    match codec {
        AudioCodec::Opus => "opusenc",
        AudioCodec::Vorbis => "vorbisenc",
    }
}

/// Build the encoder launch line for a candidate.
fn encoder_launch(candidate: &CodecCandidate, settings: &EncoderSettings) -> Option<String> {
    let mux = mux_element(candidate.container)?;
    let video = candidate.video?;
    let (w, h, fps) = (settings.width, settings.height, settings.fps.max(1));

    // queue elements decouple the two branches so a slow encoder on one
    // does not starve the muxer.
    let mut launch = format!(
        "appsrc name=vsrc format=time is-live=true do-timestamp=false \
         caps=video/x-raw,format=RGBA,width={w},height={h},framerate={fps}/1 \
         ! videoconvert ! {} ! queue ! {mux} name=mux streamable=true \
         ! appsink name=sink sync=false",
        video_encoder(video, settings.video_bitrate, fps)
    );

    if let (Some(audio), Some(format)) = (candidate.audio, settings.audio) {
        launch.push_str(&format!(
            " appsrc name=asrc format=time is-live=true do-timestamp=false \
             caps=audio/x-raw,format=F32LE,layout=interleaved,rate={},channels={} \
             ! audioconvert ! audioresample ! {} ! queue ! mux.",
            format.sample_rate,
            format.channels,
            audio_factory(audio)
        ));
    }
    Some(launch)
}

fn app_element<T: IsA<gst::Element>>(bin: &gst::Bin, name: &str) -> ClipcraftResult<T> {
    bin.by_name(name)
        .ok_or_else(|| ClipcraftError::capture(format!("Pipeline has no element '{name}'")))?
        .dynamic_cast::<T>()
        .map_err(|_| ClipcraftError::capture(format!("Element '{name}' has the wrong type")))
}

fn bus_error(bus: &gst::Bus) -> Option<String> {
    bus.pop_filtered(&[gst::MessageType::Error])
        .and_then(|msg| match msg.view() {
            gst::MessageView::Error(e) => Some(e.error().to_string()),
            _ => None,
        })
}

/// Encodes through GStreamer's WebM/Matroska elements.
#[derive(Debug)]
pub struct GstEncoderBackend;

impl GstEncoderBackend {
    pub fn new() -> ClipcraftResult<Self> {
        init_gstreamer()?;
        Ok(Self)
    }
}

impl EncoderBackend for GstEncoderBackend {
    fn name(&self) -> &str {
        "gstreamer"
    }

    fn is_type_supported(&self, candidate: &CodecCandidate) -> bool {
        let Some(mux) = mux_element(candidate.container) else {
            return false;
        };
        let Some(video) = candidate.video else {
            return false;
        };
        let audio_ok = candidate.audio.map_or(true, |a| has_element(audio_factory(a)));
        ["appsrc", "appsink", "videoconvert", mux, video_factory(video)]
            .into_iter()
            .all(has_element)
            && audio_ok
    }

    fn create_encoder(
        &self,
        candidate: &CodecCandidate,
        settings: &EncoderSettings,
    ) -> ClipcraftResult<Box<dyn IncrementalEncoder>> {
        let launch = encoder_launch(candidate, settings).ok_or_else(|| {
            ClipcraftError::unsupported(format!("GStreamer cannot encode {candidate}"))
        })?;
        Ok(Box::new(GstEncoder::from_launch(&launch, settings)?))
    }
}

pub struct GstEncoder {
    pipeline: gst::Pipeline,
    video_src: gst_app::AppSrc,
    audio_src: Option<gst_app::AppSrc>,
    sink: gst_app::AppSink,
    width: u32,
    height: u32,
    frame_duration: gst::ClockTime,
}

impl GstEncoder {
    fn from_launch(launch: &str, settings: &EncoderSettings) -> ClipcraftResult<Self> {
        init_gstreamer()?;
        tracing::debug!(launch, "Building encoder pipeline");

        let pipeline = gst::parse::launch(launch)
            .map_err(|e| ClipcraftError::unsupported(format!("Failed to build encoder: {e}")))?
            .dynamic_cast::<gst::Pipeline>()
            .map_err(|_| ClipcraftError::encode("Launch string did not produce a pipeline"))?;

        let bin = pipeline.upcast_ref::<gst::Bin>();
        let video_src = app_element::<gst_app::AppSrc>(bin, "vsrc")?;
        let sink = app_element::<gst_app::AppSink>(bin, "sink")?;
        let audio_src = if settings.audio.is_some() {
            Some(app_element::<gst_app::AppSrc>(bin, "asrc")?)
        } else {
            None
        };

        pipeline.set_state(gst::State::Playing).map_err(|e| {
            ClipcraftError::unsupported(format!("Encoder pipeline failed to start: {e:?}"))
        })?;

        Ok(Self {
            pipeline,
            video_src,
            audio_src,
            sink,
            width: settings.width,
            height: settings.height,
            frame_duration: clock_time(Duration::from_nanos(
                1_000_000_000 / settings.fps.max(1) as u64,
            )),
        })
    }

    fn drain(&self) -> ClipcraftResult<Vec<Bytes>> {
        if let Some(bus) = self.pipeline.bus() {
            if let Some(error) = bus_error(&bus) {
                return Err(ClipcraftError::encode(format!("Encoder pipeline error: {error}")));
            }
        }
        let mut out = Vec::new();
        while let Some(sample) = self.sink.try_pull_sample(gst::ClockTime::ZERO) {
            out.extend(sample_bytes(&sample)?);
        }
        Ok(out)
    }
}

fn sample_bytes(sample: &gst::Sample) -> ClipcraftResult<Option<Bytes>> {
    let Some(buffer) = sample.buffer() else {
        return Ok(None);
    };
    let map = buffer
        .map_readable()
        .map_err(|e| ClipcraftError::encode(format!("Unreadable output buffer: {e}")))?;
    Ok(Some(Bytes::copy_from_slice(map.as_slice())))
}

#[async_trait::async_trait]
impl IncrementalEncoder for GstEncoder {
    fn encode_video(&mut self, frame: &RgbaImage, pts: Duration) -> ClipcraftResult<Vec<Bytes>> {
        if frame.dimensions() != (self.width, self.height) {
            return Err(ClipcraftError::encode(format!(
                "Frame is {}x{}, stream is {}x{}",
                frame.width(),
                frame.height(),
                self.width,
                self.height
            )));
        }

        let mut buffer = gst::Buffer::from_mut_slice(frame.as_raw().clone());
        if let Some(buffer) = buffer.get_mut() {
            buffer.set_pts(clock_time(pts));
            buffer.set_duration(self.frame_duration);
        }
        self.video_src
            .push_buffer(buffer)
            .map_err(|e| ClipcraftError::encode(format!("Video push failed: {e:?}")))?;
        self.drain()
    }

    fn encode_audio(&mut self, audio: &AudioBuffer) -> ClipcraftResult<Vec<Bytes>> {
        let Some(src) = &self.audio_src else {
            return Ok(Vec::new());
        };
        let data: Vec<u8> = audio
            .samples
            .iter()
            .flat_map(|s| s.to_le_bytes())
            .collect();
        let mut buffer = gst::Buffer::from_mut_slice(data);
        if let Some(buffer) = buffer.get_mut() {
            buffer.set_pts(clock_time(audio.pts));
        }
        src.push_buffer(buffer)
            .map_err(|e| ClipcraftError::encode(format!("Audio push failed: {e:?}")))?;
        self.drain()
    }

    async fn finish(&mut self) -> ClipcraftResult<Vec<Bytes>> {
        // EOS lets the muxer write its final clusters.
        let _ = self.video_src.end_of_stream();
        if let Some(src) = &self.audio_src {
            let _ = src.end_of_stream();
        }

        let sink = self.sink.clone();
        let chunks = tokio::task::spawn_blocking(move || {
            let mut out = Vec::new();
            while let Some(sample) = sink.try_pull_sample(clock_time(DRAIN_TIMEOUT)) {
                out.extend(sample_bytes(&sample)?);
            }
            if !sink.is_eos() {
                tracing::warn!("Encoder drain timed out; output may be truncated");
            }
            Ok::<_, ClipcraftError>(out)
        })
        .await
        .map_err(|e| ClipcraftError::encode(format!("Encoder drain task failed: {e}")))??;

        self.pipeline.set_state(gst::State::Null).map_err(|e| {
            ClipcraftError::encode(format!("Failed to stop encoder pipeline: {e:?}"))
        })?;
        Ok(chunks)
    }
}

impl Drop for GstEncoder {
    fn drop(&mut self) {
        let _ = self.pipeline.set_state(gst::State::Null);
    }
}

/// A media file decoded by `playbin`.
pub struct GstMediaSource {
    name: String,
    playbin: gst::Element,
    video_sink: gst_app::AppSink,
    audio_sink: gst_app::AppSink,
    metadata: Option<SourceMetadata>,
    last_frame: Mutex<Option<VideoFrame>>,
    ended: AtomicBool,
    rate: f64,
    audio: AudioTap,
}

impl GstMediaSource {
    pub fn open(path: &Path) -> ClipcraftResult<Self> {
        init_gstreamer()?;

        let absolute = std::fs::canonicalize(path)?;
        let uri = gst::glib::filename_to_uri(&absolute, None)
            .map_err(|e| ClipcraftError::playback(format!("Invalid source path: {e}")))?;

        let playbin = gst::ElementFactory::make("playbin")
            .property("uri", uri.as_str())
            .build()
            .map_err(|e| ClipcraftError::unsupported(format!("playbin unavailable: {e}")))?;

        let video_bin = gst::parse::bin_from_description(
            "videoconvert ! video/x-raw,format=RGBA ! appsink name=vsink sync=true max-buffers=1 drop=true",
            true,
        )
        .map_err(|e| ClipcraftError::playback(format!("Failed to build video sink: {e}")))?;
        let audio_bin = gst::parse::bin_from_description(
            &format!(
                "audioconvert ! audioresample ! audio/x-raw,format=F32LE,layout=interleaved,\
                 rate={SOURCE_SAMPLE_RATE},channels={SOURCE_CHANNELS} \
                 ! appsink name=asink sync=true max-buffers=64 drop=true"
            ),
            true,
        )
        .map_err(|e| ClipcraftError::playback(format!("Failed to build audio sink: {e}")))?;

        let video_sink = app_element::<gst_app::AppSink>(&video_bin, "vsink")?;
        let audio_sink = app_element::<gst_app::AppSink>(&audio_bin, "asink")?;
        playbin.set_property("video-sink", &video_bin);
        playbin.set_property("audio-sink", &audio_bin);

        Ok(Self {
            name: path.display().to_string(),
            playbin,
            video_sink,
            audio_sink,
            metadata: None,
            last_frame: Mutex::new(None),
            ended: AtomicBool::new(false),
            rate: 1.0,
            audio: AudioTap::default(),
        })
    }

    /// Block (off the runtime) until the pipeline settles after a state
    /// change or flushing seek.
    async fn wait_async_done(&self, what: &'static str) -> ClipcraftResult<()> {
        let bus = self
            .playbin
            .bus()
            .ok_or_else(|| ClipcraftError::playback("playbin has no bus"))?;

        tokio::task::spawn_blocking(move || {
            let msg = bus.timed_pop_filtered(
                clock_time(STATE_TIMEOUT),
                &[gst::MessageType::AsyncDone, gst::MessageType::Error],
            );
            match msg.as_ref().map(|m| m.view()) {
                Some(gst::MessageView::AsyncDone(_)) => Ok(()),
                Some(gst::MessageView::Error(e)) => Err(ClipcraftError::playback(format!(
                    "Source error during {what}: {}",
                    e.error()
                ))),
                _ => Err(ClipcraftError::timeout(what, STATE_TIMEOUT)),
            }
        })
        .await
        .map_err(|e| ClipcraftError::playback(format!("Bus wait failed: {e}")))?
    }

    fn poll_bus(&self) {
        let Some(bus) = self.playbin.bus() else {
            return;
        };
        while let Some(msg) = bus.pop_filtered(&[gst::MessageType::Eos, gst::MessageType::Error]) {
            match msg.view() {
                gst::MessageView::Eos(_) => self.ended.store(true, Ordering::SeqCst),
                gst::MessageView::Error(e) => {
                    tracing::warn!(source = %self.name, error = %e.error(), "Source error");
                    self.ended.store(true, Ordering::SeqCst);
                }
                _ => {}
            }
        }
    }

    fn query_duration(&self) -> Option<f64> {
        self.playbin
            .query_duration::<gst::ClockTime>()
            .map(|d| d.nseconds() as f64 / 1e9)
    }

    fn apply_rate(&self, rate: f64) -> ClipcraftResult<()> {
        let position = secs_to_clock_time(self.position());
        self.playbin
            .seek(
                rate,
                gst::SeekFlags::FLUSH | gst::SeekFlags::ACCURATE,
                gst::SeekType::Set,
                position,
                gst::SeekType::None,
                gst::ClockTime::NONE,
            )
            .map_err(|e| ClipcraftError::playback(format!("Rate change failed: {e}")))
    }
}

fn sample_to_frame(sample: &gst::Sample, position_secs: f64) -> Option<VideoFrame> {
    let caps = sample.caps()?;
    let structure = caps.structure(0)?;
    let width = structure.get::<i32>("width").ok()? as u32;
    let height = structure.get::<i32>("height").ok()? as u32;
    let buffer = sample.buffer()?;
    let map = buffer.map_readable().ok()?;
    let image = RgbaImage::from_raw(width, height, map.as_slice().to_vec())?;
    Some(VideoFrame {
        image,
        position_secs,
    })
}

#[async_trait::async_trait]
impl MediaSource for GstMediaSource {
    fn name(&self) -> &str {
        &self.name
    }

    fn metadata(&self) -> Option<SourceMetadata> {
        self.metadata
    }

    async fn wait_metadata(&mut self) -> ClipcraftResult<SourceMetadata> {
        if let Some(metadata) = self.metadata {
            return Ok(metadata);
        }

        self.playbin.set_state(gst::State::Paused).map_err(|e| {
            ClipcraftError::playback(format!("Failed to preroll {}: {e:?}", self.name))
        })?;
        self.wait_async_done("source metadata").await?;

        let duration_secs = self.query_duration().unwrap_or(0.0);
        let (width, height) = self
            .video_sink
            .try_pull_preroll(gst::ClockTime::ZERO)
            .and_then(|s| sample_to_frame(&s, 0.0))
            .map(|frame| {
                let dims = frame.image.dimensions();
                *self
                    .last_frame
                    .lock()
                    .unwrap_or_else(|poisoned| poisoned.into_inner()) = Some(frame);
                dims
            })
            .unwrap_or((0, 0));

        let metadata = SourceMetadata {
            width,
            height,
            duration_secs,
        };
        tracing::info!(source = %self.name, width, height, duration_secs, "Source metadata loaded");
        self.metadata = Some(metadata);
        Ok(metadata)
    }

    fn position(&self) -> f64 {
        self.playbin
            .query_position::<gst::ClockTime>()
            .map(|p| p.nseconds() as f64 / 1e9)
            .unwrap_or(0.0)
    }

    async fn seek(&mut self, position: f64) -> ClipcraftResult<()> {
        self.ended.store(false, Ordering::SeqCst);
        self.playbin
            .seek_simple(
                gst::SeekFlags::FLUSH | gst::SeekFlags::ACCURATE,
                secs_to_clock_time(position),
            )
            .map_err(|e| ClipcraftError::playback(format!("Seek failed: {e}")))?;
        self.wait_async_done("seek to settle").await
    }

    async fn play(&mut self) -> ClipcraftResult<()> {
        self.playbin
            .set_state(gst::State::Playing)
            .map_err(|e| ClipcraftError::playback(format!("Play request failed: {e:?}")))?;
        Ok(())
    }

    fn pause(&mut self) {
        if let Err(e) = self.playbin.set_state(gst::State::Paused) {
            tracing::warn!(source = %self.name, error = ?e, "Failed to pause source");
        }
    }

    fn is_playing(&self) -> bool {
        self.playbin.current_state() == gst::State::Playing && !self.is_ended()
    }

    fn is_ended(&self) -> bool {
        self.poll_bus();
        self.ended.load(Ordering::SeqCst)
    }

    fn playback_rate(&self) -> f64 {
        self.rate
    }

    fn set_playback_rate(&mut self, rate: f64) {
        if (rate - self.rate).abs() < f64::EPSILON {
            return;
        }
        match self.apply_rate(rate) {
            Ok(()) => self.rate = rate,
            Err(e) => tracing::warn!(source = %self.name, error = %e, rate, "Rate not applied"),
        }
    }

    fn muted(&self) -> bool {
        self.playbin.property::<bool>("mute")
    }

    fn set_muted(&mut self, muted: bool) {
        self.playbin.set_property("mute", muted);
    }

    fn current_frame(&self) -> Option<VideoFrame> {
        let mut cache = self
            .last_frame
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        if let Some(sample) = self.video_sink.try_pull_sample(gst::ClockTime::ZERO) {
            if let Some(frame) = sample_to_frame(&sample, self.position()) {
                *cache = Some(frame);
            }
        }
        cache.clone()
    }

    fn capture_audio(&mut self) -> ClipcraftResult<Option<AudioTrack>> {
        let (tx, track) = self.audio.open(SOURCE_SAMPLE_RATE, SOURCE_CHANNELS, 64)?;
        let sink = self.audio_sink.clone();
        tokio::task::spawn_blocking(move || {
            while !tx.is_closed() {
                let Some(sample) = sink.try_pull_sample(gst::ClockTime::from_mseconds(100)) else {
                    if sink.is_eos() {
                        break;
                    }
                    continue;
                };
                let Some(buffer) = sample.buffer() else {
                    continue;
                };
                let pts = buffer.pts().map(|t| Duration::from_nanos(t.nseconds()));
                let Ok(map) = buffer.map_readable() else {
                    continue;
                };
                let samples = map
                    .as_slice()
                    .chunks_exact(4)
                    .map(|b| f32::from_le_bytes([b[0], b[1], b[2], b[3]]))
                    .collect();
                let audio = AudioBuffer {
                    samples,
                    pts: pts.unwrap_or_default(),
                };
                if tx.blocking_send(audio).is_err() {
                    break;
                }
            }
            tracing::trace!("GStreamer audio tap closed");
        });

        Ok(Some(track))
    }
}

impl Drop for GstMediaSource {
    fn drop(&mut self) {
        let _ = self.playbin.set_state(gst::State::Null);
    }
}
