//! Built-in YUV4MPEG2 encoder.
//!
//! Always available, needs no system libraries, and streams one chunk
//! per frame. Audio is not carried by the container.

use std::time::Duration;

use bytes::{BufMut, Bytes, BytesMut};
use clipcraft_common::error::{ClipcraftError, ClipcraftResult};
use image::RgbaImage;

use crate::codec::{CodecCandidate, Container};
use crate::pipeline::{EncoderBackend, EncoderSettings, IncrementalEncoder};
use crate::source::AudioBuffer;

/// Backend for the `video/x-yuv4mpeg` container.
#[derive(Debug, Clone, Copy, Default)]
pub struct Y4mBackend;

impl EncoderBackend for Y4mBackend {
    fn name(&self) -> &str {
        "y4m"
    }

    fn is_type_supported(&self, candidate: &CodecCandidate) -> bool {
        candidate.container == Container::Y4m && candidate.video.is_none()
    }

    fn create_encoder(
        &self,
        candidate: &CodecCandidate,
        settings: &EncoderSettings,
    ) -> ClipcraftResult<Box<dyn IncrementalEncoder>> {
        if !self.is_type_supported(candidate) {
            return Err(ClipcraftError::unsupported(format!(
                "Y4M encoder cannot produce {candidate}"
            )));
        }
        if settings.width == 0 || settings.height == 0 {
            return Err(ClipcraftError::encode(format!(
                "Invalid frame size {}x{}",
                settings.width, settings.height
            )));
        }
        Ok(Box::new(Y4mEncoder::new(settings)))
    }
}

/// Streams frames as 4:2:0 YUV4MPEG2.
pub struct Y4mEncoder {
    width: u32,
    height: u32,
    fps: u32,
    header_written: bool,
}

impl Y4mEncoder {
    pub fn new(settings: &EncoderSettings) -> Self {
        Self {
            width: settings.width,
            height: settings.height,
            fps: settings.fps.max(1),
            header_written: false,
        }
    }

    fn header(&self) -> String {
        format!(
            "YUV4MPEG2 W{} H{} F{}:1 Ip A1:1 C420jpeg\n",
            self.width, self.height, self.fps
        )
    }

    fn frame_len(&self) -> usize {
        let luma = self.width as usize * self.height as usize;
        let chroma = chroma_dim(self.width) * chroma_dim(self.height);
        6 + luma + 2 * chroma
    }
}

#[async_trait::async_trait]
impl IncrementalEncoder for Y4mEncoder {
    fn encode_video(&mut self, frame: &RgbaImage, _pts: Duration) -> ClipcraftResult<Vec<Bytes>> {
        if frame.dimensions() != (self.width, self.height) {
            return Err(ClipcraftError::encode(format!(
                "Frame is {}x{}, stream is {}x{}",
                frame.width(),
                frame.height(),
                self.width,
                self.height
            )));
        }

        let mut out = BytesMut::with_capacity(self.frame_len() + 64);
        // The header goes out with the first frame so an empty capture is
        // an empty file.
        if !self.header_written {
            out.put_slice(self.header().as_bytes());
            self.header_written = true;
        }
        out.put_slice(b"FRAME\n");
        write_i420(frame, &mut out);
        Ok(vec![out.freeze()])
    }

    fn encode_audio(&mut self, _buffer: &AudioBuffer) -> ClipcraftResult<Vec<Bytes>> {
        Ok(Vec::new())
    }

    async fn finish(&mut self) -> ClipcraftResult<Vec<Bytes>> {
        Ok(Vec::new())
    }
}

fn chroma_dim(n: u32) -> usize {
    n.div_ceil(2) as usize
}

/// BT.601 full-range RGB to YCbCr, planar with 2x2 averaged chroma.
fn write_i420(frame: &RgbaImage, out: &mut BytesMut) {
    let (w, h) = frame.dimensions();

    for px in frame.pixels() {
        let [r, g, b, _] = px.0;
        let y = 0.299 * r as f32 + 0.587 * g as f32 + 0.114 * b as f32;
        out.put_u8(clamp_u8(y));
    }

    let cw = chroma_dim(w) as u32;
    let ch = chroma_dim(h) as u32;
    let mut cb_plane = Vec::with_capacity((cw * ch) as usize);
    let mut cr_plane = Vec::with_capacity((cw * ch) as usize);

    for cy in 0..ch {
        for cx in 0..cw {
            let (mut r, mut g, mut b, mut n) = (0.0f32, 0.0f32, 0.0f32, 0.0f32);
            for y in (cy * 2)..((cy * 2 + 2).min(h)) {
                for x in (cx * 2)..((cx * 2 + 2).min(w)) {
                    let [pr, pg, pb, _] = frame.get_pixel(x, y).0;
                    r += pr as f32;
                    g += pg as f32;
                    b += pb as f32;
                    n += 1.0;
                }
            }
            let (r, g, b) = (r / n, g / n, b / n);
            cb_plane.push(clamp_u8(128.0 - 0.168_736 * r - 0.331_264 * g + 0.5 * b));
            cr_plane.push(clamp_u8(128.0 + 0.5 * r - 0.418_688 * g - 0.081_312 * b));
        }
    }

    out.put_slice(&cb_plane);
    out.put_slice(&cr_plane);
}

fn clamp_u8(v: f32) -> u8 {
    v.round().clamp(0.0, 255.0) as u8
}
