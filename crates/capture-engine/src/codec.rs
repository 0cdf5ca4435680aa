//! Container/codec candidates and runtime selection.

use std::fmt;

use clipcraft_common::error::{ClipcraftError, ClipcraftResult};

use crate::pipeline::EncoderBackend;

/// Output container format.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Container {
    WebM,
    Matroska,
    /// Uncompressed YUV4MPEG2 stream.
    Y4m,
}

impl Container {
    /// File extension for a download of this container.
    pub fn extension(&self) -> &'static str {
        match self {
            Self::WebM => "webm",
            Self::Matroska => "mkv",
            Self::Y4m => "y4m",
        }
    }

    fn from_essence(essence: &str) -> Option<Self> {
        match essence {
            "video/webm" => Some(Self::WebM),
            "video/x-matroska" => Some(Self::Matroska),
            "video/x-yuv4mpeg" => Some(Self::Y4m),
            _ => None,
        }
    }

    fn default_codecs(&self) -> (Option<VideoCodec>, Option<AudioCodec>) {
        match self {
            Self::WebM | Self::Matroska => (Some(VideoCodec::Vp8), Some(AudioCodec::Opus)),
            Self::Y4m => (None, None),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VideoCodec {
    Vp9,
    Vp8,
    H264,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AudioCodec {
    Opus,
    Vorbis,
}

/// One entry of the codec preference list, e.g.
/// `video/webm;codecs=vp9,opus`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CodecCandidate {
    mime: String,
    pub container: Container,
    /// `None` means the container's native raw format.
    pub video: Option<VideoCodec>,
    pub audio: Option<AudioCodec>,
}

impl CodecCandidate {
    /// Parse a MIME type with an optional `codecs=` parameter.
    ///
    /// A bare container type gets that container's usual codecs.
    pub fn parse(mime: &str) -> ClipcraftResult<Self> {
        let mime = mime.trim();
        let mut parts = mime.split(';');
        let essence = parts.next().unwrap_or_default().trim().to_ascii_lowercase();
        let container = Container::from_essence(&essence)
            .ok_or_else(|| ClipcraftError::config(format!("Unknown container type: {mime}")))?;

        let codecs = parts.find_map(|param| {
            let (key, value) = param.split_once('=')?;
            (key.trim().eq_ignore_ascii_case("codecs"))
                .then(|| value.trim().trim_matches('"').to_ascii_lowercase())
        });

        let (video, audio) = match codecs {
            None => container.default_codecs(),
            Some(list) => {
                let mut video = None;
                let mut audio = None;
                for token in list.split(',').map(str::trim).filter(|t| !t.is_empty()) {
                    match parse_codec_token(token) {
                        Some(Codec::Video(codec)) => video = Some(codec),
                        Some(Codec::Audio(codec)) => audio = Some(codec),
                        None => {
                            return Err(ClipcraftError::config(format!(
                                "Unknown codec '{token}' in {mime}"
                            )))
                        }
                    }
                }
                (video, audio)
            }
        };

        Ok(Self {
            mime: mime.to_string(),
            container,
            video,
            audio,
        })
    }

    /// The MIME string as configured.
    pub fn mime(&self) -> &str {
        &self.mime
    }

    pub fn supports_audio(&self) -> bool {
        self.audio.is_some()
    }

    pub fn extension(&self) -> &'static str {
        self.container.extension()
    }
}

impl fmt::Display for CodecCandidate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.mime)
    }
}

enum Codec {
    Video(VideoCodec),
    Audio(AudioCodec),
}

fn parse_codec_token(token: &str) -> Option<Codec> {
    let codec = match token {
        "vp9" => Codec::Video(VideoCodec::Vp9),
        t if t.starts_with("vp09") => Codec::Video(VideoCodec::Vp9),
        "vp8" => Codec::Video(VideoCodec::Vp8),
        "h264" => Codec::Video(VideoCodec::H264),
        t if t.starts_with("avc1") => Codec::Video(VideoCodec::H264),
        "opus" => Codec::Audio(AudioCodec::Opus),
        "vorbis" => Codec::Audio(AudioCodec::Vorbis),
        _ => return None,
    };
    Some(codec)
}

/// Parse the configured preference list, in order.
pub fn parse_preferences<S: AsRef<str>>(mimes: &[S]) -> ClipcraftResult<Vec<CodecCandidate>> {
    mimes
        .iter()
        .map(|m| CodecCandidate::parse(m.as_ref()))
        .collect()
}

/// Pick the first candidate the backend can encode.
///
/// When none is reported as supported the last candidate is returned
/// anyway, so creating the encoder surfaces the real failure.
pub fn select_codec<'a>(
    candidates: &'a [CodecCandidate],
    backend: &dyn EncoderBackend,
) -> ClipcraftResult<&'a CodecCandidate> {
    if let Some(found) = candidates.iter().find(|c| backend.is_type_supported(c)) {
        tracing::debug!(mime = found.mime(), backend = backend.name(), "Selected codec");
        return Ok(found);
    }

    let last = candidates
        .last()
        .ok_or_else(|| ClipcraftError::unsupported("No codec candidates configured"))?;
    tracing::warn!(
        mime = last.mime(),
        backend = backend.name(),
        "No candidate reported as supported; trying the last one"
    );
    Ok(last)
}
