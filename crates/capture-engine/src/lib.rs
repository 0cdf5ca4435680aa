//! ClipCraft Capture Engine
//!
//! Plays the source back in real time and turns what is drawn on the
//! capture surface into an encoded byte stream.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────┐
//! │                 CapturePipeline                   │
//! │  ┌──────────────┐   ┌───────────┐  ┌───────────┐ │
//! │  │ CaptureSurface│──▶│  Sampler  │─▶│ Encoder   │ │
//! │  └──────────────┘   │ (30 fps)  │  │ (chunks)  │ │
//! │  ┌──────────────┐   └───────────┘  └─────┬─────┘ │
//! │  │ AudioTrack   │──────────────────────▶ │       │
//! │  └──────────────┘                        ▼       │
//! │                                   ChunkBuffer    │
//! └──────────────────────────────────────────────────┘
//!          ▲
//!          │ frames
//! ┌────────┴──────────┐
//! │ PlaybackController│── MediaSource (synthetic / GStreamer)
//! └───────────────────┘
//! ```

pub mod backend;
pub mod codec;
pub mod pipeline;
pub mod playback;
pub mod source;
pub mod surface;

pub use codec::*;
pub use pipeline::*;
pub use playback::*;
pub use source::*;
pub use surface::*;
