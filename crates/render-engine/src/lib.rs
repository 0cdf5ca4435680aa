//! ClipCraft Render Engine
//!
//! Composites source frames with the caption overlay and orchestrates
//! the export from request to published artifact.
//!
//! # Pipeline Architecture
//!
//! ```text
//! MediaSource ──▶ PlaybackController ──▶ current frame
//!                                            │
//! OverlaySpec ──────────────────────▶ FrameCompositor
//!                                            │
//!                                            ▼
//!                                     CaptureSurface ──▶ CapturePipeline
//!                                                              │
//!                                                              ▼
//!                                                       EncodedArtifact
//!                                                              │
//!                                                              ▼
//!                                                   ArtifactStore (handle)
//! ```

pub mod artifact;
pub mod compositor;
pub mod export;

pub use artifact::*;
pub use export::*;
