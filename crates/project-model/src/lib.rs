//! ClipCraft Model
//!
//! Defines the data contracts the export pipeline consumes and produces:
//! - **Clip range:** The `[start, end]` trim window, clamped on every mutation
//! - **Overlay:** Caption text and its bottom-centered box style
//! - **Playback:** Preview rate and mute flag, snapshotted at export start
//! - **Artifact:** Description of a finished, downloadable export
//!
//! All times are in seconds relative to the start of the source media.

pub mod artifact;
pub mod clip;
pub mod overlay;
pub mod playback;

pub use artifact::*;
pub use clip::*;
pub use overlay::*;
pub use playback::*;
