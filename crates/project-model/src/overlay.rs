//! Caption overlay description.

use serde::{Deserialize, Serialize};

/// Where the caption box is anchored on the frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum OverlayAnchor {
    #[default]
    BottomCenter,
}

/// Visual style of the caption box.
///
/// Pixel values are in surface units; the font size scales with the
/// surface height.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct OverlayStyle {
    /// Font size as a fraction of the surface height.
    pub font_scale: f32,

    /// Horizontal padding added to the measured text width.
    pub padding_x: u32,

    /// Vertical padding added to the measured text height.
    pub padding_y: u32,

    /// Distance from the bottom edge to the text baseline.
    pub bottom_inset: u32,

    /// Box fill (RGBA, semi-transparent dark).
    pub background: [u8; 4],

    /// Text fill (RGBA, solid light).
    pub color: [u8; 4],
}

impl Default for OverlayStyle {
    fn default() -> Self {
        Self {
            font_scale: 0.05,
            padding_x: 24,
            padding_y: 12,
            bottom_inset: 24,
            background: [0, 0, 0, 153],
            color: [255, 255, 255, 255],
        }
    }
}

impl OverlayStyle {
    /// Font size in pixels for a surface of the given height.
    pub fn font_px(&self, surface_height: u32) -> f32 {
        (surface_height as f32 * self.font_scale).floor()
    }
}

/// A caption composited onto every exported frame.
///
/// The export takes a clone of this at start; later edits do not
/// affect frames already being recorded.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct OverlaySpec {
    pub text: String,
    #[serde(default)]
    pub anchor: OverlayAnchor,
    #[serde(default)]
    pub style: OverlayStyle,
}

impl OverlaySpec {
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            ..Self::default()
        }
    }

    /// Trimmed caption, or `None` when nothing should be drawn.
    pub fn visible_text(&self) -> Option<&str> {
        let trimmed = self.text.trim();
        (!trimmed.is_empty()).then_some(trimmed)
    }
}
