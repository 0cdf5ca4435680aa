//! Frame compositor: draws one source frame plus the caption overlay.
//!
//! Composition is synchronous and keeps no state between frames, so it
//! can run once per rendered frame for the whole export.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use ab_glyph::{Font, FontVec, PxScale, ScaleFont};
use clipcraft_capture::source::VideoFrame;
use clipcraft_capture::surface::CaptureSurface;
use clipcraft_model::overlay::{OverlaySpec, OverlayStyle};
use image::imageops::{self, FilterType};
use image::{Pixel, Rgba, RgbaImage};
use imageproc::drawing::{draw_text_mut, text_size};
use imageproc::rect::Rect;

/// Font locations searched when no font is configured.
const SYSTEM_FONTS: &[&str] = &[
    "/usr/share/fonts/truetype/dejavu/DejaVuSans.ttf",
    "/usr/share/fonts/TTF/DejaVuSans.ttf",
    "/usr/share/fonts/dejavu/DejaVuSans.ttf",
    "/usr/share/fonts/truetype/liberation/LiberationSans-Regular.ttf",
    "/usr/share/fonts/noto/NotoSans-Regular.ttf",
    "/System/Library/Fonts/Supplemental/Arial.ttf",
    "C:\\Windows\\Fonts\\arial.ttf",
];

/// Measured extent of a line of text.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TextMetrics {
    pub width: f32,
    /// Height above the baseline.
    pub ascent: f32,
    /// Depth below the baseline (positive).
    pub descent: f32,
}

impl TextMetrics {
    pub fn height(&self) -> f32 {
        self.ascent + self.descent
    }

    /// Rough metrics for when no font is available.
    pub fn estimate(text: &str, px: f32) -> Self {
        Self {
            width: text.chars().count() as f32 * px * 0.5,
            ascent: px * 0.75,
            descent: px * 0.25,
        }
    }
}

/// The drawing operations composition needs.
pub trait DrawTarget {
    fn size(&self) -> (u32, u32);

    /// Draw the frame scaled to fill the whole target.
    fn draw_frame(&mut self, frame: &VideoFrame);

    /// Alpha-blend `color` over `rect`.
    fn fill_rect(&mut self, rect: Rect, color: Rgba<u8>);

    fn measure_text(&self, text: &str, px: f32) -> TextMetrics;

    /// Draw `text` horizontally centred on `center_x` with its baseline
    /// at `baseline_y`.
    fn fill_text(&mut self, text: &str, center_x: f32, baseline_y: f32, px: f32, color: Rgba<u8>);
}

/// A [`DrawTarget`] over an RGBA raster.
pub struct RasterTarget<'a> {
    image: &'a mut RgbaImage,
    font: Option<&'a FontVec>,
}

impl<'a> RasterTarget<'a> {
    pub fn new(image: &'a mut RgbaImage, font: Option<&'a FontVec>) -> Self {
        Self { image, font }
    }
}

impl DrawTarget for RasterTarget<'_> {
    fn size(&self) -> (u32, u32) {
        self.image.dimensions()
    }

    fn draw_frame(&mut self, frame: &VideoFrame) {
        let (w, h) = self.image.dimensions();
        if frame.image.dimensions() == (w, h) {
            self.image.copy_from_slice(frame.image.as_raw());
        } else {
            *self.image = imageops::resize(&frame.image, w, h, FilterType::Triangle);
        }
    }

    fn fill_rect(&mut self, rect: Rect, color: Rgba<u8>) {
        let (w, h) = self.image.dimensions();
        let x0 = rect.left().clamp(0, w as i32) as u32;
        let y0 = rect.top().clamp(0, h as i32) as u32;
        let x1 = (rect.right() + 1).clamp(0, w as i32) as u32;
        let y1 = (rect.bottom() + 1).clamp(0, h as i32) as u32;

        for y in y0..y1 {
            for x in x0..x1 {
                self.image.get_pixel_mut(x, y).blend(&color);
            }
        }
    }

    fn measure_text(&self, text: &str, px: f32) -> TextMetrics {
        let Some(font) = self.font else {
            return TextMetrics::estimate(text, px);
        };
        let scale = PxScale::from(px);
        let scaled = font.as_scaled(scale);
        let (width, _) = text_size(scale, font, text);
        TextMetrics {
            width: width as f32,
            ascent: scaled.ascent(),
            descent: -scaled.descent(),
        }
    }

    fn fill_text(&mut self, text: &str, center_x: f32, baseline_y: f32, px: f32, color: Rgba<u8>) {
        let Some(font) = self.font else {
            return;
        };
        let metrics = self.measure_text(text, px);
        let x = (center_x - metrics.width / 2.0).round() as i32;
        let top = (baseline_y - metrics.ascent).round() as i32;
        draw_text_mut(self.image, color, x, top, PxScale::from(px), font, text);
    }
}

/// Where the caption goes on a surface.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct OverlayLayout {
    pub font_px: f32,
    pub center_x: f32,
    pub baseline_y: f32,
    /// Background box, centred on the text.
    pub background: Rect,
}

/// Lay out a bottom-centred caption for a `width` x `height` surface.
pub fn overlay_layout(
    style: &OverlayStyle,
    width: u32,
    height: u32,
    metrics: TextMetrics,
) -> OverlayLayout {
    let center_x = width as f32 / 2.0;
    let baseline_y = height as f32 - style.bottom_inset as f32;

    let box_w = (metrics.width + style.padding_x as f32).ceil().max(1.0);
    let box_h = (metrics.height() + style.padding_y as f32).ceil().max(1.0);
    let box_x = (center_x - box_w / 2.0).round() as i32;
    let box_y = (baseline_y - metrics.ascent - style.padding_y as f32 / 2.0).round() as i32;

    OverlayLayout {
        font_px: style.font_px(height),
        center_x,
        baseline_y,
        background: Rect::at(box_x, box_y).of_size(box_w as u32, box_h as u32),
    }
}

/// Draws frames with an optional caption. Holds only the overlay
/// snapshot and the font.
#[derive(Clone)]
pub struct FrameCompositor {
    overlay: Option<OverlaySpec>,
    font: Option<Arc<FontVec>>,
}

impl FrameCompositor {
    pub fn new(overlay: Option<OverlaySpec>, font: Option<Arc<FontVec>>) -> Self {
        if font.is_none() && overlay.as_ref().and_then(|o| o.visible_text()).is_some() {
            tracing::warn!("No font available; caption box is drawn without glyphs");
        }
        Self { overlay, font }
    }

    /// Draw one frame onto the shared capture surface.
    pub fn compose(&self, surface: &CaptureSurface, frame: &VideoFrame) {
        surface.draw(|image| {
            let mut target = RasterTarget::new(image, self.font.as_deref());
            self.draw(&mut target, frame);
        });
    }

    /// Draw one frame onto any target.
    pub fn draw<T: DrawTarget + ?Sized>(&self, target: &mut T, frame: &VideoFrame) {
        target.draw_frame(frame);

        let Some(overlay) = &self.overlay else {
            return;
        };
        let Some(text) = overlay.visible_text() else {
            return;
        };

        let (width, height) = target.size();
        let style = &overlay.style;
        let font_px = style.font_px(height);
        if font_px < 1.0 {
            return;
        }
        let metrics = target.measure_text(text, font_px);
        let layout = overlay_layout(style, width, height, metrics);

        target.fill_rect(layout.background, Rgba(style.background));
        target.fill_text(
            text,
            layout.center_x,
            layout.baseline_y,
            layout.font_px,
            Rgba(style.color),
        );
    }
}

/// Load the configured font, or the first system font found.
pub fn load_font(configured: Option<&Path>) -> Option<Arc<FontVec>> {
    let candidates: Vec<PathBuf> = match configured {
        Some(path) => vec![path.to_path_buf()],
        None => SYSTEM_FONTS.iter().map(PathBuf::from).collect(),
    };

    for path in candidates {
        let Ok(bytes) = std::fs::read(&path) else {
            continue;
        };
        match FontVec::try_from_vec(bytes) {
            Ok(font) => {
                tracing::debug!(path = %path.display(), "Loaded overlay font");
                return Some(Arc::new(font));
            }
            Err(e) => tracing::warn!(path = %path.display(), error = %e, "Unusable font file"),
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Default)]
    struct Recorder {
        calls: Vec<String>,
    }

    impl DrawTarget for Recorder {
        fn size(&self) -> (u32, u32) {
            (640, 360)
        }

        fn draw_frame(&mut self, frame: &VideoFrame) {
            self.calls.push(format!("frame {}", frame.position_secs));
        }

        fn fill_rect(&mut self, rect: Rect, color: Rgba<u8>) {
            self.calls.push(format!(
                "rect {},{} {}x{} a={}",
                rect.left(),
                rect.top(),
                rect.width(),
                rect.height(),
                color.0[3]
            ));
        }

        fn measure_text(&self, text: &str, px: f32) -> TextMetrics {
            TextMetrics::estimate(text, px)
        }

        fn fill_text(&mut self, text: &str, cx: f32, baseline: f32, px: f32, _: Rgba<u8>) {
            self.calls.push(format!("text {text} @{cx},{baseline} {px}px"));
        }
    }

    fn frame(w: u32, h: u32, color: [u8; 4]) -> VideoFrame {
        VideoFrame {
            image: RgbaImage::from_pixel(w, h, Rgba(color)),
            position_secs: 1.0,
        }
    }

    #[test]
    fn test_layout_centres_box_on_text() {
        let style = OverlayStyle::default();
        let metrics = TextMetrics {
            width: 100.0,
            ascent: 15.0,
            descent: 3.0,
        };
        let layout = overlay_layout(&style, 640, 360, metrics);
        assert_eq!(layout.font_px, 18.0);
        assert_eq!(layout.baseline_y, 336.0);
        assert_eq!(layout.background.width(), 124);
        assert_eq!(layout.background.height(), 30);
        assert_eq!(layout.background.left(), 258);
        // top = 336 - 15 - 6; bottom edge sits 6 below the descender
        assert_eq!(layout.background.top(), 315);
        assert_eq!(layout.background.bottom(), 344);
    }

    #[test]
    fn test_draw_sequence_with_caption() {
        let compositor = FrameCompositor::new(Some(OverlaySpec::new("  HELLO ")), None);
        let mut target = Recorder::default();
        compositor.draw(&mut target, &frame(2, 2, [0; 4]));

        assert_eq!(target.calls.len(), 3);
        assert_eq!(target.calls[0], "frame 1");
        assert!(target.calls[1].starts_with("rect "));
        assert!(target.calls[1].ends_with("a=153"));
        assert_eq!(target.calls[2], "text HELLO @320,336 18px");
    }

    #[test]
    fn test_blank_caption_draws_only_frame() {
        for overlay in [None, Some(OverlaySpec::new("")), Some(OverlaySpec::new(" \t "))] {
            let compositor = FrameCompositor::new(overlay, None);
            let mut target = Recorder::default();
            compositor.draw(&mut target, &frame(2, 2, [0; 4]));
            assert_eq!(target.calls, vec!["frame 1".to_string()]);
        }
    }

    #[test]
    fn test_blank_caption_is_pixel_identical() {
        let source = frame(64, 36, [10, 200, 30, 255]);
        let plain = CaptureSurface::new(64, 36);
        let blank = CaptureSurface::new(64, 36);
        FrameCompositor::new(None, None).compose(&plain, &source);
        FrameCompositor::new(Some(OverlaySpec::new("   ")), None).compose(&blank, &source);
        assert_eq!(plain.snapshot().0, blank.snapshot().0);
    }

    #[test]
    fn test_frame_is_scaled_to_surface() {
        let surface = CaptureSurface::new(8, 4);
        FrameCompositor::new(None, None).compose(&surface, &frame(2, 2, [255, 0, 0, 255]));
        let (image, generation) = surface.snapshot();
        assert_eq!(generation, 1);
        assert_eq!(image.dimensions(), (8, 4));
        assert!(image.pixels().all(|p| *p == Rgba([255, 0, 0, 255])));
    }

    #[test]
    fn test_caption_box_darkens_bottom_centre() {
        let surface = CaptureSurface::new(640, 360);
        let white = frame(640, 360, [255, 255, 255, 255]);
        FrameCompositor::new(Some(OverlaySpec::new("HELLO")), None).compose(&surface, &white);
        let (image, _) = surface.snapshot();

        // Inside the box (no glyphs drawn without a font): 255 * (1 - 0.6)
        let inside = image.get_pixel(320, 330);
        assert!(inside.0[0] < 110 && inside.0[0] > 95, "{inside:?}");
        assert_eq!(inside.0[3], 255);
        // Corners untouched.
        assert_eq!(*image.get_pixel(0, 0), Rgba([255, 255, 255, 255]));
        assert_eq!(*image.get_pixel(639, 359), Rgba([255, 255, 255, 255]));
    }

    #[test]
    fn test_fill_rect_clips_to_bounds() {
        let mut image = RgbaImage::from_pixel(4, 4, Rgba([255, 255, 255, 255]));
        let mut target = RasterTarget::new(&mut image, None);
        target.fill_rect(Rect::at(-2, 2).of_size(10, 10), Rgba([0, 0, 0, 255]));
        assert_eq!(*image.get_pixel(0, 3), Rgba([0, 0, 0, 255]));
        assert_eq!(*image.get_pixel(3, 1), Rgba([255, 255, 255, 255]));
    }

    #[test]
    fn test_missing_configured_font_yields_none() {
        assert!(load_font(Some(Path::new("/nonexistent/clipcraft.ttf"))).is_none());
    }
}
