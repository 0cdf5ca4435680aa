//! Off-screen raster surface shared by the compositor and the sampler.

use std::sync::{Arc, Mutex, MutexGuard};

use image::{Rgba, RgbaImage};

/// The surface frames are drawn onto before encoding.
///
/// Cloning shares the same pixels. A draw holds the lock for its whole
/// duration, so the sampler only ever sees fully composited frames.
#[derive(Debug, Clone)]
pub struct CaptureSurface {
    inner: Arc<Mutex<SurfaceState>>,
    width: u32,
    height: u32,
}

#[derive(Debug)]
struct SurfaceState {
    image: RgbaImage,
    generation: u64,
}

impl CaptureSurface {
    /// Create an opaque black surface.
    pub fn new(width: u32, height: u32) -> Self {
        let image = RgbaImage::from_pixel(width, height, Rgba([0, 0, 0, 255]));
        Self {
            inner: Arc::new(Mutex::new(SurfaceState {
                image,
                generation: 0,
            })),
            width,
            height,
        }
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    /// Mutate the pixels. Counts as one drawn frame.
    pub fn draw<R>(&self, f: impl FnOnce(&mut RgbaImage) -> R) -> R {
        let mut state = self.lock();
        let result = f(&mut state.image);
        state.generation += 1;
        result
    }

    /// Copy of the current pixels with the draw generation they belong to.
    pub fn snapshot(&self) -> (RgbaImage, u64) {
        let state = self.lock();
        (state.image.clone(), state.generation)
    }

    /// Copy the pixels only if something was drawn after `seen`.
    pub fn snapshot_if_newer(&self, seen: u64) -> Option<(RgbaImage, u64)> {
        let state = self.lock();
        (state.generation > seen).then(|| (state.image.clone(), state.generation))
    }

    fn lock(&self) -> MutexGuard<'_, SurfaceState> {
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}
