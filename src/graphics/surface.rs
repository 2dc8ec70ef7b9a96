//! Presentation surfaces.

use std::sync::atomic::{AtomicU64, Ordering};

use crate::gpu::types::Extent2d;

/// Something a device presents into, usually a window.
///
/// The device only needs the current size. Windowing integrations forward
/// size changes with [`GraphicsDevice::on_surface_size_changed`](crate::GraphicsDevice::on_surface_size_changed).
pub trait GraphicsSurface: Send + Sync {
    /// Current drawable size in pixels.
    fn extent(&self) -> Extent2d;

    /// Current width in pixels.
    fn width(&self) -> u32 {
        self.extent().width
    }

    /// Current height in pixels.
    fn height(&self) -> u32 {
        self.extent().height
    }
}

/// A surface whose size is set by the caller; used for offscreen
/// presentation and tests.
#[derive(Debug)]
pub struct OffscreenSurface {
    packed: AtomicU64,
}

impl OffscreenSurface {
    /// Create a surface of `extent`.
    pub fn new(extent: Extent2d) -> Self {
        Self {
            packed: AtomicU64::new(pack(extent)),
        }
    }

    /// Change the size.
    pub fn set_extent(&self, extent: Extent2d) {
        self.packed.store(pack(extent), Ordering::Release);
    }
}

impl GraphicsSurface for OffscreenSurface {
    fn extent(&self) -> Extent2d {
        let packed = self.packed.load(Ordering::Acquire);
        Extent2d::new((packed >> 32) as u32, packed as u32)
    }
}

fn pack(extent: Extent2d) -> u64 {
    (u64::from(extent.width) << 32) | u64::from(extent.height)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_offscreen_surface_size() {
        let surface = OffscreenSurface::new(Extent2d::new(640, 480));
        assert_eq!(surface.width(), 640);
        assert_eq!(surface.height(), 480);
        surface.set_extent(Extent2d::new(u32::MAX, 1));
        assert_eq!(surface.extent(), Extent2d::new(u32::MAX, 1));
    }
}
