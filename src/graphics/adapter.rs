//! Adapters: the entry point for creating devices.

use std::fmt;
use std::sync::Arc;

use crate::api::config::DeviceDescriptor;
use crate::error::Result;
use crate::gpu::software::{SoftwareAdapter, SoftwareConfig};
use crate::gpu::traits::NativeAdapter;
use crate::gpu::types::AdapterInfo;
use crate::graphics::device::GraphicsDevice;
use crate::graphics::surface::GraphicsSurface;

/// A physical adapter of some backend.
#[derive(Clone)]
pub struct GraphicsAdapter {
    native: Arc<dyn NativeAdapter>,
}

impl GraphicsAdapter {
    /// Wrap a backend adapter.
    pub fn new(native: Arc<dyn NativeAdapter>) -> Self {
        Self { native }
    }

    /// The in-process software adapter.
    pub fn software(config: SoftwareConfig) -> Self {
        Self::new(Arc::new(SoftwareAdapter::new(config)))
    }

    /// Adapter description.
    pub fn info(&self) -> AdapterInfo {
        self.native.info()
    }

    /// Create a device, presenting into `surface` if one is given.
    pub fn create_device(
        &self,
        surface: Option<Arc<dyn GraphicsSurface>>,
        desc: DeviceDescriptor,
    ) -> Result<GraphicsDevice> {
        let native = self.native.create_device()?;
        GraphicsDevice::new(native, surface, desc)
    }
}

impl fmt::Debug for GraphicsAdapter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("GraphicsAdapter").field(&self.info()).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gpu::types::BackendKind;

    #[test]
    fn test_software_adapter_creates_devices() {
        let adapter = GraphicsAdapter::software(SoftwareConfig::new());
        assert_eq!(adapter.info().backend, BackendKind::Software);
        let first = adapter.create_device(None, DeviceDescriptor::default()).unwrap();
        let second = adapter.create_device(None, DeviceDescriptor::default()).unwrap();
        assert_ne!(first.id(), second.id());
        assert_eq!(first.context_count(), 2);
    }
}
