//! Value-based fences.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crate::error::Result;
use crate::gpu::traits::NativeDevice;
use crate::gpu::types::FenceHandle;
use crate::graphics::device::DeviceId;
use crate::sync::lifecycle::LifecycleState;

/// A native fence plus the value it is expected to reach next.
///
/// The signal value only grows: [`reset`](Self::reset) moves it forward, so a
/// wait always targets the next signal rather than an earlier one.
pub struct GraphicsFence {
    device_id: DeviceId,
    native: Arc<dyn NativeDevice>,
    handle: FenceHandle,
    signal_value: AtomicU64,
    lifecycle: LifecycleState,
}

impl GraphicsFence {
    pub(crate) fn new(
        device_id: DeviceId,
        native: Arc<dyn NativeDevice>,
        signalled: bool,
    ) -> Result<Self> {
        let handle = native.create_fence(signalled)?;
        Ok(Self {
            device_id,
            native,
            handle,
            signal_value: AtomicU64::new(if signalled { 0 } else { 1 }),
            lifecycle: LifecycleState::new(),
        })
    }

    /// Device the fence was created on.
    pub fn device_id(&self) -> DeviceId {
        self.device_id
    }

    /// Native handle.
    pub fn handle(&self) -> FenceHandle {
        self.handle
    }

    /// Value the next signal sets.
    pub fn signal_value(&self) -> u64 {
        self.signal_value.load(Ordering::Acquire)
    }

    /// Whether the fence has reached its signal value.
    pub fn is_signalled(&self) -> Result<bool> {
        self.lifecycle.ensure_alive("GraphicsFence")?;
        Ok(self.native.fence_completed_value(self.handle)? >= self.signal_value())
    }

    /// Block until the fence reaches its signal value.
    pub fn wait(&self) -> Result<()> {
        self.lifecycle.ensure_alive("GraphicsFence")?;
        self.native.wait_fence(self.handle, self.signal_value(), None)?;
        Ok(())
    }

    /// Block until the fence reaches its signal value or `timeout` elapses.
    /// Returns `false` on timeout.
    pub fn wait_timeout(&self, timeout: Duration) -> Result<bool> {
        self.lifecycle.ensure_alive("GraphicsFence")?;
        Ok(self
            .native
            .wait_fence(self.handle, self.signal_value(), Some(timeout))?)
    }

    /// Prepare the fence for its next signal.
    pub fn reset(&self) -> Result<()> {
        self.lifecycle.ensure_alive("GraphicsFence")?;
        self.native.reset_fence(self.handle)?;
        self.signal_value.fetch_add(1, Ordering::AcqRel);
        Ok(())
    }

    /// Destroy the native fence. Idempotent.
    pub fn dispose(&self) {
        if !self.lifecycle.begin_dispose() {
            return;
        }
        self.native.destroy_fence(self.handle);
        self.lifecycle.end_dispose();
    }

    pub(crate) fn ensure_alive(&self) -> Result<()> {
        self.lifecycle.ensure_alive("GraphicsFence")
    }
}

impl Drop for GraphicsFence {
    fn drop(&mut self) {
        self.dispose();
    }
}

impl fmt::Debug for GraphicsFence {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GraphicsFence")
            .field("handle", &self.handle)
            .field("signal_value", &self.signal_value())
            .field("lifecycle", &self.lifecycle.get())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::GraphicsError;
    use crate::gpu::software::{SoftwareConfig, SoftwareDevice};

    fn fence(signalled: bool) -> (Arc<SoftwareDevice>, GraphicsFence) {
        let device = Arc::new(SoftwareDevice::new(SoftwareConfig::new()));
        let fence = GraphicsFence::new(DeviceId::next(), device.clone(), signalled).unwrap();
        (device, fence)
    }

    #[test]
    fn test_signalled_fence_does_not_block() {
        let (_device, fence) = fence(true);
        assert!(fence.is_signalled().unwrap());
        fence.wait().unwrap();
        fence.reset().unwrap();
        assert_eq!(fence.signal_value(), 1);
        assert!(!fence.is_signalled().unwrap());
    }

    #[test]
    fn test_unsignalled_fence_times_out() {
        let (device, fence) = fence(false);
        assert!(!fence.wait_timeout(Duration::from_millis(1)).unwrap());
        device.signal_fence(fence.handle(), fence.signal_value()).unwrap();
        assert!(fence.wait_timeout(Duration::from_millis(1)).unwrap());
    }

    #[test]
    fn test_signal_value_is_monotonic() {
        let (_device, fence) = fence(true);
        let mut last = fence.signal_value();
        for _ in 0..5 {
            fence.reset().unwrap();
            assert!(fence.signal_value() > last);
            last = fence.signal_value();
        }
    }

    #[test]
    fn test_dispose_is_idempotent() {
        let (device, fence) = fence(true);
        fence.dispose();
        fence.dispose();
        assert_eq!(device.live_fences(), 0);
        assert!(matches!(fence.wait(), Err(GraphicsError::Disposed { .. })));
    }
}
