//! Vulkan backend via `ash`.
//!
//! Enable with the `vulkan` feature. The crate does not create window
//! surfaces: build one with the instance returned by
//! [`VulkanInstance::raw`] and hand it to [`VulkanAdapter::with_surface`].
//!
//! Non-dispatchable Vulkan handles are used directly as the backend handle
//! values, so only objects with extra per-object data are kept in tables.

mod command;
pub mod conv;
mod device;

use std::ffi::{CStr, CString};
use std::os::raw::c_char;
use std::sync::Arc;

use ash::extensions::khr;
use ash::vk;

use crate::gpu::traits::{NativeAdapter, NativeDevice, NativeResult};
use crate::gpu::types::{AdapterInfo, BackendKind};

pub use device::VulkanDevice;

use conv::native_error;

/// A loaded Vulkan library and instance.
pub struct VulkanInstance {
    entry: ash::Entry,
    raw: ash::Instance,
}

impl VulkanInstance {
    /// Load the Vulkan loader and create an instance with the given
    /// instance extensions (e.g. the platform surface extensions).
    pub fn new(application_name: &str, extensions: &[&CStr]) -> NativeResult<Arc<Self>> {
        let entry = unsafe { ash::Entry::load() }
            .map_err(|_| native_error("load_vulkan", vk::Result::ERROR_INITIALIZATION_FAILED))?;

        let application_name = CString::new(application_name)
            .map_err(|_| native_error("create_instance", vk::Result::ERROR_INITIALIZATION_FAILED))?;
        let engine_name = CString::new(env!("CARGO_PKG_NAME"))
            .map_err(|_| native_error("create_instance", vk::Result::ERROR_INITIALIZATION_FAILED))?;
        let app_info = vk::ApplicationInfo::builder()
            .application_name(&application_name)
            .engine_name(&engine_name)
            .api_version(vk::API_VERSION_1_1);
        let extension_names: Vec<*const c_char> =
            extensions.iter().map(|name| name.as_ptr()).collect();
        let create_info = vk::InstanceCreateInfo::builder()
            .application_info(&app_info)
            .enabled_extension_names(&extension_names);

        let raw = unsafe { entry.create_instance(&create_info, None) }
            .map_err(|e| native_error("create_instance", e))?;
        log::debug!("created vulkan instance with {} extensions", extensions.len());
        Ok(Arc::new(Self { entry, raw }))
    }

    /// The loader entry points.
    pub fn entry(&self) -> &ash::Entry {
        &self.entry
    }

    /// The raw instance, for creating surfaces.
    pub fn raw(&self) -> &ash::Instance {
        &self.raw
    }

    /// Every physical device with a graphics queue.
    pub fn adapters(self: &Arc<Self>) -> NativeResult<Vec<VulkanAdapter>> {
        let physical_devices = unsafe { self.raw.enumerate_physical_devices() }
            .map_err(|e| native_error("enumerate_physical_devices", e))?;

        let mut adapters = Vec::new();
        for physical in physical_devices {
            let families =
                unsafe { self.raw.get_physical_device_queue_family_properties(physical) };
            let Some(queue_family) = families
                .iter()
                .position(|family| family.queue_flags.contains(vk::QueueFlags::GRAPHICS))
            else {
                continue;
            };

            let properties = unsafe { self.raw.get_physical_device_properties(physical) };
            let name = unsafe { CStr::from_ptr(properties.device_name.as_ptr()) }
                .to_string_lossy()
                .into_owned();
            adapters.push(VulkanAdapter {
                instance: Arc::clone(self),
                physical,
                queue_family: queue_family as u32,
                info: AdapterInfo {
                    name,
                    backend: BackendKind::Vulkan,
                    vendor_id: properties.vendor_id,
                    device_id: properties.device_id,
                },
                surface: None,
            });
        }
        Ok(adapters)
    }
}

impl Drop for VulkanInstance {
    fn drop(&mut self) {
        unsafe { self.raw.destroy_instance(None) };
    }
}

/// A window surface owned by the backend.
pub(crate) struct VulkanSurface {
    // Keeps the instance alive until the surface is gone.
    _instance: Arc<VulkanInstance>,
    loader: khr::Surface,
    raw: vk::SurfaceKHR,
}

impl Drop for VulkanSurface {
    fn drop(&mut self) {
        unsafe { self.loader.destroy_surface(self.raw, None) };
    }
}

/// A physical device and the queue family devices are created on.
#[derive(Clone)]
pub struct VulkanAdapter {
    instance: Arc<VulkanInstance>,
    physical: vk::PhysicalDevice,
    queue_family: u32,
    info: AdapterInfo,
    surface: Option<Arc<VulkanSurface>>,
}

impl VulkanAdapter {
    /// Attach a window surface; devices created afterwards can present.
    ///
    /// # Safety
    ///
    /// `surface` must be a valid surface created from this adapter's
    /// instance. Ownership moves to the adapter, which destroys it once the
    /// adapter and every device created from it are gone.
    pub unsafe fn with_surface(mut self, surface: vk::SurfaceKHR) -> NativeResult<Self> {
        let loader = khr::Surface::new(&self.instance.entry, &self.instance.raw);
        let surface = Arc::new(VulkanSurface {
            _instance: Arc::clone(&self.instance),
            loader,
            raw: surface,
        });
        let supported = surface
            .loader
            .get_physical_device_surface_support(self.physical, self.queue_family, surface.raw)
            .map_err(|e| native_error("get_physical_device_surface_support", e))?;
        if !supported {
            return Err(native_error(
                "get_physical_device_surface_support",
                vk::Result::ERROR_INCOMPATIBLE_DISPLAY_KHR,
            ));
        }
        self.surface = Some(surface);
        Ok(self)
    }

    /// The raw physical device.
    pub fn physical_device(&self) -> vk::PhysicalDevice {
        self.physical
    }
}

impl NativeAdapter for VulkanAdapter {
    fn info(&self) -> AdapterInfo {
        self.info.clone()
    }

    fn create_device(&self) -> NativeResult<Arc<dyn NativeDevice>> {
        let priorities = [1.0f32];
        let queue_infos = [vk::DeviceQueueCreateInfo::builder()
            .queue_family_index(self.queue_family)
            .queue_priorities(&priorities)
            .build()];
        let extensions: Vec<*const c_char> = if self.surface.is_some() {
            vec![khr::Swapchain::name().as_ptr()]
        } else {
            Vec::new()
        };
        let create_info = vk::DeviceCreateInfo::builder()
            .queue_create_infos(&queue_infos)
            .enabled_extension_names(&extensions);

        let raw = unsafe {
            self.instance
                .raw
                .create_device(self.physical, &create_info, None)
        }
        .map_err(|e| native_error("create_device", e))?;

        let device = VulkanDevice::new(
            Arc::clone(&self.instance),
            self.physical,
            self.queue_family,
            self.info.clone(),
            self.surface.clone(),
            raw,
        )?;
        log::info!("created vulkan device on {}", self.info.name);
        Ok(Arc::new(device))
    }
}
