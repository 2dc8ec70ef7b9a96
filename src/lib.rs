//! # framegfx
//!
//! Frame-oriented GPU device abstraction with a sub-allocating memory
//! manager, written once against a small native-backend trait.
//!
//! ## Features
//!
//! - Memory blocks with a best-fit free list, coalescing on release
//! - One block collection per native memory type, grown and trimmed by policy
//! - Buffers and textures placed in sub-allocated regions
//! - Mapping with flush/invalidate rounded to the non-coherent atom size
//! - Render contexts rented per frame, fenced against the GPU
//! - Swapchain presentation with resize handling
//! - Software backend for headless use and tests; Vulkan via `ash`
//! - Structured diagnostics (`GX` codes) and optional Tracy frame marks
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use framegfx::{
//!     BufferKind, CpuAccess, DeviceDescriptor, GraphicsAdapter, RegionCollection,
//!     SoftwareConfig,
//! };
//!
//! let adapter = GraphicsAdapter::software(SoftwareConfig::new());
//! let device = adapter.create_device(None, DeviceDescriptor::default())?;
//!
//! let upload = device.create_buffer(BufferKind::Default, CpuAccess::CpuToGpu, 1024)?;
//! let region = upload.allocate(256, 16, 0)?;
//! let mut mapping = upload.map_region(&region)?;
//! mapping.as_mut_slice().fill(1);
//! mapping.unmap_and_write()?;
//!
//! let mut context = device.rent_render_context()?;
//! context.begin_frame()?;
//! context.end_frame()?;
//! device.return_render_context(context)?;
//! device.present_frame()?;
//! # Ok::<(), framegfx::GraphicsError>(())
//! ```

pub mod api;
pub mod diagnostics;
pub mod error;
pub mod gpu;
pub mod graphics;
pub mod memory;
pub mod sync;
pub mod util;

pub use api::config::{AllocatorConfig, BlockSizePolicy, DeviceDescriptor};
pub use api::stats::AllocatorStats;
pub use error::{GraphicsError, NativeError, NativeErrorKind, Result};

pub use gpu::software::{SoftwareAdapter, SoftwareConfig, SoftwareDevice};
pub use gpu::traits::{NativeAdapter, NativeDevice};
pub use gpu::types::{
    BufferKind, CpuAccess, ElementFormat, Extent2d, InputElement, InputElementKind,
    PipelineResource, ResourceBindingKind, ResourceState, ShaderKind, ShaderVisibility,
    TexelFormat, TextureDescriptor, TextureKind,
};

pub use graphics::{
    ContextState, DeviceId, GraphicsAdapter, GraphicsContext, GraphicsDevice, GraphicsFence,
    GraphicsPipeline, GraphicsPipelineSignature, GraphicsPrimitive, GraphicsRenderPass,
    GraphicsResource, GraphicsShader, GraphicsSurface, MappedMemory, OffscreenSurface,
    PrimitiveDescriptor, RenderContext, ResourceKind,
};
pub use memory::{MemoryAllocator, MemoryBlock, MemoryBlockCollection, MemoryRegion, RegionCollection};
pub use sync::lifecycle::Lifecycle;
pub use util::lazy::ValueLazy;

// Diagnostics
pub use diagnostics::{Diagnostic, DiagnosticKind};
pub use diagnostics::{set_strict_mode, StrictMode, StrictModeGuard};
pub use diagnostics::{GX001, GX002, GX003, GX101, GX102, GX103, GX201, GX202, GX203, GX901};
