//! The device object model.
//!
//! Everything here is written against [`NativeDevice`](crate::gpu::traits::NativeDevice);
//! the backend is picked when the [`GraphicsAdapter`] is created.

pub mod adapter;
pub mod context;
pub mod device;
pub mod fence;
pub mod mapping;
pub mod pipeline;
pub mod primitive;
pub mod resource;
pub mod surface;

pub use adapter::GraphicsAdapter;
pub use context::{ContextState, GraphicsContext};
pub use device::{DeviceId, GraphicsDevice, RenderContext};
pub use fence::GraphicsFence;
pub use mapping::MappedMemory;
pub use pipeline::{GraphicsPipeline, GraphicsPipelineSignature, GraphicsRenderPass, GraphicsShader};
pub use primitive::{GraphicsPrimitive, PrimitiveDescriptor};
pub use resource::{GraphicsResource, ResourceKind};
pub use surface::{GraphicsSurface, OffscreenSurface};
