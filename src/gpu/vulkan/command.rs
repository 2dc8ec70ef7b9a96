//! Translation of recorded [`Command`]s into Vulkan command-buffer calls.

use ash::vk::{self, Handle};

use super::conv::{self, unknown_handle};
use super::device::{Objects, VulkanDevice};
use crate::gpu::traits::NativeResult;
use crate::gpu::types::*;

impl VulkanDevice {
    pub(super) fn encode(
        &self,
        objects: &mut Objects,
        cb: vk::CommandBuffer,
        command: &Command,
    ) -> NativeResult<()> {
        let raw = &self.raw;
        match *command {
            Command::Barrier(ref barriers) => self.encode_barriers(objects, cb, barriers)?,
            Command::BeginRenderPass {
                render_pass,
                target,
                extent,
                clear_color,
            } => {
                let clear_values = [vk::ClearValue {
                    color: vk::ClearColorValue {
                        float32: clear_color,
                    },
                }];
                let info = vk::RenderPassBeginInfo::builder()
                    .render_pass(vk::RenderPass::from_raw(render_pass.0))
                    .framebuffer(vk::Framebuffer::from_raw(target.0))
                    .render_area(vk::Rect2D {
                        offset: vk::Offset2D::default(),
                        extent: conv::map_extent_2d(extent),
                    })
                    .clear_values(&clear_values);
                unsafe { raw.cmd_begin_render_pass(cb, &info, vk::SubpassContents::INLINE) };
            }
            Command::SetViewport(viewport) => {
                let viewports = [vk::Viewport {
                    x: viewport.x,
                    y: viewport.y,
                    width: viewport.width,
                    height: viewport.height,
                    min_depth: viewport.min_depth,
                    max_depth: viewport.max_depth,
                }];
                unsafe { raw.cmd_set_viewport(cb, 0, &viewports) };
            }
            Command::SetScissor(rect) => {
                let scissors = [vk::Rect2D {
                    offset: vk::Offset2D {
                        x: rect.x,
                        y: rect.y,
                    },
                    extent: vk::Extent2D {
                        width: rect.width,
                        height: rect.height,
                    },
                }];
                unsafe { raw.cmd_set_scissor(cb, 0, &scissors) };
            }
            Command::EndRenderPass => unsafe { raw.cmd_end_render_pass(cb) },
            Command::CopyBuffer {
                destination,
                source,
                size,
            } => {
                let destination = vk::Buffer::from_raw(destination.0);
                let regions = [vk::BufferCopy {
                    src_offset: 0,
                    dst_offset: 0,
                    size,
                }];
                unsafe {
                    raw.cmd_copy_buffer(cb, vk::Buffer::from_raw(source.0), destination, &regions)
                };
                self.make_host_readable(cb, destination);
            }
            Command::CopyBufferToImage {
                destination,
                destination_state,
                source,
                format,
                extent,
                footprint,
            } => {
                let image = vk::Image::from_raw(destination.0);
                let layout = self.prepare_copy(objects, cb, image, destination_state)?;
                let regions = [conv::buffer_image_copy(format, extent, &footprint)];
                unsafe {
                    raw.cmd_copy_buffer_to_image(
                        cb,
                        vk::Buffer::from_raw(source.0),
                        image,
                        layout,
                        &regions,
                    )
                };
            }
            Command::CopyImageToBuffer {
                destination,
                source,
                source_state,
                format,
                extent,
                footprint,
            } => {
                let image = vk::Image::from_raw(source.0);
                let destination = vk::Buffer::from_raw(destination.0);
                let layout = self.prepare_copy(objects, cb, image, source_state)?;
                let regions = [conv::buffer_image_copy(format, extent, &footprint)];
                unsafe { raw.cmd_copy_image_to_buffer(cb, image, layout, destination, &regions) };
                self.make_host_readable(cb, destination);
            }
            Command::Draw(ref draw) => self.encode_draw(cb, draw),
        }
        Ok(())
    }

    fn encode_barriers(
        &self,
        objects: &mut Objects,
        cb: vk::CommandBuffer,
        barriers: &[ResourceBarrier],
    ) -> NativeResult<()> {
        let mut src_stage = vk::PipelineStageFlags::empty();
        let mut dst_stage = vk::PipelineStageFlags::empty();
        let mut buffer_barriers = Vec::new();
        let mut image_barriers = Vec::new();

        for barrier in barriers {
            let before = conv::map_state(barrier.before);
            let after = conv::map_state(barrier.after);
            src_stage |= before.stage;
            dst_stage |= after.stage;
            match barrier.resource {
                NativeResource::Buffer(buffer) => buffer_barriers.push(
                    vk::BufferMemoryBarrier::builder()
                        .src_access_mask(before.access)
                        .dst_access_mask(after.access)
                        .src_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
                        .dst_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
                        .buffer(vk::Buffer::from_raw(buffer.0))
                        .offset(0)
                        .size(vk::WHOLE_SIZE)
                        .build(),
                ),
                NativeResource::Image(image) => {
                    let image = vk::Image::from_raw(image.0);
                    let info = objects
                        .images
                        .get_mut(&image)
                        .ok_or_else(|| unknown_handle("cmd_pipeline_barrier"))?;
                    let old_layout = info.initial.take().unwrap_or(info.layout(barrier.before));
                    image_barriers.push(
                        vk::ImageMemoryBarrier::builder()
                            .src_access_mask(before.access)
                            .dst_access_mask(after.access)
                            .old_layout(old_layout)
                            .new_layout(info.layout(barrier.after))
                            .src_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
                            .dst_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
                            .image(image)
                            .subresource_range(conv::color_subresource_range())
                            .build(),
                    );
                }
            }
        }
        if buffer_barriers.is_empty() && image_barriers.is_empty() {
            return Ok(());
        }
        unsafe {
            self.raw.cmd_pipeline_barrier(
                cb,
                src_stage,
                dst_stage,
                vk::DependencyFlags::empty(),
                &[],
                &buffer_barriers,
                &image_barriers,
            )
        };
        Ok(())
    }

    /// Move an image out of its creation layout before its first copy and
    /// return the layout to copy in.
    fn prepare_copy(
        &self,
        objects: &mut Objects,
        cb: vk::CommandBuffer,
        image: vk::Image,
        state: ResourceState,
    ) -> NativeResult<vk::ImageLayout> {
        let info = objects
            .images
            .get_mut(&image)
            .ok_or_else(|| unknown_handle("cmd_copy_image"))?;
        let layout = info.layout(state);
        if let Some(initial) = info.initial.take() {
            let barrier = vk::ImageMemoryBarrier::builder()
                .src_access_mask(vk::AccessFlags::HOST_WRITE)
                .dst_access_mask(vk::AccessFlags::TRANSFER_READ | vk::AccessFlags::TRANSFER_WRITE)
                .old_layout(initial)
                .new_layout(layout)
                .src_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
                .dst_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
                .image(image)
                .subresource_range(conv::color_subresource_range())
                .build();
            unsafe {
                self.raw.cmd_pipeline_barrier(
                    cb,
                    vk::PipelineStageFlags::HOST,
                    vk::PipelineStageFlags::TRANSFER,
                    vk::DependencyFlags::empty(),
                    &[],
                    &[],
                    &[barrier],
                )
            };
        }
        Ok(layout)
    }

    fn make_host_readable(&self, cb: vk::CommandBuffer, buffer: vk::Buffer) {
        let barrier = vk::BufferMemoryBarrier::builder()
            .src_access_mask(vk::AccessFlags::TRANSFER_WRITE)
            .dst_access_mask(vk::AccessFlags::HOST_READ)
            .src_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
            .dst_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
            .buffer(buffer)
            .offset(0)
            .size(vk::WHOLE_SIZE)
            .build();
        unsafe {
            self.raw.cmd_pipeline_barrier(
                cb,
                vk::PipelineStageFlags::TRANSFER,
                vk::PipelineStageFlags::HOST,
                vk::DependencyFlags::empty(),
                &[],
                &[barrier],
                &[],
            )
        };
    }

    fn encode_draw(&self, cb: vk::CommandBuffer, draw: &DrawCommand) {
        let raw = &self.raw;
        unsafe {
            raw.cmd_bind_pipeline(
                cb,
                vk::PipelineBindPoint::GRAPHICS,
                vk::Pipeline::from_raw(draw.pipeline.0),
            );
            if let Some(set) = draw.binding_set {
                raw.cmd_bind_descriptor_sets(
                    cb,
                    vk::PipelineBindPoint::GRAPHICS,
                    vk::PipelineLayout::from_raw(draw.signature.0),
                    0,
                    &[vk::DescriptorSet::from_raw(set.0)],
                    &[],
                );
            }
            raw.cmd_bind_vertex_buffers(
                cb,
                0,
                &[vk::Buffer::from_raw(draw.vertex_buffer.buffer.0)],
                &[draw.vertex_buffer.offset],
            );
            match draw.index_buffer {
                Some(index) => {
                    raw.cmd_bind_index_buffer(
                        cb,
                        vk::Buffer::from_raw(index.buffer.0),
                        index.offset,
                        conv::map_index_format(index.format),
                    );
                    raw.cmd_draw_indexed(cb, index.count, 1, 0, 0, 0);
                }
                None => raw.cmd_draw(cb, draw.vertex_count, 1, 0, 0),
            }
        }
    }
}
