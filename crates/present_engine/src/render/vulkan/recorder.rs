//! Default command recording
//!
//! [`ClearPassRecorder`] records one render pass per swapchain image that
//! clears color and depth. When pipeline bindings carry a real pipeline it
//! also draws every instance in the scene, one indexed draw per mesh slice,
//! with the model-view-projection matrix pushed as a vertex push constant.

use ash::vk;
use log::{debug, trace};

use crate::foundation::math::Mat4;
use crate::render::error::{VulkanError, VulkanResult};
use crate::render::lifecycle::{BoundResources, CommandRecorder, PipelineBindings, PipelineBuilder, PipelineContext, RecordTarget};
use crate::scene::Scene;

use super::device::VulkanDevice;

/// One indexed draw resolved from the scene
#[derive(Debug, Clone, PartialEq)]
pub struct DrawCommand {
    /// Interleaved vertex buffer
    pub vertex_buffer: vk::Buffer,
    /// 32-bit index buffer
    pub index_buffer: vk::Buffer,
    /// First index of the slice
    pub first_index: u32,
    /// Index count of the slice
    pub index_count: u32,
    /// Projection * view * model
    pub mvp: Mat4,
}

/// Resolve the scene into indexed draws for an image of `extent`
///
/// Instances whose mesh has no uploaded buffers are skipped. A dangling
/// instance reference is an error.
pub fn draw_commands(scene: &Scene, resources: &BoundResources, extent: vk::Extent2D) -> VulkanResult<Vec<DrawCommand>> {
    let view_projection = scene.main_camera().map_or_else(Mat4::identity, |camera| {
        let mut camera = camera.clone();
        camera.set_viewport(extent.width, extent.height);
        camera.projection_matrix() * camera.view_matrix()
    });

    let items = scene
        .draw_list()
        .map_err(|e| VulkanError::InvalidOperation { reason: e.to_string() })?;

    let mut commands = Vec::new();
    for item in items {
        let Some(buffers) = resources.mesh(item.mesh) else {
            continue;
        };
        let mvp = view_projection * item.model;
        if buffers.slices.is_empty() {
            commands.push(DrawCommand {
                vertex_buffer: buffers.vertices.buffer,
                index_buffer: buffers.indices.buffer,
                first_index: 0,
                index_count: buffers.index_count,
                mvp,
            });
            continue;
        }
        for slice in &buffers.slices {
            let index_count = u32::try_from(slice.index_count()).map_err(|_| VulkanError::InvalidOperation {
                reason: format!("slice of {} triangles exceeds the index range", slice.triangle_count),
            })?;
            commands.push(DrawCommand {
                vertex_buffer: buffers.vertices.buffer,
                index_buffer: buffers.indices.buffer,
                first_index: slice.index_offset,
                index_count,
                mvp,
            });
        }
    }
    Ok(commands)
}

/// Clears the attachments and draws the scene when a pipeline is bound
#[derive(Debug, Default)]
pub struct ClearPassRecorder;

impl CommandRecorder<VulkanDevice> for ClearPassRecorder {
    fn record(
        &mut self,
        device: &VulkanDevice,
        target: &RecordTarget<'_>,
        scene: &Scene,
        resources: &BoundResources,
    ) -> VulkanResult<()> {
        let raw = device.raw();
        let command_buffer = target.command_buffer;
        let draws = match target.pipeline {
            Some(bindings) if bindings.pipeline != vk::Pipeline::null() => {
                Some((bindings, draw_commands(scene, resources, target.extent)?))
            }
            _ => None,
        };
        let render_area = vk::Rect2D {
            offset: vk::Offset2D { x: 0, y: 0 },
            extent: target.extent,
        };
        let clear_values = [
            vk::ClearValue {
                color: vk::ClearColorValue {
                    float32: target.clear_color,
                },
            },
            vk::ClearValue {
                depth_stencil: vk::ClearDepthStencilValue { depth: 1.0, stencil: 0 },
            },
        ];

        let begin_info = vk::CommandBufferBeginInfo::builder();
        let render_pass_begin = vk::RenderPassBeginInfo::builder()
            .render_pass(target.render_pass)
            .framebuffer(target.framebuffer)
            .render_area(render_area)
            .clear_values(&clear_values);

        unsafe {
            raw.reset_command_buffer(command_buffer, vk::CommandBufferResetFlags::empty())?;
            raw.begin_command_buffer(command_buffer, &begin_info)?;
            raw.cmd_begin_render_pass(command_buffer, &render_pass_begin, vk::SubpassContents::INLINE);

            if let Some((bindings, draws)) = draws {
                let viewport = vk::Viewport {
                    x: 0.0,
                    y: 0.0,
                    width: target.extent.width as f32,
                    height: target.extent.height as f32,
                    min_depth: 0.0,
                    max_depth: 1.0,
                };
                raw.cmd_set_viewport(command_buffer, 0, &[viewport]);
                raw.cmd_set_scissor(command_buffer, 0, &[render_area]);
                raw.cmd_bind_pipeline(command_buffer, vk::PipelineBindPoint::GRAPHICS, bindings.pipeline);
                if !bindings.descriptor_sets.is_empty() {
                    raw.cmd_bind_descriptor_sets(
                        command_buffer,
                        vk::PipelineBindPoint::GRAPHICS,
                        bindings.layout,
                        0,
                        &bindings.descriptor_sets,
                        &[],
                    );
                }

                for draw in draws {
                    raw.cmd_push_constants(
                        command_buffer,
                        bindings.layout,
                        vk::ShaderStageFlags::VERTEX,
                        0,
                        bytemuck::cast_slice(draw.mvp.as_slice()),
                    );
                    raw.cmd_bind_vertex_buffers(command_buffer, 0, &[draw.vertex_buffer], &[0]);
                    raw.cmd_bind_index_buffer(command_buffer, draw.index_buffer, 0, vk::IndexType::UINT32);
                    raw.cmd_draw_indexed(command_buffer, draw.index_count, 1, draw.first_index, 0, 0);
                }
            }

            raw.cmd_end_render_pass(command_buffer);
            raw.end_command_buffer(command_buffer)?;
        }
        trace!("Recorded command buffer for image {}", target.image_index);
        Ok(())
    }
}

/// Pipeline builder for clear-only rendering
#[derive(Debug, Default)]
pub struct NullPipelineBuilder;

impl PipelineBuilder<VulkanDevice> for NullPipelineBuilder {
    fn build(
        &mut self,
        _device: &VulkanDevice,
        context: &PipelineContext,
        _scene: &Scene,
        resources: &BoundResources,
    ) -> VulkanResult<PipelineBindings> {
        debug!(
            "No pipeline for {:?}/{:?}; rendering clears only, {} texture(s) unused",
            context.color_format,
            context.depth_format,
            resources.texture_count()
        );
        Ok(PipelineBindings::default())
    }

    fn destroy(&mut self, _device: &VulkanDevice, _bindings: &PipelineBindings) {}
}
