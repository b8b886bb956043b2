use std::mem;

use tracing::{debug, trace_span};

use crate::{
    command::{full_rect, DrawCommandBuffers, PrePassContext, RenderPassDesc},
    device::{Device, RenderPassBegin},
    vk, Error, Result, SceneError,
};

/// One primary command buffer per swapchain image. Each begins the frame render pass on its image's
/// framebuffer and executes the matching draw command buffer.
pub struct PrimaryCommandBuffers {
    device: Device,
    command_buffers: Vec<vk::CommandBuffer>,
}

impl PrimaryCommandBuffers {
    pub fn new(device: &Device) -> PrimaryCommandBuffers {
        PrimaryCommandBuffers {
            device: device.clone(),
            command_buffers: vec![],
        }
    }

    pub fn get(&self, image_index: u32) -> Option<vk::CommandBuffer> {
        self.command_buffers.get(image_index as usize).copied()
    }

    pub fn len(&self) -> usize {
        self.command_buffers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.command_buffers.is_empty()
    }

    /// Re-records every primary buffer.
    ///
    /// Waits for the queue to be idle first, so that no primary buffer is pending when it is reset.
    /// Buffers are allocated on the first call and reused afterwards, as long as the image count
    /// doesn't change.
    pub fn rebuild(
        &mut self,
        pass: &RenderPassDesc,
        framebuffers: &[vk::Framebuffer],
        extent: vk::Extent2D,
        draw: &DrawCommandBuffers,
        mut pre_pass: impl FnMut(&PrePassContext) -> Result<(), SceneError>,
    ) -> Result<()> {
        let _span = trace_span!("rebuild_primary_command_buffers").entered();
        let count = framebuffers.len();
        if count == 0 || draw.len() != count {
            return Err(Error::MissingDrawBuffers);
        }

        self.device.wait_queue_idle()?;
        self.device.recycle()?;

        if self.command_buffers.len() != count {
            self.release();
            self.command_buffers = self
                .device
                .allocate_command_buffers(vk::CommandBufferLevel::PRIMARY, count as u32)?;
        }

        for (i, &framebuffer) in framebuffers.iter().enumerate() {
            let image_index = i as u32;
            let command_buffer = self.command_buffers[i];
            let secondary = draw.command_buffers()[i];
            let recorded = self.record_one(pass, command_buffer, framebuffer, secondary, image_index, extent, &mut pre_pass);
            if let Err(err) = recorded {
                // buffers are left half-recorded: let the next rebuild start from fresh ones
                self.release();
                return Err(err);
            }
        }

        debug!(count, "rebuilt primary command buffers");
        Ok(())
    }

    #[allow(clippy::too_many_arguments)]
    fn record_one(
        &self,
        pass: &RenderPassDesc,
        command_buffer: vk::CommandBuffer,
        framebuffer: vk::Framebuffer,
        secondary: vk::CommandBuffer,
        image_index: u32,
        extent: vk::Extent2D,
        pre_pass: &mut impl FnMut(&PrePassContext) -> Result<(), SceneError>,
    ) -> Result<()> {
        let device = &self.device;
        device.reset_command_buffer(command_buffer)?;
        device.begin_command_buffer(command_buffer, vk::CommandBufferUsageFlags::SIMULTANEOUS_USE, None)?;

        let ctx = PrePassContext {
            device,
            command_buffer,
            image_index,
            framebuffer,
            extent,
        };
        pre_pass(&ctx).map_err(|source| Error::Recording { image_index, source })?;

        let backend = device.backend();
        backend.cmd_begin_render_pass(
            command_buffer,
            &RenderPassBegin {
                render_pass: pass.render_pass,
                framebuffer,
                render_area: full_rect(extent),
                clear_values: &pass.clear_values,
            },
            vk::SubpassContents::SECONDARY_COMMAND_BUFFERS,
        );
        backend.cmd_execute_commands(command_buffer, &[secondary]);
        backend.cmd_end_render_pass(command_buffer);
        device.end_command_buffer(command_buffer)
    }

    /// Trashes the current buffers.
    pub fn release(&mut self) {
        let command_buffers = mem::take(&mut self.command_buffers);
        self.device.trash_command_buffers(command_buffers);
    }
}

impl Drop for PrimaryCommandBuffers {
    fn drop(&mut self) {
        self.release();
    }
}
