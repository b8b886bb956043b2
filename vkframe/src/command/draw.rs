use std::mem;

use tracing::{debug, trace_span};

use crate::{
    command::{DrawContext, RenderPassDesc},
    device::{Device, Inheritance},
    vk, Error, Result, SceneError,
};

/// One secondary command buffer per swapchain image, holding the scene's draw commands.
pub struct DrawCommandBuffers {
    device: Device,
    command_buffers: Vec<vk::CommandBuffer>,
}

impl DrawCommandBuffers {
    pub fn new(device: &Device) -> DrawCommandBuffers {
        DrawCommandBuffers {
            device: device.clone(),
            command_buffers: vec![],
        }
    }

    /// The draw command buffer of the given swapchain image.
    pub fn get(&self, image_index: u32) -> Option<vk::CommandBuffer> {
        self.command_buffers.get(image_index as usize).copied()
    }

    pub fn command_buffers(&self) -> &[vk::CommandBuffer] {
        &self.command_buffers
    }

    pub fn len(&self) -> usize {
        self.command_buffers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.command_buffers.is_empty()
    }

    /// Records a fresh set of secondary buffers, one per framebuffer, by calling `record` once per buffer.
    ///
    /// The previous buffers are trashed, not freed, since in-flight primaries may still execute them.
    /// If recording fails for any image, every newly allocated buffer is trashed, this object is left
    /// without buffers, and `Error::Recording` is returned.
    pub fn rebuild(
        &mut self,
        pass: &RenderPassDesc,
        framebuffers: &[vk::Framebuffer],
        extent: vk::Extent2D,
        mut record: impl FnMut(&DrawContext) -> Result<(), SceneError>,
    ) -> Result<()> {
        let _span = trace_span!("rebuild_draw_command_buffers").entered();
        self.release();
        if framebuffers.is_empty() {
            return Ok(());
        }

        let command_buffers = self
            .device
            .allocate_command_buffers(vk::CommandBufferLevel::SECONDARY, framebuffers.len() as u32)?;

        for (i, (&command_buffer, &framebuffer)) in command_buffers.iter().zip(framebuffers).enumerate() {
            let image_index = i as u32;
            let recorded = self.record_one(pass, command_buffer, framebuffer, image_index, extent, &mut record);
            if let Err(err) = recorded {
                self.device.trash_command_buffers(command_buffers);
                return Err(err);
            }
        }

        debug!(count = command_buffers.len(), "rebuilt draw command buffers");
        self.command_buffers = command_buffers;
        Ok(())
    }

    fn record_one(
        &self,
        pass: &RenderPassDesc,
        command_buffer: vk::CommandBuffer,
        framebuffer: vk::Framebuffer,
        image_index: u32,
        extent: vk::Extent2D,
        record: &mut impl FnMut(&DrawContext) -> Result<(), SceneError>,
    ) -> Result<()> {
        let inheritance = Inheritance {
            render_pass: pass.render_pass,
            subpass: 0,
            framebuffer,
        };
        self.device.begin_command_buffer(
            command_buffer,
            vk::CommandBufferUsageFlags::RENDER_PASS_CONTINUE | vk::CommandBufferUsageFlags::SIMULTANEOUS_USE,
            Some(&inheritance),
        )?;
        let ctx = DrawContext {
            device: &self.device,
            command_buffer,
            image_index,
            framebuffer,
            render_pass: pass.render_pass,
            extent,
        };
        // on failure the buffer stays in the recording state; it is trashed by the caller
        record(&ctx).map_err(|source| Error::Recording { image_index, source })?;
        self.device.end_command_buffer(command_buffer)
    }

    /// Trashes the current buffers.
    pub fn release(&mut self) {
        let command_buffers = mem::take(&mut self.command_buffers);
        self.device.trash_command_buffers(command_buffers);
    }
}

impl Drop for DrawCommandBuffers {
    fn drop(&mut self) {
        self.release();
    }
}
