//! Per-image command buffers: secondary "draw" buffers recorded by the scene, and primary buffers that
//! wrap them in the frame render pass.
mod draw;
mod primary;

pub use draw::DrawCommandBuffers;
pub use primary::PrimaryCommandBuffers;

use crate::{device::Device, vk};

/// The render pass every frame is recorded in, with its clear values (one per attachment).
#[derive(Clone)]
pub struct RenderPassDesc {
    pub render_pass: vk::RenderPass,
    pub clear_values: Vec<vk::ClearValue>,
}

impl RenderPassDesc {
    pub fn new(render_pass: vk::RenderPass, clear_values: Vec<vk::ClearValue>) -> RenderPassDesc {
        RenderPassDesc {
            render_pass,
            clear_values,
        }
    }
}

/// Full-extent render area.
fn full_rect(extent: vk::Extent2D) -> vk::Rect2D {
    vk::Rect2D {
        offset: vk::Offset2D { x: 0, y: 0 },
        extent,
    }
}

/// Passed to the scene when recording the draw commands of one swapchain image.
///
/// The command buffer is a secondary buffer that continues subpass 0 of the render pass.
pub struct DrawContext<'a> {
    pub device: &'a Device,
    pub command_buffer: vk::CommandBuffer,
    pub image_index: u32,
    pub framebuffer: vk::Framebuffer,
    pub render_pass: vk::RenderPass,
    pub extent: vk::Extent2D,
}

impl<'a> DrawContext<'a> {
    /// The vulkan device, to record commands that vkframe doesn't wrap. `None` on the headless backend.
    pub fn raw(&self) -> Option<&'a ash::Device> {
        self.device.raw()
    }

    /// A viewport covering the whole framebuffer, with depth in `[0, 1]`.
    pub fn viewport(&self) -> vk::Viewport {
        vk::Viewport {
            x: 0.0,
            y: 0.0,
            width: self.extent.width as f32,
            height: self.extent.height as f32,
            min_depth: 0.0,
            max_depth: 1.0,
        }
    }

    pub fn scissor(&self) -> vk::Rect2D {
        full_rect(self.extent)
    }
}

/// Passed to the scene when recording commands into a primary buffer, before the render pass begins
/// (e.g. compute dispatches or layout transitions).
pub struct PrePassContext<'a> {
    pub device: &'a Device,
    pub command_buffer: vk::CommandBuffer,
    pub image_index: u32,
    pub framebuffer: vk::Framebuffer,
    pub extent: vk::Extent2D,
}

impl<'a> PrePassContext<'a> {
    pub fn raw(&self) -> Option<&'a ash::Device> {
        self.device.raw()
    }
}
