use ash::prelude::VkResult;

use crate::vk;

/// Describes a semaphore wait operation of a queue submission.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct SemaphoreWait {
    /// The semaphore to wait on.
    pub semaphore: vk::Semaphore,
    /// Destination stage
    pub dst_stage: vk::PipelineStageFlags,
}

/// One batch of `vkQueueSubmit`.
#[derive(Copy, Clone, Debug, Default)]
pub struct SubmitBatch<'a> {
    pub waits: &'a [SemaphoreWait],
    pub command_buffers: &'a [vk::CommandBuffer],
    pub signals: &'a [vk::Semaphore],
}

/// Render pass state inherited by a secondary command buffer.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct Inheritance {
    pub render_pass: vk::RenderPass,
    pub subpass: u32,
    pub framebuffer: vk::Framebuffer,
}

/// Arguments of `vkCmdBeginRenderPass`.
#[derive(Copy, Clone)]
pub struct RenderPassBegin<'a> {
    pub render_pass: vk::RenderPass,
    pub framebuffer: vk::Framebuffer,
    pub render_area: vk::Rect2D,
    pub clear_values: &'a [vk::ClearValue],
}

/// Capability primitives of a logical device with a single queue and a command pool.
///
/// All methods take `&self`: implementations are driven from a single thread and use interior
/// mutability where they need it.
pub trait DeviceBackend {
    /// The underlying vulkan device, if there is one.
    fn raw(&self) -> Option<&ash::Device> {
        None
    }

    fn create_fence(&self, signaled: bool) -> VkResult<vk::Fence>;
    fn destroy_fence(&self, fence: vk::Fence);
    /// Returns `true` if the fence is signaled.
    fn get_fence_status(&self, fence: vk::Fence) -> VkResult<bool>;
    fn wait_for_fence(&self, fence: vk::Fence, timeout_ns: u64) -> VkResult<()>;

    fn create_semaphore(&self) -> VkResult<vk::Semaphore>;
    fn destroy_semaphore(&self, semaphore: vk::Semaphore);

    /// Allocates command buffers from the pool of the device.
    fn allocate_command_buffers(&self, level: vk::CommandBufferLevel, count: u32)
        -> VkResult<Vec<vk::CommandBuffer>>;
    /// Returns command buffers to the pool.
    fn free_command_buffers(&self, command_buffers: &[vk::CommandBuffer]);
    fn reset_command_buffer(&self, command_buffer: vk::CommandBuffer) -> VkResult<()>;
    fn begin_command_buffer(
        &self,
        command_buffer: vk::CommandBuffer,
        flags: vk::CommandBufferUsageFlags,
        inheritance: Option<&Inheritance>,
    ) -> VkResult<()>;
    fn end_command_buffer(&self, command_buffer: vk::CommandBuffer) -> VkResult<()>;

    fn cmd_begin_render_pass(
        &self,
        command_buffer: vk::CommandBuffer,
        begin: &RenderPassBegin,
        contents: vk::SubpassContents,
    );
    fn cmd_end_render_pass(&self, command_buffer: vk::CommandBuffer);
    fn cmd_execute_commands(&self, command_buffer: vk::CommandBuffer, secondaries: &[vk::CommandBuffer]);
    /// Embedded buffer update (`vkCmdUpdateBuffer`). `data.len()` and `offset` must be multiples of 4.
    fn cmd_update_buffer(
        &self,
        command_buffer: vk::CommandBuffer,
        buffer: vk::Buffer,
        offset: vk::DeviceSize,
        data: &[u8],
    );

    fn queue_submit(&self, batch: &SubmitBatch, fence: vk::Fence) -> VkResult<()>;
    fn queue_wait_idle(&self) -> VkResult<()>;
    fn device_wait_idle(&self) -> VkResult<()>;
}
