//! `DeviceBackend` implementation over an `ash::Device`.
use std::ptr;

use ash::prelude::VkResult;
use tracing::{debug, warn};

use crate::{
    device::{DeviceBackend, Inheritance, RenderPassBegin, SubmitBatch},
    vk,
};

/// A logical device, its first queue in the chosen family, and a command pool.
///
/// The backend owns the device: it is destroyed when the backend is dropped.
pub struct VulkanBackend {
    device: ash::Device,
    queue: vk::Queue,
    queue_family_index: u32,
    command_pool: vk::CommandPool,
}

impl VulkanBackend {
    /// Takes ownership of `device` and creates a command pool for the queue family.
    ///
    /// # Safety
    ///
    /// `device` must be a valid logical device created with at least one queue in
    /// `queue_family_index`, and must not be destroyed by the caller.
    pub unsafe fn new(device: ash::Device, queue_family_index: u32) -> VkResult<VulkanBackend> {
        let queue = device.get_device_queue(queue_family_index, 0);
        let create_info = vk::CommandPoolCreateInfo {
            flags: vk::CommandPoolCreateFlags::RESET_COMMAND_BUFFER,
            queue_family_index,
            ..Default::default()
        };
        let command_pool = device.create_command_pool(&create_info, None)?;
        debug!(queue_family_index, "created vulkan device backend");
        Ok(VulkanBackend {
            device,
            queue,
            queue_family_index,
            command_pool,
        })
    }

    pub fn queue(&self) -> vk::Queue {
        self.queue
    }

    pub fn queue_family_index(&self) -> u32 {
        self.queue_family_index
    }
}

impl DeviceBackend for VulkanBackend {
    fn raw(&self) -> Option<&ash::Device> {
        Some(&self.device)
    }

    fn create_fence(&self, signaled: bool) -> VkResult<vk::Fence> {
        let create_info = vk::FenceCreateInfo {
            flags: if signaled {
                vk::FenceCreateFlags::SIGNALED
            } else {
                vk::FenceCreateFlags::empty()
            },
            ..Default::default()
        };
        unsafe { self.device.create_fence(&create_info, None) }
    }

    fn destroy_fence(&self, fence: vk::Fence) {
        unsafe { self.device.destroy_fence(fence, None) }
    }

    fn get_fence_status(&self, fence: vk::Fence) -> VkResult<bool> {
        unsafe { self.device.get_fence_status(fence) }
    }

    fn wait_for_fence(&self, fence: vk::Fence, timeout_ns: u64) -> VkResult<()> {
        unsafe { self.device.wait_for_fences(&[fence], true, timeout_ns) }
    }

    fn create_semaphore(&self) -> VkResult<vk::Semaphore> {
        let create_info = vk::SemaphoreCreateInfo::default();
        unsafe { self.device.create_semaphore(&create_info, None) }
    }

    fn destroy_semaphore(&self, semaphore: vk::Semaphore) {
        unsafe { self.device.destroy_semaphore(semaphore, None) }
    }

    fn allocate_command_buffers(
        &self,
        level: vk::CommandBufferLevel,
        count: u32,
    ) -> VkResult<Vec<vk::CommandBuffer>> {
        let allocate_info = vk::CommandBufferAllocateInfo {
            command_pool: self.command_pool,
            level,
            command_buffer_count: count,
            ..Default::default()
        };
        unsafe { self.device.allocate_command_buffers(&allocate_info) }
    }

    fn free_command_buffers(&self, command_buffers: &[vk::CommandBuffer]) {
        if command_buffers.is_empty() {
            return;
        }
        unsafe { self.device.free_command_buffers(self.command_pool, command_buffers) }
    }

    fn reset_command_buffer(&self, command_buffer: vk::CommandBuffer) -> VkResult<()> {
        unsafe {
            self.device
                .reset_command_buffer(command_buffer, vk::CommandBufferResetFlags::RELEASE_RESOURCES)
        }
    }

    fn begin_command_buffer(
        &self,
        command_buffer: vk::CommandBuffer,
        flags: vk::CommandBufferUsageFlags,
        inheritance: Option<&Inheritance>,
    ) -> VkResult<()> {
        let inheritance_info = inheritance.map(|i| vk::CommandBufferInheritanceInfo {
            render_pass: i.render_pass,
            subpass: i.subpass,
            framebuffer: i.framebuffer,
            ..Default::default()
        });
        let begin_info = vk::CommandBufferBeginInfo {
            flags,
            p_inheritance_info: inheritance_info
                .as_ref()
                .map(|i| i as *const _)
                .unwrap_or(ptr::null()),
            ..Default::default()
        };
        unsafe { self.device.begin_command_buffer(command_buffer, &begin_info) }
    }

    fn end_command_buffer(&self, command_buffer: vk::CommandBuffer) -> VkResult<()> {
        unsafe { self.device.end_command_buffer(command_buffer) }
    }

    fn cmd_begin_render_pass(
        &self,
        command_buffer: vk::CommandBuffer,
        begin: &RenderPassBegin,
        contents: vk::SubpassContents,
    ) {
        let begin_info = vk::RenderPassBeginInfo {
            render_pass: begin.render_pass,
            framebuffer: begin.framebuffer,
            render_area: begin.render_area,
            clear_value_count: begin.clear_values.len() as u32,
            p_clear_values: begin.clear_values.as_ptr(),
            ..Default::default()
        };
        unsafe { self.device.cmd_begin_render_pass(command_buffer, &begin_info, contents) }
    }

    fn cmd_end_render_pass(&self, command_buffer: vk::CommandBuffer) {
        unsafe { self.device.cmd_end_render_pass(command_buffer) }
    }

    fn cmd_execute_commands(&self, command_buffer: vk::CommandBuffer, secondaries: &[vk::CommandBuffer]) {
        unsafe { self.device.cmd_execute_commands(command_buffer, secondaries) }
    }

    fn cmd_update_buffer(
        &self,
        command_buffer: vk::CommandBuffer,
        buffer: vk::Buffer,
        offset: vk::DeviceSize,
        data: &[u8],
    ) {
        unsafe { self.device.cmd_update_buffer(command_buffer, buffer, offset, data) }
    }

    fn queue_submit(&self, batch: &SubmitBatch, fence: vk::Fence) -> VkResult<()> {
        let wait_semaphores: Vec<_> = batch.waits.iter().map(|w| w.semaphore).collect();
        let wait_stages: Vec<_> = batch.waits.iter().map(|w| w.dst_stage).collect();
        let submit_info = vk::SubmitInfo {
            wait_semaphore_count: wait_semaphores.len() as u32,
            p_wait_semaphores: wait_semaphores.as_ptr(),
            p_wait_dst_stage_mask: wait_stages.as_ptr(),
            command_buffer_count: batch.command_buffers.len() as u32,
            p_command_buffers: batch.command_buffers.as_ptr(),
            signal_semaphore_count: batch.signals.len() as u32,
            p_signal_semaphores: batch.signals.as_ptr(),
            ..Default::default()
        };
        unsafe { self.device.queue_submit(self.queue, &[submit_info], fence) }
    }

    fn queue_wait_idle(&self) -> VkResult<()> {
        unsafe { self.device.queue_wait_idle(self.queue) }
    }

    fn device_wait_idle(&self) -> VkResult<()> {
        unsafe { self.device.device_wait_idle() }
    }
}

impl Drop for VulkanBackend {
    fn drop(&mut self) {
        unsafe {
            // destroying the pool frees the command buffers still allocated from it
            if let Err(err) = self.device.device_wait_idle() {
                warn!("device wait failed while destroying the vulkan backend: {err}");
            }
            self.device.destroy_command_pool(self.command_pool, None);
            self.device.destroy_device(None);
        }
        debug!("destroyed vulkan device backend");
    }
}
