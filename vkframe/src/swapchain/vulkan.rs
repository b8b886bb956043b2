//! `SwapchainBackend` implementation over `VK_KHR_swapchain`.
use std::ptr;

use ash::{extensions::khr, prelude::VkResult};
use tracing::debug;

use crate::{
    swapchain::{SwapchainBackend, SwapchainImages},
    vk,
};

/// Produces the attachments that follow the color attachment in each framebuffer (e.g. a depth view),
/// for the given extent. Called on every swapchain recreation.
pub type ExtraAttachmentsFn = Box<dyn FnMut(vk::Extent2D) -> VkResult<Vec<vk::ImageView>>>;

/// Chooses a present mode among a list of supported modes.
fn get_preferred_present_mode(available_present_modes: &[vk::PresentModeKHR], vsync: bool) -> vk::PresentModeKHR {
    if vsync {
        vk::PresentModeKHR::FIFO
    } else if available_present_modes.contains(&vk::PresentModeKHR::MAILBOX) {
        vk::PresentModeKHR::MAILBOX
    } else if available_present_modes.contains(&vk::PresentModeKHR::IMMEDIATE) {
        vk::PresentModeKHR::IMMEDIATE
    } else {
        vk::PresentModeKHR::FIFO
    }
}

/// Computes the preferred swap extent.
fn get_preferred_swap_extent(size: vk::Extent2D, capabilities: &vk::SurfaceCapabilitiesKHR) -> vk::Extent2D {
    if capabilities.current_extent.width != u32::MAX {
        capabilities.current_extent
    } else {
        vk::Extent2D {
            width: size
                .width
                .clamp(capabilities.min_image_extent.width, capabilities.max_image_extent.width),
            height: size
                .height
                .clamp(capabilities.min_image_extent.height, capabilities.max_image_extent.height),
        }
    }
}

/// One image more than the minimum, so that acquiring doesn't wait on the presentation engine.
fn get_preferred_image_count(capabilities: &vk::SurfaceCapabilitiesKHR) -> u32 {
    let count = capabilities.min_image_count + 1;
    // a maximum of 0 means no limit
    if capabilities.max_image_count > 0 {
        count.min(capabilities.max_image_count)
    } else {
        count
    }
}

/// A swapchain on a window surface, with one image view and one framebuffer per image.
pub struct VulkanSwapchain {
    device: ash::Device,
    surface_loader: khr::Surface,
    loader: khr::Swapchain,
    physical_device: vk::PhysicalDevice,
    surface: vk::SurfaceKHR,
    present_queue: vk::Queue,
    render_pass: vk::RenderPass,
    format: vk::SurfaceFormatKHR,
    vsync: bool,
    extra_attachments: Option<ExtraAttachmentsFn>,

    handle: vk::SwapchainKHR,
    image_views: Vec<vk::ImageView>,
    framebuffers: Vec<vk::Framebuffer>,
}

impl VulkanSwapchain {
    /// Creates the presenter side of a window surface. The swapchain itself is created on the first call
    /// to `recreate`.
    ///
    /// # Safety
    ///
    /// All handles must be valid and outlive the returned object. `render_pass` must be compatible with
    /// framebuffers made of a `format` color attachment followed by the extra attachments.
    #[allow(clippy::too_many_arguments)]
    pub unsafe fn new(
        instance: &ash::Instance,
        device: &ash::Device,
        surface_loader: khr::Surface,
        physical_device: vk::PhysicalDevice,
        surface: vk::SurfaceKHR,
        present_queue: vk::Queue,
        render_pass: vk::RenderPass,
        format: vk::SurfaceFormatKHR,
        vsync: bool,
    ) -> VulkanSwapchain {
        VulkanSwapchain {
            device: device.clone(),
            loader: khr::Swapchain::new(instance, device),
            surface_loader,
            physical_device,
            surface,
            present_queue,
            render_pass,
            format,
            vsync,
            extra_attachments: None,
            handle: vk::SwapchainKHR::null(),
            image_views: vec![],
            framebuffers: vec![],
        }
    }

    /// Adds attachments after the swapchain color attachment in every framebuffer.
    pub fn with_extra_attachments(mut self, f: impl FnMut(vk::Extent2D) -> VkResult<Vec<vk::ImageView>> + 'static) -> Self {
        self.extra_attachments = Some(Box::new(f));
        self
    }

    pub fn handle(&self) -> vk::SwapchainKHR {
        self.handle
    }

    unsafe fn destroy_framebuffers(&mut self) {
        for framebuffer in self.framebuffers.drain(..) {
            self.device.destroy_framebuffer(framebuffer, None);
        }
        for view in self.image_views.drain(..) {
            self.device.destroy_image_view(view, None);
        }
    }
}

impl SwapchainBackend for VulkanSwapchain {
    fn recreate(&mut self, size: vk::Extent2D) -> VkResult<SwapchainImages> {
        unsafe {
            let capabilities = self
                .surface_loader
                .get_physical_device_surface_capabilities(self.physical_device, self.surface)?;
            let present_modes = self
                .surface_loader
                .get_physical_device_surface_present_modes(self.physical_device, self.surface)?;

            let present_mode = get_preferred_present_mode(&present_modes, self.vsync);
            let image_extent = get_preferred_swap_extent(size, &capabilities);

            let create_info = vk::SwapchainCreateInfoKHR {
                surface: self.surface,
                min_image_count: get_preferred_image_count(&capabilities),
                image_format: self.format.format,
                image_color_space: self.format.color_space,
                image_extent,
                image_array_layers: 1,
                image_usage: vk::ImageUsageFlags::COLOR_ATTACHMENT | vk::ImageUsageFlags::TRANSFER_DST,
                image_sharing_mode: vk::SharingMode::EXCLUSIVE,
                pre_transform: capabilities.current_transform,
                composite_alpha: vk::CompositeAlphaFlagsKHR::OPAQUE,
                present_mode,
                clipped: vk::TRUE,
                old_swapchain: self.handle,
                ..Default::default()
            };

            let new_handle = self.loader.create_swapchain(&create_info, None)?;
            self.destroy_framebuffers();
            if self.handle != vk::SwapchainKHR::null() {
                self.loader.destroy_swapchain(self.handle, None);
            }
            self.handle = new_handle;

            let extra = match self.extra_attachments.as_mut() {
                Some(f) => f(image_extent)?,
                None => vec![],
            };

            let images = self.loader.get_swapchain_images(self.handle)?;
            for image in images {
                let view_create_info = vk::ImageViewCreateInfo {
                    image,
                    view_type: vk::ImageViewType::TYPE_2D,
                    format: self.format.format,
                    components: vk::ComponentMapping::default(),
                    subresource_range: vk::ImageSubresourceRange {
                        aspect_mask: vk::ImageAspectFlags::COLOR,
                        base_mip_level: 0,
                        level_count: 1,
                        base_array_layer: 0,
                        layer_count: 1,
                    },
                    ..Default::default()
                };
                let view = self.device.create_image_view(&view_create_info, None)?;
                self.image_views.push(view);

                let mut attachments = vec![view];
                attachments.extend_from_slice(&extra);
                let framebuffer_create_info = vk::FramebufferCreateInfo {
                    render_pass: self.render_pass,
                    attachment_count: attachments.len() as u32,
                    p_attachments: attachments.as_ptr(),
                    width: image_extent.width,
                    height: image_extent.height,
                    layers: 1,
                    ..Default::default()
                };
                let framebuffer = self.device.create_framebuffer(&framebuffer_create_info, None)?;
                self.framebuffers.push(framebuffer);
            }

            debug!(?present_mode, image_count = self.framebuffers.len(), "created vulkan swapchain");
            Ok(SwapchainImages {
                extent: image_extent,
                framebuffers: self.framebuffers.clone(),
            })
        }
    }

    fn acquire_next_image(&mut self, signal: vk::Semaphore, timeout_ns: u64) -> VkResult<(u32, bool)> {
        unsafe {
            self.loader
                .acquire_next_image(self.handle, timeout_ns, signal, vk::Fence::null())
        }
    }

    fn present(&mut self, image_index: u32, waits: &[vk::Semaphore]) -> VkResult<bool> {
        let present_info = vk::PresentInfoKHR {
            wait_semaphore_count: waits.len() as u32,
            p_wait_semaphores: waits.as_ptr(),
            swapchain_count: 1,
            p_swapchains: &self.handle,
            p_image_indices: &image_index,
            p_results: ptr::null_mut(),
            ..Default::default()
        };
        unsafe { self.loader.queue_present(self.present_queue, &present_info) }
    }
}

impl Drop for VulkanSwapchain {
    fn drop(&mut self) {
        unsafe {
            self.destroy_framebuffers();
            if self.handle != vk::SwapchainKHR::null() {
                self.loader.destroy_swapchain(self.handle, None);
            }
        }
    }
}
