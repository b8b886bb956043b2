//! Swapchain presentation and per-image submit fences.
mod vulkan;

pub use vulkan::{ExtraAttachmentsFn, VulkanSwapchain};

use ash::prelude::VkResult;
use tracing::{debug, warn};

use crate::{
    device::{Device, FenceId},
    vk, Error, Result,
};

/// The presentable images of a swapchain, as framebuffers compatible with the frame render pass.
#[derive(Clone, Debug, Default)]
pub struct SwapchainImages {
    pub extent: vk::Extent2D,
    /// One framebuffer per swapchain image, in image index order.
    pub framebuffers: Vec<vk::Framebuffer>,
}

/// Presentation engine interface provided by the windowing layer.
pub trait SwapchainBackend {
    /// (Re)creates the swapchain for the given surface extent.
    ///
    /// Framebuffers returned by a previous call may be destroyed. The caller guarantees that the device is idle.
    fn recreate(&mut self, extent: vk::Extent2D) -> VkResult<SwapchainImages>;

    /// Acquires the next image, signaling `signal` when it is ready.
    ///
    /// Returns the image index and whether the swapchain is suboptimal.
    fn acquire_next_image(&mut self, signal: vk::Semaphore, timeout_ns: u64) -> VkResult<(u32, bool)>;

    /// Queues the presentation of an image after the `waits` semaphores are signaled.
    ///
    /// Returns whether the swapchain is suboptimal.
    fn present(&mut self, image_index: u32, waits: &[vk::Semaphore]) -> VkResult<bool>;
}

/// Result of a successful image acquisition.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct Acquired {
    pub image_index: u32,
    pub suboptimal: bool,
}

/// Owns the swapchain and, for each of its images, the fence of the last submission rendering to it.
pub struct Presenter {
    // dropped before the device handle
    swapchain: Box<dyn SwapchainBackend>,
    images: SwapchainImages,
    /// Submit fence of each image. A fence stays "in use" until the recycler entry owning it fires.
    submit_fences: Vec<Option<FenceId>>,
    current_image: u32,
    out_of_date: bool,
    acquire_timeout_ns: u64,
    device: Device,
}

impl Presenter {
    pub fn new(
        device: &Device,
        swapchain: impl SwapchainBackend + 'static,
        extent: vk::Extent2D,
        acquire_timeout_ns: u64,
    ) -> Result<Presenter> {
        let mut presenter = Presenter {
            swapchain: Box::new(swapchain),
            images: SwapchainImages::default(),
            submit_fences: vec![],
            current_image: 0,
            out_of_date: false,
            acquire_timeout_ns,
            device: device.clone(),
        };
        presenter.recreate(extent)?;
        Ok(presenter)
    }

    pub fn image_count(&self) -> u32 {
        self.images.framebuffers.len() as u32
    }

    pub fn extent(&self) -> vk::Extent2D {
        self.images.extent
    }

    pub fn framebuffers(&self) -> &[vk::Framebuffer] {
        &self.images.framebuffers
    }

    /// Index of the last acquired image.
    pub fn current_image(&self) -> u32 {
        self.current_image
    }

    /// Whether acquire or present reported that the swapchain must be recreated.
    pub fn is_out_of_date(&self) -> bool {
        self.out_of_date
    }

    /// Recreates the swapchain for a new extent.
    ///
    /// All command buffers referencing the previous framebuffers must have completed.
    ///
    /// On failure the previous images are kept and the presenter stays out of date, so the next
    /// frame tries again.
    pub fn recreate(&mut self, extent: vk::Extent2D) -> Result<()> {
        self.out_of_date = true;
        // submissions on the old images must be reclaimed before their framebuffers go away
        for &fence in self.submit_fences.iter().flatten() {
            if self.device.is_fence_alive(fence) {
                self.device.wait_for_fence(fence)?;
            }
        }
        self.device.recycle()?;

        self.images = self.swapchain.recreate(extent)?;
        self.submit_fences = vec![None; self.images.framebuffers.len()];
        self.current_image = 0;
        self.out_of_date = false;
        debug!(
            width = self.images.extent.width,
            height = self.images.extent.height,
            image_count = self.image_count(),
            "swapchain recreated"
        );
        Ok(())
    }

    /// Acquires the next image. `signal` is signaled once the image can be rendered to.
    pub fn acquire_next(&mut self, signal: vk::Semaphore) -> Result<Acquired> {
        match self.swapchain.acquire_next_image(signal, self.acquire_timeout_ns) {
            Ok((image_index, suboptimal)) => {
                if suboptimal {
                    warn!(image_index, "swapchain suboptimal during acquire");
                }
                self.current_image = image_index;
                Ok(Acquired {
                    image_index,
                    suboptimal,
                })
            }
            Err(vk::Result::ERROR_OUT_OF_DATE_KHR) => {
                warn!("swapchain out of date during acquire");
                self.out_of_date = true;
                Err(Error::SwapchainOutOfDate)
            }
            Err(err) => Err(err.into()),
        }
    }

    /// Returns a fresh fence for a submission rendering to the current image.
    ///
    /// If the previous submission on this image hasn't been reclaimed yet, waits for it and polls the
    /// recycler first.
    pub fn submit_fence(&mut self) -> Result<FenceId> {
        let index = self.current_image as usize;
        if let Some(previous) = self.submit_fences[index] {
            if self.device.is_fence_alive(previous) {
                debug_assert!(
                    self.device.is_gated_on(previous),
                    "submit fence not owned by the recycler"
                );
                self.device.wait_for_fence(previous)?;
                self.device.recycle()?;
            }
        }
        let fence = self.device.create_fence(false)?;
        self.submit_fences[index] = Some(fence);
        Ok(fence)
    }

    /// Presents the current image once the `waits` semaphores are signaled.
    ///
    /// Returns whether the swapchain is suboptimal.
    pub fn present(&mut self, waits: &[vk::Semaphore]) -> Result<bool> {
        match self.swapchain.present(self.current_image, waits) {
            Ok(suboptimal) => {
                if suboptimal {
                    warn!(image_index = self.current_image, "swapchain suboptimal during present");
                }
                Ok(suboptimal)
            }
            Err(vk::Result::ERROR_OUT_OF_DATE_KHR) => {
                warn!("swapchain out of date during present");
                self.out_of_date = true;
                Err(Error::SwapchainOutOfDate)
            }
            Err(err) => Err(err.into()),
        }
    }
}
