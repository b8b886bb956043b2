use std::{cell::RefCell, rc::Rc};

use ash::prelude::VkResult;
use tracing::trace;

use crate::{
    headless::HeadlessDevice,
    swapchain::{SwapchainBackend, SwapchainImages},
    vk,
};

struct Inner {
    device: HeadlessDevice,
    /// Image count used by the next recreation.
    image_count: u32,
    images: SwapchainImages,
    next_image: u32,
    recreations: usize,
    presented: Vec<u32>,
    recreate_failure: Option<vk::Result>,
    acquire_failure: Option<vk::Result>,
    present_failure: Option<vk::Result>,
    suboptimal: bool,
}

impl Drop for Inner {
    fn drop(&mut self) {
        for framebuffer in self.images.framebuffers.drain(..) {
            self.device.destroy_framebuffer(framebuffer);
        }
    }
}

/// A swapchain of headless framebuffers, acquired round-robin.
///
/// Clones share the same swapchain, so a test can keep one to inject failures and inspect presents after
/// handing another to the presenter.
#[derive(Clone)]
pub struct HeadlessSwapchain {
    inner: Rc<RefCell<Inner>>,
}

impl HeadlessSwapchain {
    pub fn new(device: &HeadlessDevice, image_count: u32) -> HeadlessSwapchain {
        HeadlessSwapchain {
            inner: Rc::new(RefCell::new(Inner {
                device: device.clone(),
                image_count,
                images: SwapchainImages::default(),
                next_image: 0,
                recreations: 0,
                presented: vec![],
                recreate_failure: None,
                acquire_failure: None,
                present_failure: None,
                suboptimal: false,
            })),
        }
    }

    /// Changes the number of images created by the next recreation.
    pub fn set_image_count(&self, image_count: u32) {
        self.inner.borrow_mut().image_count = image_count;
    }

    /// Makes the next recreation fail with `result`. The current images are kept.
    pub fn fail_next_recreate(&self, result: vk::Result) {
        self.inner.borrow_mut().recreate_failure = Some(result);
    }

    /// Makes the next acquisition fail with `result`. The signal semaphore is left unsignaled.
    pub fn fail_next_acquire(&self, result: vk::Result) {
        self.inner.borrow_mut().acquire_failure = Some(result);
    }

    /// Makes the next present fail with `result`. The wait semaphores are still consumed.
    pub fn fail_next_present(&self, result: vk::Result) {
        self.inner.borrow_mut().present_failure = Some(result);
    }

    /// Reports every acquisition and present as suboptimal until cleared.
    pub fn set_suboptimal(&self, suboptimal: bool) {
        self.inner.borrow_mut().suboptimal = suboptimal;
    }

    pub fn framebuffers(&self) -> Vec<vk::Framebuffer> {
        self.inner.borrow().images.framebuffers.clone()
    }

    pub fn extent(&self) -> vk::Extent2D {
        self.inner.borrow().images.extent
    }

    pub fn recreations(&self) -> usize {
        self.inner.borrow().recreations
    }

    /// Image indices presented successfully, in order.
    pub fn presented(&self) -> Vec<u32> {
        self.inner.borrow().presented.clone()
    }
}

impl SwapchainBackend for HeadlessSwapchain {
    fn recreate(&mut self, extent: vk::Extent2D) -> VkResult<SwapchainImages> {
        let mut inner = self.inner.borrow_mut();
        if let Some(result) = inner.recreate_failure.take() {
            return Err(result);
        }
        let old = std::mem::take(&mut inner.images.framebuffers);
        for framebuffer in old {
            inner.device.destroy_framebuffer(framebuffer);
        }
        let framebuffers = (0..inner.image_count)
            .map(|_| inner.device.create_framebuffer())
            .collect();
        inner.images = SwapchainImages { extent, framebuffers };
        inner.next_image = 0;
        inner.recreations += 1;
        trace!(image_count = inner.image_count, "headless swapchain recreated");
        Ok(inner.images.clone())
    }

    fn acquire_next_image(&mut self, signal: vk::Semaphore, _timeout_ns: u64) -> VkResult<(u32, bool)> {
        let mut inner = self.inner.borrow_mut();
        if let Some(result) = inner.acquire_failure.take() {
            return Err(result);
        }
        let count = inner.images.framebuffers.len() as u32;
        if count == 0 {
            return Err(vk::Result::ERROR_OUT_OF_DATE_KHR);
        }
        let image_index = inner.next_image;
        inner.next_image = (image_index + 1) % count;
        inner.device.signal_semaphore(signal);
        Ok((image_index, inner.suboptimal))
    }

    fn present(&mut self, image_index: u32, waits: &[vk::Semaphore]) -> VkResult<bool> {
        let mut inner = self.inner.borrow_mut();
        for &semaphore in waits {
            inner.device.wait_semaphore(semaphore);
        }
        if let Some(result) = inner.present_failure.take() {
            return Err(result);
        }
        inner.presented.push(image_index);
        Ok(inner.suboptimal)
    }
}
