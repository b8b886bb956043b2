#![allow(dead_code)]

use tracing_subscriber::EnvFilter;
use vkframe::{
    headless::{HeadlessDevice, HeadlessSwapchain},
    vk, Device, DrawContext, FrameControl, FrameLoop, PrePassContext, Scene, SceneError, Settings,
};

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

pub type UpdateFn = Box<dyn FnMut(f32, &mut FrameControl)>;

/// Scene that records nothing but keeps track of the callbacks it receives.
#[derive(Default)]
pub struct TestScene {
    pub draw_records: usize,
    pub pre_pass_records: usize,
    /// Framebuffer of each recorded draw buffer, in recording order.
    pub draw_framebuffers: Vec<vk::Framebuffer>,
    pub resizes: Vec<vk::Extent2D>,
    /// Makes recording fail for this image index.
    pub fail_draw_at: Option<u32>,
    /// Makes the pre-pass fail for this image index.
    pub fail_pre_pass_at: Option<u32>,
    pub on_update: Option<UpdateFn>,
    /// Overlay command buffer per image.
    pub overlay: Option<Vec<vk::CommandBuffer>>,
}

impl Scene for TestScene {
    fn record_draw(&mut self, ctx: &DrawContext) -> Result<(), SceneError> {
        if self.fail_draw_at == Some(ctx.image_index) {
            return Err(format!("no pipeline for image {}", ctx.image_index).into());
        }
        self.draw_records += 1;
        self.draw_framebuffers.push(ctx.framebuffer);
        Ok(())
    }

    fn record_pre_pass(&mut self, ctx: &PrePassContext) -> Result<(), SceneError> {
        if self.fail_pre_pass_at == Some(ctx.image_index) {
            return Err(format!("shadow pass unavailable for image {}", ctx.image_index).into());
        }
        self.pre_pass_records += 1;
        Ok(())
    }

    fn on_update(&mut self, delta: f32, control: &mut FrameControl) {
        if let Some(f) = self.on_update.as_mut() {
            f(delta, control);
        }
    }

    fn on_resize(&mut self, extent: vk::Extent2D) {
        self.resizes.push(extent);
    }

    fn overlay(&mut self, image_index: u32) -> Option<vk::CommandBuffer> {
        self.overlay.as_ref().map(|cbs| cbs[image_index as usize])
    }
}

pub struct Harness {
    pub gpu: HeadlessDevice,
    pub swapchain: HeadlessSwapchain,
    pub render_pass: vk::RenderPass,
    pub frame: FrameLoop<TestScene>,
}

/// A frame loop over a headless swapchain, not prepared yet.
pub fn unprepared(image_count: u32, scene: TestScene) -> Harness {
    init_tracing();
    let gpu = HeadlessDevice::new();
    let device = Device::new(gpu.clone());
    let swapchain = HeadlessSwapchain::new(&gpu, image_count);
    let render_pass = gpu.create_render_pass();
    let settings = Settings {
        extent: [640, 480],
        ..Default::default()
    };
    let frame = FrameLoop::new(&device, swapchain.clone(), render_pass, settings, scene).unwrap();
    Harness {
        gpu,
        swapchain,
        render_pass,
        frame,
    }
}

pub fn prepared(image_count: u32, scene: TestScene) -> Harness {
    let mut harness = unprepared(image_count, scene);
    harness.frame.prepare().unwrap();
    harness
}

/// Allocates and records one empty primary command buffer per image.
pub fn empty_command_buffers(device: &Device, count: u32) -> Vec<vk::CommandBuffer> {
    let cbs = device
        .allocate_command_buffers(vk::CommandBufferLevel::PRIMARY, count)
        .unwrap();
    for &cb in cbs.iter() {
        device
            .begin_command_buffer(cb, vk::CommandBufferUsageFlags::SIMULTANEOUS_USE, None)
            .unwrap();
        device.end_command_buffer(cb).unwrap();
    }
    cbs
}
