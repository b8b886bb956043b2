//! The interface between the frame loop and the code that renders a scene.
use bitflags::bitflags;

use crate::{
    command::{DrawContext, PrePassContext},
    update::UpdateQueue,
    vk, Result, SceneError,
};

bitflags! {
    /// Command buffers that must be re-recorded before the next submission.
    #[derive(Copy, Clone, Debug, Default, Eq, PartialEq, Hash)]
    pub struct Dirty: u8 {
        /// The scene wants its draw commands recorded again. Implies `PRIMARY`.
        const DRAW = 1 << 0;
        /// The primary buffers must be re-recorded (new draw buffers or framebuffers).
        const PRIMARY = 1 << 1;
    }
}

/// Scene callbacks driven by [`FrameLoop`](crate::frame::FrameLoop).
pub trait Scene {
    /// Records the draw commands for one swapchain image into a secondary command buffer.
    ///
    /// Called once per image whenever the draw buffers are rebuilt.
    fn record_draw(&mut self, ctx: &DrawContext) -> Result<(), SceneError>;

    /// Records commands into a primary command buffer before the render pass begins.
    fn record_pre_pass(&mut self, ctx: &PrePassContext) -> Result<(), SceneError> {
        let _ = ctx;
        Ok(())
    }

    /// Called once per frame before anything is submitted, with the time since the last frame in seconds.
    fn on_update(&mut self, delta: f32, control: &mut FrameControl) {
        let _ = (delta, control);
    }

    /// Called after the swapchain has been recreated for a new extent. Draw buffers are rebuilt right after.
    fn on_resize(&mut self, extent: vk::Extent2D) {
        let _ = extent;
    }

    /// A command buffer to submit after the draw, e.g. a UI overlay. It is owned by the scene and must be
    /// recorded for the given image.
    fn overlay(&mut self, image_index: u32) -> Option<vk::CommandBuffer> {
        let _ = image_index;
        None
    }
}

/// Lets the scene invalidate command buffers and queue buffer updates during `Scene::on_update`.
pub struct FrameControl<'a> {
    pub(crate) dirty: &'a mut Dirty,
    pub(crate) updates: &'a mut UpdateQueue,
    pub(crate) paused: &'a mut bool,
}

impl<'a> FrameControl<'a> {
    /// Requests a new recording of the draw command buffers (and of the primaries wrapping them).
    pub fn invalidate_draw_buffers(&mut self) {
        *self.dirty |= Dirty::DRAW | Dirty::PRIMARY;
    }

    pub fn invalidate_primary_buffers(&mut self) {
        *self.dirty |= Dirty::PRIMARY;
    }

    /// Queues a buffer update for this frame. See [`UpdateQueue::push`].
    pub fn enqueue_update(&mut self, buffer: vk::Buffer, data: &[u8], offset: vk::DeviceSize) -> Result<()> {
        self.updates.push(buffer, data, offset)
    }

    pub fn dirty(&self) -> Dirty {
        *self.dirty
    }

    /// Number of updates queued for this frame.
    pub fn pending_updates(&self) -> usize {
        self.updates.len()
    }

    pub fn is_paused(&self) -> bool {
        *self.paused
    }

    /// Pauses or resumes the frame timer.
    pub fn set_paused(&mut self, paused: bool) {
        *self.paused = paused;
    }
}
