//! The frame loop: acquire, submit, optional transfer flush, present.
use tracing::{debug, trace, trace_span, warn};

use crate::{
    command::{DrawCommandBuffers, PrimaryCommandBuffers, RenderPassDesc},
    config::Settings,
    device::{Device, SemaphoreId, SemaphoreWait, SubmitBatch},
    scene::{Dirty, FrameControl, Scene},
    swapchain::{Acquired, Presenter, SwapchainBackend},
    update::UpdateQueue,
    vk, Error, Result,
};

/// Progress of the current frame.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum FrameState {
    Idle,
    /// An image has been acquired; its acquire-complete semaphore will be signaled.
    AcquireRequested,
    /// The primary command buffer of the current image has been submitted.
    Submitted,
    /// Pending buffer updates have been submitted after the draw.
    TransferFlushed,
    Presented,
}

/// Outcome of [`FrameLoop::request_frame`].
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum FrameStatus {
    Presented,
    /// The frame was presented but the swapchain no longer matches the surface exactly.
    Suboptimal,
    /// Nothing was rendered because the loop isn't prepared.
    Skipped,
}

#[derive(Copy, Clone, Debug, Default, PartialEq)]
pub struct FrameStats {
    /// Number of frames presented.
    pub frames: u64,
    pub draw_rebuilds: u64,
    pub primary_rebuilds: u64,
    /// Number of transfer batches submitted for pending updates.
    pub transfers: u64,
    pub recreations: u64,
    /// Frames counted during the last full second.
    pub last_fps: u32,
    /// Animation timer in `[0, 1)`, advanced by `timer_speed * delta` while not paused.
    pub timer: f32,
    fps_timer: f32,
    frame_counter: u32,
}

impl FrameStats {
    fn advance(&mut self, delta: f32, timer_speed: f32, paused: bool) {
        if !paused {
            self.timer = (self.timer + timer_speed * delta).rem_euclid(1.0);
        }
        self.frame_counter += 1;
        self.fps_timer += delta;
        if self.fps_timer > 1.0 {
            self.last_fps = self.frame_counter;
            self.fps_timer = 0.0;
            self.frame_counter = 0;
        }
    }
}

struct FrameSemaphores {
    acquire_complete: SemaphoreId,
    render_complete: SemaphoreId,
    overlay_complete: SemaphoreId,
    /// Signaled by the last transfer flush, waited on by the next draw submission.
    transfer_complete: Option<SemaphoreId>,
}

/// Drives the frames of a scene on a swapchain.
pub struct FrameLoop<S: Scene> {
    scene: S,
    settings: Settings,
    pass: RenderPassDesc,
    draw: DrawCommandBuffers,
    primary: PrimaryCommandBuffers,
    updates: UpdateQueue,
    semaphores: FrameSemaphores,
    state: FrameState,
    dirty: Dirty,
    stats: FrameStats,
    prepared: bool,
    /// Set when a rebuild failed; nothing is submitted anymore.
    poisoned: bool,
    paused: bool,
    overlay_submitted: bool,
    pending_resize: Option<vk::Extent2D>,
    presenter: Presenter,
    device: Device,
}

impl<S: Scene> FrameLoop<S> {
    /// Creates the swapchain and the frame semaphores, and applies the fence timeout of `settings` to
    /// the device session.
    ///
    /// `render_pass` must have a color attachment compatible with the swapchain framebuffers. Command
    /// buffers are recorded by [`FrameLoop::prepare`].
    pub fn new(
        device: &Device,
        swapchain: impl SwapchainBackend + 'static,
        render_pass: vk::RenderPass,
        settings: Settings,
        scene: S,
    ) -> Result<FrameLoop<S>> {
        device.set_fence_timeout(settings.fence_timeout_ns());
        let presenter = Presenter::new(device, swapchain, settings.extent(), settings.acquire_timeout_ns())?;
        let semaphores = FrameSemaphores {
            acquire_complete: device.create_semaphore()?,
            render_complete: device.create_semaphore()?,
            overlay_complete: device.create_semaphore()?,
            transfer_complete: None,
        };
        debug!(image_count = presenter.image_count(), overlay = settings.overlay, "created frame loop");
        Ok(FrameLoop {
            scene,
            pass: RenderPassDesc::new(render_pass, settings.clear_values()),
            settings,
            draw: DrawCommandBuffers::new(device),
            primary: PrimaryCommandBuffers::new(device),
            updates: UpdateQueue::new(),
            semaphores,
            state: FrameState::Idle,
            dirty: Dirty::all(),
            stats: FrameStats::default(),
            prepared: false,
            poisoned: false,
            paused: false,
            overlay_submitted: false,
            pending_resize: None,
            presenter,
            device: device.clone(),
        })
    }

    pub fn device(&self) -> &Device {
        &self.device
    }

    pub fn scene(&self) -> &S {
        &self.scene
    }

    pub fn scene_mut(&mut self) -> &mut S {
        &mut self.scene
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    pub fn presenter(&self) -> &Presenter {
        &self.presenter
    }

    pub fn draw_command_buffers(&self) -> &DrawCommandBuffers {
        &self.draw
    }

    pub fn primary_command_buffers(&self) -> &PrimaryCommandBuffers {
        &self.primary
    }

    pub fn stats(&self) -> &FrameStats {
        &self.stats
    }

    pub fn state(&self) -> FrameState {
        self.state
    }

    pub fn dirty(&self) -> Dirty {
        self.dirty
    }

    pub fn is_prepared(&self) -> bool {
        self.prepared
    }

    /// Whether a command buffer rebuild failed. A poisoned loop refuses to submit.
    pub fn is_poisoned(&self) -> bool {
        self.poisoned
    }

    pub fn pending_updates(&self) -> &UpdateQueue {
        &self.updates
    }

    /// Whether the frame timer is paused.
    pub fn is_paused(&self) -> bool {
        self.paused
    }

    pub fn set_paused(&mut self, paused: bool) {
        self.paused = paused;
    }

    ////////////////////////////////////////////////////////////////////////////////////////////////
    // SCENE REQUESTS

    pub fn invalidate_draw_buffers(&mut self) {
        self.dirty |= Dirty::DRAW | Dirty::PRIMARY;
    }

    pub fn invalidate_primary_buffers(&mut self) {
        self.dirty |= Dirty::PRIMARY;
    }

    /// Queues a buffer update, applied after the next draw submission. See [`UpdateQueue::push`].
    pub fn enqueue_update(&mut self, buffer: vk::Buffer, data: &[u8], offset: vk::DeviceSize) -> Result<()> {
        self.updates.push(buffer, data, offset)
    }

    /// Schedules a swapchain recreation for the new surface extent, performed at the start of the next
    /// call to [`FrameLoop::request_frame`].
    pub fn on_resize(&mut self, extent: vk::Extent2D) {
        debug!(width = extent.width, height = extent.height, "resize requested");
        self.pending_resize = Some(extent);
    }

    ////////////////////////////////////////////////////////////////////////////////////////////////
    // FRAMES

    /// Records all command buffers. Frames are skipped until this has succeeded.
    pub fn prepare(&mut self) -> Result<()> {
        if self.poisoned {
            return Err(Error::RebuildAbandoned);
        }
        self.dirty = Dirty::all();
        self.rebuild_dirty()?;
        self.prepared = true;
        debug!("frame loop prepared");
        Ok(())
    }

    /// Renders and presents one frame. `delta` is the time since the previous frame, in seconds.
    ///
    /// An out-of-date swapchain is returned as `Error::SwapchainOutOfDate`; it is recreated on the next
    /// call. Pending updates are kept until a draw submission succeeds.
    pub fn request_frame(&mut self, delta: f32) -> Result<FrameStatus> {
        if !self.prepared {
            return Ok(FrameStatus::Skipped);
        }
        if self.poisoned {
            return Err(Error::RebuildAbandoned);
        }
        let _span = trace_span!("frame", index = self.stats.frames).entered();

        self.stats.advance(delta, self.settings.timer_speed, self.paused);
        let mut control = FrameControl {
            dirty: &mut self.dirty,
            updates: &mut self.updates,
            paused: &mut self.paused,
        };
        self.scene.on_update(delta, &mut control);

        if let Some(extent) = self.pending_resize {
            self.recreate_swapchain(extent)?;
            self.pending_resize = None;
        } else if self.presenter.is_out_of_date() {
            self.recreate_swapchain(self.presenter.extent())?;
        }
        self.rebuild_dirty()?;

        let acquired = self.acquire_next()?;
        self.submit_draw(None)?;
        self.submit_overlay()?;
        let suboptimal = self.present()? || acquired.suboptimal;
        Ok(if suboptimal {
            FrameStatus::Suboptimal
        } else {
            FrameStatus::Presented
        })
    }

    /// Acquires the next swapchain image. The acquire-complete semaphore is signaled once it is ready.
    pub fn acquire_next(&mut self) -> Result<Acquired> {
        if !self.prepared {
            return Err(Error::NotPrepared);
        }
        debug_assert!(
            matches!(self.state, FrameState::Idle | FrameState::Presented),
            "acquire_next called during a frame ({:?})",
            self.state
        );
        let signal = self.device.semaphore(self.semaphores.acquire_complete);
        match self.presenter.acquire_next(signal) {
            Ok(acquired) => {
                trace!(image_index = acquired.image_index, "acquired swapchain image");
                self.state = FrameState::AcquireRequested;
                Ok(acquired)
            }
            Err(err) => {
                self.state = FrameState::Idle;
                Err(err)
            }
        }
    }

    /// Submits the primary command buffer of the current image, then the pending updates.
    ///
    /// The submission waits on the acquire-complete semaphore, or on `wait_override` if specified, and on
    /// the transfer of the previous frame if there was one.
    ///
    /// A frame whose draw submission failed is abandoned: the loop goes back to `FrameState::Idle`.
    pub fn submit_draw(&mut self, wait_override: Option<SemaphoreId>) -> Result<()> {
        let result = self.submit_draw_inner(wait_override);
        if result.is_err() && self.state == FrameState::AcquireRequested {
            self.state = FrameState::Idle;
        }
        result
    }

    fn submit_draw_inner(&mut self, wait_override: Option<SemaphoreId>) -> Result<()> {
        if !self.prepared {
            return Err(Error::NotPrepared);
        }
        if self.poisoned {
            return Err(Error::RebuildAbandoned);
        }
        if !self.dirty.is_empty() {
            return Err(Error::StaleCommandBuffers);
        }
        debug_assert_eq!(self.state, FrameState::AcquireRequested, "submit_draw called before acquire_next");

        let image_index = self.presenter.current_image();
        let _span = trace_span!("submit_draw", image_index).entered();
        let primary = self.primary.get(image_index).ok_or(Error::StaleCommandBuffers)?;
        let device = &self.device;

        let fence = self.presenter.submit_fence()?;

        let mut waits = vec![SemaphoreWait {
            semaphore: device.semaphore(wait_override.unwrap_or(self.semaphores.acquire_complete)),
            dst_stage: vk::PipelineStageFlags::BOTTOM_OF_PIPE,
        }];
        if let Some(transfer_complete) = self.semaphores.transfer_complete.take() {
            waits.push(SemaphoreWait {
                semaphore: device.semaphore(transfer_complete),
                dst_stage: vk::PipelineStageFlags::TRANSFER,
            });
            device.trash(transfer_complete);
        }

        // everything trashed so far is released once this submission completes
        device.empty_dumpster(fence);

        let transfer_pending = if self.updates.is_empty() {
            None
        } else {
            Some(device.create_semaphore()?)
        };
        let mut signals = vec![device.semaphore(self.semaphores.render_complete)];
        if let Some(transfer_pending) = transfer_pending {
            signals.push(device.semaphore(transfer_pending));
        }

        device.submit(
            &SubmitBatch {
                waits: &waits,
                command_buffers: &[primary],
                signals: &signals,
            },
            Some(fence),
        )?;
        self.state = FrameState::Submitted;
        self.overlay_submitted = false;

        if let Some(transfer_pending) = transfer_pending {
            self.semaphores.transfer_complete = self.updates.flush(device, transfer_pending)?;
            self.stats.transfers += 1;
            self.state = FrameState::TransferFlushed;
        }

        device.recycle()?;
        Ok(())
    }

    /// Submits the scene's overlay command buffer for the current image, if overlays are enabled and the
    /// scene returns one. Returns whether an overlay was submitted.
    pub fn submit_overlay(&mut self) -> Result<bool> {
        if !self.settings.overlay {
            return Ok(false);
        }
        let Some(command_buffer) = self.scene.overlay(self.presenter.current_image()) else {
            return Ok(false);
        };
        let waits = [SemaphoreWait {
            semaphore: self.device.semaphore(self.semaphores.render_complete),
            dst_stage: vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT,
        }];
        let signals = [self.device.semaphore(self.semaphores.overlay_complete)];
        self.device.submit(
            &SubmitBatch {
                waits: &waits,
                command_buffers: &[command_buffer],
                signals: &signals,
            },
            None,
        )?;
        self.overlay_submitted = true;
        Ok(true)
    }

    /// Presents the current image once rendering (and the overlay, if submitted) has completed.
    ///
    /// Returns whether the swapchain is suboptimal.
    pub fn present(&mut self) -> Result<bool> {
        if !self.prepared {
            return Err(Error::NotPrepared);
        }
        let wait = if self.overlay_submitted {
            self.semaphores.overlay_complete
        } else {
            self.semaphores.render_complete
        };
        self.overlay_submitted = false;
        let result = self.presenter.present(&[self.device.semaphore(wait)]);
        match result {
            Ok(suboptimal) => {
                self.state = FrameState::Presented;
                self.stats.frames += 1;
                Ok(suboptimal)
            }
            Err(err) => {
                self.state = FrameState::Idle;
                Err(err)
            }
        }
    }

    /// Waits for the device to be idle and releases all deferred objects.
    pub fn wait_idle(&self) -> Result<()> {
        self.device.wait_idle()
    }

    ////////////////////////////////////////////////////////////////////////////////////////////////

    fn rebuild_dirty(&mut self) -> Result<()> {
        let result = self.rebuild_dirty_inner();
        if result.is_err() {
            self.poisoned = true;
        }
        result
    }

    fn rebuild_dirty_inner(&mut self) -> Result<()> {
        if self.dirty.contains(Dirty::DRAW) {
            let scene = &mut self.scene;
            self.draw.rebuild(
                &self.pass,
                self.presenter.framebuffers(),
                self.presenter.extent(),
                |ctx| scene.record_draw(ctx),
            )?;
            self.dirty.remove(Dirty::DRAW);
            self.dirty.insert(Dirty::PRIMARY);
            self.stats.draw_rebuilds += 1;
        }
        if self.dirty.contains(Dirty::PRIMARY) {
            let scene = &mut self.scene;
            self.primary.rebuild(
                &self.pass,
                self.presenter.framebuffers(),
                self.presenter.extent(),
                &self.draw,
                |ctx| scene.record_pre_pass(ctx),
            )?;
            self.dirty.remove(Dirty::PRIMARY);
            self.stats.primary_rebuilds += 1;
        }
        Ok(())
    }

    fn recreate_swapchain(&mut self, extent: vk::Extent2D) -> Result<()> {
        let _span = trace_span!("recreate_swapchain").entered();
        // nothing recorded against the old framebuffers is submitted again, even if this fails
        self.dirty = Dirty::all();
        self.state = FrameState::Idle;
        self.device.wait_idle()?;
        // the buffers reference the old framebuffers
        self.draw.release();
        self.primary.release();
        self.device.wait_idle()?;

        self.presenter.recreate(extent)?;
        self.scene.on_resize(self.presenter.extent());
        self.stats.recreations += 1;
        Ok(())
    }
}

impl<S: Scene> Drop for FrameLoop<S> {
    fn drop(&mut self) {
        if let Err(err) = self.device.wait_idle() {
            warn!("device wait failed during frame loop teardown: {err}");
        }
        self.draw.release();
        self.primary.release();
        let semaphores = [
            Some(self.semaphores.acquire_complete),
            Some(self.semaphores.render_complete),
            Some(self.semaphores.overlay_complete),
            self.semaphores.transfer_complete.take(),
        ];
        for semaphore in semaphores.into_iter().flatten() {
            self.device.trash(semaphore);
        }
        if let Err(err) = self.device.wait_idle() {
            warn!("failed to release frame objects during teardown: {err}");
        }
        debug!(frames = self.stats.frames, "frame loop destroyed");
    }
}
