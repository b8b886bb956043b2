//! Device session: the logical device, its queue and command pool, and the objects created from them.
mod backend;
mod vulkan;

pub use backend::{DeviceBackend, Inheritance, RenderPassBegin, SemaphoreWait, SubmitBatch};
pub use vulkan::VulkanBackend;

use crate::{
    reclaim::{Dumpster, Reclaim, Recycler},
    vk, Result,
};
use fxhash::FxHashSet;
use slotmap::SlotMap;
use std::{
    cell::{Cell, RefCell},
    fmt,
    rc::Rc,
};
use tracing::{debug, trace, warn};

slotmap::new_key_type! {
    /// Identifies a fence created by the device session.
    pub struct FenceId;

    /// Identifies a semaphore created by the device session.
    pub struct SemaphoreId;
}

/// Counts of objects currently owned by the device session.
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq)]
pub struct DeviceStats {
    pub command_buffers: usize,
    pub fences: usize,
    pub semaphores: usize,
    /// Recycler entries whose fence hasn't been observed signaled yet.
    pub recycler_entries: usize,
    /// Objects in the dumpster, not yet assigned to a fence.
    pub dumpster_len: usize,
}

pub(crate) struct DeviceInner {
    backend: Box<dyn DeviceBackend>,
    fence_timeout_ns: Cell<u64>,
    fences: RefCell<SlotMap<FenceId, vk::Fence>>,
    semaphores: RefCell<SlotMap<SemaphoreId, vk::Semaphore>>,
    /// Command buffers allocated from the pool and not yet freed.
    command_buffers: RefCell<FxHashSet<vk::CommandBuffer>>,
    dumpster: RefCell<Dumpster>,
    recycler: RefCell<Recycler>,
}

/// Handle to the device session. Clones refer to the same session.
#[derive(Clone)]
pub struct Device {
    pub(crate) inner: Rc<DeviceInner>,
}

impl fmt::Debug for Device {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("Device").field("stats", &self.stats()).finish()
    }
}

impl Device {
    /// Creates a device session over the given backend. Fence waits never time out.
    pub fn new(backend: impl DeviceBackend + 'static) -> Device {
        Self::with_fence_timeout(backend, u64::MAX)
    }

    /// Creates a device session; fence waits longer than `fence_timeout_ns` fail with `vk::Result::TIMEOUT`.
    pub fn with_fence_timeout(backend: impl DeviceBackend + 'static, fence_timeout_ns: u64) -> Device {
        debug!(fence_timeout_ns, "creating device session");
        Device {
            inner: Rc::new(DeviceInner {
                backend: Box::new(backend),
                fence_timeout_ns: Cell::new(fence_timeout_ns),
                fences: RefCell::new(SlotMap::with_key()),
                semaphores: RefCell::new(SlotMap::with_key()),
                command_buffers: RefCell::new(FxHashSet::default()),
                dumpster: RefCell::new(Dumpster::new()),
                recycler: RefCell::new(Recycler::new()),
            }),
        }
    }

    pub fn backend(&self) -> &dyn DeviceBackend {
        &*self.inner.backend
    }

    /// The underlying vulkan device, if the backend has one.
    pub fn raw(&self) -> Option<&ash::Device> {
        self.inner.backend.raw()
    }

    pub fn fence_timeout_ns(&self) -> u64 {
        self.inner.fence_timeout_ns.get()
    }

    /// Changes the timeout of subsequent fence waits. `u64::MAX` waits forever.
    pub fn set_fence_timeout(&self, fence_timeout_ns: u64) {
        self.inner.fence_timeout_ns.set(fence_timeout_ns);
    }

    pub fn stats(&self) -> DeviceStats {
        DeviceStats {
            command_buffers: self.inner.command_buffers.borrow().len(),
            fences: self.inner.fences.borrow().len(),
            semaphores: self.inner.semaphores.borrow().len(),
            recycler_entries: self.inner.recycler.borrow().len(),
            dumpster_len: self.inner.dumpster.borrow().len(),
        }
    }

    ////////////////////////////////////////////////////////////////////////////////////////////////
    // FENCES & SEMAPHORES

    pub fn create_fence(&self, signaled: bool) -> Result<FenceId> {
        let fence = self.inner.backend.create_fence(signaled)?;
        Ok(self.inner.fences.borrow_mut().insert(fence))
    }

    /// Returns the vulkan handle of the fence, or a null handle if it has been released.
    pub fn fence(&self, id: FenceId) -> vk::Fence {
        self.inner.fences.borrow().get(id).copied().unwrap_or_default()
    }

    pub fn is_fence_alive(&self, id: FenceId) -> bool {
        self.inner.fences.borrow().contains_key(id)
    }

    /// Returns whether the fence is signaled. Released fences count as signaled.
    pub fn is_fence_signaled(&self, id: FenceId) -> Result<bool> {
        match self.inner.fences.borrow().get(id) {
            Some(&fence) => Ok(self.inner.backend.get_fence_status(fence)?),
            None => Ok(true),
        }
    }

    /// Blocks until the fence is signaled. Returns immediately if it has been released.
    pub fn wait_for_fence(&self, id: FenceId) -> Result<()> {
        let fence = self.fence(id);
        if fence != vk::Fence::null() {
            trace!(?id, "waiting for fence");
            self.inner.backend.wait_for_fence(fence, self.inner.fence_timeout_ns.get())?;
        }
        Ok(())
    }

    pub fn create_semaphore(&self) -> Result<SemaphoreId> {
        let semaphore = self.inner.backend.create_semaphore()?;
        Ok(self.inner.semaphores.borrow_mut().insert(semaphore))
    }

    /// Returns the vulkan handle of the semaphore, or a null handle if it has been released.
    pub fn semaphore(&self, id: SemaphoreId) -> vk::Semaphore {
        self.inner.semaphores.borrow().get(id).copied().unwrap_or_default()
    }

    pub fn is_semaphore_alive(&self, id: SemaphoreId) -> bool {
        self.inner.semaphores.borrow().contains_key(id)
    }

    ////////////////////////////////////////////////////////////////////////////////////////////////
    // COMMAND BUFFERS

    pub fn allocate_command_buffers(
        &self,
        level: vk::CommandBufferLevel,
        count: u32,
    ) -> Result<Vec<vk::CommandBuffer>> {
        let command_buffers = self.inner.backend.allocate_command_buffers(level, count)?;
        self.inner
            .command_buffers
            .borrow_mut()
            .extend(command_buffers.iter().copied());
        Ok(command_buffers)
    }

    pub fn reset_command_buffer(&self, command_buffer: vk::CommandBuffer) -> Result<()> {
        Ok(self.inner.backend.reset_command_buffer(command_buffer)?)
    }

    pub fn begin_command_buffer(
        &self,
        command_buffer: vk::CommandBuffer,
        flags: vk::CommandBufferUsageFlags,
        inheritance: Option<&Inheritance>,
    ) -> Result<()> {
        Ok(self
            .inner
            .backend
            .begin_command_buffer(command_buffer, flags, inheritance)?)
    }

    pub fn end_command_buffer(&self, command_buffer: vk::CommandBuffer) -> Result<()> {
        Ok(self.inner.backend.end_command_buffer(command_buffer)?)
    }

    ////////////////////////////////////////////////////////////////////////////////////////////////
    // DEFERRED RECLAMATION

    /// Schedules an object for release after the next submission made with [`Device::empty_dumpster`] completes.
    pub fn trash(&self, object: impl Into<Reclaim>) {
        self.inner.dumpster.borrow_mut().push(object);
    }

    /// Schedules command buffers to be returned to the pool. Does nothing if `command_buffers` is empty.
    pub fn trash_command_buffers(&self, command_buffers: Vec<vk::CommandBuffer>) {
        if !command_buffers.is_empty() {
            self.trash(command_buffers);
        }
    }

    /// Moves the contents of the dumpster into a recycler entry gated on `fence`.
    ///
    /// The entry takes ownership of `fence`, so one is registered even if the dumpster is empty.
    pub fn empty_dumpster(&self, fence: FenceId) {
        let objects = self.inner.dumpster.borrow_mut().take();
        self.defer(fence, objects);
    }

    /// Registers objects to release once `fence` is signaled. The fence is released with them.
    pub fn defer(&self, fence: FenceId, objects: Vec<Reclaim>) {
        trace!(?fence, count = objects.len(), "deferring object release");
        self.inner.recycler.borrow_mut().push(fence, objects);
    }

    /// Whether a recycler entry is gated on `fence`.
    pub fn is_gated_on(&self, fence: FenceId) -> bool {
        self.inner.recycler.borrow().is_gated_on(fence)
    }

    /// Polls the recycler once and releases the objects of every entry whose fence is signaled.
    ///
    /// Returns the number of entries that fired.
    pub fn recycle(&self) -> Result<usize> {
        let fired = self.inner.recycler.borrow_mut().poll(|id| self.is_fence_signaled(id))?;
        let count = fired.len();
        for object in fired.into_iter().flatten() {
            self.release(object);
        }
        if count > 0 {
            trace!(count, "recycled");
        }
        Ok(count)
    }

    fn release(&self, object: Reclaim) {
        match object {
            Reclaim::CommandBuffers(command_buffers) => {
                {
                    let mut live = self.inner.command_buffers.borrow_mut();
                    for cb in command_buffers.iter() {
                        if !live.remove(cb) {
                            warn!(?cb, "releasing a command buffer that is not owned by the device");
                        }
                    }
                }
                self.inner.backend.free_command_buffers(&command_buffers);
            }
            Reclaim::Semaphore(id) => {
                let semaphore = self.inner.semaphores.borrow_mut().remove(id);
                if let Some(semaphore) = semaphore {
                    self.inner.backend.destroy_semaphore(semaphore);
                }
            }
            Reclaim::Fence(id) => {
                let fence = self.inner.fences.borrow_mut().remove(id);
                if let Some(fence) = fence {
                    self.inner.backend.destroy_fence(fence);
                }
            }
        }
    }

    ////////////////////////////////////////////////////////////////////////////////////////////////
    // QUEUE

    /// Submits a batch to the queue. `fence`, if specified, is signaled once the batch completes.
    pub fn submit(&self, batch: &SubmitBatch, fence: Option<FenceId>) -> Result<()> {
        let fence = fence.map(|id| self.fence(id)).unwrap_or_default();
        Ok(self.inner.backend.queue_submit(batch, fence)?)
    }

    pub fn wait_queue_idle(&self) -> Result<()> {
        Ok(self.inner.backend.queue_wait_idle()?)
    }

    /// Waits for the device to be idle, then releases everything pending in the recycler and the dumpster.
    pub fn wait_idle(&self) -> Result<()> {
        self.inner.backend.device_wait_idle()?;
        let fired = self.inner.recycler.borrow_mut().drain();
        let trashed = self.inner.dumpster.borrow_mut().take();
        for object in fired.into_iter().flatten().chain(trashed) {
            self.release(object);
        }
        Ok(())
    }
}

impl Drop for DeviceInner {
    fn drop(&mut self) {
        if let Err(err) = self.backend.device_wait_idle() {
            warn!("device wait failed during teardown: {err}");
        }
        let recycler = self.recycler.get_mut().drain();
        let dumpster = self.dumpster.get_mut().take();
        let command_buffers = self.command_buffers.get_mut();
        for object in recycler.into_iter().flatten().chain(dumpster) {
            if let Reclaim::CommandBuffers(cbs) = object {
                for cb in cbs {
                    command_buffers.remove(&cb);
                    self.backend.free_command_buffers(&[cb]);
                }
            }
            // fences and semaphores are destroyed below
        }
        if !command_buffers.is_empty() {
            debug!(count = command_buffers.len(), "freeing command buffers still owned at teardown");
            let remaining: Vec<_> = command_buffers.drain().collect();
            self.backend.free_command_buffers(&remaining);
        }
        for (_, semaphore) in self.semaphores.get_mut().drain() {
            self.backend.destroy_semaphore(semaphore);
        }
        for (_, fence) in self.fences.get_mut().drain() {
            self.backend.destroy_fence(fence);
        }
        debug!("device session destroyed");
    }
}
