//! Deferred reclamation of GPU objects.
//!
//! Objects that may still be referenced by in-flight work are first pushed into the [`Dumpster`],
//! which only records *what* must be released. When the next submission is made, the dumpster
//! is emptied into a [`Recycler`] entry gated on that submission's fence, which records *when*
//! the objects can be released. Submissions on the queue complete in order, so the fence of a later
//! submission also covers every object trashed before it.
use crate::{
    device::{FenceId, SemaphoreId},
    vk,
};
use std::{collections::VecDeque, mem};

/// An object to release once the device is done with it.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum Reclaim {
    /// Command buffers to return to the pool.
    CommandBuffers(Vec<vk::CommandBuffer>),
    Semaphore(SemaphoreId),
    Fence(FenceId),
}

impl From<vk::CommandBuffer> for Reclaim {
    fn from(command_buffer: vk::CommandBuffer) -> Self {
        Reclaim::CommandBuffers(vec![command_buffer])
    }
}
impl From<Vec<vk::CommandBuffer>> for Reclaim {
    fn from(command_buffers: Vec<vk::CommandBuffer>) -> Self {
        Reclaim::CommandBuffers(command_buffers)
    }
}
impl From<SemaphoreId> for Reclaim {
    fn from(semaphore: SemaphoreId) -> Self {
        Reclaim::Semaphore(semaphore)
    }
}
impl From<FenceId> for Reclaim {
    fn from(fence: FenceId) -> Self {
        Reclaim::Fence(fence)
    }
}

////////////////////////////////////////////////////////////////////////////////////////////////////

/// Objects waiting for a fence to be chosen.
#[derive(Debug, Default)]
pub struct Dumpster {
    objects: Vec<Reclaim>,
}

impl Dumpster {
    pub fn new() -> Dumpster {
        Dumpster::default()
    }

    pub fn push(&mut self, object: impl Into<Reclaim>) {
        self.objects.push(object.into());
    }

    pub fn len(&self) -> usize {
        self.objects.len()
    }

    pub fn is_empty(&self) -> bool {
        self.objects.is_empty()
    }

    /// Removes and returns everything in the dumpster, in push order.
    pub fn take(&mut self) -> Vec<Reclaim> {
        mem::take(&mut self.objects)
    }
}

////////////////////////////////////////////////////////////////////////////////////////////////////

#[derive(Debug)]
struct RecyclerEntry {
    /// The entry fires once this fence is signaled. The fence is owned by the entry.
    fence: FenceId,
    objects: Vec<Reclaim>,
}

/// Fence-gated list of objects to release.
#[derive(Debug, Default)]
pub struct Recycler {
    entries: VecDeque<RecyclerEntry>,
}

impl Recycler {
    pub fn new() -> Recycler {
        Recycler::default()
    }

    /// Registers objects to release once `fence` is signaled.
    ///
    /// The recycler takes ownership of `fence`: it is released right after the objects.
    pub fn push(&mut self, fence: FenceId, objects: Vec<Reclaim>) {
        self.entries.push_back(RecyclerEntry { fence, objects });
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Whether an entry is gated on the specified fence.
    pub fn is_gated_on(&self, fence: FenceId) -> bool {
        self.entries.iter().any(|e| e.fence == fence)
    }

    /// Removes every entry whose fence is signaled.
    ///
    /// Returns, for each fired entry (in registration order), the objects to release followed by the
    /// gating fence. Fence states are all queried before the recycler is modified, so an error leaves
    /// every entry in place.
    pub fn poll<E>(&mut self, mut is_signaled: impl FnMut(FenceId) -> Result<bool, E>) -> Result<Vec<Vec<Reclaim>>, E> {
        let ready = self
            .entries
            .iter()
            .map(|entry| is_signaled(entry.fence))
            .collect::<Result<Vec<_>, E>>()?;

        let mut fired = Vec::new();
        let mut kept = VecDeque::with_capacity(self.entries.len());
        for (entry, ready) in self.entries.drain(..).zip(ready) {
            if ready {
                let mut objects = entry.objects;
                objects.push(Reclaim::Fence(entry.fence));
                fired.push(objects);
            } else {
                kept.push_back(entry);
            }
        }
        self.entries = kept;
        Ok(fired)
    }

    /// Removes all entries regardless of their fence. Only valid once the device is idle.
    pub fn drain(&mut self) -> Vec<Vec<Reclaim>> {
        self.entries
            .drain(..)
            .map(|entry| {
                let mut objects = entry.objects;
                objects.push(Reclaim::Fence(entry.fence));
                objects
            })
            .collect()
    }
}
