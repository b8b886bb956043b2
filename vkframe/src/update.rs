//! Pending buffer updates, applied with embedded transfers (`vkCmdUpdateBuffer`) after the draw submission.
use tracing::{debug, trace_span};

use crate::{
    device::{Device, SemaphoreId, SemaphoreWait, SubmitBatch},
    reclaim::Reclaim,
    vk, Error, Result,
};

/// Largest payload accepted by `vkCmdUpdateBuffer`.
pub const MAX_UPDATE_SIZE: vk::DeviceSize = 65536;

/// A buffer update waiting to be recorded. The source bytes are owned by the update.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct PendingUpdate {
    pub buffer: vk::Buffer,
    pub offset: vk::DeviceSize,
    pub data: Box<[u8]>,
}

impl PendingUpdate {
    pub fn size(&self) -> vk::DeviceSize {
        self.data.len() as vk::DeviceSize
    }
}

/// Buffer updates in arrival order.
#[derive(Debug, Default)]
pub struct UpdateQueue {
    updates: Vec<PendingUpdate>,
}

impl UpdateQueue {
    pub fn new() -> UpdateQueue {
        UpdateQueue::default()
    }

    /// Queues a copy of `data` to be written to `buffer` at `offset`.
    ///
    /// Both `offset` and the size of `data` must be multiples of 4, and the size must be in
    /// `1..=MAX_UPDATE_SIZE`. Nothing is queued on error.
    pub fn push(&mut self, buffer: vk::Buffer, data: &[u8], offset: vk::DeviceSize) -> Result<()> {
        let size = data.len() as vk::DeviceSize;
        if size % 4 != 0 || offset % 4 != 0 {
            return Err(Error::MisalignedUpdate { offset, size });
        }
        if size == 0 || size > MAX_UPDATE_SIZE {
            return Err(Error::InvalidUpdateSize { size });
        }
        self.updates.push(PendingUpdate {
            buffer,
            offset,
            data: data.into(),
        });
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.updates.len()
    }

    pub fn is_empty(&self) -> bool {
        self.updates.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &PendingUpdate> {
        self.updates.iter()
    }

    /// Submits every queued update in a single transfer batch, then clears the queue.
    ///
    /// The batch waits on `transfer_pending`, which must be signaled by an earlier submission. Returns
    /// the semaphore signaled once the transfer completes, or `None` if the queue was empty (in that case
    /// `transfer_pending` is left untouched).
    ///
    /// The transfer command buffer and `transfer_pending` are released by the recycler once the batch
    /// has completed.
    pub fn flush(&mut self, device: &Device, transfer_pending: SemaphoreId) -> Result<Option<SemaphoreId>> {
        if self.updates.is_empty() {
            return Ok(None);
        }
        let _span = trace_span!("flush_pending_updates", count = self.updates.len()).entered();

        let command_buffer = device.allocate_command_buffers(vk::CommandBufferLevel::PRIMARY, 1)?[0];
        if let Err(err) = self.record(device, command_buffer) {
            device.trash(command_buffer);
            return Err(err);
        }

        let transfer_complete = device.create_semaphore()?;
        let fence = device.create_fence(false)?;
        let waits = [SemaphoreWait {
            semaphore: device.semaphore(transfer_pending),
            dst_stage: vk::PipelineStageFlags::ALL_COMMANDS,
        }];
        let signals = [device.semaphore(transfer_complete)];
        device.submit(
            &SubmitBatch {
                waits: &waits,
                command_buffers: &[command_buffer],
                signals: &signals,
            },
            Some(fence),
        )?;
        device.defer(
            fence,
            vec![Reclaim::Semaphore(transfer_pending), Reclaim::from(command_buffer)],
        );

        debug!(count = self.updates.len(), "submitted pending buffer updates");
        self.updates.clear();
        Ok(Some(transfer_complete))
    }

    fn record(&self, device: &Device, command_buffer: vk::CommandBuffer) -> Result<()> {
        device.begin_command_buffer(command_buffer, vk::CommandBufferUsageFlags::ONE_TIME_SUBMIT, None)?;
        for update in self.updates.iter() {
            device
                .backend()
                .cmd_update_buffer(command_buffer, update.buffer, update.offset, &update.data);
        }
        device.end_command_buffer(command_buffer)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::headless::HeadlessDevice;
    use ash::vk::Handle;

    fn buffer(raw: u64) -> vk::Buffer {
        vk::Buffer::from_raw(raw)
    }

    #[test]
    fn rejects_misaligned_updates_without_queueing() {
        let mut queue = UpdateQueue::new();
        assert!(matches!(
            queue.push(buffer(1), &[0; 6], 0),
            Err(Error::MisalignedUpdate { offset: 0, size: 6 })
        ));
        assert!(matches!(
            queue.push(buffer(1), &[0; 8], 2),
            Err(Error::MisalignedUpdate { offset: 2, size: 8 })
        ));
        assert!(queue.is_empty());
    }

    #[test]
    fn rejects_empty_and_oversized_updates() {
        let mut queue = UpdateQueue::new();
        assert!(matches!(
            queue.push(buffer(1), &[], 0),
            Err(Error::InvalidUpdateSize { size: 0 })
        ));
        let big = vec![0u8; MAX_UPDATE_SIZE as usize + 4];
        assert!(matches!(queue.push(buffer(1), &big, 0), Err(Error::InvalidUpdateSize { .. })));
        let max = vec![0u8; MAX_UPDATE_SIZE as usize];
        queue.push(buffer(1), &max, 0).unwrap();
        assert_eq!(queue.len(), 1);
    }

    #[test]
    fn keeps_arrival_order_and_copies_data() {
        let mut queue = UpdateQueue::new();
        let mut data = [1u8, 2, 3, 4];
        queue.push(buffer(7), &data, 16).unwrap();
        data[0] = 9;
        queue.push(buffer(8), &data, 0).unwrap();

        let updates: Vec<_> = queue.iter().collect();
        assert_eq!(updates[0].buffer, buffer(7));
        assert_eq!(updates[0].offset, 16);
        assert_eq!(&*updates[0].data, &[1, 2, 3, 4]);
        assert_eq!(&*updates[1].data, &[9, 2, 3, 4]);
        assert_eq!(updates[1].size(), 4);
    }

    #[test]
    fn flush_applies_updates_in_order() {
        let gpu = HeadlessDevice::new();
        let device = Device::new(gpu.clone());
        let target = gpu.create_buffer(16);

        let mut queue = UpdateQueue::new();
        queue.push(target, &[1; 8], 0).unwrap();
        queue.push(target, &[2; 8], 4).unwrap();

        // stand-in for the draw submission that signals transfer-pending
        let transfer_pending = device.create_semaphore().unwrap();
        device
            .submit(
                &SubmitBatch {
                    signals: &[device.semaphore(transfer_pending)],
                    ..Default::default()
                },
                None,
            )
            .unwrap();

        let transfer_complete = queue.flush(&device, transfer_pending).unwrap();
        assert!(transfer_complete.is_some());
        assert!(queue.is_empty());

        gpu.complete_all();
        assert_eq!(gpu.buffer_contents(target), vec![1, 1, 1, 1, 2, 2, 2, 2, 2, 2, 2, 2, 0, 0, 0, 0]);

        assert_eq!(device.recycle().unwrap(), 1);
        assert!(!device.is_semaphore_alive(transfer_pending));
        assert_eq!(device.stats().command_buffers, 0);
        assert!(gpu.violations().is_empty());
    }

    #[test]
    fn flush_of_empty_queue_submits_nothing() {
        let gpu = HeadlessDevice::new();
        let device = Device::new(gpu.clone());
        let transfer_pending = device.create_semaphore().unwrap();
        let mut queue = UpdateQueue::new();
        assert_eq!(queue.flush(&device, transfer_pending).unwrap(), None);
        assert!(device.is_semaphore_alive(transfer_pending));
        assert_eq!(gpu.submissions().len(), 0);
    }
}
