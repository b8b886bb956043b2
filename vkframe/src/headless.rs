//! A device simulated on the host.
//!
//! The headless device executes submissions on a single in-order queue, but only when asked to: a
//! submission stays pending until [`HeadlessDevice::complete_next`] is called, a fence it signals is
//! waited on, or the queue is idled. Recorded buffer updates are applied to host memory on completion.
//!
//! Every call is checked against the rules of the API it stands for (waiting on a semaphore that has no
//! pending signal, signaling one that already has, freeing a command buffer that is still pending, rendering into a destroyed framebuffer,
//! etc.). Broken rules don't fail the call: they are recorded and can be inspected with
//! [`HeadlessDevice::violations`].
mod swapchain;

pub use swapchain::HeadlessSwapchain;

use std::{cell::RefCell, collections::VecDeque, rc::Rc};

use ash::{prelude::VkResult, vk::Handle};
use fxhash::{FxHashMap, FxHashSet};
use tracing::{trace, warn};

use crate::{
    device::{DeviceBackend, Inheritance, RenderPassBegin, SemaphoreWait, SubmitBatch},
    vk,
};

/// A broken usage rule.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum Violation {
    /// A submission or present waits on a semaphore that no earlier operation signals.
    WaitWithoutSignal(vk::Semaphore),
    /// A semaphore is signaled again before its pending signal was waited on.
    AlreadySignaled(vk::Semaphore),
    UnknownSemaphore(vk::Semaphore),
    SemaphoreInUse(vk::Semaphore),
    UnknownFence(vk::Fence),
    FenceInUse(vk::Fence),
    /// A fence passed to a submission was already signaled or still pending.
    FenceNotReady(vk::Fence),
    UnknownCommandBuffer(vk::CommandBuffer),
    /// A command buffer was freed, reset or re-recorded while a submission referencing it is pending.
    CommandBufferPending(vk::CommandBuffer),
    /// A command was recorded into a command buffer that isn't being recorded.
    NotRecording(vk::CommandBuffer),
    /// A submitted or executed command buffer isn't in the executable state.
    NotExecutable(vk::CommandBuffer),
    DestroyedFramebuffer(vk::Framebuffer),
    FramebufferInUse(vk::Framebuffer),
    BufferOutOfRange {
        buffer: vk::Buffer,
        offset: vk::DeviceSize,
        size: vk::DeviceSize,
    },
}

/// Recorded command.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum Command {
    BeginRenderPass {
        render_pass: vk::RenderPass,
        framebuffer: vk::Framebuffer,
        contents: vk::SubpassContents,
    },
    EndRenderPass,
    ExecuteCommands(Vec<vk::CommandBuffer>),
    UpdateBuffer {
        buffer: vk::Buffer,
        offset: vk::DeviceSize,
        data: Vec<u8>,
    },
}

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum CommandBufferState {
    Initial,
    Recording,
    Executable,
}

struct CommandBufferInfo {
    level: vk::CommandBufferLevel,
    state: CommandBufferState,
    inherited_framebuffer: Option<vk::Framebuffer>,
    commands: Vec<Command>,
    /// Number of pending submissions referencing this command buffer.
    pending: usize,
}

/// Log entry of a queue submission.
#[derive(Clone, Debug)]
pub struct Submission {
    pub waits: Vec<SemaphoreWait>,
    pub command_buffers: Vec<vk::CommandBuffer>,
    pub signals: Vec<vk::Semaphore>,
    pub fence: vk::Fence,
    /// Framebuffers rendered to, including by executed secondaries.
    pub framebuffers: Vec<vk::Framebuffer>,
    /// Number of buffer updates recorded in the submitted command buffers.
    pub buffer_updates: usize,
}

struct InFlight {
    fence: vk::Fence,
    /// Submitted command buffers and the secondaries they execute.
    command_buffers: Vec<vk::CommandBuffer>,
    semaphores: Vec<vk::Semaphore>,
    framebuffers: Vec<vk::Framebuffer>,
    updates: Vec<(vk::Buffer, vk::DeviceSize, Vec<u8>)>,
}

#[derive(Copy, Clone, Debug, Default, Eq, PartialEq)]
pub struct HeadlessStats {
    pub live_command_buffers: usize,
    pub live_fences: usize,
    pub live_semaphores: usize,
    pub live_framebuffers: usize,
    pub submissions: usize,
    pub pending_submissions: usize,
    pub command_buffers_allocated: usize,
    pub semaphores_created: usize,
    pub semaphores_destroyed: usize,
}

#[derive(Default)]
struct State {
    next_handle: u64,
    fences: FxHashMap<vk::Fence, bool>,
    /// Whether each semaphore has a pending signal.
    semaphores: FxHashMap<vk::Semaphore, bool>,
    command_buffers: FxHashMap<vk::CommandBuffer, CommandBufferInfo>,
    /// Freed command buffer handles, reused most recent first.
    free_command_buffers: Vec<vk::CommandBuffer>,
    framebuffers: FxHashSet<vk::Framebuffer>,
    buffers: FxHashMap<vk::Buffer, Vec<u8>>,
    in_flight: VecDeque<InFlight>,
    submissions: Vec<Submission>,
    violations: Vec<Violation>,
    /// Fence waits time out instead of completing submissions.
    stalled: bool,
    command_buffers_allocated: usize,
    semaphores_created: usize,
    semaphores_destroyed: usize,
}

impl State {
    fn handle(&mut self) -> u64 {
        self.next_handle += 1;
        self.next_handle
    }

    fn violation(&mut self, violation: Violation) {
        warn!(?violation, "headless device usage violation");
        self.violations.push(violation);
    }

    fn complete_next(&mut self) -> bool {
        let Some(done) = self.in_flight.pop_front() else {
            return false;
        };
        for (buffer, offset, data) in done.updates {
            let size = data.len() as vk::DeviceSize;
            let in_range = self
                .buffers
                .get(&buffer)
                .map_or(false, |memory| offset + size <= memory.len() as vk::DeviceSize);
            if !in_range {
                self.violation(Violation::BufferOutOfRange { buffer, offset, size });
                continue;
            }
            if let Some(memory) = self.buffers.get_mut(&buffer) {
                memory[offset as usize..(offset + size) as usize].copy_from_slice(&data);
            }
        }
        for cb in done.command_buffers {
            if let Some(info) = self.command_buffers.get_mut(&cb) {
                info.pending = info.pending.saturating_sub(1);
            }
        }
        if let Some(signaled) = self.fences.get_mut(&done.fence) {
            *signaled = true;
        }
        trace!(fence = ?done.fence, "headless submission completed");
        true
    }

    fn wait_semaphore(&mut self, semaphore: vk::Semaphore) {
        match self.semaphores.get(&semaphore).copied() {
            Some(true) => {
                self.semaphores.insert(semaphore, false);
            }
            Some(false) => self.violation(Violation::WaitWithoutSignal(semaphore)),
            None => self.violation(Violation::UnknownSemaphore(semaphore)),
        }
    }

    fn signal_semaphore(&mut self, semaphore: vk::Semaphore) {
        match self.semaphores.insert(semaphore, true) {
            Some(false) => {}
            Some(true) => self.violation(Violation::AlreadySignaled(semaphore)),
            None => {
                self.semaphores.remove(&semaphore);
                self.violation(Violation::UnknownSemaphore(semaphore));
            }
        }
    }

    fn command_buffer_state(&self, cb: vk::CommandBuffer) -> Option<CommandBufferState> {
        self.command_buffers.get(&cb).map(|info| info.state)
    }

    /// Collects a submitted command buffer, the secondaries it executes, and what they reference.
    fn walk(&self, cb: vk::CommandBuffer, flight: &mut InFlight, not_executable: &mut Vec<vk::CommandBuffer>) {
        flight.command_buffers.push(cb);
        let Some(info) = self.command_buffers.get(&cb) else {
            not_executable.push(cb);
            return;
        };
        if info.state != CommandBufferState::Executable {
            not_executable.push(cb);
        }
        flight.framebuffers.extend(info.inherited_framebuffer);
        for command in info.commands.iter() {
            match command {
                Command::BeginRenderPass { framebuffer, .. } => flight.framebuffers.push(*framebuffer),
                Command::ExecuteCommands(secondaries) => {
                    for &secondary in secondaries.iter() {
                        self.walk(secondary, flight, not_executable);
                    }
                }
                Command::UpdateBuffer { buffer, offset, data } => flight.updates.push((*buffer, *offset, data.clone())),
                Command::EndRenderPass => {}
            }
        }
    }

    fn is_referenced_by_pending(&self, cb: vk::CommandBuffer) -> bool {
        self.command_buffers.get(&cb).map_or(false, |info| info.pending > 0)
    }

    fn record(&mut self, cb: vk::CommandBuffer, command: Command) {
        match self.command_buffer_state(cb) {
            Some(CommandBufferState::Recording) => {
                if let Some(info) = self.command_buffers.get_mut(&cb) {
                    info.commands.push(command);
                }
            }
            Some(_) => self.violation(Violation::NotRecording(cb)),
            None => self.violation(Violation::UnknownCommandBuffer(cb)),
        }
    }

    /// Resets a command buffer to `new_state` with no commands.
    fn restart(&mut self, cb: vk::CommandBuffer, new_state: CommandBufferState, inherited: Option<vk::Framebuffer>) {
        if self.is_referenced_by_pending(cb) {
            self.violation(Violation::CommandBufferPending(cb));
        }
        if let Some(info) = self.command_buffers.get_mut(&cb) {
            info.state = new_state;
            info.inherited_framebuffer = inherited;
            info.commands.clear();
        } else {
            self.violation(Violation::UnknownCommandBuffer(cb));
        }
    }
}

/// Handle to a simulated device. Clones share the same device.
#[derive(Clone, Default)]
pub struct HeadlessDevice {
    state: Rc<RefCell<State>>,
}

impl HeadlessDevice {
    pub fn new() -> HeadlessDevice {
        HeadlessDevice::default()
    }

    /// Completes the oldest pending submission. Returns `false` if there was none.
    pub fn complete_next(&self) -> bool {
        self.state.borrow_mut().complete_next()
    }

    /// Completes every pending submission and returns how many there were.
    pub fn complete_all(&self) -> usize {
        let mut state = self.state.borrow_mut();
        let mut count = 0;
        while state.complete_next() {
            count += 1;
        }
        count
    }

    /// Makes fence waits on pending submissions fail with `vk::Result::TIMEOUT`, as they would on a hung
    /// device. Submissions can still be completed explicitly or by idling the queue.
    pub fn set_stalled(&self, stalled: bool) {
        self.state.borrow_mut().stalled = stalled;
    }

    pub fn violations(&self) -> Vec<Violation> {
        self.state.borrow().violations.clone()
    }

    /// All submissions made so far, in order.
    pub fn submissions(&self) -> Vec<Submission> {
        self.state.borrow().submissions.clone()
    }

    pub fn stats(&self) -> HeadlessStats {
        let state = self.state.borrow();
        HeadlessStats {
            live_command_buffers: state.command_buffers.len(),
            live_fences: state.fences.len(),
            live_semaphores: state.semaphores.len(),
            live_framebuffers: state.framebuffers.len(),
            submissions: state.submissions.len(),
            pending_submissions: state.in_flight.len(),
            command_buffers_allocated: state.command_buffers_allocated,
            semaphores_created: state.semaphores_created,
            semaphores_destroyed: state.semaphores_destroyed,
        }
    }

    /// Creates a zero-filled buffer in host memory.
    pub fn create_buffer(&self, size: usize) -> vk::Buffer {
        let mut state = self.state.borrow_mut();
        let buffer = vk::Buffer::from_raw(state.handle());
        state.buffers.insert(buffer, vec![0; size]);
        buffer
    }

    /// Contents of a buffer, with the updates of completed submissions applied.
    pub fn buffer_contents(&self, buffer: vk::Buffer) -> Vec<u8> {
        self.state.borrow().buffers.get(&buffer).cloned().unwrap_or_default()
    }

    pub fn create_render_pass(&self) -> vk::RenderPass {
        vk::RenderPass::from_raw(self.state.borrow_mut().handle())
    }

    pub fn create_framebuffer(&self) -> vk::Framebuffer {
        let mut state = self.state.borrow_mut();
        let framebuffer = vk::Framebuffer::from_raw(state.handle());
        state.framebuffers.insert(framebuffer);
        framebuffer
    }

    pub fn destroy_framebuffer(&self, framebuffer: vk::Framebuffer) {
        let mut state = self.state.borrow_mut();
        if state.in_flight.iter().any(|f| f.framebuffers.contains(&framebuffer)) {
            state.violation(Violation::FramebufferInUse(framebuffer));
        }
        state.framebuffers.remove(&framebuffer);
    }

    pub fn is_framebuffer_alive(&self, framebuffer: vk::Framebuffer) -> bool {
        self.state.borrow().framebuffers.contains(&framebuffer)
    }

    pub fn is_semaphore_alive(&self, semaphore: vk::Semaphore) -> bool {
        self.state.borrow().semaphores.contains_key(&semaphore)
    }

    pub fn is_command_buffer_alive(&self, command_buffer: vk::CommandBuffer) -> bool {
        self.state.borrow().command_buffers.contains_key(&command_buffer)
    }

    pub fn command_buffer_state(&self, command_buffer: vk::CommandBuffer) -> Option<CommandBufferState> {
        self.state.borrow().command_buffer_state(command_buffer)
    }

    pub fn command_buffer_level(&self, command_buffer: vk::CommandBuffer) -> Option<vk::CommandBufferLevel> {
        self.state.borrow().command_buffers.get(&command_buffer).map(|info| info.level)
    }

    /// Commands recorded in a command buffer since it was last begun.
    pub fn commands(&self, command_buffer: vk::CommandBuffer) -> Vec<Command> {
        self.state
            .borrow()
            .command_buffers
            .get(&command_buffer)
            .map(|info| info.commands.clone())
            .unwrap_or_default()
    }

    fn signal_semaphore(&self, semaphore: vk::Semaphore) {
        self.state.borrow_mut().signal_semaphore(semaphore)
    }

    fn wait_semaphore(&self, semaphore: vk::Semaphore) {
        self.state.borrow_mut().wait_semaphore(semaphore)
    }
}

impl DeviceBackend for HeadlessDevice {
    fn create_fence(&self, signaled: bool) -> VkResult<vk::Fence> {
        let mut state = self.state.borrow_mut();
        let fence = vk::Fence::from_raw(state.handle());
        state.fences.insert(fence, signaled);
        Ok(fence)
    }

    fn destroy_fence(&self, fence: vk::Fence) {
        let mut state = self.state.borrow_mut();
        if state.in_flight.iter().any(|f| f.fence == fence) {
            state.violation(Violation::FenceInUse(fence));
        }
        if state.fences.remove(&fence).is_none() {
            state.violation(Violation::UnknownFence(fence));
        }
    }

    fn get_fence_status(&self, fence: vk::Fence) -> VkResult<bool> {
        let mut state = self.state.borrow_mut();
        match state.fences.get(&fence).copied() {
            Some(signaled) => Ok(signaled),
            None => {
                state.violation(Violation::UnknownFence(fence));
                Err(vk::Result::ERROR_UNKNOWN)
            }
        }
    }

    fn wait_for_fence(&self, fence: vk::Fence, _timeout_ns: u64) -> VkResult<()> {
        let mut state = self.state.borrow_mut();
        match state.fences.get(&fence).copied() {
            Some(true) => return Ok(()),
            Some(false) => {}
            None => {
                state.violation(Violation::UnknownFence(fence));
                return Err(vk::Result::ERROR_UNKNOWN);
            }
        }
        // nothing will ever signal it
        if state.stalled || !state.in_flight.iter().any(|f| f.fence == fence) {
            return Err(vk::Result::TIMEOUT);
        }
        while state.fences.get(&fence) == Some(&false) && state.complete_next() {}
        Ok(())
    }

    fn create_semaphore(&self) -> VkResult<vk::Semaphore> {
        let mut state = self.state.borrow_mut();
        let semaphore = vk::Semaphore::from_raw(state.handle());
        state.semaphores.insert(semaphore, false);
        state.semaphores_created += 1;
        Ok(semaphore)
    }

    fn destroy_semaphore(&self, semaphore: vk::Semaphore) {
        let mut state = self.state.borrow_mut();
        if state.in_flight.iter().any(|f| f.semaphores.contains(&semaphore)) {
            state.violation(Violation::SemaphoreInUse(semaphore));
        }
        if state.semaphores.remove(&semaphore).is_some() {
            state.semaphores_destroyed += 1;
        } else {
            state.violation(Violation::UnknownSemaphore(semaphore));
        }
    }

    fn allocate_command_buffers(
        &self,
        level: vk::CommandBufferLevel,
        count: u32,
    ) -> VkResult<Vec<vk::CommandBuffer>> {
        let mut state = self.state.borrow_mut();
        let mut command_buffers = Vec::with_capacity(count as usize);
        for _ in 0..count {
            let cb = match state.free_command_buffers.pop() {
                Some(cb) => cb,
                None => vk::CommandBuffer::from_raw(state.handle()),
            };
            state.command_buffers.insert(
                cb,
                CommandBufferInfo {
                    level,
                    state: CommandBufferState::Initial,
                    inherited_framebuffer: None,
                    commands: vec![],
                    pending: 0,
                },
            );
            command_buffers.push(cb);
        }
        state.command_buffers_allocated += command_buffers.len();
        Ok(command_buffers)
    }

    fn free_command_buffers(&self, command_buffers: &[vk::CommandBuffer]) {
        let mut state = self.state.borrow_mut();
        for &cb in command_buffers {
            if state.is_referenced_by_pending(cb) {
                state.violation(Violation::CommandBufferPending(cb));
            }
            if state.command_buffers.remove(&cb).is_some() {
                state.free_command_buffers.push(cb);
            } else {
                state.violation(Violation::UnknownCommandBuffer(cb));
            }
        }
    }

    fn reset_command_buffer(&self, command_buffer: vk::CommandBuffer) -> VkResult<()> {
        self.state
            .borrow_mut()
            .restart(command_buffer, CommandBufferState::Initial, None);
        Ok(())
    }

    fn begin_command_buffer(
        &self,
        command_buffer: vk::CommandBuffer,
        _flags: vk::CommandBufferUsageFlags,
        inheritance: Option<&Inheritance>,
    ) -> VkResult<()> {
        let mut state = self.state.borrow_mut();
        let inherited = inheritance.map(|i| i.framebuffer);
        if let Some(framebuffer) = inherited {
            if !state.framebuffers.contains(&framebuffer) {
                state.violation(Violation::DestroyedFramebuffer(framebuffer));
            }
        }
        state.restart(command_buffer, CommandBufferState::Recording, inherited);
        Ok(())
    }

    fn end_command_buffer(&self, command_buffer: vk::CommandBuffer) -> VkResult<()> {
        let mut state = self.state.borrow_mut();
        match state.command_buffer_state(command_buffer) {
            Some(CommandBufferState::Recording) => {
                if let Some(info) = state.command_buffers.get_mut(&command_buffer) {
                    info.state = CommandBufferState::Executable;
                }
            }
            Some(_) => state.violation(Violation::NotRecording(command_buffer)),
            None => state.violation(Violation::UnknownCommandBuffer(command_buffer)),
        }
        Ok(())
    }

    fn cmd_begin_render_pass(
        &self,
        command_buffer: vk::CommandBuffer,
        begin: &RenderPassBegin,
        contents: vk::SubpassContents,
    ) {
        let mut state = self.state.borrow_mut();
        if !state.framebuffers.contains(&begin.framebuffer) {
            state.violation(Violation::DestroyedFramebuffer(begin.framebuffer));
        }
        state.record(
            command_buffer,
            Command::BeginRenderPass {
                render_pass: begin.render_pass,
                framebuffer: begin.framebuffer,
                contents,
            },
        );
    }

    fn cmd_end_render_pass(&self, command_buffer: vk::CommandBuffer) {
        self.state.borrow_mut().record(command_buffer, Command::EndRenderPass);
    }

    fn cmd_execute_commands(&self, command_buffer: vk::CommandBuffer, secondaries: &[vk::CommandBuffer]) {
        self.state
            .borrow_mut()
            .record(command_buffer, Command::ExecuteCommands(secondaries.to_vec()));
    }

    fn cmd_update_buffer(
        &self,
        command_buffer: vk::CommandBuffer,
        buffer: vk::Buffer,
        offset: vk::DeviceSize,
        data: &[u8],
    ) {
        self.state.borrow_mut().record(
            command_buffer,
            Command::UpdateBuffer {
                buffer,
                offset,
                data: data.to_vec(),
            },
        );
    }

    fn queue_submit(&self, batch: &SubmitBatch, fence: vk::Fence) -> VkResult<()> {
        let mut state = self.state.borrow_mut();

        for wait in batch.waits.iter() {
            state.wait_semaphore(wait.semaphore);
        }

        let mut flight = InFlight {
            fence,
            command_buffers: vec![],
            semaphores: vec![],
            framebuffers: vec![],
            updates: vec![],
        };
        let mut not_executable = vec![];
        for &cb in batch.command_buffers.iter() {
            state.walk(cb, &mut flight, &mut not_executable);
        }
        for cb in not_executable {
            state.violation(Violation::NotExecutable(cb));
        }
        for framebuffer in flight.framebuffers.clone() {
            if !state.framebuffers.contains(&framebuffer) {
                state.violation(Violation::DestroyedFramebuffer(framebuffer));
            }
        }
        for cb in flight.command_buffers.iter() {
            if let Some(info) = state.command_buffers.get_mut(cb) {
                info.pending += 1;
            }
        }

        for &semaphore in batch.signals.iter() {
            state.signal_semaphore(semaphore);
        }
        flight.semaphores.extend(batch.waits.iter().map(|w| w.semaphore));
        flight.semaphores.extend_from_slice(batch.signals);

        if fence != vk::Fence::null() {
            let ready = state.fences.get(&fence) == Some(&false) && !state.in_flight.iter().any(|f| f.fence == fence);
            if !ready {
                state.violation(Violation::FenceNotReady(fence));
            }
        }

        state.submissions.push(Submission {
            waits: batch.waits.to_vec(),
            command_buffers: batch.command_buffers.to_vec(),
            signals: batch.signals.to_vec(),
            fence,
            framebuffers: flight.framebuffers.clone(),
            buffer_updates: flight.updates.len(),
        });
        trace!(
            command_buffers = batch.command_buffers.len(),
            waits = batch.waits.len(),
            signals = batch.signals.len(),
            "headless submission"
        );
        state.in_flight.push_back(flight);
        Ok(())
    }

    fn queue_wait_idle(&self) -> VkResult<()> {
        self.complete_all();
        Ok(())
    }

    fn device_wait_idle(&self) -> VkResult<()> {
        self.complete_all();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn waits_consume_pending_signals() {
        let gpu = HeadlessDevice::new();
        let semaphore = gpu.create_semaphore().unwrap();
        let signals = [semaphore];
        let waits = [SemaphoreWait {
            semaphore,
            dst_stage: vk::PipelineStageFlags::ALL_COMMANDS,
        }];
        gpu.queue_submit(
            &SubmitBatch {
                signals: &signals,
                ..Default::default()
            },
            vk::Fence::null(),
        )
        .unwrap();
        gpu.queue_submit(
            &SubmitBatch {
                waits: &waits,
                ..Default::default()
            },
            vk::Fence::null(),
        )
        .unwrap();
        assert!(gpu.violations().is_empty());

        gpu.queue_submit(
            &SubmitBatch {
                waits: &waits,
                ..Default::default()
            },
            vk::Fence::null(),
        )
        .unwrap();
        assert_eq!(gpu.violations(), vec![Violation::WaitWithoutSignal(semaphore)]);
    }

    #[test]
    fn signaling_a_signaled_semaphore_is_reported() {
        let gpu = HeadlessDevice::new();
        let semaphore = gpu.create_semaphore().unwrap();
        let signals = [semaphore];
        let batch = SubmitBatch {
            signals: &signals,
            ..Default::default()
        };
        gpu.queue_submit(&batch, vk::Fence::null()).unwrap();
        assert!(gpu.violations().is_empty());
        gpu.queue_submit(&batch, vk::Fence::null()).unwrap();
        assert_eq!(gpu.violations(), vec![Violation::AlreadySignaled(semaphore)]);

        // once waited on, it can be signaled again
        let waits = [SemaphoreWait {
            semaphore,
            dst_stage: vk::PipelineStageFlags::ALL_COMMANDS,
        }];
        gpu.queue_submit(
            &SubmitBatch {
                waits: &waits,
                signals: &signals,
                ..Default::default()
            },
            vk::Fence::null(),
        )
        .unwrap();
        assert_eq!(gpu.violations().len(), 1);
    }

    #[test]
    fn freeing_a_pending_command_buffer_is_reported() {
        let gpu = HeadlessDevice::new();
        let cb = gpu.allocate_command_buffers(vk::CommandBufferLevel::PRIMARY, 1).unwrap()[0];
        gpu.begin_command_buffer(cb, vk::CommandBufferUsageFlags::ONE_TIME_SUBMIT, None)
            .unwrap();
        gpu.end_command_buffer(cb).unwrap();
        gpu.queue_submit(
            &SubmitBatch {
                command_buffers: &[cb],
                ..Default::default()
            },
            vk::Fence::null(),
        )
        .unwrap();
        gpu.free_command_buffers(&[cb]);
        assert_eq!(gpu.violations(), vec![Violation::CommandBufferPending(cb)]);
    }

    #[test]
    fn secondaries_stay_pending_with_their_primary() {
        let gpu = HeadlessDevice::new();
        let framebuffer = gpu.create_framebuffer();
        let render_pass = gpu.create_render_pass();
        let secondary = gpu.allocate_command_buffers(vk::CommandBufferLevel::SECONDARY, 1).unwrap()[0];
        let primary = gpu.allocate_command_buffers(vk::CommandBufferLevel::PRIMARY, 1).unwrap()[0];

        let inheritance = Inheritance {
            render_pass,
            subpass: 0,
            framebuffer,
        };
        gpu.begin_command_buffer(
            secondary,
            vk::CommandBufferUsageFlags::RENDER_PASS_CONTINUE,
            Some(&inheritance),
        )
        .unwrap();
        gpu.end_command_buffer(secondary).unwrap();
        gpu.begin_command_buffer(primary, vk::CommandBufferUsageFlags::empty(), None).unwrap();
        gpu.cmd_execute_commands(primary, &[secondary]);
        gpu.end_command_buffer(primary).unwrap();

        let fence = gpu.create_fence(false).unwrap();
        gpu.queue_submit(
            &SubmitBatch {
                command_buffers: &[primary],
                ..Default::default()
            },
            fence,
        )
        .unwrap();
        assert_eq!(gpu.submissions()[0].framebuffers, vec![framebuffer]);
        assert_eq!(gpu.get_fence_status(fence), Ok(false));

        gpu.wait_for_fence(fence, u64::MAX).unwrap();
        assert_eq!(gpu.get_fence_status(fence), Ok(true));
        gpu.free_command_buffers(&[secondary, primary]);
        assert!(gpu.violations().is_empty());
    }

    #[test]
    fn waiting_on_an_unsubmitted_fence_times_out() {
        let gpu = HeadlessDevice::new();
        let fence = gpu.create_fence(false).unwrap();
        assert_eq!(gpu.wait_for_fence(fence, 0), Err(vk::Result::TIMEOUT));
    }

    #[test]
    fn stalled_device_times_out_fence_waits() {
        let gpu = HeadlessDevice::new();
        let fence = gpu.create_fence(false).unwrap();
        gpu.queue_submit(&SubmitBatch::default(), fence).unwrap();
        gpu.set_stalled(true);
        assert_eq!(gpu.wait_for_fence(fence, 1_000), Err(vk::Result::TIMEOUT));
        assert_eq!(gpu.stats().pending_submissions, 1);

        gpu.set_stalled(false);
        gpu.wait_for_fence(fence, 1_000).unwrap();
        assert_eq!(gpu.get_fence_status(fence), Ok(true));
    }
}
