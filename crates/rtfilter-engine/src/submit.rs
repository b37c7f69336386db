//! Blocking submission helper: one allocator, list and fence per queue role.

use std::sync::Arc;

use crate::device::{
    CommandAllocator, CommandList, CommandListState, CommandListType, CommandQueue, Device, DeviceError, Fence, GpuContext, PipelineState,
};

/// Records into a single list and runs it to completion on one queue.
///
/// Every [`submit_and_wait`](Self::submit_and_wait) bumps the fence counter
/// exactly once and returns only after the queue has signalled it.
pub struct CommandContext {
    queue: Arc<CommandQueue>,
    allocator: CommandAllocator,
    list: CommandList,
    fence: Fence,
    counter: u64,
}

impl CommandContext {
    pub fn new(ctx: &GpuContext, kind: CommandListType) -> Result<Self, DeviceError> {
        let allocator = ctx.device.create_command_allocator(kind);
        let list = ctx.device.create_command_list(kind, &allocator, None)?;
        Ok(Self {
            queue: Arc::clone(ctx.queue(kind)),
            allocator,
            list,
            fence: ctx.device.create_fence(0),
            counter: 0,
        })
    }

    pub fn device(&self) -> &Device {
        self.queue.device()
    }

    /// Open list for recording.
    pub fn list(&mut self) -> &mut CommandList {
        &mut self.list
    }

    /// Last fence value this context waited for.
    pub fn fence_value(&self) -> u64 {
        self.counter
    }

    /// Closes and executes the list, then blocks until the queue signals the fence.
    ///
    /// Returns the fence value that was waited for.
    pub fn submit_and_wait(&mut self) -> Result<u64, DeviceError> {
        self.list.close()?;
        self.queue.execute_command_lists(&mut [&mut self.list])?;
        self.counter += 1;
        self.queue.signal(&self.fence, self.counter)?;
        self.fence.wait(self.counter);
        self.queue.device().check_health()?;
        Ok(self.counter)
    }

    /// Reopens the list for the next batch. Legal only once the last submission retired.
    pub fn reset(&mut self, initial: Option<&PipelineState>) -> Result<(), DeviceError> {
        self.allocator.reset()?;
        self.list.reset(&self.allocator, initial)
    }

    /// Reopens the list if a failed submission left it closed.
    pub fn reopen(&mut self) -> Result<(), DeviceError> {
        match self.list.state() {
            CommandListState::Open => Ok(()),
            state => {
                log::debug!("reopening {:?} list left {state:?}", self.list.kind());
                self.reset(None)
            }
        }
    }

    /// Submits, waits and reopens in one go.
    pub fn flush(&mut self) -> Result<u64, DeviceError> {
        let value = self.submit_and_wait()?;
        self.reset(None)?;
        Ok(value)
    }
}

impl std::fmt::Debug for CommandContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CommandContext")
            .field("queue", &self.queue)
            .field("counter", &self.counter)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::{HeapType, testing};

    #[test]
    fn counter_advances_once_per_submission() {
        let Some(ctx) = testing::context() else { return };
        let mut cc = CommandContext::new(&ctx, CommandListType::Direct).unwrap();

        assert_eq!(cc.submit_and_wait().unwrap(), 1);
        assert_eq!(cc.list().state(), CommandListState::Retired);
        cc.reset(None).unwrap();
        assert_eq!(cc.flush().unwrap(), 2);
        assert_eq!(cc.fence_value(), 2);
    }

    #[test]
    fn reopen_recovers_a_rejected_list() {
        let Some(ctx) = testing::context() else { return };
        let mut cc = CommandContext::new(&ctx, CommandListType::Compute).unwrap();
        cc.list().clear_render_target_view(Default::default(), [0.0; 4]);
        assert!(cc.submit_and_wait().is_err());
        assert_eq!(cc.list().state(), CommandListState::Closed);

        cc.reopen().unwrap();
        assert_eq!(cc.list().state(), CommandListState::Open);
        assert_eq!(cc.flush().unwrap(), 1);
        cc.reopen().unwrap();
    }

    #[test]
    fn submit_reports_removed_device() {
        let Some(ctx) = testing::context() else { return };
        let mut cc = CommandContext::new(&ctx, CommandListType::Direct).unwrap();
        let src = ctx.device.create_buffer(16, HeapType::Upload).unwrap();
        let dst = ctx.device.create_buffer(32, HeapType::Default).unwrap();
        cc.list().copy_resource(&dst, &src);

        let err = cc.submit_and_wait().unwrap_err();
        assert!(matches!(err, DeviceError::DeviceRemoved(_)));
    }
}
