use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::atomic::{AtomicU64, Ordering};
use std::thread::JoinHandle;

use crossbeam::channel::{Receiver, Sender, unbounded};

use super::command::{CommandList, CommandListType, SubmittedList};
use super::exec;
use super::{Device, DeviceError, Fence};

enum Submission {
    Execute(Vec<SubmittedList>),
    Signal(Fence, u64),
    Wait(Fence, u64),
}

/// Queue that executes submitted command lists in order on its own thread.
///
/// Dropping the queue drains pending work and joins the worker.
pub struct CommandQueue {
    device: Device,
    kind: CommandListType,
    label: String,
    sender: Option<Sender<Submission>>,
    worker: Option<JoinHandle<()>>,
    idle_fence: Fence,
    idle_value: AtomicU64,
}

impl CommandQueue {
    pub fn kind(&self) -> CommandListType {
        self.kind
    }

    pub fn device(&self) -> &Device {
        &self.device
    }

    fn send(&self, submission: Submission) -> Result<(), DeviceError> {
        let sender = self
            .sender
            .as_ref()
            .ok_or_else(|| DeviceError::DeviceRemoved(format!("{} is shut down", self.label)))?;
        sender
            .send(submission)
            .map_err(|_| DeviceError::DeviceRemoved(format!("{} worker has stopped", self.label)))
    }

    /// Submits closed lists for execution in order.
    ///
    /// Every list is validated before any is submitted, so a rejected batch
    /// leaves all lists untouched.
    pub fn execute_command_lists(&self, lists: &mut [&mut CommandList]) -> Result<(), DeviceError> {
        self.device.check_health()?;
        for list in lists.iter() {
            if self.kind == CommandListType::Compute && list.kind() == CommandListType::Direct {
                return Err(DeviceError::InvalidCommandList(
                    "direct list submitted to a compute queue".into(),
                ));
            }
            if let Some(reason) = list.poison_reason() {
                return Err(DeviceError::InvalidCommandList(reason.to_owned()));
            }
        }

        let mut batch = Vec::with_capacity(lists.len());
        for list in lists.iter_mut() {
            batch.push(list.submit()?);
        }
        log::trace!("{}: executing {} list(s)", self.label, batch.len());
        self.send(Submission::Execute(batch))
    }

    /// Sets `fence` to `value` once all previously submitted work has finished.
    pub fn signal(&self, fence: &Fence, value: u64) -> Result<(), DeviceError> {
        self.send(Submission::Signal(fence.clone(), value))
    }

    /// Holds back later submissions until `fence` reaches `value`.
    pub fn wait(&self, fence: &Fence, value: u64) -> Result<(), DeviceError> {
        self.send(Submission::Wait(fence.clone(), value))
    }

    /// Blocks the caller until everything submitted so far has executed.
    pub fn wait_idle(&self) -> Result<(), DeviceError> {
        let value = self.idle_value.fetch_add(1, Ordering::AcqRel) + 1;
        self.signal(&self.idle_fence, value)?;
        self.idle_fence.wait(value);
        Ok(())
    }
}

impl Drop for CommandQueue {
    fn drop(&mut self) {
        drop(self.sender.take());
        if let Some(worker) = self.worker.take() {
            if worker.join().is_err() {
                log::error!("{} worker panicked during shutdown", self.label);
            }
        }
        log::debug!("{} shut down", self.label);
    }
}

impl std::fmt::Debug for CommandQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CommandQueue")
            .field("label", &self.label)
            .field("kind", &self.kind)
            .finish()
    }
}

fn run_worker(device: Device, label: String, receiver: Receiver<Submission>) {
    for submission in receiver {
        match submission {
            Submission::Execute(batch) => {
                for list in batch {
                    if device.check_health().is_ok() {
                        let result = catch_unwind(AssertUnwindSafe(|| exec::execute(&device, &list)));
                        match result {
                            Ok(Ok(())) => {}
                            Ok(Err(e)) => device.remove(format!("{}: {e}", list.label)),
                            Err(_) => device.remove(format!("{}: execution panicked", list.label)),
                        }
                    }
                    list.retire();
                }
            }
            // Fences still advance after removal so waiters wake and observe it.
            Submission::Signal(fence, value) => fence.signal(value),
            Submission::Wait(fence, value) => fence.wait(value),
        }
    }
    log::trace!("{label} worker exiting");
}

impl Device {
    pub fn create_command_queue(&self, kind: CommandListType) -> Result<CommandQueue, DeviceError> {
        self.check_health()?;
        let label = format!("{kind:?} queue#{}", self.next_object_id()).to_lowercase();
        let (sender, receiver) = unbounded();

        let worker = std::thread::Builder::new()
            .name(label.clone())
            .spawn({
                let device = self.clone();
                let label = label.clone();
                move || run_worker(device, label, receiver)
            })
            .map_err(|e| DeviceError::DeviceRemoved(format!("failed to start {label}: {e}")))?;

        log::debug!("{label} started");
        Ok(CommandQueue {
            device: self.clone(),
            kind,
            label,
            sender: Some(sender),
            worker: Some(worker),
            idle_fence: Fence::new(0),
            idle_value: AtomicU64::new(0),
        })
    }
}
