use std::sync::Arc;

use parking_lot::{Condvar, Mutex};

struct FenceShared {
    completed: Mutex<u64>,
    cond: Condvar,
}

/// Monotonic completion counter shared between the control thread and queues.
///
/// Waiting blocks on a condition variable until the completed value reaches
/// the target; there is no timeout.
#[derive(Clone)]
pub struct Fence {
    shared: Arc<FenceShared>,
}

impl Fence {
    pub(crate) fn new(initial: u64) -> Self {
        Self {
            shared: Arc::new(FenceShared {
                completed: Mutex::new(initial),
                cond: Condvar::new(),
            }),
        }
    }

    pub fn completed_value(&self) -> u64 {
        *self.shared.completed.lock()
    }

    /// Raises the completed value. Lower values are ignored.
    pub fn signal(&self, value: u64) {
        let mut completed = self.shared.completed.lock();
        if value > *completed {
            *completed = value;
            self.shared.cond.notify_all();
        }
    }

    /// Blocks until the completed value is at least `value`.
    pub fn wait(&self, value: u64) {
        let mut completed = self.shared.completed.lock();
        while *completed < value {
            self.shared.cond.wait(&mut completed);
        }
    }
}

impl std::fmt::Debug for Fence {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Fence")
            .field("completed", &self.completed_value())
            .finish()
    }
}

impl super::Device {
    pub fn create_fence(&self, initial: u64) -> Fence {
        Fence::new(initial)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;
    use std::time::Duration;

    #[test]
    fn wait_at_or_below_completed_returns_immediately() {
        let fence = Fence::new(5);
        // A blocking wait here would hang the test.
        fence.wait(0);
        fence.wait(4);
        fence.wait(5);
        assert_eq!(fence.completed_value(), 5);
    }

    #[test]
    fn signal_never_lowers_value() {
        let fence = Fence::new(0);
        fence.signal(3);
        fence.signal(1);
        assert_eq!(fence.completed_value(), 3);
    }

    #[test]
    fn wait_wakes_on_signal_from_another_thread() {
        let fence = Fence::new(0);
        let signaller = fence.clone();
        let handle = thread::spawn(move || {
            thread::sleep(Duration::from_millis(20));
            signaller.signal(1);
        });
        fence.wait(1);
        assert_eq!(fence.completed_value(), 1);
        handle.join().unwrap();
    }
}
