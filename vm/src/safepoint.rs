use std::sync::atomic::{AtomicBool, Ordering};

use parking_lot::Mutex;

/// An interrupt delivered by the scheduling layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Interrupt {
    /// User requested a break into the running chain.
    UserBreak,
    /// A timer the scheduler armed has expired.
    TimerExpired,
    /// Another logical process wants the execution thread.
    ProcessSwitch,
}

/// Cooperative interrupt signal shared between the interpreter and an
/// external scheduling layer.
///
/// Any thread may [`request`](Self::request); the interpreter observes the
/// flag only at its safepoints (sends, and back edges at intervals) and
/// drains the queue there. Nothing in the core blocks on this.
pub struct Safepoint {
    pending: AtomicBool,
    queue: Mutex<Vec<Interrupt>>,
}

impl Safepoint {
    pub fn new() -> Safepoint {
        Safepoint {
            pending: AtomicBool::new(false),
            queue: Mutex::new(Vec::new()),
        }
    }

    /// Enqueue an interrupt for the next safepoint.
    pub fn request(&self, interrupt: Interrupt) {
        self.queue.lock().push(interrupt);
        self.pending.store(true, Ordering::Release);
    }

    /// Cheap check used on the hot path.
    #[inline]
    pub fn has_pending(&self) -> bool {
        self.pending.load(Ordering::Acquire)
    }

    /// Take all queued interrupts and clear the flag.
    pub fn drain(&self) -> Vec<Interrupt> {
        let mut queue = self.queue.lock();
        self.pending.store(false, Ordering::Release);
        std::mem::take(&mut *queue)
    }
}

impl Default for Safepoint {
    fn default() -> Safepoint {
        Safepoint::new()
    }
}
