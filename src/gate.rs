//! Execution flow gate between a controlling and a controlled thread.
use parking_lot::{Condvar, Mutex};

/// Budget value representing an always open gate.
pub const ALWAYS_OPEN: i64 = -1;

/// Lets one thread control the flow of execution in another.
///
/// The gate holds a pass budget: [`ALWAYS_OPEN`] passes freely, a positive
/// budget is consumed one pass at a time, and zero blocks. The controlling
/// thread uses [`open`](Gate::open), [`open_for`](Gate::open_for) and
/// [`close`](Gate::close); the controlled thread calls
/// [`pass`](Gate::pass) at its checkpoints.
///
/// Behaviour is undefined if more than one thread passes the gate.
pub struct Gate {
    allow: Mutex<i64>,
    cv: Condvar,
}

impl Gate {
    /// A new gate, starting open.
    pub fn new() -> Self {
        Self {
            allow: Mutex::new(ALWAYS_OPEN),
            cv: Condvar::new(),
        }
    }

    /// Called by the controlled thread; blocks while the budget is
    /// exhausted.
    pub fn pass(&self) {
        self.pass_with(|_| {});
    }

    /// As [`pass`](Gate::pass), with `notifier` called with `true` just
    /// before blocking and `false` once released. It is not called when the
    /// gate is open.
    ///
    /// The gate lock is held while the notifier runs, so the notifier must
    /// not call back into the gate.
    pub fn pass_with<F>(&self, mut notifier: F)
    where
        F: FnMut(bool),
    {
        let mut allow = self.allow.lock();
        if *allow == ALWAYS_OPEN {
            return;
        }

        if *allow > 0 {
            *allow -= 1;
        }

        let notify = *allow == 0;
        if notify {
            notifier(true);
        }

        while *allow == 0 {
            self.cv.wait(&mut allow);
        }

        if notify {
            notifier(false);
        }
    }

    /// Opens the gate until [`close`](Gate::close) is called.
    pub fn open(&self) {
        self.open_for(ALWAYS_OPEN);
    }

    /// Allows `budget` passes before the gate closes again. A step is
    /// `open_for(1)`.
    pub fn open_for(&self, budget: i64) {
        {
            *self.allow.lock() = budget;
        }
        self.cv.notify_one();
    }

    /// Makes the next pass block.
    pub fn close(&self) {
        {
            *self.allow.lock() = 0;
        }
        self.cv.notify_one();
    }

    /// True if the next pass would block.
    pub fn is_closed(&self) -> bool {
        *self.allow.lock() == 0
    }
}

impl Default for Gate {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for Gate {
    /// Opens the gate so waiters never leak.
    fn drop(&mut self) {
        self.open();
    }
}
