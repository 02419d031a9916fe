use super::Register;
use crate::ternary::Ternary;

/// Callback fired when a breakpoint is hit, with the breakpoint address and
/// the register (C or D) that touched it. Returns true to pause execution,
/// false to continue.
pub type BreakpointCallback = Box<dyn FnMut(Ternary, Register) -> bool + Send>;

/// A pause condition attached to a memory address.
///
/// The hit counter increments on every hit; the callback is consulted only
/// once the hit count exceeds the ignore count.
pub struct Breakpoint {
    address: Ternary,
    callback: BreakpointCallback,
    ignore_count: u32,
    hit_count: u32,
}

impl Breakpoint {
    /// A breakpoint with the default callback, which always pauses.
    pub fn new(address: Ternary) -> Self {
        Self::with_callback(address, Box::new(|_, _| true))
    }

    /// A breakpoint with a user callback deciding whether to pause.
    ///
    /// The callback runs on the execution thread and must not call back
    /// into vCPU or debugger control methods, they serialise on the same
    /// locks.
    pub fn with_callback(address: Ternary, callback: BreakpointCallback) -> Self {
        Self {
            address,
            callback,
            ignore_count: 0,
            hit_count: 0,
        }
    }

    /// Sets the number of hits to ignore before the callback fires.
    #[must_use]
    pub fn ignore(mut self, count: u32) -> Self {
        self.ignore_count = count;
        self
    }

    /// The address the breakpoint is attached to.
    pub fn address(&self) -> Ternary {
        self.address
    }

    pub fn ignore_count(&self) -> u32 {
        self.ignore_count
    }

    /// Registers a hit, returning whether execution should pause.
    pub(crate) fn fire(&mut self, register: Register) -> bool {
        self.hit_count += 1;
        if self.hit_count > self.ignore_count {
            (self.callback)(self.address, register)
        } else {
            false
        }
    }

    /// Replaces the callback with one that first runs the existing callback
    /// and then hands the verdict to `observer`.
    pub(crate) fn wrap<F>(self, mut observer: F) -> Self
    where
        F: FnMut(bool) + Send + 'static,
    {
        let Breakpoint {
            address,
            mut callback,
            ignore_count,
            hit_count,
        } = self;

        Breakpoint {
            address,
            callback: Box::new(move |addr, register| {
                let pause = callback(addr, register);
                observer(pause);
                pause
            }),
            ignore_count,
            hit_count,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_callback_always_pauses() {
        let mut bp = Breakpoint::new(Ternary::new(42));
        assert_eq!(bp.address(), Ternary::new(42));
        assert_eq!(bp.ignore_count(), 0);

        assert!(bp.fire(Register::C));
        assert!(bp.fire(Register::D));
    }

    #[test]
    fn callback_verdict_is_returned() {
        use std::sync::atomic::{AtomicBool, Ordering};
        use std::sync::Arc;

        let pause = Arc::new(AtomicBool::new(false));
        let mut bp = Breakpoint::with_callback(
            Ternary::new(42),
            Box::new({
                let pause = Arc::clone(&pause);
                move |address, register| {
                    assert_eq!(address, Ternary::new(42));
                    assert_eq!(register, Register::C);
                    pause.load(Ordering::SeqCst)
                }
            }),
        );

        assert!(!bp.fire(Register::C));
        pause.store(true, Ordering::SeqCst);
        assert!(bp.fire(Register::C));
    }

    #[test]
    fn ignore_count_delays_first_fire() {
        let mut bp = Breakpoint::new(Ternary::new(3)).ignore(3);
        assert_eq!(bp.ignore_count(), 3);

        assert!(!bp.fire(Register::D));
        assert!(!bp.fire(Register::D));
        assert!(!bp.fire(Register::D));
        // fires for the first time on the (ignore_count + 1)-th hit
        assert!(bp.fire(Register::D));
        assert!(bp.fire(Register::D));
    }

    #[test]
    fn wrap_observes_the_verdict() {
        use std::sync::atomic::{AtomicUsize, Ordering};
        use std::sync::Arc;

        let observed = Arc::new(AtomicUsize::new(0));
        let bp = Breakpoint::new(Ternary::new(7));
        let mut bp = bp.wrap({
            let observed = Arc::clone(&observed);
            move |pause| {
                observed.fetch_add(if pause { 1 } else { 100 }, Ordering::SeqCst);
            }
        });

        assert!(bp.fire(Register::C));
        assert_eq!(observed.load(Ordering::SeqCst), 1);
    }
}
