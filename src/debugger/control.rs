use std::fmt;
use std::sync::Arc;

use parking_lot::Mutex;

use crate::error::{ExecutionError, MalbolgeError};
use crate::signal::Connection;
use crate::ternary::Ternary;
use crate::vcpu::{
    Breakpoint, ExecutionState, Register, RegisterData, StateChange, VirtualCpu,
};

/// Execution state as the debugger sees it. Orthogonal to the vCPU's own
/// state, but driven by its signals.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DebugState {
    /// Program stopped, or not started yet.
    NotRunning,
    /// Program running.
    Running,
    /// Program paused.
    Paused,
}

impl DebugState {
    fn name(self) -> &'static str {
        match self {
            DebugState::NotRunning => "NOT_RUNNING",
            DebugState::Running => "RUNNING",
            DebugState::Paused => "PAUSED",
        }
    }
}

impl fmt::Display for DebugState {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Interactive debugger control over a vCPU.
///
/// Tracks its own three-state machine, kept consistent with the vCPU's
/// state and breakpoint signals. Breakpoint callbacks are wrapped at
/// insertion so that their verdict (pause or continue) drives the state;
/// they run on the execution thread and must not call back into this type.
pub struct DebuggerControl<'a> {
    vcpu: &'a VirtualCpu,
    state: Arc<Mutex<DebugState>>,
    _state_connection: Connection<StateChange>,
    _breakpoint_connection: Connection<Ternary>,
}

impl<'a> DebuggerControl<'a> {
    pub fn new(vcpu: &'a VirtualCpu) -> Self {
        let initial = match vcpu.state() {
            ExecutionState::Running => DebugState::Running,
            ExecutionState::Ready | ExecutionState::Stopped => DebugState::NotRunning,
        };
        let state = Arc::new(Mutex::new(initial));

        let state_connection = vcpu.register_for_state_signal({
            let state = Arc::clone(&state);
            move |change: &StateChange| {
                *state.lock() = match change.state {
                    ExecutionState::Running => DebugState::Running,
                    ExecutionState::Ready | ExecutionState::Stopped => DebugState::NotRunning,
                };
            }
        });
        let breakpoint_connection = vcpu.register_for_breakpoint_hit_signal({
            let state = Arc::clone(&state);
            move |_: &Ternary| {
                *state.lock() = DebugState::Paused;
            }
        });

        Self {
            vcpu,
            state,
            _state_connection: state_connection,
            _breakpoint_connection: breakpoint_connection,
        }
    }

    /// The debugged program's execution state.
    pub fn state(&self) -> DebugState {
        *self.state.lock()
    }

    /// Requests a pause. Fails if the program is not live.
    pub fn pause(&self) -> Result<(), MalbolgeError> {
        if self.state() == DebugState::NotRunning {
            return Err(self.wrong_state());
        }

        self.vcpu.pause()?;
        *self.state.lock() = DebugState::Paused;
        Ok(())
    }

    /// Executes one instruction and re-pauses. Requires the paused state.
    pub fn step(&self) -> Result<(), MalbolgeError> {
        if self.state() != DebugState::Paused {
            return Err(self.wrong_state());
        }

        self.vcpu.step()
    }

    /// Resumes a paused program. Fails if the program is not live.
    pub fn resume(&self) -> Result<(), MalbolgeError> {
        if self.state() == DebugState::NotRunning {
            return Err(self.wrong_state());
        }

        *self.state.lock() = DebugState::Running;
        self.vcpu.resume();
        Ok(())
    }

    /// The value in memory at `address`. Refused while the program is
    /// running.
    pub fn address_value(&self, address: Ternary) -> Result<Ternary, MalbolgeError> {
        if self.state() == DebugState::Running {
            return Err(self.wrong_state());
        }

        self.vcpu.address_value(address)
    }

    /// The data held by `register`. Refused while the program is running.
    pub fn register_value(&self, register: Register) -> Result<RegisterData, MalbolgeError> {
        if self.state() == DebugState::Running {
            return Err(self.wrong_state());
        }

        self.vcpu.register_value(register)
    }

    /// Adds `breakpoint`, silently replacing an existing one at the same
    /// address. Its callback verdict drives the debugger state.
    pub fn add_breakpoint(&self, breakpoint: Breakpoint) {
        let state = Arc::clone(&self.state);
        let wrapped = breakpoint.wrap(move |pause| {
            *state.lock() = if pause {
                DebugState::Paused
            } else {
                DebugState::Running
            };
        });
        self.vcpu.insert_breakpoint(wrapped);
    }

    /// Removes the breakpoint at `address`, reporting whether one existed.
    pub fn remove_breakpoint(&self, address: Ternary) -> bool {
        self.vcpu.remove_breakpoint(address)
    }

    fn wrong_state(&self) -> MalbolgeError {
        ExecutionError::WrongState {
            actual: self.state().name(),
        }
        .into()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::loader::{self, LoadMode};
    use crate::vcpu::tests::{wait_until, ECHO, HELLO_WORLD};

    fn echo_vcpu() -> VirtualCpu {
        VirtualCpu::new(loader::load_str(ECHO, LoadMode::Auto).unwrap())
    }

    #[test]
    fn initial_state_is_not_running() {
        let vcpu = echo_vcpu();
        let debugger = DebuggerControl::new(&vcpu);
        assert_eq!(debugger.state(), DebugState::NotRunning);
    }

    #[test]
    fn control_methods_require_live_program() {
        let vcpu = echo_vcpu();
        let debugger = DebuggerControl::new(&vcpu);

        assert!(debugger.pause().is_err());
        assert!(debugger.step().is_err());
        assert!(debugger.resume().is_err());
    }

    #[test]
    fn queries_allowed_before_the_program_starts() {
        let vcpu = echo_vcpu();
        let debugger = DebuggerControl::new(&vcpu);

        assert_eq!(
            debugger.address_value(Ternary::new(0)).unwrap(),
            Ternary::from(b'(')
        );
        let a = debugger.register_value(Register::A).unwrap();
        assert_eq!(a, RegisterData::value_only(Ternary::new(0)));
    }

    #[test]
    fn pause_resume_state_machine() {
        let vcpu = echo_vcpu();
        let debugger = DebuggerControl::new(&vcpu);

        vcpu.run().unwrap();
        assert_eq!(debugger.state(), DebugState::Running);

        // queries are refused while running
        assert!(debugger.address_value(Ternary::new(0)).is_err());
        assert!(debugger.register_value(Register::A).is_err());

        // the echo program parks in the read poll, so the pause is
        // observable through the closed gate rather than the gate parking
        debugger.pause().unwrap();
        assert_eq!(debugger.state(), DebugState::Paused);
        assert!(debugger.address_value(Ternary::new(0)).is_ok());

        debugger.resume().unwrap();
        assert_eq!(debugger.state(), DebugState::Running);

        vcpu.stop();
        assert!(wait_until(|| debugger.state() == DebugState::NotRunning));
    }

    #[test]
    fn continue_breakpoint_keeps_running() {
        let vcpu = VirtualCpu::new(loader::load_str(HELLO_WORLD, LoadMode::Auto).unwrap());
        let debugger = DebuggerControl::new(&vcpu);

        // a callback that never wants to pause
        debugger.add_breakpoint(Breakpoint::with_callback(
            Ternary::new(9),
            Box::new(|_, _| false),
        ));

        vcpu.run().unwrap();
        assert!(vcpu.wait().is_none());
        assert_eq!(debugger.state(), DebugState::NotRunning);
    }

    #[test]
    fn pausing_breakpoint_updates_state() {
        let vcpu = VirtualCpu::new(loader::load_str(HELLO_WORLD, LoadMode::Auto).unwrap());
        let debugger = DebuggerControl::new(&vcpu);

        debugger.add_breakpoint(Breakpoint::new(Ternary::new(9)));
        vcpu.run().unwrap();

        assert!(wait_until(|| debugger.state() == DebugState::Paused));
        assert_eq!(
            debugger.address_value(Ternary::new(9)).unwrap(),
            Ternary::new(125)
        );

        debugger.resume().unwrap();
        assert!(vcpu.wait().is_none());
        assert_eq!(debugger.state(), DebugState::NotRunning);
    }
}
