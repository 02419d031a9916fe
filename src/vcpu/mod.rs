//! The virtual CPU and its execution thread.
mod breakpoint;
mod core;

pub use self::core::{VcpuHandle, VirtualCpu};
pub use breakpoint::{Breakpoint, BreakpointCallback};


use std::fmt;

use crate::error::MalbolgeError;
use crate::ternary::Ternary;

/// Execution state of a vCPU. `Stopped` is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecutionState {
    /// Loaded and ready to run.
    Ready,
    /// The execution thread is live.
    Running,
    /// The program has finished, failed, or was stopped.
    Stopped,
}

impl ExecutionState {
    pub(crate) fn name(self) -> &'static str {
        match self {
            ExecutionState::Ready => "READY",
            ExecutionState::Running => "RUNNING",
            ExecutionState::Stopped => "STOPPED",
        }
    }
}

impl fmt::Display for ExecutionState {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// The vCPU register identifiers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Register {
    /// Accumulator.
    A,
    /// Code pointer.
    C,
    /// Data pointer.
    D,
}

impl Register {
    /// Maps a register name as it appears in debugger scripts.
    pub fn from_name(name: &str) -> Option<Register> {
        match name {
            "A" => Some(Register::A),
            "C" => Some(Register::C),
            "D" => Some(Register::D),
            _ => None,
        }
    }
}

impl fmt::Display for Register {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(match self {
            Register::A => "A",
            Register::C => "C",
            Register::D => "D",
        })
    }
}

/// The data reported for a register query.
///
/// For C and D the address field holds the pointer and the value field the
/// cell it points at; A has no address, only its value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RegisterData {
    pub address: Option<Ternary>,
    pub value: Ternary,
}

impl RegisterData {
    /// Register data for the C or D register.
    pub fn with_address(address: Ternary, value: Ternary) -> Self {
        Self {
            address: Some(address),
            value,
        }
    }

    /// Register data for the A register.
    pub fn value_only(value: Ternary) -> Self {
        Self {
            address: None,
            value,
        }
    }
}

impl fmt::Display for RegisterData {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self.address {
            Some(address) => write!(f, "{{{}, {}}}", address, self.value),
            None => write!(f, "{{{{}}, {}}}", self.value),
        }
    }
}

/// Payload of the state signal: the state just entered, and the error that
/// ended execution if the transition was abnormal.
#[derive(Debug, Clone)]
pub struct StateChange {
    pub state: ExecutionState,
    pub error: Option<MalbolgeError>,
}

#[cfg(test)]
mod display_tests {
    use super::*;

    #[test]
    fn register_data_format() {
        let data = RegisterData::with_address(Ternary::new(9), Ternary::new(125));
        assert_eq!(
            data.to_string(),
            "{{d:9, t:0000000100}, {d:125, t:0000011122}}"
        );

        let data = RegisterData::value_only(Ternary::new(72));
        assert_eq!(data.to_string(), "{{}, {d:72, t:0000002200}}");
    }

    #[test]
    fn state_names() {
        assert_eq!(ExecutionState::Ready.to_string(), "READY");
        assert_eq!(ExecutionState::Running.to_string(), "RUNNING");
        assert_eq!(ExecutionState::Stopped.to_string(), "STOPPED");
    }

    #[test]
    fn register_names() {
        assert_eq!(Register::from_name("A"), Some(Register::A));
        assert_eq!(Register::from_name("C"), Some(Register::C));
        assert_eq!(Register::from_name("D"), Some(Register::D));
        assert_eq!(Register::from_name("B"), None);
        assert_eq!(Register::D.to_string(), "D");
    }
}
