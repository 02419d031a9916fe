//! Declarative debugger scripts: the command model, the text parser and the
//! runner that executes a validated sequence against a vCPU.
mod parser;
mod runner;

pub use parser::{parse, parse_path};
pub use runner::{AddressQuery, RegisterQuery, ScriptRunner};

use std::fmt;

use crate::error::ScriptInvalidError;
use crate::ternary::Ternary;
use crate::vcpu::Register;

/// One debugger script command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    AddBreakpoint { address: Ternary, ignore_count: u32 },
    RemoveBreakpoint { address: Ternary },
    /// Starts the program; zero means no runtime bound.
    Run { max_runtime_ms: u32 },
    AddressValue { address: Ternary },
    RegisterValue { register: Register },
    Step,
    Resume,
    Stop,
    OnInput { data: String },
}

impl Command {
    /// The command name as written in script text.
    pub fn name(&self) -> &'static str {
        match self {
            Command::AddBreakpoint { .. } => "add_breakpoint",
            Command::RemoveBreakpoint { .. } => "remove_breakpoint",
            Command::Run { .. } => "run",
            Command::AddressValue { .. } => "address_value",
            Command::RegisterValue { .. } => "register_value",
            Command::Step => "step",
            Command::Resume => "resume",
            Command::Stop => "stop",
            Command::OnInput { .. } => "on_input",
        }
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Command::AddBreakpoint {
                address,
                ignore_count,
            } => write!(
                f,
                "add_breakpoint(address={}, ignore_count={})",
                address, ignore_count
            ),
            Command::RemoveBreakpoint { address } => {
                write!(f, "remove_breakpoint(address={})", address)
            }
            Command::Run { max_runtime_ms } => write!(f, "run(max_runtime_ms={})", max_runtime_ms),
            Command::AddressValue { address } => write!(f, "address_value(address={})", address),
            Command::RegisterValue { register } => write!(f, "register_value(reg={})", register),
            Command::Step => write!(f, "step()"),
            Command::Resume => write!(f, "resume()"),
            Command::Stop => write!(f, "stop()"),
            Command::OnInput { data } => write!(f, "on_input(data={:?})", data),
        }
    }
}

/// Checks the structural rules of a command sequence:
///
/// - there is one, and only one, run command;
/// - no step or resume appears before the run;
/// - if there are any add_breakpoint commands, at least one appears before
///   the run;
/// - a stop, if present, is the last command.
pub fn validate(commands: &[Command]) -> Result<(), ScriptInvalidError> {
    let run_count = commands
        .iter()
        .filter(|c| matches!(c, Command::Run { .. }))
        .count();
    if run_count != 1 {
        return Err(ScriptInvalidError::RunCount);
    }

    let run_index = commands
        .iter()
        .position(|c| matches!(c, Command::Run { .. }))
        .ok_or(ScriptInvalidError::RunCount)?;

    if commands[..run_index]
        .iter()
        .any(|c| matches!(c, Command::Step | Command::Resume))
    {
        return Err(ScriptInvalidError::StepOrResumeBeforeRun);
    }

    if let Some(first) = commands
        .iter()
        .position(|c| matches!(c, Command::AddBreakpoint { .. }))
    {
        if first > run_index {
            return Err(ScriptInvalidError::BreakpointAfterRun);
        }
    }

    if let Some(stop) = commands.iter().position(|c| matches!(c, Command::Stop)) {
        if stop + 1 != commands.len() {
            return Err(ScriptInvalidError::StopNotLast);
        }
    }

    Ok(())
}
