//! Debugger layers riding on top of the vCPU: interactive control and the
//! declarative script runner.
mod control;
pub mod script;

pub use control::{DebugState, DebuggerControl};
