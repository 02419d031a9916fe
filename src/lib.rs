//! A malbolge virtual machine: the ternary number type, the self-modifying
//! instruction ciphers, a threaded vCPU and the debugger layers on top of
//! it.
pub mod debugger;
pub mod definitions;
pub mod gate;
pub mod instruction;
pub mod loader;
pub mod memory;
pub mod signal;
pub mod ternary;
pub mod tritset;
pub mod vcpu;

// reexporting for convinience
mod error;
pub use error::*;
