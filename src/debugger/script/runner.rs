//! Executes validated command sequences against an internally owned vCPU.
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use log::{debug, info};
use parking_lot::{Condvar, Mutex};

use super::{validate, Command};
use crate::debugger::DebuggerControl;
use crate::error::MalbolgeError;
use crate::gate::Gate;
use crate::memory::VirtualMemory;
use crate::signal::{Connection, Signal};
use crate::ternary::Ternary;
use crate::vcpu::{Breakpoint, ExecutionState, Register, RegisterData, StateChange, VirtualCpu};

/// Result of an `address_value` command.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AddressQuery {
    pub address: Ternary,
    pub value: Ternary,
}

/// Result of a `register_value` command.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RegisterQuery {
    pub register: Register,
    pub data: RegisterData,
}

/// Coordination between the runner, the breakpoint callbacks and the
/// optional runtime-bound timer.
#[derive(Default)]
struct TimerFlags {
    breakpoint_hit: bool,
    exited: bool,
}

struct TimerState {
    flags: Mutex<TimerFlags>,
    cv: Condvar,
}

/// Runs debugger scripts.
///
/// The vCPU lives only for the duration of a [`run`](ScriptRunner::run)
/// call, so a runner instance can be reused. Query results and program
/// output are delivered through signals.
pub struct ScriptRunner {
    output_signal: Signal<u8>,
    address_signal: Signal<AddressQuery>,
    register_signal: Signal<RegisterQuery>,
}

impl ScriptRunner {
    pub fn new() -> Self {
        Self {
            output_signal: Signal::new(),
            address_signal: Signal::new(),
            register_signal: Signal::new(),
        }
    }

    /// Connects to the program output relayed from the vCPU.
    pub fn register_for_output_signal<F>(&self, slot: F) -> Connection<u8>
    where
        F: Fn(&u8) + Send + Sync + 'static,
    {
        self.output_signal.connect(slot)
    }

    /// Connects to the `address_value` results.
    pub fn register_for_address_value_signal<F>(&self, slot: F) -> Connection<AddressQuery>
    where
        F: Fn(&AddressQuery) + Send + Sync + 'static,
    {
        self.address_signal.connect(slot)
    }

    /// Connects to the `register_value` results.
    pub fn register_for_register_value_signal<F>(&self, slot: F) -> Connection<RegisterQuery>
    where
        F: Fn(&RegisterQuery) + Send + Sync + 'static,
    {
        self.register_signal.connect(slot)
    }

    /// Validates and executes `commands` against `vmem`. Blocks until the
    /// program has finished; an execution failure is re-raised here after
    /// the vCPU thread has been joined.
    pub fn run(&self, vmem: VirtualMemory, commands: &[Command]) -> Result<(), MalbolgeError> {
        validate(commands)?;

        let vcpu = VirtualCpu::new(vmem);
        let debugger = DebuggerControl::new(&vcpu);

        let output = self.output_signal.clone();
        let _output_connection =
            vcpu.register_for_output_signal(move |byte: &u8| output.emit(byte));

        // Commands after run() wait at this gate until a breakpoint pauses
        // the program, or it exits.
        let pace = Arc::new(Gate::new());
        let exited = Arc::new(AtomicBool::new(false));
        let timer = Arc::new(TimerState {
            flags: Mutex::new(TimerFlags::default()),
            cv: Condvar::new(),
        });

        let _breakpoint_connection = vcpu.register_for_breakpoint_hit_signal({
            let pace = Arc::clone(&pace);
            let timer = Arc::clone(&timer);
            move |_: &Ternary| {
                {
                    let mut flags = timer.flags.lock();
                    flags.breakpoint_hit = true;
                    timer.cv.notify_all();
                }
                pace.open();
            }
        });
        let _state_connection = vcpu.register_for_state_signal({
            let pace = Arc::clone(&pace);
            let exited = Arc::clone(&exited);
            let timer = Arc::clone(&timer);
            move |change: &StateChange| {
                if change.state == ExecutionState::Stopped {
                    exited.store(true, Ordering::SeqCst);
                    {
                        let mut flags = timer.flags.lock();
                        flags.exited = true;
                        timer.cv.notify_all();
                    }
                    pace.open();
                }
            }
        });

        let mut timer_thread: Option<JoinHandle<()>> = None;

        for command in commands {
            if exited.load(Ordering::SeqCst) {
                break;
            }
            debug!("script command: {}", command);

            match command {
                Command::AddBreakpoint {
                    address,
                    ignore_count,
                } => {
                    pace.pass();
                    if exited.load(Ordering::SeqCst) {
                        continue;
                    }
                    debugger.add_breakpoint(Breakpoint::new(*address).ignore(*ignore_count));
                }
                Command::RemoveBreakpoint { address } => {
                    pace.pass();
                    if exited.load(Ordering::SeqCst) {
                        continue;
                    }
                    debugger.remove_breakpoint(*address);
                }
                Command::Run { max_runtime_ms } => {
                    pace.close();

                    if *max_runtime_ms > 0 {
                        let handle = vcpu.handle();
                        let timer = Arc::clone(&timer);
                        let bound = Duration::from_millis(u64::from(*max_runtime_ms));
                        timer_thread = Some(thread::spawn(move || {
                            let start = Instant::now();
                            let mut flags = timer.flags.lock();
                            while !flags.breakpoint_hit && !flags.exited {
                                let elapsed = start.elapsed();
                                if elapsed >= bound {
                                    break;
                                }
                                let _ = timer.cv.wait_for(&mut flags, bound - elapsed);
                            }
                            let fired = !flags.breakpoint_hit;
                            drop(flags);
                            if fired {
                                debug!("maximum runtime reached, stopping");
                                handle.stop();
                            }
                        }));
                    }

                    vcpu.run()?;
                }
                Command::AddressValue { address } => {
                    pace.pass();
                    if exited.load(Ordering::SeqCst) {
                        continue;
                    }
                    let value = debugger.address_value(*address)?;
                    info!("[DBGR]: {} = {}", command, value);
                    self.address_signal.emit(&AddressQuery {
                        address: *address,
                        value,
                    });
                }
                Command::RegisterValue { register } => {
                    pace.pass();
                    if exited.load(Ordering::SeqCst) {
                        continue;
                    }
                    let data = debugger.register_value(*register)?;
                    info!("[DBGR]: {} = {}", command, data);
                    self.register_signal.emit(&RegisterQuery {
                        register: *register,
                        data,
                    });
                }
                Command::Step => {
                    pace.pass();
                    if exited.load(Ordering::SeqCst) {
                        continue;
                    }
                    // park, step, and wait for the park that follows the
                    // stepped instruction
                    vcpu.wait_for_pause();
                    if exited.load(Ordering::SeqCst) {
                        continue;
                    }
                    let epoch = vcpu.pause_epoch();
                    debugger.step()?;
                    vcpu.wait_for_pause_after(epoch);
                }
                Command::Resume => {
                    pace.close();
                    debugger.resume()?;
                }
                Command::Stop => {
                    vcpu.stop();
                }
                Command::OnInput { data } => {
                    vcpu.add_input(data.as_bytes());
                }
            }
        }

        // do not return until the program has finished
        let error = vcpu.wait();
        if let Some(handle) = timer_thread {
            let _ = handle.join();
        }

        match error {
            Some(error) => Err(error),
            None => Ok(()),
        }
    }
}

impl Default for ScriptRunner {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::debugger::script::parse;
    use crate::error::ScriptInvalidError;
    use crate::loader::{self, LoadMode};
    use crate::vcpu::tests::{ECHO, HELLO_WORLD};

    fn load(source: &str) -> VirtualMemory {
        loader::load_str(source, LoadMode::Auto).unwrap()
    }

    #[test]
    fn rejects_invalid_sequences_before_any_activity() {
        let runner = ScriptRunner::new();
        let result = runner.run(load(HELLO_WORLD), &[Command::Step, Command::Run {
            max_runtime_ms: 0,
        }]);
        assert_eq!(
            result,
            Err(MalbolgeError::ScriptInvalid(
                ScriptInvalidError::StepOrResumeBeforeRun
            ))
        );
    }

    #[test]
    fn runs_to_completion_and_relays_output() {
        let runner = ScriptRunner::new();
        let output = Arc::new(Mutex::new(Vec::new()));
        let _c = runner.register_for_output_signal({
            let output = Arc::clone(&output);
            move |byte: &u8| output.lock().push(*byte)
        });

        runner
            .run(load(HELLO_WORLD), &[Command::Run { max_runtime_ms: 0 }])
            .unwrap();

        assert_eq!(String::from_utf8(output.lock().clone()).unwrap(), "Hello World!");
    }

    #[test]
    fn timeout_is_a_clean_stop() {
        // the echo program waits for input forever once the queue is dry
        let runner = ScriptRunner::new();
        let commands = parse("on_input(data=\"hi\"); run(max_runtime_ms=100);").unwrap();

        let start = Instant::now();
        let result = runner.run(load(ECHO), &commands);
        let elapsed = start.elapsed();

        assert_eq!(result, Ok(()));
        assert!(elapsed >= Duration::from_millis(50), "{:?}", elapsed);
        assert!(elapsed < Duration::from_millis(2000), "{:?}", elapsed);
    }

    #[test]
    fn breakpoint_queries_fire_signals() {
        let runner = ScriptRunner::new();

        let addresses = Arc::new(Mutex::new(Vec::new()));
        let registers = Arc::new(Mutex::new(Vec::new()));
        let _a = runner.register_for_address_value_signal({
            let addresses = Arc::clone(&addresses);
            move |query: &AddressQuery| addresses.lock().push(*query)
        });
        let _r = runner.register_for_register_value_signal({
            let registers = Arc::clone(&registers);
            move |query: &RegisterQuery| registers.lock().push(*query)
        });

        let commands = parse(
            "add_breakpoint(address=9);\n\
             run();\n\
             address_value(address=9);\n\
             register_value(reg=C);\n\
             register_value(reg=A);\n\
             resume();",
        )
        .unwrap();
        runner.run(load(HELLO_WORLD), &commands).unwrap();

        assert_eq!(
            *addresses.lock(),
            vec![AddressQuery {
                address: Ternary::new(9),
                value: Ternary::new(125),
            }]
        );
        assert_eq!(
            *registers.lock(),
            vec![
                RegisterQuery {
                    register: Register::C,
                    data: RegisterData::with_address(Ternary::new(9), Ternary::new(125)),
                },
                RegisterQuery {
                    register: Register::A,
                    data: RegisterData::value_only(Ternary::new(72)),
                },
            ]
        );
    }

    #[test]
    fn step_advances_one_instruction() {
        let runner = ScriptRunner::new();

        let addresses = Arc::new(Mutex::new(Vec::new()));
        let _a = runner.register_for_address_value_signal({
            let addresses = Arc::clone(&addresses);
            move |query: &AddressQuery| addresses.lock().push(*query)
        });

        let commands = parse(
            "add_breakpoint(address=9);\n\
             run();\n\
             address_value(address=9);\n\
             step();\n\
             address_value(address=10);\n\
             resume();",
        )
        .unwrap();
        runner.run(load(HELLO_WORLD), &commands).unwrap();

        assert_eq!(
            *addresses.lock(),
            vec![
                AddressQuery {
                    address: Ternary::new(9),
                    value: Ternary::new(125),
                },
                AddressQuery {
                    address: Ternary::new(10),
                    value: Ternary::new(124),
                },
            ]
        );
    }

    #[test]
    fn stop_command_ends_the_program() {
        let runner = ScriptRunner::new();
        let commands = parse(
            "add_breakpoint(address=9);\n\
             run();\n\
             stop();",
        )
        .unwrap();
        assert_eq!(runner.run(load(HELLO_WORLD), &commands), Ok(()));
    }
}
