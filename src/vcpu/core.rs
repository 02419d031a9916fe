use std::collections::VecDeque;
use std::convert::TryFrom;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::thread::{self, JoinHandle};

use hashbrown::HashMap;
use log::{debug, trace};
use parking_lot::{Condvar, Mutex, MutexGuard};

use super::{Breakpoint, ExecutionState, Register, RegisterData, StateChange};
use crate::definitions::io;
use crate::error::{ExecutionError, MalbolgeError};
use crate::gate::Gate;
use crate::instruction::{self, Instruction};
use crate::memory::{Cursor, VirtualMemory};
use crate::signal::{Connection, Signal};
use crate::ternary::Ternary;

/// Register and memory state, only ever touched with the machine lock held.
struct Machine {
    vmem: VirtualMemory,
    a: Ternary,
    c: Cursor,
    d: Cursor,
    step: usize,
    reading_stream: bool,
}

/// Pause bookkeeping, updated by the gate notifier. The epoch increments on
/// every park, letting a controller distinguish "still parked from before"
/// from "parked again after my step".
#[derive(Default)]
struct PauseFlag {
    paused: bool,
    epoch: u64,
}

/// State shared between the owning handle, the execution thread and any
/// control threads.
struct Shared {
    machine: Mutex<Machine>,
    state: Mutex<ExecutionState>,
    stop_requested: AtomicBool,
    gate: Gate,
    paused: Mutex<PauseFlag>,
    paused_cv: Condvar,
    input: Mutex<VecDeque<u8>>,
    breakpoints: Mutex<HashMap<u32, Breakpoint>>,
    error: Mutex<Option<MalbolgeError>>,
    state_signal: Signal<StateChange>,
    output_signal: Signal<u8>,
    breakpoint_signal: Signal<Ternary>,
    input_signal: Signal<()>,
}

/// A virtual CPU owning one memory image and one execution thread.
///
/// All control methods take `&self`; the instance can be shared behind a
/// reference between a debugger and its caller. Dropping the vCPU stops the
/// program and joins the thread.
pub struct VirtualCpu {
    shared: Arc<Shared>,
    thread: Mutex<Option<JoinHandle<()>>>,
}

impl VirtualCpu {
    /// Takes ownership of an initialised memory image.
    pub fn new(vmem: VirtualMemory) -> Self {
        let machine = Machine {
            vmem,
            a: Ternary::default(),
            c: Cursor::default(),
            d: Cursor::default(),
            step: 0,
            reading_stream: false,
        };

        Self {
            shared: Arc::new(Shared {
                machine: Mutex::new(machine),
                state: Mutex::new(ExecutionState::Ready),
                stop_requested: AtomicBool::new(false),
                gate: Gate::new(),
                paused: Mutex::new(PauseFlag::default()),
                paused_cv: Condvar::new(),
                input: Mutex::new(VecDeque::new()),
                breakpoints: Mutex::new(HashMap::new()),
                error: Mutex::new(None),
                state_signal: Signal::new(),
                output_signal: Signal::new(),
                breakpoint_signal: Signal::new(),
                input_signal: Signal::new(),
            }),
            thread: Mutex::new(None),
        }
    }

    /// The current execution state.
    pub fn state(&self) -> ExecutionState {
        *self.shared.state.lock()
    }

    /// True while the execution thread is parked at the pause gate.
    pub fn is_paused(&self) -> bool {
        self.shared.paused.lock().paused
    }

    /// Spawns the execution thread. The program must not have run yet.
    pub fn run(&self) -> Result<(), MalbolgeError> {
        {
            let mut state = self.shared.state.lock();
            if *state != ExecutionState::Ready {
                return Err(ExecutionError::WrongState {
                    actual: state.name(),
                }
                .into());
            }
            *state = ExecutionState::Running;
        }

        debug!("starting program");
        self.shared.state_signal.emit(&StateChange {
            state: ExecutionState::Running,
            error: None,
        });

        let shared = Arc::clone(&self.shared);
        let handle = thread::spawn(move || {
            trace!("program thread started");

            let error = exec_loop(&shared).err();
            {
                *shared.state.lock() = ExecutionState::Stopped;
            }
            *shared.error.lock() = error.clone();
            // wake anything blocked on a pause that will now never come
            set_paused(&shared, false);
            shared.state_signal.emit(&StateChange {
                state: ExecutionState::Stopped,
                error,
            });

            debug!("program thread exiting");
        });
        *self.thread.lock() = Some(handle);

        Ok(())
    }

    /// Requests a cooperative pause at the next cycle. Only valid while
    /// running.
    pub fn pause(&self) -> Result<(), MalbolgeError> {
        let state = self.state();
        if state != ExecutionState::Running {
            return Err(ExecutionError::WrongState {
                actual: state.name(),
            }
            .into());
        }

        self.shared.gate.close();
        Ok(())
    }

    /// Executes exactly one instruction cycle and re-pauses. Only valid
    /// while paused.
    pub fn step(&self) -> Result<(), MalbolgeError> {
        let state = self.state();
        if state != ExecutionState::Running || !self.is_paused() {
            return Err(ExecutionError::WrongState {
                actual: state.name(),
            }
            .into());
        }

        self.shared.gate.open_for(1);
        Ok(())
    }

    /// Releases a paused program. No-op otherwise.
    pub fn resume(&self) {
        self.shared.gate.open();
    }

    /// Requests termination. Idempotent, never blocks; the STOPPED state
    /// arrives through the state signal.
    pub fn stop(&self) {
        stop(&self.shared);
    }

    /// A handle for feeding input or stopping the vCPU from other threads.
    pub fn handle(&self) -> VcpuHandle {
        VcpuHandle {
            shared: Arc::downgrade(&self.shared),
        }
    }

    /// Appends bytes to the input queue; they become visible to the next
    /// poll of a waiting read instruction.
    pub fn add_input(&self, bytes: &[u8]) {
        self.shared.input.lock().extend(bytes.iter().copied());
    }

    /// Insert-or-replace a breakpoint with the default pause callback.
    pub fn add_breakpoint(&self, address: Ternary, ignore_count: u32) {
        self.insert_breakpoint(Breakpoint::new(address).ignore(ignore_count));
    }

    /// Insert-or-replace a breakpoint, keeping its own callback.
    pub fn insert_breakpoint(&self, breakpoint: Breakpoint) {
        self.shared
            .breakpoints
            .lock()
            .insert(breakpoint.address().value(), breakpoint);
    }

    /// Removes the breakpoint at `address`, reporting whether one existed.
    pub fn remove_breakpoint(&self, address: Ternary) -> bool {
        self.shared
            .breakpoints
            .lock()
            .remove(&address.value())
            .is_some()
    }

    /// The value in memory at `address`. Only valid while the machine is
    /// quiescent: paused, not yet started, or stopped.
    pub fn address_value(&self, address: Ternary) -> Result<Ternary, MalbolgeError> {
        self.ensure_quiescent()?;
        let machine = self.shared.machine.lock();
        Ok(machine.vmem.get(address))
    }

    /// The value (and for C and D the address) held by `register`. Same
    /// precondition as [`address_value`](VirtualCpu::address_value).
    pub fn register_value(&self, register: Register) -> Result<RegisterData, MalbolgeError> {
        self.ensure_quiescent()?;
        let machine = self.shared.machine.lock();
        Ok(match register {
            Register::A => RegisterData::value_only(machine.a),
            Register::C => RegisterData::with_address(machine.c.address(), machine.vmem[machine.c]),
            Register::D => RegisterData::with_address(machine.d.address(), machine.vmem[machine.d]),
        })
    }

    /// Connects to the state signal, fired on every state transition.
    pub fn register_for_state_signal<F>(&self, slot: F) -> Connection<StateChange>
    where
        F: Fn(&StateChange) + Send + Sync + 'static,
    {
        self.shared.state_signal.connect(slot)
    }

    /// Connects to the output signal, fired for every written byte.
    pub fn register_for_output_signal<F>(&self, slot: F) -> Connection<u8>
    where
        F: Fn(&u8) + Send + Sync + 'static,
    {
        self.shared.output_signal.connect(slot)
    }

    /// Connects to the breakpoint signal, fired whenever a breakpoint
    /// pauses the program.
    pub fn register_for_breakpoint_hit_signal<F>(&self, slot: F) -> Connection<Ternary>
    where
        F: Fn(&Ternary) + Send + Sync + 'static,
    {
        self.shared.breakpoint_signal.connect(slot)
    }

    /// Connects to the input signal, fired once per read instruction that
    /// has to wait for data.
    pub fn register_for_input_signal<F>(&self, slot: F) -> Connection<()>
    where
        F: Fn(&()) + Send + Sync + 'static,
    {
        self.shared.input_signal.connect(slot)
    }

    /// Blocks until the program has stopped, returning the execution error
    /// if it failed.
    pub fn wait(&self) -> Option<MalbolgeError> {
        let handle = self.thread.lock().take();
        if let Some(handle) = handle {
            let _ = handle.join();
        }
        self.shared.error.lock().clone()
    }

    /// Blocks until the execution thread parks at the pause gate, or the
    /// program exits.
    pub(crate) fn wait_for_pause(&self) {
        let mut flag = self.shared.paused.lock();
        while !flag.paused && *self.shared.state.lock() != ExecutionState::Stopped {
            self.shared.paused_cv.wait(&mut flag);
        }
    }

    /// The park counter; pair with
    /// [`wait_for_pause_after`](VirtualCpu::wait_for_pause_after) to wait
    /// for the park that follows a step.
    pub(crate) fn pause_epoch(&self) -> u64 {
        self.shared.paused.lock().epoch
    }

    /// Blocks until the execution thread parks again after `epoch`, or the
    /// program exits.
    pub(crate) fn wait_for_pause_after(&self, epoch: u64) {
        let mut flag = self.shared.paused.lock();
        while !(flag.paused && flag.epoch > epoch)
            && *self.shared.state.lock() != ExecutionState::Stopped
        {
            self.shared.paused_cv.wait(&mut flag);
        }
    }

    /// Queries are allowed while paused, and on a machine that has not
    /// started or has stopped. A pending pause request counts: the
    /// execution thread releases the machine lock before parking.
    fn ensure_quiescent(&self) -> Result<(), MalbolgeError> {
        let state = self.state();
        if state == ExecutionState::Running && !self.is_paused() && !self.shared.gate.is_closed() {
            return Err(ExecutionError::WrongState {
                actual: state.name(),
            }
            .into());
        }
        Ok(())
    }
}

impl Drop for VirtualCpu {
    fn drop(&mut self) {
        self.stop();
        if let Some(handle) = self.thread.lock().take() {
            let _ = handle.join();
        }
    }
}

/// Weak handle onto a vCPU for producer and watchdog threads. All methods
/// are silent no-ops once the vCPU has been dropped.
#[derive(Clone)]
pub struct VcpuHandle {
    shared: Weak<Shared>,
}

impl VcpuHandle {
    /// As [`VirtualCpu::add_input`].
    pub fn add_input(&self, bytes: &[u8]) {
        if let Some(shared) = self.shared.upgrade() {
            shared.input.lock().extend(bytes.iter().copied());
        }
    }

    /// As [`VirtualCpu::stop`].
    pub fn stop(&self) {
        if let Some(shared) = self.shared.upgrade() {
            stop(&shared);
        }
    }
}

fn set_paused(shared: &Shared, value: bool) {
    let mut flag = shared.paused.lock();
    flag.paused = value;
    if value {
        flag.epoch += 1;
    }
    shared.paused_cv.notify_all();
}

fn stop(shared: &Arc<Shared>) {
    debug!("stop requested");
    shared.stop_requested.store(true, Ordering::SeqCst);
    shared.gate.open();

    // a program that never ran has no thread to do the transition
    let early = {
        let mut state = shared.state.lock();
        if *state == ExecutionState::Ready {
            *state = ExecutionState::Stopped;
            true
        } else {
            false
        }
    };
    if early {
        shared.state_signal.emit(&StateChange {
            state: ExecutionState::Stopped,
            error: None,
        });
    }
}

/// Consults the breakpoint table for `cursor`, and if the hit wants a pause
/// parks the thread at the gate. Returns `None` when a stop request ended
/// the wait.
fn breakpoint_gate<'a>(
    shared: &'a Arc<Shared>,
    machine: MutexGuard<'a, Machine>,
    cursor: Cursor,
    register: Register,
) -> Option<MutexGuard<'a, Machine>> {
    let address = cursor.address();
    let pause = {
        let mut breakpoints = shared.breakpoints.lock();
        match breakpoints.get_mut(&address.value()) {
            Some(breakpoint) => breakpoint.fire(register),
            None => false,
        }
    };

    if !pause {
        return Some(machine);
    }

    debug!("breakpoint hit at address {}", address.value());
    shared.gate.close();
    drop(machine);
    shared.breakpoint_signal.emit(&address);
    shared.gate.pass_with(|closed| set_paused(shared, closed));

    if shared.stop_requested.load(Ordering::SeqCst) {
        return None;
    }
    Some(shared.machine.lock())
}

/// The read handshake: polls the input queue, distinguishing "mid-stream
/// EOF" from "first read on an empty stream". Returns `None` when a stop
/// request ended the wait.
fn read_input<'a>(
    shared: &'a Arc<Shared>,
    mut machine: MutexGuard<'a, Machine>,
) -> Option<MutexGuard<'a, Machine>> {
    let mut input_requested = false;
    loop {
        if shared.stop_requested.load(Ordering::SeqCst) {
            return None;
        }

        let queued = shared.input.lock().pop_front();
        match queued {
            Some(byte) => {
                machine.reading_stream = true;
                machine.a = Ternary::from(byte);
                return Some(machine);
            }
            None if machine.reading_stream => {
                // the queue drained mid-stream, report EOF
                machine.reading_stream = false;
                machine.a = Ternary::MAX;
                return Some(machine);
            }
            None => {
                if !input_requested {
                    // one notification per read operation that must wait
                    shared.input_signal.emit(&());
                    input_requested = true;
                }
                // release the machine while sleeping so pause-time queries
                // are not starved
                drop(machine);
                thread::sleep(io::POLL_INTERVAL);
                machine = shared.machine.lock();
            }
        }
    }
}

fn exec_loop(shared: &Arc<Shared>) -> Result<(), MalbolgeError> {
    loop {
        if shared.stop_requested.load(Ordering::SeqCst) {
            return Ok(());
        }

        shared.gate.pass_with(|closed| set_paused(shared, closed));
        if shared.stop_requested.load(Ordering::SeqCst) {
            return Ok(());
        }

        let mut machine = shared.machine.lock();

        let code = machine.c;
        machine = match breakpoint_gate(shared, machine, code, Register::C) {
            Some(machine) => machine,
            None => return Ok(()),
        };

        let raw = machine.vmem[machine.c];
        let step = machine.step;
        let ciphered =
            instruction::pre_cipher(raw.value(), machine.c.index()).ok_or(
                ExecutionError::NonGraphical {
                    value: raw.value(),
                    step,
                },
            )?;

        trace!("step: {}, pre-cipher instr: {}", step, char::from(ciphered));

        match Instruction::try_from(ciphered) {
            Ok(Instruction::SetDataPtr) => {
                let data = machine.d;
                machine = match breakpoint_gate(shared, machine, data, Register::D) {
                    Some(machine) => machine,
                    None => return Ok(()),
                };
                machine.d = Cursor::new(machine.vmem[machine.d]);
            }
            Ok(Instruction::SetCodePtr) => {
                let data = machine.d;
                machine = match breakpoint_gate(shared, machine, data, Register::D) {
                    Some(machine) => machine,
                    None => return Ok(()),
                };
                machine.c = Cursor::new(machine.vmem[machine.d]);
            }
            Ok(Instruction::Rotate) => {
                let data = machine.d;
                machine = match breakpoint_gate(shared, machine, data, Register::D) {
                    Some(machine) => machine,
                    None => return Ok(()),
                };
                let rotated = machine.vmem[machine.d].rotate(1);
                let cell = machine.d;
                machine.vmem[cell] = rotated;
                machine.a = rotated;
            }
            Ok(Instruction::Op) => {
                let data = machine.d;
                machine = match breakpoint_gate(shared, machine, data, Register::D) {
                    Some(machine) => machine,
                    None => return Ok(()),
                };
                let combined = machine.a.op(machine.vmem[machine.d]);
                let cell = machine.d;
                machine.vmem[cell] = combined;
                machine.a = combined;
            }
            Ok(Instruction::Read) => {
                machine = match read_input(shared, machine) {
                    Some(machine) => machine,
                    None => return Ok(()),
                };
            }
            Ok(Instruction::Write) => {
                // max is the EOF marker and is never emitted
                if machine.a != Ternary::MAX {
                    let byte = machine.a.value() as u8;
                    shared.output_signal.emit(&byte);
                }
            }
            Ok(Instruction::Stop) => {
                debug!("stop instruction at step {}", step);
                return Ok(());
            }
            // any other graphical character is a nop at runtime
            Ok(Instruction::Nop) | Err(()) => {}
        }

        // Write back the post-cipher of whatever cell C points at now;
        // after a jump that is the jump target, not the dispatched cell.
        let current = machine.vmem[machine.c];
        let replaced =
            instruction::post_cipher(current.value()).ok_or(ExecutionError::NonGraphical {
                value: current.value(),
                step,
            })?;
        let code = machine.c;
        machine.vmem[code] = Ternary::from(replaced);

        machine.c.advance();
        machine.d.advance();
        machine.step += 1;
    }
}
