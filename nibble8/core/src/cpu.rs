//! Fetch-decode-execute engine.
//!
//! The engine owns the register file, zero flag, program counter and stack
//! pointer, and borrows main memory and the block store for its lifetime. The
//! call/value stack is not separate storage: it occupies memory `0x00..=0xFF`,
//! the same window a program loaded at address 0 lives in. Pushes write at `sp`
//! and then decrement it; pops increment and then read. Both wrap silently
//! within the window.

use crate::console::{Console, ConsoleError};
use crate::decode::{DecodeError, Instruction, Reg};
use crate::disk::{BlockStore, DiskError};
use crate::memory::{AccessError, Memory};
use crate::{NUM_REGISTERS, STACK_TOP};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, trace, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunState {
    Ready,
    Running,
    Halted,
    Faulted,
}

/// Why a bounded run returned without faulting.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Exit {
    Halted,
    StepLimit,
}

/// Outcome of a single [`Cpu::step`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Step {
    Continue,
    Halted,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FaultKind {
    /// A memory, store or register reference outside its bounds.
    Address,
    /// An opcode or register nibble with no defined meaning.
    Decode,
    /// The console or the block store's backing file failed.
    Io,
    /// The machine had already faulted and was not reset.
    Stopped,
}

#[derive(Debug, Error)]
pub enum FaultCause {
    #[error("memory: {0}")]
    Memory(#[from] AccessError),
    #[error("disk: {0}")]
    Disk(#[from] DiskError),
    #[error("decode: {0}")]
    Decode(#[from] DecodeError),
    #[error("console: {0}")]
    Console(#[from] ConsoleError),
    #[error("machine is faulted; reset before running")]
    Stopped,
}

/// A fatal condition that stopped the machine.
#[derive(Debug, Error)]
#[error("fault at pc 0x{pc:04X}: {cause}")]
pub struct Fault {
    /// Address of the first byte of the faulting instruction.
    pub pc: u16,
    #[source]
    pub cause: FaultCause,
}

impl Fault {
    pub fn kind(&self) -> FaultKind {
        match &self.cause {
            FaultCause::Memory(_) => FaultKind::Address,
            FaultCause::Disk(DiskError::OutOfBounds(_)) => FaultKind::Address,
            FaultCause::Disk(DiskError::Io { .. }) => FaultKind::Io,
            FaultCause::Decode(_) => FaultKind::Decode,
            FaultCause::Console(_) => FaultKind::Io,
            FaultCause::Stopped => FaultKind::Stopped,
        }
    }
}

/// Register/flag/pointer state, detached from memory and store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CpuState {
    pub regs: [u8; NUM_REGISTERS],
    pub pc: u16,
    pub sp: u8,
    pub zero: bool,
    #[serde(default)]
    pub instruction_count: u64,
}

impl Default for CpuState {
    fn default() -> Self {
        Self {
            regs: [0; NUM_REGISTERS],
            pc: 0,
            sp: STACK_TOP,
            zero: false,
            instruction_count: 0,
        }
    }
}

pub struct Cpu<'a, C: Console> {
    memory: &'a mut Memory,
    disk: &'a mut BlockStore,
    console: C,
    regs: [u8; NUM_REGISTERS],
    pc: u16,
    sp: u8,
    zero: bool,
    run_state: RunState,
    instruction_count: u64,
}

impl<'a, C: Console> Cpu<'a, C> {
    pub fn new(memory: &'a mut Memory, disk: &'a mut BlockStore, console: C) -> Self {
        let power_on = CpuState::default();
        Self {
            memory,
            disk,
            console,
            regs: power_on.regs,
            pc: power_on.pc,
            sp: power_on.sp,
            zero: power_on.zero,
            run_state: RunState::Ready,
            instruction_count: 0,
        }
    }

    pub fn pc(&self) -> u16 {
        self.pc
    }

    pub fn set_pc(&mut self, pc: u16) {
        self.pc = pc;
    }

    pub fn sp(&self) -> u8 {
        self.sp
    }

    pub fn reg(&self, reg: Reg) -> u8 {
        self.regs[reg.index()]
    }

    pub fn set_reg(&mut self, reg: Reg, value: u8) {
        self.regs[reg.index()] = value;
    }

    pub fn regs(&self) -> [u8; NUM_REGISTERS] {
        self.regs
    }

    pub fn zero_flag(&self) -> bool {
        self.zero
    }

    pub fn run_state(&self) -> RunState {
        self.run_state
    }

    pub fn instruction_count(&self) -> u64 {
        self.instruction_count
    }

    pub fn memory(&self) -> &Memory {
        &*self.memory
    }

    pub fn memory_mut(&mut self) -> &mut Memory {
        &mut *self.memory
    }

    pub fn console(&self) -> &C {
        &self.console
    }

    pub fn into_console(self) -> C {
        self.console
    }

    pub fn state(&self) -> CpuState {
        CpuState {
            regs: self.regs,
            pc: self.pc,
            sp: self.sp,
            zero: self.zero,
            instruction_count: self.instruction_count,
        }
    }

    /// Load register/flag/pointer state. The machine becomes `Ready`.
    pub fn restore(&mut self, state: &CpuState) {
        self.regs = state.regs;
        self.pc = state.pc;
        self.sp = state.sp;
        self.zero = state.zero;
        self.instruction_count = state.instruction_count;
        self.run_state = RunState::Ready;
    }

    /// Return to power-on state. Memory and the block store are untouched.
    pub fn reset(&mut self) {
        self.restore(&CpuState::default());
    }

    /// Run until HALT or a fault.
    pub fn run(&mut self) -> Result<Exit, Fault> {
        self.run_bounded(None)
    }

    /// Run until HALT, a fault, or `max_steps` instructions have executed.
    ///
    /// Hitting the limit leaves the machine `Ready` to be resumed.
    pub fn run_for(&mut self, max_steps: u64) -> Result<Exit, Fault> {
        self.run_bounded(Some(max_steps))
    }

    fn run_bounded(&mut self, limit: Option<u64>) -> Result<Exit, Fault> {
        match self.run_state {
            RunState::Halted => return Ok(Exit::Halted),
            RunState::Faulted => return Err(self.stopped()),
            RunState::Ready | RunState::Running => {}
        }
        debug!(pc = self.pc, sp = self.sp, ?limit, "run start");
        self.run_state = RunState::Running;
        let mut executed = 0u64;
        loop {
            if limit.is_some_and(|max| executed >= max) {
                self.run_state = RunState::Ready;
                debug!(pc = self.pc, executed, "step limit reached");
                return Ok(Exit::StepLimit);
            }
            match self.step()? {
                Step::Continue => executed += 1,
                Step::Halted => {
                    debug!(pc = self.pc, count = self.instruction_count, "halted");
                    return Ok(Exit::Halted);
                }
            }
        }
    }

    /// Fetch, decode and execute one instruction.
    ///
    /// The machine is `Running` afterwards unless it halted or faulted.
    pub fn step(&mut self) -> Result<Step, Fault> {
        match self.run_state {
            RunState::Halted => return Ok(Step::Halted),
            RunState::Faulted => return Err(self.stopped()),
            RunState::Ready | RunState::Running => {}
        }
        self.run_state = RunState::Running;
        let pc = self.pc;
        let result = Instruction::decode(|| self.fetch()).and_then(|instr| {
            trace!(pc, %instr, "exec");
            self.execute(instr)
        });
        match result {
            Ok(step) => {
                self.instruction_count = self.instruction_count.wrapping_add(1);
                if step == Step::Halted {
                    self.run_state = RunState::Halted;
                }
                Ok(step)
            }
            Err(cause) => {
                self.run_state = RunState::Faulted;
                let fault = Fault { pc, cause };
                warn!(pc, kind = ?fault.kind(), error = %fault.cause, "machine faulted");
                Err(fault)
            }
        }
    }

    fn stopped(&self) -> Fault {
        Fault {
            pc: self.pc,
            cause: FaultCause::Stopped,
        }
    }

    fn fetch(&mut self) -> Result<u8, FaultCause> {
        let byte = self.memory.read(self.pc as usize)?;
        self.pc = self.pc.wrapping_add(1);
        Ok(byte)
    }

    fn push(&mut self, value: u8) -> Result<(), FaultCause> {
        self.memory.write(self.sp as usize, value)?;
        self.sp = self.sp.wrapping_sub(1);
        Ok(())
    }

    fn pop(&mut self) -> Result<u8, FaultCause> {
        self.sp = self.sp.wrapping_add(1);
        Ok(self.memory.read(self.sp as usize)?)
    }

    /// Write a value-producing result and derive the zero flag from it.
    fn set_result(&mut self, reg: Reg, value: u8) {
        self.regs[reg.index()] = value;
        self.zero = value == 0;
    }

    fn execute(&mut self, instr: Instruction) -> Result<Step, FaultCause> {
        match instr {
            Instruction::Nop => {}
            Instruction::Load { dst, imm } => self.set_result(dst, imm),
            Instruction::Store { src, addr } => {
                self.memory.write(addr as usize, self.reg(src))?;
            }
            Instruction::Add { dst, src } => {
                let value = self.reg(dst).wrapping_add(self.reg(src));
                self.set_result(dst, value);
            }
            Instruction::Sub { dst, src } => {
                let value = self.reg(dst).wrapping_sub(self.reg(src));
                self.set_result(dst, value);
            }
            Instruction::Jmp(addr) => self.pc = addr,
            Instruction::Jz(addr) => {
                if self.zero {
                    self.pc = addr;
                }
            }
            Instruction::Call(addr) => {
                let [low, high] = self.pc.to_le_bytes();
                self.push(high)?;
                self.push(low)?;
                self.pc = addr;
            }
            Instruction::Ret => {
                let low = self.pop()?;
                let high = self.pop()?;
                self.pc = u16::from_le_bytes([low, high]);
            }
            Instruction::In(reg) => {
                let value = self.console.read_value(reg)?;
                self.set_result(reg, (value & 0xFF) as u8);
            }
            Instruction::Out(reg) => {
                let value = self.reg(reg);
                self.console.write_value(reg, value)?;
            }
            Instruction::DiskRead { dst, addr } => {
                let value = self.disk.read(addr as usize)?;
                self.set_result(dst, value);
            }
            Instruction::DiskWrite { src, addr } => {
                let value = self.reg(src);
                self.disk.write(addr as usize, value)?;
            }
            Instruction::Halt => return Ok(Step::Halted),
        }
        Ok(Step::Continue)
    }
}
