//! Instruction encoding for the nibble8 machine.
//!
//! Every instruction starts with one byte: the high nibble selects the
//! [`Opcode`], the low nibble is the operand (a register index for every opcode
//! that names a register). Immediates, 8-bit addresses and the `Rm` register
//! of ADD/SUB follow as one extra byte; 16-bit addresses follow as two bytes,
//! low byte first.

use crate::NUM_REGISTERS;
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum DecodeError {
    #[error("undefined opcode 0x{0:X}")]
    UndefinedOpcode(u8),
    #[error("register index {0} out of range (R0-R3)")]
    InvalidRegister(u8),
}

/// The sixteen values of the opcode nibble.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Opcode {
    Nop,
    Load,
    Store,
    Add,
    Sub,
    Jmp,
    Jz,
    Call,
    Ret,
    In,
    Out,
    DiskRead,
    DiskWrite,
    ReservedD,
    ReservedE,
    Halt,
}

impl Opcode {
    pub const ALL: [Opcode; 16] = [
        Opcode::Nop,
        Opcode::Load,
        Opcode::Store,
        Opcode::Add,
        Opcode::Sub,
        Opcode::Jmp,
        Opcode::Jz,
        Opcode::Call,
        Opcode::Ret,
        Opcode::In,
        Opcode::Out,
        Opcode::DiskRead,
        Opcode::DiskWrite,
        Opcode::ReservedD,
        Opcode::ReservedE,
        Opcode::Halt,
    ];

    /// Map the high nibble of an instruction byte. Only the low four bits of
    /// `nibble` are used.
    pub fn from_nibble(nibble: u8) -> Self {
        Self::ALL[(nibble & 0x0F) as usize]
    }

    pub fn from_byte(byte: u8) -> Self {
        Self::from_nibble(byte >> 4)
    }

    pub fn code(self) -> u8 {
        self as u8
    }

    pub fn mnemonic(self) -> &'static str {
        match self {
            Opcode::Nop => "NOP",
            Opcode::Load => "LOAD",
            Opcode::Store => "STORE",
            Opcode::Add => "ADD",
            Opcode::Sub => "SUB",
            Opcode::Jmp => "JMP",
            Opcode::Jz => "JZ",
            Opcode::Call => "CALL",
            Opcode::Ret => "RET",
            Opcode::In => "IN",
            Opcode::Out => "OUT",
            Opcode::DiskRead => "DISK_READ",
            Opcode::DiskWrite => "DISK_WRITE",
            Opcode::ReservedD | Opcode::ReservedE => "???",
            Opcode::Halt => "HALT",
        }
    }

    /// Operand bytes that follow the instruction byte.
    pub fn operand_len(self) -> u8 {
        match self {
            Opcode::Load | Opcode::Store | Opcode::Add | Opcode::Sub => 1,
            Opcode::Jmp | Opcode::Jz | Opcode::Call | Opcode::DiskRead | Opcode::DiskWrite => 2,
            _ => 0,
        }
    }

    pub fn is_defined(self) -> bool {
        !matches!(self, Opcode::ReservedD | Opcode::ReservedE)
    }
}

/// A register index known to be within the register file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Reg(u8);

impl Reg {
    pub const R0: Reg = Reg(0);
    pub const R1: Reg = Reg(1);
    pub const R2: Reg = Reg(2);
    pub const R3: Reg = Reg(3);

    pub fn new(index: u8) -> Option<Self> {
        ((index as usize) < NUM_REGISTERS).then_some(Reg(index))
    }

    pub fn index(self) -> usize {
        self.0 as usize
    }

    fn decode(index: u8) -> Result<Self, DecodeError> {
        Self::new(index).ok_or(DecodeError::InvalidRegister(index))
    }
}

impl fmt::Display for Reg {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "R{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Instruction {
    Nop,
    Load { dst: Reg, imm: u8 },
    Store { src: Reg, addr: u8 },
    Add { dst: Reg, src: Reg },
    Sub { dst: Reg, src: Reg },
    Jmp(u16),
    Jz(u16),
    Call(u16),
    Ret,
    In(Reg),
    Out(Reg),
    DiskRead { dst: Reg, addr: u16 },
    DiskWrite { src: Reg, addr: u16 },
    Halt,
}

impl Instruction {
    /// Decode one instruction, pulling bytes from `next` as they are needed.
    ///
    /// The operand nibble is validated before any operand byte is fetched; the
    /// `Rm` byte of ADD/SUB is validated after it is fetched.
    pub fn decode<E, F>(mut next: F) -> Result<Self, E>
    where
        F: FnMut() -> Result<u8, E>,
        E: From<DecodeError>,
    {
        let byte = next()?;
        let opcode = Opcode::from_byte(byte);
        let operand = byte & 0x0F;
        let instr = match opcode {
            Opcode::Nop => Instruction::Nop,
            Opcode::Load => {
                let dst = Reg::decode(operand)?;
                Instruction::Load { dst, imm: next()? }
            }
            Opcode::Store => {
                let src = Reg::decode(operand)?;
                Instruction::Store { src, addr: next()? }
            }
            Opcode::Add => {
                let dst = Reg::decode(operand)?;
                let src = Reg::decode(next()?)?;
                Instruction::Add { dst, src }
            }
            Opcode::Sub => {
                let dst = Reg::decode(operand)?;
                let src = Reg::decode(next()?)?;
                Instruction::Sub { dst, src }
            }
            Opcode::Jmp => Instruction::Jmp(read_addr16(&mut next)?),
            Opcode::Jz => Instruction::Jz(read_addr16(&mut next)?),
            Opcode::Call => Instruction::Call(read_addr16(&mut next)?),
            Opcode::Ret => Instruction::Ret,
            Opcode::In => Instruction::In(Reg::decode(operand)?),
            Opcode::Out => Instruction::Out(Reg::decode(operand)?),
            Opcode::DiskRead => {
                let dst = Reg::decode(operand)?;
                Instruction::DiskRead {
                    dst,
                    addr: read_addr16(&mut next)?,
                }
            }
            Opcode::DiskWrite => {
                let src = Reg::decode(operand)?;
                Instruction::DiskWrite {
                    src,
                    addr: read_addr16(&mut next)?,
                }
            }
            Opcode::ReservedD | Opcode::ReservedE => {
                return Err(DecodeError::UndefinedOpcode(opcode.code()).into())
            }
            Opcode::Halt => Instruction::Halt,
        };
        Ok(instr)
    }

    pub fn opcode(&self) -> Opcode {
        match self {
            Instruction::Nop => Opcode::Nop,
            Instruction::Load { .. } => Opcode::Load,
            Instruction::Store { .. } => Opcode::Store,
            Instruction::Add { .. } => Opcode::Add,
            Instruction::Sub { .. } => Opcode::Sub,
            Instruction::Jmp(_) => Opcode::Jmp,
            Instruction::Jz(_) => Opcode::Jz,
            Instruction::Call(_) => Opcode::Call,
            Instruction::Ret => Opcode::Ret,
            Instruction::In(_) => Opcode::In,
            Instruction::Out(_) => Opcode::Out,
            Instruction::DiskRead { .. } => Opcode::DiskRead,
            Instruction::DiskWrite { .. } => Opcode::DiskWrite,
            Instruction::Halt => Opcode::Halt,
        }
    }

    /// Encoded length in bytes.
    pub fn len(&self) -> usize {
        1 + self.opcode().operand_len() as usize
    }

    pub fn is_empty(&self) -> bool {
        false
    }

    pub fn encode(&self) -> Vec<u8> {
        let op = self.opcode().code() << 4;
        let lo_hi = |addr: u16| [(addr & 0xFF) as u8, (addr >> 8) as u8];
        match *self {
            Instruction::Nop | Instruction::Ret | Instruction::Halt => vec![op],
            Instruction::Load { dst, imm } => vec![op | dst.0, imm],
            Instruction::Store { src, addr } => vec![op | src.0, addr],
            Instruction::Add { dst, src } | Instruction::Sub { dst, src } => {
                vec![op | dst.0, src.0]
            }
            Instruction::Jmp(addr) | Instruction::Jz(addr) | Instruction::Call(addr) => {
                let [lo, hi] = lo_hi(addr);
                vec![op, lo, hi]
            }
            Instruction::In(reg) | Instruction::Out(reg) => vec![op | reg.0],
            Instruction::DiskRead { dst: reg, addr } | Instruction::DiskWrite { src: reg, addr } => {
                let [lo, hi] = lo_hi(addr);
                vec![op | reg.0, lo, hi]
            }
        }
    }
}

fn read_addr16<E, F>(next: &mut F) -> Result<u16, E>
where
    F: FnMut() -> Result<u8, E>,
{
    let low = next()?;
    let high = next()?;
    Ok(((high as u16) << 8) | low as u16)
}

impl fmt::Display for Instruction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let m = self.opcode().mnemonic();
        match self {
            Instruction::Nop | Instruction::Ret | Instruction::Halt => write!(f, "{m}"),
            Instruction::Load { dst, imm } => write!(f, "{m} {dst}, 0x{imm:02X}"),
            Instruction::Store { src, addr } => write!(f, "{m} {src}, [0x{addr:02X}]"),
            Instruction::Add { dst, src } | Instruction::Sub { dst, src } => {
                write!(f, "{m} {dst}, {src}")
            }
            Instruction::Jmp(addr) | Instruction::Jz(addr) | Instruction::Call(addr) => {
                write!(f, "{m} 0x{addr:04X}")
            }
            Instruction::In(reg) | Instruction::Out(reg) => write!(f, "{m} {reg}"),
            Instruction::DiskRead { dst: reg, addr } | Instruction::DiskWrite { src: reg, addr } => {
                write!(f, "{m} {reg}, [0x{addr:04X}]")
            }
        }
    }
}

/// One line of a disassembly listing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ListingLine {
    pub addr: u16,
    pub bytes: Vec<u8>,
    pub text: String,
}

impl fmt::Display for ListingLine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let hex = self
            .bytes
            .iter()
            .map(|byte| format!("{byte:02X}"))
            .collect::<Vec<_>>()
            .join(" ");
        write!(f, "{:04X}  {:<9} {}", self.addr, hex, self.text)
    }
}

enum ListingError {
    Decode,
    Truncated,
}

impl From<DecodeError> for ListingError {
    fn from(_: DecodeError) -> Self {
        ListingError::Decode
    }
}

/// Linear-sweep disassembly of `bytes`, assumed to be loaded at `origin`.
///
/// Bytes that do not decode (undefined opcodes, bad register indices,
/// truncated operands) are emitted as `.byte` lines one at a time.
pub fn disassemble(bytes: &[u8], origin: u16) -> Vec<ListingLine> {
    let mut lines = Vec::new();
    let mut offset = 0usize;
    while offset < bytes.len() {
        let addr = origin.wrapping_add(offset as u16);
        let mut cursor = offset;
        let decoded = Instruction::decode(|| {
            let byte = bytes.get(cursor).copied().ok_or(ListingError::Truncated)?;
            cursor += 1;
            Ok::<u8, ListingError>(byte)
        });
        match decoded {
            Ok(instr) => {
                lines.push(ListingLine {
                    addr,
                    bytes: bytes[offset..cursor].to_vec(),
                    text: instr.to_string(),
                });
                offset = cursor;
            }
            Err(ListingError::Decode) | Err(ListingError::Truncated) => {
                lines.push(ListingLine {
                    addr,
                    bytes: vec![bytes[offset]],
                    text: format!(".byte 0x{:02X}", bytes[offset]),
                });
                offset += 1;
            }
        }
    }
    lines
}
