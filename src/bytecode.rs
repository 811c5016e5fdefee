//! JVM opcodes understood by the runtime and their decoding into
//! `Instruction`s.
//!
//! See <https://en.wikipedia.org/wiki/Java_bytecode_instruction_listings>.
use std::fmt;

use crate::error::{Result, RuntimeError};

/// Supported JVM opcodes.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum OPCode {
    NOP = 0x00,
    AconstNull = 0x01,
    IconstM1 = 0x02,
    Iconst0 = 0x03,
    Iconst1 = 0x04,
    Iconst2 = 0x05,
    Iconst3 = 0x06,
    Iconst4 = 0x07,
    Iconst5 = 0x08,
    BiPush = 0x10,
    SiPush = 0x11,
    Ldc = 0x12,
    ILoad = 0x15,
    ALoad = 0x19,
    ILoad0 = 0x1a,
    ILoad1 = 0x1b,
    ILoad2 = 0x1c,
    ILoad3 = 0x1d,
    ALoad0 = 0x2a,
    ALoad1 = 0x2b,
    ALoad2 = 0x2c,
    ALoad3 = 0x2d,
    IStore = 0x36,
    AStore = 0x3a,
    IStore0 = 0x3b,
    IStore1 = 0x3c,
    IStore2 = 0x3d,
    IStore3 = 0x3e,
    AStore0 = 0x4b,
    AStore1 = 0x4c,
    AStore2 = 0x4d,
    AStore3 = 0x4e,
    Pop = 0x57,
    Dup = 0x59,
    Swap = 0x5f,
    IAdd = 0x60,
    ISub = 0x64,
    IMul = 0x68,
    IDiv = 0x6c,
    IRem = 0x70,
    INeg = 0x74,
    IInc = 0x84,
    IfEq = 0x99,
    IfNe = 0x9a,
    IfLt = 0x9b,
    IfGe = 0x9c,
    IfGt = 0x9d,
    IfLe = 0x9e,
    IfICmpEq = 0x9f,
    IfICmpNe = 0xa0,
    IfICmpLt = 0xa1,
    IfICmpGe = 0xa2,
    IfICmpGt = 0xa3,
    IfICmpLe = 0xa4,
    IfACmpEq = 0xa5,
    IfACmpNe = 0xa6,
    Goto = 0xa7,
    IReturn = 0xac,
    AReturn = 0xb0,
    Return = 0xb1,
    GetStatic = 0xb2,
    PutStatic = 0xb3,
    GetField = 0xb4,
    PutField = 0xb5,
    InvokeVirtual = 0xb6,
    InvokeSpecial = 0xb7,
    InvokeStatic = 0xb8,
    New = 0xbb,
    AThrow = 0xbf,
    CheckCast = 0xc0,
    IfNull = 0xc6,
    IfNonNull = 0xc7,
}

/// Layout of the operand bytes following an opcode.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum OperandShape {
    None,
    /// Unsigned byte, a local variable or constant pool index.
    U8,
    /// Signed byte immediate.
    I8,
    /// Signed short immediate.
    I16,
    /// Unsigned short constant pool index.
    U16,
    /// Signed short branch offset relative to the opcode.
    Branch,
    /// `iinc`: local index byte then signed byte increment.
    IInc,
}

impl OperandShape {
    /// Number of operand bytes.
    pub fn width(self) -> usize {
        match self {
            Self::None => 0,
            Self::U8 | Self::I8 => 1,
            Self::I16 | Self::U16 | Self::Branch | Self::IInc => 2,
        }
    }
}

#[derive(Debug, Copy, Clone)]
pub struct OpcodeInfo {
    pub opcode: OPCode,
    pub mnemonic: &'static str,
    pub shape: OperandShape,
}

const OPCODES: &[(OPCode, &str, OperandShape)] = &[
    (OPCode::NOP, "nop", OperandShape::None),
    (OPCode::AconstNull, "aconst_null", OperandShape::None),
    (OPCode::IconstM1, "iconst_m1", OperandShape::None),
    (OPCode::Iconst0, "iconst_0", OperandShape::None),
    (OPCode::Iconst1, "iconst_1", OperandShape::None),
    (OPCode::Iconst2, "iconst_2", OperandShape::None),
    (OPCode::Iconst3, "iconst_3", OperandShape::None),
    (OPCode::Iconst4, "iconst_4", OperandShape::None),
    (OPCode::Iconst5, "iconst_5", OperandShape::None),
    (OPCode::BiPush, "bipush", OperandShape::I8),
    (OPCode::SiPush, "sipush", OperandShape::I16),
    (OPCode::Ldc, "ldc", OperandShape::U8),
    (OPCode::ILoad, "iload", OperandShape::U8),
    (OPCode::ALoad, "aload", OperandShape::U8),
    (OPCode::ILoad0, "iload_0", OperandShape::None),
    (OPCode::ILoad1, "iload_1", OperandShape::None),
    (OPCode::ILoad2, "iload_2", OperandShape::None),
    (OPCode::ILoad3, "iload_3", OperandShape::None),
    (OPCode::ALoad0, "aload_0", OperandShape::None),
    (OPCode::ALoad1, "aload_1", OperandShape::None),
    (OPCode::ALoad2, "aload_2", OperandShape::None),
    (OPCode::ALoad3, "aload_3", OperandShape::None),
    (OPCode::IStore, "istore", OperandShape::U8),
    (OPCode::AStore, "astore", OperandShape::U8),
    (OPCode::IStore0, "istore_0", OperandShape::None),
    (OPCode::IStore1, "istore_1", OperandShape::None),
    (OPCode::IStore2, "istore_2", OperandShape::None),
    (OPCode::IStore3, "istore_3", OperandShape::None),
    (OPCode::AStore0, "astore_0", OperandShape::None),
    (OPCode::AStore1, "astore_1", OperandShape::None),
    (OPCode::AStore2, "astore_2", OperandShape::None),
    (OPCode::AStore3, "astore_3", OperandShape::None),
    (OPCode::Pop, "pop", OperandShape::None),
    (OPCode::Dup, "dup", OperandShape::None),
    (OPCode::Swap, "swap", OperandShape::None),
    (OPCode::IAdd, "iadd", OperandShape::None),
    (OPCode::ISub, "isub", OperandShape::None),
    (OPCode::IMul, "imul", OperandShape::None),
    (OPCode::IDiv, "idiv", OperandShape::None),
    (OPCode::IRem, "irem", OperandShape::None),
    (OPCode::INeg, "ineg", OperandShape::None),
    (OPCode::IInc, "iinc", OperandShape::IInc),
    (OPCode::IfEq, "ifeq", OperandShape::Branch),
    (OPCode::IfNe, "ifne", OperandShape::Branch),
    (OPCode::IfLt, "iflt", OperandShape::Branch),
    (OPCode::IfGe, "ifge", OperandShape::Branch),
    (OPCode::IfGt, "ifgt", OperandShape::Branch),
    (OPCode::IfLe, "ifle", OperandShape::Branch),
    (OPCode::IfICmpEq, "if_icmpeq", OperandShape::Branch),
    (OPCode::IfICmpNe, "if_icmpne", OperandShape::Branch),
    (OPCode::IfICmpLt, "if_icmplt", OperandShape::Branch),
    (OPCode::IfICmpGe, "if_icmpge", OperandShape::Branch),
    (OPCode::IfICmpGt, "if_icmpgt", OperandShape::Branch),
    (OPCode::IfICmpLe, "if_icmple", OperandShape::Branch),
    (OPCode::IfACmpEq, "if_acmpeq", OperandShape::Branch),
    (OPCode::IfACmpNe, "if_acmpne", OperandShape::Branch),
    (OPCode::Goto, "goto", OperandShape::Branch),
    (OPCode::IReturn, "ireturn", OperandShape::None),
    (OPCode::AReturn, "areturn", OperandShape::None),
    (OPCode::Return, "return", OperandShape::None),
    (OPCode::GetStatic, "getstatic", OperandShape::U16),
    (OPCode::PutStatic, "putstatic", OperandShape::U16),
    (OPCode::GetField, "getfield", OperandShape::U16),
    (OPCode::PutField, "putfield", OperandShape::U16),
    (OPCode::InvokeVirtual, "invokevirtual", OperandShape::U16),
    (OPCode::InvokeSpecial, "invokespecial", OperandShape::U16),
    (OPCode::InvokeStatic, "invokestatic", OperandShape::U16),
    (OPCode::New, "new", OperandShape::U16),
    (OPCode::AThrow, "athrow", OperandShape::None),
    (OPCode::CheckCast, "checkcast", OperandShape::U16),
    (OPCode::IfNull, "ifnull", OperandShape::Branch),
    (OPCode::IfNonNull, "ifnonnull", OperandShape::Branch),
];

/// Integer comparisons used by conditional branches.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum Condition {
    Eq,
    Ne,
    Lt,
    Ge,
    Gt,
    Le,
}

impl Condition {
    pub fn holds(self, a: i32, b: i32) -> bool {
        match self {
            Self::Eq => a == b,
            Self::Ne => a != b,
            Self::Lt => a < b,
            Self::Ge => a >= b,
            Self::Gt => a > b,
            Self::Le => a <= b,
        }
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum InvokeKind {
    Static,
    Virtual,
    Special,
}

impl InvokeKind {
    pub fn has_receiver(self) -> bool {
        !matches!(self, Self::Static)
    }
}

/// A decoded instruction. Branch targets are absolute code positions.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum Instruction {
    Nop,
    AconstNull,
    IConst(i32),
    Ldc(u16),
    ILoad(usize),
    ALoad(usize),
    IStore(usize),
    AStore(usize),
    Pop,
    Dup,
    Swap,
    IAdd,
    ISub,
    IMul,
    IDiv,
    IRem,
    INeg,
    IInc { index: usize, delta: i32 },
    If { cond: Condition, target: usize },
    IfICmp { cond: Condition, target: usize },
    IfACmp { equal: bool, target: usize },
    IfNull { null: bool, target: usize },
    Goto(usize),
    IReturn,
    AReturn,
    Return,
    GetStatic(u16),
    PutStatic(u16),
    GetField(u16),
    PutField(u16),
    Invoke { kind: InvokeKind, index: u16 },
    New(u16),
    AThrow,
    CheckCast(u16),
}

impl Instruction {
    /// Absolute branch target, for the instructions that have one.
    pub fn branch_target(&self) -> Option<usize> {
        match *self {
            Self::If { target, .. }
            | Self::IfICmp { target, .. }
            | Self::IfACmp { target, .. }
            | Self::IfNull { target, .. }
            | Self::Goto(target) => Some(target),
            _ => None,
        }
    }
}

/// Raw operand value read according to an `OperandShape`.
#[derive(Debug, Copy, Clone)]
enum Operand {
    None,
    Int(i32),
    Index(u16),
    IInc(usize, i32),
}

/// Opcode byte → decoding information. Built once and shared by reference
/// between the interpreter and the JIT.
pub struct OpcodeTable {
    entries: [Option<OpcodeInfo>; 256],
}

impl Default for OpcodeTable {
    fn default() -> Self {
        Self::new()
    }
}

impl OpcodeTable {
    pub fn new() -> Self {
        let mut entries = [None; 256];
        for &(opcode, mnemonic, shape) in OPCODES {
            entries[opcode as usize] = Some(OpcodeInfo {
                opcode,
                mnemonic,
                shape,
            });
        }
        Self { entries }
    }

    pub fn info(&self, byte: u8) -> Option<&OpcodeInfo> {
        self.entries[byte as usize].as_ref()
    }

    /// Decodes the instruction starting at `pc`, returning it together with
    /// the position of the next instruction.
    pub fn decode(&self, code: &[u8], pc: usize) -> Result<(Instruction, usize)> {
        let byte = *code.get(pc).ok_or_else(|| truncated(pc))?;
        let info = self
            .info(byte)
            .ok_or(RuntimeError::UnsupportedOpcode { opcode: byte, pc })?;
        let start = pc + 1;
        let end = start + info.shape.width();
        let bytes = code.get(start..end).ok_or_else(|| truncated(pc))?;
        let operand = match info.shape {
            OperandShape::None => Operand::None,
            OperandShape::U8 => Operand::Index(bytes[0] as u16),
            OperandShape::I8 => Operand::Int(bytes[0] as i8 as i32),
            OperandShape::I16 | OperandShape::Branch => {
                Operand::Int(i16::from_be_bytes([bytes[0], bytes[1]]) as i32)
            }
            OperandShape::U16 => Operand::Index(u16::from_be_bytes([bytes[0], bytes[1]])),
            OperandShape::IInc => Operand::IInc(bytes[0] as usize, bytes[1] as i8 as i32),
        };
        let instruction = Self::build(info.opcode, operand, pc)?;
        Ok((instruction, end))
    }

    fn build(opcode: OPCode, operand: Operand, pc: usize) -> Result<Instruction> {
        use Instruction as I;
        // Operands that disagree with the shape table are rejected.
        let mismatch = || RuntimeError::UnsupportedOpcode {
            opcode: opcode as u8,
            pc,
        };
        let int = || match operand {
            Operand::Int(i) => Ok(i),
            _ => Err(mismatch()),
        };
        let index = || match operand {
            Operand::Index(i) => Ok(i),
            _ => Err(mismatch()),
        };
        let target = || -> Result<usize> {
            let target = pc as i64 + int()? as i64;
            usize::try_from(target).map_err(|_| {
                RuntimeError::ClassFormat(format!("branch at {pc} targets {target}"))
            })
        };
        Ok(match opcode {
            OPCode::NOP => I::Nop,
            OPCode::AconstNull => I::AconstNull,
            OPCode::IconstM1 => I::IConst(-1),
            OPCode::Iconst0 => I::IConst(0),
            OPCode::Iconst1 => I::IConst(1),
            OPCode::Iconst2 => I::IConst(2),
            OPCode::Iconst3 => I::IConst(3),
            OPCode::Iconst4 => I::IConst(4),
            OPCode::Iconst5 => I::IConst(5),
            OPCode::BiPush | OPCode::SiPush => I::IConst(int()?),
            OPCode::Ldc => I::Ldc(index()?),
            OPCode::ILoad => I::ILoad(index()? as usize),
            OPCode::ALoad => I::ALoad(index()? as usize),
            OPCode::ILoad0 => I::ILoad(0),
            OPCode::ILoad1 => I::ILoad(1),
            OPCode::ILoad2 => I::ILoad(2),
            OPCode::ILoad3 => I::ILoad(3),
            OPCode::ALoad0 => I::ALoad(0),
            OPCode::ALoad1 => I::ALoad(1),
            OPCode::ALoad2 => I::ALoad(2),
            OPCode::ALoad3 => I::ALoad(3),
            OPCode::IStore => I::IStore(index()? as usize),
            OPCode::AStore => I::AStore(index()? as usize),
            OPCode::IStore0 => I::IStore(0),
            OPCode::IStore1 => I::IStore(1),
            OPCode::IStore2 => I::IStore(2),
            OPCode::IStore3 => I::IStore(3),
            OPCode::AStore0 => I::AStore(0),
            OPCode::AStore1 => I::AStore(1),
            OPCode::AStore2 => I::AStore(2),
            OPCode::AStore3 => I::AStore(3),
            OPCode::Pop => I::Pop,
            OPCode::Dup => I::Dup,
            OPCode::Swap => I::Swap,
            OPCode::IAdd => I::IAdd,
            OPCode::ISub => I::ISub,
            OPCode::IMul => I::IMul,
            OPCode::IDiv => I::IDiv,
            OPCode::IRem => I::IRem,
            OPCode::INeg => I::INeg,
            OPCode::IInc => match operand {
                Operand::IInc(index, delta) => I::IInc { index, delta },
                _ => return Err(mismatch()),
            },
            OPCode::IfEq => I::If { cond: Condition::Eq, target: target()? },
            OPCode::IfNe => I::If { cond: Condition::Ne, target: target()? },
            OPCode::IfLt => I::If { cond: Condition::Lt, target: target()? },
            OPCode::IfGe => I::If { cond: Condition::Ge, target: target()? },
            OPCode::IfGt => I::If { cond: Condition::Gt, target: target()? },
            OPCode::IfLe => I::If { cond: Condition::Le, target: target()? },
            OPCode::IfICmpEq => I::IfICmp { cond: Condition::Eq, target: target()? },
            OPCode::IfICmpNe => I::IfICmp { cond: Condition::Ne, target: target()? },
            OPCode::IfICmpLt => I::IfICmp { cond: Condition::Lt, target: target()? },
            OPCode::IfICmpGe => I::IfICmp { cond: Condition::Ge, target: target()? },
            OPCode::IfICmpGt => I::IfICmp { cond: Condition::Gt, target: target()? },
            OPCode::IfICmpLe => I::IfICmp { cond: Condition::Le, target: target()? },
            OPCode::IfACmpEq => I::IfACmp { equal: true, target: target()? },
            OPCode::IfACmpNe => I::IfACmp { equal: false, target: target()? },
            OPCode::IfNull => I::IfNull { null: true, target: target()? },
            OPCode::IfNonNull => I::IfNull { null: false, target: target()? },
            OPCode::Goto => I::Goto(target()?),
            OPCode::IReturn => I::IReturn,
            OPCode::AReturn => I::AReturn,
            OPCode::Return => I::Return,
            OPCode::GetStatic => I::GetStatic(index()?),
            OPCode::PutStatic => I::PutStatic(index()?),
            OPCode::GetField => I::GetField(index()?),
            OPCode::PutField => I::PutField(index()?),
            OPCode::InvokeVirtual => I::Invoke { kind: InvokeKind::Virtual, index: index()? },
            OPCode::InvokeSpecial => I::Invoke { kind: InvokeKind::Special, index: index()? },
            OPCode::InvokeStatic => I::Invoke { kind: InvokeKind::Static, index: index()? },
            OPCode::New => I::New(index()?),
            OPCode::AThrow => I::AThrow,
            OPCode::CheckCast => I::CheckCast(index()?),
        })
    }
}

impl fmt::Debug for OpcodeTable {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "OpcodeTable({} opcodes)", self.entries.iter().flatten().count())
    }
}

fn truncated(pc: usize) -> RuntimeError {
    RuntimeError::ClassFormat(format!("truncated instruction at {pc}"))
}
