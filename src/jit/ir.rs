//! Linear register IR produced from JVM bytecode and its 9 byte wire form.
//!
//! Registers `[0, max_locals)` hold the method's locals, the registers after
//! them simulate the operand stack: stack slot `h` lives in register
//! `max_locals + h`. Every record is `(op, op1, op2)`.
use std::collections::HashMap;
use std::fmt;
use std::io::Cursor;

use byteorder::{BigEndian, ReadBytesExt, WriteBytesExt};

use crate::bytecode::{Condition, Instruction};
use crate::error::{Result, RuntimeError};
use crate::jit::parser::ParsedInstruction;

/// Size in bytes of one serialized `Inst`.
pub const INST_SIZE: usize = 9;

/// Register operand of a `Ret` without a value.
pub const VOID: i32 = -1;

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum IROp {
    Nop = 0x00,
    /// `mov imm, dst`
    Mov = 0x10,
    /// `lod src, dst` register copy.
    Lod = 0x11,
    Mul = 0x12,
    Div = 0x13,
    Add = 0x14,
    Sub = 0x15,
    /// `jgt reg, label` and friends compare `reg` against zero.
    JmpGt = 0x16,
    JmpGe = 0x17,
    JmpEq = 0x18,
    JmpNe = 0x19,
    JmpLt = 0x1a,
    JmpLe = 0x1b,
    /// `ret reg`, `ret -1` returns nothing.
    Ret = 0x1c,
    Label = 0x1d,
    /// `cmp a, b` sets `a` to the sign of `a - b`.
    Cmp = 0x1e,
    /// `addi reg, imm`
    AddImm = 0x1f,
    Jmp = 0x20,
    Rem = 0x21,
    Neg = 0x22,
}

impl IROp {
    pub fn mnemonic(self) -> &'static str {
        match self {
            Self::Nop => "nop",
            Self::Mov => "mov",
            Self::Lod => "lod",
            Self::Mul => "mul",
            Self::Div => "div",
            Self::Add => "add",
            Self::Sub => "sub",
            Self::JmpGt => "jgt",
            Self::JmpGe => "jge",
            Self::JmpEq => "jeq",
            Self::JmpNe => "jne",
            Self::JmpLt => "jlt",
            Self::JmpLe => "jle",
            Self::Ret => "ret",
            Self::Label => "label",
            Self::Cmp => "cmp",
            Self::AddImm => "addi",
            Self::Jmp => "jmp",
            Self::Rem => "rem",
            Self::Neg => "neg",
        }
    }

    /// Conditional jump taken when `cond` holds between a register and zero.
    pub fn jump_if(cond: Condition) -> Self {
        match cond {
            Condition::Eq => Self::JmpEq,
            Condition::Ne => Self::JmpNe,
            Condition::Lt => Self::JmpLt,
            Condition::Ge => Self::JmpGe,
            Condition::Gt => Self::JmpGt,
            Condition::Le => Self::JmpLe,
        }
    }

    /// Comparison performed by a conditional jump.
    pub fn condition(self) -> Option<Condition> {
        match self {
            Self::JmpEq => Some(Condition::Eq),
            Self::JmpNe => Some(Condition::Ne),
            Self::JmpLt => Some(Condition::Lt),
            Self::JmpGe => Some(Condition::Ge),
            Self::JmpGt => Some(Condition::Gt),
            Self::JmpLe => Some(Condition::Le),
            _ => None,
        }
    }
}

impl TryFrom<u8> for IROp {
    type Error = RuntimeError;

    fn try_from(tag: u8) -> Result<Self> {
        Ok(match tag {
            0x00 => Self::Nop,
            0x10 => Self::Mov,
            0x11 => Self::Lod,
            0x12 => Self::Mul,
            0x13 => Self::Div,
            0x14 => Self::Add,
            0x15 => Self::Sub,
            0x16 => Self::JmpGt,
            0x17 => Self::JmpGe,
            0x18 => Self::JmpEq,
            0x19 => Self::JmpNe,
            0x1a => Self::JmpLt,
            0x1b => Self::JmpLe,
            0x1c => Self::Ret,
            0x1d => Self::Label,
            0x1e => Self::Cmp,
            0x1f => Self::AddImm,
            0x20 => Self::Jmp,
            0x21 => Self::Rem,
            0x22 => Self::Neg,
            _ => return Err(failure(format!("unknown IR tag 0x{tag:02x}"))),
        })
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct Inst {
    pub op: IROp,
    pub op1: i32,
    pub op2: i32,
}

impl Inst {
    pub fn new(op: IROp, op1: i32, op2: i32) -> Self {
        Self { op, op1, op2 }
    }
}

impl fmt::Display for Inst {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}\t{}, {}", self.op.mnemonic(), self.op1, self.op2)
    }
}

/// Serializes `insts` as big endian `(u8, i32, i32)` records.
pub fn encode(insts: &[Inst]) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(insts.len() * INST_SIZE);
    for inst in insts {
        // Writes into a `Vec` cannot fail.
        let _ = bytes.write_u8(inst.op as u8);
        let _ = bytes.write_i32::<BigEndian>(inst.op1);
        let _ = bytes.write_i32::<BigEndian>(inst.op2);
    }
    bytes
}

pub fn decode(bytes: &[u8]) -> Result<Vec<Inst>> {
    if bytes.len() % INST_SIZE != 0 {
        return Err(failure(format!("IR buffer of {} bytes", bytes.len())));
    }
    let mut rdr = Cursor::new(bytes);
    let mut insts = Vec::with_capacity(bytes.len() / INST_SIZE);
    for _ in 0..bytes.len() / INST_SIZE {
        let op = IROp::try_from(rdr.read_u8()?)?;
        let op1 = rdr.read_i32::<BigEndian>()?;
        let op2 = rdr.read_i32::<BigEndian>()?;
        insts.push(Inst::new(op, op1, op2));
    }
    Ok(insts)
}

/// Checks every register operand against `registers` and every label
/// operand against `labels`.
pub fn validate(insts: &[Inst], registers: usize, labels: usize) -> Result<()> {
    let register = |r: i32| {
        usize::try_from(r)
            .ok()
            .filter(|r| *r < registers)
            .ok_or_else(|| failure(format!("register {r} out of {registers}")))
            .map(|_| ())
    };
    let label = |l: i32| {
        usize::try_from(l)
            .ok()
            .filter(|l| *l < labels)
            .ok_or_else(|| failure(format!("label {l} out of {labels}")))
            .map(|_| ())
    };
    for inst in insts {
        match inst.op {
            IROp::Nop => {}
            IROp::Mov => register(inst.op2)?,
            IROp::Lod
            | IROp::Mul
            | IROp::Div
            | IROp::Add
            | IROp::Sub
            | IROp::Cmp
            | IROp::Rem => {
                register(inst.op1)?;
                register(inst.op2)?;
            }
            IROp::JmpGt
            | IROp::JmpGe
            | IROp::JmpEq
            | IROp::JmpNe
            | IROp::JmpLt
            | IROp::JmpLe => {
                register(inst.op1)?;
                label(inst.op2)?;
            }
            IROp::Ret if inst.op1 == VOID => {}
            IROp::Ret | IROp::AddImm | IROp::Neg => register(inst.op1)?,
            IROp::Label | IROp::Jmp => label(inst.op1)?,
        }
    }
    Ok(())
}

fn failure(reason: String) -> RuntimeError {
    RuntimeError::JitCompileFailure(reason)
}

/// Lowering state: the emitted IR and the simulated operand stack.
struct State<'a> {
    labels: &'a [usize],
    max_locals: usize,
    max_stack: usize,
    height: usize,
    // Stack height expected at each label, recorded by the first branch to
    // (or fall through into) it.
    label_heights: HashMap<usize, usize>,
    // Whether the previous instruction can fall through.
    reachable: bool,
    irs: Vec<Inst>,
}

impl<'a> State<'a> {
    fn new(labels: &'a [usize], max_locals: usize, max_stack: usize) -> Self {
        Self {
            labels,
            max_locals,
            max_stack,
            height: 0,
            label_heights: HashMap::new(),
            reachable: true,
            irs: Vec::new(),
        }
    }

    fn emit(&mut self, op: IROp, op1: i32, op2: i32) {
        self.irs.push(Inst::new(op, op1, op2));
    }

    fn push_stack(&mut self) -> Result<i32> {
        if self.height == self.max_stack {
            return Err(failure(format!("stack deeper than {}", self.max_stack)));
        }
        let reg = self.max_locals + self.height;
        self.height += 1;
        Ok(reg as i32)
    }

    fn pop_stack(&mut self) -> Result<i32> {
        if self.height == 0 {
            return Err(failure("stack underflow".to_owned()));
        }
        self.height -= 1;
        Ok((self.max_locals + self.height) as i32)
    }

    fn local(&self, index: usize) -> Result<i32> {
        if index >= self.max_locals {
            return Err(failure(format!("local {index} out of {}", self.max_locals)));
        }
        Ok(index as i32)
    }

    fn label(&self, target: usize) -> Result<usize> {
        self.labels
            .iter()
            .position(|l| *l == target)
            .ok_or_else(|| failure(format!("no label for {target}")))
    }

    /// Records the stack height at `label`, which must agree with any
    /// height recorded before.
    fn expect_height(&mut self, label: usize) -> Result<()> {
        match self.label_heights.get(&label) {
            Some(height) if *height != self.height => Err(failure(format!(
                "label {label} reached with stack height {} and {height}",
                self.height
            ))),
            Some(_) => Ok(()),
            None => {
                self.label_heights.insert(label, self.height);
                Ok(())
            }
        }
    }

    fn enter(&mut self, pc: usize) -> Result<()> {
        let Some(label) = self.labels.iter().position(|l| *l == pc) else {
            return Ok(());
        };
        if !self.reachable {
            if let Some(height) = self.label_heights.get(&label) {
                self.height = *height;
            }
        }
        self.expect_height(label)?;
        self.reachable = true;
        self.emit(IROp::Label, label as i32, 0);
        Ok(())
    }

    fn branch(&mut self, op: IROp, reg: i32, target: usize) -> Result<()> {
        let label = self.label(target)?;
        self.expect_height(label)?;
        self.emit(op, reg, label as i32);
        Ok(())
    }

    fn arithmetic(&mut self, op: IROp) -> Result<()> {
        let b = self.pop_stack()?;
        let a = self.pop_stack()?;
        self.emit(op, a, b);
        self.push_stack()?;
        Ok(())
    }

    fn translate(&mut self, instruction: Instruction) -> Result<()> {
        use Instruction as I;
        match instruction {
            I::Nop => self.emit(IROp::Nop, 0, 0),
            I::IConst(value) => {
                let dst = self.push_stack()?;
                self.emit(IROp::Mov, value, dst);
            }
            I::ILoad(index) => {
                let src = self.local(index)?;
                let dst = self.push_stack()?;
                self.emit(IROp::Lod, src, dst);
            }
            I::IStore(index) => {
                let dst = self.local(index)?;
                let src = self.pop_stack()?;
                self.emit(IROp::Lod, src, dst);
            }
            I::IAdd => self.arithmetic(IROp::Add)?,
            I::ISub => self.arithmetic(IROp::Sub)?,
            I::IMul => self.arithmetic(IROp::Mul)?,
            I::IDiv => self.arithmetic(IROp::Div)?,
            I::IRem => self.arithmetic(IROp::Rem)?,
            I::INeg => {
                let reg = self.pop_stack()?;
                self.emit(IROp::Neg, reg, 0);
                self.push_stack()?;
            }
            I::IInc { index, delta } => {
                let reg = self.local(index)?;
                self.emit(IROp::AddImm, reg, delta);
            }
            I::If { cond, target } => {
                let reg = self.pop_stack()?;
                self.branch(IROp::jump_if(cond), reg, target)?;
            }
            I::IfICmp { cond, target } => {
                let b = self.pop_stack()?;
                let a = self.pop_stack()?;
                self.emit(IROp::Cmp, a, b);
                self.branch(IROp::jump_if(cond), a, target)?;
            }
            I::Goto(target) => {
                let label = self.label(target)?;
                self.expect_height(label)?;
                self.emit(IROp::Jmp, label as i32, 0);
                self.reachable = false;
            }
            I::IReturn => {
                let reg = self.pop_stack()?;
                self.emit(IROp::Ret, reg, 0);
                self.reachable = false;
            }
            I::Return => {
                self.emit(IROp::Ret, VOID, 0);
                self.reachable = false;
            }
            other => return Err(failure(format!("cannot lower {other:?}"))),
        }
        Ok(())
    }
}

/// Lowers decoded bytecode to IR. `labels` are the branch targets as found
/// by `discover_labels`; label `n` is emitted right before the instruction
/// at `labels[n]`.
pub fn lower(
    instructions: &[ParsedInstruction],
    labels: &[usize],
    max_locals: usize,
    max_stack: usize,
) -> Result<Vec<Inst>> {
    let mut state = State::new(labels, max_locals, max_stack);
    for parsed in instructions {
        state.enter(parsed.pc)?;
        state.translate(parsed.instruction)?;
    }
    Ok(state.irs)
}
