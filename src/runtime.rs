//! Execution state of the JVM: values, frames and threads.
use std::fmt;

use crate::class::ClassId;
use crate::error::{Result, RuntimeError};
use crate::interpreter;
use crate::vm::Vm;

/// Handle to an object on the `Heap`.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub struct ObjectRef(u32);

impl ObjectRef {
    pub(crate) fn new(index: usize) -> Self {
        Self(index as u32)
    }

    pub fn index(self) -> usize {
        self.0 as usize
    }
}

/// Tagged value stored in locals and on the operand stack.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum Slot {
    Int(i32),
    Ref(Option<ObjectRef>),
}

impl Slot {
    pub const NULL: Slot = Slot::Ref(None);

    pub fn as_int(self) -> Result<i32> {
        match self {
            Self::Int(i) => Ok(i),
            Self::Ref(_) => Err(RuntimeError::SlotTypeMismatch("int")),
        }
    }

    pub fn as_ref(self) -> Result<Option<ObjectRef>> {
        match self {
            Self::Ref(r) => Ok(r),
            Self::Int(_) => Err(RuntimeError::SlotTypeMismatch("reference")),
        }
    }
}

impl fmt::Display for Slot {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Self::Int(i) => write!(f, "0x{i:04x}"),
            Self::Ref(Some(r)) => write!(f, "@{}", r.index()),
            Self::Ref(None) => write!(f, "null"),
        }
    }
}

/// Activation record of one method invocation.
///
/// Locals and operand stack are fixed size arrays sized from the method's
/// `max_locals` and `max_stack`. `pc` is the position of the next
/// instruction to decode, `inst_start` the position of the one currently
/// executing (branch offsets and exception ranges are relative to it).
#[derive(Debug, Clone)]
pub struct Frame {
    class: ClassId,
    method: usize,
    pc: usize,
    inst_start: usize,
    locals: Box<[Option<Slot>]>,
    stack: Box<[Slot]>,
    height: usize,
}

impl Frame {
    pub fn new(class: ClassId, method: usize, max_locals: usize, max_stack: usize) -> Self {
        Self {
            class,
            method,
            pc: 0,
            inst_start: 0,
            locals: vec![None; max_locals].into_boxed_slice(),
            stack: vec![Slot::Int(0); max_stack].into_boxed_slice(),
            height: 0,
        }
    }

    pub fn class(&self) -> ClassId {
        self.class
    }

    pub fn method(&self) -> usize {
        self.method
    }

    pub fn pc(&self) -> usize {
        self.pc
    }

    pub fn inst_start(&self) -> usize {
        self.inst_start
    }

    /// Marks the instruction at `start` as executing and moves the cursor to
    /// the following one.
    pub fn begin_instruction(&mut self, start: usize, next: usize) {
        self.inst_start = start;
        self.pc = next;
    }

    pub fn set_pc(&mut self, pc: usize) {
        self.pc = pc;
    }

    pub fn height(&self) -> usize {
        self.height
    }

    /// Live part of the operand stack, bottom first.
    pub fn stack(&self) -> &[Slot] {
        &self.stack[..self.height]
    }

    pub fn push(&mut self, slot: Slot) -> Result<()> {
        if self.height == self.stack.len() {
            return Err(RuntimeError::StackOverflow(self.stack.len()));
        }
        self.stack[self.height] = slot;
        self.height += 1;
        Ok(())
    }

    pub fn pop(&mut self) -> Result<Slot> {
        if self.height == 0 {
            return Err(RuntimeError::StackUnderflow);
        }
        self.height -= 1;
        Ok(self.stack[self.height])
    }

    pub fn push_int(&mut self, i: i32) -> Result<()> {
        self.push(Slot::Int(i))
    }

    pub fn pop_int(&mut self) -> Result<i32> {
        self.pop()?.as_int()
    }

    pub fn push_ref(&mut self, r: Option<ObjectRef>) -> Result<()> {
        self.push(Slot::Ref(r))
    }

    pub fn pop_ref(&mut self) -> Result<Option<ObjectRef>> {
        self.pop()?.as_ref()
    }

    pub fn store_local(&mut self, index: usize, slot: Slot) -> Result<()> {
        let local = self
            .locals
            .get_mut(index)
            .ok_or(RuntimeError::InvalidLocal(index))?;
        *local = Some(slot);
        Ok(())
    }

    pub fn load_local(&self, index: usize) -> Result<Slot> {
        self.locals
            .get(index)
            .copied()
            .flatten()
            .ok_or(RuntimeError::InvalidLocal(index))
    }

    /// Logs locals and stack, used when a frame is discarded.
    pub fn dump(&self, name: &str) {
        if !log::log_enabled!(log::Level::Debug) {
            return;
        }
        let locals: Vec<String> = self
            .locals
            .iter()
            .flatten()
            .map(|s| s.to_string())
            .collect();
        let stack: Vec<String> = self.stack().iter().map(|s| s.to_string()).collect();
        log::debug!(
            "dump frame {name}: locals [{}] stack [{}]",
            locals.join(" "),
            stack.join(" ")
        );
    }
}

/// A guest thread: an ordered call stack of frames, the last one executing.
#[derive(Debug, Default)]
pub struct Thread {
    frames: Vec<Frame>,
    // Depths below which a bounded run (static initializer) may not unwind.
    floors: Vec<usize>,
    result: Option<Slot>,
}

impl Thread {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn depth(&self) -> usize {
        self.frames.len()
    }

    pub fn floor(&self) -> usize {
        self.floors.last().copied().unwrap_or(0)
    }

    pub fn push_frame(&mut self, frame: Frame) {
        self.frames.push(frame);
    }

    pub fn pop_frame(&mut self) -> Option<Frame> {
        self.frames.pop()
    }

    pub fn top_frame(&self) -> Option<&Frame> {
        self.frames.last()
    }

    pub fn top_frame_mut(&mut self) -> Option<&mut Frame> {
        self.frames.last_mut()
    }

    /// Hands a returned value to the caller, or keeps it as the thread's
    /// result when the outermost frame returned.
    pub fn deliver_return(&mut self, slot: Slot) -> Result<()> {
        match self.frames.last_mut() {
            Some(caller) => caller.push(slot),
            None => {
                self.result = Some(slot);
                Ok(())
            }
        }
    }

    /// Value returned by the outermost frame, if it returned one.
    pub fn take_result(&mut self) -> Option<Slot> {
        self.result.take()
    }

    /// Runs `frame` and everything it calls until the call stack is empty.
    pub fn run(&mut self, vm: &mut Vm, frame: Frame) -> Result<()> {
        self.push_frame(frame);
        while !self.frames.is_empty() {
            interpreter::step(vm, self)?;
        }
        Ok(())
    }

    /// Runs until `start` has been popped, leaving the frames below it alone.
    /// Exceptions raised inside may not unwind past `start`.
    pub fn run_to_end(&mut self, vm: &mut Vm, start: Frame) -> Result<()> {
        let floor = self.frames.len();
        self.floors.push(floor);
        self.push_frame(start);
        let mut result = Ok(());
        while self.frames.len() > floor {
            if let Err(err) = interpreter::step(vm, self) {
                result = Err(err);
                break;
            }
        }
        self.floors.pop();
        result
    }
}
