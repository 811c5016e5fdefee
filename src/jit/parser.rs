//! First stage of the JIT: decoding a method's bytecode into a list of
//! instructions tagged with their code position.
use crate::bytecode::{Instruction, OpcodeTable};
use crate::error::Result;

/// Instruction at code position `pc`.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct ParsedInstruction {
    pub pc: usize,
    pub instruction: Instruction,
}

/// Decodes whole methods with the interpreter's opcode table.
pub struct InstParser<'a> {
    opcodes: &'a OpcodeTable,
}

impl<'a> InstParser<'a> {
    pub fn new(opcodes: &'a OpcodeTable) -> Self {
        Self { opcodes }
    }

    /// Decodes `code` front to back. Any unsupported opcode aborts.
    pub fn parse(&self, code: &[u8]) -> Result<Vec<ParsedInstruction>> {
        let mut instructions = Vec::new();
        let mut pc = 0;
        while pc < code.len() {
            let (instruction, next) = self.opcodes.decode(code, pc)?;
            instructions.push(ParsedInstruction { pc, instruction });
            pc = next;
        }
        Ok(instructions)
    }
}

/// Branch targets of `instructions`, without duplicates, in order of first
/// appearance.
pub fn discover_labels(instructions: &[ParsedInstruction]) -> Vec<usize> {
    let mut labels = Vec::new();
    for target in instructions.iter().filter_map(|p| p.instruction.branch_target()) {
        if !labels.contains(&target) {
            labels.push(target);
        }
    }
    labels
}
