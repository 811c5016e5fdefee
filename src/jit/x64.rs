//! x86-64 backend emitting machine code with `dynasmrt`.
//!
//! The register file is an `i32` array whose address is passed in `rdi`
//! following the System V AMD64 ABI; IR register `n` lives at
//! `[rdi + 4 * n]`. Only the caller saved `rax`, `rcx` and `rdx` are used as
//! scratch registers, so the emitted code needs no prologue.
use dynasmrt::x64::Assembler;
use dynasmrt::{dynasm, AssemblyOffset, DynamicLabel, DynasmApi, DynasmLabelApi, ExecutableBuffer};

use crate::error::{Result, RuntimeError};
use crate::jit::backend::{check_args, CompileRequest, CompiledMethod, NativeBackend};
use crate::jit::ir::{self, IROp, VOID};

fn failure(reason: impl Into<String>) -> RuntimeError {
    RuntimeError::JitCompileFailure(reason.into())
}

#[derive(Debug, Default)]
pub struct X64Backend;

impl NativeBackend for X64Backend {
    fn name(&self) -> &'static str {
        "x86_64"
    }

    fn compile(&self, request: &CompileRequest) -> Result<Box<dyn CompiledMethod>> {
        let insts = ir::decode(request.code)?;
        ir::validate(&insts, request.registers, request.labels)?;
        if request.args > request.registers {
            return Err(failure("arguments do not fit the register file"));
        }

        let mut ops = Assembler::new().map_err(|e| failure(e.to_string()))?;
        let labels: Vec<DynamicLabel> = (0..request.labels).map(|_| ops.new_dynamic_label()).collect();
        let start = ops.offset();
        for inst in &insts {
            // Displacements of the register operands, valid for the ops
            // that take registers.
            let a = inst.op1.wrapping_mul(4);
            let b = inst.op2.wrapping_mul(4);
            match inst.op {
                IROp::Nop => {}
                IROp::Mov => {
                    let imm = inst.op1;
                    dynasm!(ops
                        ; mov DWORD [rdi + b], imm
                    );
                }
                IROp::Lod => {
                    dynasm!(ops
                        ; mov eax, DWORD [rdi + a]
                        ; mov DWORD [rdi + b], eax
                    );
                }
                IROp::Add => {
                    dynasm!(ops
                        ; mov eax, DWORD [rdi + a]
                        ; add eax, DWORD [rdi + b]
                        ; mov DWORD [rdi + a], eax
                    );
                }
                IROp::Sub => {
                    dynasm!(ops
                        ; mov eax, DWORD [rdi + a]
                        ; sub eax, DWORD [rdi + b]
                        ; mov DWORD [rdi + a], eax
                    );
                }
                IROp::Mul => {
                    dynasm!(ops
                        ; mov eax, DWORD [rdi + a]
                        ; imul eax, DWORD [rdi + b]
                        ; mov DWORD [rdi + a], eax
                    );
                }
                IROp::Neg => {
                    dynasm!(ops
                        ; neg DWORD [rdi + a]
                    );
                }
                IROp::AddImm => {
                    let imm = inst.op2;
                    dynasm!(ops
                        ; add DWORD [rdi + a], imm
                    );
                }
                IROp::Cmp => {
                    dynasm!(ops
                        ; xor ecx, ecx
                        ; xor edx, edx
                        ; mov eax, DWORD [rdi + a]
                        ; cmp eax, DWORD [rdi + b]
                        ; setg cl
                        ; setl dl
                        ; sub ecx, edx
                        ; mov DWORD [rdi + a], ecx
                    );
                }
                IROp::Label => {
                    let label = labels[inst.op1 as usize];
                    dynasm!(ops
                        ; =>label
                    );
                }
                IROp::Jmp => {
                    let label = labels[inst.op1 as usize];
                    dynasm!(ops
                        ; jmp =>label
                    );
                }
                IROp::JmpGt
                | IROp::JmpGe
                | IROp::JmpEq
                | IROp::JmpNe
                | IROp::JmpLt
                | IROp::JmpLe => {
                    let label = labels[inst.op2 as usize];
                    dynasm!(ops
                        ; cmp DWORD [rdi + a], 0
                    );
                    match inst.op {
                        IROp::JmpGt => dynasm!(ops ; jg =>label),
                        IROp::JmpGe => dynasm!(ops ; jge =>label),
                        IROp::JmpEq => dynasm!(ops ; je =>label),
                        IROp::JmpNe => dynasm!(ops ; jne =>label),
                        IROp::JmpLt => dynasm!(ops ; jl =>label),
                        _ => dynasm!(ops ; jle =>label),
                    }
                }
                IROp::Ret if inst.op1 == VOID => {
                    dynasm!(ops
                        ; xor eax, eax
                        ; ret
                    );
                }
                IROp::Ret => {
                    dynasm!(ops
                        ; mov eax, DWORD [rdi + a]
                        ; ret
                    );
                }
                // idiv traps on a zero divisor, such methods stay interpreted.
                IROp::Div | IROp::Rem => {
                    return Err(failure("x86_64 backend does not lower div or rem"));
                }
            }
        }
        dynasm!(ops
            ; xor eax, eax
            ; ret
        );

        let buf = ops
            .finalize()
            .map_err(|_| failure("could not finalize the assembler"))?;
        Ok(Box::new(NativeMethod {
            start,
            buf,
            registers: request.registers,
            args: request.args,
        }))
    }
}

/// Entry point in an executable buffer.
struct NativeMethod {
    start: AssemblyOffset,
    buf: ExecutableBuffer,
    registers: usize,
    args: usize,
}

impl CompiledMethod for NativeMethod {
    fn invoke(&self, args: &[i32]) -> Result<i32> {
        check_args(self.args, args)?;
        let mut regs = vec![0i32; self.registers.max(1)];
        regs[..args.len()].copy_from_slice(args);
        // SAFETY: `start` is the entry of code emitted by `compile`, which
        // only touches `registers` slots behind `rdi` and returns in `eax`.
        let execute: extern "sysv64" fn(*mut i32) -> i32 =
            unsafe { std::mem::transmute(self.buf.ptr(self.start)) };
        Ok(execute(regs.as_mut_ptr()))
    }
}
