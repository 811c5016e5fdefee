//! Native backends turn serialized IR into callable methods.
use std::collections::HashMap;

use crate::error::{Result, RuntimeError};
use crate::jit::ir::{self, IROp, Inst, VOID};

/// What a compiled method hands back to its caller.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
#[repr(u8)]
pub enum ReturnKind {
    Void = 0,
    Int = 1,
}

/// Everything a backend gets to compile one method.
#[derive(Debug, Copy, Clone)]
pub struct CompileRequest<'a> {
    /// Serialized IR, see `ir::encode`.
    pub code: &'a [u8],
    /// Size of the register file, `max_locals + max_stack`.
    pub registers: usize,
    pub labels: usize,
    /// Arguments land in registers `0..args`.
    pub args: usize,
    pub return_kind: ReturnKind,
}

/// Opaque handle to a compiled method.
pub trait CompiledMethod {
    /// Runs the method on `args`. Void methods return 0.
    fn invoke(&self, args: &[i32]) -> Result<i32>;
}

pub trait NativeBackend {
    fn name(&self) -> &'static str;

    fn compile(&self, request: &CompileRequest) -> Result<Box<dyn CompiledMethod>>;
}

pub(crate) fn check_args(expected: usize, args: &[i32]) -> Result<()> {
    if args.len() != expected {
        return Err(RuntimeError::CompiledMethodFault(format!(
            "compiled method takes {expected} arguments, got {}",
            args.len()
        )));
    }
    Ok(())
}

/// Backend that keeps the decoded IR and interprets it.
#[derive(Debug, Default)]
pub struct ReferenceBackend;

impl NativeBackend for ReferenceBackend {
    fn name(&self) -> &'static str {
        "reference"
    }

    fn compile(&self, request: &CompileRequest) -> Result<Box<dyn CompiledMethod>> {
        let insts = ir::decode(request.code)?;
        ir::validate(&insts, request.registers, request.labels)?;
        if request.args > request.registers {
            return Err(RuntimeError::JitCompileFailure(format!(
                "{} arguments do not fit {} registers",
                request.args, request.registers
            )));
        }
        let mut targets = HashMap::new();
        for (position, inst) in insts.iter().enumerate() {
            if inst.op == IROp::Label {
                targets.insert(inst.op1, position);
            }
        }
        Ok(Box::new(ReferenceMethod {
            insts,
            targets,
            registers: request.registers,
            args: request.args,
            return_kind: request.return_kind,
        }))
    }
}

#[derive(Debug)]
struct ReferenceMethod {
    insts: Vec<Inst>,
    // Label → position of its marker in `insts`.
    targets: HashMap<i32, usize>,
    registers: usize,
    args: usize,
    return_kind: ReturnKind,
}

impl ReferenceMethod {
    fn target(&self, label: i32) -> Result<usize> {
        self.targets
            .get(&label)
            .copied()
            .ok_or_else(|| RuntimeError::CompiledMethodFault(format!("label {label} is never bound")))
    }
}

impl CompiledMethod for ReferenceMethod {
    fn invoke(&self, args: &[i32]) -> Result<i32> {
        check_args(self.args, args)?;
        let mut regs = vec![0i32; self.registers];
        regs[..args.len()].copy_from_slice(args);
        // Operands were validated at compile time.
        let r = |reg: i32| reg as usize;
        let mut position = 0;
        while let Some(inst) = self.insts.get(position) {
            position += 1;
            let (a, b) = (inst.op1, inst.op2);
            match inst.op {
                IROp::Nop | IROp::Label => {}
                IROp::Mov => regs[r(b)] = a,
                IROp::Lod => regs[r(b)] = regs[r(a)],
                IROp::Add => regs[r(a)] = regs[r(a)].wrapping_add(regs[r(b)]),
                IROp::Sub => regs[r(a)] = regs[r(a)].wrapping_sub(regs[r(b)]),
                IROp::Mul => regs[r(a)] = regs[r(a)].wrapping_mul(regs[r(b)]),
                IROp::Div | IROp::Rem => {
                    let divisor = regs[r(b)];
                    if divisor == 0 {
                        return Err(RuntimeError::DivisionByZero);
                    }
                    regs[r(a)] = if inst.op == IROp::Div {
                        regs[r(a)].wrapping_div(divisor)
                    } else {
                        regs[r(a)].wrapping_rem(divisor)
                    };
                }
                IROp::Neg => regs[r(a)] = regs[r(a)].wrapping_neg(),
                IROp::AddImm => regs[r(a)] = regs[r(a)].wrapping_add(b),
                IROp::Cmp => regs[r(a)] = regs[r(a)].cmp(&regs[r(b)]) as i32,
                IROp::Jmp => position = self.target(a)?,
                IROp::JmpGt
                | IROp::JmpGe
                | IROp::JmpEq
                | IROp::JmpNe
                | IROp::JmpLt
                | IROp::JmpLe => {
                    let taken = inst
                        .op
                        .condition()
                        .map_or(false, |cond| cond.holds(regs[r(a)], 0));
                    if taken {
                        position = self.target(b)?;
                    }
                }
                IROp::Ret if a == VOID => return Ok(0),
                IROp::Ret => return Ok(regs[r(a)]),
            }
        }
        match self.return_kind {
            ReturnKind::Void => Ok(0),
            ReturnKind::Int => Err(RuntimeError::CompiledMethodFault(
                "compiled method ran off its end".to_owned(),
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::jit::ir::encode;

    fn compile(insts: &[Inst], registers: usize, labels: usize, args: usize) -> Box<dyn CompiledMethod> {
        let code = encode(insts);
        ReferenceBackend
            .compile(&CompileRequest {
                code: &code,
                registers,
                labels,
                args,
                return_kind: ReturnKind::Int,
            })
            .unwrap()
    }

    #[test]
    fn runs_a_loop() {
        // r1 = 1; while r0 > 0 { r1 *= r0; r0 -= 1 } return r1
        let fac = compile(
            &[
                Inst::new(IROp::Mov, 1, 1),
                Inst::new(IROp::Label, 0, 0),
                Inst::new(IROp::Lod, 0, 2),
                Inst::new(IROp::JmpLe, 2, 1),
                Inst::new(IROp::Mul, 1, 0),
                Inst::new(IROp::AddImm, 0, -1),
                Inst::new(IROp::Jmp, 0, 0),
                Inst::new(IROp::Label, 1, 0),
                Inst::new(IROp::Ret, 1, 0),
            ],
            3,
            2,
            1,
        );
        assert_eq!(fac.invoke(&[4]).unwrap(), 24);
        assert_eq!(fac.invoke(&[0]).unwrap(), 1);
        assert!(matches!(
            fac.invoke(&[]),
            Err(RuntimeError::CompiledMethodFault(_))
        ));
    }

    #[test]
    fn compare_yields_sign() {
        let cmp = compile(
            &[Inst::new(IROp::Cmp, 0, 1), Inst::new(IROp::Ret, 0, 0)],
            2,
            0,
            2,
        );
        assert_eq!(cmp.invoke(&[3, 9]).unwrap(), -1);
        assert_eq!(cmp.invoke(&[9, 9]).unwrap(), 0);
        assert_eq!(cmp.invoke(&[i32::MAX, i32::MIN]).unwrap(), 1);
    }

    #[test]
    fn division_by_zero_is_reported() {
        let div = compile(
            &[Inst::new(IROp::Div, 0, 1), Inst::new(IROp::Ret, 0, 0)],
            2,
            0,
            2,
        );
        assert_eq!(div.invoke(&[7, 2]).unwrap(), 3);
        assert!(matches!(div.invoke(&[7, 0]), Err(RuntimeError::DivisionByZero)));
    }

    #[test]
    fn running_off_the_end_is_a_fault() {
        let method = compile(&[Inst::new(IROp::Nop, 0, 0)], 1, 0, 0);
        assert!(matches!(
            method.invoke(&[]),
            Err(RuntimeError::CompiledMethodFault(_))
        ));
    }

    #[test]
    fn rejects_malformed_ir() {
        let code = encode(&[Inst::new(IROp::Lod, 0, 5)]);
        let request = CompileRequest {
            code: &code,
            registers: 2,
            labels: 0,
            args: 0,
            return_kind: ReturnKind::Void,
        };
        assert!(ReferenceBackend.compile(&request).is_err());
    }
}
