//! Interpreter for JVM bytecode.
//!
//! The interpreter executes one instruction of the top frame of a `Thread`
//! per `step`. Instructions are decoded through the VM's `OpcodeTable` at the
//! frame's program counter, branches write the program counter directly.
use crate::bytecode::{InvokeKind, Instruction};
use crate::class::ClassId;
use crate::descriptor::MethodDescriptor;
use crate::error::{Result, RuntimeError};
use crate::jit::ReturnKind;
use crate::jvm::CPInfo;
use crate::natives::NativeMethods;
use crate::runtime::{Frame, ObjectRef, Slot, Thread};
use crate::vm::Vm;

const CLINIT: &str = "<clinit>";

/// Executes the instruction at the program counter of the top frame.
pub fn step(vm: &mut Vm, thread: &mut Thread) -> Result<()> {
    let frame = top(thread)?;
    let pc = frame.pc();
    let code = &vm.loader.class(frame.class()).method_code(frame.method())?.code;
    let (instruction, next) = vm.opcodes.decode(code, pc)?;
    frame.begin_instruction(pc, next);
    log::debug!("{pc:>4}: {instruction:?}");
    execute(vm, thread, instruction)
}

fn top(thread: &mut Thread) -> Result<&mut Frame> {
    thread.top_frame_mut().ok_or(RuntimeError::StackUnderflow)
}

fn execute(vm: &mut Vm, thread: &mut Thread, instruction: Instruction) -> Result<()> {
    use Instruction as I;
    match instruction {
        I::Nop => {}
        I::AconstNull => top(thread)?.push_ref(None)?,
        I::IConst(i) => top(thread)?.push_int(i)?,
        I::Ldc(index) => ldc(vm, top(thread)?, index)?,
        I::ILoad(index) => {
            let frame = top(thread)?;
            let value = frame.load_local(index)?.as_int()?;
            frame.push_int(value)?;
        }
        I::ALoad(index) => {
            let frame = top(thread)?;
            let value = frame.load_local(index)?.as_ref()?;
            frame.push_ref(value)?;
        }
        I::IStore(index) => {
            let frame = top(thread)?;
            let value = frame.pop_int()?;
            frame.store_local(index, Slot::Int(value))?;
        }
        I::AStore(index) => {
            let frame = top(thread)?;
            let value = frame.pop_ref()?;
            frame.store_local(index, Slot::Ref(value))?;
        }
        I::Pop => {
            top(thread)?.pop()?;
        }
        I::Dup => {
            let frame = top(thread)?;
            let value = frame.pop()?;
            frame.push(value)?;
            frame.push(value)?;
        }
        I::Swap => {
            let frame = top(thread)?;
            let b = frame.pop()?;
            let a = frame.pop()?;
            frame.push(b)?;
            frame.push(a)?;
        }
        I::IAdd => binary(top(thread)?, |a, b| Ok(a.wrapping_add(b)))?,
        I::ISub => binary(top(thread)?, |a, b| Ok(a.wrapping_sub(b)))?,
        I::IMul => binary(top(thread)?, |a, b| Ok(a.wrapping_mul(b)))?,
        I::IDiv => binary(top(thread)?, |a, b| match b {
            0 => Err(RuntimeError::DivisionByZero),
            _ => Ok(a.wrapping_div(b)),
        })?,
        I::IRem => binary(top(thread)?, |a, b| match b {
            0 => Err(RuntimeError::DivisionByZero),
            _ => Ok(a.wrapping_rem(b)),
        })?,
        I::INeg => {
            let frame = top(thread)?;
            let value = frame.pop_int()?;
            frame.push_int(value.wrapping_neg())?;
        }
        I::IInc { index, delta } => {
            let frame = top(thread)?;
            let value = frame.load_local(index)?.as_int()?;
            frame.store_local(index, Slot::Int(value.wrapping_add(delta)))?;
        }
        I::If { cond, target } => {
            let frame = top(thread)?;
            if cond.holds(frame.pop_int()?, 0) {
                frame.set_pc(target);
            }
        }
        I::IfICmp { cond, target } => {
            let frame = top(thread)?;
            let b = frame.pop_int()?;
            let a = frame.pop_int()?;
            if cond.holds(a, b) {
                frame.set_pc(target);
            }
        }
        I::IfACmp { equal, target } => {
            let frame = top(thread)?;
            let b = frame.pop_ref()?;
            let a = frame.pop_ref()?;
            if (a == b) == equal {
                frame.set_pc(target);
            }
        }
        I::IfNull { null, target } => {
            let frame = top(thread)?;
            if frame.pop_ref()?.is_none() == null {
                frame.set_pc(target);
            }
        }
        I::Goto(target) => top(thread)?.set_pc(target),
        I::IReturn => {
            let value = top(thread)?.pop_int()?;
            return_from(vm, thread, Some(Slot::Int(value)))?;
        }
        I::AReturn => {
            let value = top(thread)?.pop_ref()?;
            return_from(vm, thread, Some(Slot::Ref(value)))?;
        }
        I::Return => return_from(vm, thread, None)?,
        I::GetStatic(index) => {
            let (owner, name) = static_field(vm, thread, index)?;
            let value = vm.loader.class(owner).get_static(&name)?;
            top(thread)?.push(value)?;
        }
        I::PutStatic(index) => {
            let (owner, name) = static_field(vm, thread, index)?;
            let value = top(thread)?.pop()?;
            vm.loader.class_mut(owner).put_static(&name, value)?;
        }
        I::GetField(index) => {
            let frame = top(thread)?;
            let name = vm.loader.class(frame.class()).resolve_field_name(index)?;
            let object = frame.pop_ref()?.ok_or(RuntimeError::NullReference)?;
            let value = vm.heap.object(object)?.get_field(name)?;
            frame.push(value)?;
        }
        I::PutField(index) => {
            let class = top(thread)?.class();
            let field = vm.loader.class(class).resolve_field_ref(index)?;
            if let Some(owner) = vm.loader.load_class(&field.class_name)? {
                vm.loader.class(owner).find_field(&field.name)?;
            }
            let frame = top(thread)?;
            let value = frame.pop()?;
            let object = frame.pop_ref()?.ok_or(RuntimeError::NullReference)?;
            vm.heap.object_mut(object)?.set_field(&field.name, value);
        }
        I::Invoke { kind, index } => invoke(vm, thread, kind, index)?,
        I::New(index) => {
            let class = top(thread)?.class();
            let name = vm.loader.class(class).resolve_class_name(index)?.to_owned();
            let owner = vm.loader.require_class(&name)?;
            initialize_class(vm, thread, owner)?;
            let fields = vm.loader.class(owner).instance_field_defaults()?;
            let object = vm.heap.alloc_object(owner, &name, fields);
            top(thread)?.push_ref(Some(object))?;
        }
        I::AThrow => {
            let exception = top(thread)?.pop_ref()?.ok_or(RuntimeError::NullReference)?;
            throw_exception(vm, thread, exception)?;
        }
        I::CheckCast(index) => {
            let class = top(thread)?.class();
            let name = vm.loader.class(class).resolve_class_name(index)?.to_owned();
            if let Some(owner) = vm.loader.load_class(&name)? {
                initialize_class(vm, thread, owner)?;
            }
        }
    }
    Ok(())
}

fn binary(frame: &mut Frame, op: impl Fn(i32, i32) -> Result<i32>) -> Result<()> {
    let b = frame.pop_int()?;
    let a = frame.pop_int()?;
    frame.push_int(op(a, b)?)
}

fn ldc(vm: &mut Vm, frame: &mut Frame, index: u16) -> Result<()> {
    let class = vm.loader.class(frame.class());
    match class.constant(index) {
        Some(CPInfo::ConstantString { string_index }) => {
            let s = class.utf8(*string_index)?.to_owned();
            let r = vm.heap.alloc_string(s);
            frame.push_ref(Some(r))
        }
        Some(CPInfo::ConstantInteger { bytes }) => frame.push_int(*bytes),
        _ => Err(RuntimeError::MalformedConstant {
            index,
            expected: "String or Integer",
        }),
    }
}

/// Resolves the owner and name of a static field, initializing the owner.
fn static_field(vm: &mut Vm, thread: &mut Thread, index: u16) -> Result<(ClassId, String)> {
    let class = top(thread)?.class();
    let field = vm.loader.class(class).resolve_field_ref(index)?;
    let owner = vm.loader.require_class(&field.class_name)?;
    initialize_class(vm, thread, owner)?;
    Ok((owner, field.name))
}

fn return_from(vm: &mut Vm, thread: &mut Thread, value: Option<Slot>) -> Result<()> {
    let frame = thread.pop_frame().ok_or(RuntimeError::StackUnderflow)?;
    let class = vm.loader.class(frame.class());
    let name = format!("{}.{}", class.name(), class.method_name(frame.method())?);
    frame.dump(&name);
    log::info!("return from {name}");
    match value {
        Some(value) => thread.deliver_return(value),
        None => Ok(()),
    }
}

fn invoke(vm: &mut Vm, thread: &mut Thread, kind: InvokeKind, index: u16) -> Result<()> {
    let caller = top(thread)?.class();
    let Some(symbol) = vm.loader.resolve_method_by_ref(caller, index)? else {
        return skip_unresolved(vm, thread, caller, kind, index);
    };
    initialize_class(vm, thread, symbol.class)?;

    let class = vm.loader.class(symbol.class);
    let name = class.method_name(symbol.method)?;
    if class.method(symbol.method).is_native() {
        let key = NativeMethods::make_key(class.name(), name, class.method_descriptor(symbol.method)?);
        return vm
            .natives
            .invoke(&key, top(thread)?, &mut vm.heap, vm.out.as_mut());
    }

    if let Some(jit) = vm.jit.as_mut() {
        if let Some(compiled) = jit.prepare(&vm.loader, &vm.opcodes, symbol) {
            let frame = top(thread)?;
            let mut args = vec![0; symbol.arg_count];
            for arg in args.iter_mut().rev() {
                *arg = frame.pop_int()?;
            }
            let value = compiled.invoke(&args)?;
            if compiled.return_kind() == ReturnKind::Int {
                frame.push_int(value)?;
            }
            return Ok(());
        }
    }

    let class = vm.loader.class(symbol.class);
    log::info!("invoke {}.{}", class.name(), class.method_name(symbol.method)?);
    let code = class.method_code(symbol.method)?;
    let mut frame = Frame::new(
        symbol.class,
        symbol.method,
        code.max_locals as usize,
        code.max_stack as usize,
    );
    let caller = top(thread)?;
    for local in (0..symbol.arg_count).rev() {
        frame.store_local(local, caller.pop()?)?;
    }
    thread.push_frame(frame);
    Ok(())
}

// Calls into the unsupported root class are dropped; their operands still
// have to leave the caller's stack.
fn skip_unresolved(
    vm: &mut Vm,
    thread: &mut Thread,
    caller: ClassId,
    kind: InvokeKind,
    index: u16,
) -> Result<()> {
    let method = vm.loader.class(caller).resolve_method_ref(index)?;
    log::warn!(
        "skip call to {}.{}{}",
        method.class_name,
        method.name,
        method.descriptor
    );
    let operands = MethodDescriptor::parse(&method.descriptor)?.arg_slots()
        + usize::from(kind.has_receiver());
    let frame = top(thread)?;
    for _ in 0..operands {
        frame.pop()?;
    }
    Ok(())
}

/// Runs the static initializer of `id` unless it already ran (or is
/// running). The init flag is set before `<clinit>` executes.
pub(crate) fn initialize_class(vm: &mut Vm, thread: &mut Thread, id: ClassId) -> Result<()> {
    let class = vm.loader.class_mut(id);
    if !class.mark_static_initialized() {
        return Ok(());
    }
    let Some(clinit) = class.find_method(CLINIT, "()V") else {
        return Ok(());
    };
    let code = class.method_code(clinit)?;
    let frame = Frame::new(id, clinit, code.max_locals as usize, code.max_stack as usize);
    log::info!("initialize class {}", class.name());
    thread.run_to_end(vm, frame)
}

/// Unwinds the call stack until a frame has a handler covering its current
/// instruction for the class of `exception`.
///
/// Unwinding stops at the thread's innermost floor rather than at an empty
/// stack. Inside a nested `<clinit>` run the frame that triggered the
/// initializer is below the floor, so its handlers are never searched and
/// the exception surfaces as `UncaughtException`.
fn throw_exception(vm: &mut Vm, thread: &mut Thread, exception: ObjectRef) -> Result<()> {
    let class_name = vm.heap.object(exception)?.class_name().to_owned();
    log::info!("throw {class_name}");
    while thread.depth() > thread.floor() {
        let frame = top(thread)?;
        frame.push_ref(Some(exception))?;
        if let Some(handler) = find_handler(vm, frame, &class_name)? {
            log::info!("catch {class_name} at {handler}");
            frame.set_pc(handler);
            return Ok(());
        }
        if let Some(frame) = thread.pop_frame() {
            frame.dump("unwound");
        }
    }
    Err(RuntimeError::UncaughtException(class_name))
}

fn find_handler(vm: &Vm, frame: &Frame, class_name: &str) -> Result<Option<usize>> {
    let class = vm.loader.class(frame.class());
    let code = class.method_code(frame.method())?;
    for entry in &code.exception_table {
        if !entry.covers(frame.inst_start()) {
            continue;
        }
        if entry.catch_type == 0 || class.resolve_class_name(entry.catch_type)? == class_name {
            return Ok(Some(entry.handler_pc as usize));
        }
    }
    Ok(None)
}
