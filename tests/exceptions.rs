mod common;

use common::*;
use drip::classpath::MemoryClassSource;
use drip::jvm::{FieldAccessFlags, MethodAccessFlags};
use drip::runtime::Slot;
use drip::RuntimeError;

const GUARD: &str = "test/Guard";
const BOOM: &str = "test/Boom";
const BAD: &str = "test/Bad";

fn with_handlers(
    max_stack: u16,
    max_locals: u16,
    bytes: Vec<u8>,
    table: Vec<drip::jvm::ExceptionTableEntry>,
) -> drip::jvm::Code {
    let mut code = code(max_stack, max_locals, bytes);
    code.exception_table = table;
    code
}

fn classes() -> MemoryClassSource {
    let mut guard = ClassBuilder::new(GUARD);
    let boom = guard.class(BOOM);
    let other = guard.class("test/Other");
    let handled = guard.field_ref(GUARD, "handled", "I");
    let thrower = guard.method_ref(GUARD, "thrower", "()V");
    let touch = guard.method_ref(BAD, "touch", "()V");
    let finally_hits = guard.field_ref(GUARD, "finallyHits", "I");
    guard
        .field(FieldAccessFlags::STATIC, "handled", "I")
        .field(FieldAccessFlags::STATIC, "finallyHits", "I")
        .method(
            public_static(),
            "guarded",
            "()I",
            with_handlers(
                2,
                1,
                [
                    op_u16(0xbb, boom),
                    vec![0xbf, 0x03, 0xac, 0x4b],
                    op_u16(0xb2, handled),
                    vec![0x04, 0x60],
                    op_u16(0xb3, handled),
                    vec![0x10, 42, 0xac],
                ]
                .concat(),
                vec![handler(0, 4, 6, 0)],
            ),
        )
        .method(
            public_static(),
            "thrower",
            "()V",
            with_handlers(
                1,
                0,
                [op_u16(0xbb, boom), vec![0xbf, 0xb1]].concat(),
                vec![handler(0, 4, 4, other)],
            ),
        )
        .method(
            public_static(),
            "caller",
            "()I",
            with_handlers(
                1,
                0,
                [op_u16(0xb8, thrower), vec![0x03, 0xac, 0x57, 0x10, 9, 0xac]].concat(),
                vec![handler(0, 3, 5, boom)],
            ),
        )
        .method(
            public_static(),
            "callerFinally",
            "()I",
            // try { thrower(); return 0; } finally { finallyHits++; return 7; }
            with_handlers(
                2,
                0,
                [
                    op_u16(0xb8, thrower),
                    vec![0x03, 0xac, 0x57],
                    op_u16(0xb2, finally_hits),
                    vec![0x04, 0x60],
                    op_u16(0xb3, finally_hits),
                    vec![0x10, 7, 0xac],
                ]
                .concat(),
                vec![handler(0, 3, 5, 0)],
            ),
        )
        .method(
            public_static(),
            "keepsOperands",
            "()I",
            // 5 stays below the caught reference: the handler pops it and
            // returns 5.
            with_handlers(
                2,
                0,
                [
                    vec![0x10, 5],
                    op_u16(0xb8, thrower),
                    vec![0x57, 0x03, 0xac, 0x57, 0xac],
                ]
                .concat(),
                vec![handler(2, 5, 8, 0)],
            ),
        )
        .method(
            public_static(),
            "uncaught",
            "()V",
            code(0, 0, [op_u16(0xb8, thrower), vec![0xb1]].concat()),
        )
        .method(public_static(), "throwNull", "()V", code(1, 0, vec![0x01, 0xbf]))
        .method(
            public_static(),
            "initBad",
            "()I",
            with_handlers(
                1,
                0,
                [op_u16(0xb8, touch), vec![0x03, 0xac, 0x57, 0x04, 0xac]].concat(),
                vec![handler(0, 3, 5, 0)],
            ),
        );

    let mut bad = ClassBuilder::new(BAD);
    let boom = bad.class(BOOM);
    bad.method(
        MethodAccessFlags::STATIC,
        "<clinit>",
        "()V",
        code(1, 0, [op_u16(0xbb, boom), vec![0xbf]].concat()),
    )
    .method(public_static(), "touch", "()V", code(0, 0, vec![0xb1]));

    MemoryClassSource::new()
        .with(GUARD, guard.build())
        .with(BOOM, ClassBuilder::new(BOOM).build())
        .with(BAD, bad.build())
}

fn call(vm: &mut drip::Vm, name: &str, descriptor: &str) -> drip::Result<Option<Slot>> {
    vm.invoke_static(GUARD, name, descriptor, &[])
}

#[test]
fn wildcard_handler_runs_once() {
    let (mut vm, _) = vm(classes());
    assert_eq!(call(&mut vm, "guarded", "()I").unwrap(), Some(Slot::Int(42)));
    let id = vm.loader().find_loaded(GUARD).unwrap();
    assert_eq!(vm.loader().class(id).get_static("handled").unwrap(), Slot::Int(1));
}

#[test]
fn mismatched_handler_is_skipped_until_a_frame_matches() {
    let (mut vm, _) = vm(classes());
    assert_eq!(call(&mut vm, "caller", "()I").unwrap(), Some(Slot::Int(9)));
}

#[test]
fn callee_exception_reaches_the_callers_finally_once() {
    let (mut vm, _) = vm(classes());
    assert_eq!(call(&mut vm, "callerFinally", "()I").unwrap(), Some(Slot::Int(7)));
    let id = vm.loader().find_loaded(GUARD).unwrap();
    assert_eq!(vm.loader().class(id).get_static("finallyHits").unwrap(), Slot::Int(1));
}

#[test]
fn caught_exception_is_pushed_above_existing_operands() {
    let (mut vm, _) = vm(classes());
    assert_eq!(call(&mut vm, "keepsOperands", "()I").unwrap(), Some(Slot::Int(5)));
}

#[test]
fn unhandled_exception_reaches_the_top() {
    let (mut vm, _) = vm(classes());
    assert!(matches!(
        call(&mut vm, "uncaught", "()V"),
        Err(RuntimeError::UncaughtException(class)) if class == BOOM
    ));
}

#[test]
fn throwing_null_is_fatal() {
    let (mut vm, _) = vm(classes());
    assert!(matches!(
        call(&mut vm, "throwNull", "()V"),
        Err(RuntimeError::NullReference)
    ));
}

#[test]
fn exception_cannot_escape_a_static_initializer() {
    let (mut vm, _) = vm(classes());
    assert!(matches!(
        call(&mut vm, "initBad", "()I"),
        Err(RuntimeError::UncaughtException(class)) if class == BOOM
    ));
}
