mod common;

use common::*;
use drip::classpath::MemoryClassSource;
use drip::jvm::{FieldAccessFlags, MethodAccessFlags};
use drip::runtime::Slot;
use drip::RuntimeError;

const ARITH: &str = "test/Arith";

fn arith() -> MemoryClassSource {
    let mut class = ClassBuilder::new(ARITH);
    let add = class.method_ref(ARITH, "add", "(II)I");
    let sub = class.method_ref(ARITH, "sub", "(II)I");
    let fac = class.method_ref(ARITH, "fac", "(I)I");
    let sum = class.field_ref(ARITH, "sum", "I");
    let diff = class.field_ref(ARITH, "diff", "I");
    class
        .field(FieldAccessFlags::STATIC, "sum", "I")
        .field(FieldAccessFlags::STATIC, "diff", "I")
        .method(public_static(), "add", "(II)I", code(2, 2, vec![0x1a, 0x1b, 0x60, 0xac]))
        .method(public_static(), "sub", "(II)I", code(2, 2, vec![0x1a, 0x1b, 0x64, 0xac]))
        .method(public_static(), "div", "(II)I", code(2, 2, vec![0x1a, 0x1b, 0x6c, 0xac]))
        .method(
            public_static(),
            "fac",
            "(I)I",
            code(
                3,
                1,
                [
                    vec![0x1a, 0x04],
                    branch(0xa3, 5),
                    vec![0x04, 0xac, 0x1a, 0x1a, 0x04, 0x64],
                    op_u16(0xb8, fac),
                    vec![0x68, 0xac],
                ]
                .concat(),
            ),
        )
        .method(
            public_static(),
            "fac2",
            "(I)I",
            code(
                2,
                2,
                [
                    vec![0x04, 0x3c, 0x1a],
                    branch(0x9e, 13),
                    vec![0x1b, 0x1a, 0x68, 0x3c, 0x84, 0x00, 0xff],
                    branch(0xa7, -11),
                    vec![0x1b, 0xac],
                ]
                .concat(),
            ),
        )
        .method(public_static(), "floaty", "()I", code(1, 0, vec![0x0b, 0xac]))
        .method(
            public_static(),
            "main",
            "([Ljava/lang/String;)V",
            code(
                2,
                1,
                [
                    vec![0x05, 0x06],
                    op_u16(0xb8, add),
                    op_u16(0xb3, sum),
                    vec![0x08, 0x06],
                    op_u16(0xb8, sub),
                    op_u16(0xb3, diff),
                    vec![0xb1],
                ]
                .concat(),
            ),
        );
    MemoryClassSource::new().with(ARITH, class.build())
}

fn static_int(vm: &drip::Vm, class: &str, name: &str) -> Slot {
    let id = vm.loader().find_loaded(class).unwrap();
    vm.loader().class(id).get_static(name).unwrap()
}

#[test]
fn main_computes_sum_and_difference() {
    let (mut vm, _) = vm(arith());
    vm.run_main("test.Arith").unwrap();
    assert_eq!(static_int(&vm, ARITH, "sum"), Slot::Int(5));
    assert_eq!(static_int(&vm, ARITH, "diff"), Slot::Int(2));
}

#[test]
fn recursive_and_iterative_factorial() {
    let (mut vm, _) = vm(arith());
    let call = |vm: &mut drip::Vm, name: &str, n: i32| {
        vm.invoke_static(ARITH, name, "(I)I", &[Slot::Int(n)]).unwrap()
    };
    assert_eq!(call(&mut vm, "fac", 4), Some(Slot::Int(24)));
    assert_eq!(call(&mut vm, "fac", 1), Some(Slot::Int(1)));
    assert_eq!(call(&mut vm, "fac2", 4), Some(Slot::Int(24)));
    assert_eq!(call(&mut vm, "fac2", 0), Some(Slot::Int(1)));
}

#[test]
fn division_by_zero_is_fatal() {
    let (mut vm, _) = vm(arith());
    let div = |vm: &mut drip::Vm, a: i32, b: i32| {
        vm.invoke_static(ARITH, "div", "(II)I", &[Slot::Int(a), Slot::Int(b)])
    };
    assert_eq!(div(&mut vm, 7, 2).unwrap(), Some(Slot::Int(3)));
    assert!(matches!(div(&mut vm, 7, 0), Err(RuntimeError::DivisionByZero)));
}

#[test]
fn unsupported_opcode_is_reported() {
    let (mut vm, _) = vm(arith());
    assert!(matches!(
        vm.invoke_static(ARITH, "floaty", "()I", &[]),
        Err(RuntimeError::UnsupportedOpcode { opcode: 0x0b, pc: 0 })
    ));
}

#[test]
fn main_must_exist_and_be_public_static() {
    let mut class = ClassBuilder::new("test/NoMain");
    class.method(
        MethodAccessFlags::PUBLIC,
        "main",
        "([Ljava/lang/String;)V",
        code(0, 1, vec![0xb1]),
    );
    let source = MemoryClassSource::new().with("test/NoMain", class.build());
    let (mut vm, _) = vm(source);
    assert!(matches!(
        vm.run_main("test/NoMain"),
        Err(RuntimeError::InvalidMainMethod(_))
    ));
    assert!(matches!(
        vm.run_main("test/Missing"),
        Err(RuntimeError::ClassNotFound(_))
    ));
}

#[test]
fn static_initializer_runs_once() {
    const COUNTER: &str = "test/Counter";
    const MAIN: &str = "test/Main";

    let mut counter = ClassBuilder::new(COUNTER);
    let count = counter.field_ref(COUNTER, "count", "I");
    counter
        .field(FieldAccessFlags::STATIC, "count", "I")
        .method(
            MethodAccessFlags::STATIC,
            "<clinit>",
            "()V",
            code(
                2,
                0,
                [op_u16(0xb2, count), vec![0x04, 0x60], op_u16(0xb3, count), vec![0xb1]].concat(),
            ),
        )
        .method(public_static(), "touch", "()V", code(0, 0, vec![0xb1]));

    let mut main = ClassBuilder::new(MAIN);
    let touch = main.method_ref(COUNTER, "touch", "()V");
    let count = main.field_ref(COUNTER, "count", "I");
    let seen = main.field_ref(MAIN, "seen", "I");
    main.field(FieldAccessFlags::STATIC, "seen", "I").method(
        public_static(),
        "main",
        "([Ljava/lang/String;)V",
        code(
            1,
            1,
            [
                op_u16(0xb8, touch),
                op_u16(0xb8, touch),
                op_u16(0xb2, count),
                vec![0x57],
                op_u16(0xb8, touch),
                op_u16(0xb2, count),
                op_u16(0xb3, seen),
                vec![0xb1],
            ]
            .concat(),
        ),
    );

    let source = MemoryClassSource::new()
        .with(COUNTER, counter.build())
        .with(MAIN, main.build());
    let (mut vm, _) = vm(source);
    vm.run_main(MAIN).unwrap();
    assert_eq!(static_int(&vm, COUNTER, "count"), Slot::Int(1));
    assert_eq!(static_int(&vm, MAIN, "seen"), Slot::Int(1));
    let id = vm.loader().find_loaded(COUNTER).unwrap();
    assert!(vm.loader().class(id).is_static_initialized());
}

#[test]
fn natives_print_and_build_strings() {
    const HELLO: &str = "test/Hello";
    let mut hello = ClassBuilder::new(HELLO);
    let show_version = hello.method_ref(SYSTEM, "showVersion", "()V");
    let println = hello.method_ref(SYSTEM, "println", "(Ljava/lang/String;)V");
    let append = hello.method_ref(
        STRING_BUILDER,
        "append",
        "(Ljava/lang/Object;Ljava/lang/String;)Ljava/lang/Object;",
    );
    let value_of = hello.method_ref(STRING, "valueOf", "(I)Ljava/lang/String;");
    let string = hello.class(STRING);
    let greeting = hello.string("hello") as u8;
    let prefix = hello.string("fac(4)=") as u8;
    hello.method(
        public_static(),
        "main",
        "([Ljava/lang/String;)V",
        code(
            2,
            1,
            [
                op_u16(0xb8, show_version),
                vec![0x12, greeting],
                op_u16(0xb8, println),
                vec![0x01, 0x12, prefix],
                op_u16(0xb8, append),
                vec![0x10, 24],
                op_u16(0xb8, value_of),
                op_u16(0xb8, append),
                op_u16(0xc0, string),
                op_u16(0xb8, println),
                vec![0x01],
                op_u16(0xb8, println),
                vec![0xb1],
            ]
            .concat(),
        ),
    );

    let source = runtime_classes().with(HELLO, hello.build());
    let (mut vm, out) = vm(source);
    vm.run_main(HELLO).unwrap();
    assert_eq!(
        out.contents(),
        format!("drip {}\nhello\nfac(4)=24\nnull\n", env!("CARGO_PKG_VERSION"))
    );
}

#[test]
fn unregistered_native_is_an_error() {
    const LONELY: &str = "test/Lonely";
    let mut lonely = ClassBuilder::new(LONELY);
    let missing = lonely.method_ref(LONELY, "missing", "()V");
    lonely.native_method("missing", "()V").method(
        public_static(),
        "main",
        "([Ljava/lang/String;)V",
        code(0, 1, [op_u16(0xb8, missing), vec![0xb1]].concat()),
    );
    let (mut vm, _) = vm(MemoryClassSource::new().with(LONELY, lonely.build()));
    assert!(matches!(
        vm.run_main(LONELY),
        Err(RuntimeError::NativeMethodNotFound(key)) if key == "test/Lonely@missing@()V"
    ));
}

#[test]
fn objects_carry_fields_and_root_constructor_is_skipped() {
    const POINT: &str = "test/Point";
    let mut point = ClassBuilder::new(POINT);
    let class = point.class(POINT);
    let object = point.class(OBJECT);
    let init = point.method_ref(OBJECT, "<init>", "()V");
    let x = point.field_ref(POINT, "x", "I");
    point
        .field(FieldAccessFlags::empty(), "x", "I")
        .method(
            public_static(),
            "make",
            "()I",
            code(
                2,
                1,
                [
                    op_u16(0xbb, class),
                    vec![0x59],
                    op_u16(0xb7, init),
                    vec![0x4b, 0x2a, 0x10, 7],
                    op_u16(0xb5, x),
                    vec![0x2a],
                    op_u16(0xb4, x),
                    vec![0xac],
                ]
                .concat(),
            ),
        )
        .method(
            public_static(),
            "fresh",
            "()I",
            code(1, 0, [op_u16(0xbb, class), op_u16(0xb4, x), vec![0xac]].concat()),
        )
        .method(
            public_static(),
            "root",
            "()V",
            code(1, 0, [op_u16(0xbb, object), vec![0xb1]].concat()),
        );

    let (mut vm, _) = vm(MemoryClassSource::new().with(POINT, point.build()));
    assert_eq!(vm.invoke_static(POINT, "make", "()I", &[]).unwrap(), Some(Slot::Int(7)));
    assert_eq!(vm.invoke_static(POINT, "fresh", "()I", &[]).unwrap(), Some(Slot::Int(0)));
    assert!(matches!(
        vm.invoke_static(POINT, "root", "()V", &[]),
        Err(RuntimeError::ClassNotFound(name)) if name == OBJECT
    ));
    assert_eq!(vm.heap().len(), 2);
}
