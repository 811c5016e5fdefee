//! Error taxonomy shared by the class loader, the interpreter and the JIT.
use thiserror::Error;

pub type Result<T> = std::result::Result<T, RuntimeError>;

/// `RuntimeError` represents the possible failures of a run. Everything but
/// `JitCompileFailure` is fatal: it propagates to the top of the execution
/// loop and terminates the program. `CompiledMethodFault` is a compiled
/// method misbehaving when called, which is fatal like any other error.
#[derive(Debug, Error)]
pub enum RuntimeError {
    #[error("class not found: {0}")]
    ClassNotFound(String),

    #[error("malformed class file: {0}")]
    ClassFormat(String),

    #[error("method not found: {class}.{name}{descriptor}")]
    MethodNotFound {
        class: String,
        name: String,
        descriptor: String,
    },

    #[error("field not found: {class}.{name}")]
    FieldNotFound { class: String, name: String },

    #[error("malformed constant at index {index}: expected {expected}")]
    MalformedConstant { index: u16, expected: &'static str },

    #[error("unsupported opcode 0x{opcode:02x} at pc {pc}")]
    UnsupportedOpcode { opcode: u8, pc: usize },

    #[error("native method not found: {0}")]
    NativeMethodNotFound(String),

    #[error("operand stack overflow (max stack {0})")]
    StackOverflow(usize),

    #[error("operand stack underflow")]
    StackUnderflow,

    #[error("slot type mismatch: expected {0}")]
    SlotTypeMismatch(&'static str),

    #[error("local {0} is out of range or was never written")]
    InvalidLocal(usize),

    #[error("null reference")]
    NullReference,

    #[error("division by zero")]
    DivisionByZero,

    #[error("method {0} has no code attribute")]
    MissingCode(String),

    #[error("no exception handler for {0}")]
    UncaughtException(String),

    #[error("main method of {0} is missing or not public static")]
    InvalidMainMethod(String),

    #[error("jit compilation failed: {0}")]
    JitCompileFailure(String),

    #[error("compiled method failed: {0}")]
    CompiledMethodFault(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}
