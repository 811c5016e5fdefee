//! drip is a small JVM: it loads class files from a classpath, interprets
//! their bytecode on a stack machine and compiles hot integer methods to
//! native code.
pub mod bytecode;
pub mod class;
pub mod classpath;
pub mod config;
pub mod descriptor;
pub mod error;
pub mod heap;
pub mod interpreter;
pub mod jit;
pub mod jvm;
pub mod natives;
pub mod profiler;
pub mod runtime;
pub mod vm;

pub use config::VmConfig;
pub use error::{Result, RuntimeError};
pub use vm::Vm;
