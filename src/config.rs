//! Runtime settings, filled from the command line by the `drip` binary.
use std::path::PathBuf;

use crate::jit::JitBackendKind;

#[derive(Debug, Clone)]
pub struct VmConfig {
    /// Directories searched for classes, in order.
    pub classpath: Vec<PathBuf>,
    pub jit: bool,
    /// Calls of a method before it gets compiled.
    pub jit_threshold: usize,
    pub jit_backend: JitBackendKind,
    /// File receiving the serialized IR of the last compiled method.
    pub dump_ir: Option<PathBuf>,
}

impl Default for VmConfig {
    fn default() -> Self {
        Self {
            classpath: vec![PathBuf::from(".")],
            jit: false,
            jit_threshold: 2,
            jit_backend: JitBackendKind::default(),
            dump_ir: None,
        }
    }
}
