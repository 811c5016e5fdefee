//! JIT compiler for drip.
//!
//! A hot method goes through the pipeline
//!
//! 1. decode the bytecode into positioned instructions (`parser`),
//! 2. discover branch targets and assign them labels,
//! 3. lower the stack code to register IR (`ir`),
//! 4. serialize the IR and hand it to a `NativeBackend`,
//!
//! and the resulting handle is cached by method. A failure anywhere is
//! logged and cached too: that method simply stays interpreted.
use std::collections::HashMap;
use std::fmt;
use std::fs;
use std::path::PathBuf;
use std::str::FromStr;

use crate::bytecode::OpcodeTable;
use crate::class::{ClassLoader, LoadedClass, MethodSymbol};
use crate::config::VmConfig;
use crate::descriptor::{BaseTypeKind, MethodDescriptor};
use crate::error::Result;
use crate::profiler::{MethodKey, Profiler};

pub mod backend;
pub mod ir;
pub mod parser;
#[cfg(target_arch = "x86_64")]
pub mod x64;

pub use backend::{CompileRequest, CompiledMethod, NativeBackend, ReferenceBackend, ReturnKind};

/// Which `NativeBackend` compiles hot methods.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Default)]
pub enum JitBackendKind {
    /// Machine code for the host, when supported.
    #[default]
    Native,
    Reference,
}

impl JitBackendKind {
    pub fn create(self) -> Box<dyn NativeBackend> {
        match self {
            #[cfg(target_arch = "x86_64")]
            Self::Native => Box::new(x64::X64Backend),
            #[cfg(not(target_arch = "x86_64"))]
            Self::Native => {
                log::warn!("no native jit backend for this architecture, using the reference backend");
                Box::new(ReferenceBackend)
            }
            Self::Reference => Box::new(ReferenceBackend),
        }
    }
}

impl FromStr for JitBackendKind {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "native" => Ok(Self::Native),
            "reference" => Ok(Self::Reference),
            _ => Err(format!("unknown jit backend `{s}`, expected native or reference")),
        }
    }
}

impl fmt::Display for JitBackendKind {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Self::Native => write!(f, "native"),
            Self::Reference => write!(f, "reference"),
        }
    }
}

/// A compiled method and the kind of value it leaves for its caller.
pub struct JitMethod {
    handle: Box<dyn CompiledMethod>,
    return_kind: ReturnKind,
}

impl JitMethod {
    pub fn invoke(&self, args: &[i32]) -> Result<i32> {
        self.handle.invoke(args)
    }

    pub fn return_kind(&self) -> ReturnKind {
        self.return_kind
    }
}

/// `JitCache` is responsible for compiling and caching hot methods.
pub struct JitCache {
    backend: Box<dyn NativeBackend>,
    // `None` marks a method that is not eligible or failed to compile.
    methods: HashMap<MethodKey, Option<JitMethod>>,
    profiler: Profiler,
    dump_ir: Option<PathBuf>,
}

impl JitCache {
    pub fn new(backend: Box<dyn NativeBackend>, threshold: usize) -> Self {
        Self {
            backend,
            methods: HashMap::new(),
            profiler: Profiler::new(threshold),
            dump_ir: None,
        }
    }

    pub fn from_config(config: &VmConfig) -> Self {
        let mut jit = Self::new(config.jit_backend.create(), config.jit_threshold);
        jit.dump_ir = config.dump_ir.clone();
        jit
    }

    pub fn backend_name(&self) -> &'static str {
        self.backend.name()
    }

    pub fn profiler(&self) -> &Profiler {
        &self.profiler
    }

    pub fn is_compiled(&self, key: MethodKey) -> bool {
        matches!(self.methods.get(&key), Some(Some(_)))
    }

    /// Counts a call of `symbol` and returns its compiled form, compiling
    /// it first if it just became hot.
    pub fn prepare(
        &mut self,
        loader: &ClassLoader,
        opcodes: &OpcodeTable,
        symbol: MethodSymbol,
    ) -> Option<&JitMethod> {
        let key = MethodKey::from(symbol);
        if !self.methods.contains_key(&key) {
            let class = loader.class(symbol.class);
            let Some(return_kind) = eligible(class, symbol.method) else {
                self.methods.insert(key, None);
                return None;
            };
            self.profiler.count_entry(key);
            if !self.profiler.is_hot(key) {
                return None;
            }
            let name = format!(
                "{}.{}",
                class.name(),
                class.method_name(symbol.method).unwrap_or("?")
            );
            let compiled = match self.compile(class, symbol, opcodes, return_kind) {
                Ok(handle) => {
                    log::info!("jit compiled {name} with the {} backend", self.backend.name());
                    Some(JitMethod {
                        handle,
                        return_kind,
                    })
                }
                Err(err) => {
                    log::warn!("{name} stays interpreted: {err}");
                    None
                }
            };
            self.methods.insert(key, compiled);
        }
        self.methods.get(&key).and_then(Option::as_ref)
    }

    fn compile(
        &self,
        class: &LoadedClass,
        symbol: MethodSymbol,
        opcodes: &OpcodeTable,
        return_kind: ReturnKind,
    ) -> Result<Box<dyn CompiledMethod>> {
        let code = class.method_code(symbol.method)?;
        let (max_locals, max_stack) = (code.max_locals as usize, code.max_stack as usize);
        let instructions = parser::InstParser::new(opcodes).parse(&code.code)?;
        let labels = parser::discover_labels(&instructions);
        let irs = ir::lower(&instructions, &labels, max_locals, max_stack)?;
        if log::log_enabled!(log::Level::Debug) {
            for inst in &irs {
                log::debug!("{inst}");
            }
        }
        let bytes = ir::encode(&irs);
        if let Some(path) = &self.dump_ir {
            if let Err(err) = fs::write(path, &bytes) {
                log::warn!("dump IR to {} failed: {err}", path.display());
            }
        }
        self.backend.compile(&CompileRequest {
            code: &bytes,
            registers: max_locals + max_stack,
            labels: labels.len(),
            args: symbol.arg_count,
            return_kind,
        })
    }
}

/// Static, non native methods taking ints and returning an int or nothing.
fn eligible(class: &LoadedClass, method: usize) -> Option<ReturnKind> {
    let info = class.method(method);
    if !info.is_static() || info.is_native() || info.code().is_none() {
        return None;
    }
    let descriptor = MethodDescriptor::parse(class.method_descriptor(method).ok()?).ok()?;
    if descriptor.args.iter().any(|t| *t != BaseTypeKind::Int) {
        return None;
    }
    match descriptor.ret {
        BaseTypeKind::Int => Some(ReturnKind::Int),
        BaseTypeKind::Void => Some(ReturnKind::Void),
        _ => None,
    }
}
