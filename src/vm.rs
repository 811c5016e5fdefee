//! The virtual machine: owns every piece of runtime state and runs
//! programs on it.
use std::io::{self, Write};

use crate::bytecode::OpcodeTable;
use crate::class::{ClassId, ClassLoader};
use crate::classpath::{ClassPath, ClassSource};
use crate::config::VmConfig;
use crate::error::{Result, RuntimeError};
use crate::heap::Heap;
use crate::interpreter;
use crate::jit::JitCache;
use crate::jvm::MethodAccessFlags;
use crate::natives::NativeMethods;
use crate::runtime::{Frame, Slot, Thread};

const MAIN_NAME: &str = "main";
const MAIN_DESCRIPTOR: &str = "([Ljava/lang/String;)V";

/// `Vm` holds the class table, heap, native table, opcode table and JIT
/// cache. Nothing is global, two `Vm`s never share state.
pub struct Vm {
    pub(crate) loader: ClassLoader,
    pub(crate) heap: Heap,
    pub(crate) natives: NativeMethods,
    pub(crate) opcodes: OpcodeTable,
    pub(crate) jit: Option<JitCache>,
    pub(crate) out: Box<dyn Write>,
}

impl Vm {
    /// Builds a VM loading classes from `config.classpath`.
    pub fn new(config: &VmConfig) -> Self {
        let source = ClassPath::new(config.classpath.clone());
        Self::with_source(Box::new(source), config)
    }

    pub fn with_source(source: Box<dyn ClassSource>, config: &VmConfig) -> Self {
        let jit = config.jit.then(|| JitCache::from_config(config));
        if let Some(jit) = &jit {
            log::info!(
                "jit enabled, backend {} threshold {}",
                jit.backend_name(),
                jit.profiler().threshold()
            );
        }
        Self {
            loader: ClassLoader::new(source),
            heap: Heap::new(),
            natives: NativeMethods::new(),
            opcodes: OpcodeTable::new(),
            jit,
            out: Box::new(io::stdout()),
        }
    }

    /// Redirects what guest code prints.
    pub fn with_output(mut self, out: Box<dyn Write>) -> Self {
        self.out = out;
        self
    }

    pub fn loader(&self) -> &ClassLoader {
        &self.loader
    }

    pub fn loader_mut(&mut self) -> &mut ClassLoader {
        &mut self.loader
    }

    pub fn heap(&self) -> &Heap {
        &self.heap
    }

    pub fn natives_mut(&mut self) -> &mut NativeMethods {
        &mut self.natives
    }

    pub fn jit(&self) -> Option<&JitCache> {
        self.jit.as_ref()
    }

    /// Loads `class_name` (dotted or slashed), initializes it and runs its
    /// `public static void main(String[])`.
    pub fn run_main(&mut self, class_name: &str) -> Result<()> {
        let class_name = class_name.replace('.', "/");
        let id = self.loader.require_class(&class_name)?;
        let class = self.loader.class(id);
        let main = class
            .find_method(MAIN_NAME, MAIN_DESCRIPTOR)
            .filter(|m| {
                class
                    .method(*m)
                    .access_flags
                    .contains(MethodAccessFlags::PUBLIC | MethodAccessFlags::STATIC)
            })
            .ok_or_else(|| RuntimeError::InvalidMainMethod(class_name.clone()))?;

        let mut thread = Thread::new();
        interpreter::initialize_class(self, &mut thread, id)?;
        let mut frame = self.frame_for(id, main)?;
        frame.store_local(0, Slot::NULL)?;
        log::info!("run {class_name}.{MAIN_NAME}");
        let result = thread.run(self, frame);
        self.out.flush()?;
        result
    }

    /// Calls a static method with `args` and returns what it returned.
    pub fn invoke_static(
        &mut self,
        class_name: &str,
        name: &str,
        descriptor: &str,
        args: &[Slot],
    ) -> Result<Option<Slot>> {
        let id = self.loader.require_class(class_name)?;
        let method = self
            .loader
            .class(id)
            .find_method(name, descriptor)
            .ok_or_else(|| RuntimeError::MethodNotFound {
                class: class_name.to_owned(),
                name: name.to_owned(),
                descriptor: descriptor.to_owned(),
            })?;
        let mut thread = Thread::new();
        interpreter::initialize_class(self, &mut thread, id)?;
        let mut frame = self.frame_for(id, method)?;
        for (index, arg) in args.iter().enumerate() {
            frame.store_local(index, *arg)?;
        }
        thread.run(self, frame)?;
        self.out.flush()?;
        Ok(thread.take_result())
    }

    fn frame_for(&self, class: ClassId, method: usize) -> Result<Frame> {
        let code = self.loader.class(class).method_code(method)?;
        Ok(Frame::new(
            class,
            method,
            code.max_locals as usize,
            code.max_stack as usize,
        ))
    }
}
