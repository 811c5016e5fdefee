//! Host implementations of the guest library's `native` methods.
//!
//! Natives operate directly on the caller's operand stack. Only
//! `java/lang/System.registerNative` is available at first; the guest
//! `System` class calls it from its static initializer to make the rest
//! available.
use std::collections::HashMap;
use std::fmt;
use std::io::Write;
use std::time::{SystemTime, UNIX_EPOCH};

use crate::error::{Result, RuntimeError};
use crate::heap::Heap;
use crate::runtime::{Frame, ObjectRef};

const CLZ_SYSTEM: &str = "java/lang/System";

/// Everything a native method may touch.
pub struct NativeEnv<'a> {
    pub natives: &'a mut NativeMethods,
    pub frame: &'a mut Frame,
    pub heap: &'a mut Heap,
    pub out: &'a mut dyn Write,
}

impl NativeEnv<'_> {
    fn pop_string(&mut self) -> Result<String> {
        match self.frame.pop_ref()? {
            Some(r) => Ok(self.heap.string(r)?.to_owned()),
            None => Ok("null".to_owned()),
        }
    }

    fn push_string(&mut self, s: String) -> Result<()> {
        let r = self.heap.alloc_string(s);
        self.frame.push_ref(Some(r))
    }
}

pub type NativeMethod = fn(&mut NativeEnv<'_>) -> Result<()>;

/// Native method table keyed by `class@method@descriptor`.
pub struct NativeMethods {
    methods: HashMap<String, NativeMethod>,
}

impl fmt::Debug for NativeMethods {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_set().entries(self.methods.keys()).finish()
    }
}

impl Default for NativeMethods {
    fn default() -> Self {
        Self::new()
    }
}

impl NativeMethods {
    pub fn new() -> Self {
        let mut natives = Self {
            methods: HashMap::new(),
        };
        natives.register(CLZ_SYSTEM, "registerNative", "()V", |env| {
            env.natives.register_all();
            Ok(())
        });
        natives
    }

    pub fn make_key(class_name: &str, method_name: &str, descriptor: &str) -> String {
        format!("{class_name}@{method_name}@{descriptor}")
    }

    pub fn register(
        &mut self,
        class_name: &str,
        method_name: &str,
        descriptor: &str,
        method: NativeMethod,
    ) {
        self.methods
            .insert(Self::make_key(class_name, method_name, descriptor), method);
    }

    pub fn contains(&self, key: &str) -> bool {
        self.methods.contains_key(key)
    }

    pub fn invoke(
        &mut self,
        key: &str,
        frame: &mut Frame,
        heap: &mut Heap,
        out: &mut dyn Write,
    ) -> Result<()> {
        let method = *self
            .methods
            .get(key)
            .ok_or_else(|| RuntimeError::NativeMethodNotFound(key.to_owned()))?;
        log::info!("call native method: {key}");
        let mut env = NativeEnv {
            natives: self,
            frame,
            heap,
            out,
        };
        method(&mut env)
    }

    fn register_all(&mut self) {
        log::info!("register all native methods");
        self.register(CLZ_SYSTEM, "println", "(Ljava/lang/String;)V", |env| {
            let s = env.pop_string()?;
            writeln!(env.out, "{s}")?;
            Ok(())
        });
        self.register(CLZ_SYSTEM, "showVersion", "()V", |env| {
            writeln!(env.out, "drip {}", env!("CARGO_PKG_VERSION"))?;
            Ok(())
        });
        self.register(CLZ_SYSTEM, "currentTimeSeconds", "()I", |env| {
            let seconds = SystemTime::now()
                .duration_since(UNIX_EPOCH)
                .map_or(0, |d| d.as_secs());
            env.frame.push_int(seconds as i32)
        });
        self.register(
            "java/lang/StringBuilder",
            "append",
            "(Ljava/lang/Object;Ljava/lang/String;)Ljava/lang/Object;",
            |env| {
                let s = env.pop_string()?;
                let data: Option<ObjectRef> = env.frame.pop_ref()?;
                let joined = match data {
                    Some(r) => format!("{}{s}", env.heap.string(r)?),
                    None => s,
                };
                env.push_string(joined)
            },
        );
        self.register("java/lang/String", "valueOf", "(I)Ljava/lang/String;", |env| {
            let i = env.frame.pop_int()?;
            env.push_string(i.to_string())
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::class::ClassId;

    #[test]
    fn natives_become_available_after_register_native() {
        let mut natives = NativeMethods::new();
        let mut heap = Heap::new();
        let mut frame = Frame::new(ClassId::new(0), 0, 0, 4);
        let mut out = Vec::new();
        let println = NativeMethods::make_key(CLZ_SYSTEM, "println", "(Ljava/lang/String;)V");
        assert!(!natives.contains(&println));
        assert!(matches!(
            natives.invoke(&println, &mut frame, &mut heap, &mut out),
            Err(RuntimeError::NativeMethodNotFound(_))
        ));

        let register = NativeMethods::make_key(CLZ_SYSTEM, "registerNative", "()V");
        natives.invoke(&register, &mut frame, &mut heap, &mut out).unwrap();
        assert!(natives.contains(&println));

        let hello = heap.alloc_string("hello");
        frame.push_ref(Some(hello)).unwrap();
        natives.invoke(&println, &mut frame, &mut heap, &mut out).unwrap();
        assert_eq!(String::from_utf8(out).unwrap(), "hello\n");
        assert_eq!(frame.height(), 0);
    }

    #[test]
    fn string_building() {
        let mut natives = NativeMethods::new();
        let mut heap = Heap::new();
        let mut frame = Frame::new(ClassId::new(0), 0, 0, 4);
        let mut out = Vec::new();
        natives.register_all();

        let value_of = NativeMethods::make_key("java/lang/String", "valueOf", "(I)Ljava/lang/String;");
        let append = NativeMethods::make_key(
            "java/lang/StringBuilder",
            "append",
            "(Ljava/lang/Object;Ljava/lang/String;)Ljava/lang/Object;",
        );

        frame.push_ref(None).unwrap();
        let s = heap.alloc_string("fac(4):");
        frame.push_ref(Some(s)).unwrap();
        natives.invoke(&append, &mut frame, &mut heap, &mut out).unwrap();
        frame.push_int(24).unwrap();
        natives.invoke(&value_of, &mut frame, &mut heap, &mut out).unwrap();
        natives.invoke(&append, &mut frame, &mut heap, &mut out).unwrap();

        let r = frame.pop_ref().unwrap().unwrap();
        assert_eq!(heap.string(r).unwrap(), "fac(4):24");
    }
}
