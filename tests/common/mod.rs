//! In-memory class assembly for the integration tests.
#![allow(dead_code)]

use std::cell::RefCell;
use std::collections::HashMap;
use std::io::{self, Write};
use std::rc::Rc;

use drip::classpath::MemoryClassSource;
use drip::jvm::{
    AttributeInfo, CPInfo, ClassAccessFlags, Code, ExceptionTableEntry, FieldAccessFlags,
    FieldInfo, JVMClassFile, MethodAccessFlags, MethodInfo,
};
use drip::{Vm, VmConfig};

pub const OBJECT: &str = "java/lang/Object";
pub const SYSTEM: &str = "java/lang/System";
pub const STRING: &str = "java/lang/String";
pub const STRING_BUILDER: &str = "java/lang/StringBuilder";

pub fn public_static() -> MethodAccessFlags {
    MethodAccessFlags::PUBLIC | MethodAccessFlags::STATIC
}

/// Assembles a `JVMClassFile` and its constant pool.
pub struct ClassBuilder {
    pool: Vec<CPInfo>,
    this_class: u16,
    super_class: u16,
    fields: Vec<FieldInfo>,
    methods: Vec<MethodInfo>,
}

impl ClassBuilder {
    pub fn new(name: &str) -> Self {
        let mut builder = Self {
            pool: vec![CPInfo::Unusable],
            this_class: 0,
            super_class: 0,
            fields: Vec::new(),
            methods: Vec::new(),
        };
        builder.this_class = builder.class(name);
        builder.super_class = builder.class(OBJECT);
        builder
    }

    fn add(&mut self, constant: CPInfo) -> u16 {
        if let Some(index) = self.pool.iter().position(|c| *c == constant) {
            return index as u16;
        }
        self.pool.push(constant);
        (self.pool.len() - 1) as u16
    }

    pub fn utf8(&mut self, s: &str) -> u16 {
        self.add(CPInfo::ConstantUtf8 { bytes: s.to_owned() })
    }

    pub fn class(&mut self, name: &str) -> u16 {
        let name_index = self.utf8(name);
        self.add(CPInfo::ConstantClass { name_index })
    }

    pub fn string(&mut self, s: &str) -> u16 {
        let string_index = self.utf8(s);
        self.add(CPInfo::ConstantString { string_index })
    }

    pub fn integer(&mut self, value: i32) -> u16 {
        self.add(CPInfo::ConstantInteger { bytes: value })
    }

    fn name_and_type(&mut self, name: &str, descriptor: &str) -> u16 {
        let name_index = self.utf8(name);
        let descriptor_index = self.utf8(descriptor);
        self.add(CPInfo::ConstantNameAndType {
            name_index,
            descriptor_index,
        })
    }

    pub fn method_ref(&mut self, class: &str, name: &str, descriptor: &str) -> u16 {
        let class_index = self.class(class);
        let name_and_type_index = self.name_and_type(name, descriptor);
        self.add(CPInfo::ConstantMethodRef {
            class_index,
            name_and_type_index,
        })
    }

    pub fn field_ref(&mut self, class: &str, name: &str, descriptor: &str) -> u16 {
        let class_index = self.class(class);
        let name_and_type_index = self.name_and_type(name, descriptor);
        self.add(CPInfo::ConstantFieldRef {
            class_index,
            name_and_type_index,
        })
    }

    pub fn field(&mut self, access_flags: FieldAccessFlags, name: &str, descriptor: &str) -> &mut Self {
        let name_index = self.utf8(name);
        let descriptor_index = self.utf8(descriptor);
        self.fields.push(FieldInfo {
            access_flags,
            name_index,
            descriptor_index,
            attributes: HashMap::new(),
        });
        self
    }

    pub fn method(
        &mut self,
        access_flags: MethodAccessFlags,
        name: &str,
        descriptor: &str,
        code: Code,
    ) -> &mut Self {
        let mut attributes = HashMap::new();
        attributes.insert("Code".to_owned(), AttributeInfo::CodeAttribute(code));
        self.push_method(access_flags, name, descriptor, attributes)
    }

    pub fn native_method(&mut self, name: &str, descriptor: &str) -> &mut Self {
        let flags = public_static() | MethodAccessFlags::NATIVE;
        self.push_method(flags, name, descriptor, HashMap::new())
    }

    fn push_method(
        &mut self,
        access_flags: MethodAccessFlags,
        name: &str,
        descriptor: &str,
        attributes: HashMap<String, AttributeInfo>,
    ) -> &mut Self {
        let name_index = self.utf8(name);
        let descriptor_index = self.utf8(descriptor);
        self.methods.push(MethodInfo {
            access_flags,
            name_index,
            descriptor_index,
            attributes,
        });
        self
    }

    pub fn build(&self) -> JVMClassFile {
        JVMClassFile {
            minor_version: 0,
            major_version: 52,
            constant_pool: self.pool.clone(),
            access_flags: ClassAccessFlags::PUBLIC | ClassAccessFlags::SUPER,
            this_class: self.this_class,
            super_class: self.super_class,
            interfaces: Vec::new(),
            fields: self.fields.clone(),
            methods: self.methods.clone(),
        }
    }
}

pub fn code(max_stack: u16, max_locals: u16, code: Vec<u8>) -> Code {
    Code {
        max_stack,
        max_locals,
        code,
        exception_table: Vec::new(),
    }
}

pub fn handler(start_pc: u16, end_pc: u16, handler_pc: u16, catch_type: u16) -> ExceptionTableEntry {
    ExceptionTableEntry {
        start_pc,
        end_pc,
        handler_pc,
        catch_type,
    }
}

/// Opcode followed by a constant pool index.
pub fn op_u16(op: u8, index: u16) -> Vec<u8> {
    let [hi, lo] = index.to_be_bytes();
    vec![op, hi, lo]
}

/// Branch opcode followed by its offset.
pub fn branch(op: u8, offset: i16) -> Vec<u8> {
    let [hi, lo] = offset.to_be_bytes();
    vec![op, hi, lo]
}

/// The guest side of the native library: `System` registers the natives
/// from its static initializer.
pub fn runtime_classes() -> MemoryClassSource {
    let mut system = ClassBuilder::new(SYSTEM);
    let register = system.method_ref(SYSTEM, "registerNative", "()V");
    system
        .native_method("registerNative", "()V")
        .native_method("println", "(Ljava/lang/String;)V")
        .native_method("showVersion", "()V")
        .native_method("currentTimeSeconds", "()I")
        .method(
            MethodAccessFlags::STATIC,
            "<clinit>",
            "()V",
            code(0, 0, [op_u16(0xb8, register), vec![0xb1]].concat()),
        );

    let mut builder = ClassBuilder::new(STRING_BUILDER);
    builder.native_method(
        "append",
        "(Ljava/lang/Object;Ljava/lang/String;)Ljava/lang/Object;",
    );

    let mut string = ClassBuilder::new(STRING);
    string.native_method("valueOf", "(I)Ljava/lang/String;");

    MemoryClassSource::new()
        .with(SYSTEM, system.build())
        .with(STRING_BUILDER, builder.build())
        .with(STRING, string.build())
}

/// Write sink whose contents stay readable after the VM took it.
#[derive(Debug, Clone, Default)]
pub struct SharedBuffer(Rc<RefCell<Vec<u8>>>);

impl SharedBuffer {
    pub fn contents(&self) -> String {
        String::from_utf8_lossy(&self.0.borrow()).into_owned()
    }
}

impl Write for SharedBuffer {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0.borrow_mut().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

pub fn vm_with(source: MemoryClassSource, config: &VmConfig) -> (Vm, SharedBuffer) {
    let out = SharedBuffer::default();
    let vm = Vm::with_source(Box::new(source), config).with_output(Box::new(out.clone()));
    (vm, out)
}

pub fn vm(source: MemoryClassSource) -> (Vm, SharedBuffer) {
    vm_with(source, &VmConfig::default())
}
