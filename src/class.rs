//! Loaded classes and the class loader: the symbol table the interpreter
//! resolves constant pool references against.
use std::collections::HashMap;

use crate::classpath::ClassSource;
use crate::descriptor::{field_kind, MethodDescriptor};
use crate::error::{Result, RuntimeError};
use crate::jvm::{CPInfo, ClassAccessFlags, Code, FieldInfo, JVMClassFile, MethodInfo};
use crate::runtime::Slot;

/// Root of the class hierarchy. It is not loaded: resolving it yields no
/// class and calls into it are skipped.
pub const ROOT_CLASS: &str = "java/lang/Object";

/// Handle to a class owned by a `ClassLoader`.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub struct ClassId(usize);

impl ClassId {
    pub(crate) fn new(index: usize) -> Self {
        Self(index)
    }

    pub fn index(self) -> usize {
        self.0
    }
}

/// Method reference decoded from the constant pool.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MethodRef {
    pub class_name: String,
    pub name: String,
    pub descriptor: String,
}

/// Field reference decoded from the constant pool.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldRef {
    pub class_name: String,
    pub name: String,
    pub descriptor: String,
}

/// Resolved method: owning class, index into its method table and the
/// number of operand stack slots the call consumes (receiver included).
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct MethodSymbol {
    pub class: ClassId,
    pub method: usize,
    pub arg_count: usize,
}

#[derive(Debug)]
pub struct LoadedClass {
    id: ClassId,
    name: String,
    class_file: JVMClassFile,
    static_initialized: bool,
    statics: HashMap<String, Slot>,
}

impl LoadedClass {
    fn new(id: ClassId, class_file: JVMClassFile) -> Result<Self> {
        let mut class = Self {
            id,
            name: String::new(),
            class_file,
            static_initialized: false,
            statics: HashMap::new(),
        };
        class.name = class.resolve_class_name(class.class_file.this_class)?.to_owned();
        Ok(class)
    }

    pub fn id(&self) -> ClassId {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn class_file(&self) -> &JVMClassFile {
        &self.class_file
    }

    pub fn is_public(&self) -> bool {
        self.class_file.access_flags.contains(ClassAccessFlags::PUBLIC)
    }

    pub fn is_static_initialized(&self) -> bool {
        self.static_initialized
    }

    /// Flips the init flag, returning `false` when it was already set.
    pub fn mark_static_initialized(&mut self) -> bool {
        !std::mem::replace(&mut self.static_initialized, true)
    }

    pub fn method(&self, index: usize) -> &MethodInfo {
        &self.class_file.methods[index]
    }

    pub fn method_name(&self, index: usize) -> Result<&str> {
        self.utf8(self.method(index).name_index)
    }

    pub fn method_descriptor(&self, index: usize) -> Result<&str> {
        self.utf8(self.method(index).descriptor_index)
    }

    pub fn method_code(&self, index: usize) -> Result<&Code> {
        self.method(index).code().ok_or_else(|| {
            RuntimeError::MissingCode(format!(
                "{}.{}",
                self.name,
                self.method_name(index).unwrap_or("?")
            ))
        })
    }

    /// Linear scan for a method by exact name and descriptor.
    pub fn find_method(&self, name: &str, descriptor: &str) -> Option<usize> {
        let found = self.class_file.methods.iter().position(|m| {
            self.utf8(m.name_index).map_or(false, |n| n == name)
                && self.utf8(m.descriptor_index).map_or(false, |d| d == descriptor)
        });
        if found.is_some() {
            log::debug!("found method {}.{name}:{descriptor}", self.name);
        }
        found
    }

    pub fn find_field(&self, name: &str) -> Result<&FieldInfo> {
        self.class_file
            .fields
            .iter()
            .find(|f| self.utf8(f.name_index).map_or(false, |n| n == name))
            .ok_or_else(|| RuntimeError::FieldNotFound {
                class: self.name.clone(),
                name: name.to_owned(),
            })
    }

    /// Utf8 constant at `index`.
    pub fn utf8(&self, index: u16) -> Result<&str> {
        match self.constant(index) {
            Some(CPInfo::ConstantUtf8 { bytes }) => Ok(bytes),
            _ => Err(malformed(index, "Utf8")),
        }
    }

    pub fn constant(&self, index: u16) -> Option<&CPInfo> {
        self.class_file.constant_pool.get(index as usize)
    }

    pub fn resolve_class_name(&self, index: u16) -> Result<&str> {
        match self.constant(index) {
            Some(CPInfo::ConstantClass { name_index }) => self.utf8(*name_index),
            _ => Err(malformed(index, "Class")),
        }
    }

    pub fn resolve_field_name(&self, index: u16) -> Result<&str> {
        match self.constant(index) {
            Some(CPInfo::ConstantFieldRef {
                name_and_type_index,
                ..
            }) => Ok(self.name_and_type(*name_and_type_index)?.0),
            _ => Err(malformed(index, "Fieldref")),
        }
    }

    pub fn resolve_field_ref(&self, index: u16) -> Result<FieldRef> {
        match self.constant(index) {
            Some(CPInfo::ConstantFieldRef {
                class_index,
                name_and_type_index,
            }) => {
                let (name, descriptor) = self.name_and_type(*name_and_type_index)?;
                Ok(FieldRef {
                    class_name: self.resolve_class_name(*class_index)?.to_owned(),
                    name: name.to_owned(),
                    descriptor: descriptor.to_owned(),
                })
            }
            _ => Err(malformed(index, "Fieldref")),
        }
    }

    pub fn resolve_method_ref(&self, index: u16) -> Result<MethodRef> {
        match self.constant(index) {
            Some(CPInfo::ConstantMethodRef {
                class_index,
                name_and_type_index,
            })
            | Some(CPInfo::ConstantInterfaceMethodRef {
                class_index,
                name_and_type_index,
            }) => {
                let (name, descriptor) = self.name_and_type(*name_and_type_index)?;
                Ok(MethodRef {
                    class_name: self.resolve_class_name(*class_index)?.to_owned(),
                    name: name.to_owned(),
                    descriptor: descriptor.to_owned(),
                })
            }
            _ => Err(malformed(index, "Methodref")),
        }
    }

    fn name_and_type(&self, index: u16) -> Result<(&str, &str)> {
        match self.constant(index) {
            Some(CPInfo::ConstantNameAndType {
                name_index,
                descriptor_index,
            }) => Ok((self.utf8(*name_index)?, self.utf8(*descriptor_index)?)),
            _ => Err(malformed(index, "NameAndType")),
        }
    }

    pub fn get_static(&self, name: &str) -> Result<Slot> {
        self.statics
            .get(name)
            .copied()
            .ok_or_else(|| RuntimeError::FieldNotFound {
                class: self.name.clone(),
                name: name.to_owned(),
            })
    }

    pub fn put_static(&mut self, name: &str, slot: Slot) -> Result<()> {
        match self.statics.get_mut(name) {
            Some(value) => {
                *value = slot;
                Ok(())
            }
            None => Err(RuntimeError::FieldNotFound {
                class: self.name.clone(),
                name: name.to_owned(),
            }),
        }
    }

    /// Default values for the instance fields of a new object.
    pub fn instance_field_defaults(&self) -> Result<HashMap<String, Slot>> {
        self.field_defaults(false)
    }

    fn field_defaults(&self, statics: bool) -> Result<HashMap<String, Slot>> {
        let mut fields = HashMap::new();
        for field in self.class_file.fields.iter().filter(|f| f.is_static() == statics) {
            let kind = field_kind(self.utf8(field.descriptor_index)?)?;
            fields.insert(self.utf8(field.name_index)?.to_owned(), kind.default_slot());
        }
        Ok(fields)
    }

    // Static storage starts out with type defaults.
    fn prepare(&mut self) -> Result<()> {
        self.statics = self.field_defaults(true)?;
        Ok(())
    }
}

fn malformed(index: u16, expected: &'static str) -> RuntimeError {
    RuntimeError::MalformedConstant { index, expected }
}

/// Owns every class it loaded. Loading the same name twice yields the same
/// `ClassId`.
pub struct ClassLoader {
    source: Box<dyn ClassSource>,
    classes: Vec<LoadedClass>,
    table: HashMap<String, ClassId>,
}

impl ClassLoader {
    pub fn new(source: Box<dyn ClassSource>) -> Self {
        Self {
            source,
            classes: Vec::new(),
            table: HashMap::new(),
        }
    }

    /// Loads `name`, returning `Ok(None)` for the unsupported root class.
    pub fn load_class(&mut self, name: &str) -> Result<Option<ClassId>> {
        if name == ROOT_CLASS {
            log::warn!("ignore {ROOT_CLASS}");
            return Ok(None);
        }
        if let Some(id) = self.table.get(name) {
            return Ok(Some(*id));
        }
        let class_file = self
            .source
            .find_class(name)?
            .ok_or_else(|| RuntimeError::ClassNotFound(name.to_owned()))?;
        let id = ClassId::new(self.classes.len());
        let mut class = LoadedClass::new(id, class_file)?;
        if class.name() != name {
            return Err(RuntimeError::ClassFormat(format!(
                "expected class {name}, found {}",
                class.name()
            )));
        }
        class.prepare()?;
        log::info!("loaded class {name}");
        self.classes.push(class);
        self.table.insert(name.to_owned(), id);
        Ok(Some(id))
    }

    /// Loads `name`, treating the root class as missing.
    pub fn require_class(&mut self, name: &str) -> Result<ClassId> {
        self.load_class(name)?
            .ok_or_else(|| RuntimeError::ClassNotFound(name.to_owned()))
    }

    pub fn find_loaded(&self, name: &str) -> Option<ClassId> {
        self.table.get(name).copied()
    }

    pub fn class(&self, id: ClassId) -> &LoadedClass {
        &self.classes[id.0]
    }

    pub fn class_mut(&mut self, id: ClassId) -> &mut LoadedClass {
        &mut self.classes[id.0]
    }

    pub fn len(&self) -> usize {
        self.classes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.classes.is_empty()
    }

    /// Resolves the method reference at `index` of `from`'s constant pool.
    ///
    /// Returns `Ok(None)` when the owner is the root class; the caller still
    /// has to consume the call's operands.
    pub fn resolve_method_by_ref(
        &mut self,
        from: ClassId,
        index: u16,
    ) -> Result<Option<MethodSymbol>> {
        let method_ref = self.class(from).resolve_method_ref(index)?;
        let Some(owner) = self.load_class(&method_ref.class_name)? else {
            return Ok(None);
        };
        let class = self.class(owner);
        let method = class
            .find_method(&method_ref.name, &method_ref.descriptor)
            .ok_or_else(|| RuntimeError::MethodNotFound {
                class: method_ref.class_name.clone(),
                name: method_ref.name.clone(),
                descriptor: method_ref.descriptor.clone(),
            })?;
        let receiver = usize::from(!class.method(method).is_static());
        let arg_count = MethodDescriptor::parse(&method_ref.descriptor)?.arg_slots() + receiver;
        Ok(Some(MethodSymbol {
            class: owner,
            method,
            arg_count,
        }))
    }
}
