//! Lightweight implementation of a parser and decoder for JVM bytecode
//! class files.
//!
//! Only the parts of the format the runtime consumes are decoded into
//! structured values: the constant pool, access flags, fields, methods and
//! their `Code`/`ConstantValue` attributes. Everything else is skipped.
use std::collections::HashMap;
use std::fs;
use std::io::{self, Cursor, Read};
use std::path::Path;

use bitflags::bitflags;
use byteorder::{BigEndian, ReadBytesExt};

use crate::error::{Result, RuntimeError};

const MAGIC: u32 = 0xCAFE_BABE;

bitflags! {
    /// Access flags on classes.
    pub struct ClassAccessFlags: u16 {
        const PUBLIC = 0x0001;
        const FINAL = 0x0010;
        const SUPER = 0x0020;
        const INTERFACE = 0x0200;
        const ABSTRACT = 0x0400;
        const SYNTHETIC = 0x1000;
        const ANNOTATION = 0x2000;
        const ENUM = 0x4000;
        const MODULE = 0x8000;
    }
}

bitflags! {
    /// Access flags on methods.
    pub struct MethodAccessFlags: u16 {
        const PUBLIC = 0x0001;
        const PRIVATE = 0x0002;
        const PROTECTED = 0x0004;
        const STATIC = 0x0008;
        const FINAL = 0x0010;
        const SYNCHRONIZED = 0x0020;
        const BRIDGE = 0x0040;
        const VARARGS = 0x0080;
        const NATIVE = 0x0100;
        const ABSTRACT = 0x0400;
        const STRICT = 0x0800;
        const SYNTHETIC = 0x1000;
    }
}

bitflags! {
    /// Access flags on fields.
    pub struct FieldAccessFlags: u16 {
        const PUBLIC = 0x0001;
        const PRIVATE = 0x0002;
        const PROTECTED = 0x0004;
        const STATIC = 0x0008;
        const FINAL = 0x0010;
        const VOLATILE = 0x0040;
        const TRANSIENT = 0x0080;
        const SYNTHETIC = 0x1000;
        const ENUM = 0x4000;
    }
}

/// Constant pool entries.
///
/// Index 0 of the pool and the second slot of `long`/`double` constants hold
/// `Unusable` so that pool indices can be used directly.
#[derive(Debug, Clone, PartialEq)]
pub enum CPInfo {
    Unusable,
    ConstantUtf8 {
        bytes: String,
    },
    ConstantInteger {
        bytes: i32,
    },
    ConstantClass {
        name_index: u16,
    },
    ConstantString {
        string_index: u16,
    },
    ConstantFieldRef {
        class_index: u16,
        name_and_type_index: u16,
    },
    ConstantMethodRef {
        class_index: u16,
        name_and_type_index: u16,
    },
    ConstantInterfaceMethodRef {
        class_index: u16,
        name_and_type_index: u16,
    },
    ConstantNameAndType {
        name_index: u16,
        descriptor_index: u16,
    },
    // Float, long, double, method handles, dynamic constants...
    Unsupported {
        tag: u8,
    },
}

/// One row of a method's exception table. `catch_type` is a class constant
/// index, or 0 for a handler that catches everything (`finally`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExceptionTableEntry {
    pub start_pc: u16,
    pub end_pc: u16,
    pub handler_pc: u16,
    pub catch_type: u16,
}

impl ExceptionTableEntry {
    /// Whether the entry protects the instruction starting at `pc`.
    pub fn covers(&self, pc: usize) -> bool {
        (self.start_pc as usize) <= pc && pc < (self.end_pc as usize)
    }
}

/// Body of a method.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Code {
    pub max_stack: u16,
    pub max_locals: u16,
    pub code: Vec<u8>,
    pub exception_table: Vec<ExceptionTableEntry>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum AttributeInfo {
    CodeAttribute(Code),
    ConstantValueAttribute { constant_value_index: u16 },
    Other { info: Vec<u8> },
}

#[derive(Debug, Clone, PartialEq)]
pub struct FieldInfo {
    pub access_flags: FieldAccessFlags,
    pub name_index: u16,
    pub descriptor_index: u16,
    pub attributes: HashMap<String, AttributeInfo>,
}

impl FieldInfo {
    pub fn is_static(&self) -> bool {
        self.access_flags.contains(FieldAccessFlags::STATIC)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct MethodInfo {
    pub access_flags: MethodAccessFlags,
    pub name_index: u16,
    pub descriptor_index: u16,
    pub attributes: HashMap<String, AttributeInfo>,
}

impl MethodInfo {
    pub fn name_index(&self) -> u16 {
        self.name_index
    }

    pub fn descriptor_index(&self) -> u16 {
        self.descriptor_index
    }

    pub fn attributes(&self) -> &HashMap<String, AttributeInfo> {
        &self.attributes
    }

    pub fn is_static(&self) -> bool {
        self.access_flags.contains(MethodAccessFlags::STATIC)
    }

    pub fn is_native(&self) -> bool {
        self.access_flags.contains(MethodAccessFlags::NATIVE)
    }

    /// Returns the `Code` attribute, absent for native and abstract methods.
    pub fn code(&self) -> Option<&Code> {
        match self.attributes.get("Code") {
            Some(AttributeInfo::CodeAttribute(code)) => Some(code),
            _ => None,
        }
    }
}

/// Structured view of a class file.
#[derive(Debug, Clone, PartialEq)]
pub struct JVMClassFile {
    pub minor_version: u16,
    pub major_version: u16,
    pub constant_pool: Vec<CPInfo>,
    pub access_flags: ClassAccessFlags,
    pub this_class: u16,
    pub super_class: u16,
    pub interfaces: Vec<u16>,
    pub fields: Vec<FieldInfo>,
    pub methods: Vec<MethodInfo>,
}

impl JVMClassFile {
    pub fn constant_pool(&self) -> &[CPInfo] {
        &self.constant_pool
    }

    pub fn methods(&self) -> &[MethodInfo] {
        &self.methods
    }

    pub fn fields(&self) -> &[FieldInfo] {
        &self.fields
    }
}

/// Reads a class file from disk.
pub fn read_class_file(path: &Path) -> io::Result<Vec<u8>> {
    fs::read(path)
}

/// Decoder from raw class file bytes to `JVMClassFile`.
pub struct JVMParser<'a> {
    reader: Cursor<&'a [u8]>,
}

impl<'a> JVMParser<'a> {
    /// Parse a class file.
    pub fn parse(bytes: &'a [u8]) -> Result<JVMClassFile> {
        let mut parser = JVMParser {
            reader: Cursor::new(bytes),
        };
        parser
            .class_file()
            .map_err(|err| RuntimeError::ClassFormat(err.to_string()))
    }

    fn class_file(&mut self) -> io::Result<JVMClassFile> {
        let magic = self.reader.read_u32::<BigEndian>()?;
        if magic != MAGIC {
            return Err(invalid(format!("bad magic 0x{magic:08x}")));
        }
        let minor_version = self.u16()?;
        let major_version = self.u16()?;
        let constant_pool = self.constant_pool()?;
        let access_flags = ClassAccessFlags::from_bits_truncate(self.u16()?);
        let this_class = self.u16()?;
        let super_class = self.u16()?;
        let interfaces_count = self.u16()?;
        let mut interfaces = Vec::with_capacity(interfaces_count as usize);
        for _ in 0..interfaces_count {
            interfaces.push(self.u16()?);
        }

        let fields_count = self.u16()?;
        let mut fields = Vec::with_capacity(fields_count as usize);
        for _ in 0..fields_count {
            let access_flags = FieldAccessFlags::from_bits_truncate(self.u16()?);
            let name_index = self.u16()?;
            let descriptor_index = self.u16()?;
            let attributes = self.attributes(&constant_pool)?;
            fields.push(FieldInfo {
                access_flags,
                name_index,
                descriptor_index,
                attributes,
            });
        }

        let methods_count = self.u16()?;
        let mut methods = Vec::with_capacity(methods_count as usize);
        for _ in 0..methods_count {
            let access_flags =
                MethodAccessFlags::from_bits_truncate(self.u16()?);
            let name_index = self.u16()?;
            let descriptor_index = self.u16()?;
            let attributes = self.attributes(&constant_pool)?;
            methods.push(MethodInfo {
                access_flags,
                name_index,
                descriptor_index,
                attributes,
            });
        }

        // Class level attributes (source file, inner classes...) are unused.
        self.attributes(&constant_pool)?;

        Ok(JVMClassFile {
            minor_version,
            major_version,
            constant_pool,
            access_flags,
            this_class,
            super_class,
            interfaces,
            fields,
            methods,
        })
    }

    fn constant_pool(&mut self) -> io::Result<Vec<CPInfo>> {
        let count = self.u16()? as usize;
        let mut pool = Vec::with_capacity(count);
        pool.push(CPInfo::Unusable);
        while pool.len() < count {
            let tag = self.reader.read_u8()?;
            let entry = match tag {
                1 => {
                    let length = self.u16()? as usize;
                    let mut buf = vec![0u8; length];
                    self.reader.read_exact(&mut buf)?;
                    // Modified UTF-8 only differs from UTF-8 for NUL and
                    // supplementary characters.
                    CPInfo::ConstantUtf8 {
                        bytes: String::from_utf8_lossy(&buf).into_owned(),
                    }
                }
                3 => CPInfo::ConstantInteger {
                    bytes: self.reader.read_i32::<BigEndian>()?,
                },
                4 => {
                    self.reader.read_u32::<BigEndian>()?;
                    CPInfo::Unsupported { tag }
                }
                5 | 6 => {
                    self.reader.read_u64::<BigEndian>()?;
                    pool.push(CPInfo::Unsupported { tag });
                    CPInfo::Unusable
                }
                7 => CPInfo::ConstantClass {
                    name_index: self.u16()?,
                },
                8 => CPInfo::ConstantString {
                    string_index: self.u16()?,
                },
                9 => CPInfo::ConstantFieldRef {
                    class_index: self.u16()?,
                    name_and_type_index: self.u16()?,
                },
                10 => CPInfo::ConstantMethodRef {
                    class_index: self.u16()?,
                    name_and_type_index: self.u16()?,
                },
                11 => CPInfo::ConstantInterfaceMethodRef {
                    class_index: self.u16()?,
                    name_and_type_index: self.u16()?,
                },
                12 => CPInfo::ConstantNameAndType {
                    name_index: self.u16()?,
                    descriptor_index: self.u16()?,
                },
                15 => {
                    self.reader.read_u8()?;
                    self.u16()?;
                    CPInfo::Unsupported { tag }
                }
                16 | 19 | 20 => {
                    self.u16()?;
                    CPInfo::Unsupported { tag }
                }
                17 | 18 => {
                    self.u16()?;
                    self.u16()?;
                    CPInfo::Unsupported { tag }
                }
                _ => {
                    return Err(invalid(format!("unknown constant tag {tag}")))
                }
            };
            pool.push(entry);
        }
        Ok(pool)
    }

    fn attributes(
        &mut self,
        pool: &[CPInfo],
    ) -> io::Result<HashMap<String, AttributeInfo>> {
        let count = self.u16()?;
        let mut attributes = HashMap::new();
        for _ in 0..count {
            let name_index = self.u16()?;
            let length = self.reader.read_u32::<BigEndian>()? as usize;
            let name = match pool.get(name_index as usize) {
                Some(CPInfo::ConstantUtf8 { bytes }) => bytes.clone(),
                _ => {
                    return Err(invalid(format!(
                        "attribute name index {name_index} is not Utf8"
                    )))
                }
            };
            let mut info = vec![0u8; length];
            self.reader.read_exact(&mut info)?;
            let attribute = match name.as_str() {
                "Code" => AttributeInfo::CodeAttribute(Self::code(&info)?),
                "ConstantValue" => {
                    let mut reader = Cursor::new(info.as_slice());
                    AttributeInfo::ConstantValueAttribute {
                        constant_value_index: reader
                            .read_u16::<BigEndian>()?,
                    }
                }
                _ => AttributeInfo::Other { info },
            };
            attributes.insert(name, attribute);
        }
        Ok(attributes)
    }

    fn code(info: &[u8]) -> io::Result<Code> {
        let mut reader = Cursor::new(info);
        let max_stack = reader.read_u16::<BigEndian>()?;
        let max_locals = reader.read_u16::<BigEndian>()?;
        let code_length = reader.read_u32::<BigEndian>()? as usize;
        let mut code = vec![0u8; code_length];
        reader.read_exact(&mut code)?;
        let table_length = reader.read_u16::<BigEndian>()?;
        let mut exception_table = Vec::with_capacity(table_length as usize);
        for _ in 0..table_length {
            exception_table.push(ExceptionTableEntry {
                start_pc: reader.read_u16::<BigEndian>()?,
                end_pc: reader.read_u16::<BigEndian>()?,
                handler_pc: reader.read_u16::<BigEndian>()?,
                catch_type: reader.read_u16::<BigEndian>()?,
            });
        }
        // Nested attributes (line numbers, stack maps) are not needed.
        Ok(Code {
            max_stack,
            max_locals,
            code,
            exception_table,
        })
    }

    fn u16(&mut self) -> io::Result<u16> {
        self.reader.read_u16::<BigEndian>()
    }
}

fn invalid(message: String) -> io::Error {
    io::Error::new(io::ErrorKind::InvalidData, message)
}
