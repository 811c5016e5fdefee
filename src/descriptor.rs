//! Field and method descriptor decoding.
use std::sync::OnceLock;

use regex::Regex;

use crate::error::{Result, RuntimeError};
use crate::runtime::Slot;

/// Value categories a descriptor can name. Sub-int types (`B`, `C`, `S`,
/// `Z`) are all `Int`, arrays and classes are both `Reference`.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum BaseTypeKind {
    Int,
    Long,
    Float,
    Double,
    Reference,
    Void,
}

impl BaseTypeKind {
    /// Returns the size in slots of a given type.
    pub fn size(self) -> usize {
        match self {
            Self::Long | Self::Double => 2,
            Self::Void => 0,
            _ => 1,
        }
    }

    /// Value a field of this type holds before anything is stored in it.
    pub fn default_slot(self) -> Slot {
        match self {
            Self::Reference => Slot::NULL,
            _ => Slot::Int(0),
        }
    }
}

/// Decoded `(args)ret` method descriptor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MethodDescriptor {
    pub args: Vec<BaseTypeKind>,
    pub ret: BaseTypeKind,
}

impl MethodDescriptor {
    pub fn parse(descriptor: &str) -> Result<Self> {
        static RE: OnceLock<Regex> = OnceLock::new();
        let re = RE.get_or_init(|| {
            Regex::new(r"^\(([^\)]*)\)(.+)$").expect("descriptor regex")
        });
        let caps = re.captures(descriptor).ok_or_else(|| bad(descriptor))?;
        let arg_string = caps.get(1).map_or("", |m| m.as_str());
        let ret_string = caps.get(2).map_or("", |m| m.as_str());

        let mut args = Vec::new();
        let mut rest = arg_string;
        while !rest.is_empty() {
            let (t, length) = decode_type(rest).ok_or_else(|| bad(descriptor))?;
            args.push(t);
            rest = &rest[length..];
        }
        let ret = match ret_string {
            "V" => BaseTypeKind::Void,
            _ => match decode_type(ret_string) {
                Some((t, length)) if length == ret_string.len() => t,
                _ => return Err(bad(descriptor)),
            },
        };
        Ok(Self { args, ret })
    }

    /// Operand stack slots taken by the arguments, receiver excluded.
    pub fn arg_slots(&self) -> usize {
        self.args.iter().map(|t| t.size()).sum()
    }
}

/// Decodes a field descriptor (`I`, `Ljava/lang/String;`, `[I`...).
pub fn field_kind(descriptor: &str) -> Result<BaseTypeKind> {
    match decode_type(descriptor) {
        Some((t, length)) if length == descriptor.len() => Ok(t),
        _ => Err(bad(descriptor)),
    }
}

/// Decodes the first type in `s`, returning it with the length of its
/// textual representation.
fn decode_type(s: &str) -> Option<(BaseTypeKind, usize)> {
    let kind = match s.as_bytes().first()? {
        b'I' | b'B' | b'C' | b'S' | b'Z' => BaseTypeKind::Int,
        b'J' => BaseTypeKind::Long,
        b'F' => BaseTypeKind::Float,
        b'D' => BaseTypeKind::Double,
        b'L' => return s.find(';').map(|end| (BaseTypeKind::Reference, end + 1)),
        b'[' => {
            let (_, length) = decode_type(&s[1..])?;
            return Some((BaseTypeKind::Reference, length + 1));
        }
        _ => return None,
    };
    Some((kind, 1))
}

fn bad(descriptor: &str) -> RuntimeError {
    RuntimeError::ClassFormat(format!("bad descriptor {descriptor:?}"))
}
