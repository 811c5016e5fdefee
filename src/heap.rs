//! Guest heap: class instances and strings. Nothing is ever collected, an
//! object lives as long as the heap that allocated it.
use std::collections::HashMap;

use crate::class::ClassId;
use crate::error::{Result, RuntimeError};
use crate::runtime::{ObjectRef, Slot};

/// Instance of a loaded class.
#[derive(Debug, Clone)]
pub struct VObject {
    class: ClassId,
    class_name: String,
    fields: HashMap<String, Slot>,
}

impl VObject {
    pub fn class(&self) -> ClassId {
        self.class
    }

    /// Name of the defining class, used to match exception handlers.
    pub fn class_name(&self) -> &str {
        &self.class_name
    }

    pub fn get_field(&self, name: &str) -> Result<Slot> {
        self.fields
            .get(name)
            .copied()
            .ok_or_else(|| RuntimeError::FieldNotFound {
                class: self.class_name.clone(),
                name: name.to_owned(),
            })
    }

    pub fn set_field(&mut self, name: &str, slot: Slot) {
        self.fields.insert(name.to_owned(), slot);
    }
}

#[derive(Debug, Clone)]
pub enum HeapObject {
    Instance(VObject),
    Str(String),
}

#[derive(Debug, Default)]
pub struct Heap {
    objects: Vec<HeapObject>,
}

impl Heap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.objects.len()
    }

    pub fn is_empty(&self) -> bool {
        self.objects.is_empty()
    }

    pub fn alloc_object(
        &mut self,
        class: ClassId,
        class_name: &str,
        fields: HashMap<String, Slot>,
    ) -> ObjectRef {
        self.alloc(HeapObject::Instance(VObject {
            class,
            class_name: class_name.to_owned(),
            fields,
        }))
    }

    pub fn alloc_string(&mut self, s: impl Into<String>) -> ObjectRef {
        self.alloc(HeapObject::Str(s.into()))
    }

    pub fn get(&self, r: ObjectRef) -> &HeapObject {
        &self.objects[r.index()]
    }

    pub fn object(&self, r: ObjectRef) -> Result<&VObject> {
        match self.get(r) {
            HeapObject::Instance(object) => Ok(object),
            HeapObject::Str(_) => Err(RuntimeError::SlotTypeMismatch("object")),
        }
    }

    pub fn object_mut(&mut self, r: ObjectRef) -> Result<&mut VObject> {
        match &mut self.objects[r.index()] {
            HeapObject::Instance(object) => Ok(object),
            HeapObject::Str(_) => Err(RuntimeError::SlotTypeMismatch("object")),
        }
    }

    pub fn string(&self, r: ObjectRef) -> Result<&str> {
        match self.get(r) {
            HeapObject::Str(s) => Ok(s),
            HeapObject::Instance(_) => Err(RuntimeError::SlotTypeMismatch("string")),
        }
    }

    fn alloc(&mut self, object: HeapObject) -> ObjectRef {
        let r = ObjectRef::new(self.objects.len());
        self.objects.push(object);
        r
    }
}
