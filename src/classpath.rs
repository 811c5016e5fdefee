//! Class bytes providers: where the class loader gets parsed class files from.
use std::collections::HashMap;
use std::path::{Path, PathBuf};

use crate::error::Result;
use crate::jvm::{read_class_file, JVMClassFile, JVMParser};

/// Source of parsed class files, looked up by fully-qualified binary name
/// (`java/lang/System`).
pub trait ClassSource {
    /// Returns `Ok(None)` when the class does not exist in this source.
    fn find_class(&self, name: &str) -> Result<Option<JVMClassFile>>;
}

/// Ordered list of classpath roots; the first root holding the class wins.
#[derive(Debug, Clone, Default)]
pub struct ClassPath {
    roots: Vec<PathBuf>,
}

impl ClassPath {
    pub fn new(roots: Vec<PathBuf>) -> Self {
        Self { roots }
    }

    /// Build a classpath from a `:` or `;` separated list.
    pub fn parse(spec: &str) -> Self {
        let roots = spec
            .split(|c| c == ':' || c == ';')
            .filter(|root| !root.is_empty())
            .map(PathBuf::from)
            .collect();
        Self { roots }
    }

    pub fn roots(&self) -> &[PathBuf] {
        &self.roots
    }

    fn find_in_root(root: &Path, name: &str) -> Result<Option<JVMClassFile>> {
        if root.extension().map_or(false, |ext| ext == "jar") {
            log::warn!(
                "archive roots are not supported, skipping {}",
                root.display()
            );
            return Ok(None);
        }
        let path = root.join(format!("{name}.class"));
        if !path.is_file() {
            log::debug!("{name} not found in {}", root.display());
            return Ok(None);
        }
        let bytes = read_class_file(&path)?;
        JVMParser::parse(&bytes).map(Some)
    }
}

impl ClassSource for ClassPath {
    fn find_class(&self, name: &str) -> Result<Option<JVMClassFile>> {
        for root in &self.roots {
            if let Some(class_file) = Self::find_in_root(root, name)? {
                log::info!("found class {name} in {}", root.display());
                return Ok(Some(class_file));
            }
        }
        Ok(None)
    }
}

/// Class files held in memory, for embedding and tests.
#[derive(Debug, Clone, Default)]
pub struct MemoryClassSource {
    classes: HashMap<String, JVMClassFile>,
}

impl MemoryClassSource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, name: impl Into<String>, class_file: JVMClassFile) {
        self.classes.insert(name.into(), class_file);
    }

    pub fn with(mut self, name: impl Into<String>, class_file: JVMClassFile) -> Self {
        self.insert(name, class_file);
        self
    }
}

impl ClassSource for MemoryClassSource {
    fn find_class(&self, name: &str) -> Result<Option<JVMClassFile>> {
        Ok(self.classes.get(name).cloned())
    }
}
