//! Compiled method and class representation
//!
//! A [`MethodUnit`] is the unit of work handed to the weaver by the host
//! compiler: header metadata (name, descriptor, flags, annotations) plus the
//! instruction stream and the declared frame limits. A [`ClassUnit`] groups
//! the method table of one class and can replay itself through a
//! [`ClassBuilder`] chain.

use crate::builder::ClassBuilder;
use crate::bytecode::Instruction;
use crate::descriptor::MethodDescriptor;
use crate::weaver::WeaveError;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

/// Annotation attached to every method the weaver has instrumented
pub const TRACED_TAG: &str = "tejer.Traced";

/// Normalize an annotation name to dotted form
///
/// Accepts descriptor form (`Lorg/example/DebugLog;`), internal form
/// (`org/example/DebugLog`) and dotted form (`org.example.DebugLog`).
pub fn normalize_annotation(name: &str) -> String {
    let trimmed = name.trim();
    let bare = trimmed
        .strip_prefix('L')
        .and_then(|s| s.strip_suffix(';'))
        .unwrap_or(trimmed);
    bare.replace('/', ".")
}

/// Method access flags (JVM bit layout)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AccessFlags(u16);

impl AccessFlags {
    pub const NONE: AccessFlags = AccessFlags(0);
    pub const PUBLIC: AccessFlags = AccessFlags(0x0001);
    pub const PRIVATE: AccessFlags = AccessFlags(0x0002);
    pub const PROTECTED: AccessFlags = AccessFlags(0x0004);
    pub const STATIC: AccessFlags = AccessFlags(0x0008);
    pub const FINAL: AccessFlags = AccessFlags(0x0010);
    pub const BRIDGE: AccessFlags = AccessFlags(0x0040);
    pub const SYNTHETIC: AccessFlags = AccessFlags(0x1000);

    pub const fn from_bits(bits: u16) -> Self {
        AccessFlags(bits)
    }

    pub const fn bits(self) -> u16 {
        self.0
    }

    pub const fn contains(self, other: AccessFlags) -> bool {
        self.0 & other.0 == other.0
    }

    pub const fn union(self, other: AccessFlags) -> Self {
        AccessFlags(self.0 | other.0)
    }

    pub const fn is_static(self) -> bool {
        self.contains(Self::STATIC)
    }
}

impl std::ops::BitOr for AccessFlags {
    type Output = AccessFlags;

    fn bitor(self, rhs: AccessFlags) -> AccessFlags {
        self.union(rhs)
    }
}

/// What kind of declaration the host compiled this method from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MethodKind {
    /// Ordinary declared function
    #[default]
    Function,
    Constructor,
    StaticInitializer,
    /// Compiler-generated member (bridges, accessors, default-argument stubs)
    Synthetic,
}

/// Ordered set of fully-qualified annotation names
#[derive(Debug, Clone, PartialEq, Eq, Default, Hash, Serialize, Deserialize)]
#[serde(from = "Vec<String>", into = "Vec<String>")]
pub struct AnnotationSet(Vec<String>);

impl AnnotationSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add an annotation; returns false if it was already present
    pub fn insert(&mut self, name: &str) -> bool {
        let name = normalize_annotation(name);
        if self.0.contains(&name) {
            return false;
        }
        self.0.push(name);
        true
    }

    pub fn contains(&self, name: &str) -> bool {
        let name = normalize_annotation(name);
        self.0.iter().any(|a| *a == name)
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.0.iter().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl<S: AsRef<str>> FromIterator<S> for AnnotationSet {
    fn from_iter<T: IntoIterator<Item = S>>(iter: T) -> Self {
        let mut set = AnnotationSet::new();
        for name in iter {
            set.insert(name.as_ref());
        }
        set
    }
}

impl From<Vec<String>> for AnnotationSet {
    fn from(value: Vec<String>) -> Self {
        value.into_iter().collect()
    }
}

impl From<AnnotationSet> for Vec<String> {
    fn from(value: AnnotationSet) -> Self {
        value.0
    }
}

/// Declaration-level metadata of a method, available before its body
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MethodHeader {
    /// Internal name of the declaring class
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub owner: String,
    pub name: String,
    /// `None` for members without a usable function descriptor
    #[serde(default)]
    pub descriptor: Option<MethodDescriptor>,
    #[serde(default)]
    pub access: AccessFlags,
    #[serde(default)]
    pub kind: MethodKind,
    #[serde(default)]
    pub annotations: AnnotationSet,
}

impl MethodHeader {
    pub fn new(name: impl Into<String>, descriptor: Option<MethodDescriptor>) -> Self {
        Self {
            owner: String::new(),
            name: name.into(),
            descriptor,
            access: AccessFlags::NONE,
            kind: MethodKind::Function,
            annotations: AnnotationSet::new(),
        }
    }

    /// `Owner.name`, or just the name when the owner is unknown
    pub fn qualified_name(&self) -> String {
        if self.owner.is_empty() {
            self.name.clone()
        } else {
            format!("{}.{}", self.owner.replace('/', "."), self.name)
        }
    }

    /// Whether the weaver has already instrumented this method
    pub fn is_traced(&self) -> bool {
        self.annotations.contains(TRACED_TAG)
    }

    /// Mark the method as instrumented
    pub fn tag_traced(&mut self) {
        self.annotations.insert(TRACED_TAG);
    }

    /// Slots occupied by `this` (for instance methods) and the parameters
    pub fn argument_slots(&self) -> u16 {
        let receiver = if self.access.is_static() { 0 } else { 1 };
        let params = self
            .descriptor
            .as_ref()
            .map(MethodDescriptor::param_slots)
            .unwrap_or(0);
        params.saturating_add(receiver)
    }
}

/// Compiled representation of one procedure
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MethodUnit {
    #[serde(flatten)]
    pub header: MethodHeader,
    #[serde(default)]
    pub instructions: Vec<Instruction>,
    pub max_stack: u16,
    pub max_locals: u16,
}

impl MethodUnit {
    pub fn new(header: MethodHeader, instructions: Vec<Instruction>, max_stack: u16, max_locals: u16) -> Self {
        Self {
            header,
            instructions,
            max_stack,
            max_locals,
        }
    }

    pub fn name(&self) -> &str {
        &self.header.name
    }

    /// Number of return-family instructions in the body
    pub fn return_count(&self) -> usize {
        self.instructions.iter().filter(|i| i.is_return()).count()
    }
}

/// Method table of one class
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClassUnit {
    /// Internal name, e.g. `org/example/Calculator`
    pub name: String,
    #[serde(default)]
    pub methods: Vec<MethodUnit>,
}

impl ClassUnit {
    /// Create a class, setting each method's owner to this class
    pub fn new(name: impl Into<String>, methods: Vec<MethodUnit>) -> Self {
        let mut class = Self {
            name: name.into(),
            methods,
        };
        class.adopt_methods();
        class
    }

    fn adopt_methods(&mut self) {
        for method in &mut self.methods {
            method.header.owner = self.name.clone();
        }
    }

    /// Parse a class from its JSON representation
    pub fn from_json_str(content: &str) -> Result<Self> {
        let mut class: ClassUnit = serde_json::from_str(content).context("Invalid class JSON")?;
        class.adopt_methods();
        Ok(class)
    }

    /// Load a class from a JSON file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read {}", path.display()))?;
        Self::from_json_str(&content)
            .with_context(|| format!("Failed to parse class file {}", path.display()))
    }

    pub fn to_json_string(&self) -> Result<String> {
        serde_json::to_string_pretty(self).context("Failed to serialize class")
    }

    pub fn method(&self, name: &str) -> Option<&MethodUnit> {
        self.methods.iter().find(|m| m.header.name == name)
    }

    /// Replay every method through a builder chain, in declaration order
    pub fn accept(&self, builder: &mut dyn ClassBuilder) -> std::result::Result<(), WeaveError> {
        builder.define_class(&self.name);

        for method in &self.methods {
            let mut visitor = builder.new_method(&method.header);
            visitor.visit_code();
            for insn in &method.instructions {
                visitor.visit_insn(insn.clone());
            }
            visitor.visit_maxs(method.max_stack, method.max_locals);
            visitor.visit_end()?;
        }

        builder.done();
        Ok(())
    }
}
