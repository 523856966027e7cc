//! Stack bytecode for compiled method bodies
//!
//! A JVM-flavoured subset: typed loads/stores, integer and long arithmetic,
//! conditional branches, static field access, method invocation and the
//! return family. Branch targets are symbolic [`Label`]s placed in the
//! instruction stream as pseudo-instructions, so inserting code anywhere
//! never invalidates a jump.
//!
//! Stack and local accounting uses the fixed-width-slot model: a `long`
//! occupies two operand-stack entries and two local-variable slots.

use crate::descriptor::{FieldType, MethodDescriptor};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Symbolic jump target
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Label(pub u32);

impl fmt::Display for Label {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "L{}", self.0)
    }
}

/// Reference to a static field
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FieldRef {
    pub owner: String,
    pub name: String,
    pub descriptor: FieldType,
}

impl FieldRef {
    pub fn new(owner: impl Into<String>, name: impl Into<String>, descriptor: FieldType) -> Self {
        Self {
            owner: owner.into(),
            name: name.into(),
            descriptor,
        }
    }
}

/// Reference to a method
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MethodRef {
    pub owner: String,
    pub name: String,
    pub descriptor: MethodDescriptor,
}

impl MethodRef {
    pub fn new(
        owner: impl Into<String>,
        name: impl Into<String>,
        descriptor: MethodDescriptor,
    ) -> Self {
        Self {
            owner: owner.into(),
            name: name.into(),
            descriptor,
        }
    }
}

/// Comparison used by conditional branches
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Condition {
    Eq,
    Ne,
    Lt,
    Ge,
    Gt,
    Le,
}

impl Condition {
    /// Evaluate `lhs <cond> rhs`
    pub fn holds(self, lhs: i32, rhs: i32) -> bool {
        match self {
            Condition::Eq => lhs == rhs,
            Condition::Ne => lhs != rhs,
            Condition::Lt => lhs < rhs,
            Condition::Ge => lhs >= rhs,
            Condition::Gt => lhs > rhs,
            Condition::Le => lhs <= rhs,
        }
    }

    fn mnemonic(self) -> &'static str {
        match self {
            Condition::Eq => "eq",
            Condition::Ne => "ne",
            Condition::Lt => "lt",
            Condition::Ge => "ge",
            Condition::Gt => "gt",
            Condition::Le => "le",
        }
    }
}

/// A single bytecode instruction
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Instruction {
    /// Pseudo-instruction marking a branch target
    Label(Label),
    Nop,

    Iconst(i32),
    Lconst(i64),
    /// Push a string constant
    Ldc(String),

    Iload(u16),
    Istore(u16),
    Lload(u16),
    Lstore(u16),
    Aload(u16),
    Astore(u16),
    Iinc { slot: u16, delta: i16 },

    Iadd,
    Isub,
    Imul,
    Ladd,
    Lsub,
    Lmul,

    Dup,
    Pop,
    Pop2,
    Swap,

    /// Compare the top int against zero and branch
    If { cond: Condition, target: Label },
    /// Compare the top two ints and branch
    IfIcmp { cond: Condition, target: Label },
    Goto(Label),

    GetStatic(FieldRef),
    New(String),
    InvokeStatic(MethodRef),
    InvokeVirtual(MethodRef),
    InvokeSpecial(MethodRef),

    Return,
    Ireturn,
    Lreturn,
    Areturn,
    Athrow,
}

/// Operand-stack effect of one instruction, in slots
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StackEffect {
    pub pops: u16,
    pub pushes: u16,
}

impl StackEffect {
    const fn new(pops: u16, pushes: u16) -> Self {
        Self { pops, pushes }
    }
}

/// Whether an instruction reads or writes a local slot
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccessKind {
    Read,
    Write,
    ReadWrite,
}

/// Local-variable access performed by one instruction
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LocalAccess {
    pub slot: u16,
    pub width: u16,
    pub kind: AccessKind,
}

impl LocalAccess {
    /// One past the highest slot touched
    pub fn end(&self) -> u32 {
        u32::from(self.slot) + u32::from(self.width)
    }
}

impl Instruction {
    /// Slots popped and pushed by this instruction
    pub fn stack_effect(&self) -> StackEffect {
        use Instruction as I;

        match self {
            I::Label(_) | I::Nop | I::Iinc { .. } | I::Goto(_) | I::Return => StackEffect::new(0, 0),
            I::Iconst(_) | I::Ldc(_) | I::Iload(_) | I::Aload(_) | I::New(_) => StackEffect::new(0, 1),
            I::Lconst(_) | I::Lload(_) => StackEffect::new(0, 2),
            I::Istore(_) | I::Astore(_) | I::Pop | I::Ireturn | I::Areturn | I::Athrow => {
                StackEffect::new(1, 0)
            }
            I::Lstore(_) | I::Pop2 | I::Lreturn => StackEffect::new(2, 0),
            I::Iadd | I::Isub | I::Imul => StackEffect::new(2, 1),
            I::Ladd | I::Lsub | I::Lmul => StackEffect::new(4, 2),
            I::Dup => StackEffect::new(1, 2),
            I::Swap => StackEffect::new(2, 2),
            I::If { .. } => StackEffect::new(1, 0),
            I::IfIcmp { .. } => StackEffect::new(2, 0),
            I::GetStatic(field) => StackEffect::new(0, field.descriptor.slot_width()),
            I::InvokeStatic(method) => StackEffect::new(
                method.descriptor.param_slots(),
                method.descriptor.return_slots(),
            ),
            I::InvokeVirtual(method) | I::InvokeSpecial(method) => StackEffect::new(
                method.descriptor.param_slots().saturating_add(1),
                method.descriptor.return_slots(),
            ),
        }
    }

    /// Local slot touched by this instruction, if any
    pub fn local_access(&self) -> Option<LocalAccess> {
        use Instruction as I;

        let (slot, width, kind) = match *self {
            I::Iload(slot) | I::Aload(slot) => (slot, 1, AccessKind::Read),
            I::Lload(slot) => (slot, 2, AccessKind::Read),
            I::Istore(slot) | I::Astore(slot) => (slot, 1, AccessKind::Write),
            I::Lstore(slot) => (slot, 2, AccessKind::Write),
            I::Iinc { slot, .. } => (slot, 1, AccessKind::ReadWrite),
            _ => return None,
        };

        Some(LocalAccess { slot, width, kind })
    }

    /// Normal-completion exits: `return`, `ireturn`, `lreturn`, `areturn`
    pub fn is_return(&self) -> bool {
        matches!(
            self,
            Instruction::Return | Instruction::Ireturn | Instruction::Lreturn | Instruction::Areturn
        )
    }

    /// Any instruction after which control never falls through
    pub fn ends_block(&self) -> bool {
        self.is_return() || matches!(self, Instruction::Athrow | Instruction::Goto(_))
    }

    /// Jump target of a branch instruction
    pub fn branch_target(&self) -> Option<Label> {
        match self {
            Instruction::If { target, .. } | Instruction::IfIcmp { target, .. } => Some(*target),
            Instruction::Goto(target) => Some(*target),
            _ => None,
        }
    }

    /// Conditional branches have both a jump and a fall-through successor
    pub fn is_conditional_branch(&self) -> bool {
        matches!(self, Instruction::If { .. } | Instruction::IfIcmp { .. })
    }
}

impl fmt::Display for Instruction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        use Instruction as I;

        match self {
            I::Label(label) => write!(f, "{}:", label),
            I::Nop => f.write_str("nop"),
            I::Iconst(v) => write!(f, "iconst {}", v),
            I::Lconst(v) => write!(f, "lconst {}", v),
            I::Ldc(s) => write!(f, "ldc {:?}", s),
            I::Iload(slot) => write!(f, "iload {}", slot),
            I::Istore(slot) => write!(f, "istore {}", slot),
            I::Lload(slot) => write!(f, "lload {}", slot),
            I::Lstore(slot) => write!(f, "lstore {}", slot),
            I::Aload(slot) => write!(f, "aload {}", slot),
            I::Astore(slot) => write!(f, "astore {}", slot),
            I::Iinc { slot, delta } => write!(f, "iinc {} {}", slot, delta),
            I::Iadd => f.write_str("iadd"),
            I::Isub => f.write_str("isub"),
            I::Imul => f.write_str("imul"),
            I::Ladd => f.write_str("ladd"),
            I::Lsub => f.write_str("lsub"),
            I::Lmul => f.write_str("lmul"),
            I::Dup => f.write_str("dup"),
            I::Pop => f.write_str("pop"),
            I::Pop2 => f.write_str("pop2"),
            I::Swap => f.write_str("swap"),
            I::If { cond, target } => write!(f, "if{} {}", cond.mnemonic(), target),
            I::IfIcmp { cond, target } => write!(f, "if_icmp{} {}", cond.mnemonic(), target),
            I::Goto(target) => write!(f, "goto {}", target),
            I::GetStatic(field) => write!(
                f,
                "getstatic {}.{} {}",
                field.owner, field.name, field.descriptor
            ),
            I::New(class) => write!(f, "new {}", class),
            I::InvokeStatic(m) => write!(f, "invokestatic {}.{}{}", m.owner, m.name, m.descriptor),
            I::InvokeVirtual(m) => write!(f, "invokevirtual {}.{}{}", m.owner, m.name, m.descriptor),
            I::InvokeSpecial(m) => write!(f, "invokespecial {}.{}{}", m.owner, m.name, m.descriptor),
            I::Return => f.write_str("return"),
            I::Ireturn => f.write_str("ireturn"),
            I::Lreturn => f.write_str("lreturn"),
            I::Areturn => f.write_str("areturn"),
            I::Athrow => f.write_str("athrow"),
        }
    }
}
