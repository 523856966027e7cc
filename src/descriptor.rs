//! JVM-style type and method descriptors
//!
//! Descriptors describe the parameter and return shape of a method
//! (`(IJLjava/lang/String;)V`) or the type of a field (`Ljava/io/PrintStream;`).
//! The weaver needs them for two things:
//! - Operand-stack accounting of `invoke*` and `getstatic` instructions
//! - Argument slot layout when the interpreter sets up a frame
//!
//! Slot widths follow the fixed-width-slot model: `long` and `double` occupy
//! two slots, everything else one.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Most parameter slots a method descriptor may declare, `this` excluded
pub const MAX_PARAMETER_SLOTS: u16 = 255;

/// Most dimensions an array type may have
pub const MAX_ARRAY_DIMENSIONS: usize = 255;

/// Errors produced while parsing a descriptor string
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DescriptorError {
    #[error("invalid descriptor {descriptor:?}: {reason}")]
    Invalid {
        descriptor: String,
        reason: &'static str,
    },
}

impl DescriptorError {
    fn invalid(descriptor: &str, reason: &'static str) -> Self {
        DescriptorError::Invalid {
            descriptor: descriptor.to_string(),
            reason,
        }
    }
}

/// A value type as it appears in a descriptor
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum FieldType {
    Boolean,
    Byte,
    Char,
    Short,
    Int,
    Long,
    Float,
    Double,
    /// Class type in internal form, e.g. `java/lang/String`
    Object(String),
    Array(Box<FieldType>),
}

impl FieldType {
    /// Convenience constructor for an object type
    pub fn object(internal_name: impl Into<String>) -> Self {
        FieldType::Object(internal_name.into())
    }

    /// Number of local-variable / operand-stack slots a value of this type occupies
    pub fn slot_width(&self) -> u16 {
        match self {
            FieldType::Long | FieldType::Double => 2,
            _ => 1,
        }
    }

    /// Parse one field type from the front of `input`, returning the rest
    fn parse_prefix<'a>(input: &'a str, whole: &str) -> Result<(FieldType, &'a str), DescriptorError> {
        let element = input.trim_start_matches('[');
        let dimensions = input.len() - element.len();
        if dimensions > MAX_ARRAY_DIMENSIONS {
            return Err(DescriptorError::invalid(whole, "too many array dimensions"));
        }

        let (mut ty, rest) = Self::parse_element(element, whole)?;
        for _ in 0..dimensions {
            ty = FieldType::Array(Box::new(ty));
        }
        Ok((ty, rest))
    }

    fn parse_element<'a>(input: &'a str, whole: &str) -> Result<(FieldType, &'a str), DescriptorError> {
        let mut chars = input.chars();
        let tag = chars
            .next()
            .ok_or_else(|| DescriptorError::invalid(whole, "unexpected end of descriptor"))?;
        let rest = chars.as_str();

        let ty = match tag {
            'Z' => FieldType::Boolean,
            'B' => FieldType::Byte,
            'C' => FieldType::Char,
            'S' => FieldType::Short,
            'I' => FieldType::Int,
            'J' => FieldType::Long,
            'F' => FieldType::Float,
            'D' => FieldType::Double,
            'L' => {
                let end = rest
                    .find(';')
                    .ok_or_else(|| DescriptorError::invalid(whole, "unterminated class type"))?;
                let name = &rest[..end];
                if name.is_empty() {
                    return Err(DescriptorError::invalid(whole, "empty class name"));
                }
                return Ok((FieldType::Object(name.to_string()), &rest[end + 1..]));
            }
            _ => return Err(DescriptorError::invalid(whole, "unknown type tag")),
        };

        Ok((ty, rest))
    }
}

impl fmt::Display for FieldType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FieldType::Boolean => f.write_str("Z"),
            FieldType::Byte => f.write_str("B"),
            FieldType::Char => f.write_str("C"),
            FieldType::Short => f.write_str("S"),
            FieldType::Int => f.write_str("I"),
            FieldType::Long => f.write_str("J"),
            FieldType::Float => f.write_str("F"),
            FieldType::Double => f.write_str("D"),
            FieldType::Object(name) => write!(f, "L{};", name),
            FieldType::Array(element) => write!(f, "[{}", element),
        }
    }
}

impl FromStr for FieldType {
    type Err = DescriptorError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (ty, rest) = Self::parse_prefix(s, s)?;
        if !rest.is_empty() {
            return Err(DescriptorError::invalid(s, "trailing characters"));
        }
        Ok(ty)
    }
}

impl TryFrom<String> for FieldType {
    type Error = DescriptorError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<FieldType> for String {
    fn from(value: FieldType) -> Self {
        value.to_string()
    }
}

/// Return type of a method
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ReturnType {
    Void,
    Value(FieldType),
}

impl ReturnType {
    /// Slots pushed onto the caller's stack when the method returns
    pub fn slot_width(&self) -> u16 {
        match self {
            ReturnType::Void => 0,
            ReturnType::Value(ty) => ty.slot_width(),
        }
    }
}

/// Parsed method descriptor: parameter list and return type
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct MethodDescriptor {
    pub params: Vec<FieldType>,
    pub ret: ReturnType,
}

impl MethodDescriptor {
    pub fn new(params: Vec<FieldType>, ret: ReturnType) -> Self {
        Self { params, ret }
    }

    /// Total slots occupied by the declared parameters (excluding `this`)
    ///
    /// Saturates for hand-built descriptors past the parser's limit.
    pub fn param_slots(&self) -> u16 {
        self.params
            .iter()
            .fold(0u16, |acc, ty| acc.saturating_add(ty.slot_width()))
    }

    /// Slots produced by a call to this method
    pub fn return_slots(&self) -> u16 {
        self.ret.slot_width()
    }
}

impl fmt::Display for MethodDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("(")?;
        for param in &self.params {
            write!(f, "{}", param)?;
        }
        f.write_str(")")?;
        match &self.ret {
            ReturnType::Void => f.write_str("V"),
            ReturnType::Value(ty) => write!(f, "{}", ty),
        }
    }
}

impl FromStr for MethodDescriptor {
    type Err = DescriptorError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut rest = s
            .strip_prefix('(')
            .ok_or_else(|| DescriptorError::invalid(s, "method descriptor must start with '('"))?;

        let mut params = Vec::new();
        let mut slots = 0u16;
        loop {
            if let Some(after) = rest.strip_prefix(')') {
                rest = after;
                break;
            }
            if rest.is_empty() {
                return Err(DescriptorError::invalid(s, "unterminated parameter list"));
            }
            let (param, after) = FieldType::parse_prefix(rest, s)?;
            slots += param.slot_width();
            if slots > MAX_PARAMETER_SLOTS {
                return Err(DescriptorError::invalid(s, "too many parameter slots"));
            }
            params.push(param);
            rest = after;
        }

        let ret = if rest == "V" {
            ReturnType::Void
        } else {
            let (ty, after) = FieldType::parse_prefix(rest, s)?;
            if !after.is_empty() {
                return Err(DescriptorError::invalid(s, "trailing characters"));
            }
            ReturnType::Value(ty)
        };

        Ok(Self { params, ret })
    }
}

impl TryFrom<String> for MethodDescriptor {
    type Error = DescriptorError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<MethodDescriptor> for String {
    fn from(value: MethodDescriptor) -> Self {
        value.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_int_to_int() {
        let desc: MethodDescriptor = "(I)I".parse().unwrap();
        assert_eq!(desc.params, vec![FieldType::Int]);
        assert_eq!(desc.ret, ReturnType::Value(FieldType::Int));
        assert_eq!(desc.param_slots(), 1);
        assert_eq!(desc.return_slots(), 1);
    }

    #[test]
    fn test_parse_mixed_params() {
        let desc: MethodDescriptor = "(JLjava/lang/String;[ID)V".parse().unwrap();
        assert_eq!(
            desc.params,
            vec![
                FieldType::Long,
                FieldType::object("java/lang/String"),
                FieldType::Array(Box::new(FieldType::Int)),
                FieldType::Double,
            ]
        );
        assert_eq!(desc.ret, ReturnType::Void);
        // J=2, String=1, [I=1, D=2
        assert_eq!(desc.param_slots(), 6);
        assert_eq!(desc.return_slots(), 0);
    }

    #[test]
    fn test_display_roundtrips_text() {
        for text in ["()V", "(I)I", "(J)Ljava/lang/StringBuilder;", "([[Ljava/lang/Object;Z)J"] {
            let desc: MethodDescriptor = text.parse().unwrap();
            assert_eq!(desc.to_string(), text);
        }
    }

    #[test]
    fn test_reject_malformed() {
        assert!("I)I".parse::<MethodDescriptor>().is_err());
        assert!("(I".parse::<MethodDescriptor>().is_err());
        assert!("(Ljava/lang/String)V".parse::<MethodDescriptor>().is_err());
        assert!("(Q)V".parse::<MethodDescriptor>().is_err());
        assert!("(I)VV".parse::<MethodDescriptor>().is_err());
        assert!("(L;)V".parse::<MethodDescriptor>().is_err());
        assert!("".parse::<FieldType>().is_err());
        assert!("II".parse::<FieldType>().is_err());
    }

    #[test]
    fn test_reject_too_many_parameter_slots() {
        let at_limit = format!("({}I)V", "J".repeat(127));
        let desc: MethodDescriptor = at_limit.parse().unwrap();
        assert_eq!(desc.param_slots(), MAX_PARAMETER_SLOTS);

        let over = format!("({}II)V", "J".repeat(127));
        assert!(over.parse::<MethodDescriptor>().is_err());

        let huge = format!("({})V", "J".repeat(40_000));
        let err = huge.parse::<MethodDescriptor>().unwrap_err();
        assert!(err.to_string().contains("too many parameter slots"));
    }

    #[test]
    fn test_reject_too_many_array_dimensions() {
        let at_limit = format!("{}I", "[".repeat(MAX_ARRAY_DIMENSIONS));
        let ty: FieldType = at_limit.parse().unwrap();
        assert_eq!(ty.to_string(), at_limit);

        let deep = format!("({}I)V", "[".repeat(100_000));
        let err = deep.parse::<MethodDescriptor>().unwrap_err();
        assert!(err.to_string().contains("too many array dimensions"));
    }

    #[test]
    fn test_param_slots_saturate_for_built_descriptors() {
        let desc = MethodDescriptor::new(vec![FieldType::Long; 40_000], ReturnType::Void);
        assert_eq!(desc.param_slots(), u16::MAX);
    }

    #[test]
    fn test_long_and_double_are_wide() {
        assert_eq!(FieldType::Long.slot_width(), 2);
        assert_eq!(FieldType::Double.slot_width(), 2);
        assert_eq!(FieldType::Int.slot_width(), 1);
        assert_eq!(FieldType::object("java/io/PrintStream").slot_width(), 1);
    }

    #[test]
    fn test_serde_uses_descriptor_text() {
        let desc: MethodDescriptor = "(I)J".parse().unwrap();
        let json = serde_json::to_string(&desc).unwrap();
        assert_eq!(json, "\"(I)J\"");
        let back: MethodDescriptor = serde_json::from_str(&json).unwrap();
        assert_eq!(back, desc);

        let bad: Result<MethodDescriptor, _> = serde_json::from_str("\"(I\"");
        assert!(bad.is_err());
    }
}
