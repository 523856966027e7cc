//! Method selection
//!
//! A method is a rewrite target when it is an ordinary function with a
//! descriptor, has not been instrumented already, and carries at least one of
//! the configured marker annotations.

use crate::config::InstrumentationConfig;
use crate::method::{MethodHeader, MethodKind};
use serde::Serialize;

/// Why a method was not selected
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Rejection {
    Disabled,
    /// Constructors, static initializers and synthetic members
    NotAFunction,
    MissingDescriptor,
    AlreadyTraced,
    NoMarker,
}

impl Rejection {
    pub fn as_str(self) -> &'static str {
        match self {
            Rejection::Disabled => "instrumentation disabled",
            Rejection::NotAFunction => "not a function",
            Rejection::MissingDescriptor => "no descriptor",
            Rejection::AlreadyTraced => "already traced",
            Rejection::NoMarker => "no marker annotation",
        }
    }
}

/// Decide whether `method` should be woven under `config`
pub fn select(method: &MethodHeader, config: &InstrumentationConfig) -> bool {
    classify(method, config).is_ok()
}

/// Like [`select`], but reports the reason for skipping a method
pub fn classify(method: &MethodHeader, config: &InstrumentationConfig) -> Result<(), Rejection> {
    if !config.enabled {
        return Err(Rejection::Disabled);
    }
    if method.kind != MethodKind::Function {
        return Err(Rejection::NotAFunction);
    }
    if method.descriptor.is_none() {
        return Err(Rejection::MissingDescriptor);
    }
    if method.is_traced() {
        return Err(Rejection::AlreadyTraced);
    }
    if !method.annotations.iter().any(|a| config.is_marker(a)) {
        return Err(Rejection::NoMarker);
    }
    Ok(())
}
