//! Tejer - compile-time method tracing weaver
//!
//! This library rewrites the compiled bodies of annotated methods so every
//! invocation prints an entry line, measures its wall-clock duration, and
//! prints an exit line with the elapsed milliseconds:
//!
//! ```text
//! -> compute start
//! <- compute end cost 3 ms
//! ```
//!
//! The rewrite runs inside the host's class construction chain as a
//! [`builder::TracingClassBuilder`] decorator, or standalone through a
//! [`pipeline::WeavingPipeline`]. Woven output can be checked with
//! [`verify::verify`] and executed with [`interp::Interpreter`].

pub mod builder;
pub mod bytecode;
pub mod cfg;
pub mod cli;
pub mod config;
pub mod descriptor;
pub mod emit;
pub mod frame;
pub mod interp;
pub mod method;
pub mod pipeline;
pub mod selector;
pub mod verify;
pub mod weaver;
