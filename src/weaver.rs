//! Entry and exit weaving
//!
//! The entry sequence goes strictly before the first original instruction,
//! ahead of any label, so it runs exactly once per invocation even when the
//! body loops back to its first instruction. Every return-family instruction
//! gets its own copy of the exit sequence immediately before it; return
//! sites are never merged because their operand stacks can differ.
//!
//! Exceptional exits (`athrow`, or errors propagating out of callees) are not
//! instrumented: an entry line without a matching exit line is expected for
//! invocations that complete abruptly.

use crate::cfg::{CfgError, ControlFlowGraph};
use crate::config::InstrumentationConfig;
use crate::emit;
use crate::frame::{self, FrameError, SlotPlan};
use crate::method::MethodUnit;
use crate::selector;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum WeaveError {
    #[error("cannot plan frame of {method}: {source}")]
    Frame {
        method: String,
        #[source]
        source: FrameError,
    },

    #[error("malformed control flow in {method}: {source}")]
    ControlFlow {
        method: String,
        #[source]
        source: CfgError,
    },
}

/// What weaving did to one method
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WeaveOutcome {
    pub plan: SlotPlan,
    /// Number of exit sequences injected
    pub exit_sites: usize,
}

/// Insert the entry sequence at offset 0
pub fn weave_entry(method: &mut MethodUnit, plan: &SlotPlan) {
    let entry = emit::entry_sequence(&method.header.name, plan.start_slot).finish();
    method.instructions.splice(0..0, entry);
}

/// Insert an exit sequence before every return-family instruction
///
/// Returns the number of exit sites woven.
pub fn weave_exits(method: &mut MethodUnit, plan: &SlotPlan) -> Result<usize, WeaveError> {
    let cfg = ControlFlowGraph::build(&method.instructions).map_err(|source| {
        WeaveError::ControlFlow {
            method: method.header.qualified_name(),
            source,
        }
    })?;
    let sites = cfg.exit_sites(&method.instructions);
    if sites.is_empty() {
        return Ok(0);
    }

    let exit = emit::exit_sequence(&method.header.name, plan.start_slot, plan.end_slot).finish();
    let original = std::mem::take(&mut method.instructions);
    let mut woven = Vec::with_capacity(original.len() + sites.len() * exit.len());
    let mut next_site = sites.iter().peekable();

    for (index, insn) in original.into_iter().enumerate() {
        if next_site.peek() == Some(&&index) {
            woven.extend(exit.iter().cloned());
            next_site.next();
        }
        woven.push(insn);
    }

    method.instructions = woven;
    Ok(sites.len())
}

/// Plan and weave a method already known to be a target
///
/// The method's frame limits are raised to the planned values. Selection and
/// tagging are left to the caller.
pub fn instrument(method: &mut MethodUnit) -> Result<WeaveOutcome, WeaveError> {
    let plan = frame::plan(method).map_err(|source| WeaveError::Frame {
        method: method.header.qualified_name(),
        source,
    })?;

    weave_entry(method, &plan);
    let exit_sites = weave_exits(method, &plan)?;

    method.max_stack = plan.new_max_stack;
    method.max_locals = plan.new_max_locals;

    tracing::debug!(
        method = %method.header.qualified_name(),
        start_slot = plan.start_slot,
        end_slot = plan.end_slot,
        max_stack = plan.new_max_stack,
        max_locals = plan.new_max_locals,
        exit_sites,
        "woven method"
    );

    Ok(WeaveOutcome { plan, exit_sites })
}

/// Select, plan, weave and tag one method
///
/// Returns `None` and leaves the method untouched when it is not selected.
pub fn weave_method(
    method: &mut MethodUnit,
    config: &InstrumentationConfig,
) -> Result<Option<WeaveOutcome>, WeaveError> {
    if !selector::select(&method.header, config) {
        return Ok(None);
    }

    let outcome = instrument(method)?;
    method.header.tag_traced();
    Ok(Some(outcome))
}
