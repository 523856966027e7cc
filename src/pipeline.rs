//! Weaving pipeline
//!
//! Passes are handed to the pipeline explicitly when it is constructed; there
//! is no global registration. Each pass is a [`TracingClassBuilder`] with its
//! own configuration, applied in the order given. A method woven by an
//! earlier pass carries the traced tag, so later passes leave it alone.

use crate::builder::{ClassWriter, TracingClassBuilder, WeaveReport};
use crate::config::{ConfigError, InstrumentationConfig};
use crate::method::ClassUnit;
use crate::verify::{self, VerifyError};
use crate::weaver::WeaveError;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PipelineError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Weave(#[from] WeaveError),

    #[error("woven method {method} failed verification: {source}")]
    Verify {
        method: String,
        #[source]
        source: VerifyError,
    },
}

#[derive(Debug, Clone)]
pub struct WeavingPipeline {
    passes: Vec<InstrumentationConfig>,
    verify_output: bool,
}

impl WeavingPipeline {
    /// Pipeline with a single pass
    ///
    /// Fails before any class is processed if the configuration is invalid.
    /// A disabled configuration installs no pass.
    pub fn new(config: InstrumentationConfig) -> Result<Self, ConfigError> {
        Self::empty().with_pass(config)
    }

    /// Pipeline that passes every class through unchanged
    pub fn empty() -> Self {
        Self {
            passes: Vec::new(),
            verify_output: false,
        }
    }

    /// Append a pass
    pub fn with_pass(mut self, config: InstrumentationConfig) -> Result<Self, ConfigError> {
        config.validate()?;
        if config.enabled {
            self.passes.push(config);
        }
        Ok(self)
    }

    /// Verify every woven method before returning it
    pub fn with_verification(mut self, verify_output: bool) -> Self {
        self.verify_output = verify_output;
        self
    }

    /// Number of active passes
    pub fn pass_count(&self) -> usize {
        self.passes.len()
    }

    /// Run every pass over `class`
    pub fn weave_class(&self, class: &ClassUnit) -> Result<(ClassUnit, WeaveReport), PipelineError> {
        let mut current = class.clone();
        let mut report = WeaveReport::default();

        for config in &self.passes {
            let mut builder = TracingClassBuilder::new(ClassWriter::new(), config.clone())?;
            current.accept(&mut builder)?;
            report.merge(builder.report());

            let mut classes = builder.into_inner().into_classes();
            current = classes.pop().unwrap_or_else(|| ClassUnit::new(class.name.clone(), Vec::new()));
        }

        if self.verify_output {
            for method in current.methods.iter().filter(|m| m.header.is_traced()) {
                verify::verify(method).map_err(|source| PipelineError::Verify {
                    method: method.header.qualified_name(),
                    source,
                })?;
            }
        }

        tracing::debug!(
            class = %class.name,
            passes = self.passes.len(),
            selected = report.methods_selected,
            "class woven"
        );

        Ok((current, report))
    }
}
