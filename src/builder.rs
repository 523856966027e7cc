//! Class and method construction pipeline
//!
//! The host compiler emits each class through a [`ClassBuilder`], which hands
//! out one [`MethodVisitor`] per method. Instrumentation passes sit in front
//! of the host's builder as decorators:
//!
//! - [`DelegatingClassBuilder`] forwards every call to a delegate, so a pass
//!   only overrides [`DelegatingClassBuilder::new_method`]
//! - [`TracingClassBuilder`] asks its inner builder for the method visitor
//!   first and, for selected methods, wraps it in a visitor that weaves the
//!   body before passing it on
//! - [`ClassWriter`] is the terminal builder that materializes [`ClassUnit`]s
//!
//! Passes compose by nesting: `TracingClassBuilder::new(TracingClassBuilder::new(writer, a)?, b)?`.

use crate::bytecode::Instruction;
use crate::config::{ConfigError, InstrumentationConfig};
use crate::method::{ClassUnit, MethodHeader, MethodUnit};
use crate::selector::{self, Rejection};
use crate::weaver::{self, WeaveError};
use serde::Serialize;

/// Receives the body of one method
pub trait MethodVisitor {
    fn visit_code(&mut self);
    fn visit_insn(&mut self, insn: Instruction);
    fn visit_maxs(&mut self, max_stack: u16, max_locals: u16);
    fn visit_end(&mut self) -> Result<(), WeaveError>;
}

/// Builds the classes of one compilation unit
pub trait ClassBuilder {
    fn define_class(&mut self, name: &str);
    fn new_method(&mut self, header: &MethodHeader) -> Box<dyn MethodVisitor + '_>;
    fn done(&mut self);
}

/// Pass-through [`ClassBuilder`] given only a delegate
pub trait DelegatingClassBuilder {
    fn delegate(&mut self) -> &mut dyn ClassBuilder;

    fn define_class(&mut self, name: &str) {
        self.delegate().define_class(name);
    }

    fn new_method(&mut self, header: &MethodHeader) -> Box<dyn MethodVisitor + '_> {
        self.delegate().new_method(header)
    }

    fn done(&mut self) {
        self.delegate().done();
    }
}

impl<T: DelegatingClassBuilder> ClassBuilder for T {
    fn define_class(&mut self, name: &str) {
        DelegatingClassBuilder::define_class(self, name);
    }

    fn new_method(&mut self, header: &MethodHeader) -> Box<dyn MethodVisitor + '_> {
        DelegatingClassBuilder::new_method(self, header)
    }

    fn done(&mut self) {
        DelegatingClassBuilder::done(self);
    }
}

/// Terminal builder collecting emitted classes
#[derive(Debug, Default)]
pub struct ClassWriter {
    classes: Vec<ClassUnit>,
    current: Option<ClassUnit>,
}

impl ClassWriter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Classes completed so far, in definition order
    pub fn classes(&self) -> &[ClassUnit] {
        &self.classes
    }

    pub fn into_classes(mut self) -> Vec<ClassUnit> {
        if let Some(class) = self.current.take() {
            self.classes.push(class);
        }
        self.classes
    }
}

impl ClassBuilder for ClassWriter {
    fn define_class(&mut self, name: &str) {
        if let Some(class) = self.current.take() {
            self.classes.push(class);
        }
        self.current = Some(ClassUnit::new(name, Vec::new()));
    }

    fn new_method(&mut self, header: &MethodHeader) -> Box<dyn MethodVisitor + '_> {
        let class = self
            .current
            .get_or_insert_with(|| ClassUnit::new(String::new(), Vec::new()));
        Box::new(MethodWriter {
            method: MethodUnit::new(header.clone(), Vec::new(), 0, 0),
            sink: &mut class.methods,
        })
    }

    fn done(&mut self) {
        if let Some(class) = self.current.take() {
            self.classes.push(class);
        }
    }
}

struct MethodWriter<'a> {
    method: MethodUnit,
    sink: &'a mut Vec<MethodUnit>,
}

impl MethodVisitor for MethodWriter<'_> {
    fn visit_code(&mut self) {}

    fn visit_insn(&mut self, insn: Instruction) {
        self.method.instructions.push(insn);
    }

    fn visit_maxs(&mut self, max_stack: u16, max_locals: u16) {
        self.method.max_stack = max_stack;
        self.method.max_locals = max_locals;
    }

    fn visit_end(&mut self) -> Result<(), WeaveError> {
        let header = self.method.header.clone();
        let method = std::mem::replace(&mut self.method, MethodUnit::new(header, Vec::new(), 0, 0));
        self.sink.push(method);
        Ok(())
    }
}

/// Counters accumulated by a tracing pass
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct WeaveReport {
    pub methods_inspected: usize,
    pub methods_selected: usize,
    pub exit_sites: usize,
}

impl WeaveReport {
    pub fn merge(&mut self, other: &WeaveReport) {
        self.methods_inspected += other.methods_inspected;
        self.methods_selected += other.methods_selected;
        self.exit_sites += other.exit_sites;
    }
}

/// Decorator weaving trace output into selected methods
#[derive(Debug)]
pub struct TracingClassBuilder<B> {
    inner: B,
    config: InstrumentationConfig,
    report: WeaveReport,
}

impl<B: ClassBuilder> TracingClassBuilder<B> {
    /// Wrap `inner`; fails if the configuration is invalid
    pub fn new(inner: B, config: InstrumentationConfig) -> Result<Self, ConfigError> {
        config.validate()?;
        Ok(Self {
            inner,
            config,
            report: WeaveReport::default(),
        })
    }

    pub fn config(&self) -> &InstrumentationConfig {
        &self.config
    }

    pub fn report(&self) -> &WeaveReport {
        &self.report
    }

    pub fn inner(&self) -> &B {
        &self.inner
    }

    pub fn into_inner(self) -> B {
        self.inner
    }
}

impl<B: ClassBuilder> DelegatingClassBuilder for TracingClassBuilder<B> {
    fn delegate(&mut self) -> &mut dyn ClassBuilder {
        &mut self.inner
    }

    fn new_method(&mut self, header: &MethodHeader) -> Box<dyn MethodVisitor + '_> {
        self.report.methods_inspected += 1;

        match selector::classify(header, &self.config) {
            Ok(()) => {}
            Err(Rejection::NotAFunction | Rejection::MissingDescriptor)
                if header.annotations.iter().any(|a| self.config.is_marker(a)) =>
            {
                tracing::warn!(
                    method = %header.qualified_name(),
                    "marker annotation on a non-function member is ignored"
                );
                return ClassBuilder::new_method(&mut self.inner, header);
            }
            Err(_) => return ClassBuilder::new_method(&mut self.inner, header),
        }

        self.report.methods_selected += 1;
        tracing::info!(
            method = %header.qualified_name(),
            annotations = ?header.annotations,
            "function has a tracing marker"
        );

        let mut tagged = header.clone();
        tagged.tag_traced();
        let delegate = ClassBuilder::new_method(&mut self.inner, &tagged);

        Box::new(TracingMethodVisitor {
            delegate,
            method: MethodUnit::new(tagged, Vec::new(), 0, 0),
            report: &mut self.report,
        })
    }
}

/// Buffers a selected method's body, weaves it, and replays it into the delegate
struct TracingMethodVisitor<'a> {
    delegate: Box<dyn MethodVisitor + 'a>,
    method: MethodUnit,
    report: &'a mut WeaveReport,
}

impl MethodVisitor for TracingMethodVisitor<'_> {
    fn visit_code(&mut self) {}

    fn visit_insn(&mut self, insn: Instruction) {
        self.method.instructions.push(insn);
    }

    fn visit_maxs(&mut self, max_stack: u16, max_locals: u16) {
        tracing::debug!(
            method = %self.method.header.qualified_name(),
            max_stack,
            max_locals,
            "declared frame"
        );
        self.method.max_stack = max_stack;
        self.method.max_locals = max_locals;
    }

    fn visit_end(&mut self) -> Result<(), WeaveError> {
        let outcome = weaver::instrument(&mut self.method)?;
        self.report.exit_sites += outcome.exit_sites;

        let delegate = &mut self.delegate;
        delegate.visit_code();
        for insn in self.method.instructions.drain(..) {
            delegate.visit_insn(insn);
        }
        delegate.visit_maxs(self.method.max_stack, self.method.max_locals);
        delegate.visit_end()
    }
}
