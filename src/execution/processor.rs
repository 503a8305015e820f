//! Step-processor dispatch and the leaf step-body protocol

use crate::core::document::Document;
use crate::core::environment::Environment;
use crate::core::name::QName;
use crate::core::port::{PortKind, PortReference};
use crate::core::step::{ExternalEffects, Step};
use crate::error::{Error, Result};
use crate::eval::DocumentResolver;
use crate::execution::compound::{Choose, ForEach, Sequential};
use crate::execution::engine::Engine;
use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;

/// The polymorphic behavior bound to every step at construction time.
///
/// One implementation exists per step-type tag; compound control-flow
/// variants (sequential, choose, for-each) are additional implementations
/// of this same contract, not a parallel hierarchy.
#[async_trait]
pub trait StepProcessor: Send + Sync {
    /// Execute the step against its following environment and produce the
    /// environment its successor consumes.
    async fn run(&self, step: &Step, env: Environment, engine: &Engine) -> Result<Environment>;
}

/// Read access a leaf step body gets to its resolved inputs, evaluated
/// options, and the I/O resolver. Bodies never touch the environment model
/// directly.
pub struct StepInput<'a> {
    step: &'a Step,
    env: &'a Environment,
    engine: &'a Engine,
}

impl<'a> StepInput<'a> {
    pub(crate) fn new(step: &'a Step, env: &'a Environment, engine: &'a Engine) -> Self {
        Self { step, env, engine }
    }

    /// The executing step's assigned name.
    pub fn step_name(&self) -> &str {
        self.step.name().unwrap_or(self.step.step_type())
    }

    /// The document sequence on a declared input or parameter port.
    ///
    /// Cardinality is checked here rather than at resolution time: a pipe
    /// or default-readable binding stays a lazy alias, so how many
    /// documents it carries is only known once it is read.
    pub fn documents(&self, port: &str) -> Result<Vec<Document>> {
        let declared = self.step.port(port).ok_or_else(|| {
            Error::Internal(format!(
                "step '{}' read undeclared port '{}'",
                self.step_name(),
                port
            ))
        })?;
        let reference = PortReference::new(self.step_name(), port);
        let realized = self
            .env
            .port(&reference)
            .ok_or_else(|| Error::DanglingAlias(reference.clone()))?
            .clone();
        let documents = realized.documents(self.env)?;
        if !declared.sequence && documents.len() > 1 {
            return Err(Error::SequenceNotAllowed {
                step: self.step_name().to_string(),
                port: port.to_string(),
                count: documents.len(),
            });
        }
        Ok(documents)
    }

    /// The documents on the step's primary input port.
    pub fn primary_documents(&self) -> Result<Vec<Document>> {
        let port = self
            .step
            .primary_port(PortKind::Input)
            .ok_or_else(|| {
                Error::Internal(format!(
                    "step '{}' has no primary input port",
                    self.step_name()
                ))
            })?
            .name
            .clone();
        self.documents(&port)
    }

    /// The evaluated value of an option, or `None` when the option resolved
    /// to no value.
    pub fn option(&self, name: &QName) -> Option<&str> {
        self.env.variable(name)
    }

    /// An option that must have resolved to a value.
    pub fn required_option(&self, name: &QName) -> Result<&str> {
        self.option(name).ok_or_else(|| Error::UnboundVariable {
            name: name.to_string(),
            step: self.step_name().to_string(),
        })
    }

    /// The document/I-O resolver, for bodies that load or store externally.
    pub fn resolver(&self) -> &dyn DocumentResolver {
        self.engine.resolver()
    }
}

/// Output accumulator handed to a step body. Writes are validated against
/// the step's declared output ports; writing anywhere else is a defect.
pub struct StepOutput {
    step: String,
    declared: HashSet<String>,
    primary: Option<String>,
    written: HashMap<String, Vec<Document>>,
}

impl StepOutput {
    pub(crate) fn new(step: &Step) -> Self {
        Self {
            step: step.name().unwrap_or(step.step_type()).to_string(),
            declared: step
                .ports()
                .iter()
                .filter(|p| p.kind == PortKind::Output)
                .map(|p| p.name.clone())
                .collect(),
            primary: step
                .primary_port(PortKind::Output)
                .map(|p| p.name.clone()),
            written: HashMap::new(),
        }
    }

    /// Append one document to a declared output port.
    pub fn write(&mut self, port: &str, document: Document) -> Result<()> {
        if !self.declared.contains(port) {
            return Err(Error::UndeclaredOutput {
                step: self.step.clone(),
                port: port.to_string(),
            });
        }
        self.written.entry(port.to_string()).or_default().push(document);
        Ok(())
    }

    /// Append a whole sequence to a declared output port.
    pub fn write_all(&mut self, port: &str, documents: Vec<Document>) -> Result<()> {
        for document in documents {
            self.write(port, document)?;
        }
        Ok(())
    }

    /// Append one document to the primary output port.
    pub fn write_primary(&mut self, document: Document) -> Result<()> {
        let port = self.primary.clone().ok_or_else(|| {
            Error::Internal(format!("step '{}' has no primary output port", self.step))
        })?;
        self.write(&port, document)
    }

    pub(crate) fn into_documents(self) -> HashMap<String, Vec<Document>> {
        self.written
    }
}

/// Contract implemented by concrete leaf step kinds: read resolved inputs,
/// write documents to declared outputs. Domain errors propagate unchanged.
#[async_trait]
pub trait StepBody: Send + Sync {
    async fn execute(&self, input: &StepInput<'_>, output: &mut StepOutput) -> Result<()>;
}

/// Adapts a [`StepBody`] to the processor protocol: resolve the step's
/// input and parameter ports, invoke the body, fold the written documents
/// back into the environment.
pub struct LeafProcessor {
    body: Arc<dyn StepBody>,
}

impl LeafProcessor {
    pub fn new(body: impl StepBody + 'static) -> Self {
        Self {
            body: Arc::new(body),
        }
    }
}

#[async_trait]
impl StepProcessor for LeafProcessor {
    async fn run(&self, step: &Step, mut env: Environment, engine: &Engine) -> Result<Environment> {
        engine.resolve_input_ports(step, &mut env)?;
        let mut output = StepOutput::new(step);
        {
            let input = StepInput::new(step, &env, engine);
            self.body.execute(&input, &mut output).await?;
        }
        engine.finish_step(step, env, output)
    }
}

/// The identity step: copies its source sequence to its result port.
pub struct Identity;

#[async_trait]
impl StepBody for Identity {
    async fn execute(&self, input: &StepInput<'_>, output: &mut StepOutput) -> Result<()> {
        for document in input.primary_documents()? {
            output.write_primary(document)?;
        }
        Ok(())
    }
}

/// Loads the document named by the required `href` option and emits it on
/// the result port.
pub struct Load;

#[async_trait]
impl StepBody for Load {
    async fn execute(&self, input: &StepInput<'_>, output: &mut StepOutput) -> Result<()> {
        let href = input.required_option(&QName::new("href"))?.to_string();
        let document = input.resolver().load(&href, None)?;
        output.write_primary(document)
    }
}

/// Stores each source document under the required `href` option and passes
/// the sequence through to the result port.
pub struct Store;

#[async_trait]
impl StepBody for Store {
    async fn execute(&self, input: &StepInput<'_>, output: &mut StepOutput) -> Result<()> {
        let href = input.required_option(&QName::new("href"))?.to_string();
        for document in input.primary_documents()? {
            input.resolver().store(&href, &document)?;
            output.write_primary(document)?;
        }
        Ok(())
    }
}

struct Registration {
    processor: Arc<dyn StepProcessor>,
    effects: ExternalEffects,
}

/// Maps step-type tags to processor implementations. The parser (or a
/// programmatic builder) consults this when constructing step trees.
#[derive(Default)]
pub struct ProcessorRegistry {
    registrations: HashMap<String, Registration>,
}

impl ProcessorRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// A registry preloaded with the builtin compound steps and leaf bodies.
    pub fn with_builtins() -> Self {
        let mut registry = Self::new();
        let sequential = Arc::new(Sequential) as Arc<dyn StepProcessor>;
        for tag in ["pipeline", "group", "try", "when", "otherwise"] {
            registry.register(tag, sequential.clone());
        }
        registry.register("choose", Arc::new(Choose));
        registry.register("for-each", Arc::new(ForEach));
        registry.register_body("identity", Identity, ExternalEffects::default());
        registry.register_body("load", Load, ExternalEffects::reads());
        registry.register_body("store", Store, ExternalEffects::writes());
        registry
    }

    pub fn register(&mut self, tag: impl Into<String>, processor: Arc<dyn StepProcessor>) {
        self.registrations.insert(
            tag.into(),
            Registration {
                processor,
                effects: ExternalEffects::default(),
            },
        );
    }

    /// Register a leaf step body together with its external-effect flags.
    pub fn register_body(
        &mut self,
        tag: impl Into<String>,
        body: impl StepBody + 'static,
        effects: ExternalEffects,
    ) {
        self.registrations.insert(
            tag.into(),
            Registration {
                processor: Arc::new(LeafProcessor::new(body)),
                effects,
            },
        );
    }

    /// The processor bound to a type tag.
    pub fn processor(&self, tag: &str) -> Result<Arc<dyn StepProcessor>> {
        self.registrations
            .get(tag)
            .map(|r| r.processor.clone())
            .ok_or_else(|| Error::UnknownStepType(tag.to_string()))
    }

    /// Construct a bare step of the given type with its processor and
    /// effect flags bound.
    pub fn step(&self, tag: &str) -> Result<Step> {
        let registration = self
            .registrations
            .get(tag)
            .ok_or_else(|| Error::UnknownStepType(tag.to_string()))?;
        Ok(Step::new(tag, registration.processor.clone()).with_effects(registration.effects))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::port::Port;

    #[test]
    fn test_registry_unknown_type_is_static_error() {
        let registry = ProcessorRegistry::with_builtins();
        let err = registry.step("frobnicate").unwrap_err();
        assert!(matches!(err, Error::UnknownStepType(_)));
        assert_eq!(err.kind(), crate::error::ErrorKind::Static);
    }

    #[test]
    fn test_builtin_effect_flags() {
        let registry = ProcessorRegistry::with_builtins();
        assert!(registry.step("load").unwrap().effects().reads);
        assert!(registry.step("store").unwrap().effects().writes);
        assert_eq!(
            registry.step("identity").unwrap().effects(),
            ExternalEffects::default()
        );
    }

    #[test]
    fn test_step_output_rejects_undeclared_port() {
        let registry = ProcessorRegistry::with_builtins();
        let step = registry
            .step("identity")
            .unwrap()
            .with_name("ident")
            .with_port(Port::output("result").sequence());

        let mut output = StepOutput::new(&step);
        output.write("result", Document::new("ok")).unwrap();

        let err = output.write("bogus", Document::new("no")).unwrap_err();
        assert!(err.is_defect());
    }

    #[test]
    fn test_step_output_write_primary() {
        let registry = ProcessorRegistry::with_builtins();
        let step = registry
            .step("identity")
            .unwrap()
            .with_name("ident")
            .with_port(Port::output("result").sequence())
            .with_port(Port::output("secondary").sequence());

        // Two unmarked output ports: no primary exists, writing is a defect
        let mut output = StepOutput::new(&step);
        assert!(output.write_primary(Document::new("x")).unwrap_err().is_defect());

        let step = registry
            .step("identity")
            .unwrap()
            .with_name("ident")
            .with_port(Port::output("result").primary().sequence())
            .with_port(Port::output("secondary").sequence());
        let mut output = StepOutput::new(&step);
        output.write_primary(Document::new("x")).unwrap();
        let written = output.into_documents();
        assert_eq!(written.get("result").map(Vec::len), Some(1));
    }
}
