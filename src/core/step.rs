//! Step declaration tree

use crate::core::name::QName;
use crate::core::port::{Port, PortBinding, PortKind, CONTEXT_PORT};
use crate::core::document::Document;
use crate::execution::processor::StepProcessor;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

/// A variable or option declared on a step.
///
/// Exactly one of `value` / `select` is consulted per evaluation: a literal
/// value wins, otherwise the select expression is re-evaluated per run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Variable {
    pub name: QName,
    pub is_option: bool,
    pub required: bool,
    pub select: Option<String>,
    pub value: Option<String>,
}

impl Variable {
    pub fn option(name: impl Into<QName>) -> Self {
        Self {
            name: name.into(),
            is_option: true,
            required: false,
            select: None,
            value: None,
        }
    }

    pub fn variable(name: impl Into<QName>) -> Self {
        Self {
            is_option: false,
            ..Self::option(name)
        }
    }

    pub fn required(mut self) -> Self {
        self.required = true;
        self
    }

    pub fn with_select(mut self, select: impl Into<String>) -> Self {
        self.select = Some(select.into());
        self
    }

    pub fn with_value(mut self, value: impl Into<String>) -> Self {
        self.value = Some(value.into());
        self
    }
}

/// Declaration-level flags for externally visible side effects, consumed by
/// the subpipeline dependency analysis.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExternalEffects {
    /// The step reads external resources (files, network).
    pub reads: bool,
    /// The step writes external resources.
    pub writes: bool,
}

impl ExternalEffects {
    pub fn reads() -> Self {
        Self {
            reads: true,
            writes: false,
        }
    }

    pub fn writes() -> Self {
        Self {
            reads: false,
            writes: true,
        }
    }
}

/// One node of the step declaration tree.
///
/// Steps are immutable: every `with_*` transform returns a new value and
/// shares structure with the original. A step may be cloned to produce an
/// independent invocable copy for library reuse.
#[derive(Clone)]
pub struct Step {
    step_type: String,
    name: Option<String>,
    ports: Vec<Port>,
    variables: Vec<Variable>,
    parameters: Vec<Variable>,
    subpipeline: Vec<Step>,
    test: Option<String>,
    effects: ExternalEffects,
    processor: Arc<dyn StepProcessor>,
}

impl Step {
    /// Create a bare step of the given type with its behavior bound at
    /// construction time.
    pub fn new(step_type: impl Into<String>, processor: Arc<dyn StepProcessor>) -> Self {
        Self {
            step_type: step_type.into(),
            name: None,
            ports: Vec::new(),
            variables: Vec::new(),
            parameters: Vec::new(),
            subpipeline: Vec::new(),
            test: None,
            effects: ExternalEffects::default(),
            processor,
        }
    }

    pub fn step_type(&self) -> &str {
        &self.step_type
    }

    /// The step's name; may be absent until assigned by the parent pipeline.
    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    pub fn ports(&self) -> &[Port] {
        &self.ports
    }

    pub fn port(&self, name: &str) -> Option<&Port> {
        self.ports.iter().find(|p| p.name == name)
    }

    /// Declared variables and options, in declared (evaluation) order.
    pub fn variables(&self) -> &[Variable] {
        &self.variables
    }

    /// Declared parameters, in declared order.
    pub fn parameters(&self) -> &[Variable] {
        &self.parameters
    }

    pub fn subpipeline(&self) -> &[Step] {
        &self.subpipeline
    }

    /// The test expression; only meaningful on `when` branches.
    pub fn test(&self) -> Option<&str> {
        self.test.as_deref()
    }

    pub fn effects(&self) -> ExternalEffects {
        self.effects
    }

    pub fn processor(&self) -> &Arc<dyn StepProcessor> {
        &self.processor
    }

    /// The primary port of the given kind. A kind with exactly one port
    /// treats that port as primary even without the explicit flag.
    pub fn primary_port(&self, kind: PortKind) -> Option<&Port> {
        let of_kind: Vec<&Port> = self.ports.iter().filter(|p| p.kind == kind).collect();
        match of_kind.as_slice() {
            [] => None,
            [single] => Some(single),
            several => several.iter().find(|p| p.primary).copied(),
        }
    }

    /// The input port supplying the context document for expression
    /// evaluation: an explicit `#context` input wins and suppresses the
    /// primary-input promotion; otherwise the primary non-parameter input.
    pub fn context_input(&self) -> Option<&Port> {
        self.ports
            .iter()
            .find(|p| p.kind == PortKind::Input && p.name == CONTEXT_PORT)
            .or_else(|| self.primary_port(PortKind::Input))
    }

    // --- structural with-* transforms ---

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn with_port(mut self, port: Port) -> Self {
        self.ports.push(port);
        self
    }

    pub fn with_variable(mut self, variable: Variable) -> Self {
        self.variables.push(variable);
        self
    }

    pub fn with_parameter(mut self, parameter: Variable) -> Self {
        self.parameters.push(parameter);
        self
    }

    /// Replace the ordered subpipeline.
    pub fn with_subpipeline(mut self, steps: Vec<Step>) -> Self {
        self.subpipeline = steps;
        self
    }

    /// Append one step to the subpipeline.
    pub fn with_step(mut self, step: Step) -> Self {
        self.subpipeline.push(step);
        self
    }

    pub fn with_test(mut self, test: impl Into<String>) -> Self {
        self.test = Some(test.into());
        self
    }

    pub fn with_effects(mut self, effects: ExternalEffects) -> Self {
        self.effects = effects;
        self
    }

    /// Set a literal value on a declared option. Fails on a step that does
    /// not declare the option.
    pub fn with_option_value(
        mut self,
        name: impl Into<QName>,
        value: impl Into<String>,
    ) -> crate::error::Result<Self> {
        let name = name.into();
        let value = value.into();
        match self
            .variables
            .iter_mut()
            .find(|v| v.is_option && v.name == name)
        {
            Some(option) => {
                option.value = Some(value);
                Ok(self)
            }
            None => Err(crate::error::Error::UndeclaredOption {
                name: name.to_string(),
                step: self.name.clone().unwrap_or_else(|| self.step_type.clone()),
            }),
        }
    }

    /// Append a binding to a declared port. Fails on an undeclared port.
    pub fn with_input_binding(
        mut self,
        port: &str,
        binding: PortBinding,
    ) -> crate::error::Result<Self> {
        match self.ports.iter_mut().find(|p| p.name == port) {
            Some(declared) => {
                declared.bindings.push(binding);
                Ok(self)
            }
            None => Err(crate::error::Error::UndeclaredPort {
                step: self.name.clone().unwrap_or_else(|| self.step_type.clone()),
                port: port.to_string(),
            }),
        }
    }

    /// Bind an inline document to a declared port.
    pub fn with_input_document(
        self,
        port: &str,
        document: Document,
    ) -> crate::error::Result<Self> {
        self.with_input_binding(port, PortBinding::Inline(document))
    }
}

impl fmt::Debug for Step {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Step")
            .field("step_type", &self.step_type)
            .field("name", &self.name)
            .field("ports", &self.ports)
            .field("variables", &self.variables)
            .field("parameters", &self.parameters)
            .field("subpipeline", &self.subpipeline)
            .field("test", &self.test)
            .field("effects", &self.effects)
            .finish_non_exhaustive()
    }
}
