//! Pipeline facade: static validation, name assignment, and top-level runs

use crate::core::document::Document;
use crate::core::environment::Environment;
use crate::core::port::{PortBinding, PortKind, PortReference, CURRENT_PORT};
use crate::core::step::Step;
use crate::error::{Error, Result};
use crate::execution::engine::{step_name, Engine};
use std::collections::{HashMap, HashSet};
use tracing::info;
use uuid::Uuid;

/// A validated, runnable step tree.
///
/// Construction assigns names to anonymous steps and rejects declarations
/// that can never run; a constructed pipeline only raises dynamic errors
/// and defects. Pipelines clone cheaply for repeated or concurrent runs.
#[derive(Debug, Clone)]
pub struct Pipeline {
    root: Step,
}

impl Pipeline {
    /// Validate a step tree into a runnable pipeline.
    pub fn new(root: Step) -> Result<Self> {
        let mut counter = 0usize;
        let root = assign_names(root, &mut counter);

        validate_declaration(&root)?;
        let none = HashSet::new();
        validate_pipe_bindings(&root, input_ports(&root), &none)?;
        validate_scope(&root, &none)?;

        Ok(Self { root })
    }

    pub fn root(&self) -> &Step {
        &self.root
    }

    /// Set a literal value on an option declared on the root step.
    pub fn with_option_value(
        self,
        name: impl Into<crate::core::name::QName>,
        value: impl Into<String>,
    ) -> Result<Self> {
        Ok(Self {
            root: self.root.with_option_value(name, value)?,
        })
    }

    /// Bind an inline document to one of the root step's input ports.
    pub fn with_input_document(self, port: &str, document: Document) -> Result<Self> {
        Ok(Self {
            root: self.root.with_input_document(port, document)?,
        })
    }

    /// Run the pipeline to completion and collect its declared outputs.
    pub async fn run(&self, engine: &Engine) -> Result<PipelineOutputs> {
        preflight_required_options(&self.root)?;

        let run_id = Uuid::new_v4();
        let name = step_name(&self.root)?;
        info!(%run_id, pipeline = name, "pipeline run started");

        let env = engine.run_step(&self.root, &Environment::new()).await?;

        let mut ports = HashMap::new();
        for port in output_ports(&self.root) {
            let reference = PortReference::new(name, &port.name);
            let realized = env
                .port(&reference)
                .ok_or_else(|| Error::DanglingAlias(reference.clone()))?
                .clone();
            ports.insert(port.name.clone(), realized.documents(&env)?);
        }
        info!(%run_id, pipeline = name, "pipeline run finished");

        Ok(PipelineOutputs {
            ports,
            primary: self
                .root
                .primary_port(PortKind::Output)
                .map(|p| p.name.clone()),
        })
    }
}

/// The materialized output ports of one pipeline run.
#[derive(Debug, Clone)]
pub struct PipelineOutputs {
    ports: HashMap<String, Vec<Document>>,
    primary: Option<String>,
}

impl PipelineOutputs {
    /// The documents on a named output port.
    pub fn port(&self, name: &str) -> Option<&[Document]> {
        self.ports.get(name).map(Vec::as_slice)
    }

    /// The documents on the primary output port, empty when none exists.
    pub fn primary(&self) -> &[Document] {
        self.primary
            .as_deref()
            .and_then(|name| self.port(name))
            .unwrap_or(&[])
    }

    pub fn ports(&self) -> &HashMap<String, Vec<Document>> {
        &self.ports
    }
}

fn assign_names(step: Step, counter: &mut usize) -> Step {
    let step = if step.name().is_none() {
        *counter += 1;
        let number = *counter;
        step.with_name(format!("#step{number}"))
    } else {
        step
    };
    let children: Vec<Step> = step
        .subpipeline()
        .to_vec()
        .into_iter()
        .map(|child| assign_names(child, counter))
        .collect();
    step.with_subpipeline(children)
}

fn input_ports(step: &Step) -> impl Iterator<Item = &crate::core::port::Port> {
    step.ports().iter().filter(|p| p.kind != PortKind::Output)
}

fn output_ports(step: &Step) -> impl Iterator<Item = &crate::core::port::Port> {
    step.ports().iter().filter(|p| p.kind == PortKind::Output)
}

/// Checks local to one step declaration.
fn validate_declaration(step: &Step) -> Result<()> {
    let name = step_name(step)?;

    for kind in [PortKind::Input, PortKind::Parameter, PortKind::Output] {
        let explicit = step
            .ports()
            .iter()
            .filter(|p| p.kind == kind && p.primary)
            .count();
        if explicit > 1 {
            return Err(Error::DuplicatePrimaryPort {
                step: name.to_string(),
                kind: kind.label(),
            });
        }
    }

    if !step.parameters().is_empty() && step.primary_port(PortKind::Parameter).is_none() {
        return Err(Error::MissingParameterPort {
            step: name.to_string(),
        });
    }

    if step.step_type() == "when" && step.test().is_none() {
        return Err(Error::MissingTest {
            step: name.to_string(),
        });
    }

    Ok(())
}

/// Check every pipe binding on the given ports against the visible set.
fn validate_pipe_bindings<'a>(
    step: &Step,
    ports: impl Iterator<Item = &'a crate::core::port::Port>,
    visible: &HashSet<PortReference>,
) -> Result<()> {
    let name = step_name(step)?;
    for port in ports {
        for binding in &port.bindings {
            if let PortBinding::Pipe {
                step: source_step,
                port: source_port,
            } = binding
            {
                let reference = PortReference::new(source_step, source_port);
                if !visible.contains(&reference) {
                    return Err(Error::UnknownPipeSource {
                        step: name.to_string(),
                        source_step: source_step.clone(),
                        source_port: source_port.clone(),
                    });
                }
            }
        }
    }
    Ok(())
}

/// Validate one compound scope: sibling names, each child's declaration and
/// pipe visibility, and the compound's own output bindings against what its
/// children expose.
fn validate_scope(parent: &Step, visible: &HashSet<PortReference>) -> Result<()> {
    let parent_name = step_name(parent)?;

    let mut inner_visible = visible.clone();
    for port in input_ports(parent) {
        inner_visible.insert(PortReference::new(parent_name, &port.name));
    }
    if parent.step_type() == "for-each" {
        inner_visible.insert(PortReference::new(parent_name, CURRENT_PORT));
    }

    let mut seen = HashSet::new();
    for child in parent.subpipeline() {
        let child_name = step_name(child)?;
        if !seen.insert(child_name.to_string()) {
            return Err(Error::DuplicateStepName {
                name: child_name.to_string(),
            });
        }
        validate_declaration(child)?;
        validate_pipe_bindings(child, input_ports(child), &inner_visible)?;
        validate_scope(child, &inner_visible)?;

        for port in output_ports(child) {
            inner_visible.insert(PortReference::new(child_name, &port.name));
        }
    }

    // The compound's own output bindings read from inside its scope.
    validate_pipe_bindings(parent, output_ports(parent), &inner_visible)
}

/// Reject runs where a required option or parameter can never get a value.
fn preflight_required_options(step: &Step) -> Result<()> {
    let name = step_name(step)?;
    for variable in step.variables().iter().chain(step.parameters()) {
        if variable.required && variable.value.is_none() && variable.select.is_none() {
            return Err(Error::MissingRequiredOption {
                name: variable.name.to_string(),
                step: name.to_string(),
            });
        }
    }
    for child in step.subpipeline() {
        preflight_required_options(child)?;
    }
    Ok(())
}
