//! Compound control-flow processors: sequential containers, choose, and
//! parallel for-each

use crate::core::document::Item;
use crate::core::environment::{Environment, EnvironmentPort, IterationPosition};
use crate::core::port::{PortKind, PortReference, CURRENT_PORT};
use crate::core::step::Step;
use crate::error::{Error, Result};
use crate::execution::engine::{step_name, Engine};
use crate::execution::processor::{StepOutput, StepProcessor};
use crate::execution::tasks::TaskBatch;
use async_trait::async_trait;
use tracing::debug;

/// Runs a subpipeline in declaration order inside a child scope.
///
/// Handles `pipeline`, `group`, `try`, and the bodies of `when` and
/// `otherwise` branches: anything whose semantics are "run these steps in
/// order and expose the declared outputs".
pub struct Sequential;

#[async_trait]
impl StepProcessor for Sequential {
    async fn run(&self, step: &Step, mut env: Environment, engine: &Engine) -> Result<Environment> {
        engine.resolve_input_ports(step, &mut env)?;
        let name = step_name(step)?.to_string();

        // The compound's primary input becomes the default readable port
        // for its first contained step.
        let mut inner = env.child();
        if let Some(primary) = step.primary_port(PortKind::Input) {
            inner.set_default_readable(Some(PortReference::new(&name, &primary.name)));
        }
        let inner = engine.run_sequence(step.subpipeline(), inner).await?;

        let mut output = StepOutput::new(step);
        for port in step.ports().iter().filter(|p| p.kind == PortKind::Output) {
            if !port.bindings.is_empty() {
                let mut documents = Vec::new();
                for binding in &port.bindings {
                    documents.extend(engine.materialize_binding(binding, &inner)?);
                }
                output.write_all(&port.name, documents)?;
            } else if step
                .primary_port(PortKind::Output)
                .map(|p| p.name == port.name)
                .unwrap_or(false)
            {
                // An unbound primary output passes through whatever the last
                // contained step left readable.
                output.write_all(&port.name, inner.default_readable_documents()?)?;
            }
        }
        engine.finish_step(step, env, output)
    }
}

/// Evaluates branch tests in declaration order and runs the first branch
/// that selects. `otherwise` always selects.
pub struct Choose;

impl Choose {
    fn branch_selected(branch: &Step, child: &Environment, engine: &Engine) -> Result<bool> {
        if branch.step_type() == "otherwise" {
            return Ok(true);
        }
        let name = step_name(branch)?.to_string();
        let test = branch.test().ok_or(Error::MissingTest { step: name })?;
        Ok(Item::effective_boolean(&engine.evaluate(test, child)?))
    }
}

#[async_trait]
impl StepProcessor for Choose {
    async fn run(&self, step: &Step, mut env: Environment, engine: &Engine) -> Result<Environment> {
        engine.resolve_input_ports(step, &mut env)?;
        let name = step_name(step)?.to_string();

        for branch in step.subpipeline() {
            let branch_name = step_name(branch)?.to_string();

            // A branch with an explicitly bound context port tests against
            // its own context; otherwise it inherits the choose's context.
            let mut child = env.child();
            if let Some(port) = branch.context_input().filter(|p| !p.bindings.is_empty()) {
                let port = port.clone();
                engine.resolve_port(branch, &port, &mut child)?;
                child.set_xpath_context(Some(PortReference::new(&branch_name, &port.name)));
            }

            if !Self::branch_selected(branch, &child, engine)? {
                continue;
            }
            debug!(step = name.as_str(), branch = branch_name.as_str(), "branch selected");

            let result = engine.run_step(branch, &child).await?;

            // The selected branch's outputs surface under the choose's own
            // name, matched port-for-port.
            let mut output = StepOutput::new(step);
            for port in step.ports().iter().filter(|p| p.kind == PortKind::Output) {
                let source = PortReference::new(&branch_name, &port.name);
                if let Some(realized) = result.port(&source) {
                    let realized = realized.clone();
                    output.write_all(&port.name, realized.documents(&result)?)?;
                } else if step
                    .primary_port(PortKind::Output)
                    .map(|p| p.name == port.name)
                    .unwrap_or(false)
                {
                    output.write_all(&port.name, result.default_readable_documents()?)?;
                }
            }
            return engine.finish_step(step, env, output);
        }

        Err(Error::NoBranchSelected { step: name })
    }
}

/// Runs the iteration body once per document on the primary input, with
/// iterations executing in parallel up to the engine's limit.
///
/// Iterations are isolated: each gets its own child environment seeded with
/// the current document, and the collected primary outputs keep input
/// order. All iterations run to completion on failure; the earliest failing
/// iteration's error is reported and partial results are discarded.
pub struct ForEach;

#[async_trait]
impl StepProcessor for ForEach {
    async fn run(&self, step: &Step, mut env: Environment, engine: &Engine) -> Result<Environment> {
        engine.resolve_input_ports(step, &mut env)?;
        let name = step_name(step)?.to_string();

        let source = step
            .primary_port(PortKind::Input)
            .ok_or_else(|| Error::Internal(format!("for-each '{}' has no primary input port", name)))?;
        let reference = PortReference::new(&name, &source.name);
        let realized = env
            .port(&reference)
            .ok_or_else(|| Error::DanglingAlias(reference.clone()))?
            .clone();

        // The iteration source is fully materialized before any iteration
        // starts, so position and size are known up front.
        let documents = realized.documents(&env)?;
        if !source.sequence && documents.len() > 1 {
            return Err(Error::SequenceNotAllowed {
                step: name.clone(),
                port: source.name.clone(),
                count: documents.len(),
            });
        }
        let size = documents.len();
        debug!(step = name.as_str(), iterations = size, "starting for-each");

        let mut batch = TaskBatch::new(engine.iteration_limiter());
        for (index, document) in documents.into_iter().enumerate() {
            let current = PortReference::new(&name, CURRENT_PORT);
            let mut child = env.child();
            child.set_iteration(Some(IterationPosition {
                position: index + 1,
                size,
            }));
            child.insert_port(current.clone(), EnvironmentPort::materialized(vec![document]))?;
            child.set_default_readable(Some(current.clone()));
            child.set_xpath_context(Some(current));

            let body = step.subpipeline().to_vec();
            let engine = engine.clone();
            batch
                .submit(async move {
                    let result = engine.run_sequence(&body, child).await?;
                    result.default_readable_documents()
                })
                .await?;
        }
        let collected = batch.join_ordered().await?;

        let mut output = StepOutput::new(step);
        if let Some(primary) = step.primary_port(PortKind::Output) {
            let port_name = primary.name.clone();
            for documents in collected {
                output.write_all(&port_name, documents)?;
            }
        }
        engine.finish_step(step, env, output)
    }
}
