//! Execution engine: environment derivation, port-binding resolution, and
//! the generic step execution protocol

use crate::core::document::Item;
use crate::core::environment::{Environment, EnvironmentPort};
use crate::core::port::{Port, PortBinding, PortKind, PortReference};
use crate::core::step::{Step, Variable};
use crate::error::{Error, Result};
use crate::eval::{DocumentResolver, EvaluationScope, ExpressionEvaluator};
use crate::execution::processor::StepOutput;
use crate::execution::scheduler::DependencyPlan;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::Semaphore;
use tracing::{debug, trace};

/// Engine tuning knobs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Upper bound on concurrently running iterations of a single for-each.
    pub max_parallel_iterations: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_parallel_iterations: 8,
        }
    }
}

/// The execution engine. Cheap to clone; clones share the evaluator and
/// the resolver.
#[derive(Clone)]
pub struct Engine {
    evaluator: Arc<dyn ExpressionEvaluator>,
    resolver: Arc<dyn DocumentResolver>,
    config: EngineConfig,
}

impl Engine {
    pub fn new(
        evaluator: Arc<dyn ExpressionEvaluator>,
        resolver: Arc<dyn DocumentResolver>,
    ) -> Self {
        Self::with_config(evaluator, resolver, EngineConfig::default())
    }

    pub fn with_config(
        evaluator: Arc<dyn ExpressionEvaluator>,
        resolver: Arc<dyn DocumentResolver>,
        config: EngineConfig,
    ) -> Self {
        Self {
            evaluator,
            resolver,
            config,
        }
    }

    pub fn resolver(&self) -> &dyn DocumentResolver {
        self.resolver.as_ref()
    }

    /// A fresh limiter for one for-each invocation. Iterations of one loop
    /// hold their permit for the whole body, so the limiter must not be
    /// shared with any loop nested inside that body: a nested loop waiting
    /// on its ancestor's permits would never acquire one.
    pub(crate) fn iteration_limiter(&self) -> Arc<Semaphore> {
        Arc::new(Semaphore::new(self.config.max_parallel_iterations.max(1)))
    }

    /// Run one step: derive its following environment, dispatch to the
    /// processor bound at construction time, and return the environment the
    /// next sibling consumes.
    pub async fn run_step(&self, step: &Step, env: &Environment) -> Result<Environment> {
        let name = step_name(step)?;
        debug!(step = name, step_type = step.step_type(), "running step");
        let env = self.following_environment(env, step)?;
        step.processor().clone().run(step, env, self).await
    }

    /// Run an ordered subpipeline, each step consuming the environment
    /// produced by its predecessor.
    pub async fn run_sequence(&self, steps: &[Step], env: Environment) -> Result<Environment> {
        if steps.len() > 1 && tracing::enabled!(tracing::Level::TRACE) {
            trace!(plan = ?DependencyPlan::analyze(steps), "subpipeline dependencies");
        }
        let mut env = env;
        for step in steps {
            env = self.run_step(step, &env).await?;
        }
        Ok(env)
    }

    /// Derive the environment a step executes in: inherit from the prior
    /// sibling, realize the xpath context port, evaluate declared variables
    /// and options in order, and write evaluated parameters onto the primary
    /// parameter port.
    pub(crate) fn following_environment(
        &self,
        prior: &Environment,
        step: &Step,
    ) -> Result<Environment> {
        let name = step_name(step)?.to_string();
        let mut env = prior.following();

        // The context port is realized before option evaluation so that
        // select expressions see their context document. An unresolvable
        // context leaves the context unset; the hard unbound-input error is
        // raised when the port is actually read as an input.
        match step.context_input().cloned() {
            Some(port) => match self.resolve_port(step, &port, &mut env) {
                Ok(_) => env.set_xpath_context(Some(PortReference::new(&name, &port.name))),
                Err(Error::UnboundInput { .. }) => env.set_xpath_context(None),
                Err(other) => return Err(other),
            },
            None => env.set_xpath_context(None),
        }

        for variable in step.variables() {
            self.bind_variable(step, variable, &mut env)?;
        }

        if !step.parameters().is_empty() {
            self.bind_parameters(step, &mut env)?;
        }

        Ok(env)
    }

    fn bind_variable(&self, step: &Step, variable: &Variable, env: &mut Environment) -> Result<()> {
        if let Some(value) = &variable.value {
            env.set_variable(variable.name.clone(), value.clone());
            return Ok(());
        }
        if let Some(select) = &variable.select {
            let value = self.evaluate_to_string(select, env)?;
            env.set_variable(variable.name.clone(), value);
            return Ok(());
        }
        if variable.required {
            return Err(Error::UnboundVariable {
                name: variable.name.to_string(),
                step: step_name(step)?.to_string(),
            });
        }
        // A non-required variable without value or select resolves to no
        // value at all, not an empty string.
        Ok(())
    }

    fn bind_parameters(&self, step: &Step, env: &mut Environment) -> Result<()> {
        let name = step_name(step)?.to_string();
        let port = step
            .primary_port(PortKind::Parameter)
            .ok_or_else(|| Error::MissingParameterPort { step: name.clone() })?
            .clone();

        // Declared bindings come first, evaluated parameters append.
        let mut documents = Vec::new();
        for binding in &port.bindings {
            documents.extend(self.materialize_binding(binding, env)?);
        }
        for parameter in step.parameters() {
            let value = if let Some(value) = &parameter.value {
                Some(value.clone())
            } else if let Some(select) = &parameter.select {
                Some(self.evaluate_to_string(select, env)?)
            } else if parameter.required {
                return Err(Error::UnboundVariable {
                    name: parameter.name.to_string(),
                    step: name.clone(),
                });
            } else {
                None
            };
            if let Some(value) = value {
                documents.push(crate::core::document::Document::parameter(
                    &parameter.name,
                    &value,
                ));
            }
        }

        env.insert_port(
            PortReference::new(&name, &port.name),
            EnvironmentPort::materialized(documents),
        )
    }

    /// Evaluate an expression against the environment's context document,
    /// in-scope variables, and iteration position.
    pub(crate) fn evaluate(&self, expression: &str, env: &Environment) -> Result<Vec<Item>> {
        let context = env.context_document()?;
        let scope = EvaluationScope {
            context: context.as_ref(),
            variables: env.variables_in_scope(),
            iteration: env.iteration(),
        };
        self.evaluator.evaluate(expression, &scope)
    }

    fn evaluate_to_string(&self, expression: &str, env: &Environment) -> Result<String> {
        let items = self.evaluate(expression, env)?;
        Ok(items
            .iter()
            .map(Item::string_value)
            .collect::<Vec<_>>()
            .join(" "))
    }

    /// Resolve a declared port to its runtime instance, realizing it in the
    /// environment if needed. Idempotent per environment.
    pub fn resolve_port(
        &self,
        step: &Step,
        port: &Port,
        env: &mut Environment,
    ) -> Result<EnvironmentPort> {
        let name = step_name(step)?;
        let reference = PortReference::new(name, &port.name);
        if let Some(existing) = env.port(&reference) {
            return Ok(existing.clone());
        }

        let realized = if port.bindings.is_empty() {
            match port.kind {
                PortKind::Output => EnvironmentPort::materialized(Vec::new()),
                PortKind::Input | PortKind::Parameter => {
                    let is_primary = step
                        .primary_port(port.kind)
                        .map(|p| p.name == port.name)
                        .unwrap_or(false);
                    match env.default_readable() {
                        // Implicit default-input binding on the primary port
                        Some(source) if is_primary => EnvironmentPort::alias(source.clone()),
                        _ if port.kind == PortKind::Parameter => {
                            EnvironmentPort::materialized(Vec::new())
                        }
                        _ => {
                            return Err(Error::UnboundInput {
                                step: name.to_string(),
                                port: port.name.clone(),
                            })
                        }
                    }
                }
            }
        } else if let [PortBinding::Pipe {
            step: source_step,
            port: source_port,
        }] = port.bindings.as_slice()
        {
            // A single pipe stays a lazy alias, resolved and memoized on
            // first read.
            EnvironmentPort::alias(PortReference::new(source_step, source_port))
        } else {
            let mut documents = Vec::new();
            for binding in &port.bindings {
                documents.extend(self.materialize_binding(binding, env)?);
            }
            if !port.sequence && documents.len() > 1 {
                return Err(Error::SequenceNotAllowed {
                    step: name.to_string(),
                    port: port.name.clone(),
                    count: documents.len(),
                });
            }
            EnvironmentPort::materialized(documents)
        };

        env.insert_port(reference, realized.clone())?;
        Ok(realized)
    }

    /// Realize every input and parameter port of a step.
    pub(crate) fn resolve_input_ports(&self, step: &Step, env: &mut Environment) -> Result<()> {
        for port in step.ports().iter().filter(|p| p.kind != PortKind::Output) {
            self.resolve_port(step, port, env)?;
        }
        Ok(())
    }

    pub(crate) fn materialize_binding(
        &self,
        binding: &PortBinding,
        env: &Environment,
    ) -> Result<Vec<crate::core::document::Document>> {
        match binding {
            PortBinding::Pipe { step, port } => {
                let reference = PortReference::new(step, port);
                let realized = env
                    .port(&reference)
                    .ok_or_else(|| Error::DanglingAlias(reference.clone()))?
                    .clone();
                realized.documents(env)
            }
            PortBinding::Inline(document) => Ok(vec![document.clone()]),
            PortBinding::Document { href } => Ok(vec![self.resolver.load(href, None)?]),
            PortBinding::Empty => Ok(Vec::new()),
        }
    }

    /// Fold a body's written documents back into the environment and
    /// promote the step's primary output to the new default readable port.
    pub(crate) fn finish_step(
        &self,
        step: &Step,
        mut env: Environment,
        output: StepOutput,
    ) -> Result<Environment> {
        let name = step_name(step)?.to_string();
        let mut written = output.into_documents();

        for port in step.ports().iter().filter(|p| p.kind == PortKind::Output) {
            let documents = written.remove(&port.name).unwrap_or_default();
            if !port.sequence && documents.len() > 1 {
                return Err(Error::SequenceNotAllowed {
                    step: name.clone(),
                    port: port.name.clone(),
                    count: documents.len(),
                });
            }
            env.insert_port(
                PortReference::new(&name, &port.name),
                EnvironmentPort::materialized(documents),
            )?;
        }

        if let Some(primary) = step.primary_port(PortKind::Output) {
            env.set_default_readable(Some(PortReference::new(&name, &primary.name)));
        }

        Ok(env)
    }
}

/// A step's assigned name; running an unnamed step is an engine defect
/// (names are assigned during pipeline validation).
pub(crate) fn step_name(step: &Step) -> Result<&str> {
    step.name().ok_or_else(|| {
        Error::Internal(format!(
            "step of type '{}' has no assigned name",
            step.step_type()
        ))
    })
}
