#![allow(dead_code)]

//! Shared fixtures for integration tests: a scripted expression evaluator
//! and step builders

use async_trait::async_trait;
use docpipe::core::Port;
use docpipe::error::Error;
use docpipe::execution::{ProcessorRegistry, StepBody, StepInput, StepOutput};
use docpipe::{
    Document, Engine, EngineConfig, EvaluationScope, ExpressionEvaluator, InMemoryResolver, Item,
    QName, Result, Step, Variable,
};
use std::sync::{Arc, Once};
use std::time::Duration;

static TRACING: Once = Once::new();

fn init_tracing() {
    TRACING.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .with_test_writer()
            .try_init();
    });
}

/// Pattern-matching evaluator covering the expression shapes the tests use.
pub struct ScriptedEvaluator;

impl ExpressionEvaluator for ScriptedEvaluator {
    fn evaluate(&self, expression: &str, scope: &EvaluationScope<'_>) -> Result<Vec<Item>> {
        let expression = expression.trim();
        match expression {
            "true()" => return Ok(vec![Item::Boolean(true)]),
            "false()" => return Ok(vec![Item::Boolean(false)]),
            "." => {
                return Ok(scope
                    .context
                    .map(|doc| vec![Item::Node(doc.clone())])
                    .unwrap_or_default());
            }
            "position()" | "last()" | "(last() - position()) * 20" => {
                let iteration = scope.iteration.ok_or_else(|| Error::Expression {
                    expression: expression.to_string(),
                    message: "no iteration in scope".to_string(),
                })?;
                let value = match expression {
                    "position()" => iteration.position as f64,
                    "last()" => iteration.size as f64,
                    _ => (iteration.size - iteration.position) as f64 * 20.0,
                };
                return Ok(vec![Item::Number(value)]);
            }
            _ => {}
        }
        if let Some(literal) = unquote(expression) {
            return Ok(vec![Item::String(literal.to_string())]);
        }
        if let Some(rest) = expression.strip_prefix(". = ") {
            let literal = unquote(rest.trim()).ok_or_else(|| unsupported(expression))?;
            let matched = scope
                .context
                .map(|doc| doc.content() == literal)
                .unwrap_or(false);
            return Ok(vec![Item::Boolean(matched)]);
        }
        if let Some(name) = expression.strip_prefix('$') {
            return match scope.variables.get(&QName::new(name)) {
                Some(value) => Ok(vec![Item::String(value.clone())]),
                None => Err(Error::Expression {
                    expression: expression.to_string(),
                    message: "unbound variable".to_string(),
                }),
            };
        }
        if let Ok(number) = expression.parse::<f64>() {
            return Ok(vec![Item::Number(number)]);
        }
        Err(unsupported(expression))
    }
}

fn unsupported(expression: &str) -> Error {
    Error::Expression {
        expression: expression.to_string(),
        message: "unsupported expression".to_string(),
    }
}

fn unquote(expression: &str) -> Option<&str> {
    expression
        .strip_prefix('\'')
        .and_then(|rest| rest.strip_suffix('\''))
}

/// Prefixes each source document's content with the evaluated `label`
/// option, optionally sleeping `delay-ms` first.
pub struct Annotate;

#[async_trait]
impl StepBody for Annotate {
    async fn execute(&self, input: &StepInput<'_>, output: &mut StepOutput) -> Result<()> {
        if let Some(delay) = input.option(&QName::new("delay-ms")) {
            let millis: u64 = delay.parse().unwrap_or(0);
            tokio::time::sleep(Duration::from_millis(millis)).await;
        }
        let label = input.required_option(&QName::new("label"))?;
        for document in input.primary_documents()? {
            output.write_primary(Document::new(format!("{}:{}", label, document.content())))?;
        }
        Ok(())
    }
}

/// Fails on any source document whose content contains the `needle` option,
/// otherwise passes documents through.
pub struct FailMatching;

#[async_trait]
impl StepBody for FailMatching {
    async fn execute(&self, input: &StepInput<'_>, output: &mut StepOutput) -> Result<()> {
        let needle = input.required_option(&QName::new("needle"))?;
        for document in input.primary_documents()? {
            if document.content().contains(needle) {
                return Err(Error::StepFailed {
                    step: input.step_name().to_string(),
                    message: format!("content '{}' matched '{}'", document.content(), needle),
                });
            }
            output.write_primary(document)?;
        }
        Ok(())
    }
}

pub fn registry() -> ProcessorRegistry {
    let mut registry = ProcessorRegistry::with_builtins();
    registry.register_body("annotate", Annotate, Default::default());
    registry.register_body("fail-matching", FailMatching, Default::default());
    registry
}

pub fn engine() -> Engine {
    init_tracing();
    Engine::new(Arc::new(ScriptedEvaluator), Arc::new(InMemoryResolver::new()))
}

pub fn engine_with_resolver(resolver: Arc<InMemoryResolver>) -> Engine {
    init_tracing();
    Engine::new(Arc::new(ScriptedEvaluator), resolver)
}

pub fn engine_with_config(config: EngineConfig) -> Engine {
    init_tracing();
    Engine::with_config(
        Arc::new(ScriptedEvaluator),
        Arc::new(InMemoryResolver::new()),
        config,
    )
}

/// A `pipeline` root with a primary `source` input and `result` output.
pub fn pipeline_root(registry: &ProcessorRegistry, name: &str) -> Step {
    registry
        .step("pipeline")
        .expect("builtin")
        .with_name(name)
        .with_port(Port::input("source").sequence())
        .with_port(Port::output("result").sequence())
}

pub fn identity(registry: &ProcessorRegistry, name: &str) -> Step {
    registry
        .step("identity")
        .expect("builtin")
        .with_name(name)
        .with_port(Port::input("source").sequence())
        .with_port(Port::output("result").sequence())
}

/// An `annotate` step with its `label` and `delay-ms` options declared.
pub fn annotate(registry: &ProcessorRegistry, name: &str) -> Step {
    registry
        .step("annotate")
        .expect("registered")
        .with_name(name)
        .with_port(Port::input("source").sequence())
        .with_port(Port::output("result").sequence())
        .with_variable(Variable::option(QName::new("label")))
        .with_variable(Variable::option(QName::new("delay-ms")))
}
