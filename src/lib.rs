//! docpipe - a dataflow engine for document-processing pipelines
//!
//! Pipelines are trees of steps connected through named ports. Documents
//! flow along declared bindings; an immutable environment chain carries
//! realized ports and variable bindings between steps. Compound steps
//! provide sequencing, conditional branching, and parallel iteration.

pub mod core;
pub mod error;
pub mod eval;
pub mod execution;

// Re-export commonly used types
pub use crate::core::{
    Document, Environment, Item, Pipeline, PipelineOutputs, Port, PortBinding, PortKind,
    PortReference, QName, Step, Variable,
};
pub use error::{Error, ErrorKind, Result};
pub use eval::{DocumentResolver, EvaluationScope, ExpressionEvaluator, InMemoryResolver};
pub use execution::{Engine, EngineConfig, ProcessorRegistry, StepBody, StepInput, StepOutput};
