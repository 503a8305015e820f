//! Pipeline execution engine

pub mod compound;
pub mod engine;
pub mod processor;
pub mod scheduler;
mod tasks;

pub use compound::{Choose, ForEach, Sequential};
pub use engine::{Engine, EngineConfig};
pub use processor::{
    Identity, LeafProcessor, Load, ProcessorRegistry, StepBody, StepInput, StepOutput,
    StepProcessor, Store,
};
pub use scheduler::DependencyPlan;
