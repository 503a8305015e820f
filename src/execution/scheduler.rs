//! Conservative dependency analysis over subpipeline siblings
//!
//! For each step the plan records the latest earlier sibling it depends on,
//! derived from explicit pipe bindings, implicit default-input wiring, and
//! declared external-effect flags. Steps whose dependency lies further back
//! than their immediate predecessor are candidates for reordering or
//! overlap; the engine currently executes subpipelines in declaration order
//! and records the plan for tracing.
//!
//! External writers serialize behind the previous writer, not just readers
//! behind writers: two stores to the same resource must keep their declared
//! order, and effect flags carry no resource identity to prove them
//! independent.

use crate::core::port::{PortBinding, PortKind};
use crate::core::step::Step;
use std::collections::HashMap;

/// The per-step dependency frontier of one subpipeline.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DependencyPlan {
    dependencies: Vec<Option<usize>>,
}

impl DependencyPlan {
    /// Analyze an ordered sibling sequence. Effect flags are trusted as
    /// declared: a step with unflagged side effects is outside the model.
    pub fn analyze(steps: &[Step]) -> Self {
        let mut index_by_name: HashMap<&str, usize> = HashMap::new();
        let mut last_external_writer: Option<usize> = None;
        let mut last_default_producer: Option<usize> = None;
        let mut dependencies = Vec::with_capacity(steps.len());

        for (index, step) in steps.iter().enumerate() {
            let mut dependency: Option<usize> = None;

            // External reads and writes serialize against the last writer.
            if step.effects().reads || step.effects().writes {
                dependency = later(dependency, last_external_writer);
            }

            for kind in [PortKind::Input, PortKind::Parameter] {
                if let Some(port) = step.primary_port(kind) {
                    if port.bindings.is_empty() {
                        // Implicitly wired to the default readable port,
                        // i.e. the nearest primary-output producer.
                        dependency = later(dependency, last_default_producer);
                    }
                }
            }

            for port in step.ports() {
                for binding in &port.bindings {
                    if let PortBinding::Pipe { step: source, .. } = binding {
                        dependency = later(dependency, index_by_name.get(source.as_str()).copied());
                    }
                }
            }

            dependencies.push(dependency);

            if let Some(name) = step.name() {
                index_by_name.insert(name, index);
            }
            if step.effects().writes {
                last_external_writer = Some(index);
            }
            if step.primary_port(PortKind::Output).is_some() {
                last_default_producer = Some(index);
            }
        }

        Self { dependencies }
    }

    /// The latest earlier sibling the step at `index` depends on, or `None`
    /// when it depends on nothing inside this subpipeline.
    pub fn dependency_of(&self, index: usize) -> Option<usize> {
        self.dependencies.get(index).copied().flatten()
    }

    pub fn len(&self) -> usize {
        self.dependencies.len()
    }

    pub fn is_empty(&self) -> bool {
        self.dependencies.is_empty()
    }
}

fn later(a: Option<usize>, b: Option<usize>) -> Option<usize> {
    match (a, b) {
        (Some(a), Some(b)) => Some(a.max(b)),
        (a, None) => a,
        (None, b) => b,
    }
}
