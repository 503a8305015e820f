//! Immutable execution environments threaded through step execution

use crate::core::document::Document;
use crate::core::name::QName;
use crate::core::port::PortReference;
use crate::error::{Error, Result};
use std::collections::HashMap;
use std::sync::{Arc, OnceLock};

/// Position and size of the active for-each iteration.
///
/// Threaded explicitly through the per-iteration child environment so that
/// iterations can run on arbitrary worker threads without ambient state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IterationPosition {
    /// 1-based index of the current document.
    pub position: usize,
    /// Total number of documents in the iteration source.
    pub size: usize,
}

#[derive(Debug, Clone)]
enum PortContents {
    Documents(Vec<Document>),
    Alias(PortReference),
}

#[derive(Debug)]
struct PortSlot {
    contents: PortContents,
    /// Memoized result of the first alias resolution.
    resolved: OnceLock<Vec<Document>>,
}

/// A runtime port instance: either a materialized, ordered, finite document
/// sequence, or a lazy alias to another port in the same environment chain.
///
/// Alias chains are acyclic by construction: a step may only pipe from
/// ports of already-sequenced steps or enclosing scopes.
#[derive(Debug, Clone)]
pub struct EnvironmentPort {
    slot: Arc<PortSlot>,
}

impl EnvironmentPort {
    pub fn materialized(documents: Vec<Document>) -> Self {
        Self {
            slot: Arc::new(PortSlot {
                contents: PortContents::Documents(documents),
                resolved: OnceLock::new(),
            }),
        }
    }

    pub fn alias(target: PortReference) -> Self {
        Self {
            slot: Arc::new(PortSlot {
                contents: PortContents::Alias(target),
                resolved: OnceLock::new(),
            }),
        }
    }

    pub fn is_alias(&self) -> bool {
        matches!(self.slot.contents, PortContents::Alias(_))
    }

    /// The document sequence on this port. An alias resolves lazily against
    /// the given environment and memoizes its first resolution.
    pub fn documents(&self, env: &Environment) -> Result<Vec<Document>> {
        match &self.slot.contents {
            PortContents::Documents(documents) => Ok(documents.clone()),
            PortContents::Alias(target) => {
                if let Some(documents) = self.slot.resolved.get() {
                    return Ok(documents.clone());
                }
                let port = env
                    .port(target)
                    .ok_or_else(|| Error::DanglingAlias(target.clone()))?
                    .clone();
                let documents = port.documents(env)?;
                Ok(self.slot.resolved.get_or_init(|| documents).clone())
            }
        }
    }
}

/// An immutable snapshot of realized ports and in-scope variable bindings.
///
/// Derivations add a local overlay on top of a shared parent; a parent
/// environment is never modified by deriving from it. Within one
/// environment every port reference is write-once.
#[derive(Debug, Clone, Default)]
pub struct Environment {
    parent: Option<Arc<Environment>>,
    ports: HashMap<PortReference, EnvironmentPort>,
    variables: HashMap<QName, String>,
    default_readable: Option<PortReference>,
    xpath_context: Option<PortReference>,
    iteration: Option<IterationPosition>,
}

impl Environment {
    pub fn new() -> Self {
        Self::default()
    }

    /// Derive the environment a following sibling step executes in. The
    /// caller declares the new step's ports and evaluates its options into
    /// the returned overlay.
    pub fn following(&self) -> Environment {
        self.derive()
    }

    /// Derive the environment for a nested scope (for-each iteration body,
    /// when/otherwise branch, group contents). Anything added to it stays
    /// invisible to the sibling that follows the enclosing compound step.
    pub fn child(&self) -> Environment {
        self.derive()
    }

    fn derive(&self) -> Environment {
        Environment {
            parent: Some(Arc::new(self.clone())),
            ports: HashMap::new(),
            variables: HashMap::new(),
            default_readable: self.default_readable.clone(),
            xpath_context: self.xpath_context.clone(),
            iteration: self.iteration,
        }
    }

    /// Look up a realized port, walking the parent chain.
    pub fn port(&self, reference: &PortReference) -> Option<&EnvironmentPort> {
        self.ports.get(reference).or_else(|| {
            self.parent
                .as_ref()
                .and_then(|parent| parent.port(reference))
        })
    }

    /// Realize a port under a reference. Rebinding a reference already bound
    /// in this environment is a defect; shadowing a parent binding is not.
    pub fn insert_port(
        &mut self,
        reference: PortReference,
        port: EnvironmentPort,
    ) -> Result<()> {
        if self.ports.contains_key(&reference) {
            return Err(Error::PortRebound(reference));
        }
        self.ports.insert(reference, port);
        Ok(())
    }

    /// Look up an in-scope variable, innermost binding first.
    pub fn variable(&self, name: &QName) -> Option<&str> {
        match self.variables.get(name) {
            Some(value) => Some(value.as_str()),
            None => self
                .parent
                .as_ref()
                .and_then(|parent| parent.variable(name)),
        }
    }

    pub fn set_variable(&mut self, name: QName, value: String) {
        self.variables.insert(name, value);
    }

    /// All variables visible from this environment, innermost bindings
    /// shadowing outer ones.
    pub fn variables_in_scope(&self) -> HashMap<QName, String> {
        let mut scope = self
            .parent
            .as_ref()
            .map(|parent| parent.variables_in_scope())
            .unwrap_or_default();
        for (name, value) in &self.variables {
            scope.insert(name.clone(), value.clone());
        }
        scope
    }

    /// The implicit source for a primary input port lacking a binding.
    pub fn default_readable(&self) -> Option<&PortReference> {
        self.default_readable.as_ref()
    }

    pub fn set_default_readable(&mut self, reference: Option<PortReference>) {
        self.default_readable = reference;
    }

    /// Documents on the default readable port; empty when none is set.
    pub fn default_readable_documents(&self) -> Result<Vec<Document>> {
        match &self.default_readable {
            None => Ok(Vec::new()),
            Some(reference) => self
                .port(reference)
                .ok_or_else(|| Error::DanglingAlias(reference.clone()))?
                .clone()
                .documents(self),
        }
    }

    /// The port supplying the context document for expression evaluation.
    pub fn xpath_context(&self) -> Option<&PortReference> {
        self.xpath_context.as_ref()
    }

    pub fn set_xpath_context(&mut self, reference: Option<PortReference>) {
        self.xpath_context = reference;
    }

    /// First document on the xpath context port, if any.
    pub fn context_document(&self) -> Result<Option<Document>> {
        let Some(reference) = &self.xpath_context else {
            return Ok(None);
        };
        let port = self
            .port(reference)
            .ok_or_else(|| Error::DanglingAlias(reference.clone()))?
            .clone();
        Ok(port.documents(self)?.into_iter().next())
    }

    pub fn iteration(&self) -> Option<IterationPosition> {
        self.iteration
    }

    pub fn set_iteration(&mut self, iteration: Option<IterationPosition>) {
        self.iteration = iteration;
    }
}
