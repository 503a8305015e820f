//! Boundary contracts with external collaborators: expression evaluation
//! and document/I-O resolution
//!
//! The engine never defines an expression grammar or touches URIs itself;
//! it only decides when these collaborators are invoked and with what
//! context.

use crate::core::document::{Document, Item};
use crate::core::environment::IterationPosition;
use crate::core::name::QName;
use crate::error::{Error, Result};
use std::collections::HashMap;
use std::sync::Mutex;

/// Everything an evaluator may consult, passed explicitly per call instead
/// of through process-wide state.
#[derive(Debug)]
pub struct EvaluationScope<'a> {
    /// The context document, taken from the active xpath context port.
    pub context: Option<&'a Document>,
    /// In-scope variable bindings, innermost shadowing outermost.
    pub variables: HashMap<QName, String>,
    /// Iteration position/size when evaluating inside a for-each body.
    pub iteration: Option<IterationPosition>,
}

/// Evaluates select/test expressions against a context document and
/// variable bindings, returning a sequence of result items.
pub trait ExpressionEvaluator: Send + Sync {
    fn evaluate(&self, expression: &str, scope: &EvaluationScope<'_>) -> Result<Vec<Item>>;
}

/// Loads documents from external references and stores documents to
/// external sinks. Invoked from leaf step bodies and external-document
/// bindings, never from the control-flow engine itself.
pub trait DocumentResolver: Send + Sync {
    fn load(&self, href: &str, base_uri: Option<&str>) -> Result<Document>;

    fn store(&self, href: &str, document: &Document) -> Result<()>;
}

/// A resolver backed by an in-memory map. Loads return previously inserted
/// or stored documents; stores overwrite.
#[derive(Debug, Default)]
pub struct InMemoryResolver {
    documents: Mutex<HashMap<String, Document>>,
}

impl InMemoryResolver {
    pub fn new() -> Self {
        Self::default()
    }

    /// Pre-register a document under an href.
    pub fn insert(&self, href: impl Into<String>, document: Document) {
        self.lock().insert(href.into(), document);
    }

    /// Read back a stored document.
    pub fn get(&self, href: &str) -> Option<Document> {
        self.lock().get(href).cloned()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<String, Document>> {
        self.documents
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl DocumentResolver for InMemoryResolver {
    fn load(&self, href: &str, _base_uri: Option<&str>) -> Result<Document> {
        self.lock()
            .get(href)
            .cloned()
            .ok_or_else(|| Error::DocumentLoad {
                href: href.to_string(),
                message: "no document registered under this reference".to_string(),
            })
    }

    fn store(&self, href: &str, document: &Document) -> Result<()> {
        self.lock().insert(href.to_string(), document.clone());
        Ok(())
    }
}
