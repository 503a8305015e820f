//! Documents and expression result items

use crate::core::name::QName;
use serde::{Deserialize, Serialize};

/// A single document flowing through pipeline ports.
///
/// The engine treats the content as an opaque payload; only leaf step
/// bodies and the expression evaluator interpret it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Document {
    content: String,
    base_uri: Option<String>,
}

impl Document {
    pub fn new(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            base_uri: None,
        }
    }

    /// Render an evaluated parameter as a document for a parameters port.
    pub fn parameter(name: &QName, value: &str) -> Self {
        Document::new(format!("{}={}", name, value))
    }

    pub fn with_base_uri(mut self, base_uri: impl Into<String>) -> Self {
        self.base_uri = Some(base_uri.into());
        self
    }

    pub fn content(&self) -> &str {
        &self.content
    }

    pub fn base_uri(&self) -> Option<&str> {
        self.base_uri.as_deref()
    }
}

/// One item in an expression evaluation result sequence.
#[derive(Debug, Clone, PartialEq)]
pub enum Item {
    Boolean(bool),
    Number(f64),
    String(String),
    Node(Document),
}

impl Item {
    /// True for atomic values, false for document nodes.
    pub fn is_atomic(&self) -> bool {
        !matches!(self, Item::Node(_))
    }

    /// The string value of this item.
    pub fn string_value(&self) -> String {
        match self {
            Item::Boolean(b) => b.to_string(),
            Item::Number(n) => format_number(*n),
            Item::String(s) => s.clone(),
            Item::Node(doc) => doc.content().to_string(),
        }
    }

    /// Effective boolean value of a result sequence.
    ///
    /// Empty is false; more than one item is true; a single atomic item
    /// converts (booleans directly, numbers by zero/NaN test, strings by
    /// emptiness); a single node is true.
    pub fn effective_boolean(items: &[Item]) -> bool {
        match items {
            [] => false,
            [item] => match item {
                Item::Boolean(b) => *b,
                Item::Number(n) => *n != 0.0 && !n.is_nan(),
                Item::String(s) => !s.is_empty(),
                Item::Node(_) => true,
            },
            _ => true,
        }
    }
}

fn format_number(n: f64) -> String {
    if n.fract() == 0.0 && n.is_finite() {
        format!("{}", n as i64)
    } else {
        format!("{}", n)
    }
}
