//! Port declarations, static bindings, and runtime port references

use crate::core::document::Document;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Reserved input port name that designates the explicit context port for
/// expression evaluation on a step.
pub const CONTEXT_PORT: &str = "#context";

/// Synthetic input port seeded with the current document of a for-each
/// iteration.
pub const CURRENT_PORT: &str = "current";

/// What a port carries and which direction it faces.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PortKind {
    Input,
    Parameter,
    Output,
}

impl PortKind {
    pub fn label(&self) -> &'static str {
        match self {
            PortKind::Input => "input",
            PortKind::Parameter => "parameter",
            PortKind::Output => "output",
        }
    }
}

/// Identifies a runtime port slot by step name and port name.
///
/// Equality and hashing are by value, so references are safe map keys and
/// safe to share across worker threads.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PortReference {
    step: String,
    port: String,
}

impl PortReference {
    pub fn new(step: impl Into<String>, port: impl Into<String>) -> Self {
        Self {
            step: step.into(),
            port: port.into(),
        }
    }

    pub fn step(&self) -> &str {
        &self.step
    }

    pub fn port(&self) -> &str {
        &self.port
    }
}

impl fmt::Display for PortReference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.step, self.port)
    }
}

/// A static declaration of where a port's documents come from.
///
/// Pure declaration; realized documents live in the environment, never here.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum PortBinding {
    /// Read from another step's port.
    Pipe { step: String, port: String },
    /// A document written inline in the declaration.
    Inline(Document),
    /// A document loaded from an external reference.
    Document { href: String },
    /// Explicitly no documents.
    Empty,
}

/// A named, typed connection point declared on a step.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Port {
    pub name: String,
    pub kind: PortKind,
    /// Explicitly marked primary. A kind with exactly one port treats that
    /// port as primary regardless of this flag.
    pub primary: bool,
    /// Whether the port accepts 0..n documents rather than 0..1.
    pub sequence: bool,
    pub bindings: Vec<PortBinding>,
}

impl Port {
    pub fn input(name: impl Into<String>) -> Self {
        Self::new(name, PortKind::Input)
    }

    pub fn output(name: impl Into<String>) -> Self {
        Self::new(name, PortKind::Output)
    }

    /// Parameter ports always accept sequences.
    pub fn parameter(name: impl Into<String>) -> Self {
        let mut port = Self::new(name, PortKind::Parameter);
        port.sequence = true;
        port
    }

    fn new(name: impl Into<String>, kind: PortKind) -> Self {
        Self {
            name: name.into(),
            kind,
            primary: false,
            sequence: false,
            bindings: Vec::new(),
        }
    }

    /// Mark this port as the primary port of its kind.
    pub fn primary(mut self) -> Self {
        self.primary = true;
        self
    }

    /// Allow 0..n documents on this port.
    pub fn sequence(mut self) -> Self {
        self.sequence = true;
        self
    }

    pub fn with_binding(mut self, binding: PortBinding) -> Self {
        self.bindings.push(binding);
        self
    }

    /// Append a pipe binding reading from another step's port.
    pub fn pipe(self, step: impl Into<String>, port: impl Into<String>) -> Self {
        self.with_binding(PortBinding::Pipe {
            step: step.into(),
            port: port.into(),
        })
    }

    /// Append an inline document binding.
    pub fn inline(self, document: Document) -> Self {
        self.with_binding(PortBinding::Inline(document))
    }
}
