//! Error taxonomy for pipeline declaration and execution

use crate::core::port::PortReference;
use thiserror::Error;

/// Broad classification of an engine error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Malformed or unresolvable declarations, detected before any step runs.
    Static,
    /// Pipeline-domain failures raised while a pipeline runs.
    Dynamic,
    /// Violations of the engine's own invariants; a bug in a step body or
    /// in the control-flow engine, never a pipeline-author problem.
    Defect,
}

/// The error type for all pipeline operations.
#[derive(Debug, Error)]
pub enum Error {
    // --- static / configuration ---
    /// A pipe binding names a step or port that is not visible at that point.
    #[error("step '{step}' pipes from undeclared port '{source_step}/{source_port}'")]
    UnknownPipeSource {
        step: String,
        source_step: String,
        source_port: String,
    },

    /// No processor is registered for the requested step type tag.
    #[error("no processor registered for step type '{0}'")]
    UnknownStepType(String),

    /// More than one port of the same kind is explicitly marked primary.
    #[error("step '{step}' declares more than one primary {kind} port")]
    DuplicatePrimaryPort { step: String, kind: &'static str },

    /// Two sibling steps share a name within the same enclosing scope.
    #[error("duplicate step name '{name}' within the same subpipeline")]
    DuplicateStepName { name: String },

    /// A required option has neither a literal value nor a select expression.
    #[error("required option '{name}' on step '{step}' has no value and no select expression")]
    MissingRequiredOption { name: String, step: String },

    /// A `when` branch was declared without a test expression.
    #[error("when branch '{step}' has no test expression")]
    MissingTest { step: String },

    /// Parameters are declared but the step has no parameter port to hold them.
    #[error("step '{step}' declares parameters but no parameter port")]
    MissingParameterPort { step: String },

    /// An option value was supplied for an option the step does not declare.
    #[error("step '{step}' declares no option named '{name}'")]
    UndeclaredOption { name: String, step: String },

    /// A document was bound to a port the step does not declare.
    #[error("step '{step}' declares no port named '{port}'")]
    UndeclaredPort { step: String, port: String },

    // --- dynamic / domain ---
    /// An input port was read with no binding and no default readable port.
    #[error("input port '{port}' on step '{step}' has no binding and no default readable port")]
    UnboundInput { step: String, port: String },

    /// A required variable could not be given a value at evaluation time.
    #[error("variable '{name}' on step '{step}' is required but unbound")]
    UnboundVariable { name: String, step: String },

    /// No `when` branch tested true and the choose has no `otherwise`.
    #[error("no branch selected in choose step '{step}'")]
    NoBranchSelected { step: String },

    /// The expression evaluator rejected or failed to evaluate an expression.
    #[error("failed to evaluate expression '{expression}': {message}")]
    Expression { expression: String, message: String },

    /// A document could not be loaded from an external reference.
    #[error("failed to load document '{href}': {message}")]
    DocumentLoad { href: String, message: String },

    /// More than one document arrived on a port declared as 0..1.
    #[error("port '{port}' on step '{step}' does not accept a sequence but received {count} documents")]
    SequenceNotAllowed {
        step: String,
        port: String,
        count: usize,
    },

    /// A leaf step body failed with a domain error of its own.
    #[error("step '{step}' failed: {message}")]
    StepFailed { step: String, message: String },

    // --- defects ---
    /// A step body wrote to an output port its declaration does not carry.
    #[error("defect: step '{step}' wrote to undeclared output port '{port}'")]
    UndeclaredOutput { step: String, port: String },

    /// A port reference was bound twice in the same environment.
    #[error("defect: port '{0}' was bound twice in the same environment")]
    PortRebound(PortReference),

    /// An alias points at a port reference absent from the environment chain.
    #[error("defect: port alias target '{0}' cannot be resolved")]
    DanglingAlias(PortReference),

    /// Any other violated engine invariant.
    #[error("defect: {0}")]
    Internal(String),
}

impl Error {
    /// Classify this error per the static / dynamic / defect taxonomy.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::UnknownPipeSource { .. }
            | Error::UnknownStepType(_)
            | Error::DuplicatePrimaryPort { .. }
            | Error::DuplicateStepName { .. }
            | Error::MissingRequiredOption { .. }
            | Error::MissingTest { .. }
            | Error::MissingParameterPort { .. }
            | Error::UndeclaredOption { .. }
            | Error::UndeclaredPort { .. } => ErrorKind::Static,

            Error::UnboundInput { .. }
            | Error::UnboundVariable { .. }
            | Error::NoBranchSelected { .. }
            | Error::Expression { .. }
            | Error::DocumentLoad { .. }
            | Error::SequenceNotAllowed { .. }
            | Error::StepFailed { .. } => ErrorKind::Dynamic,

            Error::UndeclaredOutput { .. }
            | Error::PortRebound(_)
            | Error::DanglingAlias(_)
            | Error::Internal(_) => ErrorKind::Defect,
        }
    }

    /// True when this error indicates an engine or step-body bug.
    pub fn is_defect(&self) -> bool {
        self.kind() == ErrorKind::Defect
    }
}

/// A specialized `Result` type for pipeline operations.
pub type Result<T> = std::result::Result<T, Error>;
