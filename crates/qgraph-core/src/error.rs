//! Error types for graph construction and execution.
//!
//! Two layers of errors exist:
//!
//! - Subsystem errors ([`QglSyntaxError`], [`GraphConfigError`], [`TemplateError`],
//!   [`ExprError`], [`ManipulationError`], [`ConnectorError`], [`FormatError`]) are
//!   produced where the failure happens and say what went wrong.
//!
//! - [`Error`] aggregates them at the public API boundary. Failures observed while
//!   a node is being executed are wrapped in [`Error::Node`] so callers always see
//!   which node and which stage failed.
//!
//! Errors are never retried by the core; the scheduler surfaces the first failure
//! and cancels the remaining work.

use crate::types::DataKind;
use std::fmt;
use thiserror::Error;

/// Result alias used throughout the crate.
pub type Result<T> = std::result::Result<T, Error>;

/// Error encountered while parsing a QGL document.
///
/// Preserves the line the parser was looking at when it gave up, when known.
#[derive(Debug, Clone)]
pub struct QglSyntaxError {
    /// Human-readable error message.
    pub message: String,
    /// Line number (1-indexed) within the QGL source, if available.
    pub line: Option<usize>,
}

impl QglSyntaxError {
    /// Creates a new syntax error with just a message.
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            line: None,
        }
    }

    /// Creates a syntax error with line information.
    pub fn at_line(message: impl Into<String>, line: usize) -> Self {
        Self {
            message: message.into(),
            line: Some(line),
        }
    }

    /// Adds line context to the error.
    pub fn with_line(mut self, line: usize) -> Self {
        self.line = Some(line);
        self
    }
}

impl fmt::Display for QglSyntaxError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "QGL syntax error")?;
        if let Some(line) = self.line {
            write!(f, " at line {line}")?;
        }
        write!(f, ": {}", self.message)
    }
}

impl std::error::Error for QglSyntaxError {}

/// Structural problems with an otherwise well-formed graph document.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum GraphConfigError {
    #[error("duplicate connection name `{0}`")]
    DuplicateConnector(String),

    #[error("unknown connection `{0}`")]
    UnknownConnector(String),

    #[error("no driver registered for `{0}`")]
    UnknownDriver(String),

    #[error("duplicate node name `{0}`")]
    DuplicateNode(String),

    #[error("JOIN references unknown node `{0}`")]
    UnknownNode(String),

    #[error("node `{0}` is already joined to a parent")]
    DuplicateParent(String),

    #[error("attaching `{child}` as a child of `{parent}` would create a cycle")]
    Cycle { parent: String, child: String },

    #[error("no root node: every node appears as a join child")]
    NoRoot,

    #[error("nodes do not form a single tree; unreachable roots: {0:?}")]
    MultipleRoots(Vec<String>),

    #[error("join onto `{0}` declares no column pairs")]
    EmptyJoin(String),
}

/// A value could not be rendered as an in-query literal.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FormatError {
    #[error("cannot format {found:?} value as {declared}")]
    TypeMismatch { declared: String, found: DataKind },

    #[error("value_list rendering expects a list, found {0:?}")]
    NotAList(DataKind),
}

/// Template rendering failures.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TemplateError {
    /// A `{% %}` parameter was not supplied by the caller.
    #[error("missing independent parameter `{0}`")]
    IndependentParameter(String),

    /// A `{{ }}` parameter could not be derived from the parent frame.
    #[error("dependent parameter `{name}`: {reason}")]
    DependentParameter { name: String, reason: String },

    #[error(transparent)]
    Format(#[from] FormatError),
}

/// Expression parse or evaluation failure.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ExprError {
    #[error("expression syntax error at offset {position}: {message}")]
    Syntax { message: String, position: usize },

    #[error("unknown column or parameter `{0}`")]
    UnknownName(String),

    #[error("column `{0}` referenced without a frame in scope")]
    NoFrame(String),

    #[error("type mismatch: {0}")]
    Type(String),

    #[error("series length mismatch: {left} vs {right}")]
    LengthMismatch { left: usize, right: usize },

    #[error(transparent)]
    Func(#[from] ExprFuncError),
}

/// Function dispatch or invocation failure.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ExprFuncError {
    #[error("unknown function `{0}`")]
    Unknown(String),

    #[error("no overload of `{name}` accepts ({got})")]
    NoOverload { name: String, got: String },

    #[error("`{name}`: {message}")]
    Invoke { name: String, message: String },
}

impl ExprFuncError {
    pub(crate) fn invoke(name: &str, message: impl Into<String>) -> Self {
        Self::Invoke {
            name: name.to_string(),
            message: message.into(),
        }
    }
}

/// A manipulation stage precondition failed.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ManipulationError {
    #[error("column `{0}` not found")]
    MissingColumn(String),

    #[error("rename collision: more than one column maps to `{0}`")]
    RenameCollision(String),

    #[error("flatten expects sequence cells in `{column}`, found {found:?}")]
    NotASequence { column: String, found: DataKind },

    #[error("unpack path `{path}` not found in column `{column}`")]
    MissingKey { column: String, path: String },

    #[error("mutate produced {got} values for a frame of {expected} rows")]
    BadColumnLength { expected: usize, got: usize },

    #[error(transparent)]
    Expr(#[from] ExprError),

    #[error(transparent)]
    Frame(#[from] FrameError),
}

/// Violations of frame-level invariants (column lengths, unknown names).
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FrameError {
    #[error("column `{0}` not found")]
    UnknownColumn(String),

    #[error("column `{name}` has {got} values, frame has {expected} rows")]
    LengthMismatch {
        name: String,
        expected: usize,
        got: usize,
    },

    #[error("duplicate column `{0}`")]
    DuplicateColumn(String),

    #[error("rename collision on `{0}`")]
    RenameCollision(String),
}

/// Driver-reported failure, wrapped.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConnectorError {
    #[error("driver `{driver}` for connection `{connection}` has no live backend")]
    NoBackend { driver: String, connection: String },

    #[error("connection `{connection}` failed: {message}")]
    Execution { connection: String, message: String },

    #[error("connection `{0}` does not support inserts")]
    InsertUnsupported(String),

    #[error("no response configured for query: {0}")]
    NoResponse(String),
}

/// The execution stage a node failure was observed in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Render,
    Retrieve,
    Manipulate,
    Fold,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Stage::Render => "render",
            Stage::Retrieve => "retrieve",
            Stage::Manipulate => "manipulate",
            Stage::Fold => "fold",
        };
        f.write_str(name)
    }
}

/// Top-level error type returned by the public API.
#[derive(Debug, Error)]
pub enum Error {
    #[error(transparent)]
    Syntax(#[from] QglSyntaxError),

    #[error(transparent)]
    GraphConfig(#[from] GraphConfigError),

    #[error(transparent)]
    Template(#[from] TemplateError),

    #[error(transparent)]
    Expr(#[from] ExprError),

    #[error(transparent)]
    Manipulation(#[from] ManipulationError),

    #[error(transparent)]
    Connector(#[from] ConnectorError),

    #[error(transparent)]
    Format(#[from] FormatError),

    #[error(transparent)]
    Frame(#[from] FrameError),

    /// A failure observed while executing a specific node.
    #[error("node `{node}` failed during {stage}: {source}")]
    Node {
        node: String,
        stage: Stage,
        #[source]
        source: Box<Error>,
    },

    #[error("execution cancelled")]
    Cancelled,

    #[error("deadline exceeded")]
    DeadlineExceeded,
}

impl Error {
    /// Wraps an error with the node and stage it was observed in.
    pub(crate) fn at_node(node: impl Into<String>, stage: Stage, source: impl Into<Error>) -> Self {
        Error::Node {
            node: node.into(),
            stage,
            source: Box::new(source.into()),
        }
    }

    /// The innermost error, unwrapping node context.
    pub fn root_cause(&self) -> &Error {
        match self {
            Error::Node { source, .. } => source.root_cause(),
            other => other,
        }
    }
}
