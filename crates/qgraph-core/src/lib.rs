pub mod db;
pub mod error;
pub mod exec;
pub mod expr;
pub mod format;
pub mod graph;
pub mod manipulate;
pub mod template;
pub mod types;

// Re-export main types and functions
pub use error::{
    ConnectorError, Error, ExprError, ExprFuncError, FormatError, FrameError, GraphConfigError,
    ManipulationError, QglSyntaxError, Result, Stage, TemplateError,
};
pub use exec::{execute, execute_with, CancelToken, ExecutionOptions};
pub use graph::{build_graph, build_graph_with, JoinContext, NodeId, QueryGraph, QueryNode};

// Re-export the data model and the collaborator seams
pub use db::{Connector, ConnectorRegistry, DriverCatalog, DriverConfig, MemoryConnector};
pub use expr::{parse_expression, EvalScope, Evaluator, Expr, ExprValue, FunctionRegistry};
pub use format::{Container, SourceKind, ValueFormat};
pub use manipulate::{parse_pipeline, ManipulationSet, ManipulationStage};
pub use template::{ParameterClass, QueryTemplate, TemplateParameter};
pub use types::{DataKind, Frame, JoinKind, Value};
