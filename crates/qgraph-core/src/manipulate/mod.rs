//! Post-retrieval frame manipulations.
//!
//! A node's `THEN |` clause compiles into a [`ManipulationSet`]: an ordered
//! list of stages, each transforming the frame produced by the previous one.

mod parser;

pub use parser::parse_pipeline;

use crate::error::{FrameError, ManipulationError};
use crate::expr::{EvalScope, Evaluator, Expr, ExprValue};
use crate::types::{Frame, Value};
use indexmap::IndexMap;

/// One segment of an unpack key path.
#[derive(Clone, Debug, PartialEq)]
pub enum PathSegment {
    Key(String),
    Index(usize),
}

/// One unpack directive: resolve `path` through the cells of `source` and
/// write the result to `target`.
#[derive(Clone, Debug, PartialEq)]
pub struct UnpackDirective {
    pub source: String,
    pub path: Vec<PathSegment>,
    pub target: String,
    /// Used instead of failing when a path segment is missing.
    pub default: Option<Value>,
}

/// One grouped aggregation: `target = reducer(column)`.
#[derive(Clone, Debug, PartialEq)]
pub struct Aggregation {
    pub target: String,
    pub reducer: String,
    pub column: String,
}

/// A single frame-transforming stage.
#[derive(Clone, Debug, PartialEq)]
pub enum ManipulationStage {
    /// Derive columns, in list order; later expressions see earlier results.
    Mutate(Vec<(String, Expr)>),
    /// Atomic `old -> new` rename.
    Rename(IndexMap<String, String>),
    /// Keep exactly these columns, in this order.
    Select(Vec<String>),
    /// Drop these columns; all must exist.
    Remove(Vec<String>),
    /// Expand a sequence-valued column into one row per element.
    Flatten(String),
    /// Resolve nested key paths into new columns.
    Unpack(Vec<UnpackDirective>),
    /// Partition by the group columns, then reduce.
    GroupedSummary {
        group_by: Vec<String>,
        aggregations: Vec<Aggregation>,
    },
    /// Drop rows containing any null.
    DropNa,
}

/// An ordered manipulation pipeline.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ManipulationSet {
    stages: Vec<ManipulationStage>,
}

impl ManipulationSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, stage: ManipulationStage) {
        self.stages.push(stage);
    }

    pub fn is_empty(&self) -> bool {
        self.stages.is_empty()
    }

    pub fn len(&self) -> usize {
        self.stages.len()
    }

    pub fn stages(&self) -> &[ManipulationStage] {
        &self.stages
    }

    /// Runs every stage in order over `frame`.
    pub fn apply(&self, frame: Frame, evaluator: &Evaluator) -> Result<Frame, ManipulationError> {
        let mut current = frame;
        for stage in &self.stages {
            current = apply_stage(stage, current, evaluator)?;
        }
        Ok(current)
    }
}

impl FromIterator<ManipulationStage> for ManipulationSet {
    fn from_iter<I: IntoIterator<Item = ManipulationStage>>(iter: I) -> Self {
        Self {
            stages: iter.into_iter().collect(),
        }
    }
}

fn frame_err(err: FrameError) -> ManipulationError {
    match err {
        FrameError::UnknownColumn(name) => ManipulationError::MissingColumn(name),
        FrameError::RenameCollision(name) => ManipulationError::RenameCollision(name),
        other => ManipulationError::Frame(other),
    }
}

fn apply_stage(
    stage: &ManipulationStage,
    mut frame: Frame,
    evaluator: &Evaluator,
) -> Result<Frame, ManipulationError> {
    match stage {
        ManipulationStage::Mutate(columns) => {
            for (name, expr) in columns {
                let evaluated = evaluator.eval(expr, EvalScope::frame(&frame))?;
                let rows = frame.len();
                let column = match evaluated {
                    ExprValue::Scalar(value) => vec![value; rows],
                    ExprValue::Series(values) if values.len() == rows || frame.width() == 0 => {
                        values
                    }
                    ExprValue::Series(values) => {
                        return Err(ManipulationError::BadColumnLength {
                            expected: rows,
                            got: values.len(),
                        })
                    }
                };
                frame.set_column(name.clone(), column).map_err(frame_err)?;
            }
            Ok(frame)
        }
        ManipulationStage::Rename(mapping) => {
            frame.rename(mapping).map_err(frame_err)?;
            Ok(frame)
        }
        ManipulationStage::Select(columns) => frame.select(columns).map_err(frame_err),
        ManipulationStage::Remove(columns) => {
            frame.drop_columns(columns).map_err(frame_err)?;
            Ok(frame)
        }
        ManipulationStage::Flatten(column) => flatten(frame, column),
        ManipulationStage::Unpack(directives) => unpack(frame, directives),
        ManipulationStage::GroupedSummary {
            group_by,
            aggregations,
        } => grouped_summary(&frame, group_by, aggregations, evaluator),
        ManipulationStage::DropNa => Ok(frame.drop_nulls()),
    }
}

fn flatten(frame: Frame, column: &str) -> Result<Frame, ManipulationError> {
    let cells = frame.expect_column(column).map_err(frame_err)?;
    let mut source_rows = Vec::new();
    let mut elements = Vec::new();
    for (row, cell) in cells.iter().enumerate() {
        match cell {
            Value::List(items) => {
                for item in items {
                    source_rows.push(row);
                    elements.push(item.clone());
                }
            }
            Value::Null => {
                source_rows.push(row);
                elements.push(Value::Null);
            }
            other => {
                return Err(ManipulationError::NotASequence {
                    column: column.to_string(),
                    found: other.kind(),
                })
            }
        }
    }
    let mut out = frame.take_rows(&source_rows);
    out.set_column(column, elements).map_err(frame_err)?;
    Ok(out)
}

fn resolve_path<'a>(cell: &'a Value, path: &[PathSegment]) -> Option<&'a Value> {
    let mut current = cell;
    for segment in path {
        current = match (segment, current) {
            (PathSegment::Key(key), Value::Map(map)) => map.get(key)?,
            (PathSegment::Index(index), Value::List(items)) => items.get(*index)?,
            _ => return None,
        };
    }
    Some(current)
}

fn path_display(path: &[PathSegment]) -> String {
    let mut out = String::new();
    for segment in path {
        match segment {
            PathSegment::Key(key) => {
                if !out.is_empty() {
                    out.push('.');
                }
                out.push_str(key);
            }
            PathSegment::Index(index) => out.push_str(&format!("[{index}]")),
        }
    }
    out
}

fn unpack(mut frame: Frame, directives: &[UnpackDirective]) -> Result<Frame, ManipulationError> {
    for directive in directives {
        let cells = frame.expect_column(&directive.source).map_err(frame_err)?;
        let mut resolved = Vec::with_capacity(cells.len());
        for cell in cells {
            match resolve_path(cell, &directive.path) {
                Some(value) => resolved.push(value.clone()),
                None => match &directive.default {
                    Some(default) => resolved.push(default.clone()),
                    None if cell.is_null() => resolved.push(Value::Null),
                    None => {
                        return Err(ManipulationError::MissingKey {
                            column: directive.source.clone(),
                            path: path_display(&directive.path),
                        })
                    }
                },
            }
        }
        frame
            .set_column(directive.target.clone(), resolved)
            .map_err(frame_err)?;
    }
    Ok(frame)
}

fn grouped_summary(
    frame: &Frame,
    group_by: &[String],
    aggregations: &[Aggregation],
    evaluator: &Evaluator,
) -> Result<Frame, ManipulationError> {
    for aggregation in aggregations {
        frame.expect_column(&aggregation.column).map_err(frame_err)?;
    }
    let groups = frame.group_by(group_by).map_err(frame_err)?;

    let mut out = Frame::new();
    for (position, key) in group_by.iter().enumerate() {
        let values = groups.iter().map(|(k, _)| k[position].clone()).collect();
        out.set_column(key.clone(), values).map_err(frame_err)?;
    }
    for aggregation in aggregations {
        let source = frame
            .expect_column(&aggregation.column)
            .map_err(frame_err)?;
        let mut values = Vec::with_capacity(groups.len());
        for (_, rows) in &groups {
            let group_values: Vec<Value> = rows.iter().map(|&i| source[i].clone()).collect();
            let reduced = evaluator
                .functions()
                .dispatch(&aggregation.reducer, &[ExprValue::Series(group_values)])
                .map_err(crate::error::ExprError::from)?;
            match reduced {
                ExprValue::Scalar(value) => values.push(value),
                ExprValue::Series(_) => {
                    return Err(ManipulationError::Expr(crate::error::ExprError::Type(
                        format!("`{}` is not a reducing function", aggregation.reducer),
                    )))
                }
            }
        }
        out.set_column(aggregation.target.clone(), values)
            .map_err(frame_err)?;
    }
    Ok(out)
}
