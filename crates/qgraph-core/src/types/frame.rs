use crate::error::FrameError;
use crate::types::Value;
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Join kind applied when merging a child frame into its parent.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JoinKind {
    Left,
    Right,
    Inner,
    Outer,
}

impl JoinKind {
    /// Parses the QGL join keyword (`LEFT`, `RIGHT`, `INNER`, `OUTER`).
    pub fn parse_keyword(word: &str) -> Option<JoinKind> {
        match word.to_ascii_uppercase().as_str() {
            "LEFT" => Some(JoinKind::Left),
            "RIGHT" => Some(JoinKind::Right),
            "INNER" => Some(JoinKind::Inner),
            "OUTER" => Some(JoinKind::Outer),
            _ => None,
        }
    }
}

/// An ordered collection of named columns of equal length.
///
/// This is the in-memory realization of the tabular container the engine
/// operates on: retrieval results, manipulation inputs and outputs, and the
/// folded result all flow through `Frame`. Column order is insertion order
/// and is preserved by every operation that does not explicitly reorder.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Frame {
    columns: IndexMap<String, Vec<Value>>,
}

impl Frame {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds a frame from `(name, values)` pairs, checking that all columns
    /// share one length and names are unique.
    pub fn from_columns<N, I>(columns: I) -> Result<Self, FrameError>
    where
        N: Into<String>,
        I: IntoIterator<Item = (N, Vec<Value>)>,
    {
        let mut frame = Frame::new();
        for (name, values) in columns {
            frame.insert_column(name.into(), values)?;
        }
        Ok(frame)
    }

    fn insert_column(&mut self, name: String, values: Vec<Value>) -> Result<(), FrameError> {
        if self.columns.contains_key(&name) {
            return Err(FrameError::DuplicateColumn(name));
        }
        if !self.columns.is_empty() && values.len() != self.len() {
            return Err(FrameError::LengthMismatch {
                name,
                expected: self.len(),
                got: values.len(),
            });
        }
        self.columns.insert(name, values);
        Ok(())
    }

    /// Number of rows.
    pub fn len(&self) -> usize {
        self.columns.first().map(|(_, v)| v.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Number of columns.
    pub fn width(&self) -> usize {
        self.columns.len()
    }

    /// Column names in order.
    pub fn names(&self) -> Vec<&str> {
        self.columns.keys().map(String::as_str).collect()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.columns.contains_key(name)
    }

    pub fn column(&self, name: &str) -> Option<&[Value]> {
        self.columns.get(name).map(Vec::as_slice)
    }

    pub fn expect_column(&self, name: &str) -> Result<&[Value], FrameError> {
        self.column(name)
            .ok_or_else(|| FrameError::UnknownColumn(name.to_string()))
    }

    /// Sets or replaces a column. A new column appends at the end; lengths must
    /// match unless the frame has no columns yet.
    pub fn set_column(&mut self, name: impl Into<String>, values: Vec<Value>) -> Result<(), FrameError> {
        let name = name.into();
        if self.columns.contains_key(&name) {
            if values.len() != self.len() {
                return Err(FrameError::LengthMismatch {
                    name,
                    expected: self.len(),
                    got: values.len(),
                });
            }
            self.columns.insert(name, values);
            Ok(())
        } else {
            self.insert_column(name, values)
        }
    }

    /// Drops the listed columns. Every name must exist.
    pub fn drop_columns(&mut self, names: &[String]) -> Result<(), FrameError> {
        for name in names {
            if !self.columns.contains_key(name) {
                return Err(FrameError::UnknownColumn(name.clone()));
            }
        }
        for name in names {
            self.columns.shift_remove(name);
        }
        Ok(())
    }

    /// Renames columns by an `old -> new` mapping, atomically. Every old name
    /// must exist and the resulting names must stay unique; on failure the
    /// frame is untouched.
    pub fn rename(&mut self, mapping: &IndexMap<String, String>) -> Result<(), FrameError> {
        for old in mapping.keys() {
            if !self.columns.contains_key(old) {
                return Err(FrameError::UnknownColumn(old.clone()));
            }
        }
        let mut seen: std::collections::HashSet<&str> = std::collections::HashSet::new();
        for name in self.columns.keys() {
            let new_name = mapping.get(name).unwrap_or(name);
            if !seen.insert(new_name) {
                return Err(FrameError::RenameCollision(new_name.clone()));
            }
        }
        let renamed = self
            .columns
            .drain(..)
            .map(|(name, values)| {
                let new_name = mapping.get(&name).cloned().unwrap_or(name);
                (new_name, values)
            })
            .collect();
        self.columns = renamed;
        Ok(())
    }

    /// Returns a frame containing exactly the listed columns, in the listed order.
    pub fn select(&self, names: &[String]) -> Result<Frame, FrameError> {
        let mut out = Frame::new();
        for name in names {
            let values = self.expect_column(name)?.to_vec();
            out.insert_column(name.clone(), values)?;
        }
        Ok(out)
    }

    /// One row as owned values, in column order.
    pub fn row(&self, index: usize) -> Vec<Value> {
        self.columns.values().map(|col| col[index].clone()).collect()
    }

    /// Drops every row containing at least one null.
    pub fn drop_nulls(&self) -> Frame {
        let keep: Vec<usize> = (0..self.len())
            .filter(|&i| self.columns.values().all(|col| !col[i].is_null()))
            .collect();
        self.take_rows(&keep)
    }

    /// A frame made of the given row indices, in the given order.
    pub(crate) fn take_rows(&self, indices: &[usize]) -> Frame {
        let columns = self
            .columns
            .iter()
            .map(|(name, col)| {
                let values = indices.iter().map(|&i| col[i].clone()).collect();
                (name.clone(), values)
            })
            .collect();
        Frame { columns }
    }

    /// Partitions rows by the key-column tuple, preserving first-seen key order.
    pub fn group_by(&self, keys: &[String]) -> Result<Vec<(Vec<Value>, Vec<usize>)>, FrameError> {
        for key in keys {
            self.expect_column(key)?;
        }
        let mut order: Vec<(Vec<Value>, Vec<usize>)> = Vec::new();
        let mut seen: HashMap<Vec<Value>, usize> = HashMap::new();
        for row in 0..self.len() {
            let key: Vec<Value> = keys
                .iter()
                .map(|k| self.columns[k.as_str()][row].clone())
                .collect();
            match seen.get(&key) {
                Some(&slot) => order[slot].1.push(row),
                None => {
                    seen.insert(key.clone(), order.len());
                    order.push((key, vec![row]));
                }
            }
        }
        Ok(order)
    }

    /// Merges `other` into `self` on the given `(left, right)` column pairs.
    ///
    /// `left` keeps all rows of `self`; `right` keeps all rows of `other`;
    /// `inner` keeps matches only; `outer` keeps everything, null-filling
    /// misses. `left` and `inner` preserve self's row order, then other's
    /// order within each match group. Key pairs sharing one name produce a
    /// single coalesced output column; any other colliding column from
    /// `other` is suffixed with `_y`.
    pub fn merge(
        &self,
        other: &Frame,
        kind: JoinKind,
        pairs: &[(String, String)],
    ) -> Result<Frame, FrameError> {
        for (left, right) in pairs {
            self.expect_column(left)?;
            other.expect_column(right)?;
        }

        let key_of = |frame: &Frame, cols: &[&String], row: usize| -> Vec<Value> {
            cols.iter()
                .map(|c| frame.columns[c.as_str()][row].clone())
                .collect()
        };
        let left_cols: Vec<&String> = pairs.iter().map(|(l, _)| l).collect();
        let right_cols: Vec<&String> = pairs.iter().map(|(_, r)| r).collect();

        // (left row, right row) pairs in output order
        let mut rows: Vec<(Option<usize>, Option<usize>)> = Vec::new();
        match kind {
            JoinKind::Left | JoinKind::Inner | JoinKind::Outer => {
                let mut right_index: HashMap<Vec<Value>, Vec<usize>> = HashMap::new();
                for row in 0..other.len() {
                    right_index
                        .entry(key_of(other, &right_cols, row))
                        .or_default()
                        .push(row);
                }
                let mut right_matched = vec![false; other.len()];
                for left_row in 0..self.len() {
                    match right_index.get(&key_of(self, &left_cols, left_row)) {
                        Some(matches) => {
                            for &right_row in matches {
                                right_matched[right_row] = true;
                                rows.push((Some(left_row), Some(right_row)));
                            }
                        }
                        None if kind != JoinKind::Inner => rows.push((Some(left_row), None)),
                        None => {}
                    }
                }
                if kind == JoinKind::Outer {
                    for (right_row, matched) in right_matched.iter().enumerate() {
                        if !matched {
                            rows.push((None, Some(right_row)));
                        }
                    }
                }
            }
            JoinKind::Right => {
                let mut left_index: HashMap<Vec<Value>, Vec<usize>> = HashMap::new();
                for row in 0..self.len() {
                    left_index
                        .entry(key_of(self, &left_cols, row))
                        .or_default()
                        .push(row);
                }
                for right_row in 0..other.len() {
                    match left_index.get(&key_of(other, &right_cols, right_row)) {
                        Some(matches) => {
                            for &left_row in matches {
                                rows.push((Some(left_row), Some(right_row)));
                            }
                        }
                        None => rows.push((None, Some(right_row))),
                    }
                }
            }
        }

        // Key pairs with one shared name coalesce into a single column.
        let coalesced: std::collections::HashSet<&str> = pairs
            .iter()
            .filter(|(l, r)| l == r)
            .map(|(l, _)| l.as_str())
            .collect();

        let mut out = Frame::new();
        for (name, col) in &self.columns {
            let paired_right = if coalesced.contains(name.as_str()) {
                Some(other.expect_column(name)?)
            } else {
                None
            };
            let values = rows
                .iter()
                .map(|&(left_row, right_row)| match (left_row, paired_right) {
                    (Some(i), _) => col[i].clone(),
                    (None, Some(right_col)) => right_row
                        .map(|i| right_col[i].clone())
                        .unwrap_or(Value::Null),
                    (None, None) => Value::Null,
                })
                .collect();
            out.insert_column(name.clone(), values)?;
        }
        for (name, col) in &other.columns {
            if coalesced.contains(name.as_str()) {
                continue;
            }
            let values: Vec<Value> = rows
                .iter()
                .map(|&(_, right_row)| right_row.map(|i| col[i].clone()).unwrap_or(Value::Null))
                .collect();
            let out_name = if out.contains(name) {
                format!("{name}_y")
            } else {
                name.clone()
            };
            out.insert_column(out_name, values)?;
        }
        Ok(out)
    }
}
