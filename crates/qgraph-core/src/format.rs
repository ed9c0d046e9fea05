//! Per-source rendering of typed values as in-query literals.
//!
//! Each source kind has its own quoting and date-literal conventions, and a
//! value may be rendered either as one scalar literal or as a value-list
//! container (`(a, b, c)` for SQL, `[a, b, c]` for document and key-value
//! sources). The declared parameter type is checked against the runtime
//! value before anything is emitted.

use crate::error::FormatError;
use crate::types::{DataKind, Value};
use serde::{Deserialize, Serialize};

/// Formatting dialect of a data source.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceKind {
    /// Relational SQL sources: single-quoted strings, parenthesized lists.
    Sql,
    /// Document sources: JSON-style double-quoted strings, bracketed arrays.
    Document,
    /// Key-value sources: bare scalars, bracketed arrays.
    KeyValue,
}

/// Declared semantic type of a template parameter (the `:type` suffix).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ValueFormat {
    Str,
    Int,
    Float,
    Date,
    DateTime,
    Bool,
}

impl ValueFormat {
    /// Parses the `:type` suffix of a template parameter.
    pub fn parse(word: &str) -> Option<ValueFormat> {
        match word {
            "str" => Some(ValueFormat::Str),
            "int" => Some(ValueFormat::Int),
            "float" => Some(ValueFormat::Float),
            "date" => Some(ValueFormat::Date),
            "datetime" => Some(ValueFormat::DateTime),
            "bool" => Some(ValueFormat::Bool),
            _ => None,
        }
    }

    fn name(&self) -> &'static str {
        match self {
            ValueFormat::Str => "str",
            ValueFormat::Int => "int",
            ValueFormat::Float => "float",
            ValueFormat::Date => "date",
            ValueFormat::DateTime => "datetime",
            ValueFormat::Bool => "bool",
        }
    }

    /// Checks the runtime value against the declared type. Int widens to float.
    fn check(&self, value: &Value) -> Result<(), FormatError> {
        let ok = match (self, value.kind()) {
            (_, DataKind::Null) => true,
            (ValueFormat::Str, DataKind::Str) => true,
            (ValueFormat::Int, DataKind::Int) => true,
            (ValueFormat::Float, DataKind::Int | DataKind::Float) => true,
            (ValueFormat::Date, DataKind::Date) => true,
            (ValueFormat::DateTime, DataKind::DateTime) => true,
            (ValueFormat::Bool, DataKind::Bool) => true,
            _ => false,
        };
        if ok {
            Ok(())
        } else {
            Err(FormatError::TypeMismatch {
                declared: self.name().to_string(),
                found: value.kind(),
            })
        }
    }
}

/// Container shape of a rendered parameter.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Container {
    Scalar,
    ValueList,
}

/// Renders `value` as an in-query literal for the given source.
///
/// `format` is the declared parameter type; `None` means "infer from the
/// value". With [`Container::ValueList`] the value must be a list and each
/// element is checked and rendered individually.
pub fn render_literal(
    value: &Value,
    format: Option<ValueFormat>,
    container: Container,
    kind: SourceKind,
) -> Result<String, FormatError> {
    match container {
        Container::Scalar => render_scalar(value, format, kind),
        Container::ValueList => {
            let items = match value {
                Value::List(items) => items,
                other => return Err(FormatError::NotAList(other.kind())),
            };
            let rendered = items
                .iter()
                .map(|item| render_scalar(item, format, kind))
                .collect::<Result<Vec<_>, _>>()?;
            let joined = rendered.join(",");
            Ok(match kind {
                SourceKind::Sql => format!("({joined})"),
                SourceKind::Document | SourceKind::KeyValue => format!("[{joined}]"),
            })
        }
    }
}

fn render_scalar(
    value: &Value,
    format: Option<ValueFormat>,
    kind: SourceKind,
) -> Result<String, FormatError> {
    if let Some(format) = format {
        format.check(value)?;
    }
    Ok(match value {
        Value::Null => match kind {
            SourceKind::Sql => "NULL".to_string(),
            SourceKind::Document | SourceKind::KeyValue => "null".to_string(),
        },
        Value::Bool(b) => match kind {
            SourceKind::Sql => (if *b { "TRUE" } else { "FALSE" }).to_string(),
            SourceKind::Document | SourceKind::KeyValue => b.to_string(),
        },
        Value::Int(i) => i.to_string(),
        Value::Float(f) => f.to_string(),
        Value::Str(s) => quote(s, kind),
        Value::Date(d) => quote(&d.format("%Y-%m-%d").to_string(), kind),
        Value::DateTime(dt) => quote(&dt.format("%Y-%m-%d %H:%M:%S").to_string(), kind),
        // nested containers only appear in document queries; render JSON-style
        Value::List(_) | Value::Map(_) => value.to_string(),
    })
}

fn quote(text: &str, kind: SourceKind) -> String {
    match kind {
        SourceKind::Sql => format!("'{}'", text.replace('\'', "''")),
        SourceKind::Document => format!("\"{}\"", text.replace('\\', "\\\\").replace('"', "\\\"")),
        SourceKind::KeyValue => text.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    #[test]
    fn sql_value_list_is_parenthesized() {
        let value = Value::list([1i64, 2, 3]);
        let out = render_literal(
            &value,
            Some(ValueFormat::Int),
            Container::ValueList,
            SourceKind::Sql,
        )
        .unwrap();
        assert_eq!(out, "(1,2,3)");
    }

    #[test]
    fn document_value_list_is_bracketed_and_double_quoted() {
        let value = Value::list(["rock", "blues"]);
        let out = render_literal(
            &value,
            Some(ValueFormat::Str),
            Container::ValueList,
            SourceKind::Document,
        )
        .unwrap();
        assert_eq!(out, "[\"rock\",\"blues\"]");
    }

    #[test]
    fn sql_strings_escape_single_quotes() {
        let out = render_literal(
            &Value::from("it's"),
            Some(ValueFormat::Str),
            Container::Scalar,
            SourceKind::Sql,
        )
        .unwrap();
        assert_eq!(out, "'it''s'");
    }

    #[test]
    fn date_renders_as_quoted_iso_literal() {
        let d = Value::Date(NaiveDate::from_ymd_opt(2009, 1, 6).unwrap());
        let out = render_literal(&d, Some(ValueFormat::Date), Container::Scalar, SourceKind::Sql)
            .unwrap();
        assert_eq!(out, "'2009-01-06'");
    }

    #[test]
    fn declared_type_mismatch_fails() {
        let err = render_literal(
            &Value::from("abc"),
            Some(ValueFormat::Int),
            Container::Scalar,
            SourceKind::Sql,
        )
        .unwrap_err();
        assert!(matches!(err, FormatError::TypeMismatch { .. }));
    }

    #[test]
    fn int_widens_under_float_format() {
        let out = render_literal(
            &Value::Int(3),
            Some(ValueFormat::Float),
            Container::Scalar,
            SourceKind::Sql,
        )
        .unwrap();
        assert_eq!(out, "3");
    }

    #[test]
    fn scalar_under_value_list_fails() {
        let err = render_literal(
            &Value::Int(1),
            None,
            Container::ValueList,
            SourceKind::Sql,
        )
        .unwrap_err();
        assert!(matches!(err, FormatError::NotAList(DataKind::Int)));
    }
}
