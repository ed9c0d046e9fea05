//! Parser for the `>>`-chained manipulation pipeline syntax:
//!
//! ```text
//! mutate(x = A + B) >>
//! rename(old = new) >>
//! group_by(k) >> summarize(s = sum(v)) >>
//! drop_na()
//! ```

use crate::error::QglSyntaxError;
use crate::expr::{parse_expression, Expr};
use crate::manipulate::{
    Aggregation, ManipulationSet, ManipulationStage, PathSegment, UnpackDirective,
};
use indexmap::IndexMap;

/// Parses a `>>`-chained pipeline into a [`ManipulationSet`].
///
/// A `group_by(...)` stage must be immediately followed by `summarize(...)`;
/// the pair compiles into one grouped-summary stage.
pub fn parse_pipeline(text: &str) -> Result<ManipulationSet, QglSyntaxError> {
    let mut stages = Vec::new();
    let mut pending_group: Option<Vec<String>> = None;

    for chunk in split_top_level(text, ">>") {
        let chunk = chunk.trim();
        if chunk.is_empty() {
            return Err(QglSyntaxError::new("empty manipulation stage"));
        }
        let (name, args) = split_call(chunk)?;

        if let Some(group_by) = pending_group.take() {
            if name != "summarize" {
                return Err(QglSyntaxError::new(format!(
                    "`group_by` must be followed by `summarize`, found `{name}`"
                )));
            }
            stages.push(ManipulationStage::GroupedSummary {
                group_by,
                aggregations: parse_aggregations(&args)?,
            });
            continue;
        }

        match name.as_str() {
            "mutate" => {
                let mut columns = Vec::new();
                for arg in &args {
                    let (target, rhs) = expect_assignment(arg)?;
                    columns.push((identifier(target)?, expression(rhs)?));
                }
                if columns.is_empty() {
                    return Err(QglSyntaxError::new("`mutate` needs at least one column"));
                }
                stages.push(ManipulationStage::Mutate(columns));
            }
            "rename" => {
                let mut mapping = IndexMap::new();
                for arg in &args {
                    let (old, new) = expect_assignment(arg)?;
                    mapping.insert(identifier(old)?, identifier(new.trim())?);
                }
                if mapping.is_empty() {
                    return Err(QglSyntaxError::new("`rename` needs at least one mapping"));
                }
                stages.push(ManipulationStage::Rename(mapping));
            }
            "select" => stages.push(ManipulationStage::Select(identifier_list(&args, "select")?)),
            "remove" => stages.push(ManipulationStage::Remove(identifier_list(&args, "remove")?)),
            "flatten" => {
                if args.len() != 1 {
                    return Err(QglSyntaxError::new("`flatten` takes exactly one column"));
                }
                stages.push(ManipulationStage::Flatten(identifier(&args[0])?));
            }
            "unpack" => {
                let mut directives = Vec::new();
                for arg in &args {
                    let (target, rhs) = expect_assignment(arg)?;
                    let (source, path) = parse_key_path(rhs.trim())?;
                    directives.push(UnpackDirective {
                        source,
                        path,
                        target: identifier(target)?,
                        default: None,
                    });
                }
                if directives.is_empty() {
                    return Err(QglSyntaxError::new("`unpack` needs at least one directive"));
                }
                stages.push(ManipulationStage::Unpack(directives));
            }
            "group_by" => {
                pending_group = Some(identifier_list(&args, "group_by")?);
            }
            "summarize" => {
                return Err(QglSyntaxError::new(
                    "`summarize` must be preceded by `group_by`",
                ));
            }
            "drop_na" => {
                if !args.is_empty() {
                    return Err(QglSyntaxError::new("`drop_na` takes no arguments"));
                }
                stages.push(ManipulationStage::DropNa);
            }
            other => {
                return Err(QglSyntaxError::new(format!(
                    "unknown manipulation `{other}`"
                )))
            }
        }
    }

    if pending_group.is_some() {
        return Err(QglSyntaxError::new("`group_by` without a `summarize`"));
    }
    Ok(stages.into_iter().collect())
}

/// Splits `name(arg, arg, ...)` into the stage name and its argument list.
fn split_call(chunk: &str) -> Result<(String, Vec<String>), QglSyntaxError> {
    let open = chunk
        .find('(')
        .ok_or_else(|| QglSyntaxError::new(format!("malformed stage `{chunk}`")))?;
    if !chunk.ends_with(')') {
        return Err(QglSyntaxError::new(format!("malformed stage `{chunk}`")));
    }
    let name = chunk[..open].trim().to_string();
    let inner = &chunk[open + 1..chunk.len() - 1];
    let args = split_top_level(inner, ",")
        .into_iter()
        .map(|a| a.trim().to_string())
        .filter(|a| !a.is_empty())
        .collect();
    Ok((name, args))
}

/// Splits on a separator at nesting depth zero, outside string literals.
fn split_top_level(text: &str, separator: &str) -> Vec<String> {
    let bytes = text.as_bytes();
    let sep = separator.as_bytes();
    let mut parts = Vec::new();
    let mut depth = 0usize;
    let mut quote: Option<u8> = None;
    let mut start = 0;
    let mut i = 0;
    while i < bytes.len() {
        let b = bytes[i];
        match quote {
            Some(q) => {
                if b == q {
                    quote = None;
                }
                i += 1;
            }
            None => match b {
                b'\'' | b'"' => {
                    quote = Some(b);
                    i += 1;
                }
                b'(' | b'[' => {
                    depth += 1;
                    i += 1;
                }
                b')' | b']' => {
                    depth = depth.saturating_sub(1);
                    i += 1;
                }
                _ if depth == 0 && bytes[i..].starts_with(sep) => {
                    parts.push(text[start..i].to_string());
                    i += sep.len();
                    start = i;
                }
                _ => i += 1,
            },
        }
    }
    parts.push(text[start..].to_string());
    parts
}

/// Splits `name = rhs` on the first top-level `=` that is not part of a
/// comparison operator.
fn split_assignment(arg: &str) -> Option<(&str, &str)> {
    let bytes = arg.as_bytes();
    let mut depth = 0usize;
    let mut quote: Option<u8> = None;
    for i in 0..bytes.len() {
        let b = bytes[i];
        match quote {
            Some(q) => {
                if b == q {
                    quote = None;
                }
            }
            None => match b {
                b'\'' | b'"' => quote = Some(b),
                b'(' | b'[' => depth += 1,
                b')' | b']' => depth = depth.saturating_sub(1),
                b'=' if depth == 0 => {
                    let next_is_eq = bytes.get(i + 1) == Some(&b'=');
                    let prev_is_op = i > 0 && matches!(bytes[i - 1], b'=' | b'!' | b'<' | b'>');
                    if !next_is_eq && !prev_is_op {
                        return Some((&arg[..i], &arg[i + 1..]));
                    }
                }
                _ => {}
            },
        }
    }
    None
}

fn expect_assignment(arg: &str) -> Result<(&str, &str), QglSyntaxError> {
    split_assignment(arg)
        .ok_or_else(|| QglSyntaxError::new(format!("expected `name = ...`, found `{arg}`")))
}

fn is_identifier(word: &str) -> bool {
    let mut chars = word.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '$')
}

fn identifier(word: &str) -> Result<String, QglSyntaxError> {
    let word = word.trim();
    if is_identifier(word) {
        Ok(word.to_string())
    } else {
        Err(QglSyntaxError::new(format!("invalid identifier `{word}`")))
    }
}

fn identifier_list(args: &[String], stage: &str) -> Result<Vec<String>, QglSyntaxError> {
    if args.is_empty() {
        return Err(QglSyntaxError::new(format!(
            "`{stage}` needs at least one column"
        )));
    }
    args.iter().map(|a| identifier(a)).collect()
}

fn expression(text: &str) -> Result<Expr, QglSyntaxError> {
    parse_expression(text)
        .map_err(|e| QglSyntaxError::new(format!("in expression `{}`: {e}", text.trim())))
}

/// Parses `source.key[0].leaf` into the source column and its key path.
fn parse_key_path(text: &str) -> Result<(String, Vec<PathSegment>), QglSyntaxError> {
    let bytes = text.as_bytes();
    let mut i = 0;
    while i < bytes.len() && bytes[i] != b'.' && bytes[i] != b'[' {
        i += 1;
    }
    let source = identifier(&text[..i])?;
    let mut path = Vec::new();
    while i < bytes.len() {
        match bytes[i] {
            b'.' => {
                let start = i + 1;
                i = start;
                while i < bytes.len() && bytes[i] != b'.' && bytes[i] != b'[' {
                    i += 1;
                }
                path.push(PathSegment::Key(identifier(&text[start..i])?));
            }
            b'[' => {
                let close = text[i..]
                    .find(']')
                    .map(|offset| i + offset)
                    .ok_or_else(|| {
                        QglSyntaxError::new(format!("unterminated `[` in key path `{text}`"))
                    })?;
                let inner = text[i + 1..close].trim();
                if let Some(quoted) = inner
                    .strip_prefix('\'')
                    .and_then(|s| s.strip_suffix('\''))
                    .or_else(|| inner.strip_prefix('"').and_then(|s| s.strip_suffix('"')))
                {
                    path.push(PathSegment::Key(quoted.to_string()));
                } else {
                    let index: usize = inner.parse().map_err(|_| {
                        QglSyntaxError::new(format!("bad index `{inner}` in key path `{text}`"))
                    })?;
                    path.push(PathSegment::Index(index));
                }
                i = close + 1;
            }
            other => {
                return Err(QglSyntaxError::new(format!(
                    "unexpected `{}` in key path `{text}`",
                    other as char
                )))
            }
        }
    }
    Ok((source, path))
}

fn parse_aggregations(args: &[String]) -> Result<Vec<Aggregation>, QglSyntaxError> {
    if args.is_empty() {
        return Err(QglSyntaxError::new("`summarize` needs at least one aggregation"));
    }
    let mut aggregations = Vec::new();
    for arg in args {
        let (target, rhs) = expect_assignment(arg)?;
        let call = expression(rhs)?;
        let (reducer, column) = match call {
            Expr::Call { name, args } if args.len() == 1 => match &args[0] {
                Expr::Ident(column) | Expr::Column(column) => (name, column.clone()),
                _ => {
                    return Err(QglSyntaxError::new(format!(
                        "aggregation `{}` must target a single column",
                        rhs.trim()
                    )))
                }
            },
            _ => {
                return Err(QglSyntaxError::new(format!(
                    "expected `reducer(column)`, found `{}`",
                    rhs.trim()
                )))
            }
        };
        aggregations.push(Aggregation {
            target: identifier(target)?,
            reducer,
            column,
        });
    }
    Ok(aggregations)
}
