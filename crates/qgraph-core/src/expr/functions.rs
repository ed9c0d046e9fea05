//! The typed function library and its multi-dispatch table.
//!
//! Each function name maps to a list of overloads. An overload declares its
//! parameter type tags and a handler. Dispatch selects the overload whose
//! tags exactly match the runtime arguments, then retries with widening
//! (`int -> float`), and finally vectorizes scalar overloads element-wise
//! when any argument is a series. Null arguments short-circuit scalar calls
//! to null.

use crate::error::ExprFuncError;
use crate::expr::eval::ExprValue;
use crate::types::{DataKind, Value};
use chrono::{NaiveDate, NaiveDateTime};
use regex::Regex;
use std::collections::HashMap;

/// Declared type of one overload parameter.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ParamType {
    Kind(DataKind),
    Series,
}

#[derive(Clone, Copy)]
enum Handler {
    Scalar(fn(&[Value]) -> Result<Value, ExprFuncError>),
    Series(fn(&[ExprValue]) -> Result<ExprValue, ExprFuncError>),
}

struct Overload {
    params: Vec<ParamType>,
    handler: Handler,
}

/// Name -> overload-list table with dispatch.
pub struct FunctionRegistry {
    table: HashMap<String, Vec<Overload>>,
}

impl Default for FunctionRegistry {
    fn default() -> Self {
        Self::standard()
    }
}

impl FunctionRegistry {
    fn empty() -> Self {
        Self {
            table: HashMap::new(),
        }
    }

    fn add(&mut self, name: &str, params: &[ParamType], handler: Handler) {
        self.table.entry(name.to_string()).or_default().push(Overload {
            params: params.to_vec(),
            handler,
        });
    }

    /// The built-in library.
    pub fn standard() -> Self {
        use DataKind::*;
        use ParamType::{Kind as K, Series};

        let mut reg = Self::empty();

        reg.add("len", &[K(Str)], Handler::Scalar(f_len_str));
        reg.add("len", &[K(List)], Handler::Scalar(f_len_list));
        reg.add("log", &[K(Float)], Handler::Scalar(f_log));
        reg.add("uppercase", &[K(Str)], Handler::Scalar(f_uppercase));
        reg.add("lowercase", &[K(Str)], Handler::Scalar(f_lowercase));
        reg.add("capitalize", &[K(Str)], Handler::Scalar(f_capitalize));
        reg.add("to_date", &[K(Str), K(Str)], Handler::Scalar(f_to_date));
        reg.add("to_datetime", &[K(Str), K(Str)], Handler::Scalar(f_to_datetime));
        reg.add(
            "regex_sub",
            &[K(Str), K(Str), K(Str)],
            Handler::Scalar(f_regex_sub),
        );
        reg.add(
            "replace",
            &[K(Str), K(Str), K(Str)],
            Handler::Scalar(f_replace),
        );
        reg.add("slice", &[K(Str), K(Int), K(Int)], Handler::Scalar(f_slice_str));
        reg.add(
            "slice",
            &[K(List), K(Int), K(Int)],
            Handler::Scalar(f_slice_list),
        );
        reg.add(
            "reformat_dt_str",
            &[K(Str), K(Str), K(Str)],
            Handler::Scalar(f_reformat_dt_str),
        );

        reg.add("lag", &[Series, K(Int)], Handler::Series(f_lag));
        reg.add("sum", &[Series], Handler::Series(f_sum));
        reg.add("mean", &[Series], Handler::Series(f_mean));
        reg.add("min", &[Series], Handler::Series(f_min));
        reg.add("max", &[Series], Handler::Series(f_max));
        reg.add("count", &[Series], Handler::Series(f_count));
        reg.add("spread", &[Series], Handler::Series(f_spread));

        reg
    }

    pub fn contains(&self, name: &str) -> bool {
        self.table.contains_key(name)
    }

    /// Dispatches a call over evaluated arguments.
    pub fn dispatch(&self, name: &str, args: &[ExprValue]) -> Result<ExprValue, ExprFuncError> {
        let overloads = self
            .table
            .get(name)
            .ok_or_else(|| ExprFuncError::Unknown(name.to_string()))?;

        let all_scalar = args.iter().all(|a| matches!(a, ExprValue::Scalar(_)));
        if all_scalar {
            let scalars: Vec<Value> = args
                .iter()
                .map(|a| match a {
                    ExprValue::Scalar(v) => v.clone(),
                    ExprValue::Series(_) => unreachable!(),
                })
                .collect();
            return self
                .dispatch_scalars(name, overloads, &scalars)
                .map(ExprValue::Scalar);
        }

        // Direct match against overloads with series parameters.
        if let Some(result) = try_series_overloads(name, overloads, args)? {
            return Ok(result);
        }

        // Vectorize scalar overloads element-wise over the series arguments.
        let mut length: Option<usize> = None;
        for arg in args {
            if let ExprValue::Series(s) = arg {
                match length {
                    None => length = Some(s.len()),
                    Some(n) if n == s.len() => {}
                    Some(n) => {
                        return Err(ExprFuncError::invoke(
                            name,
                            format!("series lengths differ: {n} vs {}", s.len()),
                        ))
                    }
                }
            }
        }
        let length = length.unwrap_or(0);
        let mut out = Vec::with_capacity(length);
        for row in 0..length {
            let scalars: Vec<Value> = args
                .iter()
                .map(|a| match a {
                    ExprValue::Series(s) => s[row].clone(),
                    ExprValue::Scalar(v) => v.clone(),
                })
                .collect();
            out.push(self.dispatch_scalars(name, overloads, &scalars)?);
        }
        Ok(ExprValue::Series(out))
    }

    fn dispatch_scalars(
        &self,
        name: &str,
        overloads: &[Overload],
        scalars: &[Value],
    ) -> Result<Value, ExprFuncError> {
        // exact tag match
        for overload in overloads {
            if let Handler::Scalar(handler) = overload.handler {
                if scalar_match(&overload.params, scalars, false) {
                    return handler(scalars);
                }
            }
        }
        // null short-circuit
        if scalars.iter().any(Value::is_null)
            && overloads.iter().any(|o| {
                matches!(o.handler, Handler::Scalar(_)) && o.params.len() == scalars.len()
            })
        {
            return Ok(Value::Null);
        }
        // widening pass: int arguments satisfy float parameters
        for overload in overloads {
            if let Handler::Scalar(handler) = overload.handler {
                if scalar_match(&overload.params, scalars, true) {
                    let widened: Vec<Value> = overload
                        .params
                        .iter()
                        .zip(scalars)
                        .map(|(p, v)| match (p, v) {
                            (ParamType::Kind(DataKind::Float), Value::Int(i)) => {
                                Value::Float(*i as f64)
                            }
                            _ => v.clone(),
                        })
                        .collect();
                    return handler(&widened);
                }
            }
        }
        Err(ExprFuncError::NoOverload {
            name: name.to_string(),
            got: describe_args(scalars),
        })
    }
}

fn scalar_match(params: &[ParamType], scalars: &[Value], widen: bool) -> bool {
    if params.len() != scalars.len() {
        return false;
    }
    params.iter().zip(scalars).all(|(p, v)| match p {
        ParamType::Series => false,
        ParamType::Kind(k) => {
            *k == v.kind() || (widen && *k == DataKind::Float && v.kind() == DataKind::Int)
        }
    })
}

fn try_series_overloads(
    name: &str,
    overloads: &[Overload],
    args: &[ExprValue],
) -> Result<Option<ExprValue>, ExprFuncError> {
    for overload in overloads {
        let Handler::Series(handler) = overload.handler else {
            continue;
        };
        if overload.params.len() != args.len() {
            continue;
        }
        let matched = overload.params.iter().zip(args).all(|(p, a)| match (p, a) {
            (ParamType::Series, ExprValue::Series(_)) => true,
            (ParamType::Kind(k), ExprValue::Scalar(v)) => {
                *k == v.kind() || (*k == DataKind::Float && v.kind() == DataKind::Int)
            }
            _ => false,
        });
        if matched {
            return handler(args).map(Some);
        }
    }
    let _ = name;
    Ok(None)
}

fn describe_args(scalars: &[Value]) -> String {
    scalars
        .iter()
        .map(|v| v.kind().to_string())
        .collect::<Vec<_>>()
        .join(", ")
}

// --- scalar argument accessors -------------------------------------------------

fn str_arg<'a>(name: &str, args: &'a [Value], index: usize) -> Result<&'a str, ExprFuncError> {
    match args.get(index) {
        Some(Value::Str(s)) => Ok(s),
        other => Err(ExprFuncError::invoke(
            name,
            format!("argument {index} must be a string, got {other:?}"),
        )),
    }
}

fn int_arg(name: &str, args: &[Value], index: usize) -> Result<i64, ExprFuncError> {
    match args.get(index) {
        Some(Value::Int(i)) => Ok(*i),
        other => Err(ExprFuncError::invoke(
            name,
            format!("argument {index} must be an integer, got {other:?}"),
        )),
    }
}

fn float_arg(name: &str, args: &[Value], index: usize) -> Result<f64, ExprFuncError> {
    match args.get(index) {
        Some(Value::Float(f)) => Ok(*f),
        Some(Value::Int(i)) => Ok(*i as f64),
        other => Err(ExprFuncError::invoke(
            name,
            format!("argument {index} must be numeric, got {other:?}"),
        )),
    }
}

fn series_arg<'a>(
    name: &str,
    args: &'a [ExprValue],
    index: usize,
) -> Result<&'a [Value], ExprFuncError> {
    match args.get(index) {
        Some(ExprValue::Series(s)) => Ok(s),
        other => Err(ExprFuncError::invoke(
            name,
            format!("argument {index} must be a series, got {other:?}"),
        )),
    }
}

// --- scalar handlers -----------------------------------------------------------

fn f_len_str(args: &[Value]) -> Result<Value, ExprFuncError> {
    Ok(Value::Int(str_arg("len", args, 0)?.chars().count() as i64))
}

fn f_len_list(args: &[Value]) -> Result<Value, ExprFuncError> {
    match args.first() {
        Some(Value::List(items)) => Ok(Value::Int(items.len() as i64)),
        other => Err(ExprFuncError::invoke(
            "len",
            format!("argument 0 must be a list, got {other:?}"),
        )),
    }
}

fn f_log(args: &[Value]) -> Result<Value, ExprFuncError> {
    let value = float_arg("log", args, 0)?;
    if value <= 0.0 {
        return Err(ExprFuncError::invoke(
            "log",
            format!("log of non-positive value {value}"),
        ));
    }
    Ok(Value::Float(value.ln()))
}

fn f_uppercase(args: &[Value]) -> Result<Value, ExprFuncError> {
    Ok(Value::Str(str_arg("uppercase", args, 0)?.to_uppercase()))
}

fn f_lowercase(args: &[Value]) -> Result<Value, ExprFuncError> {
    Ok(Value::Str(str_arg("lowercase", args, 0)?.to_lowercase()))
}

fn f_capitalize(args: &[Value]) -> Result<Value, ExprFuncError> {
    let text = str_arg("capitalize", args, 0)?;
    let mut chars = text.chars();
    let capitalized = match chars.next() {
        Some(first) => first.to_uppercase().collect::<String>() + &chars.as_str().to_lowercase(),
        None => String::new(),
    };
    Ok(Value::Str(capitalized))
}

fn f_to_date(args: &[Value]) -> Result<Value, ExprFuncError> {
    let text = str_arg("to_date", args, 0)?;
    let format = str_arg("to_date", args, 1)?;
    NaiveDate::parse_from_str(text, format)
        .map(Value::Date)
        .map_err(|e| ExprFuncError::invoke("to_date", format!("cannot parse `{text}`: {e}")))
}

fn f_to_datetime(args: &[Value]) -> Result<Value, ExprFuncError> {
    let text = str_arg("to_datetime", args, 0)?;
    let format = str_arg("to_datetime", args, 1)?;
    NaiveDateTime::parse_from_str(text, format)
        .map(Value::DateTime)
        .map_err(|e| ExprFuncError::invoke("to_datetime", format!("cannot parse `{text}`: {e}")))
}

fn f_regex_sub(args: &[Value]) -> Result<Value, ExprFuncError> {
    let text = str_arg("regex_sub", args, 0)?;
    let pattern = str_arg("regex_sub", args, 1)?;
    let replacement = str_arg("regex_sub", args, 2)?;
    let re = Regex::new(pattern)
        .map_err(|e| ExprFuncError::invoke("regex_sub", format!("bad pattern: {e}")))?;
    Ok(Value::Str(re.replace_all(text, replacement).into_owned()))
}

fn f_replace(args: &[Value]) -> Result<Value, ExprFuncError> {
    let text = str_arg("replace", args, 0)?;
    let old = str_arg("replace", args, 1)?;
    let new = str_arg("replace", args, 2)?;
    Ok(Value::Str(text.replace(old, new)))
}

fn slice_bounds(start: i64, stop: i64, len: usize) -> (usize, usize) {
    let clamp = |i: i64| -> usize {
        if i < 0 {
            (len as i64 + i).max(0) as usize
        } else {
            (i as usize).min(len)
        }
    };
    let start = clamp(start);
    let stop = clamp(stop).max(start);
    (start, stop)
}

fn f_slice_str(args: &[Value]) -> Result<Value, ExprFuncError> {
    let text = str_arg("slice", args, 0)?;
    let chars: Vec<char> = text.chars().collect();
    let (start, stop) = slice_bounds(
        int_arg("slice", args, 1)?,
        int_arg("slice", args, 2)?,
        chars.len(),
    );
    Ok(Value::Str(chars[start..stop].iter().collect()))
}

fn f_slice_list(args: &[Value]) -> Result<Value, ExprFuncError> {
    let items = match args.first() {
        Some(Value::List(items)) => items,
        other => {
            return Err(ExprFuncError::invoke(
                "slice",
                format!("argument 0 must be a list, got {other:?}"),
            ))
        }
    };
    let (start, stop) = slice_bounds(
        int_arg("slice", args, 1)?,
        int_arg("slice", args, 2)?,
        items.len(),
    );
    Ok(Value::List(items[start..stop].to_vec()))
}

fn f_reformat_dt_str(args: &[Value]) -> Result<Value, ExprFuncError> {
    let text = str_arg("reformat_dt_str", args, 0)?;
    let in_format = str_arg("reformat_dt_str", args, 1)?;
    let out_format = str_arg("reformat_dt_str", args, 2)?;
    if let Ok(dt) = NaiveDateTime::parse_from_str(text, in_format) {
        return Ok(Value::Str(dt.format(out_format).to_string()));
    }
    NaiveDate::parse_from_str(text, in_format)
        .map(|d| Value::Str(d.format(out_format).to_string()))
        .map_err(|e| {
            ExprFuncError::invoke("reformat_dt_str", format!("cannot parse `{text}`: {e}"))
        })
}

// --- series handlers -----------------------------------------------------------

fn f_lag(args: &[ExprValue]) -> Result<ExprValue, ExprFuncError> {
    let series = series_arg("lag", args, 0)?;
    let periods = match args.get(1) {
        Some(ExprValue::Scalar(Value::Int(p))) => *p,
        other => {
            return Err(ExprFuncError::invoke(
                "lag",
                format!("periods must be an integer, got {other:?}"),
            ))
        }
    };
    let n = series.len() as i64;
    let shifted = (0..n)
        .map(|i| {
            let source = i - periods;
            if source >= 0 && source < n {
                series[source as usize].clone()
            } else {
                Value::Null
            }
        })
        .collect();
    Ok(ExprValue::Series(shifted))
}

fn non_null(series: &[Value]) -> impl Iterator<Item = &Value> {
    series.iter().filter(|v| !v.is_null())
}

fn f_sum(args: &[ExprValue]) -> Result<ExprValue, ExprFuncError> {
    let series = series_arg("sum", args, 0)?;
    let mut acc = Value::Int(0);
    for value in non_null(series) {
        acc = acc
            .checked_add(value)
            .map_err(|e| ExprFuncError::invoke("sum", e.to_string()))?;
    }
    Ok(ExprValue::Scalar(acc))
}

fn f_mean(args: &[ExprValue]) -> Result<ExprValue, ExprFuncError> {
    let series = series_arg("mean", args, 0)?;
    let mut total = 0.0;
    let mut count = 0usize;
    for value in non_null(series) {
        match value {
            Value::Int(i) => total += *i as f64,
            Value::Float(f) => total += f,
            other => {
                return Err(ExprFuncError::invoke(
                    "mean",
                    format!("non-numeric value {other:?}"),
                ))
            }
        }
        count += 1;
    }
    if count == 0 {
        return Ok(ExprValue::Scalar(Value::Null));
    }
    Ok(ExprValue::Scalar(Value::Float(total / count as f64)))
}

fn extreme(
    name: &str,
    series: &[Value],
    keep_left: fn(std::cmp::Ordering) -> bool,
) -> Result<Value, ExprFuncError> {
    let mut best: Option<&Value> = None;
    for value in non_null(series) {
        best = match best {
            None => Some(value),
            Some(current) => {
                let ordering = current
                    .compare(value)
                    .map_err(|e| ExprFuncError::invoke(name, e.to_string()))?
                    .ok_or_else(|| ExprFuncError::invoke(name, "incomparable values"))?;
                if keep_left(ordering) {
                    Some(current)
                } else {
                    Some(value)
                }
            }
        };
    }
    Ok(best.cloned().unwrap_or(Value::Null))
}

fn f_min(args: &[ExprValue]) -> Result<ExprValue, ExprFuncError> {
    let series = series_arg("min", args, 0)?;
    extreme("min", series, |o| o.is_le()).map(ExprValue::Scalar)
}

fn f_max(args: &[ExprValue]) -> Result<ExprValue, ExprFuncError> {
    let series = series_arg("max", args, 0)?;
    extreme("max", series, |o| o.is_ge()).map(ExprValue::Scalar)
}

fn f_count(args: &[ExprValue]) -> Result<ExprValue, ExprFuncError> {
    let series = series_arg("count", args, 0)?;
    Ok(ExprValue::Scalar(Value::Int(non_null(series).count() as i64)))
}

/// `spread` is `max(x) - min(x)`.
fn f_spread(args: &[ExprValue]) -> Result<ExprValue, ExprFuncError> {
    let series = series_arg("spread", args, 0)?;
    let low = extreme("spread", series, |o| o.is_le())?;
    let high = extreme("spread", series, |o| o.is_ge())?;
    if low.is_null() || high.is_null() {
        return Ok(ExprValue::Scalar(Value::Null));
    }
    high.checked_sub(&low)
        .map(ExprValue::Scalar)
        .map_err(|e| ExprFuncError::invoke("spread", e.to_string()))
}
