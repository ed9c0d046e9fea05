//! The query template engine.
//!
//! A node's query text is tokenized with the regular partition
//! `({{…}} | {%…%} | {#…#})`:
//!
//! - `{# … #}` is a comment and renders to nothing,
//! - `{% name|modifier:type %}` is an independent parameter resolved from the
//!   caller-supplied map,
//! - `{{ name|modifier:type }}` is a dependent parameter derived from the
//!   parent node's frame,
//! - everything else passes through verbatim.
//!
//! Values cross into the query string through the per-source literal
//! formatter, so one template renders correctly against any source kind.

mod parameter;

pub use parameter::{ParameterClass, TemplateParameter};

use crate::error::{QglSyntaxError, TemplateError};
use crate::format::{render_literal, Container, SourceKind};
use crate::types::{Frame, Value};
use regex::Regex;
use std::collections::HashMap;
use std::sync::LazyLock;

static TOKEN_RE: LazyLock<Regex> = LazyLock::new(|| {
    // Non-greedy bodies; (?s) lets a token span lines.
    Regex::new(r"(?s)\{\{.*?\}\}|\{%.*?%\}|\{#.*?#\}").expect("invalid token regex")
});

#[derive(Clone, Debug, PartialEq)]
enum Token {
    Literal(String),
    Comment,
    Parameter(TemplateParameter),
}

/// A parsed query template bound to one node.
#[derive(Clone, Debug, PartialEq)]
pub struct QueryTemplate {
    source: String,
    tokens: Vec<Token>,
}

impl QueryTemplate {
    /// Tokenizes and validates the template text.
    pub fn parse(text: &str) -> Result<Self, QglSyntaxError> {
        let mut tokens = Vec::new();
        let mut last = 0;
        for found in TOKEN_RE.find_iter(text) {
            if found.start() > last {
                tokens.push(Token::Literal(text[last..found.start()].to_string()));
            }
            let token = found.as_str();
            let inner = &token[2..token.len() - 2];
            if token.starts_with("{#") {
                tokens.push(Token::Comment);
            } else if token.starts_with("{%") {
                tokens.push(Token::Parameter(TemplateParameter::parse(
                    inner,
                    ParameterClass::Independent,
                )?));
            } else {
                tokens.push(Token::Parameter(TemplateParameter::parse(
                    inner,
                    ParameterClass::Dependent,
                )?));
            }
            last = found.end();
        }
        if last < text.len() {
            tokens.push(Token::Literal(text[last..].to_string()));
        }
        Ok(Self {
            source: text.to_string(),
            tokens,
        })
    }

    /// The original template text.
    pub fn source(&self) -> &str {
        &self.source
    }

    fn parameters(&self) -> impl Iterator<Item = &TemplateParameter> {
        self.tokens.iter().filter_map(|t| match t {
            Token::Parameter(p) => Some(p),
            _ => None,
        })
    }

    /// True iff the template contains at least one `{{ }}` token.
    pub fn has_dependent_parameters(&self) -> bool {
        self.parameters()
            .any(|p| p.class == ParameterClass::Dependent)
    }

    /// Names of `{% %}` parameters, deduplicated, in first-appearance order.
    pub fn independent_parameter_names(&self) -> Vec<&str> {
        self.class_names(ParameterClass::Independent)
    }

    /// Names of `{{ }}` parameters, deduplicated, in first-appearance order.
    pub fn dependent_parameter_names(&self) -> Vec<&str> {
        self.class_names(ParameterClass::Dependent)
    }

    fn class_names(&self, class: ParameterClass) -> Vec<&str> {
        let mut names: Vec<&str> = Vec::new();
        for parameter in self.parameters() {
            if parameter.class == class && !names.contains(&parameter.name.as_str()) {
                names.push(&parameter.name);
            }
        }
        names
    }

    /// Renders the template for a source of the given kind.
    ///
    /// `parent` is only consulted for dependent parameters; templates without
    /// `{{ }}` tokens ignore it entirely.
    pub fn render(
        &self,
        kind: SourceKind,
        params: &HashMap<String, Value>,
        parent: Option<&Frame>,
    ) -> Result<String, TemplateError> {
        let mut out = String::with_capacity(self.source.len());
        for token in &self.tokens {
            match token {
                Token::Literal(text) => out.push_str(text),
                Token::Comment => {}
                Token::Parameter(parameter) => match parameter.class {
                    ParameterClass::Independent => {
                        let value = params.get(&parameter.name).ok_or_else(|| {
                            TemplateError::IndependentParameter(parameter.name.clone())
                        })?;
                        out.push_str(&render_literal(
                            value,
                            parameter.format,
                            parameter.container,
                            kind,
                        )?);
                    }
                    ParameterClass::Dependent => {
                        let rendered = render_dependent(parameter, kind, parent)?;
                        out.push_str(&rendered);
                    }
                },
            }
        }
        Ok(out)
    }
}

fn render_dependent(
    parameter: &TemplateParameter,
    kind: SourceKind,
    parent: Option<&Frame>,
) -> Result<String, TemplateError> {
    let frame = parent.ok_or_else(|| TemplateError::DependentParameter {
        name: parameter.name.clone(),
        reason: "no parent frame available".to_string(),
    })?;
    let column = frame
        .column(&parameter.name)
        .ok_or_else(|| TemplateError::DependentParameter {
            name: parameter.name.clone(),
            reason: "column not present in parent frame".to_string(),
        })?;
    match parameter.container {
        Container::ValueList => {
            // The column is a join key; repeats add nothing to a value list.
            let mut deduped: Vec<Value> = Vec::new();
            for value in column {
                if !deduped.contains(value) {
                    deduped.push(value.clone());
                }
            }
            Ok(render_literal(
                &Value::List(deduped),
                parameter.format,
                Container::ValueList,
                kind,
            )?)
        }
        Container::Scalar => {
            let first = column
                .first()
                .ok_or_else(|| TemplateError::DependentParameter {
                    name: parameter.name.clone(),
                    reason: "parent frame column is empty".to_string(),
                })?;
            Ok(render_literal(first, parameter.format, Container::Scalar, kind)?)
        }
    }
}
