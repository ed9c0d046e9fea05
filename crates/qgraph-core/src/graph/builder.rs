//! QGL parsing: turns the four-section document into a [`QueryGraph`].
//!
//! ```text
//! CONNECT
//!     pg <- Postgres(db_name='app', host='localhost')
//! RETRIEVE
//!     QUERY |
//!         SELECT * FROM "Album" WHERE "Title" IN {{ album|value_list:str }};
//!     FIELDS Title, ArtistId
//!     USING pg
//!     THEN |
//!         mutate(title_len = len(Title));
//!     AS albums
//!     ---
//!     ...
//! JOIN
//!     LEFT (albums[Title] ==> tracks[album], albums[ArtistId] ==> tracks[artist])
//! ```

use crate::db::{DriverCatalog, DriverConfig};
use crate::error::{Error, QglSyntaxError};
use crate::graph::{JoinContext, QueryGraph, QueryNode};
use crate::manipulate::parse_pipeline;
use crate::template::QueryTemplate;
use crate::types::JoinKind;
use regex::Regex;
use std::sync::LazyLock;

#[cfg(feature = "tracing")]
use tracing::debug;

static CONNECT_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^([A-Za-z][A-Za-z0-9_$]*)\s*<-\s*([A-Za-z][A-Za-z0-9_$]*)\s*\((.*)\)$")
        .expect("invalid CONNECT regex")
});

static JOIN_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^([A-Za-z]+)\s*\((.*)\)$").expect("invalid JOIN regex"));

static PAIR_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"^([A-Za-z][A-Za-z0-9_$]*)\[([^\]]+)\]\s*==>\s*([A-Za-z][A-Za-z0-9_$]*)\[([^\]]+)\]$",
    )
    .expect("invalid join pair regex")
});

/// Builds a graph from QGL text using the default driver catalog.
pub fn build_graph(text: &str) -> Result<QueryGraph, Error> {
    build_graph_with(text, &DriverCatalog::default())
}

/// Builds a graph from QGL text, resolving CONNECT drivers through `catalog`.
pub fn build_graph_with(text: &str, catalog: &DriverCatalog) -> Result<QueryGraph, Error> {
    let document = split_sections(text)?;

    let mut registry = crate::db::ConnectorRegistry::new();
    for (line, connect) in &document.connect {
        let captures = CONNECT_RE.captures(connect).ok_or_else(|| {
            QglSyntaxError::at_line(format!("malformed CONNECT entry `{connect}`"), *line)
        })?;
        let name = &captures[1];
        let driver = &captures[2];
        let config = parse_driver_config(&captures[3], *line)?;
        let connector = catalog.build(driver, name, &config)?;
        registry.insert(connector)?;
    }

    let mut graph = QueryGraph::new(registry);
    for block in &document.retrieve {
        let node = parse_retrieve_block(block, &graph)?;
        graph.add_node(node)?;
    }
    if graph.is_empty() {
        return Err(QglSyntaxError::new("document declares no RETRIEVE nodes").into());
    }

    for (line, join) in &document.join {
        let (parent, child, context) = parse_join_clause(join, *line)?;
        graph.attach_child(&parent, &child, context)?;
    }
    graph.resolve_root()?;

    #[cfg(feature = "tracing")]
    debug!(
        nodes = graph.len(),
        root = ?graph.root().map(|n| n.name.as_str()),
        "built query graph"
    );

    Ok(graph)
}

struct Document {
    connect: Vec<(usize, String)>,
    retrieve: Vec<Vec<(usize, String)>>,
    join: Vec<(usize, String)>,
}

fn split_sections(text: &str) -> Result<Document, QglSyntaxError> {
    #[derive(Clone, Copy, PartialEq, PartialOrd)]
    enum Section {
        None,
        Connect,
        Retrieve,
        Join,
    }

    let mut section = Section::None;
    let mut connect = Vec::new();
    let mut retrieve: Vec<Vec<(usize, String)>> = vec![Vec::new()];
    let mut join = Vec::new();

    for (index, raw) in text.lines().enumerate() {
        let line_no = index + 1;
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            continue;
        }
        let next = match trimmed {
            "CONNECT" => Some(Section::Connect),
            "RETRIEVE" => Some(Section::Retrieve),
            "JOIN" => Some(Section::Join),
            _ => None,
        };
        if let Some(next) = next {
            if next <= section {
                return Err(QglSyntaxError::at_line(
                    format!("section `{trimmed}` out of order"),
                    line_no,
                ));
            }
            section = next;
            continue;
        }
        match section {
            Section::None => {
                return Err(QglSyntaxError::at_line(
                    format!("expected a section header, found `{trimmed}`"),
                    line_no,
                ))
            }
            Section::Connect => connect.push((line_no, trimmed.to_string())),
            Section::Retrieve => {
                if trimmed == "---" {
                    retrieve.push(Vec::new());
                } else {
                    retrieve
                        .last_mut()
                        .expect("block list starts non-empty")
                        .push((line_no, trimmed.to_string()));
                }
            }
            Section::Join => join.push((line_no, trimmed.to_string())),
        }
    }

    let retrieve: Vec<Vec<(usize, String)>> =
        retrieve.into_iter().filter(|b| !b.is_empty()).collect();
    Ok(Document {
        connect,
        retrieve,
        join,
    })
}

fn parse_driver_config(args: &str, line: usize) -> Result<DriverConfig, QglSyntaxError> {
    let mut config = DriverConfig::new();
    for part in split_config_args(args) {
        let part = part.trim();
        if part.is_empty() {
            continue;
        }
        let (key, value) = part.split_once('=').ok_or_else(|| {
            QglSyntaxError::at_line(format!("expected `key=value`, found `{part}`"), line)
        })?;
        config.insert(key.trim().to_string(), parse_config_value(value.trim(), line)?);
    }
    Ok(config)
}

fn split_config_args(text: &str) -> Vec<String> {
    let mut parts = Vec::new();
    let mut quote: Option<char> = None;
    let mut current = String::new();
    for c in text.chars() {
        match quote {
            Some(q) => {
                if c == q {
                    quote = None;
                }
                current.push(c);
            }
            None => match c {
                '\'' | '"' => {
                    quote = Some(c);
                    current.push(c);
                }
                ',' => {
                    parts.push(std::mem::take(&mut current));
                }
                _ => current.push(c),
            },
        }
    }
    parts.push(current);
    parts
}

fn parse_config_value(text: &str, line: usize) -> Result<serde_json::Value, QglSyntaxError> {
    if let Some(stripped) = text
        .strip_prefix('\'')
        .and_then(|s| s.strip_suffix('\''))
        .or_else(|| text.strip_prefix('"').and_then(|s| s.strip_suffix('"')))
    {
        return Ok(serde_json::Value::String(stripped.to_string()));
    }
    if text == "true" || text == "false" {
        return Ok(serde_json::Value::Bool(text == "true"));
    }
    if let Ok(int) = text.parse::<i64>() {
        return Ok(serde_json::Value::Number(int.into()));
    }
    if let Ok(float) = text.parse::<f64>() {
        if let Some(number) = serde_json::Number::from_f64(float) {
            return Ok(serde_json::Value::Number(number));
        }
    }
    Err(QglSyntaxError::at_line(
        format!("cannot parse connection argument value `{text}`"),
        line,
    ))
}

fn parse_retrieve_block(
    block: &[(usize, String)],
    graph: &QueryGraph,
) -> Result<QueryNode, Error> {
    let first_line = block.first().map(|(l, _)| *l).unwrap_or(0);

    let mut query: Option<String> = None;
    let mut fields: Vec<String> = Vec::new();
    let mut using: Option<String> = None;
    let mut pipeline: Option<String> = None;
    let mut name: Option<String> = None;

    let mut i = 0;
    while i < block.len() {
        let (line, text) = &block[i];
        if let Some(rest) = keyword_rest(text, "QUERY") {
            let (body, consumed) = parse_piped_body(rest, block, i, "QUERY")?;
            if query.replace(body).is_some() {
                return Err(QglSyntaxError::at_line("duplicate QUERY clause", *line).into());
            }
            i = consumed;
        } else if let Some(rest) = keyword_rest(text, "THEN") {
            let (body, consumed) = parse_piped_body(rest, block, i, "THEN")?;
            if pipeline.replace(body).is_some() {
                return Err(QglSyntaxError::at_line("duplicate THEN clause", *line).into());
            }
            i = consumed;
        } else if let Some(rest) = keyword_rest(text, "FIELDS") {
            fields = rest
                .split(|c: char| c == ',' || c == ' ')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(str::to_string)
                .collect();
            if fields.is_empty() {
                return Err(QglSyntaxError::at_line("FIELDS lists no columns", *line).into());
            }
            i += 1;
        } else if let Some(rest) = keyword_rest(text, "USING") {
            using = Some(rest.trim().to_string());
            i += 1;
        } else if let Some(rest) = keyword_rest(text, "AS") {
            name = Some(rest.trim().to_string());
            i += 1;
        } else {
            return Err(
                QglSyntaxError::at_line(format!("unexpected line `{text}`"), *line).into(),
            );
        }
    }

    let query = query
        .ok_or_else(|| QglSyntaxError::at_line("node block is missing QUERY", first_line))?;
    let using = using
        .ok_or_else(|| QglSyntaxError::at_line("node block is missing USING", first_line))?;
    let name = name
        .ok_or_else(|| QglSyntaxError::at_line("node block is missing AS", first_line))?;

    let template = QueryTemplate::parse(&query)?;
    let connector = graph.registry().get(&using)?;
    let mut node = QueryNode::new(name, template, connector);
    node.fields = fields;
    if let Some(pipeline) = pipeline {
        node.manipulations = parse_pipeline(&pipeline)?;
    }
    Ok(node)
}

/// Matches a clause keyword at a word boundary, returning the remainder.
fn keyword_rest<'a>(text: &'a str, keyword: &str) -> Option<&'a str> {
    let rest = text.strip_prefix(keyword)?;
    if rest.is_empty() || rest.starts_with(char::is_whitespace) || rest.starts_with('|') {
        Some(rest)
    } else {
        None
    }
}

/// Parses a `KEYWORD | body ... ;` clause starting at block index `start`.
/// Returns the body text (lines joined by newlines, terminator stripped) and
/// the index of the first unconsumed block line.
fn parse_piped_body(
    rest_of_first: &str,
    block: &[(usize, String)],
    start: usize,
    keyword: &str,
) -> Result<(String, usize), QglSyntaxError> {
    let start_line = block[start].0;
    let rest = rest_of_first.trim_start();
    let Some(rest) = rest.strip_prefix('|') else {
        return Err(QglSyntaxError::at_line(
            format!("`{keyword}` must be followed by `|`"),
            start_line,
        ));
    };

    let mut lines: Vec<&str> = Vec::new();
    let mut i = start;
    let mut current = rest.trim();
    loop {
        if let Some(stripped) = current.strip_suffix(';') {
            let stripped = stripped.trim_end();
            if !stripped.is_empty() {
                lines.push(stripped);
            }
            return Ok((lines.join("\n"), i + 1));
        }
        if !current.is_empty() {
            lines.push(current);
        }
        i += 1;
        match block.get(i) {
            Some((_, text)) => current = text,
            None => {
                return Err(QglSyntaxError::at_line(
                    format!("`{keyword}` body is not terminated by `;`"),
                    start_line,
                ))
            }
        }
    }
}

fn parse_join_clause(
    text: &str,
    line: usize,
) -> Result<(String, String, JoinContext), QglSyntaxError> {
    let captures = JOIN_RE.captures(text).ok_or_else(|| {
        QglSyntaxError::at_line(format!("malformed JOIN clause `{text}`"), line)
    })?;
    let kind = JoinKind::parse_keyword(&captures[1]).ok_or_else(|| {
        QglSyntaxError::at_line(format!("unknown join kind `{}`", &captures[1]), line)
    })?;

    let mut parent: Option<String> = None;
    let mut child: Option<String> = None;
    let mut pairs = Vec::new();
    for part in captures[2].split(',') {
        let part = part.trim();
        let pair = PAIR_RE.captures(part).ok_or_else(|| {
            QglSyntaxError::at_line(
                format!("expected `parent[col] ==> child[col]`, found `{part}`"),
                line,
            )
        })?;
        let (p, p_col, c, c_col) = (&pair[1], &pair[2], &pair[3], &pair[4]);
        match &parent {
            None => parent = Some(p.to_string()),
            Some(existing) if existing == p => {}
            Some(existing) => {
                return Err(QglSyntaxError::at_line(
                    format!("join clause mixes parents `{existing}` and `{p}`"),
                    line,
                ))
            }
        }
        match &child {
            None => child = Some(c.to_string()),
            Some(existing) if existing == c => {}
            Some(existing) => {
                return Err(QglSyntaxError::at_line(
                    format!("join clause mixes children `{existing}` and `{c}`"),
                    line,
                ))
            }
        }
        pairs.push((p_col.trim().to_string(), c_col.trim().to_string()));
    }
    let parent = parent
        .ok_or_else(|| QglSyntaxError::at_line("join clause declares no pairs", line))?;
    let child = child
        .ok_or_else(|| QglSyntaxError::at_line("join clause declares no pairs", line))?;
    Ok((parent, child, JoinContext::new(kind, pairs)))
}
