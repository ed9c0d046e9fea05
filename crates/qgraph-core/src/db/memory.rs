use crate::db::Connector;
use crate::error::ConnectorError;
use crate::format::SourceKind;
use crate::types::Frame;
use std::collections::HashMap;
use std::sync::Mutex;

/// An in-memory connector serving canned responses.
///
/// Responses are keyed by the exact rendered query text, with an optional
/// fallback for anything else. Every received query is recorded, so tests can
/// assert on the exact text the template engine produced.
#[derive(Debug)]
pub struct MemoryConnector {
    name: String,
    kind: SourceKind,
    responses: HashMap<String, Frame>,
    fallback: Option<Frame>,
    log: Mutex<Vec<String>>,
}

impl MemoryConnector {
    pub fn new(name: impl Into<String>, kind: SourceKind) -> Self {
        Self {
            name: name.into(),
            kind,
            responses: HashMap::new(),
            fallback: None,
            log: Mutex::new(Vec::new()),
        }
    }

    /// Registers the frame returned for one exact query string.
    pub fn with_response(mut self, query: impl Into<String>, frame: Frame) -> Self {
        self.responses.insert(query.into(), frame);
        self
    }

    /// Registers the frame returned when no exact response matches.
    pub fn with_fallback(mut self, frame: Frame) -> Self {
        self.fallback = Some(frame);
        self
    }

    /// Every query received so far, in arrival order.
    pub fn queries(&self) -> Vec<String> {
        self.log.lock().expect("query log poisoned").clone()
    }
}

impl Connector for MemoryConnector {
    fn name(&self) -> &str {
        &self.name
    }

    fn kind(&self) -> SourceKind {
        self.kind
    }

    fn execute_query(&self, query: &str) -> Result<Frame, ConnectorError> {
        self.log.lock().expect("query log poisoned").push(query.to_string());
        if let Some(frame) = self.responses.get(query) {
            return Ok(frame.clone());
        }
        self.fallback
            .clone()
            .ok_or_else(|| ConnectorError::NoResponse(query.to_string()))
    }

    fn execute_insert(&self, query: &str) -> Result<(), ConnectorError> {
        self.log.lock().expect("query log poisoned").push(query.to_string());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Value;

    #[test]
    fn exact_response_wins_over_fallback() {
        let hit = Frame::from_columns(vec![("a", vec![Value::Int(1)])]).unwrap();
        let miss = Frame::new();
        let conn = MemoryConnector::new("m", SourceKind::Sql)
            .with_response("SELECT 1", hit.clone())
            .with_fallback(miss);
        assert_eq!(conn.execute_query("SELECT 1").unwrap(), hit);
        assert_eq!(conn.execute_query("SELECT 2").unwrap(), Frame::new());
        assert_eq!(conn.queries(), vec!["SELECT 1", "SELECT 2"]);
    }

    #[test]
    fn missing_response_without_fallback_errors() {
        let conn = MemoryConnector::new("m", SourceKind::Sql);
        assert!(matches!(
            conn.execute_query("SELECT 1").unwrap_err(),
            ConnectorError::NoResponse(_)
        ));
    }
}
