use crate::db::Connector;
use crate::error::GraphConfigError;
use std::collections::HashMap;
use std::sync::Arc;

/// Maps user-declared connection names to connector instances.
///
/// Built once from the CONNECT section and read-only afterwards.
#[derive(Clone, Default)]
pub struct ConnectorRegistry {
    connectors: HashMap<String, Arc<dyn Connector>>,
}

impl ConnectorRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a connector under its declared name.
    pub fn insert(&mut self, connector: Arc<dyn Connector>) -> Result<(), GraphConfigError> {
        let name = connector.name().to_string();
        if self.connectors.contains_key(&name) {
            return Err(GraphConfigError::DuplicateConnector(name));
        }
        self.connectors.insert(name, connector);
        Ok(())
    }

    /// Looks a connector up by name.
    pub fn get(&self, name: &str) -> Result<Arc<dyn Connector>, GraphConfigError> {
        self.connectors
            .get(name)
            .cloned()
            .ok_or_else(|| GraphConfigError::UnknownConnector(name.to_string()))
    }

    pub fn contains(&self, name: &str) -> bool {
        self.connectors.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.connectors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.connectors.is_empty()
    }
}

impl std::fmt::Debug for ConnectorRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut names: Vec<&str> = self.connectors.keys().map(String::as_str).collect();
        names.sort_unstable();
        f.debug_struct("ConnectorRegistry")
            .field("connections", &names)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::MemoryConnector;
    use crate::format::SourceKind;

    #[test]
    fn duplicate_names_are_rejected() {
        let mut registry = ConnectorRegistry::new();
        registry
            .insert(Arc::new(MemoryConnector::new("pg", SourceKind::Sql)))
            .unwrap();
        let err = registry
            .insert(Arc::new(MemoryConnector::new("pg", SourceKind::Sql)))
            .unwrap_err();
        assert_eq!(err, GraphConfigError::DuplicateConnector("pg".into()));
    }

    #[test]
    fn unknown_lookup_fails() {
        let registry = ConnectorRegistry::new();
        assert_eq!(
            registry.get("nope").unwrap_err(),
            GraphConfigError::UnknownConnector("nope".into())
        );
    }
}
