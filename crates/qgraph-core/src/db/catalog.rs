use crate::db::Connector;
use crate::error::{ConnectorError, GraphConfigError};
use crate::format::SourceKind;
use crate::types::Frame;
use std::collections::HashMap;
use std::sync::Arc;

/// Key-value configuration of a CONNECT entry, e.g.
/// `Postgres(db_name='x', port=5432)`.
pub type DriverConfig = HashMap<String, serde_json::Value>;

type DriverFactory =
    Arc<dyn Fn(&str, &DriverConfig) -> Result<Arc<dyn Connector>, GraphConfigError> + Send + Sync>;

/// Maps CONNECT driver names to connector factories.
///
/// The default catalog knows the common driver names and produces
/// [`StubConnector`]s carrying the right dialect: a graph can be built and
/// its queries rendered without any live backend. Applications register real
/// factories (or test doubles) over the same names.
#[derive(Clone)]
pub struct DriverCatalog {
    factories: HashMap<String, DriverFactory>,
}

impl Default for DriverCatalog {
    fn default() -> Self {
        let mut catalog = Self {
            factories: HashMap::new(),
        };
        for driver in ["Postgres", "Mysql", "Sqlite"] {
            catalog.register_stub(driver, SourceKind::Sql);
        }
        catalog.register_stub("Mongodb", SourceKind::Document);
        catalog.register_stub("Redis", SourceKind::KeyValue);
        catalog
    }
}

impl DriverCatalog {
    /// A catalog with no drivers at all.
    pub fn empty() -> Self {
        Self {
            factories: HashMap::new(),
        }
    }

    /// Registers (or replaces) a factory for a driver name.
    pub fn register<F>(&mut self, driver: impl Into<String>, factory: F)
    where
        F: Fn(&str, &DriverConfig) -> Result<Arc<dyn Connector>, GraphConfigError>
            + Send
            + Sync
            + 'static,
    {
        self.factories.insert(driver.into(), Arc::new(factory));
    }

    /// Registers a connector instance to be handed out for every CONNECT entry
    /// naming `driver`. Useful for tests wiring [`crate::MemoryConnector`]s.
    pub fn register_instance(&mut self, driver: impl Into<String>, connector: Arc<dyn Connector>) {
        self.register(driver, move |_, _| Ok(connector.clone()));
    }

    fn register_stub(&mut self, driver: &str, kind: SourceKind) {
        let driver_name = driver.to_string();
        self.register(driver, move |name, config| {
            Ok(Arc::new(StubConnector {
                name: name.to_string(),
                driver: driver_name.clone(),
                kind,
                config: config.clone(),
            }) as Arc<dyn Connector>)
        });
    }

    /// Builds a connector for one CONNECT entry.
    pub fn build(
        &self,
        driver: &str,
        connection: &str,
        config: &DriverConfig,
    ) -> Result<Arc<dyn Connector>, GraphConfigError> {
        let factory = self
            .factories
            .get(driver)
            .ok_or_else(|| GraphConfigError::UnknownDriver(driver.to_string()))?;
        factory(connection, config)
    }
}

impl std::fmt::Debug for DriverCatalog {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut drivers: Vec<&str> = self.factories.keys().map(String::as_str).collect();
        drivers.sort_unstable();
        f.debug_struct("DriverCatalog").field("drivers", &drivers).finish()
    }
}

/// A connector that knows its dialect but has no live backend.
///
/// Produced by the default catalog so graphs parse and render without driver
/// crates; any attempt to retrieve data reports the missing backend.
#[derive(Debug)]
pub struct StubConnector {
    name: String,
    driver: String,
    kind: SourceKind,
    #[allow(dead_code)]
    config: DriverConfig,
}

impl Connector for StubConnector {
    fn name(&self) -> &str {
        &self.name
    }

    fn kind(&self) -> SourceKind {
        self.kind
    }

    fn execute_query(&self, _query: &str) -> Result<Frame, ConnectorError> {
        Err(ConnectorError::NoBackend {
            driver: self.driver.clone(),
            connection: self.name.clone(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_catalog_builds_dialect_stubs() {
        let catalog = DriverCatalog::default();
        let conn = catalog.build("Mongodb", "mongo_conn", &DriverConfig::new()).unwrap();
        assert_eq!(conn.name(), "mongo_conn");
        assert_eq!(conn.kind(), SourceKind::Document);
        assert!(matches!(
            conn.execute_query("{}").unwrap_err(),
            ConnectorError::NoBackend { .. }
        ));
    }

    #[test]
    fn unknown_driver_is_rejected() {
        let catalog = DriverCatalog::default();
        let err = catalog
            .build("Cassandra", "c", &DriverConfig::new())
            .unwrap_err();
        assert_eq!(err, GraphConfigError::UnknownDriver("Cassandra".into()));
    }
}
