//! Connectors: the boundary between the engine and concrete data sources.
//!
//! The engine never talks to a database directly. Each node holds an
//! `Arc<dyn Connector>` resolved from the CONNECT section; the connector's
//! [`SourceKind`] drives literal formatting and `execute_query` is the only
//! retrieval operation. Real drivers live outside this crate and are plugged
//! in through a [`DriverCatalog`]; the built-in factories produce dialect
//! stubs that render correctly but have no live backend.

mod catalog;
mod memory;
mod registry;

pub use catalog::{DriverCatalog, DriverConfig, StubConnector};
pub use memory::MemoryConnector;
pub use registry::ConnectorRegistry;

use crate::error::ConnectorError;
use crate::format::SourceKind;
use crate::types::Frame;

/// A driver-backed connection to one data source.
///
/// Implementations own their pooling; a single connector may be invoked
/// concurrently by multiple nodes.
pub trait Connector: Send + Sync + std::fmt::Debug {
    /// The user-declared connection name.
    fn name(&self) -> &str;

    /// Formatting dialect of this source.
    fn kind(&self) -> SourceKind;

    /// Executes a rendered retrieval query, returning a frame.
    fn execute_query(&self, query: &str) -> Result<Frame, ConnectorError>;

    /// Executes a rendered insert statement.
    fn execute_insert(&self, _query: &str) -> Result<(), ConnectorError> {
        Err(ConnectorError::InsertUnsupported(self.name().to_string()))
    }

    /// Releases any held resources. Stateless connectors need not override.
    fn close(&self) {}
}
