//! Database layer: connector seam, bounded pool, executor and schema introspection.
//!
//! Everything above the [`Connector`] trait is driver-agnostic; [`MariaDbConnector`] is
//! the only production implementation.

pub mod connection;
pub mod executor;
pub mod mariadb;
pub mod pool;
pub mod result;
pub mod schema;
#[cfg(test)]
pub mod testing;
pub mod traits;

pub use connection::ConnectionManager;
pub use executor::{QueryExecutor, quote_identifier};
pub use mariadb::MariaDbConnector;
pub use pool::{ConnectionPool, PoolMetrics, PoolMetricsSnapshot, PoolStatus, PooledConnection};
pub use result::*;
pub use schema::SchemaIntrospector;
pub use traits::{Connector, DatabaseConnection};
