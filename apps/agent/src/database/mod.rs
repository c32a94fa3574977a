/// Metrics database
///
/// Append-only storage of probe samples and committed report events on a
/// local libsql file, plus the range aggregation the report cycle reads.
pub mod migrations;
pub mod models;
pub mod repository;

pub use models::{AggregatedMetric, ReportEvent};
pub use repository::{LibsqlMetricsStore, MetricsStore};

use anyhow::Result;

/// Initialize database with schema
pub async fn initialize_database(conn: &libsql::Connection) -> Result<()> {
    migrations::run_migrations(conn).await
}
