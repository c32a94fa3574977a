use anyhow::Result;
use async_trait::async_trait;
use libsql::params;
use std::path::Path;

use super::models::{AggregatedMetric, ReportEvent};
use crate::Timestamp;
use crate::monitoring::types::MetricSample;
use crate::pool::{LibsqlManager, LibsqlPool, open_pool};

/// Sample sink and aggregation source used by the agent cycles
#[async_trait]
pub trait MetricsStore: Send + Sync {
    /// Append one sample
    async fn save(&self, sample: &MetricSample) -> Result<()>;

    /// Downtime count and mean latency for `peer_id` as seen by `owner_id`
    /// over `[start, end)`. No samples yields zeroes.
    async fn aggregate(
        &self,
        owner_id: u64,
        peer_id: u64,
        start: Timestamp,
        end: Timestamp,
    ) -> Result<AggregatedMetric>;

    /// Total number of stored samples
    async fn count_samples(&self) -> Result<u64>;

    /// Record a verdict that was committed to the ledger
    async fn save_report_event(&self, event: &ReportEvent) -> Result<()>;
}

/// LibSQL-backed metrics store
pub struct LibsqlMetricsStore {
    pool: LibsqlPool,
}

impl LibsqlMetricsStore {
    /// Wrap an existing pool. The schema must already be migrated.
    pub fn new_from_pool(pool: LibsqlPool) -> Self {
        Self { pool }
    }

    /// Open the database at `path` and migrate it.
    pub async fn connect(path: &Path) -> Result<Self> {
        let pool = open_pool(path).await?;
        {
            let conn = pool.get().await?;
            super::initialize_database(&conn).await?;
        }
        Ok(Self::new_from_pool(pool))
    }

    async fn get_conn(&self) -> Result<deadpool::managed::Object<LibsqlManager>> {
        Ok(self.pool.get().await?)
    }
}

#[async_trait]
impl MetricsStore for LibsqlMetricsStore {
    async fn save(&self, sample: &MetricSample) -> Result<()> {
        let conn = self.get_conn().await?;
        conn.execute(
            "INSERT INTO metric_samples (owner_id, peer_id, offline, latency_ms, timestamp)
             VALUES (?, ?, ?, ?, ?)",
            params![
                sample.owner_id as i64,
                sample.peer_id as i64,
                if sample.offline { 1 } else { 0 },
                sample.latency_ms,
                sample.timestamp
            ],
        )
        .await?;
        Ok(())
    }

    async fn aggregate(
        &self,
        owner_id: u64,
        peer_id: u64,
        start: Timestamp,
        end: Timestamp,
    ) -> Result<AggregatedMetric> {
        let conn = self.get_conn().await?;
        let mut rows = conn
            .query(
                "SELECT
                    COALESCE(SUM(CASE WHEN offline = 1 THEN 1 ELSE 0 END), 0),
                    AVG(CASE WHEN latency_ms >= 0 THEN latency_ms END)
                 FROM metric_samples
                 WHERE owner_id = ? AND peer_id = ? AND timestamp >= ? AND timestamp < ?",
                params![owner_id as i64, peer_id as i64, start, end],
            )
            .await?;

        let Some(row) = rows.next().await? else {
            return Ok(AggregatedMetric::default());
        };

        let downtime: i64 = row.get(0)?;
        let latency: Option<f64> = row.get(1)?;

        Ok(AggregatedMetric {
            downtime_count: downtime.max(0) as u64,
            mean_latency: latency.unwrap_or(0.0),
        })
    }

    async fn count_samples(&self) -> Result<u64> {
        let conn = self.get_conn().await?;
        let mut rows = conn.query("SELECT COUNT(*) FROM metric_samples", ()).await?;

        match rows.next().await? {
            Some(row) => Ok(row.get::<i64>(0)?.max(0) as u64),
            None => Ok(0),
        }
    }

    async fn save_report_event(&self, event: &ReportEvent) -> Result<()> {
        let conn = self.get_conn().await?;
        conn.execute(
            "INSERT INTO report_events (tx_hash, owner_id, peer_id, downtime, latency, reported_at)
             VALUES (?, ?, ?, ?, ?, ?)",
            params![
                event.tx_hash.clone(),
                event.owner_id as i64,
                event.peer_id as i64,
                event.downtime_count as i64,
                event.mean_latency,
                event.reported_at
            ],
        )
        .await?;
        Ok(())
    }
}
