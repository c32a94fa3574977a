
use std::sync::Arc;

use anyhow::{Context, Result};
use async_trait::async_trait;
use tokio::sync::RwLock;
use tracing::{error, info, warn};

use crate::database::{MetricsStore, ReportEvent};
use crate::error::GatewayError;
use crate::gateway::ChainGateway;
use crate::monitoring::{ConcurrentProber, ConnectivityGuard};
use crate::nodeset::{MonitoredPeer, NodeSetCache, NodeSetRecord};
use crate::notifier::{Notifier, notify_operator};
use crate::scheduler::Job;
use crate::verdict::{DuePeer, SentVerdictStore, Verdict, VerdictBuilder};
use crate::{display_timestamp, now_timestamp};

/// Everything the agent cycles need, built once at startup
pub struct AgentComponents {
    pub gateway: Arc<ChainGateway>,
    pub store: Arc<dyn MetricsStore>,
    pub prober: ConcurrentProber,
    pub node_set: NodeSetCache,
    pub sent_log: SentVerdictStore,
    pub notifier: Arc<dyn Notifier>,
    /// `None` skips the self-connectivity check
    pub connectivity: Option<ConnectivityGuard>,
}

struct AgentContext {
    node_id: u64,
    gateway: Arc<ChainGateway>,
    store: Arc<dyn MetricsStore>,
    prober: ConcurrentProber,
    node_set: NodeSetCache,
    sent_log: SentVerdictStore,
    verdicts: VerdictBuilder,
    notifier: Arc<dyn Notifier>,
    connectivity: Option<ConnectivityGuard>,
    /// Current peer set. Only the monitor cycle replaces it.
    peers: RwLock<Arc<NodeSetRecord>>,
}

/// Monitoring agent for one node
#[derive(Clone)]
pub struct Agent {
    inner: Arc<AgentContext>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MonitorOutcome {
    NoPeers,
    /// This node has no connectivity itself; nothing was probed
    SelfOffline,
    Probed { peers: usize, saved: usize },
}

#[derive(Debug, Clone, PartialEq)]
pub enum ReportOutcome {
    NoPeers,
    NothingDue,
    NoVerdicts,
    AlreadyReported,
    Submitted { tx_hash: Option<String>, verdicts: Vec<Verdict> },
}

impl Agent {
    /// Create the agent, seeding the peer set from the on-disk cache.
    pub fn new(node_id: u64, components: AgentComponents) -> Self {
        let cached = match components.node_set.load() {
            Ok(record) => record.unwrap_or_default(),
            Err(e) => {
                warn!(error = %e, "ignoring unreadable node set cache");
                NodeSetRecord::default()
            }
        };
        info!(node_id, cached_peers = cached.peers.len(), "agent created");

        let verdicts = VerdictBuilder::new(Arc::clone(&components.store));
        let inner = AgentContext {
            node_id,
            gateway: components.gateway,
            store: components.store,
            prober: components.prober,
            node_set: components.node_set,
            sent_log: components.sent_log,
            verdicts,
            notifier: components.notifier,
            connectivity: components.connectivity,
            peers: RwLock::new(Arc::new(cached)),
        };

        Self { inner: Arc::new(inner) }
    }

    pub fn node_id(&self) -> u64 {
        self.inner.node_id
    }

    /// Snapshot of the current peer set
    pub async fn peers(&self) -> Arc<NodeSetRecord> {
        Arc::clone(&*self.inner.peers.read().await)
    }

    async fn refresh_peers(&self) -> Result<()> {
        let ctx = &self.inner;
        let own = ctx.gateway.node(ctx.node_id).await.context("cannot read own node record")?;
        let record = ctx.node_set.get_or_refresh(&ctx.gateway, own.last_reward_timestamp).await?;
        *ctx.peers.write().await = Arc::new(record);
        Ok(())
    }

    /// Probe every peer in the current set once and store the samples.
    pub async fn monitor_cycle(&self) -> Result<MonitorOutcome> {
        let ctx = &self.inner;

        if let Err(e) = self.refresh_peers().await {
            warn!(error = ?e, "cannot refresh peer set, monitoring peers from previous list");
        }

        let snapshot = self.peers().await;
        if snapshot.peers.is_empty() {
            info!("no peers to monitor");
            return Ok(MonitorOutcome::NoPeers);
        }
        info!(epoch = snapshot.epoch_marker, peers = ?peer_ids(&snapshot.peers), "monitoring peers");

        if let Some(guard) = &ctx.connectivity {
            if !guard.is_online().await {
                error!("this node has no connectivity, skipping monitoring round");
                return Ok(MonitorOutcome::SelfOffline);
            }
        }

        let samples = ctx.prober.probe_all(&snapshot.peers).await;
        let mut saved = 0;
        for sample in &samples {
            match ctx.store.save(sample).await {
                Ok(()) => saved += 1,
                Err(e) => warn!(peer_id = sample.peer_id, error = ?e, "cannot save metrics"),
            }
        }

        Ok(MonitorOutcome::Probed { peers: snapshot.peers.len(), saved })
    }

    /// Submit verdicts for every peer whose report date has passed.
    pub async fn report_cycle(&self) -> Result<ReportOutcome> {
        let ctx = &self.inner;

        let snapshot = self.peers().await;
        if snapshot.peers.is_empty() {
            info!("no peers to report on");
            return Ok(ReportOutcome::NoPeers);
        }

        let ledger_time = ctx.gateway.current_ledger_time().await.context("cannot read ledger time")?;
        info!(ledger_time = %display_timestamp(ledger_time), "checking report dates");

        let mut due = Vec::new();
        for peer in &snapshot.peers {
            let node = match ctx.gateway.node(peer.id).await {
                Ok(node) => node,
                Err(e) => {
                    warn!(peer_id = peer.id, error = %e, "cannot read report date, skipping peer");
                    continue;
                }
            };
            if DuePeer::is_due(node.report_date, ledger_time) {
                due.push(DuePeer { peer_id: peer.id, report_date: node.report_date });
            }
        }

        if due.is_empty() {
            info!("no peers due for a report");
            return Ok(ReportOutcome::NothingDue);
        }
        info!(due = due.len(), "peers due for a report");

        let reward_period = ctx.gateway.reward_period().await.context("cannot read reward period")?;
        let verdicts = ctx.verdicts.build(ctx.node_id, &due, reward_period).await;
        if verdicts.is_empty() {
            warn!("no verdicts could be built for the due peers");
            return Ok(ReportOutcome::NoVerdicts);
        }

        let epoch_key = snapshot.epoch_marker;
        let unsent = ctx
            .sent_log
            .filter_unsent(epoch_key, verdicts)
            .context("cannot read sent verdict log")?;
        if unsent.is_empty() {
            info!(epoch = epoch_key, "all verdicts already sent this epoch");
            return Ok(ReportOutcome::AlreadyReported);
        }

        match ctx.gateway.submit_verdicts(ctx.node_id, &unsent).await {
            Ok(receipt) => {
                info!(tx_hash = ?receipt.tx_hash, verdicts = unsent.len(), "report sent");
                if let Err(e) = ctx.sent_log.record_sent(epoch_key, &unsent) {
                    error!(error = %e, "report committed but sent verdict log not updated");
                    let message = format!(
                        "node {}: report {} committed but the sent verdict log was not updated: {}",
                        ctx.node_id,
                        receipt.tx_hash.as_deref().unwrap_or("<no hash>"),
                        e
                    );
                    notify_operator(ctx.notifier.as_ref(), "Sent log not updated", &message).await;
                }
                self.save_report_events(receipt.tx_hash.as_deref(), &unsent).await;
                Ok(ReportOutcome::Submitted { tx_hash: receipt.tx_hash, verdicts: unsent })
            }
            Err(e @ GatewayError::Commit(_)) => {
                let message = format!("node {}: {} verdicts not committed: {}", ctx.node_id, unsent.len(), e);
                notify_operator(ctx.notifier.as_ref(), "Report failed", &message).await;
                Err(e).context("verdict transaction failed")
            }
            Err(e) => Err(e).context("verdict dry run failed, nothing sent"),
        }
    }

    async fn save_report_events(&self, tx_hash: Option<&str>, verdicts: &[Verdict]) {
        let ctx = &self.inner;
        let reported_at = now_timestamp();

        for verdict in verdicts {
            let event = ReportEvent {
                tx_hash: tx_hash.map(str::to_string),
                owner_id: ctx.node_id,
                peer_id: verdict.peer_id,
                downtime_count: verdict.downtime_count,
                mean_latency: verdict.mean_latency,
                reported_at,
            };
            if let Err(e) = ctx.store.save_report_event(&event).await {
                warn!(peer_id = verdict.peer_id, error = ?e, "failed to save report event");
            }
        }
    }
}

fn peer_ids(peers: &[MonitoredPeer]) -> Vec<u64> {
    peers.iter().map(|p| p.id).collect()
}

/// Scheduler adapter for the monitor cycle
pub struct MonitorJob(pub Agent);

/// Scheduler adapter for the report cycle
pub struct ReportJob(pub Agent);

#[async_trait]
impl Job for MonitorJob {
    fn name(&self) -> &'static str {
        "monitor"
    }

    async fn run(&self) -> Result<()> {
        let outcome = self.0.monitor_cycle().await?;
        info!(?outcome, "monitor cycle done");
        Ok(())
    }
}

#[async_trait]
impl Job for ReportJob {
    fn name(&self) -> &'static str {
        "report"
    }

    async fn run(&self) -> Result<()> {
        let outcome = self.0.report_cycle().await?;
        info!(?outcome, "report cycle done");
        Ok(())
    }
}
