//! Hand-written stubs shared by the unit tests.

use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::sync::atomic::{AtomicBool, AtomicI64, AtomicU32, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tempfile::TempDir;

use crate::Timestamp;
use crate::database::LibsqlMetricsStore;
use crate::error::GatewayError;
use crate::gateway::{GatewayPolicies, Ledger, NodeInfo, RetryPolicy, TxReceipt};
use crate::monitoring::checker::{LivenessProbe, ReachabilityProbe};
use crate::monitoring::types::Reachability;
use crate::nodeset::MonitoredPeer;
use crate::notifier::Notifier;
use crate::verdict::Verdict;

/// Protocol attempt budgets without the waiting
pub fn instant_policies() -> GatewayPolicies {
    GatewayPolicies {
        read: RetryPolicy::new(10, Duration::ZERO),
        simulate: RetryPolicy::new(6, Duration::ZERO),
        commit: RetryPolicy::new(3, Duration::ZERO),
    }
}

pub async fn temp_store() -> (TempDir, Arc<LibsqlMetricsStore>) {
    let dir = tempfile::tempdir().unwrap();
    let store = LibsqlMetricsStore::connect(&dir.path().join("metrics.db")).await.unwrap();
    (dir, Arc::new(store))
}

/// Consume one scheduled failure. `u32::MAX` fails forever.
fn take_failure(counter: &AtomicU32) -> bool {
    counter
        .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |left| match left {
            0 => None,
            u32::MAX => Some(u32::MAX),
            n => Some(n - 1),
        })
        .is_ok()
}

/// In-memory ledger with call counters and scripted failures
pub struct StubLedger {
    pub nodes: Mutex<BTreeMap<u64, NodeInfo>>,
    pub ledger_time: AtomicI64,
    pub reward_period: AtomicI64,

    pub reads: AtomicU32,
    pub simulations: AtomicU32,
    pub commits: AtomicU32,

    pub fail_reads: AtomicU32,
    pub fail_simulations: AtomicU32,
    pub fail_commits: AtomicU32,
    pub reject_simulation: AtomicBool,
    pub commit_succeeds: AtomicBool,
    /// Listed as active, but every read of their record fails
    pub unreadable: Mutex<BTreeSet<u64>>,

    pub committed: Mutex<Vec<Vec<Verdict>>>,
}

impl StubLedger {
    pub fn new() -> Self {
        Self {
            nodes: Mutex::new(BTreeMap::new()),
            ledger_time: AtomicI64::new(0),
            reward_period: AtomicI64::new(0),
            reads: AtomicU32::new(0),
            simulations: AtomicU32::new(0),
            commits: AtomicU32::new(0),
            fail_reads: AtomicU32::new(0),
            fail_simulations: AtomicU32::new(0),
            fail_commits: AtomicU32::new(0),
            reject_simulation: AtomicBool::new(false),
            commit_succeeds: AtomicBool::new(true),
            unreadable: Mutex::new(BTreeSet::new()),
            committed: Mutex::new(Vec::new()),
        }
    }

    pub fn with_node(self, id: u64, address: &str, last_reward: Timestamp, report_date: Timestamp) -> Self {
        self.set_node(id, address, last_reward, report_date);
        self
    }

    pub fn set_node(&self, id: u64, address: &str, last_reward: Timestamp, report_date: Timestamp) {
        let info = NodeInfo { address: address.to_string(), last_reward_timestamp: last_reward, report_date };
        self.nodes.lock().unwrap().insert(id, info);
    }

    pub fn with_clock(self, ledger_time: Timestamp, reward_period: i64) -> Self {
        self.ledger_time.store(ledger_time, Ordering::SeqCst);
        self.reward_period.store(reward_period, Ordering::SeqCst);
        self
    }

    pub fn make_unreadable(&self, id: u64) {
        self.unreadable.lock().unwrap().insert(id);
    }

    pub fn committed_batches(&self) -> Vec<Vec<Verdict>> {
        self.committed.lock().unwrap().clone()
    }

    fn read(&self) -> Result<(), GatewayError> {
        self.reads.fetch_add(1, Ordering::SeqCst);
        if take_failure(&self.fail_reads) {
            return Err(GatewayError::Rpc("connection refused".into()));
        }
        Ok(())
    }
}

#[async_trait]
impl Ledger for StubLedger {
    async fn active_node_ids(&self) -> Result<BTreeSet<u64>, GatewayError> {
        self.read()?;
        Ok(self.nodes.lock().unwrap().keys().copied().collect())
    }

    async fn node(&self, id: u64) -> Result<NodeInfo, GatewayError> {
        self.read()?;
        if self.unreadable.lock().unwrap().contains(&id) {
            return Err(GatewayError::Rpc(format!("node {id} record unavailable")));
        }
        self.nodes
            .lock()
            .unwrap()
            .get(&id)
            .cloned()
            .ok_or_else(|| GatewayError::Decode(format!("unknown node {id}")))
    }

    async fn reward_period(&self) -> Result<i64, GatewayError> {
        self.read()?;
        Ok(self.reward_period.load(Ordering::SeqCst))
    }

    async fn current_ledger_time(&self) -> Result<Timestamp, GatewayError> {
        self.read()?;
        Ok(self.ledger_time.load(Ordering::SeqCst))
    }

    async fn submit_verdicts(
        &self,
        _owner_id: u64,
        verdicts: &[Verdict],
        dry_run: bool,
    ) -> Result<TxReceipt, GatewayError> {
        if dry_run {
            self.simulations.fetch_add(1, Ordering::SeqCst);
            if take_failure(&self.fail_simulations) {
                return Err(GatewayError::Rpc("estimate failed".into()));
            }
            let success = !self.reject_simulation.load(Ordering::SeqCst);
            return Ok(TxReceipt { success, tx_hash: None, raw: serde_json::json!({ "dryRun": true }) });
        }

        let attempt = self.commits.fetch_add(1, Ordering::SeqCst) + 1;
        if take_failure(&self.fail_commits) {
            return Err(GatewayError::Rpc("timeout waiting for receipt".into()));
        }
        self.committed.lock().unwrap().push(verdicts.to_vec());
        Ok(TxReceipt {
            success: self.commit_succeeds.load(Ordering::SeqCst),
            tx_hash: Some(format!("0x{attempt:04x}")),
            raw: serde_json::Value::Null,
        })
    }
}

/// Tracks how many probes run at once
#[derive(Default)]
pub struct Gauge {
    active: AtomicUsize,
    peak: AtomicUsize,
}

impl Gauge {
    pub fn peak(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }

    fn enter(self: &Arc<Self>) -> GaugeGuard {
        let now = self.active.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);
        GaugeGuard(Arc::clone(self))
    }
}

struct GaugeGuard(Arc<Gauge>);

impl Drop for GaugeGuard {
    fn drop(&mut self) {
        self.0.active.fetch_sub(1, Ordering::SeqCst);
    }
}

/// Reachability probe answering from a script keyed by host
pub struct StubReachability {
    answer: Reachability,
    offline: HashSet<String>,
    hang: HashSet<String>,
    fail: HashSet<String>,
    panic: HashSet<String>,
    delay: Duration,
    gauge: Arc<Gauge>,
    pub calls: AtomicU32,
}

impl StubReachability {
    fn with_answer(answer: Reachability) -> Self {
        Self {
            answer,
            offline: HashSet::new(),
            hang: HashSet::new(),
            fail: HashSet::new(),
            panic: HashSet::new(),
            delay: Duration::ZERO,
            gauge: Arc::default(),
            calls: AtomicU32::new(0),
        }
    }

    pub fn online(latency_ms: i64) -> Self {
        Self::with_answer(Reachability::reachable(latency_ms))
    }

    pub fn offline() -> Self {
        Self::with_answer(Reachability::unreachable())
    }

    pub fn offline_on(mut self, host: &str) -> Self {
        self.offline.insert(host.to_string());
        self
    }

    pub fn hang_on(mut self, host: &str) -> Self {
        self.hang.insert(host.to_string());
        self
    }

    pub fn fail_on(mut self, host: &str) -> Self {
        self.fail.insert(host.to_string());
        self
    }

    pub fn panic_on(mut self, host: &str) -> Self {
        self.panic.insert(host.to_string());
        self
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn gauge(&self) -> Arc<Gauge> {
        Arc::clone(&self.gauge)
    }
}

#[async_trait]
impl ReachabilityProbe for StubReachability {
    async fn probe(&self, host: &str) -> anyhow::Result<Reachability> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let _guard = self.gauge.enter();

        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        if self.hang.contains(host) {
            std::future::pending::<()>().await;
        }
        if self.panic.contains(host) {
            panic!("probe of {host} panicked");
        }
        if self.fail.contains(host) {
            anyhow::bail!("no route to {host}");
        }
        if self.offline.contains(host) {
            return Ok(Reachability::unreachable());
        }
        Ok(self.answer)
    }
}

enum LivenessAnswer {
    Healthy,
    Unhealthy,
    Error,
}

pub struct StubLiveness {
    answer: LivenessAnswer,
    pub calls: AtomicU32,
}

impl StubLiveness {
    fn answering(answer: LivenessAnswer) -> Self {
        Self { answer, calls: AtomicU32::new(0) }
    }

    pub fn healthy() -> Self {
        Self::answering(LivenessAnswer::Healthy)
    }

    pub fn unhealthy() -> Self {
        Self::answering(LivenessAnswer::Unhealthy)
    }

    pub fn erroring() -> Self {
        Self::answering(LivenessAnswer::Error)
    }
}

#[async_trait]
impl LivenessProbe for StubLiveness {
    fn name(&self) -> &str {
        "stub"
    }

    async fn check(&self, _peer: &MonitoredPeer) -> anyhow::Result<bool> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        match self.answer {
            LivenessAnswer::Healthy => Ok(true),
            LivenessAnswer::Unhealthy => Ok(false),
            LivenessAnswer::Error => anyhow::bail!("status endpoint returned garbage"),
        }
    }
}

#[derive(Default)]
pub struct RecordingNotifier {
    sent: Mutex<Vec<(String, String)>>,
}

impl RecordingNotifier {
    pub fn messages(&self) -> Vec<(String, String)> {
        self.sent.lock().unwrap().clone()
    }
}

#[async_trait]
impl Notifier for RecordingNotifier {
    async fn notify(&self, title: &str, message: &str) -> anyhow::Result<()> {
        self.sent.lock().unwrap().push((title.to_string(), message.to_string()));
        Ok(())
    }
}
