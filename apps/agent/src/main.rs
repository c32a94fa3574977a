use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use tokio::sync::watch;
use tracing::info;

use peerwatch::config::Config;
use peerwatch::database::LibsqlMetricsStore;
use peerwatch::gateway::{ChainGateway, GatewayPolicies, JsonRpcLedger};
use peerwatch::identity::{ensure_registered, resolve_node_id};
use peerwatch::monitoring::{
    ConcurrentProber, ConnectivityGuard, DependentServiceProbe, HttpWatchdogProbe, LivenessProbe, MonitoringExecutor, TcpReachability,
};
use peerwatch::nodeset::NodeSetCache;
use peerwatch::notifier::{HttpNotifier, LogNotifier, Notifier, notify_operator};
use peerwatch::orchestrator::{Agent, AgentComponents, MonitorJob, ReportJob};
use peerwatch::scheduler::JobScheduler;
use peerwatch::verdict::SentVerdictStore;

#[derive(Parser)]
#[command(name = "peerwatch")]
#[command(about = "Watches a sample of peer nodes and reports their uptime to the ledger")]
#[command(version)]
struct Cli {
    /// Node id to run as; overrides the identity file
    node_id: Option<u64>,

    /// Path to the TOML configuration file
    #[arg(short, long, env = "PEERWATCH_CONFIG")]
    config: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<()> {
    logger::init();
    let cli = Cli::parse();

    let config = Config::from_config(cli.config.as_ref()).context("cannot load configuration")?;
    info!("\n{config}");

    let node_id = match resolve_node_id(cli.node_id, &config.agent.identity_path) {
        Ok(id) => id,
        Err(e) => {
            notify_operator(&LogNotifier, "Agent failed to start", &e.to_string()).await;
            return Err(e).context("cannot determine node id");
        }
    };

    let notifier = build_notifier(&config, node_id)?;
    let agent = match build_agent(&config, node_id, Arc::clone(&notifier)).await {
        Ok(agent) => agent,
        Err(e) => {
            notify_operator(notifier.as_ref(), "Agent failed to start", &format!("node {node_id}: {e:#}")).await;
            return Err(e);
        }
    };

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(async move {
        wait_for_signal().await;
        info!("shutdown signal received");
        let _ = shutdown_tx.send(true);
    });

    JobScheduler::new()
        .every(config.schedule.monitor_period(), Arc::new(MonitorJob(agent.clone())))
        .every(config.schedule.report_period(), Arc::new(ReportJob(agent)))
        .run(shutdown_rx)
        .await;

    info!("agent stopped");
    Ok(())
}

fn build_notifier(config: &Config, node_id: u64) -> Result<Arc<dyn Notifier>> {
    Ok(match config.notifier.url.as_deref() {
        Some(url) if !url.is_empty() => Arc::new(HttpNotifier::new(url, node_id)?),
        _ => Arc::new(LogNotifier),
    })
}

async fn build_agent(config: &Config, node_id: u64, notifier: Arc<dyn Notifier>) -> Result<Agent> {
    let ledger = JsonRpcLedger::new(&config.ledger.endpoint, Duration::from_secs(config.ledger.request_timeout_secs))?;
    let gateway = Arc::new(ChainGateway::new(Arc::new(ledger), GatewayPolicies::from(&config.ledger)));

    ensure_registered(&gateway, node_id).await?;

    let store = LibsqlMetricsStore::connect(&config.agent.database_path)
        .await
        .with_context(|| format!("cannot open metrics database {}", config.agent.database_path.display()))?;

    let probe = &config.probe;
    let reachability = Arc::new(TcpReachability::new(
        probe.reachability_port,
        probe.reachability_attempts,
        Duration::from_millis(probe.reachability_timeout_ms),
    ));
    let watchdog: Arc<dyn LivenessProbe> = Arc::new(HttpWatchdogProbe::new(
        probe.liveness_port,
        &probe.liveness_path,
        &probe.liveness_admin_container,
        probe.liveness_timeout_secs,
    )?);
    let dependent_services: Arc<dyn LivenessProbe> = Arc::new(DependentServiceProbe::new(
        &probe.dependent_service_ports,
        probe.dependent_service_timeout_secs,
    )?);
    let executor = MonitoringExecutor::new(node_id, reachability, vec![watchdog, dependent_services]);

    let components = AgentComponents {
        gateway,
        store: Arc::new(store),
        prober: ConcurrentProber::new(Arc::new(executor), probe.max_workers, Duration::from_secs(probe.timeout_secs)),
        node_set: NodeSetCache::new(config.agent.node_set_cache_path(), node_id, config.agent.max_peers),
        sent_log: SentVerdictStore::new(config.agent.sent_verdict_log_path()),
        notifier,
        connectivity: connectivity_guard(config)?,
    };

    Ok(Agent::new(node_id, components))
}

fn connectivity_guard(config: &Config) -> Result<Option<ConnectivityGuard>> {
    let target = config.probe.connectivity_target.trim();
    if target.is_empty() {
        return Ok(None);
    }

    let (host, port) = target
        .rsplit_once(':')
        .with_context(|| format!("connectivity target {target} must be host:port"))?;
    let port: u16 = port.parse().with_context(|| format!("invalid port in connectivity target {target}"))?;

    let probe = TcpReachability::new(
        port,
        config.probe.reachability_attempts,
        Duration::from_millis(config.probe.reachability_timeout_ms),
    );
    Ok(Some(ConnectivityGuard::new(Arc::new(probe), host)))
}

async fn wait_for_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{SignalKind, signal};
        match signal(SignalKind::terminate()) {
            Ok(mut term) => {
                tokio::select! {
                    _ = tokio::signal::ctrl_c() => {}
                    _ = term.recv() => {}
                }
                return;
            }
            Err(e) => tracing::warn!(error = %e, "cannot listen for SIGTERM"),
        }
    }

    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "cannot listen for ctrl-c, running until killed");
        std::future::pending::<()>().await;
    }
}
