/// Monitoring engine - probes peers and produces metric samples
///
/// This module is responsible for:
/// - Reachability and liveness probes behind narrow traits
/// - Turning one probe of one peer into a `MetricSample`
/// - Fanning probes out over the peer set with bounded concurrency
pub mod checker;
pub mod executor;
pub mod prober;
pub mod types;

pub use checker::{
    ConnectivityGuard, DependentServiceProbe, HttpWatchdogProbe, LivenessProbe, ReachabilityProbe, TcpReachability,
};
pub use executor::MonitoringExecutor;
pub use prober::ConcurrentProber;
pub use types::{MetricSample, Reachability};
