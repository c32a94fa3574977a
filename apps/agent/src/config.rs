use std::time::Duration;
use std::{env, fmt, fs, path};

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;
use crate::gateway::RetryPolicy;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub agent: AgentSection,
    pub schedule: ScheduleSection,
    pub probe: ProbeSection,
    pub ledger: LedgerSection,
    pub notifier: NotifierSection,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AgentSection {
    /// JSON file holding `{"nodeId": <id>}`
    pub identity_path: path::PathBuf,
    /// Directory for the node-set cache and sent-verdict log
    pub state_dir: path::PathBuf,
    pub database_path: path::PathBuf,
    /// Upper bound on the number of peers watched per epoch
    pub max_peers: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ScheduleSection {
    pub monitor_period_secs: u64,
    pub report_period_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ProbeSection {
    pub timeout_secs: u64,
    pub max_workers: usize,
    pub reachability_port: u16,
    pub reachability_attempts: u32,
    pub reachability_timeout_ms: u64,
    pub liveness_port: u16,
    pub liveness_path: String,
    pub liveness_timeout_secs: u64,
    /// Container whose health status is also checked, not only its run state
    pub liveness_admin_container: String,
    /// JSON-RPC service ports every peer is expected to answer on; empty skips the check
    pub dependent_service_ports: Vec<u16>,
    pub dependent_service_timeout_secs: u64,
    /// host:port used to confirm this node's own connectivity; empty disables the guard
    pub connectivity_target: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LedgerSection {
    pub endpoint: String,
    pub request_timeout_secs: u64,
    pub read_retry: RetrySection,
    pub simulate_retry: RetrySection,
    pub commit_retry: RetrySection,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct RetrySection {
    pub attempts: u32,
    pub backoff_secs: u64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct NotifierSection {
    pub url: Option<String>,
}

impl Default for AgentSection {
    fn default() -> Self {
        Self {
            identity_path: "/var/lib/peerwatch/node_config.json".into(),
            state_dir: "/var/lib/peerwatch".into(),
            database_path: "/var/lib/peerwatch/metrics.db".into(),
            max_peers: 24,
        }
    }
}

impl Default for ScheduleSection {
    fn default() -> Self {
        Self { monitor_period_secs: 3600, report_period_secs: 900 }
    }
}

impl Default for ProbeSection {
    fn default() -> Self {
        Self {
            timeout_secs: 55,
            max_workers: 16,
            reachability_port: 3009,
            reachability_attempts: 3,
            reachability_timeout_ms: 1000,
            liveness_port: 3009,
            liveness_path: "status/core".into(),
            liveness_timeout_secs: 15,
            liveness_admin_container: "skale_admin".into(),
            dependent_service_ports: Vec::new(),
            dependent_service_timeout_secs: 10,
            connectivity_target: "8.8.8.8:53".into(),
        }
    }
}

impl Default for LedgerSection {
    fn default() -> Self {
        Self {
            endpoint: "http://127.0.0.1:3008/rpc".into(),
            request_timeout_secs: 30,
            read_retry: RetrySection { attempts: 10, backoff_secs: 2 },
            simulate_retry: RetrySection { attempts: 6, backoff_secs: 5 },
            commit_retry: RetrySection { attempts: 3, backoff_secs: 20 },
        }
    }
}

impl RetrySection {
    pub fn policy(self) -> RetryPolicy {
        RetryPolicy::new(self.attempts, Duration::from_secs(self.backoff_secs))
    }
}

impl ScheduleSection {
    pub fn monitor_period(&self) -> Duration {
        Duration::from_secs(self.monitor_period_secs)
    }

    pub fn report_period(&self) -> Duration {
        Duration::from_secs(self.report_period_secs)
    }
}

impl AgentSection {
    pub fn node_set_cache_path(&self) -> path::PathBuf {
        self.state_dir.join("node_set_cache.json")
    }

    pub fn sent_verdict_log_path(&self) -> path::PathBuf {
        self.state_dir.join("sent_verdicts.json")
    }
}

/// Used to ensure we are actually reading a toml file
fn normalize_toml_path(path: &path::Path) -> path::PathBuf {
    let mut path = path.to_path_buf();
    if path.extension().map(|ext| ext != "toml").unwrap_or(true) {
        path.set_extension("toml");
    }
    path
}

/// Get default config path ($XDG_CONFIG_HOME/peerwatch/config.toml or
/// $HOME/.config/...)
fn default_config_path() -> Result<path::PathBuf, ConfigError> {
    let path = if let Ok(config_home) = env::var("XDG_CONFIG_HOME") {
        path::PathBuf::from(config_home)
    } else if let Ok(home) = env::var("HOME") {
        path::PathBuf::from(home).join(".config")
    } else {
        return Err(ConfigError::ConfigPathUnavailable);
    };

    Ok(path.join("peerwatch/config.toml"))
}

impl fmt::Display for Config {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let write_1 = |f: &mut fmt::Formatter<'_>, label: &str, value: &dyn fmt::Display| {
            writeln!(f, "    {}: {}", label, value)
        };

        writeln!(f, "Current Agent Configuration:")?;
        writeln!(f, "  Agent")?;
        write_1(f, "Identity File", &self.agent.identity_path.display())?;
        write_1(f, "State Directory", &self.agent.state_dir.display())?;
        write_1(f, "Database", &self.agent.database_path.display())?;
        write_1(f, "Max Peers", &self.agent.max_peers)?;
        writeln!(f, "  Schedule")?;
        write_1(f, "Monitor Period (s)", &self.schedule.monitor_period_secs)?;
        write_1(f, "Report Period (s)", &self.schedule.report_period_secs)?;
        writeln!(f, "  Probe")?;
        write_1(f, "Timeout (s)", &self.probe.timeout_secs)?;
        write_1(f, "Max Workers", &self.probe.max_workers)?;
        write_1(f, "Reachability Port", &self.probe.reachability_port)?;
        write_1(f, "Liveness Endpoint", &format!(":{}/{}", self.probe.liveness_port, self.probe.liveness_path))?;
        write_1(f, "Dependent Service Ports", &format!("{:?}", self.probe.dependent_service_ports))?;
        write_1(f, "Connectivity Target", &self.probe.connectivity_target)?;
        writeln!(f, "  Ledger")?;
        write_1(f, "Endpoint", &self.ledger.endpoint)?;
        for (label, retry) in [
            ("Read Retry", self.ledger.read_retry),
            ("Simulate Retry", self.ledger.simulate_retry),
            ("Commit Retry", self.ledger.commit_retry),
        ] {
            write_1(f, label, &format!("{} x {}s", retry.attempts, retry.backoff_secs))?;
        }
        writeln!(f, "  Notifier")?;
        write_1(f, "URL", &self.notifier.url.as_deref().unwrap_or("<log only>"))?;

        Ok(())
    }
}

impl Config {
    /// Load the config from a file, writing the defaults there first when the
    /// file does not exist yet.
    pub fn from_config(optional_path: Option<impl AsRef<path::Path>>) -> Result<Self, ConfigError> {
        let config_path: path::PathBuf = if let Some(path) = optional_path {
            normalize_toml_path(path.as_ref())
        } else {
            default_config_path()?
        };

        if config_path.exists() {
            let raw_string = fs::read_to_string(&config_path)
                .map_err(|source| ConfigError::ReadFailed { path: config_path.clone(), source })?;
            Ok(toml::from_str(raw_string.as_str())?)
        } else {
            let config = Self::default();
            config.write_config(&config_path)?;
            Ok(config)
        }
    }

    /// Serialize and write a config to a file
    pub fn write_config(&self, path: &path::Path) -> Result<(), ConfigError> {
        let config_str: String = toml::to_string_pretty(self)?;

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .map_err(|source| ConfigError::WriteFailed { path: parent.to_path_buf(), source })?;
        }

        fs::write(path, config_str)
            .map_err(|source| ConfigError::WriteFailed { path: path.to_path_buf(), source })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_missing_config_is_created_with_defaults() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("nested/agent");

        let config = Config::from_config(Some(&path)).unwrap();
        assert_eq!(config.schedule.monitor_period_secs, 3600);
        assert!(dir.path().join("nested/agent.toml").exists());
    }

    #[test]
    fn test_partial_config_fills_defaults() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("config.toml");
        fs::write(&path, "[schedule]\nreport_period_secs = 60\n\n[agent]\nmax_peers = 3\n").unwrap();

        let config = Config::from_config(Some(&path)).unwrap();
        assert_eq!(config.schedule.report_period_secs, 60);
        assert_eq!(config.schedule.monitor_period_secs, 3600);
        assert_eq!(config.agent.max_peers, 3);
        assert_eq!(config.ledger.commit_retry.attempts, 3);
        assert!(config.probe.dependent_service_ports.is_empty());
    }

    #[test]
    fn test_dependent_service_ports_are_read() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("config.toml");
        fs::write(&path, "[probe]\ndependent_service_ports = [10003, 10011]\n").unwrap();

        let config = Config::from_config(Some(&path)).unwrap();
        assert_eq!(config.probe.dependent_service_ports, vec![10003, 10011]);
        assert_eq!(config.probe.dependent_service_timeout_secs, 10);
    }

    #[test]
    fn test_malformed_config_is_rejected() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("config.toml");
        fs::write(&path, "[schedule\nbroken").unwrap();

        assert!(matches!(Config::from_config(Some(&path)), Err(ConfigError::ParseFailed(_))));
    }

    #[test]
    fn test_retry_budgets_are_asymmetric() {
        let ledger = LedgerSection::default();
        let simulate = ledger.simulate_retry.policy();
        let commit = ledger.commit_retry.policy();
        assert!(commit.max_attempts < simulate.max_attempts);
        assert!(commit.backoff > simulate.backoff);
    }
}
