use anyhow::Result;
use serde_json::{Value, json};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::net::TcpStream;
use tokio::time::timeout;
use tracing::{debug, info};

use super::types::Reachability;
use crate::nodeset::MonitoredPeer;

/// Measures whether a host answers at all, and how fast
#[async_trait::async_trait]
pub trait ReachabilityProbe: Send + Sync {
    async fn probe(&self, host: &str) -> Result<Reachability>;
}

/// Checks that a reachable peer is also doing its job
#[async_trait::async_trait]
pub trait LivenessProbe: Send + Sync {
    fn name(&self) -> &str;

    /// `Ok(false)` means the peer answered but is not healthy
    async fn check(&self, peer: &MonitoredPeer) -> Result<bool>;
}

/// TCP connect probe repeated a few times against one port
pub struct TcpReachability {
    port: u16,
    attempts: u32,
    attempt_timeout: Duration,
    spacing: Duration,
}

impl TcpReachability {
    pub fn new(port: u16, attempts: u32, attempt_timeout: Duration) -> Self {
        Self { port, attempts: attempts.max(1), attempt_timeout, spacing: Duration::from_millis(200) }
    }

    async fn connect_once(&self, addr: &str) -> Option<Duration> {
        let start = Instant::now();
        match timeout(self.attempt_timeout, TcpStream::connect(addr)).await {
            Ok(Ok(_stream)) => Some(start.elapsed()),
            Ok(Err(e)) => {
                debug!(addr, error = %e, "tcp connect failed");
                None
            }
            Err(_) => {
                debug!(addr, "tcp connect timed out");
                None
            }
        }
    }
}

/// Offline when more than one attempt failed or none succeeded; otherwise
/// the latency is the mean of the successful attempts.
pub fn summarize_attempts(rtts: &[Option<Duration>]) -> Reachability {
    let successes: Vec<Duration> = rtts.iter().flatten().copied().collect();
    let failures = rtts.len() - successes.len();

    if successes.is_empty() || failures > 1 {
        return Reachability::unreachable();
    }

    let total: Duration = successes.iter().sum();
    let mean_ms = total.as_secs_f64() * 1000.0 / successes.len() as f64;
    Reachability::reachable(mean_ms.round() as i64)
}

#[async_trait::async_trait]
impl ReachabilityProbe for TcpReachability {
    async fn probe(&self, host: &str) -> Result<Reachability> {
        let addr = format!("{}:{}", host, self.port);
        let mut rtts = Vec::with_capacity(self.attempts as usize);

        for attempt in 0..self.attempts {
            if attempt > 0 {
                tokio::time::sleep(self.spacing).await;
            }
            rtts.push(self.connect_once(&addr).await);
        }

        let reachability = summarize_attempts(&rtts);
        if reachability.offline {
            info!(host, "no response from host");
        }
        Ok(reachability)
    }
}

/// Liveness check against the container watchdog a node exposes over HTTP
pub struct HttpWatchdogProbe {
    client: reqwest::Client,
    port: u16,
    path: String,
    admin_container: String,
}

impl HttpWatchdogProbe {
    pub fn new(port: u16, path: &str, admin_container: &str, timeout_seconds: u64) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(timeout_seconds))
            .build()?;

        Ok(Self {
            client,
            port,
            path: path.trim_start_matches('/').to_string(),
            admin_container: admin_container.to_string(),
        })
    }

    pub fn url_for(&self, host: &str) -> String {
        format!("http://{}:{}/{}", host, self.port, self.path)
    }
}

/// Judge a watchdog status document. The error carries the reason the node
/// is considered unhealthy.
pub fn evaluate_watchdog_report(body: &Value, admin_container: &str) -> Result<(), String> {
    if let Some(err) = body.get("error").filter(|e| !e.is_null()) {
        return Err(format!("watchdog reported error: {err}"));
    }

    let containers = match body.get("data") {
        None | Some(Value::Null) => return Err("no data in watchdog response".into()),
        Some(Value::Array(containers)) => containers,
        Some(other) => return Err(format!("unexpected watchdog data: {other}")),
    };

    for container in containers {
        let name = container.get("name").and_then(Value::as_str).unwrap_or("<unnamed>");
        let state = container.get("state");
        let flag = |key: &str| state.and_then(|s| s.get(key)).and_then(Value::as_bool);

        if flag("Running") != Some(true) {
            return Err(format!("{name} is not running"));
        }
        if flag("Paused") == Some(true) {
            return Err(format!("{name} is paused"));
        }
        let health = state
            .and_then(|s| s.pointer("/Health/Status"))
            .and_then(Value::as_str);
        if name == admin_container && health == Some("unhealthy") {
            return Err(format!("{name} is not healthy"));
        }
    }

    Ok(())
}

#[async_trait::async_trait]
impl LivenessProbe for HttpWatchdogProbe {
    fn name(&self) -> &str {
        "watchdog"
    }

    async fn check(&self, peer: &MonitoredPeer) -> Result<bool> {
        let url = self.url_for(&peer.address);

        let response = match self.client.get(&url).send().await {
            Ok(response) => response,
            Err(e) => {
                info!(peer_id = peer.id, url = %url, error = %e, "could not reach watchdog");
                return Ok(false);
            }
        };

        let status = response.status();
        if !status.is_success() {
            info!(peer_id = peer.id, url = %url, status = status.as_u16(), "watchdog request failed");
            return Ok(false);
        }

        let body: Value = match response.json().await {
            Ok(body) => body,
            Err(e) => {
                info!(peer_id = peer.id, url = %url, error = %e, "unreadable watchdog response");
                return Ok(false);
            }
        };

        match evaluate_watchdog_report(&body, &self.admin_container) {
            Ok(()) => Ok(true),
            Err(reason) => {
                info!(peer_id = peer.id, url = %url, reason = %reason, "peer containers unhealthy");
                Ok(false)
            }
        }
    }
}

/// Liveness check against the JSON-RPC services a node hosts.
///
/// Every configured port gets an `eth_blockNumber` call; the peer fails the
/// check as soon as one service errors or does not answer in time.
pub struct DependentServiceProbe {
    client: reqwest::Client,
    ports: Vec<u16>,
}

impl DependentServiceProbe {
    pub const METHOD: &'static str = "eth_blockNumber";

    pub fn new(ports: &[u16], timeout_seconds: u64) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(timeout_seconds))
            .build()?;

        Ok(Self { client, ports: ports.to_vec() })
    }

    pub fn url_for(host: &str, port: u16) -> String {
        format!("http://{host}:{port}")
    }

    async fn block_number(&self, url: &str) -> Result<Value> {
        let request = json!({ "jsonrpc": "2.0", "id": 1, "method": Self::METHOD, "params": [] });
        let response = self.client.post(url).json(&request).send().await?.error_for_status()?;
        let body: Value = response.json().await?;
        evaluate_block_number_response(&body).map_err(anyhow::Error::msg)
    }
}

/// Extract the block number from a JSON-RPC response, or the reason there
/// is none.
pub fn evaluate_block_number_response(body: &Value) -> Result<Value, String> {
    if let Some(err) = body.get("error").filter(|e| !e.is_null()) {
        return Err(format!("service returned error: {err}"));
    }
    match body.get("result") {
        None | Some(Value::Null) => Err("service response has no result".into()),
        Some(result) => Ok(result.clone()),
    }
}

#[async_trait::async_trait]
impl LivenessProbe for DependentServiceProbe {
    fn name(&self) -> &str {
        "dependent services"
    }

    async fn check(&self, peer: &MonitoredPeer) -> Result<bool> {
        for port in &self.ports {
            let url = Self::url_for(&peer.address, *port);
            match self.block_number(&url).await {
                Ok(block) => debug!(peer_id = peer.id, url = %url, block = %block, "service answered"),
                Err(e) => {
                    info!(peer_id = peer.id, url = %url, error = %e, "dependent service check failed");
                    return Ok(false);
                }
            }
        }
        Ok(true)
    }
}

/// Confirms this node's own connectivity before peers are blamed for
/// failed probes
pub struct ConnectivityGuard {
    probe: Arc<dyn ReachabilityProbe>,
    host: String,
}

impl ConnectivityGuard {
    pub fn new(probe: Arc<dyn ReachabilityProbe>, host: impl Into<String>) -> Self {
        Self { probe, host: host.into() }
    }

    pub async fn is_online(&self) -> bool {
        match self.probe.probe(&self.host).await {
            Ok(reachability) => !reachability.offline,
            Err(e) => {
                debug!(host = %self.host, error = %e, "connectivity probe errored");
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::StubReachability;
    use serde_json::json;

    const ADMIN: &str = "core_admin";

    fn container(name: &str, running: bool, paused: bool, health: &str) -> Value {
        json!({
            "name": name,
            "state": { "Running": running, "Paused": paused, "Health": { "Status": health } }
        })
    }

    #[test]
    fn test_all_attempts_succeed() {
        let rtts = [Some(Duration::from_millis(10)), Some(Duration::from_millis(20)), Some(Duration::from_millis(30))];
        assert_eq!(summarize_attempts(&rtts), Reachability::reachable(20));
    }

    #[test]
    fn test_single_loss_is_tolerated() {
        let rtts = [Some(Duration::from_millis(10)), None, Some(Duration::from_millis(30))];
        assert_eq!(summarize_attempts(&rtts), Reachability::reachable(20));
    }

    #[test]
    fn test_two_losses_mark_offline() {
        let rtts = [None, Some(Duration::from_millis(10)), None];
        assert_eq!(summarize_attempts(&rtts), Reachability::unreachable());
    }

    #[test]
    fn test_single_failed_attempt_is_offline() {
        assert_eq!(summarize_attempts(&[None]), Reachability::unreachable());
    }

    #[test]
    fn test_healthy_watchdog() {
        let body = json!({ "data": [container(ADMIN, true, false, "healthy"), container("api", true, false, "")] });
        assert!(evaluate_watchdog_report(&body, ADMIN).is_ok());
    }

    #[test]
    fn test_watchdog_error_field() {
        let body = json!({ "error": "docker unavailable", "data": [] });
        assert!(evaluate_watchdog_report(&body, ADMIN).is_err());
    }

    #[test]
    fn test_watchdog_missing_data() {
        assert!(evaluate_watchdog_report(&json!({ "error": null }), ADMIN).is_err());
    }

    #[test]
    fn test_stopped_container() {
        let body = json!({ "data": [container("api", false, false, "healthy")] });
        assert_eq!(evaluate_watchdog_report(&body, ADMIN).unwrap_err(), "api is not running");
    }

    #[test]
    fn test_paused_container() {
        let body = json!({ "data": [container("api", true, true, "healthy")] });
        assert_eq!(evaluate_watchdog_report(&body, ADMIN).unwrap_err(), "api is paused");
    }

    #[test]
    fn test_unhealthy_admin_container() {
        let body = json!({ "data": [container(ADMIN, true, false, "unhealthy")] });
        assert!(evaluate_watchdog_report(&body, ADMIN).is_err());
    }

    #[test]
    fn test_unhealthy_status_ignored_for_other_containers() {
        let body = json!({ "data": [container("api", true, false, "unhealthy")] });
        assert!(evaluate_watchdog_report(&body, ADMIN).is_ok());
    }

    #[test]
    fn test_watchdog_url() {
        let probe = HttpWatchdogProbe::new(3009, "/status/core", ADMIN, 1).unwrap();
        assert_eq!(probe.url_for("10.0.0.7"), "http://10.0.0.7:3009/status/core");
    }

    #[tokio::test]
    async fn test_unreachable_watchdog_fails_check() {
        let probe = HttpWatchdogProbe::new(1, "status/core", ADMIN, 1).unwrap();
        let peer = MonitoredPeer { id: 3, address: "127.0.0.1".into() };
        assert!(!probe.check(&peer).await.unwrap());
    }

    #[test]
    fn test_block_number_response() {
        assert_eq!(evaluate_block_number_response(&json!({ "result": "0x1b4" })), Ok(json!("0x1b4")));
        assert!(evaluate_block_number_response(&json!({ "result": null })).is_err());
        assert!(
            evaluate_block_number_response(&json!({ "error": { "code": -32601, "message": "nope" } })).is_err()
        );
    }

    #[tokio::test]
    async fn test_unreachable_dependent_service_fails_check() {
        let probe = DependentServiceProbe::new(&[1], 1).unwrap();
        let peer = MonitoredPeer { id: 3, address: "127.0.0.1".into() };
        assert!(!probe.check(&peer).await.unwrap());
    }

    #[tokio::test]
    async fn test_no_dependent_services_passes() {
        let probe = DependentServiceProbe::new(&[], 1).unwrap();
        let peer = MonitoredPeer { id: 3, address: "10.255.255.1".into() };
        assert!(probe.check(&peer).await.unwrap());
    }

    #[tokio::test]
    async fn test_answering_dependent_service_passes() {
        use tokio::io::{AsyncReadExt, AsyncWriteExt};

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut raw = Vec::new();
            let mut buf = [0u8; 1024];
            while !raw.ends_with(b"}") {
                let n = socket.read(&mut buf).await.unwrap();
                if n == 0 {
                    break;
                }
                raw.extend_from_slice(&buf[..n]);
            }
            let body = r#"{"jsonrpc":"2.0","id":1,"result":"0x10"}"#;
            let reply = format!(
                "HTTP/1.1 200 OK\r\ncontent-type: application/json\r\ncontent-length: {}\r\n\r\n{body}",
                body.len()
            );
            socket.write_all(reply.as_bytes()).await.unwrap();
        });

        let probe = DependentServiceProbe::new(&[port], 2).unwrap();
        let peer = MonitoredPeer { id: 3, address: "127.0.0.1".into() };
        assert!(probe.check(&peer).await.unwrap());
    }

    #[tokio::test]
    async fn test_connectivity_guard() {
        let online = ConnectivityGuard::new(Arc::new(StubReachability::online(5)), "8.8.8.8");
        assert!(online.is_online().await);

        let offline = ConnectivityGuard::new(Arc::new(StubReachability::offline()), "8.8.8.8");
        assert!(!offline.is_online().await);
    }

    #[tokio::test]
    async fn test_tcp_probe_of_local_listener() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        tokio::spawn(async move {
            while let Ok((_socket, _)) = listener.accept().await {}
        });

        let probe = TcpReachability::new(port, 3, Duration::from_secs(1));
        let reachability = probe.probe("127.0.0.1").await.unwrap();
        assert!(!reachability.offline);
        assert!(reachability.latency_ms >= 0);
    }
}
