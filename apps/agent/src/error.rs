use std::io::Error as IoError;
use std::path::PathBuf;

use thiserror::Error;

/// Errors raised while loading or writing the agent configuration file.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config {path}: {source}")]
    ReadFailed { path: PathBuf, source: IoError },
    #[error("failed to write config {path}: {source}")]
    WriteFailed { path: PathBuf, source: IoError },
    #[error("malformed config: {0}")]
    ParseFailed(#[from] toml::de::Error),
    #[error("cannot serialize config: {0}")]
    SerializeFailed(#[from] toml::ser::Error),
    #[error("no config directory available (set XDG_CONFIG_HOME or HOME)")]
    ConfigPathUnavailable,
}

/// Errors raised while establishing the agent's own node identity.
#[derive(Debug, Error)]
pub enum IdentityError {
    #[error("cannot read identity file {path}: {source}")]
    Read { path: PathBuf, source: IoError },
    #[error("malformed identity file {path}: {source}")]
    Malformed { path: PathBuf, source: serde_json::Error },
    #[error("node {0} is not registered in the active node set")]
    NotRegistered(u64),
}

/// Errors raised by the JSON state files (node-set cache, sent-verdict log).
#[derive(Debug, Error)]
pub enum PersistError {
    #[error("{path}: {source}")]
    Io { path: PathBuf, source: IoError },
    #[error("{path}: {source}")]
    Json { path: PathBuf, source: serde_json::Error },
}

/// Errors surfaced by ledger interactions.
#[derive(Debug, Error)]
pub enum GatewayError {
    /// Transport or remote failure reported by the ledger client.
    #[error("ledger call failed: {0}")]
    Rpc(String),
    /// The ledger answered with something that could not be decoded.
    #[error("unexpected ledger response: {0}")]
    Decode(String),
    /// A dry run completed but reported the call would not succeed.
    #[error("dry run rejected: {raw}")]
    Rejected { raw: String },
    /// A committed transaction came back without a success indicator.
    #[error("transaction {} failed: {raw}", tx_hash.as_deref().unwrap_or("<unknown>"))]
    Transaction { tx_hash: Option<String>, raw: String },
    #[error("simulation failed: {0}")]
    Simulate(#[source] Box<GatewayError>),
    #[error("commit failed: {0}")]
    Commit(#[source] Box<GatewayError>),
}

impl GatewayError {
    /// Whether repeating the same call may succeed.
    ///
    /// Verdict-level outcomes (rejections, failed transactions) are final.
    pub fn is_transient(&self) -> bool {
        matches!(self, GatewayError::Rpc(_) | GatewayError::Decode(_))
    }
}
