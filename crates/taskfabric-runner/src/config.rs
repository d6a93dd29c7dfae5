// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Configuration loading from environment variables.

use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Which execution engine the runner hosts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineKind {
    /// Run a configured command per call.
    Process,
    /// Copy input to output.
    Echo,
}

/// PEM file locations for mutual TLS.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TlsPaths {
    pub cert: PathBuf,
    pub key: PathBuf,
    pub ca: PathBuf,
}

/// PEM contents loaded from [`TlsPaths`].
#[derive(Debug, Clone)]
pub struct TlsMaterial {
    pub cert_pem: Vec<u8>,
    pub key_pem: Vec<u8>,
    pub ca_pem: Vec<u8>,
}

impl TlsPaths {
    /// Read all three PEM files.
    pub fn load(&self) -> Result<TlsMaterial, ConfigError> {
        Ok(TlsMaterial {
            cert_pem: read_pem(&self.cert)?,
            key_pem: read_pem(&self.key)?,
            ca_pem: read_pem(&self.ca)?,
        })
    }
}

fn read_pem(path: &Path) -> Result<Vec<u8>, ConfigError> {
    std::fs::read(path).map_err(|source| ConfigError::Unreadable {
        path: path.to_path_buf(),
        source,
    })
}

/// Taskfabric runner configuration
#[derive(Debug, Clone)]
pub struct Config {
    /// QUIC address the runner listens on
    pub bind_addr: SocketAddr,
    /// Mutual TLS files; `None` runs the runner in insecure mode
    pub tls: Option<TlsPaths>,
    /// Some but not all TLS variables were set
    pub tls_incomplete: bool,
    /// Execution engine
    pub engine: EngineKind,
    /// Program and arguments for the process engine
    pub command: Vec<String>,
    /// Number of calls that may hold a capacity slot at once
    pub max_concurrent_calls: usize,
    /// How long a submitted call waits for a free slot
    pub slot_timeout: Duration,
}

impl Config {
    /// Load configuration from environment variables.
    ///
    /// Optional (with defaults):
    /// - `TASKFABRIC_RUNNER_PORT`: QUIC port (default: 9190)
    /// - `TASKFABRIC_RUNNER_BIND`: listen IP (default: 0.0.0.0)
    /// - `TASKFABRIC_TLS_CERT`, `TASKFABRIC_TLS_KEY`, `TASKFABRIC_TLS_CA`: PEM paths,
    ///   mutual TLS is enabled only when all three are set
    /// - `TASKFABRIC_ENGINE`: `process` or `echo` (default: process)
    /// - `TASKFABRIC_COMMAND`: whitespace separated command line, required for `process`
    /// - `TASKFABRIC_MAX_CONCURRENT_CALLS`: capacity slots (default: 16)
    /// - `TASKFABRIC_SLOT_TIMEOUT_MS`: slot wait in milliseconds (default: 5000)
    pub fn from_env() -> Result<Self, ConfigError> {
        let port: u16 = std::env::var("TASKFABRIC_RUNNER_PORT")
            .unwrap_or_else(|_| "9190".to_string())
            .parse()
            .map_err(|_| {
                ConfigError::Invalid("TASKFABRIC_RUNNER_PORT", "must be a valid port number")
            })?;

        let ip: IpAddr = match std::env::var("TASKFABRIC_RUNNER_BIND") {
            Ok(value) => value.parse().map_err(|_| {
                ConfigError::Invalid("TASKFABRIC_RUNNER_BIND", "must be an IP address")
            })?,
            Err(_) => IpAddr::V4(Ipv4Addr::UNSPECIFIED),
        };

        let cert = non_empty_var("TASKFABRIC_TLS_CERT");
        let key = non_empty_var("TASKFABRIC_TLS_KEY");
        let ca = non_empty_var("TASKFABRIC_TLS_CA");
        let any_tls = cert.is_some() || key.is_some() || ca.is_some();
        let tls = match (cert, key, ca) {
            (Some(cert), Some(key), Some(ca)) => Some(TlsPaths {
                cert: cert.into(),
                key: key.into(),
                ca: ca.into(),
            }),
            _ => None,
        };
        let tls_incomplete = any_tls && tls.is_none();

        let engine = match std::env::var("TASKFABRIC_ENGINE")
            .unwrap_or_else(|_| "process".to_string())
            .to_ascii_lowercase()
            .as_str()
        {
            "process" => EngineKind::Process,
            "echo" => EngineKind::Echo,
            _ => {
                return Err(ConfigError::Invalid(
                    "TASKFABRIC_ENGINE",
                    "must be `process` or `echo`",
                ));
            }
        };

        let command: Vec<String> = non_empty_var("TASKFABRIC_COMMAND")
            .map(|line| line.split_whitespace().map(str::to_string).collect())
            .unwrap_or_default();
        if engine == EngineKind::Process && command.is_empty() {
            return Err(ConfigError::Missing("TASKFABRIC_COMMAND"));
        }

        let max_concurrent_calls: usize = std::env::var("TASKFABRIC_MAX_CONCURRENT_CALLS")
            .unwrap_or_else(|_| "16".to_string())
            .parse()
            .ok()
            .filter(|n| *n > 0)
            .ok_or(ConfigError::Invalid(
                "TASKFABRIC_MAX_CONCURRENT_CALLS",
                "must be a positive integer",
            ))?;

        let slot_timeout_ms: u64 = std::env::var("TASKFABRIC_SLOT_TIMEOUT_MS")
            .unwrap_or_else(|_| "5000".to_string())
            .parse()
            .map_err(|_| {
                ConfigError::Invalid("TASKFABRIC_SLOT_TIMEOUT_MS", "must be a number of milliseconds")
            })?;

        Ok(Self {
            bind_addr: SocketAddr::new(ip, port),
            tls,
            tls_incomplete,
            engine,
            command,
            max_concurrent_calls,
            slot_timeout: Duration::from_millis(slot_timeout_ms),
        })
    }
}

fn non_empty_var(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|v| !v.trim().is_empty())
}

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// A required environment variable is missing.
    #[error("missing required environment variable: {0}")]
    Missing(&'static str),

    /// An environment variable has an invalid value.
    #[error("invalid value for {0}: {1}")]
    Invalid(&'static str, &'static str),

    /// A configured file could not be read.
    #[error("cannot read {}: {source}", path.display())]
    Unreadable {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}
