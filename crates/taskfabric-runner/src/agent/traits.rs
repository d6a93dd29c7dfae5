// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Agent trait definitions.
//!
//! Defines the abstract interface for execution engines.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

use crate::error::SinkError;
use crate::pipe::CallInput;
use crate::response::ResponseSink;

/// Errors from agent operations.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum AgentError {
    /// No capacity slot became free in time.
    #[error("no capacity: no slot free after {0:?}")]
    NoCapacity(Duration),

    /// The engine refused the call.
    #[error("call rejected: {0}")]
    Rejected(String),

    /// The call's process could not be started.
    #[error("failed to start: {0}")]
    StartFailed(String),

    /// Process exited with non-zero code.
    #[error("exit code {exit_code}: {stderr}")]
    ExitCode {
        /// Exit code from the process (-1 when killed by a signal).
        exit_code: i32,
        /// Tail of the standard error output.
        stderr: String,
    },

    /// Execution timed out.
    #[error("execution timeout after {0:?}")]
    Timeout(Duration),

    /// Reading the call input failed (e.g. aborted by the client).
    #[error("input error: {0}")]
    Input(#[source] std::io::Error),

    /// Writing the response failed.
    #[error("output error: {0}")]
    Output(#[from] SinkError),

    /// I/O operation failed.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// The function reported a failure.
    #[error("{0}")]
    Failed(String),
}

/// What to run, as submitted by the client in `TryCall`.
///
/// Unknown fields are ignored and missing ones take their defaults; only the
/// engine decides which fields it needs.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CallDescriptor {
    /// Call identifier; generated when the client leaves it empty
    pub id: String,
    pub app_id: String,
    pub fn_id: String,
    /// Function image or artifact reference
    pub image: String,
    /// HTTP method of the originating request
    pub method: String,
    /// URL of the originating request
    pub url: String,
    /// Headers of the originating request
    pub headers: BTreeMap<String, Vec<String>>,
    /// Execution timeout in seconds; 0 means the engine default
    pub timeout_secs: u64,
    /// Memory reservation in MiB
    pub memory_mb: u64,
    /// Function configuration, exported to the function environment
    pub config: BTreeMap<String, String>,
}

impl CallDescriptor {
    /// Parse a JSON descriptor and assign an id when none was given.
    pub fn from_slice(bytes: &[u8]) -> Result<Self, serde_json::Error> {
        let mut descriptor: Self = serde_json::from_slice(bytes)?;
        if descriptor.id.is_empty() {
            descriptor.id = Uuid::new_v4().to_string();
        }
        Ok(descriptor)
    }

    /// Timeout requested by the descriptor, or `default`.
    pub fn timeout_or(&self, default: Duration) -> Duration {
        if self.timeout_secs == 0 {
            default
        } else {
            Duration::from_secs(self.timeout_secs)
        }
    }
}

/// Trait for execution engines.
///
/// `get_call` is the admission step: it either reserves what the call needs
/// (a capacity slot) and returns the call, or refuses. Refusal is reported to
/// the client as a rejected acknowledgment.
#[async_trait]
pub trait Agent: Send + Sync {
    /// Engine type identifier (e.g., "process", "echo")
    fn engine_type(&self) -> &'static str;

    /// Admit a call bound to its input and output.
    async fn get_call(
        &self,
        descriptor: CallDescriptor,
        input: CallInput,
        output: Arc<dyn ResponseSink>,
    ) -> Result<Box<dyn Call>, AgentError>;
}

/// An admitted call.
#[async_trait]
pub trait Call: Send {
    /// Call identifier, echoed in the acknowledgment and `CallFinished`.
    fn id(&self) -> &str;

    /// Execute: consume the input and write the response.
    ///
    /// Resources held by the call (its capacity slot) are released when it
    /// returns.
    async fn run(self: Box<Self>) -> Result<(), AgentError>;
}
