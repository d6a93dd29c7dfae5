// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Capacity routing contract used by the front tier.
//!
//! A [`NodePool`] lists the workers that serve a runner group and receives
//! demand updates; a [`Worker`] is a handle to one runner that may or may not
//! accept a piece of work. [`place`] tries a group's workers in order.

mod remote;
mod static_pool;

use async_trait::async_trait;
use bytes::Bytes;
use std::sync::Arc;
use taskfabric_protocol::{ClientError, HttpHeader};
use thiserror::Error;
use tracing::{debug, warn};

use crate::agent::CallDescriptor;

pub use remote::RemoteWorker;
pub use static_pool::StaticNodePool;

/// Errors from dispatching work to a worker.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum DispatchError {
    /// Talking to the runner failed.
    #[error("runner connection failed: {0}")]
    Client(#[from] ClientError),

    /// The call descriptor could not be serialized.
    #[error("cannot encode call descriptor: {0}")]
    Encode(#[from] serde_json::Error),

    /// The runner broke the engagement protocol.
    #[error("unexpected runner behaviour: {0}")]
    Protocol(String),
}

/// Demand change for a runner group.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CapacityRequest {
    pub group_id: String,
    pub total_memory_mb: u64,
}

impl CapacityRequest {
    pub fn new(group_id: impl Into<String>, total_memory_mb: u64) -> Self {
        Self {
            group_id: group_id.into(),
            total_memory_mb,
        }
    }
}

/// A call to place on some worker.
#[derive(Debug, Clone)]
pub struct Work {
    pub descriptor: CallDescriptor,
    /// Complete request body
    pub body: Bytes,
    /// Filled in by the worker that accepted the work
    pub result: Option<CallResult>,
}

impl Work {
    pub fn new(descriptor: CallDescriptor, body: impl Into<Bytes>) -> Self {
        Self {
            descriptor,
            body: body.into(),
            result: None,
        }
    }
}

/// Outcome of an accepted call as reported by the runner.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallResult {
    /// Call id assigned or confirmed by the runner
    pub call_id: String,
    /// Allocation latency reported in the acknowledgment, in microseconds
    pub slot_allocation_latency_us: u64,
    pub status_code: i32,
    pub headers: Vec<HttpHeader>,
    pub body: Vec<u8>,
    pub success: bool,
    /// Call id on success, error text on failure
    pub details: String,
}

/// View of the runners serving each group.
#[async_trait]
pub trait NodePool: Send + Sync {
    /// Workers of a group, in placement order. Unknown groups have none.
    async fn runners(&self, group_id: &str) -> Vec<Arc<dyn Worker>>;

    /// Add demand for a group.
    async fn assign_capacity(&self, request: &CapacityRequest);

    /// Remove demand for a group. Never goes below zero.
    async fn release_capacity(&self, request: &CapacityRequest);

    /// Close every worker; the pool lists no workers afterwards.
    async fn shutdown(&self) -> Result<(), DispatchError>;
}

/// Handle to one runner.
#[async_trait]
pub trait Worker: Send + Sync {
    /// Try to run `work`. `Ok(false)` means not accepted (draining, or refused
    /// by the runner); `Err` means the attempt itself failed.
    async fn try_dispatch(&self, work: &mut Work) -> Result<bool, DispatchError>;

    async fn close(&self) -> Result<(), DispatchError>;

    /// Runner address, for logs.
    fn address(&self) -> &str;
}

/// Worker that never accepts anything.
#[derive(Debug, Clone, Copy, Default)]
pub struct NullWorker;

#[async_trait]
impl Worker for NullWorker {
    async fn try_dispatch(&self, _work: &mut Work) -> Result<bool, DispatchError> {
        Ok(false)
    }

    async fn close(&self) -> Result<(), DispatchError> {
        Ok(())
    }

    fn address(&self) -> &str {
        ""
    }
}

/// Offer `work` to the group's workers in order until one accepts.
///
/// Failed attempts are logged and the next worker is tried.
pub async fn place(pool: &dyn NodePool, group_id: &str, work: &mut Work) -> bool {
    for worker in pool.runners(group_id).await {
        match worker.try_dispatch(work).await {
            Ok(true) => {
                debug!(group_id, runner = worker.address(), "work placed");
                return true;
            }
            Ok(false) => {
                debug!(group_id, runner = worker.address(), "runner declined work");
            }
            Err(e) => {
                warn!(group_id, runner = worker.address(), "dispatch failed: {}", e);
            }
        }
    }
    false
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_null_worker_never_accepts() {
        let worker = NullWorker;
        let mut work = Work::new(CallDescriptor::default(), Bytes::new());
        assert!(!worker.try_dispatch(&mut work).await.unwrap());
        assert!(work.result.is_none());
        assert!(worker.close().await.is_ok());
        assert_eq!(worker.address(), "");
    }

    #[test]
    fn test_capacity_request_new() {
        let request = CapacityRequest::new("group-a", 256);
        assert_eq!(request.group_id, "group-a");
        assert_eq!(request.total_memory_mb, 256);
    }
}
