// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Node pool over a fixed set of workers per group.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use super::{CapacityRequest, DispatchError, NodePool, Worker};

/// Pool whose membership is configured up front. Demand is only counted.
pub struct StaticNodePool {
    groups: HashMap<String, Vec<Arc<dyn Worker>>>,
    demand_mb: Mutex<HashMap<String, u64>>,
    shut_down: AtomicBool,
}

impl StaticNodePool {
    pub fn new() -> Self {
        Self {
            groups: HashMap::new(),
            demand_mb: Mutex::new(HashMap::new()),
            shut_down: AtomicBool::new(false),
        }
    }

    /// Add a worker to a group; workers are tried in the order added.
    pub fn with_worker(mut self, group_id: impl Into<String>, worker: Arc<dyn Worker>) -> Self {
        self.groups.entry(group_id.into()).or_default().push(worker);
        self
    }

    /// Outstanding demand of a group in MiB.
    pub async fn demand(&self, group_id: &str) -> u64 {
        self.demand_mb
            .lock()
            .await
            .get(group_id)
            .copied()
            .unwrap_or(0)
    }
}

impl Default for StaticNodePool {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl NodePool for StaticNodePool {
    async fn runners(&self, group_id: &str) -> Vec<Arc<dyn Worker>> {
        if self.shut_down.load(Ordering::SeqCst) {
            return Vec::new();
        }
        self.groups.get(group_id).cloned().unwrap_or_default()
    }

    async fn assign_capacity(&self, request: &CapacityRequest) {
        let mut demand = self.demand_mb.lock().await;
        let entry = demand.entry(request.group_id.clone()).or_insert(0);
        *entry = entry.saturating_add(request.total_memory_mb);
        debug!(group_id = %request.group_id, demand_mb = *entry, "capacity assigned");
    }

    async fn release_capacity(&self, request: &CapacityRequest) {
        let mut demand = self.demand_mb.lock().await;
        if let Some(entry) = demand.get_mut(&request.group_id) {
            *entry = entry.saturating_sub(request.total_memory_mb);
            debug!(group_id = %request.group_id, demand_mb = *entry, "capacity released");
        }
    }

    async fn shutdown(&self) -> Result<(), DispatchError> {
        if self.shut_down.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        info!(groups = self.groups.len(), "shutting down node pool");

        let mut first_error = None;
        for worker in self.groups.values().flatten() {
            if let Err(e) = worker.close().await {
                warn!(runner = worker.address(), "failed to close worker: {}", e);
                first_error.get_or_insert(e);
            }
        }
        first_error.map_or(Ok(()), Err)
    }
}
