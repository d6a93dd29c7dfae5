// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Response adapter: the header/body/close capability handed to engines.
//!
//! Status and headers stay pending until the first commit, which sends them
//! as one `CallResultStart`. After that, metadata changes are ignored, body
//! bytes go out as `DataFrame { eof: false }` and closing sends the single
//! empty `DataFrame { eof: true }`.

use std::sync::Arc;

use async_trait::async_trait;
use taskfabric_protocol::{HttpHeader, RunnerMsg};
use tokio::sync::Mutex;
use tracing::debug;

use crate::error::SinkError;
use crate::outbound::Outbound;

/// Status sent when the engine never sets one.
pub const DEFAULT_STATUS: i32 = 200;

/// Output side of a call, as seen by an execution engine.
///
/// Engines must not call [`close`](ResponseSink::close); the session closes
/// the response once the call returns.
#[async_trait]
pub trait ResponseSink: Send + Sync {
    /// Replace all values of a header. Ignored after commit.
    async fn set_header(&self, name: &str, value: &str);

    /// Append a value to a header. Ignored after commit.
    async fn add_header(&self, name: &str, value: &str);

    /// Set the status code. Ignored after commit.
    async fn set_status(&self, code: i32);

    /// Send status and headers now. Idempotent.
    async fn commit(&self) -> Result<(), SinkError>;

    /// Commit, then send `data` as one body chunk.
    async fn write(&self, data: &[u8]) -> Result<usize, SinkError>;

    /// Commit, then send the end-of-body marker. Only valid once.
    async fn close(&self) -> Result<(), SinkError>;
}

/// [`ResponseSink`] writing onto an engagement stream.
pub struct ResponseWriter {
    outbound: Arc<Outbound>,
    state: Mutex<ResponseState>,
}

struct ResponseState {
    status: i32,
    headers: HeaderList,
    committed: bool,
    closed: bool,
}

impl ResponseWriter {
    pub fn new(outbound: Arc<Outbound>) -> Self {
        Self {
            outbound,
            state: Mutex::new(ResponseState {
                status: DEFAULT_STATUS,
                headers: HeaderList::default(),
                committed: false,
                closed: false,
            }),
        }
    }

    pub async fn is_committed(&self) -> bool {
        self.state.lock().await.committed
    }

    pub async fn is_closed(&self) -> bool {
        self.state.lock().await.closed
    }
}

impl ResponseState {
    /// Send `CallResultStart` if not yet done. The commit is irrevocable even
    /// when the send fails.
    async fn commit(&mut self, outbound: &Outbound) -> Result<(), SinkError> {
        if self.committed {
            return Ok(());
        }
        self.committed = true;
        let headers = std::mem::take(&mut self.headers).into_wire();
        outbound
            .send(&RunnerMsg::result_start(self.status, headers))
            .await
    }
}

#[async_trait]
impl ResponseSink for ResponseWriter {
    async fn set_header(&self, name: &str, value: &str) {
        let mut state = self.state.lock().await;
        if state.committed {
            debug!(header = name, "ignoring header change after commit");
            return;
        }
        state.headers.set(name, value);
    }

    async fn add_header(&self, name: &str, value: &str) {
        let mut state = self.state.lock().await;
        if state.committed {
            debug!(header = name, "ignoring header change after commit");
            return;
        }
        state.headers.add(name, value);
    }

    async fn set_status(&self, code: i32) {
        let mut state = self.state.lock().await;
        if state.committed {
            debug!(code, "ignoring status change after commit");
            return;
        }
        state.status = code;
    }

    async fn commit(&self) -> Result<(), SinkError> {
        let mut state = self.state.lock().await;
        state.commit(&self.outbound).await
    }

    async fn write(&self, data: &[u8]) -> Result<usize, SinkError> {
        let mut state = self.state.lock().await;
        if state.closed {
            return Err(SinkError::AlreadyClosed);
        }
        state.commit(&self.outbound).await?;
        if data.is_empty() {
            return Ok(0);
        }
        self.outbound
            .send(&RunnerMsg::data(data.to_vec(), false))
            .await?;
        Ok(data.len())
    }

    async fn close(&self) -> Result<(), SinkError> {
        let mut state = self.state.lock().await;
        if state.closed {
            return Err(SinkError::AlreadyClosed);
        }
        state.closed = true;
        state.commit(&self.outbound).await?;
        self.outbound.send(&RunnerMsg::data(Vec::new(), true)).await
    }
}

/// Header multimap with case-insensitive names. Keeps the first-seen spelling
/// of each name and the order names were first added.
#[derive(Debug, Default, Clone)]
pub struct HeaderList {
    entries: Vec<(String, Vec<String>)>,
}

impl HeaderList {
    fn position(&self, name: &str) -> Option<usize> {
        self.entries
            .iter()
            .position(|(key, _)| key.eq_ignore_ascii_case(name))
    }

    pub fn set(&mut self, name: &str, value: &str) {
        match self.position(name) {
            Some(i) => self.entries[i].1 = vec![value.to_string()],
            None => self
                .entries
                .push((name.to_string(), vec![value.to_string()])),
        }
    }

    pub fn add(&mut self, name: &str, value: &str) {
        match self.position(name) {
            Some(i) => self.entries[i].1.push(value.to_string()),
            None => self
                .entries
                .push((name.to_string(), vec![value.to_string()])),
        }
    }

    pub fn get(&self, name: &str) -> Option<&[String]> {
        self.position(name).map(|i| self.entries[i].1.as_slice())
    }

    /// Flatten to wire pairs, one per value.
    pub fn into_wire(self) -> Vec<HttpHeader> {
        self.entries
            .into_iter()
            .flat_map(|(key, values)| {
                values.into_iter().map(move |value| HttpHeader {
                    key: key.clone(),
                    value,
                })
            })
            .collect()
    }
}
