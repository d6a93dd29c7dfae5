// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Mock agent for testing.
//!
//! Reads the whole call input before producing any output, so tests control
//! exactly when response frames appear on the stream. [`MockBehavior::Stall`]
//! is the exception: it never touches its input.

use std::io;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use tokio::io::AsyncReadExt;
use tokio::sync::{Mutex, watch};

use super::{Agent, AgentError, Call, CallDescriptor};
use crate::pipe::CallInput;
use crate::response::ResponseSink;

/// What mock calls do.
#[derive(Debug, Clone)]
pub enum MockBehavior {
    /// Write the collected input back, with `X-Mock-Call` set to the call id.
    Echo,
    /// Refuse every call at admission.
    Reject(String),
    /// Write `output`, then fail with `error`.
    FailAfter { output: Vec<u8>, error: String },
    /// Hold the input unread for the given time, then succeed without output.
    Stall(Duration),
    /// Panic after reading the input.
    Panic,
}

#[derive(Debug)]
struct MockState {
    admitted: AtomicUsize,
    input_errors: Mutex<Vec<io::ErrorKind>>,
    descriptors: Mutex<Vec<CallDescriptor>>,
    finished: watch::Sender<usize>,
}

/// Mock agent for testing.
#[derive(Debug, Clone)]
pub struct MockAgent {
    behavior: MockBehavior,
    state: Arc<MockState>,
}

impl MockAgent {
    pub fn new(behavior: MockBehavior) -> Self {
        Self {
            behavior,
            state: Arc::new(MockState {
                admitted: AtomicUsize::new(0),
                input_errors: Mutex::new(Vec::new()),
                descriptors: Mutex::new(Vec::new()),
                finished: watch::channel(0).0,
            }),
        }
    }

    /// Agent whose calls echo their input.
    pub fn echo() -> Self {
        Self::new(MockBehavior::Echo)
    }

    /// Agent that refuses every call.
    pub fn rejecting(reason: &str) -> Self {
        Self::new(MockBehavior::Reject(reason.to_string()))
    }

    /// Agent whose calls write `output` and then fail.
    pub fn failing_after(output: &[u8], error: &str) -> Self {
        Self::new(MockBehavior::FailAfter {
            output: output.to_vec(),
            error: error.to_string(),
        })
    }

    /// Agent whose calls sit on their input without reading it.
    pub fn stalling(duration: Duration) -> Self {
        Self::new(MockBehavior::Stall(duration))
    }

    /// Agent whose calls crash.
    pub fn panicking() -> Self {
        Self::new(MockBehavior::Panic)
    }

    /// Number of calls admitted so far.
    pub fn admitted(&self) -> usize {
        self.state.admitted.load(Ordering::SeqCst)
    }

    /// Input errors seen by calls, in order.
    pub async fn input_errors(&self) -> Vec<io::ErrorKind> {
        self.state.input_errors.lock().await.clone()
    }

    /// Descriptors of admitted calls, in order.
    pub async fn descriptors(&self) -> Vec<CallDescriptor> {
        self.state.descriptors.lock().await.clone()
    }

    /// Wait until `count` calls have returned from `run`.
    pub async fn wait_finished(&self, count: usize) {
        let mut rx = self.state.finished.subscribe();
        let _ = rx.wait_for(|n| *n >= count).await;
    }
}

#[async_trait]
impl Agent for MockAgent {
    fn engine_type(&self) -> &'static str {
        "mock"
    }

    async fn get_call(
        &self,
        descriptor: CallDescriptor,
        input: CallInput,
        output: Arc<dyn ResponseSink>,
    ) -> Result<Box<dyn Call>, AgentError> {
        if let MockBehavior::Reject(reason) = &self.behavior {
            return Err(AgentError::Rejected(reason.clone()));
        }
        self.state.admitted.fetch_add(1, Ordering::SeqCst);
        self.state.descriptors.lock().await.push(descriptor.clone());
        Ok(Box::new(MockCall {
            id: descriptor.id,
            behavior: self.behavior.clone(),
            input,
            output,
            state: self.state.clone(),
        }))
    }
}

struct MockCall {
    id: String,
    behavior: MockBehavior,
    input: CallInput,
    output: Arc<dyn ResponseSink>,
    state: Arc<MockState>,
}

impl MockCall {
    async fn execute(&mut self) -> Result<(), AgentError> {
        if let MockBehavior::Stall(duration) = &self.behavior {
            tokio::time::sleep(*duration).await;
            return Ok(());
        }

        let mut body = Vec::new();
        if let Err(e) = self.input.read_to_end(&mut body).await {
            self.state.input_errors.lock().await.push(e.kind());
            return Err(AgentError::Input(e));
        }

        match &self.behavior {
            MockBehavior::Echo => {
                self.output.set_header("X-Mock-Call", &self.id).await;
                self.output.write(&body).await?;
                Ok(())
            }
            MockBehavior::FailAfter { output, error } => {
                self.output.write(output).await?;
                Err(AgentError::Failed(error.clone()))
            }
            MockBehavior::Reject(reason) => Err(AgentError::Rejected(reason.clone())),
            MockBehavior::Stall(_) => Ok(()),
            MockBehavior::Panic => panic!("mock call crashed after {} input bytes", body.len()),
        }
    }
}

#[async_trait]
impl Call for MockCall {
    fn id(&self) -> &str {
        &self.id
    }

    async fn run(self: Box<Self>) -> Result<(), AgentError> {
        let mut call = *self;
        let result = call.execute().await;
        call.state.finished.send_modify(|n| *n += 1);
        result
    }
}
