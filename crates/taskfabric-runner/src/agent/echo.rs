// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Echo engine: the response body is the request body.

use std::sync::Arc;

use async_trait::async_trait;
use tokio::io::AsyncReadExt;
use tracing::debug;

use super::{Agent, AgentError, Call, CallDescriptor, Slot, SlotPool};
use crate::pipe::CallInput;
use crate::response::ResponseSink;

const READ_BUFFER_SIZE: usize = 32 * 1024;

pub struct EchoAgent {
    slots: SlotPool,
}

impl EchoAgent {
    pub fn new(slots: SlotPool) -> Self {
        Self { slots }
    }
}

#[async_trait]
impl Agent for EchoAgent {
    fn engine_type(&self) -> &'static str {
        "echo"
    }

    async fn get_call(
        &self,
        descriptor: CallDescriptor,
        input: CallInput,
        output: Arc<dyn ResponseSink>,
    ) -> Result<Box<dyn Call>, AgentError> {
        let slot = self.slots.acquire().await?;
        Ok(Box::new(EchoCall {
            id: descriptor.id,
            input,
            output,
            _slot: slot,
        }))
    }
}

struct EchoCall {
    id: String,
    input: CallInput,
    output: Arc<dyn ResponseSink>,
    _slot: Slot,
}

#[async_trait]
impl Call for EchoCall {
    fn id(&self) -> &str {
        &self.id
    }

    async fn run(self: Box<Self>) -> Result<(), AgentError> {
        let EchoCall {
            id,
            mut input,
            output,
            _slot,
        } = *self;

        output
            .set_header("Content-Type", "application/octet-stream")
            .await;

        let mut buf = vec![0u8; READ_BUFFER_SIZE];
        let mut total = 0usize;
        loop {
            let n = input.read(&mut buf).await.map_err(AgentError::Input)?;
            if n == 0 {
                break;
            }
            output.write(&buf[..n]).await?;
            total += n;
        }
        debug!(call_id = %id, bytes = total, "echo call done");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::outbound::Outbound;
    use crate::pipe::input_pipe;
    use crate::response::ResponseWriter;
    use bytes::Bytes;
    use std::time::Duration;
    use taskfabric_protocol::{MessageType, RunnerMsg, read_frame, runner_msg};

    #[tokio::test]
    async fn test_echo_copies_input_to_output() {
        let agent = EchoAgent::new(SlotPool::new(1, Duration::from_millis(10)));
        let (tx, mut rx) = tokio::io::duplex(64 * 1024);
        let output = Arc::new(ResponseWriter::new(Arc::new(Outbound::new(tx))));
        let (mut pipe, input) = input_pipe(4);

        let call = agent
            .get_call(CallDescriptor::default(), input, output.clone())
            .await
            .unwrap();
        assert_eq!(agent.engine_type(), "echo");

        // The only slot is taken while the call exists
        let (_, second_input) = input_pipe(1);
        assert!(
            agent
                .get_call(CallDescriptor::default(), second_input, output.clone())
                .await
                .is_err()
        );

        pipe.write(Bytes::from_static(b"ping")).await.unwrap();
        pipe.close();
        call.run().await.unwrap();

        let msg: RunnerMsg = read_frame(&mut rx)
            .await
            .unwrap()
            .decode_as(MessageType::RunnerMsg)
            .unwrap();
        match msg.body {
            Some(runner_msg::Body::ResultStart(start)) => {
                assert_eq!(start.status_code, 200);
                assert_eq!(start.headers[0].value, "application/octet-stream");
            }
            other => panic!("expected result start, got {:?}", other),
        }
        let msg: RunnerMsg = read_frame(&mut rx)
            .await
            .unwrap()
            .decode_as(MessageType::RunnerMsg)
            .unwrap();
        assert!(matches!(msg.body, Some(runner_msg::Body::Data(d)) if d.data == b"ping"));
    }

    #[tokio::test]
    async fn test_echo_reports_aborted_input() {
        let agent = EchoAgent::new(SlotPool::new(1, Duration::from_millis(10)));
        let (tx, _rx) = tokio::io::duplex(64 * 1024);
        let output = Arc::new(ResponseWriter::new(Arc::new(Outbound::new(tx))));
        let (mut pipe, input) = input_pipe(4);

        let call = agent
            .get_call(CallDescriptor::default(), input, output)
            .await
            .unwrap();
        pipe.abort();
        assert!(matches!(call.run().await, Err(AgentError::Input(_))));
    }
}
