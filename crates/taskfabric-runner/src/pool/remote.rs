// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Worker backed by a runner reachable over QUIC.

use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use bytes::Bytes;
use taskfabric_protocol::{
    ClientError, ClientMsg, Frame, FrameError, MessageType, RunnerClient, RunnerMsg,
    RunnerStatus, read_frame, runner_msg, write_frame,
};
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};
use tracing::{debug, instrument};

use super::{CallResult, DispatchError, Work, Worker};

/// Request body is sent in frames of at most this size.
const BODY_CHUNK_SIZE: usize = 64 * 1024;

/// [`Worker`] that engages a remote runner for each dispatch.
///
/// The runner's answer to `TryCall` decides acceptance: a rejected
/// acknowledgment is "not accepted", anything after an accepted one is
/// collected into the work's [`CallResult`].
pub struct RemoteWorker {
    client: RunnerClient,
    address: String,
    draining: AtomicBool,
}

impl RemoteWorker {
    pub fn new(client: RunnerClient) -> Self {
        Self {
            address: client.server_addr().to_string(),
            client,
            draining: AtomicBool::new(false),
        }
    }

    /// A draining worker declines all work without contacting the runner.
    pub fn set_draining(&self, draining: bool) {
        self.draining.store(draining, Ordering::SeqCst);
    }

    pub fn is_draining(&self) -> bool {
        self.draining.load(Ordering::SeqCst)
    }

    /// In-flight engagement count of the runner.
    pub async fn status(&self) -> Result<RunnerStatus, DispatchError> {
        Ok(self.client.status().await?)
    }
}

#[async_trait]
impl Worker for RemoteWorker {
    #[instrument(skip(self, work), fields(runner = %self.address))]
    async fn try_dispatch(&self, work: &mut Work) -> Result<bool, DispatchError> {
        if self.is_draining() {
            debug!("runner draining, declining work");
            return Ok(false);
        }

        let descriptor = serde_json::to_vec(&work.descriptor)?;
        let mut engagement = self.client.engage().await?;
        engagement.submit(descriptor).await?;

        let ack = match engagement.next_message().await? {
            Some(RunnerMsg {
                body: Some(runner_msg::Body::Acknowledged(ack)),
            }) => ack,
            Some(other) => {
                return Err(DispatchError::Protocol(format!(
                    "expected acknowledgment, got {}",
                    other.kind()
                )));
            }
            None => {
                return Err(DispatchError::Protocol(
                    "stream closed before acknowledgment".to_string(),
                ));
            }
        };
        if !ack.committed {
            debug!(reason = %ack.details, "runner declined work");
            return Ok(false);
        }

        let (mut send, mut recv) = engagement.into_parts();
        let (sent, collected) = tokio::join!(
            send_body(&mut send, work.body.clone()),
            collect_result(&mut recv, ack.details, ack.slot_allocation_latency_us),
        );
        let result = collected?;
        if let Err(e) = sent {
            // The runner may finish without reading the whole body
            debug!("request body not fully sent: {}", e);
        }

        debug!(call_id = %result.call_id, success = result.success, "call completed");
        work.result = Some(result);
        Ok(true)
    }

    async fn close(&self) -> Result<(), DispatchError> {
        self.client.close().await;
        Ok(())
    }

    fn address(&self) -> &str {
        &self.address
    }
}

/// Send the body as data frames, the last one flagged `eof`, then finish.
async fn send_body<W>(send: &mut W, body: Bytes) -> Result<(), ClientError>
where
    W: AsyncWrite + Unpin,
{
    let mut chunks = body.chunks(BODY_CHUNK_SIZE).peekable();
    if chunks.peek().is_none() {
        write_frame(send, &Frame::client(&ClientMsg::data(Vec::new(), true))?).await?;
    }
    while let Some(chunk) = chunks.next() {
        let eof = chunks.peek().is_none();
        write_frame(send, &Frame::client(&ClientMsg::data(chunk.to_vec(), eof))?).await?;
    }
    send.shutdown().await?;
    Ok(())
}

/// Read the response until the runner finishes the stream.
async fn collect_result<R>(
    recv: &mut R,
    call_id: String,
    latency_us: u64,
) -> Result<CallResult, DispatchError>
where
    R: AsyncRead + Unpin,
{
    let mut result = CallResult {
        call_id,
        slot_allocation_latency_us: latency_us,
        status_code: 0,
        headers: Vec::new(),
        body: Vec::new(),
        success: false,
        details: String::new(),
    };
    let mut finished = false;

    loop {
        let frame = match read_frame(recv).await {
            Ok(frame) => frame,
            Err(FrameError::ConnectionClosed) => break,
            Err(e) => return Err(ClientError::from(e).into()),
        };
        let msg: RunnerMsg = frame
            .decode_as(MessageType::RunnerMsg)
            .map_err(ClientError::from)?;
        match msg.body {
            Some(runner_msg::Body::ResultStart(start)) => {
                result.status_code = start.status_code;
                result.headers = start.headers;
            }
            Some(runner_msg::Body::Data(data)) => result.body.extend_from_slice(&data.data),
            Some(runner_msg::Body::Finished(done)) => {
                result.success = done.success;
                result.details = done.details;
                finished = true;
            }
            Some(runner_msg::Body::Acknowledged(_)) | None => {
                return Err(DispatchError::Protocol(format!(
                    "unexpected {} message after acknowledgment",
                    msg.kind()
                )));
            }
        }
    }

    if !finished {
        return Err(DispatchError::Protocol(
            "stream ended without call result".to_string(),
        ));
    }
    Ok(result)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent::CallDescriptor;

    #[tokio::test]
    async fn test_draining_worker_declines_without_io() {
        // Nothing listens on this port; a connection attempt would fail
        let client = RunnerClient::insecure("127.0.0.1:59996".parse().unwrap()).unwrap();
        let worker = RemoteWorker::new(client);
        assert_eq!(worker.address(), "127.0.0.1:59996");

        worker.set_draining(true);
        let mut work = Work::new(CallDescriptor::default(), "body");
        assert!(!worker.try_dispatch(&mut work).await.unwrap());
        assert!(work.result.is_none());

        worker.set_draining(false);
        assert!(!worker.is_draining());
    }

    #[tokio::test]
    async fn test_send_body_chunks_and_marks_last_frame() {
        let (mut tx, mut rx) = tokio::io::duplex(1024 * 1024);
        let body = Bytes::from(vec![7u8; BODY_CHUNK_SIZE + 10]);
        send_body(&mut tx, body).await.unwrap();

        let mut sizes = Vec::new();
        loop {
            match read_frame(&mut rx).await {
                Ok(frame) => {
                    let msg: ClientMsg = frame.decode_as(MessageType::ClientMsg).unwrap();
                    match msg.body {
                        Some(taskfabric_protocol::client_msg::Body::Data(d)) => {
                            sizes.push((d.data.len(), d.eof))
                        }
                        other => panic!("expected data, got {:?}", other),
                    }
                }
                Err(FrameError::ConnectionClosed) => break,
                Err(e) => panic!("read failed: {}", e),
            }
        }
        assert_eq!(sizes, vec![(BODY_CHUNK_SIZE, false), (10, true)]);
    }

    #[tokio::test]
    async fn test_send_empty_body_is_single_eof_frame() {
        let (mut tx, mut rx) = tokio::io::duplex(1024);
        send_body(&mut tx, Bytes::new()).await.unwrap();

        let msg: ClientMsg = read_frame(&mut rx)
            .await
            .unwrap()
            .decode_as(MessageType::ClientMsg)
            .unwrap();
        assert_eq!(msg, ClientMsg::data(Vec::new(), true));
        assert!(matches!(
            read_frame(&mut rx).await,
            Err(FrameError::ConnectionClosed)
        ));
    }

    #[tokio::test]
    async fn test_collect_result_requires_finished() {
        let (mut tx, mut rx) = tokio::io::duplex(4096);
        write_frame(
            &mut tx,
            &Frame::runner(&RunnerMsg::result_start(200, Vec::new())).unwrap(),
        )
        .await
        .unwrap();
        write_frame(&mut tx, &Frame::runner(&RunnerMsg::data(b"ok".to_vec(), false)).unwrap())
            .await
            .unwrap();
        drop(tx);

        let err = collect_result(&mut rx, "c1".into(), 0).await.unwrap_err();
        assert!(matches!(err, DispatchError::Protocol(_)));
    }

    #[tokio::test]
    async fn test_collect_result_assembles_response() {
        let (mut tx, mut rx) = tokio::io::duplex(4096);
        for msg in [
            RunnerMsg::result_start(
                201,
                vec![taskfabric_protocol::HttpHeader {
                    key: "Location".into(),
                    value: "/x".into(),
                }],
            ),
            RunnerMsg::data(b"he".to_vec(), false),
            RunnerMsg::data(b"llo".to_vec(), false),
            RunnerMsg::data(Vec::new(), true),
            RunnerMsg::finished(true, "c1"),
        ] {
            write_frame(&mut tx, &Frame::runner(&msg).unwrap()).await.unwrap();
        }
        drop(tx);

        let result = collect_result(&mut rx, "c1".into(), 42).await.unwrap();
        assert_eq!(result.status_code, 201);
        assert_eq!(result.headers[0].key, "Location");
        assert_eq!(result.body, b"hello");
        assert!(result.success);
        assert_eq!(result.details, "c1");
        assert_eq!(result.slot_allocation_latency_us, 42);
    }
}
