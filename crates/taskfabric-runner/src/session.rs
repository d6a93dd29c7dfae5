// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Engagement session: the runner side of one bidirectional stream.
//!
//! ```text
//! AwaitingSubmit ──TryCall──▶ Allocated ──first DataFrame──▶ Streaming
//!                                                               │ eof
//!                                                               ▼
//!        Closed ◀──────────── executor finished ───────── Completing
//! ```
//!
//! The receive loop owns the input pipe and the state. Once the first data
//! frame arrives the call runs on its own executor task, which writes the
//! response through the [`ResponseWriter`] and ends with one `CallFinished`.
//! Any receive failure or protocol violation closes the session at once; the
//! input pipe is aborted so the executor winds down on its own.
//!
//! Frames are read by a separate reader task and handed over through a
//! channel, so the session can keep watching the stream while a pipe write
//! waits for the call to consume its input.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Instant;

use bytes::Bytes;
use taskfabric_protocol::{
    ClientMsg, DataFrame, Frame, FrameError, MessageType, RunnerMsg, TryCall, client_msg,
    read_frame,
};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, instrument, warn};

use crate::agent::{Agent, Call, CallDescriptor};
use crate::error::{EngageError, SinkError};
use crate::outbound::Outbound;
use crate::pipe::{InputPipe, input_pipe};
use crate::response::{ResponseSink, ResponseWriter};

/// Request body chunks buffered between the receive loop and the executor.
pub const INPUT_PIPE_CAPACITY: usize = 16;

/// Frames read ahead of the receive loop while a pipe write is blocked.
const BACKLOG_CAPACITY: usize = INPUT_PIPE_CAPACITY;

type Received = Result<Frame, FrameError>;

/// Lifecycle of an engagement.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    AwaitingSubmit,
    Allocated,
    Streaming,
    Completing,
    Closed,
}

/// The call admitted on this stream.
struct AllocatedCall {
    id: String,
    /// Taken by the executor when the first data frame arrives.
    call: Option<Box<dyn Call>>,
    input: InputPipe,
}

enum Event {
    Frame(Frame),
    ReceiveFailed(FrameError),
    ExecutorDone,
}

/// One engagement over a reader (client to runner) and a writer (runner to
/// client).
pub struct EngagementSession {
    agent: Arc<dyn Agent>,
    frames: mpsc::Receiver<Received>,
    reader_task: JoinHandle<()>,
    /// Frames received while a pipe write was blocked, handled in order.
    backlog: VecDeque<Received>,
    outbound: Arc<Outbound>,
    output: Arc<ResponseWriter>,
    state: SessionState,
    call: Option<AllocatedCall>,
    executor: Option<JoinHandle<()>>,
    /// Client half-closed after end of input; only the executor is awaited.
    peer_done: bool,
}

impl EngagementSession {
    /// Must be called within a tokio runtime: the reader task starts here.
    pub fn new<R, W>(agent: Arc<dyn Agent>, reader: R, writer: W) -> Self
    where
        R: AsyncRead + Unpin + Send + 'static,
        W: AsyncWrite + Send + Unpin + 'static,
    {
        let (reader_task, frames) = spawn_reader(reader);
        let outbound = Arc::new(Outbound::new(writer));
        Self {
            agent,
            frames,
            reader_task,
            backlog: VecDeque::new(),
            output: Arc::new(ResponseWriter::new(outbound.clone())),
            outbound,
            state: SessionState::AwaitingSubmit,
            call: None,
            executor: None,
            peer_done: false,
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Send half, for observing the fault state.
    pub fn outbound(&self) -> Arc<Outbound> {
        self.outbound.clone()
    }

    /// Drive the engagement until it closes.
    pub async fn run(self) -> Result<(), EngageError> {
        self.run_from(None).await
    }

    /// Drive the engagement when its first frame was already read (the front
    /// door reads it to tell engagements from status queries).
    pub async fn run_after(self, first: Frame) -> Result<(), EngageError> {
        self.run_from(Some(first)).await
    }

    #[instrument(skip_all)]
    async fn run_from(mut self, first: Option<Frame>) -> Result<(), EngageError> {
        let result = self.receive_loop(first).await;
        self.state = SessionState::Closed;
        self.reader_task.abort();
        if let Err(e) = &result {
            match e {
                EngageError::Protocol(_) => self.outbound.record_fault(e).await,
                EngageError::Receive(reason) => self.outbound.record_fault(reason).await,
                _ => {}
            }
            self.abort_input();
            if e.is_disconnect() {
                debug!("engagement ended: {}", e);
            } else {
                warn!("engagement ended: {}", e);
            }
        }
        result
    }

    async fn receive_loop(&mut self, mut pending: Option<Frame>) -> Result<(), EngageError> {
        loop {
            let event = match pending.take() {
                Some(frame) => Event::Frame(frame),
                None => self.next_event().await,
            };

            match event {
                Event::Frame(frame) => self.handle_frame(frame).await?,
                Event::ReceiveFailed(FrameError::ConnectionClosed)
                    if self.state == SessionState::Completing =>
                {
                    debug!("client finished sending, waiting for the call");
                    self.peer_done = true;
                }
                Event::ReceiveFailed(e) => return Err(EngageError::Receive(e)),
                Event::ExecutorDone => return Ok(()),
            }
        }
    }

    async fn next_event(&mut self) -> Event {
        if let Some(received) = self.backlog.pop_front() {
            return received_event(received);
        }

        let joined = match self.executor.as_mut() {
            None => return received_event(recv_frame(&mut self.frames).await),
            Some(executor) if self.peer_done => executor.await,
            Some(executor) => tokio::select! {
                received = recv_frame(&mut self.frames) => return received_event(received),
                joined = executor => joined,
            },
        };

        self.executor = None;
        if let Err(e) = joined {
            error!("call executor crashed: {}", e);
            if let Err(e) = self.outbound.send_finished(false, "call executor crashed").await {
                debug!("could not report crashed executor: {}", e);
            }
        }
        Event::ExecutorDone
    }

    async fn handle_frame(&mut self, frame: Frame) -> Result<(), EngageError> {
        let msg: ClientMsg = frame
            .decode_as(MessageType::ClientMsg)
            .map_err(|e| EngageError::Protocol(format!("unrecognized message: {}", e)))?;

        match msg.body {
            Some(client_msg::Body::Try(try_call)) => self.handle_try_call(try_call).await,
            Some(client_msg::Body::Data(data)) => self.handle_data(data).await,
            None => Err(EngageError::Protocol(
                "unrecognized message: empty body".to_string(),
            )),
        }
    }

    async fn handle_try_call(&mut self, try_call: TryCall) -> Result<(), EngageError> {
        if self.state != SessionState::AwaitingSubmit {
            return Err(EngageError::Protocol(
                "call already submitted on this stream".to_string(),
            ));
        }

        let (call_id, latency_us) = match self.allocate(&try_call.call_descriptor).await {
            Ok(admitted) => admitted,
            Err(e) => {
                warn!("call not admitted: {}", e);
                let nack = RunnerMsg::acknowledged(false, e.to_string(), 0);
                if let Err(send_err) = self.outbound.send(&nack).await {
                    debug!("failed to send rejection: {}", send_err);
                }
                return Err(e);
            }
        };

        info!(call_id = %call_id, latency_us, "call admitted");
        self.outbound
            .send(&RunnerMsg::acknowledged(true, call_id, latency_us))
            .await?;
        Ok(())
    }

    /// Parse the descriptor and have the engine admit the call. Returns the
    /// call id and the slot allocation latency in microseconds.
    async fn allocate(&mut self, raw_descriptor: &[u8]) -> Result<(String, u64), EngageError> {
        let descriptor = CallDescriptor::from_slice(raw_descriptor)?;
        let received_at = Instant::now();

        let (pipe, input) = input_pipe(INPUT_PIPE_CAPACITY);
        let output: Arc<dyn ResponseSink> = self.output.clone();
        let call = self.agent.get_call(descriptor, input, output).await?;
        let latency = received_at.elapsed();

        let call_id = call.id().to_string();
        self.call = Some(AllocatedCall {
            id: call_id.clone(),
            call: Some(call),
            input: pipe,
        });
        self.state = SessionState::Allocated;

        Ok((call_id, u64::try_from(latency.as_micros()).unwrap_or(u64::MAX)))
    }

    async fn handle_data(&mut self, data: DataFrame) -> Result<(), EngageError> {
        match self.state {
            SessionState::Allocated | SessionState::Streaming => {}
            SessionState::AwaitingSubmit => {
                return Err(EngageError::Protocol(
                    "data received before a call was submitted".to_string(),
                ));
            }
            SessionState::Completing | SessionState::Closed => {
                return Err(EngageError::Protocol(
                    "data received after end of input".to_string(),
                ));
            }
        }

        let Some(allocated) = self.call.as_mut() else {
            return Err(EngageError::Protocol("no call allocated".to_string()));
        };

        if let Some(call) = allocated.call.take() {
            debug!(call_id = %allocated.id, "starting call");
            self.executor = Some(spawn_executor(
                call,
                allocated.id.clone(),
                self.output.clone(),
                self.outbound.clone(),
            ));
            self.state = SessionState::Streaming;
        }

        let eof = data.eof;
        if !data.data.is_empty() && !allocated.input.is_closed() {
            let chunk = Bytes::from(data.data);
            match feed_input(&mut allocated.input, chunk, eof, &mut self.frames, &mut self.backlog)
                .await
            {
                Ok(()) => {}
                Err(EngageError::InputClosed) => {
                    // The call stopped reading; the rest of the input is dropped.
                    debug!(call_id = %allocated.id, "discarding call input");
                    allocated.input.close();
                }
                Err(e) => return Err(e),
            }
        }

        if eof {
            allocated.input.close();
            self.state = SessionState::Completing;
        }
        Ok(())
    }

    fn abort_input(&mut self) {
        if let Some(allocated) = self.call.as_mut() {
            allocated.input.abort();
        }
    }
}

impl Drop for EngagementSession {
    fn drop(&mut self) {
        self.reader_task.abort();
    }
}

/// Read frames off the stream until it fails or the session goes away.
fn spawn_reader<R>(mut reader: R) -> (JoinHandle<()>, mpsc::Receiver<Received>)
where
    R: AsyncRead + Unpin + Send + 'static,
{
    let (tx, rx) = mpsc::channel(1);
    let task = tokio::spawn(async move {
        loop {
            let received = read_frame(&mut reader).await;
            let failed = received.is_err();
            if tx.send(received).await.is_err() || failed {
                return;
            }
        }
    });
    (task, rx)
}

async fn recv_frame(frames: &mut mpsc::Receiver<Received>) -> Received {
    frames.recv().await.unwrap_or(Err(FrameError::ConnectionClosed))
}

fn received_event(received: Received) -> Event {
    match received {
        Ok(frame) => Event::Frame(frame),
        Err(e) => Event::ReceiveFailed(e),
    }
}

fn ends_input(frame: &Frame) -> bool {
    matches!(
        frame.decode_as::<ClientMsg>(MessageType::ClientMsg),
        Ok(ClientMsg { body: Some(client_msg::Body::Data(data)) }) if data.eof
    )
}

/// Push `chunk` into the call input, reading the stream while the pipe is
/// full. Frames that arrive meanwhile go to `backlog`. A receive failure ends
/// the wait at once, except a half-close after the client's end of input,
/// which is queued like a frame.
async fn feed_input(
    input: &mut InputPipe,
    chunk: Bytes,
    eof: bool,
    frames: &mut mpsc::Receiver<Received>,
    backlog: &mut VecDeque<Received>,
) -> Result<(), EngageError> {
    let mut input_ended = eof || backlog.iter().any(|r| matches!(r, Ok(f) if ends_input(f)));
    let mut receiving = !backlog.iter().any(Result::is_err);

    let write = input.write(chunk);
    tokio::pin!(write);
    loop {
        tokio::select! {
            written = &mut write => return written,
            received = recv_frame(frames), if receiving && backlog.len() < BACKLOG_CAPACITY => {
                match received {
                    Ok(frame) => {
                        input_ended |= ends_input(&frame);
                        backlog.push_back(Ok(frame));
                    }
                    Err(FrameError::ConnectionClosed) if input_ended => {
                        receiving = false;
                        backlog.push_back(Err(FrameError::ConnectionClosed));
                    }
                    Err(e) => return Err(EngageError::Receive(e)),
                }
            }
        }
    }
}
