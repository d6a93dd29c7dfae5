// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Bounded in-memory pipe carrying request body bytes from the receive loop
//! to the call executor.
//!
//! The write end ([`InputPipe`]) is owned by the engagement session, the read
//! end ([`CallInput`]) is handed to the execution engine. Closing the write end
//! yields EOF on the read end; aborting it yields a `BrokenPipe` error once the
//! already buffered chunks are consumed.

use std::io;
use std::pin::Pin;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::task::{Context, Poll};

use bytes::Bytes;
use tokio::io::{AsyncRead, ReadBuf};
use tokio::sync::mpsc;

use crate::error::EngageError;

/// Create a pipe that buffers up to `capacity` chunks.
pub fn input_pipe(capacity: usize) -> (InputPipe, CallInput) {
    let (tx, rx) = mpsc::channel(capacity.max(1));
    let aborted = Arc::new(AtomicBool::new(false));
    (
        InputPipe {
            tx: Some(tx),
            aborted: aborted.clone(),
        },
        CallInput {
            rx,
            current: Bytes::new(),
            aborted,
        },
    )
}

/// Write end of the call input.
#[derive(Debug)]
pub struct InputPipe {
    tx: Option<mpsc::Sender<Bytes>>,
    aborted: Arc<AtomicBool>,
}

impl InputPipe {
    /// Push a chunk. Waits while the pipe is full.
    ///
    /// Fails with [`EngageError::InputClosed`] after `close`/`abort` or when
    /// the reader is gone.
    pub async fn write(&mut self, chunk: Bytes) -> Result<(), EngageError> {
        let tx = self.tx.as_ref().ok_or(EngageError::InputClosed)?;
        tx.send(chunk).await.map_err(|_| EngageError::InputClosed)
    }

    /// End of input: the reader sees EOF after the buffered chunks.
    pub fn close(&mut self) {
        self.tx = None;
    }

    /// Tear down after a fault: the reader sees an error instead of EOF.
    pub fn abort(&mut self) {
        if self.tx.is_some() {
            self.aborted.store(true, Ordering::SeqCst);
            self.tx = None;
        }
    }

    pub fn is_closed(&self) -> bool {
        self.tx.is_none()
    }
}

/// Read end of the call input, handed to the engine.
#[derive(Debug)]
pub struct CallInput {
    rx: mpsc::Receiver<Bytes>,
    current: Bytes,
    aborted: Arc<AtomicBool>,
}

impl AsyncRead for CallInput {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        let this = self.get_mut();
        loop {
            if !this.current.is_empty() {
                let n = this.current.len().min(buf.remaining());
                buf.put_slice(&this.current.split_to(n));
                return Poll::Ready(Ok(()));
            }

            match this.rx.poll_recv(cx) {
                Poll::Ready(Some(chunk)) => this.current = chunk,
                Poll::Ready(None) if this.aborted.load(Ordering::SeqCst) => {
                    return Poll::Ready(Err(io::Error::new(
                        io::ErrorKind::BrokenPipe,
                        "call input aborted",
                    )));
                }
                Poll::Ready(None) => return Poll::Ready(Ok(())),
                Poll::Pending => return Poll::Pending,
            }
        }
    }
}
