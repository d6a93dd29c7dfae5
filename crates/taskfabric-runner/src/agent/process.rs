// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Process engine: one child process per call.
//!
//! The request body is streamed to the child's stdin and its stdout becomes
//! the response body. Call metadata is exported as environment variables:
//!
//! | Variable | Value |
//! |----------|-------|
//! | `FN_CALL_ID` | call id |
//! | `FN_APP_ID` | application id |
//! | `FN_FN_ID` | function id |
//! | `FN_IMAGE` | function image |
//! | `FN_METHOD` | request method |
//! | `FN_REQUEST_URL` | request URL |
//! | `FN_MEMORY_MB` | memory reservation |
//! | `FN_HEADER_<NAME>` | request headers, comma joined |
//!
//! Descriptor `config` entries are exported last, under their own names.

use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt};
use tokio::process::{ChildStdin, ChildStdout, Command};
use tracing::{debug, info, warn};

use super::{Agent, AgentError, Call, CallDescriptor, Slot, SlotPool};
use crate::pipe::CallInput;
use crate::response::ResponseSink;

/// Used when the descriptor does not set `timeout_secs`.
pub const DEFAULT_CALL_TIMEOUT: Duration = Duration::from_secs(30);

/// Status reported when the process fails before writing any output.
const FAILED_STATUS: i32 = 502;

const READ_BUFFER_SIZE: usize = 32 * 1024;
const STDERR_TAIL_LINES: usize = 10;

pub struct ProcessAgent {
    program: String,
    args: Vec<String>,
    slots: SlotPool,
    default_timeout: Duration,
}

impl ProcessAgent {
    /// `command` is the program followed by its arguments.
    pub fn new(command: Vec<String>, slots: SlotPool) -> Result<Self, AgentError> {
        let mut parts = command.into_iter();
        let program = parts
            .next()
            .ok_or_else(|| AgentError::StartFailed("empty command".to_string()))?;
        Ok(Self {
            program,
            args: parts.collect(),
            slots,
            default_timeout: DEFAULT_CALL_TIMEOUT,
        })
    }

    pub fn with_default_timeout(mut self, timeout: Duration) -> Self {
        self.default_timeout = timeout;
        self
    }
}

#[async_trait]
impl Agent for ProcessAgent {
    fn engine_type(&self) -> &'static str {
        "process"
    }

    async fn get_call(
        &self,
        descriptor: CallDescriptor,
        input: CallInput,
        output: Arc<dyn ResponseSink>,
    ) -> Result<Box<dyn Call>, AgentError> {
        let slot = self.slots.acquire().await?;
        let timeout = descriptor.timeout_or(self.default_timeout);
        Ok(Box::new(ProcessCall {
            command: build_command(&self.program, &self.args, &descriptor),
            descriptor,
            timeout,
            input,
            output,
            _slot: slot,
        }))
    }
}

fn build_command(program: &str, args: &[String], descriptor: &CallDescriptor) -> Command {
    let mut cmd = Command::new(program);
    cmd.args(args)
        .env("FN_CALL_ID", &descriptor.id)
        .env("FN_APP_ID", &descriptor.app_id)
        .env("FN_FN_ID", &descriptor.fn_id)
        .env("FN_IMAGE", &descriptor.image)
        .env("FN_METHOD", &descriptor.method)
        .env("FN_REQUEST_URL", &descriptor.url)
        .env("FN_MEMORY_MB", descriptor.memory_mb.to_string());
    for (name, values) in &descriptor.headers {
        cmd.env(header_env_name(name), values.join(", "));
    }
    for (key, value) in &descriptor.config {
        cmd.env(key, value);
    }
    cmd.stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);
    cmd
}

/// `Content-Type` becomes `FN_HEADER_CONTENT_TYPE`.
fn header_env_name(name: &str) -> String {
    let mut env_name = String::from("FN_HEADER_");
    env_name.extend(name.chars().map(|c| {
        if c.is_ascii_alphanumeric() {
            c.to_ascii_uppercase()
        } else {
            '_'
        }
    }));
    env_name
}

struct ProcessCall {
    descriptor: CallDescriptor,
    command: Command,
    timeout: Duration,
    input: CallInput,
    output: Arc<dyn ResponseSink>,
    _slot: Slot,
}

#[async_trait]
impl Call for ProcessCall {
    fn id(&self) -> &str {
        &self.descriptor.id
    }

    async fn run(self: Box<Self>) -> Result<(), AgentError> {
        let ProcessCall {
            descriptor,
            mut command,
            timeout,
            mut input,
            output,
            _slot,
        } = *self;
        let call_id = descriptor.id;

        let mut child = command
            .spawn()
            .map_err(|e| AgentError::StartFailed(e.to_string()))?;
        info!(call_id = %call_id, pid = ?child.id(), "function process started");

        let (Some(stdin), Some(mut stdout), Some(mut stderr)) =
            (child.stdin.take(), child.stdout.take(), child.stderr.take())
        else {
            return Err(AgentError::StartFailed(
                "child process pipes unavailable".to_string(),
            ));
        };

        let collect_stderr = async {
            let mut err = Vec::new();
            let _ = stderr.read_to_end(&mut err).await;
            err
        };

        let exchange = async {
            let (fed, drained, stderr) = tokio::join!(
                feed_stdin(&mut input, stdin),
                drain_stdout(&mut stdout, output.as_ref()),
                collect_stderr
            );
            let status = child.wait().await?;
            Ok::<_, AgentError>((fed, drained, stderr, status))
        };

        // On timeout the child is killed when dropped.
        let (fed, drained, stderr, status) = match tokio::time::timeout(timeout, exchange).await {
            Ok(result) => result?,
            Err(_) => {
                warn!(call_id = %call_id, ?timeout, "function timed out");
                output.set_status(FAILED_STATUS).await;
                return Err(AgentError::Timeout(timeout));
            }
        };

        fed?;
        if !status.success() {
            let exit_code = status.code().unwrap_or(-1);
            let stderr = stderr_tail(&stderr);
            warn!(call_id = %call_id, exit_code, stderr = %stderr, "function failed");
            output.set_status(FAILED_STATUS).await;
            drained?;
            return Err(AgentError::ExitCode { exit_code, stderr });
        }
        drained?;

        debug!(call_id = %call_id, "function process exited");
        Ok(())
    }
}

/// Copy the call input to the child's stdin, closing it at EOF.
///
/// A child that stops reading early is not an error; a broken call input is.
async fn feed_stdin<R>(input: &mut R, mut stdin: ChildStdin) -> Result<(), AgentError>
where
    R: AsyncRead + Unpin,
{
    let mut buf = vec![0u8; READ_BUFFER_SIZE];
    loop {
        let n = input.read(&mut buf).await.map_err(AgentError::Input)?;
        if n == 0 {
            break;
        }
        if let Err(e) = stdin.write_all(&buf[..n]).await {
            debug!("function stopped reading stdin: {}", e);
            // Keep consuming so an aborted input is still noticed
            while input.read(&mut buf).await.map_err(AgentError::Input)? > 0 {}
            return Ok(());
        }
    }
    let _ = stdin.shutdown().await;
    Ok(())
}

/// Stream the child's stdout into the response body.
async fn drain_stdout(stdout: &mut ChildStdout, output: &dyn ResponseSink) -> Result<(), AgentError> {
    let mut buf = vec![0u8; READ_BUFFER_SIZE];
    loop {
        let n = stdout.read(&mut buf).await?;
        if n == 0 {
            return Ok(());
        }
        output.write(&buf[..n]).await?;
    }
}

fn stderr_tail(stderr: &[u8]) -> String {
    let text = String::from_utf8_lossy(stderr);
    let lines: Vec<&str> = text.trim().lines().collect();
    let start = lines.len().saturating_sub(STDERR_TAIL_LINES);
    lines[start..].join("\n")
}
