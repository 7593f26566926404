//! Subprocess transport: newline-delimited JSON over child process stdio.
//!
//! The server runs as a child process. Requests go down its stdin one JSON
//! message per line; responses come back the same way on stdout. stderr is
//! a diagnostic stream, never protocol data, and is drained into the log.
//!
//! Locking follows the hybrid pattern used across the workspace:
//! `std::sync::Mutex` for the state field (short-lived locks, never held
//! across `.await`), `tokio::sync::Mutex` for the child handle and I/O
//! channel ends (held across `.await`).

use std::process::Stdio;
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use futures::StreamExt;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, BufWriter};
use tokio::process::{Child, Command};
use tokio::sync::{mpsc, Mutex as TokioMutex};
use tokio::time::timeout;
use tokio_util::codec::{FramedRead, LinesCodec, LinesCodecError};
use tracing::{debug, error, info, trace, warn};

use crate::core::{Transport, TransportKind, TransportMessage, TransportState};
use crate::error::{TransportError, TransportResult};
use crate::events::TransportEventEmitter;

/// Configuration for the subprocess transport.
#[derive(Debug, Clone)]
pub struct SubprocessConfig {
    /// Command to execute
    pub command: String,
    /// Arguments to pass to the command
    pub args: Vec<String>,
    /// Environment variables to set
    pub env: Vec<(String, String)>,
    /// Working directory for the process
    pub working_directory: Option<String>,
    /// Timeout for process startup
    pub startup_timeout: Duration,
    /// Timeout for graceful shutdown before a forced kill
    pub shutdown_timeout: Duration,
    /// Maximum accepted line length in bytes
    pub max_message_size: usize,
    /// Capacity of the stdin/stdout channels
    pub channel_capacity: usize,
}

impl Default for SubprocessConfig {
    fn default() -> Self {
        Self {
            command: String::new(),
            args: Vec::new(),
            env: Vec::new(),
            working_directory: None,
            startup_timeout: Duration::from_secs(30),
            shutdown_timeout: Duration::from_secs(5),
            max_message_size: 10 * 1024 * 1024,
            channel_capacity: 100,
        }
    }
}

/// Child process stdio transport.
#[derive(Debug)]
pub struct SubprocessTransport {
    config: SubprocessConfig,
    state: Arc<StdMutex<TransportState>>,
    child: Arc<TokioMutex<Option<Child>>>,
    stdin_tx: Arc<TokioMutex<Option<mpsc::Sender<String>>>>,
    stdout_rx: Arc<TokioMutex<Option<mpsc::Receiver<String>>>>,
    events: TransportEventEmitter,
}

impl SubprocessTransport {
    /// Create a transport for the given launch recipe.
    pub fn new(config: SubprocessConfig) -> Self {
        Self {
            config,
            state: Arc::new(StdMutex::new(TransportState::Disconnected)),
            child: Arc::new(TokioMutex::new(None)),
            stdin_tx: Arc::new(TokioMutex::new(None)),
            stdout_rx: Arc::new(TokioMutex::new(None)),
            events: TransportEventEmitter::default(),
        }
    }

    /// Create a transport that reports lifecycle events through `events`.
    pub fn with_events(config: SubprocessConfig, events: TransportEventEmitter) -> Self {
        let mut transport = Self::new(config);
        transport.events = events;
        transport
    }

    fn set_state(&self, state: TransportState) {
        *self.state.lock().expect("state mutex poisoned") = state;
    }

    async fn start_process(&self) -> TransportResult<()> {
        if self.config.command.is_empty() {
            return Err(TransportError::ConfigurationError(
                "command cannot be empty".to_string(),
            ));
        }

        info!(
            command = %self.config.command,
            args = ?self.config.args,
            "starting subprocess server"
        );

        let mut cmd = Command::new(&self.config.command);
        cmd.args(&self.config.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        if let Some(ref dir) = self.config.working_directory {
            cmd.current_dir(dir);
        }
        for (key, value) in &self.config.env {
            cmd.env(key, value);
        }

        let mut child = cmd.spawn().map_err(|e| {
            TransportError::ConnectionFailed(format!("failed to spawn process: {e}"))
        })?;

        let stdin = child.stdin.take().ok_or_else(|| {
            TransportError::ConnectionFailed("failed to take stdin handle".to_string())
        })?;
        let stdout = child.stdout.take().ok_or_else(|| {
            TransportError::ConnectionFailed("failed to take stdout handle".to_string())
        })?;
        let stderr = child.stderr.take().ok_or_else(|| {
            TransportError::ConnectionFailed("failed to take stderr handle".to_string())
        })?;

        let (stdin_tx, mut stdin_rx) = mpsc::channel::<String>(self.config.channel_capacity);
        let (stdout_tx, stdout_rx) = mpsc::channel::<String>(self.config.channel_capacity);

        // Writer task: one line per message, flushed immediately.
        tokio::spawn(async move {
            let mut writer = BufWriter::new(stdin);
            while let Some(line) = stdin_rx.recv().await {
                if let Err(e) = writer.write_all(line.as_bytes()).await {
                    error!(error = %e, "failed to write to subprocess stdin");
                    break;
                }
                if let Err(e) = writer.write_all(b"\n").await {
                    error!(error = %e, "failed to write newline to subprocess stdin");
                    break;
                }
                if let Err(e) = writer.flush().await {
                    error!(error = %e, "failed to flush subprocess stdin");
                    break;
                }
                trace!(line = %line, "sent line to subprocess");
            }
            debug!("stdin writer task completed");
        });

        // Reader task: the codec yields only complete newline-terminated
        // lines, buffering partial frames and bounding line length. Lines
        // that are not JSON (stray prints from the server) are skipped.
        let max_size = self.config.max_message_size;
        tokio::spawn(async move {
            let mut lines = FramedRead::new(stdout, LinesCodec::new_with_max_length(max_size));
            loop {
                match lines.next().await {
                    Some(Ok(line)) => {
                        let trimmed = line.trim();
                        if trimmed.is_empty() {
                            continue;
                        }
                        if !trimmed.starts_with('{') {
                            debug!(line = %trimmed, "skipping non-JSON line from subprocess");
                            continue;
                        }
                        trace!(line = %trimmed, "received line from subprocess");
                        if stdout_tx.send(trimmed.to_string()).await.is_err() {
                            debug!("stdout receiver dropped, stopping reader task");
                            break;
                        }
                    }
                    Some(Err(LinesCodecError::MaxLineLengthExceeded)) => {
                        // The codec discards the rest of the oversized line
                        // and resumes at the next newline.
                        warn!(max = max_size, "dropping oversized line from subprocess");
                    }
                    Some(Err(LinesCodecError::Io(e))) => {
                        error!(error = %e, "failed to read subprocess stdout");
                        break;
                    }
                    None => break,
                }
            }
            debug!("stdout reader task completed");
        });

        // stderr is diagnostics only.
        tokio::spawn(async move {
            let mut lines = BufReader::new(stderr).lines();
            while let Ok(Some(line)) = lines.next_line().await {
                debug!(line = %line, "subprocess stderr");
            }
        });

        *self.child.lock().await = Some(child);
        *self.stdin_tx.lock().await = Some(stdin_tx);
        *self.stdout_rx.lock().await = Some(stdout_rx);

        match timeout(self.config.startup_timeout, self.check_alive()).await {
            Ok(Ok(())) => {
                self.set_state(TransportState::Connected);
                info!(command = %self.config.command, "subprocess server started");
                self.events
                    .emit_connected(TransportKind::Subprocess, self.endpoint());
                Ok(())
            }
            Ok(Err(e)) => {
                self.stop_process(Some(e.to_string())).await?;
                Err(e)
            }
            Err(_) => {
                self.stop_process(Some("startup timed out".to_string()))
                    .await?;
                Err(TransportError::Timeout("subprocess startup".to_string()))
            }
        }
    }

    /// Fail fast if the process already exited (bad command arguments,
    /// missing interpreter, crash on startup).
    async fn check_alive(&self) -> TransportResult<()> {
        let mut child_guard = self.child.lock().await;
        match child_guard.as_mut() {
            Some(child) => match child.try_wait() {
                Ok(Some(status)) => Err(TransportError::ConnectionFailed(format!(
                    "process exited early: {status}"
                ))),
                Ok(None) => Ok(()),
                Err(e) => Err(TransportError::ConnectionFailed(format!(
                    "failed to check process status: {e}"
                ))),
            },
            None => Err(TransportError::ConnectionFailed(
                "no child process".to_string(),
            )),
        }
    }

    async fn stop_process(&self, reason: Option<String>) -> TransportResult<()> {
        // Dropping the channel ends stops the writer task and unblocks
        // any pending receive.
        *self.stdin_tx.lock().await = None;
        *self.stdout_rx.lock().await = None;

        if let Some(mut child) = self.child.lock().await.take() {
            if let Err(e) = child.start_kill() {
                warn!(error = %e, "failed to signal subprocess");
            }
            match timeout(self.config.shutdown_timeout, child.wait()).await {
                Ok(Ok(status)) => {
                    info!(status = %status, "subprocess exited");
                }
                Ok(Err(e)) => {
                    error!(error = %e, "failed waiting for subprocess exit");
                }
                Err(_) => {
                    warn!("subprocess shutdown timed out, forcing kill");
                    if let Err(e) = child.kill().await {
                        error!(error = %e, "failed to kill subprocess");
                    }
                }
            }
        }

        self.set_state(TransportState::Disconnected);
        self.events
            .emit_disconnected(TransportKind::Subprocess, self.endpoint(), reason);
        Ok(())
    }

    /// Whether the child process is still running.
    pub async fn is_process_alive(&self) -> bool {
        let mut child_guard = self.child.lock().await;
        match child_guard.as_mut() {
            Some(child) => matches!(child.try_wait(), Ok(None)),
            None => false,
        }
    }
}

#[async_trait]
impl Transport for SubprocessTransport {
    fn kind(&self) -> TransportKind {
        TransportKind::Subprocess
    }

    fn endpoint(&self) -> String {
        format!("stdio://{}", self.config.command)
    }

    fn state(&self) -> TransportState {
        self.state.lock().expect("state mutex poisoned").clone()
    }

    async fn connect(&self) -> TransportResult<()> {
        match self.state() {
            TransportState::Connected => return Ok(()),
            TransportState::Connecting => {
                return Err(TransportError::ConfigurationError(
                    "already connecting".to_string(),
                ));
            }
            _ => {}
        }
        self.set_state(TransportState::Connecting);
        let result = self.start_process().await;
        if result.is_err() {
            self.set_state(TransportState::Disconnected);
        }
        result
    }

    async fn disconnect(&self) -> TransportResult<()> {
        if matches!(self.state(), TransportState::Disconnected) {
            return Ok(());
        }
        self.set_state(TransportState::Disconnecting);
        self.stop_process(Some("disconnect requested".to_string()))
            .await
    }

    async fn send(&self, message: TransportMessage) -> TransportResult<()> {
        if !self.is_connected() {
            return Err(TransportError::NotConnected);
        }
        if message.size() > self.config.max_message_size {
            return Err(TransportError::SendFailed(format!(
                "message too large: {} bytes (max {})",
                message.size(),
                self.config.max_message_size
            )));
        }

        let line = String::from_utf8(message.payload.to_vec())
            .map_err(|e| TransportError::SerializationFailed(format!("invalid UTF-8: {e}")))?;
        if line.contains('\n') {
            return Err(TransportError::SerializationFailed(
                "payload must not contain embedded newlines".to_string(),
            ));
        }

        let size = line.len();
        let stdin_tx = self.stdin_tx.lock().await;
        match stdin_tx.as_ref() {
            Some(sender) => {
                sender.send(line).await.map_err(|_| {
                    TransportError::ConnectionLost("stdin channel closed".to_string())
                })?;
                self.events.emit_message_sent(size);
                Ok(())
            }
            None => Err(TransportError::ConnectionLost(
                "stdin channel unavailable".to_string(),
            )),
        }
    }

    async fn receive(&self) -> TransportResult<Option<TransportMessage>> {
        let mut stdout_rx = self.stdout_rx.lock().await;
        match stdout_rx.as_mut() {
            Some(receiver) => match receiver.recv().await {
                Some(line) => {
                    self.events.emit_message_received(line.len());
                    Ok(Some(TransportMessage::new(Bytes::from(line))))
                }
                None => {
                    // Reader task ended: the process exited or closed stdout.
                    debug!("subprocess stdout channel closed");
                    drop(stdout_rx);
                    if !self.is_process_alive().await {
                        self.stop_process(Some("process exited".to_string())).await?;
                    }
                    Ok(None)
                }
            },
            None => Ok(None),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use tokio::time::sleep;

    #[test]
    fn default_config() {
        let config = SubprocessConfig::default();
        assert_eq!(config.startup_timeout, Duration::from_secs(30));
        assert_eq!(config.max_message_size, 10 * 1024 * 1024);
    }

    #[tokio::test]
    async fn starts_disconnected() {
        let transport = SubprocessTransport::new(SubprocessConfig {
            command: "cat".to_string(),
            ..Default::default()
        });
        assert_eq!(transport.state(), TransportState::Disconnected);
        assert!(!transport.is_connected());
    }

    #[tokio::test]
    async fn empty_command_is_a_configuration_error() {
        let transport = SubprocessTransport::new(SubprocessConfig::default());
        let result = transport.connect().await;
        assert!(matches!(
            result,
            Err(TransportError::ConfigurationError(_))
        ));
    }

    #[tokio::test]
    async fn send_requires_connection() {
        let transport = SubprocessTransport::new(SubprocessConfig {
            command: "cat".to_string(),
            ..Default::default()
        });
        let result = transport
            .send(TransportMessage::new(Bytes::from_static(b"{}")))
            .await;
        assert!(matches!(result, Err(TransportError::NotConnected)));
    }

    #[tokio::test]
    async fn disconnect_is_idempotent() {
        let transport = SubprocessTransport::new(SubprocessConfig {
            command: "cat".to_string(),
            ..Default::default()
        });
        assert!(transport.disconnect().await.is_ok());
        assert!(transport.disconnect().await.is_ok());
    }

    #[tokio::test]
    async fn cat_round_trip_skips_non_json_lines() {
        let transport = SubprocessTransport::new(SubprocessConfig {
            command: "cat".to_string(),
            startup_timeout: Duration::from_secs(5),
            ..Default::default()
        });
        if transport.connect().await.is_err() {
            // Process spawning may be restricted in some environments.
            return;
        }
        sleep(Duration::from_millis(50)).await;

        transport
            .send(TransportMessage::new(Bytes::from_static(
                br#"{"jsonrpc":"2.0","method":"ping","id":1}"#,
            )))
            .await
            .unwrap();

        let received = transport.receive().await.unwrap().unwrap();
        assert_eq!(
            received.payload,
            Bytes::from_static(br#"{"jsonrpc":"2.0","method":"ping","id":1}"#)
        );

        transport.disconnect().await.unwrap();
        assert_eq!(transport.state(), TransportState::Disconnected);
    }

    #[tokio::test]
    async fn embedded_newline_is_rejected() {
        let transport = SubprocessTransport::new(SubprocessConfig {
            command: "cat".to_string(),
            startup_timeout: Duration::from_secs(5),
            ..Default::default()
        });
        if transport.connect().await.is_err() {
            return;
        }
        let result = transport
            .send(TransportMessage::new(Bytes::from_static(b"{}\n{}")))
            .await;
        assert!(matches!(
            result,
            Err(TransportError::SerializationFailed(_))
        ));
        let _ = transport.disconnect().await;
    }
}
