//! Admin socket client.
//!
//! # Responsibilities
//! - Own the single TCP connection to the daemon's admin port
//! - Answer the `107` challenge with the signed shared secret
//! - Execute commands strictly one at a time (no pipelining)
//! - Reconnect after a fixed delay until closed
//!
//! # Design Decisions
//! - A background task owns the socket; callers talk to it over channels
//! - A second `request()` while one is outstanding fails fast, nothing queues
//! - Any transport, framing or handshake error drops the socket and the next
//!   connection re-authenticates from scratch
//! - Reconnect failures are logged on the first failure and every
//!   `FAILURE_LOG_INTERVAL`th one after that

use std::fmt;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::time::timeout;

use crate::admin::codec::{
    challenge_token, read_frame, sign_challenge, Response, STATUS_AUTH, STATUS_OK,
};
use crate::admin::command::Command;
use crate::admin::error::{AdminError, AdminResult};
use crate::observability::metrics;

/// Consecutive connection failures between two log lines.
const FAILURE_LOG_INTERVAL: u32 = 10;

/// Where the shared secret comes from.
#[derive(Clone)]
pub enum SecretSource {
    /// Secret bytes held in memory.
    Inline(Vec<u8>),
    /// Secret file, re-read on every connection attempt.
    File(PathBuf),
}

impl SecretSource {
    async fn load(&self) -> AdminResult<Vec<u8>> {
        match self {
            SecretSource::Inline(secret) => Ok(secret.clone()),
            SecretSource::File(path) => {
                tokio::fs::read(path)
                    .await
                    .map_err(|source| AdminError::Secret {
                        path: path.display().to_string(),
                        source,
                    })
            }
        }
    }
}

impl fmt::Debug for SecretSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SecretSource::Inline(_) => f.write_str("Inline([REDACTED])"),
            SecretSource::File(path) => f.debug_tuple("File").field(path).finish(),
        }
    }
}

/// Connection settings for [`AdminClient`].
#[derive(Debug, Clone)]
pub struct AdminClientConfig {
    /// `host:port` of the admin socket.
    pub address: String,
    pub secret: SecretSource,
    pub connect_timeout: Duration,
    /// Deadline for every response frame, including the handshake.
    pub response_timeout: Duration,
    /// Fixed pause between connection attempts.
    pub reconnect_delay: Duration,
}

impl AdminClientConfig {
    pub fn new(address: impl Into<String>, secret: SecretSource) -> Self {
        Self {
            address: address.into(),
            secret,
            connect_timeout: Duration::from_secs(5),
            response_timeout: Duration::from_secs(60),
            reconnect_delay: Duration::from_millis(300),
        }
    }
}

/// Connection state as seen by callers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Authenticating,
    Ready,
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ConnectionState::Disconnected => "disconnected",
            ConnectionState::Connecting => "connecting",
            ConnectionState::Authenticating => "authenticating",
            ConnectionState::Ready => "ready",
        };
        f.write_str(name)
    }
}

/// A command waiting for the connection task.
struct PendingCommand {
    command: Command,
    reply: oneshot::Sender<AdminResult<Response>>,
}

/// Marks the client busy for the lifetime of one `request()` call.
struct InFlightGuard {
    flag: Arc<AtomicBool>,
}

impl InFlightGuard {
    fn acquire(flag: &Arc<AtomicBool>) -> Option<Self> {
        if flag.swap(true, Ordering::AcqRel) {
            return None;
        }
        Some(Self {
            flag: Arc::clone(flag),
        })
    }
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        self.flag.store(false, Ordering::Release);
    }
}

/// Authenticated, self-reconnecting client for the daemon's admin socket.
///
/// Construction spawns the connection task, so it must happen inside a Tokio
/// runtime. Dropping the client closes it.
pub struct AdminClient {
    address: String,
    commands: mpsc::Sender<PendingCommand>,
    state: watch::Receiver<ConnectionState>,
    closed: watch::Sender<bool>,
    in_flight: Arc<AtomicBool>,
    failures: Arc<AtomicU32>,
}

impl AdminClient {
    /// Create the client and start connecting in the background.
    pub fn connect(config: AdminClientConfig) -> Self {
        let (commands_tx, commands_rx) = mpsc::channel(1);
        let (state_tx, state_rx) = watch::channel(ConnectionState::Connecting);
        let (closed_tx, closed_rx) = watch::channel(false);
        let failures = Arc::new(AtomicU32::new(0));
        let address = config.address.clone();

        let task = ConnectionTask {
            config,
            commands: commands_rx,
            state: state_tx,
            failures: Arc::clone(&failures),
        };
        tokio::spawn(task.run(closed_rx));

        tracing::debug!(address = %address, "Admin client started");

        Self {
            address,
            commands: commands_tx,
            state: state_rx,
            closed: closed_tx,
            in_flight: Arc::new(AtomicBool::new(false)),
            failures,
        }
    }

    /// Send one command and wait for its response.
    ///
    /// Fails immediately with [`AdminError::ParallelRequest`] while another
    /// request is outstanding, and with [`AdminError::Disconnected`] while the
    /// client waits to reconnect. Commands submitted while connecting are sent
    /// as soon as the handshake succeeds.
    pub async fn request(&self, command: Command) -> AdminResult<Response> {
        if self.is_closed() {
            return Err(AdminError::Closed);
        }
        let _guard = InFlightGuard::acquire(&self.in_flight).ok_or(AdminError::ParallelRequest)?;
        if self.state() == ConnectionState::Disconnected {
            return Err(AdminError::Disconnected);
        }

        let (reply, response) = oneshot::channel();
        self.commands
            .send(PendingCommand { command, reply })
            .await
            .map_err(|_| AdminError::Closed)?;

        match response.await {
            Ok(result) => result,
            Err(_) if self.is_closed() => Err(AdminError::Closed),
            Err(_) => Err(AdminError::Disconnected),
        }
    }

    pub fn state(&self) -> ConnectionState {
        *self.state.borrow()
    }

    /// Wait until the connection is authenticated.
    pub async fn wait_ready(&self, deadline: Duration) -> AdminResult<()> {
        let mut state = self.state.clone();
        let ready = match timeout(deadline, state.wait_for(|s| *s == ConnectionState::Ready)).await
        {
            Ok(Ok(_)) => Ok(()),
            Ok(Err(_)) => Err(AdminError::Closed),
            Err(_) => Err(AdminError::Timeout(deadline)),
        };
        ready
    }

    /// Connection attempts that failed since the last successful handshake.
    pub fn consecutive_failures(&self) -> u32 {
        self.failures.load(Ordering::Relaxed)
    }

    pub fn address(&self) -> &str {
        &self.address
    }

    pub fn is_closed(&self) -> bool {
        *self.closed.borrow()
    }

    /// Stop reconnecting and drop the socket. Safe to call repeatedly.
    pub fn close(&self) {
        if !self.closed.send_replace(true) {
            tracing::debug!(address = %self.address, "Admin client closed");
        }
    }
}

impl Drop for AdminClient {
    fn drop(&mut self) {
        self.close();
    }
}

impl fmt::Debug for AdminClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AdminClient")
            .field("address", &self.address)
            .field("state", &self.state())
            .field("closed", &self.is_closed())
            .finish()
    }
}

/// Outcome of waiting on an idle, authenticated connection.
enum Idle {
    Command(PendingCommand),
    Unsolicited,
    Eof,
    Dropped,
}

/// Background task that owns the socket.
struct ConnectionTask {
    config: AdminClientConfig,
    commands: mpsc::Receiver<PendingCommand>,
    state: watch::Sender<ConnectionState>,
    failures: Arc<AtomicU32>,
}

impl ConnectionTask {
    async fn run(mut self, mut closed: watch::Receiver<bool>) {
        loop {
            if *closed.borrow() {
                break;
            }

            let outcome = tokio::select! {
                res = self.session() => res,
                _ = closed.changed() => Ok(()),
            };

            self.set_state(ConnectionState::Disconnected);
            match outcome {
                Ok(()) => break,
                Err(err) => {
                    if *closed.borrow() {
                        break;
                    }
                    let failures = self.failures.fetch_add(1, Ordering::Relaxed) + 1;
                    metrics::record_admin_connect_failure();
                    if failures == 1 || failures % FAILURE_LOG_INTERVAL == 0 {
                        tracing::warn!(
                            address = %self.config.address,
                            failures,
                            error = %err,
                            "Admin socket unavailable, reconnecting"
                        );
                    }
                    if !self.pause(&mut closed).await {
                        break;
                    }
                }
            }
        }

        self.set_state(ConnectionState::Disconnected);
        self.commands.close();
        while let Ok(pending) = self.commands.try_recv() {
            let _ = pending.reply.send(Err(AdminError::Closed));
        }
        tracing::debug!(address = %self.config.address, "Admin connection task stopped");
    }

    /// Sit out the reconnect delay, rejecting commands submitted meanwhile.
    /// Returns `false` once the client is closed.
    async fn pause(&mut self, closed: &mut watch::Receiver<bool>) -> bool {
        let delay = tokio::time::sleep(self.config.reconnect_delay);
        tokio::pin!(delay);
        loop {
            tokio::select! {
                _ = &mut delay => return true,
                _ = closed.changed() => return false,
                Some(pending) = self.commands.recv() => {
                    let _ = pending.reply.send(Err(AdminError::Disconnected));
                }
            }
        }
    }

    async fn session(&mut self) -> AdminResult<()> {
        self.set_state(ConnectionState::Connecting);
        let secret = self.config.secret.load().await?;

        let stream = timeout(
            self.config.connect_timeout,
            TcpStream::connect(&self.config.address),
        )
        .await
        .map_err(|_| AdminError::Timeout(self.config.connect_timeout))??;
        stream.set_nodelay(true)?;

        let (read_half, mut writer) = stream.into_split();
        let mut reader = BufReader::new(read_half);

        self.set_state(ConnectionState::Authenticating);
        self.authenticate(&mut reader, &mut writer, &secret).await?;

        self.failures.store(0, Ordering::Relaxed);
        self.set_state(ConnectionState::Ready);
        tracing::info!(address = %self.config.address, "Admin socket authenticated");

        self.serve(&mut reader, &mut writer).await
    }

    async fn authenticate<R, W>(
        &self,
        reader: &mut R,
        writer: &mut W,
        secret: &[u8],
    ) -> AdminResult<()>
    where
        R: AsyncBufRead + Unpin,
        W: AsyncWrite + Unpin,
    {
        let (status, body) = self.read_response(reader).await?;
        match status {
            STATUS_AUTH => {
                let signature = sign_challenge(challenge_token(&body)?, secret);
                writer
                    .write_all(format!("auth {signature}\n").as_bytes())
                    .await?;
                let (status, _) = self.read_response(reader).await?;
                if status != STATUS_OK {
                    return Err(AdminError::Authentication { status });
                }
                Ok(())
            }
            STATUS_OK => {
                tracing::debug!(
                    address = %self.config.address,
                    "Admin socket did not request authentication"
                );
                Ok(())
            }
            other => Err(AdminError::Authentication { status: other }),
        }
    }

    async fn serve<R, W>(&mut self, reader: &mut R, writer: &mut W) -> AdminResult<()>
    where
        R: AsyncBufRead + Unpin,
        W: AsyncWrite + Unpin,
    {
        loop {
            let idle = tokio::select! {
                pending = self.commands.recv() => match pending {
                    Some(pending) => Idle::Command(pending),
                    None => Idle::Dropped,
                },
                res = reader.fill_buf() => match res {
                    Ok(buf) if buf.is_empty() => Idle::Eof,
                    Ok(_) => Idle::Unsolicited,
                    Err(e) => return Err(e.into()),
                },
            };

            match idle {
                Idle::Command(pending) => {
                    let result = self
                        .execute(reader, writer, &pending.command)
                        .await
                        .and_then(Response::into_result);
                    match result {
                        Err(err) if err.is_connection_fatal() => {
                            let _ = pending.reply.send(Err(replicate(&err)));
                            return Err(err);
                        }
                        other => {
                            let _ = pending.reply.send(other);
                        }
                    }
                }
                Idle::Unsolicited => {
                    let (status, body) = self.read_response(reader).await?;
                    tracing::warn!(
                        status,
                        body = %body.trim(),
                        "Ignoring unsolicited admin socket frame"
                    );
                }
                Idle::Eof => {
                    return Err(AdminError::Transport(std::io::Error::new(
                        std::io::ErrorKind::UnexpectedEof,
                        "admin socket closed by peer",
                    )));
                }
                Idle::Dropped => return Ok(()),
            }
        }
    }

    async fn execute<R, W>(
        &self,
        reader: &mut R,
        writer: &mut W,
        command: &Command,
    ) -> AdminResult<Response>
    where
        R: AsyncBufRead + Unpin,
        W: AsyncWrite + Unpin,
    {
        tracing::debug!(command = %command, "Sending admin command");
        writer
            .write_all(format!("{command}\n").as_bytes())
            .await?;
        let (status, body) = self.read_response(reader).await?;
        metrics::record_admin_command(status);
        tracing::debug!(command = %command, status, "Admin command answered");
        Ok(Response::from_parts(status, &body))
    }

    async fn read_response<R>(&self, reader: &mut R) -> AdminResult<(u16, String)>
    where
        R: AsyncBufRead + Unpin,
    {
        timeout(self.config.response_timeout, read_frame(reader))
            .await
            .map_err(|_| AdminError::Timeout(self.config.response_timeout))?
    }

    fn set_state(&self, state: ConnectionState) {
        let previous = self.state.send_replace(state);
        if previous != state {
            metrics::set_admin_connected(state == ConnectionState::Ready);
            tracing::trace!(from = %previous, to = %state, "Admin connection state changed");
        }
    }
}

/// Copy of a connection-fatal error for the caller whose command died with
/// the connection; the original goes to the reconnect loop.
fn replicate(err: &AdminError) -> AdminError {
    match err {
        AdminError::Transport(e) => {
            AdminError::Transport(std::io::Error::new(e.kind(), e.to_string()))
        }
        AdminError::Timeout(d) => AdminError::Timeout(*d),
        AdminError::Protocol(msg) => AdminError::Protocol(msg.clone()),
        _ => AdminError::Disconnected,
    }
}
