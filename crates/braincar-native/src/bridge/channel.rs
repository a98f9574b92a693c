//! Command channel to the vehicle (sender side).
//!
//! A single TCP connection carrying newline-terminated tokens, one per
//! evaluated window, strictly in order. The channel is a small state
//! machine:
//!
//! ```text
//! Disconnected ──connect──► Connecting ──ok──► Connected ──send ok──► Connected
//!      ▲                        │                  │
//!      └────────timeout/refused─┘                  ├──write error / peer closed──► Disconnected
//!                                                  └──close──► Closing ──► Disconnected (final)
//! ```
//!
//! A failed token is dropped rather than replayed. Tokens that queued up
//! while the link was down are discarded as well once it is back, so the
//! vehicle only ever sees commands from windows evaluated after the outage.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;
use tokio::sync::mpsc;

use braincar_core::config::{ChannelConfig, ReconnectPolicy};
use braincar_core::protocol::{encode_token, WireFormat, TOKEN_TERMINATOR};
use braincar_core::types::{Directive, Label};

// ============================================================================
// Error Types
// ============================================================================

/// Errors on the command channel.
#[derive(Debug, Error)]
pub enum ChannelError {
    /// Connect attempt did not finish in time
    #[error("Connection to {endpoint} timed out after {timeout_ms} ms")]
    ConnectTimeout {
        /// Target address
        endpoint: String,
        /// Configured bound
        timeout_ms: u64,
    },

    /// Socket error (refused, reset, broken pipe)
    #[error("Communication error: {0}")]
    Io(#[from] std::io::Error),

    /// The peer closed its end
    #[error("Peer closed the connection")]
    PeerClosed,

    /// Send attempted without a connection
    #[error("Not connected")]
    NotConnected,

    /// Channel is shutting down
    #[error("Channel closed")]
    Closed,

    /// Every reconnect attempt failed
    #[error("Gave up after {attempts} reconnect attempts")]
    ReconnectExhausted {
        /// Attempts made
        attempts: u32,
    },
}

/// Result type for channel operations.
pub type ChannelResult<T> = Result<T, ChannelError>;

// ============================================================================
// State
// ============================================================================

/// Connection state of one end of the link.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConnectionState {
    /// No connection
    #[default]
    Disconnected,
    /// Connect in progress
    Connecting,
    /// Tokens may flow
    Connected,
    /// Orderly shutdown in progress
    Closing,
}

/// Counters over the channel's lifetime.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct ChannelStats {
    /// Tokens written and flushed
    pub sent: u64,
    /// Tokens dropped because the link was down
    pub dropped: u64,
    /// Successful connects, including the first
    pub connects: u64,
}

// ============================================================================
// Channel
// ============================================================================

/// Sender end of the command link.
pub struct CommandChannel {
    endpoint: String,
    connect_timeout: Duration,
    stream: Option<TcpStream>,
    state: ConnectionState,
    closed: bool,
    stats: ChannelStats,
}

impl CommandChannel {
    /// Create a disconnected channel.
    #[must_use]
    pub fn new(config: &ChannelConfig) -> Self {
        Self {
            endpoint: config.endpoint.clone(),
            connect_timeout: Duration::from_millis(config.connect_timeout_ms),
            stream: None,
            state: ConnectionState::Disconnected,
            closed: false,
            stats: ChannelStats::default(),
        }
    }

    /// Current state
    #[must_use]
    pub fn state(&self) -> ConnectionState {
        self.state
    }

    /// Vehicle address
    #[must_use]
    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    /// Lifetime counters
    #[must_use]
    pub fn stats(&self) -> ChannelStats {
        self.stats
    }

    /// Open the connection, bounded by the connect timeout.
    ///
    /// Small writes go out immediately (`TCP_NODELAY`).
    ///
    /// # Errors
    ///
    /// [`ChannelError::ConnectTimeout`] or [`ChannelError::Io`]; the channel
    /// is left `Disconnected`. [`ChannelError::Closed`] after [`Self::close`].
    pub async fn connect(&mut self) -> ChannelResult<()> {
        if self.closed {
            return Err(ChannelError::Closed);
        }
        if self.state == ConnectionState::Connected {
            return Ok(());
        }

        self.state = ConnectionState::Connecting;
        tracing::info!("Connecting to {}", self.endpoint);

        let attempt = tokio::time::timeout(self.connect_timeout, TcpStream::connect(&self.endpoint)).await;
        let stream = match attempt {
            Ok(Ok(stream)) => stream,
            Ok(Err(e)) => {
                self.state = ConnectionState::Disconnected;
                return Err(e.into());
            }
            Err(_) => {
                self.state = ConnectionState::Disconnected;
                return Err(ChannelError::ConnectTimeout {
                    endpoint: self.endpoint.clone(),
                    timeout_ms: self.connect_timeout.as_millis() as u64,
                });
            }
        };

        if let Err(e) = stream.set_nodelay(true) {
            tracing::warn!("Could not disable Nagle: {}", e);
        }

        self.stream = Some(stream);
        self.state = ConnectionState::Connected;
        self.stats.connects += 1;
        tracing::info!("Connected to {}", self.endpoint);
        Ok(())
    }

    /// Send a directive as its `GO` / `STOP` / `TURN_RIGHT` token.
    ///
    /// # Errors
    ///
    /// As [`Self::send_token`].
    pub async fn send(&mut self, directive: Directive) -> ChannelResult<()> {
        self.send_token(encode_token(WireFormat::Directives, Label::Unknown, directive)).await
    }

    /// Write one token plus terminator and flush.
    ///
    /// # Errors
    ///
    /// [`ChannelError::NotConnected`] without a connection. A write failure or
    /// a peer that has hung up moves the channel to `Disconnected` and
    /// returns the cause; the token is dropped.
    pub async fn send_token(&mut self, token: &str) -> ChannelResult<()> {
        let Some(stream) = self.stream.as_mut() else {
            self.stats.dropped += 1;
            return Err(ChannelError::NotConnected);
        };

        // The receiver never talks back, so a readable EOF means it hung up.
        let mut scratch = [0u8; 64];
        match stream.try_read(&mut scratch) {
            Ok(0) => {
                self.drop_connection();
                return Err(ChannelError::PeerClosed);
            }
            Ok(_) => {}
            Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => {}
            Err(e) => {
                self.drop_connection();
                return Err(e.into());
            }
        }

        let mut message = Vec::with_capacity(token.len() + 1);
        message.extend_from_slice(token.as_bytes());
        message.push(TOKEN_TERMINATOR);

        let written = async {
            stream.write_all(&message).await?;
            stream.flush().await
        }
        .await;

        match written {
            Ok(()) => {
                self.stats.sent += 1;
                tracing::debug!("Sent {}", token);
                Ok(())
            }
            Err(e) => {
                self.drop_connection();
                Err(e.into())
            }
        }
    }

    /// Close the connection. Further connects fail with [`ChannelError::Closed`].
    pub async fn close(&mut self) {
        self.closed = true;
        self.state = ConnectionState::Closing;
        if let Some(mut stream) = self.stream.take() {
            if let Err(e) = stream.shutdown().await {
                tracing::debug!("Shutdown error: {}", e);
            }
            tracing::info!("Closed connection to {}", self.endpoint);
        }
        self.state = ConnectionState::Disconnected;
    }

    /// Reconnect per `policy`, pausing before every attempt.
    ///
    /// # Errors
    ///
    /// [`ChannelError::ReconnectExhausted`] once `max_attempts` have failed,
    /// or [`ChannelError::Closed`] after [`Self::close`].
    pub async fn reconnect(&mut self, policy: ReconnectPolicy) -> ChannelResult<()> {
        for attempt in 1..=policy.max_attempts {
            tokio::time::sleep(Duration::from_millis(policy.delay_ms)).await;
            match self.connect().await {
                Ok(()) => return Ok(()),
                Err(ChannelError::Closed) => return Err(ChannelError::Closed),
                Err(e) => {
                    tracing::warn!(attempt, max = policy.max_attempts, "Reconnect failed: {}", e);
                }
            }
        }
        Err(ChannelError::ReconnectExhausted { attempts: policy.max_attempts })
    }

    fn drop_connection(&mut self) {
        self.stream = None;
        self.state = ConnectionState::Disconnected;
        self.stats.dropped += 1;
    }
}

/// Forward queued tokens to the vehicle until the queue closes.
///
/// The channel should already be connected. Outages are bridged with
/// [`CommandChannel::reconnect`]; the failed token and everything queued
/// behind it during the outage are dropped. Returns the final counters once
/// the producer hangs up.
///
/// # Errors
///
/// [`ChannelError::ReconnectExhausted`] when the vehicle stays unreachable.
/// Dropping the receiver then stops the producer.
pub async fn run_channel(
    mut channel: CommandChannel,
    mut commands: mpsc::Receiver<&'static str>,
    policy: ReconnectPolicy,
) -> ChannelResult<ChannelStats> {
    while let Some(token) = commands.recv().await {
        if channel.state() != ConnectionState::Connected {
            channel.stats.dropped += 1;
            channel.reconnect(policy).await?;
            discard_stale(&mut channel, &mut commands);
            continue;
        }

        if let Err(e) = channel.send_token(token).await {
            tracing::warn!("Dropped {}: {}", token, e);
            channel.reconnect(policy).await?;
            discard_stale(&mut channel, &mut commands);
        }
    }

    channel.close().await;
    let stats = channel.stats();
    tracing::info!(sent = stats.sent, dropped = stats.dropped, "Command channel finished");
    Ok(stats)
}

/// Drop every token queued while the link was down.
fn discard_stale(channel: &mut CommandChannel, commands: &mut mpsc::Receiver<&'static str>) {
    let mut stale = 0u64;
    while commands.try_recv().is_ok() {
        stale += 1;
    }
    if stale > 0 {
        channel.stats.dropped += stale;
        tracing::info!(stale, "Discarded commands queued during the outage");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::AsyncBufReadExt;
    use tokio::net::TcpListener;

    fn config(endpoint: String) -> ChannelConfig {
        ChannelConfig { endpoint, connect_timeout_ms: 500, ..ChannelConfig::default() }
    }

    async fn listener() -> (TcpListener, String) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap().to_string();
        (listener, addr)
    }

    #[tokio::test]
    async fn test_tokens_arrive_in_order() {
        let (listener, addr) = listener().await;
        let server = tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            let mut lines = tokio::io::BufReader::new(stream).lines();
            let mut got = Vec::new();
            while let Some(line) = lines.next_line().await.unwrap() {
                got.push(line);
            }
            got
        });

        let mut channel = CommandChannel::new(&config(addr));
        assert_eq!(channel.state(), ConnectionState::Disconnected);
        channel.connect().await.unwrap();
        assert_eq!(channel.state(), ConnectionState::Connected);
        for token in ["GO", "GO", "STOP"] {
            channel.send_token(token).await.unwrap();
        }
        channel.send(Directive::TurnRight).await.unwrap();
        channel.close().await;
        assert_eq!(channel.state(), ConnectionState::Disconnected);
        assert!(matches!(channel.connect().await, Err(ChannelError::Closed)));

        assert_eq!(server.await.unwrap(), ["GO", "GO", "STOP", "TURN_RIGHT"]);
        assert_eq!(channel.stats().sent, 4);
    }

    #[tokio::test]
    async fn test_connect_refused_stays_disconnected() {
        let (listener, addr) = listener().await;
        drop(listener);
        let mut channel = CommandChannel::new(&config(addr));
        assert!(channel.connect().await.is_err());
        assert_eq!(channel.state(), ConnectionState::Disconnected);
        assert!(matches!(channel.send_token("GO").await, Err(ChannelError::NotConnected)));
    }

    #[tokio::test]
    async fn test_peer_close_moves_to_disconnected() {
        let (listener, addr) = listener().await;
        let mut channel = CommandChannel::new(&config(addr));
        let (connected, accepted) = tokio::join!(channel.connect(), listener.accept());
        connected.unwrap();
        drop(accepted.unwrap());

        let mut failed = None;
        for _ in 0..50 {
            tokio::time::sleep(Duration::from_millis(10)).await;
            if let Err(e) = channel.send_token("GO").await {
                failed = Some(e);
                break;
            }
        }
        assert!(failed.is_some(), "write to closed peer never failed");
        assert_eq!(channel.state(), ConnectionState::Disconnected);
    }

    #[tokio::test]
    async fn test_reconnect_exhausted() {
        let (listener, addr) = listener().await;
        drop(listener);
        let mut channel = CommandChannel::new(&config(addr));
        let policy = ReconnectPolicy { max_attempts: 2, delay_ms: 1 };
        assert!(matches!(
            channel.reconnect(policy).await,
            Err(ChannelError::ReconnectExhausted { attempts: 2 })
        ));
    }

    #[tokio::test]
    async fn test_run_channel_forwards_queue() {
        let (listener, addr) = listener().await;
        let server = tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            let mut lines = tokio::io::BufReader::new(stream).lines();
            let mut got = Vec::new();
            while let Some(line) = lines.next_line().await.unwrap() {
                got.push(line);
            }
            got
        });

        let mut channel = CommandChannel::new(&config(addr));
        channel.connect().await.unwrap();
        let (tx, rx) = mpsc::channel(8);
        let task = tokio::spawn(run_channel(channel, rx, ReconnectPolicy::default()));
        for token in ["STOP", "GO", "GO"] {
            tx.send(token).await.unwrap();
        }
        drop(tx);

        let stats = task.await.unwrap().unwrap();
        assert_eq!(stats.sent, 3);
        assert_eq!(server.await.unwrap(), ["STOP", "GO", "GO"]);
    }

    #[tokio::test]
    async fn test_outage_backlog_is_not_replayed() {
        let (listener, addr) = listener().await;
        let mut channel = CommandChannel::new(&config(addr));
        let (connected, accepted) = tokio::join!(channel.connect(), listener.accept());
        connected.unwrap();
        // First session hangs up straight away.
        drop(accepted.unwrap());
        tokio::time::sleep(Duration::from_millis(50)).await;

        let server = tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            let mut lines = tokio::io::BufReader::new(stream).lines();
            let mut got = Vec::new();
            while let Some(line) = lines.next_line().await.unwrap() {
                got.push(line);
            }
            got
        });

        // The first STOP hits the dead link; the GOs pile up behind it.
        let (tx, rx) = mpsc::channel(64);
        tx.send("STOP").await.unwrap();
        for _ in 0..40 {
            tx.send("GO").await.unwrap();
        }
        let policy = ReconnectPolicy { max_attempts: 3, delay_ms: 50 };
        let task = tokio::spawn(run_channel(channel, rx, policy));

        tokio::time::sleep(Duration::from_millis(300)).await;
        tx.send("STOP").await.unwrap();
        drop(tx);

        let stats = task.await.unwrap().unwrap();
        assert_eq!(server.await.unwrap(), ["STOP"]);
        assert_eq!(stats.sent, 1);
        assert_eq!(stats.dropped, 41);
        assert_eq!(stats.connects, 2);
    }
}
