//! Vehicle-side command receiver.
//!
//! Accepts one sender at a time, splits the byte stream into tokens and only
//! actuates once the same directive has arrived N times in a row. Every way a
//! session can end (EOF, read error, idle timeout, shutdown) leaves the
//! vehicle stopped.

use std::future::Future;
use std::net::SocketAddr;
use std::time::Duration;

use thiserror::Error;
use tokio::io::AsyncReadExt;
use tokio::net::{TcpListener, TcpStream};

use braincar_core::config::ReceiverConfig;
use braincar_core::filter::RunFilter;
use braincar_core::protocol::{decode_token, is_recognized, TokenSplitter};
use braincar_core::types::Directive;

use super::actuator::{Actuator, VehicleController};
use super::channel::ConnectionState;

/// Receiver errors
#[derive(Debug, Error)]
pub enum ServerError {
    /// Listen address unavailable
    #[error("Cannot bind {addr}: {source}")]
    Bind {
        /// Requested address
        addr: String,
        /// Underlying error
        source: std::io::Error,
    },

    /// Accept or socket error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type for receiver operations
pub type ServerResult<T> = Result<T, ServerError>;

/// How a session ended.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SessionEnd {
    /// Sender closed the connection
    PeerClosed,
    /// Socket error
    ReadError(String),
    /// Shutdown requested
    Shutdown,
}

/// Counters over the server's lifetime.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct ReceiverStats {
    /// Sessions accepted
    pub sessions: u64,
    /// Tokens received
    pub tokens: u64,
    /// Tokens outside the vocabulary (treated as STOP)
    pub unknown: u64,
    /// Debounced directives executed
    pub actuations: u64,
    /// Idle-timeout stops
    pub timeouts: u64,
}

/// TCP server driving a [`VehicleController`].
pub struct ActuatorServer<A> {
    listener: TcpListener,
    vehicle: VehicleController<A>,
    debounce: RunFilter<Directive>,
    command_timeout: Option<Duration>,
    accept_once: bool,
    state: ConnectionState,
    stats: ReceiverStats,
}

impl<A: Actuator> ActuatorServer<A> {
    /// Bind the listen address and put the vehicle in a known stopped state.
    ///
    /// # Errors
    ///
    /// [`ServerError::Bind`] if the address is unavailable.
    pub async fn bind(config: &ReceiverConfig, actuator: A) -> ServerResult<Self> {
        let listener = TcpListener::bind(&config.bind)
            .await
            .map_err(|source| ServerError::Bind { addr: config.bind.clone(), source })?;
        tracing::info!("Waiting for commands on {}", listener.local_addr()?);

        let mut vehicle = VehicleController::new(actuator, config);
        vehicle.stop_now();

        Ok(Self {
            listener,
            vehicle,
            debounce: RunFilter::new(config.debounce_depth),
            command_timeout: config.command_timeout_ms.map(Duration::from_millis),
            accept_once: config.accept_once,
            state: ConnectionState::Disconnected,
            stats: ReceiverStats::default(),
        })
    }

    /// Bound address
    ///
    /// # Errors
    ///
    /// Propagates the socket error.
    pub fn local_addr(&self) -> ServerResult<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    /// Connection state
    pub fn state(&self) -> ConnectionState {
        self.state
    }

    /// Lifetime counters
    pub fn stats(&self) -> ReceiverStats {
        self.stats
    }

    /// The vehicle
    pub fn vehicle(&self) -> &VehicleController<A> {
        &self.vehicle
    }

    /// Accept one sender and serve it until it goes away.
    ///
    /// # Errors
    ///
    /// [`ServerError::Io`] if accepting fails.
    pub async fn serve_once(&mut self) -> ServerResult<SessionEnd> {
        let (stream, peer) = self.listener.accept().await?;
        let end = self.session(stream, peer).await;
        self.end_session(&end);
        Ok(end)
    }

    /// Serve senders one after another until `shutdown` resolves (or after
    /// the first session with `accept_once`).
    ///
    /// # Errors
    ///
    /// Never fails on a bad session; only returns errors the listener cannot
    /// recover from.
    pub async fn run<F: Future<Output = ()>>(&mut self, shutdown: F) -> ServerResult<()> {
        tokio::pin!(shutdown);

        loop {
            let accepted = tokio::select! {
                () = &mut shutdown => break,
                accepted = self.listener.accept() => accepted,
            };
            let (stream, peer) = match accepted {
                Ok(pair) => pair,
                Err(e) => {
                    tracing::warn!("Accept failed: {}", e);
                    continue;
                }
            };

            let end = tokio::select! {
                () = &mut shutdown => SessionEnd::Shutdown,
                end = self.session(stream, peer) => end,
            };
            self.end_session(&end);

            if end == SessionEnd::Shutdown || self.accept_once {
                break;
            }
        }

        self.vehicle.stop_now();
        tracing::info!(
            sessions = self.stats.sessions,
            actuations = self.stats.actuations,
            "Receiver stopped"
        );
        Ok(())
    }

    async fn session(&mut self, mut stream: TcpStream, peer: SocketAddr) -> SessionEnd {
        self.state = ConnectionState::Connected;
        self.stats.sessions += 1;
        self.debounce.reset();
        tracing::info!("Connected by {}", peer);

        let mut chunk = [0u8; 256];
        let mut splitter = TokenSplitter::new();
        let mut idle_stopped = false;

        loop {
            let read = stream.read(&mut chunk);
            let read = match self.command_timeout {
                Some(limit) => match tokio::time::timeout(limit, read).await {
                    Ok(r) => r,
                    Err(_) => {
                        // A partial token stays in the splitter and completes on the next read.
                        if !idle_stopped {
                            tracing::warn!("No command for {:?}, stopping", limit);
                            self.stats.timeouts += 1;
                            self.vehicle.stop_now();
                            self.debounce.reset();
                            idle_stopped = true;
                        }
                        continue;
                    }
                },
                None => read.await,
            };

            let n = match read {
                Ok(n) => n,
                Err(e) => return SessionEnd::ReadError(e.to_string()),
            };

            idle_stopped = false;
            if n == 0 {
                if let Some(token) = splitter.finish() {
                    self.handle_token(&token).await;
                }
                return SessionEnd::PeerClosed;
            }
            for token in splitter.push(&chunk[..n]) {
                self.handle_token(&token).await;
            }
        }
    }

    async fn handle_token(&mut self, token: &str) {
        self.stats.tokens += 1;
        if !is_recognized(token) {
            self.stats.unknown += 1;
            tracing::warn!("Unknown command {:?}, treating as STOP", token);
        }

        let directive = decode_token(token);
        match self.debounce.observe(directive) {
            Some(confirmed) => {
                tracing::info!("Action triggered: {}", confirmed);
                self.stats.actuations += 1;
                self.vehicle.execute(confirmed).await;
            }
            None => tracing::debug!("Received {}, waiting for a stable command", directive),
        }
    }

    fn end_session(&mut self, end: &SessionEnd) {
        match end {
            SessionEnd::PeerClosed => tracing::info!("Client disconnected, STOP"),
            SessionEnd::ReadError(e) => tracing::warn!("Connection error ({}), STOP", e),
            SessionEnd::Shutdown => tracing::info!("Shutting down, STOP"),
        }
        self.vehicle.stop_now();
        self.debounce.reset();
        self.state = ConnectionState::Disconnected;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bridge::actuator::{Motion, SimulatedActuator};
    use tokio::io::AsyncWriteExt;

    fn config() -> ReceiverConfig {
        ReceiverConfig { bind: "127.0.0.1:0".to_string(), ..ReceiverConfig::default() }
    }

    async fn server(config: &ReceiverConfig) -> (ActuatorServer<SimulatedActuator>, SimulatedActuator, SocketAddr) {
        let sim = SimulatedActuator::new();
        let server = ActuatorServer::bind(config, sim.clone()).await.unwrap();
        let addr = server.local_addr().unwrap();
        (server, sim, addr)
    }

    async fn send_and_close(addr: SocketAddr, payload: &'static [u8]) {
        let mut stream = TcpStream::connect(addr).await.unwrap();
        stream.write_all(payload).await.unwrap();
        stream.shutdown().await.unwrap();
    }

    fn motions_after_start(sim: &SimulatedActuator) -> Vec<Motion> {
        // Skip the stop issued at bind.
        sim.history().into_iter().skip(2).collect()
    }

    #[tokio::test]
    async fn test_three_go_actuates_once() {
        let (mut server, sim, addr) = server(&config()).await;
        let client = tokio::spawn(send_and_close(addr, b"GO\nGO\nGO\nGO\n"));

        assert_eq!(server.serve_once().await.unwrap(), SessionEnd::PeerClosed);
        client.await.unwrap();

        assert_eq!(
            motions_after_start(&sim),
            [Motion::Speed(40), Motion::Speed(0), Motion::Steering(0)]
        );
        assert_eq!(server.stats().actuations, 1);
        assert_eq!(server.state(), ConnectionState::Disconnected);
    }

    #[tokio::test]
    async fn test_interrupted_run_does_not_actuate() {
        let (mut server, sim, addr) = server(&config()).await;
        let client = tokio::spawn(send_and_close(addr, b"GO\nGO\nSTOP\n"));
        server.serve_once().await.unwrap();
        client.await.unwrap();

        assert_eq!(server.stats().actuations, 0);
        assert!(!sim.history().contains(&Motion::Speed(40)));
        assert_eq!(sim.speed(), 0);
    }

    #[tokio::test]
    async fn test_coalesced_and_mixed_case_tokens() {
        let (mut server, sim, addr) = server(&config()).await;
        let client = tokio::spawn(send_and_close(addr, b"go GO\r\nFOCUS\n"));
        server.serve_once().await.unwrap();
        client.await.unwrap();
        assert!(sim.history().contains(&Motion::Speed(40)));
    }

    #[tokio::test]
    async fn test_unknown_tokens_count_as_stop() {
        let (mut server, _sim, addr) = server(&config()).await;
        let client = tokio::spawn(send_and_close(addr, b"GO\nGO\nFLY\nJUMP\n\xff\n"));
        server.serve_once().await.unwrap();
        client.await.unwrap();

        let stats = server.stats();
        assert_eq!(stats.tokens, 5);
        assert_eq!(stats.unknown, 3);
        assert_eq!(stats.actuations, 1);
        assert_eq!(server.vehicle().current(), Directive::Stop);
    }

    #[tokio::test]
    async fn test_space_delimited_tokens_without_newline() {
        let cfg = ReceiverConfig { command_timeout_ms: None, ..config() };
        let (mut server, sim, addr) = server(&cfg).await;
        let watcher = sim.clone();
        let client = tokio::spawn(async move {
            let mut stream = TcpStream::connect(addr).await.unwrap();
            stream.write_all(b"GO GO GO ").await.unwrap();
            // Hold the connection open until the vehicle has moved.
            let mut moved = false;
            for _ in 0..100 {
                if watcher.history().contains(&Motion::Speed(40)) {
                    moved = true;
                    break;
                }
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
            stream.shutdown().await.unwrap();
            moved
        });

        server.serve_once().await.unwrap();
        assert!(client.await.unwrap(), "space-delimited GO never actuated");
        assert_eq!(server.stats().actuations, 1);
    }

    #[tokio::test]
    async fn test_unterminated_token_at_eof() {
        let (mut server, _sim, addr) = server(&config()).await;
        let client = tokio::spawn(send_and_close(addr, b"GO\nGO\nGO"));
        server.serve_once().await.unwrap();
        client.await.unwrap();
        assert_eq!(server.stats().tokens, 3);
        assert_eq!(server.stats().actuations, 1);
    }

    #[tokio::test]
    async fn test_endless_garbage_counts_as_stop() {
        let (mut server, _sim, addr) = server(&config()).await;
        let client = tokio::spawn(async move {
            let mut stream = TcpStream::connect(addr).await.unwrap();
            stream.write_all(b"GO GO ").await.unwrap();
            stream.write_all(&[b'Z'; 4096]).await.unwrap();
            stream.write_all(b" GO\n").await.unwrap();
            stream.shutdown().await.unwrap();
        });
        server.serve_once().await.unwrap();
        client.await.unwrap();

        let stats = server.stats();
        assert_eq!(stats.tokens, 4);
        assert_eq!(stats.unknown, 1);
        assert_eq!(stats.actuations, 0);
    }

    #[tokio::test]
    async fn test_eof_mid_motion_stops() {
        let (mut server, sim, addr) = server(&config()).await;
        let client = tokio::spawn(send_and_close(addr, b"GO\nGO\nGO\n"));
        server.serve_once().await.unwrap();
        client.await.unwrap();
        assert_eq!(sim.speed(), 0);
        assert_eq!(server.vehicle().current(), Directive::Stop);
    }

    #[tokio::test(start_paused = true)]
    async fn test_idle_timeout_stops_vehicle() {
        let (mut server, sim, addr) = server(&config()).await;
        let client = tokio::spawn(async move {
            let mut stream = TcpStream::connect(addr).await.unwrap();
            stream.write_all(b"GO\nGO\nGO\n").await.unwrap();
            tokio::time::sleep(Duration::from_secs(10)).await;
            stream.shutdown().await.unwrap();
        });

        server.serve_once().await.unwrap();
        client.await.unwrap();

        assert_eq!(server.stats().timeouts, 1);
        assert_eq!(
            motions_after_start(&sim),
            [Motion::Speed(40), Motion::Speed(0), Motion::Steering(0), Motion::Speed(0), Motion::Steering(0)]
        );
    }

    #[tokio::test]
    async fn test_run_accepts_successive_sessions() {
        let (mut server, sim, addr) = server(&config()).await;
        let (stop_tx, stop_rx) = tokio::sync::oneshot::channel::<()>();

        let clients = tokio::spawn(async move {
            send_and_close(addr, b"GO\nGO\n").await;
            tokio::time::sleep(Duration::from_millis(50)).await;
            // Debounce restarts with each session.
            send_and_close(addr, b"GO\n").await;
            tokio::time::sleep(Duration::from_millis(50)).await;
            send_and_close(addr, b"TURN_RIGHT\nTURN_RIGHT\nTURN_RIGHT\n").await;
            tokio::time::sleep(Duration::from_millis(600)).await;
            let _ = stop_tx.send(());
        });

        server
            .run(async {
                let _ = stop_rx.await;
            })
            .await
            .unwrap();
        clients.await.unwrap();

        assert_eq!(server.stats().sessions, 3);
        assert_eq!(server.stats().actuations, 1);
        let history = sim.history();
        assert!(!history.contains(&Motion::Speed(40)));
        assert!(history.contains(&Motion::Steering(35)));
        assert_eq!(sim.speed(), 0);
    }

    #[tokio::test]
    async fn test_accept_once_returns_after_first_session() {
        let cfg = ReceiverConfig { accept_once: true, ..config() };
        let (mut server, _sim, addr) = server(&cfg).await;
        let client = tokio::spawn(send_and_close(addr, b"STOP\n"));
        server.run(std::future::pending()).await.unwrap();
        client.await.unwrap();
        assert_eq!(server.stats().sessions, 1);
    }

    #[tokio::test]
    async fn test_bind_failure() {
        let (server, _sim, addr) = server(&config()).await;
        let taken = ReceiverConfig { bind: addr.to_string(), ..config() };
        assert!(matches!(
            ActuatorServer::bind(&taken, SimulatedActuator::new()).await,
            Err(ServerError::Bind { .. })
        ));
        drop(server);
    }
}
