//! # SunSpec Modbus TCP Server
//!
//! Serves FC03 reads from a shared [`RegisterMap`]. Every accepted socket
//! gets its own task running a [`Connection`] state machine:
//!
//! ```text
//!            first byte            full frame            response ready
//!   Idle ───────────────▶ Receiving ─────────▶ Dispatching ─────────▶ Responding
//!    ▲                        │                                          │
//!    └────────────────────────┼──────────────────────────────────────────┘
//!                             │ EOF / framing error / frame timeout
//!                             ▼
//!                           Closed  (also from Idle on EOF or shutdown)
//! ```
//!
//! Requests on one connection are answered strictly in order. Shutdown only
//! interrupts connections that are idle; a frame already being received is
//! completed and answered first.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpListener;
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, info, warn};

use crate::constants::{MAX_PDU_SIZE, MBAP_HEADER_LEN};
use crate::error::{SunspecError, SunspecResult};
use crate::pdu::ModbusPdu;
use crate::protocol::{dispatch, encode_frame, MbapHeader};
use crate::register_map::RegisterMap;

/// Pause after a failed `accept` before trying again.
const ACCEPT_BACKOFF: Duration = Duration::from_millis(100);

/// Per-connection protocol state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// Waiting for the first byte of the next request
    Idle,
    /// Reading the rest of a frame
    Receiving,
    /// Validating the request and copying registers
    Dispatching,
    /// Writing the response
    Responding,
    /// Terminal
    Closed,
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ConnectionState::Idle => "idle",
            ConnectionState::Receiving => "receiving",
            ConnectionState::Dispatching => "dispatching",
            ConnectionState::Responding => "responding",
            ConnectionState::Closed => "closed",
        };
        f.write_str(name)
    }
}

/// Server counters
#[derive(Debug, Default)]
pub struct ServerStats {
    pub connections_accepted: AtomicU64,
    /// Responses sent, exceptions included
    pub requests_served: AtomicU64,
    pub exceptions_sent: AtomicU64,
    /// Connections closed because of a malformed, truncated or stalled frame
    pub framing_errors: AtomicU64,
}

impl ServerStats {
    /// Get a snapshot of current stats
    pub fn snapshot(&self) -> ServerStatsSnapshot {
        ServerStatsSnapshot {
            connections_accepted: self.connections_accepted.load(Ordering::Relaxed),
            requests_served: self.requests_served.load(Ordering::Relaxed),
            exceptions_sent: self.exceptions_sent.load(Ordering::Relaxed),
            framing_errors: self.framing_errors.load(Ordering::Relaxed),
        }
    }
}

/// Snapshot of server statistics
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ServerStatsSnapshot {
    pub connections_accepted: u64,
    pub requests_served: u64,
    pub exceptions_sent: u64,
    pub framing_errors: u64,
}

// ============================================================================
// Connection
// ============================================================================

/// One client session over any byte stream.
pub struct Connection<S> {
    stream: S,
    peer: String,
    map: Arc<RegisterMap>,
    frame_timeout: Duration,
    stats: Arc<ServerStats>,
    state: ConnectionState,
}

impl<S> Connection<S>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    pub fn new(
        stream: S,
        peer: impl fmt::Display,
        map: Arc<RegisterMap>,
        frame_timeout: Duration,
        stats: Arc<ServerStats>,
    ) -> Self {
        Self {
            stream,
            peer: peer.to_string(),
            map,
            frame_timeout,
            stats,
            state: ConnectionState::Idle,
        }
    }

    #[inline]
    pub fn state(&self) -> ConnectionState {
        self.state
    }

    /// Serve requests until the peer leaves, a framing error occurs or
    /// `shutdown` fires while idle.
    pub async fn run(mut self, shutdown: CancellationToken) -> ConnectionState {
        let mut header = [0u8; MBAP_HEADER_LEN];

        loop {
            self.state = ConnectionState::Idle;
            let first = tokio::select! {
                biased;
                _ = shutdown.cancelled() => {
                    debug!("Closing idle connection {} for shutdown", self.peer);
                    break;
                }
                read = self.stream.read(&mut header[..1]) => read,
            };
            match first {
                Ok(0) => {
                    debug!("Connection {} closed by peer", self.peer);
                    break;
                }
                Ok(_) => {}
                Err(e) => {
                    debug!("Read error on {}: {}", self.peer, e);
                    break;
                }
            }

            self.state = ConnectionState::Receiving;
            let (request, pdu) = match timeout(self.frame_timeout, self.receive_frame(&mut header)).await {
                Ok(Ok(frame)) => frame,
                Ok(Err(e)) => {
                    self.stats.framing_errors.fetch_add(1, Ordering::Relaxed);
                    warn!("Closing {}: {}", self.peer, e);
                    break;
                }
                Err(_) => {
                    self.stats.framing_errors.fetch_add(1, Ordering::Relaxed);
                    let e = SunspecError::timeout("incomplete frame", self.frame_timeout.as_millis() as u64);
                    warn!("Closing {}: {}", self.peer, e);
                    break;
                }
            };

            self.state = ConnectionState::Dispatching;
            let response = dispatch(&self.map, &pdu);
            if response.is_exception() {
                self.stats.exceptions_sent.fetch_add(1, Ordering::Relaxed);
            }

            self.state = ConnectionState::Responding;
            let frame = encode_frame(&request, &response);
            if let Err(e) = self.stream.write_all(&frame).await {
                debug!("Write error on {}: {}", self.peer, e);
                break;
            }
            self.stats.requests_served.fetch_add(1, Ordering::Relaxed);
        }

        self.state = ConnectionState::Closed;
        if let Err(e) = self.stream.shutdown().await {
            debug!("Shutdown error on {}: {}", self.peer, e);
        }
        self.state
    }

    /// Read the rest of a frame whose first byte is already in `header`.
    async fn receive_frame(
        &mut self,
        header: &mut [u8; MBAP_HEADER_LEN],
    ) -> SunspecResult<(MbapHeader, ModbusPdu)> {
        read_exact_framed(&mut self.stream, &mut header[1..]).await?;
        let request = MbapHeader::decode(header)?;

        let mut buf = [0u8; MAX_PDU_SIZE];
        let pdu = &mut buf[..request.pdu_len()];
        read_exact_framed(&mut self.stream, pdu).await?;

        Ok((request, ModbusPdu::from_slice(pdu)?))
    }
}

async fn read_exact_framed<S>(stream: &mut S, buf: &mut [u8]) -> SunspecResult<()>
where
    S: AsyncRead + Unpin,
{
    match stream.read_exact(buf).await {
        Ok(_) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => Err(SunspecError::framing(
            "connection closed before the declared frame length arrived",
        )),
        Err(e) => Err(e.into()),
    }
}

// ============================================================================
// Server
// ============================================================================

/// Modbus TCP server for one register map.
///
/// # Example
///
/// ```rust,no_run
/// use std::sync::Arc;
/// use std::time::Duration;
/// use tokio::net::TcpListener;
/// use tokio_util::sync::CancellationToken;
/// use voltage_sunspec::catalog::sunspec_registry;
/// use voltage_sunspec::{RegisterMap, SunspecServer};
///
/// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let map = Arc::new(RegisterMap::new(&sunspec_registry()?, 40000)?);
/// let server = SunspecServer::new(map, Duration::from_secs(5));
/// let listener = TcpListener::bind("0.0.0.0:502").await?;
/// server.serve(listener, CancellationToken::new()).await?;
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Clone)]
pub struct SunspecServer {
    map: Arc<RegisterMap>,
    frame_timeout: Duration,
    stats: Arc<ServerStats>,
}

impl SunspecServer {
    pub fn new(map: Arc<RegisterMap>, frame_timeout: Duration) -> Self {
        Self {
            map,
            frame_timeout,
            stats: Arc::new(ServerStats::default()),
        }
    }

    pub fn stats(&self) -> ServerStatsSnapshot {
        self.stats.snapshot()
    }

    pub fn register_map(&self) -> &Arc<RegisterMap> {
        &self.map
    }

    /// Accept connections until `shutdown`, then wait for every connection
    /// task to finish.
    pub async fn serve(&self, listener: TcpListener, shutdown: CancellationToken) -> SunspecResult<()> {
        let local = listener.local_addr()?;
        info!("SunSpec server listening on {}", local);

        let tracker = TaskTracker::new();
        loop {
            tokio::select! {
                biased;
                _ = shutdown.cancelled() => break,
                accepted = listener.accept() => match accepted {
                    Ok((stream, peer)) => {
                        self.stats.connections_accepted.fetch_add(1, Ordering::Relaxed);
                        if let Err(e) = stream.set_nodelay(true) {
                            debug!("Failed to set TCP_NODELAY for {}: {}", peer, e);
                        }
                        debug!("Accepted connection from {}", peer);

                        let connection = Connection::new(
                            stream,
                            peer,
                            Arc::clone(&self.map),
                            self.frame_timeout,
                            Arc::clone(&self.stats),
                        );
                        tracker.spawn(connection.run(shutdown.clone()));
                    }
                    Err(e) => {
                        warn!("Accept failed on {}: {}", local, e);
                        tokio::time::sleep(ACCEPT_BACKOFF).await;
                    }
                },
            }
        }

        drop(listener);
        tracker.close();
        info!("SunSpec server stopped accepting, waiting for {} connections", tracker.len());
        tracker.wait().await;
        info!("SunSpec server on {} shut down", local);
        Ok(())
    }
}
