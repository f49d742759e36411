//! Telemetry session manager.
//!
//! One non-blocking listener and the list of connected viewers. The driver
//! calls [`TelemetryServer::update`] once per model step from a single thread:
//!
//! 1. accept at most one pending connection;
//! 2. per session, poll for a caret frame (non-blocking) and keep the latest;
//! 3. build a snapshot (grids shared by all sessions, fields per caret);
//! 4. write the whole snapshot, dropping the session on disconnect.
//!
//! A failing session is removed without affecting the others.

use std::io::{self, Read, Write};
use std::net::{IpAddr, Ipv4Addr, SocketAddr, TcpListener, TcpStream};
use std::thread;
use std::time::{Duration, Instant};

use tracing::{debug, info, warn};

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

use crate::model::{EncoderKind, EncoderView, HierarchyView, Int3, LayerStack};
use crate::protocol::{Caret, Field, SdrGrid, Snapshot, CARET_FRAME_LEN};
use crate::receptive;

pub const DEFAULT_PORT: u16 = 54000;

/// Most bytes a peer may queue behind its caret in one tick before it is
/// dropped as flooding.
pub const MAX_DRAIN_BYTES: usize = 16 * 1024;

#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct ServerConfig {
    pub bind_addr: IpAddr,
    pub port: u16,
    /// Sleep between polls while the rest of a partial caret frame arrives.
    pub retry_sleep_ms: u64,
    /// Give up on a peer that stalls mid-caret for this long. `None` waits forever.
    pub stall_timeout_ms: Option<u64>,
    /// Give up on a snapshot write that makes no progress for this long.
    /// `None` blocks until the write completes or the peer disconnects.
    pub send_timeout_ms: Option<u64>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            port: DEFAULT_PORT,
            retry_sleep_ms: 1,
            stall_timeout_ms: Some(5000),
            send_timeout_ms: None,
        }
    }
}

impl ServerConfig {
    fn recv_policy(&self) -> IoPolicy {
        IoPolicy {
            retry_sleep: Duration::from_millis(self.retry_sleep_ms),
            stall_timeout: self.stall_timeout_ms.map(Duration::from_millis),
        }
    }

    fn send_policy(&self) -> IoPolicy {
        IoPolicy {
            retry_sleep: Duration::from_millis(self.retry_sleep_ms),
            stall_timeout: self.send_timeout_ms.map(Duration::from_millis),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    #[error("failed to listen on {addr}: {source}")]
    Bind {
        addr: SocketAddr,
        #[source]
        source: io::Error,
    },
}

/// Why a session was dropped.
#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error("peer disconnected")]
    Disconnected,
    #[error("peer stalled for {0:?}")]
    Stalled(Duration),
    #[error("peer queued more than {0} bytes behind its caret")]
    Flooded(usize),
    #[error("socket error: {0}")]
    Io(#[from] io::Error),
}

#[derive(Debug, Clone, Copy)]
struct IoPolicy {
    retry_sleep: Duration,
    stall_timeout: Option<Duration>,
}

impl IoPolicy {
    /// Sleep before retrying, or fail if the peer has stalled too long.
    fn wait(&self, since: Instant) -> Result<(), SessionError> {
        if let Some(limit) = self.stall_timeout {
            let waited = since.elapsed();
            if waited >= limit {
                return Err(SessionError::Stalled(waited));
            }
        }
        thread::sleep(self.retry_sleep);
        Ok(())
    }
}

fn is_retryable(e: &io::Error) -> bool {
    matches!(
        e.kind(),
        io::ErrorKind::WouldBlock | io::ErrorKind::Interrupted
    )
}

fn is_disconnect(e: &io::Error) -> bool {
    matches!(
        e.kind(),
        io::ErrorKind::ConnectionReset
            | io::ErrorKind::ConnectionAborted
            | io::ErrorKind::BrokenPipe
            | io::ErrorKind::NotConnected
            | io::ErrorKind::UnexpectedEof
    )
}

fn classify(e: io::Error) -> SessionError {
    if is_disconnect(&e) {
        SessionError::Disconnected
    } else {
        SessionError::Io(e)
    }
}

/// Poll a non-blocking reader for one caret frame.
///
/// Returns `Ok(None)` when nothing is waiting. Once the first byte of a frame
/// has arrived the rest is awaited; bytes beyond the frame are drained and
/// discarded. A frame cut short by a close yields an error and no caret.
fn poll_caret<R: Read>(reader: &mut R, policy: IoPolicy) -> Result<Option<Caret>, SessionError> {
    let mut frame = [0u8; CARET_FRAME_LEN];

    let mut received = match reader.read(&mut frame) {
        Ok(0) => return Err(SessionError::Disconnected),
        Ok(n) => n,
        Err(e) if is_retryable(&e) => return Ok(None),
        Err(e) => return Err(classify(e)),
    };

    let started = Instant::now();
    while received < CARET_FRAME_LEN {
        match reader.read(&mut frame[received..]) {
            Ok(0) => return Err(SessionError::Disconnected),
            Ok(n) => received += n,
            Err(e) if is_retryable(&e) => policy.wait(started)?,
            Err(e) => return Err(classify(e)),
        }
    }

    let caret = Caret::decode(&frame).map_err(|_| SessionError::Disconnected)?;

    // At most one caret per tick; anything else queued is stale.
    let mut scratch = [0u8; 256];
    let mut drained = 0usize;
    loop {
        match reader.read(&mut scratch) {
            Ok(0) => break,
            Ok(n) => {
                drained += n;
                if drained > MAX_DRAIN_BYTES {
                    return Err(SessionError::Flooded(MAX_DRAIN_BYTES));
                }
            }
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(_) => break,
        }
    }

    Ok(Some(caret))
}

/// Write all of `bytes`, retrying while the socket buffer is full.
fn send_frame<W: Write>(writer: &mut W, bytes: &[u8], policy: IoPolicy) -> Result<usize, SessionError> {
    let mut sent = 0;
    let mut last_progress = Instant::now();
    while sent < bytes.len() {
        match writer.write(&bytes[sent..]) {
            Ok(0) => return Err(SessionError::Disconnected),
            Ok(n) => {
                sent += n;
                last_progress = Instant::now();
            }
            Err(e) if is_retryable(&e) => policy.wait(last_progress)?,
            Err(e) => return Err(classify(e)),
        }
    }
    Ok(sent)
}

/// One connected viewer.
#[derive(Debug)]
pub struct ClientSession {
    stream: TcpStream,
    peer: SocketAddr,
    caret: Caret,
    snapshots_sent: u64,
}

impl ClientSession {
    fn new(stream: TcpStream, peer: SocketAddr) -> Self {
        Self {
            stream,
            peer,
            caret: Caret::default(),
            snapshots_sent: 0,
        }
    }

    pub fn peer(&self) -> SocketAddr {
        self.peer
    }

    pub fn caret(&self) -> Caret {
        self.caret
    }

    pub fn snapshots_sent(&self) -> u64 {
        self.snapshots_sent
    }

    /// Receive, build and send for this tick.
    fn service(
        &mut self,
        layers: &LayerStack<'_>,
        grids: &[SdrGrid],
        recv: IoPolicy,
        send: IoPolicy,
    ) -> Result<(), SessionError> {
        if let Some(caret) = poll_caret(&mut self.stream, recv)? {
            self.caret = caret;
        }

        let snapshot = Snapshot {
            num_encoder_layers: layers.num_pre_encoders() as u16,
            grids: grids.to_vec(),
            fields: caret_fields(layers, self.caret),
        };
        let bytes = snapshot.encode();
        send_frame(&mut self.stream, &bytes, send)?;
        self.snapshots_sent += 1;
        Ok(())
    }
}

/// Resolve a caret to its encoder and an in-bounds cell.
///
/// An unset caret, an unknown layer or an out-of-bounds cell all mean "no
/// fields requested".
pub fn caret_target<'a>(
    layers: &LayerStack<'a>,
    caret: Caret,
) -> Option<(EncoderKind, &'a dyn EncoderView, Int3)> {
    if caret.is_unset() {
        return None;
    }
    let (kind, enc) = layers.get(caret.layer as usize)?;
    if !enc.hidden_size().contains(caret.cell) {
        return None;
    }
    Some((kind, enc, caret.cell))
}

/// Receptive fields of the caret's cell, one per visible layer of its encoder.
pub fn caret_fields(layers: &LayerStack<'_>, caret: Caret) -> Vec<Field> {
    let Some((kind, enc, cell)) = caret_target(layers, caret) else {
        return Vec::new();
    };
    let hidden_size = enc.hidden_size();
    (0..enc.num_visible_layers())
        .map(|j| {
            let vl = enc.visible_layer(j);
            receptive::extract(kind, hidden_size, &vl, cell).into_field(format!("field {j}"))
        })
        .collect()
}

/// Winner grids of every layer, pre-encoders first.
pub fn layer_grids(layers: &LayerStack<'_>) -> Vec<SdrGrid> {
    layers
        .iter()
        .map(|(_, enc)| {
            let s = enc.hidden_size();
            let grid = SdrGrid::new(
                s.x as u16,
                s.y as u16,
                s.z as u16,
                enc.hidden_winners().to_vec(),
            );
            debug_assert!(grid.validate(0).is_ok(), "model produced an out-of-range winner");
            grid
        })
        .collect()
}

/// Build the snapshot a viewer with `caret` would receive this tick.
pub fn build_snapshot(layers: &LayerStack<'_>, caret: Caret) -> Snapshot {
    Snapshot {
        num_encoder_layers: layers.num_pre_encoders() as u16,
        grids: layer_grids(layers),
        fields: caret_fields(layers, caret),
    }
}

/// Owns the listener and every connected session.
pub struct TelemetryServer {
    listener: TcpListener,
    sessions: Vec<ClientSession>,
    config: ServerConfig,
}

impl TelemetryServer {
    pub fn bind(config: ServerConfig) -> Result<Self, ServerError> {
        let addr = SocketAddr::new(config.bind_addr, config.port);
        let bind_err = |source| ServerError::Bind { addr, source };
        let listener = TcpListener::bind(addr).map_err(bind_err)?;
        listener.set_nonblocking(true).map_err(bind_err)?;
        info!("Telemetry server listening on {}", listener.local_addr().unwrap_or(addr));
        Ok(Self {
            listener,
            sessions: Vec::new(),
            config,
        })
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    pub fn sessions(&self) -> &[ClientSession] {
        &self.sessions
    }

    pub fn num_sessions(&self) -> usize {
        self.sessions.len()
    }

    fn accept_pending(&mut self) {
        match self.listener.accept() {
            Ok((stream, peer)) => {
                if let Err(e) = stream.set_nonblocking(true) {
                    warn!("Rejecting client {}: {}", peer, e);
                    return;
                }
                let _ = stream.set_nodelay(true);
                info!("Client connected from {}", peer);
                self.sessions.push(ClientSession::new(stream, peer));
            }
            Err(e) if is_retryable(&e) => {}
            Err(e) => warn!("Accept failed: {}", e),
        }
    }

    /// Service every session once against the current model state.
    pub fn update(&mut self, hierarchy: &dyn HierarchyView, pre_encoders: &[&dyn EncoderView]) {
        self.accept_pending();

        if self.sessions.is_empty() {
            return;
        }

        let layers = LayerStack::new(hierarchy, pre_encoders);
        let grids = layer_grids(&layers);
        let recv = self.config.recv_policy();
        let send = self.config.send_policy();

        self.sessions.retain_mut(|session| match session.service(&layers, &grids, recv, send) {
            Ok(()) => true,
            Err(SessionError::Disconnected) => {
                info!("Client {} disconnected", session.peer);
                false
            }
            Err(e) => {
                warn!("Dropping client {}: {}", session.peer, e);
                false
            }
        });

        debug!("Served {} session(s)", self.sessions.len());
    }
}
