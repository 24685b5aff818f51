use std::collections::VecDeque;
use std::net::{SocketAddr, TcpStream};
use std::time::Instant;

use super::peer_message::Bitfield;

/// What the remote peer's choke currently means for us.
///
/// `AwaitingUnchoke` is the window between our UNCHOKE+INTERESTED and the
/// peer's answer: requests are buffered instead of re-interesting the peer
/// on every tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChokeState {
    Choked,
    Unchoked,
    AwaitingUnchoke,
}

/// Represents our status in the peer session.
#[derive(Debug, Clone)]
pub struct SessionStatus {
    /// The other peer is choking us
    pub peer_choking: ChokeState,
    /// The other peer is interested in us
    pub peer_interested: bool,
    /// We are choking the other peer
    pub am_choking: bool,
    /// We are interested in the other peer
    pub am_interested: bool,
}

impl SessionStatus {
    pub fn new() -> Self {
        Self {
            peer_choking: ChokeState::Choked,
            peer_interested: false,
            am_choking: true,
            am_interested: false,
        }
    }
}

impl Default for SessionStatus {
    fn default() -> Self {
        Self::new()
    }
}

/// Receive buffer of a node.
///
/// `stalled` records that the current bytes cannot yield another frame;
/// re-scanning is pointless until the next successful read clears it.
#[derive(Debug)]
pub struct Inbox {
    buf: Vec<u8>,
    stalled: bool,
}

impl Inbox {
    pub fn new() -> Self {
        Self {
            buf: Vec::new(),
            stalled: false,
        }
    }

    pub fn append(&mut self, bytes: &[u8]) {
        self.buf.extend_from_slice(bytes);
        self.stalled = false;
    }

    pub fn mark_stalled(&mut self) {
        self.stalled = true;
    }

    pub fn is_stalled(&self) -> bool {
        self.stalled
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    pub fn as_slice(&self) -> &[u8] {
        &self.buf
    }

    /// Drops the first `used` bytes, already turned into a frame.
    pub fn consume(&mut self, used: usize) {
        self.buf.drain(..used);
    }
}

impl Default for Inbox {
    fn default() -> Self {
        Self::new()
    }
}

/// One remote peer: socket, buffers, wire flags and availability.
///
/// A `Node` is created as soon as the address is known; the socket arrives
/// later from the connect fan-out. `close()` drops the socket and marks the
/// node for pruning at the top of the next tick.
#[derive(Debug)]
pub struct Node {
    pub addr: SocketAddr,
    pub conn: Option<TcpStream>,
    closed: bool,
    /// A handshake frame was extracted from this node's inbox.
    pub handshaked: bool,
    pub peer_id: Option<[u8; 20]>,
    pub status: SessionStatus,
    pub bitfield: Bitfield,
    pub inbox: Inbox,
    pub outbox: VecDeque<Vec<u8>>,
    /// Number of outstanding requests targeting this node.
    pub in_flight: usize,
    pub last_send: Instant,
    pub last_recv: Instant,
    /// (piece, chunk) requests held back until the peer unchokes us.
    pub deferred_requests: Vec<(u32, u32)>,
}

impl Node {
    pub fn new(addr: SocketAddr, total_pieces: u32) -> Self {
        let now = Instant::now();
        Self {
            addr,
            conn: None,
            closed: false,
            handshaked: false,
            peer_id: None,
            status: SessionStatus::new(),
            bitfield: Bitfield::with_capacity(total_pieces),
            inbox: Inbox::new(),
            outbox: VecDeque::new(),
            in_flight: 0,
            last_send: now,
            last_recv: now,
            deferred_requests: Vec::new(),
        }
    }

    /// Hands the node its freshly connected socket.
    pub fn attach(&mut self, stream: TcpStream) {
        self.conn = Some(stream);
    }

    /// Drops the connection; the peer set prunes closed nodes each tick.
    pub fn close(&mut self) {
        self.conn = None;
        self.closed = true;
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    pub fn is_connected(&self) -> bool {
        self.conn.is_some()
    }

    /// Queues bytes for the send phase of the next ticks.
    pub fn send(&mut self, bytes: Vec<u8>) {
        self.outbox.push_back(bytes);
    }
}

impl PartialEq for Node {
    fn eq(&self, other: &Self) -> bool {
        self.addr == other.addr
    }
}

impl Eq for Node {}
