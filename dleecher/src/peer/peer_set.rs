use std::io::{ErrorKind, Read, Write};
use std::net::{SocketAddr, TcpStream, ToSocketAddrs};
use std::thread;
use std::time::{Duration, Instant};

use tracing::{debug, warn};

use super::handshake::{Handshake, HandshakeError, HANDSHAKE_LEN};
use super::node::Node;
use super::peer_message::{Frame, FrameError, Message};

/// Largest read done in one tick for one node.
const MAX_CHUNK_SIZE: usize = 1500;

/// A keep-alive is sent on an outbox this long idle.
const KEEP_ALIVE_INTERVAL: Duration = Duration::from_secs(100);

/// End-of-tick pause to yield the CPU.
const TICK_PAUSE: Duration = Duration::from_millis(50);

/// One frame received from a node, handed to the engine in arrival order.
#[derive(Debug)]
pub enum WireEvent {
    Handshake {
        from: SocketAddr,
        handshake: Handshake,
    },
    KeepAlive {
        from: SocketAddr,
    },
    Message {
        from: SocketAddr,
        message: Message,
    },
}

/// The set of known peers.
///
/// Owns every [`Node`] and runs their socket I/O once per tick: closed
/// nodes are pruned, then each live node gets one non-blocking read, frame
/// extraction, and an outbox drain.
#[derive(Debug)]
pub struct PeerSet {
    nodes: Vec<Node>,
    total_pieces: u32,
    connect_timeout: Duration,
}

impl PeerSet {
    pub fn new(total_pieces: u32, connect_timeout: Duration) -> Self {
        Self {
            nodes: Vec::new(),
            total_pieces,
            connect_timeout,
        }
    }

    /// Adds a peer address. Idempotent: a known address is left alone.
    pub fn append(&mut self, ip: &str, port: u16) {
        let addr = match (ip, port).to_socket_addrs() {
            Ok(mut addrs) => match addrs.next() {
                Some(addr) => addr,
                None => return,
            },
            Err(err) => {
                warn!("Peer address {}:{} does not resolve: {}", ip, port, err);
                return;
            }
        };

        if self.nodes.iter().any(|node| node.addr == addr) {
            return;
        }
        self.nodes.push(Node::new(addr, self.total_pieces));
    }

    /// Connects every unconnected node, one short-lived thread per node so a
    /// slow peer does not hold back the rest. Joined before returning; a
    /// failed connect closes its node.
    pub fn connect_all(&mut self) {
        let mut handles = Vec::new();

        for (index, node) in self.nodes.iter().enumerate() {
            if node.is_connected() || node.is_closed() {
                continue;
            }
            let addr = node.addr;
            let timeout = self.connect_timeout;
            let builder = thread::Builder::new().name(format!("connect {}", addr));
            match builder.spawn(move || TcpStream::connect_timeout(&addr, timeout)) {
                Ok(handle) => handles.push((index, handle)),
                Err(err) => warn!("Could not spawn connect thread for {}: {}", addr, err),
            }
        }

        for (index, handle) in handles {
            let node = &mut self.nodes[index];
            match handle.join() {
                Ok(Ok(stream)) => match stream.set_nonblocking(true) {
                    Ok(()) => {
                        debug!("Connected to peer {}", node.addr);
                        node.attach(stream);
                    }
                    Err(err) => {
                        warn!("Could not unblock socket of {}: {}", node.addr, err);
                        node.close();
                    }
                },
                _ => {
                    debug!("Could not connect to peer {}", node.addr);
                    node.close();
                }
            }
        }
    }

    /// Runs one I/O tick over every live node and returns the received
    /// frames in order. Pauses briefly at the end to yield the CPU.
    pub fn message(&mut self) -> Vec<WireEvent> {
        self.nodes.retain(|node| !node.is_closed());

        let mut events = Vec::new();
        for node in &mut self.nodes {
            recv_node(node, &mut events);
            send_node(node);
        }

        thread::sleep(TICK_PAUSE);
        events
    }

    pub fn get(&self, addr: &SocketAddr) -> Option<&Node> {
        self.nodes.iter().find(|node| node.addr == *addr)
    }

    pub fn get_mut(&mut self, addr: &SocketAddr) -> Option<&mut Node> {
        self.nodes.iter_mut().find(|node| node.addr == *addr)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Node> {
        self.nodes.iter()
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut Node> {
        self.nodes.iter_mut()
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }
}

/// One non-blocking read into the inbox, then frame extraction.
fn recv_node(node: &mut Node, events: &mut Vec<WireEvent>) {
    let conn = match node.conn.as_mut() {
        Some(conn) => conn,
        None => return,
    };

    let mut chunk = [0u8; MAX_CHUNK_SIZE];
    match conn.read(&mut chunk) {
        // A zero read on a readable socket is the remote end closing.
        Ok(0) => {
            debug!("Peer {} closed the connection", node.addr);
            node.close();
            return;
        }
        Ok(n) => {
            node.inbox.append(&chunk[..n]);
            node.last_recv = Instant::now();
        }
        Err(err) if err.kind() == ErrorKind::WouldBlock => (),
        Err(err) => {
            warn!("Recv error on {}: {}", node.addr, err);
            node.close();
            return;
        }
    }

    extract_frames(node, events);
}

/// Extracts every complete frame at the front of the inbox.
///
/// A handshake is only recognized before `handshaked` is set and only when
/// the first byte equals the protocol string length (19); everything else
/// is read as a length-prefixed frame.
fn extract_frames(node: &mut Node, events: &mut Vec<WireEvent>) {
    while !node.inbox.is_empty() && !node.inbox.is_stalled() {
        let buf = node.inbox.as_slice();

        if !node.handshaked && buf[0] == 19 {
            match Handshake::parse(buf) {
                Ok(handshake) => {
                    node.handshaked = true;
                    events.push(WireEvent::Handshake {
                        from: node.addr,
                        handshake,
                    });
                    node.inbox.consume(HANDSHAKE_LEN);
                }
                Err(HandshakeError::Truncated) => {
                    node.inbox.mark_stalled();
                    return;
                }
                Err(HandshakeError::ProtocolMismatch) => {
                    warn!("Peer {} sent a foreign handshake", node.addr);
                    node.close();
                    return;
                }
            }
        } else {
            match Frame::parse(buf) {
                Ok((Frame::KeepAlive, used)) => {
                    events.push(WireEvent::KeepAlive { from: node.addr });
                    node.inbox.consume(used);
                }
                Ok((Frame::Message(message), used)) => {
                    events.push(WireEvent::Message {
                        from: node.addr,
                        message,
                    });
                    node.inbox.consume(used);
                }
                Err(FrameError::Truncated) => {
                    node.inbox.mark_stalled();
                    return;
                }
                Err(err) => {
                    warn!("Peer {} sent a malformed frame: {:?}", node.addr, err);
                    node.close();
                    return;
                }
            }
        }
    }
}

/// Drains the outbox to the socket; queues a keep-alive on a long idle one.
fn send_node(node: &mut Node) {
    if node.conn.is_none() {
        return;
    }

    if node.outbox.is_empty() && node.last_send.elapsed() > KEEP_ALIVE_INTERVAL {
        node.outbox.push_back(vec![0; 4]);
    }

    while let Some(front) = node.outbox.front_mut() {
        let conn = match node.conn.as_mut() {
            Some(conn) => conn,
            None => return,
        };
        match conn.write(front) {
            Ok(written) => {
                node.last_send = Instant::now();
                if written == front.len() {
                    node.outbox.pop_front();
                } else {
                    // Partial write: keep the tail for the next tick.
                    front.drain(..written);
                    return;
                }
            }
            Err(err) if err.kind() == ErrorKind::WouldBlock => return,
            Err(err) => {
                warn!("Send error on {}: {}", node.addr, err);
                node.close();
                return;
            }
        }
    }
}
