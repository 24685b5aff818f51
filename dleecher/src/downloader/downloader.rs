use std::collections::VecDeque;
use std::net::SocketAddr;
use std::sync::mpsc::{channel, Receiver, Sender};
use std::time::Duration;

use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use tracing::{debug, info, warn};

use crate::peer::peer_set::PeerSet;

use super::pending_request::PendingRequest;
use super::piece::{ChunkStatus, Piece};

pub const MAX_ACTIVE_PIECES: usize = 16;
pub const MAX_ACTIVE_CHUNKS: usize = 16;
pub const MAX_REQUESTS: usize = 4;
pub const END_OF_GAME_ON: usize = 4;
pub const TIMEOUT: Duration = Duration::from_secs(60);

/// What the scheduler tells the engine, drained from the channel returned
/// by the constructor.
#[derive(Debug)]
pub enum DownloadEvent {
    /// A request was dropped; the engine may send a CANCEL frame.
    Cancel {
        node: SocketAddr,
        piece: u32,
        chunk: u32,
    },
    /// A piece was assembled and verified.
    PieceDownloaded {
        node: SocketAddr,
        piece: u32,
        data: Vec<u8>,
    },
    /// Every piece is done. Emitted exactly once.
    Finished,
}

/// The piece/chunk scheduler.
///
/// Decides which chunks to fetch from which peers, tracks outstanding
/// requests and their timeouts, and verifies assembled pieces. It owns no
/// nodes and no pieces: the engine passes views in, and requests hold
/// indices only.
#[derive(Debug)]
pub struct Downloader {
    /// Pieces being assembled, in activation order.
    active_pieces: Vec<u32>,
    /// Pieces not started yet, in index order.
    inactive_pieces: VecDeque<u32>,
    requests: Vec<PendingRequest>,
    downloaded_bytes: u64,
    total_pieces: u32,
    finished_emitted: bool,
    events: Sender<DownloadEvent>,
    rng: StdRng,
}

impl Downloader {
    /// Creates a new `Downloader` over `total_pieces` pieces.
    ///
    /// Returns the scheduler and the receiving end of its event channel.
    pub fn new(total_pieces: u32) -> (Self, Receiver<DownloadEvent>) {
        Self::build(total_pieces, StdRng::from_entropy())
    }

    /// Like `new()` but with a deterministic node choice, for tests.
    pub fn with_seed(total_pieces: u32, seed: u64) -> (Self, Receiver<DownloadEvent>) {
        Self::build(total_pieces, StdRng::seed_from_u64(seed))
    }

    fn build(total_pieces: u32, rng: StdRng) -> (Self, Receiver<DownloadEvent>) {
        let (events, receiver) = channel();
        (
            Self {
                active_pieces: Vec::new(),
                inactive_pieces: (0..total_pieces).collect(),
                requests: Vec::new(),
                downloaded_bytes: 0,
                total_pieces,
                finished_emitted: false,
                events,
                rng,
            },
            receiver,
        )
    }

    /// Tells what chunks need to be downloaded now.
    ///
    /// Returns the fresh requests; the engine turns each into a REQUEST
    /// frame. Near the end (few pending pieces) the end-game strategy kicks
    /// in and the same chunk may be handed to several peers.
    pub fn next(&mut self, pieces: &mut [Piece], peers: &mut PeerSet) -> Vec<PendingRequest> {
        let pending = self.active_pieces.len() + self.inactive_pieces.len();
        if pending == 0 {
            return Vec::new();
        }
        if pending <= END_OF_GAME_ON {
            self.next_end_of_game(pieces, peers)
        } else {
            self.next_normal(pieces, peers)
        }
    }

    /// Compiles the list of new requests in normal mode.
    fn next_normal(&mut self, pieces: &mut [Piece], peers: &mut PeerSet) -> Vec<PendingRequest> {
        let mut new_requests = Vec::new();
        let mut idle_nodes = self.idle_nodes(peers);

        // Start to download pieces: strict head-of-list order. If nobody
        // idle owns the head piece, promotion stops for this tick.
        while self.active_pieces.len() < MAX_ACTIVE_PIECES {
            let head = match self.inactive_pieces.front() {
                Some(head) => *head,
                None => break,
            };
            let has_owner = idle_nodes
                .iter()
                .any(|addr| Self::node_has_piece(peers, addr, head));
            if !has_owner {
                break;
            }
            pieces[head as usize].alloc();
            self.active_pieces.push(head);
            self.inactive_pieces.pop_front();
        }

        // Start to download chunks, in index order within each piece.
        for piece_index in self.active_pieces.clone() {
            let piece = &mut pieces[piece_index as usize];
            for chunk in 0..piece.chunk_count() {
                if piece.in_flight >= MAX_ACTIVE_CHUNKS {
                    break;
                }
                if piece.chunk_status(chunk) != Some(ChunkStatus::Empty) {
                    continue;
                }

                let owners: Vec<SocketAddr> = idle_nodes
                    .iter()
                    .copied()
                    .filter(|addr| Self::node_has_piece(peers, addr, piece_index))
                    .collect();
                let chosen = match owners.choose(&mut self.rng) {
                    Some(chosen) => *chosen,
                    None => continue,
                };

                piece.set_downloading(chunk);
                if let Some(node) = peers.get_mut(&chosen) {
                    node.in_flight += 1;
                    if node.in_flight >= MAX_REQUESTS {
                        idle_nodes.retain(|addr| *addr != chosen);
                    }
                }

                let request = PendingRequest::new(chosen, piece_index, chunk);
                self.requests.push(request.clone());
                new_requests.push(request);
            }
        }

        new_requests
    }

    /// End-game: every remaining piece is activated and every empty chunk
    /// is handed to all owners at once to cut the tail latency.
    fn next_end_of_game(
        &mut self,
        pieces: &mut [Piece],
        peers: &mut PeerSet,
    ) -> Vec<PendingRequest> {
        let mut new_requests = Vec::new();

        while let Some(head) = self.inactive_pieces.pop_front() {
            pieces[head as usize].alloc();
            self.active_pieces.push(head);
        }

        for piece_index in self.active_pieces.clone() {
            let piece = &mut pieces[piece_index as usize];
            for chunk in 0..piece.chunk_count() {
                if piece.in_flight >= MAX_ACTIVE_CHUNKS {
                    break;
                }
                if piece.chunk_status(chunk) != Some(ChunkStatus::Empty) {
                    continue;
                }

                let owners: Vec<SocketAddr> = peers
                    .iter()
                    .filter(|node| {
                        node.is_connected()
                            && node.in_flight < MAX_REQUESTS
                            && node.bitfield.has_piece(piece_index)
                            && !self.targets(node.addr, piece_index, chunk)
                    })
                    .map(|node| node.addr)
                    .collect();
                if owners.is_empty() {
                    continue;
                }

                piece.set_downloading(chunk);
                for addr in owners {
                    if let Some(node) = peers.get_mut(&addr) {
                        node.in_flight += 1;
                    }
                    let request = PendingRequest::new(addr, piece_index, chunk);
                    self.requests.push(request.clone());
                    new_requests.push(request);
                }
            }
        }

        new_requests
    }

    /// Records a downloaded chunk.
    ///
    /// Settles the fulfilled request, cancels end-game duplicates of the
    /// chunk, and once the piece assembles, verifies it: a good piece is
    /// retired through `PieceDownloaded`, a bad one silently starts over.
    pub fn finish(
        &mut self,
        from: SocketAddr,
        piece_index: u32,
        chunk: u32,
        data: Vec<u8>,
        pieces: &mut [Piece],
        peers: &mut PeerSet,
    ) {
        // Settle the node's counter together with its request, so a frame
        // nobody asked for (late after a timeout) cannot drive it negative.
        if let Some(position) = self
            .requests
            .iter()
            .position(|r| r.node == from && r.piece == piece_index && r.chunk == chunk)
        {
            self.requests.remove(position);
            if let Some(node) = peers.get_mut(&from) {
                node.in_flight = node.in_flight.saturating_sub(1);
            }
        }

        // Late frame for a retired piece: nothing to record.
        let piece = match pieces.get_mut(piece_index as usize) {
            Some(piece) => piece,
            None => return,
        };
        if piece.chunk_status(chunk).is_none() {
            return;
        }

        let received = data.len() as u64;
        piece.set_chunk(chunk, data);
        self.downloaded_bytes += received;

        // Drop every duplicate of this chunk still targeting other peers.
        let duplicates: Vec<PendingRequest> = self
            .requests
            .iter()
            .filter(|r| r.piece == piece_index && r.chunk == chunk)
            .cloned()
            .collect();
        self.requests
            .retain(|r| !(r.piece == piece_index && r.chunk == chunk));
        for duplicate in duplicates {
            if let Some(node) = peers.get_mut(&duplicate.node) {
                node.in_flight = node.in_flight.saturating_sub(1);
            }
            self.emit(DownloadEvent::Cancel {
                node: duplicate.node,
                piece: piece_index,
                chunk,
            });
        }

        if !piece.is_complete() {
            return;
        }

        match piece.verify_and_extract() {
            Some(data) => {
                piece.clear();
                self.active_pieces.retain(|index| *index != piece_index);
                info!("Piece {} downloaded!", piece_index);
                self.emit(DownloadEvent::PieceDownloaded {
                    node: from,
                    piece: piece_index,
                    data,
                });
                if self.active_pieces.is_empty()
                    && self.inactive_pieces.is_empty()
                    && !self.finished_emitted
                {
                    self.finished_emitted = true;
                    self.emit(DownloadEvent::Finished);
                }
            }
            None => {
                warn!("Piece {} failed its hash check, starting over", piece_index);
                piece.reset();
            }
        }
    }

    /// Call this once per tick. It cancels at most one timed out request,
    /// reverting its chunk so `next()` can reschedule it.
    pub fn message(&mut self, pieces: &mut [Piece], peers: &mut PeerSet) {
        let position = match self.requests.iter().position(|r| r.is_expired(TIMEOUT)) {
            Some(position) => position,
            None => return,
        };
        let request = self.requests.remove(position);
        debug!(
            "Request (piece {}, chunk {}) to {} timed out",
            request.piece, request.chunk, request.node
        );

        if let Some(node) = peers.get_mut(&request.node) {
            node.in_flight = node.in_flight.saturating_sub(1);
        }
        if let Some(piece) = pieces.get_mut(request.piece as usize) {
            piece.revert_chunk(request.chunk);
        }
        self.emit(DownloadEvent::Cancel {
            node: request.node,
            piece: request.piece,
            chunk: request.chunk,
        });
    }

    /// Return length of all downloaded data in bytes including bad.
    pub fn downloaded(&self) -> u64 {
        self.downloaded_bytes
    }

    /// Return download progress from 0.0 to 1.0 (by downloaded pieces).
    pub fn progress(&self) -> f64 {
        if self.total_pieces == 0 {
            return 1.0;
        }
        let pending = (self.active_pieces.len() + self.inactive_pieces.len()) as f64;
        1.0 - pending / self.total_pieces as f64
    }

    /// Return the number of bytes not yet verified and retired.
    pub fn left_bytes(&self, pieces: &[Piece]) -> u64 {
        self.active_pieces
            .iter()
            .chain(self.inactive_pieces.iter())
            .filter_map(|index| pieces.get(*index as usize))
            .map(|piece| piece.length() as u64)
            .sum()
    }

    /// Return a tuple (peers with outstanding requests, all peers).
    pub fn nodes_count(&self, peers: &PeerSet) -> (usize, usize) {
        let busy = peers.iter().filter(|node| node.in_flight > 0).count();
        (busy, peers.len())
    }

    pub fn is_finished(&self) -> bool {
        self.active_pieces.is_empty() && self.inactive_pieces.is_empty()
    }

    fn idle_nodes(&self, peers: &PeerSet) -> Vec<SocketAddr> {
        peers
            .iter()
            .filter(|node| node.is_connected() && node.in_flight < MAX_REQUESTS)
            .map(|node| node.addr)
            .collect()
    }

    fn node_has_piece(peers: &PeerSet, addr: &SocketAddr, piece: u32) -> bool {
        peers
            .get(addr)
            .map(|node| node.bitfield.has_piece(piece))
            .unwrap_or(false)
    }

    fn targets(&self, addr: SocketAddr, piece: u32, chunk: u32) -> bool {
        self.requests
            .iter()
            .any(|r| r.node == addr && r.piece == piece && r.chunk == chunk)
    }

    fn emit(&self, event: DownloadEvent) {
        // The engine owns the receiving end; if it is gone the events are
        // moot anyway.
        let _ = self.events.send(event);
    }
}
