use std::net::SocketAddr;
use std::sync::mpsc::Receiver;
use std::time::Duration;

use tracing::{debug, info, warn};

use crate::{
    config::cfg::Cfg,
    downloader::{
        downloader::{DownloadEvent, Downloader},
        piece::{Piece, CHUNK_SIZE},
    },
    peer::{
        handshake::Handshake,
        node::ChokeState,
        peer_message::{Bitfield, Message, MessageId, Request},
        peer_set::{PeerSet, WireEvent},
    },
    storage_manager::writer::Writer,
    torrent_parser::torrent::Torrent,
    tracker::{
        tracker_event::TrackerEvent,
        tracker_handler::{TrackerHandler, TrackerHandlerError},
    },
    utils::{identity, port},
};

/// Posible torrent handler errors, all out of construction or `start()`;
/// past that point failures are handled locally by closing peers.
#[derive(Debug)]
pub enum TorrentHandlerError {
    TrackerError(TrackerHandlerError),
    NoPortAvailable,
    IoError(std::io::Error),
}

/// The engine: owns every piece of core state and wires the peer set, the
/// scheduler and the writer together, one `message()` call per tick.
#[derive(Debug)]
pub struct TorrentHandler {
    torrent: Torrent,
    pieces: Vec<Piece>,
    peers: PeerSet,
    downloader: Downloader,
    download_events: Receiver<DownloadEvent>,
    writer: Writer,
    tracker: TrackerHandler,
    peer_id: [u8; 20],
    finished: bool,
}

impl TorrentHandler {
    /// Creates a new `TorrentHandler` from a torrent and a config.
    ///
    /// Probes the listen port and generates the client identity; no network
    /// traffic happens before `start()`.
    pub fn new(torrent: Torrent, config: Cfg) -> Result<Self, TorrentHandlerError> {
        let peer_id = identity::gen_peer_id();
        let listen_port =
            port::probe_listen_port().map_err(|_| TorrentHandlerError::NoPortAvailable)?;

        let total_pieces = torrent.total_pieces();
        let pieces = (0..total_pieces)
            .map(|index| Piece::new(index, torrent.piece_hash(index), torrent.piece_len(index)))
            .collect();

        let peers = PeerSet::new(
            total_pieces,
            Duration::from_secs(config.connect_seconds_timeout),
        );
        let (downloader, download_events) = Downloader::new(total_pieces);
        let writer = Writer::new(torrent.file_map(&config.download_directory));
        let tracker = TrackerHandler::new(&torrent, listen_port, peer_id);

        Ok(Self {
            torrent,
            pieces,
            peers,
            downloader,
            download_events,
            writer,
            tracker,
            peer_id,
            finished: false,
        })
    }

    /// Starts the download: pre-allocates the files, announces to the
    /// tracker, connects to the returned peers and greets each with a
    /// handshake.
    ///
    /// # Errors
    ///
    /// - `IoError` if the files could not be created.
    /// - `TrackerError` if no tracker answered; the engine must not enter
    ///   its loop without peers to ask for.
    pub fn start(&mut self) -> Result<(), TorrentHandlerError> {
        self.writer
            .create_files()
            .map_err(TorrentHandlerError::IoError)?;

        let response = self
            .tracker
            .announce(TrackerEvent::Started, 0, 0, self.torrent.length())
            .map_err(TorrentHandlerError::TrackerError)?;

        for peer in &response.peers {
            self.peers.append(&peer.ip, peer.port);
        }
        info!("Tracker seeded {} peer addresses", self.peers.len());

        self.peers.connect_all();

        let handshake = Handshake::new(self.torrent.info_hash, self.peer_id).as_bytes();
        for node in self.peers.iter_mut() {
            if node.is_connected() {
                node.send(handshake.clone());
            }
        }

        Ok(())
    }

    /// Runs one engine tick: peer I/O, message dispatch, request timeouts
    /// and fresh request emission.
    pub fn message(&mut self) {
        for event in self.peers.message() {
            self.handle_wire_event(event);
            self.drain_download_events();
        }

        self.downloader.message(&mut self.pieces, &mut self.peers);
        self.drain_download_events();
    }

    /// Announces the stop to the tracker (best-effort) and drops every
    /// connection.
    pub fn stop(&mut self) {
        let left = self.downloader.left_bytes(&self.pieces);
        if let Err(err) =
            self.tracker
                .announce(TrackerEvent::Stopped, 0, self.downloader.downloaded(), left)
        {
            warn!("Could not send the stopped event: {:?}", err);
        }
        for node in self.peers.iter_mut() {
            node.close();
        }
    }

    pub fn is_finished(&self) -> bool {
        self.finished
    }

    /// The periodic progress line.
    pub fn status_line(&self) -> String {
        let (busy_peers, all_peers) = self.downloader.nodes_count(&self.peers);
        format!(
            "[{}] [{:.1}%] [{} KB / {} KB] [Peers: {} / {}]",
            self.torrent.name(),
            self.downloader.progress() * 100.0,
            self.downloader.downloaded() / 1024,
            self.torrent.length() / 1024,
            busy_peers,
            all_peers
        )
    }

    fn handle_wire_event(&mut self, event: WireEvent) {
        match event {
            WireEvent::Handshake { from, handshake } => self.handle_handshake(from, handshake),
            WireEvent::KeepAlive { .. } => (),
            WireEvent::Message { from, message } => self.handle_message(from, message),
        }
    }

    /// Validates a received handshake: wrong info-hash closes the node.
    fn handle_handshake(&mut self, from: SocketAddr, handshake: Handshake) {
        let info_hash = self.torrent.info_hash;
        let node = match self.peers.get_mut(&from) {
            Some(node) => node,
            None => return,
        };

        if handshake.info_hash != info_hash {
            warn!("Peer {} answered for another torrent", from);
            node.close();
            return;
        }

        node.peer_id = Some(handshake.peer_id);
        debug!("Handshake completed with {}", from);
    }

    fn handle_message(&mut self, from: SocketAddr, message: Message) {
        {
            let node = match self.peers.get_mut(&from) {
                Some(node) => node,
                None => return,
            };
            // A regular message from a peer that never shook hands.
            if !node.handshaked {
                warn!("Peer {} spoke before the handshake", from);
                node.close();
                return;
            }
        }

        match message.id {
            MessageId::Choke => self.set_peer_choking(from, ChokeState::Choked),
            MessageId::Unchoke => self.handle_unchoke(from),
            MessageId::Interested => self.set_peer_interested(from, true),
            MessageId::NotInterested => self.set_peer_interested(from, false),
            MessageId::Have => self.handle_have(from, message),
            MessageId::Bitfield => self.handle_bitfield(from, message),
            MessageId::Piece => self.handle_piece(from, message),
            // We never serve uploads, so requests need no answer.
            MessageId::Request | MessageId::Cancel => (),
        }
    }

    fn set_peer_choking(&mut self, from: SocketAddr, state: ChokeState) {
        if let Some(node) = self.peers.get_mut(&from) {
            node.status.peer_choking = state;
        }
    }

    fn set_peer_interested(&mut self, from: SocketAddr, interested: bool) {
        if let Some(node) = self.peers.get_mut(&from) {
            node.status.peer_interested = interested;
        }
    }

    /// UNCHOKE releases the requests held back by the choke gate.
    fn handle_unchoke(&mut self, from: SocketAddr) {
        let deferred = match self.peers.get_mut(&from) {
            Some(node) => {
                node.status.peer_choking = ChokeState::Unchoked;
                std::mem::take(&mut node.deferred_requests)
            }
            None => return,
        };

        for (piece, chunk) in deferred {
            self.send_request(from, piece, chunk);
        }
        self.download_chunks();
    }

    fn handle_have(&mut self, from: SocketAddr, message: Message) {
        let node = match self.peers.get_mut(&from) {
            Some(node) => node,
            None => return,
        };
        if message.payload.len() != 4 {
            warn!("Peer {} sent a malformed HAVE", from);
            node.close();
            return;
        }

        let index = u32::from_be_bytes([
            message.payload[0],
            message.payload[1],
            message.payload[2],
            message.payload[3],
        ]);
        node.bitfield.set_bit(index, true);

        self.download_chunks();
    }

    fn handle_bitfield(&mut self, from: SocketAddr, message: Message) {
        if let Some(node) = self.peers.get_mut(&from) {
            node.bitfield = Bitfield::new(message.payload);
        }
        self.download_chunks();
    }

    fn handle_piece(&mut self, from: SocketAddr, message: Message) {
        if message.payload.len() < 8 {
            warn!("Peer {} sent a malformed PIECE", from);
            if let Some(node) = self.peers.get_mut(&from) {
                node.close();
            }
            return;
        }

        let index = u32::from_be_bytes([
            message.payload[0],
            message.payload[1],
            message.payload[2],
            message.payload[3],
        ]);
        let begin = u32::from_be_bytes([
            message.payload[4],
            message.payload[5],
            message.payload[6],
            message.payload[7],
        ]);
        let chunk = begin / CHUNK_SIZE;
        let block = message.payload[8..].to_vec();

        self.downloader
            .finish(from, index, chunk, block, &mut self.pieces, &mut self.peers);
        self.download_chunks();
    }

    /// Turns the scheduler's fresh requests into REQUEST frames, holding
    /// them back behind UNCHOKE+INTERESTED while the peer chokes us.
    fn download_chunks(&mut self) {
        for request in self.downloader.next(&mut self.pieces, &mut self.peers) {
            let choking = match self.peers.get(&request.node) {
                Some(node) => node.status.peer_choking,
                None => continue,
            };
            match choking {
                ChokeState::Unchoked => {
                    self.send_request(request.node, request.piece, request.chunk)
                }
                ChokeState::Choked => {
                    self.send_simple(request.node, MessageId::Unchoke);
                    self.send_simple(request.node, MessageId::Interested);
                    if let Some(node) = self.peers.get_mut(&request.node) {
                        node.status.am_choking = false;
                        node.status.am_interested = true;
                        node.status.peer_choking = ChokeState::AwaitingUnchoke;
                        node.deferred_requests.push((request.piece, request.chunk));
                    }
                }
                ChokeState::AwaitingUnchoke => {
                    if let Some(node) = self.peers.get_mut(&request.node) {
                        node.deferred_requests.push((request.piece, request.chunk));
                    }
                }
            }
        }
    }

    fn drain_download_events(&mut self) {
        while let Ok(event) = self.download_events.try_recv() {
            match event {
                DownloadEvent::Cancel { node, piece, chunk } => {
                    self.send_cancel(node, piece, chunk);
                    self.download_chunks();
                }
                DownloadEvent::PieceDownloaded { piece, data, .. } => {
                    let offset = piece as u64 * self.torrent.piece_length() as u64;
                    if let Err(err) = self.writer.write(offset, &data) {
                        warn!("Could not write piece {}: {}", piece, err);
                    }
                }
                DownloadEvent::Finished => {
                    info!("Torrent {} download finished.", self.torrent.name());
                    self.finished = true;
                }
            }
        }
    }

    fn send_request(&mut self, addr: SocketAddr, piece: u32, chunk: u32) {
        let length = match self.pieces.get(piece as usize) {
            Some(piece) => piece.chunk_len(chunk),
            None => return,
        };
        if let Some(node) = self.peers.get_mut(&addr) {
            let payload = Request::new(piece, chunk * CHUNK_SIZE, length).as_bytes();
            node.send(Message::new(MessageId::Request, payload).as_bytes());
        }
    }

    fn send_cancel(&mut self, addr: SocketAddr, piece: u32, chunk: u32) {
        let length = match self.pieces.get(piece as usize) {
            Some(piece) => piece.chunk_len(chunk),
            None => return,
        };
        if let Some(node) = self.peers.get_mut(&addr) {
            if node.is_connected() {
                let payload = Request::new(piece, chunk * CHUNK_SIZE, length).as_bytes();
                node.send(Message::new(MessageId::Cancel, payload).as_bytes());
            }
        }
    }

    fn send_simple(&mut self, addr: SocketAddr, id: MessageId) {
        if let Some(node) = self.peers.get_mut(&addr) {
            node.send(Message::new(id, vec![]).as_bytes());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::torrent_parser::info::Info;
    use sha1::{Digest, Sha1};
    use std::env;
    use std::net::{TcpListener, TcpStream};

    #[test]
    fn test_wrong_info_hash_closes_the_node() {
        let mut handler = build_handler(1, &[1u8; 16384]);
        let (addr, _remote) = connect_node(&mut handler);

        handler.handle_wire_event(WireEvent::Handshake {
            from: addr,
            handshake: Handshake::new([0xBA; 20], [7; 20]),
        });

        assert!(handler.peers.get(&addr).is_none() || handler.peers.get(&addr).unwrap().is_closed());
    }

    #[test]
    fn test_good_handshake_records_the_peer_id() {
        let mut handler = build_handler(1, &[1u8; 16384]);
        let (addr, _remote) = connect_node(&mut handler);
        let info_hash = handler.torrent.info_hash;

        handler.handle_wire_event(WireEvent::Handshake {
            from: addr,
            handshake: Handshake::new(info_hash, [7; 20]),
        });

        assert_eq!(handler.peers.get(&addr).unwrap().peer_id, Some([7; 20]));
    }

    #[test]
    fn test_message_before_handshake_closes_the_node() {
        let mut handler = build_handler(1, &[1u8; 16384]);
        let (addr, _remote) = connect_node(&mut handler);

        handler.handle_wire_event(WireEvent::Message {
            from: addr,
            message: Message::new(MessageId::Unchoke, vec![]),
        });

        assert!(handler.peers.get(&addr).unwrap().is_closed());
    }

    #[test]
    fn test_choked_peer_gets_interest_instead_of_requests() {
        let mut handler = build_handler(1, &[1u8; 16384]);
        let (addr, _remote) = connect_node(&mut handler);
        shake_hands(&mut handler, addr);

        // BITFIELD announcing the only piece triggers scheduling.
        handler.handle_wire_event(WireEvent::Message {
            from: addr,
            message: Message::new(MessageId::Bitfield, vec![0x80]),
        });

        let node = handler.peers.get(&addr).unwrap();
        let queued: Vec<Vec<u8>> = node.outbox.iter().cloned().collect();
        assert_eq!(
            queued,
            vec![
                Message::new(MessageId::Unchoke, vec![]).as_bytes(),
                Message::new(MessageId::Interested, vec![]).as_bytes(),
            ]
        );
        assert_eq!(node.status.peer_choking, ChokeState::AwaitingUnchoke);
        assert_eq!(node.deferred_requests, vec![(0, 0)]);
        assert!(!node.status.am_choking);
        assert!(node.status.am_interested);
    }

    #[test]
    fn test_repeated_scheduling_does_not_re_interest() {
        let mut handler = build_handler(1, &[1u8; 16384]);
        let (addr, _remote) = connect_node(&mut handler);
        shake_hands(&mut handler, addr);

        handler.handle_wire_event(WireEvent::Message {
            from: addr,
            message: Message::new(MessageId::Bitfield, vec![0x80]),
        });
        let frames_after_first = handler.peers.get(&addr).unwrap().outbox.len();

        // Another availability event while still awaiting the unchoke.
        handler.handle_wire_event(WireEvent::Message {
            from: addr,
            message: Message::new(MessageId::Have, vec![0, 0, 0, 0]),
        });

        assert_eq!(
            handler.peers.get(&addr).unwrap().outbox.len(),
            frames_after_first
        );
    }

    #[test]
    fn test_unchoke_releases_the_deferred_request() {
        let mut handler = build_handler(1, &[1u8; 16384]);
        let (addr, _remote) = connect_node(&mut handler);
        shake_hands(&mut handler, addr);
        handler.handle_wire_event(WireEvent::Message {
            from: addr,
            message: Message::new(MessageId::Bitfield, vec![0x80]),
        });

        handler.handle_wire_event(WireEvent::Message {
            from: addr,
            message: Message::new(MessageId::Unchoke, vec![]),
        });

        let node = handler.peers.get(&addr).unwrap();
        let expected_request = Message::new(
            MessageId::Request,
            Request::new(0, 0, 16384).as_bytes(),
        )
        .as_bytes();
        assert!(node.outbox.iter().any(|frame| *frame == expected_request));
        assert!(node.deferred_requests.is_empty());
        assert_eq!(node.status.peer_choking, ChokeState::Unchoked);
    }

    #[test]
    fn test_piece_message_finishes_the_download() {
        let data = vec![1u8; 16384];
        let mut handler = build_handler(1, &data);
        let (addr, _remote) = connect_node(&mut handler);
        shake_hands(&mut handler, addr);
        handler.writer.create_files().unwrap();
        handler.handle_wire_event(WireEvent::Message {
            from: addr,
            message: Message::new(MessageId::Bitfield, vec![0x80]),
        });
        handler.handle_wire_event(WireEvent::Message {
            from: addr,
            message: Message::new(MessageId::Unchoke, vec![]),
        });

        let mut payload = vec![0, 0, 0, 0, 0, 0, 0, 0];
        payload.extend_from_slice(&data);
        handler.handle_wire_event(WireEvent::Message {
            from: addr,
            message: Message::new(MessageId::Piece, payload),
        });
        handler.drain_download_events();

        assert!(handler.is_finished());
        assert_eq!(handler.downloader.progress(), 1.0);
    }

    // Auxiliary functions

    fn build_handler(total_pieces: u32, piece_data: &[u8]) -> TorrentHandler {
        let hash: [u8; 20] = Sha1::digest(piece_data).into();
        let mut pieces = Vec::new();
        for _ in 0..total_pieces {
            pieces.extend_from_slice(&hash);
        }

        let download_dir = env::temp_dir().join("dleecher_handler_tests");
        let torrent = Torrent {
            announce_url: "http://tracker.invalid/announce".to_string(),
            announce_list: Vec::new(),
            info: Info {
                name: "handler_test.bin".to_string(),
                piece_length: piece_data.len() as i64,
                pieces,
                length: Some(piece_data.len() as i64 * total_pieces as i64),
                files: None,
            },
            info_hash: [0xCE; 20],
        };
        let config = Cfg {
            download_directory: download_dir.to_string_lossy().to_string(),
            connect_seconds_timeout: 2,
            progress_seconds_interval: 2,
        };

        TorrentHandler::new(torrent, config).unwrap()
    }

    /// Appends a really connected localhost node; the remote stream keeps
    /// the socket alive.
    fn connect_node(handler: &mut TorrentHandler) -> (SocketAddr, TcpStream) {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        handler.peers.append(&addr.ip().to_string(), addr.port());
        handler.peers.connect_all();
        let (remote, _) = listener.accept().unwrap();
        (addr, remote)
    }

    fn shake_hands(handler: &mut TorrentHandler, addr: SocketAddr) {
        let info_hash = handler.torrent.info_hash;
        if let Some(node) = handler.peers.get_mut(&addr) {
            node.handshaked = true;
        }
        handler.handle_wire_event(WireEvent::Handshake {
            from: addr,
            handshake: Handshake::new(info_hash, [9; 20]),
        });
    }
}
