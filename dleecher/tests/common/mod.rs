//! Scripted collaborators for the scenario tests: a minimal HTTP tracker
//! and a remote peer driven by a small script, both on loopback threads.

use std::collections::BTreeMap;
use std::io::{Read, Write};
use std::net::{SocketAddr, TcpListener, TcpStream};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use bencoder::bencode::Bencode;

/// How a scripted peer reacts to REQUEST messages.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestBehavior {
    /// Serve the configured piece data.
    Serve,
    /// Serve garbage of the requested length.
    ServeGarbage,
    /// Never answer.
    Ignore,
}

/// Script of one fake remote peer.
pub struct PeerScript {
    pub info_hash: [u8; 20],
    pub bitfield: Vec<u8>,
    /// Piece payloads by index; only the pieces the bitfield claims are
    /// ever requested.
    pub pieces: Vec<Vec<u8>>,
    pub behavior: RequestBehavior,
    /// Holds the bitfield back, to control which peer the engine sees
    /// first.
    pub bitfield_delay: Option<Duration>,
}

/// What a scripted peer observed, returned when its thread finishes.
#[derive(Debug, Default)]
pub struct PeerLog {
    /// (piece, begin, length) of every REQUEST received.
    pub requests: Vec<(u32, u32, u32)>,
    /// (piece, begin, length) of every CANCEL received.
    pub cancels: Vec<(u32, u32, u32)>,
    pub interested: usize,
}

/// Starts a scripted peer. It answers the handshake, announces its
/// bitfield, unchokes on INTERESTED and then follows its request behavior
/// until the engine hangs up.
pub fn spawn_peer(script: PeerScript) -> (SocketAddr, JoinHandle<PeerLog>) {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = listener.local_addr().unwrap();

    let handle = thread::spawn(move || {
        let mut log = PeerLog::default();
        let (mut stream, _) = match listener.accept() {
            Ok(accepted) => accepted,
            Err(_) => return log,
        };
        stream
            .set_read_timeout(Some(Duration::from_secs(30)))
            .unwrap();

        // Their greeting, then ours plus our bitfield.
        let mut handshake = [0u8; 68];
        if stream.read_exact(&mut handshake).is_err() {
            return log;
        }
        let mut reply = Vec::new();
        reply.push(19);
        reply.extend_from_slice(b"BitTorrent protocol");
        reply.extend_from_slice(&[0; 8]);
        reply.extend_from_slice(&script.info_hash);
        reply.extend_from_slice(b"-SCRIPT0-00000000000");
        stream.write_all(&reply).unwrap();
        if let Some(delay) = script.bitfield_delay {
            thread::sleep(delay);
        }
        write_message(&mut stream, 5, &script.bitfield);

        loop {
            let mut length = [0u8; 4];
            if stream.read_exact(&mut length).is_err() {
                break;
            }
            let length = u32::from_be_bytes(length) as usize;
            if length == 0 {
                continue;
            }
            let mut body = vec![0u8; length];
            if stream.read_exact(&mut body).is_err() {
                break;
            }

            match body[0] {
                // INTERESTED: always release the engine.
                2 => {
                    log.interested += 1;
                    write_message(&mut stream, 1, &[]);
                }
                // REQUEST
                6 => {
                    let (piece, begin, block_len) = parse_request(&body);
                    log.requests.push((piece, begin, block_len));
                    match script.behavior {
                        RequestBehavior::Serve => {
                            let data = &script.pieces[piece as usize]
                                [begin as usize..(begin + block_len) as usize];
                            write_piece(&mut stream, piece, begin, data);
                        }
                        RequestBehavior::ServeGarbage => {
                            let data = vec![0xEE; block_len as usize];
                            write_piece(&mut stream, piece, begin, &data);
                        }
                        RequestBehavior::Ignore => (),
                    }
                }
                // CANCEL
                8 => {
                    log.cancels.push(parse_request(&body));
                }
                _ => (),
            }
        }
        log
    });

    (addr, handle)
}

/// Starts a one-torrent HTTP tracker announcing the given peer addresses
/// in compact form. Serves every request until the test process exits.
pub fn spawn_tracker(peers: Vec<SocketAddr>) -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = listener.local_addr().unwrap();

    let mut compact = Vec::new();
    for peer in &peers {
        match peer {
            SocketAddr::V4(v4) => {
                compact.extend_from_slice(&v4.ip().octets());
                compact.extend_from_slice(&v4.port().to_be_bytes());
            }
            SocketAddr::V6(_) => panic!("scripted peers are IPv4"),
        }
    }

    let mut dict = BTreeMap::new();
    dict.insert(b"interval".to_vec(), Bencode::BNumber(1800));
    dict.insert(b"peers".to_vec(), Bencode::BString(compact));
    let body = Bencode::encode(&Bencode::BDict(dict));

    thread::spawn(move || {
        for stream in listener.incoming() {
            let mut stream = match stream {
                Ok(stream) => stream,
                Err(_) => break,
            };
            let _ = stream.set_read_timeout(Some(Duration::from_secs(5)));
            // Read the request head; the query is all we are asked for.
            let mut buf = [0u8; 2048];
            let _ = stream.read(&mut buf);
            let _ = stream.write_all(b"HTTP/1.1 200 OK\r\n\r\n");
            let _ = stream.write_all(&body);
        }
    });

    addr
}

fn parse_request(body: &[u8]) -> (u32, u32, u32) {
    (
        u32::from_be_bytes([body[1], body[2], body[3], body[4]]),
        u32::from_be_bytes([body[5], body[6], body[7], body[8]]),
        u32::from_be_bytes([body[9], body[10], body[11], body[12]]),
    )
}

fn write_message(stream: &mut TcpStream, id: u8, payload: &[u8]) {
    let mut frame = Vec::with_capacity(5 + payload.len());
    frame.extend_from_slice(&((payload.len() + 1) as u32).to_be_bytes());
    frame.push(id);
    frame.extend_from_slice(payload);
    stream.write_all(&frame).unwrap();
}

fn write_piece(stream: &mut TcpStream, piece: u32, begin: u32, data: &[u8]) {
    let mut payload = Vec::with_capacity(8 + data.len());
    payload.extend_from_slice(&piece.to_be_bytes());
    payload.extend_from_slice(&begin.to_be_bytes());
    payload.extend_from_slice(data);
    write_message(stream, 7, &payload);
}
