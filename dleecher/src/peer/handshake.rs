/// Posible `Handshake` parsing errors.
///
/// `Truncated` means the buffer does not hold a whole handshake yet; the
/// caller keeps the bytes and retries once more arrive.
#[derive(Debug, PartialEq)]
pub enum HandshakeError {
    Truncated,
    ProtocolMismatch,
}

/// Represents a handshake message.
/// Is the first message sent to start a connection with a peer.
#[derive(Debug, PartialEq)]
pub struct Handshake {
    pub info_hash: [u8; 20],
    pub peer_id: [u8; 20],
}

const PSTR: &[u8; 19] = b"BitTorrent protocol";

/// A handshake is always 49 + len(pstr) = 68 bytes on the wire.
pub const HANDSHAKE_LEN: usize = 68;

impl Handshake {
    /// Creates a new `Handshake` message.
    pub fn new(info_hash: [u8; 20], peer_id: [u8; 20]) -> Self {
        Self { info_hash, peer_id }
    }

    /// Converts a `Handshake` message to a byte array.
    pub fn as_bytes(&self) -> Vec<u8> {
        let mut bytes = Vec::with_capacity(HANDSHAKE_LEN);
        bytes.push(PSTR.len() as u8);
        bytes.extend_from_slice(PSTR);
        bytes.extend_from_slice(&[0; 8]);
        bytes.extend_from_slice(&self.info_hash);
        bytes.extend_from_slice(&self.peer_id);
        bytes
    }

    /// Parses a `Handshake` out of the first [`HANDSHAKE_LEN`] bytes of `buf`.
    ///
    /// The 8 reserved bytes are ignored.
    ///
    /// It returns an `HandshakeError` if:
    /// - `Truncated`: the buffer holds fewer than [`HANDSHAKE_LEN`] bytes.
    /// - `ProtocolMismatch`: the protocol string is not the BitTorrent one.
    pub fn parse(buf: &[u8]) -> Result<Self, HandshakeError> {
        if buf.len() < HANDSHAKE_LEN {
            return Err(HandshakeError::Truncated);
        }
        if buf[0] != PSTR.len() as u8 || &buf[1..20] != PSTR {
            return Err(HandshakeError::ProtocolMismatch);
        }

        let mut info_hash = [0u8; 20];
        info_hash.copy_from_slice(&buf[28..48]);
        let mut peer_id = [0u8; 20];
        peer_id.copy_from_slice(&buf[48..68]);

        Ok(Self { info_hash, peer_id })
    }
}
