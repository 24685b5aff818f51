// IDs of the messages defined in the protocol.
#[derive(PartialEq, Eq, Debug, Clone, Copy)]
pub enum MessageId {
    Choke = 0,
    Unchoke = 1,
    Interested = 2,
    NotInterested = 3,
    Have = 4,
    Bitfield = 5,
    Request = 6,
    Piece = 7,
    Cancel = 8,
}

impl MessageId {
    fn from_u8(byte: u8) -> Option<MessageId> {
        match byte {
            0 => Some(MessageId::Choke),
            1 => Some(MessageId::Unchoke),
            2 => Some(MessageId::Interested),
            3 => Some(MessageId::NotInterested),
            4 => Some(MessageId::Have),
            5 => Some(MessageId::Bitfield),
            6 => Some(MessageId::Request),
            7 => Some(MessageId::Piece),
            8 => Some(MessageId::Cancel),
            _ => None,
        }
    }
}

/// A regular wire message: message ID plus payload.
#[derive(Debug, PartialEq)]
pub struct Message {
    pub id: MessageId,
    pub payload: Vec<u8>,
}

/// One frame extracted from a peer's inbox.
#[derive(Debug, PartialEq)]
pub enum Frame {
    /// A zero length prefix.
    KeepAlive,
    Message(Message),
}

/// Posible frame extraction errors.
///
/// `Truncated` means the buffer does not hold a whole frame yet; the caller
/// keeps the bytes and retries once more arrive. The other variants are
/// protocol violations.
#[derive(Debug, PartialEq)]
pub enum FrameError {
    Truncated,
    UnknownId(u8),
    TooLong(usize),
}

/// Upper bound on a declared frame length. Nothing the protocol sends here
/// comes close (the largest regular message is a 16 KiB block), so a bigger
/// declared length is garbage and not worth buffering for.
const MAX_FRAME_LEN: usize = 16 * 16384;

impl Message {
    /// Creates a new `Message` from a message ID and a payload.
    pub fn new(id: MessageId, payload: Vec<u8>) -> Self {
        Self { id, payload }
    }

    /// Converts a `Message` to a byte array: 4-byte big-endian length,
    /// message ID, payload.
    pub fn as_bytes(&self) -> Vec<u8> {
        let len = self.payload.len() + 1;
        let mut bytes = Vec::with_capacity(4 + len);
        bytes.extend_from_slice(&(len as u32).to_be_bytes());
        bytes.push(self.id as u8);
        bytes.extend_from_slice(&self.payload);
        bytes
    }
}

impl Frame {
    /// Attempts to extract one frame from the start of `buf`.
    ///
    /// On success returns the frame and the number of bytes it used.
    pub fn parse(buf: &[u8]) -> Result<(Frame, usize), FrameError> {
        if buf.len() < 4 {
            return Err(FrameError::Truncated);
        }

        let length = u32::from_be_bytes([buf[0], buf[1], buf[2], buf[3]]) as usize;
        if length == 0 {
            return Ok((Frame::KeepAlive, 4));
        }
        if length > MAX_FRAME_LEN {
            return Err(FrameError::TooLong(length));
        }
        if buf.len() < 4 + length {
            return Err(FrameError::Truncated);
        }

        let id = MessageId::from_u8(buf[4]).ok_or(FrameError::UnknownId(buf[4]))?;
        let payload = buf[5..4 + length].to_vec();

        Ok((Frame::Message(Message::new(id, payload)), 4 + length))
    }
}
