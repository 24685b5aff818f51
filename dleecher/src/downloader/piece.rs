use sha1::{Digest, Sha1};

/// The fixed transfer unit: pieces are requested in 16 KiB chunks.
pub const CHUNK_SIZE: u32 = 16384;

/// Download state of one chunk of a piece.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChunkStatus {
    Empty,
    Downloading,
    Complete,
}

/// One piece of the torrent payload.
///
/// Chunk state and buffers exist only between `alloc()` and retirement;
/// an unallocated piece costs nothing but its header.
#[derive(Debug)]
pub struct Piece {
    pub index: u32,
    hash: [u8; 20],
    length: u32,
    chunk_map: Vec<ChunkStatus>,
    chunk_buf: Vec<Option<Vec<u8>>>,
    /// Number of chunks currently in `Downloading`.
    pub in_flight: usize,
}

impl Piece {
    pub fn new(index: u32, hash: [u8; 20], length: u32) -> Self {
        Self {
            index,
            hash,
            length,
            chunk_map: Vec::new(),
            chunk_buf: Vec::new(),
            in_flight: 0,
        }
    }

    /// Number of chunks of this piece; the last one may be short.
    pub fn chunk_count(&self) -> u32 {
        (self.length + CHUNK_SIZE - 1) / CHUNK_SIZE
    }

    /// Length in bytes of the given chunk.
    pub fn chunk_len(&self, chunk: u32) -> u32 {
        CHUNK_SIZE.min(self.length - chunk * CHUNK_SIZE)
    }

    pub fn length(&self) -> u32 {
        self.length
    }

    /// Prepares the piece for downloading: all chunks empty, no buffers.
    pub fn alloc(&mut self) {
        let count = self.chunk_count() as usize;
        self.chunk_map = vec![ChunkStatus::Empty; count];
        self.chunk_buf = vec![None; count];
        self.in_flight = 0;
    }

    /// Drops all chunk state; late frames for this piece fall out of range.
    pub fn clear(&mut self) {
        self.chunk_map = Vec::new();
        self.chunk_buf = Vec::new();
        self.in_flight = 0;
    }

    /// Starts the piece over after a failed hash check.
    pub fn reset(&mut self) {
        self.alloc();
    }

    pub fn is_allocated(&self) -> bool {
        !self.chunk_map.is_empty()
    }

    pub fn chunk_status(&self, chunk: u32) -> Option<ChunkStatus> {
        self.chunk_map.get(chunk as usize).copied()
    }

    /// Marks an empty chunk as being fetched.
    pub fn set_downloading(&mut self, chunk: u32) {
        if let Some(status) = self.chunk_map.get_mut(chunk as usize) {
            if *status == ChunkStatus::Empty {
                *status = ChunkStatus::Downloading;
                self.in_flight += 1;
            }
        }
    }

    /// Reverts a fetched chunk back to empty (timeout path).
    pub fn revert_chunk(&mut self, chunk: u32) {
        if let Some(status) = self.chunk_map.get_mut(chunk as usize) {
            if *status == ChunkStatus::Downloading {
                *status = ChunkStatus::Empty;
                self.in_flight -= 1;
            }
        }
    }

    /// Records a downloaded chunk. Out of range chunks are ignored.
    pub fn set_chunk(&mut self, chunk: u32, data: Vec<u8>) {
        let index = chunk as usize;
        if index >= self.chunk_map.len() {
            return;
        }
        if self.chunk_map[index] == ChunkStatus::Downloading {
            self.in_flight -= 1;
        }
        self.chunk_map[index] = ChunkStatus::Complete;
        self.chunk_buf[index] = Some(data);
    }

    /// Whether every chunk is complete.
    pub fn is_complete(&self) -> bool {
        !self.chunk_map.is_empty()
            && self
                .chunk_map
                .iter()
                .all(|status| *status == ChunkStatus::Complete)
    }

    /// Returns the assembled piece iff every chunk is complete and the
    /// concatenation hashes to the expected digest.
    pub fn verify_and_extract(&self) -> Option<Vec<u8>> {
        if !self.is_complete() {
            return None;
        }

        let mut data = Vec::with_capacity(self.length as usize);
        for chunk in &self.chunk_buf {
            data.extend_from_slice(chunk.as_deref().unwrap_or(&[]));
        }

        let digest: [u8; 20] = Sha1::digest(&data).into();
        if digest == self.hash {
            Some(data)
        } else {
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_chunk_count_rounds_up() {
        assert_eq!(build_piece(CHUNK_SIZE).chunk_count(), 1);
        assert_eq!(build_piece(CHUNK_SIZE + 1).chunk_count(), 2);
        assert_eq!(build_piece(3 * CHUNK_SIZE).chunk_count(), 3);
    }

    #[test]
    fn test_chunk_len_of_short_tail() {
        let piece = build_piece(CHUNK_SIZE + 100);

        assert_eq!(piece.chunk_len(0), CHUNK_SIZE);
        assert_eq!(piece.chunk_len(1), 100);
    }

    #[test]
    fn test_alloc_builds_empty_chunks() {
        let mut piece = build_piece(2 * CHUNK_SIZE);
        assert!(!piece.is_allocated());

        piece.alloc();

        assert!(piece.is_allocated());
        assert_eq!(piece.chunk_status(0), Some(ChunkStatus::Empty));
        assert_eq!(piece.chunk_status(1), Some(ChunkStatus::Empty));
        assert_eq!(piece.chunk_status(2), None);
        assert_eq!(piece.in_flight, 0);
    }

    #[test]
    fn test_downloading_and_revert_track_in_flight() {
        let mut piece = build_piece(2 * CHUNK_SIZE);
        piece.alloc();

        piece.set_downloading(0);
        piece.set_downloading(1);
        assert_eq!(piece.in_flight, 2);

        piece.revert_chunk(0);
        assert_eq!(piece.in_flight, 1);
        assert_eq!(piece.chunk_status(0), Some(ChunkStatus::Empty));
    }

    #[test]
    fn test_set_downloading_twice_counts_once() {
        let mut piece = build_piece(CHUNK_SIZE);
        piece.alloc();

        piece.set_downloading(0);
        piece.set_downloading(0);

        assert_eq!(piece.in_flight, 1);
    }

    #[test]
    fn test_verify_and_extract_good_piece() {
        let data = vec![7u8; CHUNK_SIZE as usize];
        let mut piece = Piece::new(0, Sha1::digest(&data).into(), CHUNK_SIZE);
        piece.alloc();
        piece.set_downloading(0);
        piece.set_chunk(0, data.clone());

        assert_eq!(piece.in_flight, 0);
        assert_eq!(piece.verify_and_extract(), Some(data));
    }

    #[test]
    fn test_verify_and_extract_wrong_bytes() {
        let data = vec![7u8; CHUNK_SIZE as usize];
        let mut piece = Piece::new(0, Sha1::digest(&data).into(), CHUNK_SIZE);
        piece.alloc();
        piece.set_chunk(0, vec![8u8; CHUNK_SIZE as usize]);

        assert!(piece.is_complete());
        assert_eq!(piece.verify_and_extract(), None);
    }

    #[test]
    fn test_verify_and_extract_incomplete_piece() {
        let mut piece = build_piece(2 * CHUNK_SIZE);
        piece.alloc();
        piece.set_chunk(0, vec![1u8; CHUNK_SIZE as usize]);

        assert_eq!(piece.verify_and_extract(), None);
    }

    #[test]
    fn test_short_last_chunk_assembles() {
        // A piece one byte short of the chunk size: single short chunk.
        let data = vec![3u8; (CHUNK_SIZE - 1) as usize];
        let mut piece = Piece::new(0, Sha1::digest(&data).into(), CHUNK_SIZE - 1);
        piece.alloc();

        assert_eq!(piece.chunk_count(), 1);
        assert_eq!(piece.chunk_len(0), CHUNK_SIZE - 1);

        piece.set_chunk(0, data.clone());
        assert_eq!(piece.verify_and_extract(), Some(data));
    }

    #[test]
    fn test_clear_forgets_chunks() {
        let mut piece = build_piece(CHUNK_SIZE);
        piece.alloc();
        piece.set_chunk(0, vec![1u8; CHUNK_SIZE as usize]);

        piece.clear();

        assert!(!piece.is_allocated());
        assert_eq!(piece.chunk_status(0), None);
    }

    #[test]
    fn test_set_chunk_out_of_range_is_ignored() {
        let mut piece = build_piece(CHUNK_SIZE);
        piece.alloc();

        piece.set_chunk(5, vec![1, 2, 3]);

        assert!(!piece.is_complete());
    }

    // Auxiliary functions

    fn build_piece(length: u32) -> Piece {
        Piece::new(0, [0xAA; 20], length)
    }
}
