use std::{fs, io::Error, path::Path};

use super::torrent::{FromTorrentError, Torrent};
use bencoder::bencode::{Bencode, BencodeError};

#[derive(Debug)]
pub enum ParseError {
    IoError(Error),
    BencodeError(BencodeError),
    FromTorrentError(FromTorrentError),
}

pub struct TorrentParser;

impl TorrentParser {
    /// Reads a metainfo file from disk and decodes it into a [`Torrent`].
    ///
    /// The whole file is slurped at once: metainfo files are small and the
    /// bencode decoder wants a contiguous slice anyway.
    pub fn parse(filepath: &Path) -> Result<Torrent, ParseError> {
        let buffer = fs::read(filepath).map_err(ParseError::IoError)?;

        let bencode = Bencode::decode(&buffer).map_err(ParseError::BencodeError)?;

        Torrent::from(bencode).map_err(ParseError::FromTorrentError)
    }
}
