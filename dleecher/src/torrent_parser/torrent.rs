use std::path::PathBuf;

use sha1::{Digest, Sha1};

use bencoder::bencode::Bencode;

use super::info::{FromInfoError, Info};

/// A parsed metainfo file.
///
/// The info-hash is computed over the re-encoded raw `info` value, not over
/// the typed [`Info`] struct, so metainfo keys the struct does not model
/// cannot change the hash.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Torrent {
    pub announce_url: String,
    pub announce_list: Vec<String>,
    pub info: Info,
    pub info_hash: [u8; 20],
}

/// Posible `Torrent` errors.
#[derive(Debug, PartialEq)]
pub enum FromTorrentError {
    MissingAnnounce,
    MissingInfo,
    FromInfoError(FromInfoError),
    NotADict,
}

impl Torrent {
    pub fn from(bencode: Bencode) -> Result<Torrent, FromTorrentError> {
        let mut announce_url = String::new();
        let mut announce_list = Vec::new();
        let mut raw_info: Option<&Bencode> = None;

        let d = match &bencode {
            Bencode::BDict(d) => d,
            _ => return Err(FromTorrentError::NotADict),
        };

        for (k, v) in d.iter() {
            if k == b"announce" {
                announce_url = Torrent::create_announce(v)?;
            } else if k == b"announce-list" {
                announce_list = Torrent::create_announce_list(v);
            } else if k == b"info" {
                raw_info = Some(v);
            }
        }

        if announce_url.is_empty() {
            return Err(FromTorrentError::MissingAnnounce);
        }

        let raw_info = match raw_info {
            Some(raw_info) => raw_info,
            None => return Err(FromTorrentError::MissingInfo),
        };

        let info = Info::from(raw_info).map_err(FromTorrentError::FromInfoError)?;
        let info_hash = Torrent::create_info_hash(raw_info);

        Ok(Torrent {
            announce_url,
            announce_list,
            info,
            info_hash,
        })
    }

    fn create_announce(bencode: &Bencode) -> Result<String, FromTorrentError> {
        let announce_url = match bencode {
            Bencode::BString(s) => s,
            _ => return Err(FromTorrentError::MissingAnnounce),
        };

        String::from_utf8(announce_url.to_vec()).map_err(|_| FromTorrentError::MissingAnnounce)
    }

    /// Collects the first url of each announce-list tier; malformed tiers
    /// are skipped.
    fn create_announce_list(bencode: &Bencode) -> Vec<String> {
        let tiers = match bencode {
            Bencode::BList(tiers) => tiers,
            _ => return Vec::new(),
        };

        let mut urls = Vec::new();
        for tier in tiers {
            if let Bencode::BList(tier) = tier {
                if let Some(Bencode::BString(url)) = tier.first() {
                    if let Ok(url) = String::from_utf8(url.to_vec()) {
                        urls.push(url);
                    }
                }
            }
        }
        urls
    }

    fn create_info_hash(raw_info: &Bencode) -> [u8; 20] {
        let bencoded_info = Bencode::encode(raw_info);
        Sha1::digest(&bencoded_info).into()
    }

    /// Returns the name of the torrent.
    pub fn name(&self) -> String {
        self.info.name.clone()
    }

    /// Returns the size of pieces of the torrent.
    pub fn piece_length(&self) -> u32 {
        self.info.piece_length as u32
    }

    /// Returns the length in bytes of the torrent.
    pub fn length(&self) -> u64 {
        self.info.total_length() as u64
    }

    /// Returns the number of pieces of the torrent.
    pub fn total_pieces(&self) -> u32 {
        (self.info.pieces.len() / 20) as u32
    }

    /// Returns the expected sha1 digest of the piece with the given index.
    pub fn piece_hash(&self, index: u32) -> [u8; 20] {
        let start = index as usize * 20;
        let mut hash = [0u8; 20];
        hash.copy_from_slice(&self.info.pieces[start..start + 20]);
        hash
    }

    /// Returns the length in bytes of the piece with the given index.
    ///
    /// Every piece is `piece length` bytes except posibly the last one.
    pub fn piece_len(&self, index: u32) -> u32 {
        let remainder = self.length() % self.piece_length() as u64;
        if index == self.total_pieces() - 1 && remainder != 0 {
            remainder as u32
        } else {
            self.piece_length()
        }
    }

    /// Returns the ordered on-disk file map rooted at `download_dir`:
    /// one `(path, length)` entry per payload file.
    ///
    /// Single-file mode yields `download_dir/name`; multi-file mode yields
    /// `download_dir/name/<components...>` per entry, joined with the OS
    /// path separator.
    pub fn file_map(&self, download_dir: &str) -> Vec<(PathBuf, u64)> {
        match &self.info.files {
            Some(files) => files
                .iter()
                .map(|file| {
                    let mut path = PathBuf::from(download_dir);
                    path.push(&self.info.name);
                    for component in &file.path {
                        path.push(component);
                    }
                    (path, file.length as u64)
                })
                .collect(),
            None => {
                let mut path = PathBuf::from(download_dir);
                path.push(&self.info.name);
                vec![(path, self.info.total_length() as u64)]
            }
        }
    }
}
