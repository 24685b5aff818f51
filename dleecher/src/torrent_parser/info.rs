use bencoder::bencode::Bencode;

/// The `info` dictionary of a metainfo file.
///
/// Exactly one of `length` (single-file mode) and `files` (multi-file mode)
/// is present; the two modes are mutually exclusive in the metainfo format.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Info {
    pub name: String,
    pub piece_length: i64,
    pub pieces: Vec<u8>,
    pub length: Option<i64>,
    pub files: Option<Vec<FileInfo>>,
}

/// One entry of the `files` list in multi-file mode.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileInfo {
    /// Path components, in order, relative to the torrent directory.
    pub path: Vec<String>,
    pub length: i64,
}

/// Posible `Info` errors.
#[derive(Debug, PartialEq)]
pub enum FromInfoError {
    MissingName,
    MissingPieceLength,
    MissingPieces,
    InvalidPieces,
    InvalidLength,
    InvalidFiles,
    MissingFileModes,
    ConflictingFileModes,
    NotADict,
}

impl Info {
    pub fn from(bencode: &Bencode) -> Result<Info, FromInfoError> {
        let mut name = String::new();
        let mut piece_length = 0;
        let mut pieces = Vec::new();
        let mut length = None;
        let mut files = None;

        let d = match bencode {
            Bencode::BDict(d) => d,
            _ => return Err(FromInfoError::NotADict),
        };

        for (k, v) in d.iter() {
            if k == b"name" {
                name = Info::create_name(v)?;
            } else if k == b"length" {
                length = Some(Info::create_length(v)?);
            } else if k == b"piece length" {
                piece_length = Info::create_piece_length(v)?;
            } else if k == b"pieces" {
                pieces = Info::create_pieces(v)?;
            } else if k == b"files" {
                files = Some(Info::create_files(v)?);
            }
        }

        if name.is_empty() {
            return Err(FromInfoError::MissingName);
        }
        if piece_length <= 0 {
            return Err(FromInfoError::MissingPieceLength);
        }
        if pieces.is_empty() {
            return Err(FromInfoError::MissingPieces);
        }
        match (&length, &files) {
            (Some(_), Some(_)) => return Err(FromInfoError::ConflictingFileModes),
            (None, None) => return Err(FromInfoError::MissingFileModes),
            _ => (),
        }

        Ok(Info {
            name,
            piece_length,
            pieces,
            length,
            files,
        })
    }

    /// Total payload length in bytes, across both file modes.
    pub fn total_length(&self) -> i64 {
        match (&self.length, &self.files) {
            (Some(length), _) => *length,
            (_, Some(files)) => files.iter().map(|f| f.length).sum(),
            (None, None) => 0,
        }
    }

    fn create_name(bencode: &Bencode) -> Result<String, FromInfoError> {
        let name = match bencode {
            Bencode::BString(s) => s,
            _ => return Err(FromInfoError::MissingName),
        };

        String::from_utf8(name.to_vec()).map_err(|_| FromInfoError::MissingName)
    }

    fn create_length(bencode: &Bencode) -> Result<i64, FromInfoError> {
        match bencode {
            Bencode::BNumber(n) => Ok(*n),
            _ => Err(FromInfoError::InvalidLength),
        }
    }

    fn create_piece_length(bencode: &Bencode) -> Result<i64, FromInfoError> {
        match bencode {
            Bencode::BNumber(n) => Ok(*n),
            _ => Err(FromInfoError::MissingPieceLength),
        }
    }

    fn create_pieces(bencode: &Bencode) -> Result<Vec<u8>, FromInfoError> {
        let pieces = match bencode {
            Bencode::BString(s) => s.to_vec(),
            _ => return Err(FromInfoError::MissingPieces),
        };

        // One 20-byte sha1 digest per piece.
        if pieces.len() % 20 != 0 {
            return Err(FromInfoError::InvalidPieces);
        }

        Ok(pieces)
    }

    fn create_files(bencode: &Bencode) -> Result<Vec<FileInfo>, FromInfoError> {
        let list = match bencode {
            Bencode::BList(list) => list,
            _ => return Err(FromInfoError::InvalidFiles),
        };

        let mut files = Vec::new();
        for entry in list {
            files.push(Self::create_file_entry(entry)?);
        }
        Ok(files)
    }

    fn create_file_entry(bencode: &Bencode) -> Result<FileInfo, FromInfoError> {
        let d = match bencode {
            Bencode::BDict(d) => d,
            _ => return Err(FromInfoError::InvalidFiles),
        };

        let mut path = Vec::new();
        let mut length = None;

        for (k, v) in d.iter() {
            if k == b"path" {
                path = Self::create_file_path(v)?;
            } else if k == b"length" {
                length = Some(Self::create_length(v)?);
            }
        }

        if path.is_empty() {
            return Err(FromInfoError::InvalidFiles);
        }
        match length {
            Some(length) => Ok(FileInfo { path, length }),
            None => Err(FromInfoError::InvalidFiles),
        }
    }

    fn create_file_path(bencode: &Bencode) -> Result<Vec<String>, FromInfoError> {
        let list = match bencode {
            Bencode::BList(list) => list,
            _ => return Err(FromInfoError::InvalidFiles),
        };

        let mut components = Vec::new();
        for component in list {
            let component = match component {
                Bencode::BString(s) => {
                    String::from_utf8(s.to_vec()).map_err(|_| FromInfoError::InvalidFiles)?
                }
                _ => return Err(FromInfoError::InvalidFiles),
            };
            components.push(component);
        }
        Ok(components)
    }
}
