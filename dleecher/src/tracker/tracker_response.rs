use bencoder::bencode::{Bencode, BencodeError};

/// One peer address out of a tracker response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrackerPeer {
    pub peer_id: Option<Vec<u8>>,
    pub ip: String,
    pub port: u16,
}

/// `TrackerResponse` struct containing a tracker response.
///
/// To create a new `TrackerResponse` use the method builder `from()`.
#[derive(Debug)]
pub struct TrackerResponse {
    pub interval: i64,
    pub min_interval: i64,
    pub peers: Vec<TrackerPeer>,
}

/// Posible `TrackerResponse` errors.
#[derive(Debug, PartialEq)]
pub enum FromTrackerResponseError {
    DecodeResponseError(BencodeError),
    InvalidInterval,
    InvalidMinInterval,
    InvalidPeers,
    NotADict,
}

impl TrackerResponse {
    /// Builds a new `TrackerResponse` decoding a bencoded response body.
    ///
    /// The `peers` value is accepted in both forms the protocol allows:
    /// a compact byte string of 6-byte records (4-byte big-endian IPv4 +
    /// 2-byte big-endian port) or a list of dictionaries.
    ///
    /// It returns an `FromTrackerResponseError` if:
    /// - There was a problem decoding the response body.
    /// - The bencoded response is not a dict.
    /// - The interval, min interval or peers values have the wrong type.
    pub fn from(response: &[u8]) -> Result<TrackerResponse, FromTrackerResponseError> {
        let mut interval = 0;
        let mut min_interval = 0;
        let mut peers = Vec::new();

        let decoded =
            Bencode::decode(response).map_err(FromTrackerResponseError::DecodeResponseError)?;

        let d = match decoded {
            Bencode::BDict(d) => d,
            _ => return Err(FromTrackerResponseError::NotADict),
        };

        for (k, v) in d.iter() {
            if k == b"interval" {
                interval = Self::create_interval(v)?;
            } else if k == b"min interval" {
                min_interval = Self::create_min_interval(v)?;
            } else if k == b"peers" {
                peers = Self::create_peers(v)?;
            }
        }

        Ok(TrackerResponse {
            interval,
            min_interval,
            peers,
        })
    }

    fn create_interval(bencode: &Bencode) -> Result<i64, FromTrackerResponseError> {
        match bencode {
            Bencode::BNumber(n) => Ok(*n),
            _ => Err(FromTrackerResponseError::InvalidInterval),
        }
    }

    fn create_min_interval(bencode: &Bencode) -> Result<i64, FromTrackerResponseError> {
        match bencode {
            Bencode::BNumber(n) => Ok(*n),
            _ => Err(FromTrackerResponseError::InvalidMinInterval),
        }
    }

    fn create_peers(bencode: &Bencode) -> Result<Vec<TrackerPeer>, FromTrackerResponseError> {
        match bencode {
            Bencode::BString(compact) => Self::create_peers_from_compact(compact),
            Bencode::BList(list) => Self::create_peers_from_dicts(list),
            _ => Err(FromTrackerResponseError::InvalidPeers),
        }
    }

    fn create_peers_from_compact(
        compact: &[u8],
    ) -> Result<Vec<TrackerPeer>, FromTrackerResponseError> {
        if compact.len() % 6 != 0 {
            return Err(FromTrackerResponseError::InvalidPeers);
        }

        Ok(compact
            .chunks_exact(6)
            .map(|record| TrackerPeer {
                peer_id: None,
                ip: format!("{}.{}.{}.{}", record[0], record[1], record[2], record[3]),
                port: u16::from_be_bytes([record[4], record[5]]),
            })
            .collect())
    }

    fn create_peers_from_dicts(
        list: &[Bencode],
    ) -> Result<Vec<TrackerPeer>, FromTrackerResponseError> {
        let mut peers = Vec::new();

        for entry in list {
            let d = match entry {
                Bencode::BDict(d) => d,
                _ => return Err(FromTrackerResponseError::InvalidPeers),
            };

            let mut peer_id = None;
            let mut ip = String::new();
            let mut port = 0u16;

            for (k, v) in d.iter() {
                if k == b"peer id" {
                    if let Bencode::BString(s) = v {
                        peer_id = Some(s.clone());
                    }
                } else if k == b"ip" {
                    match v {
                        Bencode::BString(s) => {
                            ip = String::from_utf8(s.to_vec())
                                .map_err(|_| FromTrackerResponseError::InvalidPeers)?;
                        }
                        _ => return Err(FromTrackerResponseError::InvalidPeers),
                    }
                } else if k == b"port" {
                    match v {
                        Bencode::BNumber(n) => port = *n as u16,
                        _ => return Err(FromTrackerResponseError::InvalidPeers),
                    }
                }
            }

            if ip.is_empty() {
                return Err(FromTrackerResponseError::InvalidPeers);
            }
            peers.push(TrackerPeer { peer_id, ip, port });
        }

        Ok(peers)
    }
}
