use chrono::Utc;
use sha1::{Digest, Sha1};

/// 8-byte client identifier opening every peer id.
pub const CLIENT_ID_PREFIX: &[u8; 8] = b"-dl0100-";

/// Generates the 20-byte peer id: the client identifier followed by the
/// first 12 bytes of sha1(pid ∥ current time).
pub fn gen_peer_id() -> [u8; 20] {
    let unique = format!("{}{}", std::process::id(), Utc::now().timestamp_micros());
    let digest = Sha1::digest(unique.as_bytes());

    let mut peer_id = [0u8; 20];
    peer_id[..8].copy_from_slice(CLIENT_ID_PREFIX);
    peer_id[8..].copy_from_slice(&digest[..12]);
    peer_id
}
