/// Percent-encodes a byte slice for use as a query value.
///
/// Every byte is emitted as `%xx`, which is always a valid encoding and is
/// what trackers expect for the binary `info_hash` and `peer_id` values.
pub fn encode(bytes: &[u8]) -> String {
    let mut encoded = String::with_capacity(bytes.len() * 3);
    for byte in bytes {
        encoded.push('%');
        encoded.push_str(&format!("{:02x}", byte));
    }
    encoded
}
