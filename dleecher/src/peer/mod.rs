pub mod handshake;
pub mod node;
pub mod peer_message;
pub mod peer_set;
