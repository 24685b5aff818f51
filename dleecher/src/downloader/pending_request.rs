use std::net::SocketAddr;
use std::time::{Duration, Instant};

/// One outstanding chunk request.
///
/// Holds stable indices, never references: a closed node just makes the
/// lookups miss.
#[derive(Debug, Clone, PartialEq)]
pub struct PendingRequest {
    pub node: SocketAddr,
    pub piece: u32,
    pub chunk: u32,
    pub created: Instant,
}

impl PendingRequest {
    pub fn new(node: SocketAddr, piece: u32, chunk: u32) -> Self {
        Self {
            node,
            piece,
            chunk,
            created: Instant::now(),
        }
    }

    pub fn is_expired(&self, timeout: Duration) -> bool {
        self.created.elapsed() >= timeout
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fresh_request_is_not_expired() {
        let request = PendingRequest::new("127.0.0.1:6881".parse().unwrap(), 0, 0);

        assert!(!request.is_expired(Duration::from_secs(60)));
    }

    #[test]
    fn test_backdated_request_expires() {
        let mut request = PendingRequest::new("127.0.0.1:6881".parse().unwrap(), 0, 0);
        request.created = Instant::now() - Duration::from_secs(61);

        assert!(request.is_expired(Duration::from_secs(60)));
    }
}
