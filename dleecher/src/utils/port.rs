use std::net::TcpListener;

pub const PORT_RANGE_START: u16 = 6881;
pub const PORT_RANGE_END: u16 = 6889;

/// Posible port probing errors.
#[derive(Debug, PartialEq)]
pub enum PortError {
    NoPortAvailable,
}

/// Returns the first free BitTorrent port, probing by binding it.
pub fn probe_listen_port() -> Result<u16, PortError> {
    probe_port_in(PORT_RANGE_START, PORT_RANGE_END)
}

fn probe_port_in(start: u16, end: u16) -> Result<u16, PortError> {
    for port in start..=end {
        if TcpListener::bind(("127.0.0.1", port)).is_ok() {
            return Ok(port);
        }
    }
    Err(PortError::NoPortAvailable)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_a_busy_port_is_skipped() {
        // Hold an ephemeral port and probe exactly that one.
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();

        assert_eq!(
            probe_port_in(port, port),
            Err(PortError::NoPortAvailable)
        );
    }

    #[test]
    fn test_a_free_port_is_found() {
        // Find a free ephemeral port, release it, then probe it.
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        assert_eq!(probe_port_in(port, port), Ok(port));
    }
}
