use std::io::{self, Read, Write};
use std::net::TcpStream;

use native_tls::TlsConnector;

use super::query_params::QueryParams;
use super::url_parser::{ConnectionProtocol, TrackerUrl};

/// Something a GET can be exchanged over: plain TCP or a TLS session.
trait Transport: Read + Write {}

impl<T: Read + Write> Transport for T {}

/// What can go wrong talking to a tracker.
#[derive(Debug)]
pub enum HttpHandlerError {
    Connect(io::Error),
    TlsSetup(native_tls::Error),
    TlsHandshake(String),
    Exchange(io::Error),
}

/// Performs the announce GET against one tracker url.
///
/// The url scheme decides the transport; everything after `connect()` is
/// transport-agnostic.
#[derive(Debug)]
pub struct HttpHandler {
    tracker_url: TrackerUrl,
    query_params: QueryParams,
}

impl HttpHandler {
    pub fn new(tracker_url: TrackerUrl, query_params: QueryParams) -> Self {
        Self {
            tracker_url,
            query_params,
        }
    }

    /// Sends the announce request and returns the raw bencoded body.
    pub fn request(&self) -> Result<Vec<u8>, HttpHandlerError> {
        let mut stream = self.connect()?;
        self.exchange(stream.as_mut())
    }

    /// Opens the transport the url asks for. For https the TLS session is
    /// established against the url host.
    fn connect(&self) -> Result<Box<dyn Transport>, HttpHandlerError> {
        let host = self.tracker_url.host.as_str();
        let tcp = TcpStream::connect((host, self.tracker_url.port))
            .map_err(HttpHandlerError::Connect)?;

        match self.tracker_url.protocol {
            ConnectionProtocol::Http => Ok(Box::new(tcp)),
            ConnectionProtocol::Https => {
                let connector = TlsConnector::new().map_err(HttpHandlerError::TlsSetup)?;
                let tls = connector
                    .connect(host, tcp)
                    .map_err(|err| HttpHandlerError::TlsHandshake(err.to_string()))?;
                Ok(Box::new(tls))
            }
        }
    }

    /// Writes the GET, reads until the tracker hangs up, strips the
    /// headers off the response.
    fn exchange(&self, stream: &mut dyn Transport) -> Result<Vec<u8>, HttpHandlerError> {
        let request = HttpRequest::get(format!(
            "/{}{}",
            self.tracker_url.endpoint,
            self.query_params.build()
        ))
        .header("Host", &self.tracker_url.host)
        .header("User-Agent", "dleecher/0.1")
        .header("Connection", "close");

        stream
            .write_all(&request.render())
            .map_err(HttpHandlerError::Exchange)?;

        let mut response = Vec::new();
        stream
            .read_to_end(&mut response)
            .map_err(HttpHandlerError::Exchange)?;

        Ok(strip_headers(response))
    }
}

/// A minimal HTTP/1.1 GET, rendered in one piece.
struct HttpRequest {
    target: String,
    headers: Vec<(String, String)>,
}

impl HttpRequest {
    fn get(target: String) -> Self {
        Self {
            target,
            headers: Vec::new(),
        }
    }

    fn header(mut self, name: &str, value: &str) -> Self {
        self.headers.push((name.to_string(), value.to_string()));
        self
    }

    fn render(&self) -> Vec<u8> {
        let mut out = format!("GET {} HTTP/1.1\r\n", self.target).into_bytes();
        for (name, value) in &self.headers {
            out.extend(format!("{}: {}\r\n", name, value).into_bytes());
        }
        out.extend_from_slice(b"\r\n");
        out
    }
}

/// Keeps the bytes after the first blank line; a response without one is
/// returned whole.
fn strip_headers(response: Vec<u8>) -> Vec<u8> {
    match response.windows(4).position(|window| window == b"\r\n\r\n") {
        Some(at) => response[at + 4..].to_vec(),
        None => response,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tracker::tracker_event::TrackerEvent;

    /// Hands out a canned response and records everything written to it.
    struct ScriptedStream {
        written: Vec<u8>,
        response: io::Cursor<Vec<u8>>,
    }

    impl Write for ScriptedStream {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.written.extend_from_slice(buf);
            Ok(buf.len())
        }
        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    impl Read for ScriptedStream {
        fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
            self.response.read(buf)
        }
    }

    #[test]
    fn get_line_carries_endpoint_and_query() {
        let handler = build_handler();
        let mut stream = build_stream(b"HTTP/1.1 200 OK\r\n\r\nd8:intervali1800ee");

        handler.exchange(&mut stream).unwrap();

        let request = String::from_utf8(stream.written).unwrap();
        assert!(request.starts_with("GET /announce?info_hash=%11%11"));
        assert!(request.contains("Host: tracker.example.org\r\n"));
        assert!(request.contains("User-Agent: dleecher/0.1\r\n"));
        assert!(request.ends_with("\r\n\r\n"));
    }

    #[test]
    fn body_follows_the_blank_line() {
        let handler = build_handler();
        let mut stream =
            build_stream(b"HTTP/1.1 200 OK\r\nContent-Type: text/plain\r\n\r\nd8:intervali1800ee");

        let body = handler.exchange(&mut stream).unwrap();

        assert_eq!(body, b"d8:intervali1800ee");
    }

    #[test]
    fn headerless_response_is_kept_whole() {
        assert_eq!(strip_headers(b"d0:e".to_vec()), b"d0:e");
    }

    #[test]
    fn render_places_headers_between_get_line_and_blank_line() {
        let rendered = HttpRequest::get("/ann?x=1".to_string())
            .header("Host", "h")
            .render();

        assert_eq!(rendered, b"GET /ann?x=1 HTTP/1.1\r\nHost: h\r\n\r\n");
    }

    // Auxiliary functions

    fn build_handler() -> HttpHandler {
        HttpHandler::new(
            TrackerUrl::parse("http://tracker.example.org/announce").unwrap(),
            QueryParams::new(
                [0x11; 20],
                [b'p'; 20],
                6881,
                0,
                0,
                100,
                TrackerEvent::Started,
            ),
        )
    }

    fn build_stream(response: &[u8]) -> ScriptedStream {
        ScriptedStream {
            written: Vec::new(),
            response: io::Cursor::new(response.to_vec()),
        }
    }
}
