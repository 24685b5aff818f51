use tracing::{info, warn};

use super::http::http_handler::{HttpHandler, HttpHandlerError};
use super::http::query_params::QueryParams;
use super::http::url_parser::{TrackerUrl, TrackerUrlError};
use super::tracker_event::TrackerEvent;
use super::tracker_response::{FromTrackerResponseError, TrackerResponse};
use crate::torrent_parser::torrent::Torrent;

/// `TrackerHandler` struct for communicating to a bt tracker.
///
/// It knows every announce url of the torrent (`announce` plus the head of
/// each `announce-list` tier) and tries them in order until one answers.
#[derive(Debug)]
pub struct TrackerHandler {
    announce_urls: Vec<String>,
    info_hash: [u8; 20],
    peer_id: [u8; 20],
    client_port: u16,
}

/// Posible `TrackerHandler` errors.
#[derive(Debug)]
pub enum TrackerHandlerError {
    HttpHandlerError(HttpHandlerError),
    FromTrackerResponseError(FromTrackerResponseError),
    UrlParseError(TrackerUrlError),
    AllTrackersFailed,
}

impl TrackerHandler {
    /// Builds a new `TrackerHandler` for a torrent.
    pub fn new(torrent: &Torrent, client_port: u16, peer_id: [u8; 20]) -> Self {
        let mut announce_urls = vec![torrent.announce_url.clone()];
        for url in &torrent.announce_list {
            if !announce_urls.contains(url) {
                announce_urls.push(url.clone());
            }
        }

        Self {
            announce_urls,
            info_hash: torrent.info_hash,
            peer_id,
            client_port,
        }
    }

    /// Sends an announce request with the given event and transfer counters.
    ///
    /// Each known tracker url is tried in order; the first decoded response
    /// wins.
    ///
    /// It returns an `TrackerHandlerError` if every url failed; the error of
    /// the last attempt is kept, `AllTrackersFailed` if none could even be
    /// parsed.
    pub fn announce(
        &self,
        event: TrackerEvent,
        uploaded: u64,
        downloaded: u64,
        left: u64,
    ) -> Result<TrackerResponse, TrackerHandlerError> {
        let mut last_error = TrackerHandlerError::AllTrackersFailed;

        for url in &self.announce_urls {
            match self.announce_to(url, event, uploaded, downloaded, left) {
                Ok(response) => {
                    info!(
                        "Tracker {} answered: interval {}s (min {}s), {} peers",
                        url,
                        response.interval,
                        response.min_interval,
                        response.peers.len()
                    );
                    return Ok(response);
                }
                Err(err) => {
                    warn!("Tracker {} failed: {:?}", url, err);
                    last_error = err;
                }
            }
        }

        Err(last_error)
    }

    fn announce_to(
        &self,
        url: &str,
        event: TrackerEvent,
        uploaded: u64,
        downloaded: u64,
        left: u64,
    ) -> Result<TrackerResponse, TrackerHandlerError> {
        let tracker_url = TrackerUrl::parse(url).map_err(TrackerHandlerError::UrlParseError)?;

        let query_params = QueryParams::new(
            self.info_hash,
            self.peer_id,
            self.client_port,
            uploaded,
            downloaded,
            left,
            event,
        );

        let body = HttpHandler::new(tracker_url, query_params)
            .request()
            .map_err(TrackerHandlerError::HttpHandlerError)?;

        TrackerResponse::from(&body).map_err(TrackerHandlerError::FromTrackerResponseError)
    }
}
