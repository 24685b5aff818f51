use url_encoder::url_encoder::encode;

use crate::tracker::tracker_event::TrackerEvent;

/// `QueryParams` struct containing the announce query parameters.
///
/// To build the query string use the method `build()`.
#[derive(Debug)]
pub struct QueryParams {
    info_hash: [u8; 20],
    peer_id: [u8; 20],
    client_port: u16,
    uploaded: u64,
    downloaded: u64,
    left: u64,
    event: TrackerEvent,
}

impl QueryParams {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        info_hash: [u8; 20],
        peer_id: [u8; 20],
        client_port: u16,
        uploaded: u64,
        downloaded: u64,
        left: u64,
        event: TrackerEvent,
    ) -> QueryParams {
        QueryParams {
            info_hash,
            peer_id,
            client_port,
            uploaded,
            downloaded,
            left,
            event,
        }
    }

    /// Builds the query string, percent-encoding the binary values.
    ///
    /// An `Empty` event emits no `event` parameter at all.
    pub fn build(&self) -> String {
        let mut query = format!(
            "?info_hash={}&peer_id={}&port={}&uploaded={}&downloaded={}&left={}&compact=1",
            encode(&self.info_hash),
            encode(&self.peer_id),
            self.client_port,
            self.uploaded,
            self.downloaded,
            self.left
        );
        if self.event != TrackerEvent::Empty {
            query.push_str("&event=");
            query.push_str(self.event.as_str());
        }
        query
    }
}
