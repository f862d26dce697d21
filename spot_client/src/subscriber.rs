use log::{debug, info, warn};
use reqwest::blocking::Client;
use reqwest::header::ACCEPT;
use spot_common::net::{DATA_PATH, STREAM_PATH, endpoint};
use spot_common::wire::{DataResponse, StreamEvent};
use spot_common::{FeedError, Quote, Result};
use std::io::{BufRead, BufReader};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::Duration;

/// Reads server-sent events from the feed and logs them.
pub struct StreamSubscriber {
    client: Client,
    server: String,
}

impl StreamSubscriber {
    /// Subscriber for the server at `server`. The client has no read timeout, the
    /// server's heartbeats keep the connection alive.
    pub fn new(server: &str) -> Result<Self> {
        let client = Client::builder()
            .timeout(None::<Duration>)
            .build()
            .map_err(|e| FeedError::ResourceCreation(e.to_string()))?;
        Ok(Self {
            client,
            server: server.to_string(),
        })
    }

    /// Fetch the current quote once.
    pub fn query(&self) -> Result<DataResponse> {
        let url = endpoint(&self.server, DATA_PATH);
        let response = self
            .client
            .get(&url)
            .timeout(Duration::from_secs(60))
            .send()
            .map_err(network_error)?;
        response.json().map_err(network_error)
    }

    /// Consume the stream until `shutdown` is set, reconnecting after `reconnect` when
    /// the connection drops.
    pub fn run(&self, shutdown: Arc<AtomicBool>, reconnect: Duration) {
        while !shutdown.load(Ordering::SeqCst) {
            match self.consume(&shutdown) {
                Ok(()) => info!("Stream closed by server"),
                Err(e) => warn!("Stream error: {}", e),
            }
            if !shutdown.load(Ordering::SeqCst) {
                thread::sleep(reconnect);
            }
        }
        info!("Subscriber stopping...");
    }

    fn consume(&self, shutdown: &AtomicBool) -> Result<()> {
        let url = endpoint(&self.server, STREAM_PATH);
        let response = self
            .client
            .get(&url)
            .header(ACCEPT, "text/event-stream")
            .send()
            .and_then(|r| r.error_for_status())
            .map_err(network_error)?;
        info!("Subscribed to {}", url);

        for line in BufReader::new(response).lines() {
            if shutdown.load(Ordering::SeqCst) {
                break;
            }
            match parse_line(&line?) {
                Some(Ok(StreamEvent::Data(quote))) => log_quote(&quote),
                Some(Ok(StreamEvent::Heartbeat { timestamp, .. })) => debug!("Heartbeat at {}", timestamp),
                Some(Err(e)) => warn!("Skipping undecodable event: {}", e),
                None => {}
            }
        }
        Ok(())
    }
}

/// Decode one SSE line. Only `data:` lines carry events.
pub fn parse_line(line: &str) -> Option<Result<StreamEvent>> {
    let payload = line.strip_prefix("data:")?.trim();
    Some(serde_json::from_str(payload).map_err(FeedError::from))
}

/// Log a received quote.
pub fn log_quote(quote: &Quote) {
    info!(
        "QUOTE: {} {} [{}] at {} via {}",
        quote.value,
        quote.rate_of_change(),
        quote.time_span,
        quote.timestamp(),
        quote.source
    );
}

fn network_error(e: reqwest::Error) -> FeedError {
    FeedError::TransientNetwork(e.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use spot_common::Source;

    #[test]
    fn data_line_decodes_to_quote() {
        let line = r#"data: {"value":"2,612.50","changeAbsolute":"+12.50","changePercent":"+0.48%","timeSpan":"3 Months","rateOfChange":"+12.50 (+0.48%)","capturedAt":"2025-06-01 12:00:00","source":"browser"}"#;
        match parse_line(line) {
            Some(Ok(StreamEvent::Data(quote))) => {
                assert_eq!(quote.value, "2,612.50");
                assert_eq!(quote.source, Source::Browser);
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn heartbeat_line_decodes() {
        let parsed = parse_line(r#"data:{"heartbeat":true,"timestamp":"2025-06-01 12:00:10"}"#);
        assert!(matches!(parsed, Some(Ok(StreamEvent::Heartbeat { heartbeat: true, .. }))));
    }

    #[test]
    fn non_data_lines_are_ignored() {
        assert!(parse_line("").is_none());
        assert!(parse_line(": keep-alive").is_none());
        assert!(matches!(parse_line("data: nonsense"), Some(Err(FeedError::SerdeJson(_)))));
    }
}
