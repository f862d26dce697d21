//! Shared networking constants and helpers used by server and client.

/// Default HTTP port the feed server listens on.
pub const DEFAULT_PORT: u16 = 5003;
/// On-demand query endpoint.
pub const DATA_PATH: &str = "/data";
/// Server-sent events endpoint.
pub const STREAM_PATH: &str = "/stream";
/// Durable log download endpoint.
pub const EXPORT_PATH: &str = "/download";
/// Liveness endpoint.
pub const HEALTH_PATH: &str = "/health";

/// Join a base URL such as `http://127.0.0.1:5003/` with an endpoint path.
pub fn endpoint(base: &str, path: &str) -> String {
    format!("{}{}", base.trim_end_matches('/'), path)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn endpoint_joins_without_double_slash() {
        assert_eq!(endpoint("http://localhost:5003/", DATA_PATH), "http://localhost:5003/data");
        assert_eq!(endpoint("http://localhost:5003", STREAM_PATH), "http://localhost:5003/stream");
    }
}
