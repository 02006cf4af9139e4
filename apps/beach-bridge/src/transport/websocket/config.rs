use url::Url;

use crate::transport::TransportError;

/// Configuration for the WebSocket link to the PTY host.
#[derive(Debug, Clone)]
pub struct WebSocketConfig {
    /// The WebSocket URL or bare host[:port]
    pub url: String,
    /// Optional path suffix (e.g., "/terminal")
    pub path: Option<String>,
    /// Whether to use TLS (wss:// vs ws://)
    pub use_tls: bool,
}

impl WebSocketConfig {
    pub fn new(url: impl Into<String>) -> Self {
        let url = url.into();
        let use_tls = url.starts_with("wss://")
            || url.starts_with("https://")
            || (!url.starts_with("ws://")
                && !url.starts_with("http://")
                && !url.contains("127.0.0.1")
                && !url.contains("localhost"));

        Self {
            url,
            path: None,
            use_tls,
        }
    }

    pub fn with_path(mut self, path: impl Into<String>) -> Self {
        self.path = Some(path.into());
        self
    }

    pub fn with_tls(mut self, use_tls: bool) -> Self {
        self.use_tls = use_tls;
        self
    }

    /// Build the full WebSocket URL
    pub fn build_url(&self) -> String {
        let mut url = self.url.trim().to_string();

        if let Some(rest) = url.strip_prefix("https://") {
            url = format!("wss://{rest}");
        } else if let Some(rest) = url.strip_prefix("http://") {
            url = format!("ws://{rest}");
        } else if !url.starts_with("ws://") && !url.starts_with("wss://") {
            url = if self.use_tls {
                format!("wss://{url}")
            } else {
                format!("ws://{url}")
            };
        }

        // Normalize localhost to avoid IPv6 issues
        if url.contains("localhost") {
            url = url.replace("localhost", "127.0.0.1");
        }

        if let Some(ref path) = self.path {
            if !url.ends_with('/') && !path.starts_with('/') {
                url.push('/');
            }
            url.push_str(path);
        }

        url
    }

    pub fn validate(&self) -> Result<Url, TransportError> {
        Url::parse(&self.build_url())
            .map_err(|err| TransportError::Connect(format!("invalid websocket url: {err}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bare_local_hosts_use_plain_websocket() {
        let config = WebSocketConfig::new("localhost:4100").with_path("terminal");
        assert!(!config.use_tls);
        assert_eq!(config.build_url(), "ws://127.0.0.1:4100/terminal");
    }

    #[test]
    fn public_hosts_default_to_tls() {
        let config = WebSocketConfig::new("pty.example.com");
        assert_eq!(config.build_url(), "wss://pty.example.com");
    }

    #[test]
    fn http_schemes_are_mapped() {
        assert_eq!(
            WebSocketConfig::new("https://pty.example.com/ws").build_url(),
            "wss://pty.example.com/ws"
        );
        assert_eq!(
            WebSocketConfig::new("http://10.0.0.2:9000").build_url(),
            "ws://10.0.0.2:9000"
        );
    }

    #[test]
    fn validate_rejects_garbage() {
        let config = WebSocketConfig::new("ws://").with_tls(false);
        assert!(config.validate().is_err());
    }
}
