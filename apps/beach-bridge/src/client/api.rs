//! Shared plumbing for the HTTP services the bridge talks to (directive
//! resolvers, AI-team status and broadcast).

use reqwest::StatusCode;
use std::net::IpAddr;
use std::time::Duration;
use thiserror::Error;
use url::Url;

#[derive(Error, Debug)]
pub enum ApiError {
    #[error("invalid api configuration: {0}")]
    InvalidConfig(String),
    #[error("network error: {0}")]
    Network(#[from] reqwest::Error),
    #[error("unexpected http status {status}: {body}")]
    HttpStatus { status: StatusCode, body: String },
    #[error("invalid response: {0}")]
    InvalidResponse(String),
}

#[derive(Clone, Debug)]
pub struct ApiConfig {
    base_url: Url,
    bearer_token: Option<String>,
}

impl ApiConfig {
    /// Bare hosts get `http://` when local and `https://` otherwise.
    pub fn new(base: impl AsRef<str>) -> Result<Self, ApiError> {
        let mut base = base.as_ref().trim().to_string();
        if base.is_empty() {
            return Err(ApiError::InvalidConfig("api base url cannot be empty".into()));
        }
        if !base.contains("://") {
            base = format!("{}{base}", infer_scheme(&base));
        }
        if !base.ends_with('/') {
            base.push('/');
        }
        let base_url = Url::parse(&base)
            .map_err(|err| ApiError::InvalidConfig(format!("invalid api url: {err}")))?;
        Ok(Self {
            base_url,
            bearer_token: None,
        })
    }

    pub fn with_bearer_token(mut self, token: Option<String>) -> Self {
        self.bearer_token = token;
        self
    }

    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    pub fn bearer_token(&self) -> Option<&str> {
        self.bearer_token.as_deref()
    }

    pub fn endpoint(&self, path: &str) -> Result<Url, ApiError> {
        self.base_url
            .join(path.trim_start_matches('/'))
            .map_err(|err| ApiError::InvalidConfig(format!("invalid endpoint {path}: {err}")))
    }

    pub fn client(&self) -> Result<reqwest::Client, ApiError> {
        Ok(reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(3))
            .timeout(Duration::from_secs(30))
            .build()?)
    }

    pub fn authorize(&self, builder: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match self.bearer_token() {
            Some(token) => builder.bearer_auth(token),
            None => builder,
        }
    }
}

/// Turn a non-success response into [`ApiError::HttpStatus`], keeping the
/// body for the inline error block.
pub async fn check_status(response: reqwest::Response) -> Result<reqwest::Response, ApiError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    Err(ApiError::HttpStatus {
        status,
        body: body.trim().to_string(),
    })
}

fn infer_scheme(base: &str) -> &'static str {
    let authority = base.split('/').next().unwrap_or(base);
    let host = match authority.strip_prefix('[') {
        Some(bracketed) => bracketed.split(']').next().unwrap_or(bracketed),
        None => authority.split(':').next().unwrap_or(authority),
    };
    if host.eq_ignore_ascii_case("localhost") {
        return "http://";
    }
    match host.parse::<IpAddr>() {
        Ok(IpAddr::V4(ip)) if ip.is_loopback() || ip.is_private() || ip.is_unspecified() => {
            "http://"
        }
        Ok(IpAddr::V6(ip)) if ip.is_loopback() => "http://",
        _ => "https://",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scheme_follows_host_locality() {
        assert_eq!(infer_scheme("api.example.dev"), "https://");
        assert_eq!(infer_scheme("13.215.162.4/x"), "https://");
        for host in ["localhost:3000", "127.0.0.1", "10.0.0.5", "172.20.1.1", "192.168.1.2", "[::1]:80"] {
            assert_eq!(infer_scheme(host), "http://", "{host}");
        }
    }

    #[test]
    fn endpoints_join_under_the_base_path() {
        let config = ApiConfig::new("localhost:3000/api").unwrap();
        assert_eq!(
            config.endpoint("/status/team-1").unwrap().as_str(),
            "http://localhost:3000/api/status/team-1"
        );
        assert!(ApiConfig::new("  ").is_err());
    }
}
