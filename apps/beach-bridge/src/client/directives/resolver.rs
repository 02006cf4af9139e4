use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use crate::client::api::{ApiConfig, ApiError, check_status};
use crate::protocol::ThinkingAnnotation;

#[derive(Error, Debug)]
pub enum DirectiveError {
    #[error("no service is configured to answer /{0}")]
    Unavailable(String),
    #[error(transparent)]
    Api(#[from] ApiError),
}

impl DirectiveError {
    /// Short hint shown under the inline error block.
    pub fn suggestion(&self) -> Option<&'static str> {
        match self {
            DirectiveError::Unavailable(_) => {
                Some("start the bridge with --api-url or set BEACH_BRIDGE_API_URL")
            }
            DirectiveError::Api(ApiError::Network(_)) => {
                Some("check that the directive service is reachable")
            }
            DirectiveError::Api(_) => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DirectiveRequest {
    pub name: String,
    pub args: Vec<String>,
    pub session_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub thinking: Option<ThinkingAnnotation>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum DirectiveOutput {
    Text(String),
    Structured(Value),
}

#[derive(Deserialize)]
struct TextReply {
    text: String,
}

impl DirectiveOutput {
    /// `{"text": "..."}` is a ready block; any other JSON is structured.
    pub fn from_body(body: &str) -> Self {
        match serde_json::from_str::<Value>(body) {
            Ok(value) => match serde_json::from_value::<TextReply>(value.clone()) {
                Ok(reply) => DirectiveOutput::Text(reply.text),
                Err(_) => DirectiveOutput::Structured(value),
            },
            Err(_) => DirectiveOutput::Text(body.to_string()),
        }
    }
}

/// Answers service-backed directives such as `/cost` or `/agent`.
#[async_trait]
pub trait DirectiveResolver: Send + Sync {
    async fn resolve(&self, request: DirectiveRequest) -> Result<DirectiveOutput, DirectiveError>;

    fn describe(&self) -> String;
}

/// Used when no directive service is configured.
#[derive(Debug, Default, Clone, Copy)]
pub struct UnavailableResolver;

#[async_trait]
impl DirectiveResolver for UnavailableResolver {
    async fn resolve(&self, request: DirectiveRequest) -> Result<DirectiveOutput, DirectiveError> {
        Err(DirectiveError::Unavailable(request.name))
    }

    fn describe(&self) -> String {
        "unavailable".to_string()
    }
}

/// `POST {api}/directives/{name}` with the request as JSON.
pub struct HttpDirectiveResolver {
    config: ApiConfig,
    client: reqwest::Client,
}

impl HttpDirectiveResolver {
    pub fn new(config: ApiConfig) -> Result<Self, ApiError> {
        let client = config.client()?;
        Ok(Self { config, client })
    }
}

#[async_trait]
impl DirectiveResolver for HttpDirectiveResolver {
    async fn resolve(&self, request: DirectiveRequest) -> Result<DirectiveOutput, DirectiveError> {
        let endpoint = self
            .config
            .endpoint(&format!("directives/{}", request.name))?;
        let response = self
            .config
            .authorize(self.client.post(endpoint))
            .json(&request)
            .send()
            .await
            .map_err(ApiError::from)?;
        let response = check_status(response).await?;
        let body = response.text().await.map_err(ApiError::from)?;
        Ok(DirectiveOutput::from_body(&body))
    }

    fn describe(&self) -> String {
        self.config.base_url().to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn reply_bodies_map_to_outputs() {
        assert_eq!(
            DirectiveOutput::from_body(r#"{"text":"done"}"#),
            DirectiveOutput::Text("done".into())
        );
        assert_eq!(
            DirectiveOutput::from_body(r#"{"tokens":120,"usd":0.4}"#),
            DirectiveOutput::Structured(json!({"tokens": 120, "usd": 0.4}))
        );
        assert_eq!(
            DirectiveOutput::from_body("plain words"),
            DirectiveOutput::Text("plain words".into())
        );
    }

    #[test]
    fn request_serializes_camel_case_without_empty_thinking() {
        let request = DirectiveRequest {
            name: "repo".into(),
            args: vec!["where".into()],
            session_id: "s-1".into(),
            thinking: None,
        };
        assert_eq!(
            serde_json::to_value(&request).unwrap(),
            json!({"name": "repo", "args": ["where"], "sessionId": "s-1"})
        );
    }

    #[test_timeout::tokio_timeout_test]
    async fn unavailable_resolver_reports_failure() {
        let err = UnavailableResolver
            .resolve(DirectiveRequest {
                name: "cost".into(),
                args: Vec::new(),
                session_id: "s".into(),
                thinking: None,
            })
            .await
            .unwrap_err();
        assert!(matches!(err, DirectiveError::Unavailable(ref name) if name == "cost"));
        assert!(err.suggestion().is_some());
    }
}
