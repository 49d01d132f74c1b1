//! Generative assistant collaborator (chat summaries and the like).
//!
//! Request in, response or fallback out: when the hosted service is not
//! configured or fails, a deterministic local stub answers instead.

use std::future::Future;
use std::time::Duration;

use serde::{Deserialize, Serialize};

#[derive(Debug, thiserror::Error)]
pub enum AssistError {
    #[error("assistant request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("assistant returned {status}: {body}")]
    Status { status: u16, body: String },
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GenerateRequest {
    pub prompt: String,
    /// Supporting lines, e.g. a chat transcript.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub context: Vec<String>,
}

impl GenerateRequest {
    pub fn new(prompt: impl Into<String>) -> Self {
        Self {
            prompt: prompt.into(),
            context: Vec::new(),
        }
    }

    pub fn with_context(mut self, context: Vec<String>) -> Self {
        self.context = context;
        self
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct GenerateResponse {
    pub text: String,
    /// True when the stub answered instead of the service.
    #[serde(default)]
    pub fallback: bool,
}

pub trait Generator {
    fn generate(
        &self,
        request: &GenerateRequest,
    ) -> impl Future<Output = Result<GenerateResponse, AssistError>> + Send;
}

/// JSON-over-HTTP generator: POSTs the request, expects `{"text": ...}`.
pub struct HttpGenerator {
    http: reqwest::Client,
    endpoint: String,
}

impl HttpGenerator {
    pub fn new(endpoint: impl Into<String>) -> Result<Self, AssistError> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(20))
            .build()?;
        Ok(Self {
            http,
            endpoint: endpoint.into(),
        })
    }
}

impl Generator for HttpGenerator {
    fn generate(
        &self,
        request: &GenerateRequest,
    ) -> impl Future<Output = Result<GenerateResponse, AssistError>> + Send {
        async move {
            tracing::debug!("Assistant request to {}", self.endpoint);
            let resp = self.http.post(&self.endpoint).json(request).send().await?;

            let status = resp.status();
            if !status.is_success() {
                let body = resp.text().await.unwrap_or_default();
                return Err(AssistError::Status {
                    status: status.as_u16(),
                    body,
                });
            }

            let mut response: GenerateResponse = resp.json().await?;
            response.fallback = false;
            Ok(response)
        }
    }
}

/// Deterministic local answer.
pub struct StubGenerator;

impl StubGenerator {
    pub fn answer(request: &GenerateRequest) -> GenerateResponse {
        let text = if request.context.is_empty() {
            format!("(offline) No context to work with for: {}", request.prompt)
        } else {
            let first = request.context.first().map(String::as_str).unwrap_or_default();
            let last = request.context.last().map(String::as_str).unwrap_or_default();
            format!(
                "(offline) {} lines. First: \"{}\". Last: \"{}\".",
                request.context.len(),
                first,
                last
            )
        };
        GenerateResponse {
            text,
            fallback: true,
        }
    }
}

impl Generator for StubGenerator {
    fn generate(
        &self,
        request: &GenerateRequest,
    ) -> impl Future<Output = Result<GenerateResponse, AssistError>> + Send {
        let response = Self::answer(request);
        async move { Ok(response) }
    }
}

/// Ask `primary` if there is one; any failure falls back to the stub.
pub async fn generate_or_fallback<G: Generator>(
    primary: Option<&G>,
    request: &GenerateRequest,
) -> GenerateResponse {
    if let Some(generator) = primary {
        match generator.generate(request).await {
            Ok(response) => return response,
            Err(e) => tracing::warn!("Assistant unavailable, using fallback: {}", e),
        }
    }
    StubGenerator::answer(request)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stub_is_deterministic() {
        let req = GenerateRequest::new("summarize")
            .with_context(vec!["a: hi".into(), "b: hello".into(), "a: bye".into()]);
        let one = StubGenerator::answer(&req);
        let two = StubGenerator::answer(&req);
        assert_eq!(one, two);
        assert!(one.fallback);
        assert!(one.text.contains("3 lines"));
        assert!(one.text.contains("a: bye"));
    }

    #[test]
    fn test_request_omits_empty_context() {
        let json = serde_json::to_value(GenerateRequest::new("p")).unwrap();
        assert_eq!(json, serde_json::json!({"prompt": "p"}));
    }

    #[tokio::test]
    async fn test_no_primary_uses_stub() {
        let req = GenerateRequest::new("hello");
        let resp = generate_or_fallback::<HttpGenerator>(None, &req).await;
        assert!(resp.fallback);
    }

    #[tokio::test]
    async fn test_unreachable_service_falls_back() {
        // Grab a free port and release it so nothing is listening there.
        let port = {
            let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
            listener.local_addr().unwrap().port()
        };
        let http = HttpGenerator::new(format!("http://127.0.0.1:{}/generate", port)).unwrap();
        let resp = generate_or_fallback(Some(&http), &GenerateRequest::new("hello")).await;
        assert!(resp.fallback);
        assert!(resp.text.contains("hello"));
    }
}
