use crate::config::LlmConfig;
use crate::error::{IsRetryable, LlmError, TabulaError};
use crate::types::chat::{ChatCompletionRequest, ChatCompletionResponse, ChatMessage, ToolSpec};
use backon::{ExponentialBuilder, Retryable};
use std::time::Duration;
use tracing::{debug, error, warn};
use url::Url;

pub fn default_retry_policy() -> ExponentialBuilder {
    ExponentialBuilder::default()
        .with_min_delay(Duration::from_secs(1))
        .with_max_delay(Duration::from_secs(3))
        .with_max_times(3)
        .with_jitter()
}

/// Build the HTTP client used for chat completions.
pub fn build_http_client(cfg: &LlmConfig) -> Result<reqwest::Client, TabulaError> {
    let mut builder = reqwest::Client::builder()
        .user_agent(concat!("tabula/", env!("CARGO_PKG_VERSION")))
        .connect_timeout(Duration::from_secs(5))
        .timeout(Duration::from_secs(cfg.timeout_secs));
    if let Some(proxy_url) = cfg.proxy.as_ref() {
        builder = builder.proxy(reqwest::Proxy::all(proxy_url.as_str())?);
    }
    Ok(builder.build()?)
}

/// Stateless client for an OpenAI-compatible `chat/completions` endpoint.
#[derive(Clone)]
pub struct ChatApi {
    client: reqwest::Client,
    url: Url,
    api_key: String,
    retry_policy: ExponentialBuilder,
}

impl ChatApi {
    pub fn new(client: reqwest::Client, url: Url, api_key: impl Into<String>) -> Self {
        Self {
            client,
            url,
            api_key: api_key.into(),
            retry_policy: default_retry_policy(),
        }
    }

    pub fn with_retry_policy(mut self, retry_policy: ExponentialBuilder) -> Self {
        self.retry_policy = retry_policy;
        self
    }

    /// POST the request, retrying transient failures, and parse the completion.
    pub async fn complete(
        &self,
        model: &str,
        temperature: f32,
        messages: &[ChatMessage],
        tools: &[ToolSpec],
    ) -> Result<ChatCompletionResponse, TabulaError> {
        let body = ChatCompletionRequest {
            model,
            messages,
            temperature,
            tools,
            tool_choice: (!tools.is_empty()).then_some("auto"),
        };

        (|| async { self.try_post(&body).await })
            .retry(self.retry_policy.clone())
            .when(|e: &TabulaError| e.is_retryable())
            .notify(|err, dur: Duration| {
                warn!("chat completion retrying after error {}, sleeping {:?}", err, dur);
            })
            .await
    }

    async fn try_post(
        &self,
        body: &ChatCompletionRequest<'_>,
    ) -> Result<ChatCompletionResponse, TabulaError> {
        let resp = self
            .client
            .post(self.url.clone())
            .bearer_auth(&self.api_key)
            .json(body)
            .send()
            .await?;

        let status = resp.status();
        if !status.is_success() {
            let bytes = resp.bytes().await?;
            if status.is_server_error() {
                error!("LLM server error: {}", status);
            }
            return Err(match serde_json::from_slice::<LlmError>(&bytes) {
                Ok(mut err) => {
                    err.status = Some(status);
                    TabulaError::LlmServerError(err)
                }
                Err(_) => TabulaError::UpstreamStatus(status),
            });
        }

        let parsed: ChatCompletionResponse = resp.json().await?;
        debug!(
            model = parsed.model.as_deref().unwrap_or("-"),
            usage = ?parsed.usage,
            "chat completion received"
        );
        Ok(parsed)
    }
}
