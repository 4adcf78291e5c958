use std::collections::VecDeque;
use std::pin::Pin;
use std::str::Utf8Error;

use futures::StreamExt as _;
use futures::stream;
use tracing::debug;

use crate::ProviderId;
use crate::errors::{HarnessError, ProviderError};
use crate::provider::{
    ProviderAdapter, ProviderRequest, ProviderResponseMeta, ProviderStreamHandle, ProviderUpdate,
};

use super::config::ProxyClientConfig;
use super::options::ProxyRequestOptions;
use super::transport::{SseDecoder, SseFrame, decode_frame};

pub(crate) const PROXY_PROVIDER: &str = "proxy";

const REQUEST_ID_HEADER: &str = "x-request-id";
const API_HEADER: &str = "x-ai-api";

type ByteStream =
    Pin<Box<dyn futures::Stream<Item = Result<bytes::Bytes, reqwest::Error>> + Send + 'static>>;

/// Provider adapter for a server that already speaks the canonical event
/// vocabulary over SSE.
///
/// Registered as `proxy` by default. Use [`ProxyProvider::with_id`] to
/// register one instance per upstream provider; the id is sent as the
/// request's `provider` field.
pub struct ProxyProvider {
    id: ProviderId,
    client: reqwest::Client,
    config: ProxyClientConfig,
}

impl ProxyProvider {
    /// Creates a provider from explicit client configuration.
    pub fn new(config: ProxyClientConfig) -> Result<Self, HarnessError> {
        if config.base_url.trim().is_empty() {
            return Err(HarnessError::Config(
                "proxy client config base_url must not be empty".into(),
            ));
        }
        let client = reqwest::Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| HarnessError::Config(format!("failed to build proxy client: {e}")))?;
        Ok(Self {
            id: ProviderId::new(PROXY_PROVIDER),
            client,
            config,
        })
    }

    /// Creates a provider using `AI_PROXY_URL` and `AI_PROXY_TOKEN`.
    pub fn from_env() -> Result<Self, HarnessError> {
        Self::new(ProxyClientConfig::from_env()?)
    }

    /// Registers this adapter under a different provider id.
    pub fn with_id(mut self, id: impl Into<ProviderId>) -> Self {
        self.id = id.into();
        self
    }
}

#[async_trait::async_trait]
impl ProviderAdapter for ProxyProvider {
    fn id(&self) -> ProviderId {
        self.id.clone()
    }

    async fn start_stream(
        &self,
        req: ProviderRequest,
    ) -> Result<ProviderStreamHandle, ProviderError> {
        let provider_id = self.id.clone();
        let options = read_proxy_options(&req, &provider_id)?;
        let body = build_request_body(&req, &options)?;
        debug!(run_id = %req.run_id, session_id = %req.session_id, provider = %provider_id, model = %req.model.model, "starting proxy stream");

        let mut http_req = self
            .client
            .post(self.config.stream_url())
            .header(reqwest::header::ACCEPT, "text/event-stream")
            .json(&body);
        if let Some(token) = &self.config.auth_token {
            http_req = http_req.bearer_auth(token);
        }
        if let Some(timeout) = req.options.timeout {
            http_req = http_req.timeout(timeout);
        }

        let response = http_req.send().await.map_err(|e| {
            ProviderError::transport(provider_id.clone(), format!("proxy request failed: {e}"))
        })?;
        let status = response.status();
        if !status.is_success() {
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "<unreadable body>".to_string());
            return Err(ProviderError::provider(
                provider_id,
                format!("proxy request failed with status {status}: {}", body.trim()),
                Some(status.as_u16()),
            ));
        }

        let header = |name: &str| {
            response
                .headers()
                .get(name)
                .and_then(|value| value.to_str().ok())
                .map(ToOwned::to_owned)
        };
        let metadata = ProviderResponseMeta {
            api: header(API_HEADER),
            request_id: header(REQUEST_ID_HEADER),
        };

        let bytes_stream: ByteStream = Box::pin(response.bytes_stream());
        Ok(ProviderStreamHandle {
            stream: Box::pin(proxy_event_stream(provider_id, bytes_stream)),
            metadata,
        })
    }
}

fn read_proxy_options(
    req: &ProviderRequest,
    provider_id: &ProviderId,
) -> Result<ProxyRequestOptions, ProviderError> {
    match req.vendor_options.get(&ProviderId::new(PROXY_PROVIDER)) {
        Some(value) => serde_json::from_value(value.clone()).map_err(|e| {
            ProviderError::protocol(provider_id.clone(), format!("invalid proxy options: {e}"))
        }),
        None => Ok(ProxyRequestOptions::default()),
    }
}

pub(crate) fn build_request_body(
    req: &ProviderRequest,
    options: &ProxyRequestOptions,
) -> Result<serde_json::Value, ProviderError> {
    let provider_id = req.model.provider.clone();
    let input = serde_json::to_value(&req.input_parts).map_err(|e| {
        ProviderError::protocol(
            provider_id.clone(),
            format!("failed to serialize input parts: {e}"),
        )
    })?;
    let options = serde_json::to_value(options).map_err(|e| {
        ProviderError::protocol(provider_id.clone(), format!("failed to serialize options: {e}"))
    })?;

    let mut body = serde_json::json!({
        "model": req.model.model,
        "provider": provider_id,
        "input": input,
        "options": options,
    });
    if let Some(api) = &req.model.api {
        body["api"] = serde_json::json!(api);
    }
    if let Some(system_prompt) = req
        .system_prompt
        .as_deref()
        .map(str::trim)
        .filter(|s| !s.is_empty())
    {
        body["systemPrompt"] = serde_json::json!(system_prompt);
    }
    Ok(body)
}

fn proxy_event_stream(
    provider_id: ProviderId,
    bytes_stream: ByteStream,
) -> impl futures::Stream<Item = Result<ProviderUpdate, ProviderError>> + Send {
    struct State {
        provider_id: ProviderId,
        bytes_stream: ByteStream,
        decoder: SseDecoder,
        pending: VecDeque<ProviderUpdate>,
        /// Reported after the updates decoded before it.
        failed: Option<ProviderError>,
        done: bool,
    }

    impl State {
        fn enqueue(&mut self, frames: impl IntoIterator<Item = Result<SseFrame, Utf8Error>>) {
            for frame in frames {
                match decode_frame(&self.provider_id, frame.as_ref()) {
                    Ok(Some(update)) => self.pending.push_back(update),
                    Ok(None) => {}
                    Err(err) => {
                        self.failed = Some(err);
                        return;
                    }
                }
            }
        }
    }

    stream::try_unfold(
        State {
            provider_id,
            bytes_stream,
            decoder: SseDecoder::default(),
            pending: VecDeque::new(),
            failed: None,
            done: false,
        },
        |mut state| async move {
            loop {
                if let Some(update) = state.pending.pop_front() {
                    return Ok(Some((update, state)));
                }
                if let Some(err) = state.failed.take() {
                    return Err(err);
                }
                if state.done {
                    return Ok(None);
                }

                match state.bytes_stream.next().await {
                    Some(Ok(chunk)) => {
                        let frames = state.decoder.push_chunk(&chunk);
                        state.enqueue(frames);
                    }
                    Some(Err(e)) => {
                        return Err(ProviderError::transport(
                            state.provider_id,
                            format!("proxy streaming read failed: {e}"),
                        ));
                    }
                    None => {
                        state.done = true;
                        let trailing = state.decoder.finish();
                        state.enqueue(trailing);
                    }
                }
            }
        },
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::content::{ContentBlock, InputPart};
    use crate::message::StopReason;
    use crate::model::{ModelRef, RunOptions};
    use crate::stream::StreamEvent;
    use crate::vendors::proxy::{ProxyReasoning, ProxyRunBuilderExt};
    use crate::{Harness, SessionConfig};
    use std::collections::HashMap;
    use std::sync::Arc;
    use tokio::io::{AsyncReadExt as _, AsyncWriteExt as _};
    use tokio::net::TcpListener;
    use tokio::sync::oneshot;

    fn request_with_parts(parts: Vec<InputPart>) -> ProviderRequest {
        ProviderRequest {
            run_id: uuid::Uuid::new_v4(),
            session_id: uuid::Uuid::new_v4(),
            model: ModelRef::new("proxy", "claude-sonnet-4"),
            system_prompt: Some("sys".into()),
            input_parts: parts,
            options: RunOptions::default(),
            vendor_options: HashMap::new(),
        }
    }

    #[test]
    fn request_body_carries_model_input_and_options() {
        let req = request_with_parts(vec![
            InputPart::Text("hello".into()),
            InputPart::Json(serde_json::json!({"a": 1})),
        ]);
        let body = build_request_body(
            &req,
            &ProxyRequestOptions::default()
                .max_tokens(256)
                .reasoning(ProxyReasoning::Low),
        )
        .expect("body");
        assert_eq!(body["model"], "claude-sonnet-4");
        assert_eq!(body["provider"], "proxy");
        assert_eq!(body["systemPrompt"], "sys");
        assert_eq!(body["input"][0], serde_json::json!({"type": "text", "value": "hello"}));
        assert_eq!(body["input"][1]["type"], "json");
        assert_eq!(body["options"], serde_json::json!({"maxTokens": 256, "reasoning": "low"}));
        assert!(body.get("api").is_none());
    }

    #[test]
    fn blank_system_prompt_is_omitted() {
        let mut req = request_with_parts(vec![InputPart::Text("hello".into())]);
        req.system_prompt = Some("  ".into());
        let body = build_request_body(&req, &ProxyRequestOptions::default()).expect("body");
        assert!(body.get("systemPrompt").is_none());
        assert_eq!(body["options"], serde_json::json!({}));
    }

    #[test]
    fn invalid_vendor_options_are_protocol_errors() {
        let mut req = request_with_parts(vec![InputPart::Text("hello".into())]);
        req.vendor_options.insert(
            ProviderId::new(PROXY_PROVIDER),
            serde_json::json!({"maxTokens": "lots"}),
        );
        let err = read_proxy_options(&req, &ProviderId::new(PROXY_PROVIDER))
            .expect_err("invalid options");
        assert!(matches!(err, ProviderError::Protocol { .. }));
    }

    /// Serves one HTTP response on a local port and hands back the raw
    /// request it received.
    async fn serve_once(status: &str, body: String) -> (String, oneshot::Receiver<String>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
        let addr = listener.local_addr().expect("addr");
        let (request_tx, request_rx) = oneshot::channel();
        let head = format!(
            "HTTP/1.1 {status}\r\ncontent-type: text/event-stream\r\nx-request-id: req-1\r\nx-ai-api: anthropic-messages\r\ncontent-length: {}\r\nconnection: close\r\n\r\n",
            body.len()
        );
        tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.expect("accept");
            let mut received = Vec::new();
            let mut buf = [0_u8; 4096];
            loop {
                let n = socket.read(&mut buf).await.expect("read");
                if n == 0 {
                    break;
                }
                received.extend_from_slice(&buf[..n]);
                if request_complete(&received) {
                    break;
                }
            }
            let _ = request_tx.send(String::from_utf8_lossy(&received).into_owned());
            socket.write_all(head.as_bytes()).await.expect("write head");
            socket.write_all(body.as_bytes()).await.expect("write body");
            socket.shutdown().await.expect("shutdown");
        });
        (format!("http://{addr}"), request_rx)
    }

    fn request_complete(raw: &[u8]) -> bool {
        let text = String::from_utf8_lossy(raw);
        let Some((head, body)) = text.split_once("\r\n\r\n") else {
            return false;
        };
        let length = head
            .lines()
            .find_map(|line| {
                let (name, value) = line.split_once(':')?;
                name.eq_ignore_ascii_case("content-length")
                    .then(|| value.trim().parse::<usize>().ok())
                    .flatten()
            })
            .unwrap_or(0);
        body.len() >= length
    }

    fn sse(frames: &[serde_json::Value]) -> String {
        let mut body = String::from(": connected\n\n");
        for frame in frames {
            body.push_str(&format!("data: {frame}\n\n"));
        }
        body.push_str("data: [DONE]\n\n");
        body
    }

    fn harness_for(base_url: &str) -> Harness {
        let provider = ProxyProvider::new(ProxyClientConfig::new(base_url).auth_token("tok"))
            .expect("provider");
        Harness::builder()
            .register_provider(Arc::new(provider))
            .build()
            .expect("harness")
    }

    #[tokio::test]
    async fn streams_canonical_events_from_local_proxy() {
        let body = sse(&[
            serde_json::json!({"type": "start"}),
            serde_json::json!({"type": "usage", "usage": {"input": 9}}),
            serde_json::json!({"type": "text_start", "contentIndex": 0}),
            serde_json::json!({"type": "text_delta", "contentIndex": 0, "delta": "Hi "}),
            serde_json::json!({"type": "text_delta", "contentIndex": 0, "delta": "there"}),
            serde_json::json!({"type": "text_end", "contentIndex": 0}),
            serde_json::json!({"type": "toolcall_start", "contentIndex": 1, "id": "t1", "toolName": "search"}),
            serde_json::json!({"type": "toolcall_delta", "contentIndex": 1, "delta": "{\"q\":"}),
            serde_json::json!({"type": "toolcall_delta", "contentIndex": 1, "delta": "\"cat\"}"}),
            serde_json::json!({"type": "toolcall_end", "contentIndex": 1}),
            serde_json::json!({"type": "done", "reason": "toolUse"}),
        ]);
        let (base_url, request_rx) = serve_once("200 OK", body).await;

        let mut run = harness_for(&base_url)
            .session(SessionConfig::named("proxy"))
            .run(ModelRef::new("proxy", "claude-sonnet-4"))
            .system_prompt("be brief")
            .user_text("hello")
            .proxy_options(ProxyRequestOptions::default().temperature(0.5))
            .start_stream()
            .await
            .expect("start");

        let mut deltas = String::new();
        let mut saw_tool_end = false;
        while let Some(event) = run.next_event().await {
            match event {
                StreamEvent::TextDelta { delta, .. } => deltas.push_str(&delta),
                StreamEvent::ToolCallEnd { tool_call, .. } => {
                    saw_tool_end = true;
                    assert_eq!(tool_call.arguments.get("q"), Some(&serde_json::json!("cat")));
                }
                _ => {}
            }
        }
        assert_eq!(deltas, "Hi there");
        assert!(saw_tool_end);

        let message = run.finish().await.expect("message");
        assert_eq!(message.stop_reason, StopReason::ToolUse);
        assert_eq!(message.api, "anthropic-messages");
        assert_eq!(message.usage.input, 9);
        assert_eq!(*message.content[0], ContentBlock::text("Hi there"));

        let raw_request = request_rx.await.expect("request");
        assert!(raw_request.starts_with("POST /api/stream "));
        assert!(raw_request.to_ascii_lowercase().contains("authorization: bearer tok"));
        assert!(raw_request.contains("\"systemPrompt\":\"be brief\""));
        assert!(raw_request.contains("\"temperature\":0.5"));
    }

    #[tokio::test]
    async fn non_success_status_becomes_error_message() {
        let (base_url, _request_rx) =
            serve_once("429 Too Many Requests", "slow down".to_string()).await;
        let message = harness_for(&base_url)
            .session(SessionConfig::named("proxy"))
            .run(ModelRef::new("proxy", "m"))
            .user_text("hello")
            .collect_message()
            .await
            .expect("message");
        assert_eq!(message.stop_reason, StopReason::Error);
        let error = message.error_message.as_deref().expect("error message");
        assert!(error.contains("429"), "{error}");
        assert!(error.contains("slow down"), "{error}");
    }

    #[tokio::test]
    async fn corrupt_frame_ends_run_with_partial_content() {
        let body = format!(
            "{}data: {{broken\n\n",
            sse(&[
                serde_json::json!({"type": "start"}),
                serde_json::json!({"type": "text_start", "contentIndex": 0}),
                serde_json::json!({"type": "text_delta", "contentIndex": 0, "delta": "kept"}),
            ])
            .trim_end_matches("data: [DONE]\n\n")
        );
        let (base_url, _request_rx) = serve_once("200 OK", body).await;
        let message = harness_for(&base_url)
            .session(SessionConfig::named("proxy"))
            .run(ModelRef::new("proxy", "m"))
            .user_text("hello")
            .collect_message()
            .await
            .expect("message");
        assert_eq!(message.stop_reason, StopReason::Error);
        assert_eq!(message.text(), "kept");
        assert!(
            message
                .error_message
                .as_deref()
                .is_some_and(|m| m.contains("invalid proxy event frame"))
        );
    }

    #[tokio::test]
    async fn env_gated_smoke_collect_text_if_proxy_configured() {
        if std::env::var("AI_PROXY_URL")
            .unwrap_or_default()
            .trim()
            .is_empty()
        {
            eprintln!("skipping proxy smoke test (AI_PROXY_URL missing)");
            return;
        }
        let harness = Harness::builder()
            .register_provider(Arc::new(ProxyProvider::from_env().expect("provider")))
            .build()
            .expect("harness");
        let result = harness
            .session(SessionConfig::named("smoke"))
            .run(ModelRef::new("proxy", "claude-sonnet-4"))
            .timeout(std::time::Duration::from_secs(60))
            .user_text("Return exactly the word: ok")
            .collect_text()
            .await;
        assert!(result.is_ok(), "proxy smoke failed: {result:?}");
    }
}
