//! Contract between the harness and provider adapters.
//!
//! An adapter turns its vendor's wire format into [`ProviderEvent`]s. The
//! harness feeds those through the message assembler and fans the resulting
//! canonical events out to consumers.

use std::collections::HashMap;
use std::pin::Pin;

use crate::content::{BlockKind, InputPart};
use crate::errors::ProviderError;
use crate::message::{DoneReason, ErrorReason};
use crate::model::{ModelRef, ProviderId, RunOptions};
use crate::usage::{Usage, UsagePolicy};

/// Wire-level event vocabulary every adapter emits, one turn at a time.
///
/// Serialized with a `type` tag and camelCase field names so the same shape
/// travels over the proxy transport unchanged.
#[derive(Clone, Debug, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ProviderEvent {
    Start,
    TextStart {
        #[serde(rename = "contentIndex")]
        content_index: usize,
    },
    TextDelta {
        #[serde(rename = "contentIndex")]
        content_index: usize,
        delta: String,
    },
    TextEnd {
        #[serde(rename = "contentIndex")]
        content_index: usize,
        #[serde(
            rename = "contentSignature",
            default,
            skip_serializing_if = "Option::is_none"
        )]
        content_signature: Option<String>,
    },
    ThinkingStart {
        #[serde(rename = "contentIndex")]
        content_index: usize,
    },
    ThinkingDelta {
        #[serde(rename = "contentIndex")]
        content_index: usize,
        delta: String,
    },
    ThinkingEnd {
        #[serde(rename = "contentIndex")]
        content_index: usize,
        #[serde(
            rename = "contentSignature",
            default,
            skip_serializing_if = "Option::is_none"
        )]
        content_signature: Option<String>,
    },
    #[serde(rename = "toolcall_start")]
    ToolCallStart {
        #[serde(rename = "contentIndex")]
        content_index: usize,
        id: String,
        #[serde(rename = "toolName")]
        tool_name: String,
    },
    #[serde(rename = "toolcall_delta")]
    ToolCallDelta {
        #[serde(rename = "contentIndex")]
        content_index: usize,
        delta: String,
    },
    #[serde(rename = "toolcall_end")]
    ToolCallEnd {
        #[serde(rename = "contentIndex")]
        content_index: usize,
    },
    Done {
        reason: DoneReason,
        #[serde(default)]
        usage: Usage,
    },
    Error {
        reason: ErrorReason,
        #[serde(
            rename = "errorMessage",
            default,
            skip_serializing_if = "Option::is_none"
        )]
        error_message: Option<String>,
        #[serde(default)]
        usage: Usage,
    },
}

impl ProviderEvent {
    /// Wire `type` name of this event.
    pub fn type_name(&self) -> &'static str {
        match self {
            Self::Start => "start",
            Self::TextStart { .. } => "text_start",
            Self::TextDelta { .. } => "text_delta",
            Self::TextEnd { .. } => "text_end",
            Self::ThinkingStart { .. } => "thinking_start",
            Self::ThinkingDelta { .. } => "thinking_delta",
            Self::ThinkingEnd { .. } => "thinking_end",
            Self::ToolCallStart { .. } => "toolcall_start",
            Self::ToolCallDelta { .. } => "toolcall_delta",
            Self::ToolCallEnd { .. } => "toolcall_end",
            Self::Done { .. } => "done",
            Self::Error { .. } => "error",
        }
    }

    /// Index and block kind for block events.
    pub fn block(&self) -> Option<(usize, BlockKind)> {
        match self {
            Self::TextStart { content_index }
            | Self::TextDelta { content_index, .. }
            | Self::TextEnd { content_index, .. } => Some((*content_index, BlockKind::Text)),
            Self::ThinkingStart { content_index }
            | Self::ThinkingDelta { content_index, .. }
            | Self::ThinkingEnd { content_index, .. } => {
                Some((*content_index, BlockKind::Thinking))
            }
            Self::ToolCallStart { content_index, .. }
            | Self::ToolCallDelta { content_index, .. }
            | Self::ToolCallEnd { content_index } => Some((*content_index, BlockKind::ToolCall)),
            Self::Start | Self::Done { .. } | Self::Error { .. } => None,
        }
    }

    /// True for `done` and `error`.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Done { .. } | Self::Error { .. })
    }
}

/// Item yielded by an adapter stream.
#[derive(Clone, Debug, PartialEq)]
pub enum ProviderUpdate {
    /// A canonical wire event.
    Event(ProviderEvent),
    /// Provisional usage reported mid-stream. Folded into the message, never
    /// forwarded to consumers as an event.
    Usage(Usage),
}

impl From<ProviderEvent> for ProviderUpdate {
    fn from(value: ProviderEvent) -> Self {
        Self::Event(value)
    }
}

/// Fully validated request handed to an adapter.
#[derive(Clone, Debug)]
pub struct ProviderRequest {
    pub run_id: uuid::Uuid,
    pub session_id: uuid::Uuid,
    pub model: ModelRef,
    pub system_prompt: Option<String>,
    pub input_parts: Vec<InputPart>,
    pub options: RunOptions,
    /// Adapter-specific options keyed by provider id.
    pub vendor_options: HashMap<ProviderId, serde_json::Value>,
}

/// Response metadata an adapter learns when its stream opens.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ProviderResponseMeta {
    /// Wire API family, overriding `ModelRef::api` when set.
    pub api: Option<String>,
    /// Provider-side request id, for logs.
    pub request_id: Option<String>,
}

/// Boxed adapter event stream.
pub type ProviderEventStream = Pin<
    Box<dyn futures::Stream<Item = Result<ProviderUpdate, ProviderError>> + Send + 'static>,
>;

/// An opened provider stream.
pub struct ProviderStreamHandle {
    pub stream: ProviderEventStream,
    pub metadata: ProviderResponseMeta,
}

/// Implemented once per provider (or proxy) integration.
#[async_trait::async_trait]
pub trait ProviderAdapter: Send + Sync {
    /// Provider id this adapter is registered under.
    fn id(&self) -> ProviderId;

    /// How a zero-usage terminal event combines with provisional usage.
    fn usage_policy(&self) -> UsagePolicy {
        UsagePolicy::PreserveProvisional
    }

    /// Opens the provider stream for one turn.
    ///
    /// Dropping the returned stream must cancel the underlying transport.
    async fn start_stream(&self, req: ProviderRequest)
    -> Result<ProviderStreamHandle, ProviderError>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn wire_names_are_bit_exact() {
        let cases = [
            (ProviderEvent::Start, json!({"type": "start"})),
            (
                ProviderEvent::TextDelta {
                    content_index: 0,
                    delta: "Hel".into(),
                },
                json!({"type": "text_delta", "contentIndex": 0, "delta": "Hel"}),
            ),
            (
                ProviderEvent::ThinkingEnd {
                    content_index: 1,
                    content_signature: Some("sig".into()),
                },
                json!({"type": "thinking_end", "contentIndex": 1, "contentSignature": "sig"}),
            ),
            (
                ProviderEvent::ToolCallStart {
                    content_index: 2,
                    id: "t1".into(),
                    tool_name: "search".into(),
                },
                json!({"type": "toolcall_start", "contentIndex": 2, "id": "t1", "toolName": "search"}),
            ),
            (
                ProviderEvent::ToolCallEnd { content_index: 2 },
                json!({"type": "toolcall_end", "contentIndex": 2}),
            ),
        ];
        for (event, expected) in cases {
            assert_eq!(serde_json::to_value(&event).expect("serialize"), expected);
            assert_eq!(event.type_name(), expected["type"]);
        }
    }

    #[test]
    fn terminal_events_decode_with_defaults() {
        let done: ProviderEvent =
            serde_json::from_value(json!({"type": "done", "reason": "toolUse"})).expect("done");
        assert_eq!(
            done,
            ProviderEvent::Done {
                reason: DoneReason::ToolUse,
                usage: Usage::default()
            }
        );

        let error: ProviderEvent = serde_json::from_value(json!({
            "type": "error",
            "reason": "aborted",
            "errorMessage": "stopped",
            "usage": {"input": 3, "output": 0, "cacheRead": 0, "cacheWrite": 0, "totalTokens": 3,
                      "cost": {"input": 0.0, "output": 0.0, "cacheRead": 0.0, "cacheWrite": 0.0, "total": 0.0}}
        }))
        .expect("error");
        assert!(error.is_terminal());
        assert!(matches!(
            error,
            ProviderEvent::Error { reason: ErrorReason::Aborted, error_message: Some(ref m), usage } if m == "stopped" && usage.input == 3
        ));
    }

    #[test]
    fn unknown_reason_is_rejected() {
        let result = serde_json::from_value::<ProviderEvent>(json!({"type": "done", "reason": "aborted"}));
        assert!(result.is_err());
    }

    #[test]
    fn block_reports_index_and_kind() {
        assert_eq!(
            ProviderEvent::ToolCallDelta {
                content_index: 4,
                delta: "{".into()
            }
            .block(),
            Some((4, BlockKind::ToolCall))
        );
        assert_eq!(ProviderEvent::Start.block(), None);
    }
}
