use std::sync::Arc;

use crate::content::{ContentBlock, ToolCall};
use crate::usage::Usage;

/// Message author. Assistant messages always carry `"assistant"`.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    #[default]
    Assistant,
}

/// Why an assistant turn ended.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum StopReason {
    /// Normal end of message.
    #[default]
    Stop,
    /// Output token limit reached.
    Length,
    /// The model requested tool execution.
    ToolUse,
    /// The run was cancelled by the caller.
    Aborted,
    /// The run failed.
    Error,
}

/// Stop reasons a successful `done` event may carry.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum DoneReason {
    #[default]
    Stop,
    Length,
    ToolUse,
}

impl From<DoneReason> for StopReason {
    fn from(value: DoneReason) -> Self {
        match value {
            DoneReason::Stop => Self::Stop,
            DoneReason::Length => Self::Length,
            DoneReason::ToolUse => Self::ToolUse,
        }
    }
}

/// Stop reasons a failing `error` event may carry.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ErrorReason {
    Aborted,
    #[default]
    Error,
}

impl From<ErrorReason> for StopReason {
    fn from(value: ErrorReason) -> Self {
        match value {
            ErrorReason::Aborted => Self::Aborted,
            ErrorReason::Error => Self::Error,
        }
    }
}

/// The reconstructed result of one model turn.
///
/// Built by the run's producer task; every snapshot handed to consumers is an
/// immutable copy. Blocks sit behind `Arc`, so snapshots share every block the
/// producer has not touched since the previous one.
#[derive(Clone, Debug, Default, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AssistantMessage {
    pub role: Role,
    pub content: Vec<Arc<ContentBlock>>,
    pub api: String,
    pub provider: String,
    pub model: String,
    pub usage: Usage,
    pub stop_reason: StopReason,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
    /// Unix milliseconds at which the producer task started.
    pub timestamp: i64,
}

impl AssistantMessage {
    /// Creates an empty message for the given model identity, stamped now.
    pub fn new(
        api: impl Into<String>,
        provider: impl Into<String>,
        model: impl Into<String>,
    ) -> Self {
        Self {
            api: api.into(),
            provider: provider.into(),
            model: model.into(),
            timestamp: chrono::Utc::now().timestamp_millis(),
            ..Self::default()
        }
    }

    /// Concatenates all text blocks in order.
    pub fn text(&self) -> String {
        self.content.iter().filter_map(|block| block.as_text()).collect()
    }

    /// Concatenates all thinking blocks in order.
    pub fn thinking(&self) -> String {
        self.content
            .iter()
            .filter_map(|block| block.as_thinking())
            .collect()
    }

    /// Tool calls in content order.
    pub fn tool_calls(&self) -> impl Iterator<Item = &ToolCall> {
        self.content.iter().filter_map(|block| block.as_tool_call())
    }

    /// Appends a block.
    pub fn push_block(&mut self, block: ContentBlock) {
        self.content.push(Arc::new(block));
    }

    /// True when the turn ended with `error` or `aborted`.
    pub fn is_error(&self) -> bool {
        matches!(self.stop_reason, StopReason::Error | StopReason::Aborted)
    }

    /// Serializes the message as the single JSON record persisted per turn.
    pub fn to_json_record(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn json_record_uses_camel_case_and_assistant_role() {
        let mut message = AssistantMessage::new("proxy-sse", "proxy", "m1");
        message.push_block(ContentBlock::text("Hello"));
        message.stop_reason = StopReason::ToolUse;

        let value: serde_json::Value =
            serde_json::from_str(&message.to_json_record().expect("record")).expect("json");
        assert_eq!(value["role"], "assistant");
        assert_eq!(value["stopReason"], "toolUse");
        assert!(value.get("errorMessage").is_none());
        assert_eq!(value["content"][0]["text"], "Hello");
        assert!(value["timestamp"].as_i64().unwrap_or_default() > 0);
    }

    #[test]
    fn text_skips_non_text_blocks() {
        let message = AssistantMessage {
            content: vec![
                Arc::new(ContentBlock::thinking("plan")),
                Arc::new(ContentBlock::text("a")),
                Arc::new(ContentBlock::tool_call("t", "x", serde_json::Map::new())),
                Arc::new(ContentBlock::text("b")),
            ],
            ..AssistantMessage::default()
        };
        assert_eq!(message.text(), "ab");
        assert_eq!(message.thinking(), "plan");
        assert_eq!(message.tool_calls().count(), 1);
    }

    #[test]
    fn narrow_reasons_widen_to_stop_reason() {
        assert_eq!(StopReason::from(DoneReason::ToolUse), StopReason::ToolUse);
        assert_eq!(StopReason::from(ErrorReason::Aborted), StopReason::Aborted);
        assert!(!AssistantMessage::default().is_error());
    }
}
