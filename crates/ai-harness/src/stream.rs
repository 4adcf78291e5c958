use std::sync::Arc;

use crate::content::ToolCall;
use crate::message::{AssistantMessage, DoneReason, ErrorReason};

/// Snapshot of the message being built, shared by every consumer of an event.
pub type MessageSnapshot = Arc<AssistantMessage>;

/// Normalized stream events exposed to consumers.
///
/// Each event carries an immutable snapshot of the message as it stood right
/// after the event was applied. Snapshots are never mutated later.
#[derive(Clone, Debug, PartialEq, serde::Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StreamEvent {
    Start {
        partial: MessageSnapshot,
    },
    TextStart {
        #[serde(rename = "contentIndex")]
        content_index: usize,
        partial: MessageSnapshot,
    },
    TextDelta {
        #[serde(rename = "contentIndex")]
        content_index: usize,
        delta: String,
        partial: MessageSnapshot,
    },
    TextEnd {
        #[serde(rename = "contentIndex")]
        content_index: usize,
        content: String,
        partial: MessageSnapshot,
    },
    ThinkingStart {
        #[serde(rename = "contentIndex")]
        content_index: usize,
        partial: MessageSnapshot,
    },
    ThinkingDelta {
        #[serde(rename = "contentIndex")]
        content_index: usize,
        delta: String,
        partial: MessageSnapshot,
    },
    ThinkingEnd {
        #[serde(rename = "contentIndex")]
        content_index: usize,
        content: String,
        partial: MessageSnapshot,
    },
    #[serde(rename = "toolcall_start")]
    ToolCallStart {
        #[serde(rename = "contentIndex")]
        content_index: usize,
        partial: MessageSnapshot,
    },
    #[serde(rename = "toolcall_delta")]
    ToolCallDelta {
        #[serde(rename = "contentIndex")]
        content_index: usize,
        delta: String,
        partial: MessageSnapshot,
    },
    #[serde(rename = "toolcall_end")]
    ToolCallEnd {
        #[serde(rename = "contentIndex")]
        content_index: usize,
        #[serde(rename = "toolCall")]
        tool_call: ToolCall,
        partial: MessageSnapshot,
    },
    /// Terminal success.
    Done {
        reason: DoneReason,
        message: MessageSnapshot,
    },
    /// Terminal failure or cancellation.
    Error {
        reason: ErrorReason,
        error: MessageSnapshot,
    },
}

impl StreamEvent {
    /// True for `Done` and `Error`.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Done { .. } | Self::Error { .. })
    }

    /// Content index for block events.
    pub fn content_index(&self) -> Option<usize> {
        match self {
            Self::TextStart { content_index, .. }
            | Self::TextDelta { content_index, .. }
            | Self::TextEnd { content_index, .. }
            | Self::ThinkingStart { content_index, .. }
            | Self::ThinkingDelta { content_index, .. }
            | Self::ThinkingEnd { content_index, .. }
            | Self::ToolCallStart { content_index, .. }
            | Self::ToolCallDelta { content_index, .. }
            | Self::ToolCallEnd { content_index, .. } => Some(*content_index),
            Self::Start { .. } | Self::Done { .. } | Self::Error { .. } => None,
        }
    }

    /// Message snapshot attached to this event.
    pub fn message(&self) -> &MessageSnapshot {
        match self {
            Self::Start { partial }
            | Self::TextStart { partial, .. }
            | Self::TextDelta { partial, .. }
            | Self::TextEnd { partial, .. }
            | Self::ThinkingStart { partial, .. }
            | Self::ThinkingDelta { partial, .. }
            | Self::ThinkingEnd { partial, .. }
            | Self::ToolCallStart { partial, .. }
            | Self::ToolCallDelta { partial, .. }
            | Self::ToolCallEnd { partial, .. } => partial,
            Self::Done { message, .. } => message,
            Self::Error { error, .. } => error,
        }
    }

    /// Text delta payload, if this is a `TextDelta`.
    pub fn text_delta(&self) -> Option<&str> {
        match self {
            Self::TextDelta { delta, .. } => Some(delta),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn serializes_with_wire_names_and_snapshot() {
        let snapshot = Arc::new(AssistantMessage::default());
        let event = StreamEvent::ToolCallDelta {
            content_index: 3,
            delta: "{".into(),
            partial: snapshot.clone(),
        };
        let value = serde_json::to_value(&event).expect("serialize");
        assert_eq!(value["type"], "toolcall_delta");
        assert_eq!(value["contentIndex"], 3);
        assert_eq!(value["partial"]["role"], "assistant");
        assert_eq!(event.content_index(), Some(3));
        assert!(Arc::ptr_eq(event.message(), &snapshot));
        assert!(!event.is_terminal());
    }

    #[test]
    fn terminal_events_expose_their_message() {
        let snapshot = Arc::new(AssistantMessage::default());
        let done = StreamEvent::Done {
            reason: DoneReason::Stop,
            message: snapshot.clone(),
        };
        let error = StreamEvent::Error {
            reason: ErrorReason::Aborted,
            error: snapshot.clone(),
        };
        assert!(done.is_terminal() && error.is_terminal());
        assert_eq!(done.content_index(), None);
        assert!(Arc::ptr_eq(error.message(), &snapshot));
        assert_eq!(serde_json::to_value(&error).expect("json")["reason"], "aborted");
    }
}
