//! Partial-message reconstruction.
//!
//! [`MessageAssembler`] is the single-writer state machine that turns the
//! ordered [`ProviderEvent`]s of one turn into an [`AssistantMessage`] and the
//! canonical [`StreamEvent`]s consumers see. It performs no I/O.
//!
//! Lifecycle per content index: unseen, open, closed. Lifecycle per stream:
//! not started, streaming, terminal. Anything out of order is reported as a
//! [`ProtocolViolation`]; events after the terminal event are ignored.

use std::collections::BTreeMap;
use std::sync::Arc;

use tracing::trace;

use crate::content::{BlockKind, ContentBlock, ToolCall};
use crate::errors::ProtocolViolation;
use crate::message::{AssistantMessage, ErrorReason};
use crate::partial_json::JsonAccumulator;
use crate::provider::ProviderEvent;
use crate::stream::{MessageSnapshot, StreamEvent};
use crate::usage::{Cost, ModelPricing, Usage, UsagePolicy};

const ABORTED_MESSAGE: &str = "request was aborted";
const UNKNOWN_ERROR_MESSAGE: &str = "unknown error";

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Phase {
    NotStarted,
    Streaming,
    Terminal,
}

/// Builder-private state of a block that is still receiving deltas.
#[derive(Debug)]
enum OpenBlock {
    Text,
    Thinking,
    ToolCall(JsonAccumulator),
}

impl OpenBlock {
    fn kind(&self) -> BlockKind {
        match self {
            Self::Text => BlockKind::Text,
            Self::Thinking => BlockKind::Thinking,
            Self::ToolCall(_) => BlockKind::ToolCall,
        }
    }
}

#[derive(Debug)]
enum BlockStage {
    Open(OpenBlock),
    Closed(BlockKind),
}

impl BlockStage {
    fn kind(&self) -> BlockKind {
        match self {
            Self::Open(open) => open.kind(),
            Self::Closed(kind) => *kind,
        }
    }
}

/// Reconstructs one assistant message from provider events.
#[derive(Debug)]
pub struct MessageAssembler {
    message: AssistantMessage,
    /// One entry per started content index; iteration order matches the
    /// order of `message.content`.
    blocks: BTreeMap<usize, BlockStage>,
    phase: Phase,
    usage_policy: UsagePolicy,
    pricing: Option<ModelPricing>,
}

impl MessageAssembler {
    /// Starts assembling into `message`, which should be empty apart from its
    /// identity fields and timestamp.
    pub fn new(message: AssistantMessage) -> Self {
        Self {
            message,
            blocks: BTreeMap::new(),
            phase: Phase::NotStarted,
            usage_policy: UsagePolicy::default(),
            pricing: None,
        }
    }

    /// Sets how terminal usage combines with provisional usage.
    pub fn with_usage_policy(mut self, policy: UsagePolicy) -> Self {
        self.usage_policy = policy;
        self
    }

    /// Sets pricing used to fill in cost when the terminal usage has none.
    pub fn with_pricing(mut self, pricing: Option<ModelPricing>) -> Self {
        self.pricing = pricing;
        self
    }

    /// Overrides the API family label, e.g. from response metadata. Only
    /// takes effect before `start`.
    pub fn set_api(&mut self, api: impl Into<String>) {
        if self.phase == Phase::NotStarted {
            self.message.api = api.into();
        }
    }

    /// Current message state.
    pub fn message(&self) -> &AssistantMessage {
        &self.message
    }

    /// Consumes the assembler and returns the message.
    pub fn into_message(self) -> AssistantMessage {
        self.message
    }

    /// Immutable copy of the current message. Blocks are shared with earlier
    /// snapshots; the next write to a block copies it first.
    pub fn snapshot(&self) -> MessageSnapshot {
        Arc::new(self.message.clone())
    }

    /// True once `done` or `error` has been applied or synthesized.
    pub fn is_terminal(&self) -> bool {
        self.phase == Phase::Terminal
    }

    /// Applies one provider event.
    ///
    /// Returns the canonical event to emit, or `None` when the stream is
    /// already terminal and the event is ignored.
    pub fn apply(
        &mut self,
        event: ProviderEvent,
    ) -> Result<Option<StreamEvent>, ProtocolViolation> {
        let name = event.type_name();
        match self.phase {
            Phase::Terminal => {
                trace!(event = name, "ignoring event after terminal event");
                return Ok(None);
            }
            Phase::NotStarted if !matches!(event, ProviderEvent::Start) => {
                return Err(ProtocolViolation::NotStarted { event: name });
            }
            Phase::NotStarted | Phase::Streaming => {}
        }

        let emitted = match event {
            ProviderEvent::Start => {
                if self.phase == Phase::Streaming {
                    return Err(ProtocolViolation::DuplicateStart);
                }
                self.phase = Phase::Streaming;
                StreamEvent::Start {
                    partial: self.snapshot(),
                }
            }
            ProviderEvent::TextStart { content_index } => {
                self.open_block(name, content_index, OpenBlock::Text, ContentBlock::text(""))?;
                StreamEvent::TextStart {
                    content_index,
                    partial: self.snapshot(),
                }
            }
            ProviderEvent::TextDelta {
                content_index,
                delta,
            } => {
                let position = self.open_position(name, content_index, BlockKind::Text)?;
                if let ContentBlock::Text(block) = self.block_mut(position) {
                    block.text.push_str(&delta);
                }
                StreamEvent::TextDelta {
                    content_index,
                    delta,
                    partial: self.snapshot(),
                }
            }
            ProviderEvent::TextEnd {
                content_index,
                content_signature,
            } => {
                let position = self.open_position(name, content_index, BlockKind::Text)?;
                self.blocks
                    .insert(content_index, BlockStage::Closed(BlockKind::Text));
                if content_signature.is_some()
                    && let ContentBlock::Text(block) = self.block_mut(position)
                {
                    block.text_signature = content_signature;
                }
                let content = self.message.content[position]
                    .as_text()
                    .unwrap_or_default()
                    .to_string();
                StreamEvent::TextEnd {
                    content_index,
                    content,
                    partial: self.snapshot(),
                }
            }
            ProviderEvent::ThinkingStart { content_index } => {
                self.open_block(
                    name,
                    content_index,
                    OpenBlock::Thinking,
                    ContentBlock::thinking(""),
                )?;
                StreamEvent::ThinkingStart {
                    content_index,
                    partial: self.snapshot(),
                }
            }
            ProviderEvent::ThinkingDelta {
                content_index,
                delta,
            } => {
                let position = self.open_position(name, content_index, BlockKind::Thinking)?;
                if let ContentBlock::Thinking(block) = self.block_mut(position) {
                    block.thinking.push_str(&delta);
                }
                StreamEvent::ThinkingDelta {
                    content_index,
                    delta,
                    partial: self.snapshot(),
                }
            }
            ProviderEvent::ThinkingEnd {
                content_index,
                content_signature,
            } => {
                let position = self.open_position(name, content_index, BlockKind::Thinking)?;
                self.blocks
                    .insert(content_index, BlockStage::Closed(BlockKind::Thinking));
                if content_signature.is_some()
                    && let ContentBlock::Thinking(block) = self.block_mut(position)
                {
                    block.thinking_signature = content_signature;
                }
                let content = self.message.content[position]
                    .as_thinking()
                    .unwrap_or_default()
                    .to_string();
                StreamEvent::ThinkingEnd {
                    content_index,
                    content,
                    partial: self.snapshot(),
                }
            }
            ProviderEvent::ToolCallStart {
                content_index,
                id,
                tool_name,
            } => {
                self.open_block(
                    name,
                    content_index,
                    OpenBlock::ToolCall(JsonAccumulator::new()),
                    ContentBlock::tool_call(id, tool_name, serde_json::Map::new()),
                )?;
                StreamEvent::ToolCallStart {
                    content_index,
                    partial: self.snapshot(),
                }
            }
            ProviderEvent::ToolCallDelta {
                content_index,
                delta,
            } => {
                let position = self.open_position(name, content_index, BlockKind::ToolCall)?;
                if let Some(BlockStage::Open(OpenBlock::ToolCall(json))) =
                    self.blocks.get_mut(&content_index)
                {
                    json.push(&delta);
                    if let Some(arguments) = json.object()
                        && let ContentBlock::ToolCall(call) =
                            Arc::make_mut(&mut self.message.content[position])
                    {
                        call.arguments.clone_from(arguments);
                    }
                }
                StreamEvent::ToolCallDelta {
                    content_index,
                    delta,
                    partial: self.snapshot(),
                }
            }
            ProviderEvent::ToolCallEnd { content_index } => {
                let position = self.open_position(name, content_index, BlockKind::ToolCall)?;
                let previous = self
                    .blocks
                    .insert(content_index, BlockStage::Closed(BlockKind::ToolCall));
                let mut tool_call = ToolCall::default();
                if let ContentBlock::ToolCall(call) = self.block_mut(position) {
                    if let Some(BlockStage::Open(OpenBlock::ToolCall(json))) = previous {
                        call.arguments = json.finish();
                    }
                    tool_call.clone_from(call);
                }
                StreamEvent::ToolCallEnd {
                    content_index,
                    tool_call,
                    partial: self.snapshot(),
                }
            }
            ProviderEvent::Done { reason, usage } => {
                self.close_open_blocks();
                self.message.stop_reason = reason.into();
                self.message.usage = self.settle_usage(usage);
                self.phase = Phase::Terminal;
                StreamEvent::Done {
                    reason,
                    message: self.snapshot(),
                }
            }
            ProviderEvent::Error {
                reason,
                error_message,
                usage,
            } => self.terminate(reason, error_message, usage),
        };
        Ok(Some(emitted))
    }

    /// Records usage reported before the terminal event. Ignored once
    /// terminal.
    pub fn record_usage(&mut self, usage: Usage) {
        if self.phase != Phase::Terminal {
            self.message.usage = usage;
        }
    }

    /// Synthesizes `error{aborted}` unless the stream is already terminal.
    pub fn abort(&mut self, message: Option<String>) -> Option<StreamEvent> {
        self.synthesize(ErrorReason::Aborted, message)
    }

    /// Synthesizes `error{error}` unless the stream is already terminal.
    pub fn fail(&mut self, message: impl Into<String>) -> Option<StreamEvent> {
        self.synthesize(ErrorReason::Error, Some(message.into()))
    }

    fn synthesize(&mut self, reason: ErrorReason, message: Option<String>) -> Option<StreamEvent> {
        if self.phase == Phase::Terminal {
            return None;
        }
        // Usage reported so far is the best figure available.
        let usage = self.message.usage;
        Some(self.terminate(reason, message, usage))
    }

    fn terminate(
        &mut self,
        reason: ErrorReason,
        error_message: Option<String>,
        usage: Usage,
    ) -> StreamEvent {
        self.close_open_blocks();
        self.message.stop_reason = reason.into();
        self.message.error_message = Some(error_message.unwrap_or_else(|| {
            match reason {
                ErrorReason::Aborted => ABORTED_MESSAGE,
                ErrorReason::Error => UNKNOWN_ERROR_MESSAGE,
            }
            .to_string()
        }));
        self.message.usage = self.settle_usage(usage);
        self.phase = Phase::Terminal;
        StreamEvent::Error {
            reason,
            error: self.snapshot(),
        }
    }

    fn settle_usage(&self, terminal: Usage) -> Usage {
        let mut usage = self
            .usage_policy
            .resolve(self.message.usage, terminal)
            .with_derived_total();
        if let Some(pricing) = &self.pricing
            && usage.cost == Cost::default()
        {
            usage.calculate_cost(pricing);
        }
        usage
    }

    /// Closes every open block. Tool calls take their final arguments from a
    /// strict parse of their buffer.
    fn close_open_blocks(&mut self) {
        for (position, stage) in self.blocks.values_mut().enumerate() {
            if matches!(stage, BlockStage::Closed(_)) {
                continue;
            }
            let kind = stage.kind();
            let previous = std::mem::replace(stage, BlockStage::Closed(kind));
            if let BlockStage::Open(OpenBlock::ToolCall(json)) = previous
                && let Some(block) = self.message.content.get_mut(position)
                && let ContentBlock::ToolCall(call) = Arc::make_mut(block)
            {
                call.arguments = json.finish();
            }
        }
    }

    fn block_mut(&mut self, position: usize) -> &mut ContentBlock {
        Arc::make_mut(&mut self.message.content[position])
    }

    fn open_block(
        &mut self,
        event: &'static str,
        index: usize,
        open: OpenBlock,
        block: ContentBlock,
    ) -> Result<(), ProtocolViolation> {
        if let Some(existing) = self.blocks.get(&index) {
            return Err(ProtocolViolation::IndexInUse {
                event,
                index,
                existing: existing.kind(),
            });
        }
        let position = self.blocks.range(..index).count();
        self.message.content.insert(position, Arc::new(block));
        self.blocks.insert(index, BlockStage::Open(open));
        Ok(())
    }

    /// Validates that `index` is an open block of `kind` and returns its
    /// position in `message.content`.
    fn open_position(
        &self,
        event: &'static str,
        index: usize,
        kind: BlockKind,
    ) -> Result<usize, ProtocolViolation> {
        match self.blocks.get(&index) {
            None => Err(ProtocolViolation::UnknownBlock { event, index }),
            Some(BlockStage::Closed(_)) => Err(ProtocolViolation::BlockClosed { event, index }),
            Some(BlockStage::Open(open)) if open.kind() != kind => {
                Err(ProtocolViolation::KindMismatch {
                    event,
                    index,
                    actual: open.kind(),
                })
            }
            Some(BlockStage::Open(_)) => Ok(self.blocks.range(..index).count()),
        }
    }
}
