//! Streaming-response normalization for LLM providers.
//!
//! Provider adapters emit a small, closed vocabulary of [`ProviderEvent`]s.
//! The harness reduces them into a single [`AssistantMessage`] and fans the
//! resulting [`StreamEvent`]s out to any number of consumers, each carrying an
//! immutable snapshot of the message so far. Every run ends in exactly one
//! terminal `done` or `error` event; failures, protocol violations, timeouts
//! and aborts all become terminal events rather than panics or hangs.
//!
//! Vendor-specific APIs are namespaced under `vendors::*`.
//!
//! # Builder-first usage (proxy)
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use ai_harness::prelude::*;
//! use ai_harness::vendors::proxy::{ProxyProvider, ProxyRequestOptions, ProxyRunBuilderExt};
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() -> Result<(), HarnessError> {
//! let harness = Harness::builder()
//!     .register_provider(Arc::new(ProxyProvider::from_env()?))
//!     .build()?;
//!
//! let text = harness
//!     .session(SessionConfig::named("demo"))
//!     .run(ModelRef::new("proxy", "claude-sonnet-4"))
//!     .system_prompt("Answer briefly.")
//!     .user_text("Say hello")
//!     .proxy_options(ProxyRequestOptions::default().max_tokens(256))
//!     .collect_text()
//!     .await?;
//!
//! println!("{text}");
//! # Ok(())
//! # }
//! ```

/// Event reducer that rebuilds the assistant message.
pub mod assembler;
/// Input and output content types.
pub mod content;
/// Public error types used by the harness API.
pub mod errors;
/// Multi-consumer event stream with an awaitable result.
pub mod event_stream;
/// Harness entry point and builder.
pub mod harness;
/// Assistant message and stop reasons.
pub mod message;
/// Model and provider identifiers plus generic run options.
pub mod model;
/// Process-wide `tracing` setup.
pub mod observability;
/// Tolerant parsing of streamed JSON fragments.
pub mod partial_json;
/// Common imports for typical usage.
pub mod prelude;
/// Provider adapter contracts used by vendor integrations.
pub mod provider;
/// Run builder, streaming handle, and cancellation handle.
pub mod run;
/// Session configuration and session handle.
pub mod session;
/// Normalized public stream events.
pub mod stream;
/// Token and cost accounting.
pub mod usage;
/// Vendor-specific integrations and extension traits.
pub mod vendors;

pub use assembler::MessageAssembler;
pub use content::{BlockKind, ContentBlock, InputPart, TextContent, ThinkingContent, ToolCall};
pub use errors::{HarnessError, ProtocolViolation, ProviderError, RunFailure, StreamClosed};
pub use event_stream::{
    AssistantMessageEventStream, EventStream, EventSubscription, assistant_message_stream,
};
pub use harness::{Harness, HarnessBuilder};
pub use message::{AssistantMessage, DoneReason, ErrorReason, Role, StopReason};
pub use model::{ModelRef, ProviderId, RunOptions};
pub use partial_json::JsonAccumulator;
pub use provider::{
    ProviderAdapter, ProviderEvent, ProviderEventStream, ProviderRequest, ProviderResponseMeta,
    ProviderStreamHandle, ProviderUpdate,
};
pub use run::{AbortHandle, RunBuilder, RunStream};
pub use session::{Session, SessionConfig};
pub use stream::{MessageSnapshot, StreamEvent};
pub use usage::{Cost, ModelPricing, Usage, UsagePolicy};
