//! Common imports for typical harness usage.
//!
//! Re-exports the builder, runtime and message types most callers touch so
//! examples and application code need fewer import lines.
pub use crate::{
    AbortHandle, AssistantMessage, ContentBlock, Harness, HarnessBuilder, HarnessError, InputPart,
    ModelRef, ProviderId, RunBuilder, RunStream, Session, SessionConfig, StopReason, StreamEvent,
    Usage,
};
