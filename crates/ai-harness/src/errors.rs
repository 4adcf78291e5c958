use crate::content::BlockKind;
use crate::message::{AssistantMessage, StopReason};
use crate::model::ProviderId;

/// Errors returned by a provider adapter before they are normalized into a
/// terminal `error` event.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ProviderError {
    /// Provider returned an application-level failure (HTTP status, auth, etc.).
    #[error("provider error ({provider}): {message}")]
    Provider {
        provider: ProviderId,
        message: String,
        status_code: Option<u16>,
    },
    /// Transport or stream I/O failed.
    #[error("transport error ({provider}): {message}")]
    Transport {
        provider: ProviderId,
        message: String,
    },
    /// Provider response shape or event decoding was invalid.
    #[error("protocol error ({provider}): {message}")]
    Protocol {
        provider: ProviderId,
        message: String,
    },
}

impl ProviderError {
    /// Creates a provider-level error.
    pub fn provider(
        provider: impl Into<ProviderId>,
        message: impl Into<String>,
        status_code: Option<u16>,
    ) -> Self {
        Self::Provider {
            provider: provider.into(),
            message: message.into(),
            status_code,
        }
    }

    /// Creates a transport-level error.
    pub fn transport(provider: impl Into<ProviderId>, message: impl Into<String>) -> Self {
        Self::Transport {
            provider: provider.into(),
            message: message.into(),
        }
    }

    /// Creates a protocol-level error.
    pub fn protocol(provider: impl Into<ProviderId>, message: impl Into<String>) -> Self {
        Self::Protocol {
            provider: provider.into(),
            message: message.into(),
        }
    }

    /// Returns the provider associated with this error.
    pub fn provider_id(&self) -> &ProviderId {
        match self {
            Self::Provider { provider, .. }
            | Self::Transport { provider, .. }
            | Self::Protocol { provider, .. } => provider,
        }
    }

    /// Returns the human-readable message for this error.
    pub fn message(&self) -> &str {
        match self {
            Self::Provider { message, .. }
            | Self::Transport { message, .. }
            | Self::Protocol { message, .. } => message,
        }
    }
}

/// An event that breaks the block or stream lifecycle.
///
/// Fatal to the stream: the producer turns it into a terminal `error` event.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ProtocolViolation {
    #[error("{event} received before start")]
    NotStarted { event: &'static str },
    #[error("duplicate start event")]
    DuplicateStart,
    #[error("{event} for content index {index} which was never started")]
    UnknownBlock { event: &'static str, index: usize },
    #[error("{event} for content index {index} which is already a {existing} block")]
    IndexInUse {
        event: &'static str,
        index: usize,
        existing: BlockKind,
    },
    #[error("{event} for content index {index} which is a {actual} block")]
    KindMismatch {
        event: &'static str,
        index: usize,
        actual: BlockKind,
    },
    #[error("{event} for content index {index} which is already closed")]
    BlockClosed { event: &'static str, index: usize },
}

/// Terminal run failure, derived from a message that ended in `error` or
/// `aborted`.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error, serde::Serialize, serde::Deserialize)]
pub enum RunFailure {
    /// The provider, transport, or event protocol failed.
    #[error("run failed: {message}")]
    Failed { message: String },
    /// The run was cancelled by the caller.
    #[error("run cancelled")]
    Cancelled,
}

impl RunFailure {
    /// Failure described by a finished message, if it did not succeed.
    pub fn from_message(message: &AssistantMessage) -> Option<Self> {
        match message.stop_reason {
            StopReason::Aborted => Some(Self::Cancelled),
            StopReason::Error => Some(Self::Failed {
                message: message
                    .error_message
                    .clone()
                    .unwrap_or_else(|| "unknown error".to_string()),
            }),
            StopReason::Stop | StopReason::Length | StopReason::ToolUse => None,
        }
    }
}

/// Returned by `EventStream::result` when the stream ended without a
/// terminal event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("event stream ended without a terminal event")]
pub struct StreamClosed;

/// Top-level error type for the public harness API.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum HarnessError {
    /// Invalid harness/provider configuration.
    #[error("config error: {0}")]
    Config(String),
    /// Invalid user input to the builder API.
    #[error("validation error: {0}")]
    Validation(String),
    /// Requested provider is not registered in the harness.
    #[error("provider not found: {provider}")]
    ProviderNotFound { provider: ProviderId },
    /// Terminal failure returned from a started run.
    #[error(transparent)]
    RunFailed(RunFailure),
    /// Internal invariant violation.
    #[error("protocol error: {0}")]
    Protocol(String),
}

impl HarnessError {
    pub(crate) fn protocol_msg(message: impl Into<String>) -> Self {
        Self::Protocol(message.into())
    }
}

impl From<RunFailure> for HarnessError {
    fn from(value: RunFailure) -> Self {
        HarnessError::RunFailed(value)
    }
}
