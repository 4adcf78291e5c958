use std::collections::HashMap;
use std::any::Any;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;

use futures::{FutureExt as _, StreamExt as _};
use tokio::sync::watch;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use crate::assembler::MessageAssembler;
use crate::content::InputPart;
use crate::errors::{HarnessError, RunFailure};
use crate::event_stream::{AssistantMessageEventStream, EventSubscription, assistant_message_stream};
use crate::harness::HarnessInner;
use crate::message::AssistantMessage;
use crate::model::{ModelRef, ProviderId, RunOptions};
use crate::provider::{ProviderAdapter, ProviderRequest, ProviderUpdate};
use crate::session::SessionLedger;
use crate::stream::StreamEvent;
use crate::usage::ModelPricing;

/// Handle used to request cancellation of a running stream.
#[derive(Clone)]
pub struct AbortHandle {
    tx: watch::Sender<bool>,
}

impl AbortHandle {
    /// Requests cancellation.
    ///
    /// The producer drops the provider stream and emits a terminal
    /// `error` event with reason `aborted`, keeping the content received so
    /// far. No effect once the run has finished.
    pub fn abort(&self) {
        self.tx.send_replace(true);
    }
}

/// Builder for configuring and starting a single model run.
///
/// This is the main user-facing API for providing prompts, inputs, and runtime
/// options before either streaming events or collecting a final result.
pub struct RunBuilder {
    harness: Arc<HarnessInner>,
    session_id: uuid::Uuid,
    session_name: String,
    ledger: Arc<SessionLedger>,
    model: ModelRef,
    system_prompt: Option<String>,
    input_parts: Vec<InputPart>,
    options: RunOptions,
    vendor_options: HashMap<ProviderId, serde_json::Value>,
}

impl RunBuilder {
    pub(crate) fn new(
        harness: Arc<HarnessInner>,
        session_id: uuid::Uuid,
        session_name: String,
        ledger: Arc<SessionLedger>,
        model: ModelRef,
    ) -> Self {
        Self {
            harness,
            session_id,
            session_name,
            ledger,
            model,
            system_prompt: None,
            input_parts: Vec::new(),
            options: RunOptions::default(),
            vendor_options: HashMap::new(),
        }
    }

    /// Sets the system prompt for the run.
    pub fn system_prompt(mut self, text: impl Into<String>) -> Self {
        self.system_prompt = Some(text.into());
        self
    }

    /// Appends a plain text user input part.
    pub fn user_text(mut self, text: impl Into<String>) -> Self {
        self.input_parts.push(InputPart::Text(text.into()));
        self
    }

    /// Appends a JSON user input part.
    pub fn user_json(mut self, value: serde_json::Value) -> Result<Self, HarnessError> {
        if value.is_null() {
            return Err(HarnessError::Validation(
                "json input must not be null".into(),
            ));
        }
        self.input_parts.push(InputPart::Json(value));
        Ok(self)
    }

    /// Replaces all input parts with the provided list.
    pub fn input_parts(mut self, parts: Vec<InputPart>) -> Result<Self, HarnessError> {
        self.input_parts = parts;
        Ok(self)
    }

    /// Sets an optional per-run timeout.
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.options.timeout = Some(timeout);
        self
    }

    /// Sets pricing used to compute cost when the provider reports none.
    pub fn pricing(mut self, pricing: ModelPricing) -> Self {
        self.options.pricing = Some(pricing);
        self
    }

    pub(crate) fn set_vendor_options_json(
        mut self,
        provider: ProviderId,
        value: serde_json::Value,
    ) -> Self {
        self.vendor_options.insert(provider, value);
        self
    }

    #[cfg(test)]
    pub(crate) fn vendor_options_value(&self, provider: &ProviderId) -> Option<&serde_json::Value> {
        self.vendor_options.get(provider)
    }

    /// Validates the builder state and starts a streaming run.
    ///
    /// The returned `RunStream` is subscribed before the producer starts, so
    /// it sees every event from `start` to the terminal `done`/`error`.
    pub async fn start_stream(self) -> Result<RunStream, HarnessError> {
        let harness = self.harness.clone();
        let ledger = self.ledger.clone();
        let session_name = self.session_name.clone();
        let request = self.validate_and_build_request()?;
        let provider = harness
            .provider(&request.model.provider)
            .ok_or_else(|| HarnessError::ProviderNotFound {
                provider: request.model.provider.clone(),
            })?;

        let stream = assistant_message_stream();
        let events = stream.subscribe();
        let (abort_tx, abort_rx) = watch::channel(false);

        let run_id = request.run_id;
        let session_id = request.session_id;
        let model = request.model.clone();
        debug!(
            run_id = %run_id,
            session = %session_name,
            provider = %model.provider,
            model = %model.model,
            "starting run"
        );
        tokio::spawn(run_task(
            provider,
            request,
            stream.clone(),
            abort_rx,
            ledger,
        ));

        Ok(RunStream {
            run_id,
            session_id,
            provider: model.provider,
            model: model.model,
            events,
            stream,
            abort_handle: AbortHandle { tx: abort_tx },
        })
    }

    /// Runs to completion and returns the final message, whether it ended in
    /// `done` or `error`.
    pub async fn collect_message(self) -> Result<Arc<AssistantMessage>, HarnessError> {
        let stream = self.start_stream().await?;
        stream.finish().await
    }

    /// Runs to completion and returns the concatenated text content.
    ///
    /// Runs that end in `error` are reported as `HarnessError::RunFailed`.
    pub async fn collect_text(self) -> Result<String, HarnessError> {
        let message = self.collect_message().await?;
        if let Some(failure) = RunFailure::from_message(&message) {
            return Err(failure.into());
        }
        Ok(message.text())
    }

    fn validate_and_build_request(self) -> Result<ProviderRequest, HarnessError> {
        if self.model.provider.as_str().trim().is_empty() {
            return Err(HarnessError::Validation(
                "model provider must not be empty".into(),
            ));
        }
        if self.model.model.trim().is_empty() {
            return Err(HarnessError::Validation("model must not be empty".into()));
        }
        if self.options.timeout.is_some_and(|timeout| timeout.is_zero()) {
            return Err(HarnessError::Validation(
                "timeout must be greater than 0".into(),
            ));
        }
        if self.input_parts.is_empty() {
            return Err(HarnessError::Validation(
                "at least one input part is required".into(),
            ));
        }
        for part in &self.input_parts {
            if let InputPart::Text(text) = part
                && text.trim().is_empty()
            {
                return Err(HarnessError::Validation(
                    "text input must not be empty".into(),
                ));
            }
        }

        Ok(ProviderRequest {
            run_id: uuid::Uuid::new_v4(),
            session_id: self.session_id,
            model: self.model,
            system_prompt: self.system_prompt.filter(|s| !s.trim().is_empty()),
            input_parts: self.input_parts,
            options: self.options,
            vendor_options: self.vendor_options,
        })
    }
}

/// Streaming handle returned by `RunBuilder::start_stream`.
///
/// Use `next_event()` (or the `Stream` impl) to consume events as they arrive
/// and `finish()`/`result()` for the final message. The result does not
/// depend on the events being read.
pub struct RunStream {
    run_id: uuid::Uuid,
    session_id: uuid::Uuid,
    provider: ProviderId,
    model: String,
    events: EventSubscription<StreamEvent>,
    stream: AssistantMessageEventStream,
    abort_handle: AbortHandle,
}

impl RunStream {
    /// Returns the run id for this stream.
    pub fn run_id(&self) -> uuid::Uuid {
        self.run_id
    }

    /// Returns the session id that owns this run.
    pub fn session_id(&self) -> uuid::Uuid {
        self.session_id
    }

    /// Returns a handle that can cancel the run.
    pub fn abort_handle(&self) -> AbortHandle {
        self.abort_handle.clone()
    }

    /// Waits for and returns the next stream event.
    ///
    /// Returns `None` after the terminal event has been read.
    pub async fn next_event(&mut self) -> Option<StreamEvent> {
        self.events.next_event().await
    }

    /// Adds another consumer. It sees events pushed from now on.
    pub fn subscribe(&self) -> EventSubscription<StreamEvent> {
        self.stream.subscribe()
    }

    /// Resolves to the final message once the terminal event is pushed.
    ///
    /// Can be awaited from another task while this handle keeps reading
    /// events.
    pub fn result(
        &self,
    ) -> impl Future<Output = Result<Arc<AssistantMessage>, HarnessError>> + Send + 'static {
        let result = self.stream.result();
        let context = format!("provider={}, model={}", self.provider, self.model);
        async move {
            result.await.map_err(|_| {
                HarnessError::protocol_msg(format!(
                    "run task ended without final message ({context})"
                ))
            })
        }
    }

    /// Waits for the final message, dropping any unread events.
    pub async fn finish(self) -> Result<Arc<AssistantMessage>, HarnessError> {
        self.result().await
    }
}

impl futures::Stream for RunStream {
    type Item = StreamEvent;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<StreamEvent>> {
        Pin::new(&mut self.events).poll_next(cx)
    }
}

#[derive(Clone, Copy, Debug)]
struct Deadline {
    limit: Duration,
    at: Instant,
}

impl Deadline {
    fn after(limit: Duration) -> Self {
        Self {
            limit,
            at: Instant::now() + limit,
        }
    }
}

/// Ends the event stream when the producer task goes away, whether it
/// returns, panics or is dropped with the runtime.
struct EndOnDrop(AssistantMessageEventStream);

impl Drop for EndOnDrop {
    fn drop(&mut self) {
        self.0.end();
    }
}

/// Why the provider loop stopped.
enum Ending {
    /// The provider sent `done` or `error`.
    Terminal(StreamEvent),
    Aborted,
    TimedOut(Duration),
    Failed(String),
}

async fn run_task(
    provider: Arc<dyn ProviderAdapter>,
    request: ProviderRequest,
    stream: AssistantMessageEventStream,
    mut abort_rx: watch::Receiver<bool>,
    ledger: Arc<SessionLedger>,
) {
    let stream = EndOnDrop(stream);
    let run_id = request.run_id;
    let provider_id = request.model.provider.clone();
    let model_name = request.model.model.clone();
    let deadline = request.options.timeout.map(Deadline::after);

    let message = AssistantMessage::new(
        request.model.api.clone().unwrap_or_default(),
        provider_id.as_str(),
        model_name.clone(),
    );
    let mut assembler = MessageAssembler::new(message)
        .with_usage_policy(provider.usage_policy())
        .with_pricing(request.options.pricing);

    let ending = AssertUnwindSafe(drive(
        provider.as_ref(),
        request,
        &mut assembler,
        &stream.0,
        &mut abort_rx,
        deadline,
    ))
    .catch_unwind()
    .await
    .unwrap_or_else(|panic| {
        let reason = panic_message(panic.as_ref());
        error!(run_id = %run_id, provider = %provider_id, panic = reason, "run task panicked");
        Ending::Failed(format!("run task panicked: {reason}"))
    });

    let terminal = match ending {
        Ending::Terminal(event) => Some(event),
        Ending::Aborted => assembler.abort(None),
        Ending::TimedOut(limit) => {
            assembler.fail(format!("run timed out after {}ms", limit.as_millis()))
        }
        Ending::Failed(message) => assembler.fail(message),
    };

    let message = assembler.message();
    // Totals are visible before anyone can observe the result.
    ledger.record(&message.usage);
    info!(
        run_id = %run_id,
        provider = %provider_id,
        model = %model_name,
        stop_reason = ?message.stop_reason,
        input_tokens = message.usage.input,
        output_tokens = message.usage.output,
        error = message.error_message.as_deref().unwrap_or(""),
        "run finished"
    );
    if let Some(event) = terminal {
        stream.0.push(event);
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> &str {
    payload
        .downcast_ref::<&str>()
        .copied()
        .or_else(|| payload.downcast_ref::<String>().map(String::as_str))
        .unwrap_or("unknown panic")
}

async fn drive(
    provider: &dyn ProviderAdapter,
    request: ProviderRequest,
    assembler: &mut MessageAssembler,
    stream: &AssistantMessageEventStream,
    abort_rx: &mut watch::Receiver<bool>,
    deadline: Option<Deadline>,
) -> Ending {
    let run_id = request.run_id;
    let provider_id = request.model.provider.clone();

    let started = tokio::select! {
        biased;
        () = aborted(abort_rx) => return Ending::Aborted,
        limit = expired(deadline) => return Ending::TimedOut(limit),
        started = provider.start_stream(request) => started,
    };
    let mut handle = match started {
        Ok(handle) => handle,
        Err(err) => {
            warn!(run_id = %run_id, provider = %provider_id, error = %err, "provider failed to start stream");
            return Ending::Failed(err.message().to_string());
        }
    };
    if let Some(api) = handle.metadata.api.take() {
        assembler.set_api(api);
    }
    debug!(
        run_id = %run_id,
        provider = %provider_id,
        request_id = handle.metadata.request_id.as_deref().unwrap_or(""),
        "provider stream opened"
    );

    // Returning drops `handle.stream`, which cancels the transport.
    loop {
        let next = tokio::select! {
            biased;
            () = aborted(abort_rx) => return Ending::Aborted,
            limit = expired(deadline) => return Ending::TimedOut(limit),
            next = handle.stream.next() => next,
        };
        match next {
            Some(Ok(ProviderUpdate::Usage(usage))) => assembler.record_usage(usage),
            Some(Ok(ProviderUpdate::Event(event))) => {
                let event_type = event.type_name();
                let terminal = event.is_terminal();
                let block = event.block();
                match assembler.apply(event) {
                    Ok(Some(emitted)) if terminal => {
                        return Ending::Terminal(emitted);
                    }
                    Ok(Some(emitted)) => {
                        debug!(
                            run_id = %run_id,
                            provider = %provider_id,
                            event = event_type,
                            content_index = ?block.map(|(index, _)| index),
                            block_kind = ?block.map(|(_, kind)| kind),
                            "stream event"
                        );
                        stream.push(emitted);
                    }
                    Ok(None) => {}
                    Err(violation) => {
                        warn!(run_id = %run_id, provider = %provider_id, %violation, "provider protocol violation");
                        return Ending::Failed(violation.to_string());
                    }
                }
            }
            Some(Err(err)) => {
                warn!(run_id = %run_id, provider = %provider_id, error = %err, "provider stream failed");
                return Ending::Failed(err.message().to_string());
            }
            None => {
                return Ending::Failed(format!(
                    "provider stream ended without a terminal event ({provider_id})"
                ));
            }
        }
    }
}

async fn aborted(abort_rx: &mut watch::Receiver<bool>) {
    if abort_rx.wait_for(|aborted| *aborted).await.is_err() {
        // Every abort handle is gone, so nothing can abort any more.
        std::future::pending::<()>().await;
    }
}

async fn expired(deadline: Option<Deadline>) -> Duration {
    match deadline {
        Some(deadline) => {
            tokio::time::sleep_until(deadline.at).await;
            deadline.limit
        }
        None => std::future::pending().await,
    }
}
