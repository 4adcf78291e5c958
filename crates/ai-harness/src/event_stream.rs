//! Multi-consumer push stream with a separately awaitable final result.
//!
//! One producer pushes events; any number of subscribers read them in push
//! order, each at its own pace. The first terminal event resolves the result
//! and ends every subscription.

use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::task::{Context, Poll};

use tokio::sync::{mpsc, watch};

use crate::errors::StreamClosed;
use crate::message::AssistantMessage;
use crate::stream::StreamEvent;

type TerminalFn<E> = dyn Fn(&E) -> bool + Send + Sync;
type ExtractFn<E, R> = dyn Fn(&E) -> R + Send + Sync;

#[derive(Clone, Debug)]
enum Outcome<R> {
    Pending,
    Resolved(R),
    Closed,
}

struct Shared<E> {
    subscribers: Vec<mpsc::UnboundedSender<E>>,
    terminated: bool,
    ended: bool,
}

struct Inner<E, R> {
    shared: Mutex<Shared<E>>,
    outcome: watch::Sender<Outcome<R>>,
    is_terminal: Box<TerminalFn<E>>,
    extract_result: Box<ExtractFn<E, R>>,
}

/// Cloneable handle to a push stream; every clone refers to the same stream.
pub struct EventStream<E, R> {
    inner: Arc<Inner<E, R>>,
}

impl<E, R> Clone for EventStream<E, R> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<E, R> std::fmt::Debug for EventStream<E, R> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let shared = self.lock();
        f.debug_struct("EventStream")
            .field("subscribers", &shared.subscribers.len())
            .field("terminated", &shared.terminated)
            .field("ended", &shared.ended)
            .finish()
    }
}

impl<E, R> EventStream<E, R>
where
    E: Clone + Send + 'static,
    R: Clone + Send + Sync + 'static,
{
    /// Creates a stream that treats events matching `is_terminal` as final and
    /// derives the result from that event with `extract_result`.
    pub fn new(
        is_terminal: impl Fn(&E) -> bool + Send + Sync + 'static,
        extract_result: impl Fn(&E) -> R + Send + Sync + 'static,
    ) -> Self {
        let (outcome, _) = watch::channel(Outcome::Pending);
        Self {
            inner: Arc::new(Inner {
                shared: Mutex::new(Shared {
                    subscribers: Vec::new(),
                    terminated: false,
                    ended: false,
                }),
                outcome,
                is_terminal: Box::new(is_terminal),
                extract_result: Box::new(extract_result),
            }),
        }
    }

    /// Delivers `event` to every live subscriber. Ignored once the stream has
    /// ended.
    pub fn push(&self, event: E) {
        let mut shared = self.lock();
        if shared.ended {
            return;
        }
        if (self.inner.is_terminal)(&event) {
            let result = (self.inner.extract_result)(&event);
            self.inner.outcome.send_replace(Outcome::Resolved(result));
            shared.terminated = true;
            shared.deliver(event);
            shared.close();
        } else {
            shared.deliver(event);
        }
    }

    /// Subscribes to events pushed from now on.
    ///
    /// Subscribing to an ended stream yields a subscription that is already
    /// finished.
    pub fn subscribe(&self) -> EventSubscription<E> {
        let (tx, rx) = mpsc::unbounded_channel();
        let mut shared = self.lock();
        if !shared.ended {
            shared.subscribers.push(tx);
        }
        EventSubscription { rx }
    }

    /// Ends the stream. Subscribers finish after draining what was already
    /// pushed; without a prior terminal event the result becomes
    /// [`StreamClosed`]. Calling it again does nothing.
    pub fn end(&self) {
        {
            let mut shared = self.lock();
            if shared.ended {
                return;
            }
            shared.close();
        }
        self.inner.outcome.send_if_modified(|outcome| {
            if matches!(outcome, Outcome::Pending) {
                *outcome = Outcome::Closed;
                true
            } else {
                false
            }
        });
    }

    /// Waits for the final result. Independent of whether anyone iterates
    /// the events; may be awaited any number of times.
    pub fn result(&self) -> impl Future<Output = Result<R, StreamClosed>> + Send + 'static {
        let mut rx = self.inner.outcome.subscribe();
        async move {
            let outcome = rx
                .wait_for(|outcome| !matches!(outcome, Outcome::Pending))
                .await
                .map_err(|_| StreamClosed)?;
            match &*outcome {
                Outcome::Resolved(result) => Ok(result.clone()),
                Outcome::Pending | Outcome::Closed => Err(StreamClosed),
            }
        }
    }

    /// True once a terminal event has been pushed.
    pub fn is_terminated(&self) -> bool {
        self.lock().terminated
    }

    /// True once the stream accepts no more events.
    pub fn is_ended(&self) -> bool {
        self.lock().ended
    }
}

impl<E, R> EventStream<E, R> {
    fn lock(&self) -> MutexGuard<'_, Shared<E>> {
        self.inner
            .shared
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }
}

impl<E: Clone> Shared<E> {
    fn deliver(&mut self, event: E) {
        // Dropped subscriptions fall out here.
        self.subscribers
            .retain(|subscriber| subscriber.send(event.clone()).is_ok());
    }

    fn close(&mut self) {
        self.ended = true;
        self.subscribers.clear();
    }
}

/// One consumer's view of an [`EventStream`].
#[derive(Debug)]
pub struct EventSubscription<E> {
    rx: mpsc::UnboundedReceiver<E>,
}

impl<E> EventSubscription<E> {
    /// Waits for the next event; `None` once the stream has ended and every
    /// earlier event was read.
    pub async fn next_event(&mut self) -> Option<E> {
        self.rx.recv().await
    }
}

impl<E> futures::Stream for EventSubscription<E> {
    type Item = E;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<E>> {
        self.rx.poll_recv(cx)
    }
}

/// Event stream of one assistant turn; resolves to the final message.
pub type AssistantMessageEventStream = EventStream<StreamEvent, Arc<AssistantMessage>>;

/// Creates an [`AssistantMessageEventStream`] that resolves on `done` or
/// `error`.
pub fn assistant_message_stream() -> AssistantMessageEventStream {
    EventStream::new(StreamEvent::is_terminal, |event: &StreamEvent| {
        Arc::clone(event.message())
    })
}
