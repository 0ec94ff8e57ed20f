//! Event system for orchestrator components.
//!
//! Every primitive and composite emits typed events through an
//! [`EventListeners`] collection, keeping observability out of the hot path's
//! return types. Listeners are panic-isolated: one misbehaving listener does
//! not prevent the rest from running.

use std::fmt;
use std::sync::Arc;
use std::time::Instant;

/// Trait implemented by each component's event enum.
pub trait OrchestrationEvent: Send + Sync + fmt::Debug {
    /// Short machine-readable kind, e.g. `"state_transition"`.
    fn event_type(&self) -> &'static str;

    /// When the event occurred.
    fn timestamp(&self) -> Instant;

    /// Name of the component instance that emitted the event.
    fn source(&self) -> &str;
}

/// Trait for receiving events.
pub trait EventListener<E: OrchestrationEvent>: Send + Sync {
    /// Called for every emitted event.
    fn on_event(&self, event: &E);
}

/// A collection of listeners for one event type.
#[derive(Clone)]
pub struct EventListeners<E: OrchestrationEvent> {
    listeners: Vec<Arc<dyn EventListener<E>>>,
}

impl<E: OrchestrationEvent> EventListeners<E> {
    /// Creates an empty collection.
    pub fn new() -> Self {
        Self {
            listeners: Vec::new(),
        }
    }

    /// Registers a listener.
    pub fn add<L>(&mut self, listener: L)
    where
        L: EventListener<E> + 'static,
    {
        self.listeners.push(Arc::new(listener));
    }

    /// Emits an event to every listener, isolating panics.
    pub fn emit(&self, event: &E) {
        for listener in &self.listeners {
            let outcome = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
                listener.on_event(event);
            }));
            if outcome.is_err() {
                tracing::warn!(
                    source = event.source(),
                    event_type = event.event_type(),
                    "event listener panicked"
                );
            }
        }
    }

    /// True when no listeners are registered.
    pub fn is_empty(&self) -> bool {
        self.listeners.is_empty()
    }

    /// Number of registered listeners.
    pub fn len(&self) -> usize {
        self.listeners.len()
    }
}

impl<E: OrchestrationEvent> Default for EventListeners<E> {
    fn default() -> Self {
        Self::new()
    }
}

/// Function-based listener.
pub struct FnListener<E, F>
where
    F: Fn(&E) + Send + Sync,
{
    f: F,
    _phantom: std::marker::PhantomData<E>,
}

impl<E, F> FnListener<E, F>
where
    F: Fn(&E) + Send + Sync,
{
    /// Wraps a closure as a listener.
    pub fn new(f: F) -> Self {
        Self {
            f,
            _phantom: std::marker::PhantomData,
        }
    }
}

impl<E, F> EventListener<E> for FnListener<E, F>
where
    E: OrchestrationEvent,
    F: Fn(&E) + Send + Sync,
{
    fn on_event(&self, event: &E) {
        (self.f)(event)
    }
}
