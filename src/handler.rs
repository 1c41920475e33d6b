//! Per-type event handler dispatch
//!
//! Consumers register one handler per event type; the pipeline routes each
//! decoded event to its handler. New event types register a new handler
//! instead of growing a branching chain.

use crate::error::Result;
use crate::types::{Event, EventType};
use async_trait::async_trait;
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;

/// Trait for event-type handlers
///
/// `handle` is wrapped in the pipeline's retry policy; return an error to
/// request a retry, and expect the call again after a backoff.
#[async_trait]
pub trait EventHandler: Send + Sync {
    /// Process one event
    async fn handle(&self, event: &Event) -> Result<()>;

    /// The event type this handler accepts
    fn event_type(&self) -> EventType;
}

/// Mapping from event type to its handler
#[derive(Default, Clone)]
pub struct HandlerRegistry {
    handlers: HashMap<EventType, Arc<dyn EventHandler>>,
}

impl HandlerRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a handler under its declared event type
    ///
    /// Replaces any handler previously registered for the same type.
    pub fn register(&mut self, handler: Arc<dyn EventHandler>) {
        self.handlers.insert(handler.event_type(), handler);
    }

    /// Look up the handler for an event type
    pub fn get(&self, event_type: EventType) -> Option<Arc<dyn EventHandler>> {
        self.handlers.get(&event_type).cloned()
    }

    /// Whether a handler is registered for the given type
    pub fn contains(&self, event_type: EventType) -> bool {
        self.handlers.contains_key(&event_type)
    }

    /// Event types with a registered handler
    pub fn supported_types(&self) -> Vec<EventType> {
        self.handlers.keys().copied().collect()
    }

    /// Number of registered handlers
    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    /// Whether the registry is empty
    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }
}

type HandlerFn =
    Box<dyn Fn(Event) -> futures::future::BoxFuture<'static, Result<()>> + Send + Sync>;

/// Adapter turning an async closure into an `EventHandler`
pub struct FnHandler {
    event_type: EventType,
    func: HandlerFn,
}

impl FnHandler {
    /// Wrap an async closure as a handler for `event_type`
    pub fn new<F, Fut>(event_type: EventType, func: F) -> Self
    where
        F: Fn(Event) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<()>> + Send + 'static,
    {
        Self {
            event_type,
            func: Box::new(move |event| Box::pin(func(event))),
        }
    }
}

#[async_trait]
impl EventHandler for FnHandler {
    async fn handle(&self, event: &Event) -> Result<()> {
        (self.func)(event.clone()).await
    }

    fn event_type(&self) -> EventType {
        self.event_type
    }
}
