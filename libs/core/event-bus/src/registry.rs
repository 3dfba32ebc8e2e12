//! Handler registration table
//!
//! Built once at start-up and shared read-only (`Arc<HandlerRegistry>`) by
//! every consumer. Registering the same handler twice dispatches it twice.

use async_trait::async_trait;
use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::sync::Arc;

use crate::envelope::ConsumedEvent;
use crate::error::HandlerError;
use crate::kind::EventKind;

#[async_trait]
pub trait EventHandler: Send + Sync {
    async fn handle(&self, event: &ConsumedEvent) -> Result<(), HandlerError>;

    /// Used in logs only
    fn name(&self) -> &str;
}

struct FnHandler<F> {
    name: String,
    handler: F,
}

#[async_trait]
impl<F, Fut> EventHandler for FnHandler<F>
where
    F: Fn(ConsumedEvent) -> Fut + Send + Sync,
    Fut: Future<Output = Result<(), HandlerError>> + Send,
{
    async fn handle(&self, event: &ConsumedEvent) -> Result<(), HandlerError> {
        (self.handler)(event.clone()).await
    }

    fn name(&self) -> &str {
        &self.name
    }
}

/// Wrap an async closure as a handler.
pub fn handler_fn<F, Fut>(name: impl Into<String>, handler: F) -> Arc<dyn EventHandler>
where
    F: Fn(ConsumedEvent) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<(), HandlerError>> + Send + 'static,
{
    Arc::new(FnHandler {
        name: name.into(),
        handler,
    })
}

#[derive(Default, Clone)]
pub struct HandlerRegistry {
    handlers: HashMap<EventKind, Vec<Arc<dyn EventHandler>>>,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append `handler` to the list for `kind`.
    pub fn register(&mut self, kind: EventKind, handler: Arc<dyn EventHandler>) -> &mut Self {
        self.handlers.entry(kind).or_default().push(handler);
        self
    }

    /// Builder form of [`register`](Self::register)
    pub fn on(mut self, kind: EventKind, handler: Arc<dyn EventHandler>) -> Self {
        self.register(kind, handler);
        self
    }

    /// Handlers for `kind`, empty when none are registered.
    pub fn lookup(&self, kind: &EventKind) -> &[Arc<dyn EventHandler>] {
        self.handlers.get(kind).map(Vec::as_slice).unwrap_or_default()
    }

    pub fn kinds(&self) -> impl Iterator<Item = &EventKind> {
        self.handlers.keys()
    }

    /// Number of registrations across all kinds
    pub fn len(&self) -> usize {
        self.handlers.values().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }
}

impl fmt::Debug for HandlerRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut map = f.debug_map();
        for (kind, handlers) in &self.handlers {
            let names: Vec<&str> = handlers.iter().map(|h| h.name()).collect();
            map.entry(&kind.as_str(), &names);
        }
        map.finish()
    }
}
