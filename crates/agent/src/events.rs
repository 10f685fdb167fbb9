//! Typed agent events and the subscription bus
//!
//! Each event kind has its own payload type. Handlers subscribe to one
//! payload type and receive only events of that kind.

use crate::state::AgentStatus;
use crate::tools::Params;
use chrono::{DateTime, Local};
use notewright_provider::Message;
use std::collections::HashMap;
use std::fmt;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use tracing::error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    StatusChange,
    Message,
    ToolCall,
    Error,
}

impl EventKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventKind::StatusChange => "status_change",
            EventKind::Message => "message",
            EventKind::ToolCall => "tool_call",
            EventKind::Error => "error",
        }
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct StatusChanged {
    pub previous: AgentStatus,
    pub current: AgentStatus,
    pub timestamp: DateTime<Local>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct MessageAdded {
    pub message: Message,
    pub timestamp: DateTime<Local>,
}

/// A tool call is waiting for the user's decision
#[derive(Debug, Clone, PartialEq)]
pub struct ToolCallPending {
    pub name: String,
    pub params: Params,
    pub timestamp: DateTime<Local>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ErrorRaised {
    pub error: String,
    pub timestamp: DateTime<Local>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum AgentEvent {
    StatusChange(StatusChanged),
    Message(MessageAdded),
    ToolCall(ToolCallPending),
    Error(ErrorRaised),
}

impl AgentEvent {
    pub fn kind(&self) -> EventKind {
        match self {
            AgentEvent::StatusChange(_) => EventKind::StatusChange,
            AgentEvent::Message(_) => EventKind::Message,
            AgentEvent::ToolCall(_) => EventKind::ToolCall,
            AgentEvent::Error(_) => EventKind::Error,
        }
    }

    pub fn timestamp(&self) -> DateTime<Local> {
        match self {
            AgentEvent::StatusChange(e) => e.timestamp,
            AgentEvent::Message(e) => e.timestamp,
            AgentEvent::ToolCall(e) => e.timestamp,
            AgentEvent::Error(e) => e.timestamp,
        }
    }
}

/// Payload types a handler can subscribe to
pub trait EventPayload: Send + Sync + 'static {
    const KIND: EventKind;

    fn from_event(event: &AgentEvent) -> Option<&Self>;
}

macro_rules! event_payload {
    ($payload:ty, $variant:ident) => {
        impl EventPayload for $payload {
            const KIND: EventKind = EventKind::$variant;

            fn from_event(event: &AgentEvent) -> Option<&Self> {
                match event {
                    AgentEvent::$variant(inner) => Some(inner),
                    _ => None,
                }
            }
        }

        impl From<$payload> for AgentEvent {
            fn from(payload: $payload) -> Self {
                AgentEvent::$variant(payload)
            }
        }
    };
}

event_payload!(StatusChanged, StatusChange);
event_payload!(MessageAdded, Message);
event_payload!(ToolCallPending, ToolCall);
event_payload!(ErrorRaised, Error);

type Handler = Arc<dyn Fn(&AgentEvent) + Send + Sync>;

#[derive(Default)]
pub(crate) struct EventBus {
    next_id: AtomicU64,
    handlers: Mutex<HashMap<EventKind, Vec<(u64, Handler)>>>,
}

impl EventBus {
    fn handlers(&self) -> MutexGuard<'_, HashMap<EventKind, Vec<(u64, Handler)>>> {
        self.handlers.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub(crate) fn subscribe<E, F>(self: &Arc<Self>, handler: F) -> Subscription
    where
        E: EventPayload,
        F: Fn(&E) + Send + Sync + 'static,
    {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let wrapped: Handler = Arc::new(move |event: &AgentEvent| {
            if let Some(payload) = E::from_event(event) {
                handler(payload);
            }
        });
        self.handlers().entry(E::KIND).or_default().push((id, wrapped));

        Subscription {
            id,
            kind: E::KIND,
            bus: Arc::downgrade(self),
        }
    }

    fn remove(&self, kind: EventKind, id: u64) {
        if let Some(list) = self.handlers().get_mut(&kind) {
            list.retain(|(handler_id, _)| *handler_id != id);
        }
    }

    /// Deliver to every handler of the event's kind.
    ///
    /// Handlers run outside the registry lock; a panicking handler is logged
    /// and does not stop delivery to the rest.
    pub(crate) fn emit(&self, event: AgentEvent) {
        let kind = event.kind();
        let handlers: Vec<Handler> = self
            .handlers()
            .get(&kind)
            .map(|list| list.iter().map(|(_, h)| Arc::clone(h)).collect())
            .unwrap_or_default();

        for handler in handlers {
            if let Err(panic) = catch_unwind(AssertUnwindSafe(|| handler(&event))) {
                error!(
                    "◆ EVENT HANDLER FAILED ON {}: {}",
                    kind,
                    crate::panic_message(panic.as_ref())
                );
            }
        }
    }

    #[cfg(test)]
    fn handler_count(&self, kind: EventKind) -> usize {
        self.handlers().get(&kind).map(Vec::len).unwrap_or(0)
    }
}

/// Handle returned by `on`; dropping it keeps the handler registered
#[must_use = "keep the subscription to be able to unsubscribe"]
pub struct Subscription {
    id: u64,
    kind: EventKind,
    bus: Weak<EventBus>,
}

impl Subscription {
    pub fn kind(&self) -> EventKind {
        self.kind
    }

    pub fn unsubscribe(self) {
        if let Some(bus) = self.bus.upgrade() {
            bus.remove(self.kind, self.id);
        }
    }
}

impl fmt::Debug for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription")
            .field("id", &self.id)
            .field("kind", &self.kind)
            .finish()
    }
}
