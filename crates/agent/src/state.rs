//! Task state and its single owner

use crate::events::{
    AgentEvent, ErrorRaised, EventBus, EventPayload, MessageAdded, StatusChanged, Subscription,
    ToolCallPending,
};
use crate::tools::ToolCall;
use chrono::Local;
use notewright_provider::Message;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tracing::debug;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum AgentStatus {
    #[default]
    Idle,
    Running,
    WaitingApproval,
    Completed,
    Error,
    Aborted,
}

impl AgentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            AgentStatus::Idle => "idle",
            AgentStatus::Running => "running",
            AgentStatus::WaitingApproval => "waiting_approval",
            AgentStatus::Completed => "completed",
            AgentStatus::Error => "error",
            AgentStatus::Aborted => "aborted",
        }
    }

    /// Completed, failed or aborted
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            AgentStatus::Completed | AgentStatus::Error | AgentStatus::Aborted
        )
    }
}

impl fmt::Display for AgentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AgentState {
    pub status: AgentStatus,
    pub messages: Vec<Message>,
    pub current_task: Option<String>,
    pub task_id: Option<Uuid>,
    pub pending_tool: Option<ToolCall>,
    /// Turns in a row that produced no usable tool call
    pub consecutive_errors: u32,
    /// Model calls in a row that failed at the transport level
    pub provider_failures: u32,
    pub last_error: Option<String>,
}

/// Owns the [`AgentState`] and publishes every change as an event.
///
/// Readers always get copies. Events are emitted after the state lock is
/// released, so handlers may read state or call back into the owner.
pub struct StateManager {
    state: Mutex<AgentState>,
    events: Arc<EventBus>,
}

impl StateManager {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(AgentState::default()),
            events: Arc::new(EventBus::default()),
        }
    }

    fn lock(&self) -> MutexGuard<'_, AgentState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Snapshot of the whole state
    pub fn state(&self) -> AgentState {
        self.lock().clone()
    }

    pub fn status(&self) -> AgentStatus {
        self.lock().status
    }

    pub fn messages(&self) -> Vec<Message> {
        self.lock().messages.clone()
    }

    pub fn pending_tool(&self) -> Option<ToolCall> {
        self.lock().pending_tool.clone()
    }

    pub fn consecutive_errors(&self) -> u32 {
        self.lock().consecutive_errors
    }

    pub fn on<E, F>(&self, handler: F) -> Subscription
    where
        E: EventPayload,
        F: Fn(&E) + Send + Sync + 'static,
    {
        self.events.subscribe::<E, F>(handler)
    }

    fn emit(&self, event: impl Into<AgentEvent>) {
        self.events.emit(event.into());
    }

    pub fn set_status(&self, status: AgentStatus) {
        let previous = {
            let mut state = self.lock();
            std::mem::replace(&mut state.status, status)
        };
        if previous == status {
            return;
        }

        debug!("◆ STATUS {} -> {}", previous, status);
        self.emit(StatusChanged {
            previous,
            current: status,
            timestamp: Local::now(),
        });
    }

    /// Move from `from` to `to` only if the status is still `from`
    pub fn transition(&self, from: AgentStatus, to: AgentStatus) -> bool {
        {
            let mut state = self.lock();
            if state.status != from || from == to {
                return false;
            }
            state.status = to;
        }

        debug!("◆ STATUS {} -> {}", from, to);
        self.emit(StatusChanged {
            previous: from,
            current: to,
            timestamp: Local::now(),
        });
        true
    }

    /// Enter a terminal status unless the task already reached one.
    /// Returns false when the status was left alone.
    pub fn finish(&self, status: AgentStatus) -> bool {
        let previous = {
            let mut state = self.lock();
            if state.status.is_terminal() {
                return false;
            }
            std::mem::replace(&mut state.status, status)
        };

        debug!("◆ STATUS {} -> {}", previous, status);
        self.emit(StatusChanged {
            previous,
            current: status,
            timestamp: Local::now(),
        });
        true
    }

    /// Start bookkeeping for a new task: fresh id, counters and error cleared.
    /// History is left alone.
    pub fn begin_task(&self, instruction: &str) -> Uuid {
        let id = Uuid::new_v4();
        let mut state = self.lock();
        state.current_task = Some(instruction.to_string());
        state.task_id = Some(id);
        state.consecutive_errors = 0;
        state.provider_failures = 0;
        state.last_error = None;
        state.pending_tool = None;
        id
    }

    pub fn add_message(&self, message: Message) {
        self.lock().messages.push(message.clone());
        self.emit(MessageAdded {
            message,
            timestamp: Local::now(),
        });
    }

    /// Replace the whole history without emitting events (session restore)
    pub fn set_messages(&self, messages: Vec<Message>) {
        self.lock().messages = messages;
    }

    pub fn set_pending_tool(&self, tool: Option<ToolCall>) {
        self.lock().pending_tool = tool.clone();
        if let Some(tool) = tool {
            self.emit(ToolCallPending {
                name: tool.name,
                params: tool.params,
                timestamp: Local::now(),
            });
        }
    }

    /// Returns the new count
    pub fn increment_errors(&self) -> u32 {
        let mut state = self.lock();
        state.consecutive_errors += 1;
        state.consecutive_errors
    }

    pub fn reset_errors(&self) {
        self.lock().consecutive_errors = 0;
    }

    /// Returns the new count
    pub fn increment_provider_failures(&self) -> u32 {
        let mut state = self.lock();
        state.provider_failures += 1;
        state.provider_failures
    }

    pub fn reset_provider_failures(&self) {
        self.lock().provider_failures = 0;
    }

    pub fn set_error(&self, error: Option<String>) {
        self.lock().last_error = error.clone();
        if let Some(error) = error {
            self.emit(ErrorRaised {
                error,
                timestamp: Local::now(),
            });
        }
    }
}

impl Default for StateManager {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn test_new_state_is_idle() {
        let manager = StateManager::new();
        let state = manager.state();
        assert_eq!(state.status, AgentStatus::Idle);
        assert!(state.messages.is_empty());
        assert!(state.pending_tool.is_none());
        assert_eq!(state.consecutive_errors, 0);
    }

    #[test]
    fn test_snapshot_is_a_copy() {
        let manager = StateManager::new();
        manager.add_message(Message::user("one"));
        let mut snapshot = manager.state();
        snapshot.messages.push(Message::user("two"));
        assert_eq!(manager.messages().len(), 1);
    }

    #[test]
    fn test_status_event_only_on_change() {
        let manager = StateManager::new();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let _sub = manager.on::<StatusChanged, _>(move |e| {
            sink.lock().unwrap().push((e.previous, e.current));
        });

        manager.set_status(AgentStatus::Running);
        manager.set_status(AgentStatus::Running);
        manager.set_status(AgentStatus::Completed);

        assert_eq!(
            *seen.lock().unwrap(),
            vec![
                (AgentStatus::Idle, AgentStatus::Running),
                (AgentStatus::Running, AgentStatus::Completed)
            ]
        );
    }

    #[test]
    fn test_finish_keeps_first_terminal_status() {
        let manager = StateManager::new();
        manager.set_status(AgentStatus::Running);

        assert!(manager.finish(AgentStatus::Aborted));
        assert!(!manager.finish(AgentStatus::Completed));
        assert!(!manager.finish(AgentStatus::Error));
        assert_eq!(manager.status(), AgentStatus::Aborted);

        manager.set_status(AgentStatus::Running);
        assert!(manager.finish(AgentStatus::Completed));
    }

    #[test]
    fn test_transition_checks_current_status() {
        let manager = StateManager::new();
        manager.set_status(AgentStatus::Running);
        assert!(manager.transition(AgentStatus::Running, AgentStatus::WaitingApproval));
        assert!(manager.transition(AgentStatus::WaitingApproval, AgentStatus::Running));

        manager.finish(AgentStatus::Aborted);
        assert!(!manager.transition(AgentStatus::WaitingApproval, AgentStatus::Running));
        assert!(!manager.transition(AgentStatus::Running, AgentStatus::WaitingApproval));
        assert_eq!(manager.status(), AgentStatus::Aborted);
    }

    #[test]
    fn test_set_messages_is_silent() {
        let manager = StateManager::new();
        let count = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&count);
        let _sub = manager.on::<MessageAdded, _>(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        manager.set_messages(vec![Message::system("s"), Message::user("u")]);
        assert_eq!(count.load(Ordering::SeqCst), 0);

        manager.add_message(Message::assistant("a"));
        assert_eq!(count.load(Ordering::SeqCst), 1);
        assert_eq!(manager.messages().len(), 3);
    }

    #[test]
    fn test_pending_tool_event_skips_none() {
        let manager = StateManager::new();
        let names = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&names);
        let _sub = manager.on::<ToolCallPending, _>(move |e| {
            sink.lock().unwrap().push(e.name.clone());
        });

        manager.set_pending_tool(Some(ToolCall::new("delete_note", Default::default())));
        assert!(manager.pending_tool().is_some());
        manager.set_pending_tool(None);
        assert!(manager.pending_tool().is_none());

        assert_eq!(*names.lock().unwrap(), vec!["delete_note".to_string()]);
    }

    #[test]
    fn test_error_counters() {
        let manager = StateManager::new();
        assert_eq!(manager.increment_errors(), 1);
        assert_eq!(manager.increment_errors(), 2);
        manager.reset_errors();
        assert_eq!(manager.consecutive_errors(), 0);

        assert_eq!(manager.increment_provider_failures(), 1);
        manager.reset_provider_failures();
        assert_eq!(manager.state().provider_failures, 0);
    }

    #[test]
    fn test_set_error_emits_only_for_some() {
        let manager = StateManager::new();
        let count = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&count);
        let _sub = manager.on::<ErrorRaised, _>(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        manager.set_error(Some("boom".to_string()));
        manager.set_error(None);

        assert_eq!(count.load(Ordering::SeqCst), 1);
        assert!(manager.state().last_error.is_none());
    }

    #[test]
    fn test_begin_task_keeps_history() {
        let manager = StateManager::new();
        manager.add_message(Message::system("s"));
        manager.increment_errors();
        manager.set_error(Some("old".to_string()));

        let id = manager.begin_task("tidy up");
        let state = manager.state();
        assert_eq!(state.task_id, Some(id));
        assert_eq!(state.current_task.as_deref(), Some("tidy up"));
        assert_eq!(state.consecutive_errors, 0);
        assert!(state.last_error.is_none());
        assert_eq!(state.messages.len(), 1);
    }

    #[test]
    fn test_handler_can_read_state() {
        let manager = Arc::new(StateManager::new());
        let observed = Arc::new(Mutex::new(None));
        let sink = Arc::clone(&observed);
        let weak = Arc::downgrade(&manager);
        let _sub = manager.on::<StatusChanged, _>(move |_| {
            if let Some(manager) = weak.upgrade() {
                *sink.lock().unwrap() = Some(manager.status());
            }
        });

        manager.set_status(AgentStatus::Running);
        assert_eq!(*observed.lock().unwrap(), Some(AgentStatus::Running));
    }

    #[test]
    fn test_status_strings() {
        assert_eq!(AgentStatus::WaitingApproval.to_string(), "waiting_approval");
        assert!(AgentStatus::Aborted.is_terminal());
        assert!(!AgentStatus::Idle.is_terminal());
        let json = serde_json::to_string(&AgentStatus::WaitingApproval).unwrap();
        assert_eq!(json, "\"waiting_approval\"");
    }
}
