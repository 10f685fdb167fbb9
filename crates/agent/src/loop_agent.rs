//! Agent loop - the task state machine
//!
//! `idle → running → {waiting_approval ⇄ running} → completed | error | aborted`
//!
//! One task runs at a time per loop. The loop is driven through `&self`, so
//! it can be shared behind an `Arc` while another task calls [`AgentLoop::abort`]
//! or [`AgentLoop::approve_tool_call`].

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};
use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use notewright_config::Config;
use notewright_provider::{ChatParams, ChatResponse, Message, Provider, Role};

use crate::context::{build_user_content, trim_history, TaskContext, DEFAULT_CONTEXT_MESSAGES};
use crate::events::{EventPayload, Subscription};
use crate::modes::Mode;
use crate::parser::{
    error_retry_prompt, format_tool_result, ignored_tools_message, no_tool_used_prompt,
    parse_response_with, rejected_tool_message, unknown_tools_prompt,
};
use crate::prompt::PromptBuilder;
use crate::state::{AgentState, AgentStatus, StateManager};
use crate::tools::{
    AttemptCompletionTool, ToolCall, ToolContext, ToolRegistry, ToolResult, COMPLETION_TOOL,
    DEFAULT_TOOL_TIMEOUT,
};
use crate::{AgentError, Result};

/// Loop tuning
#[derive(Debug, Clone)]
pub struct AgentSettings {
    /// Empty uses the provider's default model
    pub model: String,
    pub max_tokens: u32,
    pub temperature: f32,
    /// Threshold for both the no-tool counter and the transport failure counter
    pub max_consecutive_errors: u32,
    /// In-place retries of a retryable provider error within one turn
    pub max_provider_retries: u32,
    pub retry_base_delay: Duration,
    /// `None` waits for the user indefinitely
    pub approval_timeout: Option<Duration>,
    pub tool_timeout: Duration,
    pub max_context_messages: usize,
    /// Run every tool without asking
    pub auto_approve: bool,
    pub mode: Mode,
}

impl Default for AgentSettings {
    fn default() -> Self {
        Self {
            model: String::new(),
            max_tokens: 4096,
            temperature: 0.7,
            max_consecutive_errors: 3,
            max_provider_retries: 3,
            retry_base_delay: Duration::from_secs(1),
            approval_timeout: Some(Duration::from_secs(300)),
            tool_timeout: DEFAULT_TOOL_TIMEOUT,
            max_context_messages: DEFAULT_CONTEXT_MESSAGES,
            auto_approve: false,
            mode: Mode::default(),
        }
    }
}

impl AgentSettings {
    pub fn from_config(config: &Config) -> Self {
        let agent = &config.agent;
        let mode = agent.default_mode.parse::<Mode>().unwrap_or_else(|e| {
            warn!("◆ {}; FALLING BACK TO EDITOR", e);
            Mode::default()
        });

        Self {
            model: agent.model.clone(),
            max_tokens: agent.max_tokens,
            temperature: agent.temperature,
            max_consecutive_errors: agent.max_consecutive_errors.max(1),
            max_provider_retries: agent.max_provider_retries,
            approval_timeout: (agent.approval_timeout_secs > 0)
                .then(|| Duration::from_secs(agent.approval_timeout_secs)),
            tool_timeout: Duration::from_secs(agent.tool_timeout_secs.max(1)),
            max_context_messages: agent.max_context_messages,
            auto_approve: agent.auto_approve,
            mode,
            ..Self::default()
        }
    }
}

enum Turn {
    Continue,
    Finished,
}

/// Orchestrates model calls, tool execution and approvals for one task at a time
pub struct AgentLoop<P: Provider> {
    provider: Arc<P>,
    state: StateManager,
    prompt: Mutex<PromptBuilder>,
    tools: ToolRegistry,
    settings: AgentSettings,
    cancel: Mutex<Option<CancellationToken>>,
    approval: Mutex<Option<oneshot::Sender<bool>>>,
    /// Held for the whole of a task run
    running: tokio::sync::Mutex<()>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl<P: Provider> AgentLoop<P> {
    /// `attempt_completion` is registered if the registry lacks it
    pub fn new(provider: P, mut tools: ToolRegistry, settings: AgentSettings) -> Self {
        if !tools.has(COMPLETION_TOOL) {
            tools.register(AttemptCompletionTool);
        }
        tools.set_timeout(settings.tool_timeout);
        let prompt = PromptBuilder::new(tools.definitions()).with_mode(settings.mode.clone());

        Self {
            provider: Arc::new(provider),
            state: StateManager::new(),
            prompt: Mutex::new(prompt),
            tools,
            settings,
            cancel: Mutex::new(None),
            approval: Mutex::new(None),
            running: tokio::sync::Mutex::new(()),
        }
    }

    /// Loop over the built-in note tools
    pub fn with_note_tools(provider: P, settings: AgentSettings) -> Self {
        Self::new(provider, ToolRegistry::with_note_tools(), settings)
    }

    pub fn state(&self) -> AgentState {
        self.state.state()
    }

    pub fn status(&self) -> AgentStatus {
        self.state.status()
    }

    pub fn tools(&self) -> &ToolRegistry {
        &self.tools
    }

    pub fn on<E, F>(&self, handler: F) -> Subscription
    where
        E: EventPayload,
        F: Fn(&E) + Send + Sync + 'static,
    {
        self.state.on::<E, F>(handler)
    }

    /// Restore a saved conversation
    pub fn set_messages(&self, messages: Vec<Message>) {
        self.state.set_messages(messages);
    }

    pub fn set_mode(&self, mode: Mode) {
        lock(&self.prompt).set_mode(mode);
    }

    /// Run a task to a terminal status.
    ///
    /// Existing history beyond the system message is kept, so a follow-up
    /// instruction continues the same conversation. A task still running on
    /// this loop is cancelled and finishes as aborted before the new one starts.
    pub async fn start_task(&self, instruction: &str, ctx: TaskContext) -> AgentStatus {
        let token = CancellationToken::new();
        if let Some(previous) = lock(&self.cancel).replace(token.clone()) {
            previous.cancel();
        }
        let _running = self.running.lock().await;

        let task_id = self.state.begin_task(instruction);
        info!("◆ TASK {} STARTED", task_id);

        self.seed_history(instruction, &ctx);
        self.state.set_status(AgentStatus::Running);

        match self.run(&ctx, &token).await {
            Ok(()) => {}
            Err(AgentError::Cancelled) => {
                self.state.finish(AgentStatus::Aborted);
            }
            Err(e) => self.fail(e.to_string()),
        }

        lock(&self.approval).take();
        self.state.set_pending_tool(None);

        let status = self.state.status();
        info!("◆ TASK {} ENDED: {}", task_id, status.as_str().to_uppercase());
        status
    }

    /// Cancel the running task and release a pending approval as rejected.
    /// A task that already finished keeps its status.
    pub fn abort(&self) {
        if let Some(token) = lock(&self.cancel).as_ref() {
            token.cancel();
        }
        self.state.finish(AgentStatus::Aborted);
        if let Some(sender) = lock(&self.approval).take() {
            let _ = sender.send(false);
        }
        info!("◆ ABORT REQUESTED");
    }

    /// Answer the pending approval. Returns `false` when nothing was pending.
    pub fn approve_tool_call(&self, approved: bool) -> bool {
        match lock(&self.approval).take() {
            Some(sender) => sender.send(approved).is_ok(),
            None => false,
        }
    }

    fn seed_history(&self, instruction: &str, ctx: &TaskContext) {
        let system_prompt = lock(&self.prompt).build(ctx);
        let user = Message::user(build_user_content(instruction, ctx));

        let mut messages = self.state.messages();
        if messages.len() > 1 {
            match messages.first_mut() {
                Some(first) if first.role == Role::System => first.content = system_prompt,
                _ => messages.insert(0, Message::system(system_prompt)),
            }
            debug!("◆ CONTINUING CONVERSATION OF {} MESSAGES", messages.len());
        } else {
            messages = vec![Message::system(system_prompt)];
        }

        self.state.set_messages(messages);
        self.state.add_message(user);
    }

    fn fail(&self, error: String) {
        if self.state.status().is_terminal() {
            return;
        }
        warn!("◆ TASK FAILED: {}", error);
        self.state.set_error(Some(error));
        self.state.finish(AgentStatus::Error);
    }

    async fn run(&self, ctx: &TaskContext, token: &CancellationToken) -> Result<()> {
        let tool_ctx = ctx.tool_context();

        while self.state.status() == AgentStatus::Running && !token.is_cancelled() {
            match self.turn(&tool_ctx, token).await {
                Ok(Turn::Continue) => {}
                Ok(Turn::Finished) => break,
                Err(AgentError::Cancelled) => return Err(AgentError::Cancelled),
                Err(e) => {
                    if self.record_turn_failure(&e) {
                        break;
                    }
                }
            }
        }

        match self.state.status() {
            AgentStatus::Completed | AgentStatus::Error => Ok(()),
            _ if token.is_cancelled() => Err(AgentError::Cancelled),
            _ => Ok(()),
        }
    }

    /// Returns true when the failure budget is exhausted
    fn record_turn_failure(&self, error: &AgentError) -> bool {
        let failures = self.state.increment_provider_failures();
        warn!(
            "◆ TURN FAILED ({}/{}): {}",
            failures, self.settings.max_consecutive_errors, error
        );

        if failures >= self.settings.max_consecutive_errors {
            self.fail(error.to_string());
            return true;
        }
        self.state
            .add_message(Message::user(error_retry_prompt(&error.to_string())));
        false
    }

    async fn turn(&self, tool_ctx: &ToolContext, token: &CancellationToken) -> Result<Turn> {
        let response = self.call_model(token).await?;
        self.state.reset_provider_failures();

        let parsed = parse_response_with(&response.content, |name| self.tools.has(name));
        self.state.add_message(Message::assistant(response.content));

        if !parsed.rejected.is_empty() {
            warn!("◆ UNKNOWN TOOLS IGNORED: {}", parsed.rejected.join(", "));
        }

        if !parsed.tool_calls.is_empty() {
            let turn = self.run_tools(parsed.tool_calls, tool_ctx, token).await?;
            if !parsed.rejected.is_empty() && matches!(turn, Turn::Continue) {
                self.state
                    .add_message(Message::user(ignored_tools_message(&parsed.rejected)));
            }
            return Ok(turn);
        }
        if parsed.is_completion {
            self.state.finish(AgentStatus::Completed);
            return Ok(Turn::Finished);
        }

        let errors = self.state.increment_errors();
        if errors >= self.settings.max_consecutive_errors {
            self.fail(AgentError::TooManyErrors(errors).to_string());
            return Ok(Turn::Finished);
        }

        debug!("◆ NO TOOL USED ({}/{})", errors, self.settings.max_consecutive_errors);
        let prompt = if parsed.rejected.is_empty() {
            no_tool_used_prompt()
        } else {
            unknown_tools_prompt(&parsed.rejected)
        };
        self.state.add_message(Message::user(prompt));
        Ok(Turn::Continue)
    }

    /// One model call, retrying transient provider errors with exponential backoff
    async fn call_model(&self, token: &CancellationToken) -> Result<ChatResponse> {
        let mut attempt = 0;

        loop {
            let params = ChatParams {
                model: self.settings.model.clone(),
                messages: trim_history(&self.state.messages(), self.settings.max_context_messages),
                max_tokens: self.settings.max_tokens,
                temperature: self.settings.temperature,
            };

            let started = Instant::now();
            let result = tokio::select! {
                biased;
                _ = token.cancelled() => return Err(AgentError::Cancelled),
                result = self.provider.chat(params) => result,
            };

            match result {
                Ok(response) => {
                    debug!("◆ MODEL REPLIED IN {:?}", started.elapsed());
                    return Ok(response);
                }
                Err(e) if e.is_retryable() && attempt < self.settings.max_provider_retries => {
                    attempt += 1;
                    let delay = self.settings.retry_base_delay * 2u32.saturating_pow(attempt);
                    warn!(
                        "◆ MODEL CALL FAILED, RETRY {}/{} IN {:?}: {}",
                        attempt, self.settings.max_provider_retries, delay, e
                    );
                    tokio::select! {
                        biased;
                        _ = token.cancelled() => return Err(AgentError::Cancelled),
                        _ = tokio::time::sleep(delay) => {}
                    }
                }
                Err(e) => return Err(e.into()),
            }
        }
    }

    /// Execute a batch in order. The task completes only if
    /// `attempt_completion` itself succeeds; calls after it are not run.
    async fn run_tools(
        &self,
        calls: Vec<ToolCall>,
        tool_ctx: &ToolContext,
        token: &CancellationToken,
    ) -> Result<Turn> {
        let mut completed = false;
        let mut handled = 0;
        let mut invalid = 0;

        for call in calls {
            if token.is_cancelled() {
                return Err(AgentError::Cancelled);
            }

            let call = match self.tools.prepare(&call) {
                Ok(checked) => checked,
                Err(reason) => {
                    warn!("◆ INVALID CALL TO {}: {}", call.name, reason);
                    invalid += 1;
                    let result = ToolResult::fail(reason);
                    self.state
                        .add_message(Message::user(format_tool_result(&call, &result)));
                    continue;
                }
            };

            if self.needs_approval(&call.name) {
                let approved = self.wait_for_approval(&call, token).await;
                if token.is_cancelled() {
                    return Err(AgentError::Cancelled);
                }
                handled += 1;
                if !approved {
                    info!("◆ TOOL REJECTED: {}", call.name);
                    self.state
                        .add_message(Message::user(rejected_tool_message(&call.name)));
                    continue;
                }
            }

            debug!("◆ EXECUTING TOOL: {}", call.name);
            let result = self
                .tools
                .execute(&call.name, call.params.clone(), tool_ctx)
                .await;
            self.state
                .add_message(Message::user(format_tool_result(&call, &result)));
            self.state.reset_errors();
            handled += 1;

            if token.is_cancelled() {
                return Err(AgentError::Cancelled);
            }

            if call.name == COMPLETION_TOOL && result.success {
                completed = true;
                break;
            }
        }

        self.state.set_pending_tool(None);
        if completed {
            self.state.finish(AgentStatus::Completed);
            return Ok(Turn::Finished);
        }
        // a batch of nothing but malformed calls counts like a reply without tools
        if handled == 0 && invalid > 0 {
            let errors = self.state.increment_errors();
            if errors >= self.settings.max_consecutive_errors {
                self.fail(AgentError::TooManyErrors(errors).to_string());
                return Ok(Turn::Finished);
            }
        }
        self.state.transition(AgentStatus::WaitingApproval, AgentStatus::Running);
        Ok(Turn::Continue)
    }

    fn needs_approval(&self, name: &str) -> bool {
        !self.settings.auto_approve && self.tools.requires_approval(name)
    }

    /// Park the call until the user decides, the wait times out, or the task
    /// is cancelled. Only an explicit approval returns true.
    async fn wait_for_approval(&self, call: &ToolCall, token: &CancellationToken) -> bool {
        let (sender, receiver) = oneshot::channel();
        *lock(&self.approval) = Some(sender);

        if !self
            .state
            .transition(AgentStatus::Running, AgentStatus::WaitingApproval)
        {
            // aborted since the batch started
            lock(&self.approval).take();
            return false;
        }
        // handlers of this event may answer before we start waiting
        self.state.set_pending_tool(Some(call.clone()));
        info!("◆ AWAITING APPROVAL: {}", call.name);

        let answer = async {
            match self.settings.approval_timeout {
                Some(limit) => match tokio::time::timeout(limit, receiver).await {
                    Ok(decision) => decision.unwrap_or(false),
                    Err(_) => {
                        warn!("◆ APPROVAL TIMED OUT AFTER {:?}: {}", limit, call.name);
                        false
                    }
                },
                None => receiver.await.unwrap_or(false),
            }
        };

        let approved = tokio::select! {
            biased;
            _ = token.cancelled() => false,
            decision = answer => decision,
        };

        lock(&self.approval).take();
        self.state.set_pending_tool(None);
        self.state.transition(AgentStatus::WaitingApproval, AgentStatus::Running);
        approved
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use notewright_config::Config;

    #[test]
    fn test_settings_from_config() {
        let mut config = Config::default();
        config.agent.default_mode = "researcher".to_string();
        config.agent.approval_timeout_secs = 0;
        config.agent.auto_approve = true;

        let settings = AgentSettings::from_config(&config);
        assert_eq!(settings.mode.slug, crate::ModeSlug::Researcher);
        assert!(settings.approval_timeout.is_none());
        assert!(settings.auto_approve);
        assert_eq!(settings.max_consecutive_errors, 3);
        assert_eq!(settings.max_context_messages, 40);
        assert_eq!(settings.tool_timeout, Duration::from_secs(60));
    }

    #[test]
    fn test_settings_unknown_mode_falls_back() {
        let mut config = Config::default();
        config.agent.default_mode = "pirate".to_string();
        assert_eq!(
            AgentSettings::from_config(&config).mode.slug,
            crate::ModeSlug::Editor
        );
    }
}
