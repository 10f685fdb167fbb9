//! Shared fixtures: a scripted provider and a handful of fake tools

#![allow(dead_code)]

use async_trait::async_trait;
use notewright_agent::tools::{BoxError, ParamKind, Params, ToolParameter};
use notewright_agent::{AgentSettings, ToolContext, ToolDefinition, ToolExecutor, ToolResult};
use notewright_provider::{ChatParams, ChatResponse, Provider, ProviderError};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

pub const DONE: &str = "<attempt_completion><result>All done</result></attempt_completion>";

/// Replays queued replies in order and records every request
#[derive(Default)]
pub struct ScriptedProvider {
    replies: Mutex<VecDeque<Result<ChatResponse, ProviderError>>>,
    calls: Arc<Mutex<Vec<ChatParams>>>,
}

impl ScriptedProvider {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn reply(self, text: &str) -> Self {
        self.replies
            .lock()
            .unwrap()
            .push_back(Ok(ChatResponse::text(text)));
        self
    }

    pub fn fail(self, error: ProviderError) -> Self {
        self.replies.lock().unwrap().push_back(Err(error));
        self
    }

    /// Handle to the recorded requests, usable after the provider is moved
    pub fn calls(&self) -> Arc<Mutex<Vec<ChatParams>>> {
        Arc::clone(&self.calls)
    }
}

#[async_trait]
impl Provider for ScriptedProvider {
    async fn chat(&self, params: ChatParams) -> Result<ChatResponse, ProviderError> {
        self.calls.lock().unwrap().push(params);
        self.replies
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Err(ProviderError::Api("script exhausted".to_string())))
    }

    fn default_model(&self) -> String {
        "scripted".to_string()
    }

    fn is_configured(&self) -> bool {
        true
    }
}

/// Never answers; used to abort a task mid-call
#[derive(Default)]
pub struct HangingProvider {
    pub calls: Arc<AtomicUsize>,
}

#[async_trait]
impl Provider for HangingProvider {
    async fn chat(&self, _params: ChatParams) -> Result<ChatResponse, ProviderError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        std::future::pending().await
    }

    fn default_model(&self) -> String {
        "hanging".to_string()
    }

    fn is_configured(&self) -> bool {
        true
    }
}

#[derive(Clone, Copy)]
pub enum Behavior {
    Succeed,
    Fail,
    Panic,
    Sleep(Duration),
}

/// Tool with one required `target` parameter and configurable behavior
pub struct FakeTool {
    pub name: &'static str,
    pub approval: bool,
    pub behavior: Behavior,
    pub runs: Arc<AtomicUsize>,
}

impl FakeTool {
    pub fn new(name: &'static str, approval: bool, behavior: Behavior) -> Self {
        Self {
            name,
            approval,
            behavior,
            runs: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn runs(&self) -> Arc<AtomicUsize> {
        Arc::clone(&self.runs)
    }
}

#[async_trait]
impl ToolExecutor for FakeTool {
    fn definition(&self) -> ToolDefinition {
        ToolDefinition::new(self.name, "Test tool").param(ToolParameter::required(
            "target",
            ParamKind::String,
            "Anything",
        ))
    }

    fn requires_approval(&self) -> bool {
        self.approval
    }

    async fn execute(&self, params: Params, _ctx: &ToolContext) -> Result<ToolResult, BoxError> {
        self.runs.fetch_add(1, Ordering::SeqCst);
        let target = params
            .get("target")
            .and_then(|v| v.as_str())
            .unwrap_or_default()
            .to_string();

        match self.behavior {
            Behavior::Succeed => Ok(ToolResult::ok(format!("{} ran on {}", self.name, target))),
            Behavior::Fail => Err(format!("{} broke on {}", self.name, target).into()),
            Behavior::Panic => panic!("{} exploded", self.name),
            Behavior::Sleep(duration) => {
                tokio::time::sleep(duration).await;
                Ok(ToolResult::ok("slept"))
            }
        }
    }
}

/// `<name><target>value</target></name>`
pub fn call(name: &str, target: &str) -> String {
    format!("<{name}>\n<target>{target}</target>\n</{name}>")
}

/// Settings with no retry delay and a short approval timeout
pub fn fast_settings() -> AgentSettings {
    AgentSettings {
        retry_base_delay: Duration::ZERO,
        approval_timeout: Some(Duration::from_secs(5)),
        ..AgentSettings::default()
    }
}

/// Poll until `check` holds, giving spawned tasks time to run
pub async fn wait_until(check: impl Fn() -> bool) {
    for _ in 0..500 {
        if check() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("condition not reached in time");
}
