//! Agent executor: drives the bounded LLM↔tool loop.
//!
//! `execute` is the only place conversation messages are mutated. It
//! never returns an error to the caller: terminal failure, cancellation,
//! and timeout are all encoded in the result and the task state. The
//! loop is strictly serial within one task so the assistant/tool message
//! pairing invariant always holds; multiple tasks may run concurrently
//! against the shared registries.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Instant;

use futures::StreamExt;
use serde_json::{json, Value};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::context::{
    counter_for_model, CompositeStrategy, SmartTruncationStrategy, TokenBudgetStrategy,
    TokenCounter, ToolResultCompactor, TruncationStrategy,
};
use crate::error::{Error, ProviderError, Result};
use crate::hooks::{HookBus, HookEvent};
use crate::llm::{
    GenerationOptions, LlmProvider, LlmResponse, Message, Role, StreamEvent, ToolDefinition,
    Usage,
};
use crate::tools::{ExecutionContext, ToolDispatcher};

use super::catalog::AgentTypeCatalog;
use super::result::AgentResult;
use super::types::{AgentState, AgentTask};

/// Streaming events yielded by [`AgentExecutor::stream`].
///
/// Contract: the concatenation of `LlmChunk` contents equals the
/// assistant message eventually appended; `ToolEnd` always follows its
/// `ToolStart`; `AgentEnd` is the last event.
#[derive(Debug, Clone)]
pub enum AgentEvent {
    /// An LLM round-trip is starting
    LlmStart { iteration: u32 },
    /// A fragment of assistant text
    LlmChunk { content: String },
    /// The round-trip finished
    LlmEnd { iteration: u32, usage: Option<Usage> },
    /// A tool call is starting
    ToolStart { id: String, name: String },
    /// A tool call finished
    ToolEnd { id: String, name: String, success: bool },
    /// The run finished; always the last event
    AgentEnd { result: AgentResult },
    /// A loop-level error occurred (an `AgentEnd` still follows)
    Error { message: String },
}

/// Executes agent tasks against a provider and a tool dispatcher.
pub struct AgentExecutor {
    llm: Arc<dyn LlmProvider>,
    dispatcher: Arc<ToolDispatcher>,
    catalog: Arc<AgentTypeCatalog>,
    truncation: Box<dyn TruncationStrategy>,
    result_compactor: ToolResultCompactor,
}

impl AgentExecutor {
    /// Create an executor with default context handling.
    pub fn new(llm: Arc<dyn LlmProvider>, dispatcher: Arc<ToolDispatcher>) -> Self {
        AgentExecutor {
            llm,
            dispatcher,
            catalog: AgentTypeCatalog::global(),
            truncation: Box::new(CompositeStrategy::new(vec![
                Box::new(SmartTruncationStrategy::default()),
                Box::new(TokenBudgetStrategy::default()),
            ])),
            result_compactor: ToolResultCompactor::default(),
        }
    }

    /// Builder: use a specific agent-type catalog.
    pub fn with_catalog(mut self, catalog: Arc<AgentTypeCatalog>) -> Self {
        self.catalog = catalog;
        self
    }

    /// Builder: use a specific truncation strategy.
    pub fn with_truncation(mut self, truncation: Box<dyn TruncationStrategy>) -> Self {
        self.truncation = truncation;
        self
    }

    /// Builder: use a specific tool-result compactor.
    pub fn with_result_compactor(mut self, compactor: ToolResultCompactor) -> Self {
        self.result_compactor = compactor;
        self
    }

    fn hooks(&self) -> &Arc<HookBus> {
        self.dispatcher.hooks()
    }

    /// Execute a task to completion.
    pub async fn execute(&self, task: &mut AgentTask) -> AgentResult {
        self.run(task, None).await
    }

    /// Execute a task, yielding events as the run progresses.
    pub fn stream(self: Arc<Self>, mut task: AgentTask) -> mpsc::Receiver<AgentEvent> {
        let (tx, rx) = mpsc::channel(64);
        tokio::spawn(async move {
            let result = self.run(&mut task, Some(&tx)).await;
            let _ = tx.send(AgentEvent::AgentEnd { result }).await;
        });
        rx
    }

    async fn run(
        &self,
        task: &mut AgentTask,
        events: Option<&mpsc::Sender<AgentEvent>>,
    ) -> AgentResult {
        let start = Instant::now();
        task.set_state(AgentState::Running);

        if task.cancel.is_cancelled() {
            task.set_state(AgentState::Cancelled);
            return AgentResult::cancelled(String::new()).with_usage(
                0,
                start.elapsed().as_secs_f64(),
                0,
            );
        }

        let definition = self
            .catalog
            .get(&task.config.agent_type)
            .or_else(|| self.catalog.get("general"));

        // System prompt: type template plus the caller's addition.
        let mut system_prompt = definition
            .as_ref()
            .map(|d| d.prompt_template.clone())
            .unwrap_or_else(|| "You are a coding agent. Complete the assigned task.".to_string());
        if let Some(ref addition) = task.config.prompt_addition {
            system_prompt.push_str("\n\n");
            system_prompt.push_str(addition);
        }

        task.messages = vec![Message::system(system_prompt)];
        if task.config.inherit_context && !task.context.parent_messages.is_empty() {
            task.messages
                .push(Message::user(summarize_parent(&task.context.parent_messages)));
        }
        task.messages.push(Message::user(task.task.clone()));

        // Tool allow-list: explicit config, else the type's defaults,
        // else every registered tool.
        let allow = task
            .config
            .tools
            .clone()
            .or_else(|| definition.as_ref().and_then(|d| d.default_tools.clone()));
        let tool_definitions: Vec<ToolDefinition> = {
            let registry = self
                .dispatcher
                .registry()
                .read()
                .expect("tool registry poisoned");
            registry.definitions_for(allow.as_deref())
        };

        let mut options = task.config.generation.clone();
        options.model = task
            .config
            .model
            .clone()
            .or_else(|| definition.as_ref().and_then(|d| d.default_model.clone()));
        let model = options
            .model
            .clone()
            .unwrap_or_else(|| self.llm.default_model().to_string());
        let counter = counter_for_model(&model);

        let mut iteration: u32 = 0;
        while iteration < task.config.max_iterations {
            iteration += 1;
            info!(
                "Agent {} iteration {}/{}",
                task.id, iteration, task.config.max_iterations
            );

            if task.cancel.is_cancelled() {
                let result = AgentResult::cancelled(partial_output(&task.messages));
                return self
                    .finalize(task, start, iteration, AgentState::Cancelled, result, events)
                    .await;
            }

            // Fit the conversation into the context budget.
            let fitted = self
                .truncation
                .truncate(&task.messages, task.config.context_budget, &counter);
            let request_messages = sanitize_pairing(fitted);

            self.hooks()
                .emit(&HookEvent::llm_pre_request(&model, request_messages.len()))
                .await;
            if let Some(tx) = events {
                let _ = tx.send(AgentEvent::LlmStart { iteration }).await;
            }

            let response = self
                .call_llm(&request_messages, &tool_definitions, &options, task, events)
                .await;

            let response = match response {
                Ok(response) => response,
                Err(e) => {
                    let (state, result) = match e {
                        Error::Cancelled(_) => (
                            AgentState::Cancelled,
                            AgentResult::cancelled(partial_output(&task.messages)),
                        ),
                        other => (
                            AgentState::Failed,
                            AgentResult::fail(other.to_string(), partial_output(&task.messages)),
                        ),
                    };
                    return self
                        .finalize(task, start, iteration, state, result, events)
                        .await;
                }
            };

            let turn_tokens = response
                .usage
                .map(|u| u.total_tokens as u64)
                .unwrap_or_else(|| {
                    // Provider omitted usage; estimate with the counter.
                    (counter.count_messages(&request_messages) + counter.count(&response.content))
                        as u64
                });
            task.usage.tokens_used += turn_tokens;

            self.hooks()
                .emit(&HookEvent::llm_post_response(&model, turn_tokens as u32))
                .await;
            if let Some(tx) = events {
                let _ = tx
                    .send(AgentEvent::LlmEnd {
                        iteration,
                        usage: response.usage,
                    })
                    .await;
            }

            // Resource limits are checked after every round-trip.
            if task.usage.tokens_used > task.config.max_tokens {
                let result = AgentResult::fail(
                    format!(
                        "max_tokens exceeded: {} > {}",
                        task.usage.tokens_used, task.config.max_tokens
                    ),
                    partial_output(&task.messages),
                );
                return self
                    .finalize(task, start, iteration, AgentState::Failed, result, events)
                    .await;
            }
            if start.elapsed() > task.config.max_time {
                let result = AgentResult::timeout(partial_output(&task.messages));
                return self
                    .finalize(task, start, iteration, AgentState::TimedOut, result, events)
                    .await;
            }

            // No tool calls: the content is the final answer.
            if !response.has_tool_calls() {
                task.messages.push(Message::assistant(response.content.clone()));
                return self
                    .finalize(
                        task,
                        start,
                        iteration,
                        AgentState::Completed,
                        AgentResult::ok(response.content),
                        events,
                    )
                    .await;
            }

            // Record the assistant message, then execute each call in
            // order, appending its result keyed by tool_call_id.
            task.messages.push(Message::assistant_with_tool_calls(
                response.content.clone(),
                response.tool_calls.clone(),
            ));

            for call in &response.tool_calls {
                let args: Value = match serde_json::from_str(&call.function.arguments) {
                    Ok(value) => value,
                    Err(e) => {
                        warn!(
                            "Unparseable arguments for {}: {}",
                            call.function.name, e
                        );
                        json!({})
                    }
                };

                if let Some(tx) = events {
                    let _ = tx
                        .send(AgentEvent::ToolStart {
                            id: call.id.clone(),
                            name: call.function.name.clone(),
                        })
                        .await;
                }

                let ctx = ExecutionContext {
                    working_dir: task.context.working_dir.clone(),
                    env: task.context.env.clone(),
                    session_id: Some(task.id.to_string()),
                    time_budget: task.config.max_time.checked_sub(start.elapsed()),
                    cancel: task.cancel.clone(),
                };

                let result = self
                    .dispatcher
                    .invoke(&call.function.name, args, &ctx)
                    .await;
                task.usage.tool_calls += 1;

                if let Some(tx) = events {
                    let _ = tx
                        .send(AgentEvent::ToolEnd {
                            id: call.id.clone(),
                            name: call.function.name.clone(),
                            success: result.success,
                        })
                        .await;
                }

                let content = self
                    .result_compactor
                    .compact_result(&result.to_message_content(), &counter);
                task.messages.push(Message::tool(&call.id, content));

                if task.cancel.is_cancelled() {
                    break;
                }
            }
        }

        let result = AgentResult::fail(
            format!("max_iterations reached: {}", task.config.max_iterations),
            partial_output(&task.messages),
        );
        self.finalize(task, start, iteration, AgentState::Failed, result, events)
            .await
    }

    /// One LLM round-trip, bounded by the iteration timeout and the
    /// cancellation token. The streaming variant forwards chunks.
    async fn call_llm(
        &self,
        messages: &[Message],
        tools: &[ToolDefinition],
        options: &GenerationOptions,
        task: &AgentTask,
        events: Option<&mpsc::Sender<AgentEvent>>,
    ) -> Result<LlmResponse> {
        let request = async {
            match events {
                None => self.llm.generate(messages, tools, options).await,
                Some(tx) => {
                    let mut stream = self.llm.generate_stream(messages, tools, options).await?;
                    while let Some(event) = stream.next().await {
                        match event? {
                            StreamEvent::Content(content) => {
                                let _ = tx.send(AgentEvent::LlmChunk { content }).await;
                            }
                            StreamEvent::Done(response) => return Ok(response),
                        }
                    }
                    Err(Error::Provider(ProviderError::NetworkError(
                        "stream ended without completion".to_string(),
                    )))
                }
            }
        };

        tokio::select! {
            outcome = tokio::time::timeout(task.config.iteration_timeout, request) => {
                match outcome {
                    Ok(result) => result,
                    Err(_) => Err(Error::Timeout(
                        "LLM call exceeded the iteration timeout".to_string(),
                    )),
                }
            }
            _ = task.cancel.cancelled() => {
                Err(Error::Cancelled("agent cancelled during LLM call".to_string()))
            }
        }
    }

    /// Seal the task and the result with final state and usage.
    async fn finalize(
        &self,
        task: &mut AgentTask,
        start: Instant,
        iterations: u32,
        state: AgentState,
        result: AgentResult,
        events: Option<&mpsc::Sender<AgentEvent>>,
    ) -> AgentResult {
        task.set_state(state);
        task.usage.time_seconds = start.elapsed().as_secs_f64();

        if let (Some(tx), Some(ref error)) = (events, &result.error) {
            let _ = tx
                .send(AgentEvent::Error {
                    message: error.clone(),
                })
                .await;
        }

        debug!(
            "Agent {} finished: state={:?}, iterations={}, tokens={}, tool_calls={}",
            task.id, task.state, iterations, task.usage.tokens_used, task.usage.tool_calls
        );

        result
            .with_usage(
                task.usage.tokens_used,
                task.usage.time_seconds,
                task.usage.tool_calls,
            )
            .with_metadata("agent_type", json!(task.config.agent_type))
            .with_metadata("iterations", json!(iterations))
    }
}

/// Fold the parent's trailing messages into one synthetic context
/// message, truncating long bodies.
fn summarize_parent(messages: &[Message]) -> String {
    let mut lines = vec!["[Context from parent]".to_string()];
    for message in messages {
        let text = message.text();
        let body = if text.chars().count() > 200 {
            let cut: String = text.chars().take(200).collect();
            format!("{}...", cut)
        } else {
            text
        };
        lines.push(format!("[{}] {}", message.role, body));
    }
    lines.join("\n")
}

/// Most recent non-empty assistant content, used as partial output on
/// failure paths.
fn partial_output(messages: &[Message]) -> String {
    messages
        .iter()
        .rev()
        .find(|m| m.role == Role::Assistant && !m.content.is_empty())
        .map(|m| m.text())
        .unwrap_or_default()
}

/// Drop tool messages whose requesting assistant message did not
/// survive truncation, so the request never violates the pairing
/// contract of the chat API.
fn sanitize_pairing(messages: Vec<Message>) -> Vec<Message> {
    let mut result = Vec::with_capacity(messages.len());
    let mut open_ids: HashSet<String> = HashSet::new();

    for message in messages {
        match message.role {
            Role::Assistant => {
                open_ids = message
                    .tool_calls
                    .iter()
                    .flatten()
                    .map(|tc| tc.id.clone())
                    .collect();
                result.push(message);
            }
            Role::Tool => {
                let paired = message
                    .tool_call_id
                    .as_ref()
                    .map(|id| open_ids.contains(id))
                    .unwrap_or(false);
                if paired {
                    result.push(message);
                }
            }
            _ => result.push(message),
        }
    }
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hooks::{Hook, HookHandler, HookRegistry};
    use crate::llm::{LlmStream, ToolCallRequest};
    use crate::permissions::{PermissionEngine, PermissionLevel, PermissionRule, RuleSet};
    use crate::tools::{
        ParamType, ParameterSchema, Tool, ToolCategory, ToolRegistry, ToolResult, ToolSource,
    };
    use super::super::types::{AgentConfig, AgentContext};
    use async_trait::async_trait;
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{Mutex, RwLock};
    use std::time::Duration;

    /// Provider fake that replays a script of responses.
    struct ScriptedProvider {
        responses: Mutex<VecDeque<LlmResponse>>,
    }

    impl ScriptedProvider {
        fn new(responses: Vec<LlmResponse>) -> Arc<Self> {
            Arc::new(ScriptedProvider {
                responses: Mutex::new(responses.into()),
            })
        }

        fn next(&self) -> crate::Result<LlmResponse> {
            self.responses
                .lock()
                .unwrap()
                .pop_front()
                .ok_or_else(|| {
                    Error::Provider(ProviderError::ServerError("script exhausted".into()))
                })
        }
    }

    #[async_trait]
    impl LlmProvider for ScriptedProvider {
        fn default_model(&self) -> &str {
            "test/model"
        }

        async fn generate(
            &self,
            _messages: &[Message],
            _tools: &[ToolDefinition],
            _options: &GenerationOptions,
        ) -> crate::Result<LlmResponse> {
            self.next()
        }

        async fn generate_stream(
            &self,
            _messages: &[Message],
            _tools: &[ToolDefinition],
            _options: &GenerationOptions,
        ) -> crate::Result<LlmStream> {
            let response = self.next()?;
            let mut events: Vec<crate::Result<StreamEvent>> = response
                .content
                .chars()
                .collect::<Vec<_>>()
                .chunks(3)
                .map(|chunk| Ok(StreamEvent::Content(chunk.iter().collect())))
                .collect();
            events.push(Ok(StreamEvent::Done(response)));
            Ok(Box::pin(futures::stream::iter(events)))
        }
    }

    fn text_response(content: &str, tokens: u32) -> LlmResponse {
        LlmResponse {
            id: "r".into(),
            model: "test/model".into(),
            content: content.to_string(),
            finish_reason: Some("stop".into()),
            tool_calls: vec![],
            usage: Some(Usage {
                prompt_tokens: tokens / 2,
                completion_tokens: tokens - tokens / 2,
                total_tokens: tokens,
            }),
        }
    }

    fn tool_call_response(
        id: &str,
        name: &str,
        arguments: &str,
        tokens: u32,
    ) -> LlmResponse {
        LlmResponse {
            id: "r".into(),
            model: "test/model".into(),
            content: String::new(),
            finish_reason: Some("tool_calls".into()),
            tool_calls: vec![ToolCallRequest::function(id, name, arguments)],
            usage: Some(Usage {
                prompt_tokens: tokens / 2,
                completion_tokens: tokens - tokens / 2,
                total_tokens: tokens,
            }),
        }
    }

    /// A stub tool with a fixed reply.
    struct StubTool {
        name: &'static str,
        category: ToolCategory,
        reply: &'static str,
    }

    #[async_trait]
    impl Tool for StubTool {
        fn name(&self) -> &str {
            self.name
        }
        fn description(&self) -> &str {
            "stub"
        }
        fn category(&self) -> ToolCategory {
            self.category
        }
        fn parameters(&self) -> ParameterSchema {
            ParameterSchema::new()
                .property("path", ParamType::String, "path", false)
                .property("command", ParamType::String, "command", false)
                .property("content", ParamType::String, "content", false)
        }
        async fn execute(
            &self,
            _args: Value,
            _ctx: &ExecutionContext,
        ) -> crate::Result<ToolResult> {
            Ok(ToolResult::success(self.reply))
        }
    }

    struct Counter {
        count: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl HookHandler for Counter {
        async fn handle(&self, _event: &HookEvent) -> std::result::Result<(), String> {
            self.count.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    fn build_executor(
        provider: Arc<ScriptedProvider>,
        rules: RuleSet,
    ) -> (Arc<AgentExecutor>, Arc<ToolDispatcher>) {
        let registry = Arc::new(RwLock::new(ToolRegistry::new()));
        {
            let mut reg = registry.write().unwrap();
            for (name, category, reply) in [
                ("read", ToolCategory::File, "contents"),
                ("write", ToolCategory::File, "written"),
                ("bash", ToolCategory::Shell, "ran"),
            ] {
                reg.register(
                    Arc::new(StubTool {
                        name,
                        category,
                        reply,
                    }),
                    ToolSource::Builtin,
                )
                .unwrap();
            }
        }

        let dispatcher = Arc::new(ToolDispatcher::new(
            registry,
            Arc::new(PermissionEngine::with_rules(rules, None)),
            Arc::new(HookBus::new(Arc::new(HookRegistry::new()))),
        ));

        let executor = Arc::new(AgentExecutor::new(provider, Arc::clone(&dispatcher)));
        (executor, dispatcher)
    }

    fn allow_all() -> RuleSet {
        let mut rules = RuleSet::new();
        rules.add_rule(PermissionRule::new("tool:*", PermissionLevel::Allow));
        rules
    }

    #[tokio::test]
    async fn single_turn_text() {
        let provider = ScriptedProvider::new(vec![text_response("Hi", 10)]);
        let (executor, _) = build_executor(provider, allow_all());

        let mut task = AgentTask::new("Hello", AgentConfig::default());
        let result = executor.execute(&mut task).await;

        assert!(result.success);
        assert_eq!(result.output, "Hi");
        assert_eq!(result.tool_calls, 0);
        assert_eq!(task.state, AgentState::Completed);

        let roles: Vec<Role> = task.messages.iter().map(|m| m.role).collect();
        assert_eq!(roles, vec![Role::System, Role::User, Role::Assistant]);
    }

    #[tokio::test]
    async fn read_then_reply() {
        let provider = ScriptedProvider::new(vec![
            tool_call_response("call_1", "read", r#"{"path": "/tmp/a.txt"}"#, 20),
            text_response("File says contents", 10),
        ]);
        let (executor, _) = build_executor(provider, allow_all());

        let mut task = AgentTask::new("Read the file", AgentConfig::default());
        let result = executor.execute(&mut task).await;

        assert!(result.success);
        assert_eq!(result.output, "File says contents");
        assert_eq!(result.tool_calls, 1);

        // system, user, assistant(tool_calls), tool, assistant
        let roles: Vec<Role> = task.messages.iter().map(|m| m.role).collect();
        assert_eq!(
            roles,
            vec![Role::System, Role::User, Role::Assistant, Role::Tool, Role::Assistant]
        );
        let tool_message = &task.messages[3];
        assert_eq!(tool_message.tool_call_id.as_deref(), Some("call_1"));
        assert_eq!(tool_message.text(), "contents");
    }

    #[tokio::test]
    async fn permission_veto_continues_loop() {
        let mut rules = allow_all();
        rules.add_rule(
            PermissionRule::new("tool:bash,arg:command:*rm*", PermissionLevel::Deny)
                .with_priority(10),
        );

        let provider = ScriptedProvider::new(vec![
            tool_call_response("call_1", "bash", r#"{"command": "rm x"}"#, 20),
            text_response("I could not delete the file", 10),
        ]);
        let (executor, dispatcher) = build_executor(provider, rules);

        let denials = Arc::new(AtomicUsize::new(0));
        dispatcher.hooks().register_handler(
            "permission:denied",
            0,
            None,
            Arc::new(Counter {
                count: Arc::clone(&denials),
            }),
        );

        let mut task = AgentTask::new("Delete x", AgentConfig::default());
        let result = executor.execute(&mut task).await;

        // The veto becomes a tool message and the loop keeps going.
        assert!(result.success);
        let tool_message = task
            .messages
            .iter()
            .find(|m| m.role == Role::Tool)
            .expect("tool message present");
        assert!(tool_message.text().contains("PermissionDenied"));
        assert_eq!(denials.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn hook_veto_on_write() {
        let provider = ScriptedProvider::new(vec![
            tool_call_response("call_1", "write", r#"{"path": "a", "content": "b"}"#, 20),
            text_response("The file is readonly", 10),
        ]);
        let (executor, dispatcher) = build_executor(provider, allow_all());
        dispatcher
            .hooks()
            .registry()
            .register(Hook::new("tool:pre_execute:write", "echo readonly >&2; exit 1"));

        let mut task = AgentTask::new("Write it", AgentConfig::default());
        let result = executor.execute(&mut task).await;

        assert!(result.success);
        let tool_message = task
            .messages
            .iter()
            .find(|m| m.role == Role::Tool)
            .expect("tool message present");
        assert!(tool_message.text().starts_with("HookVeto:"));
        assert!(tool_message.text().contains("readonly"));
    }

    #[tokio::test]
    async fn budget_exhaustion_fails_with_reason() {
        let provider = ScriptedProvider::new(vec![
            tool_call_response("call_1", "read", r#"{"path": "a"}"#, 60),
            tool_call_response("call_2", "read", r#"{"path": "b"}"#, 60),
            text_response("never reached", 60),
        ]);
        let (executor, _) = build_executor(provider, allow_all());

        let mut config = AgentConfig::default();
        config.max_tokens = 100;
        let mut task = AgentTask::new("Loop forever", config);
        let result = executor.execute(&mut task).await;

        assert!(!result.success);
        assert!(result.error.unwrap().contains("max_tokens"));
        assert_eq!(task.state, AgentState::Failed);
        // One full turn of tool calls completed before the second
        // round-trip blew the budget.
        assert_eq!(result.tool_calls, 1);
        assert_eq!(result.tokens_used, 120);
    }

    #[tokio::test]
    async fn cancelled_before_first_call() {
        let provider = ScriptedProvider::new(vec![text_response("never", 10)]);
        let (executor, _) = build_executor(provider, allow_all());

        let mut task = AgentTask::new("Hello", AgentConfig::default());
        task.cancel();
        let result = executor.execute(&mut task).await;

        assert!(!result.success);
        assert!(result.error.unwrap().to_lowercase().contains("cancelled"));
        assert_eq!(result.tokens_used, 0);
        assert_eq!(task.state, AgentState::Cancelled);
    }

    #[tokio::test]
    async fn max_iterations_reached() {
        // Every response requests another tool call.
        let responses: Vec<LlmResponse> = (0..10)
            .map(|i| tool_call_response(&format!("call_{}", i), "read", "{}", 5))
            .collect();
        let provider = ScriptedProvider::new(responses);
        let (executor, _) = build_executor(provider, allow_all());

        let mut config = AgentConfig::default();
        config.max_iterations = 3;
        let mut task = AgentTask::new("Busy loop", config);
        let result = executor.execute(&mut task).await;

        assert!(!result.success);
        assert!(result.error.unwrap().contains("max_iterations"));
        assert_eq!(result.tool_calls, 3);
    }

    #[tokio::test]
    async fn provider_failure_fails_task() {
        let provider = ScriptedProvider::new(vec![]);
        let (executor, _) = build_executor(provider, allow_all());

        let mut task = AgentTask::new("Hello", AgentConfig::default());
        let result = executor.execute(&mut task).await;

        assert!(!result.success);
        assert_eq!(task.state, AgentState::Failed);
    }

    #[tokio::test]
    async fn inherit_context_folds_parent_messages() {
        let provider = ScriptedProvider::new(vec![text_response("ok", 10)]);
        let (executor, _) = build_executor(provider, allow_all());

        let mut config = AgentConfig::default();
        config.inherit_context = true;
        let mut context = AgentContext::default();
        context.parent_messages = vec![
            Message::user("Previous question"),
            Message::assistant("x".repeat(500)),
        ];

        let mut task = AgentTask::new("Follow up", config).with_context(context);
        executor.execute(&mut task).await;

        let context_message = &task.messages[1];
        assert_eq!(context_message.role, Role::User);
        let text = context_message.text();
        assert!(text.contains("[Context from parent]"));
        assert!(text.contains("[user] Previous question"));
        assert!(text.contains("..."));
    }

    #[tokio::test]
    async fn stream_chunks_reassemble_final_output() {
        let provider = ScriptedProvider::new(vec![text_response("Hello world", 10)]);
        let (executor, _) = build_executor(provider, allow_all());

        let task = AgentTask::new("Hi", AgentConfig::default());
        let mut rx = executor.stream(task);

        let mut chunks = String::new();
        let mut final_result = None;
        let mut saw_llm_start = false;
        while let Some(event) = rx.recv().await {
            match event {
                AgentEvent::LlmStart { .. } => saw_llm_start = true,
                AgentEvent::LlmChunk { content } => chunks.push_str(&content),
                AgentEvent::AgentEnd { result } => final_result = Some(result),
                _ => {}
            }
        }

        let result = final_result.expect("AgentEnd emitted");
        assert!(saw_llm_start);
        assert_eq!(chunks, "Hello world");
        assert_eq!(result.output, "Hello world");
    }

    #[tokio::test]
    async fn stream_tool_events_are_paired() {
        let provider = ScriptedProvider::new(vec![
            tool_call_response("call_1", "read", "{}", 10),
            text_response("done", 10),
        ]);
        let (executor, _) = build_executor(provider, allow_all());

        let task = AgentTask::new("Read", AgentConfig::default());
        let mut rx = executor.stream(task);

        let mut events = Vec::new();
        while let Some(event) = rx.recv().await {
            events.push(event);
        }

        let start_index = events
            .iter()
            .position(|e| matches!(e, AgentEvent::ToolStart { .. }))
            .expect("ToolStart present");
        let end_index = events
            .iter()
            .position(|e| matches!(e, AgentEvent::ToolEnd { .. }))
            .expect("ToolEnd present");
        assert!(start_index < end_index);
        assert!(matches!(events.last(), Some(AgentEvent::AgentEnd { .. })));
    }

    #[test]
    fn sanitize_pairing_drops_orphan_tool_messages() {
        let messages = vec![
            Message::system("s"),
            // Orphan: its assistant was truncated away.
            Message::tool("call_0", "stale"),
            Message::assistant_with_tool_calls(
                "",
                vec![ToolCallRequest::function("call_1", "read", "{}")],
            ),
            Message::tool("call_1", "fresh"),
        ];

        let sanitized = sanitize_pairing(messages);
        assert_eq!(sanitized.len(), 3);
        assert!(sanitized.iter().all(|m| m.text() != "stale"));
    }

    #[test]
    fn partial_output_finds_last_assistant() {
        let messages = vec![
            Message::user("q"),
            Message::assistant("first"),
            Message::user("more"),
            Message::assistant("final answer"),
        ];
        assert_eq!(partial_output(&messages), "final answer");
        assert_eq!(partial_output(&[Message::user("q")]), "");
    }
}
