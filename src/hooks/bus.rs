//! Hook dispatch: concurrent fan-out to subprocess hooks and in-process
//! handlers.
//!
//! In-process handlers (registered by plugins) run first, ordered by
//! priority. Subprocess hooks then start concurrently; each is bounded
//! by its own timeout and killed past the deadline. A non-zero exit on
//! a veto-capable event aborts the gated operation with the hook's
//! stderr as the reason; every other failure is logged and swallowed.

use std::process::Stdio;
use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use futures::future::join_all;
use tokio::process::Command;
use tracing::{debug, warn};

use super::events::HookEvent;
use super::registry::{Hook, HookRegistry};

/// Result of one hook or handler run.
#[derive(Debug, Clone)]
pub struct HookRunResult {
    /// Command or handler identifier, for logs
    pub name: String,
    /// Whether the hook passed (exit 0 / handler Ok)
    pub passed: bool,
    /// Captured stderr (subprocess) or handler message
    pub detail: String,
}

/// Aggregate outcome of emitting one event.
#[derive(Debug, Clone, Default)]
pub struct EmitOutcome {
    /// Per-hook results, in completion order
    pub results: Vec<HookRunResult>,
    /// Veto reason, when a veto-capable event was rejected
    pub veto: Option<String>,
}

impl EmitOutcome {
    /// Whether the gated operation may proceed.
    pub fn allowed(&self) -> bool {
        self.veto.is_none()
    }
}

/// An in-process hook handler contributed by a plugin.
#[async_trait]
pub trait HookHandler: Send + Sync {
    /// Handle the event. `Err(reason)` vetoes veto-capable events.
    async fn handle(&self, event: &HookEvent) -> Result<(), String>;
}

struct RegisteredHandler {
    pattern: String,
    priority: i32,
    plugin: Option<String>,
    handler: Arc<dyn HookHandler>,
}

/// The event bus: fans events out to handlers and subprocess hooks.
pub struct HookBus {
    registry: Arc<HookRegistry>,
    handlers: RwLock<Vec<RegisteredHandler>>,
}

impl HookBus {
    /// Bus over a hook registry.
    pub fn new(registry: Arc<HookRegistry>) -> Self {
        HookBus {
            registry,
            handlers: RwLock::new(Vec::new()),
        }
    }

    /// Bus over the process-wide registry.
    pub fn with_global_registry() -> Self {
        Self::new(HookRegistry::global())
    }

    /// The underlying registry.
    pub fn registry(&self) -> &Arc<HookRegistry> {
        &self.registry
    }

    /// Register an in-process handler. Higher priority runs first.
    pub fn register_handler(
        &self,
        pattern: impl Into<String>,
        priority: i32,
        plugin: Option<String>,
        handler: Arc<dyn HookHandler>,
    ) {
        let mut handlers = self.handlers.write().expect("hook handlers poisoned");
        handlers.push(RegisteredHandler {
            pattern: pattern.into(),
            priority,
            plugin,
            handler,
        });
        handlers.sort_by_key(|h| std::cmp::Reverse(h.priority));
    }

    /// Remove every handler contributed by a plugin. Returns the count.
    pub fn unregister_plugin_handlers(&self, plugin_id: &str) -> usize {
        let mut handlers = self.handlers.write().expect("hook handlers poisoned");
        let before = handlers.len();
        handlers.retain(|h| h.plugin.as_deref() != Some(plugin_id));
        before - handlers.len()
    }

    /// Number of registered in-process handlers.
    pub fn handler_count(&self) -> usize {
        self.handlers.read().expect("hook handlers poisoned").len()
    }

    /// Emit an event: handlers first, then subprocess hooks concurrently.
    pub async fn emit(&self, event: &HookEvent) -> EmitOutcome {
        let mut outcome = EmitOutcome::default();
        let can_veto = event.event_type.supports_veto();

        // In-process handlers, snapshot under the lock, run outside it.
        let matching_handlers: Vec<(String, Arc<dyn HookHandler>)> = {
            let handlers = self.handlers.read().expect("hook handlers poisoned");
            handlers
                .iter()
                .filter(|h| handler_pattern_matches(&h.pattern, event))
                .map(|h| {
                    (
                        h.plugin.clone().unwrap_or_else(|| h.pattern.clone()),
                        Arc::clone(&h.handler),
                    )
                })
                .collect()
        };

        for (name, handler) in matching_handlers {
            match handler.handle(event).await {
                Ok(()) => outcome.results.push(HookRunResult {
                    name,
                    passed: true,
                    detail: String::new(),
                }),
                Err(reason) => {
                    outcome.results.push(HookRunResult {
                        name: name.clone(),
                        passed: false,
                        detail: reason.clone(),
                    });
                    if can_veto {
                        debug!("In-process handler '{}' vetoed {}", name, event.event_type);
                        outcome.veto = Some(reason);
                        return outcome;
                    }
                    warn!("In-process handler '{}' failed on {}: {}", name, event.event_type, reason);
                }
            }
        }

        // Subprocess hooks: snapshot, then concurrent fan-out.
        let hooks = self.registry.get_hooks(event);
        if hooks.is_empty() {
            return outcome;
        }

        let runs = join_all(hooks.iter().map(|hook| run_hook(hook, event))).await;
        for result in runs {
            if !result.passed && can_veto && outcome.veto.is_none() {
                outcome.veto = Some(result.detail.clone());
            }
            outcome.results.push(result);
        }

        outcome
    }
}

/// Whether an in-process handler pattern matches an event. Reuses the
/// subprocess hook pattern grammar.
fn handler_pattern_matches(pattern: &str, event: &HookEvent) -> bool {
    Hook::new(pattern, "").matches(event)
}

/// Run one subprocess hook to completion or its deadline.
async fn run_hook(hook: &Hook, event: &HookEvent) -> HookRunResult {
    let mut command = Command::new("sh");
    command
        .arg("-c")
        .arg(&hook.command)
        .envs(event.to_env())
        .envs(&hook.env)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);
    if let Some(ref dir) = hook.working_dir {
        command.current_dir(dir);
    }

    let child = match command.spawn() {
        Ok(child) => child,
        Err(e) => {
            warn!("Failed to spawn hook '{}': {}", hook.command, e);
            return HookRunResult {
                name: hook.command.clone(),
                passed: false,
                detail: format!("failed to spawn hook: {}", e),
            };
        }
    };

    let output = tokio::time::timeout(hook.timeout_duration(), child.wait_with_output()).await;

    match output {
        Ok(Ok(output)) => {
            let stdout = String::from_utf8_lossy(&output.stdout);
            if !stdout.trim().is_empty() {
                debug!("Hook '{}' stdout: {}", hook.command, stdout.trim());
            }
            let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
            let passed = output.status.success();
            if !passed {
                debug!(
                    "Hook '{}' exited non-zero on {}: {}",
                    hook.command, event.event_type, stderr
                );
            }
            HookRunResult {
                name: hook.command.clone(),
                passed,
                detail: stderr,
            }
        }
        Ok(Err(e)) => {
            warn!("Hook '{}' failed: {}", hook.command, e);
            HookRunResult {
                name: hook.command.clone(),
                passed: false,
                detail: format!("hook error: {}", e),
            }
        }
        Err(_) => {
            // kill_on_drop reaps the overdue process.
            warn!(
                "Hook '{}' exceeded its {}s timeout and was killed",
                hook.command, hook.timeout
            );
            HookRunResult {
                name: hook.command.clone(),
                passed: false,
                detail: format!("hook timed out after {}s", hook.timeout),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::time::Instant;

    fn bus() -> HookBus {
        HookBus::new(Arc::new(HookRegistry::new()))
    }

    #[tokio::test]
    async fn passing_hook_allows() {
        let bus = bus();
        bus.registry().register(Hook::new("tool:pre_execute", "exit 0"));

        let outcome = bus.emit(&HookEvent::tool_pre_execute("bash", &json!({}))).await;
        assert!(outcome.allowed());
        assert_eq!(outcome.results.len(), 1);
        assert!(outcome.results[0].passed);
    }

    #[tokio::test]
    async fn failing_pre_execute_hook_vetoes_with_stderr() {
        let bus = bus();
        bus.registry().register(Hook::new(
            "tool:pre_execute:write",
            "echo readonly >&2; exit 1",
        ));

        let outcome = bus
            .emit(&HookEvent::tool_pre_execute("write", &json!({})))
            .await;
        assert!(!outcome.allowed());
        assert_eq!(outcome.veto.as_deref(), Some("readonly"));
    }

    #[tokio::test]
    async fn failing_post_execute_hook_is_ignored() {
        let bus = bus();
        bus.registry().register(Hook::new("tool:post_execute", "exit 1"));

        let outcome = bus
            .emit(&HookEvent::tool_post_execute("bash", &json!({}), json!({})))
            .await;
        assert!(outcome.allowed());
        assert_eq!(outcome.results.len(), 1);
        assert!(!outcome.results[0].passed);
    }

    #[tokio::test]
    async fn hook_sees_event_environment() {
        let bus = bus();
        bus.registry().register(Hook::new(
            "tool:pre_execute",
            r#"[ "$RUNTIME_TOOL_NAME" = "bash" ] || { echo wrong-tool >&2; exit 1; }"#,
        ));

        let outcome = bus.emit(&HookEvent::tool_pre_execute("bash", &json!({}))).await;
        assert!(outcome.allowed(), "veto: {:?}", outcome.veto);
    }

    #[tokio::test]
    async fn overdue_hook_is_killed() {
        let bus = bus();
        bus.registry()
            .register(Hook::new("tool:pre_execute", "sleep 30").with_timeout(0.1));

        let start = Instant::now();
        let outcome = bus.emit(&HookEvent::tool_pre_execute("bash", &json!({}))).await;
        assert!(start.elapsed().as_secs() < 5);
        assert!(!outcome.allowed());
        assert!(outcome.veto.unwrap().contains("timed out"));
    }

    #[tokio::test]
    async fn non_matching_hooks_not_run() {
        let bus = bus();
        bus.registry().register(Hook::new("llm:*", "exit 1"));

        let outcome = bus.emit(&HookEvent::tool_pre_execute("bash", &json!({}))).await;
        assert!(outcome.allowed());
        assert!(outcome.results.is_empty());
    }

    struct VetoHandler;

    #[async_trait]
    impl HookHandler for VetoHandler {
        async fn handle(&self, _event: &HookEvent) -> Result<(), String> {
            Err("handler says no".to_string())
        }
    }

    struct CountingHandler {
        calls: Arc<std::sync::atomic::AtomicUsize>,
    }

    #[async_trait]
    impl HookHandler for CountingHandler {
        async fn handle(&self, _event: &HookEvent) -> Result<(), String> {
            self.calls.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
            Ok(())
        }
    }

    #[tokio::test]
    async fn in_process_handler_vetoes_before_subprocess_hooks() {
        let bus = bus();
        // The subprocess hook would pass, but the handler runs first.
        bus.registry().register(Hook::new("tool:pre_execute", "exit 0"));
        bus.register_handler("tool:pre_execute", 0, Some("guard".into()), Arc::new(VetoHandler));

        let outcome = bus.emit(&HookEvent::tool_pre_execute("bash", &json!({}))).await;
        assert_eq!(outcome.veto.as_deref(), Some("handler says no"));
        // Subprocess hook never ran.
        assert_eq!(outcome.results.len(), 1);
    }

    #[tokio::test]
    async fn handler_failure_on_non_veto_event_is_logged_only() {
        let bus = bus();
        bus.register_handler("session:*", 0, None, Arc::new(VetoHandler));

        let outcome = bus.emit(&HookEvent::session_start("s")).await;
        assert!(outcome.allowed());
        assert_eq!(outcome.results.len(), 1);
        assert!(!outcome.results[0].passed);
    }

    #[tokio::test]
    async fn unregister_plugin_handlers_removes_only_that_plugin() {
        let bus = bus();
        let calls = Arc::new(std::sync::atomic::AtomicUsize::new(0));
        bus.register_handler(
            "*",
            0,
            Some("p1".into()),
            Arc::new(CountingHandler { calls: Arc::clone(&calls) }),
        );
        bus.register_handler(
            "*",
            0,
            Some("p2".into()),
            Arc::new(CountingHandler { calls: Arc::clone(&calls) }),
        );

        assert_eq!(bus.unregister_plugin_handlers("p1"), 1);
        assert_eq!(bus.handler_count(), 1);

        bus.emit(&HookEvent::user_interrupt()).await;
        assert_eq!(calls.load(std::sync::atomic::Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn all_matching_subprocess_hooks_run() {
        let bus = bus();
        bus.registry().register(Hook::new("session:start", "exit 0"));
        bus.registry().register(Hook::new("session:*", "exit 0"));
        bus.registry().register(Hook::new("*", "exit 0"));

        let outcome = bus.emit(&HookEvent::session_start("s")).await;
        assert_eq!(outcome.results.len(), 3);
    }
}
