//! Tool dispatch pipeline.
//!
//! Every tool call traverses resolve → validate → permission → hook
//! pre → invoke → hook post. Failures at any stage are materialised as
//! failed `ToolResult`s (never panics, never `Err`) so the agent loop
//! can hand them back to the model as tool messages.

use std::sync::{Arc, RwLock};

use serde_json::Value;
use tracing::{debug, warn};

use crate::hooks::{HookBus, HookEvent};
use crate::permissions::{PermissionEngine, PermissionLevel};

use super::registry::ToolRegistry;
use super::traits::{ExecutionContext, Tool, ToolResult};

/// Failure kinds raised within dispatch.
///
/// The kind prefixes the tool message's error text (for example
/// `PermissionDenied: blocked by rule`), which is how the model and the
/// user see what went wrong.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchErrorKind {
    UnknownTool,
    InvalidArgs,
    PermissionDenied,
    HookVeto,
    ToolError,
}

impl std::fmt::Display for DispatchErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            DispatchErrorKind::UnknownTool => "UnknownTool",
            DispatchErrorKind::InvalidArgs => "InvalidArgs",
            DispatchErrorKind::PermissionDenied => "PermissionDenied",
            DispatchErrorKind::HookVeto => "HookVeto",
            DispatchErrorKind::ToolError => "ToolError",
        };
        write!(f, "{}", name)
    }
}

/// Runs tool calls through the permission and hook gates.
pub struct ToolDispatcher {
    registry: Arc<RwLock<ToolRegistry>>,
    permissions: Arc<PermissionEngine>,
    hooks: Arc<HookBus>,
}

impl ToolDispatcher {
    /// Create a dispatcher over explicit collaborators.
    pub fn new(
        registry: Arc<RwLock<ToolRegistry>>,
        permissions: Arc<PermissionEngine>,
        hooks: Arc<HookBus>,
    ) -> Self {
        ToolDispatcher {
            registry,
            permissions,
            hooks,
        }
    }

    /// The tool registry this dispatcher resolves against.
    pub fn registry(&self) -> &Arc<RwLock<ToolRegistry>> {
        &self.registry
    }

    /// The hook bus events are emitted on.
    pub fn hooks(&self) -> &Arc<HookBus> {
        &self.hooks
    }

    /// Invoke a tool by name.
    ///
    /// Tool-level failures come back as failed results with a kind
    /// prefix; only the surrounding loop decides whether they are fatal.
    pub async fn invoke(&self, name: &str, args: Value, ctx: &ExecutionContext) -> ToolResult {
        // Resolve on a snapshot; the lock is never held across an await.
        let tool = {
            let registry = self.registry.read().expect("tool registry poisoned");
            registry.get(name)
        };
        let Some(tool) = tool else {
            return self
                .fail(name, &args, DispatchErrorKind::UnknownTool, format!("unknown tool '{}'", name))
                .await;
        };

        // Validate and coerce arguments.
        let args = match tool.parameters().validate(&args) {
            Ok(validated) => validated,
            Err(e) => {
                return self
                    .fail(name, &args, DispatchErrorKind::InvalidArgs, e.to_string())
                    .await;
            }
        };

        // Permission gate.
        let decision = self
            .permissions
            .evaluate(name, Some(tool.category().name()), &args);
        self.hooks
            .emit(
                &HookEvent::permission_check(
                    name,
                    &decision.level.to_string(),
                    decision.rule.as_ref().map(|r| r.pattern.as_str()),
                )
                .with_session_opt(ctx.session_id.clone()),
            )
            .await;

        // A confirmation-requiring tool escalates the default to ask;
        // an explicit rule match always wins.
        let level = if decision.rule.is_none() && tool.requires_confirmation() {
            decision.level.max(PermissionLevel::Ask)
        } else {
            decision.level
        };

        match level {
            PermissionLevel::Allow => {}
            PermissionLevel::Deny => {
                self.hooks
                    .emit(
                        &HookEvent::permission_denied(name)
                            .with_session_opt(ctx.session_id.clone()),
                    )
                    .await;
                return self
                    .fail(name, &args, DispatchErrorKind::PermissionDenied, decision.reason)
                    .await;
            }
            PermissionLevel::Ask => {
                self.hooks
                    .emit(
                        &HookEvent::permission_prompt(name, "ask")
                            .with_session_opt(ctx.session_id.clone()),
                    )
                    .await;
                let granted = self.permissions.prompt(name, &args, &decision.reason).await;
                if granted {
                    self.hooks
                        .emit(
                            &HookEvent::permission_granted(name)
                                .with_session_opt(ctx.session_id.clone()),
                        )
                        .await;
                } else {
                    self.hooks
                        .emit(
                            &HookEvent::permission_denied(name)
                                .with_session_opt(ctx.session_id.clone()),
                        )
                        .await;
                    return self
                        .fail(
                            name,
                            &args,
                            DispatchErrorKind::PermissionDenied,
                            format!("not confirmed: {}", decision.reason),
                        )
                        .await;
                }
            }
        }

        // Pre-execute hooks may veto.
        let pre = self
            .hooks
            .emit(
                &HookEvent::tool_pre_execute(name, &args)
                    .with_session_opt(ctx.session_id.clone()),
            )
            .await;
        if let Some(reason) = pre.veto {
            return self
                .fail(name, &args, DispatchErrorKind::HookVeto, reason)
                .await;
        }

        debug!("Executing tool {}", name);

        // Execute, bounded by the remaining time budget and the
        // cancellation token.
        let execution = async {
            match ctx.time_budget {
                Some(budget) => match tokio::time::timeout(budget, tool.execute(args.clone(), ctx)).await {
                    Ok(result) => result,
                    Err(_) => Err(crate::Error::Timeout(format!(
                        "tool '{}' exceeded its time budget",
                        name
                    ))),
                },
                None => tool.execute(args.clone(), ctx).await,
            }
        };

        let result = tokio::select! {
            result = execution => result,
            _ = ctx.cancel.cancelled() => Err(crate::Error::Cancelled(format!(
                "tool '{}' cancelled",
                name
            ))),
        };

        match result {
            Ok(result) => {
                self.hooks
                    .emit(
                        &HookEvent::tool_post_execute(
                            name,
                            &args,
                            serde_json::to_value(&result).unwrap_or(Value::Null),
                        )
                        .with_session_opt(ctx.session_id.clone()),
                    )
                    .await;
                result
            }
            Err(e) => {
                warn!("Tool {} failed: {}", name, e);
                self.fail(name, &args, DispatchErrorKind::ToolError, e.to_string())
                    .await
            }
        }
    }

    /// Build a kind-prefixed failure and emit the `tool:error` event.
    async fn fail(
        &self,
        name: &str,
        args: &Value,
        kind: DispatchErrorKind,
        message: String,
    ) -> ToolResult {
        let error = format!("{}: {}", kind, message);
        self.hooks
            .emit(&HookEvent::tool_error(name, args, &error))
            .await;
        ToolResult::failure(error)
    }
}

/// Small extension used by dispatch to thread the session id onto
/// every emitted event without repeating the builder chain.
trait WithSessionOpt {
    fn with_session_opt(self, session_id: Option<String>) -> Self;
}

impl WithSessionOpt for HookEvent {
    fn with_session_opt(mut self, session_id: Option<String>) -> Self {
        self.session_id = session_id;
        self
    }
}
