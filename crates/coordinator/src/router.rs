//! Tool-call router: name dispatch, validation boundary, envelope, and
//! the deprecated-tool table.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

use coord_core::CoordError;
use coord_store::StateStore;
use coord_worker::spawn::BudgetDefaults;
use serde_json::Value;
use tokio::sync::Mutex;
use tracing::warn;

use crate::envelope::{self, CallMeta};
use crate::handlers;
use crate::wake::PendingShutdown;

/// Everything handlers need. Cheap to clone.
#[derive(Clone)]
pub struct Ctx {
    pub store: StateStore,
    pub defaults: BudgetDefaults,
    /// Pending cooperative-shutdown requests, keyed by request id. Lost on
    /// restart by design; the request message itself is durable.
    pub pending_shutdowns: Arc<Mutex<HashMap<String, PendingShutdown>>>,
}

/// Handler output: the textual result plus warnings destined for
/// `meta.warnings`.
#[derive(Debug)]
pub struct Reply {
    pub text: String,
    pub warnings: Vec<String>,
}

impl Reply {
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            warnings: Vec::new(),
        }
    }

    pub fn with_warnings(mut self, warnings: Vec<String>) -> Self {
        self.warnings = warnings;
        self
    }

    /// Pretty-printed JSON reply.
    pub fn json<T: serde::Serialize>(value: &T) -> anyhow::Result<Self> {
        Ok(Self::new(serde_json::to_string_pretty(value)?))
    }
}

/// Legacy cost-tool names: `(deprecated, canonical_tool, canonical_command)`.
/// Both names stay routable; the deprecated one gets a trailer.
pub const DEPRECATED_TOOLS: &[(&str, &str, &str)] = &[
    ("coord_cost_report", "coord_usage_report", "coord usage-report"),
    ("coord_cost_today", "coord_usage_report", "coord usage-report --window today"),
    ("coord_budget_status", "coord_usage_report", "coord usage-report --window budgets"),
];

pub struct Router {
    ctx: Ctx,
}

impl Router {
    pub fn new(store: StateStore) -> Self {
        Self {
            ctx: Ctx {
                store,
                defaults: BudgetDefaults::from_env(),
                pending_shutdowns: Arc::new(Mutex::new(HashMap::new())),
            },
        }
    }

    pub fn ctx(&self) -> &Ctx {
        &self.ctx
    }

    /// Dispatch one call and render the textual response, envelope and
    /// all. Never panics across the boundary; every failure becomes an
    /// error rendering.
    pub async fn handle(&self, tool: &str, arguments: &Value) -> String {
        let started = Instant::now();
        let request_id = ulid::Ulid::new().to_string();

        let result = self.dispatch(tool, arguments).await;
        let mut meta = CallMeta {
            tool: tool.to_string(),
            duration_ms: started.elapsed().as_millis() as u64,
            request_id,
            warnings: Vec::new(),
        };

        match result {
            Ok(reply) => {
                meta.warnings = reply.warnings;
                if envelope::envelope_enabled() {
                    envelope::success(&reply.text, &meta)
                } else if meta.warnings.is_empty() {
                    reply.text
                } else {
                    let mut text = reply.text;
                    for warning in &meta.warnings {
                        text.push_str(&format!("\nwarning: {warning}"));
                    }
                    text
                }
            }
            Err(err) => {
                warn!(tool, error = %err, "tool call failed");
                if envelope::envelope_enabled() {
                    envelope::failure(err.code(), &err.to_string(), &meta)
                } else {
                    envelope::plain_error(&err)
                }
            }
        }
    }

    /// Route to the matching handler; unknown names are validation
    /// errors. Deprecated names route to their canonical handler and get
    /// the deprecation trailer appended.
    pub async fn dispatch(&self, tool: &str, arguments: &Value) -> Result<Reply, CoordError> {
        if let Some((_, canonical_tool, canonical_command)) =
            DEPRECATED_TOOLS.iter().find(|(name, _, _)| *name == tool)
        {
            let mut reply = self.dispatch_inner(canonical_tool, arguments).await?;
            reply.text =
                append_deprecation(&reply.text, canonical_tool, canonical_command);
            return Ok(reply);
        }
        self.dispatch_inner(tool, arguments).await
    }

    async fn dispatch_inner(&self, tool: &str, arguments: &Value) -> Result<Reply, CoordError> {
        let ctx = &self.ctx;
        let result = match tool {
            // Sessions
            "coord_list_sessions" => handlers::session::list_sessions(ctx, arguments).await,
            "coord_get_session" => handlers::session::get_session(ctx, arguments).await,
            "coord_register_work" => handlers::session::register_work(ctx, arguments).await,
            "coord_resolve_session" => handlers::session::resolve_session(ctx, arguments).await,
            "coord_detect_conflicts" => handlers::session::detect_conflicts(ctx, arguments).await,

            // Messaging
            "coord_send_message" => handlers::message::send_message(ctx, arguments).await,
            "coord_check_inbox" => handlers::message::check_inbox(ctx, arguments).await,
            "coord_broadcast" => handlers::message::broadcast(ctx, arguments).await,
            "coord_send_directive" => handlers::message::send_directive(ctx, arguments).await,
            "coord_announce" => handlers::message::announce(ctx, arguments).await,
            "coord_message_dashboard" => handlers::message::dashboard(ctx, arguments).await,
            "coord_sla_check" => handlers::message::sla_check(ctx, arguments).await,
            "coord_get_thread" => handlers::message::get_thread(ctx, arguments).await,

            // Workers
            "coord_spawn_worker" => handlers::worker::spawn_worker(ctx, arguments).await,
            "coord_spawn_workers" => handlers::worker::spawn_workers(ctx, arguments).await,
            "coord_get_result" => handlers::worker::get_result(ctx, arguments).await,
            "coord_kill_worker" => handlers::worker::kill_worker(ctx, arguments).await,
            "coord_resume_worker" => handlers::worker::resume_worker(ctx, arguments).await,
            "coord_upgrade_worker" => handlers::worker::upgrade_worker(ctx, arguments).await,

            // Pipelines
            "coord_run_pipeline" => handlers::pipeline::run_pipeline(ctx, arguments).await,
            "coord_get_pipeline" => handlers::pipeline::get_pipeline(ctx, arguments).await,

            // Task board
            "coord_create_task" => handlers::task::create_task(ctx, arguments).await,
            "coord_update_task" => handlers::task::update_task(ctx, arguments).await,
            "coord_list_tasks" => handlers::task::list_tasks(ctx, arguments).await,
            "coord_get_task" => handlers::task::get_task(ctx, arguments).await,
            "coord_reassign_task" => handlers::task::reassign_task(ctx, arguments).await,
            "coord_get_task_audit" => handlers::task::get_task_audit(ctx, arguments).await,
            "coord_check_quality_gates" => handlers::task::check_quality_gates(ctx, arguments).await,
            "coord_approve_plan" => handlers::task::approve_plan(ctx, arguments).await,
            "coord_reject_plan" => handlers::task::reject_plan(ctx, arguments).await,

            // Teams
            "coord_create_team" => handlers::team::create_team(ctx, arguments).await,
            "coord_get_team" => handlers::team::get_team(ctx, arguments).await,
            "coord_team_queue_task" => handlers::team::queue_task(ctx, arguments).await,
            "coord_team_assign_next" => handlers::team::assign_next(ctx, arguments).await,
            "coord_team_rebalance" => handlers::team::rebalance(ctx, arguments).await,
            "coord_team_status" => handlers::team::status(ctx, arguments).await,

            // Context store
            "coord_write_context" => handlers::context::write_context(ctx, arguments).await,
            "coord_read_context" => handlers::context::read_context(ctx, arguments).await,
            "coord_export_context" => handlers::context::export_context(ctx, arguments).await,

            // Wake and shutdown
            "coord_wake_session" => handlers::wake::wake_session(ctx, arguments).await,
            "coord_force_wake" => handlers::wake::force_wake(ctx, arguments).await,
            "coord_shutdown_request" => handlers::wake::shutdown_request(ctx, arguments).await,
            "coord_shutdown_response" => handlers::wake::shutdown_response(ctx, arguments).await,

            // Admin and auxiliaries
            "coord_gc" => handlers::admin::gc(ctx, arguments).await,
            "coord_status" => handlers::admin::status(ctx, arguments).await,
            "coord_usage_report" => handlers::admin::usage_report(ctx, arguments).await,

            _ => {
                return Err(CoordError::validation(
                    "tool",
                    format!("unknown tool '{tool}'"),
                ));
            }
        };

        result.map_err(into_coord_error)
    }
}

/// At the router boundary every handler error collapses into the typed
/// taxonomy; anything untyped is a runtime error.
fn into_coord_error(err: anyhow::Error) -> CoordError {
    match err.downcast::<CoordError>() {
        Ok(typed) => typed,
        Err(other) => CoordError::runtime(other.to_string()),
    }
}

/// JSON results gain `deprecated`/`canonical_tool`/`canonical_command`
/// fields; plain text gets a trailer line.
fn append_deprecation(text: &str, canonical_tool: &str, canonical_command: &str) -> String {
    if let Ok(Value::Object(mut map)) = serde_json::from_str::<Value>(text) {
        map.insert("deprecated".to_string(), Value::Bool(true));
        map.insert(
            "canonical_tool".to_string(),
            Value::String(canonical_tool.to_string()),
        );
        map.insert(
            "canonical_command".to_string(),
            Value::String(canonical_command.to_string()),
        );
        serde_json::to_string_pretty(&map).unwrap_or_else(|_| text.to_string())
    } else {
        format!(
            "{text}\ndeprecated=true canonical_tool={canonical_tool} canonical_command={canonical_command}"
        )
    }
}

#[cfg(test)]
#[path = "router_tests.rs"]
mod tests;
