//! Hook surfaces and the persistence coordinator.
//!
//! Hooks are first-class async callables invoked at well-defined points in
//! the execution pipeline. The [`PersistenceCoordinator`] wraps each
//! invocation in a load-then-call-then-store bracket so hooks can read and
//! write persisted state without the call sites knowing about storage.

use crate::error::{Error, Result};
use crate::merge_values;
use futures::future::BoxFuture;
use serde::Serialize;
use serde_json::Value;
use std::future::Future;
use std::sync::Arc;

/// Identifies where in the composite tree a hook is running.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ExecutionContext {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub workflow_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub phase_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub branch_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub request_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub function_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub job_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub run_id: Option<String>,
}

impl ExecutionContext {
    pub fn for_workflow(workflow_id: impl Into<String>) -> Self {
        Self {
            workflow_id: Some(workflow_id.into()),
            ..Self::default()
        }
    }

    pub fn for_job(job_id: impl Into<String>) -> Self {
        Self {
            job_id: Some(job_id.into()),
            ..Self::default()
        }
    }

    pub fn with_phase(mut self, phase_id: impl Into<String>) -> Self {
        self.phase_id = Some(phase_id.into());
        self
    }

    pub fn with_branch(mut self, branch_id: impl Into<String>) -> Self {
        self.branch_id = Some(branch_id.into());
        self
    }

    pub fn with_request(mut self, request_id: impl Into<String>) -> Self {
        self.request_id = Some(request_id.into());
        self
    }

    pub fn with_run(mut self, run_id: impl Into<String>) -> Self {
        self.run_id = Some(run_id.into());
        self
    }
}

/// Arguments passed to every state hook.
///
/// Store mode is signalled by a non-empty `buffer`; load mode by an empty
/// one. The hook's returned object is merged into the common buffer.
#[derive(Debug, Clone)]
pub struct HookArgs {
    pub execution_context: ExecutionContext,
    pub params: Option<Value>,
    pub buffer: Value,
    pub transaction_logs: Option<Vec<Value>>,
}

impl HookArgs {
    /// True when the coordinator is asking the hook to load state.
    pub fn is_load(&self) -> bool {
        self.buffer
            .as_object()
            .map(|map| map.is_empty())
            .unwrap_or(true)
    }
}

/// A caller-supplied async state hook.
pub type StateHook = Arc<dyn Fn(HookArgs) -> BoxFuture<'static, Result<Value>> + Send + Sync>;

/// Wraps an async closure as a [`StateHook`].
pub fn state_hook<F, Fut>(f: F) -> StateHook
where
    F: Fn(HookArgs) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<Value>> + Send + 'static,
{
    Arc::new(move |args| Box::pin(f(args)))
}

/// Wraps a synchronous closure as a [`StateHook`].
pub fn sync_state_hook<F>(f: F) -> StateHook
where
    F: Fn(HookArgs) -> Result<Value> + Send + Sync + 'static,
{
    Arc::new(move |args| {
        let out = f(args);
        Box::pin(async move { out })
    })
}

/// Wraps hook invocations with optional persistence.
///
/// When a persistence hook is configured, each user-hook call becomes:
/// load persisted state (empty-buffer call), merge into the common buffer,
/// invoke the user hook, merge its return, then store (non-empty-buffer
/// call) and merge whatever the store returns. Persistence failures are
/// logged and absorbed; only the user hook's own error is surfaced.
#[derive(Clone, Default)]
pub struct PersistenceCoordinator {
    persistence: Option<StateHook>,
}

impl PersistenceCoordinator {
    pub fn new(persistence: Option<StateHook>) -> Self {
        Self { persistence }
    }

    /// True when a persistence hook is configured.
    pub fn is_active(&self) -> bool {
        self.persistence.is_some()
    }

    /// Runs the load half of the bracket, merging loaded state into `buffer`.
    pub async fn load(&self, context: &ExecutionContext, buffer: &mut Value) {
        let Some(persistence) = &self.persistence else {
            return;
        };
        let args = HookArgs {
            execution_context: context.clone(),
            params: None,
            buffer: Value::Object(serde_json::Map::new()),
            transaction_logs: None,
        };
        match persistence(args).await {
            Ok(loaded) => merge_values(buffer, &loaded),
            Err(err) => {
                tracing::warn!(error = %err, "state load failed; continuing without persisted state");
            }
        }
    }

    /// Runs the store half of the bracket.
    pub async fn store(&self, context: &ExecutionContext, buffer: &Value) {
        let Some(persistence) = &self.persistence else {
            return;
        };
        let args = HookArgs {
            execution_context: context.clone(),
            params: None,
            buffer: buffer.clone(),
            transaction_logs: None,
        };
        if let Err(err) = persistence(args).await {
            tracing::warn!(error = %err, "state store failed; result was not persisted");
        }
    }

    /// Invokes `hook` inside the load/store bracket.
    ///
    /// Returns the merged buffer alongside the hook's own result: callers
    /// decide whether a hook error is absorbed (observability hooks) or
    /// surfaced (semantic hooks).
    pub async fn invoke(
        &self,
        hook: &StateHook,
        context: &ExecutionContext,
        params: Option<Value>,
        mut buffer: Value,
        transaction_logs: Option<Vec<Value>>,
    ) -> (Value, Result<()>) {
        self.load(context, &mut buffer).await;

        let args = HookArgs {
            execution_context: context.clone(),
            params,
            buffer: buffer.clone(),
            transaction_logs,
        };
        let hook_result = match hook(args).await {
            Ok(returned) => {
                merge_values(&mut buffer, &returned);
                Ok(())
            }
            Err(err) => Err(Error::Hook(err.to_string())),
        };

        self.store(context, &buffer).await;
        (buffer, hook_result)
    }
}
