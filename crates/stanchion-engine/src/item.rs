//! Execution items: the units a gateway batch is made of.

use futures::future::BoxFuture;
use serde_json::Value;
use stanchion_core::{RequestSpec, Result};
use std::future::Future;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// The callable behind a function item.
pub type ItemFn = Arc<dyn Fn(Option<Value>) -> BoxFuture<'static, Result<Value>> + Send + Sync>;

/// An in-process function invocation.
#[derive(Clone)]
pub struct FunctionItem {
    pub id: Option<String>,
    pub group_id: Option<String>,
    /// Input handed to the callable on every attempt.
    pub params: Option<Value>,
    pub f: ItemFn,
    pub cancel: Option<CancellationToken>,
}

impl FunctionItem {
    /// Wraps an async closure.
    pub fn new<F, Fut>(id: impl Into<String>, f: F) -> Self
    where
        F: Fn(Option<Value>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Value>> + Send + 'static,
    {
        Self {
            id: Some(id.into()),
            group_id: None,
            params: None,
            f: Arc::new(move |params| Box::pin(f(params))),
            cancel: None,
        }
    }

    pub fn with_params(mut self, params: Value) -> Self {
        self.params = Some(params);
        self
    }

    pub fn with_group(mut self, group_id: impl Into<String>) -> Self {
        self.group_id = Some(group_id.into());
        self
    }

    pub fn with_cancel(mut self, cancel: CancellationToken) -> Self {
        self.cancel = Some(cancel);
        self
    }
}

impl std::fmt::Debug for FunctionItem {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FunctionItem")
            .field("id", &self.id)
            .field("group_id", &self.group_id)
            .finish_non_exhaustive()
    }
}

/// One unit of work in a batch: an outbound request or a function call.
#[derive(Debug, Clone)]
pub enum ExecutionItem {
    Request(RequestSpec),
    Function(FunctionItem),
}

impl ExecutionItem {
    /// Wraps a request descriptor.
    pub fn request(spec: RequestSpec) -> Self {
        ExecutionItem::Request(spec)
    }

    /// Wraps an async closure as a function item.
    pub fn function<F, Fut>(id: impl Into<String>, f: F) -> Self
    where
        F: Fn(Option<Value>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Value>> + Send + 'static,
    {
        ExecutionItem::Function(FunctionItem::new(id, f))
    }

    /// The item's identifier, when one was assigned.
    pub fn id(&self) -> Option<&str> {
        match self {
            ExecutionItem::Request(spec) => spec.id.as_deref(),
            ExecutionItem::Function(item) => item.id.as_deref(),
        }
    }

    /// The item's request-group scope, when one was assigned.
    pub fn group_id(&self) -> Option<&str> {
        match self {
            ExecutionItem::Request(spec) => spec.group_id.as_deref(),
            ExecutionItem::Function(item) => item.group_id.as_deref(),
        }
    }

    /// True for request items.
    pub fn is_request(&self) -> bool {
        matches!(self, ExecutionItem::Request(_))
    }

    /// Attaches an abort handle, returning the updated item.
    pub fn with_cancel(self, cancel: CancellationToken) -> Self {
        match self {
            ExecutionItem::Request(spec) => ExecutionItem::Request(spec.with_cancel(cancel)),
            ExecutionItem::Function(item) => ExecutionItem::Function(item.with_cancel(cancel)),
        }
    }
}
