//! Handler registry.
//!
//! Maps a namespace token (the part of a job name before the `.`) to a
//! handler object. Each handler declares the operations it offers, so a job
//! name can be checked before anything runs.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;
use futures::future::BoxFuture;
use serde_json::Value;

use crate::error::{JobError, QueueResult};
use crate::job::{JobInput, JobName};

/// A capability object that runs jobs for one namespace.
#[async_trait]
pub trait JobHandler: Send + Sync {
    /// Namespace this handler is registered under.
    fn namespace(&self) -> &str;

    /// Operations this handler accepts.
    fn operations(&self) -> Vec<String>;

    /// Run one operation.
    async fn invoke(&self, method: &str, input: JobInput) -> anyhow::Result<Value>;

    /// Whether `method` is one of [`operations`](Self::operations).
    fn supports(&self, method: &str) -> bool {
        self.operations().iter().any(|op| op == method)
    }
}

type OperationFn = Arc<dyn Fn(JobInput) -> BoxFuture<'static, anyhow::Result<Value>> + Send + Sync>;

/// A handler assembled from closures, one per operation.
pub struct FnHandler {
    namespace: String,
    operations: HashMap<String, OperationFn>,
}

impl FnHandler {
    pub fn new(namespace: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            operations: HashMap::new(),
        }
    }

    /// Add an operation.
    pub fn operation<F, Fut>(mut self, name: impl Into<String>, f: F) -> Self
    where
        F: Fn(JobInput) -> Fut + Send + Sync + 'static,
        Fut: std::future::Future<Output = anyhow::Result<Value>> + Send + 'static,
    {
        let f = Arc::new(f);
        self.operations.insert(
            name.into(),
            Arc::new(move |input| {
                let f = f.clone();
                Box::pin(async move { f(input).await })
            }),
        );
        self
    }
}

#[async_trait]
impl JobHandler for FnHandler {
    fn namespace(&self) -> &str {
        &self.namespace
    }

    fn operations(&self) -> Vec<String> {
        let mut names: Vec<String> = self.operations.keys().cloned().collect();
        names.sort();
        names
    }

    async fn invoke(&self, method: &str, input: JobInput) -> anyhow::Result<Value> {
        let op = self
            .operations
            .get(method)
            .ok_or_else(|| anyhow::anyhow!("no operation '{}'", method))?
            .clone();
        op(input).await
    }

    fn supports(&self, method: &str) -> bool {
        self.operations.contains_key(method)
    }
}

/// Registry of job handlers keyed by namespace.
pub struct HandlerRegistry {
    handlers: DashMap<String, Arc<dyn JobHandler>>,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self {
            handlers: DashMap::new(),
        }
    }

    /// Register a handler.
    ///
    /// Returns an error if the namespace is already taken.
    pub fn register(&self, handler: Arc<dyn JobHandler>) -> QueueResult<()> {
        let namespace = handler.namespace().to_string();

        if self.handlers.contains_key(&namespace) {
            return Err(JobError::AlreadyRegistered(namespace));
        }

        self.handlers.insert(namespace, handler);
        Ok(())
    }

    /// Remove a handler, returning it if it was registered.
    pub fn unregister(&self, namespace: &str) -> Option<Arc<dyn JobHandler>> {
        self.handlers.remove(namespace).map(|(_, handler)| handler)
    }

    /// Look up a handler by namespace.
    pub fn resolve(&self, namespace: &str) -> Option<Arc<dyn JobHandler>> {
        self.handlers.get(namespace).map(|h| h.clone())
    }

    pub fn contains(&self, namespace: &str) -> bool {
        self.handlers.contains_key(namespace)
    }

    /// Registered namespaces, sorted.
    pub fn namespaces(&self) -> Vec<String> {
        let mut names: Vec<String> = self.handlers.iter().map(|e| e.key().clone()).collect();
        names.sort();
        names
    }

    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }

    /// Resolve a parsed job name to a handler that offers its method.
    pub fn resolve_operation(&self, name: &JobName) -> QueueResult<Arc<dyn JobHandler>> {
        let handler = self
            .resolve(name.namespace())
            .ok_or_else(|| JobError::UnknownHandler(name.namespace().to_string()))?;

        if !handler.supports(name.method()) {
            return Err(JobError::UnknownMethod {
                namespace: name.namespace().to_string(),
                method: name.method().to_string(),
            });
        }

        Ok(handler)
    }
}

impl Default for HandlerRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn input(data: Value) -> JobInput {
        JobInput {
            job_id: "f:0".to_string(),
            queue_name: "posts".to_string(),
            data,
            previous_result: None,
            attempts_made: 1,
        }
    }

    fn post_handler() -> Arc<dyn JobHandler> {
        Arc::new(
            FnHandler::new("Post")
                .operation("latest", |_| async { Ok(json!({ "ok": true })) })
                .operation("echo", |input: JobInput| async move { Ok(input.data) }),
        )
    }

    #[test]
    fn test_register_and_resolve() {
        let registry = HandlerRegistry::new();
        registry.register(post_handler()).unwrap();

        assert!(registry.contains("Post"));
        assert_eq!(registry.len(), 1);
        assert_eq!(registry.namespaces(), vec!["Post"]);
        assert!(registry.resolve("Mail").is_none());
    }

    #[test]
    fn test_register_duplicate() {
        let registry = HandlerRegistry::new();
        registry.register(post_handler()).unwrap();
        let result = registry.register(post_handler());
        assert!(matches!(result, Err(JobError::AlreadyRegistered(ns)) if ns == "Post"));
    }

    #[test]
    fn test_unregister() {
        let registry = HandlerRegistry::new();
        registry.register(post_handler()).unwrap();
        assert!(registry.unregister("Post").is_some());
        assert!(registry.unregister("Post").is_none());
        assert!(registry.is_empty());
    }

    #[test]
    fn test_resolve_operation() {
        let registry = HandlerRegistry::new();
        registry.register(post_handler()).unwrap();

        let name = JobName::parse("Post.latest").unwrap();
        assert!(registry.resolve_operation(&name).is_ok());

        let name = JobName::parse("Post.missing").unwrap();
        assert!(matches!(
            registry.resolve_operation(&name),
            Err(JobError::UnknownMethod { .. })
        ));

        let name = JobName::parse("Foo.bar").unwrap();
        assert!(matches!(
            registry.resolve_operation(&name),
            Err(JobError::UnknownHandler(ns)) if ns == "Foo"
        ));
    }

    #[tokio::test]
    async fn test_fn_handler_invoke() {
        let handler = post_handler();
        assert_eq!(handler.operations(), vec!["echo", "latest"]);

        let value = handler.invoke("echo", input(json!({ "a": 1 }))).await.unwrap();
        assert_eq!(value, json!({ "a": 1 }));

        assert!(handler.invoke("nope", input(json!({}))).await.is_err());
    }
}
