use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::marker::PhantomData;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;

use super::BackgroundJob;
use crate::{JobError, QueueError, QueueResult};

/// Type-erased handler for runtime dispatch by job name
#[async_trait]
pub trait JobHandler: Send + Sync {
    async fn perform(&self, payload: Value) -> Result<(), JobError>;
}

/// Handler backed by an async closure over the raw payload
pub struct FnHandler<F> {
    f: F,
}

impl<F> FnHandler<F> {
    pub fn new(f: F) -> Self {
        Self { f }
    }
}

#[async_trait]
impl<F, Fut> JobHandler for FnHandler<F>
where
    F: Fn(Value) -> Fut + Send + Sync,
    Fut: Future<Output = Result<(), JobError>> + Send + 'static,
{
    async fn perform(&self, payload: Value) -> Result<(), JobError> {
        (self.f)(payload).await
    }
}

/// Handler that decodes the payload into a [`BackgroundJob`]
pub struct TypedHandler<J: BackgroundJob> {
    context: J::Context,
    _job: PhantomData<fn() -> J>,
}

impl<J: BackgroundJob> TypedHandler<J> {
    pub fn new(context: J::Context) -> Self {
        Self {
            context,
            _job: PhantomData,
        }
    }
}

#[async_trait]
impl<J: BackgroundJob> JobHandler for TypedHandler<J> {
    async fn perform(&self, payload: Value) -> Result<(), JobError> {
        let job: J = serde_json::from_value(payload)
            .map_err(|e| JobError::new(format!("Failed to deserialize {} payload: {e}", J::NAME)))?;
        job.perform(self.context.clone()).await
    }
}

/// Job name to handler table
#[derive(Clone, Default)]
pub struct JobRegistry {
    handlers: HashMap<String, Arc<dyn JobHandler>>,
}

impl JobRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a handler under `name`; names can only be registered once
    pub fn register_handler(
        &mut self,
        name: impl Into<String>,
        handler: Arc<dyn JobHandler>,
    ) -> QueueResult<()> {
        let name = name.into();
        if self.handlers.contains_key(&name) {
            return Err(QueueError::configuration(format!(
                "Job '{name}' already registered"
            )));
        }
        self.handlers.insert(name, handler);
        Ok(())
    }

    /// Register an async closure over the raw payload
    pub fn register_fn<F, Fut>(&mut self, name: impl Into<String>, f: F) -> QueueResult<()>
    where
        F: Fn(Value) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), JobError>> + Send + 'static,
    {
        self.register_handler(name, Arc::new(FnHandler::new(f)))
    }

    /// Register a typed job under [`BackgroundJob::NAME`]
    pub fn register<J: BackgroundJob>(&mut self, context: J::Context) -> QueueResult<()> {
        self.register_handler(J::NAME, Arc::new(TypedHandler::<J>::new(context)))
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn JobHandler>> {
        self.handlers.get(name).cloned()
    }

    pub fn is_registered(&self, name: &str) -> bool {
        self.handlers.contains_key(name)
    }

    /// Registered names, sorted
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<_> = self.handlers.keys().cloned().collect();
        names.sort_unstable();
        names
    }

    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }
}

impl fmt::Debug for JobRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("JobRegistry")
            .field("names", &self.names())
            .finish()
    }
}
