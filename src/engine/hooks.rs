//! Before/after hook dispatch, global and resource-scoped.

use crate::contract::Operation;
use crate::error::EngineError;
use serde_json::{Map, Value};
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum HookStage {
    Before,
    After,
}

/// Whether a dispatch round runs the cross-resource hooks or the ones scoped
/// to the current resource.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum HookScope {
    Global,
    Resource,
}

/// Mutable view of one operation as it flows through the pipeline. Before
/// hooks may rewrite the payload; after hooks may rewrite the result.
#[derive(Debug)]
pub struct HookContext {
    pub resource: String,
    pub operation: Operation,
    pub record_id: Option<String>,
    pub payload: Option<Map<String, Value>>,
    pub result: Option<Value>,
}

impl HookContext {
    pub fn new(resource: &str, operation: Operation) -> Self {
        HookContext {
            resource: resource.to_string(),
            operation,
            record_id: None,
            payload: None,
            result: None,
        }
    }
}

pub type HookFuture<'a> = Pin<Box<dyn Future<Output = Result<(), EngineError>> + Send + 'a>>;
pub type HookFn = Arc<dyn for<'a> Fn(&'a mut HookContext) -> HookFuture<'a> + Send + Sync>;

struct Registration {
    stage: HookStage,
    operation: Operation,
    /// `None` registers a global hook.
    resource: Option<String>,
    order: i32,
    hook: HookFn,
}

/// Hooks run in ascending declared order; the first failure aborts the
/// remaining pipeline and propagates to the caller.
#[derive(Default)]
pub struct HookDispatcher {
    registrations: Vec<Registration>,
}

impl HookDispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(
        &mut self,
        stage: HookStage,
        operation: Operation,
        resource: Option<&str>,
        order: i32,
        hook: HookFn,
    ) {
        self.registrations.push(Registration {
            stage,
            operation,
            resource: resource.map(str::to_string),
            order,
            hook,
        });
    }

    pub async fn dispatch(
        &self,
        stage: HookStage,
        scope: HookScope,
        ctx: &mut HookContext,
    ) -> Result<(), EngineError> {
        let mut selected: Vec<&Registration> = self
            .registrations
            .iter()
            .filter(|r| r.stage == stage && r.operation == ctx.operation)
            .filter(|r| match scope {
                HookScope::Global => r.resource.is_none(),
                HookScope::Resource => r.resource.as_deref() == Some(ctx.resource.as_str()),
            })
            .collect();
        selected.sort_by_key(|r| r.order);
        for registration in selected {
            (registration.hook)(ctx).await?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    fn recording_hook(log: Arc<Mutex<Vec<&'static str>>>, tag: &'static str) -> HookFn {
        Arc::new(move |_ctx| {
            let log = log.clone();
            Box::pin(async move {
                log.lock().unwrap().push(tag);
                Ok(())
            })
        })
    }

    #[tokio::test]
    async fn hooks_run_in_ascending_order_and_scope() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let mut dispatcher = HookDispatcher::new();
        dispatcher.register(HookStage::Before, Operation::Create, None, 2, recording_hook(log.clone(), "second"));
        dispatcher.register(HookStage::Before, Operation::Create, None, 1, recording_hook(log.clone(), "first"));
        dispatcher.register(
            HookStage::Before,
            Operation::Create,
            Some("other"),
            0,
            recording_hook(log.clone(), "scoped-elsewhere"),
        );

        let mut ctx = HookContext::new("tasks", Operation::Create);
        dispatcher.dispatch(HookStage::Before, HookScope::Global, &mut ctx).await.unwrap();
        assert_eq!(*log.lock().unwrap(), vec!["first", "second"]);
    }

    #[tokio::test]
    async fn first_failure_aborts() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let mut dispatcher = HookDispatcher::new();
        dispatcher.register(
            HookStage::Before,
            Operation::Delete,
            None,
            1,
            Arc::new(|_ctx| Box::pin(async { Err(EngineError::Unsupported("nope".into())) })),
        );
        dispatcher.register(HookStage::Before, Operation::Delete, None, 2, recording_hook(log.clone(), "late"));

        let mut ctx = HookContext::new("tasks", Operation::Delete);
        let err = dispatcher.dispatch(HookStage::Before, HookScope::Global, &mut ctx).await;
        assert!(err.is_err());
        assert!(log.lock().unwrap().is_empty());
    }
}
