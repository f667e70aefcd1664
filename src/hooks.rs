//! # Extension hooks
//!
//! Phase-boundary callbacks the Orchestrator invokes around each
//! component without any component needing to know hooks exist. Used
//! for cross-cutting concerns (extra metrics export, audit logging) that
//! don't belong in the core tick logic.

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use serde_json::Value;

use crate::error::Result;

/// The point in a tick a hook is attached to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HookPoint {
    /// Before the tick begins any work.
    PreTick,
    /// After the tick has fully completed.
    PostTick,
    /// Before metrics/backlog/node state is refreshed.
    PreMonitor,
    /// After refresh, before scoring.
    PostMonitor,
    /// Before the replica and node decisions are evaluated.
    PreDecide,
    /// After decisions were evaluated, before they're applied.
    PostDecide,
    /// Before a decided action is applied to the cluster.
    PreExecute,
    /// After an action has been applied (or failed to apply).
    PostExecute,
}

/// Key/value bag passed to hooks, cheap to clone and carry across an
/// await point.
#[derive(Debug, Clone, Default)]
pub struct HookContext {
    values: HashMap<String, Value>,
}

impl HookContext {
    /// An empty context.
    pub fn new() -> Self {
        Self::default()
    }

    /// Attach a serializable value under `key`.
    pub fn set(&mut self, key: impl Into<String>, value: impl serde::Serialize) {
        if let Ok(v) = serde_json::to_value(value) {
            self.values.insert(key.into(), v);
        }
    }

    /// Retrieve and deserialize a previously set value.
    pub fn get<T: serde::de::DeserializeOwned>(&self, key: &str) -> Option<T> {
        self.values.get(key).and_then(|v| serde_json::from_value(v.clone()).ok())
    }
}

type HookFn = Arc<dyn Fn(HookContext) -> Pin<Box<dyn Future<Output = Result<()>> + Send>> + Send + Sync>;

/// Registry of callbacks keyed by `HookPoint`, invoked in registration
/// order. A hook returning an error does not abort the tick; it is
/// logged by the caller and the remaining hooks still run.
#[derive(Default, Clone)]
pub struct HookRegistry {
    hooks: HashMap<HookPoint, Vec<HookFn>>,
}

impl HookRegistry {
    /// An empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `f` to run whenever `point` fires.
    pub fn register<F, Fut>(&mut self, point: HookPoint, f: F)
    where
        F: Fn(HookContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<()>> + Send + 'static,
    {
        self.hooks.entry(point).or_default().push(Arc::new(move |ctx| Box::pin(f(ctx))));
    }

    /// Run every hook registered for `point`, in order, collecting
    /// errors rather than stopping at the first.
    pub async fn run(&self, point: HookPoint, ctx: HookContext) -> Vec<crate::error::PulseError> {
        let mut errors = Vec::new();
        if let Some(fns) = self.hooks.get(&point) {
            for f in fns {
                if let Err(e) = f(ctx.clone()).await {
                    errors.push(e);
                }
            }
        }
        errors
    }

    /// Whether any hook is registered for `point`.
    pub fn has_hooks(&self, point: HookPoint) -> bool {
        self.hooks.get(&point).map_or(false, |v| !v.is_empty())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn hooks_run_in_registration_order() {
        let mut registry = HookRegistry::new();
        let order = Arc::new(std::sync::Mutex::new(Vec::new()));

        let o1 = order.clone();
        registry.register(HookPoint::PreTick, move |_| {
            let o1 = o1.clone();
            async move {
                o1.lock().unwrap().push(1);
                Ok(())
            }
        });
        let o2 = order.clone();
        registry.register(HookPoint::PreTick, move |_| {
            let o2 = o2.clone();
            async move {
                o2.lock().unwrap().push(2);
                Ok(())
            }
        });

        registry.run(HookPoint::PreTick, HookContext::new()).await;
        assert_eq!(*order.lock().unwrap(), vec![1, 2]);
    }

    #[tokio::test]
    async fn missing_hook_point_runs_nothing() {
        let registry = HookRegistry::new();
        let errors = registry.run(HookPoint::PostTick, HookContext::new()).await;
        assert!(errors.is_empty());
    }

    #[tokio::test]
    async fn context_roundtrips_values() {
        let mut ctx = HookContext::new();
        ctx.set("replicas", 5u32);
        assert_eq!(ctx.get::<u32>("replicas"), Some(5));
    }
}
