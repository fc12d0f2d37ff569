//! Resolution hooks.
//!
//! When an environment cannot satisfy a module reference from what is
//! already loaded, it asks each registered hook in registration order. The
//! first hook returning a module wins; `None` means "try the next one".

use std::sync::atomic::{AtomicU64, Ordering};

use crate::{Environment, ModuleHandle};

/// Handle for removing a registered hook.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub struct HookId(u64);

impl HookId {
    pub(crate) fn next() -> Self {
        static NEXT: AtomicU64 = AtomicU64::new(1);
        HookId(NEXT.fetch_add(1, Ordering::Relaxed))
    }
}

/// Receives "module not found" notifications from an environment.
pub trait ResolveHook: Send + Sync {
    /// Try to produce the module named `request` inside `environment`.
    fn resolve(&self, environment: &Environment, request: &str) -> Option<ModuleHandle>;
}

impl<F> ResolveHook for F
where
    F: Fn(&Environment, &str) -> Option<ModuleHandle> + Send + Sync,
{
    fn resolve(&self, environment: &Environment, request: &str) -> Option<ModuleHandle> {
        self(environment, request)
    }
}
