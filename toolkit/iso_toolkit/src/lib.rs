//! Isolated module-loading contexts.
//!
//! Built on the environments of `iso_host`, this crate provides:
//!
//! - [`IsolationContext`]: a disposable isolated environment with a loader
//!   and probe-path resolvers on both sides of the boundary
//! - [`PathResolver`]: resolves missing modules from an ordered set of probe
//!   directories with a chosen [`LoadStrategy`]
//! - [`ModuleTarget`]: a serializable descriptor of a loaded module
//! - [`Remote`]: a handle to an object constructed inside another environment
//! - [`RemoteAction`], [`RemoteFunc`], [`RemoteFuncAsync`]: run caller logic
//!   inside another environment
//!
//! Enable logging with `RUST_LOG=iso_toolkit=debug` and [`init_tracing`].

mod cancel;
mod config;
mod context;
mod disposable;
mod error;
mod invoke;
mod loader;
mod remote;
mod resolver;
mod strategy;
mod target;
mod task;

pub use cancel::CancelToken;
pub use config::{
    ContextConfig, ENV_APPLICATION_BASE, ENV_LOAD_STRATEGY, ENV_PRIVATE_BIN_PATH, ENV_PROBE_PATHS,
};
pub use context::IsolationContext;
pub use disposable::DisposableEnvironment;
pub use error::{FaultRecord, ToolkitError, ToolkitResult};
pub use invoke::{AsyncInvoker, Invoker, RemoteAction, RemoteFunc, RemoteFuncAsync};
pub use loader::{HostLoader, ModuleLoader, TargetLoader};
pub use remote::{Remote, RemoteConstruct};
pub use resolver::{PathResolver, ProbePathSet, RemoteStrategyOverride, StrategyGuard};
pub use strategy::LoadStrategy;
pub use target::ModuleTarget;
pub use task::{CompletionSource, RemoteTask, TaskFault};

use std::sync::Once;

static TRACING_INIT: Once = Once::new();

/// Initialize tracing for debug output.
///
/// Safe to call multiple times. Does nothing unless `RUST_LOG` is set.
pub fn init_tracing() {
    TRACING_INIT.call_once(|| {
        use tracing_subscriber::{fmt, prelude::*, EnvFilter};

        if std::env::var("RUST_LOG").is_ok() {
            let filter = EnvFilter::from_default_env();
            // Another subscriber may already be installed by the host.
            let _ = tracing_subscriber::registry()
                .with(fmt::layer().with_target(true).with_level(true))
                .with(filter)
                .try_init();
        }
    });
}
