//! Running caller-supplied logic inside another environment.
//!
//! - [`RemoteAction`]: no result, 0 to 4 arguments
//! - [`RemoteFunc`]: a result, 0 to 4 arguments
//! - [`RemoteFuncAsync`]: an async result, 0 to 5 arguments
//!
//! Every call checks the environment up front, runs through a short-lived
//! proxy that is disposed before the call returns, and reports a panic
//! inside the environment as [`ToolkitError::RemoteFault`]. Arguments and
//! results cross the boundary by value.
//!
//! ```text
//! let answer = RemoteFunc::invoke1(&env, 10, |x| x + 1)?;   // 11
//! let task = RemoteFuncAsync::invoke(&env, || async { Ok(42) })?;
//! assert_eq!(task.await?, 42);
//! ```

use std::future::Future;

use iso_host::Environment;
use tracing::trace;

use crate::remote::{Remote, RemoteConstruct};
use crate::{CompletionSource, FaultRecord, RemoteTask, TaskFault, ToolkitResult};

/// Boundary-resident runner for synchronous calls.
#[derive(Debug, Default)]
pub struct Invoker;

impl RemoteConstruct for Invoker {
    type Args = ();

    fn construct((): ()) -> Self {
        Invoker
    }
}

fn call_remote<R, F>(environment: &Environment, f: F) -> ToolkitResult<R>
where
    F: FnOnce() -> R + Send + 'static,
    R: Send + 'static,
{
    let proxy = Remote::<Invoker>::create_proxy(environment, ())?;
    trace!(environment = environment.name(), "remote call");
    proxy.invoke(move |_| f())
}

/// Boundary-resident starter for async calls.
///
/// The future is spawned on the executor of the environment the starter
/// lives in; its outcome is reported through a [`CompletionSource`].
#[derive(Debug, Default)]
pub struct AsyncInvoker;

impl RemoteConstruct for AsyncInvoker {
    type Args = ();

    fn construct((): ()) -> Self {
        AsyncInvoker
    }
}

impl AsyncInvoker {
    pub fn start<R, M, Fut>(&self, make: M, source: CompletionSource<R>) -> ToolkitResult<()>
    where
        R: Send + 'static,
        M: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = Result<R, TaskFault>> + 'static,
    {
        Environment::current().spawn(move || async move {
            // A nested task so a panic surfaces as a JoinError instead of
            // tearing down the driver.
            let outcome = tokio::task::spawn_local(async move { make().await }).await;
            match outcome {
                Ok(Ok(value)) => source.set_result(value),
                Ok(Err(TaskFault::Canceled)) => source.set_canceled(),
                Ok(Err(TaskFault::Faulted(faults))) => source.set_faults(faults),
                Err(join) if join.is_panic() => {
                    let payload = join.into_panic();
                    source.set_faults(vec![FaultRecord::from_panic(payload.as_ref())])
                }
                Err(_) => source.set_canceled(),
            };
        })?;
        Ok(())
    }
}

fn start_remote<R, M, Fut>(environment: &Environment, make: M) -> ToolkitResult<RemoteTask<R>>
where
    R: Send + 'static,
    M: FnOnce() -> Fut + Send + 'static,
    Fut: Future<Output = Result<R, TaskFault>> + 'static,
{
    let (source, task) = CompletionSource::channel();
    let proxy = Remote::<AsyncInvoker>::create_proxy(environment, ())?;
    proxy.invoke(move |starter| starter.start(make, source))??;
    trace!(environment = environment.name(), "remote async call scheduled");
    Ok(task)
}

/// Runs an action with no result inside an environment.
#[derive(Debug)]
pub struct RemoteAction;

/// Runs a function inside an environment and returns its result.
#[derive(Debug)]
pub struct RemoteFunc;

/// Runs an async function inside an environment.
///
/// The future runs on the target environment's executor and need not be
/// `Send`. Return `Err(TaskFault::Faulted(..))` (or `?` any error) to fault,
/// `Err(TaskFault::Canceled)` to cancel.
#[derive(Debug)]
pub struct RemoteFuncAsync;

macro_rules! sync_arities {
    ($($method:ident($($arg:ident: $ty:ident),*);)*) => {
        impl RemoteAction {
            $(
                pub fn $method<$($ty,)* F>(
                    environment: &Environment,
                    $($arg: $ty,)*
                    action: F,
                ) -> ToolkitResult<()>
                where
                    $($ty: Send + 'static,)*
                    F: FnOnce($($ty),*) + Send + 'static,
                {
                    call_remote(environment, move || action($($arg),*))
                }
            )*
        }

        impl RemoteFunc {
            $(
                pub fn $method<$($ty,)* R, F>(
                    environment: &Environment,
                    $($arg: $ty,)*
                    func: F,
                ) -> ToolkitResult<R>
                where
                    $($ty: Send + 'static,)*
                    R: Send + 'static,
                    F: FnOnce($($ty),*) -> R + Send + 'static,
                {
                    call_remote(environment, move || func($($arg),*))
                }
            )*
        }
    };
}

macro_rules! async_arities {
    ($($method:ident($($arg:ident: $ty:ident),*);)*) => {
        impl RemoteFuncAsync {
            $(
                pub fn $method<$($ty,)* R, F, Fut>(
                    environment: &Environment,
                    $($arg: $ty,)*
                    func: F,
                ) -> ToolkitResult<RemoteTask<R>>
                where
                    $($ty: Send + 'static,)*
                    R: Send + 'static,
                    F: FnOnce($($ty),*) -> Fut + Send + 'static,
                    Fut: Future<Output = Result<R, TaskFault>> + 'static,
                {
                    start_remote(environment, move || func($($arg),*))
                }
            )*
        }
    };
}

sync_arities! {
    invoke();
    invoke1(arg1: T1);
    invoke2(arg1: T1, arg2: T2);
    invoke3(arg1: T1, arg2: T2, arg3: T3);
    invoke4(arg1: T1, arg2: T2, arg3: T3, arg4: T4);
}

async_arities! {
    invoke();
    invoke1(arg1: T1);
    invoke2(arg1: T1, arg2: T2);
    invoke3(arg1: T1, arg2: T2, arg3: T3);
    invoke4(arg1: T1, arg2: T2, arg3: T3, arg4: T4);
    invoke5(arg1: T1, arg2: T2, arg3: T3, arg4: T4, arg5: T5);
}

#[cfg(test)]
#[expect(clippy::unwrap_used, reason = "Tests use unwrap for brevity")]
mod tests;
