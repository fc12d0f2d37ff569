//! Completion signalling for async work running in another environment.
//!
//! A [`CompletionSource`] is handed into the target environment; the
//! matching [`RemoteTask`] stays with the caller. Whichever outcome is set
//! first wins; later attempts are ignored. If the source is dropped without
//! completing (the environment went away), the task resolves to
//! [`ToolkitError::ObjectDisposed`] instead of hanging.

use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use parking_lot::Mutex;
use tokio::sync::oneshot;

use crate::{FaultRecord, ToolkitError, ToolkitResult};

/// Why remote async work did not produce a value.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum TaskFault {
    Canceled,
    Faulted(Vec<FaultRecord>),
}

impl TaskFault {
    /// A single fault with a free-form type name.
    pub fn message(type_name: impl Into<String>, message: impl Into<String>) -> Self {
        TaskFault::Faulted(vec![FaultRecord::new(type_name, message)])
    }
}

impl<E: std::error::Error> From<E> for TaskFault {
    fn from(error: E) -> Self {
        TaskFault::Faulted(vec![FaultRecord::from_error(&error)])
    }
}

impl From<TaskFault> for ToolkitError {
    fn from(fault: TaskFault) -> Self {
        match fault {
            TaskFault::Canceled => ToolkitError::Canceled,
            TaskFault::Faulted(faults) => ToolkitError::RemoteFault { faults },
        }
    }
}

type Completion<R> = Result<R, TaskFault>;

/// Producer half: completes a [`RemoteTask`] from any environment.
pub struct CompletionSource<R> {
    sender: Arc<Mutex<Option<oneshot::Sender<Completion<R>>>>>,
}

impl<R: Send + 'static> CompletionSource<R> {
    /// A connected source and task.
    pub fn channel() -> (CompletionSource<R>, RemoteTask<R>) {
        let (sender, receiver) = oneshot::channel();
        (
            CompletionSource {
                sender: Arc::new(Mutex::new(Some(sender))),
            },
            RemoteTask { receiver },
        )
    }

    pub fn set_result(&self, value: R) -> bool {
        self.complete(Ok(value))
    }

    pub fn set_faults(&self, faults: Vec<FaultRecord>) -> bool {
        self.complete(Err(TaskFault::Faulted(faults)))
    }

    pub fn set_canceled(&self) -> bool {
        self.complete(Err(TaskFault::Canceled))
    }

    /// Complete with `outcome`. Returns `false` if already completed or the
    /// task was dropped.
    pub fn complete(&self, outcome: Completion<R>) -> bool {
        match self.sender.lock().take() {
            Some(sender) => sender.send(outcome).is_ok(),
            None => false,
        }
    }

    pub fn is_completed(&self) -> bool {
        self.sender.lock().is_none()
    }
}

impl<R> Clone for CompletionSource<R> {
    fn clone(&self) -> Self {
        CompletionSource {
            sender: Arc::clone(&self.sender),
        }
    }
}

impl<R> fmt::Debug for CompletionSource<R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CompletionSource")
            .field("completed", &self.sender.lock().is_none())
            .finish()
    }
}

/// Consumer half: the eventual outcome of remote async work.
///
/// Await it from async code, or call [`RemoteTask::wait`] from a plain
/// thread.
#[must_use = "a remote task does nothing unless awaited or waited on"]
pub struct RemoteTask<R> {
    receiver: oneshot::Receiver<Completion<R>>,
}

impl<R> RemoteTask<R> {
    /// Block the current thread until the task completes.
    ///
    /// Must not be called from inside an async runtime; await the task there.
    pub fn wait(self) -> ToolkitResult<R> {
        settle(self.receiver.blocking_recv())
    }
}

impl<R> Future for RemoteTask<R> {
    type Output = ToolkitResult<R>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        Pin::new(&mut self.receiver).poll(cx).map(settle)
    }
}

impl<R> fmt::Debug for RemoteTask<R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RemoteTask").finish_non_exhaustive()
    }
}

fn settle<R>(received: Result<Completion<R>, oneshot::error::RecvError>) -> ToolkitResult<R> {
    match received {
        Ok(completion) => completion.map_err(ToolkitError::from),
        Err(_) => Err(ToolkitError::disposed("remote task")),
    }
}
