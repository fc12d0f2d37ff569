//! Dedicated executor thread behind an environment.
//!
//! Each worker owns a single-threaded tokio runtime driving a `LocalSet`, so
//! futures spawned into an environment may be `!Send` and always resume on
//! the environment's own thread. Synchronous jobs are queued on the same
//! channel and run between async task polls.

use std::any::Any;
use std::io;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::thread::{self, JoinHandle, ThreadId};

use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tokio::task::LocalSet;
use tracing::{trace, warn};

/// Type-erased unit of work posted to a worker.
pub(crate) type BoxedJob = Box<dyn FnOnce() + Send + 'static>;

pub(crate) enum Message {
    Run(BoxedJob),
    Shutdown,
}

pub(crate) struct Worker {
    sender: UnboundedSender<Message>,
    thread: Option<JoinHandle<()>>,
    thread_id: ThreadId,
}

impl Worker {
    /// Start a worker thread. `enter` runs first on the new thread, before
    /// any job is accepted.
    pub(crate) fn start<E>(name: &str, enter: E) -> io::Result<Self>
    where
        E: FnOnce() + Send + 'static,
    {
        let (sender, receiver) = mpsc::unbounded_channel();
        let thread = thread::Builder::new()
            .name(format!("iso-env:{name}"))
            .spawn(move || {
                enter();
                worker_loop(receiver);
            })?;
        let thread_id = thread.thread().id();

        Ok(Worker {
            sender,
            thread: Some(thread),
            thread_id,
        })
    }

    /// Queue a job. Returns `false` once the worker has stopped.
    pub(crate) fn post(&self, job: BoxedJob) -> bool {
        self.sender.send(Message::Run(job)).is_ok()
    }

    /// Stop the worker after already-queued jobs. Joins the thread unless
    /// called from the worker itself.
    pub(crate) fn shutdown(mut self) {
        let _ = self.sender.send(Message::Shutdown);
        if thread::current().id() == self.thread_id {
            return;
        }
        if let Some(thread) = self.thread.take() {
            if thread.join().is_err() {
                warn!("environment worker exited by panic");
            }
        }
    }
}

fn worker_loop(mut receiver: UnboundedReceiver<Message>) {
    let runtime = match tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
    {
        Ok(runtime) => runtime,
        Err(e) => {
            warn!(error = %e, "failed to start environment executor");
            return;
        }
    };

    let local = LocalSet::new();
    local.block_on(&runtime, async move {
        while let Some(message) = receiver.recv().await {
            match message {
                Message::Run(job) => {
                    if let Err(payload) = catch_unwind(AssertUnwindSafe(job)) {
                        warn!(panic = %panic_message(payload.as_ref()), "job panicked");
                    }
                    // Give spawned tasks a turn between back-to-back jobs.
                    tokio::task::yield_now().await;
                }
                Message::Shutdown => break,
            }
        }
    });
    trace!("environment worker stopped");
    // Dropping the LocalSet cancels any task still pending.
}

/// Run `job`, converting a panic into its message.
pub(crate) fn run_guarded<R>(job: impl FnOnce() -> R) -> Result<R, String> {
    catch_unwind(AssertUnwindSafe(job)).map_err(|payload| panic_message(payload.as_ref()))
}

/// Best-effort text of a panic payload.
pub fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&'static str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "panic with non-string payload".to_string()
    }
}
