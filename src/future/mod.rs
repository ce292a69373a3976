//! Futures with progress, status, cancellation and delegation.
//!
//! Every long-running operation in the core is represented as a [`Future`]
//! produced by [`spawn`]. The task body receives a [`Notifier`] to report
//! progress and status, and to await sub-futures: awaiting wires the child's
//! reports into the parent (delegation) and re-raises the child's error.
//!
//! State machine: `Pending -> Running -> (Finished | Canceled | Exception)`.
//! Terminal states are sticky, and a late subscriber is replayed the events
//! it missed, so subscribing never races against completion.

mod pool;
mod promise;

use std::sync::mpsc;
use std::sync::{Arc, Mutex};

use crate::error::{Error, Result};

use pool::TaskSlot;
use promise::{Core, ReportSink};

pub use promise::{FutureEvent, FutureState};

/// Consumer handle of an asynchronous operation.
pub struct Future<T: Send + 'static> {
    core: Arc<Core<T>>,
    task: Option<Arc<TaskSlot>>,
}

/// Producer handle held by the running task body.
struct Promise<T: Send + 'static> {
    core: Arc<Core<T>>,
}

/// Capability passed to a task body for reporting and awaiting.
#[derive(Clone)]
pub struct Notifier {
    sink: Arc<dyn ReportSink>,
}

/// Cancellation handle detached from the future's lifetime.
#[derive(Clone)]
pub struct CancelToken {
    sink: Arc<dyn ReportSink>,
    task: Option<Arc<TaskSlot>>,
}

/// Run a task body on the worker pool and hand back its future.
pub fn spawn<T, F>(body: F) -> Future<T>
where
    T: Send + 'static,
    F: FnOnce(&Notifier) -> Result<T> + Send + 'static,
{
    let core = Arc::new(Core::new());
    let promise = Promise {
        core: Arc::clone(&core),
    };
    let slot = Arc::new(TaskSlot::new(Box::new(move || promise.run(body))));
    pool::enqueue(Arc::clone(&slot));
    Future {
        core,
        task: Some(slot),
    }
}

impl<T: Send + 'static> Promise<T> {
    fn run<F>(self, body: F)
    where
        F: FnOnce(&Notifier) -> Result<T>,
    {
        self.core.report_started();
        if self.core.cancel_requested() {
            self.core.report_canceled();
            return;
        }
        let notifier = Notifier {
            sink: Arc::clone(&self.core) as Arc<dyn ReportSink>,
        };
        // A panicking body must still terminate the future, or every waiter
        // would block forever.
        let outcome =
            std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| body(&notifier)));
        match outcome {
            Ok(Ok(value)) => self.core.complete(value),
            Ok(Err(error)) if error.is_canceled() => self.core.report_canceled(),
            Ok(Err(error)) => self.core.report_exception(&error),
            Err(panic) => {
                let message = panic
                    .downcast_ref::<&str>()
                    .map(|s| s.to_string())
                    .or_else(|| panic.downcast_ref::<String>().cloned())
                    .unwrap_or_else(|| "unknown panic".to_string());
                self.core.report_exception(&Error::new(
                    crate::error::ErrorKind::Io,
                    format!("internal error: task panicked: {}", message),
                ));
            }
        }
    }
}

impl<T: Send + 'static> Future<T> {
    /// Block until terminal and return the value, re-raising any reported
    /// error.
    pub fn get(self) -> Result<T> {
        // If the job has not been picked up yet, run it on this thread
        // instead of idling; semantics are identical and a waiting worker
        // can never deadlock the pool.
        if let Some(slot) = &self.task {
            if let Some(job) = slot.take() {
                job();
            }
        }
        self.core.wait_terminal();
        self.core.take_result()
    }

    /// Request cooperative cancellation. Idempotent.
    pub fn cancel(&self) {
        self.cancel_token().cancel();
    }

    pub fn cancel_token(&self) -> CancelToken {
        CancelToken {
            sink: Arc::clone(&self.core) as Arc<dyn ReportSink>,
            task: self.task.clone(),
        }
    }

    pub fn state(&self) -> FutureState {
        self.core.state()
    }

    /// Subscribe to every event. Replays the current snapshot first.
    pub fn on_event(&self, subscriber: impl FnMut(&FutureEvent) + Send + 'static) {
        self.core.subscribe(Box::new(subscriber));
    }

    pub fn on_started(&self, mut f: impl FnMut() + Send + 'static) {
        self.on_event(move |event| {
            if matches!(event, FutureEvent::Started) {
                f();
            }
        });
    }

    pub fn on_finished(&self, mut f: impl FnMut() + Send + 'static) {
        self.on_event(move |event| {
            if matches!(event, FutureEvent::Finished) {
                f();
            }
        });
    }

    pub fn on_canceled(&self, mut f: impl FnMut() + Send + 'static) {
        self.on_event(move |event| {
            if matches!(event, FutureEvent::Canceled) {
                f();
            }
        });
    }

    pub fn on_progress(&self, mut f: impl FnMut(u64, u64) + Send + 'static) {
        self.on_event(move |event| {
            if let FutureEvent::Progress { current, total } = event {
                f(*current, *total);
            }
        });
    }

    pub fn on_status(&self, mut f: impl FnMut(&str) + Send + 'static) {
        self.on_event(move |event| {
            if let FutureEvent::Status(message) = event {
                f(message);
            }
        });
    }

    pub fn on_exception(&self, mut f: impl FnMut(&Error) + Send + 'static) {
        self.on_event(move |event| {
            if let FutureEvent::Exception(error) = event {
                f(error);
            }
        });
    }

    /// Chain a continuation that runs after this future finishes.
    ///
    /// Unlike [`Notifier::wait`], combinators observe the upstream without
    /// delegation: its progress and status flow through, but its error stays
    /// transformable instead of terminating the downstream future directly.
    pub fn then<U, F>(self, f: F) -> Future<U>
    where
        U: Send + 'static,
        F: FnOnce(T) -> Result<U> + Send + 'static,
    {
        spawn(move |notifier| {
            let value = notifier.observe(self)?;
            f(value)
        })
    }

    /// Map a reported error. Cancellation passes through unchanged.
    pub fn map_err<F>(self, f: F) -> Future<T>
    where
        F: FnOnce(Error) -> Error + Send + 'static,
    {
        spawn(move |notifier| match notifier.observe(self) {
            Ok(value) => Ok(value),
            Err(error) if error.is_canceled() => Err(error),
            Err(error) => Err(f(error)),
        })
    }

    /// Recover from a reported error. Cancellation passes through unchanged.
    pub fn catching<F>(self, f: F) -> Future<T>
    where
        F: FnOnce(Error) -> Result<T> + Send + 'static,
    {
        spawn(move |notifier| match notifier.observe(self) {
            Ok(value) => Ok(value),
            Err(error) if error.is_canceled() => Err(error),
            Err(error) => f(error),
        })
    }
}

impl CancelToken {
    pub fn cancel(&self) {
        self.sink.request_cancel();
        // A task that never started is terminated directly; taking its job
        // out of the slot keeps the pool from running it.
        if let Some(slot) = &self.task {
            if slot.take().is_some() {
                self.sink.report_started();
                self.sink.report_canceled();
            }
        }
    }
}

impl Notifier {
    /// Report a status message. Fails with `Canceled` once cancellation was
    /// requested.
    pub fn status(&self, message: impl AsRef<str>) -> Result<()> {
        self.check_canceled()?;
        self.sink.report_status(message.as_ref());
        Ok(())
    }

    /// Report progress. Fails with `Canceled` once cancellation was
    /// requested.
    pub fn progress(&self, current: u64, total: u64) -> Result<()> {
        self.check_canceled()?;
        self.sink.report_progress(current, total);
        Ok(())
    }

    /// Await a sub-future: delegate its reports into this task, block until
    /// it terminates, and re-raise its error. Canceling this task cancels
    /// the child.
    pub fn wait<U: Send + 'static>(&self, future: Future<U>) -> Result<U> {
        future.core.set_delegate(Arc::clone(&self.sink))?;
        let child = future.cancel_token();
        self.sink.add_cancel_hook(Box::new(move || child.cancel()));
        if self.sink.cancel_requested() {
            future.cancel();
        }
        let value = future.get()?;
        self.check_canceled()?;
        Ok(value)
    }

    pub fn is_canceled(&self) -> bool {
        self.sink.cancel_requested()
    }

    /// Wait for a future without delegating to it.
    ///
    /// Progress and status are re-reported on this task, cancellation still
    /// cascades, but the child's exception is only returned, never forwarded
    /// into this task's terminal state. This is what combinators build on.
    fn observe<U: Send + 'static>(&self, future: Future<U>) -> Result<U> {
        let progress_notifier = self.clone();
        future.on_progress(move |current, total| {
            let _ = progress_notifier.progress(current, total);
        });
        let status_notifier = self.clone();
        future.on_status(move |message| {
            let _ = status_notifier.status(message);
        });
        let child = future.cancel_token();
        self.sink.add_cancel_hook(Box::new(move || child.cancel()));
        if self.sink.cancel_requested() {
            future.cancel();
        }
        future.get()
    }

    fn check_canceled(&self) -> Result<()> {
        if self.sink.cancel_requested() {
            Err(Error::canceled())
        } else {
            Ok(())
        }
    }
}

/// Combine futures, failing fast on the first error and canceling the rest.
///
/// Progress is merged as the sum over all children; the terminal event fires
/// after the last child in the success case.
pub fn all<T: Send + 'static>(futures: Vec<Future<T>>) -> Future<Vec<T>> {
    spawn(move |notifier| {
        let count = futures.len();
        let merged = Arc::new(Mutex::new(vec![(0u64, 0u64); count]));
        let (terminal_tx, terminal_rx) = mpsc::channel::<usize>();

        for (index, future) in futures.iter().enumerate() {
            let merged = Arc::clone(&merged);
            let progress_notifier = notifier.clone();
            future.on_progress(move |current, total| {
                let mut slots = merged.lock().unwrap();
                slots[index] = (current, total);
                let current_sum = slots.iter().map(|(c, _)| c).sum();
                let total_sum = slots.iter().map(|(_, t)| t).sum();
                let _ = progress_notifier.progress(current_sum, total_sum);
            });

            let tx = terminal_tx.clone();
            future.on_event(move |event| {
                if matches!(
                    event,
                    FutureEvent::Finished | FutureEvent::Canceled | FutureEvent::Exception(_)
                ) {
                    let _ = tx.send(index);
                }
            });

            let child = future.cancel_token();
            notifier
                .sink
                .add_cancel_hook(Box::new(move || child.cancel()));
        }
        drop(terminal_tx);

        let mut slots: Vec<Option<Future<T>>> = futures.into_iter().map(Some).collect();
        let mut values: Vec<Option<T>> = (0..count).map(|_| None).collect();
        let mut remaining = count;
        while remaining > 0 {
            let index = terminal_rx
                .recv()
                .map_err(|_| Error::canceled())?;
            let future = slots[index]
                .take()
                .expect("terminal event delivered twice for one child");
            match future.get() {
                Ok(value) => values[index] = Some(value),
                Err(error) => {
                    for pending in slots.iter().flatten() {
                        pending.cancel();
                    }
                    return Err(error);
                }
            }
            remaining -= 1;
        }

        Ok(values
            .into_iter()
            .map(|v| v.expect("every child contributed a value"))
            .collect())
    })
}

/// Block on a future while draining its status and progress to the terminal.
///
/// Used only by the command-line front-end.
pub fn await_terminal<T: Send + 'static>(future: Future<T>) -> Result<T> {
    future.on_status(|message| {
        println!("  {}", message);
    });
    let last_percent = Mutex::new(None::<u64>);
    future.on_progress(move |current, total| {
        if total == 0 {
            return;
        }
        let percent = current * 100 / total;
        let mut last = last_percent.lock().unwrap();
        if *last != Some(percent) {
            *last = Some(percent);
            println!("  {}% ({}/{})", percent, current, total);
        }
    });
    future.get()
}
