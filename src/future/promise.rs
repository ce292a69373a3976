//! Shared promise core: state, snapshots, subscribers and delegation.
//!
//! A [`Core`] is the single piece of state shared between the producer
//! ([`Promise`](super::Promise)) and consumer ([`Future`](super::Future))
//! handles. Every report latches the value under the core mutex, fans it out
//! to subscribers in subscribe order, and forwards it to the delegation
//! parent when one is set.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Condvar, Mutex};

use crate::error::{Error, ErrorKind, Result};

/// Lifecycle of a future.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FutureState {
    Pending,
    Running,
    Finished,
    Canceled,
    Exception,
}

impl FutureState {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            FutureState::Finished | FutureState::Canceled | FutureState::Exception
        )
    }
}

/// A tagged event delivered to subscribers.
#[derive(Debug, Clone)]
pub enum FutureEvent {
    Started,
    Progress { current: u64, total: u64 },
    Status(String),
    Finished,
    Canceled,
    Exception(Error),
}

type Subscriber = Box<dyn FnMut(&FutureEvent) + Send>;
type CancelHook = Box<dyn FnOnce() + Send>;

static NEXT_CORE_ID: AtomicU64 = AtomicU64::new(1);

struct CoreState<T> {
    state: FutureState,
    value: Option<T>,
    error: Option<Error>,
    progress: Option<(u64, u64)>,
    status: Option<String>,
    cancel_requested: bool,
    subscribers: Vec<Subscriber>,
    cancel_hooks: Vec<CancelHook>,
    delegate: Option<Arc<dyn ReportSink>>,
}

pub(crate) struct Core<T> {
    id: u64,
    inner: Mutex<CoreState<T>>,
    cond: Condvar,
}

/// Type-erased producer surface used for delegation and by the
/// [`Notifier`](super::Notifier).
pub(crate) trait ReportSink: Send + Sync {
    fn sink_id(&self) -> u64;
    fn delegate_parent(&self) -> Option<Arc<dyn ReportSink>>;
    fn report_started(&self);
    fn report_progress(&self, current: u64, total: u64);
    fn report_status(&self, message: &str);
    fn report_canceled(&self);
    fn report_exception(&self, error: &Error);
    fn cancel_requested(&self) -> bool;
    fn request_cancel(&self);
    fn add_cancel_hook(&self, hook: CancelHook);
}

impl<T: Send> Core<T> {
    pub fn new() -> Self {
        Core {
            id: NEXT_CORE_ID.fetch_add(1, Ordering::Relaxed),
            inner: Mutex::new(CoreState {
                state: FutureState::Pending,
                value: None,
                error: None,
                progress: None,
                status: None,
                cancel_requested: false,
                subscribers: Vec::new(),
                cancel_hooks: Vec::new(),
                delegate: None,
            }),
            cond: Condvar::new(),
        }
    }

    /// Register a subscriber, replaying the current snapshot first.
    ///
    /// A late subscriber observes the same prefix it would have seen live:
    /// `Started`, the latest progress and status, then the terminal event.
    pub fn subscribe(&self, mut subscriber: Subscriber) {
        let mut inner = self.inner.lock().unwrap();
        if inner.state != FutureState::Pending {
            subscriber(&FutureEvent::Started);
        }
        if let Some((current, total)) = inner.progress {
            subscriber(&FutureEvent::Progress { current, total });
        }
        if let Some(status) = inner.status.clone() {
            subscriber(&FutureEvent::Status(status));
        }
        match inner.state {
            FutureState::Finished => subscriber(&FutureEvent::Finished),
            FutureState::Canceled => subscriber(&FutureEvent::Canceled),
            FutureState::Exception => {
                let error = inner.error.clone().unwrap_or_else(Error::canceled);
                subscriber(&FutureEvent::Exception(error));
            }
            _ => inner.subscribers.push(subscriber),
        }
    }

    /// Install the delegation parent, rejecting duplicates and cycles.
    pub fn set_delegate(&self, parent: Arc<dyn ReportSink>) -> Result<()> {
        // Walk the parent chain before taking our own lock; delegation links
        // only ever point upward, so this cannot deadlock.
        let mut cursor = Some(parent.clone());
        while let Some(sink) = cursor {
            if sink.sink_id() == self.id {
                return Err(Error::new(
                    ErrorKind::ConfigError,
                    "delegation would form a cycle",
                ));
            }
            cursor = sink.delegate_parent();
        }

        let mut inner = self.inner.lock().unwrap();
        if inner.delegate.is_some() {
            return Err(Error::new(
                ErrorKind::ConfigError,
                "delegation target is already set",
            ));
        }
        inner.delegate = Some(parent);
        Ok(())
    }

    pub fn complete(&self, value: T) {
        let mut inner = self.inner.lock().unwrap();
        if inner.state.is_terminal() {
            return;
        }
        inner.state = FutureState::Finished;
        inner.value = Some(value);
        Self::deliver(&mut inner, &FutureEvent::Finished);
        inner.subscribers.clear();
        self.cond.notify_all();
    }

    pub fn state(&self) -> FutureState {
        self.inner.lock().unwrap().state
    }

    /// Block until the future reaches a terminal state.
    pub fn wait_terminal(&self) {
        let mut inner = self.inner.lock().unwrap();
        while !inner.state.is_terminal() {
            inner = self.cond.wait(inner).unwrap();
        }
    }

    /// Take the outcome. Must only be called after [`wait_terminal`].
    pub fn take_result(&self) -> Result<T> {
        let mut inner = self.inner.lock().unwrap();
        match inner.state {
            FutureState::Finished => Ok(inner
                .value
                .take()
                .expect("finished future holds its value")),
            FutureState::Canceled => Err(Error::canceled()),
            FutureState::Exception => Err(inner.error.clone().unwrap_or_else(Error::canceled)),
            _ => unreachable!("take_result called before the future terminated"),
        }
    }

    fn deliver(inner: &mut CoreState<T>, event: &FutureEvent) {
        for subscriber in inner.subscribers.iter_mut() {
            subscriber(event);
        }
    }
}

impl<T: Send> ReportSink for Core<T> {
    fn sink_id(&self) -> u64 {
        self.id
    }

    fn delegate_parent(&self) -> Option<Arc<dyn ReportSink>> {
        self.inner.lock().unwrap().delegate.clone()
    }

    fn report_started(&self) {
        let mut inner = self.inner.lock().unwrap();
        if inner.state != FutureState::Pending {
            return;
        }
        inner.state = FutureState::Running;
        Self::deliver(&mut inner, &FutureEvent::Started);
        self.cond.notify_all();
    }

    fn report_progress(&self, current: u64, total: u64) {
        let mut inner = self.inner.lock().unwrap();
        if inner.state.is_terminal() {
            return;
        }
        inner.progress = Some((current, total));
        Self::deliver(&mut inner, &FutureEvent::Progress { current, total });
        // Forwarded verbatim; the parent owns any scaling. Holding our lock
        // while locking the parent is safe because delegation is acyclic.
        if let Some(delegate) = inner.delegate.clone() {
            delegate.report_progress(current, total);
        }
    }

    fn report_status(&self, message: &str) {
        let mut inner = self.inner.lock().unwrap();
        if inner.state.is_terminal() {
            return;
        }
        inner.status = Some(message.to_string());
        Self::deliver(&mut inner, &FutureEvent::Status(message.to_string()));
        if let Some(delegate) = inner.delegate.clone() {
            delegate.report_status(message);
        }
    }

    fn report_canceled(&self) {
        let mut inner = self.inner.lock().unwrap();
        if inner.state.is_terminal() {
            return;
        }
        inner.state = FutureState::Canceled;
        Self::deliver(&mut inner, &FutureEvent::Canceled);
        inner.subscribers.clear();
        self.cond.notify_all();
    }

    fn report_exception(&self, error: &Error) {
        let mut inner = self.inner.lock().unwrap();
        if inner.state.is_terminal() {
            return;
        }
        inner.state = FutureState::Exception;
        inner.error = Some(error.clone());
        Self::deliver(&mut inner, &FutureEvent::Exception(error.clone()));
        inner.subscribers.clear();
        let delegate = inner.delegate.clone();
        self.cond.notify_all();
        drop(inner);
        if let Some(delegate) = delegate {
            delegate.report_exception(error);
        }
    }

    fn cancel_requested(&self) -> bool {
        self.inner.lock().unwrap().cancel_requested
    }

    fn request_cancel(&self) {
        let hooks = {
            let mut inner = self.inner.lock().unwrap();
            if inner.state.is_terminal() {
                return;
            }
            inner.cancel_requested = true;
            std::mem::take(&mut inner.cancel_hooks)
        };
        for hook in hooks {
            hook();
        }
    }

    fn add_cancel_hook(&self, hook: CancelHook) {
        let mut inner = self.inner.lock().unwrap();
        if inner.cancel_requested {
            drop(inner);
            hook();
        } else if !inner.state.is_terminal() {
            inner.cancel_hooks.push(hook);
        }
    }
}
