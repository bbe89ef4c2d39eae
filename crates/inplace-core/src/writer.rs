//! Debounced autosave.
//!
//! Edits mark the writer dirty and restart a quiescence timer; when the timer
//! expires without further edits, the pending state is committed. The dirty
//! flag is checked and cleared atomically right before each commit, so a
//! flush racing an in-flight one without new edits issues no write.

use std::fmt::Display;
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use parking_lot::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, trace, warn};

/// Destination of a debounced flush.
pub trait FlushTarget: Send + Sync + 'static {
    /// Failure of a commit. Targets can stamp it with whatever the
    /// reporter needs to tell which state the failed commit belonged to.
    type Error: Display + Send + 'static;

    /// Persist the current state.
    fn commit(&self) -> impl Future<Output = Result<(), Self::Error>> + Send;
}

type ErrorReporter<E> = Box<dyn Fn(E) + Send + Sync>;

struct Inner<T: FlushTarget> {
    target: T,
    dirty: AtomicBool,
    disabled: AtomicBool,
    quiescence: Duration,
    timer: Mutex<Option<JoinHandle<()>>>,
    on_error: ErrorReporter<T::Error>,
}

impl<T: FlushTarget> Drop for Inner<T> {
    fn drop(&mut self) {
        if let Some(timer) = self.timer.get_mut().take() {
            timer.abort();
        }
    }
}

/// Quiescence-timer writer around a [`FlushTarget`].
///
/// Clones share state. Timer-triggered flushes cannot return their error to
/// anyone, so they go to the reporter given at construction.
pub struct DebouncedWriter<T: FlushTarget> {
    inner: Arc<Inner<T>>,
}

impl<T: FlushTarget> Clone for DebouncedWriter<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T: FlushTarget> DebouncedWriter<T> {
    pub fn new(
        target: T,
        quiescence: Duration,
        on_error: impl Fn(T::Error) + Send + Sync + 'static,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                target,
                dirty: AtomicBool::new(false),
                disabled: AtomicBool::new(false),
                quiescence,
                timer: Mutex::new(None),
                on_error: Box::new(on_error),
            }),
        }
    }

    pub fn target(&self) -> &T {
        &self.inner.target
    }

    pub fn is_dirty(&self) -> bool {
        self.inner.dirty.load(Ordering::SeqCst)
    }

    pub fn is_disabled(&self) -> bool {
        self.inner.disabled.load(Ordering::SeqCst)
    }

    /// Record a pending change and restart the quiescence timer.
    ///
    /// Must be called within a tokio runtime. No-op while disabled.
    pub fn mark_dirty(&self) {
        if self.is_disabled() {
            return;
        }
        self.inner.dirty.store(true, Ordering::SeqCst);

        let weak: Weak<Inner<T>> = Arc::downgrade(&self.inner);
        let quiescence = self.inner.quiescence;
        let timer = tokio::spawn(async move {
            tokio::time::sleep(quiescence).await;
            if let Some(inner) = weak.upgrade() {
                // Detached: restarting the timer must not cancel a commit.
                tokio::spawn(async move {
                    DebouncedWriter { inner }.flush_reporting().await;
                });
            }
        });

        if let Some(previous) = self.inner.timer.lock().replace(timer) {
            previous.abort();
        }
        trace!(quiescence = ?quiescence, "Autosave timer restarted");
    }

    /// Commit now if anything is pending.
    ///
    /// Returns whether a write was issued. A failed commit does not mark the
    /// writer dirty again; the next edit will.
    pub async fn flush_now(&self) -> Result<bool, T::Error> {
        if self.is_disabled() || !self.inner.dirty.swap(false, Ordering::SeqCst) {
            return Ok(false);
        }
        debug!("Flushing pending changes");
        self.inner.target.commit().await?;
        Ok(true)
    }

    /// Like [`flush_now`](Self::flush_now), sending any error to the reporter.
    pub async fn flush_reporting(&self) -> bool {
        match self.flush_now().await {
            Ok(wrote) => wrote,
            Err(e) => {
                warn!(error = %e, "Autosave failed");
                (self.inner.on_error)(e);
                false
            }
        }
    }

    /// Drop pending state and ignore further edits until [`enable`](Self::enable).
    pub fn disable(&self) {
        self.inner.disabled.store(true, Ordering::SeqCst);
        self.inner.dirty.store(false, Ordering::SeqCst);
        if let Some(timer) = self.inner.timer.lock().take() {
            timer.abort();
        }
    }

    pub fn enable(&self) {
        self.inner.disabled.store(false, Ordering::SeqCst);
    }
}
