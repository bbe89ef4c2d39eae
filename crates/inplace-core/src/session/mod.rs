//! Sessions: long-lived, live views of one location.
//!
//! A session owns a scoped access grant, an observer registration and (for
//! files) a debounced writer. Everything that completes elsewhere, whether a
//! coordinated read, a timer flush or a presenter callback, is funnelled
//! through the session's [`OwnerQueue`] and applied inside `next_event()`,
//! so session state is only ever touched by its owner.

use std::future::Future;
use std::sync::Arc;

use tokio::sync::mpsc;

use crate::config::CoordinationConfig;
use crate::coordination::{CoordinatedFileAccess, FileCoordinator, LocalMaterializer, Materializer};
use crate::error::AccessError;
use crate::location::LocationRef;
use crate::scoped::{AccessGrantor, GrantTable};
use crate::services::{NoServices, ServiceDirectory};

pub mod edit;
pub mod listing;

pub use edit::EditSession;
pub use listing::ListingSession;

/// Title shown once the presented item has been deleted.
pub const DELETED_TITLE: &str = "<DELETED>";

/// Serial queue of work for a session's owner.
///
/// Producers on any task post messages; only the owner receives them.
pub struct OwnerQueue<M> {
    tx: mpsc::UnboundedSender<M>,
    rx: mpsc::UnboundedReceiver<M>,
}

impl<M: Send + 'static> OwnerQueue<M> {
    pub fn new() -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        Self { tx, rx }
    }

    pub fn post(&self, msg: M) {
        // The receiver lives as long as `self`.
        let _ = self.tx.send(msg);
    }

    /// Run `future` on the runtime and post its output back to the owner.
    pub fn spawn<F>(&self, future: F)
    where
        F: Future<Output = M> + Send + 'static,
    {
        let tx = self.tx.clone();
        tokio::spawn(async move {
            let _ = tx.send(future.await);
        });
    }

    /// A producer handle for code that outlives a borrow of the queue.
    pub fn sender(&self) -> mpsc::UnboundedSender<M> {
        self.tx.clone()
    }

    pub async fn recv(&mut self) -> Option<M> {
        self.rx.recv().await
    }
}

impl<M: Send + 'static> Default for OwnerQueue<M> {
    fn default() -> Self {
        Self::new()
    }
}

/// Shared collaborators every session needs.
#[derive(Debug, Clone)]
pub struct SessionEnv {
    coordinator: Arc<FileCoordinator>,
    materializer: Arc<dyn Materializer>,
    grantor: Arc<dyn AccessGrantor>,
    services: Arc<dyn ServiceDirectory>,
}

impl SessionEnv {
    pub fn new(
        coordinator: Arc<FileCoordinator>,
        materializer: Arc<dyn Materializer>,
        grantor: Arc<dyn AccessGrantor>,
    ) -> Self {
        Self {
            coordinator,
            materializer,
            grantor,
            services: Arc::new(NoServices),
        }
    }

    /// Use `services` for per-location services such as access notification.
    #[must_use]
    pub fn with_services(mut self, services: Arc<dyn ServiceDirectory>) -> Self {
        self.services = services;
        self
    }

    /// Environment for plain local filesystems.
    pub fn local(config: CoordinationConfig) -> Self {
        Self::new(
            Arc::new(FileCoordinator::new(config)),
            Arc::new(LocalMaterializer),
            Arc::new(GrantTable::new()),
        )
    }

    pub fn coordinator(&self) -> &Arc<FileCoordinator> {
        &self.coordinator
    }

    pub fn grantor(&self) -> &Arc<dyn AccessGrantor> {
        &self.grantor
    }

    pub fn services(&self) -> &Arc<dyn ServiceDirectory> {
        &self.services
    }

    pub fn config(&self) -> &CoordinationConfig {
        self.coordinator.config()
    }

    /// One-shot coordinated access sharing this environment.
    pub fn access(&self) -> CoordinatedFileAccess {
        CoordinatedFileAccess::new(
            Arc::clone(&self.coordinator),
            Arc::clone(&self.materializer),
        )
    }
}

/// Lifecycle of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// No target.
    Closed,
    /// Target set, first load in flight.
    Opening,
    /// Presenting and observing.
    Open,
    /// Presenting with observation suspended.
    Background,
    /// The target was deleted; the session is inert until retargeted.
    Deleted,
}

/// What a session reports to its owner.
#[derive(Debug)]
pub enum SessionEvent {
    /// A file's contents were (re)loaded.
    ContentAvailable { title: String, text: String },
    /// A directory's entries were (re)listed or changed locally.
    ListingAvailable {
        title: String,
        entries: Vec<LocationRef>,
    },
    /// The target was moved; the session now follows it.
    Moved { to: LocationRef },
    /// The target is gone.
    Deleted { title: String },
    Error(AccessError),
}
