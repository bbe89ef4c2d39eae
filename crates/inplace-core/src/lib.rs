//! Coordinated, multi-process-safe access to files that live outside the
//! application's own storage.
//!
//! Files in shared locations (a synced folder, a provider-backed mount, a
//! directory another process also edits) can change underneath a reader at
//! any moment. This crate implements the client side of a coordination
//! protocol for such locations.
//!
//! # Components
//!
//! ## Leaves
//!
//! - [`LocationRef`] - A file or directory reference, possibly a cloud placeholder
//! - [`ScopedResourceHandle`] - Symmetric acquire/release of an access grant
//! - [`BookmarkStore`] - Durable, ordered list of bookmarks with stale refresh
//! - [`CoordinatedFileAccess`] - One-shot coordinated read/write/list/delete
//! - [`ChangeObserver`] - Presenter registration plus filesystem watch
//! - [`DebouncedWriter`] - Quiescence-timer autosave with flag check-and-clear
//!
//! ## Sessions
//!
//! - [`EditSession`] - Live, autosaving view of one file
//! - [`ListingSession`] - Live view of a directory's entries
//!
//! ## Collaborators
//!
//! - [`DeepLinkRegistry`] - Inbound `x-callback-url` open requests
//! - [`ServiceDirectory`] - Optional status, metadata and access-notification services
//!
//! # Threading
//!
//! Coordinated operations complete on an unspecified worker context. Sessions
//! never let those completions touch their state directly: every completion
//! and every presenter event is posted to the session's [`OwnerQueue`] and
//! applied from the owner's `next_event().await` loop.
//!
//! # Example
//!
//! ```ignore
//! use inplace_core::{CoordinationConfig, FileCoordinator, SessionEnv, EditSession};
//! use std::sync::Arc;
//!
//! let env = SessionEnv::local(CoordinationConfig::default());
//! let mut session = EditSession::new(env);
//! session.open(inplace_core::LocationRef::file("/tmp/notes.txt")).await;
//! while let Some(event) = session.next_event().await {
//!     println!("{event:?}");
//! }
//! ```

pub mod bookmark;
pub mod config;
pub mod coordination;
pub mod deeplink;
pub mod error;
pub mod location;
pub mod observer;
pub mod scoped;
pub mod services;
pub mod session;
pub mod writer;

pub use bookmark::{
    Bookmark, BookmarkCodec, BookmarkStore, Defaults, FileBookmarkCodec, JsonDefaults,
    MemoryDefaults, Resolved, RootBookmarks, SaveReport,
};
pub use config::CoordinationConfig;
pub use coordination::{
    AccessIntent, CoordinatedFileAccess, FileCoordinator, LocalMaterializer, LockTable,
    Materializer, PresenterEvent, PresenterId, PresenterRegistry,
};
pub use deeplink::{DeepLinkRegistry, DeepLinkRequest, LinkDelegate, RequestId};
pub use error::{
    AccessError, BookmarkError, CoordinationError, DeepLinkError, DefaultsError, ErrorCategory,
    ServiceError,
};
pub use location::LocationRef;
pub use observer::ChangeObserver;
pub use scoped::{AccessGrantor, GrantTable, ScopedResourceHandle};
pub use services::{
    AccessNotifyService, Capability, ChangeSummary, DocumentSourceInfo, DocumentSourceService,
    GitServices, NoServices, ServiceDirectory, StatusService, notify_access,
};
pub use session::{
    EditSession, ListingSession, OwnerQueue, SessionEnv, SessionEvent, SessionState,
    DELETED_TITLE,
};
pub use writer::{DebouncedWriter, FlushTarget};
