//! Durable references to granted locations.
//!
//! - [`codec`] turns a [`LocationRef`](crate::LocationRef) into opaque bytes and back
//! - [`defaults`] persists named slots of those bytes
//! - [`store`] is the user's ordered list of granted locations
//! - [`roots`] remembers directories granted for deep-link opening

pub mod codec;
pub mod defaults;
pub mod roots;
pub mod store;

pub use codec::{Bookmark, BookmarkCodec, FileBookmarkCodec, Resolved};
pub use defaults::{Defaults, JsonDefaults, MemoryDefaults};
pub use roots::{ROOT_BOOKMARKS_KEY, RootBookmarks};
pub use store::{BOOKMARKS_KEY, BookmarkStore, SaveReport};
