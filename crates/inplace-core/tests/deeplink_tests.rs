//! Deep-link handoff with root acquisition.

mod common;

use std::sync::Arc;

use common::{RecordingDelegate, TreeBuilder};
use inplace_core::bookmark::ROOT_BOOKMARKS_KEY;
use inplace_core::{
    DeepLinkRegistry, Defaults, FileBookmarkCodec, GrantTable, JsonDefaults, LocationRef,
    RootBookmarks,
};
use url::Url;

fn registry(defaults: Arc<dyn Defaults>) -> DeepLinkRegistry {
    let grantor = Arc::new(GrantTable::new());
    let roots = RootBookmarks::new(defaults, Arc::new(FileBookmarkCodec::new()), grantor.clone());
    DeepLinkRegistry::new(roots, grantor).with_app_name("Inplace")
}

#[test]
fn test_unknown_root_prompts_then_remembers() {
    let tree = TreeBuilder::new()
        .add_file("Team/Docs/notes/todo.md", "- [ ] write tests")
        .add_directory("state")
        .build();
    let root = tree.path("Team/Docs");
    let defaults: Arc<dyn Defaults> = Arc::new(JsonDefaults::new(tree.path("state/defaults.json")));
    let link = Url::parse(&format!(
        "open-in-place://x-callback-url/open-in-place?root={}&path=notes/todo.md",
        root.display()
    ))
    .unwrap();

    let mut registry = registry(Arc::clone(&defaults));
    let mut delegate = RecordingDelegate::default();
    assert!(registry.handle_url(&link, &mut delegate));

    // Nothing opened yet; the user is asked for the root.
    assert!(delegate.opened.is_empty());
    let (id, suggested) = delegate.picks[0].clone();
    assert_eq!(suggested, root);
    assert_eq!(registry.pending(), [id]);
    assert!(defaults.blobs(ROOT_BOOKMARKS_KEY).unwrap().is_empty());

    registry
        .complete_pick(id, Some(LocationRef::directory(&root)), &mut delegate)
        .unwrap();
    assert!(registry.is_empty());
    assert_eq!(defaults.blobs(ROOT_BOOKMARKS_KEY).unwrap().len(), 1);
    assert_eq!(delegate.opened.len(), 1);
    assert_eq!(delegate.opened[0].path(), root.join("notes/todo.md"));
    assert!(delegate.errors.is_empty());

    // A fresh registry over the same persisted state opens without asking.
    let mut later = self::registry(Arc::new(JsonDefaults::new(tree.path("state/defaults.json"))));
    let mut delegate = RecordingDelegate::default();
    later.handle_url(&link, &mut delegate);
    assert!(delegate.picks.is_empty());
    assert_eq!(delegate.opened[0].path(), root.join("notes/todo.md"));
}

#[test]
fn test_cancelled_pick_replies_on_error() {
    let tree = TreeBuilder::new().add_directory("Team/Docs").build();
    let link = Url::parse(&format!(
        "open-in-place://x-callback-url/open-in-place?root={}&path=a.md&on-error=caller://x-callback-url/failed",
        tree.path("Team/Docs").display()
    ))
    .unwrap();

    let mut registry = registry(Arc::new(inplace_core::MemoryDefaults::new()));
    let mut delegate = RecordingDelegate::default();
    registry.handle_url(&link, &mut delegate);
    let (id, _) = delegate.picks[0].clone();
    registry.complete_pick(id, None, &mut delegate).unwrap();

    assert!(registry.is_empty());
    assert!(delegate.errors.is_empty());
    let reply = &delegate.replies[0];
    let params: Vec<(String, String)> = reply.query_pairs().into_owned().collect();
    assert!(params.contains(&("x-source".into(), "Inplace".into())));
    assert!(params.contains(&("errorCode".into(), "3072".into())));
}
