//! Inbound `x-callback-url` open requests.
//!
//! Another application asks for a file to be opened with a URL of the form
//!
//! ```text
//! SCHEME://x-callback-url/open-in-place?root=/Team/Docs&path=notes/todo.md
//! ```
//!
//! optionally carrying `on-success` and `on-error` reply URLs. The first time
//! a root is seen the user has to pick the matching directory; that choice is
//! remembered in [`RootBookmarks`] so later requests under the same root open
//! directly.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tracing::{debug, info, warn};
use url::Url;

use crate::bookmark::RootBookmarks;
use crate::error::DeepLinkError;
use crate::location::LocationRef;
use crate::scoped::{AccessGrantor, ScopedResourceHandle};

const CALLBACK_HOST: &str = "x-callback-url";
const OPEN_ACTION: &str = "/open-in-place";

/// Identifier of a request waiting for the user to pick its root.
pub type RequestId = u64;

/// A parsed open request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeepLinkRequest {
    /// Root directory as named by the requesting application.
    pub root: PathBuf,
    /// Item path relative to `root`.
    pub path: PathBuf,
    pub on_success: Option<String>,
    pub on_error: Option<String>,
}

impl DeepLinkRequest {
    /// Parse an open request.
    ///
    /// URLs for any other host or action yield `Ok(None)`.
    pub fn parse(url: &Url) -> Result<Option<Self>, DeepLinkError> {
        if !is_open_request(url) {
            return Ok(None);
        }
        let params: HashMap<String, String> = url.query_pairs().into_owned().collect();
        let (Some(root), Some(path)) = (params.get("root"), params.get("path")) else {
            return Err(DeepLinkError::MissingParameters);
        };

        // Full paths under the root are accepted as well.
        let root = PathBuf::from(root);
        let path = Path::new(path);
        let path = path.strip_prefix(&root).unwrap_or(path);
        let path = path.strip_prefix("/").unwrap_or(path);

        Ok(Some(Self {
            path: path.to_path_buf(),
            root,
            on_success: params.get("on-success").cloned(),
            on_error: params.get("on-error").cloned(),
        }))
    }
}

fn is_open_request(url: &Url) -> bool {
    url.host_str() == Some(CALLBACK_HOST) && url.path() == OPEN_ACTION
}

/// The application's top-level controller, as seen by the registry.
pub trait LinkDelegate {
    /// Open the resolved location in the normal edit/browse flow.
    fn open(&mut self, location: LocationRef);

    /// Ask the user to pick the directory for `suggested_root`. The answer
    /// comes back through [`DeepLinkRegistry::complete_pick`].
    fn pick_directory(&mut self, request: RequestId, suggested_root: &Path);

    /// Hand a reply URL to the requesting application. Returns false when it
    /// cannot be delivered.
    fn open_reply(&mut self, url: Url) -> bool;

    /// Show an error that could not be replied to.
    fn show_error(&mut self, error: &DeepLinkError);
}

/// Registry of in-flight open requests.
///
/// Requests that need the user to pick a root are held here until
/// [`complete_pick`](Self::complete_pick) settles them, successfully or not.
#[derive(Debug)]
pub struct DeepLinkRegistry {
    roots: RootBookmarks,
    grantor: Arc<dyn AccessGrantor>,
    app_name: Option<String>,
    next_id: RequestId,
    pending: HashMap<RequestId, DeepLinkRequest>,
}

impl DeepLinkRegistry {
    pub fn new(roots: RootBookmarks, grantor: Arc<dyn AccessGrantor>) -> Self {
        Self {
            roots,
            grantor,
            app_name: None,
            next_id: 1,
            pending: HashMap::new(),
        }
    }

    /// Name sent as `x-source` in replies.
    #[must_use]
    pub fn with_app_name(mut self, name: impl Into<String>) -> Self {
        self.app_name = Some(name.into());
        self
    }

    /// Handle an inbound URL. Returns false when it is not an open request.
    pub fn handle_url(&mut self, url: &Url, delegate: &mut dyn LinkDelegate) -> bool {
        let request = match DeepLinkRequest::parse(url) {
            Ok(Some(request)) => request,
            Ok(None) => return false,
            Err(e) => {
                let on_error = url
                    .query_pairs()
                    .find(|(k, _)| k == "on-error")
                    .map(|(_, v)| v.into_owned());
                self.fail(on_error.as_deref(), &e, delegate);
                return true;
            }
        };

        debug!(root = %request.root.display(), path = %request.path.display(), "Open request");
        match self.roots.location_for_root(&request.root) {
            Some(root) => self.deliver(&request, &root, delegate),
            None => {
                let id = self.next_id;
                self.next_id += 1;
                info!(request = id, root = %request.root.display(), "Root not yet granted, asking user");
                let suggested = request.root.clone();
                self.pending.insert(id, request);
                delegate.pick_directory(id, &suggested);
            }
        }
        true
    }

    /// Settle a pending request with the user's pick, `None` meaning the
    /// user cancelled.
    pub fn complete_pick(
        &mut self,
        id: RequestId,
        picked: Option<LocationRef>,
        delegate: &mut dyn LinkDelegate,
    ) -> Result<(), DeepLinkError> {
        let request = self
            .pending
            .remove(&id)
            .ok_or(DeepLinkError::UnknownRequest(id))?;

        let Some(root) = picked else {
            debug!(request = id, "Root pick cancelled");
            self.fail(request.on_error.as_deref(), &DeepLinkError::Cancelled, delegate);
            return Ok(());
        };

        match self.roots.remember_root(&root) {
            Ok(()) => self.deliver(&request, &root, delegate),
            Err(e) => self.fail(request.on_error.as_deref(), &DeepLinkError::from(e), delegate),
        }
        Ok(())
    }

    /// Ids of requests waiting for a pick, oldest first.
    pub fn pending(&self) -> Vec<RequestId> {
        let mut ids: Vec<_> = self.pending.keys().copied().collect();
        ids.sort_unstable();
        ids
    }

    pub fn request(&self, id: RequestId) -> Option<&DeepLinkRequest> {
        self.pending.get(&id)
    }

    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    fn deliver(&self, request: &DeepLinkRequest, root: &LocationRef, delegate: &mut dyn LinkDelegate) {
        let mut handle = ScopedResourceHandle::new(root.clone(), Arc::clone(&self.grantor));
        if !handle.acquire() {
            let error = DeepLinkError::AccessDenied {
                path: root.path().to_path_buf(),
            };
            self.fail(request.on_error.as_deref(), &error, delegate);
            return;
        }

        let location = root.join(&request.path);
        info!(path = %location, "Opening deep-linked item");
        delegate.open(location);
        handle.release();

        if let Some(url) = request
            .on_success
            .as_deref()
            .and_then(|callback| self.reply_url(callback, &[]))
            && !delegate.open_reply(url)
        {
            warn!("Success reply could not be delivered");
        }
    }

    /// Report through `on-error` when possible, locally otherwise.
    fn fail(&self, on_error: Option<&str>, error: &DeepLinkError, delegate: &mut dyn LinkDelegate) {
        let code = error.code().to_string();
        let message = error.to_string();
        let reply = on_error.and_then(|callback| {
            self.reply_url(callback, &[("errorCode", &code), ("errorMessage", &message)])
        });

        let replied = reply.is_some_and(|url| delegate.open_reply(url));
        if !replied {
            delegate.show_error(error);
        }
    }

    fn reply_url(&self, callback: &str, result: &[(&str, &str)]) -> Option<Url> {
        let mut url = match Url::parse(callback) {
            Ok(url) => url,
            Err(e) => {
                warn!(callback, error = %e, "Ignoring malformed reply URL");
                return None;
            }
        };
        if self.app_name.is_some() || !result.is_empty() {
            let mut pairs = url.query_pairs_mut();
            if let Some(app) = &self.app_name {
                pairs.append_pair("x-source", app);
            }
            for (key, value) in result {
                pairs.append_pair(key, value);
            }
        }
        Some(url)
    }
}
