//! On-demand download of cloud placeholders before reading.

use std::fmt;
use std::io;
use std::time::Duration;

use tokio::time::Instant;
use tracing::debug;

use crate::error::AccessError;
use crate::location::LocationRef;

const MATERIALIZE_POLL: Duration = Duration::from_millis(100);

/// Provider hook for downloading content that is not local yet.
pub trait Materializer: Send + Sync + fmt::Debug {
    /// True when `location` is a placeholder whose content is not local.
    fn needs_download(&self, location: &LocationRef) -> bool;

    /// Ask the provider to start downloading `location`.
    fn start_download(&self, location: &LocationRef) -> io::Result<()>;
}

/// Materializer for plain local filesystems, where everything is local.
#[derive(Debug, Default, Clone, Copy)]
pub struct LocalMaterializer;

impl Materializer for LocalMaterializer {
    fn needs_download(&self, _location: &LocationRef) -> bool {
        false
    }

    fn start_download(&self, _location: &LocationRef) -> io::Result<()> {
        Ok(())
    }
}

/// Start a download if needed and wait until the content is local.
pub(crate) async fn materialize(
    materializer: &dyn Materializer,
    location: &LocationRef,
    timeout: Duration,
) -> Result<(), AccessError> {
    if !materializer.needs_download(location) {
        return Ok(());
    }

    debug!(path = %location, "Starting download of placeholder");
    materializer
        .start_download(location)
        .map_err(|e| AccessError::io("download", location.path(), e))?;

    let start = Instant::now();
    while materializer.needs_download(location) {
        if start.elapsed() >= timeout {
            return Err(AccessError::Materialize {
                path: location.path().to_path_buf(),
                waited: start.elapsed(),
            });
        }
        tokio::time::sleep(MATERIALIZE_POLL).await;
    }
    debug!(path = %location, elapsed = ?start.elapsed(), "Placeholder materialized");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Needs `remaining` more polls before the content is local.
    #[derive(Debug)]
    struct SlowProvider {
        remaining: AtomicUsize,
        started: AtomicUsize,
    }

    impl Materializer for SlowProvider {
        fn needs_download(&self, _location: &LocationRef) -> bool {
            self.remaining
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                .is_ok()
        }

        fn start_download(&self, _location: &LocationRef) -> io::Result<()> {
            self.started.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_waits_for_download() {
        let provider = SlowProvider {
            remaining: AtomicUsize::new(3),
            started: AtomicUsize::new(0),
        };
        materialize(&provider, &LocationRef::file("/c/x"), Duration::from_secs(30))
            .await
            .unwrap();
        assert_eq!(provider.started.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_gives_up_after_timeout() {
        let provider = SlowProvider {
            remaining: AtomicUsize::new(usize::MAX),
            started: AtomicUsize::new(0),
        };
        let err = materialize(&provider, &LocationRef::file("/c/x"), Duration::from_secs(1))
            .await
            .unwrap_err();
        assert!(matches!(err, AccessError::Materialize { .. }));
    }

    #[tokio::test]
    async fn test_local_content_is_untouched() {
        materialize(&LocalMaterializer, &LocationRef::file("/c/x"), Duration::ZERO)
            .await
            .unwrap();
    }
}
