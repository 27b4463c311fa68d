//! Serial delivery of completed loads back to display targets.
//!
//! One dedicated task owns result application. Workers hand results over
//! a channel instead of mutating targets from whatever task finished the
//! load, and stale results are filtered here by comparing the target's
//! current tag against the identifier the load was started for.

use tokio::sync::mpsc;
use tracing::{debug, error, warn};

use crate::domain::entities::LoaderResult;

tokio::task_local! {
    static DELIVERY_CONTEXT: ();
}

/// Returns true when the current task is the delivery context.
///
/// Blocking I/O is not allowed there: network fetches treat it as a fatal
/// programming error, disk reads as a logged degraded allowance.
#[must_use]
pub fn on_delivery_context() -> bool {
    DELIVERY_CONTEXT.try_with(|_| ()).is_ok()
}

/// Guards the code paths that must never run on the delivery context,
/// since a blocked delivery loop would freeze every pending result.
///
/// # Panics
/// Panics when called from the delivery context; doing blocking work
/// there is a programming error, not a recoverable condition.
pub fn assert_worker_context(operation: &str) {
    assert!(
        !on_delivery_context(),
        "{operation} attempted on the delivery context"
    );
}

/// Clonable handle that feeds the delivery loop.
#[derive(Clone)]
pub struct ResultDispatcher {
    tx: mpsc::UnboundedSender<LoaderResult>,
}

impl std::fmt::Debug for ResultDispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResultDispatcher").finish_non_exhaustive()
    }
}

impl ResultDispatcher {
    /// Spawns the delivery loop and returns a handle to it.
    ///
    /// The loop runs for the process lifetime and applies results one at
    /// a time, in arrival order.
    #[must_use]
    pub fn spawn() -> Self {
        let (tx, mut rx) = mpsc::unbounded_channel::<LoaderResult>();
        tokio::spawn(DELIVERY_CONTEXT.scope((), async move {
            while let Some(result) = rx.recv().await {
                deliver(result);
            }
        }));
        Self { tx }
    }

    /// Queues a result for delivery.
    pub fn dispatch(&self, result: LoaderResult) {
        if let Err(e) = self.tx.send(result) {
            error!(error = %e, "Delivery loop is gone, dropping result");
        }
    }
}

/// Applies a result unless the target has been rebound since the load
/// started. This check is what keeps a slow fetch for a scrolled-past
/// target from clobbering the newer binding.
fn deliver(result: LoaderResult) {
    match result.target.tag() {
        Some(current) if current == result.id => {
            debug!(id = %result.id, "Delivering image to target");
            result.target.apply(result.image);
        }
        _ => {
            warn!(id = %result.id, "Target was rebound while loading, ignoring stale result");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::entities::{DecodedImage, ImageSlot, ResourceId};
    use crate::domain::ports::DisplayTarget;
    use std::sync::Arc;
    use std::time::Duration;

    fn decoded(width: u32) -> Arc<DecodedImage> {
        Arc::new(DecodedImage::new(image::DynamicImage::new_rgb8(width, 1)))
    }

    #[tokio::test]
    async fn test_matching_tag_is_applied() {
        let dispatcher = ResultDispatcher::spawn();
        let slot = Arc::new(ImageSlot::new());
        slot.set_tag(ResourceId::new("a"));

        dispatcher.dispatch(LoaderResult {
            target: slot.clone(),
            id: ResourceId::new("a"),
            image: decoded(3),
        });

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(slot.image().unwrap().width(), 3);
    }

    #[tokio::test]
    async fn test_stale_result_is_dropped() {
        let dispatcher = ResultDispatcher::spawn();
        let slot = Arc::new(ImageSlot::new());
        slot.set_tag(ResourceId::new("a"));
        slot.set_tag(ResourceId::new("b"));

        // The result for "a" arrives after the rebind to "b".
        dispatcher.dispatch(LoaderResult {
            target: slot.clone(),
            id: ResourceId::new("a"),
            image: decoded(3),
        });

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(slot.image().is_none());
    }

    #[tokio::test]
    async fn test_worker_context_outside_delivery_loop() {
        assert!(!on_delivery_context());
        assert_worker_context("network fetch");
    }

    #[tokio::test]
    #[should_panic(expected = "network fetch attempted on the delivery context")]
    async fn test_guard_panics_on_delivery_context() {
        DELIVERY_CONTEXT
            .scope((), async {
                assert_worker_context("network fetch");
            })
            .await;
    }
}
