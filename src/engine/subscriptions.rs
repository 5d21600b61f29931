use futures::future;
use futures::{Stream, StreamExt};
use tokio::sync::broadcast;
use tokio_stream::wrappers::BroadcastStream;

use super::TimingEngine;
use crate::analysis::onset::OnsetEvent;
use crate::timing::session::HitRecord;

impl TimingEngine {
    // ========================================================================
    // STREAM SUBSCRIPTIONS
    // ========================================================================

    pub fn subscribe_hits(&self) -> broadcast::Receiver<HitRecord> {
        self.hits_tx.subscribe()
    }

    pub fn subscribe_onsets(&self) -> broadcast::Receiver<OnsetEvent> {
        self.onsets_tx.subscribe()
    }

    // ========================================================================
    // ASYNC STREAM ADAPTERS
    // ========================================================================

    /// Resolved hits as an async stream. Lagged items are skipped.
    pub fn hit_stream(&self) -> impl Stream<Item = HitRecord> + Send + Unpin {
        BroadcastStream::new(self.subscribe_hits()).filter_map(|item| future::ready(item.ok()))
    }

    pub fn onset_stream(&self) -> impl Stream<Item = OnsetEvent> + Send + Unpin {
        BroadcastStream::new(self.subscribe_onsets()).filter_map(|item| future::ready(item.ok()))
    }
}
