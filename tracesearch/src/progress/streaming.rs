//! A progress sink that streams snapshots as a search runs

use http::StatusCode;
use kanal::AsyncSender;
use std::sync::{Arc, Mutex, PoisonError};
use tokio_util::sync::CancellationToken;
use tracing::{Level, event};

use super::{
    QuitReason, SearchProgress, SearchProgressFactory, ShardedSearchProgress,
    ShardedSearchResults,
};
use crate::models::SearchResponse;
use crate::utils::Error;

/// Tracks search progress and pushes a snapshot after every update
///
/// Snapshots are dropped instead of blocking a job when the consumer falls behind.
pub struct StreamingSearchProgress {
    /// The sink doing the actual aggregation
    inner: SearchProgress,
    /// The channel to send snapshots on
    updates: AsyncSender<ShardedSearchResults>,
    /// Keeps snapshots in the order they were taken
    publish: Mutex<()>,
}

impl StreamingSearchProgress {
    /// Create a new streaming search progress sink
    ///
    /// # Arguments
    ///
    /// * `inner` - The sink to aggregate results with
    /// * `updates` - The channel to send snapshots on
    pub fn new(inner: SearchProgress, updates: AsyncSender<ShardedSearchResults>) -> Self {
        StreamingSearchProgress {
            inner,
            updates,
            publish: Mutex::new(()),
        }
    }

    /// Send a snapshot of our current state to our consumer
    fn publish(&self) {
        let _guard = self.publish.lock().unwrap_or_else(PoisonError::into_inner);
        // take our snapshot
        let snapshot = self.inner.result();
        let finished = snapshot.finished_requests;
        match self.updates.try_send(snapshot) {
            Ok(true) => (),
            Ok(false) => event!(
                Level::DEBUG,
                msg = "Dropped search snapshot for slow consumer",
                finished
            ),
            Err(error) => event!(
                Level::DEBUG,
                msg = "Search snapshot consumer is gone",
                error = error.to_string()
            ),
        }
    }
}

impl ShardedSearchProgress for StreamingSearchProgress {
    fn set_status(&self, code: StatusCode, msg: String) {
        self.inner.set_status(code, msg);
        self.publish();
    }

    fn set_error(&self, err: Error) {
        self.inner.set_error(err);
        self.publish();
    }

    fn add_response(&self, res: SearchResponse) {
        self.inner.add_response(res);
        self.publish();
    }

    fn quit_reason(&self) -> Option<QuitReason> {
        self.inner.quit_reason()
    }

    fn result(&self) -> ShardedSearchResults {
        self.inner.result()
    }
}

/// Get a factory for sinks that stream snapshots to a channel
///
/// # Arguments
///
/// * `updates` - The channel to send every search's snapshots on
#[must_use]
pub fn streaming_factory(updates: AsyncSender<ShardedSearchResults>) -> SearchProgressFactory {
    Arc::new(
        move |cancel: CancellationToken,
              limit: usize,
              total_jobs: u32,
              total_blocks: u32,
              total_block_bytes: u64|
              -> Arc<dyn ShardedSearchProgress> {
            let inner =
                SearchProgress::new(cancel, limit, total_jobs, total_blocks, total_block_bytes);
            Arc::new(StreamingSearchProgress::new(inner, updates.clone()))
        },
    )
}
