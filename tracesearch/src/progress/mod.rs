//! Track the progress of a sharded search
//!
//! A sink is built for every search request through a [`SearchProgressFactory`]
//! so the sharder never depends on a concrete sink.

use http::StatusCode;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

mod search;
mod streaming;

pub use search::{QuitReason, SearchProgress};
pub use streaming::{StreamingSearchProgress, streaming_factory};

use crate::models::{SearchResponse, TraceSearchMetadata};
use crate::utils::Error;

/// The progress events a sharded search reports
pub trait ShardedSearchProgress: Send + Sync {
    /// Record the most recent status from a downstream job
    ///
    /// # Arguments
    ///
    /// * `code` - The status code that was returned
    /// * `msg` - The message that came with this status code
    fn set_status(&self, code: StatusCode, msg: String);

    /// Record a failed downstream job
    ///
    /// # Arguments
    ///
    /// * `err` - The error the job failed with
    fn set_error(&self, err: Error);

    /// Merge a completed job's response
    ///
    /// # Arguments
    ///
    /// * `res` - The response to merge
    fn add_response(&self, res: SearchResponse);

    /// Get why the sharder should stop scheduling and cancel running jobs
    ///
    /// When more then one reason applies the highest priority one is returned:
    /// errors, then cancellation, then failing statuses and finally the limit.
    fn quit_reason(&self) -> Option<QuitReason>;

    /// Check if the sharder should stop scheduling and cancel running jobs
    fn should_quit(&self) -> bool {
        self.quit_reason().is_some()
    }

    /// Get a snapshot of the current results
    fn result(&self) -> ShardedSearchResults;
}

/// Builds the progress sink for a single search
///
/// The arguments are the cancellation token for the search, the result limit,
/// the total jobs, the total blocks and the total block bytes.
pub type SearchProgressFactory = Arc<
    dyn Fn(CancellationToken, usize, u32, u32, u64) -> Arc<dyn ShardedSearchProgress>
        + Send
        + Sync,
>;

/// Get a factory for sinks that only report a final snapshot
#[must_use]
pub fn batch_factory() -> SearchProgressFactory {
    Arc::new(
        |cancel: CancellationToken,
         limit: usize,
         total_jobs: u32,
         total_blocks: u32,
         total_block_bytes: u64|
         -> Arc<dyn ShardedSearchProgress> {
            Arc::new(SearchProgress::new(
                cancel,
                limit,
                total_jobs,
                total_blocks,
                total_block_bytes,
            ))
        },
    )
}

/// A snapshot of a sharded search
#[derive(Debug, Clone)]
pub struct ShardedSearchResults {
    /// The combined response
    pub response: SearchResponse,
    /// The last status reported by a downstream job
    pub status_code: StatusCode,
    /// The message for the last reported status
    pub status_msg: String,
    /// The error reported by a downstream job if one failed
    pub err: Option<Arc<Error>>,
    /// The number of jobs whose responses have been merged
    pub finished_requests: usize,
    /// Why this search stopped early if it did
    pub quit_reason: Option<QuitReason>,
}

impl ShardedSearchResults {
    /// Check if this search completed without a failure
    #[must_use]
    pub fn is_success(&self) -> bool {
        self.err.is_none() && self.status_code.is_success()
    }

    /// The traces in this snapshot
    #[must_use]
    pub fn traces(&self) -> &[TraceSearchMetadata] {
        &self.response.traces
    }

    /// Drop any traces past a limit
    ///
    /// # Arguments
    ///
    /// * `limit` - The max number of traces to keep
    pub fn truncate(&mut self, limit: usize) {
        self.response.traces.truncate(limit);
    }

    /// Serialize this snapshot to json
    pub fn to_json(&self) -> Result<serde_json::Value, Error> {
        Ok(serde_json::json!({
            "status_code": self.status_code.as_u16(),
            "status_msg": self.status_msg,
            "error": self.err.as_ref().map(ToString::to_string),
            "finished_requests": self.finished_requests,
            "quit_reason": self.quit_reason.map(|reason| format!("{reason:?}")),
            "response": serde_json::to_value(&self.response)?,
        }))
    }
}
