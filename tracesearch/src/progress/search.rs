//! A thread safe sink that aggregates the responses from every search job

use http::StatusCode;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio_util::sync::CancellationToken;
use tracing::{Level, event};

use super::{ShardedSearchProgress, ShardedSearchResults};
use crate::combiner::MetadataCombiner;
use crate::models::{SearchMetrics, SearchResponse};
use crate::utils::Error;

/// Why a search should stop scheduling jobs
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QuitReason {
    /// A downstream job failed
    Error,
    /// The search was cancelled or hit its deadline
    Cancelled,
    /// A downstream job returned a non success status
    Status(StatusCode),
    /// More traces than the limit were found
    LimitReached,
}

/// The mutable state for a search, only touched while holding our lock
#[derive(Debug)]
struct ProgressState {
    /// The first error a downstream job failed with
    err: Option<Arc<Error>>,
    /// The last status a downstream job reported
    status_code: StatusCode,
    /// The message for the last reported status
    status_msg: String,
    /// The combined traces
    combiner: MetadataCombiner,
    /// The counters for this search
    metrics: SearchMetrics,
    /// The number of responses merged so far
    finished_requests: usize,
}

impl ProgressState {
    /// Check if we should quit without taking our lock
    ///
    /// # Arguments
    ///
    /// * `cancel` - The token for this search
    /// * `limit` - The max number of traces wanted
    fn quit_reason(&self, cancel: &CancellationToken, limit: usize) -> Option<QuitReason> {
        if self.err.is_some() {
            return Some(QuitReason::Error);
        }
        if cancel.is_cancelled() {
            return Some(QuitReason::Cancelled);
        }
        if !self.status_code.is_success() {
            return Some(QuitReason::Status(self.status_code));
        }
        if self.combiner.count() > limit {
            return Some(QuitReason::LimitReached);
        }
        None
    }
}

/// Aggregates the responses from all downstream search jobs
///
/// Every operation holds a single lock for its whole duration so compound
/// updates like merging a response and checking the limit are atomic.
#[derive(Debug)]
pub struct SearchProgress {
    /// The token that is cancelled when this search is cancelled or times out
    cancel: CancellationToken,
    /// The max number of distinct traces wanted
    limit: usize,
    /// Our aggregated state
    state: Mutex<ProgressState>,
}

impl SearchProgress {
    /// Create a new search progress sink
    ///
    /// # Arguments
    ///
    /// * `cancel` - The token that is cancelled when this search is cancelled
    /// * `limit` - The max number of distinct traces wanted
    /// * `total_jobs` - The number of jobs this search was split into
    /// * `total_blocks` - The number of blocks this search covers
    /// * `total_block_bytes` - The number of bytes across all blocks
    pub fn new(
        cancel: CancellationToken,
        limit: usize,
        total_jobs: u32,
        total_blocks: u32,
        total_block_bytes: u64,
    ) -> Self {
        let state = ProgressState {
            err: None,
            status_code: StatusCode::OK,
            status_msg: String::default(),
            combiner: MetadataCombiner::new(),
            metrics: SearchMetrics {
                total_blocks,
                total_jobs,
                total_block_bytes,
                ..SearchMetrics::default()
            },
            finished_requests: 0,
        };
        SearchProgress {
            cancel,
            limit,
            state: Mutex::new(state),
        }
    }

    /// Lock our state even if another thread panicked while holding it
    fn lock(&self) -> MutexGuard<'_, ProgressState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Get the number of distinct traces found so far
    pub fn count(&self) -> usize {
        self.lock().combiner.count()
    }
}

impl ShardedSearchProgress for SearchProgress {
    fn set_status(&self, code: StatusCode, msg: String) {
        let mut state = self.lock();
        if !code.is_success() && state.status_code.is_success() {
            event!(
                Level::WARN,
                msg = "Search quitting on failing status",
                code = code.as_u16(),
                status = msg.as_str()
            );
        }
        state.status_code = code;
        state.status_msg = msg;
    }

    fn set_error(&self, err: Error) {
        let mut state = self.lock();
        // keep the first error since later ones are usually fallout from it
        match &state.err {
            Some(first) => {
                event!(
                    Level::WARN,
                    msg = "Dropping error after first failure",
                    first = first.to_string(),
                    dropped = err.to_string()
                );
            }
            None => {
                event!(Level::ERROR, msg = "Search job failed", error = err.to_string());
                state.err = Some(Arc::new(err));
            }
        }
    }

    fn add_response(&self, res: SearchResponse) {
        let mut state = self.lock();
        let mut added = 0;
        for trace in res.traces {
            if state.combiner.add_metadata(trace) {
                added += 1;
            }
        }
        // log only the merge that pushed us past our limit
        let count = state.combiner.count();
        if count > self.limit && count - added <= self.limit {
            event!(
                Level::INFO,
                msg = "Search limit reached",
                limit = self.limit,
                count
            );
        }
        // total blocks/jobs/bytes are set when we are built so ignore the job's view of them
        state.metrics.inspected_bytes = state
            .metrics
            .inspected_bytes
            .saturating_add(res.metrics.inspected_bytes);
        state.metrics.inspected_traces = state
            .metrics
            .inspected_traces
            .saturating_add(res.metrics.inspected_traces);
        state.metrics.completed_jobs = state.metrics.completed_jobs.saturating_add(1);
        // count this request as finished
        state.finished_requests += 1;
    }

    fn quit_reason(&self) -> Option<QuitReason> {
        self.lock().quit_reason(&self.cancel, self.limit)
    }

    fn result(&self) -> ShardedSearchResults {
        let state = self.lock();
        ShardedSearchResults {
            // clone our metrics so later updates can't change this snapshot
            response: SearchResponse {
                traces: state.combiner.metadata(),
                metrics: state.metrics.clone(),
            },
            status_code: state.status_code,
            status_msg: state.status_msg.clone(),
            err: state.err.clone(),
            finished_requests: state.finished_requests,
            quit_reason: state.quit_reason(&self.cancel, self.limit),
        }
    }
}
