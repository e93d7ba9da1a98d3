//! Execute a single search job against a block

use async_trait::async_trait;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::instrument;

use crate::backend::Backend;
use crate::blocks::{DATA_OBJECT, block_path};
use crate::models::{SearchJob, SearchRequest, SearchResponse, TraceSearchMetadata};
use crate::utils::Error;

/// Runs a single job for a sharded search
#[async_trait]
pub trait JobExecutor: Send + Sync + 'static {
    /// Search the pages covered by a job
    ///
    /// Jobs should return [`Error::Cancelled`] when their token fires before
    /// they complete.
    ///
    /// # Arguments
    ///
    /// * `req` - The request to search for
    /// * `job` - The job to execute
    /// * `cancel` - The token for the search this job is a part of
    async fn execute(
        &self,
        req: &SearchRequest,
        job: SearchJob,
        cancel: CancellationToken,
    ) -> Result<SearchResponse, Error>;
}

/// Searches the pages of blocks stored in a backend
#[derive(Clone)]
pub struct BlockExecutor {
    /// The backend our blocks are stored in
    backend: Arc<dyn Backend>,
}

impl BlockExecutor {
    /// Create a new block executor
    ///
    /// # Arguments
    ///
    /// * `backend` - The backend our blocks are stored in
    pub fn new(backend: Arc<dyn Backend>) -> Self {
        BlockExecutor { backend }
    }

    /// Read the raw pages for a job
    ///
    /// # Arguments
    ///
    /// * `job` - The job to read pages for
    async fn read_pages(&self, job: &SearchJob) -> Result<bytes::Bytes, Error> {
        let pages = job.page_range();
        // jobs past the end of their block have nothing to read
        let Some(first) = pages.first() else {
            return Ok(bytes::Bytes::new());
        };
        let keypath = block_path(&job.block.tenant, &job.block.block_id);
        self.backend
            .read_range(DATA_OBJECT, &keypath, first.offset, job.bytes())
            .await
    }
}

#[async_trait]
impl JobExecutor for BlockExecutor {
    #[instrument(name = "BlockExecutor::execute", skip_all, fields(job = job.key()), err(Debug))]
    async fn execute(
        &self,
        req: &SearchRequest,
        job: SearchJob,
        cancel: CancellationToken,
    ) -> Result<SearchResponse, Error> {
        // don't start reading if this search is already over
        if cancel.is_cancelled() {
            return Err(Error::Cancelled);
        }
        let raw = tokio::select! {
            () = cancel.cancelled() => return Err(Error::Cancelled),
            raw = self.read_pages(&job) => raw?,
        };
        let mut inspected = 0_u32;
        let mut traces = Vec::new();
        // each line in our pages is a single trace
        for line in raw.split(|byte| *byte == b'\n') {
            if line.is_empty() {
                continue;
            }
            let trace: TraceSearchMetadata = serde_json::from_slice(line)?;
            inspected = inspected.saturating_add(1);
            if req.matches(&trace) {
                traces.push(trace);
            }
        }
        Ok(SearchResponse::new(traces, inspected, job.bytes()))
    }
}
