//! Scatter a search across many jobs and gather their results into one sink

use futures::stream::{FuturesUnordered, StreamExt};
use http::StatusCode;
use std::sync::Arc;
use tokio::task::{JoinError, JoinHandle};
use tokio_util::sync::CancellationToken;
use tracing::{Level, event, instrument};

use crate::blocks::plan_totals;
use crate::conf::SearchConf;
use crate::executor::JobExecutor;
use crate::models::{SearchJob, SearchRequest, SearchResponse};
use crate::progress::{
    QuitReason, SearchProgressFactory, ShardedSearchProgress, ShardedSearchResults,
    batch_factory,
};
use crate::utils::Error;

/// The handle for a running job
type JobHandle = JoinHandle<Result<SearchResponse, Error>>;

/// Feed the result of a finished job into a search's progress
///
/// # Arguments
///
/// * `progress` - The progress for this search
/// * `joined` - The result from joining this job's task
fn record(
    progress: &dyn ShardedSearchProgress,
    joined: Result<Result<SearchResponse, Error>, JoinError>,
) {
    match joined {
        Ok(Ok(res)) => progress.add_response(res),
        // cancellation is seen through our token so this isn't a failure
        Ok(Err(Error::Cancelled)) => event!(Level::DEBUG, msg = "Search job was cancelled"),
        Ok(Err(Error::Status { code, msg })) => {
            event!(
                Level::WARN,
                msg = "Search job returned a failing status",
                code = code.as_u16()
            );
            progress.set_status(code, msg.unwrap_or_default());
        }
        Ok(Err(error)) => progress.set_error(error),
        // jobs we aborted ourselves are not failures
        Err(error) if error.is_cancelled() => (),
        Err(error) => progress.set_error(Error::from(error)),
    }
}

/// Runs sharded searches with a bounded number of concurrent jobs
pub struct SearchSharder {
    /// The settings for our searches
    conf: SearchConf,
    /// Runs each job
    executor: Arc<dyn JobExecutor>,
    /// Builds the progress sink for each search
    factory: SearchProgressFactory,
}

impl SearchSharder {
    /// Create a new sharder that only returns final results
    ///
    /// # Arguments
    ///
    /// * `conf` - The settings for our searches
    /// * `executor` - Runs each job
    pub fn new(conf: &SearchConf, executor: Arc<dyn JobExecutor>) -> Self {
        SearchSharder {
            conf: conf.clone(),
            executor,
            factory: batch_factory(),
        }
    }

    /// Use a different progress sink for searches
    ///
    /// # Arguments
    ///
    /// * `factory` - Builds the progress sink for each search
    #[must_use]
    pub fn factory(mut self, factory: SearchProgressFactory) -> Self {
        self.factory = factory;
        self
    }

    /// Get the limit to use for a request
    ///
    /// # Arguments
    ///
    /// * `req` - The request to get a limit for
    pub fn limit(&self, req: &SearchRequest) -> Result<usize, Error> {
        // a limit of 0 means the request didn't set one
        if req.limit == 0 {
            return Ok(self.conf.default_limit);
        }
        if self.conf.max_limit > 0 && req.limit > self.conf.max_limit {
            return Err(Error::from_status(
                StatusCode::BAD_REQUEST,
                format!(
                    "Limit {} is more than the max of {}",
                    req.limit, self.conf.max_limit
                ),
            ));
        }
        Ok(req.limit)
    }

    /// Spawn a single job
    ///
    /// # Arguments
    ///
    /// * `req` - The request this job is a part of
    /// * `job` - The job to run
    /// * `token` - The token for this search
    fn spawn(
        &self,
        req: &Arc<SearchRequest>,
        job: SearchJob,
        token: &CancellationToken,
    ) -> JobHandle {
        let executor = self.executor.clone();
        let req = req.clone();
        let token = token.clone();
        tokio::spawn(async move { executor.execute(&req, job, token).await })
    }

    /// Search a set of jobs and combine their results
    ///
    /// Stops scheduling and cancels any running jobs as soon as our progress
    /// says to quit, the query timeout passes or `cancel` fires.
    ///
    /// # Arguments
    ///
    /// * `req` - The request to search for
    /// * `jobs` - The jobs to run
    /// * `cancel` - The token to cancel this search with
    #[instrument(name = "SearchSharder::search", skip_all, fields(jobs = jobs.len()), err(Debug))]
    pub async fn search(
        &self,
        req: SearchRequest,
        jobs: Vec<SearchJob>,
        cancel: &CancellationToken,
    ) -> Result<ShardedSearchResults, Error> {
        let limit = self.limit(&req)?;
        let (total_jobs, total_blocks, total_block_bytes) = plan_totals(&jobs);
        // use a child token so our cancels never leak out to the caller
        let token = cancel.child_token();
        let progress = (self.factory)(
            token.clone(),
            limit,
            total_jobs,
            total_blocks,
            total_block_bytes,
        );
        let req = Arc::new(req);
        let mut pending = jobs.into_iter();
        let mut running = FuturesUnordered::new();
        // build our deadline if we have one
        let timeout = self.conf.timeout();
        let deadline = async move {
            match timeout {
                Some(timeout) => tokio::time::sleep(timeout).await,
                None => std::future::pending().await,
            }
        };
        tokio::pin!(deadline);
        let mut timed_out = false;
        let mut quit = None;
        let concurrency = self.conf.concurrent_jobs.max(1);
        loop {
            // keep our concurrency limit worth of jobs running
            while running.len() < concurrency && !progress.should_quit() {
                match pending.next() {
                    Some(job) => running.push(self.spawn(&req, job, &token)),
                    None => break,
                }
            }
            // we are done once nothing is left running
            if running.is_empty() {
                break;
            }
            tokio::select! {
                () = &mut deadline, if !timed_out => {
                    event!(Level::WARN, msg = "Search timed out", running = running.len());
                    timed_out = true;
                    token.cancel();
                }
                () = token.cancelled() => (),
                Some(joined) = running.next() => record(progress.as_ref(), joined),
            }
            // get our reason before cancelling since a cancel hides the real one
            let reason = progress
                .quit_reason()
                .or_else(|| token.is_cancelled().then_some(QuitReason::Cancelled));
            // stop as soon as our progress says we have enough or something failed
            if let Some(reason) = reason {
                event!(
                    Level::INFO,
                    msg = "Quitting search early",
                    reason = ?reason,
                    running = running.len()
                );
                quit = Some(reason);
                token.cancel();
                break;
            }
        }
        // stop any jobs that are still running
        for handle in running.iter() {
            handle.abort();
        }
        let mut results = progress.result();
        // our token is cancelled by now so keep the reason we actually stopped for
        if quit.is_some() {
            results.quit_reason = quit;
        }
        if self.conf.exact_limit {
            results.truncate(limit);
        }
        event!(
            Level::INFO,
            msg = "Search complete",
            traces = results.traces().len(),
            finished = results.finished_requests,
            success = results.is_success(),
        );
        Ok(results)
    }
}
