//! Tests scattering searches across jobs and gathering their results

use async_trait::async_trait;
use http::StatusCode;
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracesearch::blocks::{list_blocks, plan_jobs};
use tracesearch::conf::SearchConf;
use tracesearch::executor::{BlockExecutor, JobExecutor};
use tracesearch::models::{BlockMeta, PageMeta, SearchJob, SearchRequest, SearchResponse};
use tracesearch::progress::{QuitReason, streaming_factory};
use tracesearch::sharder::SearchSharder;
use tracesearch::test_utilities::generators;
use tracesearch::{Error, is, is_empty};
use uuid::Uuid;

/// What a scripted job should do
#[derive(Clone)]
enum Script {
    /// Return these trace ids
    Respond(Vec<String>),
    /// Fail with an error
    Fail(String),
    /// Return a failing status
    Status(StatusCode),
    /// Wait until the search is cancelled
    Hang,
    /// Sleep before returning these trace ids
    Slow(Duration, Vec<String>),
    /// Panic mid job
    Panic,
}

/// An executor that does whatever each job's script says
#[derive(Default)]
struct ScriptedExecutor {
    /// The script for each block
    scripts: HashMap<Uuid, Script>,
    /// The number of jobs that were started
    started: AtomicUsize,
    /// The number of jobs running right now
    running: AtomicUsize,
    /// The most jobs that were ever running at once
    max_running: AtomicUsize,
}

impl ScriptedExecutor {
    /// Build an executor and the jobs for a list of scripts
    fn new(scripts: Vec<Script>) -> (Arc<Self>, Vec<SearchJob>) {
        let mut executor = ScriptedExecutor::default();
        let mut jobs = Vec::new();
        for script in scripts {
            let block = BlockMeta {
                block_id: Uuid::new_v4(),
                tenant: "tenant".to_owned(),
                total_records: 1,
                size: 10,
                start_time_unix_nano: 0,
                end_time_unix_nano: 0,
                pages: vec![PageMeta {
                    offset: 0,
                    length: 10,
                    records: 1,
                }],
            };
            executor.scripts.insert(block.block_id, script);
            jobs.push(SearchJob::new(Arc::new(block), 0, 1));
        }
        (Arc::new(executor), jobs)
    }

    /// Build a response with these trace ids
    fn respond(ids: &[String]) -> SearchResponse {
        let ids: Vec<&str> = ids.iter().map(String::as_str).collect();
        generators::response(&ids)
    }
}

#[async_trait]
impl JobExecutor for ScriptedExecutor {
    async fn execute(
        &self,
        _req: &SearchRequest,
        job: SearchJob,
        cancel: CancellationToken,
    ) -> Result<SearchResponse, Error> {
        self.started.fetch_add(1, Ordering::SeqCst);
        let running = self.running.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_running.fetch_max(running, Ordering::SeqCst);
        let script = self
            .scripts
            .get(&job.block.block_id)
            .cloned()
            .ok_or_else(|| Error::new("unknown job"))?;
        let result = match script {
            Script::Respond(ids) => Ok(Self::respond(&ids)),
            Script::Fail(msg) => Err(Error::new(msg)),
            Script::Status(code) => Err(Error::from_status(code, "downstream failure")),
            Script::Hang => {
                cancel.cancelled().await;
                Err(Error::Cancelled)
            }
            Script::Slow(delay, ids) => {
                tokio::time::sleep(delay).await;
                Ok(Self::respond(&ids))
            }
            Script::Panic => panic!("job blew up"),
        };
        self.running.fetch_sub(1, Ordering::SeqCst);
        result
    }
}

/// Build a script returning some ids
fn respond(ids: &[&str]) -> Script {
    Script::Respond(ids.iter().map(|id| (*id).to_owned()).collect())
}

/// Build a search config that runs one job at a time
fn serial_conf() -> SearchConf {
    SearchConf {
        concurrent_jobs: 1,
        ..SearchConf::default()
    }
}

#[tokio::test]
async fn searches_blocks_end_to_end() -> Result<(), Error> {
    let (backend, _) = generators::seeded_backend("tenant", 4, 20, 5).await?;
    let blocks = list_blocks(backend.as_ref(), "tenant").await?;
    // one job per page
    let jobs = plan_jobs(blocks, 1);
    is!(jobs.len(), 16);
    let sharder = SearchSharder::new(&SearchConf::default(), Arc::new(BlockExecutor::new(backend)));
    let req = SearchRequest::default().service("frontend").limit(1000);
    let results = sharder.search(req, jobs, &CancellationToken::new()).await?;
    is!(results.is_success(), true);
    is!(results.finished_requests, 16);
    let metrics = &results.response.metrics;
    is!(metrics.inspected_traces, 80);
    is!(metrics.completed_jobs, 16);
    is!(results.quit_reason, None::<QuitReason>);
    is!(metrics.total_jobs, 16);
    is!(metrics.total_blocks, 4);
    is!(metrics.inspected_bytes, metrics.total_block_bytes);
    // every third trace is from our frontend
    is!(results.traces().len(), 27);
    for trace in results.traces() {
        is!(trace.root_service_name, "frontend");
    }
    // the newest trace comes first
    is!(results.traces()[0].trace_id, generators::trace(78).trace_id);
    Ok(())
}

#[tokio::test]
async fn limits_stop_scheduling_jobs() -> Result<(), Error> {
    let scripts = (0..10)
        .map(|job| Script::Respond(vec![format!("{job}-a"), format!("{job}-b")]))
        .collect();
    let (executor, jobs) = ScriptedExecutor::new(scripts);
    let sharder = SearchSharder::new(&serial_conf(), executor.clone());
    let req = SearchRequest::default().limit(3);
    let results = sharder.search(req, jobs, &CancellationToken::new()).await?;
    // the second job tipped us over our limit
    is!(results.finished_requests, 2);
    is!(results.traces().len(), 4);
    is!(executor.started.load(Ordering::SeqCst), 2);
    is!(results.is_success(), true);
    // cancelling our jobs after the limit must not hide why we stopped
    is!(results.quit_reason, Some(QuitReason::LimitReached));
    Ok(())
}

#[tokio::test]
async fn exact_limits_truncate_results() -> Result<(), Error> {
    let (executor, jobs) = ScriptedExecutor::new(vec![
        respond(&["a", "b"]),
        respond(&["c", "d"]),
        respond(&["e"]),
    ]);
    let conf = SearchConf {
        exact_limit: true,
        ..serial_conf()
    };
    let sharder = SearchSharder::new(&conf, executor);
    let req = SearchRequest::default().limit(3);
    let results = sharder.search(req, jobs, &CancellationToken::new()).await?;
    is!(results.finished_requests, 2);
    is!(results.traces().len(), 3);
    Ok(())
}

#[tokio::test]
async fn errors_stop_the_search() -> Result<(), Error> {
    let (executor, jobs) = ScriptedExecutor::new(vec![
        respond(&["a"]),
        Script::Fail("querier crashed".to_owned()),
        respond(&["b"]),
        respond(&["c"]),
    ]);
    let sharder = SearchSharder::new(&serial_conf(), executor.clone());
    let results = sharder
        .search(SearchRequest::default(), jobs, &CancellationToken::new())
        .await?;
    is!(results.is_success(), false);
    let err = results
        .err
        .as_ref()
        .ok_or_else(|| Error::new("missing error"))?;
    is!(err.msg(), Some("querier crashed".to_owned()));
    is!(results.quit_reason, Some(QuitReason::Error));
    is!(results.finished_requests, 1);
    is!(executor.started.load(Ordering::SeqCst), 2);
    Ok(())
}

#[tokio::test]
async fn failing_statuses_stop_the_search() -> Result<(), Error> {
    let (executor, jobs) = ScriptedExecutor::new(vec![
        Script::Status(StatusCode::SERVICE_UNAVAILABLE),
        respond(&["a"]),
    ]);
    let sharder = SearchSharder::new(&serial_conf(), executor);
    let results = sharder
        .search(SearchRequest::default(), jobs, &CancellationToken::new())
        .await?;
    is!(results.status_code, StatusCode::SERVICE_UNAVAILABLE);
    is!(results.status_msg, "downstream failure");
    is!(
        results.quit_reason,
        Some(QuitReason::Status(StatusCode::SERVICE_UNAVAILABLE))
    );
    is!(results.err.is_none(), true);
    is!(results.finished_requests, 0);
    Ok(())
}

#[tokio::test]
async fn panicking_jobs_are_errors() -> Result<(), Error> {
    let (executor, jobs) = ScriptedExecutor::new(vec![Script::Panic, respond(&["a"])]);
    let sharder = SearchSharder::new(&serial_conf(), executor);
    let results = sharder
        .search(SearchRequest::default(), jobs, &CancellationToken::new())
        .await?;
    let kind = results.err.as_ref().map(|err| err.kind());
    is!(kind, Some("JoinError"));
    Ok(())
}

#[tokio::test]
async fn timeouts_cancel_running_jobs() -> Result<(), Error> {
    let (executor, jobs) = ScriptedExecutor::new(vec![Script::Hang, Script::Hang, respond(&["a"])]);
    let conf = SearchConf {
        query_timeout: 1,
        ..SearchConf::default()
    };
    let sharder = SearchSharder::new(&conf, executor);
    let cancel = CancellationToken::new();
    let search = sharder.search(SearchRequest::default(), jobs, &cancel);
    let results = tokio::time::timeout(Duration::from_secs(10), search)
        .await
        .map_err(|_| Error::new("search ignored its timeout"))??;
    // timing out is not an error
    is!(results.err.is_none(), true);
    is!(results.status_code, StatusCode::OK);
    is!((results.finished_requests <= 1), true);
    is!(results.quit_reason, Some(QuitReason::Cancelled));
    Ok(())
}

#[tokio::test]
async fn callers_can_cancel_searches() -> Result<(), Error> {
    let (executor, jobs) = ScriptedExecutor::new(vec![Script::Hang; 4]);
    let sharder = SearchSharder::new(&SearchConf::default(), executor);
    let cancel = CancellationToken::new();
    let canceller = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(50)).await;
        canceller.cancel();
    });
    let search = sharder.search(SearchRequest::default(), jobs, &cancel);
    let results = tokio::time::timeout(Duration::from_secs(10), search)
        .await
        .map_err(|_| Error::new("search ignored its cancel"))??;
    is!(results.finished_requests, 0);
    is_empty!(results.traces());
    is!(results.err.is_none(), true);
    is!(results.quit_reason, Some(QuitReason::Cancelled));
    Ok(())
}

#[tokio::test]
async fn cancelled_searches_never_start_jobs() -> Result<(), Error> {
    let (executor, jobs) = ScriptedExecutor::new(vec![respond(&["a"]), respond(&["b"])]);
    let sharder = SearchSharder::new(&SearchConf::default(), executor.clone());
    let cancel = CancellationToken::new();
    cancel.cancel();
    let results = sharder.search(SearchRequest::default(), jobs, &cancel).await?;
    is!(results.finished_requests, 0);
    is!(executor.started.load(Ordering::SeqCst), 0);
    is!(results.quit_reason, Some(QuitReason::Cancelled));
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrency_is_bounded() -> Result<(), Error> {
    let scripts = (0..12)
        .map(|job| Script::Slow(Duration::from_millis(20), vec![format!("trace-{job}")]))
        .collect();
    let (executor, jobs) = ScriptedExecutor::new(scripts);
    let conf = SearchConf {
        concurrent_jobs: 3,
        ..SearchConf::default()
    };
    let sharder = SearchSharder::new(&conf, executor.clone());
    let req = SearchRequest::default().limit(100);
    let results = sharder.search(req, jobs, &CancellationToken::new()).await?;
    is!(results.finished_requests, 12);
    is!(results.traces().len(), 12);
    is!((executor.max_running.load(Ordering::SeqCst) <= 3), true);
    Ok(())
}

#[tokio::test]
async fn oversized_limits_are_rejected() -> Result<(), Error> {
    let (executor, jobs) = ScriptedExecutor::new(vec![respond(&["a"])]);
    let conf = SearchConf {
        max_limit: 10,
        ..SearchConf::default()
    };
    let sharder = SearchSharder::new(&conf, executor);
    let req = SearchRequest::default().limit(11);
    match sharder.search(req, jobs, &CancellationToken::new()).await {
        Err(err) => is!(err.status(), Some(StatusCode::BAD_REQUEST)),
        Ok(_) => return Err(Error::new("oversized limit was allowed")),
    }
    Ok(())
}

#[tokio::test]
async fn streaming_searches_publish_snapshots() -> Result<(), Error> {
    let (executor, jobs) = ScriptedExecutor::new(vec![
        respond(&["a"]),
        respond(&["b"]),
        respond(&["a", "c"]),
    ]);
    let (tx, rx) = kanal::bounded_async(16);
    let sharder = SearchSharder::new(&serial_conf(), executor).factory(streaming_factory(tx));
    let results = sharder
        .search(SearchRequest::default(), jobs, &CancellationToken::new())
        .await?;
    is!(results.traces().len(), 3);
    // we should get one snapshot per job in order
    let mut finished = Vec::new();
    while let Ok(Some(snapshot)) = rx.try_recv() {
        finished.push(snapshot.finished_requests);
    }
    is!(finished, vec![1, 2, 3]);
    Ok(())
}

#[tokio::test]
async fn streaming_searches_report_limit_quits() -> Result<(), Error> {
    let (executor, jobs) = ScriptedExecutor::new(vec![
        respond(&["a", "b"]),
        respond(&["c", "d"]),
        respond(&["e"]),
    ]);
    let (tx, rx) = kanal::bounded_async(16);
    let sharder = SearchSharder::new(&serial_conf(), executor).factory(streaming_factory(tx));
    let req = SearchRequest::default().limit(3);
    let results = sharder.search(req, jobs, &CancellationToken::new()).await?;
    is!(results.quit_reason, Some(QuitReason::LimitReached));
    // the snapshot published by the tipping merge saw the limit too
    let mut last = None;
    while let Ok(Some(snapshot)) = rx.try_recv() {
        last = Some(snapshot);
    }
    let last = last.ok_or_else(|| Error::new("no snapshots were published"))?;
    is!(last.finished_requests, 2);
    is!(last.quit_reason, Some(QuitReason::LimitReached));
    Ok(())
}
