use clap::Parser;
use kanal::AsyncReceiver;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracesearch::backend::Backend;
use tracesearch::blocks::{filter_blocks, list_blocks, plan_jobs, rebuild_index, write_block};
use tracesearch::conf::ProgressMode;
use tracesearch::executor::BlockExecutor;
use tracesearch::models::TraceSearchMetadata;
use tracesearch::progress::{ShardedSearchResults, streaming_factory};
use tracesearch::sharder::SearchSharder;
use tracesearch::{Conf, Error};
use tracing::{Level, event, instrument};

mod args;

use args::{Args, Ingest, Search, SubCommands};

/// Write a block of traces from a file
///
/// # Arguments
///
/// * `conf` - The tracesearch config
/// * `backend` - The backend to write to
/// * `tenant` - The tenant to write a block for
/// * `ingest` - The ingest args
async fn ingest(
    conf: &Conf,
    backend: &dyn Backend,
    tenant: &str,
    ingest: &Ingest,
) -> Result<(), Error> {
    // read and parse our traces
    let raw = tokio::fs::read(&ingest.path).await?;
    let traces: Vec<TraceSearchMetadata> = serde_json::from_slice(&raw)?;
    let page_size = ingest.page_size.unwrap_or(conf.search.page_size);
    let meta = write_block(backend, tenant, &traces, page_size).await?;
    println!("{}", serde_json::to_string_pretty(&meta)?);
    Ok(())
}

/// Print every snapshot a streaming search publishes
///
/// # Arguments
///
/// * `updates` - The channel snapshots are published on
async fn print_snapshots(updates: AsyncReceiver<ShardedSearchResults>) -> Result<(), Error> {
    // this ends once every sender is dropped after our search completes
    while let Ok(snapshot) = updates.recv().await {
        let metrics = &snapshot.response.metrics;
        eprintln!(
            "{}/{} jobs complete, {} traces found, {} bytes inspected",
            metrics.completed_jobs,
            metrics.total_jobs,
            snapshot.traces().len(),
            metrics.inspected_bytes,
        );
    }
    Ok(())
}

/// Search a tenant's blocks
///
/// # Arguments
///
/// * `conf` - The tracesearch config
/// * `backend` - The backend our blocks are in
/// * `tenant` - The tenant to search
/// * `search` - The search args
async fn search(
    conf: &Conf,
    backend: Arc<dyn Backend>,
    tenant: &str,
    search: &Search,
) -> Result<(), Error> {
    let req = search.to_request()?;
    // plan the jobs for this search
    let blocks = filter_blocks(list_blocks(backend.as_ref(), tenant).await?, &req);
    let jobs = plan_jobs(blocks, conf.search.target_bytes_per_job);
    event!(Level::INFO, msg = "Planned search", tenant, jobs = jobs.len());
    let executor = Arc::new(BlockExecutor::new(backend));
    let mut sharder = SearchSharder::new(&conf.search, executor);
    // print our progress if we are streaming snapshots
    let printer = match conf.search.progress {
        ProgressMode::Streaming { buffer } => {
            let (updates_tx, updates_rx) = kanal::bounded_async(buffer.max(1));
            sharder = sharder.factory(streaming_factory(updates_tx));
            Some(tokio::spawn(print_snapshots(updates_rx)))
        }
        ProgressMode::Batch => None,
    };
    // cancel this search if we are interrupted
    let cancel = CancellationToken::new();
    let interrupt = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            interrupt.cancel();
        }
    });
    let results = sharder.search(req, jobs, &cancel).await?;
    // drop our sharder so our snapshot printer sees its channel close
    drop(sharder);
    if let Some(printer) = printer {
        printer.await??;
    }
    println!("{}", serde_json::to_string_pretty(&results.to_json()?)?);
    if results.is_success() {
        Ok(())
    } else {
        Err(Error::new("Search did not complete successfully"))
    }
}

#[instrument(name = "searcher::main", err(Debug))]
#[tokio::main]
async fn main() -> Result<(), Error> {
    // get our command line args
    let args = Args::parse();
    // load our config
    let conf = Conf::new(&args.config)
        .map_err(|err| Error::new(format!("Failed to load tracesearch config: {err}")))?;
    // setup our tracer
    tracesearch::utils::trace::setup("TraceSearcher", &conf.tracing);
    // get the backend our blocks are stored in
    let backend = tracesearch::backend::from_conf(&conf.backend).await?;
    match &args.cmd {
        SubCommands::Ingest(cmd) => ingest(&conf, backend.as_ref(), &args.tenant, cmd).await,
        SubCommands::Search(cmd) => search(&conf, backend, &args.tenant, cmd).await,
        SubCommands::Reindex => {
            let index = rebuild_index(backend.as_ref(), &args.tenant).await?;
            println!("{}", serde_json::to_string_pretty(&index)?);
            Ok(())
        }
    }
}
