//! Build trace fixtures and seeded backends for tests

use std::sync::Arc;

use crate::backend::MemoryBackend;
use crate::blocks::write_block;
use crate::models::{
    BlockMeta, SearchResponse, ServiceStats, Span, SpanSet, TraceSearchMetadata,
};
use crate::Error;

/// The services our fixture traces rotate through
pub const SERVICES: [&str; 3] = ["frontend", "checkout", "inventory"];

/// The start time of our first fixture trace
pub const EPOCH: u64 = 1_700_000_000_000_000_000;

/// Build a single fixture trace
///
/// # Arguments
///
/// * `index` - Which fixture trace to build
#[must_use]
pub fn trace(index: usize) -> TraceSearchMetadata {
    let service = SERVICES[index % SERVICES.len()];
    // space our traces out by a second each
    let start = EPOCH + index as u64 * 1_000_000_000;
    let duration = 10 + u32::try_from(index % 50).unwrap_or(0) * 10;
    let span = Span::new(format!("{index:016x}"), "handle")
        .timing(start, u64::from(duration) * 1_000_000)
        .attribute("http.status_code", if index % 7 == 0 { "500" } else { "200" });
    TraceSearchMetadata::new(format!("{index:032x}"))
        .root(service, format!("GET /{service}"))
        .timing(start, duration)
        .service(
            service,
            ServiceStats {
                span_count: 1,
                error_count: u32::from(index % 7 == 0),
            },
        )
        .span_set(SpanSet::default().span(span))
}

/// Build a run of fixture traces
///
/// # Arguments
///
/// * `start` - The index of the first trace
/// * `count` - The number of traces to build
#[must_use]
pub fn traces(start: usize, count: usize) -> Vec<TraceSearchMetadata> {
    (start..start + count).map(trace).collect()
}

/// Build a job response containing bare traces with these ids
///
/// # Arguments
///
/// * `ids` - The trace ids to include
#[must_use]
pub fn response(ids: &[&str]) -> SearchResponse {
    let traces = ids
        .iter()
        .map(|id| TraceSearchMetadata::new(*id))
        .collect();
    SearchResponse::new(traces, u32::try_from(ids.len()).unwrap_or(u32::MAX), 100)
}

/// Build a memory backend with blocks of fixture traces already written
///
/// # Arguments
///
/// * `tenant` - The tenant to write blocks for
/// * `blocks` - The number of blocks to write
/// * `per_block` - The number of traces in each block
/// * `page_size` - The number of traces in each page
pub async fn seeded_backend(
    tenant: &str,
    blocks: usize,
    per_block: usize,
    page_size: usize,
) -> Result<(Arc<MemoryBackend>, Vec<BlockMeta>), Error> {
    let backend = Arc::new(MemoryBackend::default());
    let mut metas = Vec::with_capacity(blocks);
    for block in 0..blocks {
        let traces = traces(block * per_block, per_block);
        metas.push(write_block(backend.as_ref(), tenant, &traces, page_size).await?);
    }
    Ok((backend, metas))
}
