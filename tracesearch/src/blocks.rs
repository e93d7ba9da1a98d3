//! Write blocks of traces to a backend and plan the jobs that search them
//!
//! A block lives under the keypath `[tenant, block_id]` and is made of two
//! objects. `data.json` holds one trace per line grouped into pages and
//! `meta.json` holds the [`BlockMeta`] describing where each page starts.
//! Each tenant also has an `index.json` listing its completed blocks.

use bytes::Bytes;
use futures::future::try_join_all;
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{Level, event, instrument};
use uuid::Uuid;

use crate::backend::{Backend, KeyPath, Version};
use crate::models::{BlockMeta, PageMeta, SearchJob, SearchRequest, TenantIndex, TraceSearchMetadata};
use crate::utils::Error;

/// The name of the object holding a block's traces
pub const DATA_OBJECT: &str = "data.json";

/// The name of the object holding a block's metadata
pub const META_OBJECT: &str = "meta.json";

/// The name of the object listing a tenant's blocks
pub const INDEX_OBJECT: &str = "index.json";

/// The number of times to retry a conflicting index update
const INDEX_RETRIES: usize = 16;

/// Get the keypath for a tenant
fn tenant_path(tenant: &str) -> KeyPath {
    vec![tenant.to_owned()]
}

/// Get the keypath for a block
///
/// # Arguments
///
/// * `tenant` - The tenant that owns this block
/// * `block_id` - The id of the block
#[must_use]
pub fn block_path(tenant: &str, block_id: &Uuid) -> KeyPath {
    vec![tenant.to_owned(), block_id.to_string()]
}

/// Serialize traces into paged newline delimited json
///
/// # Arguments
///
/// * `traces` - The traces to serialize
/// * `page_size` - The max number of traces per page
fn build_pages(
    traces: &[TraceSearchMetadata],
    page_size: usize,
) -> Result<(Vec<u8>, Vec<PageMeta>), Error> {
    let mut data = Vec::new();
    let mut pages = Vec::new();
    // a page size of 0 would never make progress
    for chunk in traces.chunks(page_size.max(1)) {
        let offset = data.len() as u64;
        for trace in chunk {
            serde_json::to_writer(&mut data, trace)?;
            data.push(b'\n');
        }
        pages.push(PageMeta {
            offset,
            length: data.len() as u64 - offset,
            records: u32::try_from(chunk.len()).unwrap_or(u32::MAX),
        });
    }
    Ok((data, pages))
}

/// Read a tenant's index and its version
///
/// # Arguments
///
/// * `backend` - The backend to read from
/// * `tenant` - The tenant to read an index for
async fn read_index(backend: &dyn Backend, tenant: &str) -> Result<(TenantIndex, Version), Error> {
    match backend.read_versioned(INDEX_OBJECT, &tenant_path(tenant)).await {
        Ok((data, version)) => Ok((serde_json::from_slice(&data)?, version)),
        // tenants without an index just don't have any blocks yet
        Err(Error::DoesNotExist(_)) => Ok((TenantIndex::default(), Version::new_object())),
        Err(error) => Err(error),
    }
}

/// Apply an update to a tenant's index, retrying when another writer beats us
///
/// # Arguments
///
/// * `backend` - The backend to update
/// * `tenant` - The tenant whose index to update
/// * `update` - The change to make to the index
async fn update_index<F>(backend: &dyn Backend, tenant: &str, update: F) -> Result<(), Error>
where
    F: Fn(&mut TenantIndex),
{
    let keypath = tenant_path(tenant);
    for attempt in 0..INDEX_RETRIES {
        // get the current index and apply our change
        let (mut index, version) = read_index(backend, tenant).await?;
        update(&mut index);
        let data = Bytes::from(serde_json::to_vec(&index)?);
        match backend
            .write_versioned(INDEX_OBJECT, &keypath, data, &version)
            .await
        {
            Ok(_) => return Ok(()),
            // someone else updated this index so re-read it and try again
            Err(Error::VersionDoesNotMatch { .. }) => {
                event!(
                    Level::DEBUG,
                    msg = "Index update conflicted",
                    tenant,
                    attempt
                );
            }
            Err(error) => return Err(error),
        }
    }
    Err(Error::new(format!(
        "Failed to update the index for {tenant} after {INDEX_RETRIES} attempts"
    )))
}

/// Write a new block of traces
///
/// The data is written before the metadata and the index is updated last so
/// readers never find a block that is only partially written.
///
/// # Arguments
///
/// * `backend` - The backend to write to
/// * `tenant` - The tenant this block belongs to
/// * `traces` - The traces to store in this block
/// * `page_size` - The max number of traces per page
#[instrument(name = "blocks::write_block", skip(backend, traces), fields(traces = traces.len()), err(Debug))]
pub async fn write_block(
    backend: &dyn Backend,
    tenant: &str,
    traces: &[TraceSearchMetadata],
    page_size: usize,
) -> Result<BlockMeta, Error> {
    if traces.is_empty() {
        return Err(Error::new("Blocks must contain at least one trace"));
    }
    // serialize our traces into pages
    let (data, pages) = build_pages(traces, page_size)?;
    // get the time range this block covers
    let start_time_unix_nano = traces
        .iter()
        .map(|trace| trace.start_time_unix_nano)
        .min()
        .unwrap_or_default();
    let end_time_unix_nano = traces
        .iter()
        .map(TraceSearchMetadata::end_time_unix_nano)
        .max()
        .unwrap_or_default();
    let meta = BlockMeta {
        block_id: Uuid::new_v4(),
        tenant: tenant.to_owned(),
        total_records: traces.len() as u64,
        size: data.len() as u64,
        start_time_unix_nano,
        end_time_unix_nano,
        pages,
    };
    let keypath = block_path(tenant, &meta.block_id);
    // write our data then our metadata
    backend.write(DATA_OBJECT, &keypath, Bytes::from(data)).await?;
    let raw_meta = Bytes::from(serde_json::to_vec(&meta)?);
    backend.write(META_OBJECT, &keypath, raw_meta).await?;
    // add this block to our tenant's index
    let block_id = meta.block_id;
    update_index(backend, tenant, |index| {
        if !index.blocks.contains(&block_id) {
            index.blocks.push(block_id);
        }
    })
    .await?;
    event!(
        Level::INFO,
        msg = "Wrote block",
        tenant,
        block = meta.block_id.to_string(),
        records = meta.total_records,
        size = meta.size,
    );
    Ok(meta)
}

/// Read the metadata for a single block
///
/// # Arguments
///
/// * `backend` - The backend to read from
/// * `tenant` - The tenant that owns this block
/// * `block_id` - The block to read
pub async fn read_block_meta(
    backend: &dyn Backend,
    tenant: &str,
    block_id: &Uuid,
) -> Result<BlockMeta, Error> {
    let raw = backend
        .read(META_OBJECT, &block_path(tenant, block_id))
        .await?;
    Ok(serde_json::from_slice(&raw)?)
}

/// List the metadata for every indexed block in a tenant
///
/// # Arguments
///
/// * `backend` - The backend to read from
/// * `tenant` - The tenant to list blocks for
#[instrument(name = "blocks::list_blocks", skip(backend), err(Debug))]
pub async fn list_blocks(backend: &dyn Backend, tenant: &str) -> Result<Vec<BlockMeta>, Error> {
    let (index, _) = read_index(backend, tenant).await?;
    // read all of our block metadata at once
    let reads = index
        .blocks
        .iter()
        .map(|block_id| read_block_meta(backend, tenant, block_id));
    try_join_all(reads).await
}

/// Rebuild a tenant's index from the blocks actually in the backend
///
/// Block directories without metadata are partial writes and are skipped.
///
/// # Arguments
///
/// * `backend` - The backend to rebuild an index in
/// * `tenant` - The tenant to rebuild an index for
#[instrument(name = "blocks::rebuild_index", skip(backend), err(Debug))]
pub async fn rebuild_index(backend: &dyn Backend, tenant: &str) -> Result<TenantIndex, Error> {
    let mut found = Vec::new();
    for name in backend.list(&tenant_path(tenant)).await? {
        // anything that isn't a block id is not a block
        let Ok(block_id) = Uuid::parse_str(&name) else {
            continue;
        };
        match read_block_meta(backend, tenant, &block_id).await {
            Ok(_) => found.push(block_id),
            Err(Error::DoesNotExist(_)) => {
                event!(
                    Level::WARN,
                    msg = "Skipping partially written block",
                    tenant,
                    block = name
                );
            }
            Err(error) => return Err(error),
        }
    }
    found.sort();
    let rebuilt = TenantIndex { blocks: found };
    let replacement = rebuilt.clone();
    update_index(backend, tenant, move |index| {
        index.blocks.clone_from(&replacement.blocks);
    })
    .await?;
    Ok(rebuilt)
}

/// Drop any blocks that can't contain traces in a request's time window
///
/// # Arguments
///
/// * `blocks` - The blocks to filter
/// * `req` - The request to filter blocks for
#[must_use]
pub fn filter_blocks(blocks: Vec<BlockMeta>, req: &SearchRequest) -> Vec<BlockMeta> {
    blocks
        .into_iter()
        .filter(|block| req.overlaps(block.start_time_unix_nano, block.end_time_unix_nano))
        .collect()
}

/// Split blocks into jobs that each search about the target number of bytes
///
/// Every job covers at least one page and never spans more than one block.
///
/// # Arguments
///
/// * `blocks` - The blocks to search
/// * `target_bytes_per_job` - The number of bytes each job should try to search
#[must_use]
pub fn plan_jobs(blocks: Vec<BlockMeta>, target_bytes_per_job: u64) -> Vec<SearchJob> {
    let mut jobs = Vec::new();
    for block in blocks {
        let block = Arc::new(block);
        let mut start = 0;
        let mut bytes = 0;
        for (index, page) in block.pages.iter().enumerate() {
            bytes += page.length;
            // cut a job once we have enough bytes
            if bytes >= target_bytes_per_job {
                jobs.push(SearchJob::new(block.clone(), start, index + 1 - start));
                start = index + 1;
                bytes = 0;
            }
        }
        // add a job for any leftover pages
        if start < block.pages.len() {
            let pages = block.pages.len() - start;
            jobs.push(SearchJob::new(block.clone(), start, pages));
        }
    }
    jobs
}

/// Get the totals a search's progress starts with
///
/// Returns the total jobs, the total distinct blocks and the bytes across
/// those blocks. Blocks split into many jobs are only counted once.
///
/// # Arguments
///
/// * `jobs` - The jobs a search will run
#[must_use]
pub fn plan_totals(jobs: &[SearchJob]) -> (u32, u32, u64) {
    let mut seen = HashSet::new();
    let mut total_block_bytes = 0_u64;
    for job in jobs {
        if seen.insert(job.block.block_id) {
            total_block_bytes = total_block_bytes.saturating_add(job.block.size);
        }
    }
    let total_jobs = u32::try_from(jobs.len()).unwrap_or(u32::MAX);
    let total_blocks = u32::try_from(seen.len()).unwrap_or(u32::MAX);
    (total_jobs, total_blocks, total_block_bytes)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{MemoryBackend, RawWriter};

    fn traces(count: usize) -> Vec<TraceSearchMetadata> {
        (0..count)
            .map(|i| TraceSearchMetadata::new(format!("{i:04}")).timing(1_000 + i as u64, 5))
            .collect()
    }

    fn block(pages: &[u64]) -> BlockMeta {
        let mut offset = 0;
        let pages = pages
            .iter()
            .map(|length| {
                let page = PageMeta {
                    offset,
                    length: *length,
                    records: 1,
                };
                offset += length;
                page
            })
            .collect::<Vec<_>>();
        BlockMeta {
            block_id: Uuid::new_v4(),
            tenant: "tenant".into(),
            total_records: pages.len() as u64,
            size: offset,
            start_time_unix_nano: 0,
            end_time_unix_nano: 0,
            pages,
        }
    }

    #[test]
    fn pages_locate_their_traces() {
        let traces = traces(5);
        let (data, pages) = build_pages(&traces, 2).unwrap();
        assert_eq!(pages.len(), 3);
        assert_eq!(pages.iter().map(|page| page.records).collect::<Vec<_>>(), vec![2, 2, 1]);
        assert_eq!(pages.iter().map(|page| page.length).sum::<u64>(), data.len() as u64);
        // the last page should only hold the last trace
        let last = pages[2];
        let raw = &data[last.offset as usize..(last.offset + last.length) as usize];
        let parsed: TraceSearchMetadata = serde_json::from_slice(raw.trim_ascii_end()).unwrap();
        assert_eq!(parsed.trace_id, "0004");
    }

    #[test]
    fn jobs_split_on_target_bytes() {
        let jobs = plan_jobs(vec![block(&[10, 10, 10, 10, 5]), block(&[])], 20);
        let shape: Vec<(usize, usize)> = jobs.iter().map(|job| (job.start_page, job.pages)).collect();
        assert_eq!(shape, vec![(0, 2), (2, 2), (4, 1)]);
        assert_eq!(plan_totals(&jobs), (3, 1, 45));
    }

    #[test]
    fn zero_target_makes_a_job_per_page() {
        let jobs = plan_jobs(vec![block(&[1, 2, 3]), block(&[4])], 0);
        assert_eq!(jobs.len(), 4);
        assert_eq!(plan_totals(&jobs), (4, 2, 10));
        assert_eq!(plan_totals(&[]), (0, 0, 0));
    }

    #[tokio::test]
    async fn written_blocks_are_listed() {
        let backend = MemoryBackend::default();
        let first = write_block(&backend, "tenant", &traces(3), 2).await.unwrap();
        let second = write_block(&backend, "tenant", &traces(1), 2).await.unwrap();
        let listed = list_blocks(&backend, "tenant").await.unwrap();
        assert_eq!(listed, vec![first.clone(), second]);
        assert_eq!(first.start_time_unix_nano, 1_000);
        assert_eq!(first.end_time_unix_nano, 1_002 + 5_000_000);
        assert!(list_blocks(&backend, "other").await.unwrap().is_empty());
        assert!(write_block(&backend, "tenant", &[], 2).await.is_err());
    }

    #[tokio::test]
    async fn rebuilt_indexes_skip_partial_blocks() {
        let backend = MemoryBackend::default();
        let meta = write_block(&backend, "tenant", &traces(2), 10).await.unwrap();
        // a block whose metadata was never written
        let partial = block_path("tenant", &Uuid::new_v4());
        backend
            .write(DATA_OBJECT, &partial, Bytes::from_static(b"{}\n"))
            .await
            .unwrap();
        backend.delete(INDEX_OBJECT, &tenant_path("tenant")).await.unwrap();
        let index = rebuild_index(&backend, "tenant").await.unwrap();
        assert_eq!(index.blocks, vec![meta.block_id]);
        assert_eq!(list_blocks(&backend, "tenant").await.unwrap(), vec![meta]);
    }
}
