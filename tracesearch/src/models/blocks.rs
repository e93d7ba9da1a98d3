//! The blocks that traces are stored in and the jobs that search them

use std::sync::Arc;
use uuid::Uuid;

/// Where a single page of traces lives in a block's data object
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageMeta {
    /// The byte offset this page starts at
    pub offset: u64,
    /// The number of bytes in this page
    pub length: u64,
    /// The number of traces in this page
    pub records: u32,
}

/// The metadata for a sealed block of traces
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct BlockMeta {
    /// The id for this block
    pub block_id: Uuid,
    /// The tenant that owns this block
    pub tenant: String,
    /// The number of traces in this block
    pub total_records: u64,
    /// The size of this block's data in bytes
    pub size: u64,
    /// The earliest start time of any trace in this block
    pub start_time_unix_nano: u64,
    /// The latest end time of any trace in this block
    pub end_time_unix_nano: u64,
    /// The pages in this block's data object
    #[serde(default)]
    pub pages: Vec<PageMeta>,
}

/// The list of blocks for a tenant
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq, Default)]
pub struct TenantIndex {
    /// The blocks that have been fully written for this tenant
    #[serde(default)]
    pub blocks: Vec<Uuid>,
}

/// A job searching a range of pages in a single block
#[derive(Debug, Clone)]
pub struct SearchJob {
    /// The block to search
    pub block: Arc<BlockMeta>,
    /// The first page to search
    pub start_page: usize,
    /// The number of pages to search
    pub pages: usize,
}

impl SearchJob {
    /// Create a new search job
    ///
    /// # Arguments
    ///
    /// * `block` - The block to search
    /// * `start_page` - The first page to search
    /// * `pages` - The number of pages to search
    pub fn new(block: Arc<BlockMeta>, start_page: usize, pages: usize) -> Self {
        SearchJob {
            block,
            start_page,
            pages,
        }
    }

    /// A key identifying this job in logs
    #[must_use]
    pub fn key(&self) -> String {
        format!("{}:{}", self.block.block_id, self.start_page)
    }

    /// The pages this job will search
    #[must_use]
    pub fn page_range(&self) -> &[PageMeta] {
        // clamp our range to the pages that actually exist
        let start = self.start_page.min(self.block.pages.len());
        let end = self.start_page.saturating_add(self.pages).min(self.block.pages.len());
        &self.block.pages[start..end]
    }

    /// The number of bytes this job will search
    #[must_use]
    pub fn bytes(&self) -> u64 {
        self.page_range().iter().map(|page| page.length).sum()
    }
}
