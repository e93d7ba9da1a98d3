//! The structures used throughout tracesearch

mod blocks;
mod search;
mod traces;

pub use blocks::{BlockMeta, PageMeta, SearchJob, TenantIndex};
pub use search::SearchRequest;
pub use traces::{
    SearchMetrics, SearchResponse, ServiceStats, Span, SpanSet, TraceSearchMetadata,
};
