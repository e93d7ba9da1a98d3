//! Combine trace metadata from many search jobs into one deduplicated set
//!
//! Every merge rule here is commutative and associative so the combined set
//! does not depend on the order jobs complete in.

use std::cmp::Reverse;
use std::collections::{BTreeMap, HashMap};

use crate::models::{Span, SpanSet, TraceSearchMetadata};

/// Pick between two strings preferring non empty values
fn pick_str(existing: &mut String, incoming: String) {
    // an empty string never replaces anything
    if incoming.is_empty() {
        return;
    }
    if existing.is_empty() || incoming < *existing {
        *existing = incoming;
    }
}

/// Pick the earliest non zero timestamp
fn pick_start(existing: &mut u64, incoming: u64) {
    if incoming != 0 && (*existing == 0 || incoming < *existing) {
        *existing = incoming;
    }
}

/// Merge the attributes from one map into another
fn merge_attributes(existing: &mut BTreeMap<String, String>, incoming: BTreeMap<String, String>) {
    for (key, value) in incoming {
        existing
            .entry(key)
            .and_modify(|current| {
                if value > *current {
                    current.clone_from(&value);
                }
            })
            .or_insert(value);
    }
}

/// Merge a span into an existing span with the same id
fn combine_span(existing: &mut Span, incoming: Span) {
    pick_str(&mut existing.name, incoming.name);
    pick_start(&mut existing.start_time_unix_nano, incoming.start_time_unix_nano);
    existing.duration_nanos = existing.duration_nanos.max(incoming.duration_nanos);
    merge_attributes(&mut existing.attributes, incoming.attributes);
}

/// Merge a span set into an existing span set with the same attributes
fn combine_span_set(existing: &mut SpanSet, incoming: SpanSet) {
    existing.matched = existing.matched.max(incoming.matched);
    for span in incoming.spans {
        match existing
            .spans
            .iter_mut()
            .find(|current| current.span_id == span.span_id)
        {
            Some(current) => combine_span(current, span),
            None => existing.spans.push(span),
        }
    }
}

/// Merge trace metadata into existing metadata for the same trace
///
/// # Arguments
///
/// * `existing` - The metadata to merge into
/// * `incoming` - The metadata to merge in
pub fn combine_metadata(existing: &mut TraceSearchMetadata, incoming: TraceSearchMetadata) {
    pick_str(&mut existing.trace_id, incoming.trace_id);
    pick_str(&mut existing.root_service_name, incoming.root_service_name);
    pick_str(&mut existing.root_trace_name, incoming.root_trace_name);
    pick_start(
        &mut existing.start_time_unix_nano,
        incoming.start_time_unix_nano,
    );
    existing.duration_ms = existing.duration_ms.max(incoming.duration_ms);
    // keep the highest counts we have seen for each service
    for (service, stats) in incoming.service_stats {
        let current = existing.service_stats.entry(service).or_default();
        current.span_count = current.span_count.max(stats.span_count);
        current.error_count = current.error_count.max(stats.error_count);
    }
    // span sets are the same set if they matched the same attributes
    for span_set in incoming.span_sets {
        match existing
            .span_sets
            .iter_mut()
            .find(|current| current.attributes == span_set.attributes)
        {
            Some(current) => combine_span_set(current, span_set),
            None => {
                // merge into an empty set so duplicate spans collapse
                let mut fresh = SpanSet {
                    attributes: span_set.attributes.clone(),
                    ..SpanSet::default()
                };
                combine_span_set(&mut fresh, span_set);
                existing.span_sets.push(fresh);
            }
        }
    }
}

/// Sort the span sets and spans in a trace so its layout is stable
fn normalize(mut trace: TraceSearchMetadata) -> TraceSearchMetadata {
    for span_set in &mut trace.span_sets {
        span_set.spans.sort_by(|left, right| {
            (left.start_time_unix_nano, &left.span_id)
                .cmp(&(right.start_time_unix_nano, &right.span_id))
        });
    }
    trace
        .span_sets
        .sort_by(|left, right| left.attributes.cmp(&right.attributes));
    trace
}

/// Combines trace metadata by trace id
#[derive(Debug, Default)]
pub struct MetadataCombiner {
    /// The combined traces by trace id
    traces: HashMap<String, TraceSearchMetadata>,
}

impl MetadataCombiner {
    /// Create a new empty combiner
    pub fn new() -> Self {
        MetadataCombiner::default()
    }

    /// Add trace metadata to this combiner
    ///
    /// Returns true if this trace was not already in the combiner.
    ///
    /// # Arguments
    ///
    /// * `metadata` - The trace metadata to add
    pub fn add_metadata(&mut self, metadata: TraceSearchMetadata) -> bool {
        // check if we have already seen this trace
        match self.traces.get_mut(&metadata.trace_id) {
            Some(existing) => {
                combine_metadata(existing, metadata);
                false
            }
            None => {
                // merge into empty metadata so new traces follow the same rules
                let mut fresh = TraceSearchMetadata::default();
                let trace_id = metadata.trace_id.clone();
                combine_metadata(&mut fresh, metadata);
                self.traces.insert(trace_id, fresh);
                true
            }
        }
    }

    /// Get the number of distinct traces in this combiner
    #[must_use]
    pub fn count(&self) -> usize {
        self.traces.len()
    }

    /// Get a copy of our combined traces, newest first
    #[must_use]
    pub fn metadata(&self) -> Vec<TraceSearchMetadata> {
        let mut traces: Vec<TraceSearchMetadata> =
            self.traces.values().cloned().map(normalize).collect();
        // break ties on trace id so our order is reproducible
        traces.sort_by(|left, right| {
            (Reverse(left.start_time_unix_nano), &left.trace_id)
                .cmp(&(Reverse(right.start_time_unix_nano), &right.trace_id))
        });
        traces
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::ServiceStats;

    #[test]
    fn duplicates_collapse() {
        let mut combiner = MetadataCombiner::new();
        assert!(combiner.add_metadata(TraceSearchMetadata::new("a").timing(10, 5)));
        assert!(!combiner.add_metadata(TraceSearchMetadata::new("a").timing(8, 3)));
        assert_eq!(combiner.count(), 1);
        let traces = combiner.metadata();
        assert_eq!(traces[0].start_time_unix_nano, 8);
        assert_eq!(traces[0].duration_ms, 5);
    }

    #[test]
    fn richer_fields_win() {
        let mut combiner = MetadataCombiner::new();
        combiner.add_metadata(TraceSearchMetadata::new("a"));
        combiner.add_metadata(
            TraceSearchMetadata::new("a")
                .root("frontend", "GET /")
                .service("frontend", ServiceStats { span_count: 3, error_count: 0 }),
        );
        combiner.add_metadata(
            TraceSearchMetadata::new("a")
                .service("frontend", ServiceStats { span_count: 2, error_count: 1 }),
        );
        let trace = combiner.metadata().remove(0);
        assert_eq!(trace.root_service_name, "frontend");
        assert_eq!(trace.root_trace_name, "GET /");
        assert_eq!(
            trace.service_stats["frontend"],
            ServiceStats { span_count: 3, error_count: 1 }
        );
    }

    #[test]
    fn span_sets_merge_by_attributes() {
        let left = TraceSearchMetadata::new("a").span_set(
            SpanSet::default()
                .attribute("service.name", "db")
                .span(Span::new("s2", "query").timing(20, 5))
                .span(Span::new("s1", "").timing(10, 1)),
        );
        let right = TraceSearchMetadata::new("a").span_set(
            SpanSet::default()
                .attribute("service.name", "db")
                .span(Span::new("s1", "connect").timing(10, 4).attribute("k", "v")),
        );
        let mut combiner = MetadataCombiner::new();
        combiner.add_metadata(left);
        combiner.add_metadata(right);
        let trace = combiner.metadata().remove(0);
        assert_eq!(trace.span_sets.len(), 1);
        let spans = &trace.span_sets[0].spans;
        assert_eq!(spans.len(), 2);
        assert_eq!(spans[0].span_id, "s1");
        assert_eq!(spans[0].name, "connect");
        assert_eq!(spans[0].duration_nanos, 4);
        assert_eq!(spans[0].attributes["k"], "v");
        assert_eq!(trace.span_sets[0].matched, 2);
    }

    #[test]
    fn output_is_newest_first() {
        let mut combiner = MetadataCombiner::new();
        combiner.add_metadata(TraceSearchMetadata::new("old").timing(1, 1));
        combiner.add_metadata(TraceSearchMetadata::new("new").timing(3, 1));
        combiner.add_metadata(TraceSearchMetadata::new("b-tie").timing(2, 1));
        combiner.add_metadata(TraceSearchMetadata::new("a-tie").timing(2, 1));
        let ids: Vec<String> = combiner
            .metadata()
            .into_iter()
            .map(|trace| trace.trace_id)
            .collect();
        assert_eq!(ids, vec!["new", "a-tie", "b-tie", "old"]);
    }
}
