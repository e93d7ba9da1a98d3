//! The trace metadata returned by searches

use std::collections::BTreeMap;

/// A single span that matched a search
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq, Default)]
pub struct Span {
    /// The id for this span
    pub span_id: String,
    /// The name of this span
    #[serde(default)]
    pub name: String,
    /// When this span started in nanoseconds since the epoch
    #[serde(default)]
    pub start_time_unix_nano: u64,
    /// How long this span took in nanoseconds
    #[serde(default)]
    pub duration_nanos: u64,
    /// The attributes on this span
    #[serde(default)]
    pub attributes: BTreeMap<String, String>,
}

impl Span {
    /// Create a new span
    ///
    /// # Arguments
    ///
    /// * `span_id` - The id for this span
    /// * `name` - The name of this span
    pub fn new<I: Into<String>, N: Into<String>>(span_id: I, name: N) -> Self {
        Span {
            span_id: span_id.into(),
            name: name.into(),
            ..Span::default()
        }
    }

    /// Set when this span started and how long it took
    ///
    /// # Arguments
    ///
    /// * `start` - When this span started in nanoseconds since the epoch
    /// * `duration` - How long this span took in nanoseconds
    #[must_use]
    pub fn timing(mut self, start: u64, duration: u64) -> Self {
        self.start_time_unix_nano = start;
        self.duration_nanos = duration;
        self
    }

    /// Add an attribute to this span
    ///
    /// # Arguments
    ///
    /// * `key` - The attribute key
    /// * `value` - The attribute value
    #[must_use]
    pub fn attribute<K: Into<String>, V: Into<String>>(mut self, key: K, value: V) -> Self {
        self.attributes.insert(key.into(), value.into());
        self
    }
}

/// A set of spans that matched the same group of attributes
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq, Default)]
pub struct SpanSet {
    /// The attributes shared by every span in this set
    #[serde(default)]
    pub attributes: BTreeMap<String, String>,
    /// The spans in this set
    #[serde(default)]
    pub spans: Vec<Span>,
    /// The total number of spans that matched
    #[serde(default)]
    pub matched: u32,
}

impl SpanSet {
    /// Add a span to this span set
    ///
    /// # Arguments
    ///
    /// * `span` - The span to add
    #[must_use]
    pub fn span(mut self, span: Span) -> Self {
        self.spans.push(span);
        self.matched = self.matched.max(self.spans.len() as u32);
        self
    }

    /// Add an attribute shared by this span set
    ///
    /// # Arguments
    ///
    /// * `key` - The attribute key
    /// * `value` - The attribute value
    #[must_use]
    pub fn attribute<K: Into<String>, V: Into<String>>(mut self, key: K, value: V) -> Self {
        self.attributes.insert(key.into(), value.into());
        self
    }
}

/// Span counts for a single service within a trace
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ServiceStats {
    /// The number of spans from this service
    pub span_count: u32,
    /// The number of spans from this service that errored
    #[serde(default)]
    pub error_count: u32,
}

/// The metadata for a single trace that matched a search
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq, Default)]
pub struct TraceSearchMetadata {
    /// The id for this trace
    pub trace_id: String,
    /// The service that produced the root span
    #[serde(default)]
    pub root_service_name: String,
    /// The name of the root span
    #[serde(default)]
    pub root_trace_name: String,
    /// When this trace started in nanoseconds since the epoch
    #[serde(default)]
    pub start_time_unix_nano: u64,
    /// How long this trace took in milliseconds
    #[serde(default)]
    pub duration_ms: u32,
    /// Span counts for each service in this trace
    #[serde(default)]
    pub service_stats: BTreeMap<String, ServiceStats>,
    /// The span sets that matched our query
    #[serde(default)]
    pub span_sets: Vec<SpanSet>,
}

impl TraceSearchMetadata {
    /// Create new metadata for a trace
    ///
    /// # Arguments
    ///
    /// * `trace_id` - The id for this trace
    pub fn new<T: Into<String>>(trace_id: T) -> Self {
        TraceSearchMetadata {
            trace_id: trace_id.into(),
            ..TraceSearchMetadata::default()
        }
    }

    /// Set the root service and span name for this trace
    ///
    /// # Arguments
    ///
    /// * `service` - The service that produced the root span
    /// * `name` - The name of the root span
    #[must_use]
    pub fn root<S: Into<String>, N: Into<String>>(mut self, service: S, name: N) -> Self {
        self.root_service_name = service.into();
        self.root_trace_name = name.into();
        self
    }

    /// Set when this trace started and how long it took
    ///
    /// # Arguments
    ///
    /// * `start` - When this trace started in nanoseconds since the epoch
    /// * `duration_ms` - How long this trace took in milliseconds
    #[must_use]
    pub fn timing(mut self, start: u64, duration_ms: u32) -> Self {
        self.start_time_unix_nano = start;
        self.duration_ms = duration_ms;
        self
    }

    /// Set the span counts for a service
    ///
    /// # Arguments
    ///
    /// * `service` - The service to set counts for
    /// * `stats` - The span counts for this service
    #[must_use]
    pub fn service<S: Into<String>>(mut self, service: S, stats: ServiceStats) -> Self {
        self.service_stats.insert(service.into(), stats);
        self
    }

    /// Add a span set to this trace
    ///
    /// # Arguments
    ///
    /// * `span_set` - The span set to add
    #[must_use]
    pub fn span_set(mut self, span_set: SpanSet) -> Self {
        self.span_sets.push(span_set);
        self
    }

    /// When this trace ended in nanoseconds since the epoch
    #[must_use]
    pub fn end_time_unix_nano(&self) -> u64 {
        self.start_time_unix_nano
            .saturating_add(u64::from(self.duration_ms).saturating_mul(1_000_000))
    }

    /// Check if any span set or span in this trace has an attribute
    ///
    /// # Arguments
    ///
    /// * `key` - The attribute key to look for
    /// * `value` - The value this attribute must have
    #[must_use]
    pub fn has_attribute(&self, key: &str, value: &str) -> bool {
        self.span_sets.iter().any(|set| {
            set.attributes.get(key).is_some_and(|found| found == value)
                || set
                    .spans
                    .iter()
                    .any(|span| span.attributes.get(key).is_some_and(|found| found == value))
        })
    }
}

/// The counters describing how much work a search has done
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq, Default)]
pub struct SearchMetrics {
    /// The number of traces that were inspected
    #[serde(default)]
    pub inspected_traces: u32,
    /// The number of bytes that were inspected
    #[serde(default)]
    pub inspected_bytes: u64,
    /// The number of blocks this search covers
    #[serde(default)]
    pub total_blocks: u32,
    /// The number of jobs that have completed
    #[serde(default)]
    pub completed_jobs: u32,
    /// The number of jobs this search was split into
    #[serde(default)]
    pub total_jobs: u32,
    /// The number of bytes across all blocks this search covers
    #[serde(default)]
    pub total_block_bytes: u64,
}

/// The response from a search or a single search job
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq, Default)]
pub struct SearchResponse {
    /// The traces that matched
    #[serde(default)]
    pub traces: Vec<TraceSearchMetadata>,
    /// How much work was done to get these traces
    #[serde(default)]
    pub metrics: SearchMetrics,
}

impl SearchResponse {
    /// Create a response for a job that inspected some data
    ///
    /// # Arguments
    ///
    /// * `traces` - The traces that matched
    /// * `inspected_traces` - The number of traces that were inspected
    /// * `inspected_bytes` - The number of bytes that were inspected
    pub fn new(traces: Vec<TraceSearchMetadata>, inspected_traces: u32, inspected_bytes: u64) -> Self {
        SearchResponse {
            traces,
            metrics: SearchMetrics {
                inspected_traces,
                inspected_bytes,
                ..SearchMetrics::default()
            },
        }
    }
}
