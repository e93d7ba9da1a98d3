//! The search requests sent to tracesearch

use chrono::prelude::*;
use std::collections::BTreeMap;

use super::TraceSearchMetadata;

/// A search for traces across many blocks
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Default)]
pub struct SearchRequest {
    /// Only match traces whose root span came from this service
    #[serde(default)]
    pub service_name: Option<String>,
    /// Only match traces whose root span name contains this
    #[serde(default)]
    pub name: Option<String>,
    /// Only match traces that took at least this long in milliseconds
    #[serde(default)]
    pub min_duration_ms: Option<u32>,
    /// Only match traces that took at most this long in milliseconds
    #[serde(default)]
    pub max_duration_ms: Option<u32>,
    /// Only match traces that ended after this
    #[serde(default)]
    pub start: Option<DateTime<Utc>>,
    /// Only match traces that started before this
    #[serde(default)]
    pub end: Option<DateTime<Utc>>,
    /// Attributes that must exist on a span set or span
    #[serde(default)]
    pub tags: BTreeMap<String, String>,
    /// The max number of traces to return (0 uses the configured default)
    #[serde(default)]
    pub limit: usize,
}

impl SearchRequest {
    /// Only match traces from a specific root service
    ///
    /// # Arguments
    ///
    /// * `service` - The root service to match
    #[must_use]
    pub fn service<T: Into<String>>(mut self, service: T) -> Self {
        self.service_name = Some(service.into());
        self
    }

    /// Only match traces whose root span name contains a value
    ///
    /// # Arguments
    ///
    /// * `name` - The value the root span name must contain
    #[must_use]
    pub fn name<T: Into<String>>(mut self, name: T) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Only match traces with durations in a range
    ///
    /// # Arguments
    ///
    /// * `min` - The shortest trace to match in milliseconds
    /// * `max` - The longest trace to match in milliseconds
    #[must_use]
    pub fn duration(mut self, min: Option<u32>, max: Option<u32>) -> Self {
        self.min_duration_ms = min;
        self.max_duration_ms = max;
        self
    }

    /// Only match traces that overlap a time window
    ///
    /// # Arguments
    ///
    /// * `start` - The start of the window
    /// * `end` - The end of the window
    #[must_use]
    pub fn window(mut self, start: DateTime<Utc>, end: DateTime<Utc>) -> Self {
        self.start = Some(start);
        self.end = Some(end);
        self
    }

    /// Require an attribute to be set on a span set or span
    ///
    /// # Arguments
    ///
    /// * `key` - The attribute key
    /// * `value` - The attribute value
    #[must_use]
    pub fn tag<K: Into<String>, V: Into<String>>(mut self, key: K, value: V) -> Self {
        self.tags.insert(key.into(), value.into());
        self
    }

    /// Set the max number of traces to return
    ///
    /// # Arguments
    ///
    /// * `limit` - The max number of traces to return
    #[must_use]
    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = limit;
        self
    }

    /// Check whether this request overlaps a range of time in nanoseconds
    ///
    /// # Arguments
    ///
    /// * `start` - The start of the range in nanoseconds since the epoch
    /// * `end` - The end of the range in nanoseconds since the epoch
    #[must_use]
    pub fn overlaps(&self, start: u64, end: u64) -> bool {
        // traces that ended before our window are skipped
        if let Some(window_start) = self.start.and_then(|ts| ts.timestamp_nanos_opt()) {
            if end < u64::try_from(window_start).unwrap_or(0) {
                return false;
            }
        }
        // traces that started after our window are skipped
        if let Some(window_end) = self.end.and_then(|ts| ts.timestamp_nanos_opt()) {
            if start > u64::try_from(window_end).unwrap_or(0) {
                return false;
            }
        }
        true
    }

    /// Check if a trace matches this request
    ///
    /// # Arguments
    ///
    /// * `trace` - The trace to check
    #[must_use]
    pub fn matches(&self, trace: &TraceSearchMetadata) -> bool {
        if let Some(service) = &self.service_name {
            if &trace.root_service_name != service {
                return false;
            }
        }
        if let Some(name) = &self.name {
            if !trace.root_trace_name.contains(name.as_str()) {
                return false;
            }
        }
        if self.min_duration_ms.is_some_and(|min| trace.duration_ms < min) {
            return false;
        }
        if self.max_duration_ms.is_some_and(|max| trace.duration_ms > max) {
            return false;
        }
        if !self.overlaps(trace.start_time_unix_nano, trace.end_time_unix_nano()) {
            return false;
        }
        self.tags
            .iter()
            .all(|(key, value)| trace.has_attribute(key, value))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Span, SpanSet};

    fn checkout() -> TraceSearchMetadata {
        TraceSearchMetadata::new("a1")
            .root("frontend", "GET /checkout")
            .timing(2_000_000_000, 250)
            .span_set(
                SpanSet::default()
                    .attribute("http.method", "GET")
                    .span(Span::new("s1", "db").attribute("db.system", "postgres")),
            )
    }

    #[test]
    fn empty_request_matches_everything() {
        assert!(SearchRequest::default().matches(&checkout()));
    }

    #[test]
    fn filters_are_combined() {
        let trace = checkout();
        let req = SearchRequest::default()
            .service("frontend")
            .name("checkout")
            .duration(Some(100), Some(300))
            .tag("db.system", "postgres");
        assert!(req.matches(&trace));
        assert!(!req.clone().service("backend").matches(&trace));
        assert!(!req.clone().duration(Some(300), None).matches(&trace));
        assert!(!req.tag("http.method", "POST").matches(&trace));
    }

    #[test]
    fn window_is_inclusive_of_overlaps() {
        let trace = checkout();
        // the trace runs from 2.0s to 2.25s
        let inside = SearchRequest::default().window(
            DateTime::from_timestamp(2, 100_000_000).unwrap(),
            DateTime::from_timestamp(3, 0).unwrap(),
        );
        assert!(inside.matches(&trace));
        let after = SearchRequest::default().window(
            DateTime::from_timestamp(3, 0).unwrap(),
            DateTime::from_timestamp(4, 0).unwrap(),
        );
        assert!(!after.matches(&trace));
    }
}
