//! The command line args for the searcher

use chrono::prelude::*;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracesearch::Error;
use tracesearch::models::SearchRequest;

/// The command line args for the searcher
#[derive(Parser, Debug, Clone)]
#[clap(version, author)]
pub struct Args {
    /// The path to the tracesearch config
    #[clap(long, default_value = "tracesearch.yml")]
    pub config: String,
    /// The tenant to work with
    #[clap(short, long, default_value = "single-tenant")]
    pub tenant: String,
    /// The command to run
    #[clap(subcommand)]
    pub cmd: SubCommands,
}

/// The commands the searcher can run
#[derive(Subcommand, Debug, Clone)]
pub enum SubCommands {
    /// Write a new block from a json file of traces
    Ingest(Ingest),
    /// Search a tenant's blocks
    Search(Search),
    /// Rebuild a tenant's block index from the blocks in storage
    Reindex,
}

/// Write a new block of traces
#[derive(Parser, Debug, Clone)]
pub struct Ingest {
    /// The json file containing a list of traces
    pub path: PathBuf,
    /// The number of traces to put in each page (defaults to the config)
    #[clap(long)]
    pub page_size: Option<usize>,
}

/// Search for traces
#[derive(Parser, Debug, Clone)]
pub struct Search {
    /// Only match traces whose root span came from this service
    #[clap(short, long)]
    pub service: Option<String>,
    /// Only match traces whose root span name contains this
    #[clap(short, long)]
    pub name: Option<String>,
    /// Only match traces that took at least this many milliseconds
    #[clap(long)]
    pub min_duration: Option<u32>,
    /// Only match traces that took at most this many milliseconds
    #[clap(long)]
    pub max_duration: Option<u32>,
    /// Only match traces that ended after this RFC 3339 timestamp
    #[clap(long)]
    pub start: Option<DateTime<Utc>>,
    /// Only match traces that started before this RFC 3339 timestamp
    #[clap(long)]
    pub end: Option<DateTime<Utc>>,
    /// Attributes that must be set in key=value form
    #[clap(long = "tag")]
    pub tags: Vec<String>,
    /// The max number of traces to return (0 uses the configured default)
    #[clap(short, long, default_value = "0")]
    pub limit: usize,
}

impl Search {
    /// Build the search request for these args
    pub fn to_request(&self) -> Result<SearchRequest, Error> {
        let mut req = SearchRequest::default()
            .duration(self.min_duration, self.max_duration)
            .limit(self.limit);
        req.service_name.clone_from(&self.service);
        req.name.clone_from(&self.name);
        req.start = self.start;
        req.end = self.end;
        // parse our key=value tags
        for tag in &self.tags {
            match tag.split_once('=') {
                Some((key, value)) => req = req.tag(key, value),
                None => return Err(Error::new(format!("Tag '{tag}' is not in key=value form"))),
            }
        }
        Ok(req)
    }
}
