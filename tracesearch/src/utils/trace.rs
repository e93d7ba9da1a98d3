//! Sets up tracing for tracesearch to stdout/stderr

use tracing::{Level, event};
use tracing_subscriber::{filter::Filtered, fmt::Layer, prelude::*, Registry};
use tracing_subscriber::filter::LevelFilter;

use crate::conf::{Tracing, TracingLocal};

/// Setup our local tracer
///
/// # Arguments
///
/// * `conf` - The local tracing settings
fn setup_local(conf: &TracingLocal) -> Filtered<Layer<Registry>, LevelFilter, Registry> {
    tracing_subscriber::fmt::layer().with_filter(conf.level.to_filter())
}

/// Setup the correct tracer
///
/// Only the first call in a process installs a subscriber.
///
/// # Arguments
///
/// * `name` - The name of the service to trace
/// * `trace_conf` - The tracing config to use
pub fn setup(name: &str, trace_conf: &Tracing) {
    // build our local tracer/subscriber
    let local = setup_local(&trace_conf.local);
    // Add our local tracer to our registry
    if let Err(error) = tracing_subscriber::registry().with(local).try_init() {
        // a subscriber was already registered so keep using that one
        eprintln!("Tracing for {name} was already setup: {error}");
        return;
    }
    event!(
        Level::INFO,
        msg = "Sending traces to stdout",
        service = name,
        level = trace_conf.local.level.to_string(),
    );
}
