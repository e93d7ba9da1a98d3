//! Utilities shared across tracesearch

pub mod errors;
#[cfg(feature = "trace")]
pub mod trace;

pub use errors::Error;
