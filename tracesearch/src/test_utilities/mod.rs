//! Helpers for testing tracesearch

#[macro_use]
mod helpers;
pub mod generators;
