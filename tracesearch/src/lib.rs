//! Search traces spread across many blocks with sharded jobs
//!
//! A search is split into jobs over block pages, run concurrently by a
//! [`sharder::SearchSharder`] and merged into one deduplicated result by a
//! progress sink from [`progress`].

#[macro_use]
extern crate serde_derive;

pub mod backend;
pub mod blocks;
pub mod combiner;
pub mod conf;
pub mod executor;
pub mod models;
pub mod progress;
pub mod sharder;
pub mod utils;

// expose test utilities if that feature is enabled
#[cfg(feature = "test-utilities")]
pub mod test_utilities;

pub use conf::Conf;
pub use utils::Error;
