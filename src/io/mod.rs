//! I/O operations: object store setup, shard fetching and parsing.

pub mod csv;
mod fetcher;
mod store;

pub use csv::parse_delimited;
pub use fetcher::ShardFetcher;
pub use store::{create_object_store, parse_s3_uri};
