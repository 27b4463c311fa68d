//! Network adapters.

mod http;

pub use http::HttpFetcher;
