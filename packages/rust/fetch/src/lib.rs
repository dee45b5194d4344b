//! Fetch-port adapters: retrieve the raw bytes of a named source.
//!
//! - [`HttpFetcher`] resolves source ids against a base URL.
//! - [`FileFetcher`] reads them from a local directory.

mod file;
mod http;

pub use file::FileFetcher;
pub use http::HttpFetcher;
