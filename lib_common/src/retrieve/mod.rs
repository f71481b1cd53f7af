//! # Data Retrieval Module
//!
//! Generic HTTP retrieval used by the REST ingestors.
//!
//! ## Contained Modules:
//!
//! - **`ky_http`**: `ApiClient`, a thin `reqwest` wrapper that injects default
//!   headers and fails fast on any non-2xx status, plus the `JsonFetch` seam
//!   the higher layers are written against.
//! - **`paginate`**: the lazy page-number pagination stream.

#![forbid(unsafe_code)]
#![warn(missing_docs, rust_2018_idioms, unused_qualifications)]

/// Fail-fast HTTP API client.
pub mod ky_http;
/// Lazy page-number pagination over a `JsonFetch` implementation.
pub mod paginate;

pub use ky_http::{ApiClient, ApiResponse, FetchError, JsonFetch};
pub use paginate::{paginate, Page, Record, PAGE_LIMIT};
