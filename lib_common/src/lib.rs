//! # lib_common
//!
//! Shared library for the analytics platform workspace. Every top-level module
//! is gated behind a cargo feature of the same name (see `Cargo.toml`), so the
//! binaries only compile what they use.
//!
//! - **`configs`**: layered configuration provider hierarchy.
//! - **`loggers`**: `tracing` subscriber setup (console + rolling JSON file).
//! - **`retrieve`**: fail-fast HTTP client and the paginated fetch stream.
//! - **`ingestors`**: REST sources (the course platform API).
//! - **`pipeline`**: extract/load runner and the load summary.
//! - **`destinations`**: embedded SQLite and PostgreSQL warehouse loaders.
//! - **`assets`**: asset keys, specs and materialization results.
//! - **`orchestration`**: asset graph, selection algebra, partitions, jobs and schedules.

#![forbid(unsafe_code)]

#[cfg(feature = "configs")]
pub mod configs;
#[cfg(feature = "loggers")]
pub mod loggers;
#[cfg(feature = "retrieve")]
pub mod retrieve;

#[cfg(feature = "ingest")]
pub mod destinations;
#[cfg(feature = "ingest")]
pub mod ingestors;
#[cfg(feature = "ingest")]
pub mod pipeline;

#[cfg(any(feature = "ingest", feature = "orchestration"))]
pub mod assets;
#[cfg(feature = "orchestration")]
pub mod orchestration;
