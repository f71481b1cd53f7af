//! # Data Ingestors Module
//!
//! REST sources feeding the extract/load pipeline. Each submodule turns one
//! external API into a set of resources built on the shared pagination
//! stream in [`crate::retrieve`].
//!
//! ## Contained Modules:
//! - **`thinkific`**: the course platform API (courses, course reviews,
//!   enrollments, users).

#![forbid(unsafe_code)]
#![warn(missing_docs, rust_2018_idioms, unused_qualifications)]

/// Course platform REST source.
pub mod thinkific;

pub use thinkific::{ThinkificCredentials, ThinkificSource, THINKIFIC_BASE_URL};
