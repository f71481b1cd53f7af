//! # Pipeline Module
//!
//! Extract/load plumbing shared by every ingestion job.
//!
//! ## Contained Modules:
//!
//! - **`resource`**: resource declarations, write dispositions and the `Source` trait.
//! - **`runner`**: the `Pipeline` that drives a source into a destination.
//! - **`load_info`**: the `LoadInfo` summary returned by a run.

#![forbid(unsafe_code)]
#![warn(rust_2018_idioms, unused_qualifications)]

pub mod load_info;
pub mod resource;
pub mod runner;

pub use load_info::{LoadInfo, TableLoad, METADATA_KEYS};
pub use resource::{primary_key_value, ExtractedTable, ResourceSpec, Source, WriteDisposition};
pub use runner::{Pipeline, PipelineError};
