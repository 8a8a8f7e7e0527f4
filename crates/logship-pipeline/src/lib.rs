//! Chunk-processing core of a log shipper.
//!
//! The host buffering layer delivers chunks of semi-structured records; this
//! crate validates them, resolves their routing fields, groups them into
//! bounded zip archives and posts the archives to a log-analytics ingestion
//! service.
//!
//! ## Pipeline stages
//!
//! - [`record`]: the typed record and mandatory-field validation
//! - [`enrich`]: log-set resolution, metadata sanitizing, timezone defaults
//! - [`grouping`]: the validation pass, tag poisoning and archive batching
//! - [`archive`]: zip assembly, one JSON entry per log set
//! - [`uploader`]: posting archives and classifying failures
//! - [`metrics`]: prometheus gauges and histograms for every checkpoint
//! - [`pipeline`]: the per-chunk driver tying the stages together

#![cfg_attr(not(test), deny(clippy::panic))]
#![cfg_attr(not(test), deny(clippy::unwrap_used))]
#![cfg_attr(not(test), deny(clippy::expect_used))]
#![cfg_attr(not(test), deny(clippy::todo))]
#![cfg_attr(not(test), deny(clippy::unimplemented))]

pub mod archive;
pub mod config;
pub mod constants;
pub mod enrich;
pub mod error;
pub mod grouping;
pub mod metrics;
pub mod pipeline;
pub mod record;
pub mod uploader;
