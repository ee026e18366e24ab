//! Conversion pipeline: option resolution, rendering sessions, merging and post-processing.

pub mod convert;
pub mod deadline;
pub mod engine;
pub mod error;
pub mod merge;
pub mod postprocess;
pub mod resolve;
pub mod scratch;
pub mod session;
