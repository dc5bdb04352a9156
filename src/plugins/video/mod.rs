//! Video capture, decode and record pipeline.

pub mod errors;
pub mod feed;
pub mod recorder;
pub mod types;
