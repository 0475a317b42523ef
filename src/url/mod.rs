//! URL handling module for Sumi-Ingest
//!
//! This module provides URL normalization (document identity) and host
//! extraction (rate-limiter keys).

mod domain;
mod normalize;

pub use domain::extract_host;
pub use normalize::{normalize_url, resolve_and_normalize};
