//! URL handling module for Spindle
//!
//! This module provides URL normalization, url digests, glob pattern
//! matching, and internal/external link classification.

mod domain;
mod matcher;
mod normalize;

pub use domain::{default_internal_patterns, is_internal};
pub use matcher::{glob_to_regex, matches_any, GlobPattern};
pub use normalize::{normalize_url, url_digest};
