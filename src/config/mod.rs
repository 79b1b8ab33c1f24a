//! Configuration module for Spindle
//!
//! This module handles loading, parsing, and validating TOML configuration
//! files. Every recognised crawl option is an explicit field of
//! [`CrawlOptions`] with its default spelled out in one place.
//!
//! # Example
//!
//! ```no_run
//! use spindle::config::load_config;
//! use std::path::Path;
//!
//! let config = load_config(Path::new("spindle.toml")).unwrap();
//! println!("Crawl limit: {:?}", config.crawl.crawl_limit);
//! ```

mod parser;
mod types;
mod validation;

// Re-export types
pub use types::{CacheMode, Config, CrawlOptions, EnqueueCounter, StorageConfig, WorkerConfig};

// Re-export parser functions
pub use parser::{compute_config_hash, load_config, load_config_with_hash, parse_config};

pub use validation::{validate, validate_crawl_options};
