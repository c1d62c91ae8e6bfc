//! # catsw Common Library
//!
//! Shared code for the catsw scene director including:
//! - Error type shared by configuration consumers
//! - TOML configuration model, defaults and validation
//! - Configuration file resolution
//! - Human-readable duration formatting for status text

pub mod config;
pub mod error;
pub mod human_time;

pub use config::CatswConfig;
pub use error::{Error, Result};
