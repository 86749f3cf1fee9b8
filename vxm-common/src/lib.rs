//! # VXM Common Library
//!
//! Shared code for the VXM services including:
//! - Error types
//! - Configuration loading and root folder resolution
//! - Content hashing used for artifact names and cache fingerprints

pub mod config;
pub mod error;
pub mod hash;

pub use error::{Error, Result};
