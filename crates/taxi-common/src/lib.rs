//! Taxi Pipeline Common Library
//!
//! Shared utilities for the NYC taxi pipeline workspace:
//!
//! - **Error Handling**: the common error and result types
//! - **Logging**: tracing subscriber setup shared by all binaries
//! - **Checksums**: source-file fingerprinting

#![deny(clippy::unwrap_used, clippy::expect_used)]

pub mod checksum;
pub mod error;
pub mod logging;

// Re-export commonly used types
pub use error::{Result, TaxiError};
