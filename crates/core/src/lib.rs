//! Core types shared across the converge workspace.
//!
//! - [`error`]: the I/O and parse error type with constructor helpers
//! - [`document`]: loading nested attribute documents from JSON, YAML or TOML
//!   and parsing `path=value` assignments
//! - [`result`]: logging combinators for tolerated failures

#![forbid(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![forbid(clippy::panic)]

pub mod document;
pub mod error;
pub mod result;

pub use document::{DocumentFormat, load_document, parse_assignment, parse_document};
pub use error::{Error, Result};
pub use result::ResultExt;
