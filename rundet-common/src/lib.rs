//! # Run Detection Common Library
//!
//! Shared code for the run detection service:
//! - Job request model and egress serialization
//! - Tagged enrichment values (`Value`)
//! - Instrument filename and cycle conventions
//! - Configuration loading
//! - Common error types

pub mod config;
pub mod error;
pub mod instrument;
pub mod job_request;
pub mod value;

pub use config::Config;
pub use error::{Error, Result};
pub use job_request::JobRequest;
pub use value::Value;
