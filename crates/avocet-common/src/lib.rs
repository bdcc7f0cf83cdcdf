//! Avocet common types, errors, and format descriptors.
//!
//! This crate provides shared definitions used across all Avocet components.

pub mod error;
pub mod format;
pub mod types;
pub mod value;

pub use error::{AvocetError, Result};
pub use format::{FormatVersion, JetFormat};
pub use types::DataType;
pub use value::Value;
