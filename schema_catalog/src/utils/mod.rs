//! Utilities for schema_catalog
//!
//! This module provides utility functions used across the library.

pub mod logging;
pub mod naming;

// Re-export key utility functions
pub use naming::{name_similarity, quote_identifier, singularize, split_into_words};
