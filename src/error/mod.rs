//! Error Handling Module
//!
//! This module provides the error types shared by the dispatch engine,
//! the provider clients, the conversation store and the emulator:
//! - Core error type (`LlmError`) and its retry classification (`ErrorClass`)
//! - Presentation kind (`ErrorKind`) carried by failed results
//! - Type conversions from common error types
//!
//! # Example
//!
//! ```rust,ignore
//! use polyprompt::error::{ErrorClass, LlmError};
//!
//! let error = LlmError::api_error(404, "Not found");
//! assert_eq!(error.class(), ErrorClass::Terminal);
//! assert!(!error.is_retryable());
//! ```

mod conversions;
pub mod types;

pub use types::*;
