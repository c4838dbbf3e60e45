//! Core data types shared across the crate.

mod completion;
mod prompt;
mod record;
mod target;
mod usage;

pub use completion::*;
pub use prompt::*;
pub use record::*;
pub use target::*;
pub use usage::*;
