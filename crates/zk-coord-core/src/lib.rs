//! Core traits and types for coordination-store locks and semaphores.

pub mod backoff;
pub mod error;
pub mod prelude;
pub mod timeout;
pub mod traits;

pub use error::{CoordError, CoordResult, NodeError};
pub use prelude::*;
