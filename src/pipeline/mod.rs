//! The self-correcting query loop.

mod retry;

pub use retry::{AttemptOutcome, AttemptRecord, Resolution, RetryController};
