//! Reliability patterns for the speech pool
//!
//! This module provides:
//! - [`RetryExecutor`] - Sequential retries driven by a [`Failure`] tag
//! - [`RetryPolicy`] - Attempt budget and constant delay
//! - [`with_deadline`] - Turns a hung suspension point into an error

mod retry;
mod timeout;

pub use retry::{Failure, RetryExecutor, RetryPolicy};
pub use timeout::{with_deadline, DeadlineExceeded};
