//! Application layer orchestrating payments, enrollments and earnings.
//!
//! Each service owns one concern and talks to storage only through the
//! domain ports. `PaymentEngine` wires them together and is the entry point
//! for webhook handlers, admin actions and the batch CLI.

pub mod earnings;
pub mod engine;
pub mod ledger;
pub mod notifier;
pub mod reconciler;
pub mod sweeper;
pub mod tracker;

use crate::error::{EngineError, Result};
use std::future::Future;
use std::time::Duration;

/// A compare-and-swap that loses is retried once against a fresh read; the
/// second loss surfaces as `StorageConflict`.
pub(crate) const CAS_ATTEMPTS: usize = 2;

/// Runs a store call under `limit`, mapping expiry to `StorageTimeout(op)`.
pub(crate) async fn bounded<T, F>(limit: Duration, op: &'static str, fut: F) -> Result<T>
where
    F: Future<Output = Result<T>>,
{
    match tokio::time::timeout(limit, fut).await {
        Ok(result) => result,
        Err(_) => Err(EngineError::StorageTimeout(op)),
    }
}
