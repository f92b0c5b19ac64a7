use thiserror::Error;

use crate::domain::course::{CourseId, LearnerId, TutorId};
use crate::domain::payment::GatewayReference;

pub type Result<T> = std::result::Result<T, EngineError>;

#[derive(Error, Debug)]
pub enum EngineError {
    #[error("Validation error: {0}")]
    Validation(String),
    #[error("Invalid amount: {0} (must be a positive number of minor units)")]
    InvalidAmount(i64),

    #[error("Payment not found: {0}")]
    PaymentNotFound(GatewayReference),
    #[error("Course not found: {0}")]
    CourseNotFound(CourseId),
    #[error("Enrollment not found for learner {learner} in course {course}")]
    EnrollmentNotFound { learner: LearnerId, course: CourseId },
    #[error("Transaction not found: {0}")]
    TransactionNotFound(String),

    #[error("Course {0} is not open for purchase")]
    CourseNotPurchasable(CourseId),
    #[error("Learner {learner} has already paid for course {course}")]
    DuplicatePayment { learner: LearnerId, course: CourseId },
    #[error("Invalid state transition for {entity}: {from} -> {to}")]
    InvalidStateTransition {
        entity: &'static str,
        from: String,
        to: String,
    },

    #[error("Payment gateway did not answer in time for {0}")]
    GatewayTimeout(GatewayReference),
    #[error("Payment gateway error: {0}")]
    Gateway(String),
    #[error("Storage operation timed out: {0}")]
    StorageTimeout(&'static str),
    #[error("Storage conflict: {0}")]
    StorageConflict(String),
    #[error("Unique constraint violated: {0}")]
    UniqueViolation(String),

    #[error("Insufficient balance: available {available}, requested {requested}")]
    InsufficientBalance { available: i64, requested: i64 },
    #[error("Payout below minimum: minimum {minimum}, requested {requested}")]
    BelowMinimumPayout { minimum: i64, requested: i64 },
    #[error("Tutor {0} already has a pending payout request")]
    PayoutAlreadyPending(TutorId),

    #[error("Configuration error: {0}")]
    Config(String),
    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[cfg(feature = "storage-rocksdb")]
    #[error("RocksDB error: {0}")]
    RocksDb(#[from] rocksdb::Error),
    #[error("Internal error: {0}")]
    Internal(#[source] Box<dyn std::error::Error + Send + Sync>),
}

impl EngineError {
    pub fn invalid_transition(
        entity: &'static str,
        from: impl ToString,
        to: impl ToString,
    ) -> Self {
        Self::InvalidStateTransition {
            entity,
            from: from.to_string(),
            to: to.to_string(),
        }
    }

    pub fn internal(message: impl Into<String>) -> Self {
        let message: String = message.into();
        Self::Internal(message.into())
    }

    /// Errors after which the same call may succeed if repeated.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::GatewayTimeout(_) | Self::StorageTimeout(_) | Self::StorageConflict(_)
        )
    }

    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            Self::PaymentNotFound(_)
                | Self::CourseNotFound(_)
                | Self::EnrollmentNotFound { .. }
                | Self::TransactionNotFound(_)
        )
    }
}
