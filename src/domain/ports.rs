use super::course::{Course, CourseId, LearnerId, TutorId};
use super::earnings::{Transaction, TransactionStatus};
use super::enrollment::{Enrollment, EnrollmentStatus};
use super::events::EventEnvelope;
use super::payment::{GatewayConfirmation, GatewayReference, Payment, PaymentStatus};
use crate::error::Result;
use async_trait::async_trait;
use std::sync::Arc;
use uuid::Uuid;

/// Payment attempts, keyed by gateway reference.
#[async_trait]
pub trait PaymentStore: Send + Sync {
    /// Fails with `UniqueViolation` if the reference is already taken.
    async fn insert(&self, payment: Payment) -> Result<()>;
    async fn get(&self, reference: &GatewayReference) -> Result<Option<Payment>>;
    /// Writes `payment` only if the stored status still equals `expected`.
    async fn compare_and_swap(&self, payment: Payment, expected: PaymentStatus) -> Result<bool>;
    async fn for_pair(&self, learner: &LearnerId, course: &CourseId) -> Result<Vec<Payment>>;
}

/// Enrollments, unique per (learner, course).
#[async_trait]
pub trait EnrollmentStore: Send + Sync {
    /// Fails with `UniqueViolation` if the pair already has an enrollment.
    async fn insert(&self, enrollment: Enrollment) -> Result<()>;
    async fn get(&self, learner: &LearnerId, course: &CourseId) -> Result<Option<Enrollment>>;
    /// Writes `enrollment` only if the stored revision equals
    /// `enrollment.revision`; the stored copy gets the next revision.
    async fn compare_and_swap(&self, enrollment: Enrollment) -> Result<bool>;
    async fn with_status(&self, status: EnrollmentStatus) -> Result<Vec<Enrollment>>;
    async fn get_all(&self) -> Result<Vec<Enrollment>>;
}

#[async_trait]
pub trait CourseStore: Send + Sync {
    async fn store(&self, course: Course) -> Result<()>;
    async fn get(&self, course_id: &CourseId) -> Result<Option<Course>>;
    /// Adds the learner to the enrolled set and bumps the counter in one step.
    /// Returns `false` if the learner was already enrolled.
    async fn add_learner(&self, course_id: &CourseId, learner: &LearnerId) -> Result<bool>;
}

/// Tutor ledger: course-purchase earnings and payout requests.
#[async_trait]
pub trait TransactionStore: Send + Sync {
    /// Fails with `UniqueViolation` if the id is already taken.
    async fn insert(&self, tx: Transaction) -> Result<()>;
    /// Inserts a payout request unless the tutor already has a pending one.
    async fn insert_payout_request(&self, tx: Transaction) -> Result<bool>;
    async fn get(&self, id: Uuid) -> Result<Option<Transaction>>;
    async fn compare_and_swap(&self, tx: Transaction, expected: TransactionStatus) -> Result<bool>;
    async fn for_tutor(&self, tutor: &TutorId) -> Result<Vec<Transaction>>;
}

#[async_trait]
pub trait EventPublisher: Send + Sync {
    async fn publish(&self, envelope: EventEnvelope) -> Result<()>;
}

/// Verification endpoint of the payment gateway.
#[async_trait]
pub trait PaymentGateway: Send + Sync {
    async fn verify(&self, reference: &GatewayReference) -> Result<GatewayConfirmation>;
}

pub type PaymentStoreRef = Arc<dyn PaymentStore>;
pub type EnrollmentStoreRef = Arc<dyn EnrollmentStore>;
pub type CourseStoreRef = Arc<dyn CourseStore>;
pub type TransactionStoreRef = Arc<dyn TransactionStore>;
pub type EventPublisherRef = Arc<dyn EventPublisher>;
pub type PaymentGatewayRef = Arc<dyn PaymentGateway>;

/// The four stores the engine writes to.
#[derive(Clone)]
pub struct Stores {
    pub payments: PaymentStoreRef,
    pub enrollments: EnrollmentStoreRef,
    pub courses: CourseStoreRef,
    pub transactions: TransactionStoreRef,
}
