use crate::domain::course::{Course, CourseId, LearnerId, TutorId};
use crate::domain::earnings::{Transaction, TransactionStatus};
use crate::domain::enrollment::{Enrollment, EnrollmentStatus};
use crate::domain::events::EventEnvelope;
use crate::domain::payment::{GatewayConfirmation, GatewayReference, Payment, PaymentStatus};
use crate::domain::ports::{
    CourseStore, EnrollmentStore, EventPublisher, PaymentGateway, PaymentStore, Stores,
    TransactionStore,
};
use crate::error::{EngineError, Result};
use async_trait::async_trait;
use std::collections::HashMap;
use std::collections::hash_map::Entry;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use uuid::Uuid;

/// A thread-safe in-memory store for payments.
///
/// Every operation takes the write lock for the whole check-and-write, which
/// gives the same single-document atomicity a real document store offers.
#[derive(Default, Clone)]
pub struct InMemoryPaymentStore {
    payments: Arc<RwLock<HashMap<GatewayReference, Payment>>>,
}

impl InMemoryPaymentStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl PaymentStore for InMemoryPaymentStore {
    async fn insert(&self, payment: Payment) -> Result<()> {
        let mut payments = self.payments.write().await;
        match payments.entry(payment.reference.clone()) {
            Entry::Occupied(_) => Err(EngineError::UniqueViolation(format!(
                "payment reference {}",
                payment.reference
            ))),
            Entry::Vacant(slot) => {
                slot.insert(payment);
                Ok(())
            }
        }
    }

    async fn get(&self, reference: &GatewayReference) -> Result<Option<Payment>> {
        let payments = self.payments.read().await;
        Ok(payments.get(reference).cloned())
    }

    async fn compare_and_swap(&self, payment: Payment, expected: PaymentStatus) -> Result<bool> {
        let mut payments = self.payments.write().await;
        match payments.get_mut(&payment.reference) {
            Some(current) if current.status == expected => {
                *current = payment;
                Ok(true)
            }
            Some(_) => Ok(false),
            None => Err(EngineError::PaymentNotFound(payment.reference)),
        }
    }

    async fn for_pair(&self, learner: &LearnerId, course: &CourseId) -> Result<Vec<Payment>> {
        let payments = self.payments.read().await;
        let mut found: Vec<Payment> = payments
            .values()
            .filter(|p| p.learner_id.as_ref() == Some(learner) && &p.course_id == course)
            .cloned()
            .collect();
        found.sort_by_key(|p| p.created_at);
        Ok(found)
    }
}

/// A thread-safe in-memory store for enrollments keyed by (learner, course).
#[derive(Default, Clone)]
pub struct InMemoryEnrollmentStore {
    enrollments: Arc<RwLock<HashMap<(LearnerId, CourseId), Enrollment>>>,
}

impl InMemoryEnrollmentStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl EnrollmentStore for InMemoryEnrollmentStore {
    async fn insert(&self, enrollment: Enrollment) -> Result<()> {
        let mut enrollments = self.enrollments.write().await;
        let key = (enrollment.learner_id.clone(), enrollment.course_id.clone());
        match enrollments.entry(key) {
            Entry::Occupied(_) => Err(EngineError::UniqueViolation(format!(
                "enrollment for learner {} in course {}",
                enrollment.learner_id, enrollment.course_id
            ))),
            Entry::Vacant(slot) => {
                slot.insert(enrollment);
                Ok(())
            }
        }
    }

    async fn get(&self, learner: &LearnerId, course: &CourseId) -> Result<Option<Enrollment>> {
        let enrollments = self.enrollments.read().await;
        Ok(enrollments
            .get(&(learner.clone(), course.clone()))
            .cloned())
    }

    async fn compare_and_swap(&self, mut enrollment: Enrollment) -> Result<bool> {
        let mut enrollments = self.enrollments.write().await;
        let key = (enrollment.learner_id.clone(), enrollment.course_id.clone());
        match enrollments.get_mut(&key) {
            Some(current) if current.revision == enrollment.revision => {
                enrollment.revision += 1;
                *current = enrollment;
                Ok(true)
            }
            Some(_) => Ok(false),
            None => Err(EngineError::EnrollmentNotFound {
                learner: key.0,
                course: key.1,
            }),
        }
    }

    async fn with_status(&self, status: EnrollmentStatus) -> Result<Vec<Enrollment>> {
        let enrollments = self.enrollments.read().await;
        Ok(enrollments
            .values()
            .filter(|e| e.status == status)
            .cloned()
            .collect())
    }

    async fn get_all(&self) -> Result<Vec<Enrollment>> {
        let enrollments = self.enrollments.read().await;
        Ok(enrollments.values().cloned().collect())
    }
}

#[derive(Default, Clone)]
pub struct InMemoryCourseStore {
    courses: Arc<RwLock<HashMap<CourseId, Course>>>,
}

impl InMemoryCourseStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl CourseStore for InMemoryCourseStore {
    async fn store(&self, course: Course) -> Result<()> {
        let mut courses = self.courses.write().await;
        courses.insert(course.id.clone(), course);
        Ok(())
    }

    async fn get(&self, course_id: &CourseId) -> Result<Option<Course>> {
        let courses = self.courses.read().await;
        Ok(courses.get(course_id).cloned())
    }

    async fn add_learner(&self, course_id: &CourseId, learner: &LearnerId) -> Result<bool> {
        let mut courses = self.courses.write().await;
        let course = courses
            .get_mut(course_id)
            .ok_or_else(|| EngineError::CourseNotFound(course_id.clone()))?;
        Ok(course.admit(learner))
    }
}

/// A thread-safe in-memory tutor ledger.
#[derive(Default, Clone)]
pub struct InMemoryTransactionStore {
    transactions: Arc<RwLock<HashMap<Uuid, Transaction>>>,
}

impl InMemoryTransactionStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl TransactionStore for InMemoryTransactionStore {
    async fn insert(&self, tx: Transaction) -> Result<()> {
        let mut transactions = self.transactions.write().await;
        match transactions.entry(tx.id) {
            Entry::Occupied(_) => Err(EngineError::UniqueViolation(format!(
                "transaction {}",
                tx.id
            ))),
            Entry::Vacant(slot) => {
                slot.insert(tx);
                Ok(())
            }
        }
    }

    async fn insert_payout_request(&self, tx: Transaction) -> Result<bool> {
        let mut transactions = self.transactions.write().await;
        let outstanding = transactions
            .values()
            .any(|t| t.tutor_id == tx.tutor_id && t.is_pending_payout());
        if outstanding {
            return Ok(false);
        }
        transactions.insert(tx.id, tx);
        Ok(true)
    }

    async fn get(&self, id: Uuid) -> Result<Option<Transaction>> {
        let transactions = self.transactions.read().await;
        Ok(transactions.get(&id).cloned())
    }

    async fn compare_and_swap(&self, tx: Transaction, expected: TransactionStatus) -> Result<bool> {
        let mut transactions = self.transactions.write().await;
        match transactions.get_mut(&tx.id) {
            Some(current) if current.status == expected => {
                *current = tx;
                Ok(true)
            }
            Some(_) => Ok(false),
            None => Err(EngineError::TransactionNotFound(tx.id.to_string())),
        }
    }

    async fn for_tutor(&self, tutor: &TutorId) -> Result<Vec<Transaction>> {
        let transactions = self.transactions.read().await;
        let mut found: Vec<Transaction> = transactions
            .values()
            .filter(|t| &t.tutor_id == tutor)
            .cloned()
            .collect();
        found.sort_by_key(|t| t.created_at);
        Ok(found)
    }
}

/// Fresh, empty in-memory stores.
pub fn stores() -> Stores {
    Stores {
        payments: Arc::new(InMemoryPaymentStore::new()),
        enrollments: Arc::new(InMemoryEnrollmentStore::new()),
        courses: Arc::new(InMemoryCourseStore::new()),
        transactions: Arc::new(InMemoryTransactionStore::new()),
    }
}

/// Keeps every published envelope; useful for tests and dry runs.
#[derive(Default, Clone)]
pub struct RecordingPublisher {
    envelopes: Arc<RwLock<Vec<EventEnvelope>>>,
}

impl RecordingPublisher {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn envelopes(&self) -> Vec<EventEnvelope> {
        self.envelopes.read().await.clone()
    }

    pub async fn names(&self) -> Vec<&'static str> {
        self.envelopes
            .read()
            .await
            .iter()
            .map(|e| e.event.name())
            .collect()
    }
}

#[async_trait]
impl EventPublisher for RecordingPublisher {
    async fn publish(&self, envelope: EventEnvelope) -> Result<()> {
        self.envelopes.write().await.push(envelope);
        Ok(())
    }
}

/// Gateway double answering from a fixed table, optionally after a delay.
#[derive(Default, Clone)]
pub struct ScriptedGateway {
    answers: Arc<RwLock<HashMap<GatewayReference, GatewayConfirmation>>>,
    delay: Option<Duration>,
}

impl ScriptedGateway {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_delay(delay: Duration) -> Self {
        Self {
            delay: Some(delay),
            ..Self::default()
        }
    }

    pub async fn answer(&self, confirmation: GatewayConfirmation) {
        self.answers
            .write()
            .await
            .insert(confirmation.reference.clone(), confirmation);
    }
}

#[async_trait]
impl PaymentGateway for ScriptedGateway {
    async fn verify(&self, reference: &GatewayReference) -> Result<GatewayConfirmation> {
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        self.answers
            .read()
            .await
            .get(reference)
            .cloned()
            .ok_or_else(|| EngineError::Gateway(format!("unknown reference {}", reference)))
    }
}
