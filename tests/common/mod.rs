#![allow(dead_code)]

use chrono::{DateTime, Utc};
use coursepay::application::engine::{ConfirmationReceipt, PaymentEngine};
use coursepay::config::EngineConfig;
use coursepay::domain::course::{Course, CourseId, LearnerId, TutorId};
use coursepay::domain::enrollment::Enrollment;
use coursepay::domain::money::Amount;
use coursepay::domain::payment::{
    GatewayConfirmation, GatewayReference, GatewayStatus, Payment, PaymentRequest, PaymentStatus,
};
use coursepay::domain::ports::{EventPublisherRef, Stores};
use coursepay::infrastructure::in_memory::{self, RecordingPublisher};
use std::io::Write;
use std::sync::Arc;

pub const COURSE: &str = "rust-101";
pub const TUTOR: &str = "t1";
pub const PRICE: i64 = 90_000;

pub struct Harness {
    pub engine: Arc<PaymentEngine>,
    pub stores: Stores,
    pub publisher: RecordingPublisher,
}

pub async fn harness() -> Harness {
    harness_with(EngineConfig::default()).await
}

pub async fn harness_with(config: EngineConfig) -> Harness {
    let publisher = RecordingPublisher::new();
    let stores = in_memory::stores();
    let engine = PaymentEngine::new(stores.clone(), Arc::new(publisher.clone()), config);
    register(&engine, COURSE, PRICE).await;
    Harness {
        engine: Arc::new(engine),
        stores,
        publisher,
    }
}

/// Engine over fresh stores with a custom publisher; no recorder.
pub async fn engine_with_publisher(publisher: EventPublisherRef) -> (PaymentEngine, Stores) {
    let stores = in_memory::stores();
    let engine = PaymentEngine::new(stores.clone(), publisher, EngineConfig::default());
    register(&engine, COURSE, PRICE).await;
    (engine, stores)
}

pub async fn register(engine: &PaymentEngine, course: &str, price: i64) {
    engine
        .register_course(Course::new(
            CourseId::new(course),
            TutorId::new(TUTOR),
            Amount::new(price).unwrap(),
            "NGN",
        ))
        .await
        .unwrap();
}

pub fn course_id() -> CourseId {
    CourseId::new(COURSE)
}

pub fn tutor_id() -> TutorId {
    TutorId::new(TUTOR)
}

pub fn request(learner: &str, amount: i64) -> PaymentRequest {
    PaymentRequest::new(course_id(), amount, format!("{learner}@example.com"))
        .for_learner(LearnerId::new(learner))
}

pub fn success(payment: &Payment) -> GatewayConfirmation {
    GatewayConfirmation {
        reference: payment.reference.clone(),
        status: GatewayStatus::Success,
        amount: payment.gross_amount.minor_units(),
    }
}

pub fn failure(payment: &Payment) -> GatewayConfirmation {
    GatewayConfirmation {
        status: GatewayStatus::Failed,
        ..success(payment)
    }
}

/// Opens a checkout for `learner` and confirms it as successful.
pub async fn pay(engine: &PaymentEngine, learner: &str, amount: i64) -> ConfirmationReceipt {
    let payment = engine.initialize_payment(request(learner, amount)).await.unwrap();
    engine.confirm_payment(success(&payment)).await.unwrap()
}

pub async fn enrollment(stores: &Stores, learner: &str) -> Option<Enrollment> {
    stores
        .enrollments
        .get(&LearnerId::new(learner), &course_id())
        .await
        .unwrap()
}

/// Moves a pending payment's due date, standing in for the passage of time.
pub async fn backdate_due(stores: &Stores, reference: &GatewayReference, due: DateTime<Utc>) {
    let mut payment = stores.payments.get(reference).await.unwrap().unwrap();
    payment.due_date = Some(due);
    assert!(
        stores
            .payments
            .compare_and_swap(payment, PaymentStatus::Pending)
            .await
            .unwrap()
    );
}

pub fn write_csv(lines: &[&str]) -> tempfile::NamedTempFile {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    for line in lines {
        writeln!(file, "{}", line).unwrap();
    }
    file
}
