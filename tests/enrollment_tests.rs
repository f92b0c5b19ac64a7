mod common;

use common::*;
use coursepay::domain::course::{Course, CourseId, CourseStatus, LearnerId, TutorId};
use coursepay::domain::money::{Amount, Balance};
use coursepay::domain::payment::{GatewayReference, PaymentRequest};
use coursepay::error::EngineError;
use std::sync::Arc;

#[tokio::test]
async fn test_one_enrollment_per_learner_and_course() {
    let h = harness().await;
    let first = pay(&h.engine, "ada", 30_000).await;
    let second = h
        .engine
        .confirm_payment(success(&first.next_installment.unwrap()))
        .await
        .unwrap();

    let all = h.stores.enrollments.get_all().await.unwrap();
    assert_eq!(all.len(), 1);
    assert_eq!(all[0].amount_paid, Balance::new(60_000));
    assert_eq!(all[0].applied_payments.len(), 2);
    assert_eq!(
        first.enrollment.unwrap().enrolled_at,
        second.enrollment.unwrap().enrolled_at
    );

    let course = h.engine.course(&course_id()).await.unwrap();
    assert_eq!(course.enrollment_count, 1);
    assert!(course.enrolled_learners.contains(&LearnerId::new("ada")));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_first_payments_share_one_enrollment() {
    let h = harness().await;
    let a = h
        .engine
        .initialize_payment(request("ada", 30_000).with_reference(GatewayReference::new("ref-a")))
        .await
        .unwrap();
    let b = h
        .engine
        .initialize_payment(request("ada", 30_000).with_reference(GatewayReference::new("ref-b")))
        .await
        .unwrap();

    let engine = Arc::clone(&h.engine);
    let first = tokio::spawn(async move { engine.confirm_payment(success(&a)).await });
    let engine = Arc::clone(&h.engine);
    let second = tokio::spawn(async move { engine.confirm_payment(success(&b)).await });
    first.await.unwrap().unwrap();
    second.await.unwrap().unwrap();

    let all = h.stores.enrollments.get_all().await.unwrap();
    assert_eq!(all.len(), 1);
    assert_eq!(all[0].amount_paid, Balance::new(60_000));

    let course = h.engine.course(&course_id()).await.unwrap();
    assert_eq!(course.enrollment_count, 1);
    assert_eq!(course.enrolled_learners.len(), 1);

    let names = h.publisher.names().await;
    assert_eq!(names.iter().filter(|n| **n == "enrollment.created").count(), 1);
    assert_eq!(names.iter().filter(|n| **n == "payment.succeeded").count(), 2);
}

#[tokio::test]
async fn test_enrollment_snapshots_price() {
    let h = harness().await;
    pay(&h.engine, "ada", 30_000).await;

    // Repricing the course leaves the existing plan untouched.
    register(&h.engine, COURSE, 120_000).await;
    let summary = h
        .engine
        .installment_summary(&LearnerId::new("ada"), &course_id())
        .await
        .unwrap();
    assert_eq!(summary.total_amount, Balance::new(PRICE));
    assert_eq!(summary.remaining_balance, Balance::new(60_000));

    // Membership survives re-registration.
    let course = h.engine.course(&course_id()).await.unwrap();
    assert_eq!(course.price, Amount::new(120_000).unwrap());
    assert_eq!(course.enrollment_count, 1);
}

#[tokio::test]
async fn test_checkout_validation() {
    let h = harness().await;
    let mut draft = Course::new(
        CourseId::new("draft"),
        TutorId::new(TUTOR),
        Amount::new(10_000).unwrap(),
        "NGN",
    );
    draft.status = CourseStatus::Draft;
    h.engine.register_course(draft).await.unwrap();

    let on = |course: &str, amount: i64, email: &str| {
        PaymentRequest::new(CourseId::new(course), amount, email).for_learner(LearnerId::new("ada"))
    };

    assert!(matches!(
        h.engine.initialize_payment(on("draft", 10_000, "ada@example.com")).await,
        Err(EngineError::CourseNotPurchasable(_))
    ));
    assert!(matches!(
        h.engine.initialize_payment(on("missing", 10_000, "ada@example.com")).await,
        Err(EngineError::CourseNotFound(_))
    ));
    assert!(matches!(
        h.engine.initialize_payment(on(COURSE, 0, "ada@example.com")).await,
        Err(EngineError::InvalidAmount(0))
    ));
    assert!(matches!(
        h.engine.initialize_payment(on(COURSE, 10_000, "not-an-email")).await,
        Err(EngineError::Validation(_))
    ));
    assert!(matches!(
        h.engine
            .initialize_payment(PaymentRequest::new(course_id(), PRICE + 1, "guest@example.com"))
            .await,
        Err(EngineError::Validation(_))
    ));
}

#[tokio::test]
async fn test_reference_collision_is_rejected() {
    let h = harness().await;
    let reference = GatewayReference::new("ref-taken");
    h.engine
        .initialize_payment(request("ada", 30_000).with_reference(reference.clone()))
        .await
        .unwrap();
    let err = h
        .engine
        .initialize_payment(request("bob", 30_000).with_reference(reference))
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::UniqueViolation(_)));
}

#[tokio::test]
async fn test_cancelled_enrollment_still_accrues() {
    let h = harness().await;
    let first = pay(&h.engine, "ada", 30_000).await;
    h.engine
        .cancel_enrollment(&LearnerId::new("ada"), &course_id())
        .await
        .unwrap();

    let receipt = h
        .engine
        .confirm_payment(success(&first.next_installment.unwrap()))
        .await
        .unwrap();
    let enrollment = receipt.enrollment.unwrap();
    assert_eq!(enrollment.amount_paid, Balance::new(60_000));
    assert_eq!(
        enrollment.status,
        coursepay::domain::enrollment::EnrollmentStatus::Cancelled
    );
    assert!(receipt.next_installment.is_none());
}
