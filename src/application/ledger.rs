use super::tracker::InstallmentTracker;
use super::{CAS_ATTEMPTS, bounded};
use crate::domain::commission::{self, CommissionRate};
use crate::domain::money::{Amount, Balance};
use crate::domain::payment::{
    self, GatewayConfirmation, GatewayReference, GatewayStatus, Payment, PaymentRequest,
    PaymentStatus,
};
use crate::domain::ports::{CourseStoreRef, PaymentStoreRef};
use crate::error::{EngineError, Result};
use chrono::{DateTime, Utc};
use std::time::Duration;
use tracing::{debug, error, info, warn};

/// What a confirmation did to the payment.
#[derive(Debug, Clone, PartialEq)]
pub enum Confirmation {
    /// `pending -> successful` by this call.
    Settled(Payment),
    /// `pending -> failed` by this call.
    Declined(Payment),
    /// The payment had already reached this outcome; nothing was written.
    Duplicate(Payment),
}

impl Confirmation {
    pub fn payment(&self) -> &Payment {
        match self {
            Self::Settled(p) | Self::Declined(p) | Self::Duplicate(p) => p,
        }
    }

    pub fn into_payment(self) -> Payment {
        match self {
            Self::Settled(p) | Self::Declined(p) | Self::Duplicate(p) => p,
        }
    }
}

/// Sole writer of `Payment.status`.
#[derive(Clone)]
pub struct PaymentLedger {
    payments: PaymentStoreRef,
    courses: CourseStoreRef,
    tracker: InstallmentTracker,
    rate: CommissionRate,
    timeout: Duration,
}

impl PaymentLedger {
    pub fn new(
        payments: PaymentStoreRef,
        courses: CourseStoreRef,
        tracker: InstallmentTracker,
        rate: CommissionRate,
        timeout: Duration,
    ) -> Self {
        Self {
            payments,
            courses,
            tracker,
            rate,
            timeout,
        }
    }

    /// Creates a pending payment for a checkout.
    ///
    /// For a signed-in learner the outstanding scheduled installment is
    /// handed back when the amount matches. Any other attempt is ad hoc and
    /// carries no due date.
    pub async fn initialize(&self, request: PaymentRequest) -> Result<Payment> {
        let amount = Amount::new(request.amount)?;
        validate_email(&request.email)?;

        let course = bounded(self.timeout, "courses.get", self.courses.get(&request.course_id))
            .await?
            .ok_or_else(|| EngineError::CourseNotFound(request.course_id.clone()))?;
        if !course.is_purchasable() {
            return Err(EngineError::CourseNotPurchasable(course.id));
        }

        let now = Utc::now();
        if let Some(learner) = &request.learner_id {
            let history = self.tracker.history(learner, &course).await?;
            if history.summary.total_paid > Balance::ZERO && history.summary.is_complete {
                return Err(EngineError::DuplicatePayment {
                    learner: learner.clone(),
                    course: course.id,
                });
            }
            if Balance::from(amount) > history.summary.remaining_balance {
                return Err(EngineError::Validation(format!(
                    "Amount {} exceeds the remaining balance {} for course {}",
                    amount, history.summary.remaining_balance, course.id
                )));
            }
            if let Some(open) = payment::outstanding(&history.payments) {
                let reusable = open.gross_amount == amount
                    && request.reference.as_ref().is_none_or(|r| *r == open.reference);
                if reusable {
                    debug!(reference = %open.reference, "reusing scheduled installment");
                    return Ok(open.clone());
                }
            }
        } else if amount > course.price {
            return Err(EngineError::Validation(format!(
                "Amount {} exceeds the price {} of course {}",
                amount, course.price, course.id
            )));
        }

        let reference = request.reference.unwrap_or_else(GatewayReference::generate);
        let payment = Payment::pending(
            reference,
            &course,
            request.learner_id,
            request.email,
            amount,
            now,
        );
        bounded(self.timeout, "payments.insert", self.payments.insert(payment.clone())).await?;

        info!(
            reference = %payment.reference,
            course = %payment.course_id,
            amount = %amount,
            guest = payment.is_guest(),
            "payment initialized"
        );
        Ok(payment)
    }

    pub async fn get(&self, reference: &GatewayReference) -> Result<Payment> {
        let found = bounded(self.timeout, "payments.get", self.payments.get(reference)).await?;
        found.ok_or_else(|| {
            error!(reference = %reference, "confirmation for unknown payment");
            EngineError::PaymentNotFound(reference.clone())
        })
    }

    /// Applies a gateway outcome to the payment.
    ///
    /// The status check and the transition are one compare-and-swap on the
    /// stored status, so concurrent duplicate deliveries settle exactly once.
    pub async fn confirm(&self, confirmation: &GatewayConfirmation) -> Result<Confirmation> {
        for attempt in 1..=CAS_ATTEMPTS {
            let mut payment = self.get(&confirmation.reference).await?;

            match (payment.status, confirmation.status) {
                (PaymentStatus::Successful, _) | (PaymentStatus::Failed, GatewayStatus::Failed) => {
                    debug!(reference = %payment.reference, status = %payment.status, "duplicate confirmation");
                    return Ok(Confirmation::Duplicate(payment));
                }
                (PaymentStatus::Failed, GatewayStatus::Success) => {
                    warn!(reference = %payment.reference, "success reported for a failed payment");
                    return Err(EngineError::invalid_transition(
                        "payment",
                        PaymentStatus::Failed,
                        PaymentStatus::Successful,
                    ));
                }
                (PaymentStatus::Pending, _) => {}
            }

            let now = Utc::now();
            match confirmation.status {
                GatewayStatus::Success => {
                    if confirmation.amount != payment.gross_amount.minor_units() {
                        return Err(EngineError::Validation(format!(
                            "Confirmed amount {} does not match payment {} of {}",
                            confirmation.amount, payment.reference, payment.gross_amount
                        )));
                    }
                    let split = commission::split(confirmation.amount, self.rate)?;
                    payment.succeed(split, now)?;
                }
                GatewayStatus::Failed => payment.fail(now)?,
            }

            let swapped = bounded(
                self.timeout,
                "payments.compare_and_swap",
                self.payments
                    .compare_and_swap(payment.clone(), PaymentStatus::Pending),
            )
            .await?;
            if swapped {
                info!(
                    reference = %payment.reference,
                    status = %payment.status,
                    commission = %payment.commission_amount,
                    net = %payment.net_amount,
                    "payment confirmed"
                );
                return Ok(match payment.status {
                    PaymentStatus::Successful => Confirmation::Settled(payment),
                    _ => Confirmation::Declined(payment),
                });
            }
            warn!(reference = %payment.reference, attempt, "payment changed while confirming");
        }
        Err(EngineError::StorageConflict(format!(
            "payment {}",
            confirmation.reference
        )))
    }

    /// Stamps `reconciled_at` once enrollment and earnings effects are in.
    pub async fn mark_reconciled(&self, mut payment: Payment) -> Result<Payment> {
        if payment.reconciled_at.is_some() {
            return Ok(payment);
        }
        payment.reconciled_at = Some(Utc::now());
        let swapped = bounded(
            self.timeout,
            "payments.compare_and_swap",
            self.payments
                .compare_and_swap(payment.clone(), PaymentStatus::Successful),
        )
        .await?;
        if !swapped {
            return Err(EngineError::StorageConflict(format!(
                "payment {}",
                payment.reference
            )));
        }
        Ok(payment)
    }

    /// Schedules the installment that follows `settled`, unless one was
    /// already scheduled after it was paid.
    ///
    /// Ad-hoc pending attempts carry no due date and never block scheduling.
    pub async fn schedule_installment(
        &self,
        settled: &Payment,
        history: &[Payment],
        amount: Amount,
        due_date: DateTime<Utc>,
    ) -> Result<Option<Payment>> {
        let paid_at = settled.processed_at.unwrap_or(settled.created_at);
        let already_scheduled = history.iter().any(|p| {
            p.status == PaymentStatus::Pending && p.due_date.is_some() && p.created_at >= paid_at
        });
        if already_scheduled {
            debug!(reference = %settled.reference, "next installment already in flight");
            return Ok(None);
        }

        let next = Payment::next_installment(settled, amount, due_date, Utc::now());
        bounded(self.timeout, "payments.insert", self.payments.insert(next.clone())).await?;
        info!(
            reference = %next.reference,
            course = %next.course_id,
            amount = %amount,
            due = %due_date,
            "next installment scheduled"
        );
        Ok(Some(next))
    }

    /// Puts a declined scheduled installment back on the books.
    ///
    /// The replacement keeps the amount and due date, so a retry checkout
    /// reuses it and the sweeper still sees the debt. Nothing is written when
    /// the declined attempt was unscheduled, already superseded by a later
    /// payment, or another installment is already outstanding.
    pub async fn reschedule_declined(&self, declined: &Payment) -> Result<Option<Payment>> {
        let (Some(learner), Some(due_date)) = (&declined.learner_id, declined.due_date) else {
            return Ok(None);
        };
        if declined.status != PaymentStatus::Failed {
            return Ok(None);
        }

        let history = self.tracker.payments(learner, &declined.course_id).await?;
        let superseded = payment::last_settled_at(&history).is_some_and(|at| declined.created_at < at);
        if superseded || payment::outstanding(&history).is_some() {
            debug!(reference = %declined.reference, "declined installment needs no replacement");
            return Ok(None);
        }

        let replacement =
            Payment::next_installment(declined, declined.gross_amount, due_date, Utc::now());
        bounded(
            self.timeout,
            "payments.insert",
            self.payments.insert(replacement.clone()),
        )
        .await?;
        info!(
            declined = %declined.reference,
            reference = %replacement.reference,
            due = %due_date,
            "declined installment rescheduled"
        );
        Ok(Some(replacement))
    }
}

fn validate_email(email: &str) -> Result<()> {
    let email = email.trim();
    match email.split_once('@') {
        Some((local, domain)) if !local.is_empty() && !domain.is_empty() => Ok(()),
        _ => Err(EngineError::Validation(format!(
            "Invalid email address: {:?}",
            email
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::course::{Course, CourseId, CourseStatus, LearnerId, TutorId};
    use crate::domain::installment::InstallmentPolicy;
    use crate::domain::ports::Stores;
    use crate::infrastructure::in_memory;
    use std::sync::Arc;

    async fn setup() -> (PaymentLedger, Stores) {
        let stores = in_memory::stores();
        stores
            .courses
            .store(Course::new(
                CourseId::new("c1"),
                TutorId::new("t1"),
                Amount::new(90_000).unwrap(),
                "NGN",
            ))
            .await
            .unwrap();
        let timeout = Duration::from_secs(1);
        let tracker = InstallmentTracker::new(
            Arc::clone(&stores.payments),
            Arc::clone(&stores.enrollments),
            Arc::clone(&stores.courses),
            InstallmentPolicy::default(),
            timeout,
        );
        let ledger = PaymentLedger::new(
            Arc::clone(&stores.payments),
            Arc::clone(&stores.courses),
            tracker,
            CommissionRate::DEFAULT,
            timeout,
        );
        (ledger, stores)
    }

    fn request(amount: i64) -> PaymentRequest {
        PaymentRequest::new(CourseId::new("c1"), amount, "l1@example.com")
            .for_learner(LearnerId::new("l1"))
    }

    fn success(payment: &Payment) -> GatewayConfirmation {
        GatewayConfirmation {
            reference: payment.reference.clone(),
            status: GatewayStatus::Success,
            amount: payment.gross_amount.minor_units(),
        }
    }

    #[tokio::test]
    async fn test_initialize_validates_input() {
        let (ledger, stores) = setup().await;
        assert!(matches!(
            ledger.initialize(request(0)).await,
            Err(EngineError::InvalidAmount(0))
        ));
        assert!(matches!(
            ledger
                .initialize(PaymentRequest::new(CourseId::new("c1"), 1_000, "not-an-email"))
                .await,
            Err(EngineError::Validation(_))
        ));
        assert!(matches!(
            ledger
                .initialize(PaymentRequest::new(CourseId::new("nope"), 1_000, "a@b.c"))
                .await,
            Err(EngineError::CourseNotFound(_))
        ));
        assert!(matches!(
            ledger.initialize(request(90_001)).await,
            Err(EngineError::Validation(_))
        ));

        let mut draft = stores.courses.get(&CourseId::new("c1")).await.unwrap().unwrap();
        draft.status = CourseStatus::Draft;
        stores.courses.store(draft).await.unwrap();
        assert!(matches!(
            ledger.initialize(request(1_000)).await,
            Err(EngineError::CourseNotPurchasable(_))
        ));
    }

    #[tokio::test]
    async fn test_caller_reference_must_be_unique() {
        let (ledger, _stores) = setup().await;
        let reference = GatewayReference::new("PSK-123");
        let first = ledger
            .initialize(request(30_000).with_reference(reference.clone()))
            .await
            .unwrap();
        assert_eq!(first.reference, reference);
        assert!(matches!(
            ledger
                .initialize(request(30_000).with_reference(reference))
                .await,
            Err(EngineError::UniqueViolation(_))
        ));
    }

    #[tokio::test]
    async fn test_confirm_settles_once() {
        let (ledger, _stores) = setup().await;
        let payment = ledger.initialize(request(50_000)).await.unwrap();

        let first = ledger.confirm(&success(&payment)).await.unwrap();
        let Confirmation::Settled(settled) = first else {
            panic!("expected settlement, got {:?}", first);
        };
        assert_eq!(settled.commission_amount, Balance::new(7_500));
        assert_eq!(settled.net_amount, Balance::new(42_500));

        let second = ledger.confirm(&success(&payment)).await.unwrap();
        assert_eq!(second, Confirmation::Duplicate(settled));
    }

    #[tokio::test]
    async fn test_confirm_rejects_amount_mismatch() {
        let (ledger, stores) = setup().await;
        let payment = ledger.initialize(request(50_000)).await.unwrap();
        let mut tampered = success(&payment);
        tampered.amount = 5_000;

        assert!(matches!(
            ledger.confirm(&tampered).await,
            Err(EngineError::Validation(_))
        ));
        let stored = stores.payments.get(&payment.reference).await.unwrap().unwrap();
        assert_eq!(stored.status, PaymentStatus::Pending);
    }

    #[tokio::test]
    async fn test_failed_payment_stays_failed() {
        let (ledger, _stores) = setup().await;
        let payment = ledger.initialize(request(50_000)).await.unwrap();
        let declined = GatewayConfirmation {
            status: GatewayStatus::Failed,
            ..success(&payment)
        };

        assert!(matches!(
            ledger.confirm(&declined).await.unwrap(),
            Confirmation::Declined(_)
        ));
        assert!(matches!(
            ledger.confirm(&declined).await.unwrap(),
            Confirmation::Duplicate(_)
        ));
        assert!(matches!(
            ledger.confirm(&success(&payment)).await,
            Err(EngineError::InvalidStateTransition { .. })
        ));
    }

    #[tokio::test]
    async fn test_unknown_reference() {
        let (ledger, _stores) = setup().await;
        let confirmation = GatewayConfirmation {
            reference: GatewayReference::new("missing"),
            status: GatewayStatus::Success,
            amount: 1_000,
        };
        assert!(matches!(
            ledger.confirm(&confirmation).await,
            Err(EngineError::PaymentNotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_guest_amount_capped_at_price() {
        let (ledger, _stores) = setup().await;
        let guest = PaymentRequest::new(CourseId::new("c1"), 95_000, "guest@example.com");
        assert!(matches!(
            ledger.initialize(guest).await,
            Err(EngineError::Validation(_))
        ));
        let guest = PaymentRequest::new(CourseId::new("c1"), 90_000, "guest@example.com");
        assert!(ledger.initialize(guest).await.unwrap().is_guest());
    }

    fn decline(payment: &Payment) -> GatewayConfirmation {
        GatewayConfirmation {
            status: GatewayStatus::Failed,
            ..success(payment)
        }
    }

    async fn settle_first(ledger: &PaymentLedger) -> Payment {
        let first = ledger.initialize(request(30_000)).await.unwrap();
        ledger.confirm(&success(&first)).await.unwrap().into_payment()
    }

    #[tokio::test]
    async fn test_ad_hoc_attempt_does_not_block_scheduling() {
        let (ledger, stores) = setup().await;
        let settled = settle_first(&ledger).await;
        let abandoned = ledger.initialize(request(20_000)).await.unwrap();
        assert!(abandoned.due_date.is_none());

        let history = stores
            .payments
            .for_pair(&LearnerId::new("l1"), &CourseId::new("c1"))
            .await
            .unwrap();
        let due = Utc::now() + chrono::Duration::days(30);
        let next = ledger
            .schedule_installment(&settled, &history, Amount::new(30_000).unwrap(), due)
            .await
            .unwrap()
            .expect("installment scheduled");
        assert_eq!(next.due_date, Some(due));

        // A second call for the same settlement finds it already scheduled.
        let history = stores
            .payments
            .for_pair(&LearnerId::new("l1"), &CourseId::new("c1"))
            .await
            .unwrap();
        assert!(
            ledger
                .schedule_installment(&settled, &history, Amount::new(30_000).unwrap(), due)
                .await
                .unwrap()
                .is_none()
        );
    }

    #[tokio::test]
    async fn test_declined_installment_is_rescheduled_once() {
        let (ledger, _stores) = setup().await;
        let settled = settle_first(&ledger).await;
        let due = Utc::now() + chrono::Duration::days(30);
        let history = ledger
            .tracker
            .payments(&LearnerId::new("l1"), &CourseId::new("c1"))
            .await
            .unwrap();
        let scheduled = ledger
            .schedule_installment(&settled, &history, Amount::new(30_000).unwrap(), due)
            .await
            .unwrap()
            .unwrap();

        let declined = ledger.confirm(&decline(&scheduled)).await.unwrap().into_payment();
        let replacement = ledger
            .reschedule_declined(&declined)
            .await
            .unwrap()
            .expect("replacement scheduled");
        assert_eq!(replacement.due_date, Some(due));
        assert_eq!(replacement.gross_amount, scheduled.gross_amount);
        assert_ne!(replacement.reference, scheduled.reference);

        // Redelivery finds the replacement outstanding.
        assert!(ledger.reschedule_declined(&declined).await.unwrap().is_none());
        let retry = ledger.initialize(request(30_000)).await.unwrap();
        assert_eq!(retry.reference, replacement.reference);
    }

    #[tokio::test]
    async fn test_declined_ad_hoc_attempt_is_not_rescheduled() {
        let (ledger, _stores) = setup().await;
        let attempt = ledger.initialize(request(30_000)).await.unwrap();
        let declined = ledger.confirm(&decline(&attempt)).await.unwrap().into_payment();
        assert!(ledger.reschedule_declined(&declined).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_mark_reconciled() {
        let (ledger, stores) = setup().await;
        let payment = ledger.initialize(request(90_000)).await.unwrap();
        let settled = ledger.confirm(&success(&payment)).await.unwrap().into_payment();

        let marked = ledger.mark_reconciled(settled).await.unwrap();
        assert!(marked.reconciled_at.is_some());
        let stored = stores.payments.get(&payment.reference).await.unwrap().unwrap();
        assert_eq!(stored.reconciled_at, marked.reconciled_at);
    }
}
