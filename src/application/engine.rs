use super::bounded;
use super::earnings::EarningsLedger;
use super::ledger::{Confirmation, PaymentLedger};
use super::notifier::Notifier;
use super::reconciler::EnrollmentReconciler;
use super::sweeper::{OverdueSweeper, SweepReport};
use super::tracker::{EnrollmentStatusView, InstallmentTracker};
use crate::config::EngineConfig;
use crate::domain::course::{Course, CourseId, LearnerId, TutorId};
use crate::domain::earnings::{EarningsSummary, PayoutDecision, Transaction};
use crate::domain::enrollment::{Enrollment, EnrollmentStatus, PaymentPlan};
use crate::domain::events::DomainEvent;
use crate::domain::installment::InstallmentSummary;
use crate::domain::money::Amount;
use crate::domain::payment::{
    GatewayConfirmation, GatewayReference, Payment, PaymentRequest, PaymentStatus,
};
use crate::domain::ports::{EventPublisherRef, PaymentGatewayRef, Stores};
use crate::error::{EngineError, Result};
use chrono::{DateTime, Utc};
use std::sync::Arc;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{info, warn};
use uuid::Uuid;

/// Result of applying a gateway confirmation.
#[derive(Debug, Clone, PartialEq)]
pub struct ConfirmationReceipt {
    pub payment: Payment,
    /// The pair's enrollment after the confirmation, if there is one.
    pub enrollment: Option<Enrollment>,
    /// The confirmation had already been applied.
    pub duplicate: bool,
    /// Installment scheduled because a balance is still open.
    pub next_installment: Option<Payment>,
}

/// The main entry point of the payment engine.
///
/// `PaymentEngine` owns the application services and the storage ports they
/// share. Webhook handlers, admin endpoints and the batch CLI all go through
/// it; the overdue sweeper it builds can run alongside on its own task.
pub struct PaymentEngine {
    stores: Stores,
    config: EngineConfig,
    ledger: PaymentLedger,
    reconciler: EnrollmentReconciler,
    tracker: InstallmentTracker,
    earnings: EarningsLedger,
    notifier: Notifier,
    sweeper: Arc<OverdueSweeper>,
    gateway: Option<PaymentGatewayRef>,
}

impl PaymentEngine {
    /// Creates a new `PaymentEngine`.
    ///
    /// # Arguments
    ///
    /// * `stores` - Payment, enrollment, course and transaction stores.
    /// * `publisher` - Where domain events are handed off for notification.
    /// * `config` - Policy constants and timeouts.
    pub fn new(stores: Stores, publisher: EventPublisherRef, config: EngineConfig) -> Self {
        let timeout = config.operation_timeout;
        let tracker = InstallmentTracker::new(
            Arc::clone(&stores.payments),
            Arc::clone(&stores.enrollments),
            Arc::clone(&stores.courses),
            config.installments,
            timeout,
        );
        let earnings = EarningsLedger::new(
            Arc::clone(&stores.transactions),
            config.minimum_payout,
            timeout,
        );
        let ledger = PaymentLedger::new(
            Arc::clone(&stores.payments),
            Arc::clone(&stores.courses),
            tracker.clone(),
            config.commission_rate,
            timeout,
        );
        let reconciler = EnrollmentReconciler::new(
            Arc::clone(&stores.enrollments),
            Arc::clone(&stores.courses),
            earnings.clone(),
            timeout,
        );
        let notifier = Notifier::new(publisher, config.admin_recipient.clone(), timeout);
        let sweeper = Arc::new(OverdueSweeper::new(
            Arc::clone(&stores.enrollments),
            tracker.clone(),
            notifier.clone(),
            timeout,
        ));

        Self {
            stores,
            config,
            ledger,
            reconciler,
            tracker,
            earnings,
            notifier,
            sweeper,
            gateway: None,
        }
    }

    /// Attaches the gateway used by [`PaymentEngine::verify_payment`].
    pub fn with_gateway(mut self, gateway: PaymentGatewayRef) -> Self {
        self.gateway = Some(gateway);
        self
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Adds or replaces a catalog entry. Enrollment membership already
    /// recorded for the course is kept.
    pub async fn register_course(&self, mut course: Course) -> Result<()> {
        let existing = bounded(
            self.config.operation_timeout,
            "courses.get",
            self.stores.courses.get(&course.id),
        )
        .await?;
        if let Some(existing) = existing {
            course.enrollment_count = existing.enrollment_count;
            course.enrolled_learners = existing.enrolled_learners;
        }
        info!(course = %course.id, tutor = %course.tutor_id, price = %course.price, "course registered");
        bounded(
            self.config.operation_timeout,
            "courses.store",
            self.stores.courses.store(course),
        )
        .await
    }

    pub async fn course(&self, course_id: &CourseId) -> Result<Course> {
        bounded(
            self.config.operation_timeout,
            "courses.get",
            self.stores.courses.get(course_id),
        )
        .await?
        .ok_or_else(|| EngineError::CourseNotFound(course_id.clone()))
    }

    pub async fn initialize_payment(&self, request: PaymentRequest) -> Result<Payment> {
        self.ledger.initialize(request).await
    }

    pub async fn payment(&self, reference: &GatewayReference) -> Result<Payment> {
        self.ledger.get(reference).await
    }

    /// Applies a verified gateway confirmation.
    ///
    /// Delivering the same confirmation any number of times has the effect
    /// of delivering it once. A settled payment whose reconciliation was
    /// interrupted is reconciled on the next delivery.
    pub async fn confirm_payment(&self, confirmation: GatewayConfirmation) -> Result<ConfirmationReceipt> {
        match self.ledger.confirm(&confirmation).await? {
            Confirmation::Settled(payment) => self.settle(payment, false).await,
            Confirmation::Duplicate(payment)
                if payment.status == PaymentStatus::Successful && payment.reconciled_at.is_none() =>
            {
                warn!(reference = %payment.reference, "resuming interrupted reconciliation");
                self.settle(payment, true).await
            }
            Confirmation::Duplicate(payment) => {
                // A redelivered decline finishes a rescheduling that was cut short.
                let next_installment = match payment.status {
                    PaymentStatus::Failed => self.ledger.reschedule_declined(&payment).await?,
                    _ => None,
                };
                let enrollment = match &payment.learner_id {
                    Some(learner) => self.find_enrollment(learner, &payment.course_id).await?,
                    None => None,
                };
                Ok(ConfirmationReceipt {
                    payment,
                    enrollment,
                    duplicate: true,
                    next_installment,
                })
            }
            Confirmation::Declined(payment) => {
                info!(reference = %payment.reference, "payment declined by gateway");
                let next_installment = self.ledger.reschedule_declined(&payment).await?;
                let enrollment = match &payment.learner_id {
                    Some(learner) => self.find_enrollment(learner, &payment.course_id).await?,
                    None => None,
                };
                Ok(ConfirmationReceipt {
                    payment,
                    enrollment,
                    duplicate: false,
                    next_installment,
                })
            }
        }
    }

    /// Asks the gateway for the outcome of `reference` and applies it. On
    /// timeout the payment is left `pending` so a later call can settle it.
    pub async fn verify_payment(&self, reference: &GatewayReference) -> Result<ConfirmationReceipt> {
        let gateway = self
            .gateway
            .as_ref()
            .ok_or_else(|| EngineError::Gateway("no payment gateway configured".to_string()))?;

        let confirmation =
            match tokio::time::timeout(self.config.gateway_timeout, gateway.verify(reference)).await {
                Ok(answer) => answer?,
                Err(_) => {
                    warn!(reference = %reference, "gateway verification timed out");
                    return Err(EngineError::GatewayTimeout(reference.clone()));
                }
            };
        if confirmation.reference != *reference {
            return Err(EngineError::Gateway(format!(
                "gateway answered for {} when asked about {}",
                confirmation.reference, reference
            )));
        }
        self.confirm_payment(confirmation).await
    }

    pub async fn enrollment_status(&self, learner: &LearnerId, course: &CourseId) -> Result<EnrollmentStatusView> {
        self.tracker.status(learner, course).await
    }

    pub async fn installment_summary(&self, learner: &LearnerId, course: &CourseId) -> Result<InstallmentSummary> {
        self.tracker.summary(learner, course).await
    }

    pub async fn enrollments(&self) -> Result<Vec<Enrollment>> {
        bounded(
            self.config.operation_timeout,
            "enrollments.get_all",
            self.stores.enrollments.get_all(),
        )
        .await
    }

    pub async fn reactivate_enrollment(&self, learner: &LearnerId, course: &CourseId) -> Result<Enrollment> {
        let enrollment = self.reconciler.reactivate(learner, course).await?;
        self.notifier
            .emit(DomainEvent::enrollment_reactivated(&enrollment))
            .await;
        Ok(enrollment)
    }

    pub async fn cancel_enrollment(&self, learner: &LearnerId, course: &CourseId) -> Result<Enrollment> {
        self.reconciler.cancel(learner, course).await
    }

    pub async fn earnings_summary(&self, tutor: &TutorId) -> Result<EarningsSummary> {
        self.earnings.summary(tutor).await
    }

    pub async fn pending_payout(&self, tutor: &TutorId) -> Result<Option<Transaction>> {
        self.earnings.pending_payout(tutor).await
    }

    pub async fn request_payout(&self, tutor: &TutorId, amount: i64) -> Result<Transaction> {
        let request = self.earnings.request_payout(tutor, amount).await?;
        self.notifier
            .emit(DomainEvent::payout_requested(&request))
            .await;
        Ok(request)
    }

    pub async fn process_payout(&self, id: Uuid, decision: PayoutDecision) -> Result<Transaction> {
        let processed = self.earnings.process_payout(id, &decision).await?;
        self.notifier
            .emit(DomainEvent::payout_processed(&processed))
            .await;
        Ok(processed)
    }

    pub async fn sweep_overdue(&self) -> Result<SweepReport> {
        self.sweeper.sweep().await
    }

    pub async fn sweep_overdue_at(&self, now: DateTime<Utc>) -> Result<SweepReport> {
        self.sweeper.sweep_at(now).await
    }

    pub fn sweeper(&self) -> Arc<OverdueSweeper> {
        Arc::clone(&self.sweeper)
    }

    /// Starts the background sweep at the configured interval.
    pub fn spawn_sweeper(&self, shutdown: watch::Receiver<bool>) -> JoinHandle<()> {
        self.sweeper()
            .spawn(self.config.sweep_interval, shutdown)
    }

    /// Reconciles a settled payment, schedules the next installment when a
    /// balance remains, then stamps the payment and publishes events.
    async fn settle(&self, payment: Payment, duplicate: bool) -> Result<ConfirmationReceipt> {
        let reconciliation = self.reconciler.reconcile(&payment).await?;

        let next_installment = match &reconciliation.enrollment {
            Some(enrollment)
                if enrollment.payment_plan == PaymentPlan::Installment
                    && enrollment.status != EnrollmentStatus::Cancelled
                    && !enrollment.is_complete() =>
            {
                self.schedule_next(&payment, enrollment).await?
            }
            _ => None,
        };

        let payment = self.ledger.mark_reconciled(payment).await?;
        self.notifier.emit_all(reconciliation.events).await;

        Ok(ConfirmationReceipt {
            payment,
            enrollment: reconciliation.enrollment,
            duplicate,
            next_installment,
        })
    }

    async fn schedule_next(&self, settled: &Payment, enrollment: &Enrollment) -> Result<Option<Payment>> {
        let history = self
            .tracker
            .payments(&enrollment.learner_id, &enrollment.course_id)
            .await?;
        let summary = self.tracker.summarize(enrollment.total_amount, &history);
        let Ok(amount) = Amount::new(summary.next_installment_amount.minor_units()) else {
            return Ok(None);
        };
        let due_date = settled.processed_at.unwrap_or_else(Utc::now) + self.config.installments.interval;
        self.ledger
            .schedule_installment(settled, &history, amount, due_date)
            .await
    }

    async fn find_enrollment(&self, learner: &LearnerId, course: &CourseId) -> Result<Option<Enrollment>> {
        bounded(
            self.config.operation_timeout,
            "enrollments.get",
            self.stores.enrollments.get(learner, course),
        )
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::money::Balance;
    use crate::domain::payment::GatewayStatus;
    use crate::infrastructure::in_memory::{self, RecordingPublisher, ScriptedGateway};
    use std::time::Duration;

    async fn engine() -> (PaymentEngine, RecordingPublisher) {
        let publisher = RecordingPublisher::new();
        let engine = PaymentEngine::new(
            in_memory::stores(),
            Arc::new(publisher.clone()),
            EngineConfig::default(),
        );
        engine
            .register_course(Course::new(
                CourseId::new("c1"),
                TutorId::new("t1"),
                Amount::new(90_000).unwrap(),
                "NGN",
            ))
            .await
            .unwrap();
        (engine, publisher)
    }

    fn pay(payment: &Payment) -> GatewayConfirmation {
        GatewayConfirmation {
            reference: payment.reference.clone(),
            status: GatewayStatus::Success,
            amount: payment.gross_amount.minor_units(),
        }
    }

    fn request(amount: i64) -> PaymentRequest {
        PaymentRequest::new(CourseId::new("c1"), amount, "l1@example.com")
            .for_learner(LearnerId::new("l1"))
    }

    #[tokio::test]
    async fn test_first_installment_schedules_next() {
        let (engine, publisher) = engine().await;
        let payment = engine.initialize_payment(request(30_000)).await.unwrap();
        let receipt = engine.confirm_payment(pay(&payment)).await.unwrap();

        assert!(!receipt.duplicate);
        assert!(receipt.payment.reconciled_at.is_some());
        let next = receipt.next_installment.expect("next installment");
        assert_eq!(next.gross_amount, Amount::new(30_000).unwrap());
        assert_eq!(
            next.due_date,
            Some(receipt.payment.processed_at.unwrap() + chrono::Duration::days(30))
        );
        assert_eq!(
            publisher.names().await,
            vec!["payment.succeeded", "enrollment.created"]
        );

        // Paying the scheduled installment reuses it.
        let again = engine.initialize_payment(request(30_000)).await.unwrap();
        assert_eq!(again.reference, next.reference);
    }

    #[tokio::test]
    async fn test_full_payment_then_duplicate_purchase() {
        let (engine, _publisher) = engine().await;
        let payment = engine.initialize_payment(request(90_000)).await.unwrap();
        let receipt = engine.confirm_payment(pay(&payment)).await.unwrap();
        assert!(receipt.next_installment.is_none());
        assert_eq!(
            receipt.enrollment.unwrap().payment_plan,
            PaymentPlan::Full
        );

        assert!(matches!(
            engine.initialize_payment(request(90_000)).await,
            Err(EngineError::DuplicatePayment { .. })
        ));
    }

    #[tokio::test]
    async fn test_interrupted_reconciliation_resumes() {
        let (engine, _publisher) = engine().await;
        let payment = engine.initialize_payment(request(90_000)).await.unwrap();
        // Settle the payment without reconciling, as if the process died.
        let settled = engine.ledger.confirm(&pay(&payment)).await.unwrap();
        assert!(matches!(settled, Confirmation::Settled(_)));
        assert!(engine.enrollments().await.unwrap().is_empty());

        let receipt = engine.confirm_payment(pay(&payment)).await.unwrap();
        assert!(receipt.duplicate);
        assert!(receipt.payment.reconciled_at.is_some());
        assert_eq!(
            receipt.enrollment.unwrap().amount_paid,
            Balance::new(90_000)
        );
    }

    #[tokio::test]
    async fn test_verify_without_gateway() {
        let (engine, _publisher) = engine().await;
        assert!(matches!(
            engine
                .verify_payment(&GatewayReference::new("ref"))
                .await,
            Err(EngineError::Gateway(_))
        ));
    }

    #[tokio::test]
    async fn test_verify_applies_gateway_answer() {
        let (engine, _publisher) = engine().await;
        let gateway = ScriptedGateway::new();
        let engine = engine.with_gateway(Arc::new(gateway.clone()));
        let payment = engine.initialize_payment(request(90_000)).await.unwrap();
        gateway.answer(pay(&payment)).await;

        let receipt = engine.verify_payment(&payment.reference).await.unwrap();
        assert_eq!(receipt.payment.status, PaymentStatus::Successful);
    }

    #[tokio::test(start_paused = true)]
    async fn test_verify_timeout_leaves_pending() {
        let (engine, _publisher) = engine().await;
        let gateway = ScriptedGateway::with_delay(Duration::from_secs(60));
        let engine = engine.with_gateway(Arc::new(gateway));
        let payment = engine.initialize_payment(request(90_000)).await.unwrap();

        assert!(matches!(
            engine.verify_payment(&payment.reference).await,
            Err(EngineError::GatewayTimeout(_))
        ));
        let stored = engine.payment(&payment.reference).await.unwrap();
        assert_eq!(stored.status, PaymentStatus::Pending);
    }
}
