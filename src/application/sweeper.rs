use super::notifier::Notifier;
use super::tracker::InstallmentTracker;
use super::{CAS_ATTEMPTS, bounded};
use crate::domain::enrollment::{Enrollment, EnrollmentStatus, OVERDUE_REASON, PaymentPlan};
use crate::domain::events::DomainEvent;
use crate::domain::payment;
use crate::domain::ports::EnrollmentStoreRef;
use crate::error::{EngineError, Result};
use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info};

/// Counts from one sweep pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepReport {
    pub scanned: usize,
    pub suspended: usize,
    pub skipped: usize,
    pub failed: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Verdict {
    Suspended,
    Skipped,
}

/// Periodic scan that suspends installment enrollments with a missed due
/// date.
///
/// The sweeper never reactivates. A suspension is lifted only by a payment
/// landing on the enrollment or by an administrator.
pub struct OverdueSweeper {
    enrollments: EnrollmentStoreRef,
    tracker: InstallmentTracker,
    notifier: Notifier,
    timeout: Duration,
}

impl OverdueSweeper {
    pub fn new(
        enrollments: EnrollmentStoreRef,
        tracker: InstallmentTracker,
        notifier: Notifier,
        timeout: Duration,
    ) -> Self {
        Self {
            enrollments,
            tracker,
            notifier,
            timeout,
        }
    }

    pub async fn sweep(&self) -> Result<SweepReport> {
        self.sweep_at(Utc::now()).await
    }

    /// One pass evaluated as of `now`. A failure on one enrollment is
    /// counted and logged; the rest of the pass continues.
    pub async fn sweep_at(&self, now: DateTime<Utc>) -> Result<SweepReport> {
        let mut report = SweepReport::default();

        let active = bounded(
            self.timeout,
            "enrollments.with_status",
            self.enrollments.with_status(EnrollmentStatus::Active),
        )
        .await?;
        for enrollment in active
            .into_iter()
            .filter(|e| e.payment_plan == PaymentPlan::Installment)
        {
            report.scanned += 1;
            let (learner, course) = (enrollment.learner_id.clone(), enrollment.course_id.clone());
            match self.check_active(enrollment, now).await {
                Ok(verdict) => report.record(verdict),
                Err(e) => {
                    report.failed += 1;
                    error!(learner = %learner, course = %course, error = %e, "overdue check failed");
                }
            }
        }

        info!(
            scanned = report.scanned,
            suspended = report.suspended,
            failed = report.failed,
            "overdue sweep finished"
        );
        Ok(report)
    }

    /// Suspends when the outstanding installment is overdue and the balance
    /// is open.
    /// A lost compare-and-swap means something else (usually a payment)
    /// touched the enrollment, so the decision is re-made from a fresh read.
    async fn check_active(&self, enrollment: Enrollment, now: DateTime<Utc>) -> Result<Verdict> {
        let mut current = enrollment;
        for attempt in 1..=CAS_ATTEMPTS {
            if current.status != EnrollmentStatus::Active
                || current.payment_plan != PaymentPlan::Installment
            {
                return Ok(Verdict::Skipped);
            }
            let payments = self
                .tracker
                .payments(&current.learner_id, &current.course_id)
                .await?;
            let summary = self.tracker.summarize(current.total_amount, &payments);
            let Some(installment) = payment::outstanding(&payments).filter(|p| p.is_overdue(now))
            else {
                return Ok(Verdict::Skipped);
            };
            if summary.is_complete {
                return Ok(Verdict::Skipped);
            }
            let due_date = installment.due_date;

            let mut suspended = current.clone();
            suspended.suspend(OVERDUE_REASON, now)?;
            if self.swap(&suspended).await? {
                info!(
                    learner = %suspended.learner_id,
                    course = %suspended.course_id,
                    due = ?due_date,
                    "enrollment suspended for overdue payment"
                );
                self.notifier
                    .emit(DomainEvent::enrollment_suspended(&suspended, due_date))
                    .await;
                return Ok(Verdict::Suspended);
            }

            debug!(learner = %current.learner_id, course = %current.course_id, attempt, "enrollment changed during sweep");
            current = self.reload(&current).await?;
        }
        Err(EngineError::StorageConflict(format!(
            "enrollment for learner {} in course {}",
            current.learner_id, current.course_id
        )))
    }

    /// Sweeps every `period` until `shutdown` flips to `true` or its sender
    /// is dropped. The first pass runs immediately.
    pub async fn run(&self, period: Duration, mut shutdown: watch::Receiver<bool>) {
        let mut ticker = tokio::time::interval(period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        info!(period_secs = period.as_secs(), "overdue sweeper started");

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    if let Err(e) = self.sweep().await {
                        error!(error = %e, "overdue sweep aborted");
                    }
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }
        info!("overdue sweeper stopped");
    }

    pub fn spawn(self: Arc<Self>, period: Duration, shutdown: watch::Receiver<bool>) -> JoinHandle<()> {
        tokio::spawn(async move { self.run(period, shutdown).await })
    }

    async fn swap(&self, enrollment: &Enrollment) -> Result<bool> {
        bounded(
            self.timeout,
            "enrollments.compare_and_swap",
            self.enrollments.compare_and_swap(enrollment.clone()),
        )
        .await
    }

    async fn reload(&self, enrollment: &Enrollment) -> Result<Enrollment> {
        bounded(
            self.timeout,
            "enrollments.get",
            self.enrollments
                .get(&enrollment.learner_id, &enrollment.course_id),
        )
        .await?
        .ok_or_else(|| EngineError::EnrollmentNotFound {
            learner: enrollment.learner_id.clone(),
            course: enrollment.course_id.clone(),
        })
    }
}

impl SweepReport {
    fn record(&mut self, verdict: Verdict) {
        match verdict {
            Verdict::Suspended => self.suspended += 1,
            Verdict::Skipped => self.skipped += 1,
        }
    }
}
