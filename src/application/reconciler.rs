use super::earnings::EarningsLedger;
use super::{CAS_ATTEMPTS, bounded};
use crate::domain::course::{CourseId, LearnerId};
use crate::domain::enrollment::{Enrollment, PaymentApplication};
use crate::domain::events::DomainEvent;
use crate::domain::money::Amount;
use crate::domain::payment::{Payment, PaymentStatus};
use crate::domain::ports::{CourseStoreRef, EnrollmentStoreRef};
use crate::error::{EngineError, Result};
use chrono::{DateTime, Utc};
use std::time::Duration;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnrollmentChange {
    Created,
    Updated,
    /// The payment lifted an overdue suspension.
    Reactivated,
    /// This payment had already been applied; nothing changed.
    AlreadyApplied,
    /// Guest checkout, no enrollment involved.
    Guest,
}

#[derive(Debug, Clone)]
pub struct Reconciliation {
    pub enrollment: Option<Enrollment>,
    pub change: EnrollmentChange,
    /// Events to publish once the payment is marked reconciled.
    pub events: Vec<DomainEvent>,
}

/// Applies settled payments to enrollments, course membership and tutor
/// earnings. Sole writer of `Enrollment.status` and `Enrollment.amount_paid`.
///
/// Every step is guarded on its own, so running it twice for the same payment
/// leaves the same state as running it once.
#[derive(Clone)]
pub struct EnrollmentReconciler {
    enrollments: EnrollmentStoreRef,
    courses: CourseStoreRef,
    earnings: EarningsLedger,
    timeout: Duration,
}

impl EnrollmentReconciler {
    pub fn new(
        enrollments: EnrollmentStoreRef,
        courses: CourseStoreRef,
        earnings: EarningsLedger,
        timeout: Duration,
    ) -> Self {
        Self {
            enrollments,
            courses,
            earnings,
            timeout,
        }
    }

    pub async fn reconcile(&self, payment: &Payment) -> Result<Reconciliation> {
        if payment.status != PaymentStatus::Successful {
            return Err(EngineError::Validation(format!(
                "Payment {} is {}, only successful payments are reconciled",
                payment.reference, payment.status
            )));
        }

        let (enrollment, change) = match &payment.learner_id {
            Some(learner) => {
                let course = bounded(self.timeout, "courses.get", self.courses.get(&payment.course_id))
                    .await?
                    .ok_or_else(|| EngineError::CourseNotFound(payment.course_id.clone()))?;
                let (enrollment, change) = self.upsert(learner, payment, course.price).await?;
                self.admit(learner, &payment.course_id).await?;
                (Some(enrollment), change)
            }
            None => (None, EnrollmentChange::Guest),
        };

        let recorded = self.earnings.record_earning(payment).await?;

        let fresh = match change {
            EnrollmentChange::AlreadyApplied => false,
            EnrollmentChange::Guest => recorded,
            _ => true,
        };
        let mut events = Vec::new();
        if fresh {
            events.push(DomainEvent::payment_succeeded(payment));
        }
        if let Some(enrollment) = &enrollment {
            match change {
                EnrollmentChange::Created => events.push(DomainEvent::enrollment_created(enrollment)),
                EnrollmentChange::Reactivated => {
                    events.push(DomainEvent::enrollment_reactivated(enrollment))
                }
                _ => {}
            }
        }

        info!(
            reference = %payment.reference,
            course = %payment.course_id,
            change = ?change,
            "payment reconciled"
        );
        Ok(Reconciliation {
            enrollment,
            change,
            events,
        })
    }

    /// Admin override: lifts a suspension.
    pub async fn reactivate(&self, learner: &LearnerId, course: &CourseId) -> Result<Enrollment> {
        self.transition(learner, course, |e, now| e.reactivate(now))
            .await
    }

    /// Admin override: revokes access. Later payments still accrue.
    pub async fn cancel(&self, learner: &LearnerId, course: &CourseId) -> Result<Enrollment> {
        self.transition(learner, course, |e, now| e.cancel(now)).await
    }

    /// Find-or-create keyed on the store's (learner, course) uniqueness.
    async fn upsert(
        &self,
        learner: &LearnerId,
        payment: &Payment,
        total_amount: Amount,
    ) -> Result<(Enrollment, EnrollmentChange)> {
        for attempt in 1..=CAS_ATTEMPTS {
            let now = Utc::now();
            let existing = self.find(learner, &payment.course_id).await?;
            let enrollment = match existing {
                Some(enrollment) => enrollment,
                None => {
                    let opened = Enrollment::open(learner.clone(), payment, total_amount, now);
                    match bounded(
                        self.timeout,
                        "enrollments.insert",
                        self.enrollments.insert(opened.clone()),
                    )
                    .await
                    {
                        Ok(()) => return Ok((opened, EnrollmentChange::Created)),
                        Err(EngineError::UniqueViolation(_)) => {
                            debug!(learner = %learner, course = %payment.course_id, "enrollment created concurrently");
                            continue;
                        }
                        Err(e) => return Err(e),
                    }
                }
            };

            let mut updated = enrollment;
            let reactivated = match updated.apply_payment(payment, now) {
                PaymentApplication::AlreadyApplied => {
                    return Ok((updated, EnrollmentChange::AlreadyApplied));
                }
                PaymentApplication::Applied { reactivated } => reactivated,
            };
            if self.swap(&mut updated).await? {
                let change = if reactivated {
                    EnrollmentChange::Reactivated
                } else {
                    EnrollmentChange::Updated
                };
                return Ok((updated, change));
            }
            warn!(learner = %learner, course = %payment.course_id, attempt, "enrollment changed while applying payment");
        }
        Err(EngineError::StorageConflict(format!(
            "enrollment for learner {} in course {}",
            learner, payment.course_id
        )))
    }

    async fn admit(&self, learner: &LearnerId, course: &CourseId) -> Result<()> {
        let added = bounded(
            self.timeout,
            "courses.add_learner",
            self.courses.add_learner(course, learner),
        )
        .await?;
        if added {
            debug!(learner = %learner, course = %course, "learner added to course");
        }
        Ok(())
    }

    async fn transition<F>(&self, learner: &LearnerId, course: &CourseId, apply: F) -> Result<Enrollment>
    where
        F: Fn(&mut Enrollment, DateTime<Utc>) -> Result<()>,
    {
        for attempt in 1..=CAS_ATTEMPTS {
            let mut enrollment = self
                .find(learner, course)
                .await?
                .ok_or_else(|| EngineError::EnrollmentNotFound {
                    learner: learner.clone(),
                    course: course.clone(),
                })?;
            apply(&mut enrollment, Utc::now())?;
            if self.swap(&mut enrollment).await? {
                info!(learner = %learner, course = %course, status = %enrollment.status, "enrollment updated");
                return Ok(enrollment);
            }
            warn!(learner = %learner, course = %course, attempt, "enrollment changed during transition");
        }
        Err(EngineError::StorageConflict(format!(
            "enrollment for learner {} in course {}",
            learner, course
        )))
    }

    async fn find(&self, learner: &LearnerId, course: &CourseId) -> Result<Option<Enrollment>> {
        bounded(
            self.timeout,
            "enrollments.get",
            self.enrollments.get(learner, course),
        )
        .await
    }

    /// On success `enrollment` carries the revision the store now holds.
    async fn swap(&self, enrollment: &mut Enrollment) -> Result<bool> {
        let swapped = bounded(
            self.timeout,
            "enrollments.compare_and_swap",
            self.enrollments.compare_and_swap(enrollment.clone()),
        )
        .await?;
        if swapped {
            enrollment.revision += 1;
        }
        Ok(swapped)
    }
}
