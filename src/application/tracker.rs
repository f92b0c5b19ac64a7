use super::bounded;
use crate::domain::course::{Course, CourseId, LearnerId};
use crate::domain::enrollment::{Enrollment, EnrollmentStatus};
use crate::domain::installment::{InstallmentPolicy, InstallmentSummary};
use crate::domain::money::{Amount, Balance};
use crate::domain::payment::Payment;
use crate::domain::ports::{CourseStoreRef, EnrollmentStoreRef, PaymentStoreRef};
use crate::error::{EngineError, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Everything known about one (learner, course) pair.
#[derive(Debug, Clone)]
pub struct PairHistory {
    pub enrollment: Option<Enrollment>,
    /// Oldest first.
    pub payments: Vec<Payment>,
    pub summary: InstallmentSummary,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InstallmentInfo {
    pub total_installments: u32,
    pub paid_installments: u32,
    pub next_installment_amount: Balance,
}

/// Response shape of the enrollment status endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EnrollmentStatusView {
    pub is_enrolled: bool,
    pub enrollment_status: Option<EnrollmentStatus>,
    pub total_paid: Balance,
    pub remaining_amount: Balance,
    pub payment_progress: u8,
    pub next_due_date: Option<DateTime<Utc>>,
    pub installment_info: InstallmentInfo,
}

/// Read model over payment history. Performs no writes.
#[derive(Clone)]
pub struct InstallmentTracker {
    payments: PaymentStoreRef,
    enrollments: EnrollmentStoreRef,
    courses: CourseStoreRef,
    policy: InstallmentPolicy,
    timeout: Duration,
}

impl InstallmentTracker {
    pub fn new(
        payments: PaymentStoreRef,
        enrollments: EnrollmentStoreRef,
        courses: CourseStoreRef,
        policy: InstallmentPolicy,
        timeout: Duration,
    ) -> Self {
        Self {
            payments,
            enrollments,
            courses,
            policy,
            timeout,
        }
    }

    pub fn policy(&self) -> InstallmentPolicy {
        self.policy
    }

    pub fn summarize(&self, total_amount: Amount, payments: &[Payment]) -> InstallmentSummary {
        InstallmentSummary::derive(total_amount, payments, self.policy)
    }

    pub async fn payments(&self, learner: &LearnerId, course: &CourseId) -> Result<Vec<Payment>> {
        bounded(
            self.timeout,
            "payments.for_pair",
            self.payments.for_pair(learner, course),
        )
        .await
    }

    /// The owed total is the enrollment's price snapshot when one exists,
    /// otherwise the current course price.
    pub async fn history(&self, learner: &LearnerId, course: &Course) -> Result<PairHistory> {
        let enrollment = bounded(
            self.timeout,
            "enrollments.get",
            self.enrollments.get(learner, &course.id),
        )
        .await?;
        let payments = self.payments(learner, &course.id).await?;
        let total = enrollment
            .as_ref()
            .map(|e| e.total_amount)
            .unwrap_or(course.price);
        let summary = self.summarize(total, &payments);
        Ok(PairHistory {
            enrollment,
            payments,
            summary,
        })
    }

    pub async fn summary(&self, learner: &LearnerId, course_id: &CourseId) -> Result<InstallmentSummary> {
        let course = self.course(course_id).await?;
        Ok(self.history(learner, &course).await?.summary)
    }

    pub async fn status(&self, learner: &LearnerId, course_id: &CourseId) -> Result<EnrollmentStatusView> {
        let course = self.course(course_id).await?;
        let PairHistory {
            enrollment,
            summary,
            ..
        } = self.history(learner, &course).await?;

        Ok(EnrollmentStatusView {
            is_enrolled: enrollment.is_some(),
            enrollment_status: enrollment.map(|e| e.status),
            total_paid: summary.total_paid,
            remaining_amount: summary.remaining_balance,
            payment_progress: summary.payment_progress,
            next_due_date: summary.next_due_date,
            installment_info: InstallmentInfo {
                total_installments: summary.total_installments,
                paid_installments: summary.paid_installments,
                next_installment_amount: summary.next_installment_amount,
            },
        })
    }

    async fn course(&self, course_id: &CourseId) -> Result<Course> {
        bounded(self.timeout, "courses.get", self.courses.get(course_id))
            .await?
            .ok_or_else(|| EngineError::CourseNotFound(course_id.clone()))
    }
}
