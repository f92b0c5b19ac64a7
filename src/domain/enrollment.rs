use super::course::{CourseId, LearnerId, TutorId};
use super::money::{Amount, Balance};
use super::payment::{GatewayReference, Payment};
use crate::error::EngineError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;

pub const OVERDUE_REASON: &str = "overdue payment";

#[derive(Debug, Serialize, Deserialize, PartialEq, Eq, Clone, Copy)]
#[serde(rename_all = "lowercase")]
pub enum EnrollmentStatus {
    Active,
    Suspended,
    Cancelled,
}

impl fmt::Display for EnrollmentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Active => "active",
            Self::Suspended => "suspended",
            Self::Cancelled => "cancelled",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Serialize, Deserialize, PartialEq, Eq, Clone, Copy)]
#[serde(rename_all = "lowercase")]
pub enum PaymentPlan {
    Full,
    Installment,
}

impl fmt::Display for PaymentPlan {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Full => "full",
            Self::Installment => "installment",
        })
    }
}

/// Outcome of applying a successful payment to an existing enrollment.
#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub enum PaymentApplication {
    Applied { reactivated: bool },
    AlreadyApplied,
}

/// A learner's access to a course. Exactly one exists per (learner, course).
#[derive(Debug, Serialize, Deserialize, PartialEq, Clone)]
pub struct Enrollment {
    pub learner_id: LearnerId,
    pub course_id: CourseId,
    pub tutor_id: TutorId,
    pub status: EnrollmentStatus,
    pub amount_paid: Balance,
    /// Course price at enrollment time.
    pub total_amount: Amount,
    pub payment_plan: PaymentPlan,
    pub suspended_at: Option<DateTime<Utc>>,
    pub suspension_reason: Option<String>,
    pub enrolled_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    /// Bumped by the store on every successful compare-and-swap.
    #[serde(default)]
    pub revision: u64,
    #[serde(default)]
    pub applied_payments: BTreeSet<GatewayReference>,
}

impl Enrollment {
    /// Opens an enrollment from the first successful payment for the pair.
    pub fn open(
        learner_id: LearnerId,
        payment: &Payment,
        total_amount: Amount,
        now: DateTime<Utc>,
    ) -> Self {
        let amount_paid = Balance::from(payment.gross_amount);
        let payment_plan = if amount_paid >= Balance::from(total_amount) {
            PaymentPlan::Full
        } else {
            PaymentPlan::Installment
        };
        Self {
            learner_id,
            course_id: payment.course_id.clone(),
            tutor_id: payment.tutor_id.clone(),
            status: EnrollmentStatus::Active,
            amount_paid,
            total_amount,
            payment_plan,
            suspended_at: None,
            suspension_reason: None,
            enrolled_at: now,
            updated_at: now,
            revision: 0,
            applied_payments: BTreeSet::from([payment.reference.clone()]),
        }
    }

    pub fn remaining(&self) -> Balance {
        (Balance::from(self.total_amount) - self.amount_paid).clamp_non_negative()
    }

    pub fn is_complete(&self) -> bool {
        self.remaining() == Balance::ZERO
    }

    pub fn is_suspended_for_overdue(&self) -> bool {
        self.status == EnrollmentStatus::Suspended
            && self.suspension_reason.as_deref() == Some(OVERDUE_REASON)
    }

    /// Adds a successful payment to the running total. A suspended enrollment
    /// is reactivated; a cancelled one accrues the amount but stays cancelled.
    pub fn apply_payment(&mut self, payment: &Payment, now: DateTime<Utc>) -> PaymentApplication {
        if !self.applied_payments.insert(payment.reference.clone()) {
            return PaymentApplication::AlreadyApplied;
        }
        self.amount_paid += Balance::from(payment.gross_amount);
        self.updated_at = now;

        let reactivated = self.status == EnrollmentStatus::Suspended;
        if reactivated {
            self.clear_suspension();
        }
        PaymentApplication::Applied { reactivated }
    }

    pub fn suspend(&mut self, reason: &str, now: DateTime<Utc>) -> Result<(), EngineError> {
        if self.status != EnrollmentStatus::Active {
            return Err(EngineError::invalid_transition(
                "enrollment",
                self.status,
                EnrollmentStatus::Suspended,
            ));
        }
        self.status = EnrollmentStatus::Suspended;
        self.suspension_reason = Some(reason.to_string());
        self.suspended_at = Some(now);
        self.updated_at = now;
        Ok(())
    }

    pub fn reactivate(&mut self, now: DateTime<Utc>) -> Result<(), EngineError> {
        if self.status != EnrollmentStatus::Suspended {
            return Err(EngineError::invalid_transition(
                "enrollment",
                self.status,
                EnrollmentStatus::Active,
            ));
        }
        self.clear_suspension();
        self.updated_at = now;
        Ok(())
    }

    pub fn cancel(&mut self, now: DateTime<Utc>) -> Result<(), EngineError> {
        if self.status == EnrollmentStatus::Cancelled {
            return Err(EngineError::invalid_transition(
                "enrollment",
                self.status,
                EnrollmentStatus::Cancelled,
            ));
        }
        self.status = EnrollmentStatus::Cancelled;
        self.updated_at = now;
        Ok(())
    }

    fn clear_suspension(&mut self) {
        self.status = EnrollmentStatus::Active;
        self.suspension_reason = None;
        self.suspended_at = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::course::Course;

    fn payment(reference: &str, gross: i64) -> Payment {
        let course = Course::new(
            CourseId::new("c1"),
            TutorId::new("t1"),
            Amount::new(90_000).unwrap(),
            "NGN",
        );
        Payment::pending(
            GatewayReference::new(reference),
            &course,
            Some(LearnerId::new("l1")),
            "l1@example.com",
            Amount::new(gross).unwrap(),
            Utc::now(),
        )
    }

    fn open(gross: i64) -> Enrollment {
        Enrollment::open(
            LearnerId::new("l1"),
            &payment("ref-1", gross),
            Amount::new(90_000).unwrap(),
            Utc::now(),
        )
    }

    #[test]
    fn test_plan_inferred_from_first_payment() {
        assert_eq!(open(90_000).payment_plan, PaymentPlan::Full);
        assert_eq!(open(30_000).payment_plan, PaymentPlan::Installment);
        assert!(open(90_000).is_complete());
        assert_eq!(open(30_000).remaining(), Balance::new(60_000));
    }

    #[test]
    fn test_apply_payment_once_per_reference() {
        let mut e = open(30_000);
        let second = payment("ref-2", 30_000);
        assert_eq!(
            e.apply_payment(&second, Utc::now()),
            PaymentApplication::Applied { reactivated: false }
        );
        assert_eq!(
            e.apply_payment(&second, Utc::now()),
            PaymentApplication::AlreadyApplied
        );
        assert_eq!(e.amount_paid, Balance::new(60_000));
    }

    #[test]
    fn test_payment_reactivates_suspended() {
        let mut e = open(30_000);
        e.suspend(OVERDUE_REASON, Utc::now()).unwrap();
        assert!(e.is_suspended_for_overdue());

        let outcome = e.apply_payment(&payment("ref-2", 30_000), Utc::now());
        assert_eq!(outcome, PaymentApplication::Applied { reactivated: true });
        assert_eq!(e.status, EnrollmentStatus::Active);
        assert!(e.suspension_reason.is_none());
        assert!(e.suspended_at.is_none());
    }

    #[test]
    fn test_invalid_transitions() {
        let mut e = open(30_000);
        assert!(matches!(
            e.reactivate(Utc::now()),
            Err(EngineError::InvalidStateTransition { .. })
        ));
        e.suspend(OVERDUE_REASON, Utc::now()).unwrap();
        assert!(e.suspend(OVERDUE_REASON, Utc::now()).is_err());
        e.cancel(Utc::now()).unwrap();
        assert!(e.cancel(Utc::now()).is_err());
        assert!(e.suspend(OVERDUE_REASON, Utc::now()).is_err());
    }

    #[test]
    fn test_cancelled_enrollment_accrues_without_reopening() {
        let mut e = open(30_000);
        e.cancel(Utc::now()).unwrap();
        let outcome = e.apply_payment(&payment("ref-2", 30_000), Utc::now());
        assert_eq!(outcome, PaymentApplication::Applied { reactivated: false });
        assert_eq!(e.status, EnrollmentStatus::Cancelled);
        assert_eq!(e.amount_paid, Balance::new(60_000));
    }
}
