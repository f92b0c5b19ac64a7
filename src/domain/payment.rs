use super::commission::CommissionSplit;
use super::course::{Course, CourseId, LearnerId, TutorId};
use super::money::{Amount, Balance};
use crate::error::EngineError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Gateway-issued reference; the idempotency key for confirmations.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct GatewayReference(String);

impl GatewayReference {
    pub fn new(reference: impl Into<String>) -> Self {
        Self(reference.into())
    }

    pub fn generate() -> Self {
        Self(format!("CP-{}", Uuid::new_v4().simple()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for GatewayReference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Serialize, Deserialize, PartialEq, Eq, Clone, Copy)]
#[serde(rename_all = "lowercase")]
pub enum PaymentStatus {
    Pending,
    Successful,
    Failed,
}

impl fmt::Display for PaymentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Pending => "pending",
            Self::Successful => "successful",
            Self::Failed => "failed",
        };
        f.write_str(s)
    }
}

/// Outcome reported by the gateway.
#[derive(Debug, Deserialize, Serialize, PartialEq, Eq, Clone, Copy)]
#[serde(rename_all = "lowercase")]
pub enum GatewayStatus {
    Success,
    Failed,
}

/// A verified confirmation as delivered by webhook or verification call.
#[derive(Debug, Deserialize, Serialize, PartialEq, Eq, Clone)]
pub struct GatewayConfirmation {
    pub reference: GatewayReference,
    pub status: GatewayStatus,
    pub amount: i64,
}

/// Input to payment initialization.
#[derive(Debug, Clone, PartialEq)]
pub struct PaymentRequest {
    pub course_id: CourseId,
    pub amount: i64,
    pub email: String,
    pub learner_id: Option<LearnerId>,
    pub reference: Option<GatewayReference>,
}

impl PaymentRequest {
    pub fn new(course_id: CourseId, amount: i64, email: impl Into<String>) -> Self {
        Self {
            course_id,
            amount,
            email: email.into(),
            learner_id: None,
            reference: None,
        }
    }

    pub fn for_learner(mut self, learner_id: LearnerId) -> Self {
        self.learner_id = Some(learner_id);
        self
    }

    pub fn with_reference(mut self, reference: GatewayReference) -> Self {
        self.reference = Some(reference);
        self
    }
}

/// One record per gateway attempt.
#[derive(Debug, Serialize, Deserialize, PartialEq, Clone)]
pub struct Payment {
    pub id: Uuid,
    pub reference: GatewayReference,
    pub learner_id: Option<LearnerId>,
    pub course_id: CourseId,
    pub tutor_id: TutorId,
    pub email: String,
    pub gross_amount: Amount,
    pub commission_amount: Balance,
    pub net_amount: Balance,
    pub currency: String,
    pub status: PaymentStatus,
    /// Set on scheduled installments; the sweeper compares it against now.
    pub due_date: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub processed_at: Option<DateTime<Utc>>,
    /// Set once the enrollment and earnings effects have been applied.
    pub reconciled_at: Option<DateTime<Utc>>,
}

impl Payment {
    pub fn pending(
        reference: GatewayReference,
        course: &Course,
        learner_id: Option<LearnerId>,
        email: impl Into<String>,
        gross_amount: Amount,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            reference,
            learner_id,
            course_id: course.id.clone(),
            tutor_id: course.tutor_id.clone(),
            email: email.into(),
            gross_amount,
            commission_amount: Balance::ZERO,
            net_amount: Balance::ZERO,
            currency: course.currency.clone(),
            status: PaymentStatus::Pending,
            due_date: None,
            created_at: now,
            processed_at: None,
            reconciled_at: None,
        }
    }

    /// The next scheduled installment after `previous` was paid.
    pub fn next_installment(
        previous: &Payment,
        amount: Amount,
        due_date: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            reference: GatewayReference::generate(),
            learner_id: previous.learner_id.clone(),
            course_id: previous.course_id.clone(),
            tutor_id: previous.tutor_id.clone(),
            email: previous.email.clone(),
            gross_amount: amount,
            commission_amount: Balance::ZERO,
            net_amount: Balance::ZERO,
            currency: previous.currency.clone(),
            status: PaymentStatus::Pending,
            due_date: Some(due_date),
            created_at: now,
            processed_at: None,
            reconciled_at: None,
        }
    }

    pub fn due_on(mut self, due_date: Option<DateTime<Utc>>) -> Self {
        self.due_date = due_date;
        self
    }

    pub fn is_guest(&self) -> bool {
        self.learner_id.is_none()
    }

    /// A pending scheduled installment whose due date has passed.
    pub fn is_overdue(&self, now: DateTime<Utc>) -> bool {
        self.status == PaymentStatus::Pending && self.due_date.is_some_and(|due| due < now)
    }

    /// `pending -> successful`, recording the commission split.
    pub fn succeed(&mut self, split: CommissionSplit, now: DateTime<Utc>) -> Result<(), EngineError> {
        self.ensure_pending(PaymentStatus::Successful)?;
        if split.gross != self.gross_amount {
            return Err(EngineError::Validation(format!(
                "Commission split for {} does not match payment gross {}",
                split.gross, self.gross_amount
            )));
        }
        self.commission_amount = split.commission;
        self.net_amount = split.net;
        self.status = PaymentStatus::Successful;
        self.processed_at = Some(now);
        Ok(())
    }

    /// `pending -> failed`.
    pub fn fail(&mut self, now: DateTime<Utc>) -> Result<(), EngineError> {
        self.ensure_pending(PaymentStatus::Failed)?;
        self.status = PaymentStatus::Failed;
        self.processed_at = Some(now);
        Ok(())
    }

    fn ensure_pending(&self, to: PaymentStatus) -> Result<(), EngineError> {
        if self.status == PaymentStatus::Pending {
            Ok(())
        } else {
            Err(EngineError::invalid_transition("payment", self.status, to))
        }
    }
}

/// When the most recent successful payment was processed.
pub fn last_settled_at(payments: &[Payment]) -> Option<DateTime<Utc>> {
    payments
        .iter()
        .filter(|p| p.status == PaymentStatus::Successful)
        .filter_map(|p| p.processed_at)
        .max()
}

/// The scheduled installment still waiting to be paid.
///
/// Only pending attempts with a due date qualify, and a successful payment
/// processed after an attempt was created supersedes it.
pub fn outstanding(payments: &[Payment]) -> Option<&Payment> {
    let settled = last_settled_at(payments);
    payments
        .iter()
        .filter(|p| p.status == PaymentStatus::Pending && p.due_date.is_some())
        .filter(|p| settled.is_none_or(|at| p.created_at >= at))
        .max_by_key(|p| p.created_at)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::commission::{self, CommissionRate};
    use chrono::Duration;

    fn payment(gross: i64) -> Payment {
        let course = Course::new(
            CourseId::new("c1"),
            TutorId::new("t1"),
            Amount::new(90_000).unwrap(),
            "NGN",
        );
        Payment::pending(
            GatewayReference::new("ref-1"),
            &course,
            Some(LearnerId::new("l1")),
            "learner@example.com",
            Amount::new(gross).unwrap(),
            Utc::now(),
        )
    }

    #[test]
    fn test_succeed_records_split() {
        let mut p = payment(50_000);
        let split = commission::split(50_000, CommissionRate::DEFAULT).unwrap();
        p.succeed(split, Utc::now()).unwrap();
        assert_eq!(p.status, PaymentStatus::Successful);
        assert_eq!(p.commission_amount + p.net_amount, Balance::from(p.gross_amount));
        assert!(p.processed_at.is_some());
    }

    #[test]
    fn test_status_never_regresses() {
        let mut p = payment(50_000);
        p.fail(Utc::now()).unwrap();
        let split = commission::split(50_000, CommissionRate::DEFAULT).unwrap();
        assert!(matches!(
            p.succeed(split, Utc::now()),
            Err(EngineError::InvalidStateTransition { .. })
        ));
        assert!(p.fail(Utc::now()).is_err());
    }

    #[test]
    fn test_split_must_match_gross() {
        let mut p = payment(50_000);
        let split = commission::split(40_000, CommissionRate::DEFAULT).unwrap();
        assert!(matches!(
            p.succeed(split, Utc::now()),
            Err(EngineError::Validation(_))
        ));
        assert_eq!(p.status, PaymentStatus::Pending);
    }

    #[test]
    fn test_overdue_requires_pending_and_past_due() {
        let now = Utc::now();
        let p = payment(30_000).due_on(Some(now - Duration::days(1)));
        assert!(p.is_overdue(now));
        assert!(!p.clone().due_on(Some(now + Duration::days(1))).is_overdue(now));
        assert!(!p.clone().due_on(None).is_overdue(now));

        let mut declined = p.clone();
        declined.fail(now).unwrap();
        assert!(!declined.is_overdue(now));

        let mut paid = p;
        paid.succeed(commission::split(30_000, CommissionRate::DEFAULT).unwrap(), now)
            .unwrap();
        assert!(!paid.is_overdue(now));
    }

    fn settled_at(gross: i64, at: DateTime<Utc>) -> Payment {
        let mut p = payment(gross);
        p.reference = GatewayReference::generate();
        p.created_at = at;
        p.succeed(commission::split(gross, CommissionRate::DEFAULT).unwrap(), at)
            .unwrap();
        p
    }

    #[test]
    fn test_outstanding_is_superseded_by_later_payment() {
        let start = Utc::now();
        let due = start + Duration::days(30);
        let first = settled_at(30_000, start);
        let scheduled = Payment::next_installment(
            &first,
            Amount::new(30_000).unwrap(),
            due,
            start + Duration::seconds(1),
        );
        let history = vec![first.clone(), scheduled.clone()];
        assert_eq!(
            outstanding(&history).map(|p| &p.reference),
            Some(&scheduled.reference)
        );

        // Paid later by another attempt: nothing is outstanding any more.
        let mut history = history;
        history.push(settled_at(30_000, start + Duration::seconds(2)));
        assert!(outstanding(&history).is_none());
        assert_eq!(last_settled_at(&history), Some(start + Duration::seconds(2)));
    }

    #[test]
    fn test_unscheduled_attempts_are_never_outstanding() {
        let p = payment(30_000);
        assert!(outstanding(std::slice::from_ref(&p)).is_none());
    }

    #[test]
    fn test_next_installment_inherits_pair() {
        let now = Utc::now();
        let first = payment(30_000);
        let next = Payment::next_installment(
            &first,
            Amount::new(30_000).unwrap(),
            now + Duration::days(30),
            now,
        );
        assert_eq!(next.learner_id, first.learner_id);
        assert_eq!(next.course_id, first.course_id);
        assert_eq!(next.status, PaymentStatus::Pending);
        assert_ne!(next.reference, first.reference);
        assert_eq!(next.due_date, Some(now + Duration::days(30)));
    }

    #[test]
    fn test_generated_references_are_unique() {
        let a = GatewayReference::generate();
        let b = GatewayReference::generate();
        assert_ne!(a, b);
        assert!(a.as_str().starts_with("CP-"));
    }
}
