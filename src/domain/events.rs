//! Domain events handed to the notification dispatcher.
//!
//! Events carry identifiers and amounts only; contact details stay on the
//! entities and are resolved by the dispatcher.

use super::course::{CourseId, LearnerId, TutorId};
use super::enrollment::{Enrollment, PaymentPlan};
use super::earnings::{Transaction, TransactionStatus};
use super::money::{Amount, Balance};
use super::payment::{GatewayReference, Payment};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum DomainEvent {
    #[serde(rename = "payment.succeeded")]
    PaymentSucceeded {
        payment_id: Uuid,
        reference: GatewayReference,
        learner_id: Option<LearnerId>,
        course_id: CourseId,
        tutor_id: TutorId,
        gross_amount: Amount,
        commission_amount: Balance,
        net_amount: Balance,
        currency: String,
    },
    #[serde(rename = "enrollment.created")]
    EnrollmentCreated {
        learner_id: LearnerId,
        course_id: CourseId,
        tutor_id: TutorId,
        amount_paid: Balance,
        total_amount: Amount,
        payment_plan: PaymentPlan,
    },
    #[serde(rename = "enrollment.suspended")]
    EnrollmentSuspended {
        learner_id: LearnerId,
        course_id: CourseId,
        reason: String,
        due_date: Option<DateTime<Utc>>,
    },
    #[serde(rename = "enrollment.reactivated")]
    EnrollmentReactivated {
        learner_id: LearnerId,
        course_id: CourseId,
        amount_paid: Balance,
    },
    #[serde(rename = "payout.requested")]
    PayoutRequested {
        transaction_id: Uuid,
        tutor_id: TutorId,
        amount: Amount,
    },
    #[serde(rename = "payout.processed")]
    PayoutProcessed {
        transaction_id: Uuid,
        tutor_id: TutorId,
        amount: Amount,
        status: TransactionStatus,
    },
}

impl DomainEvent {
    pub fn payment_succeeded(payment: &Payment) -> Self {
        Self::PaymentSucceeded {
            payment_id: payment.id,
            reference: payment.reference.clone(),
            learner_id: payment.learner_id.clone(),
            course_id: payment.course_id.clone(),
            tutor_id: payment.tutor_id.clone(),
            gross_amount: payment.gross_amount,
            commission_amount: payment.commission_amount,
            net_amount: payment.net_amount,
            currency: payment.currency.clone(),
        }
    }

    pub fn enrollment_created(enrollment: &Enrollment) -> Self {
        Self::EnrollmentCreated {
            learner_id: enrollment.learner_id.clone(),
            course_id: enrollment.course_id.clone(),
            tutor_id: enrollment.tutor_id.clone(),
            amount_paid: enrollment.amount_paid,
            total_amount: enrollment.total_amount,
            payment_plan: enrollment.payment_plan,
        }
    }

    pub fn enrollment_suspended(enrollment: &Enrollment, due_date: Option<DateTime<Utc>>) -> Self {
        Self::EnrollmentSuspended {
            learner_id: enrollment.learner_id.clone(),
            course_id: enrollment.course_id.clone(),
            reason: enrollment.suspension_reason.clone().unwrap_or_default(),
            due_date,
        }
    }

    pub fn enrollment_reactivated(enrollment: &Enrollment) -> Self {
        Self::EnrollmentReactivated {
            learner_id: enrollment.learner_id.clone(),
            course_id: enrollment.course_id.clone(),
            amount_paid: enrollment.amount_paid,
        }
    }

    pub fn payout_requested(tx: &Transaction) -> Self {
        Self::PayoutRequested {
            transaction_id: tx.id,
            tutor_id: tx.tutor_id.clone(),
            amount: tx.amount,
        }
    }

    pub fn payout_processed(tx: &Transaction) -> Self {
        Self::PayoutProcessed {
            transaction_id: tx.id,
            tutor_id: tx.tutor_id.clone(),
            amount: tx.amount,
            status: tx.status,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::PaymentSucceeded { .. } => "payment.succeeded",
            Self::EnrollmentCreated { .. } => "enrollment.created",
            Self::EnrollmentSuspended { .. } => "enrollment.suspended",
            Self::EnrollmentReactivated { .. } => "enrollment.reactivated",
            Self::PayoutRequested { .. } => "payout.requested",
            Self::PayoutProcessed { .. } => "payout.processed",
        }
    }

    /// Who should hear about this event. `admin` is the configured admin
    /// recipient.
    pub fn recipients(&self, admin: &str) -> Vec<Recipient> {
        match self {
            Self::PaymentSucceeded {
                learner_id,
                tutor_id,
                ..
            } => {
                let mut to = vec![Recipient::Tutor(tutor_id.clone())];
                if let Some(learner) = learner_id {
                    to.push(Recipient::Learner(learner.clone()));
                }
                to
            }
            Self::EnrollmentCreated {
                learner_id,
                tutor_id,
                ..
            } => vec![
                Recipient::Learner(learner_id.clone()),
                Recipient::Tutor(tutor_id.clone()),
            ],
            Self::EnrollmentSuspended { learner_id, .. }
            | Self::EnrollmentReactivated { learner_id, .. } => {
                vec![Recipient::Learner(learner_id.clone())]
            }
            Self::PayoutRequested { .. } => vec![Recipient::Admin(admin.to_string())],
            Self::PayoutProcessed { tutor_id, .. } => vec![Recipient::Tutor(tutor_id.clone())],
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "id", rename_all = "lowercase")]
pub enum Recipient {
    Learner(LearnerId),
    Tutor(TutorId),
    Admin(String),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventEnvelope {
    pub id: Uuid,
    pub occurred_at: DateTime<Utc>,
    pub recipients: Vec<Recipient>,
    pub event: DomainEvent,
}

impl EventEnvelope {
    pub fn new(event: DomainEvent, admin: &str, now: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::new_v4(),
            occurred_at: now,
            recipients: event.recipients(admin),
            event,
        }
    }
}
