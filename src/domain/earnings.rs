use super::course::TutorId;
use super::money::{Amount, Balance};
use super::payment::{GatewayReference, Payment};
use crate::error::EngineError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

#[derive(Debug, Serialize, Deserialize, PartialEq, Eq, Clone, Copy)]
#[serde(rename_all = "snake_case")]
pub enum TransactionKind {
    CoursePurchase,
    Payout,
}

#[derive(Debug, Serialize, Deserialize, PartialEq, Eq, Clone, Copy)]
#[serde(rename_all = "lowercase")]
pub enum TransactionStatus {
    Pending,
    Completed,
    Rejected,
}

impl fmt::Display for TransactionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Pending => "pending",
            Self::Completed => "completed",
            Self::Rejected => "rejected",
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PayoutDecision {
    Approve,
    Reject { reason: String },
}

/// Tutor ledger entry. Balances are never stored; they are summed from these.
#[derive(Debug, Serialize, Deserialize, PartialEq, Clone)]
pub struct Transaction {
    pub id: Uuid,
    pub tutor_id: TutorId,
    pub kind: TransactionKind,
    pub amount: Amount,
    pub status: TransactionStatus,
    /// Originating payment for course purchases.
    pub reference: Option<GatewayReference>,
    pub note: Option<String>,
    pub created_at: DateTime<Utc>,
    pub processed_at: Option<DateTime<Utc>>,
}

impl Transaction {
    /// Id of the earning entry for a payment. Stable, so recording the same
    /// payment twice collides on the store's unique key.
    pub fn earning_id(reference: &GatewayReference) -> Uuid {
        Uuid::new_v5(&Uuid::NAMESPACE_OID, reference.as_str().as_bytes())
    }

    pub fn earning(payment: &Payment, net: Amount, now: DateTime<Utc>) -> Self {
        Self {
            id: Self::earning_id(&payment.reference),
            tutor_id: payment.tutor_id.clone(),
            kind: TransactionKind::CoursePurchase,
            amount: net,
            status: TransactionStatus::Completed,
            reference: Some(payment.reference.clone()),
            note: None,
            created_at: now,
            processed_at: Some(now),
        }
    }

    pub fn payout_request(tutor_id: TutorId, amount: Amount, now: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::new_v4(),
            tutor_id,
            kind: TransactionKind::Payout,
            amount,
            status: TransactionStatus::Pending,
            reference: None,
            note: None,
            created_at: now,
            processed_at: None,
        }
    }

    pub fn is_pending_payout(&self) -> bool {
        self.kind == TransactionKind::Payout && self.status == TransactionStatus::Pending
    }

    /// `pending -> completed | rejected`, exactly once.
    pub fn decide(&mut self, decision: &PayoutDecision, now: DateTime<Utc>) -> Result<(), EngineError> {
        let to = match decision {
            PayoutDecision::Approve => TransactionStatus::Completed,
            PayoutDecision::Reject { .. } => TransactionStatus::Rejected,
        };
        if !self.is_pending_payout() {
            return Err(EngineError::invalid_transition("payout", self.status, to));
        }
        if let PayoutDecision::Reject { reason } = decision {
            self.note = Some(reason.clone());
        }
        self.status = to;
        self.processed_at = Some(now);
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EarningsSummary {
    pub total_earnings: Balance,
    pub total_payouts: Balance,
    pub pending_payouts: Balance,
    pub available_balance: Balance,
}

impl EarningsSummary {
    pub fn derive(transactions: &[Transaction]) -> Self {
        let sum = |kind: TransactionKind, status: TransactionStatus| -> Balance {
            transactions
                .iter()
                .filter(|t| t.kind == kind && t.status == status)
                .map(|t| Balance::from(t.amount))
                .sum()
        };

        let total_earnings = sum(TransactionKind::CoursePurchase, TransactionStatus::Completed);
        let total_payouts = sum(TransactionKind::Payout, TransactionStatus::Completed);
        let pending_payouts = sum(TransactionKind::Payout, TransactionStatus::Pending);

        Self {
            total_earnings,
            total_payouts,
            pending_payouts,
            available_balance: (total_earnings - total_payouts).clamp_non_negative(),
        }
    }
}
