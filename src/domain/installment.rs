//! Installment read model.
//!
//! Nothing here is stored: the schedule is recomputed from payment history
//! every time it is asked for.

use super::money::{Amount, Balance};
use super::payment::{self, Payment, PaymentStatus};
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InstallmentPolicy {
    pub total_installments: u32,
    /// Spacing between a paid installment and the due date of the next one.
    pub interval: Duration,
}

impl Default for InstallmentPolicy {
    fn default() -> Self {
        Self {
            total_installments: 3,
            interval: Duration::days(30),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InstallmentSummary {
    pub total_amount: Balance,
    pub total_paid: Balance,
    pub remaining_balance: Balance,
    pub is_complete: bool,
    pub total_installments: u32,
    pub paid_installments: u32,
    pub next_installment_amount: Balance,
    pub next_due_date: Option<DateTime<Utc>>,
    /// Percentage of the total paid, rounded, 0..=100.
    pub payment_progress: u8,
}

impl InstallmentSummary {
    /// Derives the schedule for one (learner, course) pair.
    ///
    /// `payments` is the full history for the pair, in any order.
    pub fn derive(total_amount: Amount, payments: &[Payment], policy: InstallmentPolicy) -> Self {
        let successful: Vec<&Payment> = payments
            .iter()
            .filter(|p| p.status == PaymentStatus::Successful)
            .collect();

        let total = Balance::from(total_amount);
        let total_paid: Balance = successful.iter().map(|p| Balance::from(p.gross_amount)).sum();
        let remaining_balance = (total - total_paid).clamp_non_negative();
        let is_complete = remaining_balance == Balance::ZERO;
        let paid_installments = u32::try_from(successful.len()).unwrap_or(u32::MAX);

        let next_installment_amount = if is_complete {
            Balance::ZERO
        } else {
            let left = policy
                .total_installments
                .saturating_sub(paid_installments)
                .max(1);
            Balance::new(ceil_div(remaining_balance.minor_units(), i64::from(left)))
        };

        let next_due_date = if is_complete {
            None
        } else {
            payment::outstanding(payments).and_then(|p| p.due_date)
        };

        Self {
            total_amount: total,
            total_paid,
            remaining_balance,
            is_complete,
            total_installments: policy.total_installments,
            paid_installments,
            next_installment_amount,
            next_due_date,
            payment_progress: progress(total_paid, total),
        }
    }
}

fn ceil_div(numerator: i64, denominator: i64) -> i64 {
    (numerator + denominator - 1) / denominator
}

fn progress(paid: Balance, total: Balance) -> u8 {
    if total.minor_units() <= 0 {
        return 100;
    }
    let pct = (paid.minor_units() as f64 / total.minor_units() as f64 * 100.0).round();
    pct.clamp(0.0, 100.0) as u8
}
