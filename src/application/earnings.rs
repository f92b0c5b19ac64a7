use super::{CAS_ATTEMPTS, bounded};
use crate::domain::course::TutorId;
use crate::domain::earnings::{EarningsSummary, PayoutDecision, Transaction, TransactionStatus};
use crate::domain::money::{Amount, Balance};
use crate::domain::payment::Payment;
use crate::domain::ports::TransactionStoreRef;
use crate::error::{EngineError, Result};
use chrono::Utc;
use std::time::Duration;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Tutor earnings and payout requests.
///
/// Balances are always derived from the stored transactions; nothing here
/// keeps a running total.
#[derive(Clone)]
pub struct EarningsLedger {
    transactions: TransactionStoreRef,
    minimum_payout: Amount,
    timeout: Duration,
}

impl EarningsLedger {
    pub fn new(transactions: TransactionStoreRef, minimum_payout: Amount, timeout: Duration) -> Self {
        Self {
            transactions,
            minimum_payout,
            timeout,
        }
    }

    /// Appends the payment's net amount to the tutor's ledger. Returns
    /// `false` when the payment was already recorded or carries no net
    /// amount.
    pub async fn record_earning(&self, payment: &Payment) -> Result<bool> {
        let Ok(net) = Amount::new(payment.net_amount.minor_units()) else {
            debug!(reference = %payment.reference, "no net amount to record");
            return Ok(false);
        };
        let entry = Transaction::earning(payment, net, Utc::now());
        match bounded(self.timeout, "transactions.insert", self.transactions.insert(entry)).await {
            Ok(()) => {
                info!(
                    tutor = %payment.tutor_id,
                    reference = %payment.reference,
                    net = %net,
                    "earning recorded"
                );
                Ok(true)
            }
            Err(EngineError::UniqueViolation(_)) => {
                debug!(reference = %payment.reference, "earning already recorded");
                Ok(false)
            }
            Err(e) => Err(e),
        }
    }

    pub async fn summary(&self, tutor: &TutorId) -> Result<EarningsSummary> {
        let ledger = self.ledger(tutor).await?;
        Ok(EarningsSummary::derive(&ledger))
    }

    pub async fn pending_payout(&self, tutor: &TutorId) -> Result<Option<Transaction>> {
        let ledger = self.ledger(tutor).await?;
        Ok(ledger.into_iter().find(Transaction::is_pending_payout))
    }

    /// Opens a payout request for admin approval.
    pub async fn request_payout(&self, tutor: &TutorId, amount: i64) -> Result<Transaction> {
        let amount = Amount::new(amount)?;
        if amount < self.minimum_payout {
            return Err(EngineError::BelowMinimumPayout {
                minimum: self.minimum_payout.minor_units(),
                requested: amount.minor_units(),
            });
        }

        let summary = self.summary(tutor).await?;
        if Balance::from(amount) > summary.available_balance {
            return Err(EngineError::InsufficientBalance {
                available: summary.available_balance.minor_units(),
                requested: amount.minor_units(),
            });
        }
        if summary.pending_payouts > Balance::ZERO {
            return Err(EngineError::PayoutAlreadyPending(tutor.clone()));
        }

        let request = Transaction::payout_request(tutor.clone(), amount, Utc::now());
        let inserted = bounded(
            self.timeout,
            "transactions.insert_payout_request",
            self.transactions.insert_payout_request(request.clone()),
        )
        .await?;
        if !inserted {
            return Err(EngineError::PayoutAlreadyPending(tutor.clone()));
        }

        info!(tutor = %tutor, id = %request.id, amount = %amount, "payout requested");
        Ok(request)
    }

    /// Approves or rejects a pending payout, exactly once.
    pub async fn process_payout(&self, id: Uuid, decision: &PayoutDecision) -> Result<Transaction> {
        for attempt in 1..=CAS_ATTEMPTS {
            let mut tx = bounded(self.timeout, "transactions.get", self.transactions.get(id))
                .await?
                .ok_or_else(|| EngineError::TransactionNotFound(id.to_string()))?;
            tx.decide(decision, Utc::now())?;

            let swapped = bounded(
                self.timeout,
                "transactions.compare_and_swap",
                self.transactions
                    .compare_and_swap(tx.clone(), TransactionStatus::Pending),
            )
            .await?;
            if swapped {
                info!(id = %id, tutor = %tx.tutor_id, status = %tx.status, "payout processed");
                return Ok(tx);
            }
            warn!(id = %id, attempt, "payout changed while processing");
        }
        Err(EngineError::StorageConflict(format!("payout {}", id)))
    }

    async fn ledger(&self, tutor: &TutorId) -> Result<Vec<Transaction>> {
        bounded(
            self.timeout,
            "transactions.for_tutor",
            self.transactions.for_tutor(tutor),
        )
        .await
    }
}
