//! Refunds.
//!
//! A refund reverses the whole money movement a transaction belongs to:
//! the provider reverses the charge, then compensating entries are appended
//! to the ledger. Nothing is written when the provider call fails.
//!
//! Each transaction group is claimed before the provider is called, so two
//! concurrent refunds of the same charge reverse it only once.

use super::activity::{emit_best_effort, Activity, ActivityEmitter};
use super::error::FundingError;
use super::model::{PaymentMethodType, Requester, Transaction, TransactionKind};
use super::provider::PaymentProvider;
use super::storage::{FundingStore, RefundCommit};
use crate::config::PaymentConfig;
use crate::error::{FundwayError, Result};
use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

/// Reverses recorded charges.
#[derive(Clone)]
pub struct RefundHandler {
    store: Arc<dyn FundingStore>,
    provider: Arc<dyn PaymentProvider>,
    activities: Arc<dyn ActivityEmitter>,
    config: PaymentConfig,
}

impl RefundHandler {
    pub fn new(
        store: Arc<dyn FundingStore>,
        provider: Arc<dyn PaymentProvider>,
        activities: Arc<dyn ActivityEmitter>,
        config: PaymentConfig,
    ) -> Self {
        Self {
            store,
            provider,
            activities,
            config,
        }
    }

    /// Refund the charge `transaction_id` belongs to. Root only.
    ///
    /// Returns the compensating entry for `transaction_id`. The order's
    /// status is left as is.
    pub async fn refund(
        &self,
        transaction_id: Uuid,
        requester: &Requester,
        now: DateTime<Utc>,
    ) -> Result<Transaction> {
        if !requester.is_root() {
            return Err(FundingError::NotPermitted {
                action: "refund transactions".to_string(),
            }
            .into());
        }

        let transaction = self
            .store
            .get_transaction(transaction_id)
            .await?
            .ok_or(FundingError::TransactionNotFound { transaction_id })?;
        if transaction.is_refund() {
            return Err(FundingError::RefundOfRefund { transaction_id }.into());
        }
        if self.store.find_refund_of(transaction_id).await?.is_some() {
            return Err(FundingError::AlreadyRefunded { transaction_id }.into());
        }

        if !self.store.claim_refund(transaction.group_id).await? {
            return Err(FundingError::RefundInProgress { transaction_id }.into());
        }
        let result = self.reverse_group(&transaction, now).await;
        if result.is_err()
            && let Err(e) = self.store.release_refund_claim(transaction.group_id).await
        {
            tracing::error!(
                target: "fundway::refunds",
                transaction_id = %transaction_id,
                group_id = %transaction.group_id,
                error = %e,
                "failed to release refund claim"
            );
        }
        result
    }

    /// Reverse the group `transaction` belongs to. The caller holds the
    /// group's refund claim.
    async fn reverse_group(
        &self,
        transaction: &Transaction,
        now: DateTime<Utc>,
    ) -> Result<Transaction> {
        let transaction_id = transaction.id;
        let group: Vec<Transaction> = self
            .store
            .list_order_transactions(transaction.order_id)
            .await?
            .into_iter()
            .filter(|t| t.group_id == transaction.group_id && !t.is_refund())
            .collect();
        let credit = group
            .iter()
            .find(|t| t.kind == TransactionKind::Credit)
            .unwrap_or(transaction)
            .clone();

        let payment_method = match credit.payment_method_id {
            Some(id) => Some(
                self.store
                    .get_payment_method(id)
                    .await?
                    .ok_or(FundingError::PaymentMethodNotFound {
                        payment_method_id: id,
                    })?,
            ),
            None => None,
        };

        let mut refund_reference = None;
        let mut prepaid_credit = None;
        if let Some(pm) = &payment_method {
            match pm.kind {
                PaymentMethodType::Manual => {}
                PaymentMethodType::Prepaid => prepaid_credit = Some((pm.id, credit.amount)),
                PaymentMethodType::CreditCard => {
                    let timeout = Duration::from_secs(self.config.provider_timeout_secs);
                    let refund =
                        match tokio::time::timeout(timeout, self.provider.refund(&credit, pm)).await
                        {
                            Ok(result) => result?,
                            Err(_) => {
                                return Err(FundingError::ProviderTimeout {
                                    seconds: self.config.provider_timeout_secs,
                                }
                                .into());
                            }
                        };
                    refund_reference = Some(refund.reference);
                }
            }
        }

        let group_id = Uuid::new_v4();
        let reversals: Vec<Transaction> = group
            .iter()
            .map(|entry| {
                let mut reversal = entry.reversal(group_id, now);
                if refund_reference.is_some() {
                    reversal.provider_reference = refund_reference.clone();
                }
                reversal
            })
            .collect();

        let commit = RefundCommit {
            transactions: reversals,
            prepaid_credit,
        };
        self.store.commit_refund(&commit).await?;

        let refunded = commit
            .transactions
            .into_iter()
            .find(|t| t.refund_of_transaction_id == Some(transaction_id))
            .ok_or_else(|| FundwayError::internal("refund entry missing from commit"))?;

        tracing::info!(
            target: "fundway::refunds",
            order_id = %transaction.order_id,
            transaction_id = %transaction_id,
            refund_transaction_id = %refunded.id,
            amount = credit.amount,
            currency = %credit.currency,
            "transaction refunded"
        );
        emit_best_effort(
            self.activities.as_ref(),
            Activity::OrderRefunded {
                order_id: transaction.order_id,
                transaction_id,
                refund_transaction_id: refunded.id,
            },
        )
        .await;

        Ok(refunded)
    }
}
