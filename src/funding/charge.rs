//! Charge execution shared by order creation, manual reconciliation and
//! subscription renewal.
//!
//! A charge either commits everything it produces (transactions, order
//! status, subscription schedule, contributor role, prepaid debit) in one
//! store call, or commits nothing. A provider charge that cannot be recorded
//! is voided.
//!
//! # Tracing Events
//!
//! - `fundway::orders` `charge succeeded` / `charge failed`
//! - `fundway::orders` `failed to void unrecorded charge` - needs manual reconciliation

use super::activity::{emit_best_effort, Activity, ActivityEmitter};
use super::calendar::{BillingCalendar, BillingContext};
use super::error::FundingError;
use super::input::MAX_AMOUNT;
use super::model::{
    MemberRole, Membership, Order, OrderStatus, PaymentMethod, PaymentMethodType, Subscription,
    Transaction, TransactionKind,
};
use super::provider::{ChargeRequest, PaymentProvider};
use super::storage::{ChargeCommit, FundingStore, SubscriptionWrite};
use crate::config::PaymentConfig;
use crate::error::Result;
use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

/// Whether a charge opens an order or renews its subscription.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChargeKind {
    Initial,
    Renewal,
}

/// What a successful charge committed.
#[derive(Debug, Clone)]
pub struct ChargeOutcome {
    pub order: Order,
    pub subscription: Option<Subscription>,
    pub transactions: Vec<Transaction>,
}

/// Fees taken from a charge.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Fees {
    pub platform: i64,
    pub host: i64,
    pub processor: i64,
}

impl Fees {
    fn total(&self) -> i64 {
        self.platform + self.host + self.processor
    }
}

fn percent_of(amount: i64, percent: u32) -> Result<i64> {
    amount
        .checked_mul(i64::from(percent))
        .map(|scaled| scaled / 100)
        .ok_or_else(|| {
            FundingError::InvalidAmount {
                reason: "amount is too large".to_string(),
            }
            .into()
        })
}

/// Runs charges against payment instruments.
#[derive(Clone)]
pub struct ChargeProcessor {
    store: Arc<dyn FundingStore>,
    provider: Arc<dyn PaymentProvider>,
    calendar: Arc<dyn BillingCalendar>,
    activities: Arc<dyn ActivityEmitter>,
    config: PaymentConfig,
}

impl ChargeProcessor {
    pub fn new(
        store: Arc<dyn FundingStore>,
        provider: Arc<dyn PaymentProvider>,
        calendar: Arc<dyn BillingCalendar>,
        activities: Arc<dyn ActivityEmitter>,
        config: PaymentConfig,
    ) -> Self {
        Self {
            store,
            provider,
            calendar,
            activities,
            config,
        }
    }

    pub(crate) fn activities(&self) -> &dyn ActivityEmitter {
        self.activities.as_ref()
    }

    /// Run the initial charge of a persisted `PENDING` order.
    ///
    /// Claims the order's charge lock first, so at most one initial charge
    /// is ever attempted per order. On failure the order is marked `ERROR`,
    /// reserved tier stock is released and the original error is returned.
    pub async fn charge_pending_order(
        &self,
        order: Order,
        method: &PaymentMethod,
        now: DateTime<Utc>,
    ) -> Result<ChargeOutcome> {
        if !self.store.lock_order_for_charge(order.id).await? {
            let err = match order.status {
                OrderStatus::Pending => FundingError::ConcurrentModification {
                    entity: format!("order {}", order.id),
                },
                status => FundingError::OrderNotPending {
                    order_id: order.id,
                    status,
                },
            };
            return Err(err.into());
        }

        let dormant = match order.subscription_id {
            Some(id) => self.store.get_subscription(id).await?,
            None => None,
        };

        let order_id = order.id;
        let tier = order.tier_id.map(|id| (id, order.quantity));
        match self.charge(order, method, dormant, ChargeKind::Initial, now).await {
            Ok(outcome) => Ok(outcome),
            Err(e) => {
                self.mark_failed(order_id, &e.to_string(), now).await;
                if let Some((tier_id, quantity)) = tier
                    && let Err(release_err) = self.store.release_tier_stock(tier_id, quantity).await
                {
                    tracing::error!(
                        target: "fundway::orders",
                        order_id = %order_id,
                        tier_id = %tier_id,
                        error = %release_err,
                        "failed to release tier stock"
                    );
                }
                Err(e)
            }
        }
    }

    /// Mark an unprocessed order `ERROR`. Errors are logged, not returned,
    /// so the charge error reaches the caller unchanged.
    async fn mark_failed(&self, order_id: Uuid, reason: &str, now: DateTime<Utc>) {
        let result: Result<()> = async {
            let Some(mut order) = self.store.get_order(order_id).await? else {
                return Ok(());
            };
            if order.is_processed() || !order.status.can_transition_to(OrderStatus::Error) {
                return Ok(());
            }
            order.transition_to(OrderStatus::Error, now)?;
            self.store.save_order(&order).await
        }
        .await;

        if let Err(e) = result {
            tracing::error!(
                target: "fundway::orders",
                order_id = %order_id,
                error = %e,
                "failed to mark order as errored"
            );
        }

        emit_best_effort(
            self.activities.as_ref(),
            Activity::PaymentFailed {
                order_id,
                reason: reason.to_string(),
                retry_count: 0,
            },
        )
        .await;
    }

    /// Charge `method` for `order` and commit the result.
    ///
    /// `subscription` is the order's dormant subscription for an initial
    /// charge, or the locked subscription for a renewal.
    pub async fn charge(
        &self,
        mut order: Order,
        method: &PaymentMethod,
        subscription: Option<Subscription>,
        kind: ChargeKind,
        now: DateTime<Utc>,
    ) -> Result<ChargeOutcome> {
        let amount = match (kind, &subscription) {
            (ChargeKind::Renewal, Some(sub)) => sub.amount,
            _ => order.total_amount,
        };
        if amount <= 0 {
            return Err(FundingError::InvalidAmount {
                reason: "charge amount must be positive".to_string(),
            }
            .into());
        }
        if amount > MAX_AMOUNT {
            return Err(FundingError::InvalidAmount {
                reason: format!("charge amount cannot exceed {MAX_AMOUNT}"),
            }
            .into());
        }

        let destination = self
            .store
            .get_account(order.to_account_id)
            .await?
            .ok_or(FundingError::AccountNotFound {
                account_id: order.to_account_id,
            })?;

        let mut fees = Fees {
            platform: percent_of(
                amount,
                order
                    .platform_fee_percent
                    .unwrap_or(self.config.platform_fee_percent),
            )?,
            host: match destination.host_id {
                Some(_) => percent_of(
                    amount,
                    order
                        .host_fee_percent
                        .or(destination.host_fee_percent)
                        .unwrap_or(0),
                )?,
                None => 0,
            },
            processor: 0,
        };

        let mut prepaid_debit = None;
        let mut provider_reference = None;
        match method.kind {
            PaymentMethodType::Manual => {}
            PaymentMethodType::Prepaid => {
                if method.is_expired(now) {
                    return Err(FundingError::PaymentMethodExpired.into());
                }
                if !method.currency.eq_ignore_ascii_case(&order.currency) {
                    return Err(FundingError::CurrencyMismatch {
                        expected: method.currency.clone(),
                        actual: order.currency.clone(),
                    }
                    .into());
                }
                let available = method.balance.unwrap_or(0);
                if available < amount {
                    return Err(FundingError::InsufficientBalance {
                        available,
                        required: amount,
                    }
                    .into());
                }
                prepaid_debit = Some((method.id, amount));
            }
            PaymentMethodType::CreditCard => {
                if method.is_expired(now) {
                    return Err(FundingError::PaymentMethodExpired.into());
                }
                let request = ChargeRequest {
                    order_id: order.id,
                    amount,
                    currency: order.currency.clone(),
                    description: order.description.clone(),
                    payment_method: method.clone(),
                    platform_fee: fees.platform,
                    host_fee: fees.host,
                };
                let timeout = Duration::from_secs(self.config.provider_timeout_secs);
                let charge = match tokio::time::timeout(timeout, self.provider.charge(&request)).await
                {
                    Ok(result) => result?,
                    Err(_) => {
                        return Err(FundingError::ProviderTimeout {
                            seconds: self.config.provider_timeout_secs,
                        }
                        .into());
                    }
                };
                fees.processor = charge.processor_fee;
                provider_reference = Some(charge.reference);
            }
        }

        let group_id = Uuid::new_v4();
        let payment_method_id = (!method.is_synthetic()).then_some(method.id);
        let credit = Transaction {
            id: Uuid::new_v4(),
            group_id,
            kind: TransactionKind::Credit,
            order_id: order.id,
            account_id: order.to_account_id,
            counterparty_account_id: order.from_account_id,
            amount,
            net_amount: amount - fees.total(),
            currency: order.currency.clone(),
            platform_fee: fees.platform,
            host_fee: fees.host,
            processor_fee: fees.processor,
            payment_method_id,
            provider_reference: provider_reference.clone(),
            refund_of_transaction_id: None,
            description: order.description.clone(),
            created_at: now,
        };
        let debit = Transaction {
            id: Uuid::new_v4(),
            kind: TransactionKind::Debit,
            account_id: order.from_account_id,
            counterparty_account_id: order.to_account_id,
            amount: -credit.amount,
            net_amount: -credit.net_amount,
            platform_fee: -fees.platform,
            host_fee: -fees.host,
            processor_fee: -fees.processor,
            ..credit.clone()
        };

        let mut activated = false;
        let subscription_write = match (kind, subscription, order.interval) {
            (ChargeKind::Initial, existing, Some(interval)) => {
                let (mut sub, expected) = match existing {
                    Some(sub) => {
                        let expected = sub.version;
                        (sub.next_version(now), Some(expected))
                    }
                    None => (
                        Subscription::dormant(amount, &order.currency, interval, now),
                        None,
                    ),
                };
                sub.amount = amount;
                sub.is_active = true;
                sub.activated_at = Some(now);
                sub.charge_in_progress = false;
                self.calendar
                    .schedule(BillingContext::New, &sub, now)
                    .apply(&mut sub);
                order.subscription_id = Some(sub.id);
                activated = true;
                Some(match expected {
                    Some(version) => SubscriptionWrite::update(sub, version),
                    None => SubscriptionWrite::insert(sub),
                })
            }
            (ChargeKind::Renewal, Some(sub), _) => {
                let expected = sub.version;
                let mut sub = sub.next_version(now);
                self.calendar
                    .schedule(BillingContext::Success, &sub, now)
                    .apply(&mut sub);
                sub.charge_in_progress = false;
                Some(SubscriptionWrite::update(sub, expected))
            }
            _ => None,
        };

        let next_status = match kind {
            ChargeKind::Initial if order.is_recurring() => Some(OrderStatus::Active),
            ChargeKind::Initial => Some(OrderStatus::Paid),
            ChargeKind::Renewal if order.status == OrderStatus::Pending => {
                Some(OrderStatus::Active)
            }
            ChargeKind::Renewal => None,
        };
        if let Some(status) = next_status {
            order.transition_to(status, now)?;
        }
        order.mark_processed(now);
        order.updated_at = now;
        if payment_method_id.is_some() {
            order.payment_method_id = payment_method_id;
        }

        let memberships = match kind {
            ChargeKind::Initial => vec![
                Membership::new(order.from_account_id, order.to_account_id, MemberRole::Contributor)
                    .with_tier(order.tier_id),
            ],
            ChargeKind::Renewal => Vec::new(),
        };

        let commit = ChargeCommit {
            order: order.clone(),
            subscription: subscription_write.clone(),
            transactions: vec![credit, debit],
            memberships,
            prepaid_debit,
        };

        if let Err(e) = self.store.commit_charge(&commit).await {
            if let Some(reference) = &provider_reference
                && let Err(void_err) = self.provider.void(reference).await
            {
                tracing::error!(
                    target: "fundway::orders",
                    order_id = %order.id,
                    provider_reference = %reference,
                    error = %void_err,
                    "failed to void unrecorded charge"
                );
            }
            return Err(e);
        }

        tracing::info!(
            target: "fundway::orders",
            order_id = %order.id,
            amount = amount,
            currency = %order.currency,
            payment_method = method.kind.as_str(),
            renewal = kind == ChargeKind::Renewal,
            "charge succeeded"
        );

        let subscription = subscription_write.map(|w| w.subscription);
        if kind == ChargeKind::Initial {
            emit_best_effort(
                self.activities.as_ref(),
                Activity::OrderProcessed {
                    order_id: order.id,
                    amount,
                    currency: order.currency.clone(),
                },
            )
            .await;
        }
        if activated && let Some(sub) = &subscription {
            emit_best_effort(
                self.activities.as_ref(),
                Activity::SubscriptionActivated {
                    order_id: order.id,
                    subscription_id: sub.id,
                },
            )
            .await;
        }

        Ok(ChargeOutcome {
            order,
            subscription,
            transactions: commit.transactions,
        })
    }
}
