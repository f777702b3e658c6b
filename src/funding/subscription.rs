//! Subscription lifecycle: cancellation, payment method and amount updates,
//! and the renewal/retry contract used by the external billing driver.
//!
//! Every write goes through the subscription's version check. A renewal
//! claims the subscription by setting `charge_in_progress`; updates refuse
//! to run while that flag is set, and a cancellation that wins the race
//! makes the renewal's commit fail (the provider charge is then voided).
//!
//! # Tracing Events
//!
//! - `fundway::subscriptions` `subscription cancelled`
//! - `fundway::subscriptions` `subscription amount changed`
//! - `fundway::subscriptions` `renewal charge failed, retry scheduled`
//! - `fundway::subscriptions` `subscription deactivated after failed charges`

use super::access::is_root_or_admin_of;
use super::activity::{emit_best_effort, Activity, ActivityEmitter};
use super::calendar::{BillingCalendar, BillingContext};
use super::charge::{ChargeKind, ChargeOutcome, ChargeProcessor};
use super::error::FundingError;
use super::input::{PaymentMethodInput, UpdateSubscriptionInput};
use super::model::{Order, OrderStatus, PaymentMethod, Requester, Subscription, User};
use super::payment_method::{PaymentMethodResolver, PaymentRef, ResolvedPayment};
use super::storage::{FundingStore, SubscriptionReplacement};
use crate::config::SubscriptionConfig;
use crate::error::{FundwayError, Result};
use chrono::{DateTime, Utc};
use std::sync::Arc;
use uuid::Uuid;
use validator::Validate;

/// Result of one renewal attempt.
#[derive(Debug, Clone, PartialEq)]
pub enum RenewalOutcome {
    /// The charge went through and the period advanced.
    Charged(Order),
    /// The charge failed; another attempt is scheduled.
    Retrying {
        retry_count: u32,
        next_charge_date: Option<DateTime<Utc>>,
    },
    /// The charge failed too many times; the subscription is inactive and
    /// its order is `ERROR`.
    Deactivated,
}

/// Totals of one `process_due` pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RenewalReport {
    pub charged: usize,
    pub retrying: usize,
    pub deactivated: usize,
    /// Subscriptions that could not be attempted (claimed elsewhere,
    /// orphaned, store errors).
    pub skipped: usize,
}

/// Drives subscriptions through their lifecycle.
#[derive(Clone)]
pub struct SubscriptionScheduler {
    store: Arc<dyn FundingStore>,
    resolver: PaymentMethodResolver,
    charges: ChargeProcessor,
    calendar: Arc<dyn BillingCalendar>,
    activities: Arc<dyn ActivityEmitter>,
    config: SubscriptionConfig,
}

impl SubscriptionScheduler {
    pub fn new(
        store: Arc<dyn FundingStore>,
        resolver: PaymentMethodResolver,
        charges: ChargeProcessor,
        calendar: Arc<dyn BillingCalendar>,
        activities: Arc<dyn ActivityEmitter>,
        config: SubscriptionConfig,
    ) -> Self {
        Self {
            store,
            resolver,
            charges,
            calendar,
            activities,
            config,
        }
    }

    /// Load an order, its subscription, and check the requester administers
    /// the paying account.
    async fn load_for_update(
        &self,
        order_id: Uuid,
        requester: &Requester,
        action: &str,
    ) -> Result<(User, Order, Subscription)> {
        let user = requester
            .user
            .clone()
            .ok_or_else(|| FundingError::AuthenticationRequired {
                action: action.to_string(),
            })?;
        let order = self
            .store
            .get_order(order_id)
            .await?
            .ok_or(FundingError::OrderNotFound { order_id })?;
        if !is_root_or_admin_of(self.store.as_ref(), &user, order.from_account_id).await? {
            return Err(FundingError::NotPermitted {
                action: action.to_string(),
            }
            .into());
        }
        let subscription_id = order
            .subscription_id
            .ok_or(FundingError::NoSubscription { order_id })?;
        let subscription = self
            .store
            .get_subscription(subscription_id)
            .await?
            .ok_or(FundingError::SubscriptionNotFound { subscription_id })?;
        Ok((user, order, subscription))
    }

    /// Cancel the subscription behind `order_id`.
    pub async fn cancel(
        &self,
        order_id: Uuid,
        requester: &Requester,
        now: DateTime<Utc>,
    ) -> Result<Order> {
        let (_, mut order, subscription) = self
            .load_for_update(order_id, requester, "cancel this subscription")
            .await?;
        if order.status == OrderStatus::Cancelled || subscription.is_cancelled() {
            return Err(FundingError::AlreadyCancelled {
                subscription_id: subscription.id,
            }
            .into());
        }

        let expected = subscription.version;
        let mut next = subscription.next_version(now);
        next.deactivate(now);
        order.transition_to(OrderStatus::Cancelled, now)?;

        if !self
            .store
            .save_order_and_subscription(&order, &next, expected)
            .await?
        {
            return Err(FundingError::ConcurrentModification {
                entity: format!("subscription {}", next.id),
            }
            .into());
        }

        tracing::info!(
            target: "fundway::subscriptions",
            order_id = %order.id,
            subscription_id = %next.id,
            "subscription cancelled"
        );
        emit_best_effort(
            self.activities.as_ref(),
            Activity::SubscriptionCanceled {
                order_id: order.id,
                subscription_id: next.id,
                from_account_id: order.from_account_id,
                to_account_id: order.to_account_id,
            },
        )
        .await;

        Ok(order)
    }

    /// Replace the payment method and/or change the amount.
    ///
    /// Both changes are checked before anything is written. An amount change
    /// cancels the order and returns its `PENDING` successor, carrying the
    /// new payment method if one was given; otherwise the updated order is
    /// returned.
    pub async fn update(
        &self,
        input: &UpdateSubscriptionInput,
        requester: &Requester,
        now: DateTime<Utc>,
    ) -> Result<Order> {
        input.validate()?;
        if input.amount.is_none() && input.payment_method.is_none() {
            return Err(FundwayError::validation(
                "nothing to update: provide an amount or a payment method",
            ));
        }

        let (_, order, subscription) = self
            .load_for_update(input.order_id, requester, "update this subscription")
            .await?;
        if order.status == OrderStatus::Cancelled || subscription.is_cancelled() {
            return Err(FundingError::AlreadyCancelled {
                subscription_id: subscription.id,
            }
            .into());
        }
        if subscription.charge_in_progress {
            return Err(FundingError::ChargeInProgress {
                subscription_id: subscription.id,
            }
            .into());
        }

        if let Some(amount) = input.amount {
            self.check_amount(&subscription, amount)?;
        }
        let payment = match &input.payment_method {
            Some(payment) => Some(self.prepare_payment_method(&order, payment, requester).await?),
            None => None,
        };

        if let Some((reference, resolved)) = &payment {
            self.resolver.persist(reference, resolved).await?;
        }
        let payment_method = payment.and_then(|(_, resolved)| match resolved {
            ResolvedPayment::Instrument(pm) => Some(pm),
            ResolvedPayment::Manual => None,
        });

        match (input.amount, payment_method) {
            (Some(amount), payment_method) => {
                self.update_amount(order, subscription, amount, payment_method, now)
                    .await
            }
            (None, Some(pm)) => self.update_payment_method(order, subscription, pm, now).await,
            (None, None) => Ok(order),
        }
    }

    fn check_amount(&self, subscription: &Subscription, amount: i64) -> Result<()> {
        if amount == subscription.amount {
            return Err(FundingError::InvalidAmount {
                reason: "amount is unchanged".to_string(),
            }
            .into());
        }
        let granularity = self.config.amount_granularity;
        if granularity <= 0 {
            return Err(FundwayError::internal(format!(
                "amount granularity must be positive, got {granularity}"
            )));
        }
        if amount <= 0 || amount % granularity != 0 {
            return Err(FundingError::InvalidAmount {
                reason: format!("amount must be a positive multiple of {granularity}"),
            }
            .into());
        }
        Ok(())
    }

    async fn prepare_payment_method(
        &self,
        order: &Order,
        input: &PaymentMethodInput,
        requester: &Requester,
    ) -> Result<(PaymentRef, ResolvedPayment)> {
        let reference = PaymentRef::from_input(input)?;
        let resolved = self
            .resolver
            .prepare(&reference, order.from_account_id, &order.currency, requester)
            .await?;
        if matches!(resolved, ResolvedPayment::Manual) {
            return Err(FundingError::InvalidPaymentMethod {
                reason: "recurring contributions need a reusable payment method".to_string(),
            }
            .into());
        }
        Ok((reference, resolved))
    }

    async fn update_payment_method(
        &self,
        mut order: Order,
        subscription: Subscription,
        pm: PaymentMethod,
        now: DateTime<Utc>,
    ) -> Result<Order> {
        order.payment_method_id = Some(pm.id);
        order.updated_at = now;

        let expected = subscription.version;
        let mut next = subscription.next_version(now);
        if subscription.charge_retry_count > 0 {
            self.calendar
                .schedule(BillingContext::Updated, &next, now)
                .apply(&mut next);
        }

        if !self
            .store
            .save_order_and_subscription(&order, &next, expected)
            .await?
        {
            return Err(FundingError::ConcurrentModification {
                entity: format!("subscription {}", next.id),
            }
            .into());
        }

        tracing::info!(
            target: "fundway::subscriptions",
            order_id = %order.id,
            subscription_id = %next.id,
            payment_method_id = %pm.id,
            rescheduled = subscription.charge_retry_count > 0,
            "subscription payment method updated"
        );
        Ok(order)
    }

    /// Replace the order and subscription with successors at `amount`, in
    /// one versioned write.
    async fn update_amount(
        &self,
        order: Order,
        subscription: Subscription,
        amount: i64,
        payment_method: Option<PaymentMethod>,
        now: DateTime<Utc>,
    ) -> Result<Order> {
        let mut successor = subscription.successor(amount, now);
        if payment_method.is_some() && subscription.charge_retry_count > 0 {
            self.calendar
                .schedule(BillingContext::Updated, &successor, now)
                .apply(&mut successor);
        }
        let mut old_subscription = subscription.next_version(now);
        old_subscription.deactivate(now);
        old_subscription.replaced_by_subscription_id = Some(successor.id);

        let mut old_order = order.clone();
        old_order.transition_to(OrderStatus::Cancelled, now)?;

        let new_order = Order {
            id: Uuid::new_v4(),
            total_amount: amount,
            status: OrderStatus::Pending,
            processed_at: None,
            subscription_id: Some(successor.id),
            payment_method_id: payment_method
                .as_ref()
                .map(|pm| pm.id)
                .or(order.payment_method_id),
            charge_locked: false,
            created_at: now,
            updated_at: now,
            ..order
        };

        let replacement = SubscriptionReplacement {
            old_order,
            old_subscription,
            expected_version: subscription.version,
            new_order: new_order.clone(),
            new_subscription: successor,
        };
        if !self.store.replace_subscription(&replacement).await? {
            return Err(FundingError::ConcurrentModification {
                entity: format!("subscription {}", subscription.id),
            }
            .into());
        }

        tracing::info!(
            target: "fundway::subscriptions",
            old_order_id = %replacement.old_order.id,
            new_order_id = %new_order.id,
            old_subscription_id = %subscription.id,
            new_subscription_id = %replacement.new_subscription.id,
            old_amount = subscription.amount,
            new_amount = amount,
            payment_method_changed = payment_method.is_some(),
            "subscription amount changed"
        );
        Ok(new_order)
    }

    /// Charge one billing period of the subscription behind `order_id`.
    pub async fn renew(&self, order_id: Uuid, now: DateTime<Utc>) -> Result<RenewalOutcome> {
        let order = self
            .store
            .get_order(order_id)
            .await?
            .ok_or(FundingError::OrderNotFound { order_id })?;
        let subscription_id = order
            .subscription_id
            .ok_or(FundingError::NoSubscription { order_id })?;
        let subscription = self
            .store
            .get_subscription(subscription_id)
            .await?
            .ok_or(FundingError::SubscriptionNotFound { subscription_id })?;

        if !subscription.is_active {
            return Err(FundingError::SubscriptionInactive { subscription_id }.into());
        }
        if subscription.charge_in_progress {
            return Err(FundingError::ChargeInProgress { subscription_id }.into());
        }

        let expected = subscription.version;
        let mut locked = subscription.next_version(now);
        locked.charge_in_progress = true;
        if !self
            .store
            .compare_and_save_subscription(&locked, expected)
            .await?
        {
            return Err(FundingError::ChargeInProgress { subscription_id }.into());
        }

        match self.attempt(order, locked.clone(), now).await {
            Ok(outcome) => {
                tracing::info!(
                    target: "fundway::subscriptions",
                    order_id = %order_id,
                    subscription_id = %subscription_id,
                    next_charge_date = ?outcome.subscription.as_ref().and_then(|s| s.next_charge_date),
                    "subscription renewed"
                );
                Ok(RenewalOutcome::Charged(outcome.order))
            }
            Err(e) => self.record_failure(order_id, locked, e, now).await,
        }
    }

    async fn attempt(
        &self,
        order: Order,
        subscription: Subscription,
        now: DateTime<Utc>,
    ) -> Result<ChargeOutcome> {
        let payment_method_id = order
            .payment_method_id
            .ok_or(FundingError::PaymentMethodRequired)?;
        let pm = self
            .store
            .get_payment_method(payment_method_id)
            .await?
            .ok_or(FundingError::PaymentMethodNotFound { payment_method_id })?;
        self.charges
            .charge(order, &pm, Some(subscription), ChargeKind::Renewal, now)
            .await
    }

    /// Release the renewal claim and either schedule a retry or give up.
    async fn record_failure(
        &self,
        order_id: Uuid,
        locked: Subscription,
        error: FundwayError,
        now: DateTime<Utc>,
    ) -> Result<RenewalOutcome> {
        let current = self
            .store
            .get_subscription(locked.id)
            .await?
            .ok_or(FundingError::SubscriptionNotFound {
                subscription_id: locked.id,
            })?;
        if current.version != locked.version {
            // Cancelled or replaced while charging; that write already
            // released the claim.
            return Err(error);
        }

        let reason = error.to_string();
        let retry_count = current.charge_retry_count + 1;
        let expected = current.version;
        let mut next = current.next_version(now);
        next.charge_in_progress = false;

        if retry_count >= self.config.max_charge_retries {
            next.deactivate(now);
            next.charge_retry_count = retry_count;
            let mut order = self
                .store
                .get_order(order_id)
                .await?
                .ok_or(FundingError::OrderNotFound { order_id })?;
            order.transition_to(OrderStatus::Error, now)?;
            if !self
                .store
                .save_order_and_subscription(&order, &next, expected)
                .await?
            {
                return Err(error);
            }

            tracing::warn!(
                target: "fundway::subscriptions",
                order_id = %order_id,
                subscription_id = %next.id,
                retry_count,
                error = %reason,
                "subscription deactivated after failed charges"
            );
            self.emit_failure(order_id, reason, retry_count).await;
            emit_best_effort(
                self.activities.as_ref(),
                Activity::SubscriptionDeactivated {
                    order_id,
                    subscription_id: next.id,
                },
            )
            .await;
            return Ok(RenewalOutcome::Deactivated);
        }

        self.calendar
            .schedule(BillingContext::Failure, &next, now)
            .apply(&mut next);
        if !self
            .store
            .compare_and_save_subscription(&next, expected)
            .await?
        {
            return Err(error);
        }

        tracing::warn!(
            target: "fundway::subscriptions",
            order_id = %order_id,
            subscription_id = %next.id,
            retry_count = next.charge_retry_count,
            next_charge_date = ?next.next_charge_date,
            error = %reason,
            "renewal charge failed, retry scheduled"
        );
        self.emit_failure(order_id, reason, next.charge_retry_count)
            .await;
        Ok(RenewalOutcome::Retrying {
            retry_count: next.charge_retry_count,
            next_charge_date: next.next_charge_date,
        })
    }

    async fn emit_failure(&self, order_id: Uuid, reason: String, retry_count: u32) {
        emit_best_effort(
            self.activities.as_ref(),
            Activity::PaymentFailed {
                order_id,
                reason,
                retry_count,
            },
        )
        .await;
    }

    /// Renew every subscription that is due at `now`.
    pub async fn process_due(&self, now: DateTime<Utc>) -> Result<RenewalReport> {
        let due = self.store.list_due_subscriptions(now).await?;
        let mut report = RenewalReport::default();

        for subscription in due {
            let Some(order) = self.store.find_order_by_subscription(subscription.id).await? else {
                tracing::warn!(
                    target: "fundway::subscriptions",
                    subscription_id = %subscription.id,
                    "due subscription has no order"
                );
                report.skipped += 1;
                continue;
            };

            match self.renew(order.id, now).await {
                Ok(RenewalOutcome::Charged(_)) => report.charged += 1,
                Ok(RenewalOutcome::Retrying { .. }) => report.retrying += 1,
                Ok(RenewalOutcome::Deactivated) => report.deactivated += 1,
                Err(e) => {
                    tracing::warn!(
                        target: "fundway::subscriptions",
                        order_id = %order.id,
                        subscription_id = %subscription.id,
                        error = %e,
                        "renewal skipped"
                    );
                    report.skipped += 1;
                }
            }
        }

        tracing::info!(
            target: "fundway::subscriptions",
            charged = report.charged,
            retrying = report.retrying,
            deactivated = report.deactivated,
            skipped = report.skipped,
            "renewal pass finished"
        );
        Ok(report)
    }
}
