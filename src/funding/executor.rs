//! Order execution.
//!
//! Persists validated orders and decides what happens to them: an immediate
//! charge, a dormant subscription for pledges, a free registration, or
//! nothing until a payment arrives. Also hosts the administrative paths that
//! bypass validation (manual reconciliation, prepaid credit issuance) and
//! pledge activation.
//!
//! # Tracing Events
//!
//! - `fundway::orders` `order created`
//! - `fundway::orders` `awaiting manual payment`
//! - `fundway::orders` `free registration confirmed`
//! - `fundway::orders` `prepaid credit issued`

use super::access::{is_admin_of, is_root_or_admin_of};
use super::activity::{emit_best_effort, Activity};
use super::charge::ChargeProcessor;
use super::error::FundingError;
use super::input::{AddFundsInput, PaymentMethodInput, UpdateOrderInput};
use super::model::{
    AccountKind, MemberRole, Membership, Order, OrderStatus, PaymentMethod, PaymentMethodType,
    Requester, Subscription, INTERNAL_SERVICE,
};
use super::payment_method::{PaymentMethodResolver, PaymentRef, ResolvedPayment};
use super::storage::{ChargeCommit, FundingStore};
use super::validator::{AccountDraft, UserDraft, ValidatedOrder};
use crate::config::PaymentConfig;
use crate::error::{FundwayError, Result};
use chrono::{DateTime, Duration, Utc};
use std::sync::Arc;
use uuid::Uuid;
use validator::Validate;

/// Executes validated orders.
#[derive(Clone)]
pub struct OrderExecutor {
    store: Arc<dyn FundingStore>,
    resolver: PaymentMethodResolver,
    charges: ChargeProcessor,
    config: PaymentConfig,
}

impl OrderExecutor {
    pub fn new(
        store: Arc<dyn FundingStore>,
        resolver: PaymentMethodResolver,
        charges: ChargeProcessor,
        config: PaymentConfig,
    ) -> Self {
        Self {
            store,
            resolver,
            charges,
            config,
        }
    }

    /// Execute a validated order.
    ///
    /// Tier stock is reserved first and released again if anything before
    /// the charge fails. The order row is written `PENDING` before any
    /// charge so a failed charge leaves an `ERROR` order behind.
    pub async fn execute(
        &self,
        validated: ValidatedOrder,
        requester: &Requester,
        now: DateTime<Utc>,
    ) -> Result<Order> {
        let reserved = match &validated.tier {
            Some(tier) => {
                if !self
                    .store
                    .reserve_tier_stock(tier.id, validated.quantity)
                    .await?
                {
                    let remaining = self
                        .store
                        .get_tier(tier.id)
                        .await?
                        .and_then(|t| t.remaining())
                        .unwrap_or(0);
                    return Err(FundingError::TierSoldOut { remaining }.into());
                }
                Some((tier.id, validated.quantity))
            }
            None => None,
        };

        match self.persist(&validated, requester, now).await {
            Ok((order, payment)) => self.dispatch(validated, order, payment, now).await,
            Err(e) => {
                if let Some((tier_id, quantity)) = reserved
                    && let Err(release_err) =
                        self.store.release_tier_stock(tier_id, quantity).await
                {
                    tracing::error!(
                        target: "fundway::orders",
                        tier_id = %tier_id,
                        quantity,
                        error = %release_err,
                        "failed to release tier stock"
                    );
                }
                Err(e)
            }
        }
    }

    /// Resolve the payment reference, create drafted accounts and write the
    /// `PENDING` order.
    async fn persist(
        &self,
        validated: &ValidatedOrder,
        requester: &Requester,
        now: DateTime<Utc>,
    ) -> Result<(Order, Option<ResolvedPayment>)> {
        let source = validated.source.account();
        let destination = validated.destination.account();
        let acting = validated.user.user();

        let payment = match (&validated.payment, validated.payment_required) {
            (Some(reference), true) => Some(
                self.resolver
                    .resolve(reference, source.id, &validated.currency, requester)
                    .await?,
            ),
            _ => None,
        };

        if let UserDraft::New { user, account } = &validated.user {
            self.store.create_account(account).await?;
            self.store.create_user(user).await?;
        }
        if let AccountDraft::New(org) = &validated.source
            && org.id != acting.account_id
        {
            self.store.create_account(org).await?;
            self.store
                .add_member(&Membership::new(acting.account_id, org.id, MemberRole::Admin))
                .await?;
        }
        if let AccountDraft::New(pledged) = &validated.destination {
            self.store.create_account(pledged).await?;
        }

        let payment_method_id = match &payment {
            Some(ResolvedPayment::Instrument(pm)) => Some(pm.id),
            _ => None,
        };
        let order = Order {
            id: Uuid::new_v4(),
            created_by_user_id: acting.id,
            from_account_id: source.id,
            to_account_id: destination.id,
            tier_id: validated.tier.as_ref().map(|t| t.id),
            quantity: validated.quantity,
            total_amount: validated.amount,
            currency: validated.currency.clone(),
            interval: validated.interval,
            status: OrderStatus::Pending,
            description: validated.description.clone(),
            public_message: validated.public_message.clone(),
            processed_at: None,
            subscription_id: None,
            referral_account_id: validated.referral_account_id,
            payment_method_id,
            matching_payment_method_id: validated.matching_fund.as_ref().map(|f| f.id),
            platform_fee_percent: validated.platform_fee_percent,
            host_fee_percent: validated.host_fee_percent,
            metadata: validated.metadata.clone(),
            charge_locked: false,
            created_at: now,
            updated_at: now,
        };
        self.store.create_order(&order).await?;

        tracing::info!(
            target: "fundway::orders",
            order_id = %order.id,
            from_account_id = %order.from_account_id,
            to_account_id = %order.to_account_id,
            amount = order.total_amount,
            currency = %order.currency,
            interval = order.interval.map(|i| i.as_str()),
            "order created"
        );
        emit_best_effort(
            self.charges.activities(),
            Activity::OrderCreated {
                order_id: order.id,
                from_account_id: order.from_account_id,
                to_account_id: order.to_account_id,
                amount: order.total_amount,
                currency: order.currency.clone(),
            },
        )
        .await;

        Ok((order, payment))
    }

    async fn dispatch(
        &self,
        validated: ValidatedOrder,
        mut order: Order,
        payment: Option<ResolvedPayment>,
        now: DateTime<Utc>,
    ) -> Result<Order> {
        let destination = validated.destination.account();
        let acting_account = validated.user.user().account_id;

        let pledge_interval = order.interval.filter(|_| destination.is_poolable());
        let order = match (payment, pledge_interval) {
            (Some(ResolvedPayment::Instrument(pm)), _) => {
                self.charges.charge_pending_order(order, &pm, now).await?.order
            }
            (Some(ResolvedPayment::Manual), _) => {
                tracing::info!(
                    target: "fundway::orders",
                    order_id = %order.id,
                    "awaiting manual payment"
                );
                order
            }
            (None, Some(interval)) => {
                let sub = Subscription::dormant(order.total_amount, &order.currency, interval, now);
                self.store.create_subscription(&sub).await?;
                order.subscription_id = Some(sub.id);
                order.updated_at = now;
                self.store.save_order(&order).await?;
                order
            }
            (None, None) if destination.is_event() && order.total_amount == 0 => {
                self.confirm_registration(order, now).await?
            }
            (None, None) => order,
        };

        if let Some(referrer) = order.referral_account_id
            && referrer != acting_account
        {
            let membership = Membership::new(referrer, order.to_account_id, MemberRole::Fundraiser);
            if let Err(e) = self.store.add_member(&membership).await {
                tracing::warn!(
                    target: "fundway::orders",
                    order_id = %order.id,
                    referral_account_id = %referrer,
                    error = %e,
                    "failed to grant fundraiser role"
                );
            }
        }

        Ok(order)
    }

    /// Free registration: `PAID` immediately with an attendee role.
    async fn confirm_registration(&self, mut order: Order, now: DateTime<Utc>) -> Result<Order> {
        order.transition_to(OrderStatus::Paid, now)?;
        order.mark_processed(now);

        let commit = ChargeCommit {
            order: order.clone(),
            subscription: None,
            transactions: Vec::new(),
            memberships: vec![
                Membership::new(order.from_account_id, order.to_account_id, MemberRole::Attendee)
                    .with_tier(order.tier_id),
            ],
            prepaid_debit: None,
        };
        self.store.commit_charge(&commit).await?;

        tracing::info!(
            target: "fundway::orders",
            order_id = %order.id,
            event_id = %order.to_account_id,
            quantity = order.quantity,
            "free registration confirmed"
        );
        emit_best_effort(
            self.charges.activities(),
            Activity::TicketConfirmed {
                order_id: order.id,
                event_id: order.to_account_id,
                attendee_account_id: order.from_account_id,
                quantity: order.quantity,
            },
        )
        .await;

        Ok(order)
    }

    /// Change the amount of a pending order and/or attach a payment method.
    ///
    /// Attaching a payment method to an order whose destination accepts
    /// payments runs the initial charge, activating a pledge's dormant
    /// subscription.
    pub async fn update_order(
        &self,
        input: &UpdateOrderInput,
        requester: &Requester,
        now: DateTime<Utc>,
    ) -> Result<Order> {
        input.validate()?;
        let user = requester
            .user
            .as_ref()
            .ok_or_else(|| FundingError::AuthenticationRequired {
                action: "update an order".to_string(),
            })?;
        let mut order = self
            .store
            .get_order(input.order_id)
            .await?
            .ok_or(FundingError::OrderNotFound {
                order_id: input.order_id,
            })?;
        if !is_root_or_admin_of(self.store.as_ref(), user, order.from_account_id).await? {
            return Err(FundingError::NotPermitted {
                action: "update this order".to_string(),
            }
            .into());
        }
        if order.status != OrderStatus::Pending {
            return Err(FundingError::OrderNotPending {
                order_id: order.id,
                status: order.status,
            }
            .into());
        }

        if let Some(amount) = input.total_amount {
            self.check_order_amount(&order, amount).await?;
        }
        let payment = match &input.payment_method {
            Some(payment_input) => Some(
                self.prepare_order_payment(&order, payment_input, requester)
                    .await?,
            ),
            None => None,
        };
        if input.total_amount.is_none() && payment.is_none() {
            return Ok(order);
        }

        let dormant = match (input.total_amount, order.subscription_id) {
            (Some(_), Some(id)) => self
                .store
                .get_subscription(id)
                .await?
                .filter(|sub| !sub.is_active),
            _ => None,
        };
        if let Some((reference, resolved, _)) = &payment {
            self.resolver.persist(reference, resolved).await?;
        }
        if let Some(amount) = input.total_amount {
            order.total_amount = amount;
        }
        if let Some((_, _, pm)) = &payment {
            order.payment_method_id = Some(pm.id);
        }
        order.updated_at = now;

        match (dormant, input.total_amount) {
            (Some(sub), Some(amount)) => {
                let expected = sub.version;
                let mut next = sub.next_version(now);
                next.amount = amount;
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
            }
            _ => self.store.save_order(&order).await?,
        }

        if let Some((_, _, pm)) = payment {
            order = self.charges.charge_pending_order(order, &pm, now).await?.order;
        }

        Ok(order)
    }

    /// An order bought through a fixed-amount tier keeps the tier's price.
    async fn check_order_amount(&self, order: &Order, amount: i64) -> Result<()> {
        let Some(tier_id) = order.tier_id else {
            return Ok(());
        };
        if let Some(tier) = self.store.get_tier(tier_id).await?
            && let Some(unit) = tier.fixed_amount()
            && unit.checked_mul(i64::from(order.quantity)) != Some(amount)
        {
            return Err(FundingError::InvalidAmount {
                reason: format!("the amount of tier {} is fixed", tier.name),
            }
            .into());
        }
        Ok(())
    }

    /// Check a payment method attached to a pending order without saving it.
    async fn prepare_order_payment(
        &self,
        order: &Order,
        payment_input: &PaymentMethodInput,
        requester: &Requester,
    ) -> Result<(PaymentRef, ResolvedPayment, PaymentMethod)> {
        let destination = self
            .store
            .get_account(order.to_account_id)
            .await?
            .ok_or(FundingError::AccountNotFound {
                account_id: order.to_account_id,
            })?;
        if !destination.is_active {
            return Err(FundingError::DestinationInactive {
                account_id: destination.id,
            }
            .into());
        }

        let reference = PaymentRef::from_input(payment_input)?;
        let resolved = self
            .resolver
            .prepare(&reference, order.from_account_id, &order.currency, requester)
            .await?;
        let pm = match &resolved {
            ResolvedPayment::Instrument(pm) => pm.clone(),
            ResolvedPayment::Manual => {
                return Err(FundingError::InvalidPaymentMethod {
                    reason: "manual payments are recorded by the host".to_string(),
                }
                .into());
            }
        };
        Ok((reference, resolved, pm))
    }

    /// Host-admin reconciliation of an offline payment.
    pub async fn mark_order_as_paid(
        &self,
        order_id: Uuid,
        requester: &Requester,
        now: DateTime<Utc>,
    ) -> Result<Order> {
        let user = requester
            .user
            .as_ref()
            .ok_or_else(|| FundingError::AuthenticationRequired {
                action: "mark an order as paid".to_string(),
            })?;
        let order = self
            .store
            .get_order(order_id)
            .await?
            .ok_or(FundingError::OrderNotFound { order_id })?;
        let destination = self
            .store
            .get_account(order.to_account_id)
            .await?
            .ok_or(FundingError::AccountNotFound {
                account_id: order.to_account_id,
            })?;

        let is_host_admin = match destination.host_id {
            Some(host_id) => is_admin_of(self.store.as_ref(), user, host_id).await?,
            None => false,
        };
        if !is_host_admin {
            return Err(FundingError::NotPermitted {
                action: "mark this order as paid".to_string(),
            }
            .into());
        }
        if order.status != OrderStatus::Pending {
            return Err(FundingError::OrderNotPending {
                order_id,
                status: order.status,
            }
            .into());
        }

        let manual = PaymentMethod::manual(order.from_account_id, &order.currency);
        let outcome = self.charges.charge_pending_order(order, &manual, now).await?;
        Ok(outcome.order)
    }

    /// Issue prepaid credit from a host to an organization. Root only.
    pub async fn add_funds_to_org(
        &self,
        input: &AddFundsInput,
        requester: &Requester,
        now: DateTime<Utc>,
    ) -> Result<PaymentMethod> {
        input.validate()?;
        if !requester.is_root() {
            return Err(FundingError::NotPermitted {
                action: "add funds to an organization".to_string(),
            }
            .into());
        }
        let org = self
            .store
            .get_account(input.organization_id)
            .await?
            .ok_or(FundingError::AccountNotFound {
                account_id: input.organization_id,
            })?;
        if org.kind != AccountKind::Organization {
            return Err(FundwayError::validation(format!(
                "{} is not an organization",
                org.name
            )));
        }
        let host = self
            .store
            .get_account(input.host_id)
            .await?
            .ok_or(FundingError::AccountNotFound {
                account_id: input.host_id,
            })?;

        let pm = PaymentMethod {
            id: Uuid::new_v4(),
            account_id: org.id,
            name: input
                .description
                .clone()
                .unwrap_or_else(|| format!("{} credit from {}", host.currency, host.name)),
            service: INTERNAL_SERVICE.to_string(),
            kind: PaymentMethodType::Prepaid,
            token: None,
            currency: host.currency.clone(),
            balance: Some(input.total_amount),
            initial_balance: Some(input.total_amount),
            matching: None,
            expiry: Some(now + Duration::days(self.config.prepaid_validity_days)),
            source_account_id: Some(host.id),
            created_by_user_id: requester.user.as_ref().map(|u| u.id),
            created_at: now,
        };
        self.store.create_payment_method(&pm).await?;

        tracing::info!(
            target: "fundway::orders",
            payment_method_id = %pm.id,
            organization_id = %org.id,
            host_id = %host.id,
            amount = input.total_amount,
            currency = %pm.currency,
            "prepaid credit issued"
        );
        Ok(pm)
    }
}
