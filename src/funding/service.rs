//! Funding service: the operations exposed to callers.
//!
//! Wires the rate limiter, validator, executor, scheduler and refund
//! handler around shared collaborators. Every operation takes an input
//! struct plus the requester and returns the resulting entity or a typed
//! error.

use super::activity::{ActivityEmitter, TracingActivityEmitter};
use super::calendar::{BillingCalendar, StandardBillingCalendar};
use super::charge::ChargeProcessor;
use super::error::FundingError;
use super::executor::OrderExecutor;
use super::idempotency::{IdempotencyClaim, IdempotencyStore, MemoryIdempotencyStore};
use super::input::{AddFundsInput, CreateOrderInput, UpdateOrderInput, UpdateSubscriptionInput};
use super::model::{Order, PaymentMethod, RequestContext, Requester, Transaction};
use super::payment_method::PaymentMethodResolver;
use super::provider::PaymentProvider;
use super::refund::RefundHandler;
use super::storage::{FundingStore, InMemoryFundingStore};
use super::subscription::{RenewalOutcome, RenewalReport, SubscriptionScheduler};
use super::validator::OrderValidator;
use super::verification::{ChallengeVerifier, PopularityVerifier};
use crate::config::Config;
use crate::error::{FundwayError, Result};
use crate::ratelimit::memory::InMemoryCounterStore;
use crate::ratelimit::{OrderAttempt, OrderRateLimiter, hash_identity};
use crate::traits::counter::CounterStore;
use chrono::{DateTime, Utc};
use std::sync::Arc;
use uuid::Uuid;
use validator::Validate;

/// Order and subscription lifecycle operations.
#[derive(Clone)]
pub struct FundingService {
    store: Arc<dyn FundingStore>,
    limiter: OrderRateLimiter,
    validator: OrderValidator,
    executor: OrderExecutor,
    scheduler: SubscriptionScheduler,
    refunds: RefundHandler,
    idempotency: Arc<dyn IdempotencyStore>,
    config: Config,
}

impl FundingService {
    pub fn builder() -> FundingServiceBuilder {
        FundingServiceBuilder::new()
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn store(&self) -> &Arc<dyn FundingStore> {
        &self.store
    }

    /// Create an order.
    ///
    /// A request carrying an idempotency key that already produced an order
    /// gets that order back without any new charge.
    pub async fn create_order(
        &self,
        input: &CreateOrderInput,
        requester: &Requester,
        ctx: &RequestContext,
    ) -> Result<Order> {
        input.validate()?;

        let requested_key = input
            .idempotency_key
            .as_deref()
            .map(str::trim)
            .filter(|k| !k.is_empty());
        let key = requested_key.map(|k| scoped_idempotency_key(k, requester, input, ctx));
        if let (Some(requested), Some(key)) = (requested_key, key.as_deref()) {
            match self.idempotency.claim(key).await? {
                IdempotencyClaim::Claimed => {}
                IdempotencyClaim::InFlight => {
                    return Err(FundingError::RequestInProgress {
                        key: requested.to_string(),
                    }
                    .into());
                }
                IdempotencyClaim::Completed(order_id) => {
                    tracing::info!(
                        target: "fundway::orders",
                        order_id = %order_id,
                        "duplicate order request, returning original order"
                    );
                    return self
                        .store
                        .get_order(order_id)
                        .await?
                        .ok_or_else(|| FundingError::OrderNotFound { order_id }.into());
                }
            }
        }

        let result = self.place_order(input, requester, ctx).await;

        if let Some(key) = key.as_deref() {
            let recorded = match &result {
                Ok(order) => self.idempotency.complete(key, order.id).await,
                Err(_) => self.idempotency.release(key).await,
            };
            if let Err(e) = recorded {
                tracing::error!(
                    target: "fundway::orders",
                    idempotency_key = requested_key,
                    error = %e,
                    "failed to record idempotency key"
                );
            }
        }

        result
    }

    async fn place_order(
        &self,
        input: &CreateOrderInput,
        requester: &Requester,
        ctx: &RequestContext,
    ) -> Result<Order> {
        let destination = input.collective.destination_key();
        let attempt = OrderAttempt {
            account_id: requester.account_id(),
            email: input.email.as_deref(),
            ip: ctx.ip.as_deref(),
            destination: destination.as_deref(),
        };
        self.limiter.check_attempt(&attempt).await?;

        let validated = self.validator.validate(input, requester, ctx).await?;
        self.executor.execute(validated, requester, Utc::now()).await
    }

    /// Change a pending order's amount and/or attach a payment method.
    pub async fn update_order(
        &self,
        input: &UpdateOrderInput,
        requester: &Requester,
    ) -> Result<Order> {
        self.executor.update_order(input, requester, Utc::now()).await
    }

    /// Cancel the subscription behind an order.
    pub async fn cancel_subscription(&self, order_id: Uuid, requester: &Requester) -> Result<Order> {
        self.scheduler.cancel(order_id, requester, Utc::now()).await
    }

    /// Update a subscription's payment method and/or amount.
    ///
    /// An amount change returns the successor order.
    pub async fn update_subscription(
        &self,
        input: &UpdateSubscriptionInput,
        requester: &Requester,
    ) -> Result<Order> {
        self.scheduler.update(input, requester, Utc::now()).await
    }

    pub async fn refund_transaction(
        &self,
        transaction_id: Uuid,
        requester: &Requester,
    ) -> Result<Transaction> {
        self.refunds
            .refund(transaction_id, requester, Utc::now())
            .await
    }

    pub async fn add_funds_to_org(
        &self,
        input: &AddFundsInput,
        requester: &Requester,
    ) -> Result<PaymentMethod> {
        self.executor
            .add_funds_to_org(input, requester, Utc::now())
            .await
    }

    pub async fn mark_order_as_paid(&self, order_id: Uuid, requester: &Requester) -> Result<Order> {
        self.executor
            .mark_order_as_paid(order_id, requester, Utc::now())
            .await
    }

    /// Charge one period of a subscription (billing driver entry point).
    pub async fn renew(&self, order_id: Uuid, now: DateTime<Utc>) -> Result<RenewalOutcome> {
        self.scheduler.renew(order_id, now).await
    }

    /// Renew everything due at `now`.
    pub async fn process_due(&self, now: DateTime<Utc>) -> Result<RenewalReport> {
        self.scheduler.process_due(now).await
    }
}

/// Idempotency keys are only unique per requester: an authenticated
/// account, else the hashed email or source address of an anonymous one.
fn scoped_idempotency_key(
    key: &str,
    requester: &Requester,
    input: &CreateOrderInput,
    ctx: &RequestContext,
) -> String {
    let owner = match requester.account_id() {
        Some(account_id) => format!("account:{account_id}"),
        None => match (input.email.as_deref(), ctx.ip.as_deref()) {
            (Some(email), _) if !email.trim().is_empty() => {
                format!("email:{}", hash_identity(email))
            }
            (_, Some(ip)) if !ip.trim().is_empty() => format!("ip:{}", hash_identity(ip)),
            _ => "anonymous".to_string(),
        },
    };
    format!("{owner}:{key}")
}

/// Builder for [`FundingService`].
///
/// The payment provider and both verifiers are required. Everything else
/// defaults to the in-memory implementations and [`Config::default`].
#[must_use = "builder does nothing until you call build()"]
#[derive(Default)]
pub struct FundingServiceBuilder {
    store: Option<Arc<dyn FundingStore>>,
    counters: Option<Arc<dyn CounterStore>>,
    provider: Option<Arc<dyn PaymentProvider>>,
    popularity: Option<Arc<dyn PopularityVerifier>>,
    challenge: Option<Arc<dyn ChallengeVerifier>>,
    activities: Option<Arc<dyn ActivityEmitter>>,
    calendar: Option<Arc<dyn BillingCalendar>>,
    idempotency: Option<Arc<dyn IdempotencyStore>>,
    config: Option<Config>,
}

impl FundingServiceBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_store(mut self, store: Arc<dyn FundingStore>) -> Self {
        self.store = Some(store);
        self
    }

    /// Set the rate limiter's counter store
    pub fn with_counters(mut self, counters: Arc<dyn CounterStore>) -> Self {
        self.counters = Some(counters);
        self
    }

    pub fn with_provider(mut self, provider: Arc<dyn PaymentProvider>) -> Self {
        self.provider = Some(provider);
        self
    }

    pub fn with_popularity_verifier(mut self, verifier: Arc<dyn PopularityVerifier>) -> Self {
        self.popularity = Some(verifier);
        self
    }

    pub fn with_challenge_verifier(mut self, verifier: Arc<dyn ChallengeVerifier>) -> Self {
        self.challenge = Some(verifier);
        self
    }

    pub fn with_activities(mut self, activities: Arc<dyn ActivityEmitter>) -> Self {
        self.activities = Some(activities);
        self
    }

    /// Override the billing calendar built from the subscription config
    pub fn with_calendar(mut self, calendar: Arc<dyn BillingCalendar>) -> Self {
        self.calendar = Some(calendar);
        self
    }

    pub fn with_idempotency(mut self, store: Arc<dyn IdempotencyStore>) -> Self {
        self.idempotency = Some(store);
        self
    }

    pub fn with_config(mut self, config: Config) -> Self {
        self.config = Some(config);
        self
    }

    pub fn build(self) -> Result<FundingService> {
        let provider = self
            .provider
            .ok_or_else(|| FundwayError::internal("FundingService requires a payment provider"))?;
        let popularity = self.popularity.ok_or_else(|| {
            FundwayError::internal("FundingService requires a popularity verifier")
        })?;
        let challenge = self.challenge.ok_or_else(|| {
            FundwayError::internal("FundingService requires a challenge verifier")
        })?;

        let config = self.config.unwrap_or_default();
        let store = self
            .store
            .unwrap_or_else(|| Arc::new(InMemoryFundingStore::new()));
        let counters = self
            .counters
            .unwrap_or_else(|| Arc::new(InMemoryCounterStore::new()));
        let activities = self
            .activities
            .unwrap_or_else(|| Arc::new(TracingActivityEmitter));
        let calendar = self.calendar.unwrap_or_else(|| {
            Arc::new(StandardBillingCalendar::from_config(&config.subscriptions))
        });
        let idempotency = self
            .idempotency
            .unwrap_or_else(|| Arc::new(MemoryIdempotencyStore::new()));

        let resolver = PaymentMethodResolver::new(store.clone());
        let charges = ChargeProcessor::new(
            store.clone(),
            provider.clone(),
            calendar.clone(),
            activities.clone(),
            config.payments.clone(),
        );

        Ok(FundingService {
            limiter: OrderRateLimiter::new(counters, config.order_limits.clone()),
            validator: OrderValidator::new(
                store.clone(),
                popularity,
                challenge,
                config.pledges.clone(),
            ),
            executor: OrderExecutor::new(
                store.clone(),
                resolver.clone(),
                charges.clone(),
                config.payments.clone(),
            ),
            scheduler: SubscriptionScheduler::new(
                store.clone(),
                resolver,
                charges,
                calendar,
                activities.clone(),
                config.subscriptions.clone(),
            ),
            refunds: RefundHandler::new(store.clone(), provider, activities, config.payments.clone()),
            store,
            idempotency,
            config,
        })
    }
}
