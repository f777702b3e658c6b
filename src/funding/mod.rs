//! Order and recurring-subscription lifecycle.
//!
//! The entry point is [`FundingService`]. A creation request goes through
//! the rate limiter, the [`OrderValidator`] and the [`OrderExecutor`], which
//! may charge through the [`PaymentProvider`]. The [`SubscriptionScheduler`]
//! handles everything that happens to a recurring order afterwards, and the
//! [`RefundHandler`] reverses charges.
//!
//! Storage and external systems are traits with in-memory implementations:
//!
//! - [`FundingStore`] / [`InMemoryFundingStore`]
//! - [`IdempotencyStore`] / [`MemoryIdempotencyStore`]
//! - [`PaymentProvider`], [`PopularityVerifier`], [`ChallengeVerifier`]
//!   (mocks in [`crate::testing`])
//! - [`ActivityEmitter`] / [`TracingActivityEmitter`]

pub mod access;
mod activity;
mod calendar;
mod charge;
mod error;
mod executor;
mod idempotency;
mod input;
mod model;
mod payment_method;
mod provider;
mod refund;
mod service;
mod storage;
mod subscription;
mod validator;
mod verification;

pub use activity::{Activity, ActivityEmitter, NoOpActivityEmitter, TracingActivityEmitter};
pub use calendar::{BillingCalendar, BillingContext, BillingSchedule, StandardBillingCalendar};
pub use charge::{ChargeKind, ChargeOutcome, ChargeProcessor, Fees};
pub use error::FundingError;
pub use executor::OrderExecutor;
pub use idempotency::{IdempotencyClaim, IdempotencyStore, MemoryIdempotencyStore};
pub use input::{
    AccountReference, AddFundsInput, CreateOrderInput, PaymentMethodInput, SourceAccountInput,
    UpdateOrderInput, UpdateSubscriptionInput, MAX_AMOUNT,
};
pub use model::{
    Account, AccountKind, INTERNAL_SERVICE, Interval, MemberRole, Membership, Order,
    OrderMetadata, OrderStatus, PaymentMethod, PaymentMethodType, RequestContext, Requester,
    Subscription, Tier, TierAmountType, Transaction, TransactionKind, User,
};
pub use payment_method::{DEFAULT_SERVICE, PaymentMethodResolver, PaymentRef, ResolvedPayment};
pub use provider::{ChargeRequest, PaymentProvider, ProviderCharge, ProviderRefund};
pub use refund::RefundHandler;
pub use service::{FundingService, FundingServiceBuilder};
pub use storage::{
    ChargeCommit, FundingStore, InMemoryFundingStore, RefundCommit, SubscriptionReplacement,
    SubscriptionWrite,
};
pub use subscription::{RenewalOutcome, RenewalReport, SubscriptionScheduler};
pub use validator::{AccountDraft, OrderValidator, UserDraft, ValidatedOrder, ValidatedOrderBuilder};
pub use verification::{ChallengeVerifier, PopularityVerifier};
