//! Funding-specific error types.
//!
//! These carry more context than [`FundwayError`] and are converted into it
//! at the operation boundary.

use super::model::OrderStatus;
use crate::error::FundwayError;
use uuid::Uuid;

/// Funding-specific errors.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum FundingError {
    // Lookups
    #[error("Account not found: {account_id}")]
    AccountNotFound { account_id: Uuid },
    #[error("Tier not found: {tier_id}")]
    TierNotFound { tier_id: Uuid },
    #[error("Order not found: {order_id}")]
    OrderNotFound { order_id: Uuid },
    #[error("Order {order_id} has no subscription")]
    NoSubscription { order_id: Uuid },
    #[error("Subscription not found: {subscription_id}")]
    SubscriptionNotFound { subscription_id: Uuid },
    #[error("Payment method not found: {payment_method_id}")]
    PaymentMethodNotFound { payment_method_id: Uuid },
    #[error("Transaction not found: {transaction_id}")]
    TransactionNotFound { transaction_id: Uuid },

    // Order validation
    #[error("An order needs a destination account")]
    MissingDestination,
    #[error("You cannot place an order for yourself")]
    SelfFunding,
    #[error("Tier {tier_id} does not belong to the destination account")]
    TierMismatch { tier_id: Uuid },
    #[error("You can only buy up to {max} units per person ({requested} requested)")]
    PerUserLimit { requested: u32, max: u32 },
    #[error("No more units left for this tier ({remaining} remaining)")]
    TierSoldOut { remaining: u32 },
    #[error("Invalid amount: {reason}")]
    InvalidAmount { reason: String },
    #[error("Currency mismatch: expected {expected}, got {actual}")]
    CurrencyMismatch { expected: String, actual: String },
    #[error("An email address is required to place an order without signing in")]
    EmailRequired,
    #[error("An account already exists for {email}, please sign in")]
    AccountExists { email: String },
    #[error("Abuse challenge token is missing")]
    ChallengeMissing,
    #[error("Abuse challenge verification failed: {reason}")]
    ChallengeFailed { reason: String },
    #[error("'{handle}' needs at least {required} stars to receive pledges ({actual} found)")]
    PopularityTooLow {
        handle: String,
        actual: u32,
        required: u32,
    },
    #[error("Could not verify '{handle}': {reason}")]
    PopularityUnverifiable { handle: String, reason: String },
    #[error("Matching fund cannot be used: {reason}")]
    MatchingFundUnusable { reason: String },
    #[error("A payment method is required for this order")]
    PaymentMethodRequired,
    #[error("Invalid payment method: {reason}")]
    InvalidPaymentMethod { reason: String },

    // Authorization
    #[error("You must be signed in to {action}")]
    AuthenticationRequired { action: String },
    #[error("You are not allowed to {action}")]
    NotPermitted { action: String },

    // State
    #[error("Order {order_id} cannot move from {from} to {to}")]
    InvalidStatusTransition {
        order_id: Uuid,
        from: OrderStatus,
        to: OrderStatus,
    },
    #[error("Order {order_id} is {status}, expected PENDING")]
    OrderNotPending { order_id: Uuid, status: OrderStatus },
    #[error("Subscription {subscription_id} is already cancelled")]
    AlreadyCancelled { subscription_id: Uuid },
    #[error("Subscription {subscription_id} is not active")]
    SubscriptionInactive { subscription_id: Uuid },
    #[error("Account {account_id} cannot receive payments yet")]
    DestinationInactive { account_id: Uuid },
    #[error("Transaction {transaction_id} has already been refunded")]
    AlreadyRefunded { transaction_id: Uuid },
    #[error("Transaction {transaction_id} is a refund and cannot be refunded")]
    RefundOfRefund { transaction_id: Uuid },

    // Concurrency
    #[error("A charge is in progress for {subscription_id}, please retry later")]
    ChargeInProgress { subscription_id: Uuid },
    #[error("Concurrent modification detected for {entity}, please retry")]
    ConcurrentModification { entity: String },
    #[error("A request with idempotency key '{key}' is still being processed")]
    RequestInProgress { key: String },
    #[error("A refund is already in progress for transaction {transaction_id}")]
    RefundInProgress { transaction_id: Uuid },

    // Money movement
    #[error("Payment method has expired")]
    PaymentMethodExpired,
    #[error("Insufficient balance: {available} available, {required} required")]
    InsufficientBalance { available: i64, required: i64 },
    #[error("{message}")]
    Provider { message: String },
    #[error("Payment provider did not answer within {seconds}s")]
    ProviderTimeout { seconds: u64 },
}

impl FundingError {
    /// Check if the caller can correct the request.
    #[must_use]
    pub fn is_client_error(&self) -> bool {
        !matches!(
            self,
            Self::ConcurrentModification { .. }
                | Self::ChargeInProgress { .. }
                | Self::RequestInProgress { .. }
                | Self::RefundInProgress { .. }
                | Self::InvalidStatusTransition { .. }
                | Self::Provider { .. }
                | Self::ProviderTimeout { .. }
        )
    }

    /// Check if retrying the same operation may succeed.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::ConcurrentModification { .. }
                | Self::ChargeInProgress { .. }
                | Self::RequestInProgress { .. }
                | Self::ProviderTimeout { .. }
        )
    }
}

impl From<FundingError> for FundwayError {
    fn from(err: FundingError) -> Self {
        use FundingError::*;
        let message = err.to_string();
        match err {
            AccountNotFound { .. }
            | TierNotFound { .. }
            | OrderNotFound { .. }
            | NoSubscription { .. }
            | SubscriptionNotFound { .. }
            | PaymentMethodNotFound { .. }
            | TransactionNotFound { .. } => FundwayError::NotFound(message),

            AuthenticationRequired { .. } | NotPermitted { .. } => {
                FundwayError::Unauthorized(message)
            }

            PaymentMethodRequired => FundwayError::PaymentMethodRequired(message),
            AccountExists { .. } => FundwayError::AccountExists(message),

            ChargeInProgress { .. }
            | ConcurrentModification { .. }
            | RequestInProgress { .. }
            | RefundInProgress { .. } => FundwayError::Conflict(message),

            PaymentMethodExpired
            | InsufficientBalance { .. }
            | Provider { .. }
            | ProviderTimeout { .. } => FundwayError::ChargeFailed(message),

            InvalidStatusTransition { .. } => FundwayError::Internal(message),

            MissingDestination
            | SelfFunding
            | TierMismatch { .. }
            | PerUserLimit { .. }
            | TierSoldOut { .. }
            | InvalidAmount { .. }
            | CurrencyMismatch { .. }
            | EmailRequired
            | ChallengeMissing
            | ChallengeFailed { .. }
            | PopularityTooLow { .. }
            | PopularityUnverifiable { .. }
            | MatchingFundUnusable { .. }
            | InvalidPaymentMethod { .. }
            | OrderNotPending { .. }
            | AlreadyCancelled { .. }
            | SubscriptionInactive { .. }
            | DestinationInactive { .. }
            | AlreadyRefunded { .. }
            | RefundOfRefund { .. } => FundwayError::ValidationFailed(message),
        }
    }
}
