//! Activity records for the notification dispatcher.
//!
//! The core emits typed activities after state changes. Emission is
//! best-effort: a failing emitter is logged and never unwinds the operation
//! that produced the activity.

use crate::error::Result;
use async_trait::async_trait;
use std::fmt;
use uuid::Uuid;

/// Activities emitted by funding operations.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Activity {
    /// Order persisted.
    OrderCreated {
        order_id: Uuid,
        from_account_id: Uuid,
        to_account_id: Uuid,
        amount: i64,
        currency: String,
    },
    /// Initial charge succeeded (or manual reconciliation).
    OrderProcessed {
        order_id: Uuid,
        amount: i64,
        currency: String,
    },
    /// Free registration confirmed.
    TicketConfirmed {
        order_id: Uuid,
        event_id: Uuid,
        attendee_account_id: Uuid,
        quantity: u32,
    },
    SubscriptionActivated {
        order_id: Uuid,
        subscription_id: Uuid,
    },
    SubscriptionCanceled {
        order_id: Uuid,
        subscription_id: Uuid,
        from_account_id: Uuid,
        to_account_id: Uuid,
    },
    /// A charge attempt failed.
    PaymentFailed {
        order_id: Uuid,
        reason: String,
        retry_count: u32,
    },
    /// Renewal retries exhausted.
    SubscriptionDeactivated {
        order_id: Uuid,
        subscription_id: Uuid,
    },
    OrderRefunded {
        order_id: Uuid,
        transaction_id: Uuid,
        refund_transaction_id: Uuid,
    },
}

impl Activity {
    /// Activity kind as a string for structured logging.
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Self::OrderCreated { .. } => "order_created",
            Self::OrderProcessed { .. } => "order_processed",
            Self::TicketConfirmed { .. } => "ticket_confirmed",
            Self::SubscriptionActivated { .. } => "subscription_activated",
            Self::SubscriptionCanceled { .. } => "subscription_canceled",
            Self::PaymentFailed { .. } => "payment_failed",
            Self::SubscriptionDeactivated { .. } => "subscription_deactivated",
            Self::OrderRefunded { .. } => "order_refunded",
        }
    }

    /// Order the activity is about.
    #[must_use]
    pub fn order_id(&self) -> Uuid {
        match self {
            Self::OrderCreated { order_id, .. }
            | Self::OrderProcessed { order_id, .. }
            | Self::TicketConfirmed { order_id, .. }
            | Self::SubscriptionActivated { order_id, .. }
            | Self::SubscriptionCanceled { order_id, .. }
            | Self::PaymentFailed { order_id, .. }
            | Self::SubscriptionDeactivated { order_id, .. }
            | Self::OrderRefunded { order_id, .. } => *order_id,
        }
    }
}

impl fmt::Display for Activity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::OrderCreated { order_id, from_account_id, to_account_id, amount, currency } => {
                write!(f, "Order created: order={}, from={}, to={}, amount={} {}", order_id, from_account_id, to_account_id, amount, currency)
            }
            Self::OrderProcessed { order_id, amount, currency } => {
                write!(f, "Order processed: order={}, amount={} {}", order_id, amount, currency)
            }
            Self::TicketConfirmed { order_id, event_id, attendee_account_id, quantity } => {
                write!(f, "Ticket confirmed: order={}, event={}, attendee={}, quantity={}", order_id, event_id, attendee_account_id, quantity)
            }
            Self::SubscriptionActivated { order_id, subscription_id } => {
                write!(f, "Subscription activated: order={}, sub={}", order_id, subscription_id)
            }
            Self::SubscriptionCanceled { order_id, subscription_id, .. } => {
                write!(f, "Subscription canceled: order={}, sub={}", order_id, subscription_id)
            }
            Self::PaymentFailed { order_id, reason, retry_count } => {
                write!(f, "Payment failed: order={}, retries={}, reason={}", order_id, retry_count, reason)
            }
            Self::SubscriptionDeactivated { order_id, subscription_id } => {
                write!(f, "Subscription deactivated: order={}, sub={}", order_id, subscription_id)
            }
            Self::OrderRefunded { order_id, transaction_id, refund_transaction_id } => {
                write!(f, "Order refunded: order={}, tx={}, refund={}", order_id, transaction_id, refund_transaction_id)
            }
        }
    }
}

/// Trait for activity sinks.
///
/// Implement this to hand activities to your notification pipeline.
#[async_trait]
pub trait ActivityEmitter: Send + Sync {
    async fn emit(&self, activity: Activity) -> Result<()>;
}

/// Emitter that drops every activity.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoOpActivityEmitter;

#[async_trait]
impl ActivityEmitter for NoOpActivityEmitter {
    async fn emit(&self, _activity: Activity) -> Result<()> {
        Ok(())
    }
}

/// Emitter that logs activities at INFO level.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingActivityEmitter;

#[async_trait]
impl ActivityEmitter for TracingActivityEmitter {
    async fn emit(&self, activity: Activity) -> Result<()> {
        tracing::info!(
            target: "fundway::activity",
            activity = activity.kind(),
            order_id = %activity.order_id(),
            "{}", activity
        );
        Ok(())
    }
}

/// Emit without letting a failure reach the caller.
pub(crate) async fn emit_best_effort(emitter: &dyn ActivityEmitter, activity: Activity) {
    let kind = activity.kind();
    let order_id = activity.order_id();
    if let Err(e) = emitter.emit(activity).await {
        tracing::warn!(
            target: "fundway::activity",
            activity = kind,
            order_id = %order_id,
            error = %e,
            "failed to emit activity"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::FundwayError;

    struct FailingEmitter;

    #[async_trait]
    impl ActivityEmitter for FailingEmitter {
        async fn emit(&self, _activity: Activity) -> Result<()> {
            Err(FundwayError::internal("dispatcher down"))
        }
    }

    fn canceled() -> Activity {
        Activity::SubscriptionCanceled {
            order_id: Uuid::new_v4(),
            subscription_id: Uuid::new_v4(),
            from_account_id: Uuid::new_v4(),
            to_account_id: Uuid::new_v4(),
        }
    }

    #[tokio::test]
    async fn test_noop_emitter() {
        assert!(NoOpActivityEmitter.emit(canceled()).await.is_ok());
    }

    #[tokio::test]
    async fn test_best_effort_swallows_failures() {
        emit_best_effort(&FailingEmitter, canceled()).await;
    }

    #[test]
    fn test_activity_display() {
        let order_id = Uuid::nil();
        let activity = Activity::OrderProcessed {
            order_id,
            amount: 1000,
            currency: "USD".to_string(),
        };
        assert_eq!(
            activity.to_string(),
            format!("Order processed: order={}, amount=1000 USD", order_id)
        );
        assert_eq!(activity.kind(), "order_processed");
    }
}
