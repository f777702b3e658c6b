//! Billing calendar for recurring subscriptions.
//!
//! Given what just happened to a subscription, the calendar decides when it
//! is charged next and what its retry count becomes.

use super::model::Subscription;
use crate::config::SubscriptionConfig;
use chrono::{DateTime, Duration, Utc};

/// Why the schedule is being recomputed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BillingContext {
    /// First successful charge.
    New,
    /// A renewal charge succeeded.
    Success,
    /// A charge failed.
    Failure,
    /// The payment method was replaced after failures.
    Updated,
}

/// New schedule values for a subscription.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BillingSchedule {
    pub next_charge_date: DateTime<Utc>,
    pub next_period_start: DateTime<Utc>,
    pub charge_retry_count: u32,
}

impl BillingSchedule {
    pub fn apply(&self, subscription: &mut Subscription) {
        subscription.next_charge_date = Some(self.next_charge_date);
        subscription.next_period_start = Some(self.next_period_start);
        subscription.charge_retry_count = self.charge_retry_count;
    }
}

/// Billing calendar capability.
pub trait BillingCalendar: Send + Sync {
    fn schedule(
        &self,
        context: BillingContext,
        subscription: &Subscription,
        now: DateTime<Utc>,
    ) -> BillingSchedule;
}

/// Default calendar.
///
/// - `New`: one interval from now.
/// - `Success`: one interval after the current period start.
/// - `Failure`: retry after the configured delay; the period does not move.
/// - `Updated`: charge immediately with a fresh retry count.
#[derive(Debug, Clone, Copy)]
pub struct StandardBillingCalendar {
    retry_delay: Duration,
}

impl StandardBillingCalendar {
    pub fn new(retry_delay: Duration) -> Self {
        Self { retry_delay }
    }

    pub fn from_config(config: &SubscriptionConfig) -> Self {
        Self::new(Duration::days(config.retry_delay_days))
    }
}

impl Default for StandardBillingCalendar {
    fn default() -> Self {
        Self::from_config(&SubscriptionConfig::default())
    }
}

impl BillingCalendar for StandardBillingCalendar {
    fn schedule(
        &self,
        context: BillingContext,
        subscription: &Subscription,
        now: DateTime<Utc>,
    ) -> BillingSchedule {
        let period_start = subscription.next_period_start.unwrap_or(now);
        match context {
            BillingContext::New => {
                let next = subscription.interval.advance(now);
                BillingSchedule {
                    next_charge_date: next,
                    next_period_start: next,
                    charge_retry_count: 0,
                }
            }
            BillingContext::Success => {
                let next = subscription.interval.advance(period_start);
                BillingSchedule {
                    next_charge_date: next,
                    next_period_start: next,
                    charge_retry_count: 0,
                }
            }
            BillingContext::Failure => BillingSchedule {
                next_charge_date: now + self.retry_delay,
                next_period_start: period_start,
                charge_retry_count: subscription.charge_retry_count.saturating_add(1),
            },
            BillingContext::Updated => BillingSchedule {
                next_charge_date: now,
                next_period_start: period_start,
                charge_retry_count: 0,
            },
        }
    }
}
