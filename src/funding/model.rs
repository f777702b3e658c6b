//! Funding domain types.
//!
//! Amounts are integers in minor currency units (cents).

use super::error::FundingError;
use chrono::{DateTime, Months, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Service identifier used for instruments that never reach a provider.
pub const INTERNAL_SERVICE: &str = "fundway";

// =============================================================================
// Accounts, users and memberships
// =============================================================================

/// Kind of account.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AccountKind {
    /// Personal account backing a user.
    User,
    /// Company or group; can fund others and host collectives.
    Organization,
    /// Poolable fundraising account.
    Collective,
    /// Event selling tickets.
    Event,
}

impl AccountKind {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::User => "USER",
            Self::Organization => "ORGANIZATION",
            Self::Collective => "COLLECTIVE",
            Self::Event => "EVENT",
        }
    }
}

/// An account that can send or receive funds.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Account {
    pub id: Uuid,
    pub slug: String,
    pub name: String,
    pub kind: AccountKind,
    /// Default currency (ISO 4217, upper case).
    pub currency: String,
    /// Whether the account can receive payments.
    pub is_active: bool,
    /// Created from an external handle before being onboarded.
    pub is_pledged: bool,
    /// Fiscal host holding this account's money.
    pub host_id: Option<Uuid>,
    /// Host fee applied to contributions when the order carries no override.
    pub host_fee_percent: Option<u32>,
    /// External handle (e.g. `org/repo`) for pledge targets.
    pub external_handle: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl Account {
    pub fn new(kind: AccountKind, name: impl Into<String>, currency: impl Into<String>) -> Self {
        let name = name.into();
        Self {
            id: Uuid::new_v4(),
            slug: slugify(&name),
            name,
            kind,
            currency: currency.into().to_uppercase(),
            is_active: kind != AccountKind::User,
            is_pledged: false,
            host_id: None,
            host_fee_percent: None,
            external_handle: None,
            created_at: Utc::now(),
        }
    }

    /// Placeholder account for an external handle that is not onboarded yet.
    pub fn pledged(handle: &str, name: Option<&str>, currency: &str) -> Self {
        let display = name
            .map(str::to_string)
            .unwrap_or_else(|| handle.rsplit('/').next().unwrap_or(handle).to_string());
        let mut account = Self::new(AccountKind::Collective, display, currency);
        account.slug = slugify(handle);
        account.is_active = false;
        account.is_pledged = true;
        account.external_handle = Some(handle.to_string());
        account
    }

    #[must_use]
    pub fn with_host(mut self, host_id: Uuid) -> Self {
        self.host_id = Some(host_id);
        self
    }

    #[must_use]
    pub fn with_active(mut self, is_active: bool) -> Self {
        self.is_active = is_active;
        self
    }

    #[must_use]
    pub fn with_host_fee_percent(mut self, percent: u32) -> Self {
        self.host_fee_percent = Some(percent);
        self
    }

    #[must_use]
    pub fn is_event(&self) -> bool {
        self.kind == AccountKind::Event
    }

    /// Whether the account pools recurring contributions.
    #[must_use]
    pub fn is_poolable(&self) -> bool {
        self.kind == AccountKind::Collective
    }
}

fn slugify(value: &str) -> String {
    let mut slug = String::with_capacity(value.len());
    for c in value.chars() {
        if c.is_ascii_alphanumeric() {
            slug.push(c.to_ascii_lowercase());
        } else if !slug.ends_with('-') {
            slug.push('-');
        }
    }
    slug.trim_matches('-').to_string()
}

/// A person who can act on the platform.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    pub id: Uuid,
    pub email: String,
    /// The user's personal account.
    pub account_id: Uuid,
    /// Platform superuser.
    pub is_root: bool,
    pub created_at: DateTime<Utc>,
}

impl User {
    /// Create a user together with its personal account.
    pub fn with_account(email: &str, name: Option<&str>, currency: &str) -> (User, Account) {
        let display = name
            .map(str::to_string)
            .unwrap_or_else(|| email.split('@').next().unwrap_or("anonymous").to_string());
        let account = Account::new(AccountKind::User, display, currency);
        let user = User {
            id: Uuid::new_v4(),
            email: email.trim().to_lowercase(),
            account_id: account.id,
            is_root: false,
            created_at: Utc::now(),
        };
        (user, account)
    }
}

/// Role an account holds on another account.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MemberRole {
    Admin,
    Host,
    Member,
    /// Financial contributor (backer).
    Contributor,
    Attendee,
    Fundraiser,
}

impl MemberRole {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Admin => "ADMIN",
            Self::Host => "HOST",
            Self::Member => "MEMBER",
            Self::Contributor => "CONTRIBUTOR",
            Self::Attendee => "ATTENDEE",
            Self::Fundraiser => "FUNDRAISER",
        }
    }
}

impl fmt::Display for MemberRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// `member_account_id` holds `role` on `account_id`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Membership {
    pub member_account_id: Uuid,
    pub account_id: Uuid,
    pub role: MemberRole,
    pub tier_id: Option<Uuid>,
    pub created_at: DateTime<Utc>,
}

impl Membership {
    pub fn new(member_account_id: Uuid, account_id: Uuid, role: MemberRole) -> Self {
        Self {
            member_account_id,
            account_id,
            role,
            tier_id: None,
            created_at: Utc::now(),
        }
    }

    #[must_use]
    pub fn with_tier(mut self, tier_id: Option<Uuid>) -> Self {
        self.tier_id = tier_id;
        self
    }
}

/// Who is making a request.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Requester {
    pub user: Option<User>,
}

impl Requester {
    pub fn anonymous() -> Self {
        Self { user: None }
    }

    pub fn user(user: User) -> Self {
        Self { user: Some(user) }
    }

    #[must_use]
    pub fn is_authenticated(&self) -> bool {
        self.user.is_some()
    }

    #[must_use]
    pub fn is_root(&self) -> bool {
        self.user.as_ref().is_some_and(|u| u.is_root)
    }

    /// Personal account of the authenticated user.
    #[must_use]
    pub fn account_id(&self) -> Option<Uuid> {
        self.user.as_ref().map(|u| u.account_id)
    }
}

/// Request facts captured from the transport layer.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RequestContext {
    pub ip: Option<String>,
    pub user_agent: Option<String>,
    /// Abuse-challenge token submitted with the request.
    pub challenge_token: Option<String>,
}

// =============================================================================
// Tiers
// =============================================================================

/// Recurrence of an order or subscription.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Interval {
    Month,
    Year,
}

impl Interval {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Month => "month",
            Self::Year => "year",
        }
    }

    /// Adjective used in descriptions ("Monthly", "Yearly").
    #[must_use]
    pub fn label(&self) -> &'static str {
        match self {
            Self::Month => "Monthly",
            Self::Year => "Yearly",
        }
    }

    fn months(&self) -> u32 {
        match self {
            Self::Month => 1,
            Self::Year => 12,
        }
    }

    /// Date one interval after `from`, clamped to the end of shorter months.
    #[must_use]
    pub fn advance(&self, from: DateTime<Utc>) -> DateTime<Utc> {
        from.checked_add_months(Months::new(self.months()))
            .unwrap_or(from)
    }
}

impl fmt::Display for Interval {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How a tier prices its contributions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TierAmountType {
    /// The tier amount is the price per unit.
    Fixed,
    /// The tier amount is only a suggestion; the caller chooses.
    Flexible,
}

/// A priced funding tier on a destination account.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Tier {
    pub id: Uuid,
    pub account_id: Uuid,
    pub name: String,
    pub amount: Option<i64>,
    pub amount_type: TierAmountType,
    pub currency: Option<String>,
    pub interval: Option<Interval>,
    /// Total inventory; `None` means unlimited.
    pub max_quantity: Option<u32>,
    pub max_quantity_per_user: Option<u32>,
    /// Units already reserved.
    pub sold: u32,
}

impl Tier {
    pub fn new(account_id: Uuid, name: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            account_id,
            name: name.into(),
            amount: None,
            amount_type: TierAmountType::Flexible,
            currency: None,
            interval: None,
            max_quantity: None,
            max_quantity_per_user: None,
            sold: 0,
        }
    }

    #[must_use]
    pub fn fixed(mut self, amount: i64) -> Self {
        self.amount = Some(amount);
        self.amount_type = TierAmountType::Fixed;
        self
    }

    #[must_use]
    pub fn flexible(mut self, suggested: i64) -> Self {
        self.amount = Some(suggested);
        self.amount_type = TierAmountType::Flexible;
        self
    }

    #[must_use]
    pub fn with_max_quantity(mut self, max: u32) -> Self {
        self.max_quantity = Some(max);
        self
    }

    #[must_use]
    pub fn with_max_quantity_per_user(mut self, max: u32) -> Self {
        self.max_quantity_per_user = Some(max);
        self
    }

    #[must_use]
    pub fn with_interval(mut self, interval: Interval) -> Self {
        self.interval = Some(interval);
        self
    }

    /// Units still available, `None` when unlimited.
    #[must_use]
    pub fn remaining(&self) -> Option<u32> {
        self.max_quantity.map(|max| max.saturating_sub(self.sold))
    }

    /// Price per unit when the tier imposes one.
    #[must_use]
    pub fn fixed_amount(&self) -> Option<i64> {
        match self.amount_type {
            TierAmountType::Fixed => self.amount,
            TierAmountType::Flexible => None,
        }
    }
}

// =============================================================================
// Orders
// =============================================================================

/// Order status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OrderStatus {
    Pending,
    Paid,
    Active,
    Cancelled,
    Error,
}

impl OrderStatus {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "PENDING",
            Self::Paid => "PAID",
            Self::Active => "ACTIVE",
            Self::Cancelled => "CANCELLED",
            Self::Error => "ERROR",
        }
    }

    /// Statuses only move forward.
    ///
    /// `ACTIVE -> ERROR` covers a recurring order whose renewals exhausted
    /// their retries.
    #[must_use]
    pub fn can_transition_to(&self, next: OrderStatus) -> bool {
        use OrderStatus::*;
        matches!(
            (self, next),
            (Pending, Paid | Active | Error | Cancelled) | (Active, Cancelled | Error)
        )
    }
}

impl fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Request context stored with an order.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct OrderMetadata {
    pub ip: Option<String>,
    pub user_agent: Option<String>,
    /// Response of the abuse-challenge verification.
    pub challenge_response: Option<serde_json::Value>,
    pub idempotency_key: Option<String>,
}

/// A single funding intent, one-off or recurring.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Order {
    pub id: Uuid,
    pub created_by_user_id: Uuid,
    pub from_account_id: Uuid,
    pub to_account_id: Uuid,
    pub tier_id: Option<Uuid>,
    pub quantity: u32,
    pub total_amount: i64,
    pub currency: String,
    pub interval: Option<Interval>,
    pub status: OrderStatus,
    pub description: String,
    pub public_message: Option<String>,
    pub processed_at: Option<DateTime<Utc>>,
    pub subscription_id: Option<Uuid>,
    pub referral_account_id: Option<Uuid>,
    pub payment_method_id: Option<Uuid>,
    pub matching_payment_method_id: Option<Uuid>,
    pub platform_fee_percent: Option<u32>,
    pub host_fee_percent: Option<u32>,
    pub metadata: OrderMetadata,
    /// Set once an initial charge has been started for this order.
    pub charge_locked: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Order {
    /// Move to `next`, rejecting backwards transitions.
    pub fn transition_to(&mut self, next: OrderStatus, now: DateTime<Utc>) -> Result<(), FundingError> {
        if !self.status.can_transition_to(next) {
            return Err(FundingError::InvalidStatusTransition {
                order_id: self.id,
                from: self.status,
                to: next,
            });
        }
        self.status = next;
        self.updated_at = now;
        Ok(())
    }

    /// Record the first successful processing. Later calls are no-ops.
    pub fn mark_processed(&mut self, now: DateTime<Utc>) {
        if self.processed_at.is_none() {
            self.processed_at = Some(now);
        }
    }

    #[must_use]
    pub fn is_processed(&self) -> bool {
        self.processed_at.is_some()
    }

    #[must_use]
    pub fn is_recurring(&self) -> bool {
        self.interval.is_some()
    }
}

// =============================================================================
// Subscriptions
// =============================================================================

/// Recurring-billing schedule backing a recurring order.
///
/// Amount changes never mutate a subscription; a successor is created and
/// linked through `previous_subscription_id` / `replaced_by_subscription_id`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Subscription {
    pub id: Uuid,
    pub amount: i64,
    pub currency: String,
    pub interval: Interval,
    pub is_active: bool,
    pub next_charge_date: Option<DateTime<Utc>>,
    pub next_period_start: Option<DateTime<Utc>>,
    pub charge_retry_count: u32,
    /// A renewal charge is running against this subscription.
    pub charge_in_progress: bool,
    pub activated_at: Option<DateTime<Utc>>,
    pub deactivated_at: Option<DateTime<Utc>>,
    pub previous_subscription_id: Option<Uuid>,
    pub replaced_by_subscription_id: Option<Uuid>,
    /// Optimistic-lock version; bumped on every write.
    pub version: u64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Subscription {
    /// A subscription that exists but does not charge yet (pledges).
    pub fn dormant(amount: i64, currency: &str, interval: Interval, now: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::new_v4(),
            amount,
            currency: currency.to_string(),
            interval,
            is_active: false,
            next_charge_date: None,
            next_period_start: None,
            charge_retry_count: 0,
            charge_in_progress: false,
            activated_at: None,
            deactivated_at: None,
            previous_subscription_id: None,
            replaced_by_subscription_id: None,
            version: 0,
            created_at: now,
            updated_at: now,
        }
    }

    /// Cancelled or replaced subscriptions have a deactivation timestamp.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.deactivated_at.is_some()
    }

    #[must_use]
    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        self.is_active
            && !self.charge_in_progress
            && self.next_charge_date.is_some_and(|date| date <= now)
    }

    /// Copy with the version bumped, ready for a compare-and-save.
    #[must_use]
    pub fn next_version(&self, now: DateTime<Utc>) -> Self {
        let mut next = self.clone();
        next.version = self.version + 1;
        next.updated_at = now;
        next
    }

    pub fn deactivate(&mut self, now: DateTime<Utc>) {
        self.is_active = false;
        self.charge_in_progress = false;
        self.deactivated_at = Some(now);
        self.updated_at = now;
    }

    /// Successor carrying a new amount; everything but identity,
    /// cancellation markers and lineage is copied.
    #[must_use]
    pub fn successor(&self, amount: i64, now: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::new_v4(),
            amount,
            charge_in_progress: false,
            deactivated_at: None,
            previous_subscription_id: Some(self.id),
            replaced_by_subscription_id: None,
            version: 0,
            created_at: now,
            updated_at: now,
            ..self.clone()
        }
    }
}

// =============================================================================
// Payment methods
// =============================================================================

/// Type of payment instrument.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PaymentMethodType {
    CreditCard,
    /// Offline reconciliation; no provider round-trip.
    Manual,
    /// Credit with a balance held on the platform.
    Prepaid,
}

impl PaymentMethodType {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::CreditCard => "creditcard",
            Self::Manual => "manual",
            Self::Prepaid => "prepaid",
        }
    }
}

/// A reusable payment instrument owned by one account.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaymentMethod {
    pub id: Uuid,
    pub account_id: Uuid,
    pub name: String,
    pub service: String,
    pub kind: PaymentMethodType,
    /// Opaque provider token.
    pub token: Option<String>,
    pub currency: String,
    /// Remaining balance for prepaid credit.
    pub balance: Option<i64>,
    pub initial_balance: Option<i64>,
    /// Matching multiplier when the instrument is a matching fund.
    pub matching: Option<u32>,
    pub expiry: Option<DateTime<Utc>>,
    /// Account that issued prepaid credit.
    pub source_account_id: Option<Uuid>,
    pub created_by_user_id: Option<Uuid>,
    pub created_at: DateTime<Utc>,
}

impl PaymentMethod {
    /// Synthetic manual instrument used for offline reconciliation. Never persisted.
    pub fn manual(account_id: Uuid, currency: &str) -> Self {
        Self {
            id: Uuid::nil(),
            account_id,
            name: "Manual payment".to_string(),
            service: INTERNAL_SERVICE.to_string(),
            kind: PaymentMethodType::Manual,
            token: None,
            currency: currency.to_string(),
            balance: None,
            initial_balance: None,
            matching: None,
            expiry: None,
            source_account_id: None,
            created_by_user_id: None,
            created_at: Utc::now(),
        }
    }

    #[must_use]
    pub fn is_synthetic(&self) -> bool {
        self.id.is_nil()
    }

    #[must_use]
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expiry.is_some_and(|expiry| expiry <= now)
    }
}

// =============================================================================
// Transactions
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TransactionKind {
    Credit,
    Debit,
}

impl TransactionKind {
    #[must_use]
    pub fn opposite(&self) -> Self {
        match self {
            Self::Credit => Self::Debit,
            Self::Debit => Self::Credit,
        }
    }
}

/// Immutable ledger entry on `account_id`'s books.
///
/// Credits carry positive amounts and debits negative ones. Entries of one
/// money movement share a `group_id`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transaction {
    pub id: Uuid,
    pub group_id: Uuid,
    pub kind: TransactionKind,
    pub order_id: Uuid,
    pub account_id: Uuid,
    pub counterparty_account_id: Uuid,
    pub amount: i64,
    /// Amount after platform, host and processor fees.
    pub net_amount: i64,
    pub currency: String,
    pub platform_fee: i64,
    pub host_fee: i64,
    pub processor_fee: i64,
    pub payment_method_id: Option<Uuid>,
    pub provider_reference: Option<String>,
    /// Set on compensating entries created by a refund.
    pub refund_of_transaction_id: Option<Uuid>,
    pub description: String,
    pub created_at: DateTime<Utc>,
}

impl Transaction {
    #[must_use]
    pub fn is_refund(&self) -> bool {
        self.refund_of_transaction_id.is_some()
    }

    /// Compensating entry reversing this one.
    #[must_use]
    pub fn reversal(&self, group_id: Uuid, now: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::new_v4(),
            group_id,
            kind: self.kind.opposite(),
            amount: -self.amount,
            net_amount: -self.net_amount,
            platform_fee: -self.platform_fee,
            host_fee: -self.host_fee,
            processor_fee: -self.processor_fee,
            refund_of_transaction_id: Some(self.id),
            description: format!("Refund of \"{}\"", self.description),
            created_at: now,
            ..self.clone()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_status_transitions_only_move_forward() {
        use OrderStatus::*;
        assert!(Pending.can_transition_to(Paid));
        assert!(Pending.can_transition_to(Active));
        assert!(Pending.can_transition_to(Error));
        assert!(Pending.can_transition_to(Cancelled));
        assert!(Active.can_transition_to(Cancelled));
        assert!(Active.can_transition_to(Error));

        assert!(!Paid.can_transition_to(Pending));
        assert!(!Cancelled.can_transition_to(Active));
        assert!(!Error.can_transition_to(Paid));
        assert!(!Active.can_transition_to(Pending));
        assert!(!Pending.can_transition_to(Pending));
    }

    #[test]
    fn test_interval_advance_clamps_month_end() {
        let jan31 = Utc.with_ymd_and_hms(2025, 1, 31, 12, 0, 0).unwrap();
        let next = Interval::Month.advance(jan31);
        assert_eq!(next, Utc.with_ymd_and_hms(2025, 2, 28, 12, 0, 0).unwrap());

        let next = Interval::Year.advance(jan31);
        assert_eq!(next, Utc.with_ymd_and_hms(2026, 1, 31, 12, 0, 0).unwrap());
    }

    #[test]
    fn test_tier_amounts() {
        let account = Uuid::new_v4();
        let tier = Tier::new(account, "Backer").fixed(500).with_max_quantity(10);
        assert_eq!(tier.fixed_amount(), Some(500));
        assert_eq!(tier.remaining(), Some(10));

        let tier = Tier::new(account, "Sponsor").flexible(1000);
        assert_eq!(tier.fixed_amount(), None);
        assert_eq!(tier.remaining(), None);
    }

    #[test]
    fn test_subscription_successor_keeps_schedule() {
        let now = Utc::now();
        let mut sub = Subscription::dormant(1000, "USD", Interval::Month, now);
        sub.is_active = true;
        sub.next_charge_date = Some(now);
        sub.charge_retry_count = 2;
        sub.version = 7;

        let next = sub.successor(2000, now);
        assert_ne!(next.id, sub.id);
        assert_eq!(next.amount, 2000);
        assert_eq!(next.previous_subscription_id, Some(sub.id));
        assert!(next.is_active);
        assert_eq!(next.next_charge_date, sub.next_charge_date);
        assert_eq!(next.charge_retry_count, 2);
        assert_eq!(next.version, 0);
        assert!(next.deactivated_at.is_none());
    }

    #[test]
    fn test_transaction_reversal() {
        let tx = Transaction {
            id: Uuid::new_v4(),
            group_id: Uuid::new_v4(),
            kind: TransactionKind::Credit,
            order_id: Uuid::new_v4(),
            account_id: Uuid::new_v4(),
            counterparty_account_id: Uuid::new_v4(),
            amount: 1000,
            net_amount: 900,
            currency: "USD".to_string(),
            platform_fee: 50,
            host_fee: 50,
            processor_fee: 0,
            payment_method_id: None,
            provider_reference: None,
            refund_of_transaction_id: None,
            description: "Donation".to_string(),
            created_at: Utc::now(),
        };

        let group = Uuid::new_v4();
        let reversal = tx.reversal(group, Utc::now());
        assert_eq!(reversal.kind, TransactionKind::Debit);
        assert_eq!(reversal.amount, -1000);
        assert_eq!(reversal.net_amount, -900);
        assert_eq!(reversal.refund_of_transaction_id, Some(tx.id));
        assert_eq!(reversal.account_id, tx.account_id);
        assert_eq!(reversal.group_id, group);
    }

    #[test]
    fn test_pledged_account() {
        let account = Account::pledged("rust-lang/rust", None, "usd");
        assert_eq!(account.name, "rust");
        assert_eq!(account.slug, "rust-lang-rust");
        assert!(account.is_pledged);
        assert!(!account.is_active);
        assert_eq!(account.currency, "USD");
    }

    #[test]
    fn test_manual_payment_method_is_synthetic() {
        let pm = PaymentMethod::manual(Uuid::new_v4(), "USD");
        assert!(pm.is_synthetic());
        assert_eq!(pm.kind, PaymentMethodType::Manual);
    }
}
