//! Storage trait for funding data.
//!
//! Implement [`FundingStore`] to persist accounts, orders, subscriptions and
//! the ledger to your database. Multi-row writes (`commit_charge`,
//! `replace_subscription`, `commit_refund`, ...) must be applied in a single
//! database transaction.

use super::error::FundingError;
use super::model::{
    Account, MemberRole, Membership, Order, OrderStatus, PaymentMethod, PaymentMethodType,
    Subscription, Tier, Transaction, User,
};
use crate::error::{FundwayError, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};
use uuid::Uuid;

/// A subscription row to write as part of a larger commit.
#[derive(Debug, Clone)]
pub struct SubscriptionWrite {
    pub subscription: Subscription,
    /// `None` inserts a new row; `Some(v)` updates only if the stored version is `v`.
    pub expected_version: Option<u64>,
}

impl SubscriptionWrite {
    pub fn insert(subscription: Subscription) -> Self {
        Self {
            subscription,
            expected_version: None,
        }
    }

    pub fn update(subscription: Subscription, expected_version: u64) -> Self {
        Self {
            subscription,
            expected_version: Some(expected_version),
        }
    }
}

/// Everything a successful charge writes.
#[derive(Debug, Clone)]
pub struct ChargeCommit {
    pub order: Order,
    pub subscription: Option<SubscriptionWrite>,
    pub transactions: Vec<Transaction>,
    pub memberships: Vec<Membership>,
    /// Prepaid instrument to debit: `(payment_method_id, amount)`.
    pub prepaid_debit: Option<(Uuid, i64)>,
}

/// Atomic swap of a subscription for its successor.
#[derive(Debug, Clone)]
pub struct SubscriptionReplacement {
    pub old_order: Order,
    pub old_subscription: Subscription,
    pub expected_version: u64,
    pub new_order: Order,
    pub new_subscription: Subscription,
}

/// Everything a refund writes.
#[derive(Debug, Clone)]
pub struct RefundCommit {
    /// Compensating entries, each with `refund_of_transaction_id` set.
    pub transactions: Vec<Transaction>,
    /// Prepaid instrument to re-credit: `(payment_method_id, amount)`.
    pub prepaid_credit: Option<(Uuid, i64)>,
}

/// Trait for storing funding data.
#[async_trait]
pub trait FundingStore: Send + Sync {
    // Accounts and users

    async fn get_account(&self, id: Uuid) -> Result<Option<Account>>;

    async fn find_account_by_external_handle(&self, handle: &str) -> Result<Option<Account>>;

    async fn create_account(&self, account: &Account) -> Result<()>;

    /// Case-insensitive lookup.
    async fn find_user_by_email(&self, email: &str) -> Result<Option<User>>;

    async fn create_user(&self, user: &User) -> Result<()>;

    // Memberships

    /// Roles `member_account_id` holds on `account_id`.
    async fn get_member_roles(
        &self,
        member_account_id: Uuid,
        account_id: Uuid,
    ) -> Result<Vec<MemberRole>>;

    /// Add a membership. Adding an existing (member, account, role) triple is a no-op.
    async fn add_member(&self, membership: &Membership) -> Result<()>;

    // Tiers

    async fn get_tier(&self, id: Uuid) -> Result<Option<Tier>>;

    async fn create_tier(&self, tier: &Tier) -> Result<()>;

    /// Reserve `quantity` units if enough remain.
    ///
    /// Returns `Ok(false)` when the tier cannot supply the units.
    async fn reserve_tier_stock(&self, tier_id: Uuid, quantity: u32) -> Result<bool>;

    /// Give back units reserved by a failed order.
    async fn release_tier_stock(&self, tier_id: Uuid, quantity: u32) -> Result<()>;

    // Orders

    async fn create_order(&self, order: &Order) -> Result<()>;

    async fn get_order(&self, id: Uuid) -> Result<Option<Order>>;

    async fn save_order(&self, order: &Order) -> Result<()>;

    async fn find_order_by_subscription(&self, subscription_id: Uuid) -> Result<Option<Order>>;

    /// Claim the right to run the initial charge of a pending order.
    ///
    /// Returns `Ok(false)` if the order is not pending or was already claimed.
    async fn lock_order_for_charge(&self, order_id: Uuid) -> Result<bool>;

    // Subscriptions

    async fn create_subscription(&self, subscription: &Subscription) -> Result<()>;

    async fn get_subscription(&self, id: Uuid) -> Result<Option<Subscription>>;

    /// Save only if the stored version equals `expected_version`.
    ///
    /// Returns `Ok(false)` on a version mismatch.
    async fn compare_and_save_subscription(
        &self,
        subscription: &Subscription,
        expected_version: u64,
    ) -> Result<bool>;

    /// Save an order together with its subscription under the subscription's
    /// version check.
    async fn save_order_and_subscription(
        &self,
        order: &Order,
        subscription: &Subscription,
        expected_version: u64,
    ) -> Result<bool>;

    /// Deactivate a subscription and its order and insert their successors.
    ///
    /// Returns `Ok(false)` if the old subscription changed in between.
    async fn replace_subscription(&self, replacement: &SubscriptionReplacement) -> Result<bool>;

    /// Active subscriptions whose next charge date is due and that no
    /// renewal is currently charging.
    async fn list_due_subscriptions(&self, now: DateTime<Utc>) -> Result<Vec<Subscription>>;

    // Payment methods

    async fn get_payment_method(&self, id: Uuid) -> Result<Option<PaymentMethod>>;

    async fn create_payment_method(&self, payment_method: &PaymentMethod) -> Result<()>;

    // Ledger

    /// Write the outcome of a successful charge atomically.
    ///
    /// Fails without writing anything if the prepaid balance is short or the
    /// subscription version check fails.
    async fn commit_charge(&self, commit: &ChargeCommit) -> Result<()>;

    async fn get_transaction(&self, id: Uuid) -> Result<Option<Transaction>>;

    async fn list_order_transactions(&self, order_id: Uuid) -> Result<Vec<Transaction>>;

    /// Compensating entry already recorded for `transaction_id`, if any.
    async fn find_refund_of(&self, transaction_id: Uuid) -> Result<Option<Transaction>>;

    /// Claim the right to refund the transaction group `group_id`.
    ///
    /// Returns `Ok(false)` if another refund holds or completed the claim.
    async fn claim_refund(&self, group_id: Uuid) -> Result<bool>;

    /// Drop a claim taken by [`FundingStore::claim_refund`] after a failed refund.
    async fn release_refund_claim(&self, group_id: Uuid) -> Result<()>;

    /// Write a refund atomically. Fails if any entry was already refunded.
    async fn commit_refund(&self, commit: &RefundCommit) -> Result<()>;
}

// =============================================================================
// In-memory implementation
// =============================================================================

/// In-memory funding store.
///
/// One lock guards every table so multi-row commits are atomic. Wraps data
/// in `Arc` for cheap cloning.
#[derive(Default, Clone)]
pub struct InMemoryFundingStore {
    inner: Arc<RwLock<Tables>>,
}

#[derive(Default)]
struct Tables {
    accounts: HashMap<Uuid, Account>,
    users: HashMap<Uuid, User>,
    memberships: Vec<Membership>,
    tiers: HashMap<Uuid, Tier>,
    orders: HashMap<Uuid, Order>,
    subscriptions: HashMap<Uuid, Subscription>,
    payment_methods: HashMap<Uuid, PaymentMethod>,
    transactions: Vec<Transaction>,
    refund_claims: HashSet<Uuid>,
}

fn poisoned() -> FundwayError {
    FundwayError::internal("funding store lock poisoned")
}

fn conflict(entity: &str) -> FundwayError {
    FundingError::ConcurrentModification {
        entity: entity.to_string(),
    }
    .into()
}

impl Tables {
    fn version_matches(&self, id: Uuid, expected: u64) -> bool {
        self.subscriptions
            .get(&id)
            .is_some_and(|current| current.version == expected)
    }

    fn add_member(&mut self, membership: &Membership) {
        let exists = self.memberships.iter().any(|m| {
            m.member_account_id == membership.member_account_id
                && m.account_id == membership.account_id
                && m.role == membership.role
        });
        if !exists {
            self.memberships.push(membership.clone());
        }
    }

    fn prepaid_balance(&self, payment_method_id: Uuid) -> Result<i64> {
        let pm = self
            .payment_methods
            .get(&payment_method_id)
            .filter(|pm| pm.kind == PaymentMethodType::Prepaid)
            .ok_or(FundingError::PaymentMethodNotFound { payment_method_id })?;
        Ok(pm.balance.unwrap_or(0))
    }

    fn adjust_balance(&mut self, payment_method_id: Uuid, delta: i64) {
        if let Some(pm) = self.payment_methods.get_mut(&payment_method_id) {
            pm.balance = Some(pm.balance.unwrap_or(0) + delta);
        }
    }
}

impl InMemoryFundingStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> Result<RwLockReadGuard<'_, Tables>> {
        self.inner.read().map_err(|_| poisoned())
    }

    fn write(&self) -> Result<RwLockWriteGuard<'_, Tables>> {
        self.inner.write().map_err(|_| poisoned())
    }

    /// All orders (for testing).
    pub fn all_orders(&self) -> Vec<Order> {
        self.read()
            .map(|t| t.orders.values().cloned().collect())
            .unwrap_or_default()
    }

    /// All ledger entries (for testing).
    pub fn all_transactions(&self) -> Vec<Transaction> {
        self.read()
            .map(|t| t.transactions.clone())
            .unwrap_or_default()
    }

    /// All accounts (for testing).
    pub fn all_accounts(&self) -> Vec<Account> {
        self.read()
            .map(|t| t.accounts.values().cloned().collect())
            .unwrap_or_default()
    }

    /// All subscriptions (for testing).
    pub fn all_subscriptions(&self) -> Vec<Subscription> {
        self.read()
            .map(|t| t.subscriptions.values().cloned().collect())
            .unwrap_or_default()
    }

    /// All payment methods (for testing).
    pub fn all_payment_methods(&self) -> Vec<PaymentMethod> {
        self.read()
            .map(|t| t.payment_methods.values().cloned().collect())
            .unwrap_or_default()
    }
}

#[async_trait]
impl FundingStore for InMemoryFundingStore {
    async fn get_account(&self, id: Uuid) -> Result<Option<Account>> {
        Ok(self.read()?.accounts.get(&id).cloned())
    }

    async fn find_account_by_external_handle(&self, handle: &str) -> Result<Option<Account>> {
        let handle = handle.to_lowercase();
        Ok(self
            .read()?
            .accounts
            .values()
            .find(|a| {
                a.external_handle
                    .as_deref()
                    .is_some_and(|h| h.to_lowercase() == handle)
            })
            .cloned())
    }

    async fn create_account(&self, account: &Account) -> Result<()> {
        self.write()?.accounts.insert(account.id, account.clone());
        Ok(())
    }

    async fn find_user_by_email(&self, email: &str) -> Result<Option<User>> {
        let email = email.trim().to_lowercase();
        Ok(self
            .read()?
            .users
            .values()
            .find(|u| u.email.to_lowercase() == email)
            .cloned())
    }

    async fn create_user(&self, user: &User) -> Result<()> {
        self.write()?.users.insert(user.id, user.clone());
        Ok(())
    }

    async fn get_member_roles(
        &self,
        member_account_id: Uuid,
        account_id: Uuid,
    ) -> Result<Vec<MemberRole>> {
        Ok(self
            .read()?
            .memberships
            .iter()
            .filter(|m| m.member_account_id == member_account_id && m.account_id == account_id)
            .map(|m| m.role)
            .collect())
    }

    async fn add_member(&self, membership: &Membership) -> Result<()> {
        self.write()?.add_member(membership);
        Ok(())
    }

    async fn get_tier(&self, id: Uuid) -> Result<Option<Tier>> {
        Ok(self.read()?.tiers.get(&id).cloned())
    }

    async fn create_tier(&self, tier: &Tier) -> Result<()> {
        self.write()?.tiers.insert(tier.id, tier.clone());
        Ok(())
    }

    async fn reserve_tier_stock(&self, tier_id: Uuid, quantity: u32) -> Result<bool> {
        let mut tables = self.write()?;
        let tier = tables
            .tiers
            .get_mut(&tier_id)
            .ok_or(FundingError::TierNotFound { tier_id })?;
        if tier.remaining().is_some_and(|left| left < quantity) {
            return Ok(false);
        }
        tier.sold = tier.sold.saturating_add(quantity);
        Ok(true)
    }

    async fn release_tier_stock(&self, tier_id: Uuid, quantity: u32) -> Result<()> {
        if let Some(tier) = self.write()?.tiers.get_mut(&tier_id) {
            tier.sold = tier.sold.saturating_sub(quantity);
        }
        Ok(())
    }

    async fn create_order(&self, order: &Order) -> Result<()> {
        self.write()?.orders.insert(order.id, order.clone());
        Ok(())
    }

    async fn get_order(&self, id: Uuid) -> Result<Option<Order>> {
        Ok(self.read()?.orders.get(&id).cloned())
    }

    async fn save_order(&self, order: &Order) -> Result<()> {
        self.write()?.orders.insert(order.id, order.clone());
        Ok(())
    }

    async fn find_order_by_subscription(&self, subscription_id: Uuid) -> Result<Option<Order>> {
        Ok(self
            .read()?
            .orders
            .values()
            .find(|o| o.subscription_id == Some(subscription_id))
            .cloned())
    }

    async fn lock_order_for_charge(&self, order_id: Uuid) -> Result<bool> {
        let mut tables = self.write()?;
        let order = tables
            .orders
            .get_mut(&order_id)
            .ok_or(FundingError::OrderNotFound { order_id })?;
        if order.status != OrderStatus::Pending || order.charge_locked {
            return Ok(false);
        }
        order.charge_locked = true;
        Ok(true)
    }

    async fn create_subscription(&self, subscription: &Subscription) -> Result<()> {
        self.write()?
            .subscriptions
            .insert(subscription.id, subscription.clone());
        Ok(())
    }

    async fn get_subscription(&self, id: Uuid) -> Result<Option<Subscription>> {
        Ok(self.read()?.subscriptions.get(&id).cloned())
    }

    async fn compare_and_save_subscription(
        &self,
        subscription: &Subscription,
        expected_version: u64,
    ) -> Result<bool> {
        let mut tables = self.write()?;
        if !tables.version_matches(subscription.id, expected_version) {
            return Ok(false);
        }
        tables
            .subscriptions
            .insert(subscription.id, subscription.clone());
        Ok(true)
    }

    async fn save_order_and_subscription(
        &self,
        order: &Order,
        subscription: &Subscription,
        expected_version: u64,
    ) -> Result<bool> {
        let mut tables = self.write()?;
        if !tables.version_matches(subscription.id, expected_version) {
            return Ok(false);
        }
        tables
            .subscriptions
            .insert(subscription.id, subscription.clone());
        tables.orders.insert(order.id, order.clone());
        Ok(true)
    }

    async fn replace_subscription(&self, replacement: &SubscriptionReplacement) -> Result<bool> {
        let mut tables = self.write()?;
        if !tables.version_matches(replacement.old_subscription.id, replacement.expected_version) {
            return Ok(false);
        }
        let old = &replacement.old_subscription;
        let new = &replacement.new_subscription;
        tables.subscriptions.insert(old.id, old.clone());
        tables.subscriptions.insert(new.id, new.clone());
        tables
            .orders
            .insert(replacement.old_order.id, replacement.old_order.clone());
        tables
            .orders
            .insert(replacement.new_order.id, replacement.new_order.clone());
        Ok(true)
    }

    async fn list_due_subscriptions(&self, now: DateTime<Utc>) -> Result<Vec<Subscription>> {
        let mut due: Vec<Subscription> = self
            .read()?
            .subscriptions
            .values()
            .filter(|s| s.is_due(now))
            .cloned()
            .collect();
        due.sort_by_key(|s| s.next_charge_date);
        Ok(due)
    }

    async fn get_payment_method(&self, id: Uuid) -> Result<Option<PaymentMethod>> {
        Ok(self.read()?.payment_methods.get(&id).cloned())
    }

    async fn create_payment_method(&self, payment_method: &PaymentMethod) -> Result<()> {
        self.write()?
            .payment_methods
            .insert(payment_method.id, payment_method.clone());
        Ok(())
    }

    async fn commit_charge(&self, commit: &ChargeCommit) -> Result<()> {
        let mut tables = self.write()?;

        // Check everything before writing anything
        if let Some((pm_id, amount)) = commit.prepaid_debit {
            let available = tables.prepaid_balance(pm_id)?;
            if available < amount {
                return Err(FundingError::InsufficientBalance {
                    available,
                    required: amount,
                }
                .into());
            }
        }
        if let Some(write) = &commit.subscription
            && let Some(expected) = write.expected_version
            && !tables.version_matches(write.subscription.id, expected)
        {
            return Err(conflict("subscription"));
        }

        if let Some((pm_id, amount)) = commit.prepaid_debit {
            tables.adjust_balance(pm_id, -amount);
        }
        if let Some(write) = &commit.subscription {
            tables
                .subscriptions
                .insert(write.subscription.id, write.subscription.clone());
        }
        for membership in &commit.memberships {
            tables.add_member(membership);
        }
        tables
            .transactions
            .extend(commit.transactions.iter().cloned());
        tables.orders.insert(commit.order.id, commit.order.clone());
        Ok(())
    }

    async fn get_transaction(&self, id: Uuid) -> Result<Option<Transaction>> {
        Ok(self
            .read()?
            .transactions
            .iter()
            .find(|t| t.id == id)
            .cloned())
    }

    async fn list_order_transactions(&self, order_id: Uuid) -> Result<Vec<Transaction>> {
        Ok(self
            .read()?
            .transactions
            .iter()
            .filter(|t| t.order_id == order_id)
            .cloned()
            .collect())
    }

    async fn find_refund_of(&self, transaction_id: Uuid) -> Result<Option<Transaction>> {
        Ok(self
            .read()?
            .transactions
            .iter()
            .find(|t| t.refund_of_transaction_id == Some(transaction_id))
            .cloned())
    }

    async fn claim_refund(&self, group_id: Uuid) -> Result<bool> {
        Ok(self.write()?.refund_claims.insert(group_id))
    }

    async fn release_refund_claim(&self, group_id: Uuid) -> Result<()> {
        self.write()?.refund_claims.remove(&group_id);
        Ok(())
    }

    async fn commit_refund(&self, commit: &RefundCommit) -> Result<()> {
        let mut tables = self.write()?;

        for entry in &commit.transactions {
            if let Some(original) = entry.refund_of_transaction_id
                && tables
                    .transactions
                    .iter()
                    .any(|t| t.refund_of_transaction_id == Some(original))
            {
                return Err(FundingError::AlreadyRefunded {
                    transaction_id: original,
                }
                .into());
            }
        }

        if let Some((pm_id, amount)) = commit.prepaid_credit {
            tables.adjust_balance(pm_id, amount);
        }
        tables
            .transactions
            .extend(commit.transactions.iter().cloned());
        Ok(())
    }
}
