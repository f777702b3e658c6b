//! Test fixtures: a fully wired [`FundingService`] over in-memory
//! collaborators, plus helpers to seed accounts, tiers and instruments.

use super::mocks::{
    MockPaymentProvider, RecordingActivityEmitter, StaticChallengeVerifier,
    StaticPopularityVerifier,
};
use crate::config::{Config, ConfigBuilder};
use crate::funding::{
    Account, AccountKind, FundingService, FundingStore, InMemoryFundingStore, MemberRole,
    Membership, PaymentMethod, PaymentMethodType, RequestContext, Tier, User,
};
use crate::ratelimit::{InMemoryCounterStore, OrderLimitConfig};
use chrono::{Duration, Utc};
use std::sync::Arc;
use uuid::Uuid;

/// Helper functions for generating fake test data
pub mod fake {
    use uuid::Uuid;

    /// Generate a fake email address
    pub fn email() -> String {
        format!("test-{}@example.com", Uuid::new_v4().simple())
    }

    /// Generate a fake account name
    pub fn name() -> String {
        format!("Test Account {}", &Uuid::new_v4().simple().to_string()[..8])
    }

    /// Generate a fake provider token
    pub fn card_token() -> String {
        format!("tok_{}", &Uuid::new_v4().simple().to_string()[..12])
    }

    /// Generate a fake source address
    pub fn ip() -> String {
        let id = Uuid::new_v4();
        let bytes = id.as_bytes();
        format!("10.{}.{}.{}", bytes[0], bytes[1], bytes[2])
    }
}

/// Request context of an anonymous browser that solved the challenge.
pub fn anonymous_context() -> RequestContext {
    RequestContext {
        ip: Some(fake::ip()),
        user_agent: Some("Mozilla/5.0 (fundway tests)".to_string()),
        challenge_token: Some("challenge-ok".to_string()),
    }
}

/// Request context of a signed-in user.
pub fn authenticated_context() -> RequestContext {
    RequestContext {
        ip: Some(fake::ip()),
        user_agent: Some("Mozilla/5.0 (fundway tests)".to_string()),
        challenge_token: None,
    }
}

/// Config used by [`TestFunding`]: rate limits off, development messages on.
pub fn test_config() -> Config {
    ConfigBuilder::new()
        .with_order_limits(OrderLimitConfig::permissive())
        .with_dev_mode(true)
        .build()
}

/// A funding service wired to inspectable in-memory collaborators.
#[derive(Clone)]
pub struct TestFunding {
    pub service: FundingService,
    pub store: InMemoryFundingStore,
    pub provider: MockPaymentProvider,
    pub activities: RecordingActivityEmitter,
    pub counters: InMemoryCounterStore,
}

impl TestFunding {
    /// Service with [`test_config`], a challenge verifier accepting every
    /// token, and the pledge handles `acme/popular` (250 stars) and
    /// `acme/obscure` (12 stars).
    pub fn new() -> Self {
        Self::builder().build()
    }

    pub fn builder() -> TestFundingBuilder {
        TestFundingBuilder::default()
    }

    /// A user with a personal account.
    pub async fn user(&self) -> User {
        let (user, account) = User::with_account(&fake::email(), Some(&fake::name()), "USD");
        self.store.create_account(&account).await.unwrap();
        self.store.create_user(&user).await.unwrap();
        user
    }

    /// A platform superuser.
    pub async fn root_user(&self) -> User {
        let (mut user, account) = User::with_account(&fake::email(), Some("Platform"), "USD");
        user.is_root = true;
        self.store.create_account(&account).await.unwrap();
        self.store.create_user(&user).await.unwrap();
        user
    }

    /// An account of `kind`, administered by `admin` when given.
    pub async fn account(&self, kind: AccountKind, admin: Option<&User>) -> Account {
        let account = Account::new(kind, fake::name(), "USD");
        self.store.create_account(&account).await.unwrap();
        if let Some(admin) = admin {
            self.store
                .add_member(&Membership::new(admin.account_id, account.id, MemberRole::Admin))
                .await
                .unwrap();
        }
        account
    }

    /// A fiscal host administered by `admin`.
    pub async fn host(&self, admin: &User) -> Account {
        self.account(AccountKind::Organization, Some(admin)).await
    }

    /// An active collective hosted by `host`, charging `host_fee_percent`.
    pub async fn collective(&self, host: &Account, host_fee_percent: u32) -> Account {
        let collective = Account::new(AccountKind::Collective, fake::name(), "USD")
            .with_host(host.id)
            .with_host_fee_percent(host_fee_percent);
        self.store.create_account(&collective).await.unwrap();
        collective
    }

    /// An active event hosted by `host`.
    pub async fn event(&self, host: &Account) -> Account {
        let event = Account::new(AccountKind::Event, fake::name(), "USD").with_host(host.id);
        self.store.create_account(&event).await.unwrap();
        event
    }

    pub async fn tier(&self, tier: Tier) -> Tier {
        self.store.create_tier(&tier).await.unwrap();
        tier
    }

    /// A saved credit card owned by `account_id`.
    pub async fn card(&self, account_id: Uuid) -> PaymentMethod {
        let mut pm = PaymentMethod::manual(account_id, "USD");
        pm.id = Uuid::new_v4();
        pm.name = "Visa 4242".to_string();
        pm.service = "stripe".to_string();
        pm.kind = PaymentMethodType::CreditCard;
        pm.token = Some(fake::card_token());
        pm.expiry = Some(Utc::now() + Duration::days(365));
        self.store.create_payment_method(&pm).await.unwrap();
        pm
    }

    /// Prepaid credit owned by `account_id`.
    pub async fn prepaid(&self, account_id: Uuid, balance: i64) -> PaymentMethod {
        let mut pm = PaymentMethod::manual(account_id, "USD");
        pm.id = Uuid::new_v4();
        pm.name = "Prepaid credit".to_string();
        pm.service = crate::funding::INTERNAL_SERVICE.to_string();
        pm.kind = PaymentMethodType::Prepaid;
        pm.balance = Some(balance);
        pm.initial_balance = Some(balance);
        pm.expiry = Some(Utc::now() + Duration::days(365));
        self.store.create_payment_method(&pm).await.unwrap();
        pm
    }

    /// A matching fund owned by `account_id` that doubles (`factor`)
    /// contributions up to `balance`.
    pub async fn matching_fund(&self, account_id: Uuid, factor: u32, balance: i64) -> PaymentMethod {
        let mut pm = self.prepaid(account_id, balance).await;
        pm.name = "Matching fund".to_string();
        pm.matching = Some(factor);
        self.store.create_payment_method(&pm).await.unwrap();
        pm
    }
}

impl Default for TestFunding {
    fn default() -> Self {
        Self::new()
    }
}

/// Builder for [`TestFunding`].
#[must_use = "builder does nothing until you call build()"]
#[derive(Default)]
pub struct TestFundingBuilder {
    config: Option<Config>,
    challenge: Option<StaticChallengeVerifier>,
    activities: Option<RecordingActivityEmitter>,
}

impl TestFundingBuilder {
    pub fn with_config(mut self, config: Config) -> Self {
        self.config = Some(config);
        self
    }

    pub fn with_challenge(mut self, challenge: StaticChallengeVerifier) -> Self {
        self.challenge = Some(challenge);
        self
    }

    pub fn with_activities(mut self, activities: RecordingActivityEmitter) -> Self {
        self.activities = Some(activities);
        self
    }

    pub fn build(self) -> TestFunding {
        let store = InMemoryFundingStore::new();
        let provider = MockPaymentProvider::new();
        let activities = self.activities.unwrap_or_default();
        let counters = InMemoryCounterStore::new();
        let popularity = StaticPopularityVerifier::new()
            .with_handle("acme/popular", 250)
            .with_handle("acme/obscure", 12);

        let service = FundingService::builder()
            .with_store(Arc::new(store.clone()))
            .with_counters(Arc::new(counters.clone()))
            .with_provider(Arc::new(provider.clone()))
            .with_popularity_verifier(Arc::new(popularity))
            .with_challenge_verifier(Arc::new(self.challenge.unwrap_or_default()))
            .with_activities(Arc::new(activities.clone()))
            .with_config(self.config.unwrap_or_else(test_config))
            .build()
            .unwrap();

        TestFunding {
            service,
            store,
            provider,
            activities,
            counters,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fake_email() {
        let email = fake::email();
        assert!(email.contains("@example.com"));
        assert!(email.starts_with("test-"));
    }

    #[tokio::test]
    async fn test_seeded_collective_is_hosted() {
        let funding = TestFunding::new();
        let admin = funding.user().await;
        let host = funding.host(&admin).await;
        let collective = funding.collective(&host, 10).await;

        let stored = funding.store.get_account(collective.id).await.unwrap().unwrap();
        assert_eq!(stored.host_id, Some(host.id));
        assert!(stored.is_active);

        let roles = funding
            .store
            .get_member_roles(admin.account_id, host.id)
            .await
            .unwrap();
        assert_eq!(roles, vec![MemberRole::Admin]);
    }
}
