//! Order validation.
//!
//! Applies every business rule to a creation request and produces a
//! [`ValidatedOrder`]: a fully-resolved draft the executor consumes once.
//! Nothing is written here; accounts and users that do not exist yet are
//! carried as drafts.

use super::access::{has_any_role, is_admin_of};
use super::error::FundingError;
use super::input::{AccountReference, CreateOrderInput, MAX_AMOUNT, SourceAccountInput};
use super::model::{
    Account, AccountKind, Interval, MemberRole, OrderMetadata, PaymentMethod, RequestContext,
    Requester, Tier, User,
};
use super::payment_method::PaymentRef;
use super::storage::FundingStore;
use super::verification::{ChallengeVerifier, PopularityVerifier};
use crate::config::PledgeConfig;
use crate::error::{FundwayError, Result};
use chrono::Utc;
use std::sync::Arc;
use uuid::Uuid;
use validator::Validate;

/// Currency for pledged accounts created without one.
const DEFAULT_CURRENCY: &str = "USD";

/// An account that exists, or one to create on execution.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AccountDraft {
    Existing(Account),
    New(Account),
}

impl AccountDraft {
    #[must_use]
    pub fn account(&self) -> &Account {
        match self {
            Self::Existing(account) | Self::New(account) => account,
        }
    }

    #[must_use]
    pub fn is_new(&self) -> bool {
        matches!(self, Self::New(_))
    }
}

/// The acting user, or a new one with its personal account.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UserDraft {
    Existing(User),
    New { user: User, account: Account },
}

impl UserDraft {
    #[must_use]
    pub fn user(&self) -> &User {
        match self {
            Self::Existing(user) | Self::New { user, .. } => user,
        }
    }
}

/// A creation request that passed every check.
#[derive(Debug, Clone)]
pub struct ValidatedOrder {
    pub destination: AccountDraft,
    pub source: AccountDraft,
    pub user: UserDraft,
    pub tier: Option<Tier>,
    pub matching_fund: Option<PaymentMethod>,
    pub referral_account_id: Option<Uuid>,
    pub quantity: u32,
    pub amount: i64,
    pub currency: String,
    pub interval: Option<Interval>,
    pub description: String,
    pub public_message: Option<String>,
    pub payment_required: bool,
    pub payment: Option<PaymentRef>,
    pub platform_fee_percent: Option<u32>,
    pub host_fee_percent: Option<u32>,
    pub metadata: OrderMetadata,
}

/// Builder for [`ValidatedOrder`].
#[derive(Debug, Default)]
#[must_use = "builder does nothing until you call build()"]
pub struct ValidatedOrderBuilder {
    destination: Option<AccountDraft>,
    source: Option<AccountDraft>,
    user: Option<UserDraft>,
    tier: Option<Tier>,
    matching_fund: Option<PaymentMethod>,
    referral_account_id: Option<Uuid>,
    quantity: u32,
    amount: i64,
    currency: Option<String>,
    interval: Option<Interval>,
    description: Option<String>,
    public_message: Option<String>,
    payment_required: bool,
    payment: Option<PaymentRef>,
    platform_fee_percent: Option<u32>,
    host_fee_percent: Option<u32>,
    metadata: OrderMetadata,
}

impl ValidatedOrderBuilder {
    pub fn new() -> Self {
        Self {
            quantity: 1,
            ..Self::default()
        }
    }

    pub fn destination(mut self, destination: AccountDraft) -> Self {
        self.destination = Some(destination);
        self
    }

    pub fn source(mut self, source: AccountDraft) -> Self {
        self.source = Some(source);
        self
    }

    pub fn user(mut self, user: UserDraft) -> Self {
        self.user = Some(user);
        self
    }

    pub fn tier(mut self, tier: Option<Tier>) -> Self {
        self.tier = tier;
        self
    }

    pub fn matching_fund(mut self, fund: Option<PaymentMethod>) -> Self {
        self.matching_fund = fund;
        self
    }

    pub fn referral(mut self, account_id: Option<Uuid>) -> Self {
        self.referral_account_id = account_id;
        self
    }

    pub fn quantity(mut self, quantity: u32) -> Self {
        self.quantity = quantity;
        self
    }

    pub fn amount(mut self, amount: i64, currency: impl Into<String>) -> Self {
        self.amount = amount;
        self.currency = Some(currency.into());
        self
    }

    pub fn interval(mut self, interval: Option<Interval>) -> Self {
        self.interval = interval;
        self
    }

    pub fn description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn public_message(mut self, message: Option<String>) -> Self {
        self.public_message = message;
        self
    }

    pub fn payment(mut self, required: bool, payment: Option<PaymentRef>) -> Self {
        self.payment_required = required;
        self.payment = payment;
        self
    }

    pub fn fees(mut self, platform: Option<u32>, host: Option<u32>) -> Self {
        self.platform_fee_percent = platform;
        self.host_fee_percent = host;
        self
    }

    pub fn metadata(mut self, metadata: OrderMetadata) -> Self {
        self.metadata = metadata;
        self
    }

    /// Finalize. Destination, source, user and currency are required.
    pub fn build(self) -> Result<ValidatedOrder> {
        let missing = |field: &str| FundwayError::internal(format!("validated order is missing {}", field));
        Ok(ValidatedOrder {
            destination: self.destination.ok_or_else(|| missing("destination"))?,
            source: self.source.ok_or_else(|| missing("source"))?,
            user: self.user.ok_or_else(|| missing("user"))?,
            currency: self.currency.ok_or_else(|| missing("currency"))?,
            description: self.description.unwrap_or_default(),
            tier: self.tier,
            matching_fund: self.matching_fund,
            referral_account_id: self.referral_account_id,
            quantity: self.quantity,
            amount: self.amount,
            interval: self.interval,
            public_message: self.public_message,
            payment_required: self.payment_required,
            payment: self.payment,
            platform_fee_percent: self.platform_fee_percent,
            host_fee_percent: self.host_fee_percent,
            metadata: self.metadata,
        })
    }
}

/// Validates creation requests.
#[derive(Clone)]
pub struct OrderValidator {
    store: Arc<dyn FundingStore>,
    popularity: Arc<dyn PopularityVerifier>,
    challenge: Arc<dyn ChallengeVerifier>,
    config: PledgeConfig,
}

impl OrderValidator {
    pub fn new(
        store: Arc<dyn FundingStore>,
        popularity: Arc<dyn PopularityVerifier>,
        challenge: Arc<dyn ChallengeVerifier>,
        config: PledgeConfig,
    ) -> Self {
        Self {
            store,
            popularity,
            challenge,
            config,
        }
    }

    /// Validate a creation request.
    ///
    /// Rejections happen in a fixed order: abuse challenge, destination,
    /// self-funding, fee overrides, tier, payment requirement, user, source,
    /// matching fund, currency.
    pub async fn validate(
        &self,
        input: &CreateOrderInput,
        requester: &Requester,
        ctx: &RequestContext,
    ) -> Result<ValidatedOrder> {
        input.validate()?;
        let store = self.store.as_ref();

        let challenge_response = self.check_challenge(requester, ctx).await?;

        // Destination
        let destination = self
            .resolve_destination(&input.collective, input.currency.as_deref())
            .await?;
        let dest = destination.account().clone();

        // Self-funding
        if input.from_account.as_ref().and_then(|f| f.id) == Some(dest.id) {
            return Err(FundingError::SelfFunding.into());
        }

        // Privileged fee overrides
        if input.platform_fee_percent.is_some() && !requester.is_root() {
            return Err(FundingError::NotPermitted {
                action: "set a platform fee".to_string(),
            }
            .into());
        }
        if input.host_fee_percent.is_some() {
            let allowed = match (&requester.user, dest.host_id) {
                (Some(user), Some(host_id)) => is_admin_of(store, user, host_id).await?,
                _ => false,
            };
            if !allowed {
                return Err(FundingError::NotPermitted {
                    action: "set a host fee".to_string(),
                }
                .into());
            }
        }

        // Tier
        let tier = match input.tier_id {
            Some(tier_id) => Some(self.check_tier(tier_id, dest.id, input.quantity).await?),
            None => None,
        };

        // Payment requirement
        let tier_amount = tier.as_ref().and_then(|t| t.amount).unwrap_or(0);
        let payment_required = (input.total_amount > 0 || tier_amount > 0) && dest.is_active;
        let payment = if payment_required {
            let reference = input
                .payment_method
                .as_ref()
                .ok_or(FundingError::PaymentMethodRequired)?;
            Some(PaymentRef::from_input(reference)?)
        } else {
            None
        };

        // Acting user
        let user = match &requester.user {
            Some(user) => UserDraft::Existing(user.clone()),
            None => {
                let email = input
                    .email
                    .as_deref()
                    .map(str::trim)
                    .filter(|e| !e.is_empty())
                    .ok_or(FundingError::EmailRequired)?;
                if store.find_user_by_email(email).await?.is_some() {
                    return Err(FundingError::AccountExists {
                        email: email.to_string(),
                    }
                    .into());
                }
                let (user, account) = User::with_account(email, input.name.as_deref(), &dest.currency);
                UserDraft::New { user, account }
            }
        };

        // Source account
        let source = self
            .resolve_source(input.from_account.as_ref(), &user, requester, &dest)
            .await?;
        if source.account().id == dest.id {
            return Err(FundingError::SelfFunding.into());
        }

        // Currency and amount
        let expected_currency = tier
            .as_ref()
            .and_then(|t| t.currency.clone())
            .unwrap_or_else(|| dest.currency.clone())
            .to_uppercase();
        let amount = match tier.as_ref().and_then(Tier::fixed_amount) {
            Some(unit) => unit
                .checked_mul(i64::from(input.quantity))
                .filter(|total| *total <= MAX_AMOUNT)
                .ok_or_else(|| FundingError::InvalidAmount {
                    reason: format!("the order total cannot exceed {MAX_AMOUNT}"),
                })?,
            None => input.total_amount,
        };

        // Matching fund
        let (matching_fund, referral) = match input.matching_fund_id {
            Some(fund_id) => {
                let fund = self
                    .check_matching_fund(fund_id, amount, &expected_currency)
                    .await?;
                let owner = fund.account_id;
                (Some(fund), Some(owner))
            }
            None => (None, input.referral_account_id),
        };

        if let Some(currency) = input.currency.as_deref()
            && !currency.eq_ignore_ascii_case(&expected_currency)
        {
            return Err(FundingError::CurrencyMismatch {
                expected: expected_currency,
                actual: currency.to_uppercase(),
            }
            .into());
        }

        if payment_required && amount <= 0 {
            return Err(FundingError::InvalidAmount {
                reason: "the amount to charge must be positive".to_string(),
            }
            .into());
        }

        let interval = input.interval.or(tier.as_ref().and_then(|t| t.interval));
        let description = input
            .description
            .clone()
            .unwrap_or_else(|| describe(&dest, tier.as_ref(), interval));

        let metadata = OrderMetadata {
            ip: ctx.ip.clone(),
            user_agent: ctx.user_agent.clone(),
            challenge_response,
            idempotency_key: input.idempotency_key.clone(),
        };

        ValidatedOrderBuilder::new()
            .destination(destination)
            .source(source)
            .user(user)
            .tier(tier)
            .matching_fund(matching_fund)
            .referral(referral)
            .quantity(input.quantity)
            .amount(amount, expected_currency)
            .interval(interval)
            .description(description)
            .public_message(input.public_message.clone())
            .payment(payment_required, payment)
            .fees(input.platform_fee_percent, input.host_fee_percent)
            .metadata(metadata)
            .build()
    }

    /// Anonymous requests need a challenge token; authenticated ones may
    /// skip it. A submitted token is always verified.
    async fn check_challenge(
        &self,
        requester: &Requester,
        ctx: &RequestContext,
    ) -> Result<Option<serde_json::Value>> {
        let token = ctx
            .challenge_token
            .as_deref()
            .map(str::trim)
            .filter(|t| !t.is_empty());
        match token {
            None if requester.is_authenticated() => Ok(None),
            None => Err(FundingError::ChallengeMissing.into()),
            Some(token) => match self.challenge.verify(token, ctx.ip.as_deref()).await {
                Ok(response) => Ok(Some(response)),
                Err(e) => Err(FundingError::ChallengeFailed {
                    reason: e.to_string(),
                }
                .into()),
            },
        }
    }

    async fn resolve_destination(
        &self,
        reference: &AccountReference,
        currency: Option<&str>,
    ) -> Result<AccountDraft> {
        if let Some(id) = reference.id {
            let account = self
                .store
                .get_account(id)
                .await?
                .ok_or(FundingError::AccountNotFound { account_id: id })?;
            return Ok(AccountDraft::Existing(account));
        }

        let handle = reference
            .external_handle
            .as_deref()
            .map(str::trim)
            .filter(|h| !h.is_empty())
            .ok_or(FundingError::MissingDestination)?;

        if let Some(account) = self.store.find_account_by_external_handle(handle).await? {
            return Ok(AccountDraft::Existing(account));
        }

        let required = self.config.min_popularity;
        match self.popularity.popularity(handle).await {
            Ok(actual) if actual >= required => {}
            Ok(actual) => {
                return Err(FundingError::PopularityTooLow {
                    handle: handle.to_string(),
                    actual,
                    required,
                }
                .into());
            }
            Err(e) => {
                return Err(FundingError::PopularityUnverifiable {
                    handle: handle.to_string(),
                    reason: e.to_string(),
                }
                .into());
            }
        }

        Ok(AccountDraft::New(Account::pledged(
            handle,
            reference.name.as_deref(),
            currency.unwrap_or(DEFAULT_CURRENCY),
        )))
    }

    async fn check_tier(&self, tier_id: Uuid, destination_id: Uuid, quantity: u32) -> Result<Tier> {
        let tier = self
            .store
            .get_tier(tier_id)
            .await?
            .ok_or(FundingError::TierNotFound { tier_id })?;
        if tier.account_id != destination_id {
            return Err(FundingError::TierMismatch { tier_id }.into());
        }
        if let Some(max) = tier.max_quantity_per_user
            && quantity > max
        {
            return Err(FundingError::PerUserLimit {
                requested: quantity,
                max,
            }
            .into());
        }
        if let Some(remaining) = tier.remaining()
            && quantity > remaining
        {
            return Err(FundingError::TierSoldOut { remaining }.into());
        }
        Ok(tier)
    }

    /// Resolve who pays.
    ///
    /// An explicit account needs the requester to be admin or host of it
    /// (or a member, for organizations), or admin of the destination's host.
    /// A name creates a new organization. Otherwise the user's personal
    /// account pays.
    async fn resolve_source(
        &self,
        from: Option<&SourceAccountInput>,
        user: &UserDraft,
        requester: &Requester,
        destination: &Account,
    ) -> Result<AccountDraft> {
        let store = self.store.as_ref();

        if let Some(id) = from.and_then(|f| f.id) {
            let account = store
                .get_account(id)
                .await?
                .ok_or(FundingError::AccountNotFound { account_id: id })?;
            let acting = requester
                .user
                .as_ref()
                .ok_or_else(|| FundingError::AuthenticationRequired {
                    action: format!("contribute as {}", account.name),
                })?;

            let mut roles = vec![MemberRole::Admin, MemberRole::Host];
            if account.kind == AccountKind::Organization {
                roles.push(MemberRole::Member);
            }
            let mut allowed = acting.is_root || has_any_role(store, acting, id, &roles).await?;
            if !allowed && let Some(host_id) = destination.host_id {
                allowed = is_admin_of(store, acting, host_id).await?;
            }
            if !allowed {
                return Err(FundingError::NotPermitted {
                    action: format!("contribute as {}", account.name),
                }
                .into());
            }
            return Ok(AccountDraft::Existing(account));
        }

        if let Some(name) = from.and_then(|f| f.name.as_deref()) {
            return Ok(AccountDraft::New(Account::new(
                AccountKind::Organization,
                name,
                &destination.currency,
            )));
        }

        match user {
            UserDraft::New { account, .. } => Ok(AccountDraft::New(account.clone())),
            UserDraft::Existing(existing) => {
                let account = store.get_account(existing.account_id).await?.ok_or(
                    FundingError::AccountNotFound {
                        account_id: existing.account_id,
                    },
                )?;
                Ok(AccountDraft::Existing(account))
            }
        }
    }

    async fn check_matching_fund(
        &self,
        fund_id: Uuid,
        amount: i64,
        currency: &str,
    ) -> Result<PaymentMethod> {
        let fund = self
            .store
            .get_payment_method(fund_id)
            .await?
            .ok_or(FundingError::PaymentMethodNotFound {
                payment_method_id: fund_id,
            })?;
        let unusable = |reason: &str| -> FundwayError {
            FundingError::MatchingFundUnusable {
                reason: reason.to_string(),
            }
            .into()
        };

        let Some(factor) = fund.matching else {
            return Err(unusable("this payment method is not a matching fund"));
        };
        if fund.is_expired(Utc::now()) {
            return Err(unusable("the matching fund has expired"));
        }
        if !fund.currency.eq_ignore_ascii_case(currency) {
            return Err(unusable("the matching fund uses a different currency"));
        }
        if let Some(balance) = fund.balance
            && amount
                .checked_mul(i64::from(factor))
                .is_none_or(|matched| balance < matched)
        {
            return Err(unusable("the matching fund cannot match this amount"));
        }
        Ok(fund)
    }
}

/// Human-readable order description.
fn describe(destination: &Account, tier: Option<&Tier>, interval: Option<Interval>) -> String {
    let base = match interval {
        Some(interval) => format!("{} donation to {}", interval.label(), destination.name),
        None if destination.is_event() => format!("Registration to {}", destination.name),
        None => format!("Donation to {}", destination.name),
    };
    match tier {
        Some(tier) => format!("{} ({})", base, tier.name),
        None => base,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_describe() {
        let collective = Account::new(AccountKind::Collective, "Rust Berlin", "EUR");
        let event = Account::new(AccountKind::Event, "RustFest", "EUR");
        let tier = Tier::new(collective.id, "Backer");

        assert_eq!(
            describe(&collective, Some(&tier), Some(Interval::Month)),
            "Monthly donation to Rust Berlin (Backer)"
        );
        assert_eq!(describe(&collective, None, None), "Donation to Rust Berlin");
        assert_eq!(
            describe(&event, Some(&tier), None),
            "Registration to RustFest (Backer)"
        );
        assert_eq!(
            describe(&collective, None, Some(Interval::Year)),
            "Yearly donation to Rust Berlin"
        );
    }

    #[test]
    fn test_builder_requires_core_fields() {
        let err = ValidatedOrderBuilder::new().build().unwrap_err();
        assert!(matches!(err, FundwayError::Internal(_)));

        let dest = Account::new(AccountKind::Collective, "Dest", "USD");
        let (user, personal) = User::with_account("a@example.com", None, "USD");
        let order = ValidatedOrderBuilder::new()
            .destination(AccountDraft::Existing(dest))
            .source(AccountDraft::New(personal.clone()))
            .user(UserDraft::New {
                user,
                account: personal,
            })
            .amount(1000, "USD")
            .build()
            .unwrap();
        assert_eq!(order.quantity, 1);
        assert_eq!(order.amount, 1000);
        assert!(order.source.is_new());
    }
}
