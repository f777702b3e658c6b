//! Caller-supplied inputs for funding operations.

use super::model::{Interval, PaymentMethodType};
use chrono::{DateTime, Utc};
use serde::Deserialize;
use std::borrow::Cow;
use uuid::Uuid;
use validator::{Validate, ValidationError};

/// Largest amount, in minor units, a single order or credit may carry.
pub const MAX_AMOUNT: i64 = 1_000_000_000_000;

/// Validates an ISO 4217 currency code (three ASCII letters).
pub fn validate_currency(code: &str) -> Result<(), ValidationError> {
    if code.len() == 3 && code.chars().all(|c| c.is_ascii_alphabetic()) {
        return Ok(());
    }
    let mut err = ValidationError::new("currency");
    err.message = Some(Cow::Borrowed("must be a three-letter currency code"));
    Err(err)
}

/// Validates an external handle of the form `owner/name` or `owner`.
pub fn validate_external_handle(handle: &str) -> Result<(), ValidationError> {
    let valid_part = |part: &str| {
        !part.is_empty()
            && part
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'))
    };
    let mut parts = handle.split('/');
    let ok = match (parts.next(), parts.next(), parts.next()) {
        (Some(owner), None, None) => valid_part(owner),
        (Some(owner), Some(name), None) => valid_part(owner) && valid_part(name),
        _ => false,
    };
    if ok {
        return Ok(());
    }
    let mut err = ValidationError::new("external_handle");
    err.message = Some(Cow::Borrowed("must look like owner or owner/name"));
    Err(err)
}

fn default_quantity() -> u32 {
    1
}

/// Reference to the destination account.
#[derive(Debug, Clone, Default, Deserialize, Validate)]
pub struct AccountReference {
    pub id: Option<Uuid>,
    /// External handle for pledges to accounts that are not onboarded yet.
    #[validate(custom(function = "validate_external_handle"))]
    pub external_handle: Option<String>,
    pub name: Option<String>,
}

impl AccountReference {
    pub fn id(id: Uuid) -> Self {
        Self {
            id: Some(id),
            ..Self::default()
        }
    }

    pub fn external(handle: impl Into<String>) -> Self {
        Self {
            external_handle: Some(handle.into()),
            ..Self::default()
        }
    }

    /// Stable identity of the referenced account for rate limiting: the id
    /// when given, otherwise the lowercased external handle.
    #[must_use]
    pub fn destination_key(&self) -> Option<String> {
        match (self.id, self.external_handle.as_deref()) {
            (Some(id), _) => Some(id.to_string()),
            (None, Some(handle)) if !handle.trim().is_empty() => {
                Some(format!("handle:{}", handle.trim().to_lowercase()))
            }
            (None, _) => None,
        }
    }
}

/// Source account: an existing one by id, or a new organization by name.
#[derive(Debug, Clone, Default, Deserialize, Validate)]
pub struct SourceAccountInput {
    pub id: Option<Uuid>,
    #[validate(length(min = 1, max = 255))]
    pub name: Option<String>,
}

/// Payment reference attached to a request.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct PaymentMethodInput {
    /// Identifier of an existing instrument.
    pub id: Option<String>,
    /// Provider token for a new instrument.
    pub token: Option<String>,
    pub service: Option<String>,
    pub kind: Option<PaymentMethodType>,
    pub name: Option<String>,
    pub expiry: Option<DateTime<Utc>>,
    /// Offline reconciliation; no instrument is attached.
    #[serde(default)]
    pub manual: bool,
}

impl PaymentMethodInput {
    pub fn existing(id: Uuid) -> Self {
        Self {
            id: Some(id.to_string()),
            ..Self::default()
        }
    }

    pub fn token(token: impl Into<String>) -> Self {
        Self {
            token: Some(token.into()),
            ..Self::default()
        }
    }

    pub fn manual() -> Self {
        Self {
            manual: true,
            ..Self::default()
        }
    }
}

/// Input for `create_order`.
#[derive(Debug, Clone, Deserialize, Validate)]
pub struct CreateOrderInput {
    #[validate(length(min = 1, max = 255))]
    pub idempotency_key: Option<String>,
    #[validate(nested)]
    pub collective: AccountReference,
    pub from_account: Option<SourceAccountInput>,
    /// Email of an unauthenticated contributor.
    #[validate(email(message = "must be a valid email address"))]
    pub email: Option<String>,
    #[validate(length(max = 255))]
    pub name: Option<String>,
    pub tier_id: Option<Uuid>,
    #[serde(default = "default_quantity")]
    #[validate(range(min = 1, max = 10000, message = "must be at least 1"))]
    pub quantity: u32,
    #[serde(default)]
    #[validate(range(min = 0, max = 1_000_000_000_000i64, message = "must be between 0 and 1000000000000"))]
    pub total_amount: i64,
    #[validate(custom(function = "validate_currency"))]
    pub currency: Option<String>,
    pub interval: Option<Interval>,
    pub payment_method: Option<PaymentMethodInput>,
    pub matching_fund_id: Option<Uuid>,
    pub referral_account_id: Option<Uuid>,
    #[validate(range(max = 100))]
    pub platform_fee_percent: Option<u32>,
    #[validate(range(max = 100))]
    pub host_fee_percent: Option<u32>,
    #[validate(length(max = 1000))]
    pub description: Option<String>,
    #[validate(length(max = 255))]
    pub public_message: Option<String>,
}

impl Default for CreateOrderInput {
    fn default() -> Self {
        Self {
            idempotency_key: None,
            collective: AccountReference::default(),
            from_account: None,
            email: None,
            name: None,
            tier_id: None,
            quantity: default_quantity(),
            total_amount: 0,
            currency: None,
            interval: None,
            payment_method: None,
            matching_fund_id: None,
            referral_account_id: None,
            platform_fee_percent: None,
            host_fee_percent: None,
            description: None,
            public_message: None,
        }
    }
}

impl CreateOrderInput {
    /// A one-off donation of `amount` to `destination`.
    pub fn donation(destination: Uuid, amount: i64) -> Self {
        Self {
            collective: AccountReference::id(destination),
            total_amount: amount,
            ..Self::default()
        }
    }

    #[must_use]
    pub fn with_payment_method(mut self, payment_method: PaymentMethodInput) -> Self {
        self.payment_method = Some(payment_method);
        self
    }

    #[must_use]
    pub fn with_interval(mut self, interval: Interval) -> Self {
        self.interval = Some(interval);
        self
    }

    #[must_use]
    pub fn from_account(mut self, id: Uuid) -> Self {
        self.from_account = Some(SourceAccountInput {
            id: Some(id),
            name: None,
        });
        self
    }
}

/// Input for `update_order`.
#[derive(Debug, Clone, Deserialize, Validate)]
pub struct UpdateOrderInput {
    pub order_id: Uuid,
    #[validate(range(min = 1, max = 1_000_000_000_000i64, message = "must be between 1 and 1000000000000"))]
    pub total_amount: Option<i64>,
    pub payment_method: Option<PaymentMethodInput>,
}

/// Input for `update_subscription`.
#[derive(Debug, Clone, Deserialize, Validate)]
pub struct UpdateSubscriptionInput {
    pub order_id: Uuid,
    #[validate(range(max = 1_000_000_000_000i64, message = "must be at most 1000000000000"))]
    pub amount: Option<i64>,
    pub payment_method: Option<PaymentMethodInput>,
}

/// Input for `add_funds_to_org`.
#[derive(Debug, Clone, Deserialize, Validate)]
pub struct AddFundsInput {
    pub organization_id: Uuid,
    pub host_id: Uuid,
    #[validate(range(min = 1, max = 1_000_000_000_000i64, message = "must be between 1 and 1000000000000"))]
    pub total_amount: i64,
    #[validate(length(max = 255))]
    pub description: Option<String>,
}
