//! Payment method resolution.
//!
//! Turns a request's payment reference into a usable instrument: an existing
//! one the requester may use, a new one created from a provider token, or the
//! manual marker that skips instruments entirely.

use super::access::is_admin_of;
use super::error::FundingError;
use super::input::PaymentMethodInput;
use super::model::{PaymentMethod, PaymentMethodType, Requester};
use super::storage::FundingStore;
use crate::error::Result;
use chrono::{DateTime, Utc};
use std::sync::Arc;
use uuid::Uuid;

/// Provider used when a new instrument does not name one.
pub const DEFAULT_SERVICE: &str = "stripe";

/// Parsed payment reference.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PaymentRef {
    Existing(Uuid),
    New {
        token: String,
        service: String,
        name: Option<String>,
        expiry: Option<DateTime<Utc>>,
    },
    Manual,
}

impl PaymentRef {
    /// Classify a payment input.
    ///
    /// A well-formed identifier wins over a token; a manual marker wins over both.
    pub fn from_input(input: &PaymentMethodInput) -> std::result::Result<Self, FundingError> {
        if input.manual || input.kind == Some(PaymentMethodType::Manual) {
            return Ok(Self::Manual);
        }
        if input.kind == Some(PaymentMethodType::Prepaid) && input.id.is_none() {
            return Err(FundingError::InvalidPaymentMethod {
                reason: "prepaid credit can only be issued by a host".to_string(),
            });
        }
        if let Some(id) = input.id.as_deref().and_then(|id| Uuid::parse_str(id.trim()).ok()) {
            return Ok(Self::Existing(id));
        }
        match input.token.as_deref().map(str::trim) {
            Some(token) if !token.is_empty() => Ok(Self::New {
                token: token.to_string(),
                service: input
                    .service
                    .clone()
                    .unwrap_or_else(|| DEFAULT_SERVICE.to_string()),
                name: input.name.clone(),
                expiry: input.expiry,
            }),
            _ => Err(FundingError::InvalidPaymentMethod {
                reason: "expected an existing payment method id or a provider token".to_string(),
            }),
        }
    }
}

/// A resolved payment reference.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResolvedPayment {
    /// Offline reconciliation; the order waits for a host to mark it paid.
    Manual,
    Instrument(PaymentMethod),
}

/// Resolves payment references against the store.
#[derive(Clone)]
pub struct PaymentMethodResolver {
    store: Arc<dyn FundingStore>,
}

impl PaymentMethodResolver {
    pub fn new(store: Arc<dyn FundingStore>) -> Self {
        Self { store }
    }

    /// Resolve `reference` for an order paid by `owner_account_id`.
    ///
    /// Existing instruments need an authenticated requester who owns them or
    /// administers their account. New instruments are persisted and bound to
    /// the owner account.
    pub async fn resolve(
        &self,
        reference: &PaymentRef,
        owner_account_id: Uuid,
        currency: &str,
        requester: &Requester,
    ) -> Result<ResolvedPayment> {
        let resolved = self
            .prepare(reference, owner_account_id, currency, requester)
            .await?;
        self.persist(reference, &resolved).await?;
        Ok(resolved)
    }

    /// Run every check of [`resolve`](Self::resolve) without writing.
    ///
    /// A new instrument is built but not saved; pass it to
    /// [`persist`](Self::persist) once the rest of the request is accepted.
    pub async fn prepare(
        &self,
        reference: &PaymentRef,
        owner_account_id: Uuid,
        currency: &str,
        requester: &Requester,
    ) -> Result<ResolvedPayment> {
        match reference {
            PaymentRef::Manual => Ok(ResolvedPayment::Manual),
            PaymentRef::Existing(id) => {
                let user = requester.user.as_ref().ok_or_else(|| {
                    FundingError::AuthenticationRequired {
                        action: "use a saved payment method".to_string(),
                    }
                })?;
                let pm = self
                    .store
                    .get_payment_method(*id)
                    .await?
                    .ok_or(FundingError::PaymentMethodNotFound {
                        payment_method_id: *id,
                    })?;
                let owns = pm.account_id == owner_account_id
                    || is_admin_of(self.store.as_ref(), user, pm.account_id).await?;
                if !owns {
                    return Err(FundingError::NotPermitted {
                        action: "use this payment method".to_string(),
                    }
                    .into());
                }
                Ok(ResolvedPayment::Instrument(pm))
            }
            PaymentRef::New {
                token,
                service,
                name,
                expiry,
            } => Ok(ResolvedPayment::Instrument(PaymentMethod {
                id: Uuid::new_v4(),
                account_id: owner_account_id,
                name: name.clone().unwrap_or_else(|| "Card".to_string()),
                service: service.clone(),
                kind: PaymentMethodType::CreditCard,
                token: Some(token.clone()),
                currency: currency.to_string(),
                balance: None,
                initial_balance: None,
                matching: None,
                expiry: *expiry,
                source_account_id: None,
                created_by_user_id: requester.user.as_ref().map(|u| u.id),
                created_at: Utc::now(),
            })),
        }
    }

    /// Save the instrument [`prepare`](Self::prepare) built from a provider
    /// token. Existing instruments and the manual marker need no write.
    pub async fn persist(&self, reference: &PaymentRef, resolved: &ResolvedPayment) -> Result<()> {
        if let (PaymentRef::New { .. }, ResolvedPayment::Instrument(pm)) = (reference, resolved) {
            self.store.create_payment_method(pm).await?;
            tracing::debug!(
                target: "fundway::orders",
                payment_method_id = %pm.id,
                account_id = %pm.account_id,
                service = %pm.service,
                "payment method created"
            );
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::FundwayError;
    use crate::funding::model::User;
    use crate::funding::storage::InMemoryFundingStore;

    fn card(account_id: Uuid) -> PaymentMethod {
        let mut pm = PaymentMethod::manual(account_id, "USD");
        pm.id = Uuid::new_v4();
        pm.kind = PaymentMethodType::CreditCard;
        pm.token = Some("tok_visa".to_string());
        pm
    }

    #[test]
    fn test_from_input_classification() {
        let id = Uuid::new_v4();
        assert_eq!(
            PaymentRef::from_input(&PaymentMethodInput::existing(id)).unwrap(),
            PaymentRef::Existing(id)
        );
        assert_eq!(
            PaymentRef::from_input(&PaymentMethodInput::manual()).unwrap(),
            PaymentRef::Manual
        );
        assert!(matches!(
            PaymentRef::from_input(&PaymentMethodInput::token("tok_visa")).unwrap(),
            PaymentRef::New { ref service, .. } if service == DEFAULT_SERVICE
        ));

        // Malformed id falls back to the token
        let input = PaymentMethodInput {
            id: Some("pm_123".to_string()),
            token: Some("tok_visa".to_string()),
            ..PaymentMethodInput::default()
        };
        assert!(matches!(PaymentRef::from_input(&input).unwrap(), PaymentRef::New { .. }));

        assert!(PaymentRef::from_input(&PaymentMethodInput::default()).is_err());
    }

    #[tokio::test]
    async fn test_existing_requires_authentication() {
        let store = Arc::new(InMemoryFundingStore::new());
        let owner = Uuid::new_v4();
        let pm = card(owner);
        store.create_payment_method(&pm).await.unwrap();

        let resolver = PaymentMethodResolver::new(store);
        let err = resolver
            .resolve(&PaymentRef::Existing(pm.id), owner, "USD", &Requester::anonymous())
            .await
            .unwrap_err();
        assert!(matches!(err, FundwayError::Unauthorized(_)));
    }

    #[tokio::test]
    async fn test_existing_requires_ownership() {
        let store = Arc::new(InMemoryFundingStore::new());
        let pm = card(Uuid::new_v4());
        store.create_payment_method(&pm).await.unwrap();
        let (user, _) = User::with_account("a@example.com", None, "USD");

        let resolver = PaymentMethodResolver::new(store);
        let err = resolver
            .resolve(
                &PaymentRef::Existing(pm.id),
                user.account_id,
                "USD",
                &Requester::user(user),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, FundwayError::Unauthorized(_)));
    }

    #[tokio::test]
    async fn test_existing_not_found() {
        let store = Arc::new(InMemoryFundingStore::new());
        let (user, _) = User::with_account("a@example.com", None, "USD");
        let resolver = PaymentMethodResolver::new(store);
        let err = resolver
            .resolve(
                &PaymentRef::Existing(Uuid::new_v4()),
                user.account_id,
                "USD",
                &Requester::user(user),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, FundwayError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_new_token_is_bound_to_owner() {
        let store = Arc::new(InMemoryFundingStore::new());
        let resolver = PaymentMethodResolver::new(store.clone());
        let owner = Uuid::new_v4();

        let reference = PaymentRef::from_input(&PaymentMethodInput::token("tok_visa")).unwrap();
        let resolved = resolver
            .resolve(&reference, owner, "EUR", &Requester::anonymous())
            .await
            .unwrap();

        let ResolvedPayment::Instrument(pm) = resolved else {
            panic!("expected an instrument");
        };
        assert_eq!(pm.account_id, owner);
        assert_eq!(pm.currency, "EUR");
        assert!(store.get_payment_method(pm.id).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_prepare_does_not_save_new_token() {
        let store = Arc::new(InMemoryFundingStore::new());
        let resolver = PaymentMethodResolver::new(store.clone());
        let owner = Uuid::new_v4();

        let reference = PaymentRef::from_input(&PaymentMethodInput::token("tok_visa")).unwrap();
        let prepared = resolver
            .prepare(&reference, owner, "USD", &Requester::anonymous())
            .await
            .unwrap();
        let ResolvedPayment::Instrument(pm) = &prepared else {
            panic!("expected an instrument");
        };
        assert!(store.get_payment_method(pm.id).await.unwrap().is_none());

        resolver.persist(&reference, &prepared).await.unwrap();
        assert!(store.get_payment_method(pm.id).await.unwrap().is_some());
    }
}
