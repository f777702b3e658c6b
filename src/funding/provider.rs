//! Payment provider capability.
//!
//! Tokenization, 3-D Secure and the rest of the provider protocol live
//! behind this trait. The core only asks for a charge, a reversal of a
//! charge, and a void of a charge it could not record.

use super::model::{PaymentMethod, Transaction};
use crate::error::Result;
use async_trait::async_trait;
use uuid::Uuid;

/// A charge to run against a provider-backed instrument.
#[derive(Debug, Clone)]
pub struct ChargeRequest {
    pub order_id: Uuid,
    pub amount: i64,
    pub currency: String,
    pub description: String,
    pub payment_method: PaymentMethod,
    pub platform_fee: i64,
    pub host_fee: i64,
}

/// Result of a successful provider charge.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProviderCharge {
    /// Provider-side identifier of the charge.
    pub reference: String,
    pub processor_fee: i64,
}

/// Result of a successful provider reversal.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProviderRefund {
    pub reference: String,
}

/// Payment provider capability.
///
/// Failures are returned as [`FundwayError::ChargeFailed`](crate::FundwayError)
/// carrying the provider's message; the core surfaces it verbatim.
#[async_trait]
pub trait PaymentProvider: Send + Sync {
    /// Charge an instrument.
    async fn charge(&self, request: &ChargeRequest) -> Result<ProviderCharge>;

    /// Reverse a previously recorded charge.
    async fn refund(
        &self,
        transaction: &Transaction,
        payment_method: &PaymentMethod,
    ) -> Result<ProviderRefund>;

    /// Void a charge that succeeded at the provider but could not be recorded.
    async fn void(&self, reference: &str) -> Result<()>;
}
