//! In-memory doubles for the funding core's external collaborators.

use crate::error::{FundwayError, Result};
use crate::funding::{
    Activity, ActivityEmitter, ChallengeVerifier, ChargeRequest, PaymentMethod, PaymentProvider,
    PopularityVerifier, ProviderCharge, ProviderRefund, Transaction,
};
use async_trait::async_trait;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};
use std::time::Duration;

/// Scriptable payment provider.
///
/// Charges succeed by default. Failures can be queued one at a time
/// (`fail_next`) or made permanent (`fail_always`), and every call is
/// recorded for assertions.
#[derive(Clone, Default)]
pub struct MockPaymentProvider {
    counter: Arc<AtomicU64>,
    charges: Arc<RwLock<Vec<ChargeRequest>>>,
    refunds: Arc<RwLock<Vec<String>>>,
    voids: Arc<RwLock<Vec<String>>>,
    queued_failures: Arc<RwLock<VecDeque<String>>>,
    permanent_failure: Arc<RwLock<Option<String>>>,
    refund_failure: Arc<RwLock<Option<String>>>,
    delay: Arc<RwLock<Option<Duration>>>,
    processor_fee: Arc<RwLock<i64>>,
}

impl MockPaymentProvider {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Fail the next charge with `message`.
    pub fn fail_next(&self, message: &str) {
        self.queued_failures
            .write()
            .unwrap()
            .push_back(message.to_string());
    }

    /// Fail every charge with `message` until [`succeed`](Self::succeed).
    pub fn fail_always(&self, message: &str) {
        *self.permanent_failure.write().unwrap() = Some(message.to_string());
    }

    /// Clear all scripted charge failures.
    pub fn succeed(&self) {
        self.queued_failures.write().unwrap().clear();
        *self.permanent_failure.write().unwrap() = None;
    }

    pub fn fail_refunds(&self, message: &str) {
        *self.refund_failure.write().unwrap() = Some(message.to_string());
    }

    pub fn succeed_refunds(&self) {
        *self.refund_failure.write().unwrap() = None;
    }

    /// Make every charge and refund take `delay` before answering.
    pub fn set_delay(&self, delay: Duration) {
        *self.delay.write().unwrap() = Some(delay);
    }

    pub fn set_processor_fee(&self, fee: i64) {
        *self.processor_fee.write().unwrap() = fee;
    }

    /// Charge attempts received, failed ones included.
    pub fn charge_count(&self) -> usize {
        self.charges.read().unwrap().len()
    }

    pub fn charges(&self) -> Vec<ChargeRequest> {
        self.charges.read().unwrap().clone()
    }

    /// Provider references of refunded charges.
    pub fn refunded(&self) -> Vec<String> {
        self.refunds.read().unwrap().clone()
    }

    pub fn voided(&self) -> Vec<String> {
        self.voids.read().unwrap().clone()
    }

    fn next_reference(&self, prefix: &str) -> String {
        format!("{}_mock_{}", prefix, self.counter.fetch_add(1, Ordering::SeqCst))
    }
}

#[async_trait]
impl PaymentProvider for MockPaymentProvider {
    async fn charge(&self, request: &ChargeRequest) -> Result<ProviderCharge> {
        self.charges.write().unwrap().push(request.clone());

        let delay = *self.delay.read().unwrap();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        let queued = self.queued_failures.write().unwrap().pop_front();
        let failure = queued.or_else(|| self.permanent_failure.read().unwrap().clone());
        if let Some(message) = failure {
            return Err(FundwayError::charge_failed(message));
        }

        Ok(ProviderCharge {
            reference: self.next_reference("ch"),
            processor_fee: *self.processor_fee.read().unwrap(),
        })
    }

    async fn refund(
        &self,
        transaction: &Transaction,
        _payment_method: &PaymentMethod,
    ) -> Result<ProviderRefund> {
        let delay = *self.delay.read().unwrap();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        if let Some(message) = self.refund_failure.read().unwrap().clone() {
            return Err(FundwayError::charge_failed(message));
        }
        let charge_reference = transaction
            .provider_reference
            .clone()
            .unwrap_or_else(|| transaction.id.to_string());
        self.refunds.write().unwrap().push(charge_reference);
        Ok(ProviderRefund {
            reference: self.next_reference("re"),
        })
    }

    async fn void(&self, reference: &str) -> Result<()> {
        self.voids.write().unwrap().push(reference.to_string());
        Ok(())
    }
}

/// Popularity verifier backed by a fixed handle table.
///
/// Unknown handles fail verification.
#[derive(Clone, Default)]
pub struct StaticPopularityVerifier {
    handles: Arc<RwLock<HashMap<String, u32>>>,
}

impl StaticPopularityVerifier {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_handle(self, handle: &str, stars: u32) -> Self {
        self.handles
            .write()
            .unwrap()
            .insert(handle.to_lowercase(), stars);
        self
    }
}

#[async_trait]
impl PopularityVerifier for StaticPopularityVerifier {
    async fn popularity(&self, handle: &str) -> Result<u32> {
        self.handles
            .read()
            .unwrap()
            .get(&handle.to_lowercase())
            .copied()
            .ok_or_else(|| FundwayError::not_found(format!("{handle} not found")))
    }
}

/// Challenge verifier that accepts or rejects every token.
#[derive(Debug, Clone)]
pub struct StaticChallengeVerifier {
    rejection: Option<String>,
}

impl StaticChallengeVerifier {
    #[must_use]
    pub fn accept_all() -> Self {
        Self { rejection: None }
    }

    #[must_use]
    pub fn reject_all(reason: &str) -> Self {
        Self {
            rejection: Some(reason.to_string()),
        }
    }
}

impl Default for StaticChallengeVerifier {
    fn default() -> Self {
        Self::accept_all()
    }
}

#[async_trait]
impl ChallengeVerifier for StaticChallengeVerifier {
    async fn verify(&self, token: &str, ip: Option<&str>) -> Result<serde_json::Value> {
        match &self.rejection {
            Some(reason) => Err(FundwayError::validation(reason.clone())),
            None => Ok(serde_json::json!({
                "success": true,
                "token": token,
                "ip": ip,
            })),
        }
    }
}

/// Activity emitter that keeps everything it is given.
#[derive(Clone, Default)]
pub struct RecordingActivityEmitter {
    activities: Arc<RwLock<Vec<Activity>>>,
    failing: bool,
}

impl RecordingActivityEmitter {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// An emitter whose every `emit` fails after recording.
    #[must_use]
    pub fn failing() -> Self {
        Self {
            failing: true,
            ..Self::default()
        }
    }

    pub fn activities(&self) -> Vec<Activity> {
        self.activities.read().unwrap().clone()
    }

    pub fn kinds(&self) -> Vec<&'static str> {
        self.activities
            .read()
            .unwrap()
            .iter()
            .map(Activity::kind)
            .collect()
    }

    /// Number of recorded activities of `kind`.
    pub fn count(&self, kind: &str) -> usize {
        self.activities
            .read()
            .unwrap()
            .iter()
            .filter(|a| a.kind() == kind)
            .count()
    }
}

#[async_trait]
impl ActivityEmitter for RecordingActivityEmitter {
    async fn emit(&self, activity: Activity) -> Result<()> {
        self.activities.write().unwrap().push(activity);
        if self.failing {
            return Err(FundwayError::internal("notification dispatcher unavailable"));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_queued_failure_is_used_once() {
        let provider = MockPaymentProvider::new();
        provider.fail_next("Your card was declined.");

        let pm = PaymentMethod::manual(uuid::Uuid::new_v4(), "USD");
        let request = ChargeRequest {
            order_id: uuid::Uuid::new_v4(),
            amount: 1000,
            currency: "USD".to_string(),
            description: "Donation".to_string(),
            payment_method: pm,
            platform_fee: 0,
            host_fee: 0,
        };

        let err = provider.charge(&request).await.unwrap_err();
        assert_eq!(err.to_string(), "Charge failed: Your card was declined.");
        assert!(provider.charge(&request).await.is_ok());
        assert_eq!(provider.charge_count(), 2);
    }

    #[tokio::test]
    async fn test_popularity_lookup_is_case_insensitive() {
        let verifier = StaticPopularityVerifier::new().with_handle("Acme/Widgets", 250);
        assert_eq!(verifier.popularity("acme/widgets").await.unwrap(), 250);
        assert!(verifier.popularity("acme/unknown").await.is_err());
    }
}
