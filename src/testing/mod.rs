//! Testing utilities for the funding core
//!
//! - Mocks for the external collaborators (payment provider, verifiers,
//!   activity sink)
//! - [`TestFunding`]: a service wired to those mocks, with seeding helpers
//!
//! # Example
//!
//! ```rust,ignore
//! use fundway::funding::{CreateOrderInput, PaymentMethodInput, Requester};
//! use fundway::testing::{TestFunding, authenticated_context};
//!
//! #[tokio::test]
//! async fn test_donation() {
//!     let funding = TestFunding::new();
//!     let admin = funding.user().await;
//!     let host = funding.host(&admin).await;
//!     let collective = funding.collective(&host, 0).await;
//!     let donor = funding.user().await;
//!
//!     let input = CreateOrderInput::donation(collective.id, 1000)
//!         .with_payment_method(PaymentMethodInput::token("tok_visa"));
//!     let order = funding
//!         .service
//!         .create_order(&input, &Requester::user(donor), &authenticated_context())
//!         .await
//!         .unwrap();
//!     assert!(order.is_processed());
//! }
//! ```

mod fixtures;
mod mocks;

pub use fixtures::{
    TestFunding, TestFundingBuilder, anonymous_context, authenticated_context, fake, test_config,
};
pub use mocks::{
    MockPaymentProvider, RecordingActivityEmitter, StaticChallengeVerifier,
    StaticPopularityVerifier,
};
