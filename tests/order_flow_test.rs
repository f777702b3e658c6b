use chrono::{Duration, Utc};
use fundway::funding::{
    Account, AccountKind, AccountReference, AddFundsInput, CreateOrderInput, FundingStore,
    Interval, MemberRole, OrderStatus, PaymentMethodInput, PaymentMethodType, RequestContext,
    MAX_AMOUNT, Requester, Tier, TransactionKind, UpdateOrderInput, User,
};
use fundway::testing::{TestFunding, anonymous_context, authenticated_context, fake, test_config};
use fundway::{ConfigBuilder, FundwayError, OrderLimitConfig};

/// A host administered by a fresh user and a collective it hosts (10% host fee).
async fn hosted_collective(funding: &TestFunding) -> (User, Account, Account) {
    let admin = funding.user().await;
    let host = funding.host(&admin).await;
    let collective = funding.collective(&host, 10).await;
    (admin, host, collective)
}

fn card() -> PaymentMethodInput {
    PaymentMethodInput::token(fake::card_token())
}

#[tokio::test]
async fn test_admin_donates_on_behalf_of_organization() {
    let funding = TestFunding::new();
    let (_, _, collective) = hosted_collective(&funding).await;
    let user = funding.user().await;
    let org = funding.account(AccountKind::Organization, Some(&user)).await;

    let input = CreateOrderInput::donation(collective.id, 1000)
        .from_account(org.id)
        .with_payment_method(card());
    let order = funding
        .service
        .create_order(&input, &Requester::user(user), &authenticated_context())
        .await
        .unwrap();

    assert_eq!(order.status, OrderStatus::Paid);
    assert!(order.processed_at.is_some());
    assert_eq!(order.from_account_id, org.id);
    assert_eq!(funding.provider.charge_count(), 1);

    let transactions = funding.store.list_order_transactions(order.id).await.unwrap();
    assert_eq!(transactions.len(), 2);
    let credit = transactions
        .iter()
        .find(|t| t.kind == TransactionKind::Credit)
        .unwrap();
    assert_eq!(credit.account_id, collective.id);
    assert_eq!(credit.amount, 1000);
    // 5% platform fee, 10% host fee
    assert_eq!(credit.platform_fee, 50);
    assert_eq!(credit.host_fee, 100);
    assert_eq!(credit.net_amount, 850);
    let debit = transactions
        .iter()
        .find(|t| t.kind == TransactionKind::Debit)
        .unwrap();
    assert_eq!(debit.account_id, org.id);
    assert_eq!(debit.amount, -1000);
    assert_eq!(debit.group_id, credit.group_id);

    let roles = funding
        .store
        .get_member_roles(org.id, collective.id)
        .await
        .unwrap();
    assert!(roles.contains(&MemberRole::Contributor));
    assert_eq!(funding.activities.count("order_processed"), 1);
}

#[tokio::test]
async fn test_anonymous_order_without_challenge_is_rejected() {
    let funding = TestFunding::new();
    let (_, _, collective) = hosted_collective(&funding).await;

    let ctx = RequestContext {
        challenge_token: None,
        ..anonymous_context()
    };
    let input = CreateOrderInput {
        email: Some(fake::email()),
        ..CreateOrderInput::donation(collective.id, 1000).with_payment_method(card())
    };
    let err = funding
        .service
        .create_order(&input, &Requester::anonymous(), &ctx)
        .await
        .unwrap_err();

    assert!(matches!(err, FundwayError::ValidationFailed(_)));
    assert!(err.to_string().contains("challenge"));
    assert!(funding.store.all_orders().is_empty());
    assert_eq!(funding.provider.charge_count(), 0);
}

#[tokio::test]
async fn test_paid_order_without_payment_method_is_rejected() {
    let funding = TestFunding::new();
    let (_, _, collective) = hosted_collective(&funding).await;

    let input = CreateOrderInput {
        email: Some(fake::email()),
        ..CreateOrderInput::donation(collective.id, 1000)
    };
    let err = funding
        .service
        .create_order(&input, &Requester::anonymous(), &anonymous_context())
        .await
        .unwrap_err();

    assert!(matches!(err, FundwayError::PaymentMethodRequired(_)));
    assert!(funding.store.all_orders().is_empty());
}

#[tokio::test]
async fn test_anonymous_donation_creates_user() {
    let funding = TestFunding::new();
    let (_, _, collective) = hosted_collective(&funding).await;
    let email = fake::email();

    let input = CreateOrderInput {
        email: Some(email.clone()),
        name: Some("Jo Doe".to_string()),
        ..CreateOrderInput::donation(collective.id, 2500).with_payment_method(card())
    };
    let order = funding
        .service
        .create_order(&input, &Requester::anonymous(), &anonymous_context())
        .await
        .unwrap();

    assert_eq!(order.status, OrderStatus::Paid);
    let user = funding.store.find_user_by_email(&email).await.unwrap().unwrap();
    assert_eq!(order.from_account_id, user.account_id);
    assert_eq!(order.created_by_user_id, user.id);
    assert!(order.metadata.challenge_response.is_some());
}

#[tokio::test]
async fn test_anonymous_order_with_registered_email_is_rejected() {
    let funding = TestFunding::new();
    let (_, _, collective) = hosted_collective(&funding).await;
    let existing = funding.user().await;

    let input = CreateOrderInput {
        email: Some(existing.email.to_uppercase()),
        ..CreateOrderInput::donation(collective.id, 1000).with_payment_method(card())
    };
    let err = funding
        .service
        .create_order(&input, &Requester::anonymous(), &anonymous_context())
        .await
        .unwrap_err();

    assert!(matches!(err, FundwayError::AccountExists(_)));
    assert_eq!(funding.provider.charge_count(), 0);
}

#[tokio::test]
async fn test_free_event_registration() {
    let funding = TestFunding::new();
    let admin = funding.user().await;
    let host = funding.host(&admin).await;
    let event = funding.event(&host).await;
    let attendee = funding.user().await;

    let input = CreateOrderInput::donation(event.id, 0);
    let order = funding
        .service
        .create_order(&input, &Requester::user(attendee.clone()), &authenticated_context())
        .await
        .unwrap();

    assert_eq!(order.status, OrderStatus::Paid);
    assert!(order.processed_at.is_some());
    assert!(order.description.starts_with("Registration to"));
    assert_eq!(funding.provider.charge_count(), 0);
    assert!(funding
        .store
        .list_order_transactions(order.id)
        .await
        .unwrap()
        .is_empty());

    let roles = funding
        .store
        .get_member_roles(attendee.account_id, event.id)
        .await
        .unwrap();
    assert!(roles.contains(&MemberRole::Attendee));
    assert_eq!(funding.activities.count("ticket_confirmed"), 1);
}

#[tokio::test]
async fn test_tier_per_user_limit() {
    let funding = TestFunding::new();
    let (_, _, collective) = hosted_collective(&funding).await;
    let tier = funding
        .tier(
            Tier::new(collective.id, "Sticker pack")
                .fixed(500)
                .with_max_quantity_per_user(2),
        )
        .await;
    let user = funding.user().await;

    let input = CreateOrderInput {
        tier_id: Some(tier.id),
        quantity: 3,
        ..CreateOrderInput::donation(collective.id, 0).with_payment_method(card())
    };
    let err = funding
        .service
        .create_order(&input, &Requester::user(user), &authenticated_context())
        .await
        .unwrap_err();

    assert!(matches!(err, FundwayError::ValidationFailed(_)));
    assert!(err.to_string().contains("up to 2"));
    assert_eq!(funding.provider.charge_count(), 0);
}

#[tokio::test]
async fn test_fixed_tier_amount_and_inventory() {
    let funding = TestFunding::new();
    let (_, _, collective) = hosted_collective(&funding).await;
    let tier = funding
        .tier(
            Tier::new(collective.id, "Ticket")
                .fixed(500)
                .with_max_quantity(3),
        )
        .await;

    let buyer = funding.user().await;
    let input = CreateOrderInput {
        tier_id: Some(tier.id),
        quantity: 2,
        ..CreateOrderInput::donation(collective.id, 0).with_payment_method(card())
    };
    let order = funding
        .service
        .create_order(&input, &Requester::user(buyer), &authenticated_context())
        .await
        .unwrap();

    assert_eq!(order.total_amount, 1000);
    assert_eq!(order.tier_id, Some(tier.id));
    assert!(order.description.ends_with("(Ticket)"));
    assert_eq!(funding.store.get_tier(tier.id).await.unwrap().unwrap().sold, 2);

    let late_buyer = funding.user().await;
    let err = funding
        .service
        .create_order(&input, &Requester::user(late_buyer), &authenticated_context())
        .await
        .unwrap_err();
    assert!(matches!(err, FundwayError::ValidationFailed(_)));
    assert_eq!(funding.provider.charge_count(), 1);
}

#[tokio::test]
async fn test_oversized_amounts_are_rejected() {
    let funding = TestFunding::new();
    let (_, _, collective) = hosted_collective(&funding).await;
    let tier = funding
        .tier(Tier::new(collective.id, "Sponsor").fixed(MAX_AMOUNT))
        .await;
    let buyer = funding.user().await;
    let requester = Requester::user(buyer);

    let input = CreateOrderInput {
        tier_id: Some(tier.id),
        quantity: 10_000,
        ..CreateOrderInput::donation(collective.id, 0).with_payment_method(card())
    };
    let err = funding
        .service
        .create_order(&input, &requester, &authenticated_context())
        .await
        .unwrap_err();
    assert!(matches!(err, FundwayError::ValidationFailed(_)));

    let input = CreateOrderInput::donation(collective.id, i64::MAX).with_payment_method(card());
    let err = funding
        .service
        .create_order(&input, &requester, &authenticated_context())
        .await
        .unwrap_err();
    assert!(matches!(err, FundwayError::ValidationFailed(_)));

    assert!(funding.store.all_orders().is_empty());
    assert_eq!(funding.store.get_tier(tier.id).await.unwrap().unwrap().sold, 0);
    assert_eq!(funding.provider.charge_count(), 0);
}

#[tokio::test]
async fn test_monthly_donation_activates_subscription() {
    let funding = TestFunding::new();
    let (_, _, collective) = hosted_collective(&funding).await;
    let user = funding.user().await;

    let input = CreateOrderInput::donation(collective.id, 1000)
        .with_interval(Interval::Month)
        .with_payment_method(card());
    let order = funding
        .service
        .create_order(&input, &Requester::user(user), &authenticated_context())
        .await
        .unwrap();

    assert_eq!(order.status, OrderStatus::Active);
    assert!(order.description.starts_with("Monthly donation to"));
    let subscription = funding
        .store
        .get_subscription(order.subscription_id.unwrap())
        .await
        .unwrap()
        .unwrap();
    assert!(subscription.is_active);
    assert_eq!(subscription.amount, 1000);
    assert_eq!(subscription.charge_retry_count, 0);
    assert!(subscription.next_charge_date.unwrap() > Utc::now() + Duration::days(27));
    assert_eq!(funding.activities.count("subscription_activated"), 1);
}

#[tokio::test]
async fn test_pledge_then_activation() {
    let funding = TestFunding::new();
    let user = funding.user().await;
    let requester = Requester::user(user);

    let input = CreateOrderInput {
        collective: AccountReference::external("acme/popular"),
        total_amount: 2000,
        interval: Some(Interval::Month),
        ..CreateOrderInput::default()
    };
    let order = funding
        .service
        .create_order(&input, &requester, &authenticated_context())
        .await
        .unwrap();

    assert_eq!(order.status, OrderStatus::Pending);
    assert!(order.processed_at.is_none());
    assert_eq!(funding.provider.charge_count(), 0);

    let pledged = funding
        .store
        .find_account_by_external_handle("acme/popular")
        .await
        .unwrap()
        .unwrap();
    assert!(pledged.is_pledged);
    assert!(!pledged.is_active);
    assert_eq!(order.to_account_id, pledged.id);

    let dormant = funding
        .store
        .get_subscription(order.subscription_id.unwrap())
        .await
        .unwrap()
        .unwrap();
    assert!(!dormant.is_active);
    assert_eq!(dormant.amount, 2000);

    // Cannot pay an account that is not onboarded yet
    let update = UpdateOrderInput {
        order_id: order.id,
        total_amount: None,
        payment_method: Some(card()),
    };
    let err = funding
        .service
        .update_order(&update, &requester)
        .await
        .unwrap_err();
    assert!(matches!(err, FundwayError::ValidationFailed(_)));

    // The project gets claimed and hosted
    let admin = funding.user().await;
    let host = funding.host(&admin).await;
    funding
        .store
        .create_account(&pledged.clone().with_active(true).with_host(host.id))
        .await
        .unwrap();

    let order = funding
        .service
        .update_order(&update, &requester)
        .await
        .unwrap();
    assert_eq!(order.status, OrderStatus::Active);
    assert!(order.processed_at.is_some());

    let subscription = funding
        .store
        .get_subscription(dormant.id)
        .await
        .unwrap()
        .unwrap();
    assert!(subscription.is_active);
    assert!(subscription.next_charge_date.is_some());
    assert_eq!(funding.provider.charge_count(), 1);
}

#[tokio::test]
async fn test_pledge_amount_update_before_activation() {
    let funding = TestFunding::new();
    let user = funding.user().await;
    let requester = Requester::user(user);

    let input = CreateOrderInput {
        collective: AccountReference::external("acme/popular"),
        total_amount: 2000,
        interval: Some(Interval::Month),
        ..CreateOrderInput::default()
    };
    let order = funding
        .service
        .create_order(&input, &requester, &authenticated_context())
        .await
        .unwrap();

    let update = UpdateOrderInput {
        order_id: order.id,
        total_amount: Some(3000),
        payment_method: None,
    };
    let updated = funding
        .service
        .update_order(&update, &requester)
        .await
        .unwrap();
    assert_eq!(updated.total_amount, 3000);
    assert_eq!(updated.status, OrderStatus::Pending);

    let dormant = funding
        .store
        .get_subscription(order.subscription_id.unwrap())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(dormant.amount, 3000);

    let stranger = funding.user().await;
    let err = funding
        .service
        .update_order(&update, &Requester::user(stranger))
        .await
        .unwrap_err();
    assert!(matches!(err, FundwayError::Unauthorized(_)));
}

#[tokio::test]
async fn test_rejected_order_update_writes_nothing() {
    let funding = TestFunding::new();
    let user = funding.user().await;
    let requester = Requester::user(user);

    let input = CreateOrderInput {
        collective: AccountReference::external("acme/popular"),
        total_amount: 2000,
        interval: Some(Interval::Month),
        ..CreateOrderInput::default()
    };
    let order = funding
        .service
        .create_order(&input, &requester, &authenticated_context())
        .await
        .unwrap();
    let methods_before = funding.store.all_payment_methods().len();

    // The project is not onboarded yet, so the whole update is refused
    let update = UpdateOrderInput {
        order_id: order.id,
        total_amount: Some(5000),
        payment_method: Some(card()),
    };
    let err = funding
        .service
        .update_order(&update, &requester)
        .await
        .unwrap_err();
    assert!(matches!(err, FundwayError::ValidationFailed(_)));

    let stored = funding.store.get_order(order.id).await.unwrap().unwrap();
    assert_eq!(stored.total_amount, 2000);
    assert_eq!(stored.payment_method_id, None);
    let dormant = funding
        .store
        .get_subscription(order.subscription_id.unwrap())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(dormant.amount, 2000);
    assert_eq!(funding.store.all_payment_methods().len(), methods_before);
    assert_eq!(funding.provider.charge_count(), 0);
}

#[tokio::test]
async fn test_fixed_tier_order_amount_cannot_change() {
    let funding = TestFunding::new();
    let (_, _, collective) = hosted_collective(&funding).await;
    let tier = funding
        .tier(Tier::new(collective.id, "Ticket").fixed(500))
        .await;
    let buyer = funding.user().await;
    let requester = Requester::user(buyer);

    let input = CreateOrderInput {
        tier_id: Some(tier.id),
        quantity: 2,
        ..CreateOrderInput::donation(collective.id, 0)
            .with_payment_method(PaymentMethodInput::manual())
    };
    let order = funding
        .service
        .create_order(&input, &requester, &authenticated_context())
        .await
        .unwrap();
    assert_eq!(order.status, OrderStatus::Pending);

    let update = UpdateOrderInput {
        order_id: order.id,
        total_amount: Some(100),
        payment_method: Some(card()),
    };
    let err = funding
        .service
        .update_order(&update, &requester)
        .await
        .unwrap_err();
    assert!(matches!(err, FundwayError::ValidationFailed(_)));

    let stored = funding.store.get_order(order.id).await.unwrap().unwrap();
    assert_eq!(stored.total_amount, 1000);
    assert_eq!(stored.status, OrderStatus::Pending);
    assert_eq!(funding.provider.charge_count(), 0);

    // Paying the tier's price still works
    let update = UpdateOrderInput {
        total_amount: None,
        ..update
    };
    let paid = funding
        .service
        .update_order(&update, &requester)
        .await
        .unwrap();
    assert_eq!(paid.status, OrderStatus::Paid);
    assert_eq!(paid.total_amount, 1000);
}

#[tokio::test]
async fn test_pledge_to_unpopular_handle_is_rejected() {
    let funding = TestFunding::new();
    let user = funding.user().await;

    let input = CreateOrderInput {
        collective: AccountReference::external("acme/obscure"),
        total_amount: 1000,
        interval: Some(Interval::Month),
        ..CreateOrderInput::default()
    };
    let err = funding
        .service
        .create_order(&input, &Requester::user(user), &authenticated_context())
        .await
        .unwrap_err();

    assert!(matches!(err, FundwayError::ValidationFailed(_)));
    assert!(funding
        .store
        .find_account_by_external_handle("acme/obscure")
        .await
        .unwrap()
        .is_none());
}

#[tokio::test]
async fn test_duplicate_submission_returns_original_order() {
    let funding = TestFunding::new();
    let (_, _, collective) = hosted_collective(&funding).await;
    let user = funding.user().await;
    let requester = Requester::user(user);

    let input = CreateOrderInput {
        idempotency_key: Some("checkout-7f3a".to_string()),
        ..CreateOrderInput::donation(collective.id, 1000).with_payment_method(card())
    };
    let first = funding
        .service
        .create_order(&input, &requester, &authenticated_context())
        .await
        .unwrap();
    let second = funding
        .service
        .create_order(&input, &requester, &authenticated_context())
        .await
        .unwrap();

    assert_eq!(first.id, second.id);
    assert_eq!(funding.provider.charge_count(), 1);
    assert_eq!(funding.store.all_orders().len(), 1);
}

#[tokio::test]
async fn test_idempotency_keys_are_scoped_to_the_requester() {
    let funding = TestFunding::new();
    let (_, _, collective) = hosted_collective(&funding).await;
    let alice = funding.user().await;
    let bob = funding.user().await;

    let input = CreateOrderInput {
        idempotency_key: Some("checkout-1".to_string()),
        ..CreateOrderInput::donation(collective.id, 1000).with_payment_method(card())
    };
    let first = funding
        .service
        .create_order(&input, &Requester::user(alice.clone()), &authenticated_context())
        .await
        .unwrap();
    let second = funding
        .service
        .create_order(&input, &Requester::user(bob.clone()), &authenticated_context())
        .await
        .unwrap();

    assert_ne!(first.id, second.id);
    assert_eq!(first.created_by_user_id, alice.id);
    assert_eq!(second.created_by_user_id, bob.id);
    assert_eq!(funding.provider.charge_count(), 2);

    // Anonymous donors with different emails do not collide either
    let anonymous = |email: String| CreateOrderInput {
        email: Some(email),
        ..input.clone()
    };
    let third = funding
        .service
        .create_order(&anonymous(fake::email()), &Requester::anonymous(), &anonymous_context())
        .await
        .unwrap();
    let fourth = funding
        .service
        .create_order(&anonymous(fake::email()), &Requester::anonymous(), &anonymous_context())
        .await
        .unwrap();
    assert_ne!(third.id, fourth.id);
    assert_eq!(funding.store.all_orders().len(), 4);
    assert_eq!(funding.provider.charge_count(), 4);
}

#[tokio::test]
async fn test_manual_payment_then_mark_as_paid() {
    let funding = TestFunding::new();
    let (host_admin, _, collective) = hosted_collective(&funding).await;
    let user = funding.user().await;

    let input = CreateOrderInput::donation(collective.id, 5000)
        .with_payment_method(PaymentMethodInput::manual());
    let order = funding
        .service
        .create_order(&input, &Requester::user(user.clone()), &authenticated_context())
        .await
        .unwrap();
    assert_eq!(order.status, OrderStatus::Pending);
    assert_eq!(funding.provider.charge_count(), 0);

    // Only the host's admins reconcile offline payments
    let err = funding
        .service
        .mark_order_as_paid(order.id, &Requester::user(user))
        .await
        .unwrap_err();
    assert!(matches!(err, FundwayError::Unauthorized(_)));

    let host_requester = Requester::user(host_admin);
    let paid = funding
        .service
        .mark_order_as_paid(order.id, &host_requester)
        .await
        .unwrap();
    assert_eq!(paid.status, OrderStatus::Paid);
    assert!(paid.processed_at.is_some());
    assert_eq!(funding.provider.charge_count(), 0);

    let transactions = funding.store.list_order_transactions(order.id).await.unwrap();
    assert_eq!(transactions.len(), 2);
    assert!(transactions.iter().all(|t| t.payment_method_id.is_none()));

    let err = funding
        .service
        .mark_order_as_paid(order.id, &host_requester)
        .await
        .unwrap_err();
    assert!(matches!(err, FundwayError::ValidationFailed(_)));
}

#[tokio::test]
async fn test_prepaid_credit_funds_organization_orders() {
    let funding = TestFunding::new();
    let (_, host, collective) = hosted_collective(&funding).await;
    let root = funding.root_user().await;
    let org_admin = funding.user().await;
    let org = funding
        .account(AccountKind::Organization, Some(&org_admin))
        .await;

    let grant = AddFundsInput {
        organization_id: org.id,
        host_id: host.id,
        total_amount: 5000,
        description: None,
    };
    let err = funding
        .service
        .add_funds_to_org(&grant, &Requester::user(org_admin.clone()))
        .await
        .unwrap_err();
    assert!(matches!(err, FundwayError::Unauthorized(_)));

    let credit = funding
        .service
        .add_funds_to_org(&grant, &Requester::user(root))
        .await
        .unwrap();
    assert_eq!(credit.kind, PaymentMethodType::Prepaid);
    assert_eq!(credit.balance, Some(5000));
    assert_eq!(credit.source_account_id, Some(host.id));
    assert!(credit.expiry.unwrap() > Utc::now() + Duration::days(364));

    let input = CreateOrderInput::donation(collective.id, 1200)
        .from_account(org.id)
        .with_payment_method(PaymentMethodInput::existing(credit.id));
    let order = funding
        .service
        .create_order(&input, &Requester::user(org_admin), &authenticated_context())
        .await
        .unwrap();

    assert_eq!(order.status, OrderStatus::Paid);
    assert_eq!(order.payment_method_id, Some(credit.id));
    assert_eq!(funding.provider.charge_count(), 0);
    let remaining = funding
        .store
        .get_payment_method(credit.id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(remaining.balance, Some(3800));
}

#[tokio::test]
async fn test_referral_grants_fundraiser_role() {
    let funding = TestFunding::new();
    let (_, _, collective) = hosted_collective(&funding).await;
    let referrer = funding.user().await;
    let user = funding.user().await;

    let input = CreateOrderInput {
        referral_account_id: Some(referrer.account_id),
        ..CreateOrderInput::donation(collective.id, 1000).with_payment_method(card())
    };
    let order = funding
        .service
        .create_order(&input, &Requester::user(user), &authenticated_context())
        .await
        .unwrap();

    assert_eq!(order.referral_account_id, Some(referrer.account_id));
    let roles = funding
        .store
        .get_member_roles(referrer.account_id, collective.id)
        .await
        .unwrap();
    assert!(roles.contains(&MemberRole::Fundraiser));
}

#[tokio::test]
async fn test_matching_fund_forces_referral() {
    let funding = TestFunding::new();
    let (_, _, collective) = hosted_collective(&funding).await;
    let sponsor_admin = funding.user().await;
    let sponsor = funding
        .account(AccountKind::Organization, Some(&sponsor_admin))
        .await;
    let fund = funding.matching_fund(sponsor.id, 2, 10_000).await;
    let user = funding.user().await;
    let other = funding.user().await;

    let input = CreateOrderInput {
        matching_fund_id: Some(fund.id),
        referral_account_id: Some(other.account_id),
        ..CreateOrderInput::donation(collective.id, 1000).with_payment_method(card())
    };
    let order = funding
        .service
        .create_order(&input, &Requester::user(user.clone()), &authenticated_context())
        .await
        .unwrap();
    assert_eq!(order.referral_account_id, Some(sponsor.id));
    assert_eq!(order.matching_payment_method_id, Some(fund.id));

    // Cannot match 6000 with 10000 at a factor of 2
    let input = CreateOrderInput {
        matching_fund_id: Some(fund.id),
        ..CreateOrderInput::donation(collective.id, 6000).with_payment_method(card())
    };
    let err = funding
        .service
        .create_order(&input, &Requester::user(user), &authenticated_context())
        .await
        .unwrap_err();
    assert!(matches!(err, FundwayError::ValidationFailed(_)));
}

#[tokio::test]
async fn test_self_funding_is_rejected() {
    let funding = TestFunding::new();
    let (admin, _, collective) = hosted_collective(&funding).await;

    let input = CreateOrderInput::donation(collective.id, 1000)
        .from_account(collective.id)
        .with_payment_method(card());
    let err = funding
        .service
        .create_order(&input, &Requester::user(admin), &authenticated_context())
        .await
        .unwrap_err();

    assert!(matches!(err, FundwayError::ValidationFailed(_)));
    assert!(funding.store.all_orders().is_empty());
}

#[tokio::test]
async fn test_fee_overrides_need_privileges() {
    let funding = TestFunding::new();
    let (host_admin, _, collective) = hosted_collective(&funding).await;
    let user = funding.user().await;

    let input = CreateOrderInput {
        platform_fee_percent: Some(0),
        ..CreateOrderInput::donation(collective.id, 1000).with_payment_method(card())
    };
    let err = funding
        .service
        .create_order(&input, &Requester::user(user), &authenticated_context())
        .await
        .unwrap_err();
    assert!(matches!(err, FundwayError::Unauthorized(_)));

    let input = CreateOrderInput {
        host_fee_percent: Some(0),
        ..CreateOrderInput::donation(collective.id, 1000).with_payment_method(card())
    };
    let order = funding
        .service
        .create_order(&input, &Requester::user(host_admin), &authenticated_context())
        .await
        .unwrap();
    let transactions = funding.store.list_order_transactions(order.id).await.unwrap();
    assert!(transactions.iter().all(|t| t.host_fee == 0));
}

#[tokio::test]
async fn test_order_rate_limit_per_account() {
    let config = ConfigBuilder::new()
        .with_order_limits(OrderLimitConfig::builder().per_account(2).build())
        .with_dev_mode(true)
        .build();
    let funding = TestFunding::builder().with_config(config).build();
    let (_, _, collective) = hosted_collective(&funding).await;
    let user = funding.user().await;
    let requester = Requester::user(user);

    let input = CreateOrderInput::donation(collective.id, 1000).with_payment_method(card());
    for _ in 0..2 {
        funding
            .service
            .create_order(&input, &requester, &authenticated_context())
            .await
            .unwrap();
    }
    let err = funding
        .service
        .create_order(&input, &requester, &authenticated_context())
        .await
        .unwrap_err();

    assert!(matches!(err, FundwayError::LimitExceeded(_)));
    assert_eq!(funding.provider.charge_count(), 2);
}

#[tokio::test]
async fn test_pledge_rate_limit_is_keyed_by_handle() {
    let config = ConfigBuilder::new()
        .with_order_limits(
            OrderLimitConfig::builder()
                .per_account(100)
                .per_account_destination(1)
                .build(),
        )
        .with_dev_mode(true)
        .build();
    let funding = TestFunding::builder().with_config(config).build();
    let user = funding.user().await;
    let requester = Requester::user(user);

    let pledge = |handle: &str| CreateOrderInput {
        collective: AccountReference::external(handle),
        total_amount: 1000,
        interval: Some(Interval::Month),
        ..CreateOrderInput::default()
    };
    funding
        .service
        .create_order(&pledge("acme/popular"), &requester, &authenticated_context())
        .await
        .unwrap();
    let err = funding
        .service
        .create_order(&pledge("ACME/Popular"), &requester, &authenticated_context())
        .await
        .unwrap_err();

    assert!(matches!(err, FundwayError::LimitExceeded(_)));
    assert_eq!(funding.store.all_orders().len(), 1);
}

#[tokio::test]
async fn test_test_config_disables_limits_in_practice() {
    let config = test_config();
    assert!(config.dev.is_dev_mode());
    assert!(config.order_limits.per_account >= 10_000);
}
