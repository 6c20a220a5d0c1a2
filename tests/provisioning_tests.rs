mod common;

use common::{group, setup, transfer, NAMESPACE};
use ledger_engine::models::{AccountFilter, AccountType, CustomerRef, DimensionKey};
use ledger_engine::services::{CustomerLifecycleHook, LedgerCustomerHook};
use ledger_engine::templates::DimensionResolver;
use rust_decimal_macros::dec;
use std::collections::HashSet;

#[tokio::test]
async fn test_concurrent_business_account_provisioning() {
    let t = setup();

    let handles: Vec<_> = (0..8)
        .map(|_| {
            let resolver = t.resolver.clone();
            tokio::spawn(async move { resolver.get_business_accounts(NAMESPACE).await.unwrap() })
        })
        .collect();

    let mut wash_ids = HashSet::new();
    for handle in handles {
        let accounts = handle.await.unwrap();
        wash_ids.insert(accounts.wash.id());
    }
    assert_eq!(wash_ids.len(), 1);

    let stored = t
        .catalog
        .list_accounts(&AccountFilter::namespace(NAMESPACE).with_types(AccountType::BUSINESS))
        .await
        .unwrap();
    assert_eq!(stored.len(), 3);
    let types: HashSet<AccountType> = stored.iter().map(|a| a.account_type).collect();
    assert_eq!(types.len(), 3);
}

#[tokio::test]
async fn test_concurrent_customer_provisioning_converges() {
    let t = setup();
    let customer = CustomerRef::new(NAMESPACE, "cus_race");

    let handles: Vec<_> = (0..4)
        .map(|_| {
            let resolver = t.resolver.clone();
            let customer = customer.clone();
            tokio::spawn(async move { resolver.create_customer_accounts(&customer).await.unwrap() })
        })
        .collect();

    let mut fbo_ids = HashSet::new();
    for handle in handles {
        fbo_ids.insert(handle.await.unwrap().fbo.id());
    }
    assert_eq!(fbo_ids.len(), 1);

    let stored = t.resolver.get_customer_accounts(&customer).await.unwrap();
    assert!(fbo_ids.contains(&stored.fbo.id()));
}

#[tokio::test]
async fn test_customer_hook_provisions_accounts() {
    let t = setup();
    let hook = LedgerCustomerHook::new(t.resolver.clone());
    let customer = CustomerRef::new(NAMESPACE, "cus_hooked");

    hook.post_create(&customer).await.unwrap();
    hook.post_create(&customer).await.unwrap();

    let accounts = t.resolver.get_customer_accounts(&customer).await.unwrap();
    assert_eq!(accounts.fbo.account_type(), AccountType::CustomerFbo);
    assert_eq!(accounts.receivable.account_type(), AccountType::CustomerReceivable);
}

#[tokio::test]
async fn test_customer_hook_rejects_blank_customer() {
    let t = setup();
    let hook = LedgerCustomerHook::new(t.resolver.clone());

    let err = hook.post_create(&CustomerRef::new(NAMESPACE, "")).await.unwrap_err();
    assert!(matches!(err, ledger_engine::error::AppError::Validation(_)));
}

#[tokio::test]
async fn test_customers_get_distinct_accounts() {
    let t = setup();
    let a = t
        .resolver
        .create_customer_accounts(&CustomerRef::new(NAMESPACE, "cus_a"))
        .await
        .unwrap();
    let b = t
        .resolver
        .create_customer_accounts(&CustomerRef::new(NAMESPACE, "cus_b"))
        .await
        .unwrap();
    assert_ne!(a.fbo.id(), b.fbo.id());
    assert_ne!(a.receivable.id(), b.receivable.id());
}

#[tokio::test]
async fn test_concurrent_dimension_resolution() {
    let t = setup();

    let handles: Vec<_> = (0..6)
        .map(|_| {
            let catalog = t.catalog.clone();
            tokio::spawn(async move {
                catalog
                    .resolve_dimension(NAMESPACE, DimensionKey::Currency, "JPY")
                    .await
                    .unwrap()
                    .id
            })
        })
        .collect();

    let mut ids = HashSet::new();
    for handle in handles {
        ids.insert(handle.await.unwrap());
    }
    assert_eq!(ids.len(), 1);
}

#[tokio::test]
async fn test_customer_balance_by_currency() {
    let t = setup();
    let (fbo, receivable) = t.customer_sub_accounts("cus_1").await;
    let customer = CustomerRef::new(NAMESPACE, "cus_1");

    t.ledger
        .commit_group(group(vec![transfer(&receivable, &fbo, dec!(42.50))]))
        .await
        .unwrap();

    let usd = t.balances.customer_balance(&customer, "USD").await.unwrap();
    assert_eq!(usd.settled, dec!(42.50));

    let eur = t.balances.customer_balance(&customer, "EUR").await.unwrap();
    assert_eq!(eur.settled, dec!(0));

    let err = t
        .balances
        .customer_balance(&CustomerRef::new(NAMESPACE, "nobody"), "USD")
        .await
        .unwrap_err();
    assert!(err.is_not_found());
}
