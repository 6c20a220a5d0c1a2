mod common;

use common::{group, setup, start_time, NAMESPACE};
use ledger_engine::models::{
    AccountType, CustomerRef, DimensionFilter, DimensionKey, EntryFilter, SumEntriesQuery,
};
use ledger_engine::templates::{
    ConvertCurrency, CustomerPosting, DimensionResolver, FundCustomerReceivable, IssueCustomerReceivable,
    RecognizeEarnings, TemplateScope, TransactionTemplate,
};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;

fn posting(currency: &str) -> CustomerPosting {
    CustomerPosting::new("cus_1", currency, "txcd_10000000", 1)
}

async fn book(t: &common::TestLedger, template: &dyn TransactionTemplate) {
    let scope = TemplateScope::new(NAMESPACE, start_time());
    let input = template.resolve(&scope, &t.resolvers()).await.unwrap();
    t.ledger
        .commit_group(group(vec![input]).with_annotations(serde_json::json!({ "template": template.name() })))
        .await
        .unwrap();
}

async fn account_balance(t: &common::TestLedger, account_id: uuid::Uuid, currency: &str) -> Decimal {
    let currency = t
        .catalog
        .resolve_dimension(NAMESPACE, DimensionKey::Currency, currency)
        .await
        .unwrap();
    t.balances
        .sum_entries(&SumEntriesQuery::new(
            NAMESPACE,
            EntryFilter::account(account_id).with_dimensions(DimensionFilter::currency(currency.id)),
        ))
        .await
        .unwrap()
        .settled
}

#[tokio::test]
async fn test_issue_then_fund_receivable() {
    let t = setup();
    let customer = CustomerRef::new(NAMESPACE, "cus_1");
    let accounts = t.resolver.create_customer_accounts(&customer).await.unwrap();

    book(&t, &IssueCustomerReceivable::new(posting("USD"), dec!(100))).await;
    assert_eq!(account_balance(&t, accounts.receivable.id(), "USD").await, dec!(-100));
    assert_eq!(account_balance(&t, accounts.fbo.id(), "USD").await, dec!(100));

    book(&t, &FundCustomerReceivable::new(posting("USD"), dec!(100))).await;
    assert_eq!(account_balance(&t, accounts.receivable.id(), "USD").await, dec!(0));

    let business = t.resolver.get_business_accounts(NAMESPACE).await.unwrap();
    assert_eq!(account_balance(&t, business.wash.id(), "USD").await, dec!(-100));
}

#[tokio::test]
async fn test_template_requires_provisioned_customer() {
    let t = setup();
    let scope = TemplateScope::new(NAMESPACE, start_time());

    let err = IssueCustomerReceivable::new(posting("USD"), dec!(1))
        .resolve(&scope, &t.resolvers())
        .await
        .unwrap_err();
    assert!(err.is_not_found());
}

#[tokio::test]
async fn test_convert_currency_nets_per_currency() {
    let t = setup();
    let customer = CustomerRef::new(NAMESPACE, "cus_1");
    let accounts = t.resolver.create_customer_accounts(&customer).await.unwrap();

    book(&t, &IssueCustomerReceivable::new(posting("USD"), dec!(100))).await;
    book(&t, &ConvertCurrency::new(posting("USD"), dec!(100), "EUR", dec!(91.80))).await;

    assert_eq!(account_balance(&t, accounts.fbo.id(), "USD").await, dec!(0));
    assert_eq!(account_balance(&t, accounts.fbo.id(), "EUR").await, dec!(91.80));

    let business = t.resolver.get_business_accounts(NAMESPACE).await.unwrap();
    assert_eq!(business.brokerage.account_type(), AccountType::Brokerage);
    assert_eq!(account_balance(&t, business.brokerage.id(), "USD").await, dec!(100));
    assert_eq!(account_balance(&t, business.brokerage.id(), "EUR").await, dec!(-91.80));

    let eur = t.balances.customer_balance(&customer, "EUR").await.unwrap();
    assert_eq!(eur.settled, dec!(91.80));
}

#[tokio::test]
async fn test_recognize_earnings() {
    let t = setup();
    let customer = CustomerRef::new(NAMESPACE, "cus_1");
    let accounts = t.resolver.create_customer_accounts(&customer).await.unwrap();

    book(&t, &IssueCustomerReceivable::new(posting("USD"), dec!(50))).await;
    book(&t, &RecognizeEarnings::new(posting("USD"), dec!(20))).await;

    assert_eq!(account_balance(&t, accounts.fbo.id(), "USD").await, dec!(30));

    let business = t.resolver.get_business_accounts(NAMESPACE).await.unwrap();
    assert_eq!(account_balance(&t, business.earnings.id(), "USD").await, dec!(20));
}

#[tokio::test]
async fn test_templates_reuse_sub_accounts() {
    let t = setup();
    let customer = CustomerRef::new(NAMESPACE, "cus_1");
    t.resolver.create_customer_accounts(&customer).await.unwrap();
    let scope = TemplateScope::new(NAMESPACE, start_time());

    let first = IssueCustomerReceivable::new(posting("USD"), dec!(1))
        .resolve(&scope, &t.resolvers())
        .await
        .unwrap();
    let second = IssueCustomerReceivable::new(posting("USD"), dec!(2))
        .resolve(&scope, &t.resolvers())
        .await
        .unwrap();

    assert_eq!(first.entries[0].address, second.entries[0].address);
    assert_eq!(first.entries[1].address, second.entries[1].address);
}
