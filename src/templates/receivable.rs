use super::{
    business_address, customer_address, require_positive, CustomerPosting, Resolvers, TemplateScope,
    TransactionTemplate,
};
use crate::error::Result;
use crate::models::{AccountType, EntryInput, TransactionInput};
use async_trait::async_trait;
use rust_decimal::Decimal;

/// Records an amount the customer owes: the receivable goes negative and the
/// customer's FBO balance is credited by the same amount.
#[derive(Debug, Clone)]
pub struct IssueCustomerReceivable {
    pub customer: CustomerPosting,
    pub amount: Decimal,
}

impl IssueCustomerReceivable {
    pub fn new(customer: CustomerPosting, amount: Decimal) -> Self {
        Self { customer, amount }
    }
}

#[async_trait]
impl TransactionTemplate for IssueCustomerReceivable {
    fn name(&self) -> &'static str {
        "issue_customer_receivable"
    }

    async fn resolve(&self, scope: &TemplateScope, resolvers: &Resolvers) -> Result<TransactionInput> {
        require_positive("amount", self.amount)?;
        let currency = self.customer.currency.as_str();

        let fbo = customer_address(scope, resolvers, &self.customer, currency, AccountType::CustomerFbo).await?;
        let receivable =
            customer_address(scope, resolvers, &self.customer, currency, AccountType::CustomerReceivable).await?;

        Ok(TransactionInput::new(
            scope.booked_at,
            vec![
                EntryInput::new(fbo, self.amount),
                EntryInput::new(receivable, -self.amount),
            ],
        ))
    }
}

/// Settles an outstanding receivable with value entering through the wash
/// account.
#[derive(Debug, Clone)]
pub struct FundCustomerReceivable {
    pub customer: CustomerPosting,
    pub amount: Decimal,
}

impl FundCustomerReceivable {
    pub fn new(customer: CustomerPosting, amount: Decimal) -> Self {
        Self { customer, amount }
    }
}

#[async_trait]
impl TransactionTemplate for FundCustomerReceivable {
    fn name(&self) -> &'static str {
        "fund_customer_receivable"
    }

    async fn resolve(&self, scope: &TemplateScope, resolvers: &Resolvers) -> Result<TransactionInput> {
        require_positive("amount", self.amount)?;
        let currency = self.customer.currency.as_str();

        let wash = business_address(scope, resolvers, currency, AccountType::Wash).await?;
        let receivable =
            customer_address(scope, resolvers, &self.customer, currency, AccountType::CustomerReceivable).await?;

        Ok(TransactionInput::new(
            scope.booked_at,
            vec![
                EntryInput::new(wash, -self.amount),
                EntryInput::new(receivable, self.amount),
            ],
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::AppError;
    use crate::models::validate_invariance;
    use crate::templates::testing;
    use crate::templates::{MockDimensionResolver, MockSubAccountResolver};
    use chrono::Utc;
    use rust_decimal_macros::dec;
    use std::sync::Arc;

    fn posting() -> CustomerPosting {
        CustomerPosting::new("cus_1", "USD", "txcd_10000000", 1)
    }

    #[tokio::test]
    async fn test_issue_receivable_balances() {
        let scope = TemplateScope::new("ns", Utc::now());
        let input = IssueCustomerReceivable::new(posting(), dec!(25.50))
            .resolve(&scope, &testing::resolvers())
            .await
            .unwrap();

        assert_eq!(input.entries.len(), 2);
        assert_eq!(input.entries[0].address.account_type, AccountType::CustomerFbo);
        assert_eq!(input.entries[0].amount, dec!(25.50));
        assert_eq!(input.entries[1].address.account_type, AccountType::CustomerReceivable);
        assert_eq!(input.entries[1].amount, dec!(-25.50));
        validate_invariance(&input.entries).unwrap();
    }

    #[tokio::test]
    async fn test_fund_receivable_draws_from_wash() {
        let scope = TemplateScope::new("ns", Utc::now());
        let input = FundCustomerReceivable::new(posting(), dec!(10))
            .resolve(&scope, &testing::resolvers())
            .await
            .unwrap();

        assert_eq!(input.entries[0].address.account_type, AccountType::Wash);
        assert_eq!(input.entries[0].amount, dec!(-10));
        assert_eq!(input.entries[1].address.account_type, AccountType::CustomerReceivable);
        assert_eq!(input.booked_at, scope.booked_at);
        validate_invariance(&input.entries).unwrap();
    }

    #[tokio::test]
    async fn test_non_positive_amount_resolves_nothing() {
        // Strict mocks: any resolver call fails the test.
        let resolvers = Resolvers::new(
            Arc::new(MockDimensionResolver::new()),
            Arc::new(MockSubAccountResolver::new()),
        );
        let scope = TemplateScope::new("ns", Utc::now());

        for amount in [dec!(0), dec!(-5)] {
            let err = IssueCustomerReceivable::new(posting(), amount)
                .resolve(&scope, &resolvers)
                .await
                .unwrap_err();
            assert!(matches!(err, AppError::Validation(_)));
        }
    }

    #[tokio::test]
    async fn test_resolver_errors_propagate() {
        let mut accounts = MockSubAccountResolver::new();
        accounts
            .expect_customer_sub_account()
            .returning(|customer, _, _| Err(AppError::NotFound(format!("no accounts for {}", customer.id))));
        let resolvers = Resolvers::new(Arc::new(testing::dimension_resolver()), Arc::new(accounts));

        let err = IssueCustomerReceivable::new(posting(), dec!(1))
            .resolve(&TemplateScope::new("ns", Utc::now()), &resolvers)
            .await
            .unwrap_err();
        assert!(err.is_not_found());
    }
}
