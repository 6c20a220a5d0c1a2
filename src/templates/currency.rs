use super::{
    business_address, customer_address, require_positive, CustomerPosting, Resolvers, TemplateScope,
    TransactionTemplate,
};
use crate::error::{AppError, Result};
use crate::models::{AccountType, EntryInput, TransactionInput};
use async_trait::async_trait;
use rust_decimal::Decimal;

/// Moves customer funds from one currency to another through the brokerage
/// account. The rate is implied by the two amounts; each currency nets to
/// zero on its own.
#[derive(Debug, Clone)]
pub struct ConvertCurrency {
    /// Source side; `customer.currency` is the currency sold.
    pub customer: CustomerPosting,
    pub source_amount: Decimal,
    pub target_currency: String,
    pub target_amount: Decimal,
}

impl ConvertCurrency {
    pub fn new(
        customer: CustomerPosting,
        source_amount: Decimal,
        target_currency: impl Into<String>,
        target_amount: Decimal,
    ) -> Self {
        Self {
            customer,
            source_amount,
            target_currency: target_currency.into(),
            target_amount,
        }
    }
}

#[async_trait]
impl TransactionTemplate for ConvertCurrency {
    fn name(&self) -> &'static str {
        "convert_currency"
    }

    async fn resolve(&self, scope: &TemplateScope, resolvers: &Resolvers) -> Result<TransactionInput> {
        require_positive("source_amount", self.source_amount)?;
        require_positive("target_amount", self.target_amount)?;

        let source = self.customer.currency.as_str();
        let target = self.target_currency.as_str();
        if source == target {
            return Err(AppError::Validation(format!(
                "Cannot convert {} into itself",
                source
            )));
        }

        let fbo_source = customer_address(scope, resolvers, &self.customer, source, AccountType::CustomerFbo).await?;
        let brokerage_source = business_address(scope, resolvers, source, AccountType::Brokerage).await?;
        let brokerage_target = business_address(scope, resolvers, target, AccountType::Brokerage).await?;
        let fbo_target = customer_address(scope, resolvers, &self.customer, target, AccountType::CustomerFbo).await?;

        Ok(TransactionInput::new(
            scope.booked_at,
            vec![
                EntryInput::new(fbo_source, -self.source_amount),
                EntryInput::new(brokerage_source, self.source_amount),
                EntryInput::new(brokerage_target, -self.target_amount),
                EntryInput::new(fbo_target, self.target_amount),
            ],
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::templates::testing;
    use chrono::Utc;
    use rust_decimal_macros::dec;

    fn conversion(target: &str) -> ConvertCurrency {
        ConvertCurrency::new(
            CustomerPosting::new("cus_1", "USD", "txcd_10000000", 1),
            dec!(100),
            target,
            dec!(92.15),
        )
    }

    #[tokio::test]
    async fn test_convert_currency_entries() {
        let scope = TemplateScope::new("ns", Utc::now());
        let input = conversion("EUR").resolve(&scope, &testing::resolvers()).await.unwrap();

        let amounts: Vec<Decimal> = input.entries.iter().map(|e| e.amount).collect();
        assert_eq!(amounts, vec![dec!(-100), dec!(100), dec!(-92.15), dec!(92.15)]);

        let types: Vec<AccountType> = input.entries.iter().map(|e| e.address.account_type).collect();
        assert_eq!(
            types,
            vec![
                AccountType::CustomerFbo,
                AccountType::Brokerage,
                AccountType::Brokerage,
                AccountType::CustomerFbo
            ]
        );

        // Same account type, different currency, different sub-account.
        assert_ne!(input.entries[0].address, input.entries[3].address);
        assert_ne!(input.entries[1].address, input.entries[2].address);
        input.validate().unwrap();
    }

    #[tokio::test]
    async fn test_identical_currencies_rejected() {
        let scope = TemplateScope::new("ns", Utc::now());
        let err = conversion("USD").resolve(&scope, &testing::resolvers()).await.unwrap_err();
        assert!(matches!(err, AppError::Validation(msg) if msg.contains("into itself")));
    }

    #[tokio::test]
    async fn test_zero_target_amount_rejected() {
        let mut template = conversion("EUR");
        template.target_amount = Decimal::ZERO;
        let err = template
            .resolve(&TemplateScope::new("ns", Utc::now()), &testing::resolvers())
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::Validation(_)));
    }
}
