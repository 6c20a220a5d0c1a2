use super::{customer_address, require_positive, CustomerPosting, Resolvers, TemplateScope, TransactionTemplate};
use crate::error::Result;
use crate::models::{AccountType, DimensionKey, EntryInput, SubAccountDimensions, TransactionInput};
use async_trait::async_trait;
use rust_decimal::Decimal;

/// Recognises revenue: customer funds leave the FBO account and land in
/// earnings under the same currency and tax code.
#[derive(Debug, Clone)]
pub struct RecognizeEarnings {
    pub customer: CustomerPosting,
    pub amount: Decimal,
}

impl RecognizeEarnings {
    pub fn new(customer: CustomerPosting, amount: Decimal) -> Self {
        Self { customer, amount }
    }
}

#[async_trait]
impl TransactionTemplate for RecognizeEarnings {
    fn name(&self) -> &'static str {
        "recognize_earnings"
    }

    async fn resolve(&self, scope: &TemplateScope, resolvers: &Resolvers) -> Result<TransactionInput> {
        require_positive("amount", self.amount)?;
        let ns = scope.namespace.as_str();
        let currency = self.customer.currency.as_str();

        let fbo = customer_address(scope, resolvers, &self.customer, currency, AccountType::CustomerFbo).await?;

        let currency_dim = resolvers.dimensions.resolve_dimension(ns, DimensionKey::Currency, currency).await?;
        let tax_code = resolvers
            .dimensions
            .resolve_dimension(ns, DimensionKey::TaxCode, &self.customer.tax_code)
            .await?;
        let earnings = resolvers
            .accounts
            .business_sub_account(
                ns,
                AccountType::Earnings,
                SubAccountDimensions::currency(currency_dim.id).with_tax_code(tax_code.id),
            )
            .await?
            .address();

        Ok(TransactionInput::new(
            scope.booked_at,
            vec![
                EntryInput::new(fbo, -self.amount),
                EntryInput::new(earnings, self.amount),
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

    #[tokio::test]
    async fn test_recognize_earnings_moves_fbo_to_earnings() {
        let scope = TemplateScope::new("ns", Utc::now());
        let input = RecognizeEarnings::new(CustomerPosting::new("cus_1", "USD", "txcd_1", 2), dec!(12.34))
            .resolve(&scope, &testing::resolvers())
            .await
            .unwrap();

        assert_eq!(input.entries[0].address.account_type, AccountType::CustomerFbo);
        assert_eq!(input.entries[0].amount, dec!(-12.34));
        assert_eq!(input.entries[1].address.account_type, AccountType::Earnings);
        assert_eq!(input.entries[1].amount, dec!(12.34));
        input.validate().unwrap();
    }
}
