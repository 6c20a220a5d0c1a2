use crate::error::{AppError, Result};
use crate::models::{
    AccountType, Balance, CustomerRef, DimensionFilter, DimensionKey, EntryFilter, SumEntriesQuery,
};
use crate::observability::{get_metrics, LatencyTimer};
use crate::repositories::{
    CustomerAccountRepository, DimensionRepository, LedgerRepository, Repositories,
};
use std::sync::Arc;
use tracing::instrument;

/// Answers balance queries by aggregating committed entries.
///
/// Reads never take ledger locks and see the last committed state, so a
/// query racing a commit may observe either side of it.
#[derive(Clone)]
pub struct BalanceService {
    ledger: Arc<dyn LedgerRepository>,
    dimensions: Arc<dyn DimensionRepository>,
    customer_accounts: Arc<dyn CustomerAccountRepository>,
}

impl BalanceService {
    pub fn new(repositories: &Repositories) -> Self {
        Self {
            ledger: repositories.ledger.clone(),
            dimensions: repositories.dimensions.clone(),
            customer_accounts: repositories.customer_accounts.clone(),
        }
    }

    /// Sums every entry matching the filter.
    #[instrument(skip(self, query), fields(namespace = %query.namespace))]
    pub async fn sum_entries(&self, query: &SumEntriesQuery) -> Result<Balance> {
        if query.namespace.trim().is_empty() {
            return Err(AppError::Validation("Namespace cannot be empty".to_string()));
        }
        if let (Some(from), Some(to)) = (query.filter.booked_at.from, query.filter.booked_at.to) {
            if from > to {
                return Err(AppError::Validation(
                    "Booked-at period starts after it ends".to_string(),
                ));
            }
        }

        let timer = LatencyTimer::new();
        let sum = self.ledger.sum_entries(query).await?;
        get_metrics().record_balance_query_latency(timer.elapsed_ms());

        Ok(Balance::settled(sum))
    }

    /// Balance of the customer's FBO account in one currency.
    pub async fn customer_balance(&self, customer: &CustomerRef, currency: &str) -> Result<Balance> {
        let mappings = self.customer_accounts.get_mappings(customer).await?;
        let fbo = mappings
            .iter()
            .find(|m| m.account_type == AccountType::CustomerFbo)
            .ok_or_else(|| {
                AppError::NotFound(format!("Customer '{}' has no ledger accounts", customer.id))
            })?;

        // Nothing can be booked in a currency the catalog has never seen.
        let Some(currency) = self
            .dimensions
            .get_dimension_by_key_and_value(&customer.namespace, DimensionKey::Currency, currency)
            .await?
        else {
            return Ok(Balance::default());
        };

        let filter = EntryFilter::account(fbo.account_id).with_dimensions(DimensionFilter::currency(currency.id));
        self.sum_entries(&SumEntriesQuery::new(customer.namespace.clone(), filter)).await
    }
}
