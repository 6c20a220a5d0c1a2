pub mod account_resolver;
pub mod balance_service;
pub mod catalog_service;
pub mod customer_hook;
pub mod ledger_service;
pub mod locker;

pub use account_resolver::AccountResolver;
pub use balance_service::BalanceService;
pub use catalog_service::CatalogService;
pub use customer_hook::{CustomerLifecycleHook, LedgerCustomerHook};
pub use ledger_service::{AccountInvariantCheck, LedgerService, NoAccountInvariants};
pub use locker::{LockKey, Locker};
