pub mod account;
pub mod balance;
pub mod customer;
pub mod dimension;
pub mod ledger;
pub mod pagination;

pub use account::{
    Account, AccountFilter, AccountScope, AccountType, BusinessAccount, CustomerAccount,
    DimensionFilter, DimensionSchema, PostingAddress, SubAccount, SubAccountDimensions,
    SubAccountFilter,
};
pub use balance::{Balance, BookedAtPeriod, EntryFilter, SumEntriesQuery};
pub use customer::{BusinessAccounts, CustomerAccountMapping, CustomerAccounts, CustomerRef};
pub use dimension::{CreateDimensionInput, Dimension, DimensionKey};
pub use ledger::{
    validate_invariance, Entry, EntryInput, Transaction, TransactionGroup, TransactionGroupInput,
    TransactionInput,
};
pub use pagination::{collect_all_pages, Cursor, Page, PageParams, DEFAULT_PAGE_SIZE, MAX_PAGES};
