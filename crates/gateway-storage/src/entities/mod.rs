pub mod api_keys;
pub mod coupons;
pub mod credentials;
pub mod credit_transactions;
pub mod global_config;
pub mod internal_events;
pub mod providers;
pub mod referrals;
pub mod sessions;
pub mod trials;
pub mod turns;
pub mod usage_records;
pub mod users;

pub use api_keys::Entity as ApiKeys;
pub use coupons::Entity as Coupons;
pub use credentials::Entity as Credentials;
pub use credit_transactions::Entity as CreditTransactions;
pub use global_config::Entity as GlobalConfig;
pub use internal_events::Entity as InternalEvents;
pub use providers::Entity as Providers;
pub use referrals::Entity as Referrals;
pub use sessions::Entity as Sessions;
pub use trials::Entity as Trials;
pub use turns::Entity as Turns;
pub use usage_records::Entity as UsageRecords;
pub use users::Entity as Users;
