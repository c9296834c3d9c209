pub mod tenancy;
pub mod subscriptions;
pub mod inventory;
pub mod sales;
