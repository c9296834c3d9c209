pub mod tenancy;
pub use tenancy::{NewTenant, Tenant};
pub mod subscription;
pub use subscription::{ActiveBranchSubscription, Authorization, NewPlan, SubscriptionPlan};
pub mod inventory;
pub use inventory::{MovementEntry, MovementKind, NewProduct, Product, StockKey, StockMovement};
pub mod sales;
pub use sales::{LineItem, Sale, SaleItem, SaleState};
