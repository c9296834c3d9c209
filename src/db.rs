pub mod store;
pub use store::{LockMode, Store, StoreTx};
pub mod memory;
pub use memory::MemoryStore;
pub mod pg_store;
pub use pg_store::PgStore;

pub mod tenancy_repo;
pub use tenancy_repo::TenantRepository;
pub mod inventory_repo;
pub use inventory_repo::InventoryRepository;
pub mod subscription_repo;
pub use subscription_repo::SubscriptionRepository;
pub mod sales_repo;
pub use sales_repo::SalesRepository;
