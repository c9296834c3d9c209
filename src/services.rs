pub mod events;
pub use events::{AuditEvent, AuditSink, ChannelAuditSink, LogReceiptStore, ReceiptStore};
pub mod tenancy_service;
pub use tenancy_service::{DeletionReport, TenantRemovalHook, TenantService, MAX_HIERARCHY_DEPTH};
pub mod subscription_service;
pub use subscription_service::SubscriptionService;
pub mod product_service;
pub use product_service::ProductService;
pub mod ledger_service;
pub use ledger_service::{AggregateBalance, BranchBalance, LedgerService, Reconciliation};
pub mod sale_service;
pub use sale_service::{SaleService, StockChangeKind, StockLine, Transfer};
