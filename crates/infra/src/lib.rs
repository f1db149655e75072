//! Infrastructure layer: storage, tenant-scoped reads and the stock services
//! built on them.
//!
//! - [`store`]: the `InventoryStore` boundary with in-memory and Postgres
//!   backends
//! - [`scoped`]: `ScopedRepository`, tenant filtering for any registered type
//! - [`ledger`], [`adjustments`], [`alerts`], [`hooks`]: the stock services
//! - [`runner`]: periodic alert scans
//! - [`config`]: environment/JSON configuration

pub mod adjustments;
pub mod alerts;
pub mod config;
pub mod hooks;
pub mod ledger;
pub mod runner;
pub mod scoped;
pub mod store;


pub use adjustments::{AdjustmentWorkflow, DecisionOutcome};
pub use alerts::{AlertEngine, ScanCounts, ScanReport, StockWatcher};
pub use config::{ConfigError, NegativeStockPolicy, StockConfig, UnscopedPolicy};
pub use hooks::{ConsistencyHooks, HookOutcome, SideEffect};
pub use ledger::{Reconciliation, StockLedger};
pub use runner::{AlertScanRunner, AlertScanRunnerHandle};
pub use scoped::{ScopedQuery, ScopedRepository};
pub use store::{InMemoryInventoryStore, InventoryStore, PostgresInventoryStore, RowSource, TenantDirectory};
