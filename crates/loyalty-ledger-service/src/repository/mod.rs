//! 存储层
//!
//! - `traits`: `LoyaltyStore` / `StoreTx` 抽象
//! - `pg_store`: PostgreSQL 实现（行锁）
//! - `memory_store`: 进程内实现（全局锁，测试与本地运行使用）

mod memory_store;
mod pg_store;
mod traits;

pub use memory_store::MemoryLoyaltyStore;
pub use pg_store::PgLoyaltyStore;
pub use traits::{LoyaltyStore, StoreTx};
