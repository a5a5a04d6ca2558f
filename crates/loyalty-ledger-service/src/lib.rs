//! 会员积分账本服务
//!
//! 维护每个会员的积分余额与只追加的积分流水，在并发入账与兑换下保持余额一致。
//!
//! ## 核心功能
//!
//! - **积分账本**：入账、扣减、冲正、过期，每次变动与余额更新在同一原子单元提交
//! - **会员账户**：开户（含开户奖励）、查询、停用
//! - **赚取规则**：按消费上下文、规则与会员等级计算积分
//! - **会员等级**：按累计获得积分升级，兑换不会导致降级
//! - **奖励兑换**：资格校验、扣积分、扣库存、生成兑换码；取消时整体补偿
//! - **过期处理**：后台 Worker 按 FIFO 计算到期积分
//!
//! ## 模块结构
//!
//! - `models`: 领域模型定义
//! - `error`: 错误类型定义
//! - `program`: 积分计划配置
//! - `engine`: 规则引擎与等级引擎（纯计算）
//! - `repository`: 存储层
//! - `service`: 业务服务层
//! - `audit`: 审计记录
//! - `notification`: 等级变更通知
//! - `worker`: 后台任务

pub mod audit;
pub mod engine;
pub mod error;
pub mod models;
pub mod notification;
pub mod program;
pub mod repository;
pub mod service;
pub mod worker;

pub use audit::{
    AuditAction, AuditEvent, AuditRecorder, MemoryAuditRecorder, PgAuditRecorder,
    TracingAuditRecorder,
};
pub use engine::{EarningEvaluation, EarningRuleEngine, TierEngine};
pub use error::{ErrorKind, LoyaltyError, Result};
pub use models::*;
pub use notification::{LoggingTierNotifier, TierNotifier, TierUpgradeNotification};
pub use program::{
    BonusKind, FileProgramConfig, ProgramConfig, ProgramConfigSource, StaticProgramConfig,
};
pub use repository::{LoyaltyStore, MemoryLoyaltyStore, PgLoyaltyStore, StoreTx};
pub use service::{
    EarningService, LedgerOptions, LoyaltyAccountService, PointsLedger, RedemptionService,
    RewardCatalog, dto,
};
pub use worker::ExpireWorker;
