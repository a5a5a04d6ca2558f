//! 积分账本错误类型
//!
//! 错误按四类归档：参数校验、业务状态冲突、资源不存在、基础设施故障。
//! 前三类在任何写入之前同步返回；基础设施故障会中止当前原子单元并由调用方决定是否重试。

use std::time::Duration;

use thiserror::Error;

use crate::models::{RedemptionStatus, Tier, TransactionStatus, TransactionType};

/// 错误分类
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// 调用方输入不合法，原样重试无意义
    Validation,
    /// 业务规则拒绝（余额不足、重复开户、非法状态流转等），可直接展示给用户
    StateConflict,
    /// 账户、奖励、流水等不存在
    NotFound,
    /// 超时、存储不可用等基础设施故障，调用方可退避重试
    Infrastructure,
}

/// 积分账本错误类型
#[derive(Debug, Error)]
pub enum LoyaltyError {
    // === 参数校验 ===
    #[error("积分数量必须为正数: {0}")]
    InvalidAmount(i64),

    #[error("参数校验失败: {0}")]
    Validation(String),

    // === 账户 ===
    #[error("客户已开通会员账户: customer_id={0}")]
    AlreadyEnrolled(String),

    #[error("客户未开通会员账户: customer_id={0}")]
    NotEnrolled(String),

    #[error("会员账户不存在: {0}")]
    AccountNotFound(i64),

    #[error("会员账户已停用: {0}")]
    AccountInactive(i64),

    // === 奖励与兑换 ===
    #[error("奖励不存在: {0}")]
    RewardNotFound(i64),

    #[error("奖励不可兑换: reward_id={0}")]
    RewardUnavailable(i64),

    #[error("当前等级不可兑换该奖励: tier={tier}, reward_id={reward_id}")]
    TierIneligible { tier: Tier, reward_id: i64 },

    #[error("未达到最低积分要求: 需要 {required}, 当前 {available}")]
    MinimumBalanceNotMet { required: i64, available: i64 },

    #[error("奖励库存不足: reward_id={reward_id}, 需要 {requested}, 剩余 {available}")]
    InsufficientStock {
        reward_id: i64,
        requested: i32,
        available: i32,
    },

    #[error("积分余额不足: 当前 {available}, 需要 {required}")]
    InsufficientBalance { available: i64, required: i64 },

    #[error("兑换记录不存在: {0}")]
    RedemptionNotFound(String),

    #[error("兑换状态不允许流转: {from} -> {to}")]
    InvalidStatusTransition {
        from: RedemptionStatus,
        to: RedemptionStatus,
    },

    // === 流水 ===
    #[error("积分流水不存在: {0}")]
    TransactionNotFound(i64),

    #[error("积分流水已冲正: {0}")]
    AlreadyReversed(i64),

    #[error("积分流水不是有效状态: transaction_id={id}, status={status}")]
    TransactionNotActive { id: i64, status: TransactionStatus },

    #[error("该类型流水不可冲正: transaction_id={id}, type={transaction_type}")]
    NotReversible {
        id: i64,
        transaction_type: TransactionType,
    },

    #[error("兑换扣减须通过取消兑换单退回: transaction_id={0}")]
    RedemptionManaged(i64),

    // === 系统错误 ===
    #[error("事务执行超时: {}ms", .0.as_millis())]
    TransactionTimeout(Duration),

    #[error("存储不可用: {0}")]
    StorageUnavailable(String),

    #[error("数据库错误: {0}")]
    Database(sqlx::Error),

    #[error("积分计划配置错误: {0}")]
    Config(String),

    #[error("内部错误: {0}")]
    Internal(String),
}

/// 积分账本 Result 类型别名
pub type Result<T> = std::result::Result<T, LoyaltyError>;

impl LoyaltyError {
    /// 错误分类
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::InvalidAmount(_) | Self::Validation(_) => ErrorKind::Validation,
            Self::AlreadyEnrolled(_)
            | Self::AccountInactive(_)
            | Self::RewardUnavailable(_)
            | Self::TierIneligible { .. }
            | Self::MinimumBalanceNotMet { .. }
            | Self::InsufficientStock { .. }
            | Self::InsufficientBalance { .. }
            | Self::InvalidStatusTransition { .. }
            | Self::AlreadyReversed(_)
            | Self::TransactionNotActive { .. }
            | Self::NotReversible { .. }
            | Self::RedemptionManaged(_) => ErrorKind::StateConflict,
            Self::NotEnrolled(_)
            | Self::AccountNotFound(_)
            | Self::RewardNotFound(_)
            | Self::RedemptionNotFound(_)
            | Self::TransactionNotFound(_) => ErrorKind::NotFound,
            Self::TransactionTimeout(_)
            | Self::StorageUnavailable(_)
            | Self::Database(_)
            | Self::Config(_)
            | Self::Internal(_) => ErrorKind::Infrastructure,
        }
    }

    /// 检查是否为可重试的错误
    ///
    /// 账本内部从不自动重试，是否重试由调用方决定
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::TransactionTimeout(_) | Self::StorageUnavailable(_) | Self::Database(_)
        )
    }

    /// 检查是否为业务错误（非系统错误）
    pub fn is_business_error(&self) -> bool {
        self.kind() != ErrorKind::Infrastructure
    }

    /// 获取错误码（用于 API 响应）
    pub fn error_code(&self) -> &'static str {
        match self {
            Self::InvalidAmount(_) => "INVALID_AMOUNT",
            Self::Validation(_) => "VALIDATION_ERROR",
            Self::AlreadyEnrolled(_) => "ALREADY_ENROLLED",
            Self::NotEnrolled(_) => "NOT_ENROLLED",
            Self::AccountNotFound(_) => "ACCOUNT_NOT_FOUND",
            Self::AccountInactive(_) => "ACCOUNT_INACTIVE",
            Self::RewardNotFound(_) => "REWARD_NOT_FOUND",
            Self::RewardUnavailable(_) => "REWARD_UNAVAILABLE",
            Self::TierIneligible { .. } => "TIER_INELIGIBLE",
            Self::MinimumBalanceNotMet { .. } => "MINIMUM_BALANCE_NOT_MET",
            Self::InsufficientStock { .. } => "INSUFFICIENT_STOCK",
            Self::InsufficientBalance { .. } => "INSUFFICIENT_BALANCE",
            Self::RedemptionNotFound(_) => "REDEMPTION_NOT_FOUND",
            Self::InvalidStatusTransition { .. } => "INVALID_STATUS_TRANSITION",
            Self::TransactionNotFound(_) => "TRANSACTION_NOT_FOUND",
            Self::AlreadyReversed(_) => "ALREADY_REVERSED",
            Self::TransactionNotActive { .. } => "TRANSACTION_NOT_ACTIVE",
            Self::NotReversible { .. } => "NOT_REVERSIBLE",
            Self::RedemptionManaged(_) => "REDEMPTION_MANAGED",
            Self::TransactionTimeout(_) => "TRANSACTION_TIMEOUT",
            Self::StorageUnavailable(_) => "STORAGE_UNAVAILABLE",
            Self::Database(_) => "DATABASE_ERROR",
            Self::Config(_) => "CONFIG_ERROR",
            Self::Internal(_) => "INTERNAL_ERROR",
        }
    }
}

/// Postgres 语句超时
const PG_QUERY_CANCELED: &str = "57014";
/// Postgres 锁等待超时
const PG_LOCK_NOT_AVAILABLE: &str = "55P03";

impl From<sqlx::Error> for LoyaltyError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::PoolTimedOut => Self::TransactionTimeout(Duration::ZERO),
            sqlx::Error::PoolClosed => Self::StorageUnavailable("连接池已关闭".to_string()),
            sqlx::Error::Io(e) => Self::StorageUnavailable(e.to_string()),
            sqlx::Error::Database(ref db)
                if matches!(
                    db.code().as_deref(),
                    Some(PG_QUERY_CANCELED) | Some(PG_LOCK_NOT_AVAILABLE)
                ) =>
            {
                Self::TransactionTimeout(Duration::ZERO)
            }
            other => Self::Database(other),
        }
    }
}

impl From<config::ConfigError> for LoyaltyError {
    fn from(err: config::ConfigError) -> Self {
        Self::Config(err.to_string())
    }
}
