//! 积分账本枚举类型定义
//!
//! 所有枚举都支持数据库（sqlx）和 JSON（serde）序列化

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::LoyaltyError;

/// 会员等级
///
/// 顺序即等级高低，由累计获得积分推导，不可直接设置
#[derive(
    Debug,
    Clone,
    Copy,
    Default,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Hash,
    Serialize,
    Deserialize,
    sqlx::Type,
)]
#[serde(rename_all = "lowercase")]
#[sqlx(type_name = "varchar", rename_all = "lowercase")]
pub enum Tier {
    #[default]
    Bronze,
    Silver,
    Gold,
    Platinum,
}

impl Tier {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Bronze => "bronze",
            Self::Silver => "silver",
            Self::Gold => "gold",
            Self::Platinum => "platinum",
        }
    }
}

impl fmt::Display for Tier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Tier {
    type Err = LoyaltyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "bronze" => Ok(Self::Bronze),
            "silver" => Ok(Self::Silver),
            "gold" => Ok(Self::Gold),
            "platinum" => Ok(Self::Platinum),
            other => Err(LoyaltyError::Validation(format!("未知的会员等级: {}", other))),
        }
    }
}

/// 积分流水类型
///
/// 数量恒为正，方向由类型决定
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[sqlx(type_name = "varchar", rename_all = "lowercase")]
pub enum TransactionType {
    /// 消费获得
    Earn,
    /// 计划奖励（开户、生日、周年）
    Bonus,
    /// 兑换扣减
    Redeem,
    /// 人工补发
    Adjustment,
    /// 冲正，方向与原流水相反
    Reversal,
    /// 过期扣减
    Expiration,
}

impl TransactionType {
    /// 是否为入账类流水（可被 FIFO 消耗）
    pub fn is_credit(&self) -> bool {
        matches!(self, Self::Earn | Self::Bonus | Self::Adjustment)
    }

    /// 是否会过期
    pub fn is_expirable(&self) -> bool {
        matches!(self, Self::Earn | Self::Bonus)
    }

    /// 是否允许冲正
    pub fn is_reversible(&self) -> bool {
        matches!(
            self,
            Self::Earn | Self::Bonus | Self::Redeem | Self::Adjustment
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Earn => "earn",
            Self::Bonus => "bonus",
            Self::Redeem => "redeem",
            Self::Adjustment => "adjustment",
            Self::Reversal => "reversal",
            Self::Expiration => "expiration",
        }
    }
}

impl fmt::Display for TransactionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 积分流水状态
///
/// active -> reversed | expired，两者均为终态
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[sqlx(type_name = "varchar", rename_all = "lowercase")]
pub enum TransactionStatus {
    #[default]
    Active,
    Reversed,
    Expired,
}

impl fmt::Display for TransactionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Active => "active",
            Self::Reversed => "reversed",
            Self::Expired => "expired",
        };
        f.write_str(s)
    }
}

/// 流水关联对象类型
///
/// 仅用于回溯查询，不构成外键归属关系
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[sqlx(type_name = "varchar", rename_all = "snake_case")]
pub enum ReferenceType {
    /// 销售单
    Sale,
    /// 兑换记录
    Redemption,
    /// 开户奖励
    Signup,
    /// 生日奖励
    Birthday,
    /// 入会周年奖励
    Anniversary,
    /// 人工调整
    Manual,
    /// 被冲正或过期的原流水
    Transaction,
}

/// 兑换记录状态
///
/// pending -> approved -> completed，pending/approved -> cancelled
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[sqlx(type_name = "varchar", rename_all = "lowercase")]
pub enum RedemptionStatus {
    #[default]
    Pending,
    Approved,
    Completed,
    Cancelled,
}

impl RedemptionStatus {
    /// 状态流转是否合法
    pub fn can_transition_to(&self, next: RedemptionStatus) -> bool {
        matches!(
            (self, next),
            (Self::Pending, Self::Approved)
                | (Self::Approved, Self::Completed)
                | (Self::Pending, Self::Cancelled)
                | (Self::Approved, Self::Cancelled)
        )
    }

    /// 是否为终态
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Cancelled)
    }
}

impl fmt::Display for RedemptionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Pending => "pending",
            Self::Approved => "approved",
            Self::Completed => "completed",
            Self::Cancelled => "cancelled",
        };
        f.write_str(s)
    }
}

/// 兑换履约方式
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[sqlx(type_name = "varchar", rename_all = "snake_case")]
pub enum FulfillmentMethod {
    /// 门店自提
    #[default]
    InStore,
    /// 配送
    Delivery,
    /// 电子凭证
    Digital,
}

/// 赚取规则类型
///
/// 仅用于运营分类展示，计算逻辑由规则字段决定
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[sqlx(type_name = "varchar", rename_all = "snake_case")]
pub enum RuleType {
    /// 基础消费积分
    #[default]
    Base,
    /// 品类加倍
    Category,
    /// 指定商品
    Product,
    /// 限时促销
    Promotion,
}
