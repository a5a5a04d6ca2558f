//! 奖励目录实体

use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::enums::Tier;

/// 库存不限量标记
pub const UNLIMITED_STOCK: i32 = -1;

/// 可兑换奖励
///
/// 库存只由兑换服务在账本事务内变更
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RewardItem {
    pub id: i64,
    pub name: String,
    pub description: Option<String>,
    /// 单件所需积分
    pub points_cost: i64,
    /// -1 表示不限量
    pub stock_quantity: i32,
    /// 可兑换等级（非空）
    pub eligible_tiers: BTreeSet<Tier>,
    /// 兑换前账户需保有的最低积分
    pub min_points_balance: i64,
    pub is_active: bool,
    /// 累计兑换件数
    pub total_redemptions: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl RewardItem {
    pub fn is_unlimited(&self) -> bool {
        self.stock_quantity < 0
    }

    /// 是否有足够库存
    pub fn has_stock(&self, quantity: i32) -> bool {
        self.is_unlimited() || self.stock_quantity >= quantity
    }

    pub fn is_eligible(&self, tier: Tier) -> bool {
        self.eligible_tiers.contains(&tier)
    }

    /// 兑换 quantity 件的总积分，溢出时返回 None
    pub fn total_cost(&self, quantity: i32) -> Option<i64> {
        self.points_cost.checked_mul(i64::from(quantity))
    }
}
