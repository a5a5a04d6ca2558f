//! 会员账户实体

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::enums::Tier;

/// 会员积分账户
///
/// 每个客户至多一个有效账户。余额只通过账本流水变更，停用后余额保留但不可再兑换。
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, sqlx::FromRow)]
#[serde(rename_all = "camelCase")]
pub struct LoyaltyAccount {
    pub id: i64,
    pub customer_id: String,
    /// 由累计获得积分推导
    pub tier: Tier,
    /// 可用积分
    pub available_points: i64,
    /// 待生效积分
    pub pending_points: i64,
    /// 累计获得积分（入账类流水之和，扣除被冲正部分）
    pub lifetime_earned: i64,
    /// 累计兑换积分
    pub lifetime_redeemed: i64,
    pub enrollment_date: DateTime<Utc>,
    pub last_activity_at: DateTime<Utc>,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl LoyaltyAccount {
    /// 创建一个零余额的新账户（id 由存储层分配）
    pub fn new(customer_id: impl Into<String>, now: DateTime<Utc>) -> Self {
        Self {
            id: 0,
            customer_id: customer_id.into(),
            tier: Tier::default(),
            available_points: 0,
            pending_points: 0,
            lifetime_earned: 0,
            lifetime_redeemed: 0,
            enrollment_date: now,
            last_activity_at: now,
            is_active: true,
            created_at: now,
            updated_at: now,
        }
    }

    /// 可用积分与待生效积分之和
    pub fn total_points(&self) -> i64 {
        self.available_points + self.pending_points
    }

    /// 可用积分是否足以支付
    pub fn can_spend(&self, amount: i64) -> bool {
        self.available_points >= amount
    }
}
