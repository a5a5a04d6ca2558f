//! 兑换记录实体

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::enums::{FulfillmentMethod, RedemptionStatus};

/// 兑换记录
///
/// points_cost 为兑换时的快照（单价 × 数量），奖励后续调价不影响历史
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, sqlx::FromRow)]
#[serde(rename_all = "camelCase")]
pub struct RedemptionRecord {
    pub id: i64,
    /// 对外可分享的兑换码（唯一）
    pub redemption_code: String,
    pub account_id: i64,
    pub reward_id: i64,
    /// 对应的扣减流水，取消时据此冲正
    pub transaction_id: i64,
    pub points_cost: i64,
    pub quantity: i32,
    pub status: RedemptionStatus,
    pub fulfillment_method: FulfillmentMethod,
    pub approval_date: Option<DateTime<Utc>>,
    pub approved_by: Option<String>,
    pub fulfillment_date: Option<DateTime<Utc>>,
    pub fulfilled_by: Option<String>,
    pub notes: Option<String>,
    pub created_at: DateTime<Utc>,
    pub created_by: String,
    pub updated_at: DateTime<Utc>,
}

/// 生成兑换码
///
/// 格式: RD{yyyyMMddHHmmss}{8位十六进制}
/// 使用 UUID v4 的低位作为随机源，唯一性最终由存储层约束保证
pub fn generate_redemption_code(now: DateTime<Utc>) -> String {
    let random = Uuid::new_v4().as_u128() & 0xFFFF_FFFF;
    format!("RD{}{:08X}", now.format("%Y%m%d%H%M%S"), random)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generate_redemption_code_format() {
        let now = Utc::now();
        let code = generate_redemption_code(now);

        // "RD" + 14 位时间戳 + 8 位随机数 = 24
        assert!(code.starts_with("RD"));
        assert_eq!(code.len(), 24);
        assert!(code[2..16].chars().all(|c| c.is_ascii_digit()));
        assert!(code[16..].chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn test_generate_redemption_code_differs() {
        let now = Utc::now();
        let codes: std::collections::HashSet<_> =
            (0..100).map(|_| generate_redemption_code(now)).collect();
        assert!(codes.len() > 90);
    }
}
