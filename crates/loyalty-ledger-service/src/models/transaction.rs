//! 积分流水实体
//!
//! 流水只追加，写入后仅允许 status 从 active 变为 reversed/expired，修正一律通过新流水完成

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::enums::{ReferenceType, TransactionStatus, TransactionType};

/// 积分流水
///
/// balance_before/balance_after 为写入时的余额快照，事后不再重算
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, sqlx::FromRow)]
#[serde(rename_all = "camelCase")]
pub struct PointsTransaction {
    pub id: i64,
    pub account_id: i64,
    pub transaction_type: TransactionType,
    /// 变动数量（恒为正）
    pub amount: i64,
    pub balance_before: i64,
    pub balance_after: i64,
    pub reference_type: Option<ReferenceType>,
    pub reference_id: Option<String>,
    /// 仅 earn/bonus 流水有过期时间
    pub expiration_date: Option<DateTime<Utc>>,
    pub status: TransactionStatus,
    pub reason: Option<String>,
    pub created_at: DateTime<Utc>,
    pub created_by: String,
}

impl PointsTransaction {
    /// 带符号的余额变动
    pub fn signed_delta(&self) -> i64 {
        self.balance_after - self.balance_before
    }

    pub fn is_active(&self) -> bool {
        self.status == TransactionStatus::Active
    }

    /// 在给定时间点是否已到期
    pub fn is_due(&self, as_of: DateTime<Utc>) -> bool {
        self.is_active()
            && self.transaction_type.is_expirable()
            && self.expiration_date.is_some_and(|at| at <= as_of)
    }

    /// 冲正/过期流水引用的原流水 ID
    pub fn referenced_transaction(&self) -> Option<i64> {
        match self.reference_type {
            Some(ReferenceType::Transaction) => {
                self.reference_id.as_deref().and_then(|id| id.parse().ok())
            }
            _ => None,
        }
    }

    /// 快照是否满足余额算术关系
    ///
    /// 冲正流水的方向取决于原流水，只校验变动幅度
    pub fn is_arithmetic_consistent(&self) -> bool {
        match self.transaction_type {
            TransactionType::Earn | TransactionType::Bonus | TransactionType::Adjustment => {
                self.balance_after == self.balance_before + self.amount
            }
            TransactionType::Redeem | TransactionType::Expiration => {
                self.balance_after == self.balance_before - self.amount
            }
            TransactionType::Reversal => self.signed_delta().abs() == self.amount,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample(transaction_type: TransactionType, before: i64, after: i64) -> PointsTransaction {
        PointsTransaction {
            id: 1,
            account_id: 1,
            transaction_type,
            amount: (after - before).abs(),
            balance_before: before,
            balance_after: after,
            reference_type: None,
            reference_id: None,
            expiration_date: None,
            status: TransactionStatus::Active,
            reason: None,
            created_at: Utc::now(),
            created_by: "system".to_string(),
        }
    }

    #[test]
    fn test_signed_delta() {
        assert_eq!(sample(TransactionType::Earn, 0, 50).signed_delta(), 50);
        assert_eq!(sample(TransactionType::Redeem, 50, 20).signed_delta(), -30);
    }

    #[test]
    fn test_arithmetic_consistency() {
        assert!(sample(TransactionType::Bonus, 0, 50).is_arithmetic_consistent());
        assert!(sample(TransactionType::Redeem, 50, 20).is_arithmetic_consistent());
        assert!(sample(TransactionType::Reversal, 20, 50).is_arithmetic_consistent());

        let mut broken = sample(TransactionType::Earn, 0, 50);
        broken.balance_after = 40;
        assert!(!broken.is_arithmetic_consistent());
    }

    #[test]
    fn test_is_due() {
        let now = Utc::now();
        let mut txn = sample(TransactionType::Earn, 0, 50);
        assert!(!txn.is_due(now));

        txn.expiration_date = Some(now - chrono::Duration::days(1));
        assert!(txn.is_due(now));

        txn.status = TransactionStatus::Reversed;
        assert!(!txn.is_due(now));

        let mut adjustment = sample(TransactionType::Adjustment, 0, 10);
        adjustment.expiration_date = Some(now - chrono::Duration::days(1));
        assert!(!adjustment.is_due(now));
    }

    #[test]
    fn test_referenced_transaction() {
        let mut txn = sample(TransactionType::Reversal, 50, 0);
        txn.reference_type = Some(ReferenceType::Transaction);
        txn.reference_id = Some("42".to_string());
        assert_eq!(txn.referenced_transaction(), Some(42));

        txn.reference_type = Some(ReferenceType::Sale);
        assert_eq!(txn.referenced_transaction(), None);
    }
}
