//! 服务层数据传输对象

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use loyalty_shared::config::LedgerSettings;

use crate::engine::EarningEvaluation;
use crate::models::{
    FulfillmentMethod, PointsTransaction, ReferenceType, Tier, TransactionType,
};

/// 账本运行参数
#[derive(Debug, Clone, Copy)]
pub struct LedgerOptions {
    /// 单个原子单元的最长执行时间
    pub transaction_timeout: Duration,
    /// 过期扫描每批账户数
    pub expire_batch_size: i64,
}

impl Default for LedgerOptions {
    fn default() -> Self {
        Self {
            transaction_timeout: Duration::from_secs(5),
            expire_batch_size: 500,
        }
    }
}

impl From<&LedgerSettings> for LedgerOptions {
    fn from(settings: &LedgerSettings) -> Self {
        Self {
            transaction_timeout: settings.transaction_timeout(),
            expire_batch_size: settings.expire_batch_size,
        }
    }
}

/// 流水关联对象
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EntryReference {
    pub reference_type: ReferenceType,
    pub reference_id: Option<String>,
}

impl EntryReference {
    pub fn new(reference_type: ReferenceType, reference_id: impl Into<String>) -> Self {
        Self {
            reference_type,
            reference_id: Some(reference_id.into()),
        }
    }

    /// 仅有类型、没有具体对象 ID 的关联
    pub fn of_type(reference_type: ReferenceType) -> Self {
        Self {
            reference_type,
            reference_id: None,
        }
    }

    pub fn sale(sale_id: impl Into<String>) -> Self {
        Self::new(ReferenceType::Sale, sale_id)
    }

    pub fn redemption(code: impl Into<String>) -> Self {
        Self::new(ReferenceType::Redemption, code)
    }

    pub(crate) fn transaction(id: i64) -> Self {
        Self::new(ReferenceType::Transaction, id.to_string())
    }
}

/// 待写入的流水
#[derive(Debug, Clone)]
pub(crate) struct NewEntry {
    pub kind: TransactionType,
    pub amount: i64,
    pub reference: Option<EntryReference>,
    pub expiration_date: Option<DateTime<Utc>>,
    pub reason: Option<String>,
    pub actor: String,
}

impl NewEntry {
    pub fn new(kind: TransactionType, amount: i64, actor: &str) -> Self {
        Self {
            kind,
            amount,
            reference: None,
            expiration_date: None,
            reason: None,
            actor: actor.to_string(),
        }
    }

    pub fn with_reference(mut self, reference: EntryReference) -> Self {
        self.reference = Some(reference);
        self
    }

    pub fn with_expiration(mut self, expiration_date: Option<DateTime<Utc>>) -> Self {
        self.expiration_date = expiration_date;
        self
    }

    pub fn with_reason(mut self, reason: impl Into<String>) -> Self {
        self.reason = Some(reason.into());
        self
    }
}

/// 入账后的等级变化
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct TierChange {
    pub from: Tier,
    pub to: Tier,
}

/// 兑换请求
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RedeemRequest {
    pub account_id: i64,
    pub reward_id: i64,
    pub quantity: i32,
    #[serde(default)]
    pub fulfillment_method: FulfillmentMethod,
    pub notes: Option<String>,
    /// 操作人
    pub actor: String,
}

impl RedeemRequest {
    pub fn new(account_id: i64, reward_id: i64, quantity: i32, actor: impl Into<String>) -> Self {
        Self {
            account_id,
            reward_id,
            quantity,
            fulfillment_method: FulfillmentMethod::default(),
            notes: None,
            actor: actor.into(),
        }
    }

    pub fn with_fulfillment(mut self, method: FulfillmentMethod) -> Self {
        self.fulfillment_method = method;
        self
    }

    pub fn with_notes(mut self, notes: impl Into<String>) -> Self {
        self.notes = Some(notes.into());
        self
    }
}

/// 消费积分发放结果
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EarningOutcome {
    pub account_id: i64,
    pub evaluation: EarningEvaluation,
    /// 按计划基础积分率计算的积分
    pub base_points: i64,
    /// 会员等级倍率
    pub tier_multiplier: f64,
    /// 实际发放积分
    pub points_awarded: i64,
    /// 未发放积分时为空
    pub transaction: Option<PointsTransaction>,
}

/// 尚未消耗的入账积分（FIFO 视图）
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OutstandingCredit {
    pub transaction_id: i64,
    pub transaction_type: TransactionType,
    pub original_amount: i64,
    pub remaining: i64,
    pub created_at: DateTime<Utc>,
    pub expiration_date: Option<DateTime<Utc>>,
}

/// 过期扫描统计
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ExpirationSummary {
    pub accounts_processed: u64,
    pub accounts_failed: u64,
    pub entries_expired: u64,
    pub points_expired: i64,
}

/// 过期扫描结果
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SweepOutcome {
    Completed(ExpirationSummary),
    /// 已有扫描在执行，本次直接返回
    AlreadyRunning,
}
