//! 积分赚取规则与消费上下文

use std::collections::BTreeSet;

use chrono::{DateTime, FixedOffset, NaiveTime, Utc, Weekday};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use super::enums::{RuleType, Tier};

/// 每日生效时段
///
/// start > end 时表示跨越午夜，例如 22:00 - 02:00
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TimeWindow {
    pub start: NaiveTime,
    pub end: NaiveTime,
}

impl TimeWindow {
    pub fn new(start: NaiveTime, end: NaiveTime) -> Self {
        Self { start, end }
    }

    /// 包含起点，不包含终点
    pub fn contains(&self, time: NaiveTime) -> bool {
        if self.start <= self.end {
            self.start <= time && time < self.end
        } else {
            time >= self.start || time < self.end
        }
    }
}

/// 积分赚取规则
///
/// 由运营维护，账本在计算时只读
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EarningRule {
    pub id: i64,
    pub name: String,
    pub rule_type: RuleType,
    /// 消费金额倍率（≥ 0）
    pub points_multiplier: f64,
    /// 固定奖励积分（≥ 0）
    pub fixed_points: i64,
    pub minimum_purchase: Decimal,
    /// 单笔上限
    pub maximum_points_per_transaction: Option<i64>,
    /// 为空表示不限
    #[serde(default)]
    pub applicable_categories: BTreeSet<String>,
    #[serde(default)]
    pub applicable_products: BTreeSet<String>,
    #[serde(default)]
    pub excluded_products: BTreeSet<String>,
    #[serde(default)]
    pub applicable_tiers: BTreeSet<Tier>,
    #[serde(default)]
    pub valid_days: Vec<Weekday>,
    pub valid_from: Option<DateTime<Utc>>,
    pub valid_until: Option<DateTime<Utc>>,
    pub valid_time_window: Option<TimeWindow>,
    /// 越小越先计算
    pub priority: i32,
    pub require_coupon_code: Option<String>,
    pub max_uses_per_customer: Option<i64>,
    /// 命中后跳过所有优先级更低的规则
    #[serde(default)]
    pub exclusive: bool,
    pub is_active: bool,
}

impl EarningRule {
    /// 构造一条无任何限制的规则，供运营后台和测试在此基础上调整
    pub fn unrestricted(id: i64, name: impl Into<String>, points_multiplier: f64) -> Self {
        Self {
            id,
            name: name.into(),
            rule_type: RuleType::Base,
            points_multiplier,
            fixed_points: 0,
            minimum_purchase: Decimal::ZERO,
            maximum_points_per_transaction: None,
            applicable_categories: BTreeSet::new(),
            applicable_products: BTreeSet::new(),
            excluded_products: BTreeSet::new(),
            applicable_tiers: BTreeSet::new(),
            valid_days: Vec::new(),
            valid_from: None,
            valid_until: None,
            valid_time_window: None,
            priority: 100,
            require_coupon_code: None,
            max_uses_per_customer: None,
            exclusive: false,
            is_active: true,
        }
    }

    /// 规则有效期是否覆盖给定时间
    pub fn in_period(&self, at: DateTime<Utc>) -> bool {
        self.valid_from.is_none_or(|from| at >= from)
            && self.valid_until.is_none_or(|until| at <= until)
    }
}

/// 消费明细行
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PurchaseItem {
    pub product_id: String,
    pub category_id: String,
    pub amount: Decimal,
}

/// 消费上下文
///
/// purchased_at 保留门店本地时区，星期与时段按本地时间判断
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PurchaseContext {
    pub sale_id: String,
    pub amount: Decimal,
    pub purchased_at: DateTime<FixedOffset>,
    #[serde(default)]
    pub items: Vec<PurchaseItem>,
    pub coupon_code: Option<String>,
}

impl PurchaseContext {
    pub fn new(
        sale_id: impl Into<String>,
        amount: Decimal,
        purchased_at: DateTime<FixedOffset>,
    ) -> Self {
        Self {
            sale_id: sale_id.into(),
            amount,
            purchased_at,
            items: Vec::new(),
            coupon_code: None,
        }
    }

    pub fn with_item(
        mut self,
        product_id: impl Into<String>,
        category_id: impl Into<String>,
        amount: Decimal,
    ) -> Self {
        self.items.push(PurchaseItem {
            product_id: product_id.into(),
            category_id: category_id.into(),
            amount,
        });
        self
    }

    pub fn with_coupon(mut self, code: impl Into<String>) -> Self {
        self.coupon_code = Some(code.into());
        self
    }

    pub fn purchased_at_utc(&self) -> DateTime<Utc> {
        self.purchased_at.with_timezone(&Utc)
    }
}
