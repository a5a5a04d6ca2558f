//! 积分赚取规则引擎
//!
//! 纯函数求值：给定消费上下文、有效规则和会员等级，计算应发放的积分。
//!
//! ## 计算流程
//!
//! 1. 过滤：启用状态、有效期、星期、时段、等级、品类/商品、排除商品、最低消费、优惠码、使用次数
//! 2. 按 priority 升序逐条累加，命中 exclusive 规则后跳过其余规则
//! 3. 单条规则：floor(金额 × 倍率) + 固定积分，再按规则上限截断
//! 4. 汇总后按计划级单笔上限截断

use std::collections::HashMap;

use chrono::Datelike;
use rust_decimal::Decimal;
use rust_decimal::prelude::{FromPrimitive, ToPrimitive};
use serde::Serialize;

use crate::models::{EarningRule, PurchaseContext, Tier};

/// 规则未命中原因
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SkipReason {
    Inactive,
    OutOfPeriod,
    DayNotAllowed,
    OutsideTimeWindow,
    TierNotApplicable,
    ScopeNotMatched,
    ExcludedProduct,
    BelowMinimumPurchase,
    CouponRequired,
    UsageLimitReached,
    /// 被更高优先级的独占规则截断
    ShortCircuited,
}

/// 单条规则贡献
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RuleContribution {
    pub rule_id: i64,
    pub points: i64,
}

/// 未命中的规则
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SkippedRule {
    pub rule_id: i64,
    pub reason: SkipReason,
}

/// 求值结果
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EarningEvaluation {
    pub contributions: Vec<RuleContribution>,
    pub skipped: Vec<SkippedRule>,
    pub total_points: i64,
    /// 是否触发了计划级上限
    pub capped: bool,
}

impl EarningEvaluation {
    pub fn contributing_rule_ids(&self) -> impl Iterator<Item = i64> + '_ {
        self.contributions.iter().map(|c| c.rule_id)
    }
}

/// 积分赚取规则引擎
#[derive(Debug, Clone, Default)]
pub struct EarningRuleEngine {
    program_cap: Option<i64>,
}

impl EarningRuleEngine {
    pub fn new(program_cap: Option<i64>) -> Self {
        Self { program_cap }
    }

    /// 计算应发放的积分，无规则命中时返回 0
    pub fn evaluate(&self, purchase: &PurchaseContext, rules: &[EarningRule], tier: Tier) -> i64 {
        self.evaluate_detailed(purchase, rules, tier, &HashMap::new())
            .total_points
    }

    /// 计算应发放的积分并返回每条规则的命中明细
    ///
    /// `usage` 为该账户各规则已使用次数，用于 maxUsesPerCustomer 判断
    pub fn evaluate_detailed(
        &self,
        purchase: &PurchaseContext,
        rules: &[EarningRule],
        tier: Tier,
        usage: &HashMap<i64, i64>,
    ) -> EarningEvaluation {
        let mut ordered: Vec<&EarningRule> = rules.iter().collect();
        ordered.sort_by_key(|r| (r.priority, r.id));

        let mut evaluation = EarningEvaluation::default();
        let mut short_circuited = false;
        let mut sum: i64 = 0;

        for rule in ordered {
            if short_circuited {
                evaluation.skipped.push(SkippedRule {
                    rule_id: rule.id,
                    reason: SkipReason::ShortCircuited,
                });
                continue;
            }

            let uses = usage.get(&rule.id).copied().unwrap_or(0);
            if let Err(reason) = check_rule(rule, purchase, tier, uses) {
                evaluation.skipped.push(SkippedRule {
                    rule_id: rule.id,
                    reason,
                });
                continue;
            }

            let points = rule_points(rule, purchase.amount);
            sum = sum.saturating_add(points);
            evaluation.contributions.push(RuleContribution {
                rule_id: rule.id,
                points,
            });

            if rule.exclusive {
                short_circuited = true;
            }
        }

        evaluation.total_points = match self.program_cap {
            Some(cap) if sum > cap => {
                evaluation.capped = true;
                cap
            }
            _ => sum,
        };
        evaluation
    }
}

/// 规则是否适用于本次消费
pub fn rule_matches(rule: &EarningRule, purchase: &PurchaseContext, tier: Tier, uses: i64) -> bool {
    check_rule(rule, purchase, tier, uses).is_ok()
}

fn check_rule(
    rule: &EarningRule,
    purchase: &PurchaseContext,
    tier: Tier,
    uses: i64,
) -> Result<(), SkipReason> {
    if !rule.is_active {
        return Err(SkipReason::Inactive);
    }

    if !rule.in_period(purchase.purchased_at_utc()) {
        return Err(SkipReason::OutOfPeriod);
    }

    let local = purchase.purchased_at;
    if !rule.valid_days.is_empty() && !rule.valid_days.contains(&local.weekday()) {
        return Err(SkipReason::DayNotAllowed);
    }

    if let Some(window) = &rule.valid_time_window {
        if !window.contains(local.time()) {
            return Err(SkipReason::OutsideTimeWindow);
        }
    }

    if !rule.applicable_tiers.is_empty() && !rule.applicable_tiers.contains(&tier) {
        return Err(SkipReason::TierNotApplicable);
    }

    let category_ok = rule.applicable_categories.is_empty()
        || purchase
            .items
            .iter()
            .any(|item| rule.applicable_categories.contains(&item.category_id));
    let product_ok = rule.applicable_products.is_empty()
        || purchase
            .items
            .iter()
            .any(|item| rule.applicable_products.contains(&item.product_id));
    if !category_ok || !product_ok {
        return Err(SkipReason::ScopeNotMatched);
    }

    if purchase
        .items
        .iter()
        .any(|item| rule.excluded_products.contains(&item.product_id))
    {
        return Err(SkipReason::ExcludedProduct);
    }

    if purchase.amount < rule.minimum_purchase {
        return Err(SkipReason::BelowMinimumPurchase);
    }

    if let Some(required) = &rule.require_coupon_code {
        if purchase.coupon_code.as_deref() != Some(required.as_str()) {
            return Err(SkipReason::CouponRequired);
        }
    }

    if rule.max_uses_per_customer.is_some_and(|max| uses >= max) {
        return Err(SkipReason::UsageLimitReached);
    }

    Ok(())
}

/// floor(金额 × 倍率) + 固定积分，按规则上限截断
fn rule_points(rule: &EarningRule, amount: Decimal) -> i64 {
    let base = multiply_floor(amount, rule.points_multiplier);
    let points = base.saturating_add(rule.fixed_points.max(0));
    match rule.maximum_points_per_transaction {
        Some(max) => points.min(max.max(0)),
        None => points,
    }
}

/// floor(amount × multiplier)，结果不小于 0
pub(crate) fn multiply_floor(amount: Decimal, multiplier: f64) -> i64 {
    if amount <= Decimal::ZERO || multiplier <= 0.0 {
        return 0;
    }
    let Some(multiplier) = Decimal::from_f64(multiplier) else {
        return 0;
    };
    amount
        .checked_mul(multiplier)
        .map(|v| v.floor().to_i64().unwrap_or(i64::MAX))
        .unwrap_or(i64::MAX)
}
