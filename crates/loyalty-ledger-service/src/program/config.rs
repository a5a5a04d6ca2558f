//! 积分计划配置
//!
//! 等级门槛、等级权益、各类奖励积分、过期月数等由运营配置，账本每次操作重新读取

use std::collections::BTreeMap;

use chrono::{DateTime, Months, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{LoyaltyError, Result};
use crate::models::Tier;

/// 等级门槛
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TierThreshold {
    pub tier: Tier,
    /// 达到该等级所需的累计获得积分
    pub min_lifetime_points: i64,
}

impl TierThreshold {
    pub fn new(tier: Tier, min_lifetime_points: i64) -> Self {
        Self {
            tier,
            min_lifetime_points,
        }
    }
}

/// 等级权益
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TierBenefit {
    /// 消费积分倍率
    pub points_multiplier: f64,
    /// 消费折扣百分比，由收银侧使用
    pub discount_percent: f64,
}

impl Default for TierBenefit {
    fn default() -> Self {
        Self {
            points_multiplier: 1.0,
            discount_percent: 0.0,
        }
    }
}

/// 计划奖励类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum BonusKind {
    Signup,
    Birthday,
    Anniversary,
}

/// 积分计划配置
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProgramConfig {
    /// 严格递增的等级门槛
    pub tiers: Vec<TierThreshold>,
    pub tier_benefits: BTreeMap<Tier, TierBenefit>,
    pub signup_bonus: i64,
    pub birthday_bonus: i64,
    pub anniversary_bonus: i64,
    /// 每单位消费金额的基础积分
    pub points_per_currency_unit: f64,
    /// 积分有效月数，0 表示永不过期
    pub expiration_months: u32,
    /// 兑换前账户需保有的最低积分
    pub min_redemption_points: i64,
    /// 单笔消费积分上限
    pub max_points_per_transaction: Option<i64>,
}

impl Default for ProgramConfig {
    fn default() -> Self {
        let tier_benefits = BTreeMap::from([
            (Tier::Bronze, TierBenefit::default()),
            (
                Tier::Silver,
                TierBenefit {
                    points_multiplier: 1.25,
                    discount_percent: 5.0,
                },
            ),
            (
                Tier::Gold,
                TierBenefit {
                    points_multiplier: 1.5,
                    discount_percent: 10.0,
                },
            ),
            (
                Tier::Platinum,
                TierBenefit {
                    points_multiplier: 2.0,
                    discount_percent: 15.0,
                },
            ),
        ]);

        Self {
            tiers: vec![
                TierThreshold::new(Tier::Bronze, 0),
                TierThreshold::new(Tier::Silver, 1_000),
                TierThreshold::new(Tier::Gold, 5_000),
                TierThreshold::new(Tier::Platinum, 10_000),
            ],
            tier_benefits,
            signup_bonus: 100,
            birthday_bonus: 200,
            anniversary_bonus: 100,
            points_per_currency_unit: 1.0,
            expiration_months: 12,
            min_redemption_points: 0,
            max_points_per_transaction: None,
        }
    }
}

impl ProgramConfig {
    /// 校验配置
    pub fn validate(&self) -> Result<()> {
        if self.tiers.is_empty() {
            return Err(LoyaltyError::Config("等级门槛不能为空".to_string()));
        }

        for pair in self.tiers.windows(2) {
            if pair[1].min_lifetime_points <= pair[0].min_lifetime_points
                || pair[1].tier <= pair[0].tier
            {
                return Err(LoyaltyError::Config(format!(
                    "等级门槛必须严格递增: {}({}) -> {}({})",
                    pair[0].tier,
                    pair[0].min_lifetime_points,
                    pair[1].tier,
                    pair[1].min_lifetime_points
                )));
            }
        }

        if self.tiers[0].min_lifetime_points < 0 {
            return Err(LoyaltyError::Config("等级门槛不能为负数".to_string()));
        }

        for (name, value) in [
            ("signup_bonus", self.signup_bonus),
            ("birthday_bonus", self.birthday_bonus),
            ("anniversary_bonus", self.anniversary_bonus),
            ("min_redemption_points", self.min_redemption_points),
        ] {
            if value < 0 {
                return Err(LoyaltyError::Config(format!("{} 不能为负数: {}", name, value)));
            }
        }

        if !self.points_per_currency_unit.is_finite() || self.points_per_currency_unit < 0.0 {
            return Err(LoyaltyError::Config(format!(
                "points_per_currency_unit 不合法: {}",
                self.points_per_currency_unit
            )));
        }

        for (tier, benefit) in &self.tier_benefits {
            if !benefit.points_multiplier.is_finite() || benefit.points_multiplier < 0.0 {
                return Err(LoyaltyError::Config(format!(
                    "等级 {} 的积分倍率不合法: {}",
                    tier, benefit.points_multiplier
                )));
            }
        }

        if let Some(cap) = self.max_points_per_transaction.filter(|cap| *cap < 0) {
            return Err(LoyaltyError::Config(format!(
                "max_points_per_transaction 不能为负数: {}",
                cap
            )));
        }

        Ok(())
    }

    /// 等级权益，未配置时倍率为 1
    pub fn tier_benefit(&self, tier: Tier) -> TierBenefit {
        self.tier_benefits.get(&tier).copied().unwrap_or_default()
    }

    /// 计划奖励积分
    pub fn bonus_amount(&self, kind: BonusKind) -> i64 {
        match kind {
            BonusKind::Signup => self.signup_bonus,
            BonusKind::Birthday => self.birthday_bonus,
            BonusKind::Anniversary => self.anniversary_bonus,
        }
    }

    /// 从入账时间推算过期时间
    pub fn expiration_for(&self, earned_at: DateTime<Utc>) -> Option<DateTime<Utc>> {
        if self.expiration_months == 0 {
            return None;
        }
        earned_at.checked_add_months(Months::new(self.expiration_months))
    }
}
