//! 会员等级计算
//!
//! 等级只由累计获得积分决定，与当前可用余额无关，兑换不会导致等级下降

use crate::error::{LoyaltyError, Result};
use crate::models::Tier;
use crate::program::{ProgramConfig, TierThreshold};

/// 等级引擎
#[derive(Debug, Clone)]
pub struct TierEngine {
    thresholds: Vec<TierThreshold>,
}

impl TierEngine {
    /// 门槛必须按积分和等级同时严格递增
    pub fn new(thresholds: Vec<TierThreshold>) -> Result<Self> {
        if thresholds.is_empty() {
            return Err(LoyaltyError::Config("等级门槛不能为空".to_string()));
        }
        for pair in thresholds.windows(2) {
            if pair[1].min_lifetime_points <= pair[0].min_lifetime_points
                || pair[1].tier <= pair[0].tier
            {
                return Err(LoyaltyError::Config(format!(
                    "等级门槛必须严格递增: {} -> {}",
                    pair[0].tier, pair[1].tier
                )));
            }
        }
        Ok(Self { thresholds })
    }

    pub fn from_program(program: &ProgramConfig) -> Result<Self> {
        Self::new(program.tiers.clone())
    }

    /// 不高于累计积分的最高门槛；低于最低门槛时为基础等级
    pub fn compute_tier(&self, lifetime_earned: i64) -> Tier {
        self.thresholds
            .iter()
            .rev()
            .find(|t| t.min_lifetime_points <= lifetime_earned)
            .map(|t| t.tier)
            .unwrap_or_default()
    }

    /// 入账后的等级升级判断，仅在计算结果高于当前等级时返回新等级
    pub fn upgrade(&self, current: Tier, lifetime_earned: i64) -> Option<Tier> {
        let computed = self.compute_tier(lifetime_earned);
        (computed > current).then_some(computed)
    }

    /// 下一个等级及还差多少积分
    pub fn next_tier(&self, lifetime_earned: i64) -> Option<(Tier, i64)> {
        self.thresholds
            .iter()
            .find(|t| t.min_lifetime_points > lifetime_earned)
            .map(|t| (t.tier, t.min_lifetime_points - lifetime_earned))
    }
}
