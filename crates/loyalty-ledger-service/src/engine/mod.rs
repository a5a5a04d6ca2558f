//! 无状态计算引擎
//!
//! - `earning`: 消费积分规则求值
//! - `tier`: 会员等级推导

mod earning;
mod tier;

pub(crate) use earning::multiply_floor;
pub use earning::{
    EarningEvaluation, EarningRuleEngine, RuleContribution, SkipReason, SkippedRule, rule_matches,
};
pub use tier::TierEngine;
