//! 领域模型
//!
//! - `account`: 会员积分账户
//! - `transaction`: 积分流水
//! - `rule`: 赚取规则与消费上下文
//! - `reward`: 奖励目录
//! - `redemption`: 兑换记录

mod account;
mod enums;
mod redemption;
mod reward;
mod rule;
mod transaction;

pub use account::LoyaltyAccount;
pub use enums::{
    FulfillmentMethod, RedemptionStatus, ReferenceType, RuleType, Tier, TransactionStatus,
    TransactionType,
};
pub use redemption::{RedemptionRecord, generate_redemption_code};
pub use reward::{RewardItem, UNLIMITED_STOCK};
pub use rule::{EarningRule, PurchaseContext, PurchaseItem, TimeWindow};
pub use transaction::PointsTransaction;
