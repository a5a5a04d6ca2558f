//! 服务层
//!
//! 实现积分账本业务逻辑，协调存储层、计划配置、审计与通知。
//!
//! ## 模块结构
//!
//! - `dto`: 数据传输对象定义
//! - `ledger`: 积分账本（入账、扣减、冲正、过期）
//! - `account_service`: 会员账户（开户、查询、停用）
//! - `earning_service`: 消费积分与奖励积分发放
//! - `redemption_service`: 奖励兑换与兑换单状态流转
//! - `reward_catalog`: 奖励目录查询与兑换资格校验

pub mod dto;

mod account_service;
mod earning_service;
mod ledger;
mod redemption_service;
mod reward_catalog;

use std::future::Future;
use std::time::Duration;

use crate::error::{LoyaltyError, Result};

pub use account_service::LoyaltyAccountService;
pub use dto::*;
pub use earning_service::EarningService;
pub use ledger::PointsLedger;
pub use redemption_service::RedemptionService;
pub use reward_catalog::RewardCatalog;

/// 在限定时间内执行一个原子单元
///
/// 超时后 future 被丢弃，未提交的事务随之回滚；不做任何自动重试
pub(crate) async fn within_deadline<T, F>(timeout: Duration, unit: F) -> Result<T>
where
    F: Future<Output = Result<T>>,
{
    match tokio::time::timeout(timeout, unit).await {
        Ok(result) => result.map_err(|e| match e {
            // 存储层识别出的锁等待/语句超时补上配置的时长
            LoyaltyError::TransactionTimeout(d) if d.is_zero() => {
                LoyaltyError::TransactionTimeout(timeout)
            }
            other => other,
        }),
        Err(_) => Err(LoyaltyError::TransactionTimeout(timeout)),
    }
}
