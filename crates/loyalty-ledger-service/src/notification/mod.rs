//! 等级变更通知
//!
//! 入账导致等级提升后，在事务提交之后异步通知外部系统。
//! 发送为 fire-and-forget：不阻塞账本操作，失败只记录日志。

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{error, info};

use crate::error::Result;
use crate::models::Tier;

/// 等级提升通知
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TierUpgradeNotification {
    pub account_id: i64,
    pub customer_id: String,
    pub previous_tier: Tier,
    pub new_tier: Tier,
    pub lifetime_earned: i64,
    pub occurred_at: DateTime<Utc>,
}

/// 等级通知发送接口
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait TierNotifier: Send + Sync {
    async fn notify_tier_upgrade(&self, notification: TierUpgradeNotification) -> Result<()>;
}

/// 只输出日志的通知器
#[derive(Debug, Default, Clone)]
pub struct LoggingTierNotifier;

#[async_trait]
impl TierNotifier for LoggingTierNotifier {
    async fn notify_tier_upgrade(&self, notification: TierUpgradeNotification) -> Result<()> {
        info!(
            account_id = notification.account_id,
            customer_id = %notification.customer_id,
            previous_tier = %notification.previous_tier,
            new_tier = %notification.new_tier,
            "会员等级提升"
        );
        Ok(())
    }
}

/// 异步发送通知（fire-and-forget）
pub(crate) fn send_async(notifier: Arc<dyn TierNotifier>, notification: TierUpgradeNotification) {
    tokio::spawn(async move {
        let account_id = notification.account_id;
        let new_tier = notification.new_tier;
        if let Err(e) = notifier.notify_tier_upgrade(notification).await {
            error!(
                account_id,
                new_tier = %new_tier,
                error = %e,
                "等级提升通知发送失败"
            );
        }
    });
}
