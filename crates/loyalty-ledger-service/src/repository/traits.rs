//! 存储接口定义
//!
//! 服务层只依赖这两个 trait：
//! - `LoyaltyStore`: 只读查询与开启原子单元
//! - `StoreTx`: 一个原子单元，读取即加锁，`commit` 前的所有写入对外不可见，未提交即丢弃时回滚

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::error::Result;
use crate::models::{
    EarningRule, LoyaltyAccount, PointsTransaction, RedemptionRecord, RewardItem,
    TransactionStatus,
};

/// 积分账本存储
#[async_trait]
pub trait LoyaltyStore: Send + Sync {
    /// 开启一个原子单元
    async fn begin(&self) -> Result<Box<dyn StoreTx>>;

    // 账户
    async fn get_account(&self, id: i64) -> Result<Option<LoyaltyAccount>>;
    /// 优先返回有效账户，否则返回最近停用的账户
    async fn find_account_by_customer(&self, customer_id: &str)
    -> Result<Option<LoyaltyAccount>>;

    // 流水
    async fn get_transaction(&self, id: i64) -> Result<Option<PointsTransaction>>;
    /// 按创建时间倒序
    async fn list_transactions(&self, account_id: i64, limit: i64)
    -> Result<Vec<PointsTransaction>>;
    /// 按 (created_at, id) 正序返回全部流水
    async fn list_all_transactions(&self, account_id: i64) -> Result<Vec<PointsTransaction>>;
    /// 存在到期未处理 earn/bonus 流水的账户，按账户 ID 正序，从 `after_account_id` 之后开始
    async fn list_accounts_with_due_credits(
        &self,
        as_of: DateTime<Utc>,
        after_account_id: i64,
        limit: i64,
    ) -> Result<Vec<i64>>;

    // 规则
    async fn list_active_rules(&self) -> Result<Vec<EarningRule>>;

    // 奖励
    async fn get_reward(&self, id: i64) -> Result<Option<RewardItem>>;
    async fn list_rewards(&self, active_only: bool) -> Result<Vec<RewardItem>>;

    // 兑换
    async fn get_redemption(&self, id: i64) -> Result<Option<RedemptionRecord>>;
    async fn get_redemption_by_code(&self, code: &str) -> Result<Option<RedemptionRecord>>;
    /// 按创建时间倒序
    async fn list_redemptions(&self, account_id: i64, limit: i64)
    -> Result<Vec<RedemptionRecord>>;
}

/// 原子单元
///
/// 同一账户上的并发单元在 `lock_account` 处串行化；加锁顺序固定为
/// 兑换记录 -> 账户 -> 流水 -> 奖励，避免死锁
#[async_trait]
pub trait StoreTx: Send {
    // 账户
    async fn lock_account(&mut self, id: i64) -> Result<Option<LoyaltyAccount>>;
    async fn lock_active_account_by_customer(
        &mut self,
        customer_id: &str,
    ) -> Result<Option<LoyaltyAccount>>;
    /// 返回新账户 ID
    async fn insert_account(&mut self, account: &LoyaltyAccount) -> Result<i64>;
    async fn update_account(&mut self, account: &LoyaltyAccount) -> Result<()>;

    // 流水
    /// 返回新流水 ID
    async fn insert_transaction(&mut self, txn: &PointsTransaction) -> Result<i64>;
    async fn lock_transaction(&mut self, id: i64) -> Result<Option<PointsTransaction>>;
    async fn set_transaction_status(&mut self, id: i64, status: TransactionStatus) -> Result<()>;
    /// 按 (created_at, id) 正序返回账户全部流水
    async fn list_account_transactions(&mut self, account_id: i64)
    -> Result<Vec<PointsTransaction>>;

    // 规则使用次数
    async fn rule_usage(&mut self, account_id: i64) -> Result<HashMap<i64, i64>>;
    async fn increment_rule_usage(&mut self, account_id: i64, rule_id: i64) -> Result<()>;

    // 奖励
    async fn lock_reward(&mut self, id: i64) -> Result<Option<RewardItem>>;
    async fn update_reward_stock(
        &mut self,
        id: i64,
        stock_quantity: i32,
        total_redemptions: i64,
    ) -> Result<()>;

    // 兑换
    /// 返回新兑换记录 ID
    async fn insert_redemption(&mut self, record: &RedemptionRecord) -> Result<i64>;
    async fn lock_redemption(&mut self, id: i64) -> Result<Option<RedemptionRecord>>;
    async fn update_redemption(&mut self, record: &RedemptionRecord) -> Result<()>;

    /// 提交原子单元
    async fn commit(self: Box<Self>) -> Result<()>;
}
