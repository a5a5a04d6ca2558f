//! 内存存储
//!
//! 供本地运行和测试使用。开启原子单元时持有全局锁并复制一份工作集，
//! 提交时整体写回，未提交即丢弃，从而获得可串行化语义。

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::{Mutex, OwnedMutexGuard};

use super::traits::{LoyaltyStore, StoreTx};
use crate::error::{LoyaltyError, Result};
use crate::models::{
    EarningRule, LoyaltyAccount, PointsTransaction, RedemptionRecord, RewardItem,
    TransactionStatus,
};

#[derive(Debug, Clone, Default)]
struct MemoryState {
    sequence: i64,
    accounts: BTreeMap<i64, LoyaltyAccount>,
    transactions: BTreeMap<i64, PointsTransaction>,
    rules: BTreeMap<i64, EarningRule>,
    /// (account_id, rule_id) -> 使用次数
    rule_usage: HashMap<(i64, i64), i64>,
    rewards: BTreeMap<i64, RewardItem>,
    redemptions: BTreeMap<i64, RedemptionRecord>,
}

impl MemoryState {
    fn next_id(&mut self) -> i64 {
        self.sequence += 1;
        self.sequence
    }

    fn account_transactions(&self, account_id: i64) -> Vec<PointsTransaction> {
        let mut txns: Vec<PointsTransaction> = self
            .transactions
            .values()
            .filter(|t| t.account_id == account_id)
            .cloned()
            .collect();
        txns.sort_by_key(|t| (t.created_at, t.id));
        txns
    }

    fn account_by_customer(&self, customer_id: &str, active_only: bool) -> Option<&LoyaltyAccount> {
        let mut candidates: Vec<&LoyaltyAccount> = self
            .accounts
            .values()
            .filter(|a| a.customer_id == customer_id && (!active_only || a.is_active))
            .collect();
        candidates.sort_by_key(|a| (a.is_active, a.id));
        candidates.pop()
    }
}

/// 内存积分账本存储
#[derive(Clone, Default)]
pub struct MemoryLoyaltyStore {
    state: Arc<Mutex<MemoryState>>,
}

impl MemoryLoyaltyStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// 写入赚取规则（id 为 0 时自动分配），返回规则 ID
    pub async fn insert_rule(&self, mut rule: EarningRule) -> i64 {
        let mut state = self.state.lock().await;
        if rule.id == 0 {
            rule.id = state.next_id();
        }
        let id = rule.id;
        state.rules.insert(id, rule);
        id
    }

    /// 写入奖励（id 为 0 时自动分配），返回奖励 ID
    pub async fn insert_reward(&self, mut reward: RewardItem) -> i64 {
        let mut state = self.state.lock().await;
        if reward.id == 0 {
            reward.id = state.next_id();
        }
        let id = reward.id;
        state.rewards.insert(id, reward);
        id
    }

    /// 某账户某规则的使用次数
    pub async fn rule_usage_count(&self, account_id: i64, rule_id: i64) -> i64 {
        let state = self.state.lock().await;
        state
            .rule_usage
            .get(&(account_id, rule_id))
            .copied()
            .unwrap_or(0)
    }
}

#[async_trait]
impl LoyaltyStore for MemoryLoyaltyStore {
    async fn begin(&self) -> Result<Box<dyn StoreTx>> {
        let guard = self.state.clone().lock_owned().await;
        let working = guard.clone();
        Ok(Box::new(MemoryTx { guard, working }))
    }

    async fn get_account(&self, id: i64) -> Result<Option<LoyaltyAccount>> {
        Ok(self.state.lock().await.accounts.get(&id).cloned())
    }

    async fn find_account_by_customer(
        &self,
        customer_id: &str,
    ) -> Result<Option<LoyaltyAccount>> {
        let state = self.state.lock().await;
        Ok(state.account_by_customer(customer_id, false).cloned())
    }

    async fn get_transaction(&self, id: i64) -> Result<Option<PointsTransaction>> {
        Ok(self.state.lock().await.transactions.get(&id).cloned())
    }

    async fn list_transactions(
        &self,
        account_id: i64,
        limit: i64,
    ) -> Result<Vec<PointsTransaction>> {
        let state = self.state.lock().await;
        let mut txns = state.account_transactions(account_id);
        txns.reverse();
        txns.truncate(limit.max(0) as usize);
        Ok(txns)
    }

    async fn list_all_transactions(&self, account_id: i64) -> Result<Vec<PointsTransaction>> {
        Ok(self.state.lock().await.account_transactions(account_id))
    }

    async fn list_accounts_with_due_credits(
        &self,
        as_of: DateTime<Utc>,
        after_account_id: i64,
        limit: i64,
    ) -> Result<Vec<i64>> {
        let state = self.state.lock().await;
        let mut ids: Vec<i64> = state
            .transactions
            .values()
            .filter(|t| t.is_due(as_of) && t.account_id > after_account_id)
            .map(|t| t.account_id)
            .collect();
        ids.sort_unstable();
        ids.dedup();
        ids.truncate(limit.max(0) as usize);
        Ok(ids)
    }

    async fn list_active_rules(&self) -> Result<Vec<EarningRule>> {
        let state = self.state.lock().await;
        Ok(state.rules.values().filter(|r| r.is_active).cloned().collect())
    }

    async fn get_reward(&self, id: i64) -> Result<Option<RewardItem>> {
        Ok(self.state.lock().await.rewards.get(&id).cloned())
    }

    async fn list_rewards(&self, active_only: bool) -> Result<Vec<RewardItem>> {
        let state = self.state.lock().await;
        Ok(state
            .rewards
            .values()
            .filter(|r| !active_only || r.is_active)
            .cloned()
            .collect())
    }

    async fn get_redemption(&self, id: i64) -> Result<Option<RedemptionRecord>> {
        Ok(self.state.lock().await.redemptions.get(&id).cloned())
    }

    async fn get_redemption_by_code(&self, code: &str) -> Result<Option<RedemptionRecord>> {
        let state = self.state.lock().await;
        Ok(state
            .redemptions
            .values()
            .find(|r| r.redemption_code == code)
            .cloned())
    }

    async fn list_redemptions(
        &self,
        account_id: i64,
        limit: i64,
    ) -> Result<Vec<RedemptionRecord>> {
        let state = self.state.lock().await;
        let mut records: Vec<RedemptionRecord> = state
            .redemptions
            .values()
            .filter(|r| r.account_id == account_id)
            .cloned()
            .collect();
        records.sort_by_key(|r| std::cmp::Reverse((r.created_at, r.id)));
        records.truncate(limit.max(0) as usize);
        Ok(records)
    }
}

/// 内存原子单元
struct MemoryTx {
    guard: OwnedMutexGuard<MemoryState>,
    working: MemoryState,
}

#[async_trait]
impl StoreTx for MemoryTx {
    async fn lock_account(&mut self, id: i64) -> Result<Option<LoyaltyAccount>> {
        Ok(self.working.accounts.get(&id).cloned())
    }

    async fn lock_active_account_by_customer(
        &mut self,
        customer_id: &str,
    ) -> Result<Option<LoyaltyAccount>> {
        Ok(self.working.account_by_customer(customer_id, true).cloned())
    }

    async fn insert_account(&mut self, account: &LoyaltyAccount) -> Result<i64> {
        if self
            .working
            .account_by_customer(&account.customer_id, true)
            .is_some()
        {
            return Err(LoyaltyError::AlreadyEnrolled(account.customer_id.clone()));
        }
        let id = self.working.next_id();
        let mut account = account.clone();
        account.id = id;
        self.working.accounts.insert(id, account);
        Ok(id)
    }

    async fn update_account(&mut self, account: &LoyaltyAccount) -> Result<()> {
        match self.working.accounts.get_mut(&account.id) {
            Some(slot) => {
                *slot = account.clone();
                Ok(())
            }
            None => Err(LoyaltyError::AccountNotFound(account.id)),
        }
    }

    async fn insert_transaction(&mut self, txn: &PointsTransaction) -> Result<i64> {
        let id = self.working.next_id();
        let mut txn = txn.clone();
        txn.id = id;
        self.working.transactions.insert(id, txn);
        Ok(id)
    }

    async fn lock_transaction(&mut self, id: i64) -> Result<Option<PointsTransaction>> {
        Ok(self.working.transactions.get(&id).cloned())
    }

    async fn set_transaction_status(&mut self, id: i64, status: TransactionStatus) -> Result<()> {
        match self.working.transactions.get_mut(&id) {
            Some(txn) => {
                txn.status = status;
                Ok(())
            }
            None => Err(LoyaltyError::TransactionNotFound(id)),
        }
    }

    async fn list_account_transactions(
        &mut self,
        account_id: i64,
    ) -> Result<Vec<PointsTransaction>> {
        Ok(self.working.account_transactions(account_id))
    }

    async fn rule_usage(&mut self, account_id: i64) -> Result<HashMap<i64, i64>> {
        Ok(self
            .working
            .rule_usage
            .iter()
            .filter(|((account, _), _)| *account == account_id)
            .map(|((_, rule), count)| (*rule, *count))
            .collect())
    }

    async fn increment_rule_usage(&mut self, account_id: i64, rule_id: i64) -> Result<()> {
        *self
            .working
            .rule_usage
            .entry((account_id, rule_id))
            .or_insert(0) += 1;
        Ok(())
    }

    async fn lock_reward(&mut self, id: i64) -> Result<Option<RewardItem>> {
        Ok(self.working.rewards.get(&id).cloned())
    }

    async fn update_reward_stock(
        &mut self,
        id: i64,
        stock_quantity: i32,
        total_redemptions: i64,
    ) -> Result<()> {
        match self.working.rewards.get_mut(&id) {
            Some(reward) => {
                reward.stock_quantity = stock_quantity;
                reward.total_redemptions = total_redemptions;
                reward.updated_at = Utc::now();
                Ok(())
            }
            None => Err(LoyaltyError::RewardUnavailable(id)),
        }
    }

    async fn insert_redemption(&mut self, record: &RedemptionRecord) -> Result<i64> {
        if self
            .working
            .redemptions
            .values()
            .any(|r| r.redemption_code == record.redemption_code)
        {
            return Err(LoyaltyError::Internal(format!(
                "兑换码冲突: {}",
                record.redemption_code
            )));
        }
        let id = self.working.next_id();
        let mut record = record.clone();
        record.id = id;
        self.working.redemptions.insert(id, record);
        Ok(id)
    }

    async fn lock_redemption(&mut self, id: i64) -> Result<Option<RedemptionRecord>> {
        Ok(self.working.redemptions.get(&id).cloned())
    }

    async fn update_redemption(&mut self, record: &RedemptionRecord) -> Result<()> {
        match self.working.redemptions.get_mut(&record.id) {
            Some(slot) => {
                *slot = record.clone();
                Ok(())
            }
            None => Err(LoyaltyError::RedemptionNotFound(record.id.to_string())),
        }
    }

    async fn commit(self: Box<Self>) -> Result<()> {
        let MemoryTx { mut guard, working } = *self;
        *guard = working;
        Ok(())
    }
}
