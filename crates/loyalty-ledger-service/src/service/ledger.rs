//! 积分账本
//!
//! 所有余额变动都经由本模块写入流水，每次写入都与账户余额更新处于同一原子单元：
//!
//! - 入账（earn/bonus/adjustment）：校验账户有效，写流水，累加累计获得积分，按累计积分升级
//! - 扣减（redeem）：在加锁后的账户上重新校验余额，写流水
//! - 冲正（reversal）：为有效流水写一条反向流水，并把原流水标记为 reversed
//!   兑换冲正时，退回到已过期入账上的积分在同一单元内随即过期
//! - 过期（expiration）：按 FIFO 计算到期入账的剩余部分，写过期流水并标记原流水 expired
//!
//! 流水只追加不修改（状态字段除外），余额快照写入后不再重算。

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Instant;

use chrono::{DateTime, Utc};
use serde_json::json;
use tokio::sync::Mutex;
use tracing::{error, info, instrument};

use loyalty_shared::observability::metrics;

use crate::audit::{AuditAction, AuditEvent, AuditRecorder, record_best_effort};
use crate::engine::TierEngine;
use crate::error::{LoyaltyError, Result};
use crate::models::{
    LoyaltyAccount, PointsTransaction, ReferenceType, TransactionStatus, TransactionType,
};
use crate::notification::{TierNotifier, TierUpgradeNotification, send_async};
use crate::program::{ProgramConfig, ProgramConfigSource};
use crate::repository::{LoyaltyStore, StoreTx};

use super::account_service::LoyaltyAccountService;
use super::dto::{
    EntryReference, ExpirationSummary, LedgerOptions, NewEntry, OutstandingCredit, SweepOutcome,
    TierChange,
};
use super::within_deadline;

/// 系统任务写入流水时使用的操作人
pub(crate) const SYSTEM_ACTOR: &str = "system";

/// 积分账本
pub struct PointsLedger {
    store: Arc<dyn LoyaltyStore>,
    program: Arc<dyn ProgramConfigSource>,
    audit: Arc<dyn AuditRecorder>,
    notifier: Arc<dyn TierNotifier>,
    options: LedgerOptions,
    /// 过期扫描单飞锁
    sweep_guard: Mutex<()>,
}

impl PointsLedger {
    pub fn new(
        store: Arc<dyn LoyaltyStore>,
        program: Arc<dyn ProgramConfigSource>,
        audit: Arc<dyn AuditRecorder>,
        notifier: Arc<dyn TierNotifier>,
        options: LedgerOptions,
    ) -> Self {
        Self {
            store,
            program,
            audit,
            notifier,
            options,
            sweep_guard: Mutex::new(()),
        }
    }

    pub fn options(&self) -> &LedgerOptions {
        &self.options
    }

    pub(crate) fn store(&self) -> &dyn LoyaltyStore {
        self.store.as_ref()
    }

    /// 每次操作重新读取积分计划，管理端修改在下一次操作生效
    pub(crate) async fn load_program(&self) -> Result<(Arc<ProgramConfig>, TierEngine)> {
        let program = self.program.load().await?;
        let tiers = TierEngine::from_program(&program)?;
        Ok((program, tiers))
    }

    pub(crate) async fn audit(&self, event: AuditEvent) {
        record_best_effort(self.audit.as_ref(), event).await;
    }

    /// 在限定时间内执行原子单元
    pub(crate) async fn run_unit<T, F>(&self, unit: F) -> Result<T>
    where
        F: std::future::Future<Output = Result<T>>,
    {
        within_deadline(self.options.transaction_timeout, unit).await
    }

    // ==================== 公开操作 ====================

    /// 消费入账
    #[instrument(skip(self, reference, actor))]
    pub async fn record_earn(
        &self,
        account_id: i64,
        amount: i64,
        reference: EntryReference,
        expiration_date: Option<DateTime<Utc>>,
        actor: &str,
    ) -> Result<PointsTransaction> {
        let entry = NewEntry::new(TransactionType::Earn, amount, actor)
            .with_reference(reference)
            .with_expiration(expiration_date);
        self.credit(account_id, entry, "earn").await
    }

    /// 人工调整（只增不减，扣减通过冲正完成）
    #[instrument(skip(self, reason, actor))]
    pub async fn record_adjustment(
        &self,
        account_id: i64,
        amount: i64,
        reason: &str,
        actor: &str,
    ) -> Result<PointsTransaction> {
        if reason.trim().is_empty() {
            return Err(LoyaltyError::Validation("调整原因不能为空".to_string()));
        }
        let entry = NewEntry::new(TransactionType::Adjustment, amount, actor)
            .with_reference(EntryReference::of_type(ReferenceType::Manual))
            .with_reason(reason);
        self.credit(account_id, entry, "adjust").await
    }

    /// 扣减积分
    ///
    /// 余额在加锁后的账户上重新校验，不依赖调用前的读取结果
    #[instrument(skip(self, reference, actor))]
    pub async fn record_redeem(
        &self,
        account_id: i64,
        amount: i64,
        reference: EntryReference,
        actor: &str,
    ) -> Result<PointsTransaction> {
        if amount <= 0 {
            return Err(LoyaltyError::InvalidAmount(amount));
        }

        let start = Instant::now();
        let entry = NewEntry::new(TransactionType::Redeem, amount, actor).with_reference(reference);

        let txn = self
            .run_unit(async {
                let mut tx = self.store.begin().await?;
                let mut account = tx
                    .lock_account(account_id)
                    .await?
                    .ok_or(LoyaltyError::AccountNotFound(account_id))?;
                let txn = Self::debit_in_tx(tx.as_mut(), &mut account, entry, Utc::now()).await?;
                tx.commit().await?;
                Ok(txn)
            })
            .await?;

        metrics::record_points_redeemed(txn.amount);
        metrics::record_ledger_operation("redeem_points", start.elapsed().as_secs_f64());
        self.audit(
            AuditEvent::new(AuditAction::Redeem, &txn.created_by)
                .with_target("points_transaction", txn.id)
                .with_details(json!({
                    "accountId": account_id,
                    "amount": txn.amount,
                    "balanceAfter": txn.balance_after,
                })),
        )
        .await;

        info!(
            account_id,
            transaction_id = txn.id,
            amount = txn.amount,
            balance_after = txn.balance_after,
            "积分扣减成功"
        );
        Ok(txn)
    }

    /// 冲正流水
    ///
    /// 只允许冲正有效状态的 earn/bonus/redeem/adjustment 流水；返回新写入的冲正流水。
    /// 关联兑换单的扣减返回 `RedemptionManaged`，须通过取消兑换单退回。
    #[instrument(skip(self, reason, actor))]
    pub async fn reverse(
        &self,
        transaction_id: i64,
        reason: &str,
        actor: &str,
    ) -> Result<PointsTransaction> {
        let start = Instant::now();

        // 先确定所属账户，再按 账户 -> 流水 的顺序加锁
        let target = self
            .store
            .get_transaction(transaction_id)
            .await?
            .ok_or(LoyaltyError::TransactionNotFound(transaction_id))?;
        // 兑换单的扣减只能随兑换单取消退回，否则库存与兑换单状态无法同步
        if target.transaction_type == TransactionType::Redeem
            && target.reference_type == Some(ReferenceType::Redemption)
        {
            return Err(LoyaltyError::RedemptionManaged(transaction_id));
        }
        let account_id = target.account_id;

        let (original, reversal) = self
            .run_unit(async {
                let mut tx = self.store.begin().await?;
                let mut account = tx
                    .lock_account(account_id)
                    .await?
                    .ok_or(LoyaltyError::AccountNotFound(account_id))?;
                let result = Self::reverse_in_tx(
                    tx.as_mut(),
                    &mut account,
                    transaction_id,
                    reason,
                    actor,
                    Utc::now(),
                )
                .await?;
                tx.commit().await?;
                Ok(result)
            })
            .await?;

        metrics::record_ledger_operation("reverse", start.elapsed().as_secs_f64());
        self.audit(
            AuditEvent::new(AuditAction::Reverse, actor)
                .with_target("points_transaction", original.id)
                .with_details(json!({
                    "accountId": account_id,
                    "originalType": original.transaction_type.as_str(),
                    "amount": original.amount,
                    "reversalId": reversal.id,
                    "reason": reason,
                })),
        )
        .await;

        info!(
            account_id,
            transaction_id,
            reversal_id = reversal.id,
            balance_after = reversal.balance_after,
            "积分流水冲正成功"
        );
        Ok(reversal)
    }

    /// 处理截至 `as_of` 到期的入账
    ///
    /// 同一时刻只允许一次扫描，并发调用直接返回 `AlreadyRunning`。
    /// 每个账户独立一个原子单元，单个账户失败只记录日志并跳过。
    #[instrument(skip(self))]
    pub async fn expire_outstanding(&self, as_of: DateTime<Utc>) -> Result<SweepOutcome> {
        let Ok(_guard) = self.sweep_guard.try_lock() else {
            info!("过期扫描正在执行，跳过本次调用");
            return Ok(SweepOutcome::AlreadyRunning);
        };

        let start = Instant::now();
        let mut summary = ExpirationSummary::default();
        // 按账户 ID 翻页，失败的账户留到下次扫描
        let mut cursor = 0i64;

        loop {
            let batch = self
                .store
                .list_accounts_with_due_credits(as_of, cursor, self.options.expire_batch_size)
                .await?;
            let Some(&last) = batch.last() else {
                break;
            };
            cursor = last;

            for account_id in batch {
                match self.expire_account(account_id, as_of).await {
                    Ok((entries, points)) => {
                        summary.accounts_processed += 1;
                        summary.entries_expired += entries;
                        summary.points_expired += points;
                    }
                    Err(e) => {
                        error!(account_id, error = %e, "账户积分过期处理失败");
                        summary.accounts_failed += 1;
                    }
                }
            }
        }

        metrics::record_ledger_operation("expire", start.elapsed().as_secs_f64());
        info!(
            accounts = summary.accounts_processed,
            failed = summary.accounts_failed,
            entries = summary.entries_expired,
            points = summary.points_expired,
            "积分过期扫描完成"
        );
        Ok(SweepOutcome::Completed(summary))
    }

    // ==================== 查询 ====================

    /// 账户流水，按创建时间倒序
    pub async fn transaction_history(
        &self,
        account_id: i64,
        limit: i64,
    ) -> Result<Vec<PointsTransaction>> {
        if limit <= 0 {
            return Err(LoyaltyError::Validation(format!(
                "查询条数必须为正数: {}",
                limit
            )));
        }
        self.store.list_transactions(account_id, limit).await
    }

    pub async fn get_transaction(&self, transaction_id: i64) -> Result<PointsTransaction> {
        self.store
            .get_transaction(transaction_id)
            .await?
            .ok_or(LoyaltyError::TransactionNotFound(transaction_id))
    }

    /// 由流水重算余额
    ///
    /// 每条流水的带符号变动之和，与账户可用积分比对即可校验账本一致性
    pub async fn reconstruct_balance(&self, account_id: i64) -> Result<i64> {
        let history = self.store.list_all_transactions(account_id).await?;
        Ok(history.iter().map(PointsTransaction::signed_delta).sum())
    }

    /// 尚未被兑换或过期消耗的入账（FIFO 视图）
    ///
    /// 各项剩余之和与账户可用积分一致
    pub async fn outstanding_credits(&self, account_id: i64) -> Result<Vec<OutstandingCredit>> {
        let history = self.store.list_all_transactions(account_id).await?;
        let by_id: HashMap<i64, &PointsTransaction> = history.iter().map(|t| (t.id, t)).collect();

        Ok(fifo_outstanding(&history)
            .into_iter()
            .filter(|(_, remaining)| *remaining > 0)
            .filter_map(|(id, remaining)| {
                let credit = by_id.get(&id)?;
                Some(OutstandingCredit {
                    transaction_id: id,
                    transaction_type: credit.transaction_type,
                    original_amount: credit.amount,
                    remaining,
                    created_at: credit.created_at,
                    expiration_date: credit.expiration_date,
                })
            })
            .collect())
    }

    // ==================== 原子单元内部操作 ====================

    /// 入账并按累计积分升级
    pub(crate) async fn credit_in_tx(
        tx: &mut dyn StoreTx,
        account: &mut LoyaltyAccount,
        entry: NewEntry,
        tiers: &TierEngine,
        now: DateTime<Utc>,
    ) -> Result<(PointsTransaction, Option<TierChange>)> {
        if entry.amount <= 0 {
            return Err(LoyaltyError::InvalidAmount(entry.amount));
        }
        if !entry.kind.is_credit() {
            return Err(LoyaltyError::Internal(format!(
                "{} 不是入账类流水",
                entry.kind
            )));
        }
        if !account.is_active {
            return Err(LoyaltyError::AccountInactive(account.id));
        }

        let txn = Self::append_entry(tx, account, &entry, entry.amount, now).await?;

        account.lifetime_earned = account.lifetime_earned.saturating_add(entry.amount);
        let change = tiers
            .upgrade(account.tier, account.lifetime_earned)
            .map(|to| {
                let change = TierChange {
                    from: account.tier,
                    to,
                };
                account.tier = to;
                change
            });

        LoyaltyAccountService::apply_balance_delta(tx, account, entry.amount, now).await?;
        Ok((txn, change))
    }

    /// 扣减积分
    pub(crate) async fn debit_in_tx(
        tx: &mut dyn StoreTx,
        account: &mut LoyaltyAccount,
        entry: NewEntry,
        now: DateTime<Utc>,
    ) -> Result<PointsTransaction> {
        if entry.amount <= 0 {
            return Err(LoyaltyError::InvalidAmount(entry.amount));
        }
        if !account.is_active {
            return Err(LoyaltyError::AccountInactive(account.id));
        }
        if !account.can_spend(entry.amount) {
            return Err(LoyaltyError::InsufficientBalance {
                available: account.available_points,
                required: entry.amount,
            });
        }

        let txn = Self::append_entry(tx, account, &entry, -entry.amount, now).await?;
        account.lifetime_redeemed = account.lifetime_redeemed.saturating_add(entry.amount);
        LoyaltyAccountService::apply_balance_delta(tx, account, -entry.amount, now).await?;
        Ok(txn)
    }

    /// 冲正，返回 (原流水, 冲正流水)
    ///
    /// 调用方须已锁定原流水所属账户
    pub(crate) async fn reverse_in_tx(
        tx: &mut dyn StoreTx,
        account: &mut LoyaltyAccount,
        transaction_id: i64,
        reason: &str,
        actor: &str,
        now: DateTime<Utc>,
    ) -> Result<(PointsTransaction, PointsTransaction)> {
        let original = tx
            .lock_transaction(transaction_id)
            .await?
            .filter(|t| t.account_id == account.id)
            .ok_or(LoyaltyError::TransactionNotFound(transaction_id))?;

        match original.status {
            TransactionStatus::Active => {}
            TransactionStatus::Reversed => {
                return Err(LoyaltyError::AlreadyReversed(transaction_id));
            }
            status => {
                return Err(LoyaltyError::TransactionNotActive {
                    id: transaction_id,
                    status,
                });
            }
        }
        if !original.transaction_type.is_reversible() {
            return Err(LoyaltyError::NotReversible {
                id: transaction_id,
                transaction_type: original.transaction_type,
            });
        }

        let delta = -original.signed_delta();
        if delta < 0 && !account.can_spend(-delta) {
            return Err(LoyaltyError::InsufficientBalance {
                available: account.available_points,
                required: -delta,
            });
        }

        let entry = NewEntry::new(TransactionType::Reversal, original.amount, actor)
            .with_reference(EntryReference::transaction(original.id))
            .with_reason(reason);
        let reversal = Self::append_entry(tx, account, &entry, delta, now).await?;

        // 冲正不会触发降级
        if original.transaction_type.is_credit() {
            account.lifetime_earned = (account.lifetime_earned - original.amount).max(0);
        } else {
            account.lifetime_redeemed = (account.lifetime_redeemed - original.amount).max(0);
        }

        tx.set_transaction_status(original.id, TransactionStatus::Reversed)
            .await?;
        LoyaltyAccountService::apply_balance_delta(tx, account, delta, now).await?;

        if original.transaction_type == TransactionType::Redeem {
            Self::expire_refunded(tx, account, now).await?;
        }
        Ok((original, reversal))
    }

    /// 退回到已过期入账上的积分立即过期，返回过期积分
    ///
    /// 兑换冲正后按 FIFO 重放，退回的积分回到兑换当初消耗的入账上；
    /// 其中已标记 expired 的入账不会再被扫描，需在同一原子单元内补写过期流水。
    async fn expire_refunded(
        tx: &mut dyn StoreTx,
        account: &mut LoyaltyAccount,
        now: DateTime<Utc>,
    ) -> Result<i64> {
        let history = tx.list_account_transactions(account.id).await?;
        let expired: HashSet<i64> = history
            .iter()
            .filter(|t| t.status == TransactionStatus::Expired)
            .map(|t| t.id)
            .collect();

        let mut points = 0i64;
        for (credit_id, remaining) in fifo_outstanding(&history) {
            if !expired.contains(&credit_id) {
                continue;
            }
            let outstanding = remaining.min(account.available_points);
            if outstanding <= 0 {
                continue;
            }
            let entry = NewEntry::new(TransactionType::Expiration, outstanding, SYSTEM_ACTOR)
                .with_reference(EntryReference::transaction(credit_id))
                .with_reason("积分到期");
            Self::append_entry(tx, account, &entry, -outstanding, now).await?;
            LoyaltyAccountService::apply_balance_delta(tx, account, -outstanding, now).await?;
            points += outstanding;
        }

        if points > 0 {
            metrics::record_points_expired(points);
            info!(
                account_id = account.id,
                points,
                "退回积分的来源入账已过期，随冲正一并过期"
            );
        }
        Ok(points)
    }

    /// 按当前账户余额生成快照并写入流水
    async fn append_entry(
        tx: &mut dyn StoreTx,
        account: &LoyaltyAccount,
        entry: &NewEntry,
        delta: i64,
        now: DateTime<Utc>,
    ) -> Result<PointsTransaction> {
        let balance_before = account.available_points;
        let balance_after = balance_before
            .checked_add(delta)
            .ok_or_else(|| LoyaltyError::Validation("积分余额超出范围".to_string()))?;

        let (reference_type, reference_id) = match &entry.reference {
            Some(r) => (Some(r.reference_type), r.reference_id.clone()),
            None => (None, None),
        };

        let mut txn = PointsTransaction {
            id: 0,
            account_id: account.id,
            transaction_type: entry.kind,
            amount: entry.amount,
            balance_before,
            balance_after,
            reference_type,
            reference_id,
            expiration_date: entry
                .expiration_date
                .filter(|_| entry.kind.is_expirable()),
            status: TransactionStatus::Active,
            reason: entry.reason.clone(),
            created_at: now,
            created_by: entry.actor.clone(),
        };
        txn.id = tx.insert_transaction(&txn).await?;
        Ok(txn)
    }

    /// 单个账户的过期处理，返回 (过期流水数, 过期积分)
    async fn expire_account(&self, account_id: i64, as_of: DateTime<Utc>) -> Result<(u64, i64)> {
        let (entries, points) = self
            .run_unit(async {
                let mut tx = self.store.begin().await?;
                let mut account = tx
                    .lock_account(account_id)
                    .await?
                    .ok_or(LoyaltyError::AccountNotFound(account_id))?;

                let history = tx.list_account_transactions(account_id).await?;
                let remaining: HashMap<i64, i64> = fifo_outstanding(&history).into_iter().collect();
                let now = Utc::now();

                let mut entries = 0u64;
                let mut points = 0i64;
                for credit in history.iter().filter(|t| t.is_due(as_of)) {
                    let outstanding = remaining
                        .get(&credit.id)
                        .copied()
                        .unwrap_or(0)
                        .min(account.available_points);

                    if outstanding > 0 {
                        let entry =
                            NewEntry::new(TransactionType::Expiration, outstanding, SYSTEM_ACTOR)
                                .with_reference(EntryReference::transaction(credit.id))
                                .with_reason("积分到期");
                        Self::append_entry(tx.as_mut(), &account, &entry, -outstanding, now)
                            .await?;
                        LoyaltyAccountService::apply_balance_delta(
                            tx.as_mut(),
                            &mut account,
                            -outstanding,
                            now,
                        )
                        .await?;
                        points += outstanding;
                    }

                    tx.set_transaction_status(credit.id, TransactionStatus::Expired)
                        .await?;
                    entries += 1;
                }

                tx.commit().await?;
                Ok((entries, points))
            })
            .await?;

        if entries > 0 {
            metrics::record_points_expired(points);
            self.audit(
                AuditEvent::new(AuditAction::Expire, SYSTEM_ACTOR)
                    .with_target("loyalty_account", account_id)
                    .with_details(json!({
                        "asOf": as_of,
                        "entries": entries,
                        "points": points,
                    })),
            )
            .await;
            info!(account_id, entries, points, "账户积分已过期");
        }

        Ok((entries, points))
    }

    // ==================== 提交后处理 ====================

    /// 入账提交后的指标、审计与等级通知
    pub(crate) async fn publish_credit(
        &self,
        account: &LoyaltyAccount,
        txn: &PointsTransaction,
        change: Option<TierChange>,
    ) {
        metrics::record_points_earned(txn.transaction_type.as_str(), txn.amount);

        let action = match txn.transaction_type {
            TransactionType::Bonus => AuditAction::Bonus,
            TransactionType::Adjustment => AuditAction::Adjust,
            _ => AuditAction::Earn,
        };
        self.audit(
            AuditEvent::new(action, &txn.created_by)
                .with_target("points_transaction", txn.id)
                .with_details(json!({
                    "accountId": account.id,
                    "amount": txn.amount,
                    "balanceAfter": txn.balance_after,
                    "referenceType": txn.reference_type,
                    "referenceId": txn.reference_id,
                })),
        )
        .await;

        info!(
            account_id = account.id,
            transaction_id = txn.id,
            kind = txn.transaction_type.as_str(),
            amount = txn.amount,
            balance_after = txn.balance_after,
            "积分入账成功"
        );

        if let Some(change) = change {
            info!(
                account_id = account.id,
                from = %change.from,
                to = %change.to,
                "会员等级提升"
            );
            send_async(
                self.notifier.clone(),
                TierUpgradeNotification {
                    account_id: account.id,
                    customer_id: account.customer_id.clone(),
                    previous_tier: change.from,
                    new_tier: change.to,
                    lifetime_earned: account.lifetime_earned,
                    occurred_at: txn.created_at,
                },
            );
        }
    }

    pub(crate) async fn credit(
        &self,
        account_id: i64,
        entry: NewEntry,
        operation: &'static str,
    ) -> Result<PointsTransaction> {
        if entry.amount <= 0 {
            return Err(LoyaltyError::InvalidAmount(entry.amount));
        }

        let start = Instant::now();
        let (_, tiers) = self.load_program().await?;

        let (account, txn, change) = self
            .run_unit(async {
                let mut tx = self.store.begin().await?;
                let mut account = tx
                    .lock_account(account_id)
                    .await?
                    .ok_or(LoyaltyError::AccountNotFound(account_id))?;
                let (txn, change) =
                    Self::credit_in_tx(tx.as_mut(), &mut account, entry, &tiers, Utc::now())
                        .await?;
                tx.commit().await?;
                Ok((account, txn, change))
            })
            .await?;

        metrics::record_ledger_operation(operation, start.elapsed().as_secs_f64());
        self.publish_credit(&account, &txn, change).await;
        Ok(txn)
    }
}

/// FIFO 重放中的一笔入账
struct CreditSlot {
    id: i64,
    remaining: i64,
    /// 冲正时剩余不足，差额改由其他入账承担 (入账下标, 积分)
    covered_by: Vec<(usize, i64)>,
}

/// 从最早的入账开始扣除 `need`，返回实际扣除的 (入账下标, 积分)
fn take_oldest(slots: &mut [CreditSlot], mut need: i64) -> Vec<(usize, i64)> {
    let mut taken = Vec::new();
    for (i, slot) in slots.iter_mut().enumerate() {
        if need == 0 {
            break;
        }
        let take = slot.remaining.min(need);
        if take > 0 {
            slot.remaining -= take;
            need -= take;
            taken.push((i, take));
        }
    }
    taken
}

/// 把积分退回到入账上；该入账已被冲正时，优先退给替它承担差额的入账
fn give_back(slots: &mut [CreditSlot], index: usize, amount: i64) {
    let mut left = amount;
    while left > 0 {
        let Some((to, owed)) = slots[index].covered_by.pop() else {
            break;
        };
        let give = owed.min(left);
        if owed > give {
            slots[index].covered_by.push((to, owed - give));
        }
        give_back(slots, to, give);
        left -= give;
    }
    slots[index].remaining += left;
}

/// 按 FIFO 重放流水，返回每笔入账的剩余积分 (流水 ID, 剩余)，按入账先后排列
///
/// 按流水先后逐条重放，不看当前状态：
///
/// - 兑换从最早的入账开始消耗，并记下消耗了哪些入账
/// - 兑换被冲正时，积分原路退回到当初消耗的入账
/// - 入账被冲正时先扣自身剩余，不足部分从最早的其他入账扣除
/// - 过期流水从其引用的入账中扣除
///
/// 账本一致时，各入账剩余之和等于账户可用积分。
pub(crate) fn fifo_outstanding(history: &[PointsTransaction]) -> Vec<(i64, i64)> {
    let mut slots: Vec<CreditSlot> = Vec::new();
    let mut credit_index: HashMap<i64, usize> = HashMap::new();
    let mut consumed: HashMap<i64, Vec<(usize, i64)>> = HashMap::new();

    for txn in history {
        match txn.transaction_type {
            kind if kind.is_credit() => {
                credit_index.insert(txn.id, slots.len());
                slots.push(CreditSlot {
                    id: txn.id,
                    remaining: txn.amount,
                    covered_by: Vec::new(),
                });
            }
            TransactionType::Redeem => {
                let taken = take_oldest(&mut slots, txn.amount);
                consumed.insert(txn.id, taken);
            }
            TransactionType::Reversal => {
                let Some(target) = txn.referenced_transaction() else {
                    continue;
                };
                if let Some(taken) = consumed.remove(&target) {
                    for (i, amount) in taken {
                        give_back(&mut slots, i, amount);
                    }
                } else if let Some(&i) = credit_index.get(&target) {
                    let own = slots[i].remaining.min(txn.amount);
                    slots[i].remaining -= own;
                    let covered_by = take_oldest(&mut slots, txn.amount - own);
                    slots[i].covered_by = covered_by;
                }
            }
            TransactionType::Expiration => {
                let target = txn
                    .referenced_transaction()
                    .and_then(|id| credit_index.get(&id).copied());
                if let Some(i) = target {
                    slots[i].remaining = (slots[i].remaining - txn.amount).max(0);
                }
            }
            _ => {}
        }
    }

    slots.into_iter().map(|s| (s.id, s.remaining)).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn entry(
        id: i64,
        transaction_type: TransactionType,
        amount: i64,
        status: TransactionStatus,
    ) -> PointsTransaction {
        let base = DateTime::parse_from_rfc3339("2025-01-01T00:00:00Z")
            .unwrap()
            .with_timezone(&Utc);
        PointsTransaction {
            id,
            account_id: 1,
            transaction_type,
            amount,
            balance_before: 0,
            balance_after: 0,
            reference_type: None,
            reference_id: None,
            expiration_date: None,
            status,
            reason: None,
            created_at: base + Duration::minutes(id),
            created_by: "test".to_string(),
        }
    }

    #[test]
    fn test_fifo_consumes_oldest_first() {
        let history = vec![
            entry(1, TransactionType::Earn, 100, TransactionStatus::Active),
            entry(2, TransactionType::Bonus, 50, TransactionStatus::Active),
            entry(3, TransactionType::Redeem, 120, TransactionStatus::Active),
        ];

        assert_eq!(fifo_outstanding(&history), vec![(1, 0), (2, 30)]);
    }

    fn referencing(mut txn: PointsTransaction, target: i64) -> PointsTransaction {
        txn.reference_type = Some(ReferenceType::Transaction);
        txn.reference_id = Some(target.to_string());
        txn
    }

    #[test]
    fn test_fifo_reversed_credit_shortfall_is_returned_on_refund() {
        let history = vec![
            entry(1, TransactionType::Earn, 100, TransactionStatus::Reversed),
            entry(2, TransactionType::Earn, 80, TransactionStatus::Active),
            entry(3, TransactionType::Redeem, 30, TransactionStatus::Reversed),
            // #1 剩余 70，差额 30 由 #2 承担
            referencing(
                entry(4, TransactionType::Reversal, 100, TransactionStatus::Active),
                1,
            ),
            // 退回 #1 的 30 转给替它承担差额的 #2
            referencing(
                entry(5, TransactionType::Reversal, 30, TransactionStatus::Active),
                3,
            ),
            entry(6, TransactionType::Redeem, 20, TransactionStatus::Active),
        ];

        assert_eq!(fifo_outstanding(&history), vec![(1, 0), (2, 60)]);
    }

    #[test]
    fn test_fifo_refund_returns_to_consumed_credit() {
        let history = vec![
            entry(1, TransactionType::Earn, 100, TransactionStatus::Expired),
            entry(2, TransactionType::Earn, 50, TransactionStatus::Active),
            entry(3, TransactionType::Redeem, 100, TransactionStatus::Reversed),
            entry(4, TransactionType::Redeem, 30, TransactionStatus::Active),
            referencing(
                entry(5, TransactionType::Reversal, 100, TransactionStatus::Active),
                3,
            ),
        ];

        // 冲正不改变之后兑换的消耗位置
        assert_eq!(fifo_outstanding(&history), vec![(1, 100), (2, 20)]);
    }

    #[test]
    fn test_fifo_applies_expiration_to_referenced_credit() {
        let mut expiration = entry(3, TransactionType::Expiration, 40, TransactionStatus::Active);
        expiration.reference_type = Some(ReferenceType::Transaction);
        expiration.reference_id = Some("1".to_string());

        let history = vec![
            entry(1, TransactionType::Earn, 100, TransactionStatus::Expired),
            entry(2, TransactionType::Earn, 100, TransactionStatus::Active),
            entry(5, TransactionType::Redeem, 60, TransactionStatus::Active),
            expiration,
            entry(4, TransactionType::Redeem, 30, TransactionStatus::Active),
        ];

        // 兑换 60 先消耗 #1，过期扣除 #1 剩余 40，之后的兑换 30 落到 #2
        assert_eq!(fifo_outstanding(&history), vec![(1, 0), (2, 70)]);
    }

    #[test]
    fn test_fifo_redeem_beyond_credits_is_bounded() {
        let history = vec![
            entry(1, TransactionType::Adjustment, 10, TransactionStatus::Active),
            entry(2, TransactionType::Redeem, 50, TransactionStatus::Active),
            entry(3, TransactionType::Earn, 25, TransactionStatus::Active),
        ];

        assert_eq!(fifo_outstanding(&history), vec![(1, 0), (3, 25)]);
    }
}
