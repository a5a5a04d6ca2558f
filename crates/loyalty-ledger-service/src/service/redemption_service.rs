//! 奖励兑换服务
//!
//! 处理积分兑换奖励的核心业务逻辑，包括：
//! - 兑换资格校验（账户、奖励、等级、最低积分、库存、余额）
//! - 事务性扣减积分、扣减库存与创建兑换记录
//! - 兑换单状态流转，取消时冲正积分并归还库存
//!
//! ## 兑换流程
//!
//! 1. 事务外预校验（失败不产生任何写入）
//! 2. 事务内加锁后按同样顺序重新校验
//! 3. 扣减积分 -> 扣减库存 -> 创建兑换记录 -> 提交

use std::sync::Arc;
use std::time::Instant;

use chrono::Utc;
use serde_json::json;
use tracing::{info, instrument, warn};

use loyalty_shared::observability::metrics;

use crate::audit::{AuditAction, AuditEvent};
use crate::error::{LoyaltyError, Result};
use crate::models::{
    LoyaltyAccount, RedemptionRecord, RedemptionStatus, RewardItem, TransactionType,
    generate_redemption_code,
};

use super::dto::{EntryReference, NewEntry, RedeemRequest};
use super::ledger::PointsLedger;
use super::reward_catalog::RewardCatalog;

/// 兑换服务
pub struct RedemptionService {
    ledger: Arc<PointsLedger>,
}

impl RedemptionService {
    pub fn new(ledger: Arc<PointsLedger>) -> Self {
        Self { ledger }
    }

    /// 兑换奖励
    ///
    /// 校验全部通过后，在一个原子单元内完成：
    /// 1. 写入 redeem 流水并扣减余额
    /// 2. 扣减库存（不限量时跳过）并累加兑换件数
    /// 3. 创建 pending 状态的兑换记录
    ///
    /// 任一步失败整个单元回滚
    #[instrument(
        skip(self, request),
        fields(
            account_id = request.account_id,
            reward_id = request.reward_id,
            quantity = request.quantity
        )
    )]
    pub async fn redeem(&self, request: RedeemRequest) -> Result<RedemptionRecord> {
        let start = Instant::now();
        let result = self.execute_redeem(&request).await;
        let elapsed = start.elapsed().as_secs_f64();

        match &result {
            Ok(record) => {
                metrics::record_redemption("success", elapsed);
                metrics::record_points_redeemed(record.points_cost);
                info!(
                    account_id = record.account_id,
                    reward_id = record.reward_id,
                    redemption_id = record.id,
                    redemption_code = %record.redemption_code,
                    points_cost = record.points_cost,
                    "奖励兑换成功"
                );
            }
            Err(e) if e.is_business_error() => {
                metrics::record_redemption("rejected", elapsed);
                info!(error_code = e.error_code(), error = %e, "兑换被拒绝");
            }
            Err(e) => {
                metrics::record_redemption("failed", elapsed);
                warn!(error = %e, "兑换执行失败");
            }
        }

        result
    }

    async fn execute_redeem(&self, request: &RedeemRequest) -> Result<RedemptionRecord> {
        if request.quantity <= 0 {
            return Err(LoyaltyError::Validation(format!(
                "兑换数量必须为正数: {}",
                request.quantity
            )));
        }

        let (program, _) = self.ledger.load_program().await?;
        let min_points = program.min_redemption_points;

        // 预校验：此时尚未写入，调用方可随时放弃
        let account = self
            .ledger
            .store()
            .get_account(request.account_id)
            .await?
            .ok_or(LoyaltyError::AccountNotFound(request.account_id))?;
        let reward = self.ledger.store().get_reward(request.reward_id).await?;
        check_redeemable(
            &account,
            reward.as_ref(),
            request.reward_id,
            request.quantity,
            min_points,
        )?;

        let (record, txn_id) = self
            .ledger
            .run_unit(async {
                let mut tx = self.ledger.store().begin().await?;
                let mut account = tx
                    .lock_account(request.account_id)
                    .await?
                    .ok_or(LoyaltyError::AccountNotFound(request.account_id))?;
                let reward = tx.lock_reward(request.reward_id).await?;
                let cost = check_redeemable(
                    &account,
                    reward.as_ref(),
                    request.reward_id,
                    request.quantity,
                    min_points,
                )?;
                let mut reward = reward.ok_or(LoyaltyError::RewardUnavailable(request.reward_id))?;

                let now = Utc::now();
                let code = generate_redemption_code(now);

                let entry = NewEntry::new(TransactionType::Redeem, cost, &request.actor)
                    .with_reference(EntryReference::redemption(&code))
                    .with_reason(format!("兑换 {} x{}", reward.name, request.quantity));
                let txn = PointsLedger::debit_in_tx(tx.as_mut(), &mut account, entry, now).await?;

                RewardCatalog::reserve_stock(&mut reward, request.quantity)?;
                tx.update_reward_stock(reward.id, reward.stock_quantity, reward.total_redemptions)
                    .await?;

                let mut record = RedemptionRecord {
                    id: 0,
                    redemption_code: code,
                    account_id: account.id,
                    reward_id: reward.id,
                    transaction_id: txn.id,
                    points_cost: cost,
                    quantity: request.quantity,
                    status: RedemptionStatus::Pending,
                    fulfillment_method: request.fulfillment_method,
                    approval_date: None,
                    approved_by: None,
                    fulfillment_date: None,
                    fulfilled_by: None,
                    notes: request.notes.clone(),
                    created_at: now,
                    created_by: request.actor.clone(),
                    updated_at: now,
                };
                record.id = tx.insert_redemption(&record).await?;

                tx.commit().await?;
                Ok((record, txn.id))
            })
            .await?;

        self.ledger
            .audit(
                AuditEvent::new(AuditAction::Redeem, &request.actor)
                    .with_target("redemption", record.id)
                    .with_details(json!({
                        "redemptionCode": record.redemption_code,
                        "accountId": record.account_id,
                        "rewardId": record.reward_id,
                        "quantity": record.quantity,
                        "pointsCost": record.points_cost,
                        "transactionId": txn_id,
                    })),
            )
            .await;

        Ok(record)
    }

    /// 更新兑换单状态
    ///
    /// - pending -> approved: 记录审批人与时间
    /// - approved -> completed: 记录履约人与时间，不涉及积分
    /// - pending/approved -> cancelled: 冲正扣减流水并归还库存，与状态变更处于同一原子单元
    #[instrument(skip(self, notes, actor))]
    pub async fn update_status(
        &self,
        redemption_id: i64,
        new_status: RedemptionStatus,
        notes: Option<String>,
        actor: &str,
    ) -> Result<RedemptionRecord> {
        let start = Instant::now();

        let (record, previous) = self
            .ledger
            .run_unit(async {
                let mut tx = self.ledger.store().begin().await?;
                let mut record = tx
                    .lock_redemption(redemption_id)
                    .await?
                    .ok_or_else(|| LoyaltyError::RedemptionNotFound(redemption_id.to_string()))?;

                let previous = record.status;
                if !previous.can_transition_to(new_status) {
                    return Err(LoyaltyError::InvalidStatusTransition {
                        from: previous,
                        to: new_status,
                    });
                }

                let now = Utc::now();
                match new_status {
                    RedemptionStatus::Approved => {
                        record.approval_date = Some(now);
                        record.approved_by = Some(actor.to_string());
                    }
                    RedemptionStatus::Completed => {
                        record.fulfillment_date = Some(now);
                        record.fulfilled_by = Some(actor.to_string());
                    }
                    RedemptionStatus::Cancelled => {
                        let mut account = tx
                            .lock_account(record.account_id)
                            .await?
                            .ok_or(LoyaltyError::AccountNotFound(record.account_id))?;
                        let reason = format!("取消兑换 {}", record.redemption_code);
                        PointsLedger::reverse_in_tx(
                            tx.as_mut(),
                            &mut account,
                            record.transaction_id,
                            &reason,
                            actor,
                            now,
                        )
                        .await?;

                        let mut reward = tx
                            .lock_reward(record.reward_id)
                            .await?
                            .ok_or(LoyaltyError::RewardNotFound(record.reward_id))?;
                        RewardCatalog::restore_stock(&mut reward, record.quantity);
                        tx.update_reward_stock(
                            reward.id,
                            reward.stock_quantity,
                            reward.total_redemptions,
                        )
                        .await?;
                    }
                    RedemptionStatus::Pending => {}
                }

                if let Some(notes) = notes {
                    record.notes = Some(notes);
                }
                record.status = new_status;
                record.updated_at = now;
                tx.update_redemption(&record).await?;

                tx.commit().await?;
                Ok((record, previous))
            })
            .await?;

        metrics::record_ledger_operation("redemption_status", start.elapsed().as_secs_f64());
        if new_status == RedemptionStatus::Cancelled {
            metrics::record_redemption("cancelled", start.elapsed().as_secs_f64());
        }
        self.ledger
            .audit(
                AuditEvent::new(AuditAction::StatusChange, actor)
                    .with_target("redemption", record.id)
                    .with_details(json!({
                        "redemptionCode": record.redemption_code,
                        "from": previous.to_string(),
                        "to": new_status.to_string(),
                    })),
            )
            .await;

        info!(
            redemption_id,
            redemption_code = %record.redemption_code,
            from = %previous,
            to = %new_status,
            "兑换状态已更新"
        );
        Ok(record)
    }

    pub async fn get_redemption(&self, redemption_id: i64) -> Result<RedemptionRecord> {
        self.ledger
            .store()
            .get_redemption(redemption_id)
            .await?
            .ok_or_else(|| LoyaltyError::RedemptionNotFound(redemption_id.to_string()))
    }

    pub async fn get_by_code(&self, code: &str) -> Result<RedemptionRecord> {
        self.ledger
            .store()
            .get_redemption_by_code(code)
            .await?
            .ok_or_else(|| LoyaltyError::RedemptionNotFound(code.to_string()))
    }

    /// 账户兑换记录，按创建时间倒序
    pub async fn list_redemptions(
        &self,
        account_id: i64,
        limit: i64,
    ) -> Result<Vec<RedemptionRecord>> {
        if limit <= 0 {
            return Err(LoyaltyError::Validation(format!(
                "查询条数必须为正数: {}",
                limit
            )));
        }
        self.ledger
            .store()
            .list_redemptions(account_id, limit)
            .await
    }
}

/// 兑换资格校验，按固定顺序返回第一个失败，全部通过时返回总积分
pub(crate) fn check_redeemable(
    account: &LoyaltyAccount,
    reward: Option<&RewardItem>,
    reward_id: i64,
    quantity: i32,
    program_min_points: i64,
) -> Result<i64> {
    if quantity <= 0 {
        return Err(LoyaltyError::Validation(format!(
            "兑换数量必须为正数: {}",
            quantity
        )));
    }
    if !account.is_active {
        return Err(LoyaltyError::AccountInactive(account.id));
    }

    let reward = reward
        .filter(|r| r.is_active)
        .ok_or(LoyaltyError::RewardUnavailable(reward_id))?;

    if !reward.is_eligible(account.tier) {
        return Err(LoyaltyError::TierIneligible {
            tier: account.tier,
            reward_id,
        });
    }

    let required = reward.min_points_balance.max(program_min_points);
    if account.available_points < required {
        return Err(LoyaltyError::MinimumBalanceNotMet {
            required,
            available: account.available_points,
        });
    }

    if !reward.has_stock(quantity) {
        return Err(LoyaltyError::InsufficientStock {
            reward_id,
            requested: quantity,
            available: reward.stock_quantity,
        });
    }

    let cost = reward
        .total_cost(quantity)
        .ok_or_else(|| LoyaltyError::Validation(format!("兑换积分超出范围: x{}", quantity)))?;
    if !account.can_spend(cost) {
        return Err(LoyaltyError::InsufficientBalance {
            available: account.available_points,
            required: cost,
        });
    }

    Ok(cost)
}
