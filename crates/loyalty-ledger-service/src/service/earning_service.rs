//! 积分发放服务
//!
//! 消费完成后根据赚取规则、计划基础积分率与会员等级倍率计算积分并入账；
//! 另负责生日、周年等计划奖励的发放。

use std::sync::Arc;
use std::time::Instant;

use chrono::Utc;
use rust_decimal::Decimal;
use tracing::{info, instrument};

use loyalty_shared::observability::metrics;

use crate::engine::{EarningRuleEngine, multiply_floor};
use crate::error::{LoyaltyError, Result};
use crate::models::{PointsTransaction, PurchaseContext, ReferenceType, TransactionType};
use crate::program::BonusKind;

use super::dto::{EarningOutcome, EntryReference, NewEntry};
use super::ledger::PointsLedger;

/// 积分发放服务
pub struct EarningService {
    ledger: Arc<PointsLedger>,
}

impl EarningService {
    pub fn new(ledger: Arc<PointsLedger>) -> Self {
        Self { ledger }
    }

    /// 按消费发放积分
    ///
    /// 积分 = (规则积分 + floor(金额 × 基础积分率)) × 等级倍率，再按计划单笔上限截断。
    /// 规则使用次数在账户锁内读取，入账与使用次数累加处于同一原子单元。
    #[instrument(skip(self, purchase, actor), fields(sale_id = %purchase.sale_id))]
    pub async fn award_purchase(
        &self,
        account_id: i64,
        purchase: PurchaseContext,
        actor: &str,
    ) -> Result<EarningOutcome> {
        if purchase.amount <= Decimal::ZERO {
            return Err(LoyaltyError::Validation(format!(
                "消费金额必须为正数: {}",
                purchase.amount
            )));
        }

        let start = Instant::now();
        let (program, tiers) = self.ledger.load_program().await?;
        let rules = self.ledger.store().list_active_rules().await?;
        let engine = EarningRuleEngine::new(program.max_points_per_transaction);

        let (account, outcome, change) = self
            .ledger
            .run_unit(async {
                let mut tx = self.ledger.store().begin().await?;
                let mut account = tx
                    .lock_account(account_id)
                    .await?
                    .ok_or(LoyaltyError::AccountNotFound(account_id))?;
                if !account.is_active {
                    return Err(LoyaltyError::AccountInactive(account_id));
                }

                let usage = tx.rule_usage(account_id).await?;
                let evaluation = engine.evaluate_detailed(&purchase, &rules, account.tier, &usage);

                let base_points = multiply_floor(purchase.amount, program.points_per_currency_unit);
                let tier_multiplier = program.tier_benefit(account.tier).points_multiplier;
                let raw = multiply_floor(
                    Decimal::from(evaluation.total_points.saturating_add(base_points)),
                    tier_multiplier,
                );
                let points_awarded = match program.max_points_per_transaction {
                    Some(cap) => raw.min(cap),
                    None => raw,
                };

                let mut transaction = None;
                let mut change = None;
                if points_awarded > 0 {
                    let entry = NewEntry::new(TransactionType::Earn, points_awarded, actor)
                        .with_reference(EntryReference::sale(&purchase.sale_id))
                        .with_expiration(program.expiration_for(purchase.purchased_at_utc()));
                    let (txn, tier_change) = PointsLedger::credit_in_tx(
                        tx.as_mut(),
                        &mut account,
                        entry,
                        &tiers,
                        Utc::now(),
                    )
                    .await?;

                    for rule_id in evaluation.contributing_rule_ids() {
                        tx.increment_rule_usage(account_id, rule_id).await?;
                    }
                    tx.commit().await?;

                    transaction = Some(txn);
                    change = tier_change;
                }

                let outcome = EarningOutcome {
                    account_id,
                    evaluation,
                    base_points,
                    tier_multiplier,
                    points_awarded,
                    transaction,
                };
                Ok((account, outcome, change))
            })
            .await?;

        metrics::record_ledger_operation("award_purchase", start.elapsed().as_secs_f64());
        match &outcome.transaction {
            Some(txn) => self.ledger.publish_credit(&account, txn, change).await,
            None => info!(account_id, "本次消费未产生积分"),
        }
        Ok(outcome)
    }

    /// 发放计划奖励积分
    ///
    /// 计划中该奖励配置为 0 时不写流水，返回 None
    #[instrument(skip(self, actor))]
    pub async fn award_bonus(
        &self,
        account_id: i64,
        kind: BonusKind,
        actor: &str,
    ) -> Result<Option<PointsTransaction>> {
        let (program, _) = self.ledger.load_program().await?;
        let amount = program.bonus_amount(kind);
        if amount == 0 {
            info!(account_id, ?kind, "计划未配置该奖励积分，跳过");
            return Ok(None);
        }

        let (reference_type, reason) = match kind {
            BonusKind::Signup => (ReferenceType::Signup, "开户奖励"),
            BonusKind::Birthday => (ReferenceType::Birthday, "生日奖励"),
            BonusKind::Anniversary => (ReferenceType::Anniversary, "入会周年奖励"),
        };
        let entry = NewEntry::new(TransactionType::Bonus, amount, actor)
            .with_reference(EntryReference::of_type(reference_type))
            .with_expiration(program.expiration_for(Utc::now()))
            .with_reason(reason);

        self.ledger.credit(account_id, entry, "bonus").await.map(Some)
    }
}
