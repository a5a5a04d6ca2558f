//! 会员账户服务
//!
//! 负责开户、账户查询与停用。余额只能经由积分账本变更，
//! `apply_balance_delta` 仅在账本的原子单元内部调用。

use std::sync::Arc;
use std::time::Instant;

use chrono::{DateTime, Utc};
use serde_json::json;
use tracing::{info, instrument};

use loyalty_shared::observability::metrics;

use crate::audit::{AuditAction, AuditEvent};
use crate::error::{LoyaltyError, Result};
use crate::models::{LoyaltyAccount, ReferenceType, TransactionType};
use crate::program::BonusKind;
use crate::repository::StoreTx;

use super::dto::{EntryReference, NewEntry};
use super::ledger::PointsLedger;

/// 会员账户服务
pub struct LoyaltyAccountService {
    ledger: Arc<PointsLedger>,
}

impl LoyaltyAccountService {
    pub fn new(ledger: Arc<PointsLedger>) -> Self {
        Self { ledger }
    }

    /// 开户
    ///
    /// `signup_bonus` 为空时使用积分计划配置的开户奖励。
    /// 账户创建与开户奖励入账在同一原子单元内完成。
    #[instrument(skip(self, actor), fields(customer_id = %customer_id))]
    pub async fn enroll(
        &self,
        customer_id: &str,
        signup_bonus: Option<i64>,
        actor: &str,
    ) -> Result<LoyaltyAccount> {
        let customer_id = customer_id.trim();
        if customer_id.is_empty() {
            return Err(LoyaltyError::Validation("客户 ID 不能为空".to_string()));
        }

        let start = Instant::now();
        let (program, tiers) = self.ledger.load_program().await?;
        let bonus = signup_bonus.unwrap_or_else(|| program.bonus_amount(BonusKind::Signup));
        if bonus < 0 {
            return Err(LoyaltyError::InvalidAmount(bonus));
        }

        let (account, bonus_txn, change) = self
            .ledger
            .run_unit(async {
                let mut tx = self.ledger.store().begin().await?;
                if tx.lock_active_account_by_customer(customer_id).await?.is_some() {
                    return Err(LoyaltyError::AlreadyEnrolled(customer_id.to_string()));
                }

                let now = Utc::now();
                let mut account = LoyaltyAccount::new(customer_id, now);
                account.id = tx.insert_account(&account).await?;

                let mut bonus_txn = None;
                let mut change = None;
                if bonus > 0 {
                    let entry = NewEntry::new(TransactionType::Bonus, bonus, actor)
                        .with_reference(EntryReference::of_type(ReferenceType::Signup))
                        .with_expiration(program.expiration_for(now))
                        .with_reason("开户奖励");
                    let (txn, tier_change) =
                        PointsLedger::credit_in_tx(tx.as_mut(), &mut account, entry, &tiers, now)
                            .await?;
                    bonus_txn = Some(txn);
                    change = tier_change;
                }

                tx.commit().await?;
                Ok((account, bonus_txn, change))
            })
            .await?;

        metrics::record_ledger_operation("enroll", start.elapsed().as_secs_f64());
        self.ledger
            .audit(
                AuditEvent::new(AuditAction::Enroll, actor)
                    .with_target("loyalty_account", account.id)
                    .with_details(json!({
                        "customerId": account.customer_id,
                        "signupBonus": bonus,
                    })),
            )
            .await;
        if let Some(txn) = &bonus_txn {
            self.ledger.publish_credit(&account, txn, change).await;
        }

        info!(
            account_id = account.id,
            customer_id = %account.customer_id,
            signup_bonus = bonus,
            "会员开户成功"
        );
        Ok(account)
    }

    /// 按客户查询账户
    ///
    /// 客户只有停用账户时返回最近停用的那个
    pub async fn get_account(&self, customer_id: &str) -> Result<LoyaltyAccount> {
        self.ledger
            .store()
            .find_account_by_customer(customer_id)
            .await?
            .ok_or_else(|| LoyaltyError::NotEnrolled(customer_id.to_string()))
    }

    pub async fn get_account_by_id(&self, account_id: i64) -> Result<LoyaltyAccount> {
        self.ledger
            .store()
            .get_account(account_id)
            .await?
            .ok_or(LoyaltyError::AccountNotFound(account_id))
    }

    /// 停用账户
    ///
    /// 余额原样保留；停用后不能再入账或兑换，已有流水仍可冲正和过期
    #[instrument(skip(self, actor))]
    pub async fn deactivate(&self, account_id: i64, actor: &str) -> Result<LoyaltyAccount> {
        let account = self
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

                account.is_active = false;
                account.updated_at = Utc::now();
                tx.update_account(&account).await?;
                tx.commit().await?;
                Ok(account)
            })
            .await?;

        self.ledger
            .audit(
                AuditEvent::new(AuditAction::Deactivate, actor)
                    .with_target("loyalty_account", account_id)
                    .with_details(json!({ "availablePoints": account.available_points })),
            )
            .await;

        info!(
            account_id,
            available_points = account.available_points,
            "会员账户已停用"
        );
        Ok(account)
    }

    /// 在原子单元内变更可用余额并写回账户
    ///
    /// 结果为负时拒绝；同时刷新最近活动时间
    pub(crate) async fn apply_balance_delta(
        tx: &mut dyn StoreTx,
        account: &mut LoyaltyAccount,
        delta: i64,
        now: DateTime<Utc>,
    ) -> Result<()> {
        let balance = account
            .available_points
            .checked_add(delta)
            .filter(|b| *b >= 0)
            .ok_or(LoyaltyError::InsufficientBalance {
                available: account.available_points,
                required: delta.saturating_neg(),
            })?;

        account.available_points = balance;
        account.last_activity_at = now;
        account.updated_at = now;
        tx.update_account(account).await
    }
}
