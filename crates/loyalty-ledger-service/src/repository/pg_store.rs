//! PostgreSQL 存储
//!
//! 每个原子单元对应一个 sqlx 事务；需要修改的行通过 `SELECT ... FOR UPDATE` 加锁，
//! 锁等待与语句执行时间通过 `SET LOCAL` 限定，超时映射为 `TransactionTimeout`。

use std::collections::{BTreeSet, HashMap};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, NaiveTime, Utc, Weekday};
use rust_decimal::Decimal;
use sqlx::{PgPool, Postgres, Row, Transaction};

use super::traits::{LoyaltyStore, StoreTx};
use crate::error::{LoyaltyError, Result};
use crate::models::{
    EarningRule, LoyaltyAccount, PointsTransaction, RedemptionRecord, RewardItem, RuleType, Tier,
    TimeWindow, TransactionStatus,
};

const ACCOUNT_COLUMNS: &str = r#"
    id, customer_id, tier, available_points, pending_points, lifetime_earned,
    lifetime_redeemed, enrollment_date, last_activity_at, is_active, created_at, updated_at
"#;

const TRANSACTION_COLUMNS: &str = r#"
    id, account_id, transaction_type, amount, balance_before, balance_after,
    reference_type, reference_id, expiration_date, status, reason, created_at, created_by
"#;

const REWARD_COLUMNS: &str = r#"
    id, name, description, points_cost, stock_quantity, eligible_tiers,
    min_points_balance, is_active, total_redemptions, created_at, updated_at
"#;

const REDEMPTION_COLUMNS: &str = r#"
    id, redemption_code, account_id, reward_id, transaction_id, points_cost, quantity,
    status, fulfillment_method, approval_date, approved_by, fulfillment_date, fulfilled_by,
    notes, created_at, created_by, updated_at
"#;

const RULE_COLUMNS: &str = r#"
    id, name, rule_type, points_multiplier, fixed_points, minimum_purchase,
    maximum_points_per_transaction, applicable_categories, applicable_products,
    excluded_products, applicable_tiers, valid_days, valid_from, valid_until,
    window_start, window_end, priority, require_coupon_code, max_uses_per_customer,
    exclusive, is_active
"#;

/// 唯一约束冲突
const PG_UNIQUE_VIOLATION: &str = "23505";

/// 奖励数据库行
#[derive(sqlx::FromRow)]
struct RewardRow {
    id: i64,
    name: String,
    description: Option<String>,
    points_cost: i64,
    stock_quantity: i32,
    eligible_tiers: Vec<String>,
    min_points_balance: i64,
    is_active: bool,
    total_redemptions: i64,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl TryFrom<RewardRow> for RewardItem {
    type Error = LoyaltyError;

    fn try_from(row: RewardRow) -> Result<Self> {
        Ok(Self {
            id: row.id,
            name: row.name,
            description: row.description,
            points_cost: row.points_cost,
            stock_quantity: row.stock_quantity,
            eligible_tiers: parse_tiers(&row.eligible_tiers)?,
            min_points_balance: row.min_points_balance,
            is_active: row.is_active,
            total_redemptions: row.total_redemptions,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

/// 赚取规则数据库行
#[derive(sqlx::FromRow)]
struct EarningRuleRow {
    id: i64,
    name: String,
    rule_type: RuleType,
    points_multiplier: f64,
    fixed_points: i64,
    minimum_purchase: Decimal,
    maximum_points_per_transaction: Option<i64>,
    applicable_categories: Vec<String>,
    applicable_products: Vec<String>,
    excluded_products: Vec<String>,
    applicable_tiers: Vec<String>,
    /// 0 = 周一 ... 6 = 周日
    valid_days: Vec<i16>,
    valid_from: Option<DateTime<Utc>>,
    valid_until: Option<DateTime<Utc>>,
    window_start: Option<NaiveTime>,
    window_end: Option<NaiveTime>,
    priority: i32,
    require_coupon_code: Option<String>,
    max_uses_per_customer: Option<i64>,
    exclusive: bool,
    is_active: bool,
}

impl TryFrom<EarningRuleRow> for EarningRule {
    type Error = LoyaltyError;

    fn try_from(row: EarningRuleRow) -> Result<Self> {
        let valid_days = row
            .valid_days
            .iter()
            .map(|d| {
                u8::try_from(*d)
                    .ok()
                    .and_then(|d| Weekday::try_from(d).ok())
                    .ok_or_else(|| {
                        LoyaltyError::Internal(format!("规则 {} 的星期配置非法: {}", row.id, d))
                    })
            })
            .collect::<Result<Vec<_>>>()?;

        let valid_time_window = match (row.window_start, row.window_end) {
            (Some(start), Some(end)) => Some(TimeWindow::new(start, end)),
            _ => None,
        };

        Ok(Self {
            id: row.id,
            name: row.name,
            rule_type: row.rule_type,
            points_multiplier: row.points_multiplier,
            fixed_points: row.fixed_points,
            minimum_purchase: row.minimum_purchase,
            maximum_points_per_transaction: row.maximum_points_per_transaction,
            applicable_categories: row.applicable_categories.into_iter().collect(),
            applicable_products: row.applicable_products.into_iter().collect(),
            excluded_products: row.excluded_products.into_iter().collect(),
            applicable_tiers: parse_tiers(&row.applicable_tiers)?,
            valid_days,
            valid_from: row.valid_from,
            valid_until: row.valid_until,
            valid_time_window,
            priority: row.priority,
            require_coupon_code: row.require_coupon_code,
            max_uses_per_customer: row.max_uses_per_customer,
            exclusive: row.exclusive,
            is_active: row.is_active,
        })
    }
}

fn parse_tiers(values: &[String]) -> Result<BTreeSet<Tier>> {
    values.iter().map(|v| v.parse::<Tier>()).collect()
}

fn is_unique_violation(err: &sqlx::Error) -> bool {
    matches!(err, sqlx::Error::Database(db) if db.code().as_deref() == Some(PG_UNIQUE_VIOLATION))
}

/// PostgreSQL 积分账本存储
#[derive(Clone)]
pub struct PgLoyaltyStore {
    pool: PgPool,
    /// 单元内锁等待与语句执行上限
    lock_timeout: Duration,
}

impl PgLoyaltyStore {
    pub fn new(pool: PgPool, lock_timeout: Duration) -> Self {
        Self { pool, lock_timeout }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

#[async_trait]
impl LoyaltyStore for PgLoyaltyStore {
    async fn begin(&self) -> Result<Box<dyn StoreTx>> {
        let mut tx = self.pool.begin().await?;

        // SET LOCAL 不支持参数绑定，数值来自配置
        let millis = self.lock_timeout.as_millis().max(1);
        sqlx::query(&format!("SET LOCAL lock_timeout = {}", millis))
            .execute(&mut *tx)
            .await?;
        sqlx::query(&format!("SET LOCAL statement_timeout = {}", millis))
            .execute(&mut *tx)
            .await?;

        Ok(Box::new(PgStoreTx { tx }))
    }

    async fn get_account(&self, id: i64) -> Result<Option<LoyaltyAccount>> {
        let account = sqlx::query_as::<_, LoyaltyAccount>(&format!(
            "SELECT {} FROM loyalty_accounts WHERE id = $1",
            ACCOUNT_COLUMNS
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(account)
    }

    async fn find_account_by_customer(
        &self,
        customer_id: &str,
    ) -> Result<Option<LoyaltyAccount>> {
        let account = sqlx::query_as::<_, LoyaltyAccount>(&format!(
            r#"
            SELECT {} FROM loyalty_accounts
            WHERE customer_id = $1
            ORDER BY is_active DESC, id DESC
            LIMIT 1
            "#,
            ACCOUNT_COLUMNS
        ))
        .bind(customer_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(account)
    }

    async fn get_transaction(&self, id: i64) -> Result<Option<PointsTransaction>> {
        let txn = sqlx::query_as::<_, PointsTransaction>(&format!(
            "SELECT {} FROM points_transactions WHERE id = $1",
            TRANSACTION_COLUMNS
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(txn)
    }

    async fn list_transactions(
        &self,
        account_id: i64,
        limit: i64,
    ) -> Result<Vec<PointsTransaction>> {
        let txns = sqlx::query_as::<_, PointsTransaction>(&format!(
            r#"
            SELECT {} FROM points_transactions
            WHERE account_id = $1
            ORDER BY created_at DESC, id DESC
            LIMIT $2
            "#,
            TRANSACTION_COLUMNS
        ))
        .bind(account_id)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        Ok(txns)
    }

    async fn list_all_transactions(&self, account_id: i64) -> Result<Vec<PointsTransaction>> {
        let txns = sqlx::query_as::<_, PointsTransaction>(&format!(
            r#"
            SELECT {} FROM points_transactions
            WHERE account_id = $1
            ORDER BY created_at ASC, id ASC
            "#,
            TRANSACTION_COLUMNS
        ))
        .bind(account_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(txns)
    }

    async fn list_accounts_with_due_credits(
        &self,
        as_of: DateTime<Utc>,
        after_account_id: i64,
        limit: i64,
    ) -> Result<Vec<i64>> {
        let rows = sqlx::query(
            r#"
            SELECT DISTINCT account_id
            FROM points_transactions
            WHERE status = 'active'
              AND transaction_type IN ('earn', 'bonus')
              AND expiration_date IS NOT NULL
              AND expiration_date <= $1
              AND account_id > $2
            ORDER BY account_id
            LIMIT $3
            "#,
        )
        .bind(as_of)
        .bind(after_account_id)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.iter().map(|r| r.get("account_id")).collect())
    }

    async fn list_active_rules(&self) -> Result<Vec<EarningRule>> {
        let rows = sqlx::query_as::<_, EarningRuleRow>(&format!(
            r#"
            SELECT {} FROM earning_rules
            WHERE is_active = true
            ORDER BY priority ASC, id ASC
            "#,
            RULE_COLUMNS
        ))
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(EarningRule::try_from).collect()
    }

    async fn get_reward(&self, id: i64) -> Result<Option<RewardItem>> {
        let row = sqlx::query_as::<_, RewardRow>(&format!(
            "SELECT {} FROM reward_items WHERE id = $1",
            REWARD_COLUMNS
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        row.map(RewardItem::try_from).transpose()
    }

    async fn list_rewards(&self, active_only: bool) -> Result<Vec<RewardItem>> {
        let rows = sqlx::query_as::<_, RewardRow>(&format!(
            r#"
            SELECT {} FROM reward_items
            WHERE ($1 = false OR is_active = true)
            ORDER BY points_cost ASC, id ASC
            "#,
            REWARD_COLUMNS
        ))
        .bind(active_only)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(RewardItem::try_from).collect()
    }

    async fn get_redemption(&self, id: i64) -> Result<Option<RedemptionRecord>> {
        let record = sqlx::query_as::<_, RedemptionRecord>(&format!(
            "SELECT {} FROM redemption_records WHERE id = $1",
            REDEMPTION_COLUMNS
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(record)
    }

    async fn get_redemption_by_code(&self, code: &str) -> Result<Option<RedemptionRecord>> {
        let record = sqlx::query_as::<_, RedemptionRecord>(&format!(
            "SELECT {} FROM redemption_records WHERE redemption_code = $1",
            REDEMPTION_COLUMNS
        ))
        .bind(code)
        .fetch_optional(&self.pool)
        .await?;

        Ok(record)
    }

    async fn list_redemptions(
        &self,
        account_id: i64,
        limit: i64,
    ) -> Result<Vec<RedemptionRecord>> {
        let records = sqlx::query_as::<_, RedemptionRecord>(&format!(
            r#"
            SELECT {} FROM redemption_records
            WHERE account_id = $1
            ORDER BY created_at DESC, id DESC
            LIMIT $2
            "#,
            REDEMPTION_COLUMNS
        ))
        .bind(account_id)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        Ok(records)
    }
}

/// PostgreSQL 原子单元
struct PgStoreTx {
    tx: Transaction<'static, Postgres>,
}

#[async_trait]
impl StoreTx for PgStoreTx {
    async fn lock_account(&mut self, id: i64) -> Result<Option<LoyaltyAccount>> {
        let account = sqlx::query_as::<_, LoyaltyAccount>(&format!(
            "SELECT {} FROM loyalty_accounts WHERE id = $1 FOR UPDATE",
            ACCOUNT_COLUMNS
        ))
        .bind(id)
        .fetch_optional(&mut *self.tx)
        .await?;

        Ok(account)
    }

    async fn lock_active_account_by_customer(
        &mut self,
        customer_id: &str,
    ) -> Result<Option<LoyaltyAccount>> {
        let account = sqlx::query_as::<_, LoyaltyAccount>(&format!(
            r#"
            SELECT {} FROM loyalty_accounts
            WHERE customer_id = $1 AND is_active = true
            FOR UPDATE
            "#,
            ACCOUNT_COLUMNS
        ))
        .bind(customer_id)
        .fetch_optional(&mut *self.tx)
        .await?;

        Ok(account)
    }

    async fn insert_account(&mut self, account: &LoyaltyAccount) -> Result<i64> {
        let result = sqlx::query(
            r#"
            INSERT INTO loyalty_accounts
                (customer_id, tier, available_points, pending_points, lifetime_earned,
                 lifetime_redeemed, enrollment_date, last_activity_at, is_active,
                 created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
            RETURNING id
            "#,
        )
        .bind(&account.customer_id)
        .bind(account.tier)
        .bind(account.available_points)
        .bind(account.pending_points)
        .bind(account.lifetime_earned)
        .bind(account.lifetime_redeemed)
        .bind(account.enrollment_date)
        .bind(account.last_activity_at)
        .bind(account.is_active)
        .bind(account.created_at)
        .bind(account.updated_at)
        .fetch_one(&mut *self.tx)
        .await;

        match result {
            Ok(row) => Ok(row.get("id")),
            // 并发开户由部分唯一索引兜底
            Err(e) if is_unique_violation(&e) => {
                Err(LoyaltyError::AlreadyEnrolled(account.customer_id.clone()))
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn update_account(&mut self, account: &LoyaltyAccount) -> Result<()> {
        let result = sqlx::query(
            r#"
            UPDATE loyalty_accounts
            SET tier = $2, available_points = $3, pending_points = $4, lifetime_earned = $5,
                lifetime_redeemed = $6, last_activity_at = $7, is_active = $8, updated_at = $9
            WHERE id = $1
            "#,
        )
        .bind(account.id)
        .bind(account.tier)
        .bind(account.available_points)
        .bind(account.pending_points)
        .bind(account.lifetime_earned)
        .bind(account.lifetime_redeemed)
        .bind(account.last_activity_at)
        .bind(account.is_active)
        .bind(account.updated_at)
        .execute(&mut *self.tx)
        .await?;

        if result.rows_affected() == 0 {
            return Err(LoyaltyError::AccountNotFound(account.id));
        }
        Ok(())
    }

    async fn insert_transaction(&mut self, txn: &PointsTransaction) -> Result<i64> {
        let row = sqlx::query(
            r#"
            INSERT INTO points_transactions
                (account_id, transaction_type, amount, balance_before, balance_after,
                 reference_type, reference_id, expiration_date, status, reason,
                 created_at, created_by)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)
            RETURNING id
            "#,
        )
        .bind(txn.account_id)
        .bind(txn.transaction_type)
        .bind(txn.amount)
        .bind(txn.balance_before)
        .bind(txn.balance_after)
        .bind(txn.reference_type)
        .bind(&txn.reference_id)
        .bind(txn.expiration_date)
        .bind(txn.status)
        .bind(&txn.reason)
        .bind(txn.created_at)
        .bind(&txn.created_by)
        .fetch_one(&mut *self.tx)
        .await?;

        Ok(row.get("id"))
    }

    async fn lock_transaction(&mut self, id: i64) -> Result<Option<PointsTransaction>> {
        let txn = sqlx::query_as::<_, PointsTransaction>(&format!(
            "SELECT {} FROM points_transactions WHERE id = $1 FOR UPDATE",
            TRANSACTION_COLUMNS
        ))
        .bind(id)
        .fetch_optional(&mut *self.tx)
        .await?;

        Ok(txn)
    }

    async fn set_transaction_status(&mut self, id: i64, status: TransactionStatus) -> Result<()> {
        let result = sqlx::query(
            r#"
            UPDATE points_transactions
            SET status = $2
            WHERE id = $1 AND status = 'active'
            "#,
        )
        .bind(id)
        .bind(status)
        .execute(&mut *self.tx)
        .await?;

        if result.rows_affected() == 0 {
            return Err(LoyaltyError::TransactionNotFound(id));
        }
        Ok(())
    }

    async fn list_account_transactions(
        &mut self,
        account_id: i64,
    ) -> Result<Vec<PointsTransaction>> {
        let txns = sqlx::query_as::<_, PointsTransaction>(&format!(
            r#"
            SELECT {} FROM points_transactions
            WHERE account_id = $1
            ORDER BY created_at ASC, id ASC
            "#,
            TRANSACTION_COLUMNS
        ))
        .bind(account_id)
        .fetch_all(&mut *self.tx)
        .await?;

        Ok(txns)
    }

    async fn rule_usage(&mut self, account_id: i64) -> Result<HashMap<i64, i64>> {
        let rows = sqlx::query(
            r#"
            SELECT rule_id, use_count FROM earning_rule_usages
            WHERE account_id = $1
            "#,
        )
        .bind(account_id)
        .fetch_all(&mut *self.tx)
        .await?;

        Ok(rows
            .iter()
            .map(|r| (r.get("rule_id"), r.get("use_count")))
            .collect())
    }

    async fn increment_rule_usage(&mut self, account_id: i64, rule_id: i64) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO earning_rule_usages (account_id, rule_id, use_count, last_used_at)
            VALUES ($1, $2, 1, NOW())
            ON CONFLICT (account_id, rule_id)
            DO UPDATE SET use_count = earning_rule_usages.use_count + 1, last_used_at = NOW()
            "#,
        )
        .bind(account_id)
        .bind(rule_id)
        .execute(&mut *self.tx)
        .await?;

        Ok(())
    }

    async fn lock_reward(&mut self, id: i64) -> Result<Option<RewardItem>> {
        let row = sqlx::query_as::<_, RewardRow>(&format!(
            "SELECT {} FROM reward_items WHERE id = $1 FOR UPDATE",
            REWARD_COLUMNS
        ))
        .bind(id)
        .fetch_optional(&mut *self.tx)
        .await?;

        row.map(RewardItem::try_from).transpose()
    }

    async fn update_reward_stock(
        &mut self,
        id: i64,
        stock_quantity: i32,
        total_redemptions: i64,
    ) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE reward_items
            SET stock_quantity = $2, total_redemptions = $3, updated_at = NOW()
            WHERE id = $1
            "#,
        )
        .bind(id)
        .bind(stock_quantity)
        .bind(total_redemptions)
        .execute(&mut *self.tx)
        .await?;

        Ok(())
    }

    async fn insert_redemption(&mut self, record: &RedemptionRecord) -> Result<i64> {
        let row = sqlx::query(
            r#"
            INSERT INTO redemption_records
                (redemption_code, account_id, reward_id, transaction_id, points_cost, quantity,
                 status, fulfillment_method, notes, created_at, created_by, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)
            RETURNING id
            "#,
        )
        .bind(&record.redemption_code)
        .bind(record.account_id)
        .bind(record.reward_id)
        .bind(record.transaction_id)
        .bind(record.points_cost)
        .bind(record.quantity)
        .bind(record.status)
        .bind(record.fulfillment_method)
        .bind(&record.notes)
        .bind(record.created_at)
        .bind(&record.created_by)
        .bind(record.updated_at)
        .fetch_one(&mut *self.tx)
        .await?;

        Ok(row.get("id"))
    }

    async fn lock_redemption(&mut self, id: i64) -> Result<Option<RedemptionRecord>> {
        let record = sqlx::query_as::<_, RedemptionRecord>(&format!(
            "SELECT {} FROM redemption_records WHERE id = $1 FOR UPDATE",
            REDEMPTION_COLUMNS
        ))
        .bind(id)
        .fetch_optional(&mut *self.tx)
        .await?;

        Ok(record)
    }

    async fn update_redemption(&mut self, record: &RedemptionRecord) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE redemption_records
            SET status = $2, approval_date = $3, approved_by = $4, fulfillment_date = $5,
                fulfilled_by = $6, notes = $7, updated_at = $8
            WHERE id = $1
            "#,
        )
        .bind(record.id)
        .bind(record.status)
        .bind(record.approval_date)
        .bind(&record.approved_by)
        .bind(record.fulfillment_date)
        .bind(&record.fulfilled_by)
        .bind(&record.notes)
        .bind(record.updated_at)
        .execute(&mut *self.tx)
        .await?;

        Ok(())
    }

    async fn commit(self: Box<Self>) -> Result<()> {
        self.tx.commit().await?;
        Ok(())
    }
}
