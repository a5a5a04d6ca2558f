//! 集成测试公共设施
//!
//! 基于内存存储组装完整的账本服务，通知通过 channel 收集，审计写入内存

#![allow(dead_code)]

use std::collections::BTreeSet;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::{Mutex, mpsc};

use loyalty_ledger::{
    AuditEvent, AuditRecorder, EarningService, LedgerOptions, LoyaltyAccount,
    LoyaltyAccountService, LoyaltyError, MemoryAuditRecorder, MemoryLoyaltyStore, PointsLedger,
    ProgramConfig, RedemptionService, Result, RewardCatalog, RewardItem, StaticProgramConfig,
    Tier, TierNotifier, TierUpgradeNotification,
};

/// 把等级通知转发到 channel 的通知器
pub struct ChannelNotifier {
    tx: mpsc::UnboundedSender<TierUpgradeNotification>,
}

#[async_trait]
impl TierNotifier for ChannelNotifier {
    async fn notify_tier_upgrade(&self, notification: TierUpgradeNotification) -> Result<()> {
        let _ = self.tx.send(notification);
        Ok(())
    }
}

/// 每次写入都失败的审计记录器，记录调用次数
#[derive(Default)]
pub struct FailingAuditRecorder {
    attempts: AtomicUsize,
}

impl FailingAuditRecorder {
    pub fn attempts(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl AuditRecorder for FailingAuditRecorder {
    async fn record(&self, _event: AuditEvent) -> Result<()> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        Err(LoyaltyError::StorageUnavailable("审计库不可用".to_string()))
    }
}

/// 测试用的完整服务组装
pub struct Harness {
    pub store: MemoryLoyaltyStore,
    pub program: Arc<StaticProgramConfig>,
    pub audit: Arc<MemoryAuditRecorder>,
    pub notifications: Mutex<mpsc::UnboundedReceiver<TierUpgradeNotification>>,
    pub ledger: Arc<PointsLedger>,
    pub accounts: Arc<LoyaltyAccountService>,
    pub earning: Arc<EarningService>,
    pub redemptions: Arc<RedemptionService>,
    pub catalog: Arc<RewardCatalog>,
}

impl Harness {
    pub fn new() -> Self {
        Self::build(ProgramConfig::default(), LedgerOptions::default())
    }

    pub fn with_program(program: ProgramConfig) -> Self {
        Self::build(program, LedgerOptions::default())
    }

    pub fn with_options(options: LedgerOptions) -> Self {
        Self::build(ProgramConfig::default(), options)
    }

    /// 审计写入改用给定记录器，`audit` 字段保持为空
    pub fn with_audit_recorder(recorder: Arc<dyn AuditRecorder>) -> Self {
        Self::assemble(ProgramConfig::default(), LedgerOptions::default(), Some(recorder))
    }

    pub fn build(program: ProgramConfig, options: LedgerOptions) -> Self {
        Self::assemble(program, options, None)
    }

    fn assemble(
        program: ProgramConfig,
        options: LedgerOptions,
        recorder: Option<Arc<dyn AuditRecorder>>,
    ) -> Self {
        let store = MemoryLoyaltyStore::new();
        let program = Arc::new(StaticProgramConfig::new(program).expect("积分计划配置非法"));
        let audit = Arc::new(MemoryAuditRecorder::new());
        let recorder: Arc<dyn AuditRecorder> = match recorder {
            Some(recorder) => recorder,
            None => audit.clone(),
        };
        let (tx, rx) = mpsc::unbounded_channel();

        let ledger = Arc::new(PointsLedger::new(
            Arc::new(store.clone()),
            program.clone(),
            recorder,
            Arc::new(ChannelNotifier { tx }),
            options,
        ));

        Self {
            store,
            program,
            audit,
            notifications: Mutex::new(rx),
            accounts: Arc::new(LoyaltyAccountService::new(ledger.clone())),
            earning: Arc::new(EarningService::new(ledger.clone())),
            redemptions: Arc::new(RedemptionService::new(ledger.clone())),
            catalog: Arc::new(RewardCatalog::new(ledger.clone())),
            ledger,
        }
    }

    /// 开户（无开户奖励）并入账指定积分
    pub async fn funded_account(&self, customer_id: &str, points: i64) -> LoyaltyAccount {
        let account = self
            .accounts
            .enroll(customer_id, Some(0), "test")
            .await
            .expect("开户失败");
        if points > 0 {
            self.ledger
                .record_earn(
                    account.id,
                    points,
                    loyalty_ledger::dto::EntryReference::sale(format!("seed-{}", customer_id)),
                    None,
                    "test",
                )
                .await
                .expect("入账失败");
        }
        self.account(account.id).await
    }

    pub async fn account(&self, account_id: i64) -> LoyaltyAccount {
        self.accounts
            .get_account_by_id(account_id)
            .await
            .expect("账户不存在")
    }

    /// 写入一件奖励，返回奖励 ID
    pub async fn reward(&self, name: &str, points_cost: i64, stock: i32, tiers: &[Tier]) -> i64 {
        let now = Utc::now();
        let eligible_tiers: BTreeSet<Tier> = if tiers.is_empty() {
            [Tier::Bronze, Tier::Silver, Tier::Gold, Tier::Platinum]
                .into_iter()
                .collect()
        } else {
            tiers.iter().copied().collect()
        };

        self.store
            .insert_reward(RewardItem {
                id: 0,
                name: name.to_string(),
                description: None,
                points_cost,
                stock_quantity: stock,
                eligible_tiers,
                min_points_balance: 0,
                is_active: true,
                total_redemptions: 0,
                created_at: now,
                updated_at: now,
            })
            .await
    }

    /// 等待下一条等级通知
    pub async fn next_notification(&self) -> Option<TierUpgradeNotification> {
        let mut rx = self.notifications.lock().await;
        tokio::time::timeout(Duration::from_secs(1), rx.recv())
            .await
            .ok()
            .flatten()
    }

    /// 账本一致性：快照首尾相接、算术正确，且与账户余额一致
    pub async fn assert_ledger_consistent(&self, account_id: i64) {
        let history = self
            .store_history(account_id)
            .await;
        let mut expected_before = 0;
        for txn in &history {
            assert!(txn.is_arithmetic_consistent(), "流水算术不一致: {:?}", txn);
            assert_eq!(txn.balance_before, expected_before, "快照未衔接: {:?}", txn);
            expected_before = txn.balance_after;
        }

        let account = self.account(account_id).await;
        assert_eq!(expected_before, account.available_points);
        assert_eq!(
            self.ledger.reconstruct_balance(account_id).await.unwrap(),
            account.available_points
        );
    }

    async fn store_history(&self, account_id: i64) -> Vec<loyalty_ledger::PointsTransaction> {
        let mut history = self
            .ledger
            .transaction_history(account_id, i64::MAX)
            .await
            .unwrap();
        history.reverse();
        history
    }
}
