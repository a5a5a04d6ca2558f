//! 奖励兑换集成测试
//!
//! 兑换、状态流转、取消补偿与资格校验

mod common;

use chrono::{Duration as ChronoDuration, Utc};

use common::Harness;
use loyalty_ledger::dto::{EntryReference, RedeemRequest, SweepOutcome};
use loyalty_ledger::{
    ErrorKind, FulfillmentMethod, LoyaltyError, ProgramConfig, ReferenceType, RedemptionStatus,
    Tier, TransactionStatus, TransactionType, UNLIMITED_STOCK,
};

// ==================== 兑换 ====================

#[tokio::test]
async fn test_redeem_success() {
    let h = Harness::new();
    let account = h.funded_account("cust-1", 100).await;
    let reward_id = h.reward("咖啡券", 30, 5, &[]).await;

    let record = h
        .redemptions
        .redeem(
            RedeemRequest::new(account.id, reward_id, 1, "cust-1")
                .with_fulfillment(FulfillmentMethod::Digital)
                .with_notes("App 兑换"),
        )
        .await
        .unwrap();

    assert_eq!(record.status, RedemptionStatus::Pending);
    assert_eq!(record.points_cost, 30);
    assert_eq!(record.fulfillment_method, FulfillmentMethod::Digital);
    assert_eq!(record.notes.as_deref(), Some("App 兑换"));
    assert!(record.redemption_code.starts_with("RD"));
    assert_eq!(record.redemption_code.len(), 24);

    let txn = h.ledger.get_transaction(record.transaction_id).await.unwrap();
    assert_eq!(txn.transaction_type, TransactionType::Redeem);
    assert_eq!(txn.amount, 30);
    assert_eq!(txn.reference_type, Some(ReferenceType::Redemption));
    assert_eq!(txn.reference_id.as_deref(), Some(record.redemption_code.as_str()));

    let account = h.account(account.id).await;
    assert_eq!(account.available_points, 70);
    assert_eq!(account.lifetime_redeemed, 30);

    let reward = h.catalog.get_reward(reward_id).await.unwrap();
    assert_eq!(reward.stock_quantity, 4);
    assert_eq!(reward.total_redemptions, 1);
    h.assert_ledger_consistent(account.id).await;
}

#[tokio::test]
async fn test_redeem_multiple_quantity() {
    let h = Harness::new();
    let account = h.funded_account("cust-1", 100).await;
    let reward_id = h.reward("贴纸", 20, 10, &[]).await;

    let record = h
        .redemptions
        .redeem(RedeemRequest::new(account.id, reward_id, 3, "cust-1"))
        .await
        .unwrap();
    assert_eq!(record.points_cost, 60);
    assert_eq!(record.quantity, 3);
    assert_eq!(h.catalog.get_reward(reward_id).await.unwrap().stock_quantity, 7);
}

#[tokio::test]
async fn test_redeem_unlimited_stock() {
    let h = Harness::new();
    let account = h.funded_account("cust-1", 100).await;
    let reward_id = h.reward("电子贺卡", 10, UNLIMITED_STOCK, &[]).await;

    for _ in 0..3 {
        h.redemptions
            .redeem(RedeemRequest::new(account.id, reward_id, 2, "cust-1"))
            .await
            .unwrap();
    }

    let reward = h.catalog.get_reward(reward_id).await.unwrap();
    assert_eq!(reward.stock_quantity, UNLIMITED_STOCK);
    assert_eq!(reward.total_redemptions, 6);
    assert_eq!(h.account(account.id).await.available_points, 40);
}

// ==================== 状态流转 ====================

#[tokio::test]
async fn test_cancel_restores_points_and_stock() {
    let h = Harness::new();
    let account = h.funded_account("cust-1", 100).await;
    let reward_id = h.reward("咖啡券", 30, 5, &[]).await;
    let record = h
        .redemptions
        .redeem(RedeemRequest::new(account.id, reward_id, 1, "cust-1"))
        .await
        .unwrap();

    let cancelled = h
        .redemptions
        .update_status(
            record.id,
            RedemptionStatus::Cancelled,
            Some("顾客取消".to_string()),
            "cashier",
        )
        .await
        .unwrap();
    assert_eq!(cancelled.status, RedemptionStatus::Cancelled);
    assert_eq!(cancelled.notes.as_deref(), Some("顾客取消"));

    let account = h.account(account.id).await;
    assert_eq!(account.available_points, 100);
    assert_eq!(account.lifetime_redeemed, 0);

    let reward = h.catalog.get_reward(reward_id).await.unwrap();
    assert_eq!(reward.stock_quantity, 5);
    assert_eq!(reward.total_redemptions, 0);

    let debit = h.ledger.get_transaction(record.transaction_id).await.unwrap();
    assert_eq!(debit.status, TransactionStatus::Reversed);
    let latest = &h.ledger.transaction_history(account.id, 1).await.unwrap()[0];
    assert_eq!(latest.transaction_type, TransactionType::Reversal);
    assert_eq!(latest.referenced_transaction(), Some(record.transaction_id));

    // 终态不可再流转
    let err = h
        .redemptions
        .update_status(record.id, RedemptionStatus::Cancelled, None, "cashier")
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        LoyaltyError::InvalidStatusTransition {
            from: RedemptionStatus::Cancelled,
            to: RedemptionStatus::Cancelled
        }
    ));
    assert_eq!(h.account(account.id).await.available_points, 100);
    h.assert_ledger_consistent(account.id).await;
}

#[tokio::test]
async fn test_redemption_debit_only_reversed_by_cancel() {
    let h = Harness::new();
    let account = h.funded_account("cust-1", 100).await;
    let reward_id = h.reward("咖啡券", 30, 5, &[]).await;
    let record = h
        .redemptions
        .redeem(RedeemRequest::new(account.id, reward_id, 1, "cust-1"))
        .await
        .unwrap();

    let err = h
        .ledger
        .reverse(record.transaction_id, "误操作", "admin")
        .await
        .unwrap_err();
    assert!(matches!(err, LoyaltyError::RedemptionManaged(id) if id == record.transaction_id));
    assert_eq!(err.kind(), ErrorKind::StateConflict);
    assert_eq!(h.account(account.id).await.available_points, 70);
    assert_eq!(
        h.ledger.get_transaction(record.transaction_id).await.unwrap().status,
        TransactionStatus::Active
    );

    // 取消兑换单仍可退回积分并恢复库存
    h.redemptions
        .update_status(record.id, RedemptionStatus::Cancelled, None, "cashier")
        .await
        .unwrap();
    assert_eq!(h.account(account.id).await.available_points, 100);
    assert_eq!(h.catalog.get_reward(reward_id).await.unwrap().stock_quantity, 5);
    h.assert_ledger_consistent(account.id).await;
}

#[tokio::test]
async fn test_cancel_after_sweep_expires_refund() {
    let h = Harness::new();
    let account = h.funded_account("cust-1", 0).await;
    let earn = h
        .ledger
        .record_earn(
            account.id,
            100,
            EntryReference::sale("s-1"),
            Some(Utc::now() - ChronoDuration::hours(1)),
            "pos",
        )
        .await
        .unwrap();
    let reward_id = h.reward("会员礼盒", 100, 2, &[]).await;
    let record = h
        .redemptions
        .redeem(RedeemRequest::new(account.id, reward_id, 1, "cust-1"))
        .await
        .unwrap();

    // 入账已被兑换消耗完，扫描只标记过期
    let outcome = h.ledger.expire_outstanding(Utc::now()).await.unwrap();
    assert!(matches!(outcome, SweepOutcome::Completed(s) if s.points_expired == 0));

    h.redemptions
        .update_status(record.id, RedemptionStatus::Cancelled, None, "cashier")
        .await
        .unwrap();

    // 退回的积分来源已过期，不再计入可用余额
    let account = h.account(account.id).await;
    assert_eq!(account.available_points, 0);
    assert_eq!(h.catalog.get_reward(reward_id).await.unwrap().stock_quantity, 2);

    let latest = &h.ledger.transaction_history(account.id, 1).await.unwrap()[0];
    assert_eq!(latest.transaction_type, TransactionType::Expiration);
    assert_eq!(latest.referenced_transaction(), Some(earn.id));
    assert!(h.ledger.outstanding_credits(account.id).await.unwrap().is_empty());
    h.assert_ledger_consistent(account.id).await;
}

#[tokio::test]
async fn test_approve_then_complete() {
    let h = Harness::new();
    let account = h.funded_account("cust-1", 100).await;
    let reward_id = h.reward("咖啡券", 30, 5, &[]).await;
    let record = h
        .redemptions
        .redeem(RedeemRequest::new(account.id, reward_id, 1, "cust-1"))
        .await
        .unwrap();

    let approved = h
        .redemptions
        .update_status(record.id, RedemptionStatus::Approved, None, "manager")
        .await
        .unwrap();
    assert_eq!(approved.approved_by.as_deref(), Some("manager"));
    assert!(approved.approval_date.is_some());
    assert!(approved.fulfillment_date.is_none());

    let completed = h
        .redemptions
        .update_status(record.id, RedemptionStatus::Completed, None, "clerk")
        .await
        .unwrap();
    assert_eq!(completed.fulfilled_by.as_deref(), Some("clerk"));
    assert!(completed.fulfillment_date.is_some());
    assert_eq!(completed.approved_by.as_deref(), Some("manager"));

    // 完成后不能取消，积分不变
    assert!(matches!(
        h.redemptions
            .update_status(record.id, RedemptionStatus::Cancelled, None, "clerk")
            .await,
        Err(LoyaltyError::InvalidStatusTransition { .. })
    ));
    assert_eq!(h.account(account.id).await.available_points, 70);
}

#[tokio::test]
async fn test_pending_cannot_complete_directly() {
    let h = Harness::new();
    let account = h.funded_account("cust-1", 100).await;
    let reward_id = h.reward("咖啡券", 30, 5, &[]).await;
    let record = h
        .redemptions
        .redeem(RedeemRequest::new(account.id, reward_id, 1, "cust-1"))
        .await
        .unwrap();

    let err = h
        .redemptions
        .update_status(record.id, RedemptionStatus::Completed, None, "clerk")
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        LoyaltyError::InvalidStatusTransition {
            from: RedemptionStatus::Pending,
            to: RedemptionStatus::Completed
        }
    ));

    assert!(matches!(
        h.redemptions
            .update_status(9_999, RedemptionStatus::Approved, None, "clerk")
            .await,
        Err(LoyaltyError::RedemptionNotFound(_))
    ));
}

#[tokio::test]
async fn test_cancel_allowed_after_deactivation() {
    let h = Harness::new();
    let account = h.funded_account("cust-1", 100).await;
    let reward_id = h.reward("咖啡券", 30, 5, &[]).await;
    let record = h
        .redemptions
        .redeem(RedeemRequest::new(account.id, reward_id, 1, "cust-1"))
        .await
        .unwrap();
    h.accounts.deactivate(account.id, "admin").await.unwrap();

    h.redemptions
        .update_status(record.id, RedemptionStatus::Cancelled, None, "admin")
        .await
        .unwrap();
    assert_eq!(h.account(account.id).await.available_points, 100);
}

// ==================== 资格校验 ====================

#[tokio::test]
async fn test_rejections_leave_no_side_effects() {
    let h = Harness::with_program(ProgramConfig {
        min_redemption_points: 50,
        ..ProgramConfig::default()
    });
    let account = h.funded_account("cust-1", 40).await;
    let cheap = h.reward("贴纸", 10, 1, &[]).await;
    let gold_only = h.reward("贵宾休息室", 10, 5, &[Tier::Gold, Tier::Platinum]).await;

    // 等级不符
    let err = h
        .redemptions
        .redeem(RedeemRequest::new(account.id, gold_only, 1, "cust-1"))
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        LoyaltyError::TierIneligible {
            tier: Tier::Bronze,
            ..
        }
    ));

    // 未达到计划最低积分
    let err = h
        .redemptions
        .redeem(RedeemRequest::new(account.id, cheap, 1, "cust-1"))
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        LoyaltyError::MinimumBalanceNotMet {
            required: 50,
            available: 40
        }
    ));

    h.ledger
        .record_earn(
            account.id,
            60,
            loyalty_ledger::dto::EntryReference::sale("s-2"),
            None,
            "pos",
        )
        .await
        .unwrap();

    // 库存不足
    let err = h
        .redemptions
        .redeem(RedeemRequest::new(account.id, cheap, 2, "cust-1"))
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        LoyaltyError::InsufficientStock {
            requested: 2,
            available: 1,
            ..
        }
    ));

    // 余额不足
    let pricey = h.reward("耳机", 500, 5, &[]).await;
    let err = h
        .redemptions
        .redeem(RedeemRequest::new(account.id, pricey, 1, "cust-1"))
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        LoyaltyError::InsufficientBalance {
            available: 100,
            required: 500
        }
    ));

    // 数量非法
    assert!(matches!(
        h.redemptions
            .redeem(RedeemRequest::new(account.id, cheap, 0, "cust-1"))
            .await,
        Err(LoyaltyError::Validation(_))
    ));

    // 奖励不存在
    assert!(matches!(
        h.redemptions
            .redeem(RedeemRequest::new(account.id, 77_777, 1, "cust-1"))
            .await,
        Err(LoyaltyError::RewardUnavailable(77_777))
    ));

    let account = h.account(account.id).await;
    assert_eq!(account.available_points, 100);
    assert_eq!(account.lifetime_redeemed, 0);
    assert_eq!(h.catalog.get_reward(cheap).await.unwrap().stock_quantity, 1);
    assert!(h.redemptions.list_redemptions(account.id, 10).await.unwrap().is_empty());
}

#[tokio::test]
async fn test_redeem_unknown_or_inactive_account() {
    let h = Harness::new();
    let reward_id = h.reward("咖啡券", 30, 5, &[]).await;

    assert!(matches!(
        h.redemptions
            .redeem(RedeemRequest::new(4_242, reward_id, 1, "x"))
            .await,
        Err(LoyaltyError::AccountNotFound(4_242))
    ));

    let account = h.funded_account("cust-1", 100).await;
    h.accounts.deactivate(account.id, "admin").await.unwrap();
    assert!(matches!(
        h.redemptions
            .redeem(RedeemRequest::new(account.id, reward_id, 1, "cust-1"))
            .await,
        Err(LoyaltyError::AccountInactive(_))
    ));
}

// ==================== 查询 ====================

#[tokio::test]
async fn test_redemption_queries() {
    let h = Harness::new();
    let account = h.funded_account("cust-1", 100).await;
    let reward_id = h.reward("咖啡券", 10, UNLIMITED_STOCK, &[]).await;

    let first = h
        .redemptions
        .redeem(RedeemRequest::new(account.id, reward_id, 1, "cust-1"))
        .await
        .unwrap();
    let second = h
        .redemptions
        .redeem(RedeemRequest::new(account.id, reward_id, 1, "cust-1"))
        .await
        .unwrap();
    assert_ne!(first.redemption_code, second.redemption_code);

    let by_code = h.redemptions.get_by_code(&first.redemption_code).await.unwrap();
    assert_eq!(by_code.id, first.id);
    assert_eq!(h.redemptions.get_redemption(second.id).await.unwrap(), second);

    let listed = h.redemptions.list_redemptions(account.id, 10).await.unwrap();
    assert_eq!(listed.len(), 2);
    assert!(listed.iter().any(|r| r.id == first.id));

    assert!(matches!(
        h.redemptions.get_by_code("RD-UNKNOWN").await,
        Err(LoyaltyError::RedemptionNotFound(_))
    ));
    assert!(matches!(
        h.redemptions.list_redemptions(account.id, 0).await,
        Err(LoyaltyError::Validation(_))
    ));
}

#[tokio::test]
async fn test_catalog_lists_available_rewards() {
    let h = Harness::new();
    let open = h.reward("咖啡券", 10, 5, &[]).await;
    let gold_only = h.reward("贵宾休息室", 10, 5, &[Tier::Gold]).await;
    let sold_out = h.reward("限量杯", 10, 0, &[]).await;

    let ids: Vec<i64> = h
        .catalog
        .list_available(Tier::Bronze)
        .await
        .unwrap()
        .into_iter()
        .map(|r| r.id)
        .collect();
    assert!(ids.contains(&open));
    assert!(!ids.contains(&gold_only));
    assert!(!ids.contains(&sold_out));

    assert_eq!(h.catalog.list_rewards(true).await.unwrap().len(), 3);
    assert!(matches!(
        h.catalog.get_reward(123_456).await,
        Err(LoyaltyError::RewardNotFound(123_456))
    ));
}
