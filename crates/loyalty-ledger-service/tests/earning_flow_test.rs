//! 消费积分发放集成测试
//!
//! 规则引擎、基础积分率、等级倍率与计划上限的组合效果

mod common;

use chrono::{DateTime, FixedOffset, TimeZone, Utc};
use rust_decimal_macros::dec;

use common::Harness;
use loyalty_ledger::{
    BonusKind, EarningRule, LoyaltyError, ProgramConfig, PurchaseContext, ReferenceType, Tier,
    TransactionType,
};

fn shanghai(y: i32, mo: u32, d: u32, h: u32) -> DateTime<FixedOffset> {
    FixedOffset::east_opt(8 * 3600)
        .unwrap()
        .with_ymd_and_hms(y, mo, d, h, 0, 0)
        .unwrap()
}

fn coffee_purchase(sale_id: &str) -> PurchaseContext {
    PurchaseContext::new(sale_id, dec!(100.00), shanghai(2026, 3, 10, 9))
        .with_item("latte", "coffee", dec!(100.00))
}

// ==================== 规则积分 ====================

#[tokio::test]
async fn test_rule_points_added_to_base_points() {
    let h = Harness::new();
    let account = h.funded_account("cust-1", 0).await;

    let mut rule = EarningRule::unrestricted(0, "咖啡加赠", 0.5);
    rule.fixed_points = 10;
    rule.applicable_categories.insert("coffee".to_string());
    let rule_id = h.store.insert_rule(rule).await;

    let outcome = h
        .earning
        .award_purchase(account.id, coffee_purchase("sale-1"), "pos")
        .await
        .unwrap();

    assert_eq!(outcome.evaluation.total_points, 60);
    assert_eq!(outcome.evaluation.contributing_rule_ids().collect::<Vec<_>>(), vec![rule_id]);
    assert_eq!(outcome.base_points, 100);
    assert_eq!(outcome.points_awarded, 160);

    let txn = outcome.transaction.expect("应写入流水");
    assert_eq!(txn.transaction_type, TransactionType::Earn);
    assert_eq!(txn.reference_type, Some(ReferenceType::Sale));
    assert_eq!(txn.reference_id.as_deref(), Some("sale-1"));
    assert_eq!(h.account(account.id).await.available_points, 160);
    assert_eq!(h.store.rule_usage_count(account.id, rule_id).await, 1);
}

#[tokio::test]
async fn test_rule_skipped_for_other_category() {
    let h = Harness::new();
    let account = h.funded_account("cust-1", 0).await;

    let mut rule = EarningRule::unrestricted(0, "咖啡加赠", 0.5);
    rule.applicable_categories.insert("coffee".to_string());
    let rule_id = h.store.insert_rule(rule).await;

    let purchase = PurchaseContext::new("sale-1", dec!(40.00), shanghai(2026, 3, 10, 9))
        .with_item("muffin", "bakery", dec!(40.00));
    let outcome = h.earning.award_purchase(account.id, purchase, "pos").await.unwrap();

    assert_eq!(outcome.points_awarded, 40);
    assert_eq!(outcome.evaluation.skipped.len(), 1);
    assert_eq!(outcome.evaluation.skipped[0].rule_id, rule_id);
    assert_eq!(h.store.rule_usage_count(account.id, rule_id).await, 0);
}

#[tokio::test]
async fn test_max_uses_per_customer() {
    let h = Harness::new();
    let account = h.funded_account("cust-1", 0).await;

    let mut rule = EarningRule::unrestricted(0, "首单奖励", 0.0);
    rule.fixed_points = 10;
    rule.max_uses_per_customer = Some(1);
    let rule_id = h.store.insert_rule(rule).await;

    let first = h
        .earning
        .award_purchase(account.id, coffee_purchase("sale-1"), "pos")
        .await
        .unwrap();
    assert_eq!(first.points_awarded, 110);

    let second = h
        .earning
        .award_purchase(account.id, coffee_purchase("sale-2"), "pos")
        .await
        .unwrap();
    assert_eq!(second.points_awarded, 100);
    assert!(second.evaluation.contributions.is_empty());

    // 另一个账户不受影响
    let other = h.funded_account("cust-2", 0).await;
    let third = h
        .earning
        .award_purchase(other.id, coffee_purchase("sale-3"), "pos")
        .await
        .unwrap();
    assert_eq!(third.points_awarded, 110);

    assert_eq!(h.store.rule_usage_count(account.id, rule_id).await, 1);
    assert_eq!(h.store.rule_usage_count(other.id, rule_id).await, 1);
}

// ==================== 计划参数 ====================

#[tokio::test]
async fn test_zero_award_writes_nothing() {
    let h = Harness::with_program(ProgramConfig {
        points_per_currency_unit: 0.0,
        ..ProgramConfig::default()
    });
    let account = h.funded_account("cust-1", 0).await;

    let outcome = h
        .earning
        .award_purchase(account.id, coffee_purchase("sale-1"), "pos")
        .await
        .unwrap();
    assert_eq!(outcome.points_awarded, 0);
    assert!(outcome.transaction.is_none());
    assert!(h.ledger.transaction_history(account.id, 10).await.unwrap().is_empty());
}

#[tokio::test]
async fn test_tier_multiplier_applied() {
    let h = Harness::new();
    let account = h.funded_account("cust-1", 5_000).await;
    assert_eq!(account.tier, Tier::Gold);

    let outcome = h
        .earning
        .award_purchase(account.id, coffee_purchase("sale-1"), "pos")
        .await
        .unwrap();
    assert_eq!(outcome.tier_multiplier, 1.5);
    assert_eq!(outcome.points_awarded, 150);
    assert_eq!(h.account(account.id).await.available_points, 5_150);
}

#[tokio::test]
async fn test_program_cap() {
    let h = Harness::with_program(ProgramConfig {
        max_points_per_transaction: Some(100),
        ..ProgramConfig::default()
    });
    let account = h.funded_account("cust-1", 0).await;

    let purchase = PurchaseContext::new("sale-1", dec!(500.00), shanghai(2026, 3, 10, 9));
    let outcome = h.earning.award_purchase(account.id, purchase, "pos").await.unwrap();
    assert_eq!(outcome.points_awarded, 100);
}

#[tokio::test]
async fn test_expiration_counted_from_purchase_time() {
    let h = Harness::new();
    let account = h.funded_account("cust-1", 0).await;

    let purchase = PurchaseContext::new("sale-1", dec!(20.00), shanghai(2026, 1, 15, 10));
    let txn = h
        .earning
        .award_purchase(account.id, purchase, "pos")
        .await
        .unwrap()
        .transaction
        .unwrap();

    let expected = Utc.with_ymd_and_hms(2027, 1, 15, 2, 0, 0).unwrap();
    assert_eq!(txn.expiration_date, Some(expected));
}

// ==================== 异常输入 ====================

#[tokio::test]
async fn test_purchase_rejections() {
    let h = Harness::new();
    let account = h.funded_account("cust-1", 0).await;

    let zero = PurchaseContext::new("sale-0", dec!(0), shanghai(2026, 3, 10, 9));
    assert!(matches!(
        h.earning.award_purchase(account.id, zero, "pos").await,
        Err(LoyaltyError::Validation(_))
    ));

    h.accounts.deactivate(account.id, "admin").await.unwrap();
    assert!(matches!(
        h.earning
            .award_purchase(account.id, coffee_purchase("sale-1"), "pos")
            .await,
        Err(LoyaltyError::AccountInactive(_))
    ));
}

// ==================== 计划奖励 ====================

#[tokio::test]
async fn test_birthday_bonus() {
    let h = Harness::new();
    let account = h.funded_account("cust-1", 0).await;

    let txn = h
        .earning
        .award_bonus(account.id, BonusKind::Birthday, "system")
        .await
        .unwrap()
        .expect("应发放生日奖励");
    assert_eq!(txn.transaction_type, TransactionType::Bonus);
    assert_eq!(txn.amount, 200);
    assert_eq!(txn.reference_type, Some(ReferenceType::Birthday));
    assert!(txn.expiration_date.is_some());
    assert_eq!(h.account(account.id).await.available_points, 200);
}

#[tokio::test]
async fn test_unconfigured_bonus_skipped() {
    let h = Harness::with_program(ProgramConfig {
        anniversary_bonus: 0,
        ..ProgramConfig::default()
    });
    let account = h.funded_account("cust-1", 0).await;

    let result = h
        .earning
        .award_bonus(account.id, BonusKind::Anniversary, "system")
        .await
        .unwrap();
    assert!(result.is_none());
    assert_eq!(h.account(account.id).await.available_points, 0);
}
