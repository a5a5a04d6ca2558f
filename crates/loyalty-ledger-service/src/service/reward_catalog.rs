//! 奖励目录
//!
//! 提供奖励查询，以及兑换/取消时的库存增减计算。库存写回只发生在兑换服务的原子单元内。

use std::sync::Arc;

use crate::error::{LoyaltyError, Result};
use crate::models::{RewardItem, Tier};

use super::ledger::PointsLedger;

/// 奖励目录
pub struct RewardCatalog {
    ledger: Arc<PointsLedger>,
}

impl RewardCatalog {
    pub fn new(ledger: Arc<PointsLedger>) -> Self {
        Self { ledger }
    }

    pub async fn get_reward(&self, reward_id: i64) -> Result<RewardItem> {
        self.ledger
            .store()
            .get_reward(reward_id)
            .await?
            .ok_or(LoyaltyError::RewardNotFound(reward_id))
    }

    pub async fn list_rewards(&self, active_only: bool) -> Result<Vec<RewardItem>> {
        self.ledger.store().list_rewards(active_only).await
    }

    /// 指定等级当前可兑换的奖励（有效、等级匹配、至少还有一件库存）
    pub async fn list_available(&self, tier: Tier) -> Result<Vec<RewardItem>> {
        let rewards = self.ledger.store().list_rewards(true).await?;
        Ok(rewards
            .into_iter()
            .filter(|r| r.is_eligible(tier) && r.has_stock(1))
            .collect())
    }

    /// 扣减库存并累加兑换件数，不限量奖励只累加件数
    pub(crate) fn reserve_stock(reward: &mut RewardItem, quantity: i32) -> Result<()> {
        if !reward.has_stock(quantity) {
            return Err(LoyaltyError::InsufficientStock {
                reward_id: reward.id,
                requested: quantity,
                available: reward.stock_quantity,
            });
        }
        if !reward.is_unlimited() {
            reward.stock_quantity -= quantity;
        }
        reward.total_redemptions += i64::from(quantity);
        Ok(())
    }

    /// 取消兑换时归还库存
    pub(crate) fn restore_stock(reward: &mut RewardItem, quantity: i32) {
        if !reward.is_unlimited() {
            reward.stock_quantity = reward.stock_quantity.saturating_add(quantity);
        }
        reward.total_redemptions = (reward.total_redemptions - i64::from(quantity)).max(0);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::UNLIMITED_STOCK;
    use chrono::Utc;

    fn reward(stock: i32) -> RewardItem {
        let now = Utc::now();
        RewardItem {
            id: 7,
            name: "电影票".to_string(),
            description: None,
            points_cost: 200,
            stock_quantity: stock,
            eligible_tiers: [Tier::Bronze].into_iter().collect(),
            min_points_balance: 0,
            is_active: true,
            total_redemptions: 3,
            created_at: now,
            updated_at: now,
        }
    }

    #[test]
    fn test_reserve_and_restore() {
        let mut item = reward(2);
        RewardCatalog::reserve_stock(&mut item, 2).unwrap();
        assert_eq!(item.stock_quantity, 0);
        assert_eq!(item.total_redemptions, 5);

        let err = RewardCatalog::reserve_stock(&mut item, 1).unwrap_err();
        assert!(matches!(
            err,
            LoyaltyError::InsufficientStock {
                requested: 1,
                available: 0,
                ..
            }
        ));

        RewardCatalog::restore_stock(&mut item, 2);
        assert_eq!(item.stock_quantity, 2);
        assert_eq!(item.total_redemptions, 3);
    }

    #[test]
    fn test_unlimited_stock_untouched() {
        let mut item = reward(UNLIMITED_STOCK);
        RewardCatalog::reserve_stock(&mut item, 50).unwrap();
        assert_eq!(item.stock_quantity, UNLIMITED_STOCK);
        assert_eq!(item.total_redemptions, 53);

        RewardCatalog::restore_stock(&mut item, 50);
        assert_eq!(item.stock_quantity, UNLIMITED_STOCK);
        assert_eq!(item.total_redemptions, 3);
    }
}
