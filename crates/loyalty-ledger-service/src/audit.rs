//! 审计记录
//!
//! 每次成功的账本变更（开户、入账、兑换、冲正、状态变更等）都会产生一条审计事件。
//! 审计写入与账本事务相互独立：失败只记录告警，不回滚已提交的变更。

use std::sync::Mutex;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;
use sqlx::PgPool;
use tracing::{info, warn};

use crate::error::{LoyaltyError, Result};

/// 审计动作
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AuditAction {
    Enroll,
    Deactivate,
    Earn,
    Bonus,
    Adjust,
    Redeem,
    Reverse,
    Expire,
    StatusChange,
}

impl AuditAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Enroll => "ENROLL",
            Self::Deactivate => "DEACTIVATE",
            Self::Earn => "EARN",
            Self::Bonus => "BONUS",
            Self::Adjust => "ADJUST",
            Self::Redeem => "REDEEM",
            Self::Reverse => "REVERSE",
            Self::Expire => "EXPIRE",
            Self::StatusChange => "STATUS_CHANGE",
        }
    }
}

/// 审计事件
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AuditEvent {
    pub action: AuditAction,
    pub entity_type: String,
    pub entity_id: String,
    pub actor_id: String,
    pub timestamp: DateTime<Utc>,
    pub details: Value,
}

impl AuditEvent {
    pub fn new(action: AuditAction, actor_id: impl Into<String>) -> Self {
        Self {
            action,
            entity_type: String::new(),
            entity_id: String::new(),
            actor_id: actor_id.into(),
            timestamp: Utc::now(),
            details: Value::Null,
        }
    }

    /// 设置操作目标
    pub fn with_target(mut self, entity_type: impl Into<String>, entity_id: impl ToString) -> Self {
        self.entity_type = entity_type.into();
        self.entity_id = entity_id.to_string();
        self
    }

    /// 设置事件明细
    pub fn with_details(mut self, details: Value) -> Self {
        self.details = details;
        self
    }
}

/// 审计记录器
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait AuditRecorder: Send + Sync {
    async fn record(&self, event: AuditEvent) -> Result<()>;
}

/// 写入审计事件，失败只告警
pub(crate) async fn record_best_effort(recorder: &dyn AuditRecorder, event: AuditEvent) {
    let action = event.action;
    let entity_id = event.entity_id.clone();
    if let Err(e) = recorder.record(event).await {
        warn!(
            action = action.as_str(),
            entity_id = %entity_id,
            error = %e,
            "审计记录写入失败"
        );
    }
}

/// 输出到 tracing 日志的审计记录器
#[derive(Debug, Default, Clone)]
pub struct TracingAuditRecorder;

#[async_trait]
impl AuditRecorder for TracingAuditRecorder {
    async fn record(&self, event: AuditEvent) -> Result<()> {
        info!(
            target: "audit",
            action = event.action.as_str(),
            entity_type = %event.entity_type,
            entity_id = %event.entity_id,
            actor_id = %event.actor_id,
            details = %event.details,
            "审计事件"
        );
        Ok(())
    }
}

/// 写入 audit_logs 表的审计记录器
#[derive(Clone)]
pub struct PgAuditRecorder {
    pool: PgPool,
}

impl PgAuditRecorder {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl AuditRecorder for PgAuditRecorder {
    async fn record(&self, event: AuditEvent) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO audit_logs (action, entity_type, entity_id, actor_id, details, created_at)
            VALUES ($1, $2, $3, $4, $5, $6)
            "#,
        )
        .bind(event.action.as_str())
        .bind(&event.entity_type)
        .bind(&event.entity_id)
        .bind(&event.actor_id)
        .bind(&event.details)
        .bind(event.timestamp)
        .execute(&self.pool)
        .await?;

        Ok(())
    }
}

/// 保存在内存中的审计记录器，本地运行时查看审计轨迹使用
#[derive(Debug, Default)]
pub struct MemoryAuditRecorder {
    events: Mutex<Vec<AuditEvent>>,
}

impl MemoryAuditRecorder {
    pub fn new() -> Self {
        Self::default()
    }

    /// 已记录事件的快照
    pub fn events(&self) -> Vec<AuditEvent> {
        self.events
            .lock()
            .map(|events| events.clone())
            .unwrap_or_default()
    }
}

#[async_trait]
impl AuditRecorder for MemoryAuditRecorder {
    async fn record(&self, event: AuditEvent) -> Result<()> {
        self.events
            .lock()
            .map_err(|_| LoyaltyError::Internal("审计记录锁已损坏".to_string()))?
            .push(event);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_event_builder() {
        let event = AuditEvent::new(AuditAction::Redeem, "cashier-1")
            .with_target("redemption", 42)
            .with_details(json!({"pointsCost": 30}));

        assert_eq!(event.entity_type, "redemption");
        assert_eq!(event.entity_id, "42");
        assert_eq!(event.actor_id, "cashier-1");
        assert_eq!(event.details["pointsCost"], 30);
    }

    #[tokio::test]
    async fn test_best_effort_swallows_failure() {
        let mut recorder = MockAuditRecorder::new();
        recorder
            .expect_record()
            .times(1)
            .returning(|_| Err(LoyaltyError::StorageUnavailable("down".to_string())));

        // 不应 panic 或返回错误
        record_best_effort(&recorder, AuditEvent::new(AuditAction::Earn, "system")).await;
    }

    #[tokio::test]
    async fn test_memory_recorder() {
        let recorder = MemoryAuditRecorder::new();
        recorder
            .record(AuditEvent::new(AuditAction::Enroll, "system").with_target("account", 1))
            .await
            .unwrap();
        let events = recorder.events();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].action, AuditAction::Enroll);
    }
}
