//! 积分过期处理 Worker
//!
//! 定期调用 `PointsLedger::expire_outstanding`，把到期未消耗的入账积分转为过期流水。
//! 扫描本身是单飞的：上一轮尚未结束时新一轮直接跳过。
//! 每个账户独立提交，不会长时间阻塞其他账户的入账与兑换。

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use loyalty_shared::observability::metrics;
use tracing::{error, info};

use crate::error::Result;
use crate::service::{PointsLedger, SweepOutcome};

/// 过期处理 Worker
pub struct ExpireWorker {
    ledger: Arc<PointsLedger>,
    /// 轮询间隔（建议 300 秒）
    poll_interval: Duration,
}

impl ExpireWorker {
    /// 创建 ExpireWorker 实例
    ///
    /// # 参数
    /// - `ledger`: 积分账本
    /// - `poll_interval_secs`: 轮询间隔（秒）
    pub fn new(ledger: Arc<PointsLedger>, poll_interval_secs: u64) -> Self {
        Self {
            ledger,
            poll_interval: Duration::from_secs(poll_interval_secs),
        }
    }

    /// 使用默认配置创建 ExpireWorker
    pub fn with_defaults(ledger: Arc<PointsLedger>) -> Self {
        Self::new(ledger, 300)
    }

    /// 执行一轮扫描
    pub async fn run_once(&self) -> Result<SweepOutcome> {
        let outcome = self.ledger.expire_outstanding(Utc::now()).await?;
        metrics::set_worker_last_run("expire_worker");
        Ok(outcome)
    }

    /// 主循环：持续处理过期任务直到进程退出
    pub async fn run(&self) {
        info!(
            poll_interval = ?self.poll_interval,
            batch_size = self.ledger.options().expire_batch_size,
            "ExpireWorker 已启动"
        );

        loop {
            match self.run_once().await {
                Ok(SweepOutcome::Completed(summary)) if summary.accounts_failed > 0 => {
                    error!(
                        failed = summary.accounts_failed,
                        processed = summary.accounts_processed,
                        "部分账户积分过期处理失败，下轮重试"
                    );
                }
                Ok(_) => {}
                Err(e) => error!(error = %e, "积分过期扫描出错"),
            }

            tokio::time::sleep(self.poll_interval).await;
        }
    }
}
