//! 会员积分账本服务
//!
//! 进程入口：加载配置、执行数据库迁移，并运行积分过期 Worker。
//! 账本本身以库的形式被业务进程引用。

use std::sync::Arc;

use anyhow::Result;
use loyalty_shared::{config::AppConfig, database::Database, observability};
use tokio::signal;
use tracing::{error, info};

use loyalty_ledger::{
    ExpireWorker, FileProgramConfig, LedgerOptions, LoggingTierNotifier, PgAuditRecorder,
    PgLoyaltyStore, PointsLedger, ProgramConfigSource, StaticProgramConfig,
};

#[tokio::main]
async fn main() -> Result<()> {
    // 1. 统一加载配置：从 config/{service_name}.toml 加载，包含可观测性配置
    let config = AppConfig::load("loyalty-ledger").unwrap_or_else(|e| {
        eprintln!("Failed to load config, using defaults: {}", e);
        AppConfig {
            service_name: "loyalty-ledger".to_string(),
            ..AppConfig::default()
        }
    });

    // 2. 从 AppConfig 中提取可观测性配置并注入服务名
    let obs_config = config
        .observability
        .clone()
        .with_service_name(&config.service_name);
    let _guard = observability::init(&obs_config).await?;

    info!("Starting loyalty-ledger...");
    info!(environment = %config.environment, "Configuration loaded");

    // 3. 初始化数据库连接并执行迁移
    let db = Database::connect(&config.database).await?;
    let pool = db.pool().clone();
    sqlx::migrate!("./migrations").run(&pool).await?;
    info!("Database connection established, migrations applied");

    // 4. 积分计划配置
    let program: Arc<dyn ProgramConfigSource> = match &config.ledger.program_config_path {
        Some(path) => {
            info!(path = %path, "Using file-backed program config");
            Arc::new(FileProgramConfig::new(path))
        }
        None => {
            info!("Using built-in default program config");
            Arc::new(StaticProgramConfig::default())
        }
    };
    // 启动时校验一次，配置错误尽早暴露
    program.load().await?;

    // 5. 创建账本
    let options = LedgerOptions::from(&config.ledger);
    let store = Arc::new(PgLoyaltyStore::new(pool.clone(), options.transaction_timeout));
    let ledger = Arc::new(PointsLedger::new(
        store,
        program,
        Arc::new(PgAuditRecorder::new(pool.clone())),
        Arc::new(LoggingTierNotifier),
        options,
    ));
    info!(
        transaction_timeout_ms = config.ledger.transaction_timeout_ms,
        "Points ledger initialized"
    );

    // 6. 启动过期 Worker，直到收到退出信号
    let worker = ExpireWorker::new(ledger, config.ledger.expire_poll_interval_secs);
    tokio::select! {
        _ = worker.run() => {}
        _ = shutdown_signal() => {}
    }

    db.close().await;
    info!("Service shutdown complete");
    Ok(())
}

/// 优雅关闭信号处理
///
/// 监听 Ctrl+C 和 SIGTERM 信号，用于 Kubernetes 优雅关闭
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                error!(error = %e, "Failed to install signal handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, starting graceful shutdown...");
        }
        _ = terminate => {
            info!("Received SIGTERM, starting graceful shutdown...");
        }
    }
}
