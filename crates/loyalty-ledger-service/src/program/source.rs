//! 积分计划配置来源
//!
//! 账本每次操作都通过 `ProgramConfigSource::load` 获取最新配置，运营调整无需重启即可生效

use std::path::PathBuf;
use std::sync::Arc;

use arc_swap::ArcSwap;
use async_trait::async_trait;
use config::{Config, File};
use tracing::{debug, info};

use super::config::ProgramConfig;
use crate::error::{LoyaltyError, Result};

/// 积分计划配置来源
#[async_trait]
pub trait ProgramConfigSource: Send + Sync {
    /// 读取当前生效的配置
    async fn load(&self) -> Result<Arc<ProgramConfig>>;
}

/// 内存配置
///
/// 通过 `ArcSwap` 原子替换，下一次操作即可读到新配置
pub struct StaticProgramConfig {
    current: ArcSwap<ProgramConfig>,
}

impl StaticProgramConfig {
    pub fn new(config: ProgramConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            current: ArcSwap::from_pointee(config),
        })
    }

    /// 替换配置，校验失败时保留原配置
    pub fn update(&self, config: ProgramConfig) -> Result<()> {
        config.validate()?;
        self.current.store(Arc::new(config));
        info!("积分计划配置已更新");
        Ok(())
    }
}

impl Default for StaticProgramConfig {
    fn default() -> Self {
        Self {
            current: ArcSwap::from_pointee(ProgramConfig::default()),
        }
    }
}

#[async_trait]
impl ProgramConfigSource for StaticProgramConfig {
    async fn load(&self) -> Result<Arc<ProgramConfig>> {
        Ok(self.current.load_full())
    }
}

/// 文件配置
///
/// 每次 `load` 都重新读取文件（TOML/JSON/YAML 按扩展名识别），不做长期缓存
pub struct FileProgramConfig {
    path: PathBuf,
}

impl FileProgramConfig {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    fn read(path: PathBuf) -> Result<ProgramConfig> {
        let config: ProgramConfig = Config::builder()
            .add_source(File::from(path))
            .build()?
            .try_deserialize()?;
        config.validate()?;
        Ok(config)
    }
}

#[async_trait]
impl ProgramConfigSource for FileProgramConfig {
    async fn load(&self) -> Result<Arc<ProgramConfig>> {
        let path = self.path.clone();
        debug!(path = %path.display(), "读取积分计划配置");

        let config = tokio::task::spawn_blocking(move || Self::read(path))
            .await
            .map_err(|e| LoyaltyError::Internal(format!("读取配置任务失败: {}", e)))??;

        Ok(Arc::new(config))
    }
}
