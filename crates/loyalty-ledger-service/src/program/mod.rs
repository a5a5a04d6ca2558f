//! 积分计划配置模块

mod config;
mod source;

pub use config::{BonusKind, ProgramConfig, TierBenefit, TierThreshold};
pub use source::{FileProgramConfig, ProgramConfigSource, StaticProgramConfig};
