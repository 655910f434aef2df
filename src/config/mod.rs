//! # 配置管理模块
//!
//! 提供统一的配置管理系统，支持构建器模式和链式配置
//! 构建器要求所有必需配置项显式设置

pub mod builders;
pub mod core;

pub use builders::{DocBridgeConfigBuilder, MongoUriBuilder};
pub use core::{
    DEFAULT_RETRY_TIMEOUT_SECS, DocBridgeConfig, MongoConnectionConfig, OffloadConfig, TransactionRetryConfig,
};
