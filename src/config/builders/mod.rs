//! # 配置构建器模块

pub mod app_builder;
pub mod connection_builder;

pub use app_builder::DocBridgeConfigBuilder;
pub use connection_builder::MongoUriBuilder;
