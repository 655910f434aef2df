//! # 总配置构建器模块
//!
//! 提供桥接层总配置的构建器实现，支持链式调用和严格验证

use crate::config::core::{DocBridgeConfig, MongoConnectionConfig, OffloadConfig, TransactionRetryConfig};
use crate::error::DocBridgeResult;
use rat_logger::info;

/// 总配置构建器
///
/// 应用名称、线程卸载配置与事务重试配置必须显式设置，连接配置可选。
#[derive(Debug)]
pub struct DocBridgeConfigBuilder {
    app_name: Option<String>,
    offload: Option<OffloadConfig>,
    transaction: Option<TransactionRetryConfig>,
    connection: Option<MongoConnectionConfig>,
}

impl DocBridgeConfigBuilder {
    /// 创建新的构建器
    pub fn new() -> Self {
        Self {
            app_name: None,
            offload: None,
            transaction: None,
            connection: None,
        }
    }

    /// 设置应用名称
    pub fn app_name<S: Into<String>>(mut self, app_name: S) -> Self {
        self.app_name = Some(app_name.into());
        self
    }

    /// 设置线程卸载配置
    pub fn offload(mut self, offload: OffloadConfig) -> Self {
        self.offload = Some(offload);
        self
    }

    /// 设置事务重试配置
    pub fn transaction(mut self, transaction: TransactionRetryConfig) -> Self {
        self.transaction = Some(transaction);
        self
    }

    /// 设置 MongoDB 连接配置
    pub fn connection(mut self, connection: MongoConnectionConfig) -> Self {
        self.connection = Some(connection);
        self
    }

    /// 构建总配置
    ///
    /// # 错误
    ///
    /// 必需的配置项未设置，或线程卸载并发上限为零时返回配置错误
    pub fn build(self) -> DocBridgeResult<DocBridgeConfig> {
        let app_name = self
            .app_name
            .ok_or_else(|| crate::quick_error!(config, "应用名称必须设置"))?;

        if app_name.trim().is_empty() {
            return Err(crate::quick_error!(config, "应用名称不能为空"));
        }

        let offload = self
            .offload
            .ok_or_else(|| crate::quick_error!(config, "线程卸载配置必须设置"))?;

        if offload.max_concurrency == Some(0) {
            return Err(crate::quick_error!(config, "max_concurrency 不能为零"));
        }

        let transaction = self
            .transaction
            .ok_or_else(|| crate::quick_error!(config, "事务重试配置必须设置"))?;

        info!(
            "创建桥接层配置: 应用={}, 并发上限={:?}, 重试窗口={}秒",
            app_name, offload.max_concurrency, transaction.retry_timeout_secs
        );

        Ok(DocBridgeConfig {
            app_name,
            offload,
            transaction,
            connection: self.connection,
        })
    }
}

impl Default for DocBridgeConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}
