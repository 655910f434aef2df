//! # MongoDB 连接配置构建器模块

use crate::config::core::MongoConnectionConfig;
use crate::error::DocBridgeResult;
use std::collections::BTreeMap;

/// MongoDB 连接构建器
#[derive(Debug)]
pub struct MongoUriBuilder {
    host: Option<String>,
    port: Option<u16>,
    database: Option<String>,
    username: Option<String>,
    password: Option<String>,
    auth_source: Option<String>,
    direct_connection: bool,
    replica_set: Option<String>,
    options: BTreeMap<String, String>,
}

impl MongoUriBuilder {
    pub fn new() -> Self {
        Self {
            host: None,
            port: None,
            database: None,
            username: None,
            password: None,
            auth_source: None,
            direct_connection: false,
            replica_set: None,
            options: BTreeMap::new(),
        }
    }

    pub fn host<H: Into<String>>(mut self, host: H) -> Self {
        self.host = Some(host.into());
        self
    }

    pub fn port(mut self, port: u16) -> Self {
        self.port = Some(port);
        self
    }

    pub fn database<D: Into<String>>(mut self, database: D) -> Self {
        self.database = Some(database.into());
        self
    }

    /// 设置用户名和密码
    pub fn with_auth<U: Into<String>, P: Into<String>>(mut self, username: U, password: P) -> Self {
        self.username = Some(username.into());
        self.password = Some(password.into());
        self
    }

    /// 设置认证数据库
    pub fn with_auth_source<A: Into<String>>(mut self, auth_source: A) -> Self {
        self.auth_source = Some(auth_source.into());
        self
    }

    /// 启用直接连接
    pub fn with_direct_connection(mut self, direct: bool) -> Self {
        self.direct_connection = direct;
        self
    }

    pub fn with_replica_set<R: Into<String>>(mut self, replica_set: R) -> Self {
        self.replica_set = Some(replica_set.into());
        self
    }

    /// 添加自定义选项
    pub fn with_option<K: Into<String>, V: Into<String>>(mut self, key: K, value: V) -> Self {
        self.options.insert(key.into(), value.into());
        self
    }

    /// 构建连接配置
    pub fn build(self) -> DocBridgeResult<MongoConnectionConfig> {
        let host = self
            .host
            .ok_or_else(|| crate::quick_error!(config, "MongoDB 主机地址必须设置"))?;
        let port = self
            .port
            .ok_or_else(|| crate::quick_error!(config, "MongoDB 端口必须设置"))?;
        let database = self
            .database
            .ok_or_else(|| crate::quick_error!(config, "MongoDB 数据库名必须设置"))?;

        if self.username.is_some() != self.password.is_some() {
            return Err(crate::quick_error!(config, "用户名和密码必须同时设置"));
        }

        Ok(MongoConnectionConfig {
            host,
            port,
            database,
            username: self.username,
            password: self.password,
            auth_source: self.auth_source,
            direct_connection: self.direct_connection,
            replica_set: self.replica_set,
            options: self.options,
        })
    }

    /// 直接生成连接串
    pub fn build_uri(self) -> DocBridgeResult<String> {
        Ok(self.build()?.to_uri())
    }
}

impl Default for MongoUriBuilder {
    fn default() -> Self {
        Self::new()
    }
}
