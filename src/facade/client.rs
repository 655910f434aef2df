//! 客户端门面

use bson::Document;
use rat_logger::{debug, info};
use std::future::Future;

use super::{Database, delegate_wrapper, offload_with_session};
use crate::change_stream::{ChangeStream, WatchTarget};
use crate::config::{DocBridgeConfig, TransactionRetryConfig};
use crate::cursor::CommandCursor;
use crate::driver::{ClientDelegate, CursorDelegate, Driver, SessionDelegate};
use crate::error::DocBridgeResult;
use crate::offload::run_sync;
use crate::session::Session;
use crate::types::{ChangeStreamOptions, ConcernOptions, SessionOptions};

/// 客户端门面
pub struct Client<D: Driver> {
    delegate: D::Client,
    retry: TransactionRetryConfig,
}

delegate_wrapper!(Client, Client);

impl<D: Driver> Clone for Client<D> {
    fn clone(&self) -> Self {
        Self {
            delegate: self.delegate.clone(),
            retry: self.retry.clone(),
        }
    }
}

impl<D: Driver> Client<D> {
    /// 包装一个同步客户端，使用默认的事务重试窗口
    pub fn new(delegate: D::Client) -> Self {
        Self {
            delegate,
            retry: TransactionRetryConfig::default(),
        }
    }

    /// 按配置包装同步客户端，同时安装线程卸载并发上限
    pub fn with_config(delegate: D::Client, config: &DocBridgeConfig) -> DocBridgeResult<Self> {
        crate::offload::configure(&config.offload)?;
        info!("创建客户端门面: 应用={}", config.app_name);
        Ok(Self {
            delegate,
            retry: config.transaction.clone(),
        })
    }

    /// 派生使用另一组读写关注的客户端，未设置的项沿用当前值
    pub fn with_options(&self, options: ConcernOptions) -> Self {
        Self {
            delegate: self.delegate.with_options(&options),
            retry: self.retry.clone(),
        }
    }

    /// 当前生效的读写关注
    pub fn concern_options(&self) -> ConcernOptions {
        self.delegate.concern_options()
    }

    /// 事务重试配置
    pub fn transaction_retry(&self) -> &TransactionRetryConfig {
        &self.retry
    }

    /// 获取数据库门面，不检查数据库是否存在
    pub fn database(&self, name: &str) -> Database<D> {
        Database::new(self.delegate.database(name), self.clone())
    }

    /// 连接串中指定的默认数据库
    pub fn default_database(&self) -> Option<Database<D>> {
        self.delegate
            .default_database()
            .map(|database| Database::new(database, self.clone()))
    }

    pub async fn list_database_names(&self, session: Option<&Session<D>>) -> DocBridgeResult<Vec<String>> {
        let client = self.delegate.clone();
        offload_with_session(session, move |session| client.list_database_names(session)).await
    }

    /// listDatabases，返回立即命令游标
    pub async fn list_databases(&self, session: Option<&Session<D>>) -> DocBridgeResult<CommandCursor<D>> {
        let client = self.delegate.clone();
        let (cursor, alive) = offload_with_session(session, move |session| {
            let cursor = client.list_databases(session)?;
            let alive = cursor.is_alive();
            Ok((cursor, alive))
        })
        .await?;
        Ok(CommandCursor::eager(cursor, alive, None, session.cloned()))
    }

    pub async fn drop_database(&self, name: &str, session: Option<&Session<D>>) -> DocBridgeResult<()> {
        let client = self.delegate.clone();
        let name = name.to_string();
        offload_with_session(session, move |session| client.drop_database(&name, session)).await
    }

    /// 服务器信息（buildInfo）
    pub async fn server_info(&self) -> DocBridgeResult<Document> {
        let client = self.delegate.clone();
        run_sync(move || client.server_info()).await
    }

    /// 开启会话
    pub async fn start_session(&self, options: Option<SessionOptions>) -> DocBridgeResult<Session<D>> {
        let client = self.delegate.clone();
        let options = options.unwrap_or_default();
        let (delegate, id) = run_sync(move || {
            let session = client.start_session(&options)?;
            let id = session.id();
            Ok::<_, crate::error::ProviderError>((session, id))
        })
        .await?;
        debug!("会话已开启: {}", id);
        Ok(Session::new(self.clone(), delegate, id))
    }

    /// 作用域会话：开启会话并运行 `body`，结束时恰好结束会话一次
    ///
    /// `body` 出错时返回 `body` 的错误；`body` 成功而结束会话失败时返回结束会话的错误。
    pub async fn with_session<T, F, Fut>(&self, options: Option<SessionOptions>, body: F) -> DocBridgeResult<T>
    where
        F: FnOnce(Session<D>) -> Fut,
        Fut: Future<Output = DocBridgeResult<T>>,
    {
        let session = self.start_session(options).await?;
        let result = body(session.clone()).await;
        let ended = session.end_session().await;
        match result {
            Ok(value) => ended.map(|_| value),
            Err(err) => Err(err),
        }
    }

    /// 集群级变更流，首次轮询时才打开
    pub fn watch(&self, options: Option<ChangeStreamOptions>) -> ChangeStream<D> {
        ChangeStream::new(WatchTarget::Client(self.delegate.clone()), options.unwrap_or_default())
    }

    /// 关闭客户端
    pub async fn close(&self) -> DocBridgeResult<()> {
        let client = self.delegate.clone();
        run_sync(move || client.close()).await
    }
}

#[cfg(feature = "mongodb-support")]
impl Client<crate::driver::mongo::MongoDriver> {
    /// 按连接配置连接 MongoDB
    pub async fn connect(config: &crate::config::MongoConnectionConfig) -> DocBridgeResult<Self> {
        Self::connect_uri(&config.to_uri()).await
    }

    /// 按连接串连接 MongoDB
    pub async fn connect_uri(uri: &str) -> DocBridgeResult<Self> {
        let uri = uri.to_string();
        let delegate = run_sync(move || crate::driver::mongo::MongoClient::with_uri_str(&uri)).await?;
        info!("MongoDB 客户端已创建");
        Ok(Self::new(delegate))
    }
}
