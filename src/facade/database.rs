//! 数据库门面

use bson::Document;

use super::{Client, Collection, delegate_wrapper, offload_with_session};
use crate::change_stream::{ChangeStream, WatchTarget};
use crate::cursor::{AggregateTarget, CommandCursor, PendingCommand};
use crate::driver::{CollectionDelegate, CursorDelegate, DatabaseDelegate, Driver};
use crate::error::DocBridgeResult;
use crate::session::Session;
use crate::types::{AggregateOptions, ChangeStreamOptions, ConcernOptions};

/// 数据库门面
pub struct Database<D: Driver> {
    delegate: D::Database,
    client: Client<D>,
}

delegate_wrapper!(Database, Database);

impl<D: Driver> Clone for Database<D> {
    fn clone(&self) -> Self {
        Self {
            delegate: self.delegate.clone(),
            client: self.client.clone(),
        }
    }
}

impl<D: Driver> Database<D> {
    pub(crate) fn new(delegate: D::Database, client: Client<D>) -> Self {
        Self { delegate, client }
    }

    pub fn name(&self) -> &str {
        self.delegate.name()
    }

    pub fn client(&self) -> &Client<D> {
        &self.client
    }

    /// 派生使用另一组读写关注的数据库门面，未设置的项沿用当前值
    pub fn with_options(&self, options: ConcernOptions) -> Self {
        Self::new(self.delegate.with_options(&options), self.client.clone())
    }

    /// 当前生效的读写关注
    pub fn concern_options(&self) -> ConcernOptions {
        self.delegate.concern_options()
    }

    /// 获取集合门面，不检查集合是否存在
    pub fn collection(&self, name: &str) -> Collection<D> {
        Collection::new(self.delegate.collection(name), self.clone())
    }

    /// 执行数据库命令，返回原始回复
    pub async fn command(&self, command: Document, session: Option<&Session<D>>) -> DocBridgeResult<Document> {
        let database = self.delegate.clone();
        offload_with_session(session, move |session| database.run_command(command, session)).await
    }

    pub async fn list_collection_names(
        &self,
        filter: Option<Document>,
        session: Option<&Session<D>>,
    ) -> DocBridgeResult<Vec<String>> {
        let database = self.delegate.clone();
        offload_with_session(session, move |session| database.list_collection_names(filter, session)).await
    }

    /// listCollections，返回立即命令游标
    pub async fn list_collections(
        &self,
        filter: Option<Document>,
        session: Option<&Session<D>>,
    ) -> DocBridgeResult<CommandCursor<D>> {
        let database = self.delegate.clone();
        let (cursor, alive) = offload_with_session(session, move |session| {
            let cursor = database.list_collections(filter, session)?;
            let alive = cursor.is_alive();
            Ok((cursor, alive))
        })
        .await?;
        Ok(CommandCursor::eager(cursor, alive, None, session.cloned()))
    }

    /// 显式创建集合，返回其门面
    pub async fn create_collection(&self, name: &str, session: Option<&Session<D>>) -> DocBridgeResult<Collection<D>> {
        let database = self.delegate.clone();
        let owned = name.to_string();
        offload_with_session(session, move |session| database.create_collection(&owned, session)).await?;
        Ok(self.collection(name))
    }

    pub async fn drop_collection(&self, name: &str, session: Option<&Session<D>>) -> DocBridgeResult<()> {
        let collection = self.delegate.collection(name);
        offload_with_session(session, move |session| collection.drop(session)).await
    }

    /// 删除整个数据库
    pub async fn drop(&self, session: Option<&Session<D>>) -> DocBridgeResult<()> {
        let database = self.delegate.clone();
        offload_with_session(session, move |session| database.drop(session)).await
    }

    /// 数据库级聚合，返回延迟命令游标
    pub fn aggregate(
        &self,
        pipeline: Vec<Document>,
        options: Option<AggregateOptions>,
        session: Option<&Session<D>>,
    ) -> CommandCursor<D> {
        let command = PendingCommand::Aggregate {
            target: AggregateTarget::Database(self.delegate.clone()),
            pipeline,
            options: options.unwrap_or_default(),
        };
        CommandCursor::latent(command, None, session.cloned())
    }

    /// 数据库级变更流
    pub fn watch(&self, options: Option<ChangeStreamOptions>) -> ChangeStream<D> {
        ChangeStream::new(WatchTarget::Database(self.delegate.clone()), options.unwrap_or_default())
    }
}
