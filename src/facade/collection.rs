//! 集合门面

use bson::{Bson, Document, doc};

use super::{Database, DelegateWrapper, delegate_wrapper, offload_with_session};
use crate::change_stream::{ChangeStream, WatchTarget};
use crate::cursor::{AggregateTarget, CommandCursor, Cursor, PendingCommand};
use crate::driver::{CollectionDelegate, CursorDelegate, DatabaseDelegate, Driver};
use crate::error::DocBridgeResult;
use crate::offload::run_sync;
use crate::session::Session;
use crate::types::*;

/// 集合门面
pub struct Collection<D: Driver> {
    delegate: D::Collection,
    database: Database<D>,
}

delegate_wrapper!(Collection, Collection);

impl<D: Driver> Clone for Collection<D> {
    fn clone(&self) -> Self {
        Self {
            delegate: self.delegate.clone(),
            database: self.database.clone(),
        }
    }
}

impl<D: Driver> Collection<D> {
    pub(crate) fn new(delegate: D::Collection, database: Database<D>) -> Self {
        Self { delegate, database }
    }

    pub fn name(&self) -> &str {
        self.delegate.name()
    }

    /// `数据库名.集合名`
    pub fn full_name(&self) -> String {
        format!("{}.{}", self.delegate.database_name(), self.delegate.name())
    }

    pub fn database(&self) -> &Database<D> {
        &self.database
    }

    /// 派生使用另一组读写关注的集合门面，未设置的项沿用当前值
    pub fn with_options(&self, options: ConcernOptions) -> Self {
        Self::new(self.delegate.with_options(&options), self.database.clone())
    }

    /// 当前生效的读写关注
    pub fn concern_options(&self) -> ConcernOptions {
        self.delegate.concern_options()
    }

    // ---------------------------------------------------------------- 读取

    /// 查询，返回查询游标；查询在第一次取数据时才发出
    pub fn find(&self, filter: Option<Document>, options: Option<FindOptions>, session: Option<&Session<D>>) -> Cursor<D> {
        Cursor::new(self.clone(), filter, options.unwrap_or_default(), session.cloned())
    }

    pub async fn find_one(
        &self,
        filter: Option<Document>,
        options: Option<FindOptions>,
        session: Option<&Session<D>>,
    ) -> DocBridgeResult<Option<Document>> {
        let collection = self.delegate.clone();
        let options = options.unwrap_or_default();
        offload_with_session(session, move |session| collection.find_one(filter, &options, session)).await
    }

    pub async fn count_documents(&self, filter: Option<Document>, session: Option<&Session<D>>) -> DocBridgeResult<u64> {
        let collection = self.delegate.clone();
        offload_with_session(session, move |session| collection.count_documents(filter, session)).await
    }

    /// 基于集合元数据的估算条数
    pub async fn estimated_document_count(&self) -> DocBridgeResult<u64> {
        let collection = self.delegate.clone();
        run_sync(move || collection.estimated_document_count()).await
    }

    pub async fn distinct(
        &self,
        field: &str,
        filter: Option<Document>,
        session: Option<&Session<D>>,
    ) -> DocBridgeResult<Vec<Bson>> {
        let collection = self.delegate.clone();
        let field = field.to_string();
        offload_with_session(session, move |session| collection.distinct(&field, filter, session)).await
    }

    /// 集合级聚合，返回延迟命令游标
    pub fn aggregate(
        &self,
        pipeline: Vec<Document>,
        options: Option<AggregateOptions>,
        session: Option<&Session<D>>,
    ) -> CommandCursor<D> {
        let command = PendingCommand::Aggregate {
            target: AggregateTarget::Collection(self.delegate.clone()),
            pipeline,
            options: options.unwrap_or_default(),
        };
        CommandCursor::latent(command, Some(self.clone()), session.cloned())
    }

    // ---------------------------------------------------------------- 写入

    pub async fn insert_one(&self, document: Document, session: Option<&Session<D>>) -> DocBridgeResult<InsertOneResult> {
        let collection = self.delegate.clone();
        offload_with_session(session, move |session| collection.insert_one(document, session)).await
    }

    pub async fn insert_many(
        &self,
        documents: Vec<Document>,
        session: Option<&Session<D>>,
    ) -> DocBridgeResult<InsertManyResult> {
        let collection = self.delegate.clone();
        offload_with_session(session, move |session| collection.insert_many(documents, session)).await
    }

    pub async fn update_one(
        &self,
        filter: Document,
        update: Document,
        options: Option<UpdateOptions>,
        session: Option<&Session<D>>,
    ) -> DocBridgeResult<UpdateResult> {
        let collection = self.delegate.clone();
        let options = options.unwrap_or_default();
        offload_with_session(session, move |session| collection.update_one(filter, update, &options, session)).await
    }

    pub async fn update_many(
        &self,
        filter: Document,
        update: Document,
        options: Option<UpdateOptions>,
        session: Option<&Session<D>>,
    ) -> DocBridgeResult<UpdateResult> {
        let collection = self.delegate.clone();
        let options = options.unwrap_or_default();
        offload_with_session(session, move |session| collection.update_many(filter, update, &options, session)).await
    }

    pub async fn replace_one(
        &self,
        filter: Document,
        replacement: Document,
        options: Option<UpdateOptions>,
        session: Option<&Session<D>>,
    ) -> DocBridgeResult<UpdateResult> {
        let collection = self.delegate.clone();
        let options = options.unwrap_or_default();
        offload_with_session(session, move |session| {
            collection.replace_one(filter, replacement, &options, session)
        })
        .await
    }

    pub async fn delete_one(&self, filter: Document, session: Option<&Session<D>>) -> DocBridgeResult<DeleteResult> {
        let collection = self.delegate.clone();
        offload_with_session(session, move |session| collection.delete_one(filter, session)).await
    }

    pub async fn delete_many(&self, filter: Document, session: Option<&Session<D>>) -> DocBridgeResult<DeleteResult> {
        let collection = self.delegate.clone();
        offload_with_session(session, move |session| collection.delete_many(filter, session)).await
    }

    pub async fn find_one_and_update(
        &self,
        filter: Document,
        update: Document,
        options: Option<FindOneAndUpdateOptions>,
        session: Option<&Session<D>>,
    ) -> DocBridgeResult<Option<Document>> {
        let collection = self.delegate.clone();
        let options = options.unwrap_or_default();
        offload_with_session(session, move |session| {
            collection.find_one_and_update(filter, update, &options, session)
        })
        .await
    }

    /// 替换一个文档并返回替换前或替换后的版本
    pub async fn find_one_and_replace(
        &self,
        filter: Document,
        replacement: Document,
        options: Option<FindOneAndReplaceOptions>,
        session: Option<&Session<D>>,
    ) -> DocBridgeResult<Option<Document>> {
        let collection = self.delegate.clone();
        let options = options.unwrap_or_default();
        offload_with_session(session, move |session| {
            collection.find_one_and_replace(filter, replacement, &options, session)
        })
        .await
    }

    pub async fn find_one_and_delete(
        &self,
        filter: Document,
        session: Option<&Session<D>>,
    ) -> DocBridgeResult<Option<Document>> {
        let collection = self.delegate.clone();
        offload_with_session(session, move |session| collection.find_one_and_delete(filter, session)).await
    }

    // ---------------------------------------------------------------- 索引与管理

    /// 列出索引，返回延迟命令游标
    pub fn list_indexes(&self, session: Option<&Session<D>>) -> CommandCursor<D> {
        let command = PendingCommand::ListIndexes {
            collection: self.delegate.clone(),
            batch_size: None,
        };
        CommandCursor::latent(command, Some(self.clone()), session.cloned())
    }

    /// 创建索引，返回索引名
    pub async fn create_index(
        &self,
        keys: Document,
        options: Option<IndexOptions>,
        session: Option<&Session<D>>,
    ) -> DocBridgeResult<String> {
        let collection = self.delegate.clone();
        let options = options.unwrap_or_default();
        offload_with_session(session, move |session| collection.create_index(keys, &options, session)).await
    }

    /// 一次创建多个索引，按输入顺序返回索引名
    pub async fn create_indexes(
        &self,
        models: Vec<IndexModel>,
        session: Option<&Session<D>>,
    ) -> DocBridgeResult<Vec<String>> {
        let collection = self.delegate.clone();
        offload_with_session(session, move |session| collection.create_indexes(models, session)).await
    }

    /// 索引名到索引定义的映射，定义中去掉了 `name` 与 `v` 字段
    ///
    /// listIndexes 游标在同一次卸载里取完。
    pub async fn index_information(&self, session: Option<&Session<D>>) -> DocBridgeResult<Document> {
        let collection = self.delegate.clone();
        offload_with_session(session, move |mut session| {
            let mut cursor = collection.list_indexes(None, session.as_deref_mut())?;
            let mut info = Document::new();
            loop {
                for mut index in cursor.next_batch(session.as_deref_mut())? {
                    let Ok(name) = index.get_str("name").map(str::to_string) else {
                        continue;
                    };
                    index.remove("name");
                    index.remove("v");
                    info.insert(name, index);
                }
                if !cursor.is_alive() {
                    break;
                }
            }
            Ok(info)
        })
        .await
    }

    /// listCollections 中本集合的 `options` 字段；集合不存在时为空文档
    pub async fn options(&self, session: Option<&Session<D>>) -> DocBridgeResult<Document> {
        let database = DelegateWrapper::delegate(&self.database).clone();
        let name = self.name().to_string();
        offload_with_session(session, move |mut session| {
            let mut cursor = database.list_collections(Some(doc! { "name": name.as_str() }), session.as_deref_mut())?;
            loop {
                let batch = cursor.next_batch(session.as_deref_mut())?;
                let found = batch
                    .into_iter()
                    .find(|info| info.get_str("name").ok() == Some(name.as_str()));
                if let Some(info) = found {
                    return Ok(info.get_document("options").cloned().unwrap_or_default());
                }
                if !cursor.is_alive() {
                    return Ok(Document::new());
                }
            }
        })
        .await
    }

    /// 在同一数据库内重命名集合，返回新名字的集合门面
    pub async fn rename(
        &self,
        new_name: &str,
        drop_target: bool,
        session: Option<&Session<D>>,
    ) -> DocBridgeResult<Collection<D>> {
        let collection = self.delegate.clone();
        let target = new_name.to_string();
        offload_with_session(session, move |session| collection.rename(&target, drop_target, session)).await?;
        Ok(Self::new(self.delegate_for(new_name), self.database.clone()))
    }

    fn delegate_for(&self, name: &str) -> D::Collection {
        DelegateWrapper::delegate(&self.database)
            .collection(name)
            .with_options(&self.delegate.concern_options())
    }

    pub async fn drop_index(&self, name: &str, session: Option<&Session<D>>) -> DocBridgeResult<()> {
        let collection = self.delegate.clone();
        let name = name.to_string();
        offload_with_session(session, move |session| collection.drop_index(&name, session)).await
    }

    pub async fn drop_indexes(&self, session: Option<&Session<D>>) -> DocBridgeResult<()> {
        let collection = self.delegate.clone();
        offload_with_session(session, move |session| collection.drop_indexes(session)).await
    }

    pub async fn drop(&self, session: Option<&Session<D>>) -> DocBridgeResult<()> {
        let collection = self.delegate.clone();
        offload_with_session(session, move |session| collection.drop(session)).await
    }

    /// 集合级变更流
    pub fn watch(&self, options: Option<ChangeStreamOptions>) -> ChangeStream<D> {
        ChangeStream::new(WatchTarget::Collection(self.delegate.clone()), options.unwrap_or_default())
    }
}
