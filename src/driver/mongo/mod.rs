//! MongoDB 驱动
//!
//! 基于 `mongodb::sync` 的同步委托实现。所有方法都会阻塞当前线程，只能经由卸载原语调用。

mod convert;
mod cursor;
mod session;

use ::mongodb::sync;
use bson::{Bson, Document, doc};
use rat_logger::{debug, info};
use std::sync::Arc;

use crate::driver::{ChangeStreamDelegate, ClientDelegate, CollectionDelegate, DatabaseDelegate, Driver};
use crate::error::{DriverResult, ProviderError};
use crate::types::*;

pub use cursor::MongoCursor;
pub use session::MongoSession;

use convert::*;

/// MongoDB 驱动
#[derive(Debug, Clone, Copy, Default)]
pub struct MongoDriver;

impl Driver for MongoDriver {
    type Client = MongoClient;
    type Database = MongoDatabase;
    type Collection = MongoCollection;
    type Cursor = MongoCursor;
    type Session = MongoSession;
    type ChangeStream = MongoChangeStream;

    // 同步驱动的可追加游标在 getMore 上无限等待
    const TAILABLE_CURSORS: bool = false;
}

/// 在有会话时调用 `_with_session` 版本，否则调用普通版本
macro_rules! with_session {
    ($session:expr, |$s:ident| $with:expr, $without:expr) => {
        match $session {
            Some(wrapper) => {
                let $s = wrapper.usable()?;
                $with
            }
            None => $without,
        }
    };
}

/// 从命令返回的 `cursor.firstBatch` 中取出文档
fn first_batch(reply: &Document) -> DriverResult<Vec<Document>> {
    let batch = reply
        .get_document("cursor")
        .and_then(|cursor| cursor.get_array("firstBatch"))
        .map_err(|e| ProviderError::new(format!("malformed cursor reply: {}", e)))?;
    Ok(batch
        .iter()
        .filter_map(|item| match item {
            Bson::Document(document) => Some(document.clone()),
            _ => None,
        })
        .collect())
}

/// MongoDB 客户端
///
/// 驱动客户端本身不可比较，用共享的标识判断两个委托是否指向同一个客户端。
#[derive(Clone)]
pub struct MongoClient {
    inner: sync::Client,
    concern: ConcernOptions,
    identity: Arc<()>,
}

impl MongoClient {
    /// 按连接串创建客户端
    pub fn with_uri_str(uri: &str) -> DriverResult<Self> {
        let inner = sync::Client::with_uri_str(uri).map_err(provider_error)?;
        info!("MongoDB 客户端已创建");
        Ok(Self::from_client(inner))
    }

    pub fn from_client(inner: sync::Client) -> Self {
        Self {
            inner,
            concern: ConcernOptions::default(),
            identity: Arc::new(()),
        }
    }

    pub fn inner(&self) -> &sync::Client {
        &self.inner
    }
}

impl std::fmt::Debug for MongoClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MongoClient")
            .field("identity", &Arc::as_ptr(&self.identity))
            .finish()
    }
}

impl PartialEq for MongoClient {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.identity, &other.identity)
    }
}

impl ClientDelegate<MongoDriver> for MongoClient {
    fn database(&self, name: &str) -> MongoDatabase {
        MongoDatabase {
            inner: self.inner.database_with_options(name, database_options(&self.concern)),
            client: self.inner.clone(),
            concern: self.concern.clone(),
            identity: self.identity.clone(),
        }
    }

    fn default_database(&self) -> Option<MongoDatabase> {
        let name = self.inner.default_database()?.name().to_string();
        Some(self.database(&name))
    }

    fn with_options(&self, options: &ConcernOptions) -> Self {
        Self {
            inner: self.inner.clone(),
            concern: self.concern.merged(options),
            identity: self.identity.clone(),
        }
    }

    fn concern_options(&self) -> ConcernOptions {
        self.concern.clone()
    }

    fn list_database_names(&self, session: Option<&mut MongoSession>) -> DriverResult<Vec<String>> {
        with_session!(
            session,
            |s| self.inner.list_database_names_with_session(None, None, s),
            self.inner.list_database_names(None, None)
        )
        .map_err(provider_error)
    }

    fn list_databases(&self, session: Option<&mut MongoSession>) -> DriverResult<MongoCursor> {
        let reply = self.database("admin").run_command(doc! { "listDatabases": 1 }, session)?;
        let databases = reply
            .get_array("databases")
            .map_err(|e| ProviderError::new(format!("malformed listDatabases reply: {}", e)))?
            .iter()
            .filter_map(|item| item.as_document().cloned())
            .collect();
        Ok(MongoCursor::from_documents(databases))
    }

    fn drop_database(&self, name: &str, session: Option<&mut MongoSession>) -> DriverResult<()> {
        self.database(name).drop(session)
    }

    fn server_info(&self) -> DriverResult<Document> {
        self.database("admin").run_command(doc! { "buildInfo": 1 }, None)
    }

    fn start_session(&self, options: &SessionOptions) -> DriverResult<MongoSession> {
        let session = self
            .inner
            .start_session(Some(session_options(options)))
            .map_err(provider_error)?;
        Ok(MongoSession::new(session))
    }

    fn watch(&self, options: &ChangeStreamOptions) -> DriverResult<MongoChangeStream> {
        let stream = self
            .inner
            .watch(options.pipeline.clone(), Some(change_stream_options(options)?))
            .map_err(provider_error)?;
        Ok(MongoChangeStream::new(stream.with_type::<Document>()))
    }

    fn close(&self) -> DriverResult<()> {
        // 同步客户端在最后一个克隆被释放时关闭连接池
        debug!("MongoDB 客户端关闭请求");
        Ok(())
    }
}

/// MongoDB 数据库
#[derive(Clone)]
pub struct MongoDatabase {
    inner: sync::Database,
    client: sync::Client,
    concern: ConcernOptions,
    identity: Arc<()>,
}

impl std::fmt::Debug for MongoDatabase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MongoDatabase").field("name", &self.inner.name()).finish()
    }
}

impl PartialEq for MongoDatabase {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.identity, &other.identity) && self.inner.name() == other.inner.name()
    }
}

impl DatabaseDelegate<MongoDriver> for MongoDatabase {
    fn name(&self) -> &str {
        self.inner.name()
    }

    fn collection(&self, name: &str) -> MongoCollection {
        MongoCollection {
            inner: self
                .inner
                .collection_with_options::<Document>(name, collection_options(&self.concern)),
            database: self.inner.clone(),
            client: self.client.clone(),
            concern: self.concern.clone(),
            identity: self.identity.clone(),
        }
    }

    fn with_options(&self, options: &ConcernOptions) -> Self {
        let concern = self.concern.merged(options);
        Self {
            inner: self
                .client
                .database_with_options(self.inner.name(), database_options(&concern)),
            client: self.client.clone(),
            concern,
            identity: self.identity.clone(),
        }
    }

    fn concern_options(&self) -> ConcernOptions {
        self.concern.clone()
    }

    fn run_command(&self, command: Document, session: Option<&mut MongoSession>) -> DriverResult<Document> {
        with_session!(
            session,
            |s| self.inner.run_command_with_session(command, None, s),
            self.inner.run_command(command, None)
        )
        .map_err(provider_error)
    }

    fn list_collection_names(
        &self,
        filter: Option<Document>,
        session: Option<&mut MongoSession>,
    ) -> DriverResult<Vec<String>> {
        let infos = first_batch(&self.run_command(
            doc! { "listCollections": 1, "nameOnly": true, "filter": filter.unwrap_or_default() },
            session,
        )?)?;
        Ok(infos
            .iter()
            .filter_map(|info| info.get_str("name").ok().map(str::to_string))
            .collect())
    }

    fn list_collections(
        &self,
        filter: Option<Document>,
        session: Option<&mut MongoSession>,
    ) -> DriverResult<MongoCursor> {
        let reply = self.run_command(
            doc! { "listCollections": 1, "filter": filter.unwrap_or_default() },
            session,
        )?;
        Ok(MongoCursor::from_documents(first_batch(&reply)?))
    }

    fn create_collection(&self, name: &str, session: Option<&mut MongoSession>) -> DriverResult<()> {
        with_session!(
            session,
            |s| self.inner.create_collection_with_session(name, None, s),
            self.inner.create_collection(name, None)
        )
        .map_err(provider_error)
    }

    fn drop(&self, session: Option<&mut MongoSession>) -> DriverResult<()> {
        with_session!(
            session,
            |s| self.inner.drop_with_session(None, s),
            self.inner.drop(None)
        )
        .map_err(provider_error)
    }

    fn aggregate(
        &self,
        pipeline: Vec<Document>,
        options: &AggregateOptions,
        session: Option<&mut MongoSession>,
    ) -> DriverResult<MongoCursor> {
        let mongo_options = aggregate_options(options);
        match session {
            Some(wrapper) => {
                let s = wrapper.usable()?;
                let cursor = self
                    .inner
                    .aggregate_with_session(pipeline, mongo_options, s)
                    .map_err(provider_error)?;
                Ok(MongoCursor::with_session(cursor, options.batch_size))
            }
            None => {
                let cursor = self.inner.aggregate(pipeline, mongo_options).map_err(provider_error)?;
                Ok(MongoCursor::plain(cursor, options.batch_size))
            }
        }
    }

    fn watch(&self, options: &ChangeStreamOptions) -> DriverResult<MongoChangeStream> {
        let stream = self
            .inner
            .watch(options.pipeline.clone(), Some(change_stream_options(options)?))
            .map_err(provider_error)?;
        Ok(MongoChangeStream::new(stream.with_type::<Document>()))
    }
}

/// MongoDB 集合
#[derive(Clone)]
pub struct MongoCollection {
    inner: sync::Collection<Document>,
    database: sync::Database,
    client: sync::Client,
    concern: ConcernOptions,
    identity: Arc<()>,
}

impl std::fmt::Debug for MongoCollection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MongoCollection")
            .field("namespace", &self.inner.namespace().to_string())
            .finish()
    }
}

impl PartialEq for MongoCollection {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.identity, &other.identity) && self.inner.namespace() == other.inner.namespace()
    }
}

impl CollectionDelegate<MongoDriver> for MongoCollection {
    fn name(&self) -> &str {
        self.inner.name()
    }

    fn database_name(&self) -> &str {
        self.database.name()
    }

    fn with_options(&self, options: &ConcernOptions) -> Self {
        let concern = self.concern.merged(options);
        Self {
            inner: self
                .database
                .collection_with_options::<Document>(self.inner.name(), collection_options(&concern)),
            database: self.database.clone(),
            client: self.client.clone(),
            concern,
            identity: self.identity.clone(),
        }
    }

    fn concern_options(&self) -> ConcernOptions {
        self.concern.clone()
    }

    fn find(
        &self,
        filter: Option<Document>,
        options: &FindOptions,
        session: Option<&mut MongoSession>,
    ) -> DriverResult<MongoCursor> {
        let mongo_options = checked_find_options(options)?;
        match session {
            Some(wrapper) => {
                let s = wrapper.usable()?;
                let cursor = self
                    .inner
                    .find_with_session(filter, mongo_options, s)
                    .map_err(provider_error)?;
                Ok(MongoCursor::with_session(cursor, options.batch_size))
            }
            None => {
                let cursor = self.inner.find(filter, mongo_options).map_err(provider_error)?;
                Ok(MongoCursor::plain(cursor, options.batch_size))
            }
        }
    }

    fn find_one(
        &self,
        filter: Option<Document>,
        options: &FindOptions,
        session: Option<&mut MongoSession>,
    ) -> DriverResult<Option<Document>> {
        let mongo_options = find_one_options(options);
        with_session!(
            session,
            |s| self.inner.find_one_with_session(filter, mongo_options, s),
            self.inner.find_one(filter, mongo_options)
        )
        .map_err(provider_error)
    }

    fn insert_one(&self, document: Document, session: Option<&mut MongoSession>) -> DriverResult<InsertOneResult> {
        let result = with_session!(
            session,
            |s| self.inner.insert_one_with_session(document, None, s),
            self.inner.insert_one(document, None)
        )
        .map_err(provider_error)?;
        Ok(InsertOneResult {
            inserted_id: result.inserted_id,
        })
    }

    fn insert_many(
        &self,
        documents: Vec<Document>,
        session: Option<&mut MongoSession>,
    ) -> DriverResult<InsertManyResult> {
        let result = with_session!(
            session,
            |s| self.inner.insert_many_with_session(documents, None, s),
            self.inner.insert_many(documents, None)
        )
        .map_err(provider_error)?;
        Ok(InsertManyResult {
            inserted_ids: result.inserted_ids.into_iter().collect(),
        })
    }

    fn update_one(
        &self,
        filter: Document,
        update: Document,
        options: &UpdateOptions,
        session: Option<&mut MongoSession>,
    ) -> DriverResult<UpdateResult> {
        let mongo_options = update_options(options);
        let result = with_session!(
            session,
            |s| self.inner.update_one_with_session(filter, update, mongo_options, s),
            self.inner.update_one(filter, update, mongo_options)
        )
        .map_err(provider_error)?;
        Ok(update_result(result))
    }

    fn update_many(
        &self,
        filter: Document,
        update: Document,
        options: &UpdateOptions,
        session: Option<&mut MongoSession>,
    ) -> DriverResult<UpdateResult> {
        let mongo_options = update_options(options);
        let result = with_session!(
            session,
            |s| self.inner.update_many_with_session(filter, update, mongo_options, s),
            self.inner.update_many(filter, update, mongo_options)
        )
        .map_err(provider_error)?;
        Ok(update_result(result))
    }

    fn replace_one(
        &self,
        filter: Document,
        replacement: Document,
        options: &UpdateOptions,
        session: Option<&mut MongoSession>,
    ) -> DriverResult<UpdateResult> {
        let mongo_options = replace_options(options);
        let result = with_session!(
            session,
            |s| self.inner.replace_one_with_session(filter, replacement, mongo_options, s),
            self.inner.replace_one(filter, replacement, mongo_options)
        )
        .map_err(provider_error)?;
        Ok(update_result(result))
    }

    fn delete_one(&self, filter: Document, session: Option<&mut MongoSession>) -> DriverResult<DeleteResult> {
        let result = with_session!(
            session,
            |s| self.inner.delete_one_with_session(filter, None, s),
            self.inner.delete_one(filter, None)
        )
        .map_err(provider_error)?;
        Ok(DeleteResult {
            deleted_count: result.deleted_count,
        })
    }

    fn delete_many(&self, filter: Document, session: Option<&mut MongoSession>) -> DriverResult<DeleteResult> {
        let result = with_session!(
            session,
            |s| self.inner.delete_many_with_session(filter, None, s),
            self.inner.delete_many(filter, None)
        )
        .map_err(provider_error)?;
        Ok(DeleteResult {
            deleted_count: result.deleted_count,
        })
    }

    fn find_one_and_update(
        &self,
        filter: Document,
        update: Document,
        options: &FindOneAndUpdateOptions,
        session: Option<&mut MongoSession>,
    ) -> DriverResult<Option<Document>> {
        let mongo_options = find_one_and_update_options(options);
        with_session!(
            session,
            |s| self.inner.find_one_and_update_with_session(filter, update, mongo_options, s),
            self.inner.find_one_and_update(filter, update, mongo_options)
        )
        .map_err(provider_error)
    }

    fn find_one_and_replace(
        &self,
        filter: Document,
        replacement: Document,
        options: &FindOneAndReplaceOptions,
        session: Option<&mut MongoSession>,
    ) -> DriverResult<Option<Document>> {
        let mongo_options = find_one_and_replace_options(options);
        with_session!(
            session,
            |s| self.inner.find_one_and_replace_with_session(filter, replacement, mongo_options, s),
            self.inner.find_one_and_replace(filter, replacement, mongo_options)
        )
        .map_err(provider_error)
    }

    fn find_one_and_delete(
        &self,
        filter: Document,
        session: Option<&mut MongoSession>,
    ) -> DriverResult<Option<Document>> {
        with_session!(
            session,
            |s| self.inner.find_one_and_delete_with_session(filter, None, s),
            self.inner.find_one_and_delete(filter, None)
        )
        .map_err(provider_error)
    }

    fn count_documents(&self, filter: Option<Document>, session: Option<&mut MongoSession>) -> DriverResult<u64> {
        with_session!(
            session,
            |s| self.inner.count_documents_with_session(filter, None, s),
            self.inner.count_documents(filter, None)
        )
        .map_err(provider_error)
    }

    fn estimated_document_count(&self) -> DriverResult<u64> {
        self.inner.estimated_document_count(None).map_err(provider_error)
    }

    fn distinct(
        &self,
        field: &str,
        filter: Option<Document>,
        session: Option<&mut MongoSession>,
    ) -> DriverResult<Vec<Bson>> {
        with_session!(
            session,
            |s| self.inner.distinct_with_session(field, filter, None, s),
            self.inner.distinct(field, filter, None)
        )
        .map_err(provider_error)
    }

    fn aggregate(
        &self,
        pipeline: Vec<Document>,
        options: &AggregateOptions,
        session: Option<&mut MongoSession>,
    ) -> DriverResult<MongoCursor> {
        let mongo_options = aggregate_options(options);
        match session {
            Some(wrapper) => {
                let s = wrapper.usable()?;
                let cursor = self
                    .inner
                    .aggregate_with_session(pipeline, mongo_options, s)
                    .map_err(provider_error)?;
                Ok(MongoCursor::with_session(cursor, options.batch_size))
            }
            None => {
                let cursor = self.inner.aggregate(pipeline, mongo_options).map_err(provider_error)?;
                Ok(MongoCursor::plain(cursor, options.batch_size))
            }
        }
    }

    fn list_indexes(&self, batch_size: Option<u32>, session: Option<&mut MongoSession>) -> DriverResult<MongoCursor> {
        let mut mongo_options = ::mongodb::options::ListIndexesOptions::default();
        mongo_options.batch_size = batch_size;
        match session {
            Some(wrapper) => {
                let s = wrapper.usable()?;
                let cursor = self
                    .inner
                    .list_indexes_with_session(mongo_options, s)
                    .map_err(provider_error)?;
                Ok(MongoCursor::indexes_with_session(cursor, batch_size))
            }
            None => {
                let cursor = self.inner.list_indexes(mongo_options).map_err(provider_error)?;
                Ok(MongoCursor::indexes(cursor, batch_size))
            }
        }
    }

    fn create_index(
        &self,
        keys: Document,
        options: &IndexOptions,
        session: Option<&mut MongoSession>,
    ) -> DriverResult<String> {
        let model = index_model(keys, options);
        let result = with_session!(
            session,
            |s| self.inner.create_index_with_session(model, None, s),
            self.inner.create_index(model, None)
        )
        .map_err(provider_error)?;
        Ok(result.index_name)
    }

    fn create_indexes(
        &self,
        models: Vec<IndexModel>,
        session: Option<&mut MongoSession>,
    ) -> DriverResult<Vec<String>> {
        let models: Vec<::mongodb::IndexModel> = models
            .into_iter()
            .map(|model| index_model(model.keys, &model.options))
            .collect();
        let result = with_session!(
            session,
            |s| self.inner.create_indexes_with_session(models, None, s),
            self.inner.create_indexes(models, None)
        )
        .map_err(provider_error)?;
        Ok(result.index_names)
    }

    fn drop_index(&self, name: &str, session: Option<&mut MongoSession>) -> DriverResult<()> {
        with_session!(
            session,
            |s| self.inner.drop_index_with_session(name, None, s),
            self.inner.drop_index(name, None)
        )
        .map_err(provider_error)
    }

    fn drop_indexes(&self, session: Option<&mut MongoSession>) -> DriverResult<()> {
        with_session!(
            session,
            |s| self.inner.drop_indexes_with_session(None, s),
            self.inner.drop_indexes(None)
        )
        .map_err(provider_error)
    }

    fn drop(&self, session: Option<&mut MongoSession>) -> DriverResult<()> {
        with_session!(
            session,
            |s| self.inner.drop_with_session(None, s),
            self.inner.drop(None)
        )
        .map_err(provider_error)
    }

    fn rename(&self, new_name: &str, drop_target: bool, session: Option<&mut MongoSession>) -> DriverResult<()> {
        let database = self.database.name();
        let command = doc! {
            "renameCollection": format!("{}.{}", database, self.inner.name()),
            "to": format!("{}.{}", database, new_name),
            "dropTarget": drop_target,
        };
        let admin = self.client.database("admin");
        with_session!(
            session,
            |s| admin.run_command_with_session(command, None, s),
            admin.run_command(command, None)
        )
        .map_err(provider_error)?;
        debug!("集合已重命名: {} -> {}", self.inner.name(), new_name);
        Ok(())
    }

    fn watch(&self, options: &ChangeStreamOptions) -> DriverResult<MongoChangeStream> {
        let stream = self
            .inner
            .watch(options.pipeline.clone(), Some(change_stream_options(options)?))
            .map_err(provider_error)?;
        Ok(MongoChangeStream::new(stream.with_type::<Document>()))
    }
}

fn update_result(result: ::mongodb::results::UpdateResult) -> UpdateResult {
    UpdateResult {
        matched_count: result.matched_count,
        modified_count: result.modified_count,
        upserted_id: result.upserted_id,
    }
}

/// MongoDB 变更流
pub struct MongoChangeStream {
    inner: Option<sync::ChangeStream<Document>>,
}

impl MongoChangeStream {
    fn new(inner: sync::ChangeStream<Document>) -> Self {
        Self { inner: Some(inner) }
    }
}

impl ChangeStreamDelegate<MongoDriver> for MongoChangeStream {
    fn try_next(&mut self) -> DriverResult<Option<Document>> {
        let Some(stream) = self.inner.as_mut() else {
            return Err(ProviderError::new("change stream has been closed"));
        };
        stream.next_if_any().map_err(provider_error)
    }

    fn is_alive(&self) -> bool {
        self.inner.as_ref().map(|stream| stream.is_alive()).unwrap_or(false)
    }

    fn resume_token(&self) -> Option<Document> {
        let token = self.inner.as_ref()?.resume_token()?;
        bson::to_document(&token).ok()
    }

    fn close(&mut self) -> DriverResult<()> {
        self.inner = None;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{Client, DocBridgeError};

    #[test]
    fn test_cursor_type_rejects_tailable() {
        // 建立客户端不会连接服务器
        let client = Client::<MongoDriver>::new(MongoClient::with_uri_str("mongodb://localhost:27017").unwrap());
        let mut cursor = client.database("app").collection("log").find(None, None, None);

        let Err(err) = cursor.cursor_type(CursorType::Tailable) else {
            panic!("可追加游标应被拒绝");
        };
        assert!(matches!(err, DocBridgeError::InvalidOperation { .. }));
        assert!(!cursor.is_tailable());
        assert!(!cursor.started());

        // 被拒绝后游标仍可继续设置其他选项
        assert!(cursor.cursor_type(CursorType::NonTailable).is_ok());
        assert!(cursor.batch_size(10).is_ok());
    }
}
