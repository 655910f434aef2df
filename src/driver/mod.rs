//! 同步驱动接缝
//!
//! 门面层只通过这里定义的 trait 接触同步驱动。每个 trait 方法都可能阻塞，
//! 因此只能在 [`crate::offload::run_sync`] 提交的闭包里调用；
//! 标注为"非阻塞"的方法只读写本地状态，可以直接在调用方线程上使用。
//!
//! 支持会话的操作接收 `Option<&mut D::Session>`，门面负责把会话门面翻译成委托。

use bson::{Bson, Document, Timestamp};

use crate::error::DriverResult;
use crate::types::*;

pub mod memory;

#[cfg(feature = "mongodb-support")]
pub mod mongo;

/// 驱动后端，把各类委托对象绑定在一起
pub trait Driver: Sized + Send + Sync + 'static {
    type Client: ClientDelegate<Self>;
    type Database: DatabaseDelegate<Self>;
    type Collection: CollectionDelegate<Self>;
    type Cursor: CursorDelegate<Self>;
    type Session: SessionDelegate<Self>;
    type ChangeStream: ChangeStreamDelegate<Self>;

    /// 后端能否在不阻塞工作线程的情况下服务可追加游标
    const TAILABLE_CURSORS: bool = true;
}

/// 客户端委托
pub trait ClientDelegate<D: Driver>: Clone + PartialEq + Send + Sync + 'static {
    /// 获取数据库委托（非阻塞，不检查数据库是否存在）
    fn database(&self, name: &str) -> D::Database;

    /// 连接串中指定的默认数据库（非阻塞）
    fn default_database(&self) -> Option<D::Database>;

    /// 派生使用另一组读写关注的客户端委托（非阻塞）
    fn with_options(&self, options: &ConcernOptions) -> Self;

    /// 当前生效的读写关注（非阻塞）
    fn concern_options(&self) -> ConcernOptions;

    fn list_database_names(&self, session: Option<&mut D::Session>) -> DriverResult<Vec<String>>;

    /// listDatabases 结果，以命令游标形式返回
    fn list_databases(&self, session: Option<&mut D::Session>) -> DriverResult<D::Cursor>;

    fn drop_database(&self, name: &str, session: Option<&mut D::Session>) -> DriverResult<()>;

    fn server_info(&self) -> DriverResult<Document>;

    fn start_session(&self, options: &SessionOptions) -> DriverResult<D::Session>;

    fn watch(&self, options: &ChangeStreamOptions) -> DriverResult<D::ChangeStream>;

    fn close(&self) -> DriverResult<()>;
}

/// 数据库委托
pub trait DatabaseDelegate<D: Driver>: Clone + PartialEq + Send + Sync + 'static {
    /// 数据库名（非阻塞）
    fn name(&self) -> &str;

    /// 获取集合委托（非阻塞，不检查集合是否存在）
    fn collection(&self, name: &str) -> D::Collection;

    /// 派生使用另一组读写关注的数据库委托（非阻塞）
    fn with_options(&self, options: &ConcernOptions) -> Self;

    /// 当前生效的读写关注（非阻塞）
    fn concern_options(&self) -> ConcernOptions;

    fn run_command(&self, command: Document, session: Option<&mut D::Session>) -> DriverResult<Document>;

    fn list_collection_names(
        &self,
        filter: Option<Document>,
        session: Option<&mut D::Session>,
    ) -> DriverResult<Vec<String>>;

    /// listCollections 结果，以命令游标形式返回
    fn list_collections(
        &self,
        filter: Option<Document>,
        session: Option<&mut D::Session>,
    ) -> DriverResult<D::Cursor>;

    fn create_collection(&self, name: &str, session: Option<&mut D::Session>) -> DriverResult<()>;

    fn drop(&self, session: Option<&mut D::Session>) -> DriverResult<()>;

    /// 数据库级聚合，返回的游标已携带首批数据
    fn aggregate(
        &self,
        pipeline: Vec<Document>,
        options: &AggregateOptions,
        session: Option<&mut D::Session>,
    ) -> DriverResult<D::Cursor>;

    fn watch(&self, options: &ChangeStreamOptions) -> DriverResult<D::ChangeStream>;
}

/// 集合委托
pub trait CollectionDelegate<D: Driver>: Clone + PartialEq + Send + Sync + 'static {
    /// 集合名（非阻塞）
    fn name(&self) -> &str;

    /// 所属数据库名（非阻塞）
    fn database_name(&self) -> &str;

    /// 派生使用另一组读写关注的集合委托（非阻塞）
    fn with_options(&self, options: &ConcernOptions) -> Self;

    /// 当前生效的读写关注（非阻塞）
    fn concern_options(&self) -> ConcernOptions;

    /// 执行查询命令，返回的游标已携带首批数据
    fn find(
        &self,
        filter: Option<Document>,
        options: &FindOptions,
        session: Option<&mut D::Session>,
    ) -> DriverResult<D::Cursor>;

    fn find_one(
        &self,
        filter: Option<Document>,
        options: &FindOptions,
        session: Option<&mut D::Session>,
    ) -> DriverResult<Option<Document>>;

    fn insert_one(&self, document: Document, session: Option<&mut D::Session>) -> DriverResult<InsertOneResult>;

    fn insert_many(
        &self,
        documents: Vec<Document>,
        session: Option<&mut D::Session>,
    ) -> DriverResult<InsertManyResult>;

    fn update_one(
        &self,
        filter: Document,
        update: Document,
        options: &UpdateOptions,
        session: Option<&mut D::Session>,
    ) -> DriverResult<UpdateResult>;

    fn update_many(
        &self,
        filter: Document,
        update: Document,
        options: &UpdateOptions,
        session: Option<&mut D::Session>,
    ) -> DriverResult<UpdateResult>;

    fn replace_one(
        &self,
        filter: Document,
        replacement: Document,
        options: &UpdateOptions,
        session: Option<&mut D::Session>,
    ) -> DriverResult<UpdateResult>;

    fn delete_one(&self, filter: Document, session: Option<&mut D::Session>) -> DriverResult<DeleteResult>;

    fn delete_many(&self, filter: Document, session: Option<&mut D::Session>) -> DriverResult<DeleteResult>;

    fn find_one_and_update(
        &self,
        filter: Document,
        update: Document,
        options: &FindOneAndUpdateOptions,
        session: Option<&mut D::Session>,
    ) -> DriverResult<Option<Document>>;

    fn find_one_and_replace(
        &self,
        filter: Document,
        replacement: Document,
        options: &FindOneAndReplaceOptions,
        session: Option<&mut D::Session>,
    ) -> DriverResult<Option<Document>>;

    fn find_one_and_delete(
        &self,
        filter: Document,
        session: Option<&mut D::Session>,
    ) -> DriverResult<Option<Document>>;

    fn count_documents(&self, filter: Option<Document>, session: Option<&mut D::Session>) -> DriverResult<u64>;

    fn estimated_document_count(&self) -> DriverResult<u64>;

    fn distinct(
        &self,
        field: &str,
        filter: Option<Document>,
        session: Option<&mut D::Session>,
    ) -> DriverResult<Vec<Bson>>;

    /// 集合级聚合，返回的游标已携带首批数据
    fn aggregate(
        &self,
        pipeline: Vec<Document>,
        options: &AggregateOptions,
        session: Option<&mut D::Session>,
    ) -> DriverResult<D::Cursor>;

    fn list_indexes(&self, batch_size: Option<u32>, session: Option<&mut D::Session>) -> DriverResult<D::Cursor>;

    /// 创建索引，返回索引名
    fn create_index(
        &self,
        keys: Document,
        options: &IndexOptions,
        session: Option<&mut D::Session>,
    ) -> DriverResult<String>;

    /// 一次命令创建多个索引，按输入顺序返回索引名
    fn create_indexes(
        &self,
        models: Vec<IndexModel>,
        session: Option<&mut D::Session>,
    ) -> DriverResult<Vec<String>>;

    fn drop_index(&self, name: &str, session: Option<&mut D::Session>) -> DriverResult<()>;

    fn drop_indexes(&self, session: Option<&mut D::Session>) -> DriverResult<()>;

    /// 在同一数据库内重命名集合
    fn rename(&self, new_name: &str, drop_target: bool, session: Option<&mut D::Session>) -> DriverResult<()>;

    fn drop(&self, session: Option<&mut D::Session>) -> DriverResult<()>;

    fn watch(&self, options: &ChangeStreamOptions) -> DriverResult<D::ChangeStream>;
}

/// 服务器游标委托
///
/// 打开游标的命令会同时带回首批数据；第一次 [`next_batch`](CursorDelegate::next_batch)
/// 返回这批数据而不产生新的往返，之后每次调用对应一次 getMore。
pub trait CursorDelegate<D: Driver>: Send + 'static {
    /// 取下一批文档
    fn next_batch(&mut self, session: Option<&mut D::Session>) -> DriverResult<Vec<Document>>;

    /// 服务器端是否可能还有数据（非阻塞）
    fn is_alive(&self) -> bool;

    /// 修改后续 getMore 的批大小（非阻塞）
    fn set_batch_size(&mut self, batch_size: u32);

    /// 释放服务器端游标
    fn close(&mut self) -> DriverResult<()>;
}

/// 会话委托
pub trait SessionDelegate<D: Driver>: Send + 'static {
    /// 会话标识（非阻塞）
    fn id(&self) -> Document;

    fn start_transaction(&mut self, options: &TransactionOptions) -> DriverResult<()>;

    fn commit_transaction(&mut self) -> DriverResult<()>;

    fn abort_transaction(&mut self) -> DriverResult<()>;

    /// 是否处于活动事务中（非阻塞）
    fn in_transaction(&self) -> bool;

    /// 结束会话，活动事务会被中止
    fn end_session(&mut self) -> DriverResult<()>;

    /// 会话是否已结束（非阻塞）
    fn has_ended(&self) -> bool;

    /// 会话见过的最新集群时间（非阻塞）
    fn cluster_time(&self) -> Option<Document>;

    /// 会话内最近一次操作的操作时间（非阻塞）
    fn operation_time(&self) -> Option<Timestamp>;

    /// 推进集群时间，较旧的值被忽略
    fn advance_cluster_time(&mut self, cluster_time: &Document) -> DriverResult<()>;

    /// 推进操作时间，较旧的值被忽略
    fn advance_operation_time(&mut self, operation_time: Timestamp) -> DriverResult<()>;
}

/// 变更流委托
pub trait ChangeStreamDelegate<D: Driver>: Send + 'static {
    /// 轮询一次，没有新事件时返回 None
    fn try_next(&mut self) -> DriverResult<Option<Document>>;

    /// 是否还可能产生事件（非阻塞）
    fn is_alive(&self) -> bool;

    /// 最近一次返回事件的恢复令牌（非阻塞）
    fn resume_token(&self) -> Option<Document>;

    fn close(&mut self) -> DriverResult<()>;
}
