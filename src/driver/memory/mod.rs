//! 内存驱动
//!
//! 线程安全的同步文档存储，实现全部委托 trait，让异步层在没有服务器的情况下也能使用和测试。
//! 每个会产生网络往返的方法都会按命令名计数，并可通过 [`FailPoint`] 注入错误。

mod change_stream;
mod cursor;
mod matcher;
mod session;
mod store;

use bson::{Bson, Document, doc};
use rat_logger::debug;
use std::cmp::Ordering;
use std::sync::Arc;

use crate::driver::{ClientDelegate, CollectionDelegate, CursorDelegate, DatabaseDelegate, Driver, SessionDelegate};
use crate::error::DriverResult;
use crate::types::*;

pub use change_stream::MemoryChangeStream;
pub use cursor::MemoryCursor;
pub use session::MemorySession;
pub use store::FailPoint;

use change_stream::WatchScope;
use matcher::server_error;
use store::{IndexSpec, MemoryStore, Modification, Namespace, UpdateSpec, WriteSink};

/// 内存驱动
#[derive(Debug, Clone, Copy, Default)]
pub struct MemoryDriver;

impl Driver for MemoryDriver {
    type Client = MemoryClient;
    type Database = MemoryDatabase;
    type Collection = MemoryCollection;
    type Cursor = MemoryCursor;
    type Session = MemorySession;
    type ChangeStream = MemoryChangeStream;
}

/// 检查会话是否可用，并让会话看到当前集群时间
fn checked<'a>(store: &MemoryStore, session: Option<&'a mut MemorySession>) -> DriverResult<Option<&'a mut MemorySession>> {
    match session {
        Some(session) => {
            session.ensure_usable()?;
            session.observe(store.current_time());
            Ok(Some(session))
        }
        None => Ok(None),
    }
}

/// 写操作完成后交付回滚记录与事件
fn settle(store: &MemoryStore, session: Option<&mut MemorySession>, sink: WriteSink) {
    match session {
        Some(session) => session.absorb(sink),
        None => store.publish(sink.events),
    }
}

/// 单机服务器不能满足多节点确认的写关注
fn check_write_concern(concern: &ConcernOptions, session: &Option<&mut MemorySession>) -> DriverResult<()> {
    let in_transaction = session.as_ref().map(|session| session.in_transaction()).unwrap_or(false);
    match &concern.write_concern {
        Some(WriteConcernLevel::Nodes(nodes)) if *nodes > 1 && !in_transaction => {
            Err(server_error(2, "BadValue", "cannot use 'w' > 1 on a standalone"))
        }
        _ => Ok(()),
    }
}

fn reject_in_transaction(session: &Option<&mut MemorySession>, command: &str) -> DriverResult<()> {
    if session.as_ref().map(|session| session.in_transaction()).unwrap_or(false) {
        return Err(server_error(
            263,
            "OperationNotSupportedInTransaction",
            format!("Cannot run '{}' in a multi-document transaction.", command),
        ));
    }
    Ok(())
}

fn build_info() -> Document {
    doc! {
        "version": "7.0.0",
        "gitVersion": "memory",
        "versionArray": [7, 0, 0, 0],
        "storageEngines": ["memory"],
        "ok": 1.0,
    }
}

/// 内存客户端
///
/// 克隆共享同一份存储；两个客户端相等当且仅当共享存储。
#[derive(Clone)]
pub struct MemoryClient {
    store: Arc<MemoryStore>,
    concern: ConcernOptions,
}

impl MemoryClient {
    pub fn new() -> Self {
        Self {
            store: Arc::new(MemoryStore::new(None)),
            concern: ConcernOptions::default(),
        }
    }

    /// 带默认数据库的客户端，相当于连接串中的 `/dbname`
    pub fn with_default_database(name: impl Into<String>) -> Self {
        Self {
            store: Arc::new(MemoryStore::new(Some(name.into()))),
            concern: ConcernOptions::default(),
        }
    }

    /// 安装故障注入点
    pub fn configure_fail_point(&self, fail_point: FailPoint) {
        debug!("安装故障注入点: {:?}", fail_point.commands);
        self.store.configure_fail_point(fail_point);
    }

    pub fn clear_fail_points(&self) {
        self.store.clear_fail_points();
    }

    /// 指定命令的往返次数
    pub fn command_count(&self, command: &str) -> u64 {
        self.store.command_count(command)
    }

    /// 全部命令的往返次数
    pub fn round_trips(&self) -> u64 {
        self.store.round_trips()
    }

    pub fn reset_counters(&self) {
        self.store.reset_counters();
    }
}

impl Default for MemoryClient {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for MemoryClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryClient")
            .field("store", &Arc::as_ptr(&self.store))
            .finish()
    }
}

impl PartialEq for MemoryClient {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.store, &other.store)
    }
}

impl ClientDelegate<MemoryDriver> for MemoryClient {
    fn database(&self, name: &str) -> MemoryDatabase {
        MemoryDatabase {
            store: self.store.clone(),
            name: name.to_string(),
            concern: self.concern.clone(),
        }
    }

    fn default_database(&self) -> Option<MemoryDatabase> {
        self.store.default_database().map(|name| self.database(name))
    }

    fn with_options(&self, options: &ConcernOptions) -> Self {
        Self {
            store: self.store.clone(),
            concern: self.concern.merged(options),
        }
    }

    fn concern_options(&self) -> ConcernOptions {
        self.concern.clone()
    }

    fn list_database_names(&self, session: Option<&mut MemorySession>) -> DriverResult<Vec<String>> {
        checked(&self.store, session)?;
        self.store.round_trip("listDatabases")?;
        Ok(self.store.database_names())
    }

    fn list_databases(&self, session: Option<&mut MemorySession>) -> DriverResult<MemoryCursor> {
        checked(&self.store, session)?;
        self.store.round_trip("listDatabases")?;
        let databases = self
            .store
            .database_names()
            .into_iter()
            .map(|name| doc! { "name": name, "sizeOnDisk": 0_i64, "empty": false })
            .collect();
        Ok(MemoryCursor::open(self.store.clone(), databases, None, false))
    }

    fn drop_database(&self, name: &str, session: Option<&mut MemorySession>) -> DriverResult<()> {
        self.database(name).drop(session)
    }

    fn server_info(&self) -> DriverResult<Document> {
        self.store.round_trip("buildInfo")?;
        Ok(build_info())
    }

    fn start_session(&self, options: &SessionOptions) -> DriverResult<MemorySession> {
        Ok(MemorySession::new(self.store.clone(), options.clone()))
    }

    fn watch(&self, options: &ChangeStreamOptions) -> DriverResult<MemoryChangeStream> {
        self.store.round_trip("aggregate")?;
        MemoryChangeStream::open(self.store.clone(), WatchScope::Cluster, options)
    }

    fn close(&self) -> DriverResult<()> {
        debug!("关闭内存客户端");
        Ok(())
    }
}

/// 内存数据库
#[derive(Clone)]
pub struct MemoryDatabase {
    store: Arc<MemoryStore>,
    name: String,
    concern: ConcernOptions,
}

impl std::fmt::Debug for MemoryDatabase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryDatabase").field("name", &self.name).finish()
    }
}

impl PartialEq for MemoryDatabase {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.store, &other.store) && self.name == other.name
    }
}

impl MemoryDatabase {
    fn run_count(&self, command: &Document) -> DriverResult<Document> {
        let coll = command.get_str("count").map_err(|_| server_error(2, "BadValue", "count requires a collection name"))?;
        let filter = command.get_document("query").cloned().unwrap_or_default();
        let n = self.collection(coll).count_documents_unchecked(&filter)?;
        Ok(doc! { "n": n as i64, "ok": 1.0 })
    }
}

impl DatabaseDelegate<MemoryDriver> for MemoryDatabase {
    fn name(&self) -> &str {
        &self.name
    }

    fn collection(&self, name: &str) -> MemoryCollection {
        MemoryCollection {
            store: self.store.clone(),
            ns: Namespace::new(&self.name, name),
            concern: self.concern.clone(),
        }
    }

    fn with_options(&self, options: &ConcernOptions) -> Self {
        Self {
            store: self.store.clone(),
            name: self.name.clone(),
            concern: self.concern.merged(options),
        }
    }

    fn concern_options(&self) -> ConcernOptions {
        self.concern.clone()
    }

    fn run_command(&self, command: Document, session: Option<&mut MemorySession>) -> DriverResult<Document> {
        checked(&self.store, session)?;
        let Some(name) = command.keys().next().cloned() else {
            return Err(server_error(59, "CommandNotFound", "no such command: ''"));
        };
        self.store.round_trip(&name)?;

        match name.as_str() {
            "ping" => Ok(doc! { "ok": 1.0 }),
            "hello" | "isMaster" | "ismaster" => Ok(doc! {
                "isWritablePrimary": true,
                "maxBsonObjectSize": 16 * 1024 * 1024,
                "ok": 1.0,
            }),
            "buildInfo" | "buildinfo" => Ok(build_info()),
            "count" => self.run_count(&command),
            "dbStats" | "dbstats" => Ok(doc! {
                "db": self.name.as_str(),
                "collections": self.store.collection_names(&self.name).len() as i64,
                "ok": 1.0,
            }),
            other => Err(server_error(59, "CommandNotFound", format!("no such command: '{}'", other))),
        }
    }

    fn list_collection_names(
        &self,
        filter: Option<Document>,
        session: Option<&mut MemorySession>,
    ) -> DriverResult<Vec<String>> {
        let mut cursor = self.list_collections(filter, session)?;
        let mut names = Vec::new();
        loop {
            let batch = <MemoryCursor as CursorDelegate<MemoryDriver>>::next_batch(&mut cursor, None)?;
            names.extend(batch.iter().filter_map(|info| info.get_str("name").ok().map(str::to_string)));
            if !<MemoryCursor as CursorDelegate<MemoryDriver>>::is_alive(&cursor) {
                break;
            }
        }
        Ok(names)
    }

    fn list_collections(
        &self,
        filter: Option<Document>,
        session: Option<&mut MemorySession>,
    ) -> DriverResult<MemoryCursor> {
        checked(&self.store, session)?;
        self.store.round_trip("listCollections")?;
        let filter = filter.unwrap_or_default();
        let mut infos = Vec::new();
        for name in self.store.collection_names(&self.name) {
            let info = doc! {
                "name": name,
                "type": "collection",
                "options": {},
                "info": { "readOnly": false },
            };
            if matcher::matches(&info, &filter)? {
                infos.push(info);
            }
        }
        Ok(MemoryCursor::open(self.store.clone(), infos, None, false))
    }

    fn create_collection(&self, name: &str, session: Option<&mut MemorySession>) -> DriverResult<()> {
        checked(&self.store, session)?;
        self.store.round_trip("create")?;
        self.store.create_collection(&Namespace::new(&self.name, name))
    }

    fn drop(&self, session: Option<&mut MemorySession>) -> DriverResult<()> {
        let session = checked(&self.store, session)?;
        reject_in_transaction(&session, "dropDatabase")?;
        self.store.round_trip("dropDatabase")?;
        let mut sink = WriteSink::default();
        self.store.drop_database(&self.name, &mut sink);
        settle(&self.store, session, sink);
        Ok(())
    }

    fn aggregate(
        &self,
        pipeline: Vec<Document>,
        options: &AggregateOptions,
        session: Option<&mut MemorySession>,
    ) -> DriverResult<MemoryCursor> {
        checked(&self.store, session)?;
        self.store.round_trip("aggregate")?;
        // 数据库级聚合没有输入集合，第一阶段必须自带数据来源
        let results = matcher::run_pipeline(Vec::new(), &pipeline)?;
        Ok(MemoryCursor::open(self.store.clone(), results, options.batch_size, false))
    }

    fn watch(&self, options: &ChangeStreamOptions) -> DriverResult<MemoryChangeStream> {
        self.store.round_trip("aggregate")?;
        MemoryChangeStream::open(self.store.clone(), WatchScope::Database(self.name.clone()), options)
    }
}

/// 内存集合
#[derive(Clone)]
pub struct MemoryCollection {
    store: Arc<MemoryStore>,
    ns: Namespace,
    concern: ConcernOptions,
}

impl std::fmt::Debug for MemoryCollection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryCollection").field("ns", &self.ns.to_string()).finish()
    }
}

impl PartialEq for MemoryCollection {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.store, &other.store) && self.ns == other.ns
    }
}

impl MemoryCollection {
    fn write_checked<'a>(&self, session: Option<&'a mut MemorySession>) -> DriverResult<Option<&'a mut MemorySession>> {
        let session = checked(&self.store, session)?;
        check_write_concern(&self.concern, &session)?;
        Ok(session)
    }

    fn count_documents_unchecked(&self, filter: &Document) -> DriverResult<u64> {
        let mut count = 0;
        for document in self.store.snapshot(&self.ns) {
            if matcher::matches(&document, filter)? {
                count += 1;
            }
        }
        Ok(count)
    }

    fn update_with(
        &self,
        spec: UpdateSpec<'_>,
        command: &str,
        session: Option<&mut MemorySession>,
    ) -> DriverResult<store::UpdateOutcome> {
        let session = self.write_checked(session)?;
        self.store.round_trip(command)?;
        let mut sink = WriteSink::default();
        let outcome = self.store.update(&self.ns, spec, &mut sink);
        settle(&self.store, session, sink);
        outcome
    }

    fn update_result(outcome: store::UpdateOutcome) -> UpdateResult {
        UpdateResult {
            matched_count: outcome.matched,
            modified_count: outcome.modified,
            upserted_id: outcome.upserted_id,
        }
    }
}

impl CollectionDelegate<MemoryDriver> for MemoryCollection {
    fn name(&self) -> &str {
        &self.ns.coll
    }

    fn database_name(&self) -> &str {
        &self.ns.db
    }

    fn with_options(&self, options: &ConcernOptions) -> Self {
        Self {
            store: self.store.clone(),
            ns: self.ns.clone(),
            concern: self.concern.merged(options),
        }
    }

    fn concern_options(&self) -> ConcernOptions {
        self.concern.clone()
    }

    fn find(
        &self,
        filter: Option<Document>,
        options: &FindOptions,
        session: Option<&mut MemorySession>,
    ) -> DriverResult<MemoryCursor> {
        checked(&self.store, session)?;
        self.store.round_trip("find")?;
        self.store.check_hint(&self.ns, options.hint.as_ref())?;
        let filter = filter.unwrap_or_default();
        let (results, end) = self.store.query(&self.ns, &filter, options)?;

        // 负数 limit 表示只返回一批
        let single_batch = options.limit.map(|limit| limit < 0).unwrap_or(false);
        let batch_size = match options.limit {
            Some(limit) if limit < 0 => Some(limit.unsigned_abs() as u32),
            _ => options.batch_size,
        };

        let cursor = MemoryCursor::open(self.store.clone(), results, batch_size, single_batch);
        let await_time = match options.cursor_type {
            CursorType::TailableAwait => Some(options.max_await_time.unwrap_or(change_stream::DEFAULT_MAX_AWAIT)),
            _ => None,
        };
        if options.cursor_type.is_tailable() {
            return Ok(cursor.tailing(self.ns.clone(), filter, end, await_time));
        }
        Ok(cursor)
    }

    fn find_one(
        &self,
        filter: Option<Document>,
        options: &FindOptions,
        session: Option<&mut MemorySession>,
    ) -> DriverResult<Option<Document>> {
        checked(&self.store, session)?;
        self.store.round_trip("find")?;
        self.store.check_hint(&self.ns, options.hint.as_ref())?;
        let options = FindOptions {
            limit: Some(1),
            ..options.clone()
        };
        let (results, _) = self.store.query(&self.ns, &filter.unwrap_or_default(), &options)?;
        Ok(results.into_iter().next())
    }

    fn insert_one(&self, document: Document, session: Option<&mut MemorySession>) -> DriverResult<InsertOneResult> {
        let session = self.write_checked(session)?;
        self.store.round_trip("insert")?;
        let mut sink = WriteSink::default();
        let inserted = self.store.insert(&self.ns, document, &mut sink);
        settle(&self.store, session, sink);
        Ok(InsertOneResult { inserted_id: inserted? })
    }

    fn insert_many(
        &self,
        documents: Vec<Document>,
        session: Option<&mut MemorySession>,
    ) -> DriverResult<InsertManyResult> {
        let session = self.write_checked(session)?;
        self.store.round_trip("insert")?;
        let mut sink = WriteSink::default();
        let mut inserted_ids = std::collections::BTreeMap::new();
        let mut failure = None;
        for (index, document) in documents.into_iter().enumerate() {
            match self.store.insert(&self.ns, document, &mut sink) {
                Ok(id) => {
                    inserted_ids.insert(index, id);
                }
                Err(err) => {
                    failure = Some(err);
                    break;
                }
            }
        }
        // 有序插入：出错前的文档保留
        settle(&self.store, session, sink);
        match failure {
            Some(err) => Err(err),
            None => Ok(InsertManyResult { inserted_ids }),
        }
    }

    fn update_one(
        &self,
        filter: Document,
        update: Document,
        options: &UpdateOptions,
        session: Option<&mut MemorySession>,
    ) -> DriverResult<UpdateResult> {
        let spec = UpdateSpec {
            filter: &filter,
            modification: Modification::Operators(&update),
            multi: false,
            upsert: options.upsert,
            sort: None,
        };
        self.update_with(spec, "update", session).map(Self::update_result)
    }

    fn update_many(
        &self,
        filter: Document,
        update: Document,
        options: &UpdateOptions,
        session: Option<&mut MemorySession>,
    ) -> DriverResult<UpdateResult> {
        let spec = UpdateSpec {
            filter: &filter,
            modification: Modification::Operators(&update),
            multi: true,
            upsert: options.upsert,
            sort: None,
        };
        self.update_with(spec, "update", session).map(Self::update_result)
    }

    fn replace_one(
        &self,
        filter: Document,
        replacement: Document,
        options: &UpdateOptions,
        session: Option<&mut MemorySession>,
    ) -> DriverResult<UpdateResult> {
        let spec = UpdateSpec {
            filter: &filter,
            modification: Modification::Replacement(&replacement),
            multi: false,
            upsert: options.upsert,
            sort: None,
        };
        self.update_with(spec, "update", session).map(Self::update_result)
    }

    fn delete_one(&self, filter: Document, session: Option<&mut MemorySession>) -> DriverResult<DeleteResult> {
        let session = self.write_checked(session)?;
        self.store.round_trip("delete")?;
        let mut sink = WriteSink::default();
        let deleted = self.store.delete(&self.ns, &filter, false, &mut sink);
        settle(&self.store, session, sink);
        Ok(DeleteResult { deleted_count: deleted?.0 })
    }

    fn delete_many(&self, filter: Document, session: Option<&mut MemorySession>) -> DriverResult<DeleteResult> {
        let session = self.write_checked(session)?;
        self.store.round_trip("delete")?;
        let mut sink = WriteSink::default();
        let deleted = self.store.delete(&self.ns, &filter, true, &mut sink);
        settle(&self.store, session, sink);
        Ok(DeleteResult { deleted_count: deleted?.0 })
    }

    fn find_one_and_update(
        &self,
        filter: Document,
        update: Document,
        options: &FindOneAndUpdateOptions,
        session: Option<&mut MemorySession>,
    ) -> DriverResult<Option<Document>> {
        let spec = UpdateSpec {
            filter: &filter,
            modification: Modification::Operators(&update),
            multi: false,
            upsert: options.upsert,
            sort: options.sort.as_ref(),
        };
        let outcome = self.update_with(spec, "findAndModify", session)?;
        let document = match options.return_document {
            ReturnDocument::Before => outcome.before,
            ReturnDocument::After => outcome.after,
        };
        match (document, &options.projection) {
            (Some(document), Some(projection)) => matcher::project(&document, projection).map(Some),
            (document, _) => Ok(document),
        }
    }

    fn find_one_and_replace(
        &self,
        filter: Document,
        replacement: Document,
        options: &FindOneAndReplaceOptions,
        session: Option<&mut MemorySession>,
    ) -> DriverResult<Option<Document>> {
        self.store.check_hint(&self.ns, options.hint.as_ref())?;
        let spec = UpdateSpec {
            filter: &filter,
            modification: Modification::Replacement(&replacement),
            multi: false,
            upsert: options.upsert,
            sort: options.sort.as_ref(),
        };
        let outcome = self.update_with(spec, "findAndModify", session)?;
        let document = match options.return_document {
            ReturnDocument::Before => outcome.before,
            ReturnDocument::After => outcome.after,
        };
        match (document, &options.projection) {
            (Some(document), Some(projection)) => matcher::project(&document, projection).map(Some),
            (document, _) => Ok(document),
        }
    }

    fn find_one_and_delete(
        &self,
        filter: Document,
        session: Option<&mut MemorySession>,
    ) -> DriverResult<Option<Document>> {
        let session = self.write_checked(session)?;
        self.store.round_trip("findAndModify")?;
        let mut sink = WriteSink::default();
        let deleted = self.store.delete(&self.ns, &filter, false, &mut sink);
        settle(&self.store, session, sink);
        Ok(deleted?.1)
    }

    fn count_documents(&self, filter: Option<Document>, session: Option<&mut MemorySession>) -> DriverResult<u64> {
        checked(&self.store, session)?;
        self.store.round_trip("aggregate")?;
        self.count_documents_unchecked(&filter.unwrap_or_default())
    }

    fn estimated_document_count(&self) -> DriverResult<u64> {
        self.store.round_trip("count")?;
        Ok(self.store.snapshot(&self.ns).len() as u64)
    }

    fn distinct(
        &self,
        field: &str,
        filter: Option<Document>,
        session: Option<&mut MemorySession>,
    ) -> DriverResult<Vec<Bson>> {
        checked(&self.store, session)?;
        self.store.round_trip("distinct")?;
        let filter = filter.unwrap_or_default();

        let mut values: Vec<Bson> = Vec::new();
        for document in self.store.snapshot(&self.ns) {
            if !matcher::matches(&document, &filter)? {
                continue;
            }
            let candidates = match matcher::lookup(&document, field) {
                Some(Bson::Array(items)) => items.clone(),
                Some(value) => vec![value.clone()],
                None => continue,
            };
            for candidate in candidates {
                if !values.iter().any(|seen| matcher::compare_values(seen, &candidate) == Ordering::Equal) {
                    values.push(candidate);
                }
            }
        }
        values.sort_by(matcher::compare_values);
        Ok(values)
    }

    fn aggregate(
        &self,
        pipeline: Vec<Document>,
        options: &AggregateOptions,
        session: Option<&mut MemorySession>,
    ) -> DriverResult<MemoryCursor> {
        checked(&self.store, session)?;
        self.store.round_trip("aggregate")?;
        let results = matcher::run_pipeline(self.store.snapshot(&self.ns), &pipeline)?;
        Ok(MemoryCursor::open(self.store.clone(), results, options.batch_size, false))
    }

    fn list_indexes(&self, batch_size: Option<u32>, session: Option<&mut MemorySession>) -> DriverResult<MemoryCursor> {
        checked(&self.store, session)?;
        self.store.round_trip("listIndexes")?;
        let Some(indexes) = self.store.indexes(&self.ns) else {
            return Err(server_error(26, "NamespaceNotFound", format!("ns does not exist: {}", self.ns)));
        };
        let documents = indexes.iter().map(IndexSpec::to_document).collect();
        Ok(MemoryCursor::open(self.store.clone(), documents, batch_size, false))
    }

    fn create_index(
        &self,
        keys: Document,
        options: &IndexOptions,
        session: Option<&mut MemorySession>,
    ) -> DriverResult<String> {
        checked(&self.store, session)?;
        self.store.round_trip("createIndexes")?;
        if keys.is_empty() {
            return Err(server_error(67, "CannotCreateIndex", "index keys cannot be empty"));
        }
        let spec = IndexSpec {
            name: options.name.clone().unwrap_or_else(|| matcher::index_name(&keys)),
            keys,
            unique: options.unique,
        };
        self.store.create_index(&self.ns, spec)
    }

    fn create_indexes(
        &self,
        models: Vec<IndexModel>,
        session: Option<&mut MemorySession>,
    ) -> DriverResult<Vec<String>> {
        checked(&self.store, session)?;
        self.store.round_trip("createIndexes")?;
        let mut names = Vec::with_capacity(models.len());
        for model in models {
            if model.keys.is_empty() {
                return Err(server_error(67, "CannotCreateIndex", "index keys cannot be empty"));
            }
            let spec = IndexSpec {
                name: model.options.name.clone().unwrap_or_else(|| matcher::index_name(&model.keys)),
                keys: model.keys,
                unique: model.options.unique,
            };
            names.push(self.store.create_index(&self.ns, spec)?);
        }
        Ok(names)
    }

    fn drop_index(&self, name: &str, session: Option<&mut MemorySession>) -> DriverResult<()> {
        checked(&self.store, session)?;
        self.store.round_trip("dropIndexes")?;
        self.store.drop_index(&self.ns, name)
    }

    fn drop_indexes(&self, session: Option<&mut MemorySession>) -> DriverResult<()> {
        checked(&self.store, session)?;
        self.store.round_trip("dropIndexes")?;
        self.store.drop_indexes(&self.ns)
    }

    fn drop(&self, session: Option<&mut MemorySession>) -> DriverResult<()> {
        let session = checked(&self.store, session)?;
        reject_in_transaction(&session, "drop")?;
        self.store.round_trip("drop")?;
        let mut sink = WriteSink::default();
        if self.store.drop_collection(&self.ns, &mut sink) {
            debug!("删除内存集合: {}", self.ns);
        }
        settle(&self.store, session, sink);
        Ok(())
    }

    fn rename(&self, new_name: &str, drop_target: bool, session: Option<&mut MemorySession>) -> DriverResult<()> {
        let session = checked(&self.store, session)?;
        reject_in_transaction(&session, "renameCollection")?;
        self.store.round_trip("renameCollection")?;
        let target = Namespace::new(&self.ns.db, new_name);
        let mut sink = WriteSink::default();
        let renamed = self.store.rename_collection(&self.ns, &target, drop_target, &mut sink);
        settle(&self.store, session, sink);
        if renamed.is_ok() {
            debug!("重命名内存集合: {} -> {}", self.ns, target);
        }
        renamed
    }

    fn watch(&self, options: &ChangeStreamOptions) -> DriverResult<MemoryChangeStream> {
        self.store.round_trip("aggregate")?;
        MemoryChangeStream::open(self.store.clone(), WatchScope::Collection(self.ns.clone()), options)
    }
}
