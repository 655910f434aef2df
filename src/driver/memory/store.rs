//! 内存存储
//!
//! 保存所有集合、全局变更事件日志、故障注入点与按命令统计的往返次数。
//! 每次"网络往返"都要先经过 [`MemoryStore::round_trip`]，计数和故障注入都在这里发生。

use bson::{Bson, Document, Timestamp, doc, oid::ObjectId};
use dashmap::DashMap;
use parking_lot::{Condvar, Mutex};
use rat_logger::debug;
use std::cmp::Ordering;
use std::collections::BTreeSet;
use std::fmt;
use std::sync::atomic::{AtomicI64, AtomicU32, Ordering as AtomicOrdering};
use std::time::{Instant, SystemTime, UNIX_EPOCH};

use super::matcher::{self, server_error};
use crate::error::{DriverResult, ProviderError};
use crate::types::{FindOptions, Hint};

/// 集合命名空间
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub(crate) struct Namespace {
    pub db: String,
    pub coll: String,
}

impl Namespace {
    pub fn new(db: &str, coll: &str) -> Self {
        Self {
            db: db.to_string(),
            coll: coll.to_string(),
        }
    }
}

impl fmt::Display for Namespace {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.db, self.coll)
    }
}

/// 索引定义
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct IndexSpec {
    pub name: String,
    pub keys: Document,
    pub unique: bool,
}

impl IndexSpec {
    fn id_index() -> Self {
        Self {
            name: "_id_".to_string(),
            keys: doc! { "_id": 1 },
            unique: true,
        }
    }

    fn key_of(&self, document: &Document) -> Vec<Bson> {
        self.keys
            .keys()
            .map(|key| matcher::lookup(document, key).cloned().unwrap_or(Bson::Null))
            .collect()
    }

    pub fn to_document(&self) -> Document {
        let mut out = doc! { "v": 2, "key": self.keys.clone(), "name": self.name.as_str() };
        if self.unique && self.name != "_id_" {
            out.insert("unique", true);
        }
        out
    }
}

fn keys_equal(a: &[Bson], b: &[Bson]) -> bool {
    a.len() == b.len() && a.iter().zip(b).all(|(x, y)| matcher::compare_values(x, y) == Ordering::Equal)
}

fn duplicate_key(ns: &Namespace, index: &IndexSpec, document: &Document) -> ProviderError {
    let mut dup = Document::new();
    for key in index.keys.keys() {
        dup.insert(key, matcher::lookup(document, key).cloned().unwrap_or(Bson::Null));
    }
    server_error(
        11000,
        "DuplicateKey",
        format!("E11000 duplicate key error collection: {} index: {} dup key: {}", ns, index.name, dup),
    )
}

/// 单个集合的数据，文档按插入顺序保存
#[derive(Debug, Clone)]
pub(crate) struct CollectionData {
    pub documents: Vec<Document>,
    pub indexes: Vec<IndexSpec>,
}

impl Default for CollectionData {
    fn default() -> Self {
        Self {
            documents: Vec::new(),
            indexes: vec![IndexSpec::id_index()],
        }
    }
}

impl CollectionData {
    fn position_of(&self, id: &Bson) -> Option<usize> {
        self.documents.iter().position(|document| {
            document
                .get("_id")
                .map(|value| matcher::compare_values(value, id) == Ordering::Equal)
                .unwrap_or(false)
        })
    }

    fn check_unique(&self, ns: &Namespace, candidate: &Document, skip: Option<usize>) -> DriverResult<()> {
        for index in self.indexes.iter().filter(|index| index.unique) {
            let key = index.key_of(candidate);
            let clash = self
                .documents
                .iter()
                .enumerate()
                .filter(|(position, _)| Some(*position) != skip)
                .any(|(_, existing)| keys_equal(&index.key_of(existing), &key));
            if clash {
                return Err(duplicate_key(ns, index, candidate));
            }
        }
        Ok(())
    }

    fn matching_positions(
        &self,
        filter: &Document,
        sort: Option<&Document>,
        limit: Option<usize>,
    ) -> DriverResult<Vec<usize>> {
        let mut positions = Vec::new();
        for (position, document) in self.documents.iter().enumerate() {
            if matcher::matches(document, filter)? {
                positions.push(position);
            }
        }
        if let Some(sort) = sort {
            positions.sort_by(|a, b| matcher::compare_by_sort(&self.documents[*a], &self.documents[*b], sort));
        }
        if let Some(limit) = limit {
            positions.truncate(limit);
        }
        Ok(positions)
    }

    fn insert(&mut self, ns: &Namespace, document: Document, sink: &mut WriteSink) -> DriverResult<Bson> {
        let document = ensure_id(document);
        self.check_unique(ns, &document, None)?;
        let id = document.get("_id").cloned().unwrap_or(Bson::Null);
        sink.undo.push(UndoEntry::Inserted {
            ns: ns.clone(),
            id: id.clone(),
        });
        sink.events.push(ChangeEvent::insert(ns, &document));
        self.documents.push(document);
        Ok(id)
    }
}

/// 没有 _id 时生成 ObjectId，并放在第一个字段
fn ensure_id(document: Document) -> Document {
    if document.contains_key("_id") {
        return document;
    }
    with_id_first(document, Bson::ObjectId(ObjectId::new()))
}

fn with_id_first(document: Document, id: Bson) -> Document {
    let mut out = doc! { "_id": id };
    for (key, value) in document {
        if key != "_id" {
            out.insert(key, value);
        }
    }
    out
}

/// 变更事件
#[derive(Debug, Clone)]
pub(crate) struct ChangeEvent {
    /// 发布后分配的全局序号，从 1 开始
    pub seq: u64,
    /// 发布时的集群时间
    pub time: Timestamp,
    pub operation_type: &'static str,
    pub db: String,
    pub coll: Option<String>,
    pub document_key: Option<Document>,
    pub full_document: Option<Document>,
    pub update_description: Option<Document>,
    /// rename 事件的目标命名空间
    pub to: Option<Namespace>,
}

impl ChangeEvent {
    fn new(operation_type: &'static str, db: &str, coll: Option<&str>) -> Self {
        Self {
            seq: 0,
            time: Timestamp { time: 0, increment: 0 },
            operation_type,
            db: db.to_string(),
            coll: coll.map(str::to_string),
            document_key: None,
            full_document: None,
            update_description: None,
            to: None,
        }
    }

    fn document_key(document: &Document) -> Option<Document> {
        document.get("_id").map(|id| doc! { "_id": id.clone() })
    }

    fn insert(ns: &Namespace, document: &Document) -> Self {
        let mut event = Self::new("insert", &ns.db, Some(&ns.coll));
        event.document_key = Self::document_key(document);
        event.full_document = Some(document.clone());
        event
    }

    fn update(ns: &Namespace, before: &Document, after: &Document) -> Self {
        let mut event = Self::new("update", &ns.db, Some(&ns.coll));
        event.document_key = Self::document_key(after);

        let mut updated = Document::new();
        for (key, value) in after {
            if before.get(key) != Some(value) {
                updated.insert(key, value.clone());
            }
        }
        let removed: Vec<Bson> = before
            .keys()
            .filter(|key| !after.contains_key(key.as_str()))
            .map(|key| Bson::String(key.clone()))
            .collect();
        event.update_description = Some(doc! { "updatedFields": updated, "removedFields": removed });
        event
    }

    fn replace(ns: &Namespace, after: &Document) -> Self {
        let mut event = Self::new("replace", &ns.db, Some(&ns.coll));
        event.document_key = Self::document_key(after);
        event.full_document = Some(after.clone());
        event
    }

    fn delete(ns: &Namespace, before: &Document) -> Self {
        let mut event = Self::new("delete", &ns.db, Some(&ns.coll));
        event.document_key = Self::document_key(before);
        event
    }

    fn rename(from: &Namespace, to: &Namespace) -> Self {
        let mut event = Self::new("rename", &from.db, Some(&from.coll));
        event.to = Some(to.clone());
        event
    }

    pub fn namespace(&self) -> Document {
        match &self.coll {
            Some(coll) => doc! { "db": self.db.as_str(), "coll": coll.as_str() },
            None => doc! { "db": self.db.as_str() },
        }
    }
}

/// 事务回滚记录
#[derive(Debug, Clone)]
pub(crate) enum UndoEntry {
    Inserted { ns: Namespace, id: Bson },
    Updated { ns: Namespace, before: Document },
    Deleted { ns: Namespace, position: usize, before: Document },
}

/// 一次写操作产生的回滚记录与变更事件
///
/// 事务内由会话收下，事务外立即发布事件。
#[derive(Debug, Default)]
pub(crate) struct WriteSink {
    pub undo: Vec<UndoEntry>,
    pub events: Vec<ChangeEvent>,
}

/// 更新内容
#[derive(Debug, Clone, Copy)]
pub(crate) enum Modification<'a> {
    Operators(&'a Document),
    Replacement(&'a Document),
}

/// 一次更新请求
#[derive(Debug, Clone, Copy)]
pub(crate) struct UpdateSpec<'a> {
    pub filter: &'a Document,
    pub modification: Modification<'a>,
    pub multi: bool,
    pub upsert: bool,
    pub sort: Option<&'a Document>,
}

/// 更新结果，before/after 记录第一个命中的文档
#[derive(Debug, Default)]
pub(crate) struct UpdateOutcome {
    pub matched: u64,
    pub modified: u64,
    pub upserted_id: Option<Bson>,
    pub before: Option<Document>,
    pub after: Option<Document>,
}

/// 故障注入点
///
/// 模仿服务器的 `failCommand`：接下来 `times` 次执行指定命令时返回给定的错误码与标签。
/// `times` 为 None 时一直生效，直到被清除。
#[derive(Debug, Clone, PartialEq)]
pub struct FailPoint {
    pub commands: Vec<String>,
    pub times: Option<u32>,
    pub code: i32,
    pub code_name: Option<String>,
    pub labels: Vec<String>,
    pub message: String,
}

impl FailPoint {
    pub fn new(commands: &[&str], code: i32) -> Self {
        Self {
            commands: commands.iter().map(|command| command.to_string()).collect(),
            times: None,
            code,
            code_name: None,
            labels: Vec::new(),
            message: "Failing command via 'failCommand' failpoint".to_string(),
        }
    }

    /// 只生效 n 次
    pub fn times(mut self, times: u32) -> Self {
        self.times = Some(times);
        self
    }

    pub fn with_code_name(mut self, code_name: impl Into<String>) -> Self {
        self.code_name = Some(code_name.into());
        self
    }

    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.labels.push(label.into());
        self
    }

    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = message.into();
        self
    }

    fn applies_to(&self, command: &str) -> bool {
        self.times != Some(0) && self.commands.iter().any(|name| name == command)
    }

    fn to_error(&self) -> ProviderError {
        let mut err = ProviderError::new(self.message.clone())
            .with_code(self.code)
            .with_labels(self.labels.iter().cloned());
        if let Some(code_name) = &self.code_name {
            err = err.with_code_name(code_name.clone());
        }
        err
    }
}

/// 内存存储
pub(crate) struct MemoryStore {
    collections: DashMap<Namespace, CollectionData>,
    events: Mutex<Vec<ChangeEvent>>,
    event_signal: Condvar,
    fail_points: Mutex<Vec<FailPoint>>,
    command_counts: DashMap<String, u64>,
    next_cursor_id: AtomicI64,
    default_database: Option<String>,
    boot_secs: u32,
    clock: AtomicU32,
}

/// 比较两个集群时间
pub(crate) fn timestamp_cmp(a: &Timestamp, b: &Timestamp) -> Ordering {
    (a.time, a.increment).cmp(&(b.time, b.increment))
}

impl MemoryStore {
    pub fn new(default_database: Option<String>) -> Self {
        Self {
            collections: DashMap::new(),
            events: Mutex::new(Vec::new()),
            event_signal: Condvar::new(),
            fail_points: Mutex::new(Vec::new()),
            command_counts: DashMap::new(),
            next_cursor_id: AtomicI64::new(1),
            default_database,
            boot_secs: SystemTime::now()
                .duration_since(UNIX_EPOCH)
                .map(|elapsed| elapsed.as_secs() as u32)
                .unwrap_or(0),
            clock: AtomicU32::new(1),
        }
    }

    /// 推进逻辑时钟并返回新的集群时间
    pub fn tick(&self) -> Timestamp {
        let increment = self.clock.fetch_add(1, AtomicOrdering::SeqCst) + 1;
        Timestamp {
            time: self.boot_secs,
            increment,
        }
    }

    /// 当前集群时间
    pub fn current_time(&self) -> Timestamp {
        Timestamp {
            time: self.boot_secs,
            increment: self.clock.load(AtomicOrdering::SeqCst),
        }
    }

    pub fn default_database(&self) -> Option<&str> {
        self.default_database.as_deref()
    }

    /// 记录一次往返，并检查故障注入点
    pub fn round_trip(&self, command: &str) -> DriverResult<()> {
        *self.command_counts.entry(command.to_string()).or_insert(0) += 1;

        let mut fail_points = self.fail_points.lock();
        let Some(index) = fail_points.iter().position(|fail_point| fail_point.applies_to(command)) else {
            return Ok(());
        };

        let err = fail_points[index].to_error();
        let exhausted = match fail_points[index].times.as_mut() {
            Some(remaining) => {
                *remaining -= 1;
                *remaining == 0
            }
            None => false,
        };
        if exhausted {
            fail_points.remove(index);
        }
        debug!("💥 故障注入点触发: command={}, code={:?}", command, err.code());
        Err(err)
    }

    pub fn configure_fail_point(&self, fail_point: FailPoint) {
        self.fail_points.lock().push(fail_point);
    }

    pub fn clear_fail_points(&self) {
        self.fail_points.lock().clear();
    }

    pub fn command_count(&self, command: &str) -> u64 {
        self.command_counts.get(command).map(|count| *count).unwrap_or(0)
    }

    pub fn round_trips(&self) -> u64 {
        self.command_counts.iter().map(|entry| *entry.value()).sum()
    }

    pub fn reset_counters(&self) {
        self.command_counts.clear();
    }

    pub fn next_cursor_id(&self) -> i64 {
        self.next_cursor_id.fetch_add(1, AtomicOrdering::Relaxed)
    }

    pub fn database_names(&self) -> Vec<String> {
        let names: BTreeSet<String> = self.collections.iter().map(|entry| entry.key().db.clone()).collect();
        names.into_iter().collect()
    }

    pub fn collection_names(&self, db: &str) -> Vec<String> {
        let names: BTreeSet<String> = self
            .collections
            .iter()
            .filter(|entry| entry.key().db == db)
            .map(|entry| entry.key().coll.clone())
            .collect();
        names.into_iter().collect()
    }

    pub fn exists(&self, ns: &Namespace) -> bool {
        self.collections.contains_key(ns)
    }

    pub fn create_collection(&self, ns: &Namespace) -> DriverResult<()> {
        match self.collections.entry(ns.clone()) {
            dashmap::mapref::entry::Entry::Occupied(_) => Err(server_error(
                48,
                "NamespaceExists",
                format!("Collection {} already exists.", ns),
            )),
            dashmap::mapref::entry::Entry::Vacant(vacant) => {
                vacant.insert(CollectionData::default());
                Ok(())
            }
        }
    }

    /// 删除集合，返回集合之前是否存在
    pub fn drop_collection(&self, ns: &Namespace, sink: &mut WriteSink) -> bool {
        let existed = self.collections.remove(ns).is_some();
        if existed {
            sink.events.push(ChangeEvent::new("drop", &ns.db, Some(&ns.coll)));
        }
        existed
    }

    /// 重命名集合，文档与索引随之移动
    pub fn rename_collection(
        &self,
        from: &Namespace,
        to: &Namespace,
        drop_target: bool,
        sink: &mut WriteSink,
    ) -> DriverResult<()> {
        if from == to {
            return Err(server_error(20, "IllegalOperation", "Can't rename a collection to itself"));
        }
        if !self.exists(from) {
            return Err(server_error(26, "NamespaceNotFound", format!("Source collection {} does not exist", from)));
        }
        if self.exists(to) {
            if !drop_target {
                return Err(server_error(48, "NamespaceExists", format!("Collection {} already exists.", to)));
            }
            self.drop_collection(to, sink);
        }
        let Some((_, data)) = self.collections.remove(from) else {
            return Err(server_error(26, "NamespaceNotFound", format!("Source collection {} does not exist", from)));
        };
        self.collections.insert(to.clone(), data);
        sink.events.push(ChangeEvent::rename(from, to));
        Ok(())
    }

    /// 集合存在且没有与 hint 对应的索引时报错
    pub fn check_hint(&self, ns: &Namespace, hint: Option<&Hint>) -> DriverResult<()> {
        let (Some(hint), Some(data)) = (hint, self.collections.get(ns)) else {
            return Ok(());
        };
        let found = data.indexes.iter().any(|index| match hint {
            Hint::Name(name) => &index.name == name,
            Hint::Keys(keys) => &index.keys == keys,
        });
        if !found {
            return Err(server_error(2, "BadValue", "hint provided does not correspond to an existing index"));
        }
        Ok(())
    }

    pub fn drop_database(&self, db: &str, sink: &mut WriteSink) {
        for coll in self.collection_names(db) {
            self.drop_collection(&Namespace::new(db, &coll), sink);
        }
        sink.events.push(ChangeEvent::new("dropDatabase", db, None));
    }

    /// 集合当前全部文档的快照
    pub fn snapshot(&self, ns: &Namespace) -> Vec<Document> {
        self.collections
            .get(ns)
            .map(|data| data.documents.clone())
            .unwrap_or_default()
    }

    pub fn find_by_id(&self, ns: &Namespace, id: &Bson) -> Option<Document> {
        let data = self.collections.get(ns)?;
        data.position_of(id).map(|position| data.documents[position].clone())
    }

    /// 执行查询，返回结果与查询时集合的长度（可追加游标从这里继续）
    pub fn query(&self, ns: &Namespace, filter: &Document, options: &FindOptions) -> DriverResult<(Vec<Document>, usize)> {
        let snapshot = self.snapshot(ns);
        let end = snapshot.len();

        let mut docs = Vec::new();
        for document in snapshot {
            if matcher::matches(&document, filter)? {
                docs.push(document);
            }
        }
        if let Some(sort) = &options.sort {
            matcher::sort_documents(&mut docs, sort);
        }
        let skip = options.skip.unwrap_or(0) as usize;
        let mut docs: Vec<Document> = docs.into_iter().skip(skip).collect();
        if let Some(limit) = options.limit.filter(|limit| *limit != 0) {
            docs.truncate(limit.unsigned_abs() as usize);
        }
        if let Some(projection) = &options.projection {
            docs = docs
                .iter()
                .map(|document| matcher::project(document, projection))
                .collect::<DriverResult<Vec<_>>>()?;
        }
        Ok((docs, end))
    }

    /// 读取 position 之后新插入的匹配文档
    pub fn tail(&self, ns: &Namespace, filter: &Document, position: &mut usize) -> DriverResult<Vec<Document>> {
        let Some(data) = self.collections.get(ns) else {
            return Ok(Vec::new());
        };
        let mut out = Vec::new();
        for document in data.documents.iter().skip(*position) {
            if matcher::matches(document, filter)? {
                out.push(document.clone());
            }
        }
        *position = data.documents.len();
        Ok(out)
    }

    pub fn insert(&self, ns: &Namespace, document: Document, sink: &mut WriteSink) -> DriverResult<Bson> {
        self.collections.entry(ns.clone()).or_default().insert(ns, document, sink)
    }

    pub fn update(&self, ns: &Namespace, spec: UpdateSpec<'_>, sink: &mut WriteSink) -> DriverResult<UpdateOutcome> {
        match spec.modification {
            Modification::Operators(update) if !matcher::is_update_document(update) => {
                return Err(server_error(9, "FailedToParse", "update document requires atomic operators"));
            }
            Modification::Replacement(replacement) if matcher::is_update_document(replacement) => {
                return Err(server_error(2, "BadValue", "replacement document must not contain atomic operators"));
            }
            _ => {}
        }

        let mut entry = self.collections.entry(ns.clone()).or_default();
        let data = entry.value_mut();
        let limit = if spec.multi { None } else { Some(1) };
        let targets = data.matching_positions(spec.filter, spec.sort, limit)?;
        let mut outcome = UpdateOutcome::default();

        if targets.is_empty() {
            if !spec.upsert {
                return Ok(outcome);
            }
            let seed = matcher::seed_from_filter(spec.filter)?;
            let document = match spec.modification {
                Modification::Operators(update) => {
                    let mut document = seed;
                    matcher::apply_update(&mut document, update, true)?;
                    document
                }
                Modification::Replacement(replacement) => match seed.get("_id") {
                    Some(id) if !replacement.contains_key("_id") => with_id_first(replacement.clone(), id.clone()),
                    _ => replacement.clone(),
                },
            };
            let id = data.insert(ns, document, sink)?;
            outcome.after = data.position_of(&id).map(|position| data.documents[position].clone());
            outcome.upserted_id = Some(id);
            return Ok(outcome);
        }

        for position in targets {
            let before = data.documents[position].clone();
            let original_id = before.get("_id").cloned().unwrap_or(Bson::Null);
            let after = match spec.modification {
                Modification::Operators(update) => {
                    let mut after = before.clone();
                    matcher::apply_update(&mut after, update, false)?;
                    after
                }
                Modification::Replacement(replacement) if !replacement.contains_key("_id") => {
                    with_id_first(replacement.clone(), original_id.clone())
                }
                Modification::Replacement(replacement) => replacement.clone(),
            };

            let id_changed = after
                .get("_id")
                .map(|id| matcher::compare_values(id, &original_id) != Ordering::Equal)
                .unwrap_or(true);
            if id_changed {
                return Err(server_error(
                    66,
                    "ImmutableField",
                    "Performing an update on the path '_id' would modify the immutable field '_id'",
                ));
            }

            outcome.matched += 1;
            if outcome.before.is_none() {
                outcome.before = Some(before.clone());
                outcome.after = Some(after.clone());
            }
            if after == before {
                continue;
            }

            data.check_unique(ns, &after, Some(position))?;
            let event = match spec.modification {
                Modification::Operators(_) => ChangeEvent::update(ns, &before, &after),
                Modification::Replacement(_) => ChangeEvent::replace(ns, &after),
            };
            data.documents[position] = after;
            outcome.modified += 1;
            sink.undo.push(UndoEntry::Updated { ns: ns.clone(), before });
            sink.events.push(event);
        }
        Ok(outcome)
    }

    /// 删除匹配文档，返回删除数量与第一个被删除的文档
    pub fn delete(
        &self,
        ns: &Namespace,
        filter: &Document,
        multi: bool,
        sink: &mut WriteSink,
    ) -> DriverResult<(u64, Option<Document>)> {
        let Some(mut data) = self.collections.get_mut(ns) else {
            return Ok((0, None));
        };
        let limit = if multi { None } else { Some(1) };
        let mut positions = data.matching_positions(filter, None, limit)?;
        positions.sort_unstable();

        let mut removed = Vec::with_capacity(positions.len());
        for position in positions.into_iter().rev() {
            let before = data.documents.remove(position);
            sink.undo.push(UndoEntry::Deleted {
                ns: ns.clone(),
                position,
                before: before.clone(),
            });
            removed.push(before);
        }
        removed.reverse();
        for before in &removed {
            sink.events.push(ChangeEvent::delete(ns, before));
        }
        Ok((removed.len() as u64, removed.into_iter().next()))
    }

    /// 按相反顺序撤销写操作
    pub fn rollback(&self, undo: Vec<UndoEntry>) {
        for entry in undo.into_iter().rev() {
            match entry {
                UndoEntry::Inserted { ns, id } => {
                    if let Some(mut data) = self.collections.get_mut(&ns) {
                        if let Some(position) = data.position_of(&id) {
                            data.documents.remove(position);
                        }
                    }
                }
                UndoEntry::Updated { ns, before } => {
                    if let Some(mut data) = self.collections.get_mut(&ns) {
                        let position = before.get("_id").and_then(|id| data.position_of(id));
                        if let Some(position) = position {
                            data.documents[position] = before;
                        }
                    }
                }
                UndoEntry::Deleted { ns, position, before } => {
                    let mut data = self.collections.entry(ns).or_default();
                    let position = position.min(data.documents.len());
                    data.documents.insert(position, before);
                }
            }
        }
    }

    pub fn indexes(&self, ns: &Namespace) -> Option<Vec<IndexSpec>> {
        self.collections.get(ns).map(|data| data.indexes.clone())
    }

    pub fn create_index(&self, ns: &Namespace, spec: IndexSpec) -> DriverResult<String> {
        let mut entry = self.collections.entry(ns.clone()).or_default();
        let data = entry.value_mut();

        if let Some(existing) = data.indexes.iter().find(|index| index.name == spec.name) {
            if existing.keys == spec.keys && existing.unique == spec.unique {
                return Ok(spec.name);
            }
            return Err(server_error(
                85,
                "IndexOptionsConflict",
                format!("An existing index has the same name as the requested index: {}", spec.name),
            ));
        }

        if spec.unique {
            for (position, document) in data.documents.iter().enumerate() {
                let key = spec.key_of(document);
                let clash = data.documents[position + 1..]
                    .iter()
                    .any(|other| keys_equal(&spec.key_of(other), &key));
                if clash {
                    return Err(duplicate_key(ns, &spec, document));
                }
            }
        }

        let name = spec.name.clone();
        data.indexes.push(spec);
        Ok(name)
    }

    pub fn drop_index(&self, ns: &Namespace, name: &str) -> DriverResult<()> {
        if name == "_id_" {
            return Err(server_error(72, "InvalidOptions", "cannot drop _id index"));
        }
        let Some(mut data) = self.collections.get_mut(ns) else {
            return Err(server_error(26, "NamespaceNotFound", format!("ns not found {}", ns)));
        };
        let before = data.indexes.len();
        data.indexes.retain(|index| index.name != name);
        if data.indexes.len() == before {
            return Err(server_error(27, "IndexNotFound", format!("index not found with name [{}]", name)));
        }
        Ok(())
    }

    pub fn drop_indexes(&self, ns: &Namespace) -> DriverResult<()> {
        let Some(mut data) = self.collections.get_mut(ns) else {
            return Err(server_error(26, "NamespaceNotFound", format!("ns not found {}", ns)));
        };
        data.indexes.retain(|index| index.name == "_id_");
        Ok(())
    }

    /// 发布变更事件并唤醒等待中的变更流
    pub fn publish(&self, events: Vec<ChangeEvent>) {
        if events.is_empty() {
            return;
        }
        let mut log = self.events.lock();
        for mut event in events {
            event.seq = log.len() as u64 + 1;
            event.time = self.tick();
            log.push(event);
        }
        drop(log);
        self.event_signal.notify_all();
    }

    /// 当前最新事件的序号
    pub fn head_seq(&self) -> u64 {
        self.events.lock().len() as u64
    }

    /// 集群时间不早于 time 的第一个事件之前的序号
    pub fn seq_at(&self, time: &Timestamp) -> u64 {
        let log = self.events.lock();
        log.iter()
            .position(|event| timestamp_cmp(&event.time, time) != Ordering::Less)
            .unwrap_or(log.len()) as u64
    }

    /// 等待序号大于 after 的事件，最多等到 deadline
    pub fn wait_for_events(&self, after: u64, deadline: Instant) -> Vec<ChangeEvent> {
        let mut log = self.events.lock();
        while log.len() as u64 <= after {
            if self.event_signal.wait_until(&mut log, deadline).timed_out() {
                break;
            }
        }
        log.iter().skip(after as usize).cloned().collect()
    }
}
