//! 操作选项定义

use bson::{Document, Timestamp};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// 游标类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum CursorType {
    /// 普通游标，结果耗尽即关闭
    #[default]
    NonTailable,
    /// 可追加游标（固定集合），永不自然结束
    Tailable,
    /// 可追加且服务器端等待新数据
    TailableAwait,
}

impl CursorType {
    pub fn is_tailable(&self) -> bool {
        !matches!(self, CursorType::NonTailable)
    }
}

/// 排序规则
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Collation {
    /// 区域设置，例如 "en" 或 "zh"
    pub locale: String,
    /// 比较强度 1-5
    pub strength: Option<u32>,
}

impl Collation {
    pub fn new(locale: impl Into<String>) -> Self {
        Self {
            locale: locale.into(),
            strength: None,
        }
    }
}

/// 索引提示，按索引名或索引键指定
#[derive(Debug, Clone, PartialEq)]
pub enum Hint {
    Name(String),
    Keys(Document),
}

/// 查询选项
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FindOptions {
    pub sort: Option<Document>,
    pub skip: Option<u64>,
    pub limit: Option<i64>,
    pub projection: Option<Document>,
    pub batch_size: Option<u32>,
    pub cursor_type: CursorType,
    pub hint: Option<Hint>,
    pub max_time: Option<Duration>,
    /// 可追加等待游标每次 getMore 的最长等待时间
    pub max_await_time: Option<Duration>,
    pub allow_disk_use: Option<bool>,
    pub comment: Option<String>,
    pub collation: Option<Collation>,
}

/// 聚合选项
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AggregateOptions {
    pub batch_size: Option<u32>,
    pub allow_disk_use: Option<bool>,
    pub max_time: Option<Duration>,
    pub comment: Option<String>,
    pub collation: Option<Collation>,
}

/// 更新选项
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UpdateOptions {
    /// 没有匹配文档时插入新文档
    pub upsert: bool,
}

/// find_one_and_update 返回更新前还是更新后的文档
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ReturnDocument {
    #[default]
    Before,
    After,
}

/// find_one_and_update 选项
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FindOneAndUpdateOptions {
    pub return_document: ReturnDocument,
    pub upsert: bool,
    pub sort: Option<Document>,
    pub projection: Option<Document>,
}

/// find_one_and_replace 选项
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FindOneAndReplaceOptions {
    pub return_document: ReturnDocument,
    pub upsert: bool,
    pub sort: Option<Document>,
    pub projection: Option<Document>,
    pub hint: Option<Hint>,
}

/// 索引选项
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IndexOptions {
    /// 索引名，未设置时按键自动生成
    pub name: Option<String>,
    pub unique: bool,
}

/// create_indexes 的单个索引定义
#[derive(Debug, Clone, PartialEq)]
pub struct IndexModel {
    pub keys: Document,
    pub options: IndexOptions,
}

impl IndexModel {
    pub fn new(keys: Document) -> Self {
        Self {
            keys,
            options: IndexOptions::default(),
        }
    }

    pub fn with_options(mut self, options: IndexOptions) -> Self {
        self.options = options;
        self
    }
}

/// 变更流 fullDocument 模式
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FullDocument {
    Default,
    UpdateLookup,
    WhenAvailable,
    Required,
}

/// 变更流选项
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ChangeStreamOptions {
    /// 追加在 $changeStream 之后的管道
    pub pipeline: Vec<Document>,
    pub full_document: Option<FullDocument>,
    /// 从该恢复令牌之后继续
    pub resume_after: Option<Document>,
    /// 与 resume_after 类似，但允许越过 invalidate 事件
    pub start_after: Option<Document>,
    /// 服务器端等待新事件的最长时间
    pub max_await_time: Option<Duration>,
    /// 从该操作时间开始监听
    pub start_at_operation_time: Option<Timestamp>,
    pub batch_size: Option<u32>,
    pub collation: Option<Collation>,
}

/// 读关注级别
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ReadConcernLevel {
    Local,
    Majority,
    Snapshot,
    Custom(String),
}

impl ReadConcernLevel {
    pub fn as_str(&self) -> &str {
        match self {
            ReadConcernLevel::Local => "local",
            ReadConcernLevel::Majority => "majority",
            ReadConcernLevel::Snapshot => "snapshot",
            ReadConcernLevel::Custom(level) => level,
        }
    }
}

/// 写关注级别
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum WriteConcernLevel {
    /// 等待指定数量的节点确认
    Nodes(u32),
    Majority,
}

/// 读偏好
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ReadPreference {
    Primary,
    PrimaryPreferred,
    Secondary,
    SecondaryPreferred,
    Nearest,
}

/// 读写关注与读偏好
///
/// `with_options` 用它派生新的委托，未设置的项沿用原委托的值。
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ConcernOptions {
    pub read_preference: Option<ReadPreference>,
    pub read_concern: Option<ReadConcernLevel>,
    pub write_concern: Option<WriteConcernLevel>,
}

impl ConcernOptions {
    /// 以 `overrides` 中已设置的项覆盖当前值
    pub fn merged(&self, overrides: &ConcernOptions) -> ConcernOptions {
        ConcernOptions {
            read_preference: overrides.read_preference.or(self.read_preference),
            read_concern: overrides.read_concern.clone().or_else(|| self.read_concern.clone()),
            write_concern: overrides.write_concern.clone().or_else(|| self.write_concern.clone()),
        }
    }
}

/// 事务选项
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TransactionOptions {
    pub read_concern: Option<ReadConcernLevel>,
    pub write_concern: Option<WriteConcernLevel>,
    pub max_commit_time: Option<Duration>,
}

/// 会话选项
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SessionOptions {
    pub causal_consistency: Option<bool>,
    pub snapshot: Option<bool>,
    pub default_transaction_options: Option<TransactionOptions>,
}
