//! 内存变更流
//!
//! 读取存储的全局事件日志。恢复令牌格式为 `{_data: "<16位十六进制序号>"}`，
//! invalidate 事件的令牌额外带 `01` 后缀，只能用于 start_after。

use bson::{Bson, Document, doc};
use rat_logger::debug;
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::{Duration, Instant};

use super::MemoryDriver;
use super::matcher::{self, server_error};
use super::store::{ChangeEvent, MemoryStore, Namespace};
use crate::driver::ChangeStreamDelegate;
use crate::error::DriverResult;
use crate::types::{ChangeStreamOptions, FullDocument};

/// 未设置 max_await_time 时单次轮询的等待时间
pub(crate) const DEFAULT_MAX_AWAIT: Duration = Duration::from_millis(100);

const INVALIDATE_SUFFIX: &str = "01";

/// 监听范围
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum WatchScope {
    Cluster,
    Database(String),
    Collection(Namespace),
}

impl WatchScope {
    fn covers(&self, event: &ChangeEvent) -> bool {
        match self {
            WatchScope::Cluster => true,
            WatchScope::Database(db) => &event.db == db,
            WatchScope::Collection(ns) => {
                event.db == ns.db && (event.coll.as_deref() == Some(ns.coll.as_str()) || event.coll.is_none())
            }
        }
    }

    /// 事件是否使本变更流失效
    fn invalidated_by(&self, event: &ChangeEvent) -> bool {
        match self {
            WatchScope::Cluster => false,
            WatchScope::Database(db) => event.operation_type == "dropDatabase" && &event.db == db,
            WatchScope::Collection(ns) => {
                event.db == ns.db
                    && (event.operation_type == "dropDatabase"
                        || (matches!(event.operation_type, "drop" | "rename")
                            && event.coll.as_deref() == Some(ns.coll.as_str())))
            }
        }
    }
}

fn token(seq: u64) -> Document {
    doc! { "_data": format!("{:016X}", seq) }
}

fn invalidate_token(seq: u64) -> Document {
    doc! { "_data": format!("{:016X}{}", seq, INVALIDATE_SUFFIX) }
}

/// 解析恢复令牌，返回序号与是否为 invalidate 令牌
fn parse_token(token: &Document) -> DriverResult<(u64, bool)> {
    let invalid = || server_error(260, "InvalidResumeToken", format!("invalid resume token: {}", token));
    let data = token.get_str("_data").map_err(|_| invalid())?;
    let (seq, suffix) = data.split_at(data.len().min(16));
    let seq = u64::from_str_radix(seq, 16).map_err(|_| invalid())?;
    match suffix {
        "" => Ok((seq, false)),
        INVALIDATE_SUFFIX => Ok((seq, true)),
        _ => Err(invalid()),
    }
}

/// 内存变更流
pub struct MemoryChangeStream {
    store: Arc<MemoryStore>,
    scope: WatchScope,
    pipeline: Vec<Document>,
    full_document: Option<FullDocument>,
    max_await: Duration,
    position: u64,
    buffer: VecDeque<Document>,
    resume_token: Option<Document>,
    invalidated: bool,
    closed: bool,
}

impl MemoryChangeStream {
    pub(crate) fn open(store: Arc<MemoryStore>, scope: WatchScope, options: &ChangeStreamOptions) -> DriverResult<Self> {
        let position = match (&options.start_after, &options.resume_after) {
            (Some(token), _) => parse_token(token)?.0,
            (None, Some(token)) => {
                let (seq, invalidate) = parse_token(token)?;
                if invalidate {
                    return Err(server_error(
                        260,
                        "InvalidResumeToken",
                        "cannot resume stream after an invalidate event; use startAfter instead",
                    ));
                }
                seq
            }
            (None, None) => match &options.start_at_operation_time {
                Some(time) => store.seq_at(time),
                None => store.head_seq(),
            },
        };

        // 校验管道
        matcher::run_pipeline(Vec::new(), &options.pipeline)?;

        debug!("打开内存变更流: scope={:?}, position={}", scope, position);
        Ok(Self {
            store,
            scope,
            pipeline: options.pipeline.clone(),
            full_document: options.full_document,
            max_await: options.max_await_time.unwrap_or(DEFAULT_MAX_AWAIT),
            position,
            buffer: VecDeque::new(),
            resume_token: options.start_after.clone().or_else(|| options.resume_after.clone()),
            invalidated: false,
            closed: false,
        })
    }

    fn render(&self, event: &ChangeEvent) -> DriverResult<Document> {
        let mut out = doc! {
            "_id": token(event.seq),
            "operationType": event.operation_type,
            "clusterTime": Bson::Timestamp(event.time),
            "ns": event.namespace(),
        };
        if let Some(to) = &event.to {
            out.insert("to", doc! { "db": to.db.as_str(), "coll": to.coll.as_str() });
        }
        if let Some(key) = &event.document_key {
            out.insert("documentKey", key.clone());
        }
        if let Some(description) = &event.update_description {
            out.insert("updateDescription", description.clone());
        }

        let full_document = match (event.operation_type, self.full_document) {
            ("update", Some(FullDocument::UpdateLookup | FullDocument::WhenAvailable | FullDocument::Required)) => {
                let looked_up = match (&event.coll, event.document_key.as_ref().and_then(|key| key.get("_id"))) {
                    (Some(coll), Some(id)) => self.store.find_by_id(&Namespace::new(&event.db, coll), id),
                    _ => None,
                };
                if looked_up.is_none() && self.full_document == Some(FullDocument::Required) {
                    return Err(server_error(
                        286,
                        "ChangeStreamHistoryLost",
                        "full document required but no longer available",
                    ));
                }
                Some(looked_up.map(Bson::Document).unwrap_or(Bson::Null))
            }
            _ => event.full_document.clone().map(Bson::Document),
        };
        if let Some(full_document) = full_document {
            out.insert("fullDocument", full_document);
        }
        Ok(out)
    }

    /// 拉取新事件到本地缓冲，只在缓冲为空时调用
    fn poll(&mut self) -> DriverResult<()> {
        self.store.round_trip("getMore")?;
        let deadline = Instant::now() + self.max_await;
        let events = self.store.wait_for_events(self.position, deadline);

        for event in events {
            self.position = event.seq;
            if !self.scope.covers(&event) {
                continue;
            }
            let rendered = self.render(&event)?;
            self.buffer.extend(matcher::run_pipeline(vec![rendered], &self.pipeline)?);

            if self.scope.invalidated_by(&event) {
                self.buffer.push_back(doc! {
                    "_id": invalidate_token(event.seq),
                    "operationType": "invalidate",
                });
                break;
            }
        }
        Ok(())
    }
}

impl ChangeStreamDelegate<MemoryDriver> for MemoryChangeStream {
    fn try_next(&mut self) -> DriverResult<Option<Document>> {
        if self.closed {
            return Err(server_error(43, "CursorNotFound", "change stream cursor has been closed"));
        }
        if self.buffer.is_empty() && !self.invalidated {
            self.poll()?;
        }

        let Some(change) = self.buffer.pop_front() else {
            return Ok(None);
        };
        if let Ok(id) = change.get_document("_id") {
            self.resume_token = Some(id.clone());
        }
        if matches!(change.get_str("operationType"), Ok("invalidate")) {
            self.invalidated = true;
            self.buffer.clear();
        }
        Ok(Some(change))
    }

    fn is_alive(&self) -> bool {
        !self.closed && (!self.invalidated || !self.buffer.is_empty())
    }

    fn resume_token(&self) -> Option<Document> {
        self.resume_token.clone()
    }

    fn close(&mut self) -> DriverResult<()> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;
        self.buffer.clear();
        if !self.invalidated {
            self.store.round_trip("killCursors")?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_token_round_trip() {
        assert_eq!(parse_token(&token(42)).unwrap(), (42, false));
        assert_eq!(parse_token(&invalidate_token(7)).unwrap(), (7, true));
        assert_eq!(parse_token(&doc! { "_data": "zz" }).unwrap_err().code(), Some(260));
    }

    #[test]
    fn test_scope_invalidation() {
        let ns = Namespace::new("db", "items");
        let scope = WatchScope::Collection(ns.clone());
        let mut drop_event = ChangeEvent {
            seq: 1,
            time: bson::Timestamp { time: 0, increment: 1 },
            operation_type: "drop",
            db: "db".to_string(),
            coll: Some("items".to_string()),
            document_key: None,
            full_document: None,
            update_description: None,
            to: None,
        };
        assert!(scope.invalidated_by(&drop_event));
        assert!(!WatchScope::Cluster.invalidated_by(&drop_event));

        drop_event.operation_type = "rename";
        assert!(scope.invalidated_by(&drop_event));

        drop_event.coll = Some("other".to_string());
        assert!(!scope.covers(&drop_event));
        assert!(WatchScope::Database("db".to_string()).covers(&drop_event));
    }
}
