//! 内存会话与事务

use bson::{Binary, Bson, Document, Timestamp, doc, spec::BinarySubtype};
use rat_logger::debug;
use std::cmp::Ordering;
use std::sync::Arc;

use super::MemoryDriver;
use super::store::{ChangeEvent, MemoryStore, UndoEntry, WriteSink, timestamp_cmp};
use crate::driver::SessionDelegate;
use crate::error::{DriverResult, ProviderError, UNKNOWN_TRANSACTION_COMMIT_RESULT};
use crate::types::{SessionOptions, TransactionOptions};

/// 事务状态
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TransactionState {
    None,
    InProgress,
    Committed,
    Aborted,
}

/// 内存会话
///
/// 事务内的写操作立即生效，同时记录回滚日志；变更事件在提交时才发布。
pub struct MemorySession {
    id: Document,
    store: Arc<MemoryStore>,
    state: TransactionState,
    ended: bool,
    txn_number: i64,
    undo: Vec<UndoEntry>,
    pending_events: Vec<ChangeEvent>,
    options: SessionOptions,
    transaction_options: TransactionOptions,
    cluster_time: Option<Timestamp>,
    operation_time: Option<Timestamp>,
}

fn newer(current: Option<Timestamp>, candidate: Timestamp) -> Option<Timestamp> {
    match current {
        Some(current) if timestamp_cmp(&current, &candidate) != Ordering::Less => Some(current),
        _ => Some(candidate),
    }
}

impl MemorySession {
    pub(crate) fn new(store: Arc<MemoryStore>, options: SessionOptions) -> Self {
        let uuid = uuid::Uuid::new_v4();
        let binary = Bson::Binary(Binary {
            subtype: BinarySubtype::Uuid,
            bytes: uuid.as_bytes().to_vec(),
        });
        let id = doc! { "id": binary };
        Self {
            id,
            store,
            state: TransactionState::None,
            ended: false,
            txn_number: 0,
            undo: Vec::new(),
            pending_events: Vec::new(),
            options,
            transaction_options: TransactionOptions::default(),
            cluster_time: None,
            operation_time: None,
        }
    }

    /// 记录一次往返看到的集群时间
    pub(crate) fn observe(&mut self, time: Timestamp) {
        self.cluster_time = newer(self.cluster_time, time);
        self.operation_time = newer(self.operation_time, time);
    }

    /// 已结束的会话不能再用于任何操作
    pub(crate) fn ensure_usable(&self) -> DriverResult<()> {
        if self.ended {
            return Err(ProviderError::new("Cannot use ended session"));
        }
        Ok(())
    }

    /// 收下一次写操作的结果：事务内暂存，事务外立即发布
    pub(crate) fn absorb(&mut self, sink: WriteSink) {
        if self.state == TransactionState::InProgress {
            self.undo.extend(sink.undo);
            self.pending_events.extend(sink.events);
        } else {
            self.store.publish(sink.events);
        }
        let now = self.store.current_time();
        self.observe(now);
    }

    pub fn txn_number(&self) -> i64 {
        self.txn_number
    }

    pub fn options(&self) -> &SessionOptions {
        &self.options
    }

    pub fn transaction_options(&self) -> &TransactionOptions {
        &self.transaction_options
    }

    fn rollback(&mut self) {
        let undo = std::mem::take(&mut self.undo);
        self.pending_events.clear();
        self.store.rollback(undo);
    }
}

impl SessionDelegate<MemoryDriver> for MemorySession {
    fn id(&self) -> Document {
        self.id.clone()
    }

    fn start_transaction(&mut self, options: &TransactionOptions) -> DriverResult<()> {
        self.ensure_usable()?;
        if self.state == TransactionState::InProgress {
            return Err(ProviderError::new("Transaction already in progress"));
        }

        let defaults = self.options.default_transaction_options.clone().unwrap_or_default();
        self.transaction_options = TransactionOptions {
            read_concern: options.read_concern.clone().or(defaults.read_concern),
            write_concern: options.write_concern.clone().or(defaults.write_concern),
            max_commit_time: options.max_commit_time.or(defaults.max_commit_time),
        };
        self.undo.clear();
        self.pending_events.clear();
        self.txn_number += 1;
        self.state = TransactionState::InProgress;
        debug!("内存事务开始: txn_number={}", self.txn_number);
        Ok(())
    }

    fn commit_transaction(&mut self) -> DriverResult<()> {
        self.ensure_usable()?;
        match self.state {
            TransactionState::None => return Err(ProviderError::new("No transaction started")),
            TransactionState::Aborted => {
                return Err(ProviderError::new(
                    "Cannot call commitTransaction after calling abortTransaction",
                ));
            }
            TransactionState::InProgress | TransactionState::Committed => {}
        }

        self.state = TransactionState::Committed;
        match self.store.round_trip("commitTransaction") {
            Ok(()) => {
                self.undo.clear();
                let events = std::mem::take(&mut self.pending_events);
                self.store.publish(events);
                let now = self.store.current_time();
                self.observe(now);
                debug!("内存事务提交: txn_number={}", self.txn_number);
                Ok(())
            }
            Err(err) => {
                // 结果未知时保留写入，允许重试提交
                if !err.has_error_label(UNKNOWN_TRANSACTION_COMMIT_RESULT) {
                    self.rollback();
                }
                Err(err)
            }
        }
    }

    fn abort_transaction(&mut self) -> DriverResult<()> {
        self.ensure_usable()?;
        match self.state {
            TransactionState::None => return Err(ProviderError::new("No transaction started")),
            TransactionState::Committed => {
                return Err(ProviderError::new(
                    "Cannot call abortTransaction after calling commitTransaction",
                ));
            }
            TransactionState::Aborted => return Err(ProviderError::new("Cannot call abortTransaction twice")),
            TransactionState::InProgress => {}
        }

        self.rollback();
        self.state = TransactionState::Aborted;
        // 中止失败不影响本地状态
        if let Err(err) = self.store.round_trip("abortTransaction") {
            debug!("忽略 abortTransaction 错误: {}", err);
        }
        Ok(())
    }

    fn in_transaction(&self) -> bool {
        self.state == TransactionState::InProgress
    }

    fn end_session(&mut self) -> DriverResult<()> {
        if self.ended {
            return Ok(());
        }
        if self.state == TransactionState::InProgress {
            self.abort_transaction()?;
        }
        self.ended = true;
        Ok(())
    }

    fn has_ended(&self) -> bool {
        self.ended
    }

    fn cluster_time(&self) -> Option<Document> {
        self.cluster_time.map(|time| doc! { "clusterTime": Bson::Timestamp(time) })
    }

    fn operation_time(&self) -> Option<Timestamp> {
        self.operation_time
    }

    fn advance_cluster_time(&mut self, cluster_time: &Document) -> DriverResult<()> {
        let time = cluster_time
            .get_timestamp("clusterTime")
            .map_err(|_| ProviderError::new("cluster_time must contain a 'clusterTime' timestamp"))?;
        self.cluster_time = newer(self.cluster_time, time);
        Ok(())
    }

    fn advance_operation_time(&mut self, operation_time: Timestamp) -> DriverResult<()> {
        self.operation_time = newer(self.operation_time, operation_time);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ts(increment: u32) -> Timestamp {
        Timestamp { time: 100, increment }
    }

    #[test]
    fn test_times_only_move_forward() {
        let mut session = MemorySession::new(Arc::new(MemoryStore::new(None)), SessionOptions::default());
        assert!(session.cluster_time().is_none());

        session.advance_operation_time(ts(5)).unwrap();
        session.advance_operation_time(ts(3)).unwrap();
        assert_eq!(session.operation_time(), Some(ts(5)));

        session.advance_cluster_time(&doc! { "clusterTime": ts(9) }).unwrap();
        session.advance_cluster_time(&doc! { "clusterTime": ts(2) }).unwrap();
        assert_eq!(session.cluster_time(), Some(doc! { "clusterTime": ts(9) }));

        assert!(session.advance_cluster_time(&doc! { "other": 1 }).is_err());
    }
}
