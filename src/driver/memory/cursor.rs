//! 内存服务器游标

use bson::Document;
use rat_logger::debug;
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::{Duration, Instant};

use super::MemoryDriver;
use super::matcher::server_error;
use super::session::MemorySession;
use super::store::{MemoryStore, Namespace};
use crate::driver::CursorDelegate;
use crate::error::DriverResult;

/// 服务器默认首批大小
pub(crate) const DEFAULT_FIRST_BATCH: usize = 101;

/// 可追加游标的数据来源
struct TailSource {
    ns: Namespace,
    filter: Document,
    position: usize,
    /// TailableAwait 游标在没有新数据时的等待时间
    await_time: Option<Duration>,
}

/// 内存游标
///
/// 打开时已经切出首批数据；之后每次 getMore 计一次往返。
pub struct MemoryCursor {
    id: i64,
    store: Arc<MemoryStore>,
    first_batch: Option<Vec<Document>>,
    remaining: VecDeque<Document>,
    batch_size: Option<u32>,
    killed: bool,
    tail: Option<TailSource>,
}

impl MemoryCursor {
    /// 用完整结果集打开游标
    ///
    /// `single_batch` 为 true 时只返回首批，服务器端游标随即关闭。
    pub(crate) fn open(store: Arc<MemoryStore>, results: Vec<Document>, batch_size: Option<u32>, single_batch: bool) -> Self {
        let mut remaining: VecDeque<Document> = results.into();
        let first_size = batch_size
            .filter(|size| *size > 0)
            .map(|size| size as usize)
            .unwrap_or(DEFAULT_FIRST_BATCH);
        let first: Vec<Document> = remaining.drain(..first_size.min(remaining.len())).collect();
        if single_batch {
            remaining.clear();
        }

        Self {
            id: store.next_cursor_id(),
            store,
            first_batch: Some(first),
            remaining,
            batch_size,
            killed: false,
            tail: None,
        }
    }

    /// 可追加游标：结果耗尽后继续读取集合中的新文档
    pub(crate) fn tailing(mut self, ns: Namespace, filter: Document, position: usize, await_time: Option<Duration>) -> Self {
        self.tail = Some(TailSource {
            ns,
            filter,
            position,
            await_time,
        });
        self
    }

    pub fn id(&self) -> i64 {
        self.id
    }
}

impl CursorDelegate<MemoryDriver> for MemoryCursor {
    fn next_batch(&mut self, session: Option<&mut MemorySession>) -> DriverResult<Vec<Document>> {
        if let Some(session) = session {
            session.ensure_usable()?;
        }
        if self.killed {
            return Err(server_error(43, "CursorNotFound", format!("cursor id {} not found", self.id)));
        }
        if let Some(first) = self.first_batch.take() {
            return Ok(first);
        }

        self.store.round_trip("getMore")?;

        if !self.remaining.is_empty() {
            let size = self
                .batch_size
                .filter(|size| *size > 0)
                .map(|size| size as usize)
                .unwrap_or(self.remaining.len());
            let take = size.min(self.remaining.len());
            return Ok(self.remaining.drain(..take).collect());
        }

        let Some(tail) = self.tail.as_mut() else {
            return Ok(Vec::new());
        };
        let seen = self.store.head_seq();
        let documents = self.store.tail(&tail.ns, &tail.filter, &mut tail.position)?;
        match tail.await_time {
            Some(wait) if documents.is_empty() => {
                self.store.wait_for_events(seen, Instant::now() + wait);
                self.store.tail(&tail.ns, &tail.filter, &mut tail.position)
            }
            _ => Ok(documents),
        }
    }

    fn is_alive(&self) -> bool {
        !self.killed && (self.first_batch.is_some() || !self.remaining.is_empty() || self.tail.is_some())
    }

    fn set_batch_size(&mut self, batch_size: u32) {
        self.batch_size = Some(batch_size);
    }

    fn close(&mut self) -> DriverResult<()> {
        if self.killed {
            return Ok(());
        }
        let server_side_open = !self.remaining.is_empty() || self.tail.is_some();
        self.killed = true;
        self.first_batch = None;
        self.remaining.clear();
        if server_side_open {
            debug!("关闭内存游标: id={}", self.id);
            self.store.round_trip("killCursors")?;
        }
        Ok(())
    }
}
