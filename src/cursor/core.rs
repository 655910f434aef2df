//! 游标公共核心
//!
//! 查询游标与命令游标共用的惰性序列：本地缓冲、存活状态、"取更多"往返与关闭。
//!
//! 往返以装箱 future 的形式挂在核心上。调用方在等待中途放弃（超时、`select!`）时
//! future 保留下来，下一次调用接着等待同一次往返，已经取到的批次不会丢失。

use bson::Document;
use futures::FutureExt;
use futures::future::BoxFuture;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::Arc;

use crate::driver::{CollectionDelegate, CursorDelegate, DatabaseDelegate, Driver};
use crate::error::{DocBridgeError, DocBridgeResult, DriverResult};
use crate::facade::offload_with_session;
use crate::i18n::{t, tf};
use crate::offload::run_sync;
use crate::session::Session;
use crate::types::{AggregateOptions, FindOptions};

/// 聚合目标
pub(crate) enum AggregateTarget<D: Driver> {
    Database(D::Database),
    Collection(D::Collection),
}

impl<D: Driver> Clone for AggregateTarget<D> {
    fn clone(&self) -> Self {
        match self {
            AggregateTarget::Database(database) => AggregateTarget::Database(database.clone()),
            AggregateTarget::Collection(collection) => AggregateTarget::Collection(collection.clone()),
        }
    }
}

/// 尚未发出的打开游标命令
pub(crate) enum PendingCommand<D: Driver> {
    Find {
        collection: D::Collection,
        filter: Option<Document>,
        options: FindOptions,
    },
    Aggregate {
        target: AggregateTarget<D>,
        pipeline: Vec<Document>,
        options: AggregateOptions,
    },
    ListIndexes {
        collection: D::Collection,
        batch_size: Option<u32>,
    },
}

impl<D: Driver> Clone for PendingCommand<D> {
    fn clone(&self) -> Self {
        match self {
            PendingCommand::Find {
                collection,
                filter,
                options,
            } => PendingCommand::Find {
                collection: collection.clone(),
                filter: filter.clone(),
                options: options.clone(),
            },
            PendingCommand::Aggregate {
                target,
                pipeline,
                options,
            } => PendingCommand::Aggregate {
                target: target.clone(),
                pipeline: pipeline.clone(),
                options: options.clone(),
            },
            PendingCommand::ListIndexes {
                collection,
                batch_size,
            } => PendingCommand::ListIndexes {
                collection: collection.clone(),
                batch_size: *batch_size,
            },
        }
    }
}

impl<D: Driver> PendingCommand<D> {
    pub(crate) fn set_batch_size(&mut self, size: u32) {
        match self {
            PendingCommand::Find { options, .. } => options.batch_size = Some(size),
            PendingCommand::Aggregate { options, .. } => options.batch_size = Some(size),
            PendingCommand::ListIndexes { batch_size, .. } => *batch_size = Some(size),
        }
    }

    /// 发出命令（阻塞）
    fn open(self, session: Option<&mut D::Session>) -> DriverResult<D::Cursor> {
        match self {
            PendingCommand::Find {
                collection,
                filter,
                options,
            } => collection.find(filter, &options, session),
            PendingCommand::Aggregate {
                target: AggregateTarget::Database(database),
                pipeline,
                options,
            } => database.aggregate(pipeline, &options, session),
            PendingCommand::Aggregate {
                target: AggregateTarget::Collection(collection),
                pipeline,
                options,
            } => collection.aggregate(pipeline, &options, session),
            PendingCommand::ListIndexes {
                collection,
                batch_size,
            } => collection.list_indexes(batch_size, session),
        }
    }
}

/// 游标连接状态
pub(crate) enum CursorState<D: Driver> {
    /// 延迟游标：真实游标尚未创建
    NotYetConnected(PendingCommand<D>),
    Connected(Arc<Mutex<D::Cursor>>),
}

/// 一次往返的结果
struct Fetched<D: Driver> {
    /// 延迟游标第一次往返时打开的委托
    opened: Option<D::Cursor>,
    batch: Vec<Document>,
    alive: bool,
}

type Inflight<D> = BoxFuture<'static, DocBridgeResult<Fetched<D>>>;

/// 游标核心
pub(crate) struct CursorCore<D: Driver> {
    state: CursorState<D>,
    /// 连接时发出的命令，rewind 与 clone 从这里重新开始
    origin: Option<PendingCommand<D>>,
    buffer: VecDeque<Document>,
    inflight: Option<Inflight<D>>,
    closed: bool,
    started: bool,
    delegate_alive: bool,
    /// 连接后修改的批大小，在下一次往返时交给委托
    pending_batch_size: Option<u32>,
    session: Option<Session<D>>,
    tailable: bool,
}

impl<D: Driver> CursorCore<D> {
    /// 延迟游标
    pub fn latent(command: PendingCommand<D>, session: Option<Session<D>>, tailable: bool) -> Self {
        Self {
            state: CursorState::NotYetConnected(command),
            origin: None,
            buffer: VecDeque::new(),
            inflight: None,
            closed: false,
            started: false,
            delegate_alive: true,
            pending_batch_size: None,
            session,
            tailable,
        }
    }

    /// 已连接的游标，`alive` 是在工作线程上读取的委托存活状态
    pub fn connected(cursor: D::Cursor, alive: bool, session: Option<Session<D>>) -> Self {
        Self {
            state: CursorState::Connected(Arc::new(Mutex::new(cursor))),
            origin: None,
            buffer: VecDeque::new(),
            inflight: None,
            closed: false,
            started: false,
            delegate_alive: alive,
            pending_batch_size: None,
            session,
            tailable: false,
        }
    }

    /// 尚未连接时可修改的命令
    pub fn pending_mut(&mut self) -> Option<&mut PendingCommand<D>> {
        match &mut self.state {
            CursorState::NotYetConnected(command) => Some(command),
            CursorState::Connected(_) => None,
        }
    }

    /// 游标最初的命令；立即游标没有
    pub fn unstarted_command(&self) -> Option<PendingCommand<D>> {
        match &self.state {
            CursorState::NotYetConnected(command) => Some(command.clone()),
            CursorState::Connected(_) => self.origin.clone(),
        }
    }

    pub fn session(&self) -> Option<&Session<D>> {
        self.session.as_ref()
    }

    pub fn set_tailable(&mut self, tailable: bool) {
        self.tailable = tailable;
    }

    pub fn is_tailable(&self) -> bool {
        self.tailable
    }

    /// 修改批大小：未连接时写入命令，已连接时在下一次往返前交给委托
    pub fn set_batch_size(&mut self, size: u32) {
        match &mut self.state {
            CursorState::NotYetConnected(command) => command.set_batch_size(size),
            CursorState::Connected(_) => self.pending_batch_size = Some(size),
        }
    }

    /// 服务器端是否还可能返回数据
    fn can_fetch(&self) -> bool {
        if self.closed {
            return false;
        }
        match self.state {
            CursorState::NotYetConnected(_) => true,
            CursorState::Connected(_) => self.delegate_alive || self.inflight.is_some(),
        }
    }

    pub fn alive(&self) -> bool {
        !self.closed && (!self.buffer.is_empty() || self.can_fetch())
    }

    pub fn started(&self) -> bool {
        self.started
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    pub fn buffered(&self) -> usize {
        self.buffer.len()
    }

    /// 构造一次往返，真正的阻塞调用在工作线程上执行
    fn start_fetch(&mut self) -> Inflight<D> {
        let session = self.session.clone();
        match &self.state {
            CursorState::NotYetConnected(command) => {
                let command = command.clone();
                async move {
                    let (cursor, batch, alive) = offload_with_session(session.as_ref(), move |mut session| {
                        let mut cursor = command.open(session.as_deref_mut())?;
                        let mut batch = cursor.next_batch(session.as_deref_mut())?;
                        // 首批为空但游标仍存活时在同一次卸载里再取一次
                        if batch.is_empty() && cursor.is_alive() {
                            batch = cursor.next_batch(session.as_deref_mut())?;
                        }
                        let alive = cursor.is_alive();
                        Ok((cursor, batch, alive))
                    })
                    .await?;
                    Ok(Fetched {
                        opened: Some(cursor),
                        batch,
                        alive,
                    })
                }
                .boxed()
            }
            CursorState::Connected(cursor) => {
                let cursor = cursor.clone();
                let batch_size = self.pending_batch_size.take();
                async move {
                    let (batch, alive) = offload_with_session(session.as_ref(), move |session| {
                        let mut cursor = cursor.lock();
                        if let Some(size) = batch_size {
                            cursor.set_batch_size(size);
                        }
                        let batch = cursor.next_batch(session)?;
                        Ok((batch, cursor.is_alive()))
                    })
                    .await?;
                    Ok(Fetched {
                        opened: None,
                        batch,
                        alive,
                    })
                }
                .boxed()
            }
        }
    }

    /// 等待挂起的往返并收下结果；在这里被取消时往返继续挂在核心上
    async fn settle_inflight(&mut self) -> DocBridgeResult<()> {
        let Some(inflight) = self.inflight.as_mut() else {
            return Ok(());
        };
        let result = inflight.await;
        self.inflight = None;
        let fetched = result?;

        if let Some(cursor) = fetched.opened {
            let connected = CursorState::Connected(Arc::new(Mutex::new(cursor)));
            if let CursorState::NotYetConnected(command) = std::mem::replace(&mut self.state, connected) {
                self.origin = Some(command);
            }
            crate::debug_log!("延迟游标已连接: 首批{}条, alive={}", fetched.batch.len(), fetched.alive);
        }
        self.delegate_alive = fetched.alive;
        self.buffer.extend(fetched.batch);
        Ok(())
    }

    /// 发起（或继续等待）一次往返，不看缓冲
    async fn fetch_more(&mut self) -> DocBridgeResult<()> {
        if self.inflight.is_none() {
            if !self.can_fetch() {
                return Err(crate::quick_error!(invalid_operation, t("error.cursor_exhausted")));
            }
            if self.tailable && !D::TAILABLE_CURSORS {
                return Err(crate::quick_error!(invalid_operation, t("error.tailable_unsupported")));
            }
            self.started = true;
            self.inflight = Some(self.start_fetch());
        }
        self.settle_inflight().await
    }

    /// 一次"取更多"往返，返回缓冲中的文档数
    ///
    /// 缓冲非空时不产生往返；已耗尽或已终止的游标返回 InvalidOperation。
    pub async fn get_more(&mut self) -> DocBridgeResult<usize> {
        if self.closed {
            return Err(DocBridgeError::CursorClosed);
        }
        if !self.buffer.is_empty() {
            return Ok(self.buffer.len());
        }
        self.fetch_more().await?;
        Ok(self.buffer.len())
    }

    /// 单步前进，序列结束时返回 None
    pub async fn next(&mut self) -> DocBridgeResult<Option<Document>> {
        if self.closed {
            return Err(DocBridgeError::CursorClosed);
        }
        if let Some(document) = self.buffer.pop_front() {
            return Ok(Some(document));
        }
        if self.can_fetch() {
            self.fetch_more().await?;
        }
        Ok(self.buffer.pop_front())
    }

    /// 批量取出，`length` 为 None 时取到耗尽为止
    ///
    /// 文档先攒在缓冲里，全部到齐后才一次性交出，中途取消不会丢失已取到的批次。
    pub async fn to_list(&mut self, length: Option<i64>) -> DocBridgeResult<Vec<Document>> {
        let limit = match length {
            Some(n) if n < 0 => {
                return Err(crate::quick_error!(
                    invalid_argument,
                    tf("error.negative_length", &[("length", &n.to_string())])
                ));
            }
            Some(n) => Some(n as usize),
            None => None,
        };
        if self.tailable {
            return Err(crate::quick_error!(invalid_operation, t("error.tailable_to_list")));
        }
        if self.closed {
            return Err(DocBridgeError::CursorClosed);
        }

        while limit.map(|n| self.buffer.len() < n).unwrap_or(true) && self.can_fetch() {
            self.fetch_more().await?;
        }
        let take = limit.unwrap_or(usize::MAX).min(self.buffer.len());
        Ok(self.buffer.drain(..take).collect())
    }

    /// 关闭游标，幂等；挂起的往返先等它完成，打开的委托随后被关闭
    pub async fn close(&mut self) -> DocBridgeResult<()> {
        if self.closed {
            return Ok(());
        }
        if let Err(err) = self.settle_inflight().await {
            crate::debug_log!("关闭前的往返失败: {}", err);
        }
        self.closed = true;
        self.buffer.clear();

        if let CursorState::Connected(cursor) = &self.state {
            if self.delegate_alive {
                let cursor = cursor.clone();
                run_sync(move || cursor.lock().close()).await?;
            }
        }
        self.delegate_alive = false;
        Ok(())
    }

    /// 关闭当前委托并回到尚未发出命令的状态
    ///
    /// 返回 false 表示游标没有可重新发出的命令（立即游标）。
    pub async fn rewind(&mut self) -> DocBridgeResult<bool> {
        let Some(mut command) = self.unstarted_command() else {
            return Ok(false);
        };
        self.close().await?;
        if let Some(size) = self.pending_batch_size.take() {
            command.set_batch_size(size);
        }
        self.state = CursorState::NotYetConnected(command);
        self.origin = None;
        self.closed = false;
        self.started = false;
        self.delegate_alive = true;
        Ok(true)
    }
}
