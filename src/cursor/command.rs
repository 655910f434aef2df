//! 命令游标
//!
//! 由 listDatabases、listCollections、listIndexes、aggregate 这类命令产生。
//! 立即游标在构造时就已连接；延迟游标在第一次"取更多"时才发出命令。

use bson::Document;
use futures::stream::{self, Stream};

use super::core::{CursorCore, PendingCommand};
use crate::driver::Driver;
use crate::error::DocBridgeResult;
use crate::facade::Collection;
use crate::session::Session;

pub struct CommandCursor<D: Driver> {
    core: CursorCore<D>,
    collection: Option<Collection<D>>,
}

impl<D: Driver> std::fmt::Debug for CommandCursor<D> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CommandCursor")
            .field("started", &self.core.started())
            .field("closed", &self.core.is_closed())
            .field("buffered", &self.core.buffered())
            .finish()
    }
}

impl<D: Driver> CommandCursor<D> {
    /// 立即游标，`alive` 为打开命令之后委托的存活状态
    pub(crate) fn eager(
        cursor: D::Cursor,
        alive: bool,
        collection: Option<Collection<D>>,
        session: Option<Session<D>>,
    ) -> Self {
        Self {
            core: CursorCore::connected(cursor, alive, session),
            collection,
        }
    }

    /// 延迟游标
    pub(crate) fn latent(
        command: PendingCommand<D>,
        collection: Option<Collection<D>>,
        session: Option<Session<D>>,
    ) -> Self {
        Self {
            core: CursorCore::latent(command, session, false),
            collection,
        }
    }

    /// 修改批大小；连接前写入待发命令，连接后作用于后续 getMore
    pub fn batch_size(mut self, batch_size: u32) -> Self {
        self.core.set_batch_size(batch_size);
        self
    }

    /// 复制出一个尚未发出命令的延迟游标；立即游标无法复制，返回 None
    pub fn clone_unstarted(&self) -> Option<Self> {
        let command = self.core.unstarted_command()?;
        Some(Self {
            core: CursorCore::latent(command, self.core.session().cloned(), false),
            collection: self.collection.clone(),
        })
    }

    pub async fn next(&mut self) -> DocBridgeResult<Option<Document>> {
        self.core.next().await
    }

    pub async fn to_list(&mut self, length: Option<i64>) -> DocBridgeResult<Vec<Document>> {
        self.core.to_list(length).await
    }

    pub async fn close(&mut self) -> DocBridgeResult<()> {
        self.core.close().await
    }

    pub fn alive(&self) -> bool {
        self.core.alive()
    }

    pub fn started(&self) -> bool {
        self.core.started()
    }

    pub fn is_closed(&self) -> bool {
        self.core.is_closed()
    }

    pub fn buffered(&self) -> usize {
        self.core.buffered()
    }

    /// 产生该游标的集合，数据库级命令没有集合
    pub fn collection(&self) -> Option<&Collection<D>> {
        self.collection.as_ref()
    }

    pub fn into_stream(self) -> impl Stream<Item = DocBridgeResult<Document>> {
        stream::try_unfold(self, |mut cursor| async move {
            Ok(cursor.next().await?.map(|document| (document, cursor)))
        })
    }
}
