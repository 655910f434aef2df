//! 查询游标

use bson::Document;
use futures::stream::{self, Stream};
use std::time::Duration;

use super::core::{CursorCore, PendingCommand};
use crate::driver::Driver;
use crate::error::DocBridgeResult;
use crate::facade::Collection;
use crate::i18n::{t, tf};
use crate::session::Session;
use crate::types::{Collation, CursorType, FindOptions, Hint};

/// `find` 返回的查询游标
///
/// 查询在第一次"取更多"时才发出，在此之前可以用链式方法修改查询选项。
/// 修改方法借用游标，出错时游标不受影响。
pub struct Cursor<D: Driver> {
    core: CursorCore<D>,
    collection: Collection<D>,
}

impl<D: Driver> std::fmt::Debug for Cursor<D> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Cursor")
            .field("started", &self.core.started())
            .field("closed", &self.core.is_closed())
            .field("buffered", &self.core.buffered())
            .finish()
    }
}

impl<D: Driver> Cursor<D> {
    pub(crate) fn new(
        collection: Collection<D>,
        filter: Option<Document>,
        options: FindOptions,
        session: Option<Session<D>>,
    ) -> Self {
        let tailable = options.cursor_type.is_tailable();
        let command = PendingCommand::Find {
            collection: crate::facade::DelegateWrapper::delegate(&collection).clone(),
            filter,
            options,
        };
        Self {
            core: CursorCore::latent(command, session, tailable),
            collection,
        }
    }

    /// 在查询发出前修改选项；被拒绝时游标保持原样，可以继续使用
    fn modify(&mut self, option: &str, apply: impl FnOnce(&mut FindOptions)) -> DocBridgeResult<&mut Self> {
        if self.core.started() {
            return Err(crate::quick_error!(
                invalid_operation,
                tf("error.cursor_started", &[("option", option)])
            ));
        }
        if let Some(PendingCommand::Find { options, .. }) = self.core.pending_mut() {
            apply(options);
        }
        Ok(self)
    }

    pub fn sort(&mut self, sort: Document) -> DocBridgeResult<&mut Self> {
        self.modify("sort", |options| options.sort = Some(sort))
    }

    pub fn skip(&mut self, skip: u64) -> DocBridgeResult<&mut Self> {
        self.modify("skip", |options| options.skip = Some(skip))
    }

    /// 限制返回条数，负数表示只取单批
    pub fn limit(&mut self, limit: i64) -> DocBridgeResult<&mut Self> {
        self.modify("limit", |options| options.limit = Some(limit))
    }

    pub fn projection(&mut self, projection: Document) -> DocBridgeResult<&mut Self> {
        self.modify("projection", |options| options.projection = Some(projection))
    }

    pub fn batch_size(&mut self, batch_size: u32) -> DocBridgeResult<&mut Self> {
        self.modify("batch_size", |options| options.batch_size = Some(batch_size))
    }

    /// 可追加游标只在驱动后端支持时可用
    pub fn cursor_type(&mut self, cursor_type: CursorType) -> DocBridgeResult<&mut Self> {
        let tailable = cursor_type.is_tailable();
        if tailable && !D::TAILABLE_CURSORS {
            return Err(crate::quick_error!(invalid_operation, t("error.tailable_unsupported")));
        }
        self.modify("cursor_type", |options| options.cursor_type = cursor_type)?;
        self.core.set_tailable(tailable);
        Ok(self)
    }

    pub fn comment(&mut self, comment: impl Into<String>) -> DocBridgeResult<&mut Self> {
        let comment = comment.into();
        self.modify("comment", |options| options.comment = Some(comment))
    }

    /// 按索引名或索引键指定查询使用的索引
    pub fn hint(&mut self, hint: Hint) -> DocBridgeResult<&mut Self> {
        self.modify("hint", |options| options.hint = Some(hint))
    }

    pub fn collation(&mut self, collation: Collation) -> DocBridgeResult<&mut Self> {
        self.modify("collation", |options| options.collation = Some(collation))
    }

    pub fn max_time(&mut self, max_time: Duration) -> DocBridgeResult<&mut Self> {
        self.modify("max_time", |options| options.max_time = Some(max_time))
    }

    /// TailableAwait 游标每次 getMore 的等待上限
    pub fn max_await_time(&mut self, max_await_time: Duration) -> DocBridgeResult<&mut Self> {
        self.modify("max_await_time", |options| options.max_await_time = Some(max_await_time))
    }

    pub fn allow_disk_use(&mut self, allow: bool) -> DocBridgeResult<&mut Self> {
        self.modify("allow_disk_use", |options| options.allow_disk_use = Some(allow))
    }

    /// 回到查询发出之前：关闭服务器端游标、丢弃缓冲，保留全部查询选项
    pub async fn rewind(&mut self) -> DocBridgeResult<&mut Self> {
        self.core.rewind().await?;
        Ok(self)
    }

    /// 复制出一个尚未发出查询的新游标，选项与会话相同
    pub fn clone_unstarted(&self) -> Self {
        // 查询游标总是从待发命令开始，连接后命令保存在 origin 中
        let command = self.core.unstarted_command().unwrap_or_else(|| PendingCommand::Find {
            collection: crate::facade::DelegateWrapper::delegate(&self.collection).clone(),
            filter: None,
            options: FindOptions::default(),
        });
        Self {
            core: CursorCore::latent(command, self.core.session().cloned(), self.core.is_tailable()),
            collection: self.collection.clone(),
        }
    }

    /// 单步前进，序列结束时返回 `Ok(None)`
    pub async fn next(&mut self) -> DocBridgeResult<Option<Document>> {
        self.core.next().await
    }

    /// 批量取出最多 `length` 条，None 表示取到耗尽
    pub async fn to_list(&mut self, length: Option<i64>) -> DocBridgeResult<Vec<Document>> {
        self.core.to_list(length).await
    }

    pub async fn close(&mut self) -> DocBridgeResult<()> {
        self.core.close().await
    }

    /// 是否还可能产生文档
    pub fn alive(&self) -> bool {
        self.core.alive()
    }

    /// 是否已经发生过往返
    pub fn started(&self) -> bool {
        self.core.started()
    }

    pub fn is_closed(&self) -> bool {
        self.core.is_closed()
    }

    /// 本地缓冲中尚未交付的文档数
    pub fn buffered(&self) -> usize {
        self.core.buffered()
    }

    pub fn is_tailable(&self) -> bool {
        self.core.is_tailable()
    }

    pub fn collection(&self) -> &Collection<D> {
        &self.collection
    }

    /// 转换为异步流
    pub fn into_stream(self) -> impl Stream<Item = DocBridgeResult<Document>> {
        stream::try_unfold(self, |mut cursor| async move {
            Ok(cursor.next().await?.map(|document| (document, cursor)))
        })
    }
}
