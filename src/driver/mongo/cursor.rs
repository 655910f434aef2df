//! MongoDB 游标委托
//!
//! 同步驱动的游标不暴露批次边界，这里按批大小从驱动游标中逐条取出，
//! 并预读一条来判断服务器端是否还有数据。

use ::mongodb::IndexModel;
use ::mongodb::sync::{ClientSession, Cursor, SessionCursor};
use bson::Document;
use std::collections::VecDeque;

use super::MongoDriver;
use super::convert::{decode_error, provider_error};
use super::session::MongoSession;
use crate::driver::CursorDelegate;
use crate::error::{DriverResult, ProviderError};

/// 未指定批大小时每批取出的文档数
const DEFAULT_BATCH: usize = 101;

enum Source {
    Plain(Cursor<Document>),
    Session(SessionCursor<Document>),
    Index(Cursor<IndexModel>),
    IndexSession(SessionCursor<IndexModel>),
    /// 命令直接返回的结果（listDatabases 等）
    Static(VecDeque<Document>),
}

fn index_document(model: IndexModel) -> DriverResult<Document> {
    bson::to_document(&model).map_err(decode_error)
}

fn require_session(session: Option<&mut MongoSession>) -> DriverResult<&mut ClientSession> {
    session
        .and_then(MongoSession::client_session_mut)
        .ok_or_else(|| ProviderError::new("a cursor created with a session must be iterated with that session"))
}

impl Source {
    fn pull(&mut self, session: Option<&mut MongoSession>) -> DriverResult<Option<Document>> {
        match self {
            Source::Plain(cursor) => cursor.next().transpose().map_err(provider_error),
            Source::Session(cursor) => {
                let session = require_session(session)?;
                cursor.next(session).transpose().map_err(provider_error)
            }
            Source::Index(cursor) => cursor
                .next()
                .transpose()
                .map_err(provider_error)?
                .map(index_document)
                .transpose(),
            Source::IndexSession(cursor) => {
                let session = require_session(session)?;
                cursor
                    .next(session)
                    .transpose()
                    .map_err(provider_error)?
                    .map(index_document)
                    .transpose()
            }
            Source::Static(documents) => Ok(documents.pop_front()),
        }
    }
}

/// MongoDB 游标
pub struct MongoCursor {
    source: Option<Source>,
    peeked: Option<Document>,
    batch_size: Option<u32>,
    exhausted: bool,
}

impl MongoCursor {
    fn new(source: Source, batch_size: Option<u32>) -> Self {
        Self {
            source: Some(source),
            peeked: None,
            batch_size,
            exhausted: false,
        }
    }

    pub(crate) fn plain(cursor: Cursor<Document>, batch_size: Option<u32>) -> Self {
        Self::new(Source::Plain(cursor), batch_size)
    }

    pub(crate) fn with_session(cursor: SessionCursor<Document>, batch_size: Option<u32>) -> Self {
        Self::new(Source::Session(cursor), batch_size)
    }

    pub(crate) fn indexes(cursor: Cursor<IndexModel>, batch_size: Option<u32>) -> Self {
        Self::new(Source::Index(cursor), batch_size)
    }

    pub(crate) fn indexes_with_session(cursor: SessionCursor<IndexModel>, batch_size: Option<u32>) -> Self {
        Self::new(Source::IndexSession(cursor), batch_size)
    }

    /// 命令结果中的 `cursor.firstBatch` 或指定数组字段
    pub(crate) fn from_documents(documents: Vec<Document>) -> Self {
        Self::new(Source::Static(documents.into()), None)
    }
}

impl CursorDelegate<MongoDriver> for MongoCursor {
    fn next_batch(&mut self, mut session: Option<&mut MongoSession>) -> DriverResult<Vec<Document>> {
        let Some(source) = self.source.as_mut() else {
            return Err(ProviderError::new("cursor has been closed").with_code(43).with_code_name("CursorNotFound"));
        };
        if self.exhausted {
            return Ok(Vec::new());
        }

        let size = self
            .batch_size
            .filter(|size| *size > 0)
            .map(|size| size as usize)
            .unwrap_or(DEFAULT_BATCH);
        let mut batch: Vec<Document> = self.peeked.take().into_iter().collect();
        while batch.len() < size {
            match source.pull(session.as_deref_mut())? {
                Some(document) => batch.push(document),
                None => {
                    self.exhausted = true;
                    return Ok(batch);
                }
            }
        }

        match source.pull(session.as_deref_mut())? {
            Some(document) => self.peeked = Some(document),
            None => self.exhausted = true,
        }
        Ok(batch)
    }

    fn is_alive(&self) -> bool {
        self.source.is_some() && (!self.exhausted || self.peeked.is_some())
    }

    fn set_batch_size(&mut self, batch_size: u32) {
        self.batch_size = Some(batch_size);
    }

    fn close(&mut self) -> DriverResult<()> {
        // 驱动游标在 drop 时发送 killCursors
        self.source = None;
        self.peeked = None;
        Ok(())
    }
}
