//! 变更流模型
//!
//! 变更流在第一次轮询时才真正打开，之后"先试取，取不到再等"。
//! 失败后的恢复由调用方负责：[`ChangeStream::resume_token`] 给出最近一次事件的令牌，
//! 调用方可以把它放进 `resume_after` 重新打开。
//!
//! 打开与轮询都以 future 的形式挂在门面上：`try_next` 在等待中途被取消时，
//! 工作线程上的轮询继续进行，下一次调用拿到它的结果，事件不会丢失。

use bson::Document;
use futures::FutureExt;
use futures::future::BoxFuture;
use futures::stream::{self, Stream};
use parking_lot::Mutex;
use rat_logger::debug;
use std::sync::Arc;

use crate::driver::{ChangeStreamDelegate, ClientDelegate, CollectionDelegate, DatabaseDelegate, Driver};
use crate::error::{DocBridgeError, DocBridgeResult, DriverResult};
use crate::offload::run_sync;
use crate::types::ChangeStreamOptions;

/// 变更流的监听目标
pub(crate) enum WatchTarget<D: Driver> {
    Client(D::Client),
    Database(D::Database),
    Collection(D::Collection),
}

impl<D: Driver> WatchTarget<D> {
    fn open(&self, options: &ChangeStreamOptions) -> DriverResult<D::ChangeStream> {
        match self {
            WatchTarget::Client(client) => client.watch(options),
            WatchTarget::Database(database) => database.watch(options),
            WatchTarget::Collection(collection) => collection.watch(options),
        }
    }
}

impl<D: Driver> Clone for WatchTarget<D> {
    fn clone(&self) -> Self {
        match self {
            WatchTarget::Client(client) => WatchTarget::Client(client.clone()),
            WatchTarget::Database(database) => WatchTarget::Database(database.clone()),
            WatchTarget::Collection(collection) => WatchTarget::Collection(collection.clone()),
        }
    }
}

enum StreamState<D: Driver> {
    NotYetConnected,
    Connected {
        delegate: Arc<Mutex<D::ChangeStream>>,
        alive: bool,
    },
    Closed,
}

type Opening<D> = BoxFuture<'static, DocBridgeResult<(<D as Driver>::ChangeStream, bool)>>;

/// 一次轮询的结果：事件、轮询后是否存活、最新恢复令牌
type Polled = (Option<Document>, bool, Option<Document>);

/// 变更流门面
pub struct ChangeStream<D: Driver> {
    target: WatchTarget<D>,
    options: ChangeStreamOptions,
    state: StreamState<D>,
    resume_token: Option<Document>,
    opening: Option<Opening<D>>,
    polling: Option<BoxFuture<'static, DocBridgeResult<Polled>>>,
}

impl<D: Driver> std::fmt::Debug for ChangeStream<D> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = match self.state {
            StreamState::NotYetConnected => "not_yet_connected",
            StreamState::Connected { .. } => "connected",
            StreamState::Closed => "closed",
        };
        f.debug_struct("ChangeStream")
            .field("state", &state)
            .field("resume_token", &self.resume_token)
            .finish()
    }
}

impl<D: Driver> ChangeStream<D> {
    pub(crate) fn new(target: WatchTarget<D>, options: ChangeStreamOptions) -> Self {
        let resume_token = options.start_after.clone().or_else(|| options.resume_after.clone());
        Self {
            target,
            options,
            state: StreamState::NotYetConnected,
            resume_token,
            opening: None,
            polling: None,
        }
    }

    /// 打开底层变更流，已连接时直接返回
    pub async fn connect(&mut self) -> DocBridgeResult<()> {
        match self.state {
            StreamState::Connected { .. } => return Ok(()),
            StreamState::Closed => return Err(DocBridgeError::CursorClosed),
            StreamState::NotYetConnected => {}
        }

        if self.opening.is_none() {
            let target = self.target.clone();
            let options = self.options.clone();
            self.opening = Some(
                run_sync(move || {
                    let stream = target.open(&options)?;
                    let alive = stream.is_alive();
                    Ok::<_, crate::error::ProviderError>((stream, alive))
                })
                .boxed(),
            );
        }
        let Some(opening) = self.opening.as_mut() else {
            return Ok(());
        };
        let opened = opening.await;
        self.opening = None;
        let (delegate, alive) = opened?;

        debug!("变更流已连接");
        self.state = StreamState::Connected {
            delegate: Arc::new(Mutex::new(delegate)),
            alive,
        };
        Ok(())
    }

    /// 轮询一次，当前没有事件时返回 `Ok(None)`
    pub async fn try_next(&mut self) -> DocBridgeResult<Option<Document>> {
        self.connect().await?;
        if self.polling.is_none() {
            let StreamState::Connected { delegate, .. } = &self.state else {
                return Err(DocBridgeError::CursorClosed);
            };
            let delegate = delegate.clone();
            self.polling = Some(
                run_sync(move || {
                    let mut stream = delegate.lock();
                    let change = stream.try_next()?;
                    Ok::<_, crate::error::ProviderError>((change, stream.is_alive(), stream.resume_token()))
                })
                .boxed(),
            );
        }
        let Some(polling) = self.polling.as_mut() else {
            return Ok(None);
        };
        let polled = polling.await;
        self.polling = None;
        let (change, alive, token) = polled?;

        if let StreamState::Connected { alive: state_alive, .. } = &mut self.state {
            *state_alive = alive;
        }
        if token.is_some() {
            self.resume_token = token;
        }
        Ok(change)
    }

    /// 等待下一个事件；变更流不再存活时返回 `Ok(None)`
    pub async fn next(&mut self) -> DocBridgeResult<Option<Document>> {
        while self.alive() {
            if let Some(change) = self.try_next().await? {
                return Ok(Some(change));
            }
        }
        Ok(None)
    }

    /// 关闭变更流，幂等
    ///
    /// 正在打开的流会等它打开后再关闭；挂起的轮询结果被丢弃。
    pub async fn close(&mut self) -> DocBridgeResult<()> {
        self.polling = None;
        if let Some(opening) = self.opening.take() {
            if let Ok((delegate, alive)) = opening.await {
                self.state = StreamState::Connected {
                    delegate: Arc::new(Mutex::new(delegate)),
                    alive,
                };
            }
        }
        let previous = std::mem::replace(&mut self.state, StreamState::Closed);
        if let StreamState::Connected { delegate, .. } = previous {
            run_sync(move || delegate.lock().close()).await?;
            debug!("变更流已关闭");
        }
        Ok(())
    }

    /// 是否还可能产生事件；尚未连接的流视为存活
    pub fn alive(&self) -> bool {
        match self.state {
            StreamState::NotYetConnected => true,
            StreamState::Connected { alive, .. } => alive,
            StreamState::Closed => false,
        }
    }

    /// 最近一次事件的恢复令牌
    pub fn resume_token(&self) -> Option<&Document> {
        self.resume_token.as_ref()
    }

    /// 作用域用法：连接，运行 `body`，然后关闭
    ///
    /// `body` 出错时同样会关闭，并返回 `body` 的错误。
    pub async fn scoped<T, F>(mut self, body: F) -> DocBridgeResult<T>
    where
        F: for<'a> FnOnce(&'a mut ChangeStream<D>) -> BoxFuture<'a, DocBridgeResult<T>>,
    {
        self.connect().await?;
        let result = body(&mut self).await;
        let closed = self.close().await;
        match result {
            Ok(value) => closed.map(|_| value),
            Err(err) => Err(err),
        }
    }

    /// 转换为异步流，流在变更流不再存活时结束
    pub fn into_stream(self) -> impl Stream<Item = DocBridgeResult<Document>> {
        stream::try_unfold(self, |mut stream| async move {
            Ok(stream.next().await?.map(|change| (change, stream)))
        })
    }
}
