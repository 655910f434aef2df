//! 会话与事务
//!
//! [`Session`] 包装一个驱动会话委托。委托保存在 `Arc<Mutex<_>>` 中，只在工作线程上加锁；
//! 事务状态、会话是否结束以及集群时间与操作时间在每次卸载调用之后同步到本地，
//! 调用方线程读取时不需要加锁。

mod transaction;

use bson::{Document, Timestamp};
use parking_lot::Mutex;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use crate::driver::{Driver, SessionDelegate};
use crate::error::{DocBridgeError, DocBridgeResult, DriverResult};
use crate::facade::Client;
use crate::offload::run_sync;
use crate::types::TransactionOptions;

/// 会话见过的集群时间与操作时间
#[derive(Debug, Clone, Default)]
pub(crate) struct SessionTimes {
    cluster_time: Option<Document>,
    operation_time: Option<Timestamp>,
}

impl SessionTimes {
    /// 在工作线程上从委托读取
    pub(crate) fn read<D: Driver>(delegate: &D::Session) -> Self {
        Self {
            cluster_time: delegate.cluster_time(),
            operation_time: delegate.operation_time(),
        }
    }
}

struct SessionInner<D: Driver> {
    delegate: Arc<Mutex<D::Session>>,
    client: Client<D>,
    id: Document,
    in_transaction: AtomicBool,
    ended: AtomicBool,
    times: Mutex<SessionTimes>,
}

/// 会话门面
///
/// 克隆得到的是同一个会话的另一个句柄。
pub struct Session<D: Driver> {
    inner: Arc<SessionInner<D>>,
}

impl<D: Driver> Clone for Session<D> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<D: Driver> std::fmt::Debug for Session<D> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("id", &self.inner.id)
            .field("in_transaction", &self.in_transaction())
            .field("ended", &self.has_ended())
            .finish()
    }
}

impl<D: Driver> PartialEq for Session<D> {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.inner.delegate, &other.inner.delegate)
    }
}

impl<D: Driver> Session<D> {
    /// 包装驱动会话，必须在工作线程上读取完 id 之后调用
    pub(crate) fn new(client: Client<D>, delegate: D::Session, id: Document) -> Self {
        let in_transaction = delegate.in_transaction();
        let ended = delegate.has_ended();
        let times = SessionTimes::read::<D>(&delegate);
        Self {
            inner: Arc::new(SessionInner {
                delegate: Arc::new(Mutex::new(delegate)),
                client,
                id,
                in_transaction: AtomicBool::new(in_transaction),
                ended: AtomicBool::new(ended),
                times: Mutex::new(times),
            }),
        }
    }

    /// 会话标识
    pub fn session_id(&self) -> &Document {
        &self.inner.id
    }

    /// 创建该会话的客户端
    pub fn client(&self) -> &Client<D> {
        &self.inner.client
    }

    /// 是否处于活动事务中
    pub fn in_transaction(&self) -> bool {
        self.inner.in_transaction.load(Ordering::SeqCst)
    }

    pub fn has_ended(&self) -> bool {
        self.inner.ended.load(Ordering::SeqCst)
    }

    /// 会话见过的最新集群时间
    pub fn cluster_time(&self) -> Option<Document> {
        self.inner.times.lock().cluster_time.clone()
    }

    /// 会话内最近一次操作的操作时间
    pub fn operation_time(&self) -> Option<Timestamp> {
        self.inner.times.lock().operation_time
    }

    pub(crate) fn record_times(&self, times: SessionTimes) {
        *self.inner.times.lock() = times;
    }

    pub(crate) fn shared_delegate(&self) -> Arc<Mutex<D::Session>> {
        self.inner.delegate.clone()
    }

    /// 已结束的会话不能再用于任何操作
    pub(crate) fn ensure_active(&self) -> DocBridgeResult<()> {
        if self.has_ended() {
            return Err(crate::quick_error!(
                invalid_operation,
                crate::i18n::t("error.session_ended")
            ));
        }
        Ok(())
    }

    /// 卸载一次会话状态变更，并把结果状态同步到本地
    async fn transition<F>(&self, op: F) -> DocBridgeResult<()>
    where
        F: FnOnce(&mut D::Session) -> DriverResult<()> + Send + 'static,
    {
        let delegate = self.shared_delegate();
        let (result, in_transaction, ended, times) = run_sync(move || {
            let mut session = delegate.lock();
            let result = op(&mut session);
            let times = SessionTimes::read::<D>(&session);
            Ok::<_, DocBridgeError>((result, session.in_transaction(), session.has_ended(), times))
        })
        .await?;

        self.inner.in_transaction.store(in_transaction, Ordering::SeqCst);
        self.inner.ended.store(ended, Ordering::SeqCst);
        self.record_times(times);
        result.map_err(DocBridgeError::from)
    }

    /// 开始事务
    pub async fn begin_transaction(&self, options: Option<TransactionOptions>) -> DocBridgeResult<()> {
        self.ensure_active()?;
        let options = options.unwrap_or_default();
        self.transition(move |session| session.start_transaction(&options)).await
    }

    /// 提交事务
    pub async fn commit_transaction(&self) -> DocBridgeResult<()> {
        self.ensure_active()?;
        self.transition(|session| session.commit_transaction()).await
    }

    /// 中止事务
    pub async fn abort_transaction(&self) -> DocBridgeResult<()> {
        self.ensure_active()?;
        self.transition(|session| session.abort_transaction()).await
    }

    /// 推进集群时间，用于在两个会话之间传递因果一致性
    pub async fn advance_cluster_time(&self, cluster_time: &Document) -> DocBridgeResult<()> {
        self.ensure_active()?;
        let cluster_time = cluster_time.clone();
        self.transition(move |session| session.advance_cluster_time(&cluster_time)).await
    }

    /// 推进操作时间
    pub async fn advance_operation_time(&self, operation_time: Timestamp) -> DocBridgeResult<()> {
        self.ensure_active()?;
        self.transition(move |session| session.advance_operation_time(operation_time)).await
    }

    /// 结束会话，活动事务会被中止；重复调用直接返回
    pub async fn end_session(&self) -> DocBridgeResult<()> {
        if self.has_ended() {
            return Ok(());
        }
        self.transition(|session| session.end_session()).await
    }
}
