//! 门面树
//!
//! `Client` → `Database` → `Collection`，每个门面只持有一个同步委托，
//! 每个方法都是"卸载，然后返回"。子门面按需构造，从不缓存，也从不因名称不存在而失败。

mod client;
mod collection;
mod database;

use std::sync::Arc;

use parking_lot::Mutex;

use crate::driver::Driver;
use crate::error::{DocBridgeError, DocBridgeResult, DriverResult};
use crate::offload::run_sync;
use crate::session::{Session, SessionTimes};

pub use client::Client;
pub use collection::Collection;
pub use database::Database;

/// 委托包装器
///
/// 所有门面的公共约定：恰好持有一个同步委托，相等性即委托的相等性。
pub trait DelegateWrapper {
    type Delegate: PartialEq;

    /// 被包装的同步委托
    fn delegate(&self) -> &Self::Delegate;
}

/// 为门面实现 [`DelegateWrapper`]、`PartialEq` 与 `Clone`
macro_rules! delegate_wrapper {
    ($facade:ident, $assoc:ident) => {
        impl<D: $crate::driver::Driver> $crate::facade::DelegateWrapper for $facade<D> {
            type Delegate = D::$assoc;

            fn delegate(&self) -> &D::$assoc {
                &self.delegate
            }
        }

        impl<D: $crate::driver::Driver> PartialEq for $facade<D> {
            fn eq(&self, other: &Self) -> bool {
                self.delegate == other.delegate
            }
        }

        impl<D: $crate::driver::Driver> std::fmt::Debug for $facade<D> {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                f.debug_struct(stringify!($facade)).finish_non_exhaustive()
            }
        }
    };
}

pub(crate) use delegate_wrapper;

/// 带可选会话的卸载调用
///
/// 会话门面被翻译成它的委托，并只在工作线程上加锁；
/// 调用结束后会话的集群时间与操作时间同步回门面。
pub(crate) async fn offload_with_session<D, T, F>(session: Option<&Session<D>>, func: F) -> DocBridgeResult<T>
where
    D: Driver,
    T: Send + 'static,
    F: FnOnce(Option<&mut D::Session>) -> DriverResult<T> + Send + 'static,
{
    let shared: Option<Arc<Mutex<D::Session>>> = match session {
        Some(session) => {
            session.ensure_active()?;
            Some(session.shared_delegate())
        }
        None => None,
    };

    let (result, times) = run_sync(move || {
        let mut guard = shared.as_ref().map(|session| session.lock());
        let result = func(guard.as_deref_mut());
        let times = guard.as_deref().map(SessionTimes::read::<D>);
        Ok::<_, DocBridgeError>((result, times))
    })
    .await?;

    if let (Some(session), Some(times)) = (session, times) {
        session.record_times(times);
    }
    result.map_err(DocBridgeError::from)
}
