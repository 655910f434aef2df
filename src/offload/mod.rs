//! 线程卸载模块
//!
//! 把一次阻塞调用放到 tokio 的阻塞线程池中执行，调用方只在 await 处挂起。
//! 所有门面方法都通过 [`run_sync`] 访问同步驱动，不为任何方法做特殊处理。
//!
//! 两次先后发出的卸载调用之间没有顺序保证，需要顺序的调用方必须依次 await。
//! 取消等待并不会停止工作线程上正在执行的阻塞调用，它总会运行到结束。

use once_cell::sync::OnceCell;
use rat_logger::{info, warn};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::Semaphore;

use crate::error::{DocBridgeError, DocBridgeResult};

/// 进程级并发上限（可选）
static OFFLOAD_LIMITER: OnceCell<(usize, Arc<Semaphore>)> = OnceCell::new();

static SUBMITTED: AtomicU64 = AtomicU64::new(0);
static COMPLETED: AtomicU64 = AtomicU64::new(0);

/// 线程卸载配置
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OffloadConfig {
    /// 同时运行的卸载调用上限，None 表示只受 tokio 阻塞线程池本身的上限约束
    pub max_concurrency: Option<usize>,
}

impl Default for OffloadConfig {
    fn default() -> Self {
        Self { max_concurrency: None }
    }
}

/// 卸载统计信息
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct OffloadStats {
    /// 已提交的调用数
    pub submitted: u64,
    /// 已完成的调用数（含失败）
    pub completed: u64,
    /// 正在执行或排队中的调用数
    pub in_flight: u64,
}

/// 安装进程级并发上限
///
/// 上限只能设置一次；重复设置相同的值视为成功，不同的值返回配置错误。
pub fn configure(config: &OffloadConfig) -> DocBridgeResult<()> {
    let Some(max) = config.max_concurrency else {
        return Ok(());
    };

    if max == 0 {
        return Err(crate::quick_error!(
            config,
            crate::i18n::tf("error.config", &[("message", "max_concurrency 不能为零")])
        ));
    }

    match OFFLOAD_LIMITER.set((max, Arc::new(Semaphore::new(max)))) {
        Ok(()) => {
            info!("安装线程卸载并发上限: {}", max);
            Ok(())
        }
        Err(_) => {
            let installed = concurrency_limit();
            if installed == Some(max) {
                Ok(())
            } else {
                warn!("线程卸载并发上限已安装为 {:?}，忽略新值 {}", installed, max);
                Err(crate::quick_error!(
                    config,
                    crate::i18n::tf("error.config", &[("message", "线程卸载并发上限已经安装")])
                ))
            }
        }
    }
}

/// 当前安装的并发上限
pub fn concurrency_limit() -> Option<usize> {
    OFFLOAD_LIMITER.get().map(|(max, _)| *max)
}

/// 获取卸载统计
pub fn stats() -> OffloadStats {
    let submitted = SUBMITTED.load(Ordering::SeqCst);
    let completed = COMPLETED.load(Ordering::SeqCst);
    OffloadStats {
        submitted,
        completed,
        in_flight: submitted.saturating_sub(completed),
    }
}

/// 在工作线程上运行阻塞调用
///
/// 返回闭包的结果；闭包返回的错误原样转换为 [`DocBridgeError`]，
/// 闭包内的 panic 会在调用方重新抛出。
pub async fn run_sync<F, T, E>(func: F) -> DocBridgeResult<T>
where
    F: FnOnce() -> Result<T, E> + Send + 'static,
    T: Send + 'static,
    E: Into<DocBridgeError> + Send + 'static,
{
    let permit = match OFFLOAD_LIMITER.get() {
        Some((_, limiter)) => Some(limiter.clone().acquire_owned().await.map_err(|e| {
            crate::quick_error!(worker, crate::i18n::tf("error.worker", &[("message", &e.to_string())]))
        })?),
        None => None,
    };

    SUBMITTED.fetch_add(1, Ordering::SeqCst);
    let handle = tokio::task::spawn_blocking(move || {
        // 许可随闭包一起释放，即使调用方已经放弃等待
        let _permit = permit;
        let result = func();
        COMPLETED.fetch_add(1, Ordering::SeqCst);
        result
    });

    match handle.await {
        Ok(result) => result.map_err(Into::into),
        Err(join_error) if join_error.is_panic() => {
            COMPLETED.fetch_add(1, Ordering::SeqCst);
            std::panic::resume_unwind(join_error.into_panic())
        }
        Err(join_error) => Err(crate::quick_error!(
            worker,
            crate::i18n::tf("error.worker", &[("message", &join_error.to_string())])
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ProviderError;

    #[tokio::test]
    async fn test_runs_on_worker_thread() {
        let caller = std::thread::current().id();
        let worker = run_sync(move || Ok::<_, DocBridgeError>(std::thread::current().id()))
            .await
            .unwrap();
        assert_ne!(caller, worker);
    }

    #[tokio::test]
    async fn test_error_passes_through_unchanged() {
        let result: DocBridgeResult<()> = run_sync(|| {
            Err(ProviderError::new("boom").with_code(91).with_label("RetryableWriteError"))
        })
        .await;

        let err = result.unwrap_err();
        let provider = err.as_provider().expect("应为驱动错误");
        assert_eq!(provider.code(), Some(91));
        assert!(provider.has_error_label("RetryableWriteError"));
    }

    #[tokio::test]
    async fn test_stats_track_completion() {
        let before = stats();
        run_sync(|| Ok::<_, DocBridgeError>(1 + 1)).await.unwrap();
        let after = stats();
        assert!(after.submitted > before.submitted);
        assert!(after.completed > before.completed);
    }

    #[tokio::test]
    #[should_panic(expected = "驱动内部崩溃")]
    async fn test_panic_is_resumed() {
        let _ = run_sync(|| -> Result<(), DocBridgeError> { panic!("驱动内部崩溃") }).await;
    }

    #[test]
    fn test_zero_concurrency_rejected() {
        let err = configure(&OffloadConfig { max_concurrency: Some(0) }).unwrap_err();
        assert!(matches!(err, DocBridgeError::ConfigError { .. }));
    }
}
