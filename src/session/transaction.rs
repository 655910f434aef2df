//! 事务作用域与重试算法

use rat_logger::{debug, info};
use std::future::Future;
use std::time::Instant;

use super::Session;
use crate::driver::Driver;
use crate::error::{DocBridgeResult, TRANSIENT_TRANSACTION_ERROR, UNKNOWN_TRANSACTION_COMMIT_RESULT};
use crate::types::TransactionOptions;

impl<D: Driver> Session<D> {
    /// 事务作用域
    ///
    /// 开始事务后运行 `body`：正常返回时若仍在事务中则提交；
    /// 出错时若仍在事务中则中止，并返回 `body` 的错误。"仍在事务中"在每个分支重新检查。
    pub async fn start_transaction<T, F, Fut>(&self, options: Option<TransactionOptions>, body: F) -> DocBridgeResult<T>
    where
        F: FnOnce(Session<D>) -> Fut,
        Fut: Future<Output = DocBridgeResult<T>>,
    {
        self.begin_transaction(options).await?;

        match body(self.clone()).await {
            Ok(value) => {
                if self.in_transaction() {
                    self.commit_transaction().await?;
                }
                Ok(value)
            }
            Err(err) => {
                if self.in_transaction() {
                    self.abort_transaction().await?;
                }
                Err(err)
            }
        }
    }

    /// 带重试的事务
    ///
    /// 1. 记录开始时刻；
    /// 2. 开始事务并运行回调；回调出错时若仍在事务中则中止，
    ///    错误带 `TransientTransactionError` 且未超出重试窗口时整体重来，否则返回错误；
    /// 3. 回调自己结束了事务时直接返回回调结果，不再提交；
    /// 4. 否则进入提交循环：`UnknownTransactionCommitResult`（且不是 MaxTimeMSExpired）
    ///    在窗口内只重试提交，`TransientTransactionError` 在窗口内整体重来，其余错误直接返回。
    ///
    /// 重试窗口默认 120 秒，由客户端的 [`TransactionRetryConfig`](crate::config::TransactionRetryConfig) 决定。
    pub async fn with_transaction<T, F, Fut>(&self, options: Option<TransactionOptions>, mut callback: F) -> DocBridgeResult<T>
    where
        F: FnMut(Session<D>) -> Fut,
        Fut: Future<Output = DocBridgeResult<T>>,
    {
        let start = Instant::now();
        let window = self.client().transaction_retry().timeout();
        let within_window = || start.elapsed() < window;
        let mut attempt: u32 = 0;

        'transaction: loop {
            attempt += 1;
            self.begin_transaction(options.clone()).await?;

            let value = match callback(self.clone()).await {
                Ok(value) => value,
                Err(err) => {
                    if self.in_transaction() {
                        self.abort_transaction().await?;
                    }
                    if err.has_error_label(TRANSIENT_TRANSACTION_ERROR) && within_window() {
                        info!("事务回调遇到临时错误，重试整个事务: 第{}次尝试", attempt);
                        continue 'transaction;
                    }
                    return Err(err);
                }
            };

            if !self.in_transaction() {
                debug!("回调已自行结束事务，跳过提交");
                return Ok(value);
            }

            loop {
                match self.commit_transaction().await {
                    Ok(()) => {
                        debug!("事务提交成功: 共{}次尝试", attempt);
                        return Ok(value);
                    }
                    Err(err) => {
                        if err.has_error_label(UNKNOWN_TRANSACTION_COMMIT_RESULT)
                            && !err.is_max_time_expired()
                            && within_window()
                        {
                            info!("提交结果未知，重试提交");
                            continue;
                        }
                        if err.has_error_label(TRANSIENT_TRANSACTION_ERROR) && within_window() {
                            info!("提交遇到临时错误，重试整个事务: 第{}次尝试", attempt);
                            continue 'transaction;
                        }
                        return Err(err);
                    }
                }
            }
        }
    }
}
